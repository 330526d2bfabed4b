//! renderlab - a small rendering engine for experimenting with render modes
//!
//! The engine renders a scene in one of three modes:
//! - **Textured quad**: a single textured quad, the smallest possible frame
//! - **Textured mesh**: forward shading of every entity
//! - **Deferred**: G-buffer, skybox and lighting passes, then a depth blit
//!
//! # Features
//! - Per-frame aligned uniform allocator ([`frame::FrameBuffer`])
//! - GLSL programs composed from one source file per program family, with
//!   reflection and hot reload when the file changes on disk
//! - Per-program vertex binding cache on every mesh part
//! - A recording [`DummyDevice`] for tests and a headless wgpu device
//!
//! Windowing and presentation are left to the host: [`Engine::displayed_texture`]
//! names the texture to show each frame.

pub mod backend;
pub mod engine;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod resources;
pub mod scene;
pub mod shader;

use std::path::PathBuf;

pub use backend::{DummyDevice, RenderDevice};
#[cfg(feature = "wgpu-backend")]
pub use backend::WgpuDevice;
pub use engine::Engine;
pub use error::{AssetError, EngineError, EngineResult};
pub use pipeline::{DisplayAttachment, RenderMode};

/// Backend selection for the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendType {
    /// Records commands without a GPU
    Dummy,
    /// Headless wgpu device
    #[default]
    Wgpu,
}

/// Configuration for initializing the engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Render target width
    pub width: u32,
    /// Render target height
    pub height: u32,
    /// Directory holding `shaders/`, the quad texture and the skybox faces
    pub asset_root: PathBuf,
    /// Frame buffer size in bytes, defaults to the device's uniform block limit
    pub frame_buffer_capacity: Option<u64>,
    pub render_mode: RenderMode,
    /// Deferred attachment presented in deferred mode
    pub display_attachment: DisplayAttachment,
    /// Clear color of the forward target
    pub clear_color: [f32; 4],
    /// Must not exceed the light array size declared by the shaders
    pub max_lights: usize,
    /// Which device the host should create
    pub backend: BackendType,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            asset_root: PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("assets"),
            frame_buffer_capacity: None,
            render_mode: RenderMode::default(),
            display_attachment: DisplayAttachment::default(),
            clear_color: [0.1, 0.1, 0.1, 1.0],
            max_lights: 16,
            backend: BackendType::default(),
        }
    }
}

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
