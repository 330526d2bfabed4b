//! Core device abstraction
//!
//! The engine talks to the GPU exclusively through [`RenderDevice`]. The
//! interface keeps the shape of an immediate-mode API (bind a target, set
//! state, bind ranges, draw) so passes read as a linear sequence of state
//! transitions, while devices are free to record and replay the commands.

use crate::backend::types::*;
use thiserror::Error;

/// Device error type
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Failed to initialize device: {0}")]
    InitializationFailed(String),
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to create texture: {0}")]
    TextureCreationFailed(String),
    #[error("Failed to create program: {0}")]
    ProgramCreationFailed(String),
    #[error("Failed to create vertex binding: {0}")]
    BindingCreationFailed(String),
    #[error("Failed to create render target: {0}")]
    TargetCreationFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Device validation failed: {0}")]
    Validation(String),
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU texture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureHandle(pub(crate) u64);

/// Handle to a linked shader program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramHandle(pub(crate) u64);

/// Handle to a vertex binding (vertex/index buffers plus attribute wiring)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VertexBindingHandle(pub(crate) u64);

/// Handle to a render target (a set of attachments)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderTargetHandle(pub(crate) u64);

/// Main device trait
pub trait RenderDevice {
    /// Human readable device name
    fn name(&self) -> &'static str;

    /// Query device limits
    fn limits(&self) -> DeviceLimits;

    // Resource creation

    /// Create a buffer
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle>;

    /// Create a buffer with initial data
    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// Create a texture
    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle>;

    /// Upload one layer of pixel data (layer is 0 for 2D textures)
    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8])
        -> BackendResult<()>;

    /// Create a program from both stage sources
    fn create_program(&mut self, desc: &ProgramDescriptor<'_>) -> BackendResult<ProgramHandle>;

    /// Create a vertex binding
    fn create_vertex_binding(
        &mut self,
        desc: &VertexBindingDescriptor,
    ) -> BackendResult<VertexBindingHandle>;

    /// Create a render target from existing textures
    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle>;

    /// Check render target completeness
    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus;

    // Command recording

    /// Bind a render target and clear it
    fn begin_pass(&mut self, target: RenderTargetHandle, clear: &ClearValues) -> BackendResult<()>;

    /// Set fixed-function state for subsequent draws
    fn set_render_state(&mut self, state: &RenderState);

    /// Set the program for subsequent draws
    fn set_program(&mut self, program: ProgramHandle);

    /// Bind a byte range of a uniform buffer to a block slot
    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64);

    /// Bind a texture to a texture unit
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);

    /// Set the vertex binding for subsequent draws
    fn set_vertex_binding(&mut self, binding: VertexBindingHandle);

    /// Draw non-indexed primitives
    fn draw(&mut self, topology: PrimitiveTopology, vertex_count: u32);

    /// Draw indexed primitives (32-bit indices)
    fn draw_indexed(&mut self, topology: PrimitiveTopology, first_index: u32, index_count: u32);

    /// End the current pass
    fn end_pass(&mut self) -> BackendResult<()>;

    /// Copy the depth attachment of one target into another
    fn blit_depth(&mut self, src: RenderTargetHandle, dst: RenderTargetHandle)
        -> BackendResult<()>;

    /// Flush recorded work for the frame
    fn submit(&mut self) -> BackendResult<()>;

    // Resource cleanup

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    /// Destroy a texture
    fn destroy_texture(&mut self, texture: TextureHandle);

    /// Destroy a program
    fn destroy_program(&mut self, program: ProgramHandle);

    /// Destroy a vertex binding
    fn destroy_vertex_binding(&mut self, binding: VertexBindingHandle);

    /// Destroy a render target (attachments are not destroyed)
    fn destroy_render_target(&mut self, target: RenderTargetHandle);
}
