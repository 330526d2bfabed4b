//! Device abstraction layer
//!
//! Provides the [`RenderDevice`] trait, the types shared by devices, a
//! recording [`DummyDevice`] and (behind `wgpu-backend`) a headless wgpu device.

pub mod dummy;
pub mod traits;
pub mod types;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use dummy::{DeviceCommand, DummyDevice};
pub use traits::*;
pub use types::*;
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::WgpuDevice;
