//! Aligned per-frame uniform allocator.
//!
//! A [`FrameBuffer`] is a linear, append-only byte region that stages the
//! uniform data of one frame (global lighting parameters, per-entity
//! transforms, per-draw material blocks) before it is uploaded to a single
//! device buffer. Passes then bind sub-ranges of that buffer by offset.
//!
//! # Frame protocol
//!
//! The region is rewritten from offset 0 every frame. Writing happens through a
//! [`FrameWriter`] guard obtained from [`FrameBuffer::map`]: acquiring it resets
//! the cursor, dropping it uploads `[0, head)` and unmaps, whatever happened
//! in between.
//!
//! ```ignore
//! let mut writer = frame.map(&mut device);
//! let global = writer.push_vec3(camera_position)?;
//! writer.push_u32(light_count)?;
//! writer.align_to(limits.uniform_offset_alignment as u64)?;
//! let local = writer.push_mat4(world)?;
//! drop(writer); // uploaded here
//! ```
//!
//! # Alignment
//!
//! Every push aligns the cursor to a caller-chosen power of two first. Padding
//! bytes are skipped, not cleared. The typed helpers use the alignments the
//! shader block layout expects: 4 for scalars, 16 for vectors and matrices.

use std::ops::{Deref, DerefMut};

use glam::{Mat3, Mat4, Vec3, Vec4};
use thiserror::Error;

use crate::backend::{BackendResult, BufferDescriptor, BufferHandle, BufferUsage, RenderDevice};

/// Frame buffer errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameBufferError {
    #[error("Frame buffer out of space: {size} bytes at offset {offset} exceeds capacity {capacity}")]
    OutOfSpace { offset: u64, size: u64, capacity: u64 },
    #[error("Alignment must be a non-zero power of 2, got {0}")]
    InvalidAlignment(u64),
    #[error("Frame buffer capacity cannot be zero")]
    ZeroCapacity,
}

pub type FrameResult<T> = Result<T, FrameBufferError>;

/// A byte range inside the frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UniformRange {
    /// Byte offset into the frame buffer.
    pub offset: u64,
    /// Size of the range in bytes.
    pub size: u64,
}

impl UniformRange {
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Range spanning from `start` to the allocator's current head.
    pub fn since(start: u64, frame: &FrameBuffer) -> Self {
        Self {
            offset: start,
            size: frame.head() - start,
        }
    }

    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Linear aligned allocator backing the per-frame uniform buffer.
pub struct FrameBuffer {
    data: Vec<u8>,
    head: u64,
    device_buffer: Option<BufferHandle>,
    mapped: bool,
}

impl FrameBuffer {
    /// Alignment used for vector and matrix pushes.
    pub const VEC4_ALIGNMENT: u64 = 16;
    /// Alignment used for scalar pushes.
    pub const SCALAR_ALIGNMENT: u64 = 4;

    /// Create a CPU-only frame buffer.
    ///
    /// Mapping it still resets the cursor, but nothing is uploaded on unmap.
    pub fn new(capacity: u64) -> FrameResult<Self> {
        if capacity == 0 {
            return Err(FrameBufferError::ZeroCapacity);
        }
        Ok(Self {
            data: vec![0u8; capacity as usize],
            head: 0,
            device_buffer: None,
            mapped: false,
        })
    }

    /// Create a frame buffer together with its device-side uniform buffer.
    pub fn create<D: RenderDevice>(device: &mut D, capacity: u64) -> crate::EngineResult<Self> {
        let mut frame = Self::new(capacity)?;
        let buffer = device.create_buffer(&BufferDescriptor {
            label: Some("frame_uniforms".to_string()),
            size: capacity,
            usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
        })?;
        log::info!("Frame buffer created ({} bytes)", capacity);
        frame.device_buffer = Some(buffer);
        Ok(frame)
    }

    /// Device buffer the staged bytes are uploaded to.
    pub fn device_buffer(&self) -> Option<BufferHandle> {
        self.device_buffer
    }

    pub fn capacity(&self) -> u64 {
        self.data.len() as u64
    }

    /// Current write cursor.
    pub fn head(&self) -> u64 {
        self.head
    }

    pub fn remaining(&self) -> u64 {
        self.capacity() - self.head
    }

    pub fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Bytes written since the last reset, including padding.
    pub fn contents(&self) -> &[u8] {
        &self.data[..self.head as usize]
    }

    /// Rewind the cursor to 0.
    pub fn reset(&mut self) {
        self.head = 0;
    }

    /// Advance the cursor to the next multiple of `alignment` without writing.
    ///
    /// Returns the new cursor.
    pub fn align_to(&mut self, alignment: u64) -> FrameResult<u64> {
        let aligned = self.aligned_head(alignment)?;
        if aligned > self.capacity() {
            return Err(FrameBufferError::OutOfSpace {
                offset: aligned,
                size: 0,
                capacity: self.capacity(),
            });
        }
        self.zero_padding(aligned);
        self.head = aligned;
        Ok(aligned)
    }

    /// Copy `data` at the next multiple of `alignment`.
    ///
    /// Returns the offset the data was written at. Fails without writing
    /// anything if the padded write would run past the capacity.
    pub fn push(&mut self, data: &[u8], alignment: u64) -> FrameResult<u64> {
        let offset = self.aligned_head(alignment)?;
        let size = data.len() as u64;
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= self.capacity())
            .ok_or(FrameBufferError::OutOfSpace {
                offset,
                size,
                capacity: self.capacity(),
            })?;

        self.zero_padding(offset);
        self.data[offset as usize..end as usize].copy_from_slice(data);
        self.head = end;
        Ok(offset)
    }

    /// Clear `[head, to)` so padding never carries bytes from an earlier frame.
    fn zero_padding(&mut self, to: u64) {
        self.data[self.head as usize..to as usize].fill(0);
    }

    /// Push raw bytes with no alignment.
    pub fn push_bytes(&mut self, data: &[u8]) -> FrameResult<u64> {
        self.push(data, 1)
    }

    pub fn push_u32(&mut self, value: u32) -> FrameResult<u64> {
        self.push(bytemuck::bytes_of(&value), Self::SCALAR_ALIGNMENT)
    }

    pub fn push_f32(&mut self, value: f32) -> FrameResult<u64> {
        self.push(bytemuck::bytes_of(&value), Self::SCALAR_ALIGNMENT)
    }

    /// Push 12 bytes at a 16 byte boundary.
    pub fn push_vec3(&mut self, value: Vec3) -> FrameResult<u64> {
        self.push(bytemuck::bytes_of(&value), Self::VEC4_ALIGNMENT)
    }

    pub fn push_vec4(&mut self, value: Vec4) -> FrameResult<u64> {
        self.push(bytemuck::bytes_of(&value), Self::VEC4_ALIGNMENT)
    }

    /// Push a 3x3 matrix as three 16 byte columns.
    pub fn push_mat3(&mut self, value: Mat3) -> FrameResult<u64> {
        let columns = [
            value.x_axis.extend(0.0),
            value.y_axis.extend(0.0),
            value.z_axis.extend(0.0),
        ];
        self.push(bytemuck::cast_slice(&columns), Self::VEC4_ALIGNMENT)
    }

    pub fn push_mat4(&mut self, value: Mat4) -> FrameResult<u64> {
        self.push(bytemuck::bytes_of(&value), Self::VEC4_ALIGNMENT)
    }

    /// Map the buffer for this frame's writes.
    ///
    /// The cursor is reset to 0. The returned guard uploads the written bytes
    /// and unmaps when dropped.
    pub fn map<'a, D: RenderDevice>(&'a mut self, device: &'a mut D) -> FrameWriter<'a, D> {
        if self.mapped {
            log::warn!("Frame buffer mapped twice in one frame");
        }
        self.mapped = true;
        self.reset();
        FrameWriter {
            frame: self,
            device,
        }
    }

    fn aligned_head(&self, alignment: u64) -> FrameResult<u64> {
        if alignment == 0 || !alignment.is_power_of_two() {
            return Err(FrameBufferError::InvalidAlignment(alignment));
        }
        Ok(align_up(self.head, alignment))
    }

    fn upload<D: RenderDevice>(&self, device: &mut D) -> BackendResult<()> {
        let Some(buffer) = self.device_buffer else {
            return Ok(());
        };
        if self.head == 0 {
            return Ok(());
        }
        // Device copies work in 4 byte units
        let len = align_up(self.head, 4).min(self.capacity());
        device.write_buffer(buffer, 0, &self.data[..len as usize])
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("capacity", &self.capacity())
            .field("head", &self.head)
            .field("device_buffer", &self.device_buffer)
            .field("mapped", &self.mapped)
            .finish()
    }
}

/// Scoped mapping of a [`FrameBuffer`].
///
/// Derefs to the frame buffer for pushes. Dropping the guard uploads the
/// written range to the device buffer and unmaps, even on early return.
pub struct FrameWriter<'a, D: RenderDevice> {
    frame: &'a mut FrameBuffer,
    device: &'a mut D,
}

impl<D: RenderDevice> Deref for FrameWriter<'_, D> {
    type Target = FrameBuffer;

    fn deref(&self) -> &Self::Target {
        self.frame
    }
}

impl<D: RenderDevice> DerefMut for FrameWriter<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.frame
    }
}

impl<D: RenderDevice> Drop for FrameWriter<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.frame.upload(self.device) {
            log::error!("Failed to upload frame uniforms: {}", e);
        }
        self.frame.mapped = false;
    }
}

/// Align a value up to the given alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}
