//! Dummy device for testing and headless development.
//!
//! This device doesn't perform GPU operations. It keeps resource descriptors
//! and buffer contents on the CPU and records every command it receives, so
//! tests can assert on the exact sequence of state transitions a pass issues.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;

/// A command recorded by [`DummyDevice`]
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceCommand {
    BeginPass {
        target: RenderTargetHandle,
        clear: ClearValues,
    },
    SetRenderState(RenderState),
    SetProgram(ProgramHandle),
    BindUniformRange {
        slot: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    BindTexture {
        unit: u32,
        texture: TextureHandle,
    },
    SetVertexBinding(VertexBindingHandle),
    Draw {
        topology: PrimitiveTopology,
        vertex_count: u32,
    },
    DrawIndexed {
        topology: PrimitiveTopology,
        first_index: u32,
        index_count: u32,
    },
    EndPass,
    BlitDepth {
        src: RenderTargetHandle,
        dst: RenderTargetHandle,
    },
    Submit,
}

struct DummyBuffer {
    desc: BufferDescriptor,
    data: Vec<u8>,
}

/// Dummy device
pub struct DummyDevice {
    limits: DeviceLimits,
    next_id: u64,
    buffers: HashMap<u64, DummyBuffer>,
    textures: HashMap<u64, TextureDescriptor>,
    programs: HashMap<u64, String>,
    bindings: HashMap<u64, VertexBindingDescriptor>,
    targets: HashMap<u64, RenderTargetDescriptor>,
    commands: Vec<DeviceCommand>,
    in_pass: bool,
}

impl DummyDevice {
    /// Create a dummy device with default limits.
    pub fn new() -> Self {
        Self::with_limits(DeviceLimits::default())
    }

    /// Create a dummy device reporting the given limits.
    pub fn with_limits(limits: DeviceLimits) -> Self {
        Self {
            limits,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            programs: HashMap::new(),
            bindings: HashMap::new(),
            targets: HashMap::new(),
            commands: Vec::new(),
            in_pass: false,
        }
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn record(&mut self, command: DeviceCommand) {
        if !self.in_pass {
            log::warn!("DummyDevice: {:?} recorded outside of a pass", command);
        }
        self.commands.push(command);
    }

    /// Commands recorded since the last [`take_commands`](Self::take_commands).
    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    /// Drain the recorded commands.
    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Current contents of a buffer.
    pub fn buffer_data(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(|b| b.data.as_slice())
    }

    /// Descriptor of a live texture.
    pub fn texture_descriptor(&self, texture: TextureHandle) -> Option<&TextureDescriptor> {
        self.textures.get(&texture.0)
    }

    /// Descriptor of a live vertex binding.
    pub fn vertex_binding(&self, binding: VertexBindingHandle) -> Option<&VertexBindingDescriptor> {
        self.bindings.get(&binding.0)
    }

    pub fn live_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn live_vertex_bindings(&self) -> usize {
        self.bindings.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn is_program_alive(&self, program: ProgramHandle) -> bool {
        self.programs.contains_key(&program.0)
    }

    fn target_depth(&self, target: RenderTargetHandle) -> BackendResult<&TextureDescriptor> {
        let desc = self
            .targets
            .get(&target.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", target)))?;
        desc.depth_attachment
            .and_then(|t| self.textures.get(&t.0))
            .ok_or_else(|| {
                BackendError::InvalidCommand(format!("{:?} has no depth attachment", target))
            })
    }
}

impl Default for DummyDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderDevice for DummyDevice {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            desc.label,
            desc.size
        );
        let id = self.allocate_id();
        self.buffers.insert(
            id,
            DummyBuffer {
                desc: desc.clone(),
                data: vec![0u8; desc.size as usize],
            },
        );
        Ok(BufferHandle(id))
    }

    fn create_buffer_init(
        &mut self,
        desc: &BufferDescriptor,
        data: &[u8],
    ) -> BackendResult<BufferHandle> {
        if data.len() as u64 > desc.size {
            return Err(BackendError::BufferCreationFailed(format!(
                "{} bytes of initial data for a {} byte buffer",
                data.len(),
                desc.size
            )));
        }
        let handle = self.create_buffer(desc)?;
        self.write_buffer(handle, 0, data)?;
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        log::trace!(
            "DummyDevice: write_buffer offset={} len={}",
            offset,
            data.len()
        );
        let entry = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        let end = offset as usize + data.len();
        if end > entry.data.len() {
            return Err(BackendError::InvalidCommand(format!(
                "write of {} bytes at {} overflows {:?} ({} bytes)",
                data.len(),
                offset,
                entry.desc.label,
                entry.data.len()
            )));
        }
        entry.data[offset as usize..end].copy_from_slice(data);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
        log::trace!(
            "DummyDevice: creating texture {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        if desc.width == 0 || desc.height == 0 {
            return Err(BackendError::TextureCreationFailed(format!(
                "{:?} has zero extent",
                desc.label
            )));
        }
        if desc.dimension == TextureDimension::Cube && desc.width != desc.height {
            return Err(BackendError::TextureCreationFailed(format!(
                "cubemap {:?} faces must be square",
                desc.label
            )));
        }
        let id = self.allocate_id();
        self.textures.insert(id, desc.clone());
        Ok(TextureHandle(id))
    }

    fn write_texture(
        &mut self,
        texture: TextureHandle,
        layer: u32,
        data: &[u8],
    ) -> BackendResult<()> {
        let desc = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        if layer >= desc.dimension.layers() {
            return Err(BackendError::InvalidCommand(format!(
                "layer {} out of range for {:?}",
                layer, desc.label
            )));
        }
        if data.len() != desc.layer_size() {
            return Err(BackendError::InvalidCommand(format!(
                "expected {} bytes for {:?}, got {}",
                desc.layer_size(),
                desc.label,
                data.len()
            )));
        }
        Ok(())
    }

    fn create_program(&mut self, desc: &ProgramDescriptor<'_>) -> BackendResult<ProgramHandle> {
        log::trace!(
            "DummyDevice: creating program {} ({} attributes)",
            desc.label,
            desc.interface.attributes.len()
        );
        let id = self.allocate_id();
        self.programs.insert(id, desc.label.to_string());
        Ok(ProgramHandle(id))
    }

    fn create_vertex_binding(
        &mut self,
        desc: &VertexBindingDescriptor,
    ) -> BackendResult<VertexBindingHandle> {
        if !self.buffers.contains_key(&desc.vertex_buffer.0) {
            return Err(BackendError::InvalidHandle(format!(
                "{:?}",
                desc.vertex_buffer
            )));
        }
        let id = self.allocate_id();
        self.bindings.insert(id, desc.clone());
        Ok(VertexBindingHandle(id))
    }

    fn create_render_target(
        &mut self,
        desc: &RenderTargetDescriptor,
    ) -> BackendResult<RenderTargetHandle> {
        let id = self.allocate_id();
        self.targets.insert(id, desc.clone());
        Ok(RenderTargetHandle(id))
    }

    fn render_target_status(&self, target: RenderTargetHandle) -> TargetStatus {
        let Some(desc) = self.targets.get(&target.0) else {
            return TargetStatus::Undefined;
        };
        let color: Vec<_> = desc
            .color_attachments
            .iter()
            .map(|t| self.textures.get(&t.0))
            .collect();
        let depth = desc.depth_attachment.map(|t| self.textures.get(&t.0));
        evaluate_target(&color, depth)
    }

    fn begin_pass(&mut self, target: RenderTargetHandle, clear: &ClearValues) -> BackendResult<()> {
        if self.in_pass {
            return Err(BackendError::InvalidCommand(
                "begin_pass while a pass is open".into(),
            ));
        }
        if !self.targets.contains_key(&target.0) {
            return Err(BackendError::InvalidHandle(format!("{:?}", target)));
        }
        self.in_pass = true;
        self.commands.push(DeviceCommand::BeginPass {
            target,
            clear: *clear,
        });
        Ok(())
    }

    fn set_render_state(&mut self, state: &RenderState) {
        self.record(DeviceCommand::SetRenderState(*state));
    }

    fn set_program(&mut self, program: ProgramHandle) {
        if !self.programs.contains_key(&program.0) {
            log::warn!("DummyDevice: binding destroyed program {:?}", program);
        }
        self.record(DeviceCommand::SetProgram(program));
    }

    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64) {
        if offset % self.limits.uniform_offset_alignment as u64 != 0 {
            log::warn!(
                "DummyDevice: uniform range offset {} is not aligned to {}",
                offset,
                self.limits.uniform_offset_alignment
            );
        }
        self.record(DeviceCommand::BindUniformRange {
            slot,
            buffer,
            offset,
            size,
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.record(DeviceCommand::BindTexture { unit, texture });
    }

    fn set_vertex_binding(&mut self, binding: VertexBindingHandle) {
        if !self.bindings.contains_key(&binding.0) {
            log::warn!("DummyDevice: binding destroyed vertex binding {:?}", binding);
        }
        self.record(DeviceCommand::SetVertexBinding(binding));
    }

    fn draw(&mut self, topology: PrimitiveTopology, vertex_count: u32) {
        self.record(DeviceCommand::Draw {
            topology,
            vertex_count,
        });
    }

    fn draw_indexed(&mut self, topology: PrimitiveTopology, first_index: u32, index_count: u32) {
        self.record(DeviceCommand::DrawIndexed {
            topology,
            first_index,
            index_count,
        });
    }

    fn end_pass(&mut self) -> BackendResult<()> {
        if !self.in_pass {
            return Err(BackendError::InvalidCommand("end_pass without a pass".into()));
        }
        self.commands.push(DeviceCommand::EndPass);
        self.in_pass = false;
        Ok(())
    }

    fn blit_depth(
        &mut self,
        src: RenderTargetHandle,
        dst: RenderTargetHandle,
    ) -> BackendResult<()> {
        let src_depth = self.target_depth(src)?;
        let dst_depth = self.target_depth(dst)?;
        if (src_depth.width, src_depth.height) != (dst_depth.width, dst_depth.height) {
            return Err(BackendError::InvalidCommand(
                "depth blit between targets of different sizes".into(),
            ));
        }
        self.commands.push(DeviceCommand::BlitDepth { src, dst });
        Ok(())
    }

    fn submit(&mut self) -> BackendResult<()> {
        log::trace!("DummyDevice: submit ({} commands)", self.commands.len());
        self.commands.push(DeviceCommand::Submit);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        self.textures.remove(&texture.0);
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program.0);
    }

    fn destroy_vertex_binding(&mut self, binding: VertexBindingHandle) {
        self.bindings.remove(&binding.0);
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.targets.remove(&target.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform_buffer(device: &mut DummyDevice, size: u64) -> BufferHandle {
        device
            .create_buffer(&BufferDescriptor {
                label: Some("test".into()),
                size,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap()
    }

    #[test]
    fn test_write_buffer_bounds() {
        let mut device = DummyDevice::new();
        let buffer = uniform_buffer(&mut device, 8);

        device.write_buffer(buffer, 4, &[1, 2, 3, 4]).unwrap();
        assert_eq!(device.buffer_data(buffer).unwrap(), &[0, 0, 0, 0, 1, 2, 3, 4]);
        assert!(device.write_buffer(buffer, 6, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_pass_nesting() {
        let mut device = DummyDevice::new();
        let color = device
            .create_texture(&TextureDescriptor::attachment(
                "c",
                4,
                4,
                TextureFormat::Rgba8Unorm,
            ))
            .unwrap();
        let target = device
            .create_render_target(&RenderTargetDescriptor {
                label: None,
                color_attachments: vec![color],
                depth_attachment: None,
            })
            .unwrap();

        assert!(device.end_pass().is_err());
        device.begin_pass(target, &ClearValues::default()).unwrap();
        assert!(device.begin_pass(target, &ClearValues::default()).is_err());
        device.end_pass().unwrap();
        assert_eq!(device.render_target_status(target), TargetStatus::Complete);

        device.destroy_texture(color);
        assert_eq!(device.render_target_status(target), TargetStatus::Undefined);
    }

    #[test]
    fn test_cubemap_layers() {
        let mut device = DummyDevice::new();
        let cube = device
            .create_texture(&TextureDescriptor {
                width: 2,
                height: 2,
                dimension: TextureDimension::Cube,
                ..Default::default()
            })
            .unwrap();

        assert!(device.write_texture(cube, 5, &[255; 16]).is_ok());
        assert!(device.write_texture(cube, 6, &[255; 16]).is_err());
        assert!(device.write_texture(cube, 0, &[255; 4]).is_err());
    }
}
