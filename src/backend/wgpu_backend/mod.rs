//! Headless wgpu device
//!
//! Renders into offscreen textures only; presenting is left to the host.
//!
//! The immediate-style calls of [`RenderDevice`] are mapped onto wgpu like so:
//! - Draw calls are recorded into the open pass and replayed into a real
//!   `wgpu::RenderPass` on `end_pass`.
//! - Render pipelines are created lazily per (program, vertex layout,
//!   topology, render state, target formats) and cached until the program is
//!   destroyed.
//! - Bind groups are built from the slots bound at draw time and cached until
//!   the next `submit`.
//! - Attributes a program reads but a vertex binding does not provide are fed
//!   from a zero buffer with stride 0.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroU64;
use std::ops::Range;

use wgpu::util::DeviceExt;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::shader::TEXTURE_SET;

/// Size of the buffer feeding missing attributes
const ZERO_BUFFER_SIZE: u64 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SamplerKey {
    filter: FilterMode,
    address_mode: AddressMode,
}

struct TextureEntry {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    desc: TextureDescriptor,
}

struct ProgramEntry {
    label: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    interface: ProgramInterface,
    set_layouts: Vec<wgpu::BindGroupLayout>,
    layout: wgpu::PipelineLayout,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramHandle,
    stride: u32,
    attributes: Vec<BoundAttribute>,
    /// Attributes fed from the zero buffer
    missing: Vec<(u32, VertexFormat)>,
    topology: PrimitiveTopology,
    state: RenderState,
    color_formats: Vec<TextureFormat>,
    depth_format: Option<TextureFormat>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BindGroupKey {
    Uniform {
        program: ProgramHandle,
        set: u32,
        buffer: BufferHandle,
        offset: u64,
        size: u64,
    },
    Textures {
        program: ProgramHandle,
        textures: Vec<(u32, TextureHandle)>,
    },
    Empty {
        program: ProgramHandle,
        set: u32,
    },
}

#[derive(Debug, Clone, Copy)]
struct UniformBinding {
    buffer: BufferHandle,
    offset: u64,
    size: u64,
}

/// State set by the immediate-style calls, consumed at draw time
#[derive(Default)]
struct DrawState {
    render_state: RenderState,
    program: Option<ProgramHandle>,
    vertex_binding: Option<VertexBindingHandle>,
    uniforms: BTreeMap<u32, UniformBinding>,
    textures: BTreeMap<u32, TextureHandle>,
}

#[derive(Debug, Clone)]
enum DrawRange {
    Vertices(Range<u32>),
    Indices(Range<u32>),
}

/// A draw resolved to wgpu objects, replayed on `end_pass`
struct DrawCall {
    pipeline: u64,
    bind_groups: Vec<usize>,
    vertex_buffer: BufferHandle,
    vertex_offset: u64,
    zero_attributes: bool,
    index_buffer: Option<BufferHandle>,
    range: DrawRange,
}

struct PendingPass {
    target: RenderTargetHandle,
    clear: ClearValues,
    draws: Vec<DrawCall>,
}

/// Offscreen wgpu device
pub struct WgpuDevice {
    #[allow(dead_code)]
    instance: wgpu::Instance,
    adapter_info: wgpu::AdapterInfo,
    device: wgpu::Device,
    queue: wgpu::Queue,
    limits: DeviceLimits,

    next_id: u64,
    buffers: HashMap<u64, wgpu::Buffer>,
    textures: HashMap<u64, TextureEntry>,
    samplers: HashMap<SamplerKey, wgpu::Sampler>,
    programs: HashMap<u64, ProgramEntry>,
    bindings: HashMap<u64, VertexBindingDescriptor>,
    targets: HashMap<u64, RenderTargetDescriptor>,
    zero_buffer: wgpu::Buffer,

    pipeline_ids: HashMap<PipelineKey, u64>,
    pipelines: HashMap<u64, wgpu::RenderPipeline>,
    bind_group_ids: HashMap<BindGroupKey, usize>,
    bind_groups: Vec<wgpu::BindGroup>,

    state: DrawState,
    pass: Option<PendingPass>,
    encoder: Option<wgpu::CommandEncoder>,
}

impl WgpuDevice {
    fn convert_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
        match format {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
        }
    }

    fn convert_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
        let mut result = wgpu::BufferUsages::empty();
        if usage.contains(BufferUsage::COPY_DST) {
            result |= wgpu::BufferUsages::COPY_DST;
        }
        if usage.contains(BufferUsage::INDEX) {
            result |= wgpu::BufferUsages::INDEX;
        }
        if usage.contains(BufferUsage::VERTEX) {
            result |= wgpu::BufferUsages::VERTEX;
        }
        if usage.contains(BufferUsage::UNIFORM) {
            result |= wgpu::BufferUsages::UNIFORM;
        }
        result
    }

    fn convert_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
        let mut result = wgpu::TextureUsages::empty();
        if usage.contains(TextureUsage::COPY_SRC) {
            result |= wgpu::TextureUsages::COPY_SRC;
        }
        if usage.contains(TextureUsage::COPY_DST) {
            result |= wgpu::TextureUsages::COPY_DST;
        }
        if usage.contains(TextureUsage::TEXTURE_BINDING) {
            result |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            result |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        result
    }

    fn convert_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
        match format {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        }
    }

    fn convert_compare_function(func: CompareFunction) -> wgpu::CompareFunction {
        match func {
            CompareFunction::Never => wgpu::CompareFunction::Never,
            CompareFunction::Less => wgpu::CompareFunction::Less,
            CompareFunction::Equal => wgpu::CompareFunction::Equal,
            CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunction::Greater => wgpu::CompareFunction::Greater,
            CompareFunction::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunction::Always => wgpu::CompareFunction::Always,
        }
    }

    fn convert_blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
        match factor {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        }
    }

    fn convert_blend_component(component: BlendComponent) -> wgpu::BlendComponent {
        wgpu::BlendComponent {
            src_factor: Self::convert_blend_factor(component.src_factor),
            dst_factor: Self::convert_blend_factor(component.dst_factor),
            operation: match component.operation {
                BlendOperation::Add => wgpu::BlendOperation::Add,
                BlendOperation::Subtract => wgpu::BlendOperation::Subtract,
            },
        }
    }

    fn convert_filter_mode(mode: FilterMode) -> wgpu::FilterMode {
        match mode {
            FilterMode::Nearest => wgpu::FilterMode::Nearest,
            FilterMode::Linear => wgpu::FilterMode::Linear,
        }
    }

    fn convert_address_mode(mode: AddressMode) -> wgpu::AddressMode {
        match mode {
            AddressMode::ClampToEdge => wgpu::AddressMode::ClampToEdge,
            AddressMode::Repeat => wgpu::AddressMode::Repeat,
        }
    }

    fn convert_view_dimension(dimension: TextureDimension) -> wgpu::TextureViewDimension {
        match dimension {
            TextureDimension::D2 => wgpu::TextureViewDimension::D2,
            TextureDimension::Cube => wgpu::TextureViewDimension::Cube,
        }
    }
}

impl WgpuDevice {
    /// Create a headless device on the first suitable adapter.
    pub fn new() -> BackendResult<Self> {
        pollster::block_on(Self::new_async())
    }

    pub async fn new_async() -> BackendResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| BackendError::InitializationFailed("No suitable adapter found".into()))?;

        let adapter_info = adapter.get_info();
        log::info!(
            "Selected GPU: {} ({:?} backend)",
            adapter_info.name,
            adapter_info.backend
        );

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("renderlab device"),
                    required_features: wgpu::Features::empty(),
                    required_limits: wgpu::Limits::default(),
                },
                None,
            )
            .await
            .map_err(|e| BackendError::InitializationFailed(e.to_string()))?;

        device.on_uncaptured_error(Box::new(|error: wgpu::Error| {
            log::error!("wgpu error: {}", error);
        }));

        let device_limits = device.limits();
        let limits = DeviceLimits {
            uniform_offset_alignment: device_limits.min_uniform_buffer_offset_alignment,
            max_uniform_block_size: device_limits.max_uniform_buffer_binding_size as u64,
        };

        let zero_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("zero_attributes"),
            contents: &[0u8; ZERO_BUFFER_SIZE as usize],
            usage: wgpu::BufferUsages::VERTEX,
        });

        Ok(Self {
            instance,
            adapter_info,
            device,
            queue,
            limits,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            programs: HashMap::new(),
            bindings: HashMap::new(),
            targets: HashMap::new(),
            zero_buffer,
            pipeline_ids: HashMap::new(),
            pipelines: HashMap::new(),
            bind_group_ids: HashMap::new(),
            bind_groups: Vec::new(),
            state: DrawState::default(),
            pass: None,
            encoder: None,
        })
    }

    pub fn adapter_info(&self) -> &wgpu::AdapterInfo {
        &self.adapter_info
    }

    pub fn wgpu_device(&self) -> &wgpu::Device {
        &self.device
    }

    /// The wgpu texture behind a handle, for hosts that present it.
    pub fn wgpu_texture(&self, texture: TextureHandle) -> Option<&wgpu::Texture> {
        self.textures.get(&texture.0).map(|t| &t.texture)
    }

    /// Read back a 2D texture, rows tightly packed.
    ///
    /// Waits for all submitted work.
    pub fn read_texture(&mut self, texture: TextureHandle) -> BackendResult<Vec<u8>> {
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        let desc = &entry.desc;
        let row_bytes = desc.width * desc.format.bytes_per_pixel();
        let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("readback"),
            size: padded_row as u64 * desc.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("readback") });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(desc.height),
                },
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (sender, receiver) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        receiver
            .recv()
            .map_err(|_| BackendError::DeviceLost)?
            .map_err(|e| BackendError::InvalidCommand(format!("readback failed: {}", e)))?;

        let mut pixels = Vec::with_capacity((row_bytes * desc.height) as usize);
        {
            let mapped = slice.get_mapped_range();
            for row in mapped.chunks(padded_row as usize) {
                pixels.extend_from_slice(&row[..row_bytes as usize]);
            }
        }
        staging.unmap();
        Ok(pixels)
    }

    fn allocate_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Run `f` inside a validation error scope.
    fn validated<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f(&self.device);
        match pollster::block_on(self.device.pop_error_scope()) {
            Some(error) => Err(error.to_string()),
            None => Ok(value),
        }
    }

    fn sampler_for(&mut self, desc: &TextureDescriptor) {
        let key = SamplerKey {
            filter: desc.filter,
            address_mode: desc.address_mode,
        };
        if self.samplers.contains_key(&key) {
            return;
        }
        let address_mode = Self::convert_address_mode(key.address_mode);
        let filter = Self::convert_filter_mode(key.filter);
        let sampler = self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: None,
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });
        self.samplers.insert(key, sampler);
    }

    fn set_layout_entries(interface: &ProgramInterface, set: u32) -> Vec<wgpu::BindGroupLayoutEntry> {
        let visibility = wgpu::ShaderStages::VERTEX_FRAGMENT;
        if set == TEXTURE_SET {
            return interface
                .texture_units
                .iter()
                .flat_map(|unit| {
                    [
                        wgpu::BindGroupLayoutEntry {
                            binding: unit.unit * 2,
                            visibility,
                            ty: wgpu::BindingType::Texture {
                                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                                view_dimension: Self::convert_view_dimension(unit.dimension),
                                multisampled: false,
                            },
                            count: None,
                        },
                        wgpu::BindGroupLayoutEntry {
                            binding: unit.unit * 2 + 1,
                            visibility,
                            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                            count: None,
                        },
                    ]
                })
                .collect();
        }

        interface
            .uniform_slots
            .iter()
            .filter(|slot| slot.slot == set)
            .map(|_| wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            })
            .collect()
    }

    fn target_formats(&self, target: RenderTargetHandle) -> BackendResult<(Vec<TextureFormat>, Option<TextureFormat>)> {
        let desc = self
            .targets
            .get(&target.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", target)))?;
        let format = |handle: &TextureHandle| {
            self.textures
                .get(&handle.0)
                .map(|t| t.desc.format)
                .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", handle)))
        };
        let color = desc
            .color_attachments
            .iter()
            .map(format)
            .collect::<BackendResult<Vec<_>>>()?;
        let depth = desc.depth_attachment.as_ref().map(format).transpose()?;
        Ok((color, depth))
    }

    fn pipeline(&mut self, key: PipelineKey) -> BackendResult<u64> {
        if let Some(&id) = self.pipeline_ids.get(&key) {
            return Ok(id);
        }
        let pipeline = self.create_pipeline(&key)?;
        let id = self.allocate_id();
        self.pipelines.insert(id, pipeline);
        self.pipeline_ids.insert(key, id);
        Ok(id)
    }

    fn create_pipeline(&self, key: &PipelineKey) -> BackendResult<wgpu::RenderPipeline> {
        let program = self
            .programs
            .get(&key.program.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", key.program)))?;

        let attributes: Vec<wgpu::VertexAttribute> = key
            .attributes
            .iter()
            .map(|a| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(a.format),
                offset: a.offset as u64,
                shader_location: a.location,
            })
            .collect();
        let zero_attributes: Vec<wgpu::VertexAttribute> = key
            .missing
            .iter()
            .map(|&(location, format)| wgpu::VertexAttribute {
                format: Self::convert_vertex_format(format),
                offset: 0,
                shader_location: location,
            })
            .collect();

        let mut vertex_buffers = vec![wgpu::VertexBufferLayout {
            array_stride: key.stride as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];
        if !zero_attributes.is_empty() {
            vertex_buffers.push(wgpu::VertexBufferLayout {
                array_stride: 0,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &zero_attributes,
            });
        }

        let state = key.state;
        let blend = state.blend.map(|b| wgpu::BlendState {
            color: Self::convert_blend_component(b.color),
            alpha: Self::convert_blend_component(b.alpha),
        });
        // Attachments the program does not write keep their contents
        let color_targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .enumerate()
            .map(|(index, &format)| {
                let write_mask = if (index as u32) < program.interface.color_outputs {
                    wgpu::ColorWrites::ALL
                } else {
                    wgpu::ColorWrites::empty()
                };
                Some(wgpu::ColorTargetState {
                    format: Self::convert_texture_format(format),
                    blend,
                    write_mask,
                })
            })
            .collect();

        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format: Self::convert_texture_format(format),
            depth_write_enabled: state.depth_test && state.depth_write,
            depth_compare: if state.depth_test {
                Self::convert_compare_function(state.depth_compare)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let primitive = wgpu::PrimitiveState {
            topology: match key.topology {
                PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
            },
            cull_mode: match state.cull_mode {
                CullMode::None => None,
                CullMode::Front => Some(wgpu::Face::Front),
                CullMode::Back => Some(wgpu::Face::Back),
            },
            ..Default::default()
        };

        self.validated(|device| {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(program.label.as_str()),
                layout: Some(&program.layout),
                vertex: wgpu::VertexState {
                    module: &program.vertex,
                    entry_point: "main",
                    buffers: &vertex_buffers,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                fragment: Some(wgpu::FragmentState {
                    module: &program.fragment,
                    entry_point: "main",
                    targets: &color_targets,
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                primitive,
                depth_stencil,
                multisample: wgpu::MultisampleState::default(),
                multiview: None,
            })
        })
        .map_err(|e| BackendError::Validation(format!("pipeline for {}: {}", program.label, e)))
    }

    fn bind_group_keys(&self, handle: ProgramHandle, program: &ProgramEntry) -> BackendResult<Vec<BindGroupKey>> {
        let mut keys = Vec::with_capacity(program.set_layouts.len());
        for set in 0..program.set_layouts.len() as u32 {
            if set == TEXTURE_SET && !program.interface.texture_units.is_empty() {
                let textures = program
                    .interface
                    .texture_units
                    .iter()
                    .map(|unit| {
                        self.state
                            .textures
                            .get(&unit.unit)
                            .map(|&texture| (unit.unit, texture))
                            .ok_or_else(|| {
                                BackendError::InvalidCommand(format!("texture unit {} is not bound", unit.unit))
                            })
                    })
                    .collect::<BackendResult<Vec<_>>>()?;
                keys.push(BindGroupKey::Textures {
                    program: handle,
                    textures,
                });
                continue;
            }

            let Some(slot) = program.interface.uniform_slots.iter().find(|s| s.slot == set) else {
                keys.push(BindGroupKey::Empty { program: handle, set });
                continue;
            };
            let bound = self.state.uniforms.get(&set).ok_or_else(|| {
                BackendError::InvalidCommand(format!("uniform slot {} is not bound", set))
            })?;
            let capacity = self
                .buffers
                .get(&bound.buffer.0)
                .map(|b| b.size())
                .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", bound.buffer)))?;
            // The shader may declare a larger block than was written
            let size = bound
                .size
                .max(slot.min_size)
                .min(capacity.saturating_sub(bound.offset));
            keys.push(BindGroupKey::Uniform {
                program: handle,
                set,
                buffer: bound.buffer,
                offset: bound.offset,
                size,
            });
        }
        Ok(keys)
    }

    fn bind_group(&mut self, key: BindGroupKey) -> BackendResult<usize> {
        if let Some(&index) = self.bind_group_ids.get(&key) {
            return Ok(index);
        }
        let bind_group = self.create_bind_group(&key)?;
        let index = self.bind_groups.len();
        self.bind_groups.push(bind_group);
        self.bind_group_ids.insert(key, index);
        Ok(index)
    }

    fn create_bind_group(&self, key: &BindGroupKey) -> BackendResult<wgpu::BindGroup> {
        let (program, set) = match key {
            BindGroupKey::Uniform { program, set, .. } | BindGroupKey::Empty { program, set } => (*program, *set),
            BindGroupKey::Textures { program, .. } => (*program, TEXTURE_SET),
        };
        let layout = self
            .programs
            .get(&program.0)
            .and_then(|p| p.set_layouts.get(set as usize))
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", program)))?;

        let mut entries = Vec::new();
        match key {
            BindGroupKey::Uniform { buffer, offset, size, .. } => {
                let buf = self
                    .buffers
                    .get(&buffer.0)
                    .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
                entries.push(wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: buf,
                        offset: *offset,
                        size: NonZeroU64::new(*size),
                    }),
                });
            }
            BindGroupKey::Textures { textures, .. } => {
                for (unit, texture) in textures {
                    let entry = self
                        .textures
                        .get(&texture.0)
                        .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
                    let sampler = self
                        .samplers
                        .get(&SamplerKey {
                            filter: entry.desc.filter,
                            address_mode: entry.desc.address_mode,
                        })
                        .ok_or_else(|| BackendError::InvalidCommand(format!("no sampler for {:?}", texture)))?;
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit * 2,
                        resource: wgpu::BindingResource::TextureView(&entry.view),
                    });
                    entries.push(wgpu::BindGroupEntry {
                        binding: unit * 2 + 1,
                        resource: wgpu::BindingResource::Sampler(sampler),
                    });
                }
            }
            BindGroupKey::Empty { .. } => {}
        }

        self.validated(|device| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: None,
                layout,
                entries: &entries,
            })
        })
        .map_err(BackendError::Validation)
    }

    fn record_draw(&mut self, topology: PrimitiveTopology, range: DrawRange) {
        if let Err(e) = self.try_record_draw(topology, range) {
            log::warn!("WgpuDevice: draw skipped: {}", e);
        }
    }

    fn try_record_draw(&mut self, topology: PrimitiveTopology, range: DrawRange) -> BackendResult<()> {
        let target = self
            .pass
            .as_ref()
            .map(|p| p.target)
            .ok_or_else(|| BackendError::InvalidCommand("draw outside of a pass".into()))?;
        let program_handle = self
            .state
            .program
            .ok_or_else(|| BackendError::InvalidCommand("no program set".into()))?;
        let binding_handle = self
            .state
            .vertex_binding
            .ok_or_else(|| BackendError::InvalidCommand("no vertex binding set".into()))?;

        let program = self
            .programs
            .get(&program_handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", program_handle)))?;
        let binding = self
            .bindings
            .get(&binding_handle.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", binding_handle)))?
            .clone();

        let missing: Vec<(u32, VertexFormat)> = program
            .interface
            .attributes
            .iter()
            .filter(|a| !binding.attributes.iter().any(|b| b.location == a.location))
            .filter_map(|a| VertexFormat::from_components(a.components).map(|f| (a.location, f)))
            .collect();
        let group_keys = self.bind_group_keys(program_handle, program)?;
        let (color_formats, depth_format) = self.target_formats(target)?;

        let zero_attributes = !missing.is_empty();
        let pipeline = self.pipeline(PipelineKey {
            program: program_handle,
            stride: binding.stride,
            attributes: binding.attributes.clone(),
            missing,
            topology,
            state: self.state.render_state,
            color_formats,
            depth_format,
        })?;
        let bind_groups = group_keys
            .into_iter()
            .map(|key| self.bind_group(key))
            .collect::<BackendResult<Vec<_>>>()?;

        if matches!(range, DrawRange::Indices(_)) && binding.index_buffer.is_none() {
            return Err(BackendError::InvalidCommand("indexed draw without an index buffer".into()));
        }

        let draw = DrawCall {
            pipeline,
            bind_groups,
            vertex_buffer: binding.vertex_buffer,
            vertex_offset: binding.vertex_offset,
            zero_attributes,
            index_buffer: binding.index_buffer,
            range,
        };
        if let Some(pass) = self.pass.as_mut() {
            pass.draws.push(draw);
        }
        Ok(())
    }

    /// The frame's open encoder, or a new one.
    fn take_encoder(&mut self) -> wgpu::CommandEncoder {
        match self.encoder.take() {
            Some(encoder) => encoder,
            None => self
                .device
                .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("frame") }),
        }
    }

    fn target_depth(&self, target: RenderTargetHandle) -> BackendResult<&TextureEntry> {
        let desc = self
            .targets
            .get(&target.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", target)))?;
        desc.depth_attachment
            .and_then(|t| self.textures.get(&t.0))
            .ok_or_else(|| BackendError::InvalidCommand(format!("{:?} has no depth attachment", target)))
    }
}

impl RenderDevice for WgpuDevice {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn limits(&self) -> DeviceLimits {
        self.limits
    }

    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BackendResult<BufferHandle> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size: desc.size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT),
            usage: Self::convert_buffer_usage(desc.usage),
            mapped_at_creation: false,
        });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
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
        let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: desc.label.as_deref(),
            contents: data,
            usage: Self::convert_buffer_usage(desc.usage),
        });

        let id = self.allocate_id();
        self.buffers.insert(id, buffer);
        Ok(BufferHandle(id))
    }

    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8]) -> BackendResult<()> {
        let buf = self
            .buffers
            .get(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", buffer)))?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(BackendError::InvalidCommand(format!(
                "buffer write offset {} is not 4 byte aligned",
                offset
            )));
        }
        if offset + data.len() as u64 > buf.size() {
            return Err(BackendError::InvalidCommand(format!(
                "write of {} bytes at {} overflows a {} byte buffer",
                data.len(),
                offset,
                buf.size()
            )));
        }

        let padded = (data.len() as u64).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        if padded == data.len() as u64 {
            self.queue.write_buffer(buf, offset, data);
        } else {
            let mut bytes = data.to_vec();
            bytes.resize(padded as usize, 0);
            self.queue.write_buffer(buf, offset, &bytes);
        }
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDescriptor) -> BackendResult<TextureHandle> {
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

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.dimension.layers(),
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: Self::convert_texture_format(desc.format),
            usage: Self::convert_texture_usage(desc.usage),
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            dimension: Some(Self::convert_view_dimension(desc.dimension)),
            ..Default::default()
        });
        self.sampler_for(desc);

        let id = self.allocate_id();
        self.textures.insert(
            id,
            TextureEntry {
                texture,
                view,
                desc: desc.clone(),
            },
        );
        Ok(TextureHandle(id))
    }

    fn write_texture(&mut self, texture: TextureHandle, layer: u32, data: &[u8]) -> BackendResult<()> {
        let entry = self
            .textures
            .get(&texture.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", texture)))?;
        let desc = &entry.desc;
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

        self.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &entry.texture,
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(desc.width * desc.format.bytes_per_pixel()),
                rows_per_image: Some(desc.height),
            },
            wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn create_program(&mut self, desc: &ProgramDescriptor<'_>) -> BackendResult<ProgramHandle> {
        let interface = desc.interface.clone();
        let set_count = interface
            .uniform_slots
            .iter()
            .map(|s| s.slot + 1)
            .chain((!interface.texture_units.is_empty()).then_some(TEXTURE_SET + 1))
            .max()
            .unwrap_or(0);

        let label = desc.label.to_string();
        let (vertex, fragment, set_layouts, layout) = self
            .validated(|device| {
                let vertex = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label),
                    source: wgpu::ShaderSource::Wgsl(desc.vertex_source.into()),
                });
                let fragment = device.create_shader_module(wgpu::ShaderModuleDescriptor {
                    label: Some(desc.label),
                    source: wgpu::ShaderSource::Wgsl(desc.fragment_source.into()),
                });
                let set_layouts: Vec<wgpu::BindGroupLayout> = (0..set_count)
                    .map(|set| {
                        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                            label: None,
                            entries: &Self::set_layout_entries(&interface, set),
                        })
                    })
                    .collect();
                let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(desc.label),
                    bind_group_layouts: &set_layouts.iter().collect::<Vec<_>>(),
                    push_constant_ranges: &[],
                });
                (vertex, fragment, set_layouts, layout)
            })
            .map_err(|e| BackendError::ProgramCreationFailed(format!("{}: {}", desc.label, e)))?;

        log::debug!("WgpuDevice: created program {} ({} bind groups)", label, set_count);
        let id = self.allocate_id();
        self.programs.insert(
            id,
            ProgramEntry {
                label,
                vertex,
                fragment,
                interface,
                set_layouts,
                layout,
            },
        );
        Ok(ProgramHandle(id))
    }

    fn create_vertex_binding(&mut self, desc: &VertexBindingDescriptor) -> BackendResult<VertexBindingHandle> {
        if !self.buffers.contains_key(&desc.vertex_buffer.0) {
            return Err(BackendError::BindingCreationFailed(format!(
                "unknown vertex buffer {:?}",
                desc.vertex_buffer
            )));
        }
        if let Some(index) = desc.index_buffer {
            if !self.buffers.contains_key(&index.0) {
                return Err(BackendError::BindingCreationFailed(format!(
                    "unknown index buffer {:?}",
                    index
                )));
            }
        }
        let id = self.allocate_id();
        self.bindings.insert(id, desc.clone());
        Ok(VertexBindingHandle(id))
    }

    fn create_render_target(&mut self, desc: &RenderTargetDescriptor) -> BackendResult<RenderTargetHandle> {
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
            .map(|t| self.textures.get(&t.0).map(|e| &e.desc))
            .collect();
        let depth = desc
            .depth_attachment
            .map(|t| self.textures.get(&t.0).map(|e| &e.desc));
        evaluate_target(&color, depth)
    }

    fn begin_pass(&mut self, target: RenderTargetHandle, clear: &ClearValues) -> BackendResult<()> {
        if self.pass.is_some() {
            return Err(BackendError::InvalidCommand("begin_pass while a pass is open".into()));
        }
        let status = self.render_target_status(target);
        if !status.is_complete() {
            return Err(BackendError::InvalidCommand(format!(
                "{:?} is incomplete: {}",
                target, status
            )));
        }
        self.pass = Some(PendingPass {
            target,
            clear: *clear,
            draws: Vec::new(),
        });
        Ok(())
    }

    fn set_render_state(&mut self, state: &RenderState) {
        self.state.render_state = *state;
    }

    fn set_program(&mut self, program: ProgramHandle) {
        self.state.program = Some(program);
    }

    fn bind_uniform_range(&mut self, slot: u32, buffer: BufferHandle, offset: u64, size: u64) {
        if offset % self.limits.uniform_offset_alignment as u64 != 0 {
            log::warn!(
                "WgpuDevice: uniform range offset {} is not aligned to {}",
                offset,
                self.limits.uniform_offset_alignment
            );
        }
        self.state
            .uniforms
            .insert(slot, UniformBinding { buffer, offset, size });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.state.textures.insert(unit, texture);
    }

    fn set_vertex_binding(&mut self, binding: VertexBindingHandle) {
        self.state.vertex_binding = Some(binding);
    }

    fn draw(&mut self, topology: PrimitiveTopology, vertex_count: u32) {
        self.record_draw(topology, DrawRange::Vertices(0..vertex_count));
    }

    fn draw_indexed(&mut self, topology: PrimitiveTopology, first_index: u32, index_count: u32) {
        self.record_draw(topology, DrawRange::Indices(first_index..first_index + index_count));
    }

    fn end_pass(&mut self) -> BackendResult<()> {
        let pending = self
            .pass
            .take()
            .ok_or_else(|| BackendError::InvalidCommand("end_pass without begin_pass".into()))?;
        let desc = self
            .targets
            .get(&pending.target.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{:?}", pending.target)))?
            .clone();

        let mut encoder = self.take_encoder();

        {
            let color_load = match pending.clear.color {
                Some([r, g, b, a]) => wgpu::LoadOp::Clear(wgpu::Color {
                    r: r as f64,
                    g: g as f64,
                    b: b as f64,
                    a: a as f64,
                }),
                None => wgpu::LoadOp::Load,
            };
            let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment>> = desc
                .color_attachments
                .iter()
                .map(|handle| {
                    self.textures.get(&handle.0).map(|entry| wgpu::RenderPassColorAttachment {
                        view: &entry.view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: color_load,
                            store: wgpu::StoreOp::Store,
                        },
                    })
                })
                .collect();
            let depth_attachment = desc
                .depth_attachment
                .and_then(|handle| self.textures.get(&handle.0))
                .map(|entry| wgpu::RenderPassDepthStencilAttachment {
                    view: &entry.view,
                    depth_ops: Some(wgpu::Operations {
                        load: match pending.clear.depth {
                            Some(depth) => wgpu::LoadOp::Clear(depth),
                            None => wgpu::LoadOp::Load,
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                });

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: desc.label.as_deref(),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            for draw in &pending.draws {
                let Some(pipeline) = self.pipelines.get(&draw.pipeline) else {
                    continue;
                };
                let Some(vertex_buffer) = self.buffers.get(&draw.vertex_buffer.0) else {
                    continue;
                };
                render_pass.set_pipeline(pipeline);
                for (set, &index) in draw.bind_groups.iter().enumerate() {
                    render_pass.set_bind_group(set as u32, &self.bind_groups[index], &[]);
                }
                render_pass.set_vertex_buffer(0, vertex_buffer.slice(draw.vertex_offset..));
                if draw.zero_attributes {
                    render_pass.set_vertex_buffer(1, self.zero_buffer.slice(..));
                }

                match &draw.range {
                    DrawRange::Vertices(range) => render_pass.draw(range.clone(), 0..1),
                    DrawRange::Indices(range) => {
                        let Some(index_buffer) = draw.index_buffer.and_then(|b| self.buffers.get(&b.0)) else {
                            continue;
                        };
                        render_pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                        render_pass.draw_indexed(range.clone(), 0, 0..1);
                    }
                }
            }
        }

        log::trace!(
            "WgpuDevice: pass {:?} replayed {} draws",
            desc.label,
            pending.draws.len()
        );
        self.encoder = Some(encoder);
        Ok(())
    }

    fn blit_depth(&mut self, src: RenderTargetHandle, dst: RenderTargetHandle) -> BackendResult<()> {
        if self.pass.is_some() {
            return Err(BackendError::InvalidCommand("blit_depth inside a pass".into()));
        }
        let (src_desc, dst_desc) = (self.target_depth(src)?.desc.clone(), self.target_depth(dst)?.desc.clone());
        if (src_desc.width, src_desc.height, src_desc.format) != (dst_desc.width, dst_desc.height, dst_desc.format) {
            return Err(BackendError::InvalidCommand(format!(
                "depth attachments of {:?} and {:?} differ",
                src, dst
            )));
        }

        let mut encoder = self.take_encoder();
        {
            let src_texture = &self.target_depth(src)?.texture;
            let dst_texture = &self.target_depth(dst)?.texture;
            encoder.copy_texture_to_texture(
                wgpu::ImageCopyTexture {
                    texture: src_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::ImageCopyTexture {
                    texture: dst_texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width: src_desc.width,
                    height: src_desc.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        self.encoder = Some(encoder);
        Ok(())
    }

    fn submit(&mut self) -> BackendResult<()> {
        if self.pass.is_some() {
            return Err(BackendError::InvalidCommand("submit while a pass is open".into()));
        }
        let encoder = self.take_encoder();
        self.queue.submit(std::iter::once(encoder.finish()));

        self.bind_group_ids.clear();
        self.bind_groups.clear();
        self.state.uniforms.clear();
        self.state.textures.clear();
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(buf) = self.buffers.remove(&buffer.0) {
            buf.destroy();
        }
    }

    fn destroy_texture(&mut self, texture: TextureHandle) {
        if let Some(entry) = self.textures.remove(&texture.0) {
            entry.texture.destroy();
        }
    }

    fn destroy_program(&mut self, program: ProgramHandle) {
        if self.programs.remove(&program.0).is_none() {
            return;
        }
        let pipelines = &mut self.pipelines;
        self.pipeline_ids.retain(|key, id| {
            let keep = key.program != program;
            if !keep {
                pipelines.remove(id);
            }
            keep
        });
        if self.state.program == Some(program) {
            self.state.program = None;
        }
    }

    fn destroy_vertex_binding(&mut self, binding: VertexBindingHandle) {
        self.bindings.remove(&binding.0);
        if self.state.vertex_binding == Some(binding) {
            self.state.vertex_binding = None;
        }
    }

    fn destroy_render_target(&mut self, target: RenderTargetHandle) {
        self.targets.remove(&target.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device() -> Option<WgpuDevice> {
        match WgpuDevice::new() {
            Ok(device) => Some(device),
            Err(e) => {
                eprintln!("skipping: {}", e);
                None
            }
        }
    }

    #[test]
    fn test_clear_readback() {
        let Some(mut device) = device() else {
            return;
        };
        let color = device
            .create_texture(&TextureDescriptor::attachment("color", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let target = device
            .create_render_target(&RenderTargetDescriptor {
                label: Some("target".into()),
                color_attachments: vec![color],
                depth_attachment: None,
            })
            .unwrap();

        device
            .begin_pass(target, &ClearValues::color([1.0, 0.0, 0.0, 1.0]))
            .unwrap();
        device.end_pass().unwrap();
        device.submit().unwrap();

        let pixels = device.read_texture(color).unwrap();
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert_eq!(&pixels[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_unaligned_write_is_padded() {
        let Some(mut device) = device() else {
            return;
        };
        let buffer = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: 64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap();
        assert!(device.write_buffer(buffer, 0, &[1, 2, 3, 4, 5, 6]).is_ok());
        assert!(device.write_buffer(buffer, 2, &[1, 2, 3, 4]).is_err());
        assert!(device.write_buffer(buffer, 60, &[0; 8]).is_err());
    }

    #[test]
    fn test_begin_pass_rejects_incomplete_target() {
        let Some(mut device) = device() else {
            return;
        };
        let color = device
            .create_texture(&TextureDescriptor::attachment("color", 4, 4, TextureFormat::Rgba8Unorm))
            .unwrap();
        let target = device
            .create_render_target(&RenderTargetDescriptor {
                label: None,
                color_attachments: vec![color],
                depth_attachment: None,
            })
            .unwrap();
        device.destroy_texture(color);

        assert_eq!(device.render_target_status(target), TargetStatus::Undefined);
        assert!(device.begin_pass(target, &ClearValues::default()).is_err());
    }
}
