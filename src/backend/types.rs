//! Common types shared between devices

/// Texture format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureFormat {
    Rgba8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl TextureFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            TextureFormat::Rgba8Unorm | TextureFormat::Depth32Float => 4,
            TextureFormat::Rgba16Float => 8,
        }
    }
}

/// Texture usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUsage(u32);

impl TextureUsage {
    pub const COPY_SRC: Self = Self(1 << 0);
    pub const COPY_DST: Self = Self(1 << 1);
    pub const TEXTURE_BINDING: Self = Self(1 << 2);
    pub const RENDER_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for TextureUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Buffer usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferUsage(u32);

impl BufferUsage {
    pub const COPY_DST: Self = Self(1 << 3);
    pub const INDEX: Self = Self(1 << 4);
    pub const VERTEX: Self = Self(1 << 5);
    pub const UNIFORM: Self = Self(1 << 6);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for BufferUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Texture dimensionality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureDimension {
    #[default]
    D2,
    /// Six square layers in the order +X, -X, +Y, -Y, +Z, -Z
    Cube,
}

impl TextureDimension {
    pub fn layers(&self) -> u32 {
        match self {
            TextureDimension::D2 => 1,
            TextureDimension::Cube => 6,
        }
    }
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
}

/// Texture descriptor
///
/// Every texture carries its own sampling parameters, the device pairs it
/// with a matching sampler when the texture is bound to a unit.
#[derive(Debug, Clone)]
pub struct TextureDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub dimension: TextureDimension,
    pub format: TextureFormat,
    pub usage: TextureUsage,
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for TextureDescriptor {
    fn default() -> Self {
        Self {
            label: None,
            width: 1,
            height: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Rgba8Unorm,
            usage: TextureUsage::TEXTURE_BINDING | TextureUsage::COPY_DST,
            filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
        }
    }
}

impl TextureDescriptor {
    /// Descriptor for an offscreen attachment that is also sampled later.
    pub fn attachment(label: &str, width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: Some(label.to_string()),
            width,
            height,
            dimension: TextureDimension::D2,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT
                | TextureUsage::TEXTURE_BINDING
                | TextureUsage::COPY_SRC
                | TextureUsage::COPY_DST,
            filter: FilterMode::Nearest,
            address_mode: AddressMode::ClampToEdge,
        }
    }

    /// Expected byte length of the pixel data for one layer.
    pub fn layer_size(&self) -> usize {
        (self.width * self.height * self.format.bytes_per_pixel()) as usize
    }
}

/// Buffer descriptor
#[derive(Debug, Clone)]
pub struct BufferDescriptor {
    pub label: Option<String>,
    pub size: u64,
    pub usage: BufferUsage,
}

/// Vertex attribute format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
}

impl VertexFormat {
    /// Format for a float attribute with the given component count.
    pub fn from_components(components: u8) -> Option<Self> {
        match components {
            1 => Some(VertexFormat::Float32),
            2 => Some(VertexFormat::Float32x2),
            3 => Some(VertexFormat::Float32x3),
            4 => Some(VertexFormat::Float32x4),
            _ => None,
        }
    }

    pub fn components(&self) -> u8 {
        match self {
            VertexFormat::Float32 => 1,
            VertexFormat::Float32x2 => 2,
            VertexFormat::Float32x3 => 3,
            VertexFormat::Float32x4 => 4,
        }
    }

    pub fn size(&self) -> u64 {
        self.components() as u64 * 4
    }
}

/// One attribute wired into a vertex binding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BoundAttribute {
    pub location: u32,
    pub format: VertexFormat,
    /// Byte offset inside one vertex
    pub offset: u32,
}

/// Describes a draw-ready association between vertex data and attribute slots
#[derive(Debug, Clone)]
pub struct VertexBindingDescriptor {
    pub label: Option<String>,
    pub vertex_buffer: super::BufferHandle,
    /// Byte offset of the first vertex in `vertex_buffer`
    pub vertex_offset: u64,
    pub stride: u32,
    pub index_buffer: Option<super::BufferHandle>,
    pub attributes: Vec<BoundAttribute>,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    #[default]
    None,
    Front,
    Back,
}

/// Compare function for depth testing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Blend factor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcAlpha,
    OneMinusSrcAlpha,
}

/// Blend operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOperation {
    Add,
    Subtract,
}

/// Blend component state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendComponent {
    pub src_factor: BlendFactor,
    pub dst_factor: BlendFactor,
    pub operation: BlendOperation,
}

impl Default for BlendComponent {
    fn default() -> Self {
        Self {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::Zero,
            operation: BlendOperation::Add,
        }
    }
}

/// Blend state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub color: BlendComponent,
    pub alpha: BlendComponent,
}

impl BlendState {
    /// `SrcAlpha, OneMinusSrcAlpha`
    pub fn alpha_blending() -> Self {
        let component = BlendComponent {
            src_factor: BlendFactor::SrcAlpha,
            dst_factor: BlendFactor::OneMinusSrcAlpha,
            operation: BlendOperation::Add,
        };
        Self {
            color: component,
            alpha: component,
        }
    }

    /// `One, One`
    pub fn additive() -> Self {
        let component = BlendComponent {
            src_factor: BlendFactor::One,
            dst_factor: BlendFactor::One,
            operation: BlendOperation::Add,
        };
        Self {
            color: component,
            alpha: component,
        }
    }
}

/// Fixed-function state applied to subsequent draws
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderState {
    pub depth_test: bool,
    pub depth_write: bool,
    pub depth_compare: CompareFunction,
    pub blend: Option<BlendState>,
    pub cull_mode: CullMode,
}

impl Default for RenderState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_write: true,
            depth_compare: CompareFunction::Less,
            blend: None,
            cull_mode: CullMode::None,
        }
    }
}

impl RenderState {
    /// Depth-tested, depth-writing, alpha-blended opaque geometry.
    pub fn opaque_blended() -> Self {
        Self {
            depth_test: true,
            depth_write: true,
            depth_compare: CompareFunction::Less,
            blend: Some(BlendState::alpha_blending()),
            cull_mode: CullMode::None,
        }
    }
}

/// Values used to clear a render target when a pass begins
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ClearValues {
    pub color: Option<[f32; 4]>,
    pub depth: Option<f32>,
}

impl ClearValues {
    pub fn color_and_depth(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            depth: Some(1.0),
        }
    }

    pub fn color(color: [f32; 4]) -> Self {
        Self {
            color: Some(color),
            depth: None,
        }
    }
}

/// Device limits queried once at start-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceLimits {
    /// Required alignment of uniform buffer range offsets
    pub uniform_offset_alignment: u32,
    /// Largest uniform block that can be bound at once
    pub max_uniform_block_size: u64,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            uniform_offset_alignment: 256,
            max_uniform_block_size: 64 * 1024,
        }
    }
}

/// An attribute a program reads, as reported by reflection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramAttribute {
    pub location: u32,
    pub components: u8,
}

/// A texture unit a program samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureUnit {
    pub unit: u32,
    pub dimension: TextureDimension,
}

/// A uniform block slot a program reads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UniformSlot {
    pub slot: u32,
    /// Size of the block as declared by the shader
    pub min_size: u64,
}

/// Reflected interface of a linked program
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgramInterface {
    pub attributes: Vec<ProgramAttribute>,
    pub color_outputs: u32,
    pub uniform_slots: Vec<UniformSlot>,
    pub texture_units: Vec<TextureUnit>,
}

/// Program creation parameters
#[derive(Debug, Clone)]
pub struct ProgramDescriptor<'a> {
    pub label: &'a str,
    /// WGSL source of the vertex stage
    pub vertex_source: &'a str,
    /// WGSL source of the fragment stage
    pub fragment_source: &'a str,
    pub interface: &'a ProgramInterface,
}

/// Render target creation parameters
#[derive(Debug, Clone)]
pub struct RenderTargetDescriptor {
    pub label: Option<String>,
    pub color_attachments: Vec<super::TextureHandle>,
    pub depth_attachment: Option<super::TextureHandle>,
}

/// Completeness of a render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetStatus {
    Complete,
    Undefined,
    IncompleteAttachment,
    MissingAttachment,
    IncompleteDrawBuffer,
    IncompleteReadBuffer,
    Unsupported,
    IncompleteMultisample,
    IncompleteLayerTargets,
}

impl TargetStatus {
    pub fn is_complete(&self) -> bool {
        matches!(self, TargetStatus::Complete)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            TargetStatus::Complete => "COMPLETE",
            TargetStatus::Undefined => "UNDEFINED",
            TargetStatus::IncompleteAttachment => "INCOMPLETE_ATTACHMENT",
            TargetStatus::MissingAttachment => "INCOMPLETE_MISSING_ATTACHMENT",
            TargetStatus::IncompleteDrawBuffer => "INCOMPLETE_DRAW_BUFFER",
            TargetStatus::IncompleteReadBuffer => "INCOMPLETE_READ_BUFFER",
            TargetStatus::Unsupported => "UNSUPPORTED",
            TargetStatus::IncompleteMultisample => "INCOMPLETE_MULTISAMPLE",
            TargetStatus::IncompleteLayerTargets => "INCOMPLETE_LAYER_TARGETS",
        }
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.reason())
    }
}

/// Evaluate render target completeness from the attachments' descriptors.
///
/// `None` entries are attachments whose texture no longer exists.
pub fn evaluate_target(
    color: &[Option<&TextureDescriptor>],
    depth: Option<Option<&TextureDescriptor>>,
) -> TargetStatus {
    if color.is_empty() && depth.is_none() {
        return TargetStatus::MissingAttachment;
    }

    let mut size = None;
    let all = color.iter().copied().chain(depth.into_iter());
    for desc in all {
        let Some(desc) = desc else {
            return TargetStatus::Undefined;
        };
        if !desc.usage.contains(TextureUsage::RENDER_ATTACHMENT) {
            return TargetStatus::Unsupported;
        }
        if desc.dimension != TextureDimension::D2 {
            return TargetStatus::IncompleteLayerTargets;
        }
        match size {
            None => size = Some((desc.width, desc.height)),
            Some(s) if s != (desc.width, desc.height) => {
                return TargetStatus::IncompleteAttachment;
            }
            Some(_) => {}
        }
    }

    if color.iter().flatten().any(|d| d.format.is_depth()) {
        return TargetStatus::IncompleteDrawBuffer;
    }
    if let Some(Some(d)) = depth {
        if !d.format.is_depth() {
            return TargetStatus::IncompleteAttachment;
        }
    }

    TargetStatus::Complete
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_complete_gbuffer() {
        let pos = TextureDescriptor::attachment("p", 64, 64, TextureFormat::Rgba16Float);
        let diffuse = TextureDescriptor::attachment("d", 64, 64, TextureFormat::Rgba8Unorm);
        let depth = TextureDescriptor::attachment("z", 64, 64, TextureFormat::Depth32Float);
        let status = evaluate_target(&[Some(&pos), Some(&diffuse)], Some(Some(&depth)));
        assert_eq!(status, TargetStatus::Complete);
    }

    #[test]
    fn test_incomplete_reasons() {
        let color = TextureDescriptor::attachment("c", 64, 64, TextureFormat::Rgba8Unorm);
        let small = TextureDescriptor::attachment("s", 32, 32, TextureFormat::Rgba8Unorm);
        let depth = TextureDescriptor::attachment("z", 64, 64, TextureFormat::Depth32Float);
        let sampled_only = TextureDescriptor::default();

        assert_eq!(evaluate_target(&[], None), TargetStatus::MissingAttachment);
        assert_eq!(
            evaluate_target(&[Some(&color), Some(&small)], None),
            TargetStatus::IncompleteAttachment
        );
        assert_eq!(
            evaluate_target(&[Some(&sampled_only)], None),
            TargetStatus::Unsupported
        );
        assert_eq!(
            evaluate_target(&[Some(&depth)], None),
            TargetStatus::IncompleteDrawBuffer
        );
        assert_eq!(
            evaluate_target(&[Some(&color)], Some(None)),
            TargetStatus::Undefined
        );
        assert_eq!(TargetStatus::Unsupported.to_string(), "UNSUPPORTED");
    }

    #[test]
    fn test_vertex_format_components() {
        assert_eq!(VertexFormat::from_components(3), Some(VertexFormat::Float32x3));
        assert_eq!(VertexFormat::from_components(16), None);
        assert_eq!(VertexFormat::Float32x2.size(), 8);
    }
}
