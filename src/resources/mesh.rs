//! Mesh data structures and built-in geometry

use glam::{Vec2, Vec3};

use crate::backend::traits::*;
use crate::backend::types::*;

use super::binding::BindingCache;

/// One attribute stored in a vertex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub components: u8,
    /// Byte offset inside one vertex
    pub offset: u32,
}

/// Interleaved vertex layout of a mesh part
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VertexLayout {
    pub attributes: Vec<VertexAttribute>,
    pub stride: u32,
}

impl VertexLayout {
    pub const POSITION: u32 = 0;
    pub const TEXCOORD: u32 = 1;
    pub const NORMAL: u32 = 2;

    /// Build a tightly packed layout from `(location, components)` pairs.
    pub fn packed(attributes: &[(u32, u8)]) -> Self {
        let mut offset = 0;
        let attributes = attributes
            .iter()
            .map(|&(location, components)| {
                let attribute = VertexAttribute {
                    location,
                    components,
                    offset,
                };
                offset += components as u32 * 4;
                attribute
            })
            .collect();
        Self {
            attributes,
            stride: offset,
        }
    }

    /// Position only
    pub fn position() -> Self {
        Self::packed(&[(Self::POSITION, 3)])
    }

    /// Position and texture coordinates
    pub fn position_uv() -> Self {
        Self::packed(&[(Self::POSITION, 3), (Self::TEXCOORD, 2)])
    }

    /// Position, texture coordinates and normal (the layout of loaded models)
    pub fn position_uv_normal() -> Self {
        Self::packed(&[(Self::POSITION, 3), (Self::TEXCOORD, 2), (Self::NORMAL, 3)])
    }

    pub fn find(&self, location: u32) -> Option<&VertexAttribute> {
        self.attributes.iter().find(|a| a.location == location)
    }

    /// Number of floats per vertex
    pub fn floats_per_vertex(&self) -> usize {
        self.stride as usize / 4
    }
}

/// CPU-side description of one mesh part
#[derive(Debug, Clone)]
pub struct SubmeshData {
    pub layout: VertexLayout,
    pub topology: PrimitiveTopology,
    pub vertices: Vec<f32>,
    /// Indices relative to the part's first vertex, empty for non-indexed parts
    pub indices: Vec<u32>,
    pub material_index: Option<usize>,
}

impl SubmeshData {
    pub fn vertex_count(&self) -> u32 {
        let floats = self.layout.floats_per_vertex();
        if floats == 0 {
            return 0;
        }
        (self.vertices.len() / floats) as u32
    }
}

/// CPU-side mesh, uploaded with [`Mesh::upload`]
#[derive(Debug, Clone)]
pub struct MeshData {
    pub name: String,
    pub parts: Vec<SubmeshData>,
}

impl MeshData {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parts: Vec::new(),
        }
    }

    pub fn single(name: &str, part: SubmeshData) -> Self {
        Self {
            name: name.to_string(),
            parts: vec![part],
        }
    }

    /// Unit quad in the XY plane drawn as a 4-vertex strip
    pub fn quad() -> Self {
        #[rustfmt::skip]
        let vertices = vec![
            // position        // uv
            -1.0,  1.0, 0.0,   0.0, 0.0,
            -1.0, -1.0, 0.0,   0.0, 1.0,
             1.0,  1.0, 0.0,   1.0, 0.0,
             1.0, -1.0, 0.0,   1.0, 1.0,
        ];
        Self::single(
            "quad",
            SubmeshData {
                layout: VertexLayout::position_uv(),
                topology: PrimitiveTopology::TriangleStrip,
                vertices,
                indices: Vec::new(),
                material_index: None,
            },
        )
    }

    /// Skybox cube spanning +-`half_extent`, 36 vertices facing inwards
    pub fn skybox_cube(half_extent: f32) -> Self {
        #[rustfmt::skip]
        const FACES: [[f32; 3]; 36] = [
            [-1.0,  1.0, -1.0], [-1.0, -1.0, -1.0], [ 1.0, -1.0, -1.0],
            [ 1.0, -1.0, -1.0], [ 1.0,  1.0, -1.0], [-1.0,  1.0, -1.0],

            [-1.0, -1.0,  1.0], [-1.0, -1.0, -1.0], [-1.0,  1.0, -1.0],
            [-1.0,  1.0, -1.0], [-1.0,  1.0,  1.0], [-1.0, -1.0,  1.0],

            [ 1.0, -1.0, -1.0], [ 1.0, -1.0,  1.0], [ 1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0], [ 1.0,  1.0, -1.0], [ 1.0, -1.0, -1.0],

            [-1.0, -1.0,  1.0], [-1.0,  1.0,  1.0], [ 1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0], [ 1.0, -1.0,  1.0], [-1.0, -1.0,  1.0],

            [-1.0,  1.0, -1.0], [ 1.0,  1.0, -1.0], [ 1.0,  1.0,  1.0],
            [ 1.0,  1.0,  1.0], [-1.0,  1.0,  1.0], [-1.0,  1.0, -1.0],

            [-1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0, -1.0],
            [ 1.0, -1.0, -1.0], [-1.0, -1.0,  1.0], [ 1.0, -1.0,  1.0],
        ];

        let vertices = FACES
            .iter()
            .flat_map(|v| v.iter().map(|c| c * half_extent))
            .collect();

        Self::single(
            "skybox",
            SubmeshData {
                layout: VertexLayout::position(),
                topology: PrimitiveTopology::TriangleList,
                vertices,
                indices: Vec::new(),
                material_index: None,
            },
        )
    }

    /// Unit UV sphere drawn as a single indexed strip
    pub fn sphere(x_segments: u32, y_segments: u32) -> Self {
        let mut vertices = Vec::new();
        for y in 0..=y_segments {
            for x in 0..=x_segments {
                let uv = Vec2::new(x as f32 / x_segments as f32, y as f32 / y_segments as f32);
                let theta = uv.x * std::f32::consts::TAU;
                let phi = uv.y * std::f32::consts::PI;
                let position = Vec3::new(theta.cos() * phi.sin(), phi.cos(), theta.sin() * phi.sin());

                vertices.extend_from_slice(&position.to_array());
                vertices.extend_from_slice(&uv.to_array());
                vertices.extend_from_slice(&position.to_array());
            }
        }

        // Rows alternate direction so the strip never restarts
        let mut indices = Vec::new();
        for y in 0..y_segments {
            let row = y * (x_segments + 1);
            let next_row = (y + 1) * (x_segments + 1);
            if y % 2 == 0 {
                for x in 0..=x_segments {
                    indices.push(row + x);
                    indices.push(next_row + x);
                }
            } else {
                for x in (0..=x_segments).rev() {
                    indices.push(next_row + x);
                    indices.push(row + x);
                }
            }
        }

        Self::single(
            "sphere",
            SubmeshData {
                layout: VertexLayout::position_uv_normal(),
                topology: PrimitiveTopology::TriangleStrip,
                vertices,
                indices,
                material_index: None,
            },
        )
    }
}

/// Where a mesh part's vertices live on the device
#[derive(Debug, Clone)]
pub struct VertexSource {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    /// Byte offset of the part's first vertex
    pub vertex_offset: u64,
    pub layout: VertexLayout,
}

/// A drawable range of a mesh
pub struct Submesh {
    pub source: VertexSource,
    pub topology: PrimitiveTopology,
    pub vertex_count: u32,
    /// Offset of the first index, in indices
    pub first_index: u32,
    pub index_count: u32,
    pub material_index: Option<usize>,
    pub bindings: BindingCache,
}

impl Submesh {
    pub fn is_indexed(&self) -> bool {
        self.index_count > 0
    }

    /// Issue the draw for this part. The vertex binding must already be set.
    pub fn draw<D: RenderDevice>(&self, device: &mut D) {
        if self.is_indexed() {
            device.draw_indexed(self.topology, self.first_index, self.index_count);
        } else {
            device.draw(self.topology, self.vertex_count);
        }
    }
}

/// A mesh uploaded to the device
///
/// All parts share one vertex buffer and one index buffer.
pub struct Mesh {
    pub name: String,
    pub vertex_buffer: BufferHandle,
    pub index_buffer: Option<BufferHandle>,
    pub submeshes: Vec<Submesh>,
}

impl Mesh {
    /// Pack every part into shared buffers and upload them.
    pub fn upload<D: RenderDevice>(device: &mut D, data: &MeshData) -> BackendResult<Self> {
        let mut vertex_bytes: Vec<u8> = Vec::new();
        let mut indices: Vec<u32> = Vec::new();
        let mut ranges = Vec::with_capacity(data.parts.len());

        for part in &data.parts {
            // Keep every part's first vertex on a 4-byte boundary
            while vertex_bytes.len() % 4 != 0 {
                vertex_bytes.push(0);
            }
            let vertex_offset = vertex_bytes.len() as u64;
            vertex_bytes.extend_from_slice(bytemuck::cast_slice(&part.vertices));
            let first_index = indices.len() as u32;
            indices.extend_from_slice(&part.indices);
            ranges.push((vertex_offset, first_index));
        }

        if vertex_bytes.is_empty() {
            return Err(BackendError::BufferCreationFailed(format!(
                "mesh {} has no vertices",
                data.name
            )));
        }

        let vertex_buffer = device.create_buffer_init(
            &BufferDescriptor {
                label: Some(format!("{}_vertices", data.name)),
                size: vertex_bytes.len() as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            &vertex_bytes,
        )?;

        let index_buffer = if indices.is_empty() {
            None
        } else {
            let index_bytes: &[u8] = bytemuck::cast_slice(&indices);
            Some(device.create_buffer_init(
                &BufferDescriptor {
                    label: Some(format!("{}_indices", data.name)),
                    size: index_bytes.len() as u64,
                    usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                },
                index_bytes,
            )?)
        };

        let submeshes = data
            .parts
            .iter()
            .zip(ranges)
            .map(|(part, (vertex_offset, first_index))| Submesh {
                source: VertexSource {
                    vertex_buffer,
                    index_buffer: index_buffer.filter(|_| !part.indices.is_empty()),
                    vertex_offset,
                    layout: part.layout.clone(),
                },
                topology: part.topology,
                vertex_count: part.vertex_count(),
                first_index,
                index_count: part.indices.len() as u32,
                material_index: part.material_index,
                bindings: BindingCache::new(),
            })
            .collect();

        log::debug!(
            "Uploaded mesh {} ({} parts, {} vertex bytes, {} indices)",
            data.name,
            data.parts.len(),
            vertex_bytes.len(),
            indices.len()
        );

        Ok(Self {
            name: data.name.clone(),
            vertex_buffer,
            index_buffer,
            submeshes,
        })
    }

    /// Destroy the buffers and every cached binding.
    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        for submesh in &mut self.submeshes {
            submesh.bindings.clear(device);
        }
        device.destroy_buffer(self.vertex_buffer);
        if let Some(index_buffer) = self.index_buffer {
            device.destroy_buffer(index_buffer);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::DummyDevice;

    #[test]
    fn test_model_layout() {
        let layout = VertexLayout::position_uv_normal();
        assert_eq!(layout.stride, 32);
        assert_eq!(layout.find(VertexLayout::TEXCOORD).unwrap().offset, 12);
        assert_eq!(layout.find(VertexLayout::NORMAL).unwrap().offset, 20);
        assert!(layout.find(5).is_none());
    }

    #[test]
    fn test_builtin_geometry() {
        let quad = MeshData::quad();
        assert_eq!(quad.parts[0].vertex_count(), 4);

        let skybox = MeshData::skybox_cube(1000.0);
        assert_eq!(skybox.parts[0].vertex_count(), 36);
        assert!(skybox.parts[0].vertices.iter().all(|c| c.abs() == 1000.0));

        let sphere = MeshData::sphere(64, 64);
        assert_eq!(sphere.parts[0].vertex_count(), 65 * 65);
        assert_eq!(sphere.parts[0].indices.len(), 64 * 65 * 2);
        assert!(sphere.parts[0].indices.iter().all(|&i| i < 65 * 65));
    }

    #[test]
    fn test_upload_packs_parts() {
        let mut device = DummyDevice::new();
        let mut data = MeshData::new("two_parts");
        for _ in 0..2 {
            data.parts.push(SubmeshData {
                layout: VertexLayout::position_uv_normal(),
                topology: PrimitiveTopology::TriangleList,
                vertices: vec![0.0; 8 * 3],
                indices: vec![0, 1, 2],
                material_index: Some(0),
            });
        }

        let mesh = Mesh::upload(&mut device, &data).unwrap();
        assert_eq!(mesh.submeshes.len(), 2);
        assert_eq!(mesh.submeshes[1].source.vertex_offset, 96);
        assert_eq!(mesh.submeshes[1].first_index, 3);
        assert_eq!(device.buffer_data(mesh.vertex_buffer).unwrap().len(), 192);
        assert!(mesh.submeshes.iter().all(|s| s.is_indexed()));
    }
}
