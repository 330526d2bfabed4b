//! OBJ model loading

use std::path::{Path, PathBuf};

use glam::Vec3;

use crate::backend::PrimitiveTopology;
use crate::error::AssetError;

use super::mesh::{MeshData, SubmeshData, VertexLayout};

/// A material as described by the MTL file
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialData {
    pub name: String,
    pub diffuse: Vec3,
    /// Resolved against the OBJ file's directory
    pub diffuse_texture: Option<PathBuf>,
}

/// Geometry and materials read from one OBJ file
#[derive(Debug, Clone)]
pub struct ModelData {
    pub mesh: MeshData,
    pub materials: Vec<MaterialData>,
}

impl ModelData {
    /// Load a triangulated, single-indexed OBJ file and its materials.
    ///
    /// A missing or broken MTL file is logged and the model loads without
    /// materials.
    pub fn from_obj<P: AsRef<Path>>(path: P) -> Result<Self, AssetError> {
        let path = path.as_ref();
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_stem()
            .and_then(|n| n.to_str())
            .unwrap_or("model")
            .to_string();

        let (models, materials) =
            tobj::load_obj(path, &tobj::GPU_LOAD_OPTIONS).map_err(|source| AssetError::Obj {
                path: path.to_path_buf(),
                source,
            })?;

        let materials = match materials {
            Ok(materials) => materials,
            Err(e) => {
                log::warn!("No materials for {}: {}", path.display(), e);
                Vec::new()
            }
        };

        let mut mesh = MeshData::new(&name);
        for model in &models {
            mesh.parts.push(interleave(&model.mesh));
        }

        let materials = materials
            .into_iter()
            .map(|m| MaterialData {
                diffuse: m.diffuse.map(Vec3::from).unwrap_or(Vec3::ONE),
                diffuse_texture: m
                    .diffuse_texture
                    .filter(|t| !t.is_empty())
                    .map(|t| base.join(t)),
                name: m.name,
            })
            .collect();

        Ok(Self { mesh, materials })
    }
}

/// Interleave a tobj mesh into position, texcoord and normal.
///
/// Missing texcoords and normals are filled with zeros. Texture V is
/// flipped so row 0 of the image is the top.
fn interleave(mesh: &tobj::Mesh) -> SubmeshData {
    let layout = VertexLayout::position_uv_normal();
    let vertex_count = mesh.positions.len() / 3;
    let mut vertices = Vec::with_capacity(vertex_count * layout.floats_per_vertex());

    for i in 0..vertex_count {
        vertices.extend_from_slice(&mesh.positions[i * 3..i * 3 + 3]);
        match mesh.texcoords.get(i * 2..i * 2 + 2) {
            Some(uv) => vertices.extend_from_slice(&[uv[0], 1.0 - uv[1]]),
            None => vertices.extend_from_slice(&[0.0, 0.0]),
        }
        match mesh.normals.get(i * 3..i * 3 + 3) {
            Some(normal) => vertices.extend_from_slice(normal),
            None => vertices.extend_from_slice(&[0.0, 0.0, 0.0]),
        }
    }

    SubmeshData {
        layout,
        topology: PrimitiveTopology::TriangleList,
        vertices,
        indices: mesh.indices.clone(),
        material_index: mesh.material_id,
    }
}
