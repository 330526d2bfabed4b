//! Resource management
//!
//! The [`ResourceTable`] owns every program, texture, mesh, material and model
//! the engine loads, and hands out small typed ids into its tables. It also
//! owns the device objects behind them.

mod binding;
mod material;
mod mesh;
mod model;
mod program;
mod texture;

pub use binding::*;
pub use material::*;
pub use mesh::*;
pub use model::*;
pub use program::*;
pub use texture::*;

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::backend::traits::*;
use crate::error::{EngineError, EngineResult};

/// Index of a program in the resource table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProgramId(pub u32);

/// Index of a texture in the resource table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u32);

impl TextureId {
    /// The built-in 1x1 white texture
    pub const WHITE: TextureId = TextureId(0);
}

/// Index of a mesh in the resource table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MeshId(pub u32);

/// Index of a model in the resource table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(pub u32);

/// Index of a material in the resource table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MaterialId(pub u32);

/// Tables of loaded resources
pub struct ResourceTable {
    programs: Vec<Program>,
    textures: Vec<Texture>,
    texture_paths: HashMap<PathBuf, TextureId>,
    white_cubemap: TextureId,
    meshes: Vec<Mesh>,
    materials: Vec<Material>,
    models: Vec<Model>,
}

impl ResourceTable {
    /// Create the table with its built-in white textures.
    pub fn new<D: RenderDevice>(device: &mut D) -> EngineResult<Self> {
        let white = Texture::create(device, &TextureData::white())?;
        let white_cube = Texture::create_cubemap(device, &CubemapData::solid_color([255; 4], "white_cube"))?;

        Ok(Self {
            programs: Vec::new(),
            textures: vec![white, white_cube],
            texture_paths: HashMap::new(),
            white_cubemap: TextureId(1),
            meshes: Vec::new(),
            materials: Vec::new(),
            models: Vec::new(),
        })
    }

    // Programs

    /// Load program `name` from `path`. An invalid program is still added.
    pub fn load_program<D: RenderDevice>(
        &mut self,
        device: &mut D,
        path: impl AsRef<Path>,
        name: &str,
    ) -> ProgramId {
        let id = ProgramId(self.programs.len() as u32);
        self.programs.push(Program::load(device, path, name));
        id
    }

    pub fn program(&self, id: ProgramId) -> Option<&Program> {
        self.programs.get(id.0 as usize)
    }

    pub fn programs(&self) -> impl Iterator<Item = (ProgramId, &Program)> {
        self.programs
            .iter()
            .enumerate()
            .map(|(i, p)| (ProgramId(i as u32), p))
    }

    /// Recompile every program whose source changed and evict its bindings.
    ///
    /// Returns the ids of the programs that were recompiled.
    pub fn reload_changed_programs<D: RenderDevice>(&mut self, device: &mut D) -> Vec<ProgramId> {
        let mut reloaded = Vec::new();
        for (index, program) in self.programs.iter_mut().enumerate() {
            if program.reload_if_changed(device) {
                reloaded.push(ProgramId(index as u32));
            }
        }
        for &id in &reloaded {
            self.evict_bindings(device, id);
        }
        reloaded
    }

    /// Drop the bindings built for `program` on every mesh part.
    pub fn evict_bindings<D: RenderDevice>(&mut self, device: &mut D, program: ProgramId) -> usize {
        let mut evicted = 0;
        for mesh in &mut self.meshes {
            for submesh in &mut mesh.submeshes {
                if submesh.bindings.evict(device, program) {
                    evicted += 1;
                }
            }
        }
        if evicted > 0 {
            log::debug!("Evicted {} bindings of program {:?}", evicted, program);
        }
        evicted
    }

    // Textures

    /// Load a 2D texture, returning the existing id if the path was loaded
    /// before. Failures are logged and yield `None`.
    pub fn load_texture<D: RenderDevice>(
        &mut self,
        device: &mut D,
        path: impl AsRef<Path>,
    ) -> Option<TextureId> {
        let path = path.as_ref();
        if let Some(&id) = self.texture_paths.get(path) {
            return Some(id);
        }

        let data = match TextureData::from_file(path) {
            Ok(data) => data,
            Err(e) => {
                log::error!("Failed to load texture: {}", e);
                return None;
            }
        };
        let mut texture = match Texture::create(device, &data) {
            Ok(texture) => texture,
            Err(e) => {
                log::error!("Failed to create texture {}: {}", path.display(), e);
                return None;
            }
        };
        texture.path = Some(path.to_path_buf());

        log::info!(
            "Loaded texture {} ({}x{})",
            path.display(),
            texture.width,
            texture.height
        );
        let id = self.push_texture(texture);
        self.texture_paths.insert(path.to_path_buf(), id);
        Some(id)
    }

    /// Load a cubemap from the six face images in `dir`.
    pub fn load_cubemap<D: RenderDevice>(
        &mut self,
        device: &mut D,
        dir: impl AsRef<Path>,
    ) -> Option<TextureId> {
        let dir = dir.as_ref();
        let result = CubemapData::from_dir(dir)
            .map_err(EngineError::from)
            .and_then(|data| Ok(Texture::create_cubemap(device, &data)?));

        match result {
            Ok(mut texture) => {
                texture.path = Some(dir.to_path_buf());
                log::info!("Loaded cubemap {} ({}px faces)", dir.display(), texture.width);
                Some(self.push_texture(texture))
            }
            Err(e) => {
                log::error!("Failed to load cubemap {}: {}", dir.display(), e);
                None
            }
        }
    }

    fn push_texture(&mut self, texture: Texture) -> TextureId {
        let id = TextureId(self.textures.len() as u32);
        self.textures.push(texture);
        id
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0 as usize)
    }

    /// 2D texture for `id`, falling back to white when unset, unknown or a cubemap.
    pub fn texture_or_white(&self, id: Option<TextureId>) -> TextureHandle {
        id.and_then(|id| self.texture(id))
            .filter(|t| t.dimension == crate::backend::TextureDimension::D2)
            .map(|t| t.handle)
            .unwrap_or_else(|| self.white_texture())
    }

    pub fn white_texture(&self) -> TextureHandle {
        self.textures[TextureId::WHITE.0 as usize].handle
    }

    /// Cubemap for `id`, falling back to the white cubemap.
    pub fn cubemap_or_white(&self, id: Option<TextureId>) -> TextureHandle {
        id.and_then(|id| self.texture(id))
            .filter(|t| t.dimension == crate::backend::TextureDimension::Cube)
            .unwrap_or(&self.textures[self.white_cubemap.0 as usize])
            .handle
    }

    // Meshes, materials and models

    pub fn add_mesh<D: RenderDevice>(&mut self, device: &mut D, data: &MeshData) -> EngineResult<MeshId> {
        let mesh = Mesh::upload(device, data)?;
        let id = MeshId(self.meshes.len() as u32);
        self.meshes.push(mesh);
        Ok(id)
    }

    pub fn mesh(&self, id: MeshId) -> Option<&Mesh> {
        self.meshes.get(id.0 as usize)
    }

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        let id = MaterialId(self.materials.len() as u32);
        self.materials.push(material);
        id
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0 as usize)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0 as usize)
    }

    pub fn add_model(&mut self, model: Model) -> ModelId {
        let id = ModelId(self.models.len() as u32);
        self.models.push(model);
        id
    }

    pub fn model(&self, id: ModelId) -> Option<&Model> {
        self.models.get(id.0 as usize)
    }

    /// Build a model from a mesh, giving every part the same material.
    pub fn add_mesh_model<D: RenderDevice>(
        &mut self,
        device: &mut D,
        data: &MeshData,
        material: Material,
    ) -> EngineResult<ModelId> {
        let mesh = self.add_mesh(device, data)?;
        let material = self.add_material(material);
        let mut model = Model::new(&data.name, mesh);
        model.materials = vec![material; data.parts.len()];
        Ok(self.add_model(model))
    }

    /// Load an OBJ model with its materials and textures.
    ///
    /// Textures that fail to load leave the material untextured.
    pub fn load_model<D: RenderDevice>(
        &mut self,
        device: &mut D,
        path: impl AsRef<Path>,
    ) -> EngineResult<ModelId> {
        let path = path.as_ref();
        let data = ModelData::from_obj(path)?;

        let first_material = self.materials.len() as u32;
        for material in &data.materials {
            let texture = material
                .diffuse_texture
                .as_ref()
                .and_then(|texture| self.load_texture(device, texture));
            self.add_material(Material {
                name: material.name.clone(),
                albedo: material.diffuse,
                albedo_texture: texture,
            });
        }
        let fallback = (data.materials.is_empty()
            || data.mesh.parts.iter().any(|p| p.material_index.is_none()))
        .then(|| self.add_material(Material::default()));

        let mesh = self.add_mesh(device, &data.mesh)?;
        let mut model = Model::new(&data.mesh.name, mesh);
        model.materials = data
            .mesh
            .parts
            .iter()
            .map(|part| {
                part.material_index
                    .filter(|&i| i < data.materials.len())
                    .map(|i| MaterialId(first_material + i as u32))
                    .or(fallback)
                    .unwrap_or(MaterialId(first_material))
            })
            .collect();

        log::info!(
            "Loaded model {} ({} parts, {} materials)",
            path.display(),
            data.mesh.parts.len(),
            data.materials.len()
        );
        Ok(self.add_model(model))
    }

    /// Vertex binding of part `part` of `mesh` for `program`.
    ///
    /// Returns `None` for unknown ids or invalid programs, logging device
    /// failures.
    pub fn resolve_binding<D: RenderDevice>(
        &mut self,
        device: &mut D,
        mesh: MeshId,
        part: usize,
        program: ProgramId,
    ) -> Option<VertexBindingHandle> {
        let program_ref = self.programs.get(program.0 as usize).filter(|p| p.is_valid())?;
        let submesh = self
            .meshes
            .get_mut(mesh.0 as usize)?
            .submeshes
            .get_mut(part)?;

        match submesh
            .bindings
            .resolve(device, &submesh.source, program, program_ref)
        {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("Failed to bind mesh {:?} to {}: {}", mesh, program_ref.name, e);
                None
            }
        }
    }

    /// Destroy every device object owned by the table.
    pub fn destroy<D: RenderDevice>(&mut self, device: &mut D) {
        for mesh in &mut self.meshes {
            mesh.destroy(device);
        }
        for program in &mut self.programs {
            program.destroy(device);
        }
        for texture in &self.textures {
            device.destroy_texture(texture.handle);
        }
        self.meshes.clear();
        self.programs.clear();
        self.textures.clear();
        self.texture_paths.clear();
        self.materials.clear();
        self.models.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DummyDevice, TextureDimension};

    #[test]
    fn test_texture_fallbacks() {
        let mut device = DummyDevice::new();
        let mut resources = ResourceTable::new(&mut device).unwrap();

        assert!(resources.load_texture(&mut device, "/nonexistent/dice.png").is_none());
        let white = resources.white_texture();
        assert_eq!(resources.texture_or_white(None), white);
        assert_eq!(resources.texture_or_white(Some(TextureId(99))), white);
        assert_ne!(resources.cubemap_or_white(None), white);
        assert_eq!(resources.cubemap_or_white(Some(TextureId::WHITE)), resources.cubemap_or_white(None));
    }

    #[test]
    fn test_cubemap_never_bound_as_2d() {
        let mut device = DummyDevice::new();
        let resources = ResourceTable::new(&mut device).unwrap();

        let cube = resources.cubemap_or_white(None);
        assert_eq!(
            device.texture_descriptor(cube).unwrap().dimension,
            TextureDimension::Cube
        );

        let (cube_id, _) = (0..8)
            .map(TextureId)
            .filter_map(|id| resources.texture(id).map(|t| (id, t)))
            .find(|(_, t)| t.dimension == TextureDimension::Cube)
            .unwrap();
        let bound = resources.texture_or_white(Some(cube_id));
        assert_eq!(bound, resources.white_texture());
        assert_eq!(
            device.texture_descriptor(bound).unwrap().dimension,
            TextureDimension::D2
        );
    }

    #[test]
    fn test_texture_dedupe() {
        let dir = std::env::temp_dir().join(format!("renderlab_table_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("red.png");
        image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]))
            .save(&path)
            .unwrap();

        let mut device = DummyDevice::new();
        let mut resources = ResourceTable::new(&mut device).unwrap();
        let textures_before = device.live_textures();

        let first = resources.load_texture(&mut device, &path).unwrap();
        let second = resources.load_texture(&mut device, &path).unwrap();
        assert_eq!(first, second);
        assert_ne!(first, TextureId::WHITE);
        assert_eq!(device.live_textures(), textures_before + 1);
    }

    #[test]
    fn test_invalid_program_has_no_binding() {
        let mut device = DummyDevice::new();
        let mut resources = ResourceTable::new(&mut device).unwrap();
        let mesh = resources.add_mesh(&mut device, &MeshData::quad()).unwrap();
        let program = resources.load_program(&mut device, "/nonexistent/shaders.glsl", "QUAD");

        assert!(resources.resolve_binding(&mut device, mesh, 0, program).is_none());
        assert_eq!(device.live_vertex_bindings(), 0);
    }
}
