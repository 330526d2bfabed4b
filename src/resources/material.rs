//! Materials and models

use glam::Vec3;

use super::{MaterialId, MeshId, TextureId};

/// Surface description of a mesh part
#[derive(Debug, Clone)]
pub struct Material {
    pub name: String,
    pub albedo: Vec3,
    /// `None` or [`TextureId::WHITE`] means untextured
    pub albedo_texture: Option<TextureId>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            albedo: Vec3::ONE,
            albedo_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_albedo(mut self, albedo: Vec3) -> Self {
        self.albedo = albedo;
        self
    }

    pub fn with_texture(mut self, texture: TextureId) -> Self {
        self.albedo_texture = Some(texture);
        self
    }

    /// The texture to sample, if the material has a real one
    pub fn texture(&self) -> Option<TextureId> {
        self.albedo_texture.filter(|t| *t != TextureId::WHITE)
    }

    /// Color written to the material block.
    ///
    /// Textured materials take their color from the texture alone.
    pub fn block_color(&self) -> Vec3 {
        if self.texture().is_some() {
            Vec3::ONE
        } else {
            self.albedo
        }
    }
}

/// A mesh together with one material per part
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub mesh: MeshId,
    pub materials: Vec<MaterialId>,
}

impl Model {
    pub fn new(name: &str, mesh: MeshId) -> Self {
        Self {
            name: name.to_string(),
            mesh,
            materials: Vec::new(),
        }
    }

    /// Material of part `index`, if one was assigned
    pub fn material(&self, index: usize) -> Option<MaterialId> {
        self.materials.get(index).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_color() {
        let plain = Material::new("plain").with_albedo(Vec3::new(0.5, 0.2, 0.1));
        assert_eq!(plain.block_color(), Vec3::new(0.5, 0.2, 0.1));

        let textured = plain.clone().with_texture(TextureId(4));
        assert_eq!(textured.block_color(), Vec3::ONE);

        // The white texture counts as untextured
        let white = plain.with_texture(TextureId::WHITE);
        assert!(white.texture().is_none());
        assert_eq!(white.block_color(), Vec3::new(0.5, 0.2, 0.1));
    }
}
