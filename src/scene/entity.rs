//! Renderable entities

use glam::{Mat4, Vec3};

use crate::frame::UniformRange;
use crate::resources::ModelId;

/// A model placed in the world
#[derive(Debug, Clone)]
pub struct Entity {
    pub position: Vec3,
    /// Euler angles in degrees, applied X then Y then Z
    pub rotation: Vec3,
    pub scale: Vec3,
    pub model: ModelId,
    /// This frame's local block, `None` until written or when the frame
    /// buffer ran out of space
    pub local_params: Option<UniformRange>,
    /// This frame's material block for every model part
    pub material_params: Vec<UniformRange>,
}

impl Entity {
    pub fn new(model: ModelId) -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Vec3::ZERO,
            scale: Vec3::ONE,
            model,
            local_params: None,
            material_params: Vec::new(),
        }
    }

    pub fn with_position(mut self, position: Vec3) -> Self {
        self.position = position;
        self
    }

    pub fn with_rotation(mut self, rotation: Vec3) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_scale(mut self, scale: Vec3) -> Self {
        self.scale = scale;
        self
    }

    /// Translate, rotate about X, Y and Z, then scale
    pub fn world_matrix(&self) -> Mat4 {
        let radians = self.rotation * (std::f32::consts::PI / 180.0);
        Mat4::from_translation(self.position)
            * Mat4::from_rotation_x(radians.x)
            * Mat4::from_rotation_y(radians.y)
            * Mat4::from_rotation_z(radians.z)
            * Mat4::from_scale(self.scale)
    }

    /// Forget last frame's uniform ranges
    pub fn clear_params(&mut self) {
        self.local_params = None;
        self.material_params.clear();
    }
}
