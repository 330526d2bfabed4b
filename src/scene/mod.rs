//! Scene management
//!
//! Plain data: a camera, the lights and the entities to draw.

mod camera;
mod entity;
mod light;

pub use camera::*;
pub use entity::*;
pub use light::*;

use crate::frame::{FrameBuffer, FrameResult, UniformRange};

/// The scene containing all renderable content
#[derive(Debug, Clone, Default)]
pub struct Scene {
    pub camera: Camera,
    pub lights: Vec<Light>,
    pub entities: Vec<Entity>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_entity(&mut self, entity: Entity) -> usize {
        self.entities.push(entity);
        self.entities.len() - 1
    }

    pub fn add_light(&mut self, light: Light) -> usize {
        self.lights.push(light);
        self.lights.len() - 1
    }

    /// Camera position and light count ahead of the light array
    pub const GLOBAL_HEADER_SIZE: u64 = 16;

    /// Number of lights a global block of `block_size` bytes holds.
    pub fn light_capacity(block_size: u64) -> usize {
        (block_size.saturating_sub(Self::GLOBAL_HEADER_SIZE) / Light::STD140_SIZE) as usize
    }

    /// Write the global block: camera position, light count, then the lights.
    ///
    /// At most `max_lights` lights are written.
    pub fn write_global_params(&self, frame: &mut FrameBuffer, max_lights: usize) -> FrameResult<UniformRange> {
        let count = self.lights.len().min(max_lights);
        if count < self.lights.len() {
            log::warn!(
                "Scene has {} lights, only the first {} are rendered",
                self.lights.len(),
                max_lights
            );
        }

        let start = frame.align_to(FrameBuffer::VEC4_ALIGNMENT)?;
        frame.push_vec3(self.camera.position)?;
        frame.push_u32(count as u32)?;
        for light in &self.lights[..count] {
            light.write(frame)?;
        }
        Ok(UniformRange::since(start, frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_global_params_layout() {
        let mut scene = Scene::new();
        scene.add_light(Light::default());
        scene.add_light(Light::point(Vec3::ONE, Vec3::ZERO, 5.0, 1.0));

        let mut frame = FrameBuffer::new(1024).unwrap();
        let range = scene.write_global_params(&mut frame, 16).unwrap();

        assert_eq!(range.offset, 0);
        assert_eq!(range.size, 16 + 2 * 64);
        let count = u32::from_ne_bytes(frame.contents()[12..16].try_into().unwrap());
        assert_eq!(count, 2);
    }

    #[test]
    fn test_light_limit() {
        let mut scene = Scene::new();
        for _ in 0..4 {
            scene.add_light(Light::default());
        }
        let mut frame = FrameBuffer::new(1024).unwrap();
        let range = scene.write_global_params(&mut frame, 3).unwrap();
        assert_eq!(range.size, 16 + 3 * 64);
    }

    #[test]
    fn test_light_capacity() {
        assert_eq!(Scene::light_capacity(16 + 16 * 64), 16);
        assert_eq!(Scene::light_capacity(16 + 2 * 64 + 20), 2);
        assert_eq!(Scene::light_capacity(8), 0);
    }
}
