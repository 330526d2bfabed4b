//! Light types for the scene

use glam::Vec3;

use crate::frame::{FrameBuffer, FrameResult};

/// Kind of light, written to the global block as a u32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum LightKind {
    #[default]
    Directional = 0,
    Point = 1,
}

/// A light evaluated by the lighting shaders
#[derive(Debug, Clone, PartialEq)]
pub struct Light {
    pub kind: LightKind,
    pub color: Vec3,
    /// Used by point lights
    pub position: Vec3,
    /// Used by directional lights, points from the light into the scene
    pub direction: Vec3,
    /// Point light attenuation radius
    pub radius: f32,
    pub intensity: f32,
}

impl Default for Light {
    fn default() -> Self {
        Self::directional(Vec3::ONE, Vec3::new(1.0, -1.0, 1.0), 10.0)
    }
}

impl Light {
    pub fn directional(color: Vec3, direction: Vec3, intensity: f32) -> Self {
        Self {
            kind: LightKind::Directional,
            color,
            position: Vec3::ZERO,
            direction,
            radius: 100.0,
            intensity,
        }
    }

    pub fn point(color: Vec3, position: Vec3, radius: f32, intensity: f32) -> Self {
        Self {
            kind: LightKind::Point,
            color,
            position,
            direction: Vec3::ZERO,
            radius,
            intensity,
        }
    }

    /// Size of one light in the global block
    pub const STD140_SIZE: u64 = 64;

    /// Append this light to the global block.
    ///
    /// Every light starts on a 16-byte boundary and takes 64 bytes.
    pub fn write(&self, frame: &mut FrameBuffer) -> FrameResult<()> {
        frame.align_to(FrameBuffer::VEC4_ALIGNMENT)?;
        frame.push_u32(self.kind as u32)?;
        frame.push_vec3(self.color)?;
        frame.push_vec3(self.direction)?;
        frame.push_f32(self.intensity)?;
        frame.push_vec3(self.position)?;
        frame.push_f32(self.radius)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_light_layout() {
        let mut frame = FrameBuffer::new(256).unwrap();
        frame.push_u32(7).unwrap();
        let light = Light::point(Vec3::new(1.0, 0.5, 0.25), Vec3::new(6.0, 1.0, 1.0), 5.0, 2.0);
        light.write(&mut frame).unwrap();

        // 16 bytes of preceding data, then one 64 byte light
        assert_eq!(frame.head(), 16 + 64);
        let bytes = frame.contents();
        let word = |offset: usize| u32::from_ne_bytes(bytes[offset..offset + 4].try_into().unwrap());
        let float = |offset: usize| f32::from_bits(word(offset));

        assert_eq!(word(16), 1);
        assert_eq!(float(32), 1.0);
        assert_eq!(float(36), 0.5);
        assert_eq!(float(60), 2.0);
        assert_eq!(float(64), 6.0);
        assert_eq!(float(76), 5.0);
    }
}
