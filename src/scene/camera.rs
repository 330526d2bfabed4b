//! Fly camera

use glam::{Mat4, Vec3};

/// Direction of a keyboard camera move
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraMovement {
    Forward,
    Backward,
    Left,
    Right,
    Up,
    Down,
}

/// Yaw/pitch camera with a perspective projection
#[derive(Debug, Clone)]
pub struct Camera {
    pub position: Vec3,
    /// Degrees, -90 looks down -Z
    pub yaw: f32,
    /// Degrees, clamped to +-89
    pub pitch: f32,
    /// Vertical field of view in degrees
    pub fov: f32,
    pub near: f32,
    pub far: f32,
    pub aspect: f32,
    pub speed: f32,
    pub sensitivity: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 10.0, 10.0),
            yaw: -90.0,
            pitch: 0.0,
            fov: 60.0,
            near: 0.1,
            far: 10000.0,
            aspect: 16.0 / 9.0,
            speed: 0.25,
            sensitivity: 0.15,
        }
    }
}

impl Camera {
    pub const MAX_PITCH: f32 = 89.0;

    pub fn new(position: Vec3, aspect: f32) -> Self {
        Self {
            position,
            aspect,
            ..Default::default()
        }
    }

    /// Unit vector the camera looks along
    pub fn front(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.front().cross(Vec3::Y).normalize()
    }

    pub fn up(&self) -> Vec3 {
        self.right().cross(self.front()).normalize()
    }

    /// Get the view matrix
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front(), Vec3::Y)
    }

    /// Get the projection matrix
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fov.to_radians(), self.aspect, self.near, self.far)
    }

    /// Get combined view-projection matrix
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    pub fn set_aspect(&mut self, width: u32, height: u32) {
        if height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    /// Rotate by a mouse delta in pixels
    pub fn process_mouse(&mut self, dx: f32, dy: f32) {
        self.yaw += dx * self.sensitivity;
        self.pitch = (self.pitch + dy * self.sensitivity).clamp(-Self::MAX_PITCH, Self::MAX_PITCH);
    }

    /// Move one step of `speed` in `direction`
    pub fn translate(&mut self, direction: CameraMovement) {
        let offset = match direction {
            CameraMovement::Forward => self.front(),
            CameraMovement::Backward => -self.front(),
            CameraMovement::Left => -self.right(),
            CameraMovement::Right => self.right(),
            CameraMovement::Up => self.up(),
            CameraMovement::Down => -self.up(),
        };
        self.position += offset * self.speed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_looks_down_negative_z() {
        let camera = Camera::default();
        assert!((camera.front() - Vec3::NEG_Z).length() < 1e-5);
        assert_eq!(camera.position, Vec3::new(0.0, 10.0, 10.0));
    }

    #[test]
    fn test_pitch_is_clamped() {
        let mut camera = Camera::default();
        camera.process_mouse(0.0, 10_000.0);
        assert_eq!(camera.pitch, 89.0);
        camera.process_mouse(0.0, -20_000.0);
        assert_eq!(camera.pitch, -89.0);
    }

    #[test]
    fn test_translate() {
        let mut camera = Camera::default();
        camera.translate(CameraMovement::Forward);
        assert!((camera.position - Vec3::new(0.0, 10.0, 9.75)).length() < 1e-5);
        camera.translate(CameraMovement::Right);
        assert!((camera.position.x - 0.25).abs() < 1e-5);
    }

    #[test]
    fn test_view_projection_maps_target_to_center() {
        let camera = Camera::default();
        let clip = camera.view_projection_matrix() * (camera.position + camera.front() * 5.0).extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    }
}
