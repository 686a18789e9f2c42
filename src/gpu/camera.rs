//! Orbit camera for the viewer.

use glam::{Mat4, Vec3};

/// Orbit camera looking at the flock.
pub struct Camera {
    /// Horizontal rotation angle in radians.
    pub yaw: f32,
    /// Vertical rotation angle in radians.
    pub pitch: f32,
    /// Distance from the target point.
    pub distance: f32,
    /// Point the camera orbits around.
    pub target: Vec3,
}

impl Camera {
    /// Camera framing a flock contained in a sphere of `radius`.
    pub fn framing(radius: f32) -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.3,
            distance: radius.max(1.0) * 2.75,
            target: Vec3::ZERO,
        }
    }

    /// Calculate the camera's world position.
    pub fn position(&self) -> Vec3 {
        let x = self.distance * self.pitch.cos() * self.yaw.sin();
        let y = self.distance * self.pitch.sin();
        let z = self.distance * self.pitch.cos() * self.yaw.cos();
        self.target + Vec3::new(x, y, z)
    }

    /// Calculate the view matrix for rendering.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    /// Projection times view. The far plane follows the orbit distance.
    pub fn view_proj(&self, aspect: f32) -> Mat4 {
        let far = (self.distance * 4.0).max(100.0);
        let proj = Mat4::perspective_rh(45.0_f32.to_radians(), aspect, 1.0, far);
        proj * self.view_matrix()
    }

    /// Rotate by a mouse drag in pixels.
    pub fn orbit(&mut self, dx: f32, dy: f32) {
        self.yaw -= dx * 0.005;
        self.pitch = (self.pitch + dy * 0.005).clamp(-1.5, 1.5);
    }

    /// Zoom by scroll lines; each line moves 10% of the current distance.
    pub fn zoom(&mut self, lines: f32) {
        self.distance = (self.distance * (1.0 - lines * 0.1)).clamp(10.0, 10_000.0);
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::framing(400.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orbit_keeps_distance() {
        let mut camera = Camera::framing(400.0);
        camera.orbit(120.0, -40.0);
        assert!((camera.position().length() - camera.distance).abs() < 1e-2);
    }

    #[test]
    fn test_pitch_and_zoom_clamped() {
        let mut camera = Camera::default();
        camera.orbit(0.0, 10_000.0);
        assert_eq!(camera.pitch, 1.5);
        camera.zoom(1_000.0);
        assert_eq!(camera.distance, 10.0);
    }
}
