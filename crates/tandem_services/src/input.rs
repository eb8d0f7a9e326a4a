//! Fly camera and input state

use tandem_core::math::{Mat4, Vec2, Vec3};

/// Degrees of rotation per pixel of mouse movement
pub const LOOK_SENSITIVITY: f32 = 0.1;
pub const PITCH_LIMIT_DEGREES: f32 = 89.0;

/// Logical keys, mapped from platform key codes by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Forward,
    Back,
    Left,
    Right,
    Up,
    Down,
}

impl Key {
    const COUNT: usize = 6;

    fn slot(self) -> usize {
        self as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    /// Degrees; -90 looks down -Z
    pub yaw: f32,
    pub pitch: f32,
    /// World units per second
    pub speed: f32,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::new(0.0, 7.0, 15.0),
            yaw: -90.0,
            pitch: 0.0,
            speed: 15.0,
            fov_y_degrees: 45.0,
            near: 0.1,
            far: 100.0,
        }
    }
}

impl Camera {
    pub fn front(&self) -> Vec3 {
        let (yaw, pitch) = (self.yaw.to_radians(), self.pitch.to_radians());
        Vec3::new(yaw.cos() * pitch.cos(), pitch.sin(), yaw.sin() * pitch.cos()).normalize()
    }

    pub fn right(&self) -> Vec3 {
        self.front().cross(Vec3::Y).normalize()
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.position + self.front(), Vec3::Y)
    }

    /// Vulkan clip space: depth in [0, 1] and Y pointing down
    pub fn projection(&self, aspect: f32) -> Mat4 {
        let mut proj =
            Mat4::perspective_rh(self.fov_y_degrees.to_radians(), aspect, self.near, self.far);
        proj.y_axis.y *= -1.0;
        proj
    }

    /// Apply a mouse delta in pixels
    pub fn look(&mut self, delta: Vec2) {
        self.yaw += delta.x * LOOK_SENSITIVITY;
        self.pitch = (self.pitch - delta.y * LOOK_SENSITIVITY)
            .clamp(-PITCH_LIMIT_DEGREES, PITCH_LIMIT_DEGREES);
    }
}

/// Held keys, pending mouse motion and the light toggle
#[derive(Debug, Clone)]
pub struct InputState {
    held: [bool; Key::COUNT],
    looking: bool,
    pending_look: Vec2,
    pub lights_on: bool,
}

impl Default for InputState {
    fn default() -> Self {
        Self {
            held: [false; Key::COUNT],
            looking: false,
            pending_look: Vec2::ZERO,
            lights_on: true,
        }
    }
}

impl InputState {
    pub fn set_key(&mut self, key: Key, pressed: bool) {
        self.held[key.slot()] = pressed;
    }

    pub fn is_held(&self, key: Key) -> bool {
        self.held[key.slot()]
    }

    /// Mouse look is active only while the right button is down
    pub fn set_looking(&mut self, looking: bool) {
        self.looking = looking;
    }

    pub fn mouse_moved(&mut self, dx: f32, dy: f32) {
        if self.looking {
            self.pending_look += Vec2::new(dx, dy);
        }
    }

    /// Forget held keys and pending look, e.g. when the window loses focus
    pub fn release_all(&mut self) {
        self.held = [false; Key::COUNT];
        self.looking = false;
        self.pending_look = Vec2::ZERO;
    }

    pub fn toggle_lights(&mut self) {
        self.lights_on = !self.lights_on;
        tracing::info!(lights_on = self.lights_on, "lights toggled");
    }

    /// Move and turn the camera for one frame, consuming queued mouse motion
    pub fn apply(&mut self, camera: &mut Camera, dt: f32) {
        if self.pending_look != Vec2::ZERO {
            camera.look(self.pending_look);
            self.pending_look = Vec2::ZERO;
        }

        let step = camera.speed * dt;
        let (front, right) = (camera.front(), camera.right());
        let axes = [
            (Key::Forward, front),
            (Key::Back, -front),
            (Key::Right, right),
            (Key::Left, -right),
            (Key::Up, Vec3::Y),
            (Key::Down, Vec3::NEG_Y),
        ];
        for (key, dir) in axes {
            if self.is_held(key) {
                camera.position += dir * step;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!((camera.front() - Vec3::NEG_Z).length() < 1e-6);
        assert!((camera.right() - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn projection_flips_y() {
        let camera = Camera::default();
        let proj = camera.projection(16.0 / 9.0);
        assert!(proj.y_axis.y < 0.0);

        // A point above the camera lands in the upper half (negative Y in Vulkan)
        let clip = proj * camera.view() * Vec3::new(0.0, 8.0, 0.0).extend(1.0);
        assert!(clip.y / clip.w < 0.0);
    }

    #[test]
    fn keys_move_relative_to_view() {
        let mut camera = Camera::default();
        let mut input = InputState::default();
        input.set_key(Key::Forward, true);
        input.set_key(Key::Up, true);
        input.apply(&mut camera, 0.1);

        assert!((camera.position - Vec3::new(0.0, 8.5, 13.5)).length() < 1e-4);
    }

    #[test]
    fn look_requires_button_and_clamps_pitch() {
        let mut camera = Camera::default();
        let mut input = InputState::default();

        input.mouse_moved(100.0, 0.0);
        input.apply(&mut camera, 0.0);
        assert_eq!(camera.yaw, -90.0);

        input.set_looking(true);
        input.mouse_moved(100.0, -5000.0);
        input.apply(&mut camera, 0.0);
        assert!((camera.yaw - -80.0).abs() < 1e-4);
        assert_eq!(camera.pitch, PITCH_LIMIT_DEGREES);
    }

    #[test]
    fn lights_toggle() {
        let mut input = InputState::default();
        assert!(input.lights_on);
        input.toggle_lights();
        assert!(!input.lights_on);
    }

    #[test]
    fn release_all_drops_keys_but_keeps_lights() {
        let mut input = InputState::default();
        input.toggle_lights();
        input.set_key(Key::Forward, true);
        input.set_looking(true);
        input.release_all();
        assert!(!input.is_held(Key::Forward));
        input.mouse_moved(10.0, 10.0);
        let mut camera = Camera::default();
        let before = camera.yaw;
        input.apply(&mut camera, 0.0);
        assert_eq!(camera.yaw, before);
        assert!(!input.lights_on);
    }
}
