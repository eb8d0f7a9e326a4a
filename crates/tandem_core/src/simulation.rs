//! Object simulation record and CPU reference kernel
//!
//! `ObjectState` is the exact std430 layout of one element of the GPU
//! simulation buffer. The compute shader and [`step_object`] implement the
//! same integration so the headless backend and tests can check what the
//! GPU would produce.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use rayon::prelude::*;

/// Threads per compute work-group (`local_size_x` in the shader)
pub const WORKGROUP_SIZE: u32 = 256;

/// Number of work-groups needed to cover `object_count` objects
pub fn workgroup_count(object_count: u32) -> u32 {
    object_count.div_ceil(WORKGROUP_SIZE)
}

/// One element of the simulation buffer (112 bytes, std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ObjectState {
    /// Column-major; carries the live translation
    pub model: [[f32; 4]; 4],
    pub position: [f32; 4],
    pub velocity: [f32; 4],
    pub color: [f32; 4],
}

impl ObjectState {
    pub fn at(position: Vec3, velocity: Vec3, color: Vec3) -> Self {
        Self {
            model: Mat4::from_translation(position).to_cols_array_2d(),
            position: position.extend(1.0).to_array(),
            velocity: velocity.extend(0.0).to_array(),
            color: color.extend(1.0).to_array(),
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.position[0], self.position[1], self.position[2])
    }

    pub fn velocity(&self) -> Vec3 {
        Vec3::new(self.velocity[0], self.velocity[1], self.velocity[2])
    }

    pub fn model(&self) -> Mat4 {
        Mat4::from_cols_array_2d(&self.model)
    }
}

/// Compute push constants (12 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SimulationParams {
    pub dt: f32,
    pub time: f32,
    pub count: i32,
}

/// Box the objects bounce around in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationBounds {
    /// Walls sit at `±half_extent` on X and Z
    pub half_extent: f32,
    pub floor: f32,
    pub ceiling: f32,
}

impl Default for SimulationBounds {
    fn default() -> Self {
        Self {
            half_extent: 10.0,
            floor: -1.0,
            ceiling: 12.0,
        }
    }
}

impl SimulationBounds {
    fn axis_range(&self, axis: usize) -> (f32, f32) {
        match axis {
            1 => (self.floor, self.ceiling),
            _ => (-self.half_extent, self.half_extent),
        }
    }
}

/// Integrate one object by `dt`.
///
/// Each axis is handled independently: leaving the range clamps the
/// position back onto the boundary and reflects that velocity component.
pub fn step_object(state: &mut ObjectState, dt: f32, bounds: &SimulationBounds) {
    for axis in 0..3 {
        let (lo, hi) = bounds.axis_range(axis);
        let mut p = state.position[axis] + state.velocity[axis] * dt;
        if p < lo || p > hi {
            p = p.clamp(lo, hi);
            state.velocity[axis] = -state.velocity[axis];
        }
        state.position[axis] = p;
        state.model[3][axis] = p;
    }
}

/// Run the kernel over the first `count` objects
pub fn step_all(states: &mut [ObjectState], count: usize, dt: f32, bounds: &SimulationBounds) {
    let count = count.min(states.len());
    states[..count]
        .par_iter_mut()
        .for_each(|state| step_object(state, dt, bounds));
    tracing::trace!(count, dt, "simulation step");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_gpu_record() {
        assert_eq!(std::mem::size_of::<ObjectState>(), 112);
        assert_eq!(std::mem::size_of::<SimulationParams>(), 12);
    }

    #[test]
    fn workgroups_round_up() {
        assert_eq!(workgroup_count(0), 0);
        assert_eq!(workgroup_count(1), 1);
        assert_eq!(workgroup_count(256), 1);
        assert_eq!(workgroup_count(257), 2);
    }

    #[test]
    fn free_motion_updates_position_and_model() {
        let bounds = SimulationBounds::default();
        let mut s = ObjectState::at(Vec3::new(0.0, 5.0, 0.0), Vec3::new(1.0, 0.5, -2.0), Vec3::ONE);
        step_object(&mut s, 0.5, &bounds);

        assert_eq!(s.position(), Vec3::new(0.5, 5.25, -1.0));
        assert_eq!(s.model().w_axis.truncate(), s.position());
        assert_eq!(s.velocity(), Vec3::new(1.0, 0.5, -2.0));
    }

    #[test]
    fn leaving_the_box_clamps_and_reflects() {
        let bounds = SimulationBounds::default();
        let mut s = ObjectState::at(Vec3::new(9.9, -0.9, 0.0), Vec3::new(1.0, -1.0, 0.0), Vec3::ONE);
        step_object(&mut s, 1.0, &bounds);

        assert_eq!(s.position(), Vec3::new(10.0, -1.0, 0.0));
        assert_eq!(s.velocity(), Vec3::new(-1.0, 1.0, 0.0));
    }

    #[test]
    fn step_all_respects_count() {
        let bounds = SimulationBounds::default();
        let mut states = vec![ObjectState::at(Vec3::ZERO, Vec3::X, Vec3::ONE); 3];
        step_all(&mut states, 2, 1.0, &bounds);

        assert_eq!(states[0].position().x, 1.0);
        assert_eq!(states[1].position().x, 1.0);
        assert_eq!(states[2].position().x, 0.0);
    }
}
