//! Per-frame uniform blocks and per-draw push data
//!
//! Layouts mirror the std140 blocks in `shaders/`; sizes are checked below.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};
use tandem_services::{LightDesc, MAX_LIGHTS};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuLight {
    pub position: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    /// 1 when the light contributes
    pub enabled: i32,
}

/// Ray-trace stage block (256 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RayTraceUniforms {
    pub view_inverse: [[f32; 4]; 4],
    pub proj_inverse: [[f32; 4]; 4],
    pub camera_pos: [f32; 3],
    pub _pad0: f32,
    pub lights: [GpuLight; MAX_LIGHTS],
    pub light_count: i32,
    pub _pad1: [f32; 3],
}

/// Raster stage block (128 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RasterUniforms {
    pub view: [[f32; 4]; 4],
    /// Already Y-flipped
    pub proj: [[f32; 4]; 4],
}

/// Per-draw push constants (80 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RasterPush {
    /// Object rotation; the simulation buffer supplies the translation
    pub model: [[f32; 4]; 4],
    pub color: [f32; 3],
    /// Index into the simulation buffer
    pub object_index: u32,
}

impl RasterPush {
    pub fn new(model: Mat4, color: Vec3, object_index: u32) -> Self {
        Self {
            model: model.to_cols_array_2d(),
            color: color.to_array(),
            object_index,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewParams {
    pub view: Mat4,
    pub proj: Mat4,
    pub eye: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameUniforms {
    pub raster: RasterUniforms,
    pub ray_trace: RayTraceUniforms,
}

impl FrameUniforms {
    /// Build both blocks. With `lights_on` false every light is disabled
    /// but stays in the block.
    pub fn compose(view: &ViewParams, lights: &[LightDesc], lights_on: bool) -> Self {
        let mut gpu_lights = [GpuLight::zeroed(); MAX_LIGHTS];
        let count = lights.len().min(MAX_LIGHTS);
        if lights.len() > MAX_LIGHTS {
            tracing::warn!(lights = lights.len(), "extra lights ignored");
        }
        for (slot, light) in gpu_lights.iter_mut().zip(lights) {
            *slot = GpuLight {
                position: light.position,
                intensity: light.intensity,
                color: light.color,
                enabled: (light.enabled && lights_on) as i32,
            };
        }

        Self {
            raster: RasterUniforms {
                view: view.view.to_cols_array_2d(),
                proj: view.proj.to_cols_array_2d(),
            },
            ray_trace: RayTraceUniforms {
                view_inverse: view.view.inverse().to_cols_array_2d(),
                proj_inverse: view.proj.inverse().to_cols_array_2d(),
                camera_pos: view.eye.to_array(),
                _pad0: 0.0,
                lights: gpu_lights,
                light_count: count as i32,
                _pad1: [0.0; 3],
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_services::Camera;

    fn light(enabled: bool) -> LightDesc {
        LightDesc {
            position: [0.0, 8.0, 0.0],
            intensity: 2.0,
            color: [1.0, 0.9, 0.8],
            enabled,
        }
    }

    fn camera_view() -> ViewParams {
        let camera = Camera::default();
        ViewParams {
            view: camera.view(),
            proj: camera.projection(16.0 / 9.0),
            eye: camera.position,
        }
    }

    #[test]
    fn block_sizes_match_shaders() {
        assert_eq!(std::mem::size_of::<GpuLight>(), 32);
        assert_eq!(std::mem::size_of::<RayTraceUniforms>(), 256);
        assert_eq!(std::mem::size_of::<RasterUniforms>(), 128);
        assert_eq!(std::mem::size_of::<RasterPush>(), 80);
        assert_eq!(std::mem::offset_of!(RayTraceUniforms, lights), 144);
        assert_eq!(std::mem::offset_of!(RayTraceUniforms, light_count), 240);
    }

    #[test]
    fn inverse_matrices_undo_view() {
        let view = camera_view();
        let uniforms = FrameUniforms::compose(&view, &[], true);
        let inv = Mat4::from_cols_array_2d(&uniforms.ray_trace.view_inverse);
        let origin = inv.transform_point3(Vec3::ZERO);
        assert!(origin.abs_diff_eq(view.eye, 1e-4));
        assert_eq!(uniforms.ray_trace.light_count, 0);
    }

    #[test]
    fn light_toggle_disables_without_removing() {
        let view = camera_view();
        let lights = [light(true), light(false)];

        let on = FrameUniforms::compose(&view, &lights, true);
        assert_eq!(on.ray_trace.light_count, 2);
        assert_eq!(on.ray_trace.lights[0].enabled, 1);
        assert_eq!(on.ray_trace.lights[1].enabled, 0);

        let off = FrameUniforms::compose(&view, &lights, false);
        assert_eq!(off.ray_trace.light_count, 2);
        assert!(off.ray_trace.lights.iter().all(|l| l.enabled == 0));
        assert_eq!(off.ray_trace.lights[0].intensity, 2.0);
    }
}
