//! Acceleration-structure contract and instance policy
//!
//! Bottom-level structures are built once per unique mesh, the top-level
//! structure once per scene from the placement transforms. Simulated motion
//! moves the raster draws and the ray-trace shading inputs (through the
//! simulation buffer) but not the traced geometry; the top level is never
//! refit.

use crate::error::RenderError;
use crate::resources::{GpuGeometry, SceneObject};
use glam::Mat4;

/// Mask bit for geometry primary rays may hit
pub const PRIMARY_VISIBLE: u8 = 0x01;
/// Mask bit for geometry only shadow and reflection rays see
pub const SECONDARY_ONLY: u8 = 0x02;

/// Raster objects are already on screen, so primary rays skip them.
pub fn visibility_mask(raster: bool) -> u8 {
    if raster {
        SECONDARY_ONLY
    } else {
        PRIMARY_VISIBLE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BottomStructureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TopStructureHandle(pub u32);

/// One top-level instance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StructureInstance {
    pub bottom: BottomStructureHandle,
    /// Row-major 3x4 object-to-world transform
    pub transform: [[f32; 4]; 3],
    pub mask: u8,
    /// Object index, read back in hit shaders
    pub custom_index: u32,
}

pub trait AccelerationStructureBuilder {
    /// Build an opaque triangle structure over one uploaded mesh
    fn build_bottom(&mut self, geometry: &GpuGeometry) -> Result<BottomStructureHandle, RenderError>;

    fn build_top(&mut self, instances: &[StructureInstance]) -> Result<TopStructureHandle, RenderError>;
}

/// Upper three rows of `m`
pub fn transform_rows(m: Mat4) -> [[f32; 4]; 3] {
    [m.row(0).to_array(), m.row(1).to_array(), m.row(2).to_array()]
}

/// One instance per object, referencing the bottom structure of its
/// geometry. `bottoms` is indexed by geometry.
pub fn scene_instances(
    objects: &[SceneObject],
    bottoms: &[BottomStructureHandle],
) -> Result<Vec<StructureInstance>, RenderError> {
    objects
        .iter()
        .enumerate()
        .map(|(index, object)| {
            let bottom = bottoms.get(object.geometry).copied().ok_or_else(|| {
                RenderError::InvalidState(format!(
                    "object {index} references missing geometry {}",
                    object.geometry
                ))
            })?;
            Ok(StructureInstance {
                bottom,
                transform: transform_rows(object.placement),
                mask: visibility_mask(object.raster),
                custom_index: index as u32,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec3, Vec4};

    fn object(geometry: usize, raster: bool, position: Vec3) -> SceneObject {
        SceneObject {
            geometry,
            placement: Mat4::from_translation(position),
            rotation: Mat4::IDENTITY,
            color: Vec3::ONE,
            raster,
        }
    }

    #[test]
    fn raster_and_traced_masks_are_disjoint() {
        assert_eq!(visibility_mask(true) & PRIMARY_VISIBLE, 0);
        assert_ne!(visibility_mask(true) & SECONDARY_ONLY, 0);
        assert_ne!(visibility_mask(false) & PRIMARY_VISIBLE, 0);
        assert_eq!(visibility_mask(false) & SECONDARY_ONLY, 0);
    }

    #[test]
    fn transform_rows_keep_translation_in_last_column() {
        let rows = transform_rows(Mat4::from_translation(Vec3::new(1.0, 2.0, 3.0)));
        assert_eq!(rows[0], [1.0, 0.0, 0.0, 1.0]);
        assert_eq!(rows[1], [0.0, 1.0, 0.0, 2.0]);
        assert_eq!(rows[2], [0.0, 0.0, 1.0, 3.0]);
        assert_eq!(Mat4::from_translation(Vec3::X).row(3), Vec4::W);
    }

    #[test]
    fn instances_follow_object_order() {
        let objects = [object(1, true, Vec3::ZERO), object(0, false, Vec3::Y)];
        let bottoms = [BottomStructureHandle(7), BottomStructureHandle(9)];

        let instances = scene_instances(&objects, &bottoms).unwrap();
        assert_eq!(instances[0].bottom, BottomStructureHandle(9));
        assert_eq!(instances[0].mask, SECONDARY_ONLY);
        assert_eq!(instances[1].bottom, BottomStructureHandle(7));
        assert_eq!(instances[1].mask, PRIMARY_VISIBLE);
        assert_eq!(instances[1].custom_index, 1);
        assert_eq!(instances[1].transform[1][3], 1.0);
    }

    #[test]
    fn missing_geometry_is_an_error() {
        let objects = [object(3, false, Vec3::ZERO)];
        assert!(scene_instances(&objects, &[BottomStructureHandle(0)]).is_err());
    }
}
