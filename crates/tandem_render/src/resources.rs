//! Scene resources
//!
//! The set of GPU-side objects a frame reads and writes: uploaded geometry,
//! acceleration structures, and the simulation buffer seeded from the
//! scene descriptor. Per-slot images and uniform buffers live with the
//! backend's frame slots.

use crate::accel::{scene_instances, BottomStructureHandle, TopStructureHandle};
use crate::device::RenderBackend;
use crate::error::RenderError;
use glam::{Mat4, Vec3};
use tandem_asset::MeshCache;
use tandem_core::math::{placement_matrix, rotation_from_euler_degrees, DeterministicRng};
use tandem_core::simulation::{ObjectState, SimulationBounds};
use tandem_services::{LightDesc, SceneDescriptor};

/// Backend-issued id of an uploaded mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GeometryHandle(pub u32);

/// An uploaded mesh
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuGeometry {
    pub handle: GeometryHandle,
    pub vertex_count: u32,
    pub index_count: u32,
}

/// One placed object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneObject {
    /// Index into [`ResourceSet::geometries`]
    pub geometry: usize,
    /// Translation * rotation at load time
    pub placement: Mat4,
    pub rotation: Mat4,
    pub color: Vec3,
    pub raster: bool,
}

/// What the backend needs to create the simulation buffer and bind the
/// scene-wide descriptors
#[derive(Debug, Clone)]
pub struct SceneSetup {
    pub initial_states: Vec<ObjectState>,
    pub geometries: Vec<GpuGeometry>,
    /// Geometry index per object
    pub object_geometry: Vec<usize>,
    pub bounds: SimulationBounds,
    pub top: TopStructureHandle,
}

#[derive(Debug, Clone)]
pub struct ResourceSet {
    pub objects: Vec<SceneObject>,
    pub geometries: Vec<GpuGeometry>,
    pub bottoms: Vec<BottomStructureHandle>,
    pub top: TopStructureHandle,
    pub lights: Vec<LightDesc>,
    pub bounds: SimulationBounds,
}

impl ResourceSet {
    /// Load and upload every mesh, build the acceleration structures and
    /// create the simulation buffer.
    pub fn build<B: RenderBackend + ?Sized>(
        backend: &mut B,
        scene: &SceneDescriptor,
        seed: u64,
        bounds: SimulationBounds,
    ) -> Result<Self, RenderError> {
        let mut cache = MeshCache::new();
        let mut objects = Vec::with_capacity(scene.objects.len());
        for placement in &scene.objects {
            let mesh = cache.load(&placement.mesh, Vec3::from_array(placement.scale))?;
            let position = Vec3::from_array(placement.position);
            let degrees = Vec3::from_array(placement.rotation_degrees);
            objects.push(SceneObject {
                geometry: mesh.index(),
                placement: placement_matrix(position, degrees),
                rotation: rotation_from_euler_degrees(degrees),
                color: Vec3::from_array(placement.color),
                raster: placement.raster,
            });
        }

        let geometries = cache
            .iter()
            .map(|(_, mesh)| backend.upload_geometry(mesh))
            .collect::<Result<Vec<_>, _>>()?;
        let bottoms = geometries
            .iter()
            .map(|geometry| backend.build_bottom(geometry))
            .collect::<Result<Vec<_>, _>>()?;
        let instances = scene_instances(&objects, &bottoms)?;
        let top = backend.build_top(&instances)?;

        let mut rng = DeterministicRng::new(seed);
        backend.create_scene_resources(&SceneSetup {
            initial_states: scene.initial_states(&mut rng),
            geometries: geometries.clone(),
            object_geometry: objects.iter().map(|o| o.geometry).collect(),
            bounds,
            top,
        })?;

        tracing::info!(
            objects = objects.len(),
            raster = scene.raster_count(),
            meshes = geometries.len(),
            bottom_structures = bottoms.len(),
            "scene resources ready"
        );

        Ok(Self {
            objects,
            geometries,
            bottoms,
            top,
            lights: scene.lights.clone(),
            bounds,
        })
    }

    pub fn object_count(&self) -> u32 {
        self.objects.len() as u32
    }

    /// Geometry an object draws with
    pub fn geometry_of(&self, object: &SceneObject) -> Option<&GpuGeometry> {
        self.geometries.get(object.geometry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::{PRIMARY_VISIBLE, SECONDARY_ONLY};
    use crate::headless::HeadlessBackend;
    use crate::device::Extent;
    use tandem_services::ObjectPlacement;

    fn placement(mesh: &str, raster: bool, position: [f32; 3]) -> ObjectPlacement {
        ObjectPlacement {
            mesh: mesh.to_string(),
            position,
            rotation_degrees: [0.0; 3],
            scale: [1.0; 3],
            color: [0.5; 3],
            raster,
            initial_velocity: Some([0.0, 1.0, 0.0]),
        }
    }

    #[test]
    fn shared_meshes_are_uploaded_once() {
        let scene = SceneDescriptor {
            objects: vec![
                placement("builtin:cube", false, [0.0, 0.0, 0.0]),
                placement("builtin:cube", true, [2.0, 0.0, 0.0]),
                placement("builtin:sphere", false, [4.0, 0.0, 0.0]),
            ],
            lights: Vec::new(),
        };
        let mut backend = HeadlessBackend::new(Extent::new(64, 64), 2);
        let set = ResourceSet::build(&mut backend, &scene, 1, SimulationBounds::default()).unwrap();

        assert_eq!(set.geometries.len(), 2);
        assert_eq!(set.bottoms.len(), 2);
        assert_eq!(set.objects[0].geometry, set.objects[1].geometry);
        assert_eq!(set.object_count(), 3);
        assert_eq!(backend.simulation_states().len(), 3);
        assert_eq!(
            set.geometry_of(&set.objects[2]).map(|g| g.index_count),
            Some(tandem_asset::load_mesh("builtin:sphere", Vec3::ONE).unwrap().index_count())
        );
    }

    #[test]
    fn built_instances_carry_visibility_masks() {
        let scene = SceneDescriptor {
            objects: vec![
                placement("builtin:plane", true, [0.0, -1.0, 0.0]),
                placement("builtin:sphere", false, [0.0, 2.0, 0.0]),
            ],
            lights: Vec::new(),
        };
        let mut backend = HeadlessBackend::new(Extent::new(64, 64), 2);
        ResourceSet::build(&mut backend, &scene, 1, SimulationBounds::default()).unwrap();

        let instances = backend.top_instances();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].mask & SECONDARY_ONLY, SECONDARY_ONLY);
        assert_eq!(instances[0].mask & PRIMARY_VISIBLE, 0);
        assert_eq!(instances[1].mask & PRIMARY_VISIBLE, PRIMARY_VISIBLE);
        assert_eq!(instances[1].mask & SECONDARY_ONLY, 0);
        assert_eq!(instances[1].transform[1][3], 2.0);
    }

    #[test]
    fn unknown_mesh_fails_the_build() {
        let scene = SceneDescriptor {
            objects: vec![placement("builtin:teapot", false, [0.0; 3])],
            lights: Vec::new(),
        };
        let mut backend = HeadlessBackend::new(Extent::new(64, 64), 2);
        let err = ResourceSet::build(&mut backend, &scene, 1, SimulationBounds::default());
        assert!(matches!(err, Err(RenderError::Asset(_))));
    }
}
