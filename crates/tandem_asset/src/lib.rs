//! Tandem Asset Pipeline
//!
//! CPU side of the geometry provider: turns a mesh path plus a placement
//! scale into indexed vertex data ready for upload.
//!
//! Paths starting with `builtin:` select a procedural mesh (`cube`,
//! `plane`, `sphere`); anything else is read as a Wavefront OBJ file.

mod builtin;
mod error;
mod obj;
mod vertex;

use std::collections::HashMap;
use std::path::Path;
use tandem_core::math::Vec3;

pub use error::AssetError;
pub use vertex::{compute_smooth_normals, Vertex, NORMAL_OFFSET, VERTEX_STRIDE};

/// Indexed triangle list
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MeshData {
    pub vertices: Vec<Vertex>,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn vertex_count(&self) -> u32 {
        self.vertices.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    pub fn triangle_count(&self) -> u32 {
        self.index_count() / 3
    }

    pub(crate) fn validate(&self, path: &str) -> Result<(), AssetError> {
        if self.indices.len() < 3 {
            return Err(AssetError::Empty {
                path: path.to_string(),
            });
        }
        let vertex_count = self.vertices.len();
        if let Some(&index) = self.indices.iter().find(|&&i| i as usize >= vertex_count) {
            return Err(AssetError::IndexOutOfRange {
                path: path.to_string(),
                index,
                vertex_count,
            });
        }
        Ok(())
    }
}

/// Load a mesh with `scale` baked into its vertices
pub fn load_mesh(path: &str, scale: Vec3) -> Result<MeshData, AssetError> {
    if !(scale.cmpgt(Vec3::ZERO).all() && scale.is_finite()) {
        return Err(AssetError::InvalidScale {
            path: path.to_string(),
            scale: scale.to_array(),
        });
    }

    match path.strip_prefix(builtin::PREFIX) {
        Some(name) => {
            let mesh = builtin::generate(name, scale)?;
            mesh.validate(path)?;
            Ok(mesh)
        }
        None => obj::load(Path::new(path), scale),
    }
}

/// Mesh handle (opaque ID into a [`MeshCache`])
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MeshHandle(u32);

impl MeshHandle {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Deduplicates meshes by (path, scale) so objects sharing geometry share
/// one upload and one bottom-level structure.
#[derive(Default)]
pub struct MeshCache {
    lookup: HashMap<(String, [u32; 3]), MeshHandle>,
    meshes: Vec<MeshData>,
}

impl MeshCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, path: &str, scale: Vec3) -> Result<MeshHandle, AssetError> {
        let key = (path.to_string(), scale.to_array().map(f32::to_bits));
        if let Some(&handle) = self.lookup.get(&key) {
            return Ok(handle);
        }

        let mesh = load_mesh(path, scale)?;
        let handle = MeshHandle(self.meshes.len() as u32);
        self.meshes.push(mesh);
        self.lookup.insert(key, handle);
        Ok(handle)
    }

    pub fn get(&self, handle: MeshHandle) -> Option<&MeshData> {
        self.meshes.get(handle.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (MeshHandle, &MeshData)> {
        self.meshes
            .iter()
            .enumerate()
            .map(|(i, m)| (MeshHandle(i as u32), m))
    }

    pub fn len(&self) -> usize {
        self.meshes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.meshes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_dedupes_by_path_and_scale() {
        let mut cache = MeshCache::new();
        let a = cache.load("builtin:cube", Vec3::ONE).unwrap();
        let b = cache.load("builtin:cube", Vec3::ONE).unwrap();
        let c = cache.load("builtin:cube", Vec3::splat(2.0)).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(c).map(|m| m.vertex_count()), Some(24));
    }

    #[test]
    fn non_positive_scale_is_rejected() {
        assert!(matches!(
            load_mesh("builtin:plane", Vec3::new(1.0, 0.0, 1.0)),
            Err(AssetError::InvalidScale { .. })
        ));
    }

    #[test]
    fn validate_catches_bad_indices() {
        let mesh = MeshData {
            vertices: vec![Vertex::default(); 3],
            indices: vec![0, 1, 3],
        };
        assert!(matches!(
            mesh.validate("test"),
            Err(AssetError::IndexOutOfRange { index: 3, .. })
        ));
    }
}
