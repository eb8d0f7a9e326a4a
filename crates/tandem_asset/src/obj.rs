//! Wavefront OBJ loading through `tobj`

use crate::vertex::{compute_smooth_normals, scale_normal, Vertex};
use crate::{AssetError, MeshData};
use std::path::Path;
use tandem_core::math::Vec3;

/// Load every model in the file into one indexed mesh with `scale` baked in.
///
/// When the file carries normals they are kept (and corrected for the
/// scale); if no model has any, smooth normals are generated from the
/// scaled positions.
pub fn load(path: &Path, scale: Vec3) -> Result<MeshData, AssetError> {
    let options = tobj::LoadOptions {
        single_index: true,
        triangulate: true,
        ..Default::default()
    };
    // Materials are not used; a missing .mtl is not an error here.
    let (models, _materials) = tobj::load_obj(path, &options).map_err(|source| AssetError::Obj {
        path: path.to_path_buf(),
        source,
    })?;

    let has_normals = models.iter().any(|m| !m.mesh.normals.is_empty());
    let mut vertices = Vec::new();
    let mut indices = Vec::new();

    for model in &models {
        let mesh = &model.mesh;
        let base = vertices.len() as u32;
        let count = mesh.positions.len() / 3;

        for i in 0..count {
            let p = Vec3::from_slice(&mesh.positions[i * 3..i * 3 + 3]) * scale;
            let n = if mesh.normals.len() >= (i + 1) * 3 {
                scale_normal(Vec3::from_slice(&mesh.normals[i * 3..i * 3 + 3]), scale)
            } else {
                Vec3::Y
            };
            vertices.push(Vertex::new(p, n));
        }
        indices.extend(mesh.indices.iter().map(|&i| base + i));
    }

    let mut mesh = MeshData { vertices, indices };
    let shown = path.display().to_string();
    mesh.validate(&shown)?;

    if !has_normals {
        compute_smooth_normals(&mut mesh.vertices, &mesh.indices);
    }

    tracing::debug!(
        path = %shown,
        models = models.len(),
        vertices = mesh.vertices.len(),
        triangles = mesh.indices.len() / 3,
        generated_normals = !has_normals,
        "loaded obj"
    );
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const PYRAMID: &str = "\
v 0 0 0
v 1 0 0
v 1 0 1
v 0 0 1
v 0.5 1 0.5
f 1 2 3
f 1 3 4
f 1 5 2
f 2 5 3
f 3 5 4
f 4 5 1
";

    fn write_obj(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".obj").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn missing_normals_are_generated_deterministically() {
        let file = write_obj(PYRAMID);
        let a = load(file.path(), Vec3::ONE).unwrap();
        let b = load(file.path(), Vec3::ONE).unwrap();

        assert_eq!(a.vertices.len(), 5);
        assert_eq!(a.indices.len(), 18);
        let bits = |m: &MeshData| -> Vec<u32> {
            m.vertices.iter().flat_map(|v| v.normal.map(f32::to_bits)).collect()
        };
        assert_eq!(bits(&a), bits(&b));

        // Apex normal is straight up by symmetry
        let apex = a.vertices[4].normal();
        assert!(apex.x.abs() < 1e-6 && apex.z.abs() < 1e-6 && apex.y > 0.99);
    }

    #[test]
    fn file_normals_are_kept() {
        let file = write_obj("v 0 0 0\nv 1 0 0\nv 0 1 0\nvn 0 0 1\nf 1//1 2//1 3//1\n");
        let mesh = load(file.path(), Vec3::new(2.0, 2.0, 2.0)).unwrap();

        assert_eq!(mesh.vertices[1].position(), Vec3::new(2.0, 0.0, 0.0));
        assert!(mesh.vertices.iter().all(|v| v.normal() == Vec3::Z));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load(Path::new("does/not/exist.obj"), Vec3::ONE).unwrap_err();
        assert!(err.to_string().contains("does/not/exist.obj"));
    }
}
