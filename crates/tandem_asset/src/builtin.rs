//! Procedural meshes addressable as `builtin:<name>`

use crate::vertex::{scale_normal, Vertex};
use crate::{AssetError, MeshData};
use std::f32::consts::PI;
use tandem_core::math::Vec3;

pub const PREFIX: &str = "builtin:";

const SPHERE_STACKS: u32 = 16;
const SPHERE_SLICES: u32 = 32;
const HALF: f32 = 0.5;

/// Build the named primitive with `scale` baked into the positions
pub fn generate(name: &str, scale: Vec3) -> Result<MeshData, AssetError> {
    let mesh = match name {
        "cube" => cube(),
        "plane" => plane(),
        "sphere" => sphere(),
        _ => {
            return Err(AssetError::UnknownBuiltin {
                name: name.to_string(),
            })
        }
    };
    Ok(apply_scale(mesh, scale))
}

fn apply_scale(mut mesh: MeshData, scale: Vec3) -> MeshData {
    for v in &mut mesh.vertices {
        *v = Vertex::new(v.position() * scale, scale_normal(v.normal(), scale));
    }
    mesh
}

/// Unit cube, 24 vertices so every face has its own flat normal
fn cube() -> MeshData {
    // (normal, u, v) with u x v == normal
    const FACES: [(Vec3, Vec3, Vec3); 6] = [
        (Vec3::X, Vec3::Y, Vec3::Z),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::Z, Vec3::X),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::Y, Vec3::X),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);

    for (n, u, v) in FACES {
        let base = vertices.len() as u32;
        let (c, u, v) = (n * HALF, u * HALF, v * HALF);
        for corner in [c - u - v, c + u - v, c + u + v, c - u + v] {
            vertices.push(Vertex::new(corner, n));
        }
        indices.extend([0, 1, 2, 0, 2, 3].map(|i| base + i));
    }

    MeshData { vertices, indices }
}

/// Unit quad in the XZ plane facing +Y
fn plane() -> MeshData {
    let vertices = [
        Vec3::new(-HALF, 0.0, -HALF),
        Vec3::new(-HALF, 0.0, HALF),
        Vec3::new(HALF, 0.0, HALF),
        Vec3::new(HALF, 0.0, -HALF),
    ]
    .into_iter()
    .map(|p| Vertex::new(p, Vec3::Y))
    .collect();

    MeshData {
        vertices,
        indices: vec![0, 1, 2, 0, 2, 3],
    }
}

/// UV sphere of radius 0.5
fn sphere() -> MeshData {
    let mut vertices = Vec::with_capacity(((SPHERE_STACKS + 1) * (SPHERE_SLICES + 1)) as usize);
    for i in 0..=SPHERE_STACKS {
        let phi = PI * i as f32 / SPHERE_STACKS as f32;
        for j in 0..=SPHERE_SLICES {
            let theta = 2.0 * PI * j as f32 / SPHERE_SLICES as f32;
            let n = Vec3::new(phi.sin() * theta.cos(), phi.cos(), phi.sin() * theta.sin());
            vertices.push(Vertex::new(n * HALF, n));
        }
    }

    let mut indices = Vec::with_capacity((SPHERE_STACKS * SPHERE_SLICES * 6) as usize);
    for i in 0..SPHERE_STACKS {
        for j in 0..SPHERE_SLICES {
            let a = i * (SPHERE_SLICES + 1) + j;
            let b = a + SPHERE_SLICES + 1;
            indices.extend([a, a + 1, b, a + 1, b + 1, b]);
        }
    }

    MeshData { vertices, indices }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face_normal(mesh: &MeshData, tri: usize) -> Vec3 {
        let p = |k: usize| mesh.vertices[mesh.indices[tri * 3 + k] as usize].position();
        (p(1) - p(0)).cross(p(2) - p(0))
    }

    #[test]
    fn cube_winding_faces_outward() {
        let mesh = generate("cube", Vec3::ONE).unwrap();
        assert_eq!(mesh.vertices.len(), 24);
        assert_eq!(mesh.indices.len(), 36);

        for tri in 0..12 {
            let n = face_normal(&mesh, tri).normalize();
            let stored = mesh.vertices[mesh.indices[tri * 3] as usize].normal();
            assert!((n - stored).length() < 1e-5, "triangle {tri}");
        }
    }

    #[test]
    fn plane_is_scaled_and_faces_up() {
        let mesh = generate("plane", Vec3::new(20.0, 0.1, 20.0)).unwrap();
        assert!(face_normal(&mesh, 0).y > 0.0);
        assert_eq!(mesh.vertices[2].position(), Vec3::new(10.0, 0.0, 10.0));
        assert_eq!(mesh.vertices[0].normal(), Vec3::Y);
    }

    #[test]
    fn sphere_faces_outward() {
        let mesh = generate("sphere", Vec3::ONE).unwrap();
        assert_eq!(mesh.indices.len(), (SPHERE_STACKS * SPHERE_SLICES * 6) as usize);

        // Skip the pole rows where one edge collapses to a point
        let row = (SPHERE_SLICES * 2) as usize;
        for tri in row..mesh.indices.len() / 3 - row {
            let n = face_normal(&mesh, tri);
            let centroid = (0..3)
                .map(|k| mesh.vertices[mesh.indices[tri * 3 + k] as usize].position())
                .sum::<Vec3>();
            assert!(n.dot(centroid) > 0.0, "triangle {tri}");
        }
    }

    #[test]
    fn non_uniform_scale_corrects_normals() {
        let mesh = generate("cube", Vec3::new(4.0, 1.0, 1.0)).unwrap();
        assert!(mesh.vertices.iter().all(|v| (v.normal().length() - 1.0).abs() < 1e-5));
        assert_eq!(mesh.vertices[0].position().x, 2.0);
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(matches!(
            generate("teapot", Vec3::ONE),
            Err(AssetError::UnknownBuiltin { .. })
        ));
    }
}
