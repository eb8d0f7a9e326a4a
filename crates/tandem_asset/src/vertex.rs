//! GPU vertex record and normal generation

use bytemuck::{Pod, Zeroable};
use tandem_core::math::Vec3;

/// Stride shared by the vertex input state and the ray-trace hit shader
pub const VERTEX_STRIDE: usize = 32;

/// Offset of `normal` inside [`Vertex`]
pub const NORMAL_OFFSET: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub _pad0: f32,
    pub normal: [f32; 3],
    pub _pad1: f32,
}

impl Vertex {
    pub fn new(position: Vec3, normal: Vec3) -> Self {
        Self {
            position: position.to_array(),
            _pad0: 0.0,
            normal: normal.to_array(),
            _pad1: 0.0,
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::from_array(self.position)
    }

    pub fn normal(&self) -> Vec3 {
        Vec3::from_array(self.normal)
    }
}

/// Replace every normal with the renormalized sum of the face normals of
/// the triangles that use the vertex. Face normals follow counter-clockwise
/// winding and are area weighted. Vertices that end up with a zero-length
/// sum (unused, or only touched by degenerate triangles) get +Y.
///
/// Indices must already be validated against `vertices.len()`.
pub fn compute_smooth_normals(vertices: &mut [Vertex], indices: &[u32]) {
    let mut accum = vec![Vec3::ZERO; vertices.len()];

    for tri in indices.chunks_exact(3) {
        let [i0, i1, i2] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
        let v0 = vertices[i0].position();
        let face = (vertices[i1].position() - v0).cross(vertices[i2].position() - v0);
        accum[i0] += face;
        accum[i1] += face;
        accum[i2] += face;
    }

    for (vertex, sum) in vertices.iter_mut().zip(accum) {
        let normal = sum.try_normalize().unwrap_or(Vec3::Y);
        vertex.normal = normal.to_array();
    }
}

/// Normal transform for a non-uniform scale: inverse-transpose of a
/// diagonal matrix is the reciprocal scale.
pub(crate) fn scale_normal(normal: Vec3, scale: Vec3) -> Vec3 {
    (normal / scale).try_normalize().unwrap_or(Vec3::Y)
}
