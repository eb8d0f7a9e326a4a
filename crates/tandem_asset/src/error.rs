use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while producing CPU-side geometry.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("failed to load mesh '{path}': {source}")]
    Obj {
        path: PathBuf,
        #[source]
        source: tobj::LoadError,
    },

    #[error("mesh '{path}' contains no triangles")]
    Empty { path: String },

    #[error("unknown built-in mesh '{name}' (expected cube, plane or sphere)")]
    UnknownBuiltin { name: String },

    #[error("mesh '{path}' index {index} is out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        path: String,
        index: u32,
        vertex_count: usize,
    },

    #[error("scale {scale:?} for '{path}' must be positive on every axis")]
    InvalidScale { path: String, scale: [f32; 3] },
}
