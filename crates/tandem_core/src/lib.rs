//! Tandem Core
//!
//! Shared building blocks for the hybrid renderer:
//! - Frame clock (fixed or measured delta time)
//! - Deterministic math helpers
//! - The object simulation record and its CPU reference kernel

pub mod math;
pub mod simulation;
pub mod time;

pub use glam;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
