//! Scene descriptor
//!
//! A fixed, ordered list of object placements and up to [`MAX_LIGHTS`]
//! lights, loaded once at startup. Object order is significant: it is the
//! index into the simulation buffer and the custom index of each traced
//! instance.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tandem_core::math::{DeterministicRng, Vec3};
use tandem_core::simulation::ObjectState;
use thiserror::Error;

/// Size of the light array in the ray-trace uniform block
pub const MAX_LIGHTS: usize = 3;

/// Range of generated initial velocity components
pub const RANDOM_VELOCITY_RANGE: (f32, f32) = (-2.0, 2.0);

#[derive(Debug, Error)]
pub enum SceneError {
    #[error("failed to read scene '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse scene '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("scene has no objects")]
    Empty,

    #[error("scene has {count} lights, at most {MAX_LIGHTS} are supported")]
    TooManyLights { count: usize },

    #[error("object {index} ('{mesh}') has non-positive scale {scale:?}")]
    InvalidScale {
        index: usize,
        mesh: String,
        scale: [f32; 3],
    },
}

fn unit_scale() -> [f32; 3] {
    [1.0; 3]
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectPlacement {
    /// OBJ path or `builtin:cube|plane|sphere`
    pub mesh: String,
    pub position: [f32; 3],
    #[serde(default)]
    pub rotation_degrees: [f32; 3],
    #[serde(default = "unit_scale")]
    pub scale: [f32; 3],
    pub color: [f32; 3],
    /// Drawn by the raster stage; only secondary rays see it
    #[serde(default)]
    pub raster: bool,
    /// Random in [-2, 2) per component when absent
    #[serde(default)]
    pub initial_velocity: Option<[f32; 3]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LightDesc {
    pub position: [f32; 3],
    pub intensity: f32,
    pub color: [f32; 3],
    #[serde(default = "enabled")]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescriptor {
    pub objects: Vec<ObjectPlacement>,
    #[serde(default)]
    pub lights: Vec<LightDesc>,
}

impl SceneDescriptor {
    pub fn load(path: &Path) -> Result<Self, SceneError> {
        let text = std::fs::read_to_string(path).map_err(|source| SceneError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let scene: SceneDescriptor =
            serde_json::from_str(&text).map_err(|source| SceneError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        scene.validate()?;
        tracing::info!(
            path = %path.display(),
            objects = scene.objects.len(),
            lights = scene.lights.len(),
            "scene loaded"
        );
        Ok(scene)
    }

    pub fn validate(&self) -> Result<(), SceneError> {
        if self.objects.is_empty() {
            return Err(SceneError::Empty);
        }
        if self.lights.len() > MAX_LIGHTS {
            return Err(SceneError::TooManyLights {
                count: self.lights.len(),
            });
        }
        for (index, object) in self.objects.iter().enumerate() {
            if object.scale.iter().any(|&s| !(s > 0.0)) {
                return Err(SceneError::InvalidScale {
                    index,
                    mesh: object.mesh.clone(),
                    scale: object.scale,
                });
            }
        }
        Ok(())
    }

    pub fn raster_count(&self) -> usize {
        self.objects.iter().filter(|o| o.raster).count()
    }

    /// Initial contents of the simulation buffer, one record per object
    pub fn initial_states(&self, rng: &mut DeterministicRng) -> Vec<ObjectState> {
        let (lo, hi) = RANDOM_VELOCITY_RANGE;
        self.objects
            .iter()
            .map(|object| {
                let velocity = match object.initial_velocity {
                    Some(v) => Vec3::from_array(v),
                    None => Vec3::new(
                        rng.next_range(lo, hi),
                        rng.next_range(lo, hi),
                        rng.next_range(lo, hi),
                    ),
                };
                ObjectState::at(
                    Vec3::from_array(object.position),
                    velocity,
                    Vec3::from_array(object.color),
                )
            })
            .collect()
    }

    /// Built-in room: static floor, ceiling and walls, a table, two
    /// rasterized spheres and a small traced cube that bounce around.
    pub fn showcase() -> Self {
        let fixed = |mesh: &str, position: [f32; 3], scale: [f32; 3], color: [f32; 3]| {
            ObjectPlacement {
                mesh: mesh.to_string(),
                position,
                rotation_degrees: [0.0; 3],
                scale,
                color,
                raster: false,
                initial_velocity: Some([0.0; 3]),
            }
        };

        let objects = vec![
            fixed("builtin:cube", [0.0, -1.0, 0.0], [20.0, 0.1, 20.0], [0.8, 0.8, 0.8]),
            fixed("builtin:cube", [0.0, 12.0, 0.0], [20.0, 0.1, 20.0], [1.0, 1.0, 1.0]),
            fixed("builtin:cube", [0.0, 6.0, -10.0], [20.0, 10.0, 0.1], [0.9, 0.9, 0.9]),
            fixed("builtin:cube", [-10.0, 6.0, 0.0], [0.1, 10.0, 20.0], [0.8, 0.1, 0.1]),
            fixed("builtin:cube", [10.0, 6.0, 0.0], [0.1, 10.0, 20.0], [0.1, 0.8, 0.1]),
            fixed("builtin:cube", [0.0, -0.4, 0.0], [3.0, 1.0, 2.0], [0.55, 0.27, 0.07]),
            ObjectPlacement {
                mesh: "builtin:sphere".to_string(),
                position: [9.0, 1.95, 0.0],
                rotation_degrees: [0.0, -30.0, 0.0],
                scale: [1.2; 3],
                color: [1.0, 0.4, 0.2],
                raster: true,
                initial_velocity: Some([-1.5, 0.8, 1.2]),
            },
            ObjectPlacement {
                mesh: "builtin:sphere".to_string(),
                position: [-2.0, 1.95, 0.0],
                rotation_degrees: [0.0, -30.0, 0.0],
                scale: [1.2; 3],
                color: [1.0, 0.2, 0.2],
                raster: true,
                initial_velocity: Some([1.1, 1.6, -0.7]),
            },
            ObjectPlacement {
                mesh: "builtin:cube".to_string(),
                position: [1.5, 2.1, 0.5],
                rotation_degrees: [0.0, 45.0, 0.0],
                scale: [0.4; 3],
                color: [1.0, 0.8, 0.0],
                raster: false,
                initial_velocity: None,
            },
        ];

        let lights = vec![
            LightDesc {
                position: [-8.0, 5.0, -5.0],
                intensity: 0.5,
                color: [0.0, 0.0, 0.9],
                enabled: true,
            },
            LightDesc {
                position: [0.0, 9.0, 2.0],
                intensity: 1.2,
                color: [1.0, 1.0, 1.0],
                enabled: true,
            },
        ];

        Self { objects, lights }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn showcase_is_valid() {
        let scene = SceneDescriptor::showcase();
        scene.validate().unwrap();
        assert_eq!(scene.raster_count(), 2);
        assert!(scene.lights.len() <= MAX_LIGHTS);
    }

    #[test]
    fn json_uses_field_defaults() {
        let scene: SceneDescriptor = serde_json::from_str(
            r#"{
                "objects": [
                    { "mesh": "builtin:plane", "position": [0, -1, 0], "color": [1, 1, 1], "raster": true },
                    { "mesh": "builtin:sphere", "position": [0, 3, 0], "color": [1, 0, 0],
                      "initial_velocity": [1, 2, 3] }
                ],
                "lights": [ { "position": [0, 8, 0], "intensity": 1.0, "color": [1, 1, 1] } ]
            }"#,
        )
        .unwrap();

        assert_eq!(scene.objects[0].scale, [1.0; 3]);
        assert_eq!(scene.objects[0].rotation_degrees, [0.0; 3]);
        assert!(scene.objects[0].raster);
        assert!(!scene.objects[1].raster);
        assert!(scene.lights[0].enabled);
        scene.validate().unwrap();
    }

    #[test]
    fn initial_states_follow_placements() {
        let scene = SceneDescriptor::showcase();
        let mut rng = DeterministicRng::new(9);
        let states = scene.initial_states(&mut rng);

        assert_eq!(states.len(), scene.objects.len());
        assert_eq!(states[0].velocity(), Vec3::ZERO);
        assert_eq!(states[6].velocity(), Vec3::new(-1.5, 0.8, 1.2));
        assert_eq!(states[6].position(), Vec3::new(9.0, 1.95, 0.0));
        assert_eq!(states[6].color, [1.0, 0.4, 0.2, 1.0]);

        let v = states[8].velocity();
        assert!(v.cmpge(Vec3::splat(-2.0)).all() && v.cmplt(Vec3::splat(2.0)).all());

        // Same seed, same velocities
        let again = scene.initial_states(&mut DeterministicRng::new(9));
        assert_eq!(states, again);
    }

    #[test]
    fn validation_rejects_bad_scenes() {
        let mut scene = SceneDescriptor::showcase();
        scene.lights = vec![scene.lights[0]; 4];
        assert!(matches!(scene.validate(), Err(SceneError::TooManyLights { count: 4 })));

        let mut scene = SceneDescriptor::showcase();
        scene.objects[2].scale = [1.0, 0.0, 1.0];
        assert!(matches!(scene.validate(), Err(SceneError::InvalidScale { index: 2, .. })));

        let empty = SceneDescriptor { objects: vec![], lights: vec![] };
        assert!(matches!(empty.validate(), Err(SceneError::Empty)));
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scene.json");
        std::fs::write(&path, r#"{ "objects": 3 }"#).unwrap();

        let err = SceneDescriptor::load(&path).unwrap_err();
        assert!(matches!(err, SceneError::Parse { .. }));
        assert!(err.to_string().contains("scene.json"));
    }
}
