//! Settings management

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tandem_core::simulation::SimulationBounds;
use thiserror::Error;

pub const MIN_FRAMES_IN_FLIGHT: usize = 1;
pub const MAX_FRAMES_IN_FLIGHT: usize = 3;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// Renderer settings
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub graphics: GraphicsSettings,
    pub profiler: ProfilerSettings,
    pub simulation: SimulationSettings,
    pub paths: PathSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphicsSettings {
    pub width: u32,
    pub height: u32,
    pub vsync: bool,
    pub frames_in_flight: usize,
    /// Enable the Khronos validation layer when it is installed
    pub validation: bool,
}

impl Default for GraphicsSettings {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            vsync: true,
            frames_in_flight: 2,
            validation: cfg!(debug_assertions),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProfilerSettings {
    /// Query slots per pool; every section uses two timestamps
    pub max_queries: u32,
    pub hud_refresh_secs: f32,
    /// Log a blocking report every N frames (0 = never)
    pub blocking_report_every: u64,
}

impl Default for ProfilerSettings {
    fn default() -> Self {
        Self {
            max_queries: 128,
            hud_refresh_secs: 0.5,
            blocking_report_every: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSettings {
    /// Fixed simulation step; `None` uses the measured frame time
    pub fixed_delta_secs: Option<f32>,
    /// Seed for velocities the scene does not specify
    pub seed: u64,
    pub half_extent: f32,
    pub floor: f32,
    pub ceiling: f32,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        let bounds = SimulationBounds::default();
        Self {
            fixed_delta_secs: None,
            seed: 0x5eed,
            half_extent: bounds.half_extent,
            floor: bounds.floor,
            ceiling: bounds.ceiling,
        }
    }
}

impl SimulationSettings {
    pub fn bounds(&self) -> SimulationBounds {
        SimulationBounds {
            half_extent: self.half_extent,
            floor: self.floor,
            ceiling: self.ceiling,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// Directory holding the compiled `.spv` shaders
    pub shader_dir: PathBuf,
    /// Scene file; the built-in showcase is used when unset
    pub scene: Option<PathBuf>,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            shader_dir: PathBuf::from("shaders"),
            scene: None,
        }
    }
}

impl Settings {
    /// Read and validate a settings file
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let settings: Settings =
            serde_json::from_str(&text).map_err(|source| SettingsError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        settings.validate()?;
        Ok(settings)
    }

    /// Like [`Settings::load`], but a missing file yields the defaults
    pub fn load_or_default(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        let g = &self.graphics;
        if g.width == 0 || g.height == 0 {
            return Err(SettingsError::Invalid(format!(
                "window size {}x{} must be non-zero",
                g.width, g.height
            )));
        }
        if !(MIN_FRAMES_IN_FLIGHT..=MAX_FRAMES_IN_FLIGHT).contains(&g.frames_in_flight) {
            return Err(SettingsError::Invalid(format!(
                "frames_in_flight {} outside {MIN_FRAMES_IN_FLIGHT}..={MAX_FRAMES_IN_FLIGHT}",
                g.frames_in_flight
            )));
        }
        if self.profiler.max_queries < 2 {
            return Err(SettingsError::Invalid(format!(
                "max_queries {} cannot hold a single section",
                self.profiler.max_queries
            )));
        }
        if !(self.profiler.hud_refresh_secs > 0.0) {
            return Err(SettingsError::Invalid(
                "hud_refresh_secs must be positive".to_string(),
            ));
        }
        if let Some(dt) = self.simulation.fixed_delta_secs {
            if !(dt > 0.0 && dt.is_finite()) {
                return Err(SettingsError::Invalid(format!(
                    "fixed_delta_secs {dt} must be positive"
                )));
            }
        }
        let s = &self.simulation;
        if !(s.half_extent > 0.0 && s.floor < s.ceiling) {
            return Err(SettingsError::Invalid(format!(
                "simulation bounds half_extent={} floor={} ceiling={} are empty",
                s.half_extent, s.floor, s.ceiling
            )));
        }
        Ok(())
    }
}
