//! Frame clock
//!
//! The simulation either runs on a fixed delta (deterministic, used by the
//! headless mode and tests) or on the measured wall-clock delta.

use std::time::Duration;

/// Default fixed step: ~60 Hz
pub const DEFAULT_FIXED_DELTA_SECS: f32 = 0.016;

/// Largest measured delta fed to the simulation. A window drag or a debugger
/// break would otherwise fling every object through the walls.
pub const MAX_MEASURED_DELTA_SECS: f32 = 0.1;

pub struct FrameClock {
    fixed_delta: Option<f32>,
    frame_count: u64,
    elapsed: f64,
    last_delta: f32,
}

impl FrameClock {
    /// Clock driven by measured frame durations
    pub fn new() -> Self {
        Self {
            fixed_delta: None,
            frame_count: 0,
            elapsed: 0.0,
            last_delta: 0.0,
        }
    }

    /// Clock that ignores measured time and always steps `delta_secs`
    pub fn fixed(delta_secs: f32) -> Self {
        Self {
            fixed_delta: Some(delta_secs),
            ..Self::new()
        }
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed_delta.is_some()
    }

    /// Advance by one frame, returning the delta the simulation should use
    pub fn advance(&mut self, measured: Duration) -> f32 {
        let delta = match self.fixed_delta {
            Some(fixed) => fixed,
            None => measured.as_secs_f32().min(MAX_MEASURED_DELTA_SECS),
        };

        self.frame_count += 1;
        self.elapsed += f64::from(delta);
        self.last_delta = delta;
        delta
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// Simulated seconds since the clock started
    pub fn elapsed_secs(&self) -> f32 {
        self.elapsed as f32
    }

    pub fn last_delta(&self) -> f32 {
        self.last_delta
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}
