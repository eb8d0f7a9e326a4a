//! Fixed stage order within one frame

use crate::error::RenderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Simulation,
    Rasterize,
    CopyToCanvas,
    RayTrace,
    CopyToPresent,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Simulation,
        Stage::Rasterize,
        Stage::CopyToCanvas,
        Stage::RayTrace,
        Stage::CopyToPresent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Stage::Simulation => "Simulation",
            Stage::Rasterize => "Rasterize",
            Stage::CopyToCanvas => "CopyToCanvas",
            Stage::RayTrace => "RayTrace",
            Stage::CopyToPresent => "CopyToPresent",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Enforces that a stage only starts once the previous stage's
/// terminating barrier has been recorded.
#[derive(Debug, Default)]
pub struct StageTracker {
    /// Stages fully terminated so far this frame
    completed: usize,
    open: Option<Stage>,
}

impl StageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&mut self, stage: Stage) -> Result<(), RenderError> {
        let expected = Stage::ALL.get(self.completed).copied();
        match (self.open, expected) {
            (None, Some(next)) if next == stage => {
                self.open = Some(stage);
                Ok(())
            }
            (Some(open), _) => Err(RenderError::StageOrder {
                expected: open.name(),
                found: stage.name(),
            }),
            (None, next) => Err(RenderError::StageOrder {
                expected: next.map_or("end of frame", Stage::name),
                found: stage.name(),
            }),
        }
    }

    /// Call after the stage's terminating barrier is recorded
    pub fn terminate(&mut self, stage: Stage) -> Result<(), RenderError> {
        match self.open {
            Some(open) if open == stage => {
                self.open = None;
                self.completed += 1;
                Ok(())
            }
            _ => Err(RenderError::StageOrder {
                expected: self.open.map_or("no open stage", Stage::name),
                found: stage.name(),
            }),
        }
    }

    pub fn current(&self) -> Option<Stage> {
        self.open
    }

    pub fn is_complete(&self) -> bool {
        self.open.is_none() && self.completed == Stage::ALL.len()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_frame_in_order() {
        let mut tracker = StageTracker::new();
        for stage in Stage::ALL {
            tracker.begin(stage).unwrap();
            assert_eq!(tracker.current(), Some(stage));
            tracker.terminate(stage).unwrap();
        }
        assert!(tracker.is_complete());
        assert!(tracker.begin(Stage::Simulation).is_err());

        tracker.reset();
        assert!(!tracker.is_complete());
        tracker.begin(Stage::Simulation).unwrap();
    }

    #[test]
    fn cannot_start_before_previous_terminates() {
        let mut tracker = StageTracker::new();
        tracker.begin(Stage::Simulation).unwrap();

        let err = tracker.begin(Stage::Rasterize).unwrap_err();
        assert!(matches!(
            err,
            RenderError::StageOrder { expected: "Simulation", found: "Rasterize" }
        ));
    }

    #[test]
    fn cannot_skip_stages() {
        let mut tracker = StageTracker::new();
        assert!(tracker.begin(Stage::RayTrace).is_err());
        assert!(tracker.terminate(Stage::Simulation).is_err());
    }
}
