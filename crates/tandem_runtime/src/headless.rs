//! Windowless run against the software backend

use anyhow::{bail, Context, Result};
use std::time::{Duration, Instant};
use tandem_core::time::{FrameClock, DEFAULT_FIXED_DELTA_SECS};
use tandem_metrics::FrameTimer;
use tandem_render::headless::HeadlessBackend;
use tandem_render::{Extent, FrameInput, FrameOrchestrator, FrameOutcome, ResourceSet};
use tandem_services::{Camera, SceneDescriptor, Settings};

/// Render `frames` frames on a fixed step and return the final profiler
/// report. Any barrier or layout violation the backend recorded fails the run.
pub fn run(settings: &Settings, scene: &SceneDescriptor, frames: u64) -> Result<String> {
    let graphics = &settings.graphics;
    let mut backend = HeadlessBackend::new(
        Extent::new(graphics.width, graphics.height),
        graphics.frames_in_flight,
    );
    let resources = ResourceSet::build(
        &mut backend,
        scene,
        settings.simulation.seed,
        settings.simulation.bounds(),
    )
    .context("failed to build scene resources")?;
    let mut orchestrator = FrameOrchestrator::new(backend, resources, &settings.profiler);

    let delta = settings
        .simulation
        .fixed_delta_secs
        .unwrap_or(DEFAULT_FIXED_DELTA_SECS);
    let mut clock = FrameClock::fixed(delta);
    let mut timer = FrameTimer::new(120);
    let camera = Camera::default();

    let mut skipped = 0u64;
    for _ in 0..frames {
        let started = Instant::now();
        let delta_secs = clock.advance(Duration::ZERO);
        let input = FrameInput {
            delta_secs,
            elapsed_secs: clock.elapsed_secs(),
            camera: &camera,
            lights_on: true,
        };
        if orchestrator.tick(&input).context("frame failed")? == FrameOutcome::Skipped {
            skipped += 1;
        }
        timer.record(started.elapsed());
    }
    orchestrator.shutdown()?;

    let violations = orchestrator.backend().violations();
    if !violations.is_empty() {
        bail!(
            "{} synchronization violation(s), first: {}",
            violations.len(),
            violations[0]
        );
    }

    tracing::info!(
        frames = clock.frame_count(),
        skipped,
        cpu_ms = timer.frame_time_ms(),
        "headless run finished"
    );
    Ok(orchestrator.profiler_report()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn showcase_runs_clean_and_reports() {
        let settings = Settings::default();
        let report = run(&settings, &SceneDescriptor::showcase(), 6).unwrap();
        assert!(report.starts_with("=== Performance Frame ==="), "{report}");
        assert!(report.contains("Total GPU Time"));
    }

    #[test]
    fn zero_frames_reports_placeholder() {
        let report = run(&Settings::default(), &SceneDescriptor::showcase(), 0).unwrap();
        assert_eq!(report, tandem_render::profiler::PROFILING_PLACEHOLDER);
    }
}
