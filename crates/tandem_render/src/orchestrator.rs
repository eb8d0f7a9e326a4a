//! Frame orchestrator
//!
//! Records one frame per tick into the current in-flight slot:
//!
//! ```text
//! Simulation -> Rasterize -> CopyToCanvas -> RayTrace -> CopyToPresent
//! ```
//!
//! Every resource hand-off between stages goes through the
//! [`StateLedger`], and each stage ends with the barrier batch that makes
//! its results usable by the next. Stale surfaces on acquire or present
//! are recovered from here; every other backend error ends the frame and
//! is returned to the caller.

use crate::barrier::StateLedger;
use crate::device::{AcquireOutcome, PresentOutcome, RenderBackend};
use crate::error::RenderError;
use crate::profiler::{
    Profiler, COUNTER_DISPATCHES, COUNTER_DRAWS, COUNTER_INSTANCES, COUNTER_TRACE_RAYS,
};
use crate::resources::ResourceSet;
use crate::ring::FrameRing;
use crate::stage::{Stage, StageTracker};
use crate::state::{PipelineStages, ResourceId, Usage};
use crate::uniforms::{FrameUniforms, RasterPush, ViewParams};
use tandem_core::simulation::{workgroup_count, SimulationParams};
use tandem_services::settings::ProfilerSettings;
use tandem_services::Camera;

const SIM: ResourceId = ResourceId::SimulationBuffer;
const SIM_WRITER: &[Usage] = &[Usage::SimulationWrite];
/// Both stages that read the simulation buffer, in one barrier
const SIM_READERS: &[Usage] = &[Usage::VertexRead, Usage::RayTraceRead];
const COLOR_TARGET: &[Usage] = &[Usage::ColorAttachmentWrite];
const DEPTH_TARGET: &[Usage] = &[Usage::DepthAttachmentWrite];
const DEPTH_SAMPLED: &[Usage] = &[Usage::RayTraceSampled];
const COPY_SRC: &[Usage] = &[Usage::TransferSrc];
const COPY_DST: &[Usage] = &[Usage::TransferDst];
const TRACE_TARGET: &[Usage] = &[Usage::RayTraceStorage];
const PRESENT: &[Usage] = &[Usage::Present];

/// Per-tick inputs from the application
#[derive(Debug, Clone, Copy)]
pub struct FrameInput<'a> {
    /// Simulation step for this frame
    pub delta_secs: f32,
    pub elapsed_secs: f32,
    pub camera: &'a Camera,
    pub lights_on: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    Presented,
    /// Surface stale or zero-sized; nothing was submitted
    Skipped,
}

pub struct FrameOrchestrator<B: RenderBackend> {
    backend: B,
    resources: ResourceSet,
    ledger: StateLedger,
    stages: StageTracker,
    ring: FrameRing,
    profiler: Profiler,
    resize_pending: bool,
    blocking_report_every: u64,
    frames_presented: u64,
}

impl<B: RenderBackend> FrameOrchestrator<B> {
    pub fn new(backend: B, resources: ResourceSet, profiler: &ProfilerSettings) -> Self {
        let ring = FrameRing::new(backend.frames_in_flight());
        let profiler_core = Profiler::new(backend.query_limits(), profiler.max_queries, ring.len());
        tracing::info!(
            device = %backend.capabilities().device_name,
            frames_in_flight = ring.len(),
            max_queries = profiler.max_queries,
            "frame orchestrator ready"
        );
        Self {
            backend,
            resources,
            ledger: StateLedger::new(),
            stages: StageTracker::new(),
            ring,
            profiler: profiler_core,
            resize_pending: false,
            blocking_report_every: profiler.blocking_report_every,
            frames_presented: 0,
        }
    }

    /// Record, submit and present one frame
    pub fn tick(&mut self, input: &FrameInput<'_>) -> Result<FrameOutcome, RenderError> {
        let slot = self.ring.current();
        self.backend.wait_for_slot(slot)?;
        if let Err(err) = self.profiler.harvest(&self.backend, slot) {
            tracing::warn!(slot, %err, "profiler harvest failed");
        }

        if (self.resize_pending || self.backend.extent().is_empty()) && !self.recreate()? {
            return Ok(FrameOutcome::Skipped);
        }

        let image_index = match self.backend.acquire(slot)? {
            AcquireOutcome::Acquired { image_index } => image_index,
            AcquireOutcome::Stale => {
                tracing::debug!(slot, "stale surface on acquire, frame skipped");
                self.recreate()?;
                return Ok(FrameOutcome::Skipped);
            }
        };

        let extent = self.backend.extent();
        let view = ViewParams {
            view: input.camera.view(),
            proj: input.camera.projection(extent.aspect()),
            eye: input.camera.position,
        };
        let uniforms = FrameUniforms::compose(&view, &self.resources.lights, input.lights_on);
        self.backend.write_uniforms(slot, &uniforms)?;

        self.backend.begin_recording(slot)?;
        self.profiler.begin_frame(&mut self.backend, slot);
        self.stages.reset();

        let params = SimulationParams {
            dt: input.delta_secs,
            time: input.elapsed_secs,
            count: self.resources.object_count() as i32,
        };
        self.record_frame(slot, image_index, &params)?;

        self.profiler.end_frame(&mut self.backend);
        self.backend.end_recording()?;
        self.backend.submit(slot, image_index)?;

        let presented = self.backend.present(slot, image_index)?;
        if presented == PresentOutcome::Stale || self.resize_pending {
            tracing::debug!(slot, "surface stale after present");
            self.recreate()?;
        }

        self.ring.advance();
        self.frames_presented += 1;
        self.maybe_report();
        Ok(FrameOutcome::Presented)
    }

    fn record_frame(
        &mut self,
        slot: usize,
        image_index: u32,
        params: &SimulationParams,
    ) -> Result<(), RenderError> {
        let extent = self.backend.extent();
        let swapchain = ResourceId::Swapchain(image_index);
        let canvas = ResourceId::Canvas(slot);
        let depth = ResourceId::Depth(slot);

        // Simulation. The leading barrier orders this write after the
        // previous frame's readers, which may still be in flight.
        self.stages.begin(Stage::Simulation)?;
        self.barrier(&[(SIM, SIM_WRITER)])?;
        self.ledger.assert_usable(SIM, Usage::SimulationWrite);
        self.profiler.begin_section(&mut self.backend, Stage::Simulation.name());
        self.backend
            .dispatch_simulation(params, workgroup_count(params.count.max(0) as u32));
        self.profiler.count(COUNTER_DISPATCHES, 1);
        self.profiler.end_section(&mut self.backend);

        self.ledger
            .acquired(swapchain, PipelineStages::COLOR_ATTACHMENT_OUTPUT);
        self.ledger.discard(depth);
        self.barrier(&[
            (SIM, SIM_READERS),
            (swapchain, COLOR_TARGET),
            (depth, DEPTH_TARGET),
        ])?;
        self.stages.terminate(Stage::Simulation)?;

        // Rasterize
        self.stages.begin(Stage::Rasterize)?;
        self.ledger.assert_usable(SIM, Usage::VertexRead);
        self.ledger.assert_usable(swapchain, Usage::ColorAttachmentWrite);
        self.ledger.assert_usable(depth, Usage::DepthAttachmentWrite);
        self.profiler.begin_section(&mut self.backend, Stage::Rasterize.name());
        self.backend.begin_raster(image_index, extent);
        let mut draws = 0;
        for (index, object) in self.resources.objects.iter().enumerate() {
            if !object.raster {
                continue;
            }
            let geometry = self.resources.geometry_of(object).ok_or_else(|| {
                RenderError::InvalidState(format!("object {index} has no geometry"))
            })?;
            let push = RasterPush::new(object.rotation, object.color, index as u32);
            self.backend.draw_object(geometry, &push);
            draws += 1;
        }
        self.backend.end_raster();
        self.profiler.count(COUNTER_DRAWS, draws);
        self.profiler.end_section(&mut self.backend);

        self.ledger.discard(canvas);
        self.barrier(&[
            (swapchain, COPY_SRC),
            (canvas, COPY_DST),
            (depth, DEPTH_SAMPLED),
        ])?;
        self.stages.terminate(Stage::Rasterize)?;

        // CopyToCanvas: raster output becomes the ray-trace background
        self.stages.begin(Stage::CopyToCanvas)?;
        self.ledger.assert_usable(swapchain, Usage::TransferSrc);
        self.ledger.assert_usable(canvas, Usage::TransferDst);
        self.backend.copy_image(swapchain, canvas, extent);
        self.barrier(&[(canvas, TRACE_TARGET)])?;
        self.stages.terminate(Stage::CopyToCanvas)?;

        // RayTrace
        self.stages.begin(Stage::RayTrace)?;
        self.ledger.assert_usable(SIM, Usage::RayTraceRead);
        self.ledger.assert_usable(canvas, Usage::RayTraceStorage);
        self.ledger.assert_usable(depth, Usage::RayTraceSampled);
        self.profiler.begin_section(&mut self.backend, Stage::RayTrace.name());
        self.backend.trace_rays(extent);
        self.profiler.count(COUNTER_TRACE_RAYS, 1);
        self.profiler.count(COUNTER_INSTANCES, self.resources.objects.len());
        self.profiler.end_section(&mut self.backend);
        self.barrier(&[(canvas, COPY_SRC), (swapchain, COPY_DST)])?;
        self.stages.terminate(Stage::RayTrace)?;

        // CopyToPresent
        self.stages.begin(Stage::CopyToPresent)?;
        self.ledger.assert_usable(canvas, Usage::TransferSrc);
        self.ledger.assert_usable(swapchain, Usage::TransferDst);
        self.backend.copy_image(canvas, swapchain, extent);
        self.barrier(&[(swapchain, PRESENT)])?;
        self.stages.terminate(Stage::CopyToPresent)?;

        debug_assert!(self.stages.is_complete());
        Ok(())
    }

    /// Plan the transitions and record them as one barrier command
    fn barrier(&mut self, requests: &[(ResourceId, &[Usage])]) -> Result<(), RenderError> {
        let batch = self.ledger.plan(requests)?;
        if !batch.is_empty() {
            self.backend.pipeline_barrier(&batch);
        }
        Ok(())
    }

    /// Returns `false` while the surface has zero area
    fn recreate(&mut self) -> Result<bool, RenderError> {
        if !self.backend.recreate_surface()? {
            self.resize_pending = true;
            return Ok(false);
        }
        self.ledger.forget_images();
        self.resize_pending = false;
        Ok(true)
    }

    fn maybe_report(&mut self) {
        if self.blocking_report_every == 0 || self.frames_presented % self.blocking_report_every != 0 {
            return;
        }
        match self.profiler.report(&self.backend) {
            Ok(report) => tracing::info!("\n{report}"),
            Err(err) => tracing::warn!(%err, "profiler report failed"),
        }
    }

    /// The window changed size; the swapchain is rebuilt before the next
    /// acquire (or right after the current present).
    pub fn request_resize(&mut self) {
        self.resize_pending = true;
    }

    /// Live one-line readout; never waits on the GPU
    pub fn profiler_snapshot(&mut self) -> String {
        self.profiler.snapshot(&self.backend)
    }

    /// Full report of the last frame, waiting for its queries
    pub fn profiler_report(&mut self) -> Result<String, RenderError> {
        self.profiler.report(&self.backend)
    }

    /// Let the GPU drain before resources are dropped
    pub fn shutdown(&mut self) -> Result<(), RenderError> {
        self.backend.wait_idle()
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn current_slot(&self) -> usize {
        self.ring.current()
    }

    pub fn frames_presented(&self) -> u64 {
        self.frames_presented
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Extent;
    use crate::headless::HeadlessBackend;
    use tandem_core::simulation::SimulationBounds;
    use tandem_services::{LightDesc, ObjectPlacement, SceneDescriptor};

    const DT: f32 = 0.016;

    /// Raster floor plus a traced sphere moving up and sideways
    fn floor_and_sphere() -> SceneDescriptor {
        SceneDescriptor {
            objects: vec![
                ObjectPlacement {
                    mesh: "builtin:plane".to_string(),
                    position: [0.0, -1.0, 0.0],
                    rotation_degrees: [0.0; 3],
                    scale: [20.0, 1.0, 20.0],
                    color: [0.8; 3],
                    raster: true,
                    initial_velocity: Some([0.0; 3]),
                },
                ObjectPlacement {
                    mesh: "builtin:sphere".to_string(),
                    position: [0.0, 2.0, 0.0],
                    rotation_degrees: [0.0; 3],
                    scale: [1.0; 3],
                    color: [1.0, 0.3, 0.2],
                    raster: false,
                    initial_velocity: Some([0.5, 1.5, 0.25]),
                },
            ],
            lights: vec![LightDesc {
                position: [0.0, 10.0, 0.0],
                intensity: 1.0,
                color: [1.0; 3],
                enabled: true,
            }],
        }
    }

    fn orchestrator(
        backend: HeadlessBackend,
        settings: ProfilerSettings,
    ) -> FrameOrchestrator<HeadlessBackend> {
        let mut backend = backend;
        let resources = ResourceSet::build(
            &mut backend,
            &floor_and_sphere(),
            42,
            SimulationBounds::default(),
        )
        .unwrap();
        FrameOrchestrator::new(backend, resources, &settings)
    }

    fn run(orch: &mut FrameOrchestrator<HeadlessBackend>, frames: usize) -> Vec<FrameOutcome> {
        let camera = Camera::default();
        (0..frames)
            .map(|i| {
                let input = FrameInput {
                    delta_secs: DT,
                    elapsed_secs: DT * (i + 1) as f32,
                    camera: &camera,
                    lights_on: true,
                };
                orch.tick(&input).unwrap()
            })
            .collect()
    }

    #[test]
    fn three_frames_advance_the_simulation() {
        let backend = HeadlessBackend::new(Extent::new(64, 48), 2);
        let mut orch = orchestrator(backend, ProfilerSettings::default());
        let camera = Camera::default();

        let mut heights = vec![orch.backend().simulation_states()[1].position().y];
        for frame in 1..=3 {
            let input = FrameInput {
                delta_secs: DT,
                elapsed_secs: DT * frame as f32,
                camera: &camera,
                lights_on: true,
            };
            assert_eq!(orch.tick(&input).unwrap(), FrameOutcome::Presented);
            heights.push(orch.backend().simulation_states()[1].position().y);
        }

        assert!(heights.windows(2).all(|w| w[1] > w[0]), "{heights:?}");
        assert!((heights[3] - (2.0 + 3.0 * 1.5 * DT)).abs() < 1e-5);
        assert_eq!(orch.frames_presented(), 3);
        assert_eq!(orch.backend().submitted(), 3);
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());
    }

    #[test]
    fn only_raster_objects_are_drawn() {
        let backend = HeadlessBackend::new(Extent::new(64, 48), 2);
        let mut orch = orchestrator(backend, ProfilerSettings::default());
        run(&mut orch, 2);
        assert_eq!(orch.backend().draw_calls(), 2);
    }

    #[test]
    fn slots_cycle_through_the_ring() {
        let backend = HeadlessBackend::new(Extent::new(32, 32), 3);
        let mut orch = orchestrator(backend, ProfilerSettings::default());
        let camera = Camera::default();

        let mut slots = Vec::new();
        for _ in 0..7 {
            slots.push(orch.current_slot());
            let input = FrameInput {
                delta_secs: DT,
                elapsed_secs: 0.0,
                camera: &camera,
                lights_on: false,
            };
            orch.tick(&input).unwrap();
        }
        assert_eq!(slots, [0, 1, 2, 0, 1, 2, 0]);
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());
        assert!(orch.backend().uniforms(2).unwrap().ray_trace.lights[0].enabled == 0);
    }

    #[test]
    fn stale_acquire_skips_and_recovers() {
        let backend = HeadlessBackend::new(Extent::new(32, 32), 2).stale_acquire_on(2);
        let mut orch = orchestrator(backend, ProfilerSettings::default());

        let outcomes = run(&mut orch, 4);
        assert_eq!(
            outcomes,
            [
                FrameOutcome::Presented,
                FrameOutcome::Skipped,
                FrameOutcome::Presented,
                FrameOutcome::Presented
            ]
        );
        assert_eq!(orch.backend().recreations(), 1);
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());
    }

    #[test]
    fn stale_present_recreates_after_presenting() {
        let backend = HeadlessBackend::new(Extent::new(32, 32), 2).stale_present_on(1);
        let mut orch = orchestrator(backend, ProfilerSettings::default());

        let outcomes = run(&mut orch, 3);
        assert!(outcomes.iter().all(|o| *o == FrameOutcome::Presented));
        assert_eq!(orch.backend().recreations(), 1);
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());
    }

    #[test]
    fn minimized_window_defers_rendering() {
        let backend = HeadlessBackend::new(Extent::new(32, 32), 2);
        let mut orch = orchestrator(backend, ProfilerSettings::default());
        run(&mut orch, 1);

        orch.backend_mut().resize_surface(Extent::new(0, 0));
        orch.request_resize();
        assert_eq!(run(&mut orch, 2), [FrameOutcome::Skipped, FrameOutcome::Skipped]);

        orch.backend_mut().resize_surface(Extent::new(80, 40));
        assert_eq!(run(&mut orch, 1), [FrameOutcome::Presented]);
        assert_eq!(orch.backend().extent(), Extent::new(80, 40));
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());
    }

    #[test]
    fn profiler_sees_every_stage() {
        let backend = HeadlessBackend::new(Extent::new(64, 48), 2);
        let mut orch = orchestrator(backend, ProfilerSettings::default());
        assert_eq!(orch.profiler_snapshot(), "Profiling...");

        run(&mut orch, 1);
        assert_eq!(orch.profiler_snapshot(), "Collecting...");

        run(&mut orch, 3);
        let snapshot = orch.profiler_snapshot();
        for stage in ["Simulation", "Rasterize", "RayTrace"] {
            assert!(snapshot.contains(&format!("[GPU] {stage}:")), "{snapshot}");
        }
        assert!(snapshot.contains("Total:"));

        let floor_triangles = tandem_asset::load_mesh("builtin:plane", glam::Vec3::ONE)
            .unwrap()
            .triangle_count();
        let raster = orch.profiler().stats().entry("Rasterize").unwrap();
        assert_eq!(
            raster.last_counts.map(|c| c.input_primitives),
            Some(u64::from(floor_triangles))
        );

        let report = orch.profiler_report().unwrap();
        assert!(report.starts_with("=== Performance Frame ==="));
        assert!(report.contains("Est. FPS:"));
    }

    #[test]
    fn snapshot_after_each_tick_folds_every_frame_once() {
        let backend = HeadlessBackend::new(Extent::new(32, 32), 2);
        let mut orch = orchestrator(backend, ProfilerSettings::default());

        // A frame's results become readable once its slot's fence is waited
        // on, two ticks later
        for frame in 1..=6u64 {
            run(&mut orch, 1);
            orch.profiler_snapshot();
            let count = orch.profiler().stats().get("Simulation").map_or(0, |s| s.count);
            assert_eq!(count, frame.saturating_sub(2), "after frame {frame}");
        }
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());
    }

    #[test]
    fn tiny_query_budget_still_renders() {
        let backend = HeadlessBackend::new(Extent::new(32, 32), 2);
        let settings = ProfilerSettings {
            max_queries: 3,
            ..ProfilerSettings::default()
        };
        let mut orch = orchestrator(backend, settings);

        let outcomes = run(&mut orch, 4);
        assert!(outcomes.iter().all(|o| *o == FrameOutcome::Presented));
        assert!(orch.backend().violations().is_empty(), "{:?}", orch.backend().violations());

        orch.profiler_snapshot();
        assert!(orch.profiler().stats().get("Simulation").is_some());
        assert!(orch.profiler().stats().get("RayTrace").is_none());
    }
}
