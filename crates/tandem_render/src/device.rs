//! GPU seams the orchestrator drives
//!
//! `CommandRecorder` records into the command stream of the slot passed to
//! `begin_recording`. `QueryRecorder`/`QueryDevice` are the narrow halves
//! the profiler needs. `RenderBackend` owns the device, swapchain and
//! per-slot synchronization.

use crate::accel::AccelerationStructureBuilder;
use crate::barrier::BarrierBatch;
use crate::error::RenderError;
use crate::profiler::{QueryLimits, QueryReadback, ReadMode, TimestampStage};
use crate::resources::{GpuGeometry, SceneSetup};
use crate::state::ResourceId;
use crate::uniforms::{FrameUniforms, RasterPush};
use crate::DeviceCapabilities;
use tandem_asset::MeshData;
use tandem_core::simulation::SimulationParams;
use tandem_metrics::PipelineCounts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extent {
    pub width: u32,
    pub height: u32,
}

impl Extent {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero-area surface
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32 },
    /// Surface out of date or suboptimal: recreate and skip the frame
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Stale,
}

/// Query commands used by the profiler
pub trait QueryRecorder {
    /// Reset `count` queries of both pools of the recording slot. The reset
    /// happens on the host, immediately, so the slot's fence must already
    /// have been waited on.
    fn reset_queries(&mut self, first: u32, count: u32);
    fn write_timestamp(&mut self, stage: TimestampStage, query: u32);
    fn begin_statistics(&mut self, query: u32);
    fn end_statistics(&mut self, query: u32);
}

/// Query readback for a given in-flight slot
pub trait QueryDevice {
    fn query_limits(&self) -> QueryLimits;

    fn read_timestamps(
        &self,
        slot: usize,
        first: u32,
        count: u32,
        mode: ReadMode,
    ) -> Result<QueryReadback<Vec<u64>>, RenderError>;

    fn read_statistics(
        &self,
        slot: usize,
        first: u32,
        count: u32,
        mode: ReadMode,
    ) -> Result<QueryReadback<Vec<PipelineCounts>>, RenderError>;
}

/// Frame commands
pub trait CommandRecorder: QueryRecorder {
    fn pipeline_barrier(&mut self, batch: &BarrierBatch);

    /// Bind the simulation pipeline, push `params`, dispatch `groups` work-groups
    fn dispatch_simulation(&mut self, params: &SimulationParams, groups: u32);

    /// Start rendering into the swapchain image and the slot's depth image,
    /// clearing both
    fn begin_raster(&mut self, image_index: u32, extent: Extent);
    fn draw_object(&mut self, geometry: &GpuGeometry, push: &RasterPush);
    fn end_raster(&mut self);

    fn copy_image(&mut self, src: ResourceId, dst: ResourceId, extent: Extent);

    /// One ray per pixel over `extent`
    fn trace_rays(&mut self, extent: Extent);
}

/// Device, swapchain and per-slot synchronization
pub trait RenderBackend: CommandRecorder + QueryDevice + AccelerationStructureBuilder {
    fn capabilities(&self) -> &DeviceCapabilities;
    fn frames_in_flight(&self) -> usize;
    fn extent(&self) -> Extent;

    /// Block until the slot's previous submission has finished
    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError>;

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError>;

    /// Rebuild the swapchain and size-dependent images. Returns `false`
    /// when the surface has zero area and nothing was rebuilt.
    fn recreate_surface(&mut self) -> Result<bool, RenderError>;

    fn write_uniforms(&mut self, slot: usize, uniforms: &FrameUniforms) -> Result<(), RenderError>;

    fn begin_recording(&mut self, slot: usize) -> Result<(), RenderError>;
    fn end_recording(&mut self) -> Result<(), RenderError>;

    /// Submit the slot's commands: wait on acquire, signal render-finished
    /// and the slot fence
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError>;
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome, RenderError>;

    fn upload_geometry(&mut self, mesh: &MeshData) -> Result<GpuGeometry, RenderError>;

    /// Create the simulation buffer, address table and descriptor bindings.
    /// Called once, after the top-level structure is built.
    fn create_scene_resources(&mut self, setup: &SceneSetup) -> Result<(), RenderError>;

    fn wait_idle(&mut self) -> Result<(), RenderError>;
}
