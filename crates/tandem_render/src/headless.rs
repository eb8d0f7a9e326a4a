//! Headless backend
//!
//! Runs the frame without a GPU or a window. Commands are recorded per
//! slot and executed on submit: the simulation kernel runs on the CPU,
//! timestamps come from a synthetic 1 ns clock with fixed per-command
//! costs, and statistics queries count the primitives of the draws they
//! wrap.
//!
//! Execution also validates what a GPU would silently get wrong. Image
//! layouts and simulation-buffer hazards are tracked from the recorded
//! barriers alone, independently of the [`StateLedger`](crate::barrier::StateLedger)
//! that produced them. Anything out of order lands in [`HeadlessBackend::violations`].

use crate::accel::{
    AccelerationStructureBuilder, BottomStructureHandle, StructureInstance, TopStructureHandle,
};
use crate::barrier::{Barrier, BarrierBatch};
use crate::device::{
    AcquireOutcome, CommandRecorder, Extent, PresentOutcome, QueryDevice, QueryRecorder,
    RenderBackend,
};
use crate::error::RenderError;
use crate::profiler::{QueryLimits, QueryReadback, ReadMode, TimestampStage};
use crate::resources::{GeometryHandle, GpuGeometry, SceneSetup};
use crate::state::{Access, ImageLayout, PipelineStages, ResourceId};
use crate::uniforms::{FrameUniforms, RasterPush};
use crate::{BackendType, DeviceCapabilities};
use std::collections::HashMap;
use tandem_asset::MeshData;
use tandem_core::simulation::{step_all, ObjectState, SimulationBounds, SimulationParams, WORKGROUP_SIZE};
use tandem_metrics::PipelineCounts;

pub const SWAPCHAIN_IMAGES: u32 = 3;
pub const DEFAULT_QUERY_CAPACITY: u32 = 256;

// Synthetic costs, in clock ticks
const BARRIER_COST: u64 = 200;
const DISPATCH_COST_PER_GROUP: u64 = 4_000;
const RASTER_PASS_COST: u64 = 10_000;
const DRAW_COST: u64 = 15_000;
const RAY_COST_PER_PIXEL: u64 = 8;

#[derive(Debug, Clone)]
enum Command {
    Timestamp { query: u32 },
    BeginStatistics { query: u32 },
    EndStatistics { query: u32 },
    Barrier(BarrierBatch),
    Dispatch { params: SimulationParams, groups: u32 },
    BeginRaster { image_index: u32, extent: Extent },
    Draw { geometry: GpuGeometry, push: RasterPush },
    EndRaster,
    Copy { src: ResourceId, dst: ResourceId, extent: Extent },
    TraceRays { extent: Extent },
}

#[derive(Debug)]
struct Slot {
    commands: Vec<Command>,
    timestamps: Vec<Option<u64>>,
    statistics: Vec<Option<PipelineCounts>>,
    uniforms: Option<FrameUniforms>,
    /// Submitted, fence not yet waited on
    in_flight: bool,
    /// While the GPU is still running the slot, the host sees the pools as
    /// they were at submit
    host_view: Option<HostView>,
}

#[derive(Debug, Clone)]
struct HostView {
    timestamps: Vec<Option<u64>>,
    statistics: Vec<Option<PipelineCounts>>,
}

impl Slot {
    fn new(query_capacity: u32) -> Self {
        Self {
            commands: Vec::new(),
            timestamps: vec![None; query_capacity as usize],
            statistics: vec![None; query_capacity as usize],
            uniforms: None,
            in_flight: false,
            host_view: None,
        }
    }
}

/// Simulation-buffer accesses not yet ordered by a barrier
#[derive(Debug, Default)]
struct BufferHazards {
    /// Stage of the last write
    write: Option<PipelineStages>,
    /// Stages the last write is visible to
    visible_to: PipelineStages,
    /// Reads since the last write
    reads: PipelineStages,
    /// Stages that may write after those reads
    reads_done_for: PipelineStages,
}

impl BufferHazards {
    fn barrier(&mut self, barrier: &Barrier) {
        if let Some(write) = self.write {
            let direct = barrier.src_stages.contains(write)
                && barrier.src_access.contains(Access::SHADER_WRITE);
            // Execution dependency chain through an earlier barrier
            let chained = barrier.src_stages.intersects(self.visible_to);
            if direct || chained {
                self.visible_to |= barrier.dst_stages;
            }
        }
        if !self.reads.is_empty() && barrier.src_stages.contains(self.reads) {
            self.reads_done_for |= barrier.dst_stages;
        }
    }

    fn write(&mut self, stage: PipelineStages) -> Option<String> {
        let mut issue = None;
        if self.write.is_some() && !self.visible_to.contains(stage) {
            issue = Some(format!("simulation buffer write-after-write at {stage:?}"));
        }
        if !self.reads.is_empty() && !self.reads_done_for.contains(stage) {
            issue = Some(format!(
                "simulation buffer written at {stage:?} while reads at {:?} are unordered",
                self.reads
            ));
        }
        *self = Self {
            write: Some(stage),
            ..Self::default()
        };
        issue
    }

    fn read(&mut self, stage: PipelineStages) -> Option<String> {
        let issue = match self.write {
            Some(write) if !self.visible_to.contains(stage) => Some(format!(
                "simulation buffer read at {stage:?} without a barrier after the {write:?} write"
            )),
            _ => None,
        };
        self.reads |= stage;
        self.reads_done_for = PipelineStages::empty();
        issue
    }
}

#[derive(Debug)]
struct HeadlessScene {
    states: Vec<ObjectState>,
    bounds: SimulationBounds,
}

pub struct HeadlessBackend {
    capabilities: DeviceCapabilities,
    extent: Extent,
    /// Size the "window" currently has
    surface: Extent,
    query_capacity: u32,
    slots: Vec<Slot>,
    recording: Option<usize>,
    clock: u64,
    complete_on_submit: bool,

    next_image: u32,
    acquire_calls: u64,
    present_calls: u64,
    stale_acquires: Vec<u64>,
    stale_presents: Vec<u64>,

    layouts: HashMap<ResourceId, ImageLayout>,
    hazards: BufferHazards,
    violations: Vec<String>,

    geometries: Vec<GpuGeometry>,
    bottoms: Vec<GeometryHandle>,
    tops: u32,
    top_instances: Vec<StructureInstance>,
    scene: Option<HeadlessScene>,

    submitted: u64,
    presented: u64,
    recreations: u64,
    draw_calls: u64,
}

impl HeadlessBackend {
    pub fn new(extent: Extent, frames_in_flight: usize) -> Self {
        let frames_in_flight = frames_in_flight.max(1);
        Self {
            capabilities: DeviceCapabilities {
                backend: BackendType::Headless,
                device_name: "headless".to_string(),
                ray_tracing: true,
                timestamps: true,
                pipeline_statistics: true,
                timestamp_period_ns: 1.0,
                timestamp_valid_bits: 64,
                max_ray_recursion_depth: 2,
            },
            extent,
            surface: extent,
            query_capacity: DEFAULT_QUERY_CAPACITY,
            slots: (0..frames_in_flight)
                .map(|_| Slot::new(DEFAULT_QUERY_CAPACITY))
                .collect(),
            recording: None,
            clock: 0,
            complete_on_submit: false,
            next_image: 0,
            acquire_calls: 0,
            present_calls: 0,
            stale_acquires: Vec::new(),
            stale_presents: Vec::new(),
            layouts: HashMap::new(),
            hazards: BufferHazards::default(),
            violations: Vec::new(),
            geometries: Vec::new(),
            bottoms: Vec::new(),
            tops: 0,
            top_instances: Vec::new(),
            scene: None,
            submitted: 0,
            presented: 0,
            recreations: 0,
            draw_calls: 0,
        }
    }

    pub fn with_query_capacity(mut self, capacity: u32) -> Self {
        self.query_capacity = capacity;
        for slot in &mut self.slots {
            *slot = Slot::new(capacity);
        }
        self
    }

    pub fn with_pipeline_statistics(mut self, supported: bool) -> Self {
        self.capabilities.pipeline_statistics = supported;
        self
    }

    /// Make query results readable right after submit instead of after
    /// the slot's fence wait
    pub fn complete_on_submit(mut self, complete: bool) -> Self {
        self.complete_on_submit = complete;
        self
    }

    /// Report the surface stale on the `call`-th acquire (1-based)
    pub fn stale_acquire_on(mut self, call: u64) -> Self {
        self.stale_acquires.push(call);
        self
    }

    /// Report the surface stale on the `call`-th present (1-based)
    pub fn stale_present_on(mut self, call: u64) -> Self {
        self.stale_presents.push(call);
        self
    }

    /// Simulate a window resize; takes effect at the next recreation
    pub fn resize_surface(&mut self, extent: Extent) {
        self.surface = extent;
    }

    pub fn simulation_states(&self) -> &[ObjectState] {
        self.scene.as_ref().map_or(&[], |s| s.states.as_slice())
    }

    pub fn top_instances(&self) -> &[StructureInstance] {
        &self.top_instances
    }

    pub fn violations(&self) -> &[String] {
        &self.violations
    }

    pub fn uniforms(&self, slot: usize) -> Option<&FrameUniforms> {
        self.slots.get(slot).and_then(|s| s.uniforms.as_ref())
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn recreations(&self) -> u64 {
        self.recreations
    }

    pub fn draw_calls(&self) -> u64 {
        self.draw_calls
    }

    pub fn layout(&self, id: ResourceId) -> ImageLayout {
        self.layouts.get(&id).copied().unwrap_or(ImageLayout::Undefined)
    }

    fn violation(&mut self, message: String) {
        tracing::warn!(%message, "headless validation failure");
        self.violations.push(message);
    }

    fn slot(&self, slot: usize) -> Result<&Slot, RenderError> {
        self.slots
            .get(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("frame slot {slot} out of range")))
    }

    fn slot_mut(&mut self, slot: usize) -> Result<&mut Slot, RenderError> {
        self.slots
            .get_mut(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("frame slot {slot} out of range")))
    }

    fn record(&mut self, command: Command) {
        match self.recording {
            Some(slot) => self.slots[slot].commands.push(command),
            None => self.violation(format!("{command:?} recorded outside a command stream")),
        }
    }

    /// Everything submitted has finished
    fn finish_all(&mut self) {
        for slot in &mut self.slots {
            slot.in_flight = false;
            slot.host_view = None;
        }
        self.hazards = BufferHazards::default();
    }

    fn expect_layout(&mut self, id: ResourceId, expected: ImageLayout, use_: &str) {
        let actual = self.layout(id);
        if actual != expected {
            self.violation(format!("{id:?} used as {use_} in {actual:?}, expected {expected:?}"));
        }
    }

    fn image_barrier(&mut self, barrier: &Barrier) {
        let current = self.layout(barrier.resource);
        match barrier.old_layout {
            Some(ImageLayout::Undefined) => {}
            Some(old) if old == current => {}
            old => self.violation(format!(
                "{:?} transitioned from {old:?} but is in {current:?}",
                barrier.resource
            )),
        }
        let new = barrier.new_layout.unwrap_or(ImageLayout::Undefined);
        self.layouts.insert(barrier.resource, new);
    }

    fn store_timestamp(&mut self, slot: usize, query: u32) {
        let index = query as usize;
        match self.slots[slot].timestamps.get(index) {
            Some(None) => self.slots[slot].timestamps[index] = Some(self.clock),
            Some(Some(_)) => self.violation(format!("timestamp query {query} written twice")),
            None => self.violation(format!("timestamp query {query} outside the pool")),
        }
    }

    fn store_statistics(&mut self, slot: usize, query: u32, counts: PipelineCounts) {
        let index = query as usize;
        match self.slots[slot].statistics.get(index) {
            Some(None) => self.slots[slot].statistics[index] = Some(counts),
            Some(Some(_)) => self.violation(format!("statistics query {query} written twice")),
            None => self.violation(format!("statistics query {query} outside the pool")),
        }
    }

    fn run_simulation(&mut self, params: &SimulationParams, groups: u32) {
        let Some(scene) = self.scene.as_mut() else {
            self.violation("simulation dispatched before scene resources exist".to_string());
            return;
        };
        let count = (params.count.max(0) as usize).min(scene.states.len());
        step_all(&mut scene.states, count, params.dt, &scene.bounds);
        if (groups as usize) * (WORKGROUP_SIZE as usize) < count {
            self.violation(format!("{groups} work-groups cannot cover {count} objects"));
        }
    }

    /// Play back the slot's command stream
    fn execute(&mut self, slot: usize, image_index: u32) {
        let commands = std::mem::take(&mut self.slots[slot].commands);
        let mut raster: Option<u32> = None;
        let mut statistics: Option<(u32, PipelineCounts)> = None;

        for command in &commands {
            match command {
                Command::Timestamp { query } => self.store_timestamp(slot, *query),
                Command::BeginStatistics { query } => {
                    if statistics.is_some() {
                        self.violation(format!("statistics query {query} nested in another"));
                    }
                    statistics = Some((*query, PipelineCounts::default()));
                }
                Command::EndStatistics { query } => match statistics.take() {
                    Some((open, counts)) if open == *query => {
                        self.store_statistics(slot, open, counts)
                    }
                    _ => self.violation(format!("statistics query {query} ended but not active")),
                },
                Command::Barrier(batch) => {
                    self.clock += BARRIER_COST;
                    for barrier in batch.iter() {
                        if barrier.is_image() {
                            self.image_barrier(barrier);
                        } else {
                            self.hazards.barrier(barrier);
                        }
                    }
                }
                Command::Dispatch { params, groups } => {
                    if let Some(issue) = self.hazards.write(PipelineStages::COMPUTE_SHADER) {
                        self.violation(issue);
                    }
                    self.run_simulation(params, *groups);
                    self.clock += DISPATCH_COST_PER_GROUP * u64::from(*groups);
                }
                Command::BeginRaster { image_index: target, extent } => {
                    if raster.is_some() {
                        self.violation("raster pass begun inside another".to_string());
                    }
                    if *target != image_index {
                        self.violation(format!(
                            "raster target {target} is not the acquired image {image_index}"
                        ));
                    }
                    if *extent != self.extent {
                        self.violation(format!("raster extent {extent:?} != {:?}", self.extent));
                    }
                    self.expect_layout(ResourceId::Swapchain(*target), ImageLayout::ColorAttachment, "color target");
                    self.expect_layout(ResourceId::Depth(slot), ImageLayout::DepthAttachment, "depth target");
                    raster = Some(*target);
                    self.clock += RASTER_PASS_COST;
                }
                Command::Draw { geometry, push } => {
                    if raster.is_none() {
                        self.violation("draw outside a raster pass".to_string());
                    }
                    let objects = self.simulation_states().len();
                    if push.object_index as usize >= objects {
                        self.violation(format!(
                            "draw reads object {} of {objects}",
                            push.object_index
                        ));
                    }
                    if let Some(issue) = self.hazards.read(PipelineStages::VERTEX_SHADER) {
                        self.violation(issue);
                    }
                    if let Some((_, counts)) = statistics.as_mut() {
                        counts.input_primitives += u64::from(geometry.index_count / 3);
                        counts.vertex_invocations += u64::from(geometry.index_count);
                    }
                    self.draw_calls += 1;
                    self.clock += DRAW_COST + u64::from(geometry.index_count);
                }
                Command::EndRaster => {
                    if raster.take().is_none() {
                        self.violation("raster pass ended but not begun".to_string());
                    }
                }
                Command::Copy { src, dst, extent } => {
                    self.expect_layout(*src, ImageLayout::TransferSrc, "copy source");
                    self.expect_layout(*dst, ImageLayout::TransferDst, "copy destination");
                    self.clock += u64::from(extent.width) * u64::from(extent.height) / 4;
                }
                Command::TraceRays { extent } => {
                    if self.tops == 0 {
                        self.violation("rays traced without a top-level structure".to_string());
                    }
                    self.expect_layout(ResourceId::Canvas(slot), ImageLayout::General, "ray-trace canvas");
                    self.expect_layout(ResourceId::Depth(slot), ImageLayout::ShaderReadOnly, "ray-trace depth");
                    if let Some(issue) = self.hazards.read(PipelineStages::RAY_TRACING_SHADER) {
                        self.violation(issue);
                    }
                    self.clock +=
                        RAY_COST_PER_PIXEL * u64::from(extent.width) * u64::from(extent.height);
                }
            }
        }

        if raster.is_some() {
            self.violation("command stream ended inside a raster pass".to_string());
        }
        if let Some((query, _)) = statistics {
            self.violation(format!("statistics query {query} never ended"));
        }
    }
}

impl QueryRecorder for HeadlessBackend {
    fn reset_queries(&mut self, first: u32, count: u32) {
        let Some(slot) = self.recording else {
            self.violation(format!("query reset {first}+{count} outside a command stream"));
            return;
        };
        let end = first.saturating_add(count);
        if end > self.query_capacity {
            self.violation(format!("query reset {first}..{end} outside the pool"));
        }
        if self.slots[slot].in_flight {
            self.violation(format!("queries of slot {slot} reset while the GPU may use them"));
        }
        let pools = &mut self.slots[slot];
        for i in first..end.min(self.query_capacity) {
            pools.timestamps[i as usize] = None;
            pools.statistics[i as usize] = None;
        }
    }

    fn write_timestamp(&mut self, _stage: TimestampStage, query: u32) {
        self.record(Command::Timestamp { query });
    }

    fn begin_statistics(&mut self, query: u32) {
        self.record(Command::BeginStatistics { query });
    }

    fn end_statistics(&mut self, query: u32) {
        self.record(Command::EndStatistics { query });
    }
}

impl QueryDevice for HeadlessBackend {
    fn query_limits(&self) -> QueryLimits {
        self.capabilities.query_limits()
    }

    fn read_timestamps(
        &self,
        slot: usize,
        first: u32,
        count: u32,
        mode: ReadMode,
    ) -> Result<QueryReadback<Vec<u64>>, RenderError> {
        let pools = self.slot(slot)?;
        let stale = pools.host_view.as_ref().map(|view| view.timestamps.as_slice());
        read_queries(&pools.timestamps, stale, first, count, mode)
    }

    fn read_statistics(
        &self,
        slot: usize,
        first: u32,
        count: u32,
        mode: ReadMode,
    ) -> Result<QueryReadback<Vec<PipelineCounts>>, RenderError> {
        let pools = self.slot(slot)?;
        let stale = pools.host_view.as_ref().map(|view| view.statistics.as_slice());
        read_queries(&pools.statistics, stale, first, count, mode)
    }
}

/// `stale` is the host's view while the slot is still executing. Queries it
/// still holds are available, exactly like results a reset has not reached.
fn read_queries<T: Copy>(
    pool: &[Option<T>],
    stale: Option<&[Option<T>]>,
    first: u32,
    count: u32,
    mode: ReadMode,
) -> Result<QueryReadback<Vec<T>>, RenderError> {
    let range = first as usize..(first as usize + count as usize);
    let outside = || RenderError::InvalidState(format!("queries {first}+{count} outside the pool"));
    if let Some(stale) = stale {
        let old = stale.get(range.clone()).ok_or_else(outside)?;
        if let Some(values) = old.iter().copied().collect::<Option<Vec<T>>>() {
            return Ok(QueryReadback::Ready(values));
        }
        if mode == ReadMode::NoWait {
            return Ok(QueryReadback::NotReady);
        }
    }
    let values = pool.get(range).ok_or_else(outside)?;
    match values.iter().copied().collect::<Option<Vec<T>>>() {
        Some(values) => Ok(QueryReadback::Ready(values)),
        None if mode == ReadMode::NoWait => Ok(QueryReadback::NotReady),
        None => Err(RenderError::InvalidState(
            "waited on a query that was never written".to_string(),
        )),
    }
}

impl CommandRecorder for HeadlessBackend {
    fn pipeline_barrier(&mut self, batch: &BarrierBatch) {
        self.record(Command::Barrier(batch.clone()));
    }

    fn dispatch_simulation(&mut self, params: &SimulationParams, groups: u32) {
        self.record(Command::Dispatch { params: *params, groups });
    }

    fn begin_raster(&mut self, image_index: u32, extent: Extent) {
        self.record(Command::BeginRaster { image_index, extent });
    }

    fn draw_object(&mut self, geometry: &GpuGeometry, push: &RasterPush) {
        self.record(Command::Draw { geometry: *geometry, push: *push });
    }

    fn end_raster(&mut self) {
        self.record(Command::EndRaster);
    }

    fn copy_image(&mut self, src: ResourceId, dst: ResourceId, extent: Extent) {
        self.record(Command::Copy { src, dst, extent });
    }

    fn trace_rays(&mut self, extent: Extent) {
        self.record(Command::TraceRays { extent });
    }
}

impl AccelerationStructureBuilder for HeadlessBackend {
    fn build_bottom(&mut self, geometry: &GpuGeometry) -> Result<BottomStructureHandle, RenderError> {
        if !self.geometries.contains(geometry) {
            return Err(RenderError::InvalidState(format!(
                "bottom-level build over unknown geometry {:?}",
                geometry.handle
            )));
        }
        if geometry.index_count == 0 || geometry.index_count % 3 != 0 {
            return Err(RenderError::InvalidState(format!(
                "geometry {:?} is not a triangle list",
                geometry.handle
            )));
        }
        self.bottoms.push(geometry.handle);
        Ok(BottomStructureHandle(self.bottoms.len() as u32 - 1))
    }

    fn build_top(&mut self, instances: &[StructureInstance]) -> Result<TopStructureHandle, RenderError> {
        if let Some(bad) = instances
            .iter()
            .find(|i| i.bottom.0 as usize >= self.bottoms.len())
        {
            return Err(RenderError::InvalidState(format!(
                "instance {} references unknown {:?}",
                bad.custom_index, bad.bottom
            )));
        }
        self.top_instances = instances.to_vec();
        self.tops += 1;
        tracing::debug!(instances = instances.len(), "headless top-level structure built");
        Ok(TopStructureHandle(self.tops - 1))
    }
}

impl RenderBackend for HeadlessBackend {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn extent(&self) -> Extent {
        self.extent
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let pools = self.slot_mut(slot)?;
        pools.in_flight = false;
        pools.host_view = None;
        Ok(())
    }

    fn acquire(&mut self, _slot: usize) -> Result<AcquireOutcome, RenderError> {
        self.acquire_calls += 1;
        if self.stale_acquires.contains(&self.acquire_calls) || self.surface != self.extent {
            return Ok(AcquireOutcome::Stale);
        }
        let image_index = self.next_image;
        self.next_image = (self.next_image + 1) % SWAPCHAIN_IMAGES;
        Ok(AcquireOutcome::Acquired { image_index })
    }

    fn recreate_surface(&mut self) -> Result<bool, RenderError> {
        if self.surface.is_empty() {
            return Ok(false);
        }
        self.finish_all();
        tracing::info!(old = ?self.extent, new = ?self.surface, "headless surface recreated");
        self.extent = self.surface;
        self.layouts.clear();
        self.next_image = 0;
        self.recreations += 1;
        Ok(true)
    }

    fn write_uniforms(&mut self, slot: usize, uniforms: &FrameUniforms) -> Result<(), RenderError> {
        if self.slot(slot)?.in_flight {
            self.violation(format!("uniforms of slot {slot} written while in flight"));
        }
        self.slot_mut(slot)?.uniforms = Some(*uniforms);
        Ok(())
    }

    fn begin_recording(&mut self, slot: usize) -> Result<(), RenderError> {
        if self.recording.is_some() {
            return Err(RenderError::InvalidState("already recording".to_string()));
        }
        if self.slot(slot)?.in_flight {
            self.violation(format!("slot {slot} re-recorded before its fence was waited on"));
        }
        self.slot_mut(slot)?.commands.clear();
        self.recording = Some(slot);
        Ok(())
    }

    fn end_recording(&mut self) -> Result<(), RenderError> {
        self.recording
            .take()
            .map(|_| ())
            .ok_or_else(|| RenderError::InvalidState("not recording".to_string()))
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError> {
        if self.recording.is_some() {
            return Err(RenderError::InvalidState("submit while recording".to_string()));
        }
        if self.slot(slot)?.in_flight {
            self.violation(format!("slot {slot} resubmitted before its fence was waited on"));
        }
        let in_flight = self.slots.iter().filter(|s| s.in_flight).count();
        if in_flight >= self.slots.len() {
            self.violation(format!("{} frames in flight", in_flight + 1));
        }

        let host_view = (!self.complete_on_submit).then(|| HostView {
            timestamps: self.slots[slot].timestamps.clone(),
            statistics: self.slots[slot].statistics.clone(),
        });
        self.execute(slot, image_index);
        let pools = self.slot_mut(slot)?;
        pools.in_flight = true;
        pools.host_view = host_view;
        self.submitted += 1;
        Ok(())
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> Result<PresentOutcome, RenderError> {
        self.present_calls += 1;
        self.expect_layout(ResourceId::Swapchain(image_index), ImageLayout::PresentSrc, "present");
        self.presented += 1;
        if self.stale_presents.contains(&self.present_calls) || self.surface != self.extent {
            return Ok(PresentOutcome::Stale);
        }
        Ok(PresentOutcome::Presented)
    }

    fn upload_geometry(&mut self, mesh: &MeshData) -> Result<GpuGeometry, RenderError> {
        if mesh.vertices.is_empty() || mesh.indices.is_empty() {
            return Err(RenderError::InvalidState("empty mesh upload".to_string()));
        }
        let geometry = GpuGeometry {
            handle: GeometryHandle(self.geometries.len() as u32),
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        };
        self.geometries.push(geometry);
        Ok(geometry)
    }

    fn create_scene_resources(&mut self, setup: &SceneSetup) -> Result<(), RenderError> {
        if setup.top.0 >= self.tops {
            return Err(RenderError::InvalidState(format!("unknown {:?}", setup.top)));
        }
        if setup.object_geometry.len() != setup.initial_states.len() {
            return Err(RenderError::InvalidState(format!(
                "{} objects but {} simulation records",
                setup.object_geometry.len(),
                setup.initial_states.len()
            )));
        }
        if let Some(&bad) = setup
            .object_geometry
            .iter()
            .find(|&&g| g >= setup.geometries.len())
        {
            return Err(RenderError::InvalidState(format!("object references geometry {bad}")));
        }
        self.scene = Some(HeadlessScene {
            states: setup.initial_states.clone(),
            bounds: setup.bounds,
        });
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        self.finish_all();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrier::StateLedger;
    use crate::resources::ResourceSet;
    use crate::state::Usage;
    use tandem_services::{ObjectPlacement, SceneDescriptor};

    fn backend_with_scene() -> HeadlessBackend {
        let scene = SceneDescriptor {
            objects: vec![ObjectPlacement {
                mesh: "builtin:cube".to_string(),
                position: [0.0, 2.0, 0.0],
                rotation_degrees: [0.0; 3],
                scale: [1.0; 3],
                color: [1.0; 3],
                raster: true,
                initial_velocity: Some([1.0, 0.0, 0.0]),
            }],
            lights: Vec::new(),
        };
        let mut backend = HeadlessBackend::new(Extent::new(32, 32), 2);
        ResourceSet::build(&mut backend, &scene, 7, SimulationBounds::default()).unwrap();
        backend
    }

    fn params() -> SimulationParams {
        SimulationParams { dt: 0.5, time: 0.5, count: 1 }
    }

    #[test]
    fn dispatch_runs_kernel_on_submit() {
        let mut backend = backend_with_scene();
        backend.begin_recording(0).unwrap();
        backend.dispatch_simulation(&params(), 1);
        backend.end_recording().unwrap();
        assert_eq!(backend.simulation_states()[0].position()[0], 0.0);

        backend.submit(0, 0).unwrap();
        assert_eq!(backend.simulation_states()[0].position()[0], 0.5);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn read_without_barrier_is_flagged() {
        let mut backend = backend_with_scene();
        backend.begin_recording(0).unwrap();
        backend.dispatch_simulation(&params(), 1);
        backend.trace_rays(Extent::new(32, 32));
        backend.end_recording().unwrap();
        backend.submit(0, 0).unwrap();

        assert!(backend
            .violations()
            .iter()
            .any(|v| v.contains("without a barrier")));
        assert!(backend.violations().iter().any(|v| v.contains("ray-trace canvas")));
    }

    #[test]
    fn ledger_barriers_satisfy_the_tracker() {
        let mut backend = backend_with_scene();
        let mut ledger = StateLedger::new();
        let sim = ResourceId::SimulationBuffer;

        for frame in 0..3 {
            let slot = frame % 2;
            backend.wait_for_slot(slot).unwrap();
            backend.begin_recording(slot).unwrap();
            let batch = ledger.plan(&[(sim, &[Usage::SimulationWrite])]).unwrap();
            if frame == 0 {
                assert!(batch.is_empty());
            } else {
                backend.pipeline_barrier(&batch);
            }
            backend.dispatch_simulation(&params(), 1);
            let batch = ledger
                .plan(&[(sim, &[Usage::VertexRead, Usage::RayTraceRead])])
                .unwrap();
            backend.pipeline_barrier(&batch);
            backend.end_recording().unwrap();
            backend.submit(slot, 0).unwrap();
        }

        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn layout_mismatch_is_flagged() {
        let mut backend = backend_with_scene();
        backend.begin_recording(0).unwrap();
        backend.copy_image(ResourceId::Swapchain(0), ResourceId::Canvas(0), Extent::new(32, 32));
        backend.end_recording().unwrap();
        backend.submit(0, 0).unwrap();
        assert_eq!(backend.violations().len(), 2);
    }

    #[test]
    fn queries_wait_for_the_fence() {
        let mut backend = backend_with_scene();
        backend.begin_recording(0).unwrap();
        backend.reset_queries(0, 4);
        backend.write_timestamp(TimestampStage::TopOfPipe, 0);
        backend.dispatch_simulation(&params(), 1);
        backend.write_timestamp(TimestampStage::BottomOfPipe, 1);
        backend.end_recording().unwrap();
        backend.submit(0, 0).unwrap();

        assert_eq!(
            backend.read_timestamps(0, 0, 2, ReadMode::NoWait).unwrap(),
            QueryReadback::NotReady
        );
        let QueryReadback::Ready(stamps) = backend.read_timestamps(0, 0, 2, ReadMode::Wait).unwrap()
        else {
            panic!("blocking read must return results");
        };
        assert_eq!(stamps[1] - stamps[0], DISPATCH_COST_PER_GROUP);

        backend.wait_for_slot(0).unwrap();
        assert!(matches!(
            backend.read_timestamps(0, 0, 2, ReadMode::NoWait).unwrap(),
            QueryReadback::Ready(_)
        ));
    }

    fn timed_dispatch(backend: &mut HeadlessBackend, reset: bool) {
        backend.begin_recording(0).unwrap();
        if reset {
            backend.reset_queries(0, 4);
        }
        backend.write_timestamp(TimestampStage::TopOfPipe, 0);
        backend.dispatch_simulation(&params(), 1);
        backend.write_timestamp(TimestampStage::BottomOfPipe, 1);
        backend.end_recording().unwrap();
        backend.submit(0, 0).unwrap();
    }

    fn ready(readback: QueryReadback<Vec<u64>>) -> Vec<u64> {
        match readback {
            QueryReadback::Ready(values) => values,
            QueryReadback::NotReady => panic!("expected query results"),
        }
    }

    #[test]
    fn host_reset_hides_the_previous_frame() {
        let mut backend = backend_with_scene();
        timed_dispatch(&mut backend, true);
        backend.wait_for_slot(0).unwrap();
        let first = ready(backend.read_timestamps(0, 0, 2, ReadMode::NoWait).unwrap());

        timed_dispatch(&mut backend, true);
        assert_eq!(
            backend.read_timestamps(0, 0, 2, ReadMode::NoWait).unwrap(),
            QueryReadback::NotReady
        );
        let second = ready(backend.read_timestamps(0, 0, 2, ReadMode::Wait).unwrap());
        assert!(second[0] > first[1]);
        assert!(backend.violations().is_empty(), "{:?}", backend.violations());
    }

    #[test]
    fn unreset_queries_still_read_as_the_previous_frame() {
        let mut backend = backend_with_scene();
        timed_dispatch(&mut backend, true);
        backend.wait_for_slot(0).unwrap();
        let first = ready(backend.read_timestamps(0, 0, 2, ReadMode::NoWait).unwrap());

        timed_dispatch(&mut backend, false);
        assert_eq!(
            backend.read_timestamps(0, 0, 2, ReadMode::NoWait).unwrap(),
            QueryReadback::Ready(first)
        );
        assert!(backend.violations().iter().any(|v| v.contains("written twice")));
    }

    #[test]
    fn resubmitting_a_busy_slot_is_flagged() {
        let mut backend = backend_with_scene();
        for _ in 0..2 {
            backend.begin_recording(0).unwrap();
            backend.end_recording().unwrap();
            backend.submit(0, 0).unwrap();
        }
        assert!(backend.violations().iter().any(|v| v.contains("fence")));
    }

    #[test]
    fn stale_acquire_and_minimized_surface() {
        let mut backend = backend_with_scene().stale_acquire_on(2);
        assert!(matches!(backend.acquire(0).unwrap(), AcquireOutcome::Acquired { image_index: 0 }));
        assert_eq!(backend.acquire(1).unwrap(), AcquireOutcome::Stale);

        backend.resize_surface(Extent::new(0, 0));
        assert!(!backend.recreate_surface().unwrap());
        assert_eq!(backend.acquire(0).unwrap(), AcquireOutcome::Stale);

        backend.resize_surface(Extent::new(48, 16));
        assert!(backend.recreate_surface().unwrap());
        assert_eq!(backend.extent(), Extent::new(48, 16));
        assert_eq!(backend.recreations(), 1);
    }
}
