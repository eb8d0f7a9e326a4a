//! Vulkan backend
//!
//! Vulkan 1.3 with `VK_KHR_acceleration_structure` and
//! `VK_KHR_ray_tracing_pipeline`. One graphics+compute queue that can
//! present carries every stage; ordering inside a frame comes only from
//! the barriers the orchestrator records.

mod accel;
mod context;
mod conv;
mod descriptors;
mod frame;
mod memory;
mod pipelines;
mod swapchain;

pub use context::VulkanContext;
pub use pipelines::RAY_RECURSION_DEPTH;

use crate::accel::{
    AccelerationStructureBuilder, BottomStructureHandle, StructureInstance, TopStructureHandle,
};
use crate::barrier::BarrierBatch;
use crate::device::{
    AcquireOutcome, CommandRecorder, Extent, PresentOutcome, QueryDevice, QueryRecorder,
    RenderBackend,
};
use crate::error::RenderError;
use crate::profiler::{QueryLimits, QueryReadback, ReadMode, TimestampStage};
use crate::resources::{GeometryHandle, GpuGeometry, SceneSetup};
use crate::state::{PipelineStages, ResourceId};
use crate::uniforms::{FrameUniforms, RasterPush};
use crate::{BackendType, DeviceCapabilities};
use accel::{GpuInstance, OwnedStructure, TriangleSource};
use ash::vk;
use conv::VkResultExt;
use descriptors::{Descriptors, ObjectAddresses};
use frame::{FrameSlot, PresentSemaphores};
use memory::{full_range, OwnedBuffer};
use pipelines::{Pipeline, ShaderBindingTable};
use std::path::PathBuf;
use swapchain::Swapchain;
use tandem_asset::MeshData;
use tandem_core::simulation::SimulationParams;
use tandem_metrics::PipelineCounts;
use tandem_services::Settings;
use winit::window::Window;

const CLEAR_COLOR: [f32; 4] = [0.02, 0.02, 0.03, 1.0];

struct GeometryBuffers {
    vertices: OwnedBuffer,
    indices: OwnedBuffer,
    vertex_count: u32,
    index_count: u32,
}

/// Buffers that exist once the scene is known
struct SceneBuffers {
    compute: Pipeline,
    compute_set: vk::DescriptorSet,
    simulation: OwnedBuffer,
    _address_table: OwnedBuffer,
}

pub struct VulkanBackend {
    capabilities: DeviceCapabilities,
    shader_dir: PathBuf,
    vsync: bool,
    window_extent: Extent,
    depth_format: vk::Format,
    /// Slot whose command buffer is being recorded
    recording: Option<usize>,
    /// Acquire reported a suboptimal surface; rebuild after presenting
    suboptimal: bool,

    // Dropped in declaration order, the context last
    scene: Option<SceneBuffers>,
    top: Option<OwnedStructure>,
    bottoms: Vec<OwnedStructure>,
    geometries: Vec<GeometryBuffers>,
    sbt: ShaderBindingTable,
    ray_trace: Pipeline,
    raster: Pipeline,
    present_semaphores: PresentSemaphores,
    frames: Vec<FrameSlot>,
    swapchain: Swapchain,
    descriptors: Descriptors,
    ctx: VulkanContext,
}

impl VulkanBackend {
    pub fn new(window: &Window, settings: &Settings) -> Result<Self, RenderError> {
        let ctx = VulkanContext::new(window, settings.graphics.validation)?;
        let size = window.inner_size();
        let window_extent = Extent::new(size.width, size.height);

        let depth_format = frame::choose_depth_format(|format| {
            ctx.format_supports(
                format,
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT | vk::FormatFeatureFlags::SAMPLED_IMAGE,
            )
        })
        .ok_or_else(|| RenderError::MissingCapability("sampleable depth format".into()))?;

        let swapchain = Swapchain::new(&ctx, window_extent, settings.graphics.vsync, vk::SwapchainKHR::null())?
            .ok_or_else(|| RenderError::InvalidState("window has zero area at startup".into()))?;

        let shader_dir = settings.paths.shader_dir.clone();
        let descriptors = Descriptors::new(&ctx)?;
        let raster = pipelines::create_raster(
            &ctx,
            &shader_dir,
            descriptors.raster_layout,
            swapchain.format.format,
            depth_format,
        )?;
        let ray_trace =
            pipelines::create_ray_tracing(&ctx, &shader_dir, descriptors.ray_trace_layout, swapchain.is_bgra())?;
        let sbt = ShaderBindingTable::new(&ctx, &ray_trace)?;

        let slots = settings.graphics.frames_in_flight;
        let mut frames = Vec::with_capacity(slots);
        for _ in 0..slots {
            let mut slot = FrameSlot::new(&ctx, settings.profiler.max_queries)?;
            slot.create_images(&ctx, swapchain.extent, swapchain.format.format, depth_format)?;
            frames.push(slot);
        }
        let present_semaphores = PresentSemaphores::new(&ctx, swapchain.image_count())?;

        let period = ctx.timestamp_period();
        let capabilities = DeviceCapabilities {
            backend: BackendType::Vulkan,
            device_name: ctx.device_name.clone(),
            ray_tracing: true,
            timestamps: ctx.timestamp_valid_bits > 0 && period > 0.0,
            pipeline_statistics: ctx.pipeline_statistics,
            timestamp_period_ns: f64::from(period),
            timestamp_valid_bits: ctx.timestamp_valid_bits,
            max_ray_recursion_depth: ctx.ray_tracing.max_recursion_depth,
        };

        tracing::info!(
            device = %capabilities.device_name,
            frames_in_flight = slots,
            depth = ?depth_format,
            timestamps = capabilities.timestamps,
            "Vulkan backend ready"
        );

        Ok(Self {
            capabilities,
            shader_dir,
            vsync: settings.graphics.vsync,
            window_extent,
            depth_format,
            recording: None,
            suboptimal: false,
            scene: None,
            top: None,
            bottoms: Vec::new(),
            geometries: Vec::new(),
            sbt,
            ray_trace,
            raster,
            present_semaphores,
            frames,
            swapchain,
            descriptors,
            ctx,
        })
    }

    /// Window size to fall back on when the surface does not dictate one
    pub fn set_window_extent(&mut self, extent: Extent) {
        self.window_extent = extent;
    }

    pub fn context(&self) -> &VulkanContext {
        &self.ctx
    }

    fn recording_slot(&self) -> Option<(vk::CommandBuffer, &FrameSlot)> {
        let slot = self.frames.get(self.recording?)?;
        Some((slot.command_buffer, slot))
    }

    fn image(&self, id: ResourceId) -> Option<(vk::Image, vk::ImageAspectFlags)> {
        match id {
            ResourceId::Swapchain(index) => self
                .swapchain
                .images
                .get(index as usize)
                .map(|&image| (image, vk::ImageAspectFlags::COLOR)),
            ResourceId::Canvas(slot) => self.frames.get(slot)?.canvas.as_ref().map(|c| (c.image, c.aspect)),
            ResourceId::Depth(slot) => self.frames.get(slot)?.depth.as_ref().map(|d| (d.image, d.aspect)),
            ResourceId::SimulationBuffer => None,
        }
    }

    fn rebind_images(&self) {
        for slot in &self.frames {
            if slot.ray_trace_set == vk::DescriptorSet::null() {
                continue;
            }
            if let (Some(canvas), Some(depth)) = (&slot.canvas, &slot.depth) {
                self.descriptors
                    .write_ray_trace_images(slot.ray_trace_set, canvas.view, depth.view);
            }
        }
    }

    fn read_pool<T: Copy + Default>(
        &self,
        pool: vk::QueryPool,
        first: u32,
        count: u32,
        mode: ReadMode,
    ) -> Result<QueryReadback<Vec<T>>, RenderError> {
        let mut data = vec![T::default(); count as usize];
        let mut flags = vk::QueryResultFlags::TYPE_64;
        if mode == ReadMode::Wait {
            flags |= vk::QueryResultFlags::WAIT;
        }
        match unsafe { self.ctx.device.get_query_pool_results(pool, first, &mut data, flags) } {
            Ok(()) => Ok(QueryReadback::Ready(data)),
            Err(vk::Result::NOT_READY) => Ok(QueryReadback::NotReady),
            Err(e) => Err(e).gpu("vkGetQueryPoolResults"),
        }
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        if let Err(e) = unsafe { self.ctx.device.device_wait_idle() } {
            tracing::error!("device wait on shutdown failed: {e:?}");
        }
    }
}

impl QueryRecorder for VulkanBackend {
    fn reset_queries(&mut self, first: u32, count: u32) {
        let Some((_, slot)) = self.recording_slot() else {
            return;
        };
        // On the host: until this frame executes, reads see unavailable
        // queries, never the previous frame's results
        let count = count.min(slot.query_capacity.saturating_sub(first));
        unsafe {
            self.ctx.device.reset_query_pool(slot.timestamps, first, count);
            if let Some(pool) = slot.statistics {
                self.ctx.device.reset_query_pool(pool, first, count);
            }
        }
    }

    fn write_timestamp(&mut self, stage: TimestampStage, query: u32) {
        let Some((cmd, slot)) = self.recording_slot() else {
            return;
        };
        let stage = match stage {
            TimestampStage::TopOfPipe => vk::PipelineStageFlags::TOP_OF_PIPE,
            TimestampStage::BottomOfPipe => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        };
        unsafe {
            self.ctx
                .device
                .cmd_write_timestamp(cmd, stage, slot.timestamps, query);
        }
    }

    fn begin_statistics(&mut self, query: u32) {
        let Some((cmd, slot)) = self.recording_slot() else {
            return;
        };
        if let Some(pool) = slot.statistics {
            unsafe {
                self.ctx
                    .device
                    .cmd_begin_query(cmd, pool, query, vk::QueryControlFlags::empty());
            }
        }
    }

    fn end_statistics(&mut self, query: u32) {
        let Some((cmd, slot)) = self.recording_slot() else {
            return;
        };
        if let Some(pool) = slot.statistics {
            unsafe { self.ctx.device.cmd_end_query(cmd, pool, query) };
        }
    }
}

impl QueryDevice for VulkanBackend {
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
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        self.read_pool(frame.timestamps, first, count, mode)
    }

    fn read_statistics(
        &self,
        slot: usize,
        first: u32,
        count: u32,
        mode: ReadMode,
    ) -> Result<QueryReadback<Vec<PipelineCounts>>, RenderError> {
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        let Some(pool) = frame.statistics else {
            return Err(RenderError::MissingCapability("pipeline statistics queries".into()));
        };
        let raw = self.read_pool::<[u64; 2]>(pool, first, count, mode)?;
        Ok(match raw {
            QueryReadback::Ready(values) => QueryReadback::Ready(
                values
                    .into_iter()
                    .map(|[input_primitives, vertex_invocations]| PipelineCounts {
                        input_primitives,
                        vertex_invocations,
                    })
                    .collect(),
            ),
            QueryReadback::NotReady => QueryReadback::NotReady,
        })
    }
}

impl CommandRecorder for VulkanBackend {
    fn pipeline_barrier(&mut self, batch: &BarrierBatch) {
        let Some((cmd, _)) = self.recording_slot() else {
            return;
        };

        let mut buffer_barriers = Vec::with_capacity(batch.buffers.len());
        for barrier in &batch.buffers {
            let Some(scene) = &self.scene else {
                continue;
            };
            buffer_barriers.push(
                vk::BufferMemoryBarrier::default()
                    .src_access_mask(conv::access(barrier.src_access))
                    .dst_access_mask(conv::access(barrier.dst_access))
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .buffer(scene.simulation.buffer)
                    .offset(0)
                    .size(vk::WHOLE_SIZE),
            );
        }

        let mut image_barriers = Vec::with_capacity(batch.images.len());
        for barrier in &batch.images {
            let Some((image, aspect)) = self.image(barrier.resource) else {
                tracing::warn!(resource = ?barrier.resource, "barrier on a missing image");
                continue;
            };
            let old = barrier.old_layout.map(conv::layout).unwrap_or(vk::ImageLayout::UNDEFINED);
            let new = barrier.new_layout.map(conv::layout).unwrap_or(old);
            image_barriers.push(
                vk::ImageMemoryBarrier::default()
                    .src_access_mask(conv::access(barrier.src_access))
                    .dst_access_mask(conv::access(barrier.dst_access))
                    .old_layout(old)
                    .new_layout(new)
                    .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
                    .image(image)
                    .subresource_range(full_range(aspect)),
            );
        }

        if buffer_barriers.is_empty() && image_barriers.is_empty() {
            return;
        }

        let src = if batch.src_stages.is_empty() {
            PipelineStages::TOP_OF_PIPE
        } else {
            batch.src_stages
        };
        let dst = if batch.dst_stages.is_empty() {
            PipelineStages::BOTTOM_OF_PIPE
        } else {
            batch.dst_stages
        };

        unsafe {
            self.ctx.device.cmd_pipeline_barrier(
                cmd,
                conv::stages(src),
                conv::stages(dst),
                vk::DependencyFlags::empty(),
                &[],
                &buffer_barriers,
                &image_barriers,
            );
        }
    }

    fn dispatch_simulation(&mut self, params: &SimulationParams, groups: u32) {
        let (Some((cmd, _)), Some(scene)) = (self.recording_slot(), &self.scene) else {
            return;
        };
        let device = &self.ctx.device;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, scene.compute.handle);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                scene.compute.layout,
                0,
                &[scene.compute_set],
                &[],
            );
            device.cmd_push_constants(
                cmd,
                scene.compute.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(params),
            );
            device.cmd_dispatch(cmd, groups, 1, 1);
        }
    }

    fn begin_raster(&mut self, image_index: u32, extent: Extent) {
        let Some((cmd, slot)) = self.recording_slot() else {
            return;
        };
        let (Some(&color_view), Some(depth)) =
            (self.swapchain.views.get(image_index as usize), slot.depth.as_ref())
        else {
            tracing::warn!(image_index, "raster targets missing");
            return;
        };

        let color_attachments = [vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue { float32: CLEAR_COLOR },
            })];
        // Stored: the ray-trace stage samples it
        let depth_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(depth.view)
            .image_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue { depth: 1.0, stencil: 0 },
            });
        let area = vk::Rect2D {
            offset: vk::Offset2D { x: 0, y: 0 },
            extent: conv::extent_2d(extent),
        };
        let rendering = vk::RenderingInfo::default()
            .render_area(area)
            .layer_count(1)
            .color_attachments(&color_attachments)
            .depth_attachment(&depth_attachment);

        let viewport = vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: extent.width as f32,
            height: extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        };

        let device = &self.ctx.device;
        unsafe {
            device.cmd_begin_rendering(cmd, &rendering);
            device.cmd_set_viewport(cmd, 0, &[viewport]);
            device.cmd_set_scissor(cmd, 0, &[area]);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.raster.handle);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::GRAPHICS,
                self.raster.layout,
                0,
                &[slot.raster_set],
                &[],
            );
        }
    }

    fn draw_object(&mut self, geometry: &GpuGeometry, push: &RasterPush) {
        let Some((cmd, _)) = self.recording_slot() else {
            return;
        };
        let Some(buffers) = self.geometries.get(geometry.handle.0 as usize) else {
            tracing::warn!(handle = geometry.handle.0, "draw with unknown geometry");
            return;
        };
        let device = &self.ctx.device;
        unsafe {
            device.cmd_bind_vertex_buffers(cmd, 0, &[buffers.vertices.buffer], &[0]);
            device.cmd_bind_index_buffer(cmd, buffers.indices.buffer, 0, vk::IndexType::UINT32);
            device.cmd_push_constants(
                cmd,
                self.raster.layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                bytemuck::bytes_of(push),
            );
            device.cmd_draw_indexed(cmd, buffers.index_count, 1, 0, 0, 0);
        }
    }

    fn end_raster(&mut self) {
        if let Some((cmd, _)) = self.recording_slot() {
            unsafe { self.ctx.device.cmd_end_rendering(cmd) };
        }
    }

    fn copy_image(&mut self, src: ResourceId, dst: ResourceId, extent: Extent) {
        let Some((cmd, _)) = self.recording_slot() else {
            return;
        };
        let (Some((src_image, _)), Some((dst_image, _))) = (self.image(src), self.image(dst)) else {
            tracing::warn!(?src, ?dst, "copy between missing images");
            return;
        };
        let layers = vk::ImageSubresourceLayers::default()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);
        let region = vk::ImageCopy::default()
            .src_subresource(layers)
            .dst_subresource(layers)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            });
        unsafe {
            self.ctx.device.cmd_copy_image(
                cmd,
                src_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }
    }

    fn trace_rays(&mut self, extent: Extent) {
        let Some((cmd, slot)) = self.recording_slot() else {
            return;
        };
        if slot.ray_trace_set == vk::DescriptorSet::null() {
            return;
        }
        let device = &self.ctx.device;
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::RAY_TRACING_KHR, self.ray_trace.handle);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::RAY_TRACING_KHR,
                self.ray_trace.layout,
                0,
                &[slot.ray_trace_set],
                &[],
            );
            self.ctx.ray_tracing.pipeline.cmd_trace_rays(
                cmd,
                &self.sbt.raygen,
                &self.sbt.miss,
                &self.sbt.hit,
                &self.sbt.callable,
                extent.width,
                extent.height,
                1,
            );
        }
    }
}

impl AccelerationStructureBuilder for VulkanBackend {
    fn build_bottom(&mut self, geometry: &GpuGeometry) -> Result<BottomStructureHandle, RenderError> {
        let buffers = self.geometries.get(geometry.handle.0 as usize).ok_or_else(|| {
            RenderError::InvalidState(format!("unknown geometry {}", geometry.handle.0))
        })?;
        let source = TriangleSource {
            vertex_address: buffers.vertices.address,
            index_address: buffers.indices.address,
            vertex_count: buffers.vertex_count,
            index_count: buffers.index_count,
        };
        let structure = accel::build_bottom(&self.ctx, &source)?;
        self.bottoms.push(structure);
        Ok(BottomStructureHandle(self.bottoms.len() as u32 - 1))
    }

    fn build_top(&mut self, instances: &[StructureInstance]) -> Result<TopStructureHandle, RenderError> {
        let gpu_instances = instances
            .iter()
            .map(|instance| {
                let bottom = self.bottoms.get(instance.bottom.0 as usize).ok_or_else(|| {
                    RenderError::InvalidState(format!(
                        "instance references unknown bottom structure {}",
                        instance.bottom.0
                    ))
                })?;
                Ok(GpuInstance::new(instance, bottom.address))
            })
            .collect::<Result<Vec<_>, RenderError>>()?;

        self.top = Some(accel::build_top(&self.ctx, &gpu_instances)?);
        Ok(TopStructureHandle(0))
    }
}

impl RenderBackend for VulkanBackend {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    fn extent(&self) -> Extent {
        self.swapchain.extent()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<(), RenderError> {
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        unsafe { self.ctx.device.wait_for_fences(&[frame.fence], true, u64::MAX) }
            .gpu("vkWaitForFences")
    }

    fn acquire(&mut self, slot: usize) -> Result<AcquireOutcome, RenderError> {
        let semaphore = self
            .frames
            .get(slot)
            .map(|frame| frame.image_available)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        let result = unsafe {
            self.ctx.swapchain_loader.acquire_next_image(
                self.swapchain.handle,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match result {
            Ok((image_index, suboptimal)) => {
                // The semaphore is signaled either way; finish this frame
                self.suboptimal |= suboptimal;
                Ok(AcquireOutcome::Acquired { image_index })
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::Stale),
            Err(e) => Err(e).gpu("vkAcquireNextImageKHR"),
        }
    }

    fn recreate_surface(&mut self) -> Result<bool, RenderError> {
        self.wait_idle()?;

        let Some(swapchain) =
            Swapchain::new(&self.ctx, self.window_extent, self.vsync, self.swapchain.handle)?
        else {
            return Ok(false);
        };

        let format_changed = swapchain.format.format != self.swapchain.format.format;
        let image_count_changed = swapchain.image_count() != self.swapchain.image_count();
        tracing::info!(
            old = ?self.swapchain.extent,
            new = ?swapchain.extent,
            "swapchain recreated"
        );
        self.swapchain = swapchain;
        self.suboptimal = false;

        if format_changed {
            tracing::info!(format = ?self.swapchain.format.format, "surface format changed, rebuilding pipelines");
            self.raster = pipelines::create_raster(
                &self.ctx,
                &self.shader_dir,
                self.descriptors.raster_layout,
                self.swapchain.format.format,
                self.depth_format,
            )?;
            self.ray_trace = pipelines::create_ray_tracing(
                &self.ctx,
                &self.shader_dir,
                self.descriptors.ray_trace_layout,
                self.swapchain.is_bgra(),
            )?;
            self.sbt = ShaderBindingTable::new(&self.ctx, &self.ray_trace)?;
        }
        if image_count_changed {
            self.present_semaphores = PresentSemaphores::new(&self.ctx, self.swapchain.image_count())?;
        }

        for slot in &mut self.frames {
            slot.create_images(
                &self.ctx,
                self.swapchain.extent,
                self.swapchain.format.format,
                self.depth_format,
            )?;
        }
        self.rebind_images();
        Ok(true)
    }

    fn write_uniforms(&mut self, slot: usize, uniforms: &FrameUniforms) -> Result<(), RenderError> {
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        frame.write_uniforms(&uniforms.raster, &uniforms.ray_trace)
    }

    fn begin_recording(&mut self, slot: usize) -> Result<(), RenderError> {
        if let Some(current) = self.recording {
            return Err(RenderError::InvalidState(format!(
                "slot {current} is still recording"
            )));
        }
        let cmd = self
            .frames
            .get(slot)
            .map(|frame| frame.command_buffer)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            self.ctx
                .device
                .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
                .gpu("vkResetCommandBuffer")?;
            self.ctx
                .device
                .begin_command_buffer(cmd, &begin)
                .gpu("vkBeginCommandBuffer")?;
        }
        self.recording = Some(slot);
        Ok(())
    }

    fn end_recording(&mut self) -> Result<(), RenderError> {
        let (cmd, _) = self
            .recording_slot()
            .ok_or_else(|| RenderError::InvalidState("nothing is recording".into()))?;
        self.recording = None;
        unsafe { self.ctx.device.end_command_buffer(cmd) }.gpu("vkEndCommandBuffer")
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<(), RenderError> {
        let frame = self
            .frames
            .get(slot)
            .ok_or_else(|| RenderError::InvalidState(format!("no frame slot {slot}")))?;
        let render_finished = *self
            .present_semaphores
            .handles
            .get(image_index as usize)
            .ok_or_else(|| RenderError::InvalidState(format!("no swapchain image {image_index}")))?;

        let wait = [frame.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let commands = [frame.command_buffer];
        let signal = [render_finished];
        let submit = vk::SubmitInfo::default()
            .wait_semaphores(&wait)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&commands)
            .signal_semaphores(&signal);

        unsafe {
            self.ctx.device.reset_fences(&[frame.fence]).gpu("vkResetFences")?;
            self.ctx
                .device
                .queue_submit(self.ctx.queue, &[submit], frame.fence)
                .gpu("vkQueueSubmit")
        }
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> Result<PresentOutcome, RenderError> {
        let render_finished = *self
            .present_semaphores
            .handles
            .get(image_index as usize)
            .ok_or_else(|| RenderError::InvalidState(format!("no swapchain image {image_index}")))?;
        let wait = [render_finished];
        let swapchains = [self.swapchain.handle];
        let indices = [image_index];
        let present = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait)
            .swapchains(&swapchains)
            .image_indices(&indices);

        match unsafe { self.ctx.swapchain_loader.queue_present(self.ctx.queue, &present) } {
            Ok(suboptimal) if suboptimal || self.suboptimal => Ok(PresentOutcome::Stale),
            Ok(_) => Ok(PresentOutcome::Presented),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::Stale),
            Err(e) => Err(e).gpu("vkQueuePresentKHR"),
        }
    }

    fn upload_geometry(&mut self, mesh: &MeshData) -> Result<GpuGeometry, RenderError> {
        let shared = vk::BufferUsageFlags::STORAGE_BUFFER
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR;
        let vertices = OwnedBuffer::device_local_with(
            &self.ctx,
            &mesh.vertices,
            shared | vk::BufferUsageFlags::VERTEX_BUFFER,
        )?;
        let indices = OwnedBuffer::device_local_with(
            &self.ctx,
            &mesh.indices,
            shared | vk::BufferUsageFlags::INDEX_BUFFER,
        )?;

        let handle = GeometryHandle(self.geometries.len() as u32);
        self.geometries.push(GeometryBuffers {
            vertices,
            indices,
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        });
        Ok(GpuGeometry {
            handle,
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        })
    }

    fn create_scene_resources(&mut self, setup: &SceneSetup) -> Result<(), RenderError> {
        if self.scene.is_some() {
            return Err(RenderError::InvalidState("scene resources already exist".into()));
        }
        let top = self
            .top
            .as_ref()
            .filter(|_| setup.top == TopStructureHandle(0))
            .map(|top| top.handle)
            .ok_or_else(|| RenderError::InvalidState("top-level structure not built".into()))?;

        let simulation = OwnedBuffer::device_local_with(
            &self.ctx,
            &setup.initial_states,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?;

        let addresses = setup
            .object_geometry
            .iter()
            .map(|&geometry| {
                let handle = setup
                    .geometries
                    .get(geometry)
                    .map(|g| g.handle.0 as usize)
                    .ok_or_else(|| RenderError::InvalidState(format!("unknown geometry {geometry}")))?;
                let buffers = self
                    .geometries
                    .get(handle)
                    .ok_or_else(|| RenderError::InvalidState(format!("geometry {handle} not uploaded")))?;
                Ok(ObjectAddresses {
                    vertex_address: buffers.vertices.address,
                    index_address: buffers.indices.address,
                })
            })
            .collect::<Result<Vec<_>, RenderError>>()?;
        let address_table = OwnedBuffer::device_local_with(
            &self.ctx,
            &addresses,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )?;

        let compute = pipelines::create_compute(
            &self.ctx,
            &self.shader_dir,
            self.descriptors.compute_layout,
            &setup.bounds,
        )?;

        let slots = self.frames.len();
        let compute_set = self
            .descriptors
            .allocate(&self.ctx, self.descriptors.compute_layout, 1)?[0];
        let raster_sets = self
            .descriptors
            .allocate(&self.ctx, self.descriptors.raster_layout, slots)?;
        let ray_trace_sets = self
            .descriptors
            .allocate(&self.ctx, self.descriptors.ray_trace_layout, slots)?;

        self.descriptors.write_compute(compute_set, simulation.buffer);
        for ((slot, raster_set), ray_trace_set) in self.frames.iter_mut().zip(raster_sets).zip(ray_trace_sets) {
            self.descriptors
                .write_raster(raster_set, slot.raster_uniforms.buffer, simulation.buffer);
            self.descriptors.write_ray_trace_scene(
                ray_trace_set,
                top,
                slot.ray_trace_uniforms.buffer,
                simulation.buffer,
                address_table.buffer,
            );
            slot.raster_set = raster_set;
            slot.ray_trace_set = ray_trace_set;
        }

        self.scene = Some(SceneBuffers {
            compute,
            compute_set,
            simulation,
            _address_table: address_table,
        });
        self.rebind_images();

        tracing::debug!(objects = setup.initial_states.len(), "scene descriptors written");
        Ok(())
    }

    fn wait_idle(&mut self) -> Result<(), RenderError> {
        unsafe { self.ctx.device.device_wait_idle() }.gpu("vkDeviceWaitIdle")
    }
}
