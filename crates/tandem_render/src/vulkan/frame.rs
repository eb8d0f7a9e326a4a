//! Per-slot frame resources

use super::context::VulkanContext;
use super::conv::VkResultExt;
use super::memory::{OwnedBuffer, OwnedImage};
use crate::error::RenderError;
use crate::uniforms::{RasterUniforms, RayTraceUniforms};
use ash::vk;

/// Depth formats in order of preference; each must also be sampleable
pub const DEPTH_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

pub fn choose_depth_format(supported: impl Fn(vk::Format) -> bool) -> Option<vk::Format> {
    DEPTH_CANDIDATES.into_iter().find(|&format| supported(format))
}

pub fn depth_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D32_SFLOAT_S8_UINT | vk::Format::D24_UNORM_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        _ => vk::ImageAspectFlags::DEPTH,
    }
}

/// Primitives in, vertex invocations; results come back in bit order
pub const STATISTICS: vk::QueryPipelineStatisticFlags = vk::QueryPipelineStatisticFlags::from_raw(
    vk::QueryPipelineStatisticFlags::INPUT_ASSEMBLY_PRIMITIVES.as_raw()
        | vk::QueryPipelineStatisticFlags::VERTEX_SHADER_INVOCATIONS.as_raw(),
);

/// Everything one in-flight frame owns
pub struct FrameSlot {
    device: ash::Device,
    pub command_buffer: vk::CommandBuffer,
    /// Signaled when the slot's last submission has finished
    pub fence: vk::Fence,
    pub image_available: vk::Semaphore,
    pub timestamps: vk::QueryPool,
    pub statistics: Option<vk::QueryPool>,
    pub query_capacity: u32,
    pub raster_uniforms: OwnedBuffer,
    pub ray_trace_uniforms: OwnedBuffer,
    pub canvas: Option<OwnedImage>,
    pub depth: Option<OwnedImage>,
    pub raster_set: vk::DescriptorSet,
    pub ray_trace_set: vk::DescriptorSet,
}

impl FrameSlot {
    pub fn new(ctx: &VulkanContext, query_capacity: u32) -> Result<Self, RenderError> {
        let device = &ctx.device;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(ctx.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .gpu("vkAllocateCommandBuffers")?[0];

        let raster_uniforms = OwnedBuffer::host(
            ctx,
            std::mem::size_of::<RasterUniforms>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;
        let ray_trace_uniforms = OwnedBuffer::host(
            ctx,
            std::mem::size_of::<RayTraceUniforms>() as vk::DeviceSize,
            vk::BufferUsageFlags::UNIFORM_BUFFER,
        )?;

        let mut slot = Self {
            device: device.clone(),
            command_buffer,
            fence: vk::Fence::null(),
            image_available: vk::Semaphore::null(),
            timestamps: vk::QueryPool::null(),
            statistics: None,
            query_capacity,
            raster_uniforms,
            ray_trace_uniforms,
            canvas: None,
            depth: None,
            raster_set: vk::DescriptorSet::null(),
            ray_trace_set: vk::DescriptorSet::null(),
        };

        // Signaled so the first wait on a fresh slot returns immediately
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        slot.fence = unsafe { device.create_fence(&fence_info, None) }.gpu("vkCreateFence")?;
        slot.image_available = unsafe {
            device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
        }
        .gpu("vkCreateSemaphore")?;

        let timestamp_info = vk::QueryPoolCreateInfo::default()
            .query_type(vk::QueryType::TIMESTAMP)
            .query_count(query_capacity);
        slot.timestamps =
            unsafe { device.create_query_pool(&timestamp_info, None) }.gpu("vkCreateQueryPool")?;

        if ctx.pipeline_statistics {
            let statistics_info = vk::QueryPoolCreateInfo::default()
                .query_type(vk::QueryType::PIPELINE_STATISTICS)
                .query_count(query_capacity)
                .pipeline_statistics(STATISTICS);
            slot.statistics = Some(
                unsafe { device.create_query_pool(&statistics_info, None) }
                    .gpu("vkCreateQueryPool")?,
            );
        }

        Ok(slot)
    }

    /// (Re)create the canvas and depth images for a new surface size
    pub fn create_images(
        &mut self,
        ctx: &VulkanContext,
        extent: vk::Extent2D,
        canvas_format: vk::Format,
        depth_format: vk::Format,
    ) -> Result<(), RenderError> {
        self.canvas = None;
        self.depth = None;
        self.canvas = Some(OwnedImage::new(
            ctx,
            extent,
            canvas_format,
            vk::ImageUsageFlags::STORAGE
                | vk::ImageUsageFlags::TRANSFER_SRC
                | vk::ImageUsageFlags::TRANSFER_DST,
            vk::ImageAspectFlags::COLOR,
        )?);
        self.depth = Some(OwnedImage::new(
            ctx,
            extent,
            depth_format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            depth_aspect(depth_format),
        )?);
        Ok(())
    }

    pub fn write_uniforms(
        &self,
        raster: &RasterUniforms,
        ray_trace: &RayTraceUniforms,
    ) -> Result<(), RenderError> {
        self.raster_uniforms.write(0, std::slice::from_ref(raster))?;
        self.ray_trace_uniforms.write(0, std::slice::from_ref(ray_trace))
    }
}

impl Drop for FrameSlot {
    fn drop(&mut self) {
        unsafe {
            if let Some(pool) = self.statistics {
                self.device.destroy_query_pool(pool, None);
            }
            self.device.destroy_query_pool(self.timestamps, None);
            self.device.destroy_semaphore(self.image_available, None);
            self.device.destroy_fence(self.fence, None);
        }
    }
}

/// Render-finished semaphores, one per swapchain image. Presentation of an
/// image waits on its own semaphore, which stays valid until that image is
/// acquired again.
pub struct PresentSemaphores {
    device: ash::Device,
    pub handles: Vec<vk::Semaphore>,
}

impl PresentSemaphores {
    pub fn new(ctx: &VulkanContext, count: u32) -> Result<Self, RenderError> {
        let mut set = Self {
            device: ctx.device.clone(),
            handles: Vec::with_capacity(count as usize),
        };
        for _ in 0..count {
            let semaphore = unsafe {
                ctx.device
                    .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
            }
            .gpu("vkCreateSemaphore")?;
            set.handles.push(semaphore);
        }
        Ok(set)
    }
}

impl Drop for PresentSemaphores {
    fn drop(&mut self) {
        for &semaphore in &self.handles {
            unsafe { self.device.destroy_semaphore(semaphore, None) };
        }
    }
}
