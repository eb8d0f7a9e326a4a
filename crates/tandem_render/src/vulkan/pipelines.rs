//! Compute, raster and ray-tracing pipelines plus the shader binding table
//!
//! SPIR-V is loaded from the shader directory at startup; `shaders/compile.sh`
//! produces it from the GLSL sources.

use super::context::VulkanContext;
use super::conv::VkResultExt;
use super::memory::{align_up, OwnedBuffer};
use crate::error::RenderError;
use crate::uniforms::RasterPush;
use ash::vk;
use std::path::Path;
use tandem_asset::{NORMAL_OFFSET, VERTEX_STRIDE};
use tandem_core::simulation::{SimulationBounds, SimulationParams};

pub const SIMULATION_SHADER: &str = "simulation.comp.spv";
pub const RASTER_VERTEX_SHADER: &str = "raster.vert.spv";
pub const RASTER_FRAGMENT_SHADER: &str = "raster.frag.spv";
pub const RAYGEN_SHADER: &str = "raygen.rgen.spv";
pub const MISS_SHADER: &str = "miss.rmiss.spv";
pub const SHADOW_MISS_SHADER: &str = "shadow.rmiss.spv";
pub const CLOSEST_HIT_SHADER: &str = "closesthit.rchit.spv";

/// Primary rays plus one level of shadow rays from hit shaders
pub const RAY_RECURSION_DEPTH: u32 = 2;

const MISS_GROUPS: u32 = 2;
const HIT_GROUPS: u32 = 1;

pub struct Pipeline {
    device: ash::Device,
    pub handle: vk::Pipeline,
    pub layout: vk::PipelineLayout,
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_pipeline(self.handle, None);
            self.device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

/// Shader module destroyed as soon as the pipeline using it exists
struct ShaderModule<'a> {
    device: &'a ash::Device,
    handle: vk::ShaderModule,
}

impl<'a> ShaderModule<'a> {
    fn load(device: &'a ash::Device, dir: &Path, name: &str) -> Result<Self, RenderError> {
        let path = dir.join(name);
        let code = std::fs::File::open(&path)
            .and_then(|mut file| ash::util::read_spv(&mut file))
            .map_err(|source| RenderError::Shader { path, source })?;
        let info = vk::ShaderModuleCreateInfo::default().code(&code);
        let handle = unsafe { device.create_shader_module(&info, None) }.gpu("vkCreateShaderModule")?;
        Ok(Self { device, handle })
    }
}

impl Drop for ShaderModule<'_> {
    fn drop(&mut self) {
        unsafe { self.device.destroy_shader_module(self.handle, None) };
    }
}

fn pipeline_layout(
    device: &ash::Device,
    set_layout: vk::DescriptorSetLayout,
    push: Option<vk::PushConstantRange>,
) -> Result<vk::PipelineLayout, RenderError> {
    let set_layouts = [set_layout];
    let push_ranges: Vec<vk::PushConstantRange> = push.into_iter().collect();
    let info = vk::PipelineLayoutCreateInfo::default()
        .set_layouts(&set_layouts)
        .push_constant_ranges(&push_ranges);
    unsafe { device.create_pipeline_layout(&info, None) }.gpu("vkCreatePipelineLayout")
}

/// Simulation kernel. The box bounds are specialization constants 0..=2.
pub fn create_compute(
    ctx: &VulkanContext,
    shader_dir: &Path,
    set_layout: vk::DescriptorSetLayout,
    bounds: &SimulationBounds,
) -> Result<Pipeline, RenderError> {
    let device = &ctx.device;
    let module = ShaderModule::load(device, shader_dir, SIMULATION_SHADER)?;

    let push = vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .size(std::mem::size_of::<SimulationParams>() as u32);
    let layout = pipeline_layout(device, set_layout, Some(push))?;

    let constants = [bounds.half_extent, bounds.floor, bounds.ceiling];
    let entries: Vec<vk::SpecializationMapEntry> = (0..constants.len() as u32)
        .map(|id| {
            vk::SpecializationMapEntry::default()
                .constant_id(id)
                .offset(id * 4)
                .size(4)
        })
        .collect();
    let specialization = vk::SpecializationInfo::default()
        .map_entries(&entries)
        .data(bytemuck::cast_slice(&constants));

    let stage = vk::PipelineShaderStageCreateInfo::default()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module.handle)
        .name(c"main")
        .specialization_info(&specialization);
    let info = vk::ComputePipelineCreateInfo::default().stage(stage).layout(layout);

    let handle = unsafe { device.create_compute_pipelines(vk::PipelineCache::null(), &[info], None) }
        .map_err(|(_, e)| e)
        .gpu("vkCreateComputePipelines");
    finish(device, handle, layout)
}

/// Forward pass into the swapchain image through dynamic rendering
pub fn create_raster(
    ctx: &VulkanContext,
    shader_dir: &Path,
    set_layout: vk::DescriptorSetLayout,
    color_format: vk::Format,
    depth_format: vk::Format,
) -> Result<Pipeline, RenderError> {
    let device = &ctx.device;
    let vert = ShaderModule::load(device, shader_dir, RASTER_VERTEX_SHADER)?;
    let frag = ShaderModule::load(device, shader_dir, RASTER_FRAGMENT_SHADER)?;

    let push = vk::PushConstantRange::default()
        .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
        .size(std::mem::size_of::<RasterPush>() as u32);
    let layout = pipeline_layout(device, set_layout, Some(push))?;

    let stages = [
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert.handle)
            .name(c"main"),
        vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag.handle)
            .name(c"main"),
    ];

    let bindings = [vk::VertexInputBindingDescription::default()
        .binding(0)
        .stride(VERTEX_STRIDE as u32)
        .input_rate(vk::VertexInputRate::VERTEX)];
    let attributes = [
        vk::VertexInputAttributeDescription::default()
            .location(0)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(0),
        vk::VertexInputAttributeDescription::default()
            .location(1)
            .binding(0)
            .format(vk::Format::R32G32B32_SFLOAT)
            .offset(NORMAL_OFFSET as u32),
    ];
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
    let viewport = vk::PipelineViewportStateCreateInfo::default()
        .viewport_count(1)
        .scissor_count(1);
    let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);
    let multisample = vk::PipelineMultisampleStateCreateInfo::default()
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);
    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(true)
        .depth_write_enable(true)
        .depth_compare_op(vk::CompareOp::LESS);
    let blend_attachments = [vk::PipelineColorBlendAttachmentState::default()
        .color_write_mask(vk::ColorComponentFlags::RGBA)];
    let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

    let color_formats = [color_format];
    let mut rendering = vk::PipelineRenderingCreateInfo::default()
        .color_attachment_formats(&color_formats)
        .depth_attachment_format(depth_format);

    let info = vk::GraphicsPipelineCreateInfo::default()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic)
        .layout(layout)
        .push_next(&mut rendering);

    let handle = unsafe { device.create_graphics_pipelines(vk::PipelineCache::null(), &[info], None) }
        .map_err(|(_, e)| e)
        .gpu("vkCreateGraphicsPipelines");
    finish(device, handle, layout)
}

/// Ray-generation, primary miss, shadow miss and one triangle hit group.
/// Specialization constant 0 tells the shaders the canvas is BGRA.
pub fn create_ray_tracing(
    ctx: &VulkanContext,
    shader_dir: &Path,
    set_layout: vk::DescriptorSetLayout,
    canvas_bgra: bool,
) -> Result<Pipeline, RenderError> {
    let rt = &ctx.ray_tracing;
    if rt.max_recursion_depth < RAY_RECURSION_DEPTH {
        return Err(RenderError::MissingCapability(format!(
            "ray recursion depth {RAY_RECURSION_DEPTH} (device allows {})",
            rt.max_recursion_depth
        )));
    }

    let device = &ctx.device;
    let raygen = ShaderModule::load(device, shader_dir, RAYGEN_SHADER)?;
    let miss = ShaderModule::load(device, shader_dir, MISS_SHADER)?;
    let shadow_miss = ShaderModule::load(device, shader_dir, SHADOW_MISS_SHADER)?;
    let closest_hit = ShaderModule::load(device, shader_dir, CLOSEST_HIT_SHADER)?;

    let layout = pipeline_layout(device, set_layout, None)?;

    let bgra = [u32::from(canvas_bgra)];
    let entries = [vk::SpecializationMapEntry::default().constant_id(0).offset(0).size(4)];
    let specialization = vk::SpecializationInfo::default()
        .map_entries(&entries)
        .data(bytemuck::cast_slice(&bgra));

    let stage = |flags, module: &ShaderModule<'_>| {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(flags)
            .module(module.handle)
            .name(c"main")
            .specialization_info(&specialization)
    };
    let stages = [
        stage(vk::ShaderStageFlags::RAYGEN_KHR, &raygen),
        stage(vk::ShaderStageFlags::MISS_KHR, &miss),
        stage(vk::ShaderStageFlags::MISS_KHR, &shadow_miss),
        stage(vk::ShaderStageFlags::CLOSEST_HIT_KHR, &closest_hit),
    ];

    let general = |index: u32| {
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
            .general_shader(index)
            .closest_hit_shader(vk::SHADER_UNUSED_KHR)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR)
    };
    let groups = [
        general(0),
        general(1),
        general(2),
        vk::RayTracingShaderGroupCreateInfoKHR::default()
            .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
            .general_shader(vk::SHADER_UNUSED_KHR)
            .closest_hit_shader(3)
            .any_hit_shader(vk::SHADER_UNUSED_KHR)
            .intersection_shader(vk::SHADER_UNUSED_KHR),
    ];

    let info = vk::RayTracingPipelineCreateInfoKHR::default()
        .stages(&stages)
        .groups(&groups)
        .max_pipeline_ray_recursion_depth(RAY_RECURSION_DEPTH)
        .layout(layout);

    let handle = unsafe {
        rt.pipeline.create_ray_tracing_pipelines(
            vk::DeferredOperationKHR::null(),
            vk::PipelineCache::null(),
            &[info],
            None,
        )
    }
    .map_err(|(_, e)| e)
    .gpu("vkCreateRayTracingPipelinesKHR");
    finish(device, handle, layout)
}

fn finish(
    device: &ash::Device,
    created: Result<Vec<vk::Pipeline>, RenderError>,
    layout: vk::PipelineLayout,
) -> Result<Pipeline, RenderError> {
    match created.map(|pipelines| pipelines.first().copied()) {
        Ok(Some(handle)) => Ok(Pipeline {
            device: device.clone(),
            handle,
            layout,
        }),
        Ok(None) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(RenderError::InvalidState("pipeline creation returned nothing".into()))
        }
        Err(e) => {
            unsafe { device.destroy_pipeline_layout(layout, None) };
            Err(e)
        }
    }
}

/// Byte layout of the shader binding table: ray-gen, miss and hit regions,
/// each starting on the base alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_size: u64,
    /// Handle size rounded up to the handle alignment
    pub stride: u64,
    pub raygen_size: u64,
    pub miss_size: u64,
    pub hit_size: u64,
    pub base_alignment: u64,
}

impl SbtLayout {
    pub fn new(handle_size: u32, handle_alignment: u32, base_alignment: u32) -> Self {
        let base = u64::from(base_alignment);
        let stride = align_up(u64::from(handle_size), u64::from(handle_alignment));
        Self {
            handle_size: u64::from(handle_size),
            stride,
            // The ray-gen region's size must equal its stride
            raygen_size: align_up(stride, base),
            miss_size: align_up(stride * u64::from(MISS_GROUPS), base),
            hit_size: align_up(stride * u64::from(HIT_GROUPS), base),
            base_alignment: base,
        }
    }

    pub fn miss_offset(&self) -> u64 {
        self.raygen_size
    }

    pub fn hit_offset(&self) -> u64 {
        self.raygen_size + self.miss_size
    }

    pub fn total_size(&self) -> u64 {
        self.hit_offset() + self.hit_size
    }

    pub fn group_count() -> u32 {
        1 + MISS_GROUPS + HIT_GROUPS
    }

    /// Byte offset of every group's handle, in group order
    pub fn handle_offsets(&self) -> Vec<u64> {
        let mut offsets = vec![0];
        offsets.extend((0..u64::from(MISS_GROUPS)).map(|i| self.miss_offset() + i * self.stride));
        offsets.extend((0..u64::from(HIT_GROUPS)).map(|i| self.hit_offset() + i * self.stride));
        offsets
    }
}

pub struct ShaderBindingTable {
    _buffer: OwnedBuffer,
    pub raygen: vk::StridedDeviceAddressRegionKHR,
    pub miss: vk::StridedDeviceAddressRegionKHR,
    pub hit: vk::StridedDeviceAddressRegionKHR,
    pub callable: vk::StridedDeviceAddressRegionKHR,
}

impl ShaderBindingTable {
    pub fn new(ctx: &VulkanContext, pipeline: &Pipeline) -> Result<Self, RenderError> {
        let rt = &ctx.ray_tracing;
        let layout = SbtLayout::new(rt.handle_size, rt.handle_alignment, rt.base_alignment);
        let group_count = SbtLayout::group_count();

        let handles = unsafe {
            rt.pipeline.get_ray_tracing_shader_group_handles(
                pipeline.handle,
                0,
                group_count,
                (group_count * rt.handle_size) as usize,
            )
        }
        .gpu("vkGetRayTracingShaderGroupHandlesKHR")?;

        // Over-allocate so the table start can be moved onto the base alignment
        let buffer = OwnedBuffer::host(
            ctx,
            layout.total_size() + layout.base_alignment,
            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        )?;
        let start = align_up(buffer.address, layout.base_alignment) - buffer.address;

        let handle_size = layout.handle_size as usize;
        for (group, offset) in layout.handle_offsets().into_iter().enumerate() {
            let handle = &handles[group * handle_size..(group + 1) * handle_size];
            buffer.write(start + offset, handle)?;
        }

        let base = buffer.address + start;
        let region = |offset: u64, stride: u64, size: u64| {
            vk::StridedDeviceAddressRegionKHR::default()
                .device_address(base + offset)
                .stride(stride)
                .size(size)
        };

        Ok(Self {
            raygen: region(0, layout.raygen_size, layout.raygen_size),
            miss: region(layout.miss_offset(), layout.stride, layout.miss_size),
            hit: region(layout.hit_offset(), layout.stride, layout.hit_size),
            callable: vk::StridedDeviceAddressRegionKHR::default(),
            _buffer: buffer,
        })
    }
}
