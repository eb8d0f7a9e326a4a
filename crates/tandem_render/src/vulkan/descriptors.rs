//! Descriptor layouts and set updates
//!
//! Compute: 0 simulation buffer.
//! Raster: 0 camera block, 1 simulation buffer.
//! Ray trace: 0 scene structure, 1 canvas, 2 ray-trace block,
//! 3 simulation buffer, 4 object address table, 5 raster depth.

use super::context::VulkanContext;
use super::conv::VkResultExt;
use crate::error::RenderError;
use ash::vk;

/// One entry of the object address table (std430)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ObjectAddresses {
    pub vertex_address: u64,
    pub index_address: u64,
}

fn binding(
    index: u32,
    ty: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(index)
        .descriptor_type(ty)
        .descriptor_count(1)
        .stage_flags(stages)
}

pub struct Descriptors {
    device: ash::Device,
    pub compute_layout: vk::DescriptorSetLayout,
    pub raster_layout: vk::DescriptorSetLayout,
    pub ray_trace_layout: vk::DescriptorSetLayout,
    /// Nearest, clamped sampler for the raster depth
    pub depth_sampler: vk::Sampler,
}

impl Descriptors {
    pub fn new(ctx: &VulkanContext) -> Result<Self, RenderError> {
        let device = &ctx.device;
        let mut descriptors = Self {
            device: device.clone(),
            compute_layout: vk::DescriptorSetLayout::null(),
            raster_layout: vk::DescriptorSetLayout::null(),
            ray_trace_layout: vk::DescriptorSetLayout::null(),
            depth_sampler: vk::Sampler::null(),
        };

        descriptors.compute_layout = create_layout(
            device,
            &[binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE)],
        )?;
        descriptors.raster_layout = create_layout(
            device,
            &[
                binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX),
                binding(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::VERTEX),
            ],
        )?;

        let rgen = vk::ShaderStageFlags::RAYGEN_KHR;
        let hit = vk::ShaderStageFlags::CLOSEST_HIT_KHR;
        let miss = vk::ShaderStageFlags::MISS_KHR;
        descriptors.ray_trace_layout = create_layout(
            device,
            &[
                binding(0, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, rgen | hit),
                binding(1, vk::DescriptorType::STORAGE_IMAGE, rgen),
                binding(2, vk::DescriptorType::UNIFORM_BUFFER, rgen | hit | miss),
                binding(3, vk::DescriptorType::STORAGE_BUFFER, rgen | hit),
                binding(4, vk::DescriptorType::STORAGE_BUFFER, hit),
                binding(5, vk::DescriptorType::COMBINED_IMAGE_SAMPLER, rgen),
            ],
        )?;

        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::NEAREST)
            .min_filter(vk::Filter::NEAREST)
            .mipmap_mode(vk::SamplerMipmapMode::NEAREST)
            .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
            .max_lod(0.0);
        descriptors.depth_sampler =
            unsafe { device.create_sampler(&sampler_info, None) }.gpu("vkCreateSampler")?;

        Ok(descriptors)
    }

    pub fn allocate(
        &self,
        ctx: &VulkanContext,
        layout: vk::DescriptorSetLayout,
        count: usize,
    ) -> Result<Vec<vk::DescriptorSet>, RenderError> {
        let layouts = vec![layout; count];
        let info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(ctx.descriptor_pool)
            .set_layouts(&layouts);
        unsafe { self.device.allocate_descriptor_sets(&info) }.gpu("vkAllocateDescriptorSets")
    }

    pub fn write_compute(&self, set: vk::DescriptorSet, simulation: vk::Buffer) {
        let sim = [whole(simulation)];
        let writes = [buffer_write(set, 0, vk::DescriptorType::STORAGE_BUFFER, &sim)];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    pub fn write_raster(&self, set: vk::DescriptorSet, camera: vk::Buffer, simulation: vk::Buffer) {
        let camera = [whole(camera)];
        let sim = [whole(simulation)];
        let writes = [
            buffer_write(set, 0, vk::DescriptorType::UNIFORM_BUFFER, &camera),
            buffer_write(set, 1, vk::DescriptorType::STORAGE_BUFFER, &sim),
        ];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    /// Bindings that live as long as the scene
    pub fn write_ray_trace_scene(
        &self,
        set: vk::DescriptorSet,
        top: vk::AccelerationStructureKHR,
        uniforms: vk::Buffer,
        simulation: vk::Buffer,
        address_table: vk::Buffer,
    ) {
        let structures = [top];
        let mut structure_info =
            vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(&structures);
        let uniforms = [whole(uniforms)];
        let sim = [whole(simulation)];
        let table = [whole(address_table)];

        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(1)
                .push_next(&mut structure_info),
            buffer_write(set, 2, vk::DescriptorType::UNIFORM_BUFFER, &uniforms),
            buffer_write(set, 3, vk::DescriptorType::STORAGE_BUFFER, &sim),
            buffer_write(set, 4, vk::DescriptorType::STORAGE_BUFFER, &table),
        ];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }

    /// Size-dependent bindings, rewritten on swapchain recreation
    pub fn write_ray_trace_images(
        &self,
        set: vk::DescriptorSet,
        canvas: vk::ImageView,
        depth: vk::ImageView,
    ) {
        let canvas = [vk::DescriptorImageInfo::default()
            .image_view(canvas)
            .image_layout(vk::ImageLayout::GENERAL)];
        let depth = [vk::DescriptorImageInfo::default()
            .sampler(self.depth_sampler)
            .image_view(depth)
            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(1)
                .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                .image_info(&canvas),
            vk::WriteDescriptorSet::default()
                .dst_set(set)
                .dst_binding(5)
                .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .image_info(&depth),
        ];
        unsafe { self.device.update_descriptor_sets(&writes, &[]) };
    }
}

impl Drop for Descriptors {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_sampler(self.depth_sampler, None);
            for layout in [self.compute_layout, self.raster_layout, self.ray_trace_layout] {
                if layout != vk::DescriptorSetLayout::null() {
                    self.device.destroy_descriptor_set_layout(layout, None);
                }
            }
        }
    }
}

fn create_layout(
    device: &ash::Device,
    bindings: &[vk::DescriptorSetLayoutBinding<'_>],
) -> Result<vk::DescriptorSetLayout, RenderError> {
    let info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
    unsafe { device.create_descriptor_set_layout(&info, None) }.gpu("vkCreateDescriptorSetLayout")
}

fn whole(buffer: vk::Buffer) -> vk::DescriptorBufferInfo {
    vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(vk::WHOLE_SIZE)
}

fn buffer_write<'a>(
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    info: &'a [vk::DescriptorBufferInfo],
) -> vk::WriteDescriptorSet<'a> {
    vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(ty)
        .buffer_info(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_entry_is_two_u64() {
        assert_eq!(std::mem::size_of::<ObjectAddresses>(), 16);
    }
}
