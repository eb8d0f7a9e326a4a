//! Buffers and images that free themselves

use super::context::VulkanContext;
use super::conv::VkResultExt;
use crate::error::RenderError;
use ash::vk;
use bytemuck::Pod;

pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..memory_properties.memory_type_count).find(|&i| {
        (type_filter & (1 << i)) != 0
            && memory_properties.memory_types[i as usize]
                .property_flags
                .contains(properties)
    })
}

fn allocate(
    ctx: &VulkanContext,
    requirements: vk::MemoryRequirements,
    properties: vk::MemoryPropertyFlags,
    device_address: bool,
) -> Result<vk::DeviceMemory, RenderError> {
    let memory_type = find_memory_type(
        &ctx.memory_properties,
        requirements.memory_type_bits,
        properties,
    )
    .ok_or_else(|| RenderError::MissingCapability(format!("memory type with {properties:?}")))?;

    let mut flags_info =
        vk::MemoryAllocateFlagsInfo::default().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
    let mut alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type);
    if device_address {
        alloc_info = alloc_info.push_next(&mut flags_info);
    }

    unsafe { ctx.device.allocate_memory(&alloc_info, None) }.gpu("vkAllocateMemory")
}

/// Buffer plus its dedicated allocation. Host-visible buffers stay mapped.
pub struct OwnedBuffer {
    device: ash::Device,
    pub buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    mapped: *mut u8,
    /// Zero unless created with `SHADER_DEVICE_ADDRESS`
    pub address: vk::DeviceAddress,
}

impl OwnedBuffer {
    pub fn new(
        ctx: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<Self, RenderError> {
        let device = &ctx.device;
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size.max(1))
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let buffer = unsafe { device.create_buffer(&buffer_info, None) }.gpu("vkCreateBuffer")?;

        let device_address = usage.contains(vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS);
        let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
        let memory = match allocate(ctx, requirements, properties, device_address) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        // From here on Drop cleans up
        let mut owned = Self {
            device: device.clone(),
            buffer,
            memory,
            size,
            mapped: std::ptr::null_mut(),
            address: 0,
        };

        unsafe { device.bind_buffer_memory(buffer, memory, 0) }.gpu("vkBindBufferMemory")?;

        if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            let ptr = unsafe {
                device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty())
            }
            .gpu("vkMapMemory")?;
            owned.mapped = ptr.cast();
        }

        if device_address {
            let info = vk::BufferDeviceAddressInfo::default().buffer(buffer);
            owned.address = unsafe { device.get_buffer_device_address(&info) };
        }

        Ok(owned)
    }

    /// Host-visible, coherent, persistently mapped
    pub fn host(
        ctx: &VulkanContext,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, RenderError> {
        Self::new(
            ctx,
            size,
            usage,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        )
    }

    /// Device-local buffer filled from `data` through a staging copy
    pub fn device_local_with<T: Pod>(
        ctx: &VulkanContext,
        data: &[T],
        usage: vk::BufferUsageFlags,
    ) -> Result<Self, RenderError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        let size = bytes.len() as vk::DeviceSize;

        let staging = Self::host(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC)?;
        staging.write(0, bytes)?;

        let buffer = Self::new(
            ctx,
            size,
            usage | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        ctx.one_time_submit(|cmd| unsafe {
            let region = vk::BufferCopy::default().size(size);
            ctx.device
                .cmd_copy_buffer(cmd, staging.buffer, buffer.buffer, &[region]);
        })?;
        Ok(buffer)
    }

    /// Copy `data` into the mapping at byte `offset`
    pub fn write<T: Pod>(&self, offset: vk::DeviceSize, data: &[T]) -> Result<(), RenderError> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if self.mapped.is_null() {
            return Err(RenderError::InvalidState("write to an unmapped buffer".into()));
        }
        if offset + bytes.len() as vk::DeviceSize > self.size {
            return Err(RenderError::InvalidState(format!(
                "write of {} bytes at {offset} overruns a {}-byte buffer",
                bytes.len(),
                self.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(
                bytes.as_ptr(),
                self.mapped.add(offset as usize),
                bytes.len(),
            );
        }
        Ok(())
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        unsafe {
            if !self.mapped.is_null() {
                self.device.unmap_memory(self.memory);
            }
            self.device.destroy_buffer(self.buffer, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

/// 2D single-mip image with one view
pub struct OwnedImage {
    device: ash::Device,
    pub image: vk::Image,
    memory: vk::DeviceMemory,
    pub view: vk::ImageView,
    pub format: vk::Format,
    /// Aspects barriers must name
    pub aspect: vk::ImageAspectFlags,
}

impl OwnedImage {
    pub fn new(
        ctx: &VulkanContext,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self, RenderError> {
        let device = &ctx.device;
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .format(format)
            .tiling(vk::ImageTiling::OPTIMAL)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::TYPE_1);
        let image = unsafe { device.create_image(&image_info, None) }.gpu("vkCreateImage")?;

        let requirements = unsafe { device.get_image_memory_requirements(image) };
        let memory = match allocate(ctx, requirements, vk::MemoryPropertyFlags::DEVICE_LOCAL, false) {
            Ok(memory) => memory,
            Err(e) => {
                unsafe { device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut owned = Self {
            device: device.clone(),
            image,
            memory,
            view: vk::ImageView::null(),
            format,
            aspect,
        };

        unsafe { device.bind_image_memory(image, memory, 0) }.gpu("vkBindImageMemory")?;

        // Sampling reads depth only, even from combined depth/stencil formats
        let view_aspect = if aspect.contains(vk::ImageAspectFlags::DEPTH) {
            vk::ImageAspectFlags::DEPTH
        } else {
            aspect
        };
        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(full_range(view_aspect));
        owned.view = unsafe { device.create_image_view(&view_info, None) }.gpu("vkCreateImageView")?;

        Ok(owned)
    }
}

impl Drop for OwnedImage {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.destroy_image_view(self.view, None);
            }
            self.device.destroy_image(self.image, None);
            self.device.free_memory(self.memory, None);
        }
    }
}

pub fn full_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Round `value` up to a multiple of `alignment` (a power of two, or zero)
pub fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        (value + alignment - 1) & !(alignment - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (i, &f) in flags.iter().enumerate() {
            props.memory_types[i].property_flags = f;
        }
        props
    }

    #[test]
    fn memory_type_honours_filter_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(find_memory_type(&props, 0b111, host), Some(1));
        assert_eq!(find_memory_type(&props, 0b100, host), Some(2));
        assert_eq!(find_memory_type(&props, 0b001, host), None);
        assert_eq!(
            find_memory_type(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Some(0)
        );
    }

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 32), 96);
        assert_eq!(align_up(7, 0), 7);
    }
}
