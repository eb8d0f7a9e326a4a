//! Acceleration-structure builds over `VK_KHR_acceleration_structure`

use super::context::VulkanContext;
use super::conv::VkResultExt;
use super::memory::{align_up, OwnedBuffer};
use crate::accel::StructureInstance;
use crate::error::RenderError;
use ash::vk;
use bytemuck::{Pod, Zeroable};
use tandem_asset::VERTEX_STRIDE;

/// `VkAccelerationStructureInstanceKHR` as plain bytes (64 bytes)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuInstance {
    pub transform: [[f32; 4]; 3],
    /// Custom index in the low 24 bits, mask in the high 8
    pub custom_index_and_mask: u32,
    /// Binding-table offset in the low 24 bits, instance flags in the high 8
    pub sbt_offset_and_flags: u32,
    pub structure_address: u64,
}

impl GpuInstance {
    pub fn new(instance: &StructureInstance, structure_address: vk::DeviceAddress) -> Self {
        let flags = vk::GeometryInstanceFlagsKHR::TRIANGLE_FACING_CULL_DISABLE.as_raw() as u8;
        Self {
            transform: instance.transform,
            custom_index_and_mask: (instance.custom_index & 0x00ff_ffff)
                | (u32::from(instance.mask) << 24),
            sbt_offset_and_flags: u32::from(flags) << 24,
            structure_address,
        }
    }
}

pub struct OwnedStructure {
    loader: ash::khr::acceleration_structure::Device,
    pub handle: vk::AccelerationStructureKHR,
    pub address: vk::DeviceAddress,
    _buffer: OwnedBuffer,
}

impl Drop for OwnedStructure {
    fn drop(&mut self) {
        unsafe { self.loader.destroy_acceleration_structure(self.handle, None) };
    }
}

/// Device addresses and counts of one uploaded mesh
#[derive(Debug, Clone, Copy)]
pub struct TriangleSource {
    pub vertex_address: vk::DeviceAddress,
    pub index_address: vk::DeviceAddress,
    pub vertex_count: u32,
    pub index_count: u32,
}

pub fn build_bottom(ctx: &VulkanContext, source: &TriangleSource) -> Result<OwnedStructure, RenderError> {
    let triangles = vk::AccelerationStructureGeometryTrianglesDataKHR::default()
        .vertex_format(vk::Format::R32G32B32_SFLOAT)
        .vertex_data(vk::DeviceOrHostAddressConstKHR {
            device_address: source.vertex_address,
        })
        .vertex_stride(VERTEX_STRIDE as vk::DeviceSize)
        .max_vertex(source.vertex_count.saturating_sub(1))
        .index_type(vk::IndexType::UINT32)
        .index_data(vk::DeviceOrHostAddressConstKHR {
            device_address: source.index_address,
        });
    let geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::TRIANGLES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { triangles })
        .flags(vk::GeometryFlagsKHR::OPAQUE);

    build(
        ctx,
        vk::AccelerationStructureTypeKHR::BOTTOM_LEVEL,
        geometry,
        source.index_count / 3,
    )
}

/// Build the scene structure. `instances` must already reference live
/// bottom-level structures.
pub fn build_top(ctx: &VulkanContext, instances: &[GpuInstance]) -> Result<OwnedStructure, RenderError> {
    let size = std::mem::size_of_val(instances) as vk::DeviceSize;
    let instance_buffer = OwnedBuffer::host(
        ctx,
        size,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
    )?;
    instance_buffer.write(0, instances)?;

    let data = vk::AccelerationStructureGeometryInstancesDataKHR::default()
        .array_of_pointers(false)
        .data(vk::DeviceOrHostAddressConstKHR {
            device_address: instance_buffer.address,
        });
    let geometry = vk::AccelerationStructureGeometryKHR::default()
        .geometry_type(vk::GeometryTypeKHR::INSTANCES)
        .geometry(vk::AccelerationStructureGeometryDataKHR { instances: data })
        .flags(vk::GeometryFlagsKHR::OPAQUE);

    // The build has completed when `build` returns, so the instance buffer
    // can go
    build(
        ctx,
        vk::AccelerationStructureTypeKHR::TOP_LEVEL,
        geometry,
        instances.len() as u32,
    )
}

fn build(
    ctx: &VulkanContext,
    ty: vk::AccelerationStructureTypeKHR,
    geometry: vk::AccelerationStructureGeometryKHR<'_>,
    primitive_count: u32,
) -> Result<OwnedStructure, RenderError> {
    let rt = &ctx.ray_tracing;
    let geometries = [geometry];
    let mut build_info = vk::AccelerationStructureBuildGeometryInfoKHR::default()
        .ty(ty)
        .flags(vk::BuildAccelerationStructureFlagsKHR::PREFER_FAST_TRACE)
        .mode(vk::BuildAccelerationStructureModeKHR::BUILD)
        .geometries(&geometries);

    let mut sizes = vk::AccelerationStructureBuildSizesInfoKHR::default();
    unsafe {
        rt.accel.get_acceleration_structure_build_sizes(
            vk::AccelerationStructureBuildTypeKHR::DEVICE,
            &build_info,
            &[primitive_count],
            &mut sizes,
        );
    }

    let buffer = OwnedBuffer::new(
        ctx,
        sizes.acceleration_structure_size,
        vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR
            | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    let create_info = vk::AccelerationStructureCreateInfoKHR::default()
        .buffer(buffer.buffer)
        .size(sizes.acceleration_structure_size)
        .ty(ty);
    let handle = unsafe { rt.accel.create_acceleration_structure(&create_info, None) }
        .gpu("vkCreateAccelerationStructureKHR")?;

    let address_info = vk::AccelerationStructureDeviceAddressInfoKHR::default()
        .acceleration_structure(handle);
    let structure = OwnedStructure {
        loader: rt.accel.clone(),
        handle,
        address: unsafe { rt.accel.get_acceleration_structure_device_address(&address_info) },
        _buffer: buffer,
    };

    let scratch_alignment = u64::from(rt.scratch_alignment);
    let scratch = OwnedBuffer::new(
        ctx,
        sizes.build_scratch_size + scratch_alignment,
        vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    build_info = build_info
        .dst_acceleration_structure(structure.handle)
        .scratch_data(vk::DeviceOrHostAddressKHR {
            device_address: align_up(scratch.address, scratch_alignment),
        });

    let range = vk::AccelerationStructureBuildRangeInfoKHR::default().primitive_count(primitive_count);
    ctx.one_time_submit(|cmd| unsafe {
        rt.accel
            .cmd_build_acceleration_structures(cmd, &[build_info], &[&[range]]);
    })?;

    tracing::debug!(?ty, primitive_count, bytes = sizes.acceleration_structure_size, "acceleration structure built");
    Ok(structure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accel::BottomStructureHandle;

    #[test]
    fn instance_matches_vulkan_layout() {
        assert_eq!(
            std::mem::size_of::<GpuInstance>(),
            std::mem::size_of::<vk::AccelerationStructureInstanceKHR>()
        );
    }

    #[test]
    fn instance_packs_index_mask_and_flags() {
        let instance = StructureInstance {
            bottom: BottomStructureHandle(0),
            transform: [[1.0, 0.0, 0.0, 4.0], [0.0, 1.0, 0.0, 5.0], [0.0, 0.0, 1.0, 6.0]],
            mask: 0x02,
            custom_index: 7,
        };
        let gpu = GpuInstance::new(&instance, 0xdead_0000);

        assert_eq!(gpu.custom_index_and_mask, 0x0200_0007);
        assert_eq!(gpu.sbt_offset_and_flags >> 24, 0x01);
        assert_eq!(gpu.sbt_offset_and_flags & 0x00ff_ffff, 0);
        assert_eq!(gpu.structure_address, 0xdead_0000);
        assert_eq!(gpu.transform[2][3], 6.0);
    }
}
