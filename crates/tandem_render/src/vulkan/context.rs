use super::conv::VkResultExt;
use crate::error::RenderError;
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::{c_char, CStr, CString};
use winit::window::Window;

const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

fn required_device_extensions() -> [&'static CStr; 4] {
    [
        ash::khr::swapchain::NAME,
        ash::khr::acceleration_structure::NAME,
        ash::khr::ray_tracing_pipeline::NAME,
        ash::khr::deferred_host_operations::NAME,
    ]
}

/// Ray-tracing entry points plus the limits the pipeline and binding table
/// are laid out with
pub struct RayTracingOps {
    pub accel: ash::khr::acceleration_structure::Device,
    pub pipeline: ash::khr::ray_tracing_pipeline::Device,
    pub handle_size: u32,
    pub handle_alignment: u32,
    pub base_alignment: u32,
    pub max_recursion_depth: u32,
    pub scratch_alignment: u32,
}

/// Instance, device and the long-lived pools everything else is created from
pub struct VulkanContext {
    pub entry: ash::Entry,
    pub instance: ash::Instance,
    pub surface_loader: ash::khr::surface::Instance,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub device: ash::Device,
    pub queue: vk::Queue,
    pub queue_family: u32,
    pub swapchain_loader: ash::khr::swapchain::Device,
    pub ray_tracing: RayTracingOps,
    pub command_pool: vk::CommandPool,
    pub descriptor_pool: vk::DescriptorPool,
    pub timestamp_valid_bits: u32,
    pub pipeline_statistics: bool,
    pub device_name: String,
}

impl std::fmt::Debug for VulkanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanContext")
            .field("device_name", &self.device_name)
            .field("queue_family", &self.queue_family)
            .field("timestamp_valid_bits", &self.timestamp_valid_bits)
            .finish()
    }
}

/// What a physical device offers, gathered before anything is created on it
struct Candidate {
    physical_device: vk::PhysicalDevice,
    properties: vk::PhysicalDeviceProperties,
    queue_family: u32,
    timestamp_valid_bits: u32,
    pipeline_statistics: bool,
}

impl VulkanContext {
    pub fn new(window: &Window, validation: bool) -> Result<Self, RenderError> {
        let display_handle = window
            .display_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw();
        let window_handle = window
            .window_handle()
            .map_err(|e| RenderError::Window(e.to_string()))?
            .as_raw();

        let entry = unsafe { ash::Entry::load() }.map_err(|e| RenderError::Loader(e.to_string()))?;

        let app_name = CString::new(crate::window::APP_NAME)
            .map_err(|e| RenderError::InvalidState(e.to_string()))?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"Tandem")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let extension_names = ash_window::enumerate_required_extensions(display_handle)
            .gpu("vkEnumerateInstanceExtensionProperties")?;

        let layers: Vec<*const c_char> = if validation && validation_available(&entry) {
            vec![VALIDATION_LAYER.as_ptr()]
        } else {
            if validation {
                tracing::warn!("validation requested but {VALIDATION_LAYER:?} is not installed");
            }
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(extension_names)
            .enabled_layer_names(&layers);
        let instance = unsafe { entry.create_instance(&create_info, None) }.gpu("vkCreateInstance")?;

        let surface_loader = ash::khr::surface::Instance::new(&entry, &instance);
        let surface = match unsafe {
            ash_window::create_surface(&entry, &instance, display_handle, window_handle, None)
        } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(RenderError::Gpu {
                    call: "vkCreateSurfaceKHR",
                    reason: format!("{e:?}"),
                });
            }
        };

        let candidate = match pick_physical_device(&instance, &surface_loader, surface) {
            Ok(candidate) => candidate,
            Err(e) => {
                unsafe {
                    surface_loader.destroy_surface(surface, None);
                    instance.destroy_instance(None);
                }
                return Err(e);
            }
        };

        let device_name = candidate
            .properties
            .device_name_as_c_str()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|_| "unknown".to_string());
        tracing::info!(
            device = %device_name,
            queue_family = candidate.queue_family,
            timestamp_bits = candidate.timestamp_valid_bits,
            pipeline_statistics = candidate.pipeline_statistics,
            "selected GPU"
        );

        let device = create_device(&instance, &candidate)?;
        let queue = unsafe { device.get_device_queue(candidate.queue_family, 0) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(candidate.physical_device) };
        let swapchain_loader = ash::khr::swapchain::Device::new(&instance, &device);
        let ray_tracing = ray_tracing_ops(&instance, &device, candidate.physical_device);

        let pool_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(candidate.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);
        let command_pool =
            unsafe { device.create_command_pool(&pool_info, None) }.gpu("vkCreateCommandPool")?;

        let pool_sizes = [
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::UNIFORM_BUFFER)
                .descriptor_count(16),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(16),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::STORAGE_IMAGE)
                .descriptor_count(8),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                .descriptor_count(8),
            vk::DescriptorPoolSize::default()
                .ty(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
                .descriptor_count(8),
        ];
        let descriptor_pool_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(16)
            .pool_sizes(&pool_sizes);
        let descriptor_pool = unsafe { device.create_descriptor_pool(&descriptor_pool_info, None) }
            .gpu("vkCreateDescriptorPool")?;

        Ok(Self {
            entry,
            instance,
            surface_loader,
            surface,
            physical_device: candidate.physical_device,
            properties: candidate.properties,
            memory_properties,
            device,
            queue,
            queue_family: candidate.queue_family,
            swapchain_loader,
            ray_tracing,
            command_pool,
            descriptor_pool,
            timestamp_valid_bits: candidate.timestamp_valid_bits,
            pipeline_statistics: candidate.pipeline_statistics,
            device_name,
        })
    }

    /// Nanoseconds per timestamp tick
    pub fn timestamp_period(&self) -> f32 {
        self.properties.limits.timestamp_period
    }

    /// Record with `record` into a throwaway command buffer and block until
    /// the queue has executed it
    pub fn one_time_submit<F>(&self, record: F) -> Result<(), RenderError>
    where
        F: FnOnce(vk::CommandBuffer),
    {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        unsafe {
            let buffers = self
                .device
                .allocate_command_buffers(&alloc_info)
                .gpu("vkAllocateCommandBuffers")?;
            let cmd = buffers[0];

            let begin = vk::CommandBufferBeginInfo::default()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            let result = self
                .device
                .begin_command_buffer(cmd, &begin)
                .gpu("vkBeginCommandBuffer")
                .and_then(|()| {
                    record(cmd);
                    self.device.end_command_buffer(cmd).gpu("vkEndCommandBuffer")
                })
                .and_then(|()| {
                    let submit = vk::SubmitInfo::default().command_buffers(&buffers);
                    self.device
                        .queue_submit(self.queue, &[submit], vk::Fence::null())
                        .gpu("vkQueueSubmit")
                })
                .and_then(|()| self.device.queue_wait_idle(self.queue).gpu("vkQueueWaitIdle"));

            self.device.free_command_buffers(self.command_pool, &buffers);
            result
        }
    }

    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR, RenderError> {
        unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)
        }
        .gpu("vkGetPhysicalDeviceSurfaceCapabilitiesKHR")
    }

    pub fn format_supports(&self, format: vk::Format, features: vk::FormatFeatureFlags) -> bool {
        let props = unsafe {
            self.instance
                .get_physical_device_format_properties(self.physical_device, format)
        };
        props.optimal_tiling_features.contains(features)
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_descriptor_pool(self.descriptor_pool, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            self.instance.destroy_instance(None);
        }
    }
}

fn validation_available(entry: &ash::Entry) -> bool {
    unsafe { entry.enumerate_instance_layer_properties() }
        .map(|layers| {
            layers
                .iter()
                .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER))
        })
        .unwrap_or(false)
}

fn pick_physical_device(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
) -> Result<Candidate, RenderError> {
    let devices =
        unsafe { instance.enumerate_physical_devices() }.gpu("vkEnumeratePhysicalDevices")?;

    let mut rejected = Vec::new();
    let mut best: Option<Candidate> = None;
    for physical_device in devices {
        match inspect(instance, surface_loader, surface, physical_device) {
            Ok(candidate) => {
                let discrete = candidate.properties.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
                if best.is_none() || discrete {
                    best = Some(candidate);
                }
            }
            Err(reason) => rejected.push(reason),
        }
    }

    best.ok_or_else(|| RenderError::NoSuitableDevice(rejected.join("; ")))
}

/// Check one device against the renderer requirements
fn inspect(
    instance: &ash::Instance,
    surface_loader: &ash::khr::surface::Instance,
    surface: vk::SurfaceKHR,
    physical_device: vk::PhysicalDevice,
) -> Result<Candidate, String> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = properties
        .device_name_as_c_str()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if properties.api_version < vk::API_VERSION_1_3 {
        return Err(format!("{name}: Vulkan 1.3 required"));
    }

    let available = unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .map_err(|e| format!("{name}: {e:?}"))?;
    for required in required_device_extensions() {
        let found = available
            .iter()
            .any(|ext| ext.extension_name_as_c_str().is_ok_and(|n| n == required));
        if !found {
            return Err(format!("{name}: missing {}", required.to_string_lossy()));
        }
    }

    let mut features12 = vk::PhysicalDeviceVulkan12Features::default();
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default();
    let mut accel_features = vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default();
    let mut rt_features = vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default();
    let base = {
        let mut features2 = vk::PhysicalDeviceFeatures2::default()
            .push_next(&mut features12)
            .push_next(&mut features13)
            .push_next(&mut accel_features)
            .push_next(&mut rt_features);
        unsafe { instance.get_physical_device_features2(physical_device, &mut features2) };
        features2.features
    };

    let missing = [
        ("bufferDeviceAddress", features12.buffer_device_address),
        ("hostQueryReset", features12.host_query_reset),
        ("dynamicRendering", features13.dynamic_rendering),
        ("accelerationStructure", accel_features.acceleration_structure),
        ("rayTracingPipeline", rt_features.ray_tracing_pipeline),
        ("shaderInt64", base.shader_int64),
    ]
    .into_iter()
    .find(|&(_, supported)| supported == vk::FALSE);
    if let Some((feature, _)) = missing {
        return Err(format!("{name}: feature {feature} unsupported"));
    }

    let families = unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let queue_family = families
        .iter()
        .enumerate()
        .find(|&(index, family)| {
            let flags = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE;
            family.queue_flags.contains(flags)
                && unsafe {
                    surface_loader.get_physical_device_surface_support(
                        physical_device,
                        index as u32,
                        surface,
                    )
                }
                .unwrap_or(false)
        })
        .map(|(index, _)| index as u32)
        .ok_or_else(|| format!("{name}: no graphics+compute queue that can present"))?;

    Ok(Candidate {
        physical_device,
        properties,
        queue_family,
        timestamp_valid_bits: families[queue_family as usize].timestamp_valid_bits,
        pipeline_statistics: base.pipeline_statistics_query == vk::TRUE,
    })
}

fn create_device(instance: &ash::Instance, candidate: &Candidate) -> Result<ash::Device, RenderError> {
    let priorities = [1.0f32];
    let queue_infos = [vk::DeviceQueueCreateInfo::default()
        .queue_family_index(candidate.queue_family)
        .queue_priorities(&priorities)];

    let extension_names = required_device_extensions().map(CStr::as_ptr);

    let base = vk::PhysicalDeviceFeatures::default()
        .shader_int64(true)
        .pipeline_statistics_query(candidate.pipeline_statistics);
    let mut features12 = vk::PhysicalDeviceVulkan12Features::default()
        .buffer_device_address(true)
        .host_query_reset(true);
    let mut features13 = vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true);
    let mut accel_features =
        vk::PhysicalDeviceAccelerationStructureFeaturesKHR::default().acceleration_structure(true);
    let mut rt_features =
        vk::PhysicalDeviceRayTracingPipelineFeaturesKHR::default().ray_tracing_pipeline(true);
    let mut features2 = vk::PhysicalDeviceFeatures2::default()
        .features(base)
        .push_next(&mut features12)
        .push_next(&mut features13)
        .push_next(&mut accel_features)
        .push_next(&mut rt_features);

    let create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(&queue_infos)
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    unsafe { instance.create_device(candidate.physical_device, &create_info, None) }
        .gpu("vkCreateDevice")
}

fn ray_tracing_ops(
    instance: &ash::Instance,
    device: &ash::Device,
    physical_device: vk::PhysicalDevice,
) -> RayTracingOps {
    let mut pipeline_props = vk::PhysicalDeviceRayTracingPipelinePropertiesKHR::default();
    let mut accel_props = vk::PhysicalDeviceAccelerationStructurePropertiesKHR::default();
    {
        let mut props2 = vk::PhysicalDeviceProperties2::default()
            .push_next(&mut pipeline_props)
            .push_next(&mut accel_props);
        unsafe { instance.get_physical_device_properties2(physical_device, &mut props2) };
    }

    RayTracingOps {
        accel: ash::khr::acceleration_structure::Device::new(instance, device),
        pipeline: ash::khr::ray_tracing_pipeline::Device::new(instance, device),
        handle_size: pipeline_props.shader_group_handle_size,
        handle_alignment: pipeline_props.shader_group_handle_alignment,
        base_alignment: pipeline_props.shader_group_base_alignment,
        max_recursion_depth: pipeline_props.max_ray_recursion_depth,
        scratch_alignment: accel_props.min_acceleration_structure_scratch_offset_alignment,
    }
}
