use super::context::VulkanContext;
use super::conv::VkResultExt;
use super::memory::full_range;
use crate::device::Extent;
use crate::error::RenderError;
use ash::vk;

/// Presentable formats in order of preference. The canvas shares the
/// swapchain format, so only formats usable as storage images qualify.
const FORMAT_CANDIDATES: [vk::Format; 2] = [vk::Format::B8G8R8A8_UNORM, vk::Format::R8G8B8A8_UNORM];

/// Swapchain images are written by the raster pass and both copies
pub const IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw()
        | vk::ImageUsageFlags::TRANSFER_SRC.as_raw()
        | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

pub struct Swapchain {
    device: ash::Device,
    loader: ash::khr::swapchain::Device,
    pub handle: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub views: Vec<vk::ImageView>,
    pub format: vk::SurfaceFormatKHR,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Build a swapchain for the current surface. Returns `None` when the
    /// surface has zero area.
    pub fn new(
        ctx: &VulkanContext,
        window_extent: Extent,
        vsync: bool,
        old: vk::SwapchainKHR,
    ) -> Result<Option<Self>, RenderError> {
        let caps = ctx.surface_capabilities()?;
        let extent = choose_extent(&caps, window_extent);
        if extent.width == 0 || extent.height == 0 {
            return Ok(None);
        }

        if !caps.supported_usage_flags.contains(IMAGE_USAGE) {
            return Err(RenderError::MissingCapability(format!(
                "swapchain usage {IMAGE_USAGE:?}"
            )));
        }

        let formats = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_formats(ctx.physical_device, ctx.surface)
        }
        .gpu("vkGetPhysicalDeviceSurfaceFormatsKHR")?;
        let format = choose_format(&formats, |format| {
            ctx.format_supports(format, vk::FormatFeatureFlags::STORAGE_IMAGE)
        })
        .ok_or_else(|| {
            RenderError::MissingCapability("presentable format usable as a storage image".into())
        })?;

        let modes = unsafe {
            ctx.surface_loader
                .get_physical_device_surface_present_modes(ctx.physical_device, ctx.surface)
        }
        .gpu("vkGetPhysicalDeviceSurfacePresentModesKHR")?;
        let present_mode = choose_present_mode(&modes, vsync);

        let mut image_count = caps.min_image_count + 1;
        if caps.max_image_count > 0 {
            image_count = image_count.min(caps.max_image_count);
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(IMAGE_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old);

        let handle = unsafe { ctx.swapchain_loader.create_swapchain(&create_info, None) }
            .gpu("vkCreateSwapchainKHR")?;

        let mut swapchain = Self {
            device: ctx.device.clone(),
            loader: ctx.swapchain_loader.clone(),
            handle,
            images: Vec::new(),
            views: Vec::new(),
            format,
            extent,
        };

        swapchain.images = unsafe { ctx.swapchain_loader.get_swapchain_images(handle) }
            .gpu("vkGetSwapchainImagesKHR")?;
        for &image in &swapchain.images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(full_range(vk::ImageAspectFlags::COLOR));
            let view = unsafe { ctx.device.create_image_view(&view_info, None) }
                .gpu("vkCreateImageView")?;
            swapchain.views.push(view);
        }

        tracing::info!(
            width = extent.width,
            height = extent.height,
            images = swapchain.images.len(),
            format = ?format.format,
            present_mode = ?present_mode,
            "swapchain created"
        );
        Ok(Some(swapchain))
    }

    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    pub fn extent(&self) -> Extent {
        Extent::new(self.extent.width, self.extent.height)
    }

    /// Canvas texels arrive in swapchain byte order; hit shaders swap red
    /// and blue when that order is BGRA
    pub fn is_bgra(&self) -> bool {
        self.format.format == vk::Format::B8G8R8A8_UNORM
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.views {
                self.device.destroy_image_view(view, None);
            }
            self.loader.destroy_swapchain(self.handle, None);
        }
    }
}

fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, window: Extent) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: window
            .width
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: window
            .height
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

fn choose_format(
    formats: &[vk::SurfaceFormatKHR],
    storage_capable: impl Fn(vk::Format) -> bool,
) -> Option<vk::SurfaceFormatKHR> {
    FORMAT_CANDIDATES.iter().find_map(|&wanted| {
        formats
            .iter()
            .find(|f| f.format == wanted && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR)
            .filter(|f| storage_capable(f.format))
            .copied()
    })
}

fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| modes.contains(mode))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    #[test]
    fn format_prefers_bgra_when_storage_capable() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        let chosen = choose_format(&formats, |_| true).map(|f| f.format);
        assert_eq!(chosen, Some(vk::Format::B8G8R8A8_UNORM));

        let chosen = choose_format(&formats, |f| f != vk::Format::B8G8R8A8_UNORM).map(|f| f.format);
        assert_eq!(chosen, Some(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn srgb_formats_are_not_candidates() {
        let formats = [surface_format(vk::Format::B8G8R8A8_SRGB)];
        assert_eq!(choose_format(&formats, |_| true), None);
    }

    #[test]
    fn present_mode_follows_vsync() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn undefined_current_extent_uses_window_size() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 1024,
                height: 1024,
            },
            ..Default::default()
        };
        let extent = choose_extent(&caps, Extent::new(1600, 600));
        assert_eq!((extent.width, extent.height), (1024, 600));
    }
}
