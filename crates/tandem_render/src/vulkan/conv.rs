//! Conversions from the backend-neutral vocabulary to ash types

use crate::error::RenderError;
use crate::state::{Access, ImageLayout, PipelineStages};
use ash::vk;

pub(crate) fn stages(stages: PipelineStages) -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::from_raw(stages.bits())
}

pub(crate) fn access(access: Access) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(access.bits())
}

pub(crate) fn layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachment => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthAttachment => vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
        ImageLayout::ShaderReadOnly => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrc => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDst => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

pub(crate) fn extent_2d(extent: crate::Extent) -> vk::Extent2D {
    vk::Extent2D {
        width: extent.width,
        height: extent.height,
    }
}

/// Attach the failing call to a raw `vk::Result`
pub(crate) trait VkResultExt<T> {
    fn gpu(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for Result<T, vk::Result> {
    fn gpu(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|result| RenderError::Gpu {
            call,
            reason: format!("{result:?}"),
        })
    }
}
