//! Resource usage vocabulary shared by the barrier planner and backends
//!
//! Flag values match the Vulkan bit positions so backends convert with a
//! plain `from_raw`.

use bitflags::bitflags;

bitflags! {
    /// Pipeline stages a resource is used in
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 0x0000_0001;
        const DRAW_INDIRECT = 0x0000_0002;
        const VERTEX_INPUT = 0x0000_0004;
        const VERTEX_SHADER = 0x0000_0008;
        const FRAGMENT_SHADER = 0x0000_0080;
        const EARLY_FRAGMENT_TESTS = 0x0000_0100;
        const LATE_FRAGMENT_TESTS = 0x0000_0200;
        const COLOR_ATTACHMENT_OUTPUT = 0x0000_0400;
        const COMPUTE_SHADER = 0x0000_0800;
        const TRANSFER = 0x0000_1000;
        const BOTTOM_OF_PIPE = 0x0000_2000;
        const HOST = 0x0000_4000;
        const RAY_TRACING_SHADER = 0x0020_0000;
        const ACCELERATION_STRUCTURE_BUILD = 0x0200_0000;
    }
}

bitflags! {
    /// Memory access kinds
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Access: u32 {
        const INDEX_READ = 0x0000_0002;
        const VERTEX_ATTRIBUTE_READ = 0x0000_0004;
        const UNIFORM_READ = 0x0000_0008;
        const SHADER_READ = 0x0000_0020;
        const SHADER_WRITE = 0x0000_0040;
        const COLOR_ATTACHMENT_READ = 0x0000_0080;
        const COLOR_ATTACHMENT_WRITE = 0x0000_0100;
        const DEPTH_STENCIL_READ = 0x0000_0200;
        const DEPTH_STENCIL_WRITE = 0x0000_0400;
        const TRANSFER_READ = 0x0000_0800;
        const TRANSFER_WRITE = 0x0000_1000;
        const HOST_READ = 0x0000_2000;
        const HOST_WRITE = 0x0000_4000;
        const MEMORY_READ = 0x0000_8000;
        const MEMORY_WRITE = 0x0001_0000;
        const ACCELERATION_STRUCTURE_READ = 0x0020_0000;
        const ACCELERATION_STRUCTURE_WRITE = 0x0040_0000;

        const WRITES = Self::SHADER_WRITE.bits()
            | Self::COLOR_ATTACHMENT_WRITE.bits()
            | Self::DEPTH_STENCIL_WRITE.bits()
            | Self::TRANSFER_WRITE.bits()
            | Self::HOST_WRITE.bits()
            | Self::MEMORY_WRITE.bits()
            | Self::ACCELERATION_STRUCTURE_WRITE.bits();
    }
}

impl Access {
    pub fn writes(self) -> Access {
        self & Access::WRITES
    }

    pub fn has_write(self) -> bool {
        self.intersects(Access::WRITES)
    }
}

/// Image layouts the frame passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachment,
    DepthAttachment,
    ShaderReadOnly,
    TransferSrc,
    TransferDst,
    PresentSrc,
}

/// Resources whose state the planner tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceId {
    /// Object transforms, velocities and colors
    SimulationBuffer,
    /// Presentable image by swapchain index
    Swapchain(u32),
    /// Ray-trace output of an in-flight slot
    Canvas(usize),
    /// Raster depth of an in-flight slot
    Depth(usize),
}

impl ResourceId {
    pub fn is_image(self) -> bool {
        !matches!(self, ResourceId::SimulationBuffer)
    }

    pub fn is_depth(self) -> bool {
        matches!(self, ResourceId::Depth(_))
    }

    /// Layout a freshly created (or discarded) resource is in
    pub fn initial_layout(self) -> Option<ImageLayout> {
        self.is_image().then_some(ImageLayout::Undefined)
    }
}

/// Last known use of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceState {
    pub stages: PipelineStages,
    pub access: Access,
    /// `None` for buffers
    pub layout: Option<ImageLayout>,
}

impl ResourceState {
    pub fn initial(id: ResourceId) -> Self {
        Self {
            stages: PipelineStages::empty(),
            access: Access::empty(),
            layout: id.initial_layout(),
        }
    }
}

/// Ways the frame uses a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Usage {
    SimulationWrite,
    VertexRead,
    RayTraceRead,
    ColorAttachmentWrite,
    DepthAttachmentWrite,
    TransferSrc,
    TransferDst,
    /// Canvas read and written by the ray-generation shader
    RayTraceStorage,
    /// Depth sampled by the ray-generation shader
    RayTraceSampled,
    Present,
}

impl Usage {
    pub fn stages(self) -> PipelineStages {
        match self {
            Usage::SimulationWrite => PipelineStages::COMPUTE_SHADER,
            Usage::VertexRead => PipelineStages::VERTEX_SHADER,
            Usage::RayTraceRead | Usage::RayTraceStorage | Usage::RayTraceSampled => {
                PipelineStages::RAY_TRACING_SHADER
            }
            Usage::ColorAttachmentWrite => PipelineStages::COLOR_ATTACHMENT_OUTPUT,
            Usage::DepthAttachmentWrite => {
                PipelineStages::EARLY_FRAGMENT_TESTS | PipelineStages::LATE_FRAGMENT_TESTS
            }
            Usage::TransferSrc | Usage::TransferDst => PipelineStages::TRANSFER,
            Usage::Present => PipelineStages::BOTTOM_OF_PIPE,
        }
    }

    pub fn access(self) -> Access {
        match self {
            Usage::SimulationWrite | Usage::RayTraceStorage => {
                Access::SHADER_READ | Access::SHADER_WRITE
            }
            Usage::VertexRead | Usage::RayTraceSampled => Access::SHADER_READ,
            Usage::RayTraceRead => Access::SHADER_READ | Access::ACCELERATION_STRUCTURE_READ,
            Usage::ColorAttachmentWrite => Access::COLOR_ATTACHMENT_WRITE,
            Usage::DepthAttachmentWrite => {
                Access::DEPTH_STENCIL_READ | Access::DEPTH_STENCIL_WRITE
            }
            Usage::TransferSrc => Access::TRANSFER_READ,
            Usage::TransferDst => Access::TRANSFER_WRITE,
            Usage::Present => Access::empty(),
        }
    }

    /// Layout required for image usages, `None` for buffer usages
    pub fn layout(self) -> Option<ImageLayout> {
        match self {
            Usage::SimulationWrite | Usage::VertexRead | Usage::RayTraceRead => None,
            Usage::ColorAttachmentWrite => Some(ImageLayout::ColorAttachment),
            Usage::DepthAttachmentWrite => Some(ImageLayout::DepthAttachment),
            Usage::TransferSrc => Some(ImageLayout::TransferSrc),
            Usage::TransferDst => Some(ImageLayout::TransferDst),
            Usage::RayTraceStorage => Some(ImageLayout::General),
            Usage::RayTraceSampled => Some(ImageLayout::ShaderReadOnly),
            Usage::Present => Some(ImageLayout::PresentSrc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_mask_covers_only_writes() {
        assert!(Usage::SimulationWrite.access().has_write());
        assert!(Usage::TransferDst.access().has_write());
        assert!(!Usage::RayTraceRead.access().has_write());
        assert!(!Usage::Present.access().has_write());
        assert_eq!(
            (Access::SHADER_READ | Access::SHADER_WRITE).writes(),
            Access::SHADER_WRITE
        );
    }

    #[test]
    fn buffer_usages_carry_no_layout() {
        for usage in [Usage::SimulationWrite, Usage::VertexRead, Usage::RayTraceRead] {
            assert_eq!(usage.layout(), None);
        }
        assert_eq!(ResourceState::initial(ResourceId::SimulationBuffer).layout, None);
        assert_eq!(
            ResourceState::initial(ResourceId::Canvas(0)).layout,
            Some(ImageLayout::Undefined)
        );
    }
}
