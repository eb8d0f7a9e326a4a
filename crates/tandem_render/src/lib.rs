//! Tandem Render System
//!
//! Hybrid frame core: a compute simulation, a raster pass and a ray-traced
//! composite recorded into one command stream per frame, ordered purely by
//! explicit barriers, with a GPU profiler wrapped around the stages.
//!
//! The orchestrator talks to the GPU through the traits in [`device`].
//! Two backends implement them: [`vulkan`] (ash, hardware ray tracing) and
//! [`headless`], a CPU stand-in that validates barriers and layouts.

pub mod accel;
pub mod barrier;
pub mod device;
pub mod error;
pub mod headless;
pub mod orchestrator;
pub mod profiler;
pub mod resources;
pub mod ring;
pub mod stage;
pub mod state;
pub mod uniforms;
pub mod vulkan;
pub mod window;

pub use ash;
pub use winit;

pub use device::{AcquireOutcome, Extent, PresentOutcome, RenderBackend};
pub use error::RenderError;
pub use orchestrator::{FrameInput, FrameOrchestrator, FrameOutcome};
pub use profiler::Profiler;
pub use resources::ResourceSet;

/// Rendering backend type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendType {
    /// Vulkan 1.3 with ray-tracing pipeline extensions
    Vulkan,
    /// CPU stand-in, no window or GPU
    Headless,
}

/// Capabilities found when the device is opened
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceCapabilities {
    pub backend: BackendType,
    pub device_name: String,
    pub ray_tracing: bool,
    pub timestamps: bool,
    pub pipeline_statistics: bool,
    /// Nanoseconds per timestamp tick
    pub timestamp_period_ns: f64,
    pub timestamp_valid_bits: u32,
    pub max_ray_recursion_depth: u32,
}

impl DeviceCapabilities {
    pub fn query_limits(&self) -> profiler::QueryLimits {
        profiler::QueryLimits {
            timestamp_period_ns: self.timestamp_period_ns,
            timestamp_valid_bits: self.timestamp_valid_bits,
            timestamps_supported: self.timestamps,
            statistics_supported: self.pipeline_statistics,
        }
    }
}
