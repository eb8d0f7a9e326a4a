//! Tandem Metrics - Common utilities for performance tracking
//!
//! Two layers live here:
//!
//! - [`SectionStats`] / [`StatsAggregator`]: smoothing and outlier rejection
//!   for GPU section timings. Always compiled, the GPU profiler depends on it.
//! - CPU instrumentation ([`FrameTimer`], [`RingBuffer`], [`Counter`]) that
//!   completely vanishes in production builds via feature flags.
//!
//! # Feature Flags
//!
//! - `metrics` - Enable CPU metrics collection (default: disabled)
//!
//! # Usage
//!
//! ```ignore
//! use tandem_metrics::{FrameTimer, StatsAggregator};
//!
//! let mut stats = StatsAggregator::new();
//! stats.record("Rasterize", 1.25, None);
//!
//! let mut timer = FrameTimer::new(120);
//! timer.record(last_frame);
//! tracing::info!(cpu_ms = timer.frame_time_ms());
//! ```
//!
//! Without the `metrics` feature the CPU side compiles to empty stubs.

mod section_stats;

pub use section_stats::{
    PipelineCounts, SectionEntry, SectionStats, StatsAggregator, MAX_VALID_SAMPLE_MS,
    MIN_VALID_SAMPLE_MS, SMOOTHING_RETAIN,
};

#[cfg(feature = "metrics")]
mod frame_timer;
#[cfg(feature = "metrics")]
mod ring_buffer;
#[cfg(feature = "metrics")]
mod counter;

#[cfg(feature = "metrics")]
pub use frame_timer::FrameTimer;
#[cfg(feature = "metrics")]
pub use ring_buffer::RingBuffer;
#[cfg(feature = "metrics")]
pub use counter::Counter;

// ============================================================================
// No-op stubs when metrics disabled
// ============================================================================

#[cfg(not(feature = "metrics"))]
pub struct FrameTimer;

#[cfg(not(feature = "metrics"))]
impl FrameTimer {
    pub fn new(_capacity: usize) -> Self { Self }
    pub fn begin(&mut self) {}
    pub fn end(&mut self) {}
    pub fn fps(&self) -> f64 { 0.0 }
    pub fn frame_time_ms(&self) -> f64 { 0.0 }
    pub fn frame_time_range_ms(&self) -> (f64, f64) { (0.0, 0.0) }
    pub fn record(&mut self, _frame_time: std::time::Duration) {}
    pub fn samples(&self) -> usize { 0 }
}

#[cfg(not(feature = "metrics"))]
pub struct RingBuffer<T>(std::marker::PhantomData<T>);

#[cfg(not(feature = "metrics"))]
impl<T> RingBuffer<T> {
    pub fn new(_capacity: usize) -> Self { Self(std::marker::PhantomData) }
    pub fn push(&mut self, _value: T) {}
    pub fn average(&self) -> T where T: Default { T::default() }
}

#[cfg(not(feature = "metrics"))]
#[derive(Default)]
pub struct Counter;

#[cfg(not(feature = "metrics"))]
impl Counter {
    pub fn new() -> Self { Self }
    pub fn increment(&mut self, _name: &str, _value: usize) {}
    pub fn set(&mut self, _name: &str, _value: usize) {}
    pub fn get(&self, _name: &str) -> usize { 0 }
    pub fn reset_all(&mut self) {}
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> { std::iter::empty() }
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_compiles_with_either_feature_set() {
        let mut _timer = super::FrameTimer::new(60);
        let mut _buffer = super::RingBuffer::<f64>::new(10);
        let mut counter = super::Counter::new();
        counter.increment("draws", 1);
        counter.reset_all();
        assert_eq!(counter.get("draws"), 0);
    }
}
