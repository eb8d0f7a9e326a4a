//! Query pool vocabulary

/// What the device's query hardware can do
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryLimits {
    /// Nanoseconds per timestamp tick
    pub timestamp_period_ns: f64,
    /// Meaningful low bits of a timestamp (64 = full width)
    pub timestamp_valid_bits: u32,
    pub timestamps_supported: bool,
    pub statistics_supported: bool,
}

impl QueryLimits {
    pub fn unsupported() -> Self {
        Self {
            timestamp_period_ns: 1.0,
            timestamp_valid_bits: 0,
            timestamps_supported: false,
            statistics_supported: false,
        }
    }

    fn timestamp_mask(&self) -> u64 {
        match self.timestamp_valid_bits {
            0 | 64.. => u64::MAX,
            bits => (1u64 << bits) - 1,
        }
    }

    /// Milliseconds between two raw timestamps, tolerant of counter wrap
    pub fn elapsed_ms(&self, start: u64, end: u64) -> f64 {
        let mask = self.timestamp_mask();
        let ticks = (end & mask).wrapping_sub(start & mask) & mask;
        ticks as f64 * self.timestamp_period_ns / 1_000_000.0
    }
}

/// Blocking behaviour of a query readback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Wait until every requested query is available
    Wait,
    /// Return `NotReady` instead of waiting
    NoWait,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryReadback<T> {
    Ready(T),
    NotReady,
}

/// Where in the pipeline a timestamp is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampStage {
    /// Section start: before any of its work begins
    TopOfPipe,
    /// Section end: after all of its work has finished
    BottomOfPipe,
}

/// One named section of one frame
#[derive(Debug, Clone, PartialEq)]
pub struct SectionRecord {
    pub name: String,
    /// Start timestamp query; the end query is `start + 1`
    pub start: u32,
    pub statistics: Option<u32>,
    /// Nesting depth, 0 for outermost sections
    pub depth: u32,
    /// Over budget: no queries were written
    pub skipped: bool,
    pub closed: bool,
}

impl SectionRecord {
    pub fn end(&self) -> u32 {
        self.start + 1
    }
}

/// Per-section result of one harvested frame
#[derive(Debug, Clone, PartialEq)]
pub struct FrameSample {
    pub name: String,
    pub ms: f64,
    pub depth: u32,
    pub counts: Option<tandem_metrics::PipelineCounts>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_uses_period() {
        let limits = QueryLimits {
            timestamp_period_ns: 2.5,
            timestamp_valid_bits: 64,
            timestamps_supported: true,
            statistics_supported: false,
        };
        assert_eq!(limits.elapsed_ms(1_000, 401_000), 1.0);
    }

    #[test]
    fn elapsed_handles_wrap_in_valid_bits() {
        let limits = QueryLimits {
            timestamp_period_ns: 1.0,
            timestamp_valid_bits: 36,
            timestamps_supported: true,
            statistics_supported: false,
        };
        let max = (1u64 << 36) - 1;
        // 10 ticks up to the wrap, 999_990 after it
        let ms = limits.elapsed_ms(max - 9, 999_990);
        assert!((ms - 1.0).abs() < 1e-9);
    }
}
