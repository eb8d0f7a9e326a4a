//! Smoothed per-section timing statistics
//!
//! GPU timestamps occasionally come back as garbage (counter resets, a
//! query read before it was written, driver hiccups). Samples outside
//! `(MIN_VALID_SAMPLE_MS, MAX_VALID_SAMPLE_MS)` are dropped without touching
//! any field, so one bad readout never drags the moving average.

/// Lower bound (exclusive) for an accepted sample: 0.1 µs
pub const MIN_VALID_SAMPLE_MS: f64 = 0.0001;
/// Upper bound (exclusive) for an accepted sample: 1 s
pub const MAX_VALID_SAMPLE_MS: f64 = 1000.0;
/// Weight kept from the previous moving average on each update
pub const SMOOTHING_RETAIN: f64 = 0.95;

/// Timing statistics for one named section, persisted across frames
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SectionStats {
    pub total_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub count: u64,
    pub moving_avg_ms: f64,
}

impl SectionStats {
    /// Fold one sample in. Returns `false` (and changes nothing) when the
    /// sample is rejected as a measurement glitch.
    pub fn update(&mut self, sample_ms: f64) -> bool {
        // Written so NaN fails the range check too.
        if !(sample_ms > MIN_VALID_SAMPLE_MS && sample_ms < MAX_VALID_SAMPLE_MS) {
            return false;
        }

        if self.count == 0 {
            self.moving_avg_ms = sample_ms;
            self.min_ms = sample_ms;
            self.max_ms = sample_ms;
        } else {
            self.moving_avg_ms =
                SMOOTHING_RETAIN * self.moving_avg_ms + (1.0 - SMOOTHING_RETAIN) * sample_ms;
            self.min_ms = self.min_ms.min(sample_ms);
            self.max_ms = self.max_ms.max(sample_ms);
        }

        self.total_ms += sample_ms;
        self.count += 1;
        true
    }

    /// Arithmetic mean over every accepted sample
    pub fn mean_ms(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_ms / self.count as f64
        }
    }
}

/// Pipeline-statistics counters captured for one section
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PipelineCounts {
    pub input_primitives: u64,
    pub vertex_invocations: u64,
}

/// One aggregated section
#[derive(Debug, Clone, PartialEq)]
pub struct SectionEntry {
    pub name: String,
    pub timing: SectionStats,
    /// Most recent pipeline-statistics readout, if the section had one
    pub last_counts: Option<PipelineCounts>,
}

/// Per-name statistics in first-seen order
#[derive(Debug, Default)]
pub struct StatsAggregator {
    entries: Vec<SectionEntry>,
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one frame's measurement for `name`. Returns whether the
    /// timing sample was accepted.
    pub fn record(&mut self, name: &str, sample_ms: f64, counts: Option<PipelineCounts>) -> bool {
        let entry = match self.entries.iter().position(|e| e.name == name) {
            Some(index) => &mut self.entries[index],
            None => {
                self.entries.push(SectionEntry {
                    name: name.to_string(),
                    timing: SectionStats::default(),
                    last_counts: None,
                });
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        };

        if counts.is_some() {
            entry.last_counts = counts;
        }
        entry.timing.update(sample_ms)
    }

    pub fn get(&self, name: &str) -> Option<&SectionStats> {
        self.entries.iter().find(|e| e.name == name).map(|e| &e.timing)
    }

    pub fn entry(&self, name: &str) -> Option<&SectionEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SectionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_sets_average_directly() {
        let mut stats = SectionStats::default();
        assert!(stats.update(4.0));
        assert_eq!(stats.moving_avg_ms, 4.0);
        assert_eq!(stats.min_ms, 4.0);
        assert_eq!(stats.max_ms, 4.0);
        assert_eq!(stats.count, 1);
    }

    #[test]
    fn moving_average_follows_recurrence() {
        let samples = [2.0, 4.0, 1.0, 8.0, 3.5];
        let mut stats = SectionStats::default();
        let mut expected = 0.0;

        for (i, &x) in samples.iter().enumerate() {
            assert!(stats.update(x));
            expected = if i == 0 { x } else { 0.95 * expected + 0.05 * x };
            assert!((stats.moving_avg_ms - expected).abs() < 1e-12);
        }

        assert_eq!(stats.count, samples.len() as u64);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 8.0);
        assert!((stats.total_ms - 18.5).abs() < 1e-12);
        assert!((stats.mean_ms() - 3.7).abs() < 1e-12);
    }

    #[test]
    fn out_of_range_samples_leave_stats_untouched() {
        let mut stats = SectionStats::default();
        stats.update(1.0);
        let before = stats;

        for bad in [0.0, 0.0001, 0.00005, 1000.0, 5000.0, -3.0, f64::NAN, f64::INFINITY] {
            assert!(!stats.update(bad), "sample {bad} should be rejected");
            assert_eq!(stats, before);
        }
    }

    #[test]
    fn rejected_first_sample_keeps_stats_empty() {
        let mut stats = SectionStats::default();
        assert!(!stats.update(2000.0));
        assert_eq!(stats.count, 0);
        assert!(stats.update(0.5));
        assert_eq!(stats.moving_avg_ms, 0.5);
    }

    #[test]
    fn aggregator_keeps_first_seen_order() {
        let mut agg = StatsAggregator::new();
        agg.record("Simulation", 0.1, None);
        agg.record(
            "Rasterize",
            0.4,
            Some(PipelineCounts { input_primitives: 12, vertex_invocations: 36 }),
        );
        agg.record("Simulation", 0.3, None);

        let names: Vec<_> = agg.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Simulation", "Rasterize"]);
        assert_eq!(agg.get("Simulation").map(|s| s.count), Some(2));
        assert_eq!(
            agg.entry("Rasterize").and_then(|e| e.last_counts).map(|c| c.input_primitives),
            Some(12)
        );
        assert!(agg.get("RayTrace").is_none());
    }
}
