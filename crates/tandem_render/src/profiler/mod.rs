//! GPU profiler
//!
//! Wraps named sections of a frame's command stream in timestamp queries
//! (and, for outermost sections, a pipeline-statistics query), then folds
//! the results into per-name [`SectionStats`](tandem_metrics::SectionStats).
//!
//! Each in-flight slot owns its own pair of query pools. A slot's results
//! are harvested exactly once: by a snapshot poll, a blocking report, or at
//! the latest when the slot comes around again and its fence has been
//! waited on. Running out of query budget or polling too early never fails
//! a frame; the section is simply not measured.

mod query;

pub use query::{
    FrameSample, QueryLimits, QueryReadback, ReadMode, SectionRecord, TimestampStage,
};

use crate::device::{QueryDevice, QueryRecorder};
use crate::error::RenderError;
use tandem_metrics::{Counter, PipelineCounts, StatsAggregator};

/// Placeholder before any section has been recorded
pub const PROFILING_PLACEHOLDER: &str = "Profiling...";
/// Placeholder while the first results are still in flight
pub const COLLECTING_PLACEHOLDER: &str = "Collecting...";

pub const COUNTER_DRAWS: &str = "draws";
pub const COUNTER_INSTANCES: &str = "instances";
pub const COUNTER_DISPATCHES: &str = "dispatches";
pub const COUNTER_TRACE_RAYS: &str = "trace_rays";

#[derive(Debug, Default)]
struct SlotQueries {
    records: Vec<SectionRecord>,
    timestamps_used: u32,
    statistics_used: u32,
    /// Recorded but not yet harvested
    pending: bool,
    /// Sequence number of the frame recorded into the slot
    frame: u64,
}

impl SlotQueries {
    fn clear(&mut self) {
        self.records.clear();
        self.timestamps_used = 0;
        self.statistics_used = 0;
        self.pending = false;
    }
}

pub struct Profiler {
    limits: QueryLimits,
    max_queries: u32,
    slots: Vec<SlotQueries>,
    recording: Option<usize>,
    /// Indices into the recording slot's records
    open: Vec<usize>,
    budget_warned: bool,
    frames_begun: u64,
    discarded: u64,
    stats: StatsAggregator,
    /// Names seen as outermost sections, in first-seen order
    outer_sections: Vec<String>,
    counters: Counter,
    last_slot: Option<usize>,
    last_frame: Vec<FrameSample>,
    /// Frame number `last_frame` was measured in
    last_frame_seq: Option<u64>,
}

impl Profiler {
    /// `max_queries` is the size of each pool; every section takes two
    /// timestamp queries.
    pub fn new(limits: QueryLimits, max_queries: u32, slots: usize) -> Self {
        if !limits.timestamps_supported {
            tracing::warn!("timestamp queries unsupported, GPU profiling disabled");
        }
        Self {
            limits,
            max_queries,
            slots: (0..slots.max(1)).map(|_| SlotQueries::default()).collect(),
            recording: None,
            open: Vec::new(),
            budget_warned: false,
            frames_begun: 0,
            discarded: 0,
            stats: StatsAggregator::new(),
            outer_sections: Vec::new(),
            counters: Counter::new(),
            last_slot: None,
            last_frame: Vec::new(),
            last_frame_seq: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.limits.timestamps_supported
    }

    pub fn max_queries(&self) -> u32 {
        self.max_queries
    }

    /// Start a frame on `slot`: reset its pools and per-frame counters.
    /// Results of the slot's previous frame must be harvested before this.
    pub fn begin_frame<R: QueryRecorder + ?Sized>(&mut self, rec: &mut R, slot: usize) {
        let Some(queries) = self.slots.get_mut(slot) else {
            tracing::error!(slot, "profiler slot out of range");
            return;
        };
        if queries.pending {
            self.discarded += 1;
            if self.discarded.is_power_of_two() {
                tracing::warn!(
                    slot,
                    discarded = self.discarded,
                    "profiler results overwritten before they were read"
                );
            } else {
                tracing::debug!(slot, "discarding unharvested profiler results");
            }
        }
        queries.clear();
        self.frames_begun += 1;
        queries.frame = self.frames_begun;

        if self.limits.timestamps_supported {
            rec.reset_queries(0, self.max_queries);
        }
        self.counters.reset_all();
        self.recording = Some(slot);
        self.open.clear();
        self.budget_warned = false;
    }

    pub fn begin_section<R: QueryRecorder + ?Sized>(&mut self, rec: &mut R, name: &str) {
        let Some(slot) = self.recording else {
            return;
        };
        let depth = self.open.len() as u32;
        let queries = &mut self.slots[slot];

        let over_budget = queries.timestamps_used + 2 > self.max_queries;
        if !self.limits.timestamps_supported || over_budget {
            if over_budget && !self.budget_warned {
                tracing::warn!(
                    section = name,
                    max_queries = self.max_queries,
                    "profiler query budget exhausted, skipping sections this frame"
                );
                self.budget_warned = true;
            }
            queries.records.push(SectionRecord {
                name: name.to_string(),
                start: 0,
                statistics: None,
                depth,
                skipped: true,
                closed: false,
            });
            self.open.push(queries.records.len() - 1);
            return;
        }

        let start = queries.timestamps_used;
        queries.timestamps_used += 2;
        rec.write_timestamp(TimestampStage::TopOfPipe, start);

        // One active statistics query at a time: outermost sections only
        let statistics = (self.limits.statistics_supported
            && depth == 0
            && queries.statistics_used < self.max_queries)
            .then(|| {
                let index = queries.statistics_used;
                queries.statistics_used += 1;
                rec.begin_statistics(index);
                index
            });

        queries.records.push(SectionRecord {
            name: name.to_string(),
            start,
            statistics,
            depth,
            skipped: false,
            closed: false,
        });
        self.open.push(queries.records.len() - 1);
    }

    /// Close the innermost open section. Without one this does nothing.
    pub fn end_section<R: QueryRecorder + ?Sized>(&mut self, rec: &mut R) {
        let (Some(slot), Some(index)) = (self.recording, self.open.pop()) else {
            return;
        };
        let record = &mut self.slots[slot].records[index];
        record.closed = true;
        if record.skipped {
            return;
        }
        if let Some(statistics) = record.statistics {
            rec.end_statistics(statistics);
        }
        rec.write_timestamp(TimestampStage::BottomOfPipe, record.end());
    }

    /// Finish recording the frame, closing any section left open
    pub fn end_frame<R: QueryRecorder + ?Sized>(&mut self, rec: &mut R) {
        let Some(slot) = self.recording else {
            return;
        };
        while let Some(&index) = self.open.last() {
            tracing::warn!(
                section = %self.slots[slot].records[index].name,
                "profiler section left open at end of frame"
            );
            self.end_section(rec);
        }

        let queries = &mut self.slots[slot];
        queries.pending = queries.records.iter().any(|r| !r.skipped);
        self.recording = None;
        self.last_slot = Some(slot);
    }

    pub fn count(&mut self, name: &str, value: usize) {
        self.counters.increment(name, value);
    }

    /// Non-blocking harvest of `slot`. Returns whether new results were
    /// folded into the statistics.
    pub fn harvest<D: QueryDevice + ?Sized>(
        &mut self,
        device: &D,
        slot: usize,
    ) -> Result<bool, RenderError> {
        self.collect(device, slot, ReadMode::NoWait)
    }

    fn collect<D: QueryDevice + ?Sized>(
        &mut self,
        device: &D,
        slot: usize,
        mode: ReadMode,
    ) -> Result<bool, RenderError> {
        let Some(queries) = self.slots.get(slot) else {
            return Ok(false);
        };
        if !queries.pending || self.recording == Some(slot) {
            return Ok(false);
        }

        let stamps = match device.read_timestamps(slot, 0, queries.timestamps_used, mode)? {
            QueryReadback::Ready(stamps) => stamps,
            QueryReadback::NotReady => return Ok(false),
        };
        let counts = if queries.statistics_used > 0 {
            match device.read_statistics(slot, 0, queries.statistics_used, mode)? {
                QueryReadback::Ready(counts) => counts,
                QueryReadback::NotReady => return Ok(false),
            }
        } else {
            Vec::new()
        };

        let mut samples = Vec::with_capacity(queries.records.len());
        for record in queries.records.iter().filter(|r| r.closed && !r.skipped) {
            let (Some(&start), Some(&end)) = (
                stamps.get(record.start as usize),
                stamps.get(record.end() as usize),
            ) else {
                continue;
            };
            let ms = self.limits.elapsed_ms(start, end);
            let section_counts: Option<PipelineCounts> =
                record.statistics.and_then(|i| counts.get(i as usize).copied());

            self.stats.record(&record.name, ms, section_counts);
            if record.depth == 0 && !self.outer_sections.contains(&record.name) {
                self.outer_sections.push(record.name.clone());
            }
            samples.push(FrameSample {
                name: record.name.clone(),
                ms,
                depth: record.depth,
                counts: section_counts,
            });
        }

        let frame = self.slots[slot].frame;
        self.slots[slot].pending = false;
        if self.last_frame_seq.map_or(true, |seq| frame > seq) {
            self.last_frame = samples;
            self.last_frame_seq = Some(frame);
        }
        Ok(true)
    }

    /// One-line readout of the smoothed section times. Never waits on the
    /// GPU; query failures only degrade the readout.
    pub fn snapshot<D: QueryDevice + ?Sized>(&mut self, device: &D) -> String {
        for slot in 0..self.slots.len() {
            if let Err(err) = self.harvest(device, slot) {
                tracing::warn!(slot, %err, "profiler poll failed");
            }
        }

        if self.stats.is_empty() {
            let waiting = self.slots.iter().any(|s| s.pending);
            return if waiting { COLLECTING_PLACEHOLDER } else { PROFILING_PLACEHOLDER }.to_string();
        }

        let mut parts: Vec<String> = self
            .stats
            .iter()
            .map(|entry| format!("[GPU] {}: {:.2}ms", entry.name, entry.timing.moving_avg_ms))
            .collect();

        let total: f64 = self
            .outer_sections
            .iter()
            .filter_map(|name| self.stats.get(name))
            .map(|stats| stats.moving_avg_ms)
            .sum();
        parts.push(format!("Total: {total:.2}ms ({:.0} FPS)", fps(total)));
        parts.join(" | ")
    }

    /// Multi-line report of the most recent frame, waiting for its results
    pub fn report<D: QueryDevice + ?Sized>(&mut self, device: &D) -> Result<String, RenderError> {
        if let Some(slot) = self.last_slot {
            self.collect(device, slot, ReadMode::Wait)?;
        }
        if self.last_frame.is_empty() {
            return Ok(PROFILING_PLACEHOLDER.to_string());
        }

        let mut lines = vec!["=== Performance Frame ===".to_string()];
        for sample in &self.last_frame {
            let indent = "  ".repeat(sample.depth as usize);
            let mut line = format!("{indent}[GPU] {}: {:.4} ms", sample.name, sample.ms);
            if let Some(counts) = sample.counts {
                line.push_str(&format!(
                    " (primitives: {}, vertex invocations: {})",
                    counts.input_primitives, counts.vertex_invocations
                ));
            }
            lines.push(line);
        }

        let total: f64 = self
            .last_frame
            .iter()
            .filter(|s| s.depth == 0)
            .map(|s| s.ms)
            .sum();
        lines.push("-------------------------".to_string());
        lines.push(format!("Total GPU Time: {total:.4} ms"));
        lines.push(format!("Est. FPS: {:.1}", fps(total)));

        let calls: Vec<String> = self
            .counters
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        if !calls.is_empty() {
            lines.push(format!("Calls: {}", calls.join(" ")));
        }
        Ok(lines.join("\n"))
    }

    pub fn stats(&self) -> &StatsAggregator {
        &self.stats
    }

    pub fn last_frame(&self) -> &[FrameSample] {
        &self.last_frame
    }

    /// Frames whose results were reset before anything read them
    pub fn discarded_frames(&self) -> u64 {
        self.discarded
    }

    pub fn records(&self, slot: usize) -> &[SectionRecord] {
        self.slots.get(slot).map_or(&[], |s| s.records.as_slice())
    }

    pub fn counter(&self, name: &str) -> usize {
        self.counters.get(name)
    }
}

fn fps(total_ms: f64) -> f64 {
    if total_ms > 0.0 {
        1000.0 / total_ms
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Reset(u32, u32),
        Timestamp(TimestampStage, u32),
        BeginStats(u32),
        EndStats(u32),
    }

    /// Query recorder whose "GPU" writes every timestamp 1 ms after the
    /// previous one.
    struct FakeQueries {
        calls: Vec<Call>,
        stamps: Vec<Vec<u64>>,
        slot: usize,
        clock: u64,
        ready: Cell<bool>,
        limits: QueryLimits,
    }

    impl FakeQueries {
        fn new(slots: usize, statistics: bool) -> Self {
            Self {
                calls: Vec::new(),
                stamps: vec![vec![0; 64]; slots],
                slot: 0,
                clock: 0,
                ready: Cell::new(true),
                limits: QueryLimits {
                    timestamp_period_ns: 1.0,
                    timestamp_valid_bits: 64,
                    timestamps_supported: true,
                    statistics_supported: statistics,
                },
            }
        }

        fn timestamps_written(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::Timestamp(..)))
                .count()
        }
    }

    impl QueryRecorder for FakeQueries {
        fn reset_queries(&mut self, first: u32, count: u32) {
            self.calls.push(Call::Reset(first, count));
        }

        fn write_timestamp(&mut self, stage: TimestampStage, query: u32) {
            self.clock += 1_000_000;
            self.stamps[self.slot][query as usize] = self.clock;
            self.calls.push(Call::Timestamp(stage, query));
        }

        fn begin_statistics(&mut self, query: u32) {
            self.calls.push(Call::BeginStats(query));
        }

        fn end_statistics(&mut self, query: u32) {
            self.calls.push(Call::EndStats(query));
        }
    }

    impl QueryDevice for FakeQueries {
        fn query_limits(&self) -> QueryLimits {
            self.limits
        }

        fn read_timestamps(
            &self,
            slot: usize,
            first: u32,
            count: u32,
            mode: ReadMode,
        ) -> Result<QueryReadback<Vec<u64>>, RenderError> {
            if !self.ready.get() && mode == ReadMode::NoWait {
                return Ok(QueryReadback::NotReady);
            }
            let range = first as usize..(first + count) as usize;
            Ok(QueryReadback::Ready(self.stamps[slot][range].to_vec()))
        }

        fn read_statistics(
            &self,
            _slot: usize,
            _first: u32,
            count: u32,
            _mode: ReadMode,
        ) -> Result<QueryReadback<Vec<PipelineCounts>>, RenderError> {
            let counts = PipelineCounts { input_primitives: 12, vertex_invocations: 36 };
            Ok(QueryReadback::Ready(vec![counts; count as usize]))
        }
    }

    fn profiler_for(fake: &FakeQueries, max_queries: u32) -> Profiler {
        Profiler::new(fake.query_limits(), max_queries, fake.stamps.len())
    }

    #[test]
    fn sections_write_paired_timestamps() {
        let mut fake = FakeQueries::new(2, true);
        let mut profiler = profiler_for(&fake, 16);

        profiler.begin_frame(&mut fake, 0);
        profiler.begin_section(&mut fake, "Simulation");
        profiler.end_section(&mut fake);
        profiler.begin_section(&mut fake, "Rasterize");
        profiler.end_section(&mut fake);
        profiler.end_frame(&mut fake);

        assert_eq!(
            fake.calls,
            vec![
                Call::Reset(0, 16),
                Call::Timestamp(TimestampStage::TopOfPipe, 0),
                Call::BeginStats(0),
                Call::EndStats(0),
                Call::Timestamp(TimestampStage::BottomOfPipe, 1),
                Call::Timestamp(TimestampStage::TopOfPipe, 2),
                Call::BeginStats(1),
                Call::EndStats(1),
                Call::Timestamp(TimestampStage::BottomOfPipe, 3),
            ]
        );

        assert!(profiler.harvest(&fake, 0).unwrap());
        let sim = profiler.stats().get("Simulation").unwrap();
        assert_eq!(sim.count, 1);
        assert!((sim.moving_avg_ms - 1.0).abs() < 1e-9);
        assert_eq!(
            profiler.stats().entry("Rasterize").and_then(|e| e.last_counts),
            Some(PipelineCounts { input_primitives: 12, vertex_invocations: 36 })
        );
    }

    #[test]
    fn end_without_begin_is_a_no_op() {
        let mut fake = FakeQueries::new(1, false);
        let mut profiler = profiler_for(&fake, 16);

        profiler.begin_frame(&mut fake, 0);
        let before = fake.calls.len();
        profiler.end_section(&mut fake);
        profiler.end_section(&mut fake);
        assert_eq!(fake.calls.len(), before);

        profiler.begin_section(&mut fake, "RayTrace");
        profiler.end_section(&mut fake);
        profiler.end_section(&mut fake);
        assert_eq!(fake.timestamps_written(), 2);
        assert!(profiler.records(0).iter().all(|r| r.closed));
    }

    #[test]
    fn budget_exhaustion_skips_sections() {
        let mut fake = FakeQueries::new(1, false);
        // Room for two sections
        let mut profiler = profiler_for(&fake, 5);

        profiler.begin_frame(&mut fake, 0);
        for name in ["a", "b", "c", "d"] {
            profiler.begin_section(&mut fake, name);
            profiler.end_section(&mut fake);
        }
        profiler.end_frame(&mut fake);

        assert_eq!(fake.timestamps_written(), 4);
        let records = profiler.records(0);
        assert_eq!(records.len(), 4);
        assert!(!records[0].skipped && !records[1].skipped);
        assert!(records[2].skipped && records[3].skipped);
        assert!(records.iter().filter(|r| !r.skipped).all(|r| r.end() < 5));

        profiler.harvest(&fake, 0).unwrap();
        assert_eq!(profiler.stats().len(), 2);
        assert!(profiler.stats().get("c").is_none());
    }

    #[test]
    fn nested_sections_skip_statistics() {
        let mut fake = FakeQueries::new(1, true);
        let mut profiler = profiler_for(&fake, 16);

        profiler.begin_frame(&mut fake, 0);
        profiler.begin_section(&mut fake, "outer");
        profiler.begin_section(&mut fake, "inner");
        profiler.end_section(&mut fake);
        profiler.end_section(&mut fake);
        profiler.end_frame(&mut fake);

        let records = profiler.records(0);
        assert_eq!(records[0].statistics, Some(0));
        assert_eq!(records[1].statistics, None);
        assert_eq!(records[1].depth, 1);
    }

    #[test]
    fn open_sections_are_closed_at_end_of_frame() {
        let mut fake = FakeQueries::new(1, false);
        let mut profiler = profiler_for(&fake, 16);

        profiler.begin_frame(&mut fake, 0);
        profiler.begin_section(&mut fake, "dangling");
        profiler.end_frame(&mut fake);

        assert_eq!(fake.timestamps_written(), 2);
        assert!(profiler.harvest(&fake, 0).unwrap());
        assert!(profiler.stats().get("dangling").is_some());
    }

    #[test]
    fn results_are_harvested_exactly_once() {
        let mut fake = FakeQueries::new(1, false);
        let mut profiler = profiler_for(&fake, 16);

        profiler.begin_frame(&mut fake, 0);
        profiler.begin_section(&mut fake, "Simulation");
        profiler.end_section(&mut fake);
        profiler.end_frame(&mut fake);

        assert!(profiler.harvest(&fake, 0).unwrap());
        assert!(!profiler.harvest(&fake, 0).unwrap());
        profiler.snapshot(&fake);
        assert_eq!(profiler.stats().get("Simulation").unwrap().count, 1);
    }

    #[test]
    fn snapshot_placeholders_and_format() {
        let mut fake = FakeQueries::new(1, false);
        let mut profiler = profiler_for(&fake, 16);
        assert_eq!(profiler.snapshot(&fake), PROFILING_PLACEHOLDER);

        profiler.begin_frame(&mut fake, 0);
        profiler.begin_section(&mut fake, "Simulation");
        profiler.end_section(&mut fake);
        profiler.begin_section(&mut fake, "RayTrace");
        profiler.end_section(&mut fake);
        profiler.end_frame(&mut fake);

        fake.ready.set(false);
        assert_eq!(profiler.snapshot(&fake), COLLECTING_PLACEHOLDER);

        fake.ready.set(true);
        assert_eq!(
            profiler.snapshot(&fake),
            "[GPU] Simulation: 1.00ms | [GPU] RayTrace: 1.00ms | Total: 2.00ms (500 FPS)"
        );
    }

    fn one_section_frame(profiler: &mut Profiler, fake: &mut FakeQueries, slot: usize, name: &str) {
        fake.slot = slot;
        profiler.begin_frame(fake, slot);
        profiler.begin_section(fake, name);
        profiler.end_section(fake);
        profiler.end_frame(fake);
    }

    #[test]
    fn report_keeps_the_newest_frame_when_slots_harvest_out_of_order() {
        let mut fake = FakeQueries::new(2, false);
        let mut profiler = profiler_for(&fake, 16);

        one_section_frame(&mut profiler, &mut fake, 1, "older");
        one_section_frame(&mut profiler, &mut fake, 0, "newer");

        // Polls slot 0 before slot 1
        profiler.snapshot(&fake);
        assert_eq!(profiler.stats().len(), 2);

        let report = profiler.report(&fake).unwrap();
        assert!(report.contains("[GPU] newer:"), "{report}");
        assert!(!report.contains("older"), "{report}");
    }

    #[test]
    fn overwritten_results_are_counted() {
        let mut fake = FakeQueries::new(1, false);
        let mut profiler = profiler_for(&fake, 16);

        one_section_frame(&mut profiler, &mut fake, 0, "Simulation");
        one_section_frame(&mut profiler, &mut fake, 0, "Simulation");
        assert_eq!(profiler.discarded_frames(), 1);

        assert!(profiler.harvest(&fake, 0).unwrap());
        one_section_frame(&mut profiler, &mut fake, 0, "Simulation");
        assert_eq!(profiler.discarded_frames(), 1);
        assert_eq!(profiler.stats().get("Simulation").unwrap().count, 1);
    }

    #[test]
    fn blocking_report_waits_for_results() {
        let mut fake = FakeQueries::new(1, false);
        let mut profiler = profiler_for(&fake, 16);

        profiler.begin_frame(&mut fake, 0);
        profiler.count(COUNTER_DISPATCHES, 1);
        profiler.begin_section(&mut fake, "Simulation");
        profiler.end_section(&mut fake);
        profiler.end_frame(&mut fake);

        fake.ready.set(false);
        let report = profiler.report(&fake).unwrap();
        assert!(report.starts_with("=== Performance Frame ==="));
        assert!(report.contains("[GPU] Simulation: 1.0000 ms"));
        assert!(report.contains("Total GPU Time: 1.0000 ms"));
        assert!(report.contains("Est. FPS: 1000.0"));
    }

    #[test]
    fn unsupported_timestamps_write_nothing() {
        let mut fake = FakeQueries::new(1, true);
        let mut profiler = Profiler::new(QueryLimits::unsupported(), 16, 1);

        profiler.begin_frame(&mut fake, 0);
        profiler.begin_section(&mut fake, "Simulation");
        profiler.end_section(&mut fake);
        profiler.end_frame(&mut fake);

        assert!(fake.calls.is_empty());
        assert_eq!(profiler.snapshot(&fake), PROFILING_PLACEHOLDER);
    }
}
