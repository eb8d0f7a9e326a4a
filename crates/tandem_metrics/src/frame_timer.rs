//! CPU-side frame pacing

use super::ring_buffer::RingBuffer;
use std::time::{Duration, Instant};

/// Tracks wall-clock time between `begin` and `end` over a rolling window.
/// The runtime logs the average next to the GPU report when it stops.
pub struct FrameTimer {
    frame_start: Option<Instant>,
    frame_times: RingBuffer<Duration>,
}

impl FrameTimer {
    pub fn new(capacity: usize) -> Self {
        Self {
            frame_start: None,
            frame_times: RingBuffer::new(capacity.max(1)),
        }
    }

    pub fn begin(&mut self) {
        self.frame_start = Some(Instant::now());
    }

    /// Closes the frame opened by `begin`. Without a matching `begin` this
    /// is a no-op.
    pub fn end(&mut self) {
        if let Some(start) = self.frame_start.take() {
            self.frame_times.push(start.elapsed());
        }
    }

    /// Feed an externally measured frame duration
    pub fn record(&mut self, frame_time: Duration) {
        self.frame_times.push(frame_time);
    }

    pub fn fps(&self) -> f64 {
        let avg = self.frame_times.average();
        if avg.as_secs_f64() > 0.0 {
            1.0 / avg.as_secs_f64()
        } else {
            0.0
        }
    }

    pub fn frame_time_ms(&self) -> f64 {
        self.frame_times.average().as_secs_f64() * 1000.0
    }

    pub fn frame_time_range_ms(&self) -> (f64, f64) {
        let (min, max) = self.frame_times.min_max();
        (min.as_secs_f64() * 1000.0, max.as_secs_f64() * 1000.0)
    }

    pub fn samples(&self) -> usize {
        self.frame_times.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recorded_frames_drive_fps() {
        let mut timer = FrameTimer::new(4);
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));
        assert!((timer.frame_time_ms() - 20.0).abs() < 1e-9);
        assert!((timer.fps() - 50.0).abs() < 1e-9);
        assert_eq!(timer.frame_time_range_ms(), (10.0, 30.0));
    }

    #[test]
    fn end_without_begin_records_nothing() {
        let mut timer = FrameTimer::new(4);
        timer.end();
        assert_eq!(timer.samples(), 0);
        assert_eq!(timer.fps(), 0.0);
    }
}
