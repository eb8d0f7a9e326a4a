//! Fixed-capacity sample window

use std::time::Duration;

pub struct RingBuffer<T> {
    samples: Vec<T>,
    capacity: usize,
    index: usize,
}

impl<T: Copy + PartialOrd> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            capacity,
            index: 0,
        }
    }

    /// Overwrites the oldest sample once full. Zero capacity drops everything.
    pub fn push(&mut self, sample: T) {
        if self.capacity == 0 {
            return;
        }
        if self.samples.len() < self.capacity {
            self.samples.push(sample);
        } else {
            self.samples[self.index] = sample;
        }
        self.index = (self.index + 1) % self.capacity;
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Smallest and largest sample, `None` when empty
    pub fn bounds(&self) -> Option<(T, T)> {
        let mut iter = self.samples.iter().copied();
        let first = iter.next()?;
        Some(iter.fold((first, first), |(lo, hi), x| {
            (if x < lo { x } else { lo }, if x > hi { x } else { hi })
        }))
    }
}

impl RingBuffer<Duration> {
    pub fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }

        let sum: Duration = self.samples.iter().sum();
        sum / self.samples.len() as u32
    }

    pub fn min_max(&self) -> (Duration, Duration) {
        self.bounds().unwrap_or((Duration::ZERO, Duration::ZERO))
    }
}

impl RingBuffer<f64> {
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let sum: f64 = self.samples.iter().sum();
        sum / self.samples.len() as f64
    }
}
