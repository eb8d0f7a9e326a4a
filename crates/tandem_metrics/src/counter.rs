//! Named per-frame event counters (draws, dispatches, trace calls)

use std::collections::BTreeMap;

#[derive(Default)]
pub struct Counter {
    counters: BTreeMap<String, usize>,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment(&mut self, name: &str, value: usize) {
        *self.counters.entry(name.to_string()).or_insert(0) += value;
    }

    pub fn set(&mut self, name: &str, value: usize) {
        self.counters.insert(name.to_string(), value);
    }

    pub fn get(&self, name: &str) -> usize {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn reset_all(&mut self) {
        self.counters.clear();
    }

    /// Sorted by name so log lines are stable frame to frame
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counters.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_reset() {
        let mut counter = Counter::new();
        counter.increment("draws", 2);
        counter.increment("draws", 3);
        counter.set("dispatches", 1);

        assert_eq!(counter.get("draws"), 5);
        assert_eq!(counter.get("trace_rays"), 0);
        let names: Vec<_> = counter.iter().map(|(k, _)| k).collect();
        assert_eq!(names, ["dispatches", "draws"]);

        counter.reset_all();
        assert_eq!(counter.get("draws"), 0);
    }
}
