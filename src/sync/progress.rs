use std::collections::{HashMap, HashSet};

use crate::sync::ItemDownload;

/// Aggregate completion over the items of the current pass.
///
/// The working set is fixed between [`reset`](Self::reset) and
/// [`add`](Self::add); within it the published value only moves up.
#[derive(Debug, Default)]
pub struct ProgressAggregator {
    working_set: HashSet<String>,
    retired: HashSet<String>,
    last_emitted: f64,
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new pass over `keys`
    pub fn reset<I>(&mut self, keys: I, items: &HashMap<String, ItemDownload>) -> f64
    where
        I: IntoIterator<Item = String>,
    {
        self.working_set = keys.into_iter().collect();
        self.retired.clear();
        self.rebase(items)
    }

    /// Grow the working set mid-pass. Returns the new baseline if the key was
    /// not already tracked.
    pub fn add(&mut self, key: &str, items: &HashMap<String, ItemDownload>) -> Option<f64> {
        self.retired.remove(key);
        if self.working_set.insert(key.to_string()) {
            Some(self.rebase(items))
        } else {
            None
        }
    }

    /// A purged item no longer contributes outstanding work
    pub fn retire(&mut self, key: &str) {
        if self.working_set.contains(key) {
            self.retired.insert(key.to_string());
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.working_set.contains(key)
    }

    pub fn len(&self) -> usize {
        self.working_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.working_set.is_empty()
    }

    /// Last published value
    pub fn current(&self) -> f64 {
        self.last_emitted
    }

    pub fn compute(&self, items: &HashMap<String, ItemDownload>) -> f64 {
        if self.working_set.is_empty() {
            return 1.0;
        }
        let total: f64 = self
            .working_set
            .iter()
            .map(|key| {
                if self.retired.contains(key) {
                    1.0
                } else {
                    items.get(key).map_or(0.0, ItemDownload::progress)
                }
            })
            .sum();
        (total / self.working_set.len() as f64).clamp(0.0, 1.0)
    }

    /// New value to publish, only if it strictly increased
    pub fn recompute(&mut self, items: &HashMap<String, ItemDownload>) -> Option<f64> {
        let value = self.compute(items);
        if value > self.last_emitted {
            self.last_emitted = value;
            Some(value)
        } else {
            None
        }
    }

    fn rebase(&mut self, items: &HashMap<String, ItemDownload>) -> f64 {
        self.last_emitted = self.compute(items);
        self.last_emitted
    }
}
