// Vector clocks: the causality primitive the conflict resolver uses to
// decide whether one edit happened-before, happened-after, or concurrently
// with another.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

/// A sparse per-author causal counter. An absent entry reads as 0, so two
/// clocks that have never seen the same author compare correctly without
/// either side padding the other's keys in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorClock {
    entries: HashMap<String, u64>,
}

/// The outcome of comparing two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Causality {
    Before,
    After,
    Equal,
    Concurrent,
}

impl VectorClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: HashMap<String, u64>) -> Self {
        Self { entries }
    }

    pub fn get(&self, author: &str) -> u64 {
        *self.entries.get(author).unwrap_or(&0)
    }

    /// Increments the counter for `author` and returns the new value.
    pub fn inc(&mut self, author: &str) -> u64 {
        let entry = self.entries.entry(author.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Pointwise max of every author's counter across both clocks.
    pub fn merge(&mut self, other: &VectorClock) {
        for (author, &count) in &other.entries {
            let entry = self.entries.entry(author.clone()).or_insert(0);
            if count > *entry {
                *entry = count;
            }
        }
    }

    pub fn merged(&self, other: &VectorClock) -> VectorClock {
        let mut out = self.clone();
        out.merge(other);
        out
    }

    fn authors<'a>(&'a self, other: &'a VectorClock) -> impl Iterator<Item = &'a String> {
        self.entries.keys().chain(other.entries.keys())
    }

    pub fn happens_before(&self, other: &VectorClock) -> bool {
        let mut strictly_less = false;
        for author in self.authors(other) {
            match self.get(author).cmp(&other.get(author)) {
                Ordering::Greater => return false,
                Ordering::Less => strictly_less = true,
                Ordering::Equal => {}
            }
        }
        strictly_less
    }

    pub fn concurrent(&self, other: &VectorClock) -> bool {
        !self.happens_before(other) && !other.happens_before(self) && self != other
    }

    pub fn compare(&self, other: &VectorClock) -> Causality {
        if self == other {
            Causality::Equal
        } else if self.happens_before(other) {
            Causality::Before
        } else if other.happens_before(self) {
            Causality::After
        } else {
            Causality::Concurrent
        }
    }

    pub fn into_entries(self) -> HashMap<String, u64> {
        self.entries
    }

    pub fn entries(&self) -> &HashMap<String, u64> {
        &self.entries
    }
}
