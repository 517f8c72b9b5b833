//! Coverage and gap arithmetic over inclusive time ranges.

use serde::{Deserialize, Serialize};

/// An inclusive `[since, until]` window in unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub since: u64,
    pub until: u64,
}

impl TimeRange {
    pub fn new(since: u64, until: u64) -> Self {
        Self { since, until }
    }

    /// Whether `self` contains all of `other`.
    pub fn covers(&self, other: &TimeRange) -> bool {
        self.since <= other.since && self.until >= other.until
    }

    /// Whether `self` straddles an edge of `other` or sits inside it.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        (self.since <= other.since && self.until >= other.since)
            || (self.since <= other.until && self.until >= other.until)
            || (self.since >= other.since && self.until <= other.until)
    }

    /// Parts of `requested` outside `self`, at most one on each side.
    pub fn gaps(&self, requested: &TimeRange) -> Vec<TimeRange> {
        let mut gaps = Vec::with_capacity(2);
        if requested.since < self.since {
            gaps.push(TimeRange::new(requested.since, self.since - 1));
        }
        if requested.until > self.until {
            gaps.push(TimeRange::new(self.until + 1, requested.until));
        }
        gaps
    }
}
