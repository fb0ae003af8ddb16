//! Lossless histogram: exact value/count pairs for one metric bucket.
//!
//! Unlike a bucketed histogram every distinct recorded value is kept, which
//! trades memory for exact percentiles. Values are integers (microseconds for
//! transaction durations).

use serde::Serialize;
use std::collections::BTreeMap;

/// Exact frequency table of recorded integer values
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LosslessHistogram {
    counts: BTreeMap<u64, u64>,
    total: u64,
}

/// Serialized form of a [`LosslessHistogram`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HistogramSnapshot {
    /// Distinct recorded values, ascending
    pub values: Vec<u64>,
    /// Frequency of each value in `values`
    pub counts: Vec<u64>,
    /// Sum of `counts`
    #[serde(skip)]
    pub total: u64,
}

impl LosslessHistogram {
    /// Creates an empty histogram
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation of `value`
    #[inline]
    pub fn record(&mut self, value: u64) {
        self.record_n(value, 1);
    }

    /// Records `n` observations of `value`
    pub fn record_n(&mut self, value: u64, n: u64) {
        if n == 0 {
            return;
        }
        *self.counts.entry(value).or_insert(0) += n;
        self.total += n;
    }

    /// Number of distinct values
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns true if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Total number of observations
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Adds every observation of `other` into this histogram
    pub fn merge(&mut self, other: &LosslessHistogram) {
        for (&value, &count) in &other.counts {
            self.record_n(value, count);
        }
    }

    /// Nearest-rank percentile, `q` in `[0.0, 100.0]`
    pub fn percentile(&self, q: f64) -> Option<u64> {
        if self.total == 0 {
            return None;
        }
        let q = q.clamp(0.0, 100.0);
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
        let rank = ((q / 100.0) * self.total as f64).ceil().max(1.0) as u64;

        let mut seen = 0u64;
        for (&value, &count) in &self.counts {
            seen += count;
            if seen >= rank {
                return Some(value);
            }
        }
        self.counts.keys().next_back().copied()
    }

    /// Snapshot of the distribution; does not modify the histogram
    pub fn serialize(&self) -> HistogramSnapshot {
        let mut values = Vec::with_capacity(self.counts.len());
        let mut counts = Vec::with_capacity(self.counts.len());
        for (&value, &count) in &self.counts {
            values.push(value);
            counts.push(count);
        }
        HistogramSnapshot {
            values,
            counts,
            total: self.total,
        }
    }
}
