//! Metric bucket store: one accumulator per admitted key per window.

use crate::core::FieldValue;
use crate::metrics::key::CompositeKey;
use ahash::RandomState;
use std::collections::{BTreeMap, HashMap};

/// Overflow bookkeeping of a single bucket.
///
/// Counts are distinct original keys folded into the bucket. An
/// aggregator-level overflow dominates a dimension-level one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowTally {
    /// Regular bucket
    #[default]
    None,
    /// `_other` bucket for the dimension at `depth`
    Dimension {
        /// Index of the overflowed dimension
        depth: usize,
        /// Groups folded in
        count: u64,
    },
    /// The reserved aggregator overflow bucket
    Aggregator {
        /// Groups folded in
        count: u64,
    },
}

impl OverflowTally {
    /// Records one more group redirected at dimension `depth`
    pub fn record_dimension(&mut self, depth: usize) {
        *self = match *self {
            OverflowTally::None => OverflowTally::Dimension { depth, count: 1 },
            OverflowTally::Dimension { depth: d, count } => OverflowTally::Dimension {
                depth: d.min(depth),
                count: count + 1,
            },
            aggregator @ OverflowTally::Aggregator { .. } => aggregator,
        };
    }

    /// Records one more group redirected by the aggregator limit
    pub fn record_aggregator(&mut self) {
        *self = match *self {
            OverflowTally::Aggregator { count } => OverflowTally::Aggregator { count: count + 1 },
            OverflowTally::None | OverflowTally::Dimension { .. } => {
                OverflowTally::Aggregator { count: 1 }
            },
        };
    }

    /// The dominant overflow count, zero for regular buckets
    pub fn overflow_count(&self) -> u64 {
        match self {
            OverflowTally::None => 0,
            OverflowTally::Dimension { count, .. } | OverflowTally::Aggregator { count } => *count,
        }
    }

    /// True for overflow buckets
    pub fn is_overflow(&self) -> bool {
        !matches!(self, OverflowTally::None)
    }
}

/// Accumulator of one group for one window
#[derive(Debug, Clone)]
pub struct MetricBucket<A> {
    /// Key field values after sentinel substitution
    pub identity: BTreeMap<&'static str, FieldValue>,
    /// Overflow bookkeeping
    pub overflow: OverflowTally,
    /// Metricset-specific state
    pub accumulator: A,
    /// Set when a reduce failed; tainted buckets are not emitted
    pub tainted: bool,
}

impl<A> MetricBucket<A> {
    /// Creates a bucket with the given identity
    pub fn new(identity: BTreeMap<&'static str, FieldValue>, accumulator: A) -> Self {
        Self {
            identity,
            overflow: OverflowTally::None,
            accumulator,
            tainted: false,
        }
    }

    /// Identity value of a key field
    pub fn identity_str(&self, field: &str) -> Option<&str> {
        self.identity.get(field).and_then(FieldValue::as_str)
    }
}

/// Buckets of the current window keyed by composite key
#[derive(Debug)]
pub struct MetricBucketStore<A> {
    buckets: HashMap<CompositeKey, MetricBucket<A>, RandomState>,
}

impl<A> Default for MetricBucketStore<A> {
    fn default() -> Self {
        Self {
            buckets: HashMap::default(),
        }
    }
}

impl<A> MetricBucketStore<A> {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bucket for `key`, creating it with `init` if absent.
    ///
    /// The boolean is true when the bucket was created by this call.
    pub fn get_or_create<F>(&mut self, key: CompositeKey, init: F) -> (&mut MetricBucket<A>, bool)
    where
        F: FnOnce() -> MetricBucket<A>,
    {
        use std::collections::hash_map::Entry;
        match self.buckets.entry(key) {
            Entry::Occupied(entry) => (entry.into_mut(), false),
            Entry::Vacant(entry) => (entry.insert(init()), true),
        }
    }

    /// Looks up a bucket
    pub fn get(&self, key: &CompositeKey) -> Option<&MetricBucket<A>> {
        self.buckets.get(key)
    }

    /// Looks up a bucket mutably
    pub fn get_mut(&mut self, key: &CompositeKey) -> Option<&mut MetricBucket<A>> {
        self.buckets.get_mut(key)
    }

    /// Visits every bucket
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(CompositeKey, &MetricBucket<A>),
    {
        for (key, bucket) in &self.buckets {
            f(*key, bucket);
        }
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Returns true if no buckets exist
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Removes and returns every bucket, leaving the store empty
    pub fn drain(&mut self) -> impl Iterator<Item = (CompositeKey, MetricBucket<A>)> + '_ {
        self.buckets.drain()
    }

    /// Discards every bucket
    pub fn clear(&mut self) {
        self.buckets.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(service: &str) -> MetricBucket<u64> {
        let mut identity = BTreeMap::new();
        identity.insert("service.name", FieldValue::from(service));
        MetricBucket::new(identity, 0)
    }

    #[test]
    fn test_get_or_create_once() {
        let mut store = MetricBucketStore::new();
        let key = CompositeKey::from_raw(1);

        let (b, created) = store.get_or_create(key, || bucket("svc"));
        b.accumulator += 1;
        assert!(created);

        let (b, created) = store.get_or_create(key, || panic!("must not re-init"));
        b.accumulator += 1;
        assert!(!created);

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).map(|b| b.accumulator), Some(2));
        assert_eq!(store.get(&key).and_then(|b| b.identity_str("service.name")), Some("svc"));
    }

    #[test]
    fn test_drain_empties_store() {
        let mut store = MetricBucketStore::new();
        store.get_or_create(CompositeKey::from_raw(1), || bucket("a"));
        store.get_or_create(CompositeKey::from_raw(2), || bucket("b"));

        let mut visited = 0;
        store.for_each(|_, _| visited += 1);
        assert_eq!(visited, 2);

        assert_eq!(store.drain().count(), 2);
        assert!(store.is_empty());
    }

    #[test]
    fn test_overflow_tally_dominance() {
        let mut tally = OverflowTally::default();
        assert_eq!(tally.overflow_count(), 0);
        assert!(!tally.is_overflow());

        tally.record_dimension(1);
        tally.record_dimension(1);
        assert_eq!(tally, OverflowTally::Dimension { depth: 1, count: 2 });

        tally.record_aggregator();
        assert_eq!(tally, OverflowTally::Aggregator { count: 1 });

        tally.record_dimension(0);
        assert_eq!(tally, OverflowTally::Aggregator { count: 1 });
        assert_eq!(tally.overflow_count(), 1);
    }
}
