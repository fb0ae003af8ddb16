//! Aggregator engine: drives one metricset definition end to end.
//!
//! Per event: filter → key → admission → create-or-fetch bucket → reduce.
//! Per tick: when the wall-clock window is over, every bucket is serialized
//! independently, the batch is returned and the window state is dropped.
//!
//! Failures are contained to the event or bucket they happen in:
//! - a filter error skips the event
//! - a reduce error taints the bucket, which is then left out of the flush
//! - a serialize error drops that one document and is reported in the batch

use crate::core::{fields, Document, Event, FieldValue, FlushInterval, Result, OVERFLOW_SENTINEL};
use crate::metrics::grouping::{Admission, ControllerState, Grouping, GroupingController, SuppressedGroup};
use crate::metrics::key::CompositeKey;
use crate::metrics::store::{MetricBucket, MetricBucketStore};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::BTreeMap;

/// A metricset: how events are selected, keyed, accumulated and emitted.
///
/// Implemented once per metricset; the engine is generic over it.
pub trait MetricsetDefinition: Send {
    /// Per-bucket state
    type Accumulator: Send;

    /// Value of `metricset.name`
    fn name(&self) -> &'static str;

    /// Ordered key fields copied into each bucket's identity
    fn key_fields(&self) -> &[&'static str];

    /// Grouping hierarchy and aggregator limit
    fn grouping(&self) -> Grouping;

    /// Whether the event contributes to this metricset
    fn filter(&self, event: &Event) -> Result<bool>;

    /// Composite key of the event's group
    fn aggregate_key(&self, event: &Event) -> CompositeKey;

    /// Zero-value accumulator for a new bucket, seeded from its first event
    fn init(&self, event: &Event) -> Self::Accumulator;

    /// Folds an event into a bucket
    fn reduce(&self, bucket: &mut MetricBucket<Self::Accumulator>, event: &Event) -> Result<()>;

    /// Finalizes a bucket. `document` already holds the identity fields and `@timestamp`.
    fn serialize(
        &self,
        bucket: MetricBucket<Self::Accumulator>,
        document: Document,
    ) -> Result<Document>;
}

/// Per-window ingestion counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AggregatorStats {
    /// Events offered to `ingest`
    pub events_seen: u64,
    /// Events rejected by the filter
    pub filtered_out: u64,
    /// Events whose filter returned an error
    pub filter_errors: u64,
    /// Events reduced into a bucket
    pub ingested: u64,
    /// Reduce failures (each taints its bucket)
    pub reduce_errors: u64,
    /// Events dropped because their bucket was already tainted
    pub tainted_skips: u64,
    /// Events redirected by a dimension limit
    pub dimension_overflows: u64,
    /// Events redirected by the aggregator limit
    pub aggregator_overflows: u64,
}

/// A bucket whose document could not be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketFailure {
    /// Key of the failed bucket
    pub key: CompositeKey,
    /// Error message
    pub error: String,
}

/// Output of one flush
#[derive(Debug, Clone, Default)]
pub struct FlushBatch {
    /// Metricset that produced the batch
    pub metricset: &'static str,
    /// Start of the flushed window, if the window was anchored by a tick
    pub window_start: Option<DateTime<Utc>>,
    /// One document per emitted bucket
    pub documents: Vec<Document>,
    /// Buckets whose serialization failed
    pub failures: Vec<BucketFailure>,
    /// Groups folded into overflow buckets during the window
    pub suppressed: Vec<SuppressedGroup>,
    /// Buckets withheld because a reduce failed
    pub tainted: usize,
    /// Ingestion counters of the window
    pub stats: AggregatorStats,
}

impl FlushBatch {
    /// True if there is nothing to hand downstream
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty() && self.failures.is_empty() && self.tainted == 0
    }

    /// Sum of `_doc_count` over the emitted documents
    pub fn doc_count(&self) -> u64 {
        self.documents
            .iter()
            .filter_map(|doc| doc.get(fields::DOC_COUNT).and_then(serde_json::Value::as_u64))
            .sum()
    }
}

/// Object-safe view of an aggregator, for running heterogeneous metricsets side by side
pub trait Aggregate: Send {
    /// Metricset name
    fn name(&self) -> &'static str;
    /// Ingests one event
    fn ingest(&mut self, event: &Event);
    /// Advances the clock; returns a batch when a window closed
    fn tick(&mut self, now: DateTime<Utc>) -> Option<FlushBatch>;
    /// Flushes the current window unconditionally
    fn flush(&mut self) -> FlushBatch;
}

/// Streaming aggregator for one metricset
pub struct Aggregator<D: MetricsetDefinition> {
    definition: D,
    interval: FlushInterval,
    controller: GroupingController,
    store: MetricBucketStore<D::Accumulator>,
    window_start: Option<DateTime<Utc>>,
    stats: AggregatorStats,
}

impl<D: MetricsetDefinition> Aggregator<D> {
    /// Creates an aggregator flushing every `interval`
    pub fn new(definition: D, interval: FlushInterval) -> Self {
        let controller = GroupingController::new(definition.grouping());
        Self {
            definition,
            interval,
            controller,
            store: MetricBucketStore::new(),
            window_start: None,
            stats: AggregatorStats::default(),
        }
    }

    /// The metricset definition
    pub fn definition(&self) -> &D {
        &self.definition
    }

    /// The flush interval
    pub fn interval(&self) -> &FlushInterval {
        &self.interval
    }

    /// Start of the current window, once anchored
    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        self.window_start
    }

    /// Live buckets in the current window
    pub fn bucket_count(&self) -> usize {
        self.store.len()
    }

    /// Admission state of the current window
    pub fn state(&self) -> ControllerState {
        self.controller.state()
    }

    /// Counters of the current window
    pub fn stats(&self) -> AggregatorStats {
        self.stats
    }

    /// Ingests one event into the current window
    pub fn ingest(&mut self, event: &Event) {
        self.stats.events_seen += 1;

        match self.definition.filter(event) {
            Ok(true) => {},
            Ok(false) => {
                self.stats.filtered_out += 1;
                return;
            },
            Err(e) => {
                self.stats.filter_errors += 1;
                tracing::warn!(
                    metricset = self.definition.name(),
                    category = e.category(),
                    error = %e,
                    "event skipped"
                );
                return;
            },
        }

        let key = self.definition.aggregate_key(event);
        let values: SmallVec<[Option<String>; 2]> = self
            .controller
            .grouping()
            .dimensions()
            .iter()
            .map(|dimension| event.get(dimension.field).map(dimension_value))
            .collect();
        let admission = self.controller.admit(key, &values);

        let definition = &self.definition;
        let grouping = self.controller.grouping();
        let (bucket, _) = self.store.get_or_create(admission.bucket_key(), || {
            MetricBucket::new(
                identity(definition.key_fields(), grouping, event, &admission),
                definition.init(event),
            )
        });

        match admission {
            Admission::DimensionOverflow {
                depth,
                first_redirect,
                ..
            } => {
                self.stats.dimension_overflows += 1;
                if first_redirect {
                    bucket.overflow.record_dimension(depth);
                }
            },
            Admission::AggregatorOverflow { first_redirect, .. } => {
                self.stats.aggregator_overflows += 1;
                if first_redirect {
                    bucket.overflow.record_aggregator();
                }
            },
            Admission::NewGroup(_) | Admission::ExistingGroup(_) => {},
        }

        if bucket.tainted {
            self.stats.tainted_skips += 1;
            return;
        }

        match definition.reduce(bucket, event) {
            Ok(()) => self.stats.ingested += 1,
            Err(e) => {
                bucket.tainted = true;
                self.stats.reduce_errors += 1;
                tracing::warn!(
                    metricset = definition.name(),
                    key = %admission.bucket_key(),
                    category = e.category(),
                    error = %e,
                    "bucket tainted"
                );
            },
        }
    }

    /// Advances the wall clock.
    ///
    /// The first tick anchors the window to the interval containing `now`.
    /// A tick at or past the end of the window flushes it and re-anchors.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Option<FlushBatch> {
        let Some(start) = self.window_start else {
            self.window_start = Some(self.interval.window_start(now));
            return None;
        };

        // a window ending past the representable range never closes on its own
        let Some(end) = chrono::Duration::try_milliseconds(self.interval.as_millis())
            .and_then(|length| start.checked_add_signed(length))
        else {
            return None;
        };
        if now < end {
            return None;
        }

        let batch = self.flush();
        self.window_start = Some(self.interval.window_start(now));
        tracing::debug!(
            metricset = self.definition.name(),
            window_start = %start,
            documents = batch.documents.len(),
            "window flushed"
        );
        Some(batch)
    }

    /// Serializes every bucket of the current window and starts a fresh one
    pub fn flush(&mut self) -> FlushBatch {
        let window_start = self.window_start;
        let mut documents = Vec::with_capacity(self.store.len());
        let mut failures = Vec::new();
        let mut tainted = 0;

        for (key, bucket) in self.store.drain() {
            if bucket.tainted {
                tainted += 1;
                continue;
            }
            let document = base_document(&bucket, window_start);
            match self.definition.serialize(bucket, document) {
                Ok(document) => documents.push(document),
                Err(e) => {
                    tracing::warn!(
                        metricset = self.definition.name(),
                        key = %key,
                        category = e.category(),
                        error = %e,
                        "bucket omitted from flush"
                    );
                    failures.push(BucketFailure {
                        key,
                        error: e.to_string(),
                    });
                },
            }
        }

        let suppressed = self.controller.reset();
        let stats = std::mem::take(&mut self.stats);

        FlushBatch {
            metricset: self.definition.name(),
            window_start,
            documents,
            failures,
            suppressed,
            tainted,
            stats,
        }
    }
}

impl<D: MetricsetDefinition> Aggregate for Aggregator<D> {
    fn name(&self) -> &'static str {
        self.definition.name()
    }

    fn ingest(&mut self, event: &Event) {
        Aggregator::ingest(self, event);
    }

    fn tick(&mut self, now: DateTime<Utc>) -> Option<FlushBatch> {
        Aggregator::tick(self, now)
    }

    fn flush(&mut self) -> FlushBatch {
        Aggregator::flush(self)
    }
}

impl<T: Aggregate + ?Sized> Aggregate for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn ingest(&mut self, event: &Event) {
        (**self).ingest(event);
    }

    fn tick(&mut self, now: DateTime<Utc>) -> Option<FlushBatch> {
        (**self).tick(now)
    }

    fn flush(&mut self) -> FlushBatch {
        (**self).flush()
    }
}

/// Grouping value of a field; strings are used verbatim.
fn dimension_value(value: &FieldValue) -> String {
    match value {
        FieldValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Identity fields of a new bucket.
///
/// Regular buckets copy every present key field. Overflow buckets keep only
/// the dimensions above the overflow point and write the sentinel into the
/// rest; every other key field is stripped.
fn identity(
    key_fields: &[&'static str],
    grouping: &Grouping,
    event: &Event,
    admission: &Admission,
) -> BTreeMap<&'static str, FieldValue> {
    let mut identity = BTreeMap::new();
    let sentinel = || FieldValue::from(OVERFLOW_SENTINEL);

    match admission {
        Admission::NewGroup(_) | Admission::ExistingGroup(_) => {
            for field in key_fields {
                if let Some(value) = event.get(field) {
                    identity.insert(*field, value.clone());
                }
            }
        },
        Admission::DimensionOverflow { depth, .. } => {
            for (i, dimension) in grouping.dimensions().iter().enumerate() {
                if i < *depth {
                    if let Some(value) = event.get(dimension.field) {
                        identity.insert(dimension.field, value.clone());
                    }
                } else {
                    identity.insert(dimension.field, sentinel());
                }
            }
        },
        Admission::AggregatorOverflow { .. } => {
            for field in grouping.aggregator_fields() {
                identity.insert(*field, sentinel());
            }
        },
    }

    identity
}

fn base_document<A>(bucket: &MetricBucket<A>, window_start: Option<DateTime<Utc>>) -> Document {
    let mut document = Document::new();
    if let Some(start) = window_start {
        document.insert(
            fields::TIMESTAMP.to_string(),
            serde_json::Value::String(start.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
    }
    for (field, value) in &bucket.identity {
        document.insert((*field).to_string(), value.to_json());
    }
    document
}
