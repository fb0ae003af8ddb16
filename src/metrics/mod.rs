//! Streaming metrics aggregation engine.
//!
//! Leaves first:
//! - [`key`]: composite key digests over ordered event fields
//! - [`histogram`]: exact value/count histograms
//! - [`grouping`]: per-dimension and per-aggregator cardinality limits
//! - [`store`]: buckets of the current window
//! - [`aggregator`]: the engine tying them together for one metricset

pub mod aggregator;
pub mod grouping;
pub mod histogram;
pub mod key;
pub mod store;

pub use aggregator::{Aggregate, Aggregator, AggregatorStats, BucketFailure, FlushBatch, MetricsetDefinition};
pub use grouping::{
    Admission, ControllerState, GroupDimension, Grouping, GroupingController, OverflowReason,
    SuppressedGroup,
};
pub use histogram::{HistogramSnapshot, LosslessHistogram};
pub use key::CompositeKey;
pub use store::{MetricBucket, MetricBucketStore, OverflowTally};
