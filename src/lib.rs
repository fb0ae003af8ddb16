//! txmetrics - streaming transaction metrics aggregation.
//!
//! Consumes a stream of APM events (transactions, spans, errors) and rolls
//! them up into periodic metric documents: latency histograms and outcome
//! counts per transaction group, per service and transaction type, and a
//! plain per-service summary.
//!
//! # Features
//!
//! - **Fixed windows**: epoch-aligned flush intervals (`1m`, `10s`, ...)
//! - **Bounded cardinality**: per-dimension and per-metricset group limits,
//!   with excess groups folded into `_other` buckets that carry an overflow count
//! - **Lossless histograms**: exact value/count pairs, no bucketing
//! - **Isolation**: a failing bucket is dropped from its flush, not the whole batch
//!
//! # Architecture
//!
//! - `core`: configuration, errors, logging and the event model
//! - `metrics`: the generic aggregation engine
//! - `metricsets`: the concrete `transaction`, `service_transaction` and
//!   `service_summary` definitions
//! - `pipeline`: tokio tasks driving aggregators from an event channel
//!
//! # Example
//!
//! ```no_run
//! use txmetrics::core::{fields, Config, Event};
//! use txmetrics::pipeline::MetricsPipelines;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let pipelines = MetricsPipelines::spawn(&config)?;
//!
//!     let event = Event::new()
//!         .with(fields::PROCESSOR_EVENT, "transaction")
//!         .with(fields::SERVICE_NAME, "checkout")
//!         .with(fields::TRANSACTION_NAME, "POST /cart")
//!         .with(fields::TRANSACTION_DURATION_US, 1250.0);
//!     pipelines.events.send(event).await?;
//!
//!     let (batches, _) = pipelines.shutdown().await?;
//!     for batch in batches {
//!         println!("{}: {} documents", batch.metricset, batch.documents.len());
//!     }
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod core;
pub mod metrics;
pub mod metricsets;
pub mod pipeline;

// Re-export core types for convenience
pub use crate::core::{Config, Event, Result, TxMetricsError};
pub use crate::metrics::{Aggregate, Aggregator, FlushBatch};
