//! Core domain types, configuration and errors for txmetrics.
//!
//! This module contains the event model shared by every metricset
//! together with the ambient configuration and logging setup.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use config::{ClockMode, Config, ConfigBuilder, MetricsetKind};
pub use error::{Result, TxMetricsError};
pub use types::{
    fields, Document, Event, FieldValue, FlushInterval, Limit, MAX_FLUSH_INTERVAL,
    OVERFLOW_SENTINEL,
};
