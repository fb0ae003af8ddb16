//! APM metricset definitions layered on the generic aggregator engine.
//!
//! - [`transaction`]: one bucket per transaction group, root and non-root kept apart
//! - [`service_transaction`]: one bucket per service and transaction type
//! - [`service_summary`]: existence buckets per service, no numeric reduction

pub mod service_summary;
pub mod service_transaction;
pub mod transaction;

pub use service_summary::ServiceSummaryMetricset;
pub use service_transaction::ServiceTransactionMetricset;
pub use transaction::TransactionMetricset;

use crate::core::{fields, Config, Document, Event, FlushInterval, MetricsetKind, Result, TxMetricsError};
use crate::metrics::aggregator::{Aggregate, Aggregator};
use crate::metrics::histogram::LosslessHistogram;
use serde_json::{json, Value};

/// Outcome values counted by `event.success_count`
const OUTCOME_SUCCESS: &str = "success";
const OUTCOME_FAILURE: &str = "failure";

/// Writes the fields every metric document carries.
pub(crate) fn stamp_metadata(document: &mut Document, name: &str, interval: &FlushInterval) {
    document.insert(fields::METRICSET_NAME.to_string(), Value::from(name));
    document.insert(
        fields::METRICSET_INTERVAL.to_string(),
        Value::from(interval.as_str()),
    );
    document.insert(fields::PROCESSOR_EVENT.to_string(), Value::from("metric"));
    document.insert(fields::PROCESSOR_NAME.to_string(), Value::from("metric"));
}

/// True for completed transaction events.
pub(crate) fn is_transaction(event: &Event) -> bool {
    event.get_str(fields::PROCESSOR_EVENT) == Some("transaction")
}

/// Transaction duration in whole microseconds; `None` when missing,
/// non-finite or negative.
pub(crate) fn duration_us(event: &Event) -> Option<u64> {
    let raw = event.get_f64(fields::TRANSACTION_DURATION_US)?;
    if !raw.is_finite() || raw < 0.0 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    Some(raw.round() as u64)
}

/// Filter shared by the transaction-based metricsets.
pub(crate) fn transaction_filter(metricset: &'static str, event: &Event) -> Result<bool> {
    if !is_transaction(event) {
        return Ok(false);
    }
    if duration_us(event).is_none() {
        return Err(TxMetricsError::filter(
            metricset,
            format!(
                "transaction without a valid {}",
                fields::TRANSACTION_DURATION_US
            ),
        ));
    }
    Ok(true)
}

/// Duration distribution and outcome tallies of a transaction bucket
#[derive(Debug, Clone, Default)]
pub struct DurationAccumulator {
    /// Exact duration distribution
    pub histogram: LosslessHistogram,
    /// Sum of recorded durations
    pub duration_sum: u64,
    /// Number of recorded durations
    pub duration_count: u64,
    /// Transactions with outcome `success`
    pub success: u64,
    /// Transactions with outcome `success` or `failure`
    pub outcomes: u64,
}

impl DurationAccumulator {
    /// Records one transaction event
    pub fn record(&mut self, metricset: &'static str, event: &Event) -> Result<()> {
        let duration = duration_us(event).ok_or_else(|| {
            TxMetricsError::reduce(metricset, "transaction duration missing or invalid")
        })?;

        self.duration_sum = self
            .duration_sum
            .checked_add(duration)
            .ok_or_else(|| TxMetricsError::reduce(metricset, "duration sum overflow"))?;
        self.duration_count += 1;
        self.histogram.record(duration);

        match event.get_str(fields::EVENT_OUTCOME) {
            Some(OUTCOME_SUCCESS) => {
                self.success += 1;
                self.outcomes += 1;
            },
            Some(OUTCOME_FAILURE) => self.outcomes += 1,
            _ => {},
        }
        Ok(())
    }

    /// Writes histogram, summary, success count and `_doc_count`
    pub fn write(&self, metricset: &'static str, document: &mut Document) -> Result<()> {
        if self.histogram.is_empty() {
            return Err(TxMetricsError::serialize(metricset, "bucket has no recorded durations"));
        }
        let snapshot = self.histogram.serialize();

        document.insert(
            fields::TRANSACTION_DURATION_HISTOGRAM.to_string(),
            serde_json::to_value(&snapshot)?,
        );
        document.insert(
            fields::TRANSACTION_DURATION_SUMMARY.to_string(),
            json!({ "sum": self.duration_sum, "value_count": self.duration_count }),
        );
        document.insert(
            fields::EVENT_SUCCESS_COUNT.to_string(),
            json!({ "sum": self.success, "value_count": self.outcomes }),
        );
        document.insert(fields::DOC_COUNT.to_string(), Value::from(snapshot.total));
        Ok(())
    }
}

/// Builds the aggregator for one metricset from configuration
pub fn build(kind: MetricsetKind, config: &Config) -> Result<Box<dyn Aggregate>> {
    let interval = config.flush_interval()?;
    let overflow = &config.overflow;
    let aggregator: Box<dyn Aggregate> = match kind {
        MetricsetKind::Transaction => Box::new(Aggregator::new(
            TransactionMetricset::new(interval.clone(), overflow),
            interval,
        )),
        MetricsetKind::ServiceTransaction => Box::new(Aggregator::new(
            ServiceTransactionMetricset::new(interval.clone(), overflow),
            interval,
        )),
        MetricsetKind::ServiceSummary => Box::new(Aggregator::new(
            ServiceSummaryMetricset::new(interval.clone(), overflow),
            interval,
        )),
    };
    Ok(aggregator)
}

/// Builds one aggregator per enabled metricset
pub fn build_all(config: &Config) -> Result<Vec<Box<dyn Aggregate>>> {
    config.validate()?;
    config
        .enabled_metricsets()
        .into_iter()
        .map(|kind| build(kind, config))
        .collect()
}
