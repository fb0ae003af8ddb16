//! `service_transaction` metricset: duration histograms per service and transaction type.

use super::{stamp_metadata, transaction_filter, DurationAccumulator};
use crate::core::config::OverflowConfig;
use crate::core::{fields, Document, Event, FlushInterval, Limit, Result, OVERFLOW_SENTINEL};
use crate::metrics::aggregator::MetricsetDefinition;
use crate::metrics::grouping::{GroupDimension, Grouping};
use crate::metrics::key::{self, CompositeKey};
use crate::metrics::store::MetricBucket;
use serde_json::Value;

const NAME: &str = "service_transaction";
const OVERFLOW_COUNT_FIELD: &str = "service_transaction.aggregation.overflow_count";

const KEY_FIELDS: &[&str] = &[
    "agent.name",
    "service.environment",
    "service.name",
    "transaction.type",
    "service.language.name",
];

/// Service transaction metricset definition
#[derive(Debug, Clone)]
pub struct ServiceTransactionMetricset {
    interval: FlushInterval,
    max_groups: Limit,
    max_services: Limit,
}

impl ServiceTransactionMetricset {
    /// Creates the definition with limits from `overflow`
    pub fn new(interval: FlushInterval, overflow: &OverflowConfig) -> Self {
        Self {
            interval,
            max_groups: overflow.max_groups,
            max_services: overflow.transactions.max_services,
        }
    }
}

impl MetricsetDefinition for ServiceTransactionMetricset {
    type Accumulator = DurationAccumulator;

    fn name(&self) -> &'static str {
        NAME
    }

    fn key_fields(&self) -> &[&'static str] {
        KEY_FIELDS
    }

    fn grouping(&self) -> Grouping {
        Grouping::new(vec![GroupDimension::new(fields::SERVICE_NAME, self.max_services)])
            .with_aggregator_limit(self.max_groups, &[fields::SERVICE_NAME])
    }

    fn filter(&self, event: &Event) -> Result<bool> {
        transaction_filter(NAME, event)
    }

    fn aggregate_key(&self, event: &Event) -> CompositeKey {
        key::hash_fields(event, KEY_FIELDS)
    }

    fn init(&self, _event: &Event) -> DurationAccumulator {
        DurationAccumulator::default()
    }

    fn reduce(&self, bucket: &mut MetricBucket<DurationAccumulator>, event: &Event) -> Result<()> {
        bucket.accumulator.record(NAME, event)
    }

    fn serialize(
        &self,
        bucket: MetricBucket<DurationAccumulator>,
        mut document: Document,
    ) -> Result<Document> {
        stamp_metadata(&mut document, NAME, &self.interval);
        bucket.accumulator.write(NAME, &mut document)?;

        if bucket.identity_str(fields::SERVICE_NAME) == Some(OVERFLOW_SENTINEL)
            && bucket.overflow.is_overflow()
        {
            document.insert(
                OVERFLOW_COUNT_FIELD.to_string(),
                Value::from(bucket.overflow.overflow_count()),
            );
        }

        Ok(document)
    }
}
