//! `service_summary` metricset: one bucket per live service, nothing measured.
//!
//! Its only job is the flat per-service limit. Services beyond it are folded
//! into the `_other` bucket; which services were folded, and under which key,
//! is reported through the flush batch's suppressed list.

use super::stamp_metadata;
use crate::core::config::OverflowConfig;
use crate::core::{fields, Document, Event, FlushInterval, Limit, Result};
use crate::metrics::aggregator::MetricsetDefinition;
use crate::metrics::grouping::{GroupDimension, Grouping};
use crate::metrics::key::{self, CompositeKey};
use crate::metrics::store::MetricBucket;

const NAME: &str = "service_summary";

const KEY_FIELDS: &[&str] = &[
    "agent.name",
    "service.environment",
    "service.name",
    "service.language.name",
];

/// Service summary metricset definition
#[derive(Debug, Clone)]
pub struct ServiceSummaryMetricset {
    interval: FlushInterval,
    max_services: Limit,
}

impl ServiceSummaryMetricset {
    /// Creates the definition with the service limit from `overflow`
    pub fn new(interval: FlushInterval, overflow: &OverflowConfig) -> Self {
        Self {
            interval,
            max_services: overflow.service_transactions.max_groups,
        }
    }
}

impl MetricsetDefinition for ServiceSummaryMetricset {
    type Accumulator = ();

    fn name(&self) -> &'static str {
        NAME
    }

    fn key_fields(&self) -> &[&'static str] {
        KEY_FIELDS
    }

    fn grouping(&self) -> Grouping {
        Grouping::new(vec![GroupDimension::new(fields::SERVICE_NAME, self.max_services)])
    }

    fn filter(&self, event: &Event) -> Result<bool> {
        Ok(event.contains(fields::SERVICE_NAME))
    }

    fn aggregate_key(&self, event: &Event) -> CompositeKey {
        key::hash_fields(event, KEY_FIELDS)
    }

    fn init(&self, _event: &Event) {}

    fn reduce(&self, _bucket: &mut MetricBucket<()>, _event: &Event) -> Result<()> {
        Ok(())
    }

    fn serialize(&self, _bucket: MetricBucket<()>, mut document: Document) -> Result<Document> {
        stamp_metadata(&mut document, NAME, &self.interval);
        Ok(document)
    }
}
