//! `transaction` metricset: duration histograms per transaction group.

use super::{stamp_metadata, transaction_filter, DurationAccumulator};
use crate::core::config::OverflowConfig;
use crate::core::{fields, Document, Event, FlushInterval, Limit, Result, OVERFLOW_SENTINEL};
use crate::metrics::aggregator::MetricsetDefinition;
use crate::metrics::grouping::{GroupDimension, Grouping};
use crate::metrics::key::{self, CompositeKey};
use crate::metrics::store::MetricBucket;
use serde_json::Value;

const NAME: &str = "transaction";
const OVERFLOW_COUNT_FIELD: &str = "transaction.aggregation.overflow_count";

const KEY_FIELDS: &[&str] = &[
    "transaction.name",
    "transaction.result",
    "transaction.type",
    "event.outcome",
    "agent.name",
    "service.environment",
    "service.name",
    "service.version",
    "service.node.name",
    "service.runtime.name",
    "service.runtime.version",
    "service.language.name",
    "service.language.version",
    "host.hostname",
    "host.name",
    "host.os.platform",
    "container.id",
    "kubernetes.pod.name",
    "cloud.provider",
    "cloud.region",
    "cloud.availability_zone",
    "cloud.service.name",
    "cloud.account.id",
    "cloud.account.name",
    "cloud.project.id",
    "cloud.project.name",
    "cloud.machine.type",
    "faas.coldstart",
    "faas.id",
    "faas.trigger.type",
    "faas.name",
    "faas.version",
];

/// Accumulator of a transaction bucket
#[derive(Debug, Clone, Default)]
pub struct TransactionAccumulator {
    /// Durations and outcomes
    pub durations: DurationAccumulator,
    /// Whether the group's transactions have no parent
    pub root: bool,
}

/// Transaction metricset definition
#[derive(Debug, Clone)]
pub struct TransactionMetricset {
    interval: FlushInterval,
    max_groups: Limit,
    max_services: Limit,
    max_transaction_groups_per_service: Limit,
}

impl TransactionMetricset {
    /// Creates the definition with limits from `overflow`
    pub fn new(interval: FlushInterval, overflow: &OverflowConfig) -> Self {
        Self {
            interval,
            max_groups: overflow.max_groups,
            max_services: overflow.transactions.max_services,
            max_transaction_groups_per_service: overflow
                .transactions
                .max_transaction_groups_per_service,
        }
    }
}

impl MetricsetDefinition for TransactionMetricset {
    type Accumulator = TransactionAccumulator;

    fn name(&self) -> &'static str {
        NAME
    }

    fn key_fields(&self) -> &[&'static str] {
        KEY_FIELDS
    }

    fn grouping(&self) -> Grouping {
        Grouping::new(vec![
            GroupDimension::new(fields::SERVICE_NAME, self.max_services),
            GroupDimension::new(fields::TRANSACTION_NAME, self.max_transaction_groups_per_service),
        ])
        .with_aggregator_limit(
            self.max_groups,
            &[fields::SERVICE_NAME, fields::TRANSACTION_NAME],
        )
    }

    fn filter(&self, event: &Event) -> Result<bool> {
        transaction_filter(NAME, event)
    }

    fn aggregate_key(&self, event: &Event) -> CompositeKey {
        // root and child transactions never share a bucket
        let has_parent = if event.contains(fields::PARENT_ID) { b"1" } else { b"0" };
        key::append(key::hash_fields(event, KEY_FIELDS), has_parent)
    }

    fn init(&self, event: &Event) -> TransactionAccumulator {
        TransactionAccumulator {
            durations: DurationAccumulator::default(),
            root: !event.contains(fields::PARENT_ID),
        }
    }

    fn reduce(&self, bucket: &mut MetricBucket<TransactionAccumulator>, event: &Event) -> Result<()> {
        bucket.accumulator.durations.record(NAME, event)
    }

    fn serialize(
        &self,
        bucket: MetricBucket<TransactionAccumulator>,
        mut document: Document,
    ) -> Result<Document> {
        stamp_metadata(&mut document, NAME, &self.interval);
        bucket.accumulator.durations.write(NAME, &mut document)?;

        // overflow buckets mix root and child transactions, so they carry no
        // transaction.root flag
        if bucket.overflow.is_overflow() {
            if bucket.identity_str(fields::TRANSACTION_NAME) == Some(OVERFLOW_SENTINEL) {
                document.insert(
                    OVERFLOW_COUNT_FIELD.to_string(),
                    Value::from(bucket.overflow.overflow_count()),
                );
            }
        } else {
            document.insert(
                fields::TRANSACTION_ROOT.to_string(),
                Value::Bool(bucket.accumulator.root),
            );
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::OverflowConfig;
    use crate::metrics::aggregator::Aggregator;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn aggregator(overflow: &OverflowConfig) -> Aggregator<TransactionMetricset> {
        let interval = FlushInterval::parse("1m").unwrap();
        Aggregator::new(TransactionMetricset::new(interval.clone(), overflow), interval)
    }

    fn tx(service: &str, name: &str, duration: f64) -> Event {
        Event::new()
            .with(fields::PROCESSOR_EVENT, "transaction")
            .with(fields::SERVICE_NAME, service)
            .with(fields::TRANSACTION_NAME, name)
            .with(fields::TRANSACTION_DURATION_US, duration)
            .with(fields::EVENT_OUTCOME, "success")
    }

    #[test]
    fn test_single_group_document() {
        let mut agg = aggregator(&OverflowConfig::default());
        for duration in [100.0, 200.0, 300.0] {
            agg.ingest(&tx("svc", "GET /x", duration));
        }

        let batch = agg.flush();
        assert_eq!(batch.documents.len(), 1);
        let doc = &batch.documents[0];

        assert_eq!(doc["metricset.name"], json!("transaction"));
        assert_eq!(doc["metricset.interval"], json!("1m"));
        assert_eq!(doc["processor.event"], json!("metric"));
        assert_eq!(doc["service.name"], json!("svc"));
        assert_eq!(doc["transaction.name"], json!("GET /x"));
        assert_eq!(doc["transaction.root"], json!(true));
        assert_eq!(
            doc["transaction.duration.summary"],
            json!({"sum": 600, "value_count": 3})
        );
        assert_eq!(
            doc["transaction.duration.histogram"],
            json!({"values": [100, 200, 300], "counts": [1, 1, 1]})
        );
        assert_eq!(doc["_doc_count"], json!(3));
        assert!(doc.get(OVERFLOW_COUNT_FIELD).is_none());
    }

    #[test]
    fn test_root_and_child_split() {
        let mut agg = aggregator(&OverflowConfig::default());
        agg.ingest(&tx("svc", "GET /x", 10.0));
        agg.ingest(&tx("svc", "GET /x", 10.0).with(fields::PARENT_ID, "abc"));

        let batch = agg.flush();
        assert_eq!(batch.documents.len(), 2);
        let roots: Vec<_> = batch
            .documents
            .iter()
            .map(|d| d["transaction.root"].as_bool().unwrap())
            .collect();
        assert!(roots.contains(&true));
        assert!(roots.contains(&false));
    }

    #[test]
    fn test_transaction_group_overflow() {
        let mut overflow = OverflowConfig::default();
        overflow.transactions.max_transaction_groups_per_service = Limit::Max(1);
        let mut agg = aggregator(&overflow);

        agg.ingest(&tx("svc", "GET /a", 10.0).with("host.name", "h1"));
        agg.ingest(&tx("svc", "GET /b", 20.0).with("host.name", "h1"));

        let batch = agg.flush();
        assert_eq!(batch.documents.len(), 2);
        let other = batch
            .documents
            .iter()
            .find(|d| d["transaction.name"] == json!(OVERFLOW_SENTINEL))
            .unwrap();
        assert_eq!(other["service.name"], json!("svc"));
        assert_eq!(other[OVERFLOW_COUNT_FIELD], json!(1));
        assert!(other.get("host.name").is_none());
        assert!(other.get("transaction.root").is_none());
    }

    #[test]
    fn test_aggregator_overflow() {
        let mut overflow = OverflowConfig::default();
        overflow.max_groups = Limit::Max(1);
        let mut agg = aggregator(&overflow);

        agg.ingest(&tx("a", "GET /x", 10.0));
        agg.ingest(&tx("b", "GET /x", 10.0).with("service.environment", "prod"));

        let batch = agg.flush();
        assert_eq!(batch.documents.len(), 2);
        let other = batch
            .documents
            .iter()
            .find(|d| d["service.name"] == json!(OVERFLOW_SENTINEL))
            .unwrap();
        assert_eq!(other["transaction.name"], json!(OVERFLOW_SENTINEL));
        assert_eq!(other[OVERFLOW_COUNT_FIELD], json!(1));
        assert!(other.get("service.environment").is_none());
        assert!(other.get("event.outcome").is_none());
    }
}
