//! Common test utilities and fixtures.

#![allow(dead_code)]

use serde_json::Value;
use txmetrics::core::{fields, Document, Event};
use txmetrics::Aggregate;

/// Test fixture builder for creating events with sensible defaults.
pub struct TestEventBuilder {
    kind: String,
    service: Option<String>,
    transaction: String,
    duration_us: Option<f64>,
    outcome: Option<String>,
    parent: Option<String>,
    timestamp_ms: Option<i64>,
    extra: Vec<(String, String)>,
}

impl TestEventBuilder {
    pub fn transaction(service: &str, name: &str) -> Self {
        Self {
            kind: "transaction".to_string(),
            service: Some(service.to_string()),
            transaction: name.to_string(),
            duration_us: Some(100.0),
            outcome: Some("success".to_string()),
            parent: None,
            timestamp_ms: None,
            extra: Vec::new(),
        }
    }

    pub fn span(service: &str) -> Self {
        Self {
            kind: "span".to_string(),
            duration_us: None,
            outcome: None,
            ..Self::transaction(service, "")
        }
    }

    pub fn duration_us(mut self, us: f64) -> Self {
        self.duration_us = Some(us);
        self
    }

    pub fn without_duration(mut self) -> Self {
        self.duration_us = None;
        self
    }

    pub fn without_service(mut self) -> Self {
        self.service = None;
        self
    }

    pub fn failure(mut self) -> Self {
        self.outcome = Some("failure".to_string());
        self
    }

    pub fn child_of(mut self, parent: &str) -> Self {
        self.parent = Some(parent.to_string());
        self
    }

    pub fn at_ms(mut self, ms: i64) -> Self {
        self.timestamp_ms = Some(ms);
        self
    }

    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.extra.push((name.to_string(), value.to_string()));
        self
    }

    pub fn build(self) -> Event {
        let mut event = Event::new().with(fields::PROCESSOR_EVENT, self.kind.as_str());
        if let Some(service) = self.service {
            event.insert(fields::SERVICE_NAME, service);
        }
        if !self.transaction.is_empty() {
            event.insert(fields::TRANSACTION_NAME, self.transaction);
        }
        if let Some(us) = self.duration_us {
            event.insert(fields::TRANSACTION_DURATION_US, us);
        }
        if let Some(outcome) = self.outcome {
            event.insert(fields::EVENT_OUTCOME, outcome);
        }
        if let Some(parent) = self.parent {
            event.insert(fields::PARENT_ID, parent);
        }
        if let Some(ms) = self.timestamp_ms {
            event.insert(fields::TIMESTAMP, ms);
        }
        for (name, value) in self.extra {
            event.insert(&name, value);
        }
        event
    }
}

/// Ingest every event into `aggregator`.
pub fn ingest_all<A: Aggregate + ?Sized>(aggregator: &mut A, events: &[Event]) {
    for event in events {
        aggregator.ingest(event);
    }
}

/// Sum of `_doc_count` over documents.
pub fn total_doc_count(documents: &[Document]) -> u64 {
    documents
        .iter()
        .filter_map(|d| d.get(fields::DOC_COUNT).and_then(Value::as_u64))
        .sum()
}

/// Sum of histogram counts over documents.
pub fn total_histogram_count(documents: &[Document]) -> u64 {
    documents
        .iter()
        .filter_map(|d| d.get(fields::TRANSACTION_DURATION_HISTOGRAM))
        .filter_map(|h| h.get("counts").and_then(Value::as_array))
        .flat_map(|counts| counts.iter().filter_map(Value::as_u64))
        .sum()
}

/// Find the first document whose `field` equals `value`.
pub fn find_doc<'a>(documents: &'a [Document], field: &str, value: &str) -> Option<&'a Document> {
    documents
        .iter()
        .find(|d| d.get(field).and_then(Value::as_str) == Some(value))
}
