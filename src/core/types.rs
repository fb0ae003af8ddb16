use crate::core::error::{Result, TxMetricsError};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Well-known event and document field names.
pub mod fields {
    pub const TIMESTAMP: &str = "@timestamp";
    pub const PROCESSOR_EVENT: &str = "processor.event";
    pub const PROCESSOR_NAME: &str = "processor.name";
    pub const METRICSET_NAME: &str = "metricset.name";
    pub const METRICSET_INTERVAL: &str = "metricset.interval";
    pub const PARENT_ID: &str = "parent.id";
    pub const EVENT_OUTCOME: &str = "event.outcome";
    pub const SERVICE_NAME: &str = "service.name";
    pub const TRANSACTION_NAME: &str = "transaction.name";
    pub const TRANSACTION_ROOT: &str = "transaction.root";
    pub const TRANSACTION_DURATION_US: &str = "transaction.duration.us";
    pub const TRANSACTION_DURATION_HISTOGRAM: &str = "transaction.duration.histogram";
    pub const TRANSACTION_DURATION_SUMMARY: &str = "transaction.duration.summary";
    pub const EVENT_SUCCESS_COUNT: &str = "event.success_count";
    pub const DOC_COUNT: &str = "_doc_count";
}

/// Value written into grouping dimensions that overflowed.
pub const OVERFLOW_SENTINEL: &str = "_other";

/// Scalar value of a single event field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean flag
    Bool(bool),
    /// Any numeric value
    Number(f64),
    /// String value
    String(String),
}

impl FieldValue {
    /// Returns the string slice if this is a string value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric value if this is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean value if this is a bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Converts into a JSON value for document output
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            FieldValue::Bool(b) => serde_json::Value::Bool(*b),
            FieldValue::Number(n) => number_to_json(*n),
            FieldValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

/// Integral floats are emitted as JSON integers so `600.0` renders as `600`.
fn number_to_json(n: f64) -> serde_json::Value {
    if n.fract() == 0.0 && n.abs() < 9.007_199_254_740_992e15 {
        #[allow(clippy::cast_possible_truncation)]
        return serde_json::Value::from(n as i64);
    }
    serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Bool(b) => write!(f, "{}", b),
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::String(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::String(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::String(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<i64> for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: i64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<u64> for FieldValue {
    #[allow(clippy::cast_precision_loss)]
    fn from(value: u64) -> Self {
        FieldValue::Number(value as f64)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// A single observation (transaction, span, error, metric) as a flat field map.
///
/// Events are produced upstream and are read-only to the aggregators.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Event(BTreeMap<String, FieldValue>);

impl Event {
    /// Creates an empty event
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style field setter
    pub fn with<V: Into<FieldValue>>(mut self, field: &str, value: V) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// Sets a field, replacing any previous value
    pub fn insert<V: Into<FieldValue>>(&mut self, field: &str, value: V) {
        self.0.insert(field.to_string(), value.into());
    }

    /// Looks up a field
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.0.get(field)
    }

    /// Looks up a string field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(FieldValue::as_str)
    }

    /// Looks up a numeric field
    pub fn get_f64(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(FieldValue::as_f64)
    }

    /// Looks up a boolean field
    pub fn get_bool(&self, field: &str) -> Option<bool> {
        self.get(field).and_then(FieldValue::as_bool)
    }

    /// Returns true if the field is present
    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the event has no fields
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Event time from `@timestamp` (epoch millis or RFC3339 string)
    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self.get(fields::TIMESTAMP)? {
            FieldValue::Number(ms) => {
                #[allow(clippy::cast_possible_truncation)]
                let ms = *ms as i64;
                Utc.timestamp_millis_opt(ms).single()
            },
            FieldValue::String(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            FieldValue::Bool(_) => None,
        }
    }
}

impl FromIterator<(String, FieldValue)> for Event {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Event(iter.into_iter().collect())
    }
}

/// Emittable metric document: a flat map with dotted field names
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Cardinality limit for a grouping dimension or an aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<usize>", into = "Option<usize>")]
pub enum Limit {
    /// No limit
    #[default]
    Unbounded,
    /// At most this many distinct values
    Max(usize),
}

impl Limit {
    /// Creates a bounded limit; zero is rejected
    pub fn max(n: usize) -> Result<Self> {
        if n == 0 {
            return Err(TxMetricsError::config("cardinality limit must be at least 1"));
        }
        Ok(Limit::Max(n))
    }

    /// Returns true if one more distinct value fits given `current` values
    #[inline]
    pub fn allows(&self, current: usize) -> bool {
        match self {
            Limit::Unbounded => true,
            Limit::Max(n) => current < *n,
        }
    }

    /// Validates the limit
    pub fn validate(&self, name: &str) -> Result<()> {
        match self {
            Limit::Max(0) => Err(TxMetricsError::config(format!(
                "{} must be at least 1 when set",
                name
            ))),
            _ => Ok(()),
        }
    }
}

impl From<Option<usize>> for Limit {
    fn from(value: Option<usize>) -> Self {
        value.map_or(Limit::Unbounded, Limit::Max)
    }
}

impl From<Limit> for Option<usize> {
    fn from(value: Limit) -> Self {
        match value {
            Limit::Unbounded => None,
            Limit::Max(n) => Some(n),
        }
    }
}

/// Longest accepted flush interval
pub const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Flush interval parsed from a human-readable string such as `"1m"`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushInterval {
    raw: String,
    duration: Duration,
}

impl FlushInterval {
    /// Parses an interval string; empty, zero, sub-millisecond and
    /// longer-than-a-week values are rejected
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TxMetricsError::config("flush interval cannot be empty"));
        }
        let duration = humantime::parse_duration(trimmed).map_err(|e| {
            TxMetricsError::config(format!("invalid flush interval '{}': {}", raw, e))
        })?;
        if duration.as_millis() == 0 {
            return Err(TxMetricsError::config(format!(
                "flush interval '{}' must be at least 1ms",
                raw
            )));
        }
        if duration > MAX_FLUSH_INTERVAL {
            return Err(TxMetricsError::config(format!(
                "flush interval '{}' exceeds the maximum of {}",
                raw,
                humantime::format_duration(MAX_FLUSH_INTERVAL)
            )));
        }
        Ok(Self {
            raw: trimmed.to_string(),
            duration,
        })
    }

    /// The interval as originally written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The interval as a duration
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Interval length in milliseconds
    #[allow(clippy::cast_possible_truncation)]
    pub fn as_millis(&self) -> i64 {
        self.duration.as_millis().min(i64::MAX as u128) as i64
    }

    /// Start of the epoch-aligned window containing `at`
    pub fn window_start(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let ms = at.timestamp_millis();
        let start = ms.div_euclid(self.as_millis()) * self.as_millis();
        Utc.timestamp_millis_opt(start).single().unwrap_or(at)
    }
}

impl fmt::Display for FlushInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
