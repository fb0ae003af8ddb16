//! Configuration management for txmetrics.
//!
//! This module provides configuration handling with:
//! - YAML file support
//! - Builder-style programmatic overrides
//! - Validation and defaults
//!
//! All structural errors surface here as [`TxMetricsError::Config`], never
//! while events are being aggregated.

use crate::core::types::{FlushInterval, Limit};
use crate::core::{Result, TxMetricsError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default per-window cap on distinct services in the service summary metricset.
pub const DEFAULT_SERVICE_SUMMARY_MAX_GROUPS: usize = 10_000;

/// Complete configuration for txmetrics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Aggregation window configuration
    pub aggregation: AggregationConfig,
    /// Cardinality limits
    pub overflow: OverflowConfig,
    /// Pipeline driver configuration
    pub pipeline: PipelineConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Enabled metricsets
    pub metricsets: Vec<MetricsetKind>,
}

/// Aggregation window configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationConfig {
    /// Human-readable flush interval, e.g. `1m` or `10s`
    pub flush_interval: String,
}

/// Cardinality limits; every limit defaults to unbounded
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverflowConfig {
    /// Window-wide limit on distinct groups per aggregator
    pub max_groups: Limit,
    /// Transaction grouping limits
    pub transactions: TransactionOverflowConfig,
    /// Service summary limits
    pub service_transactions: ServiceTransactionOverflowConfig,
}

/// Transaction grouping limits
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionOverflowConfig {
    /// Distinct services per window
    pub max_services: Limit,
    /// Distinct transaction names per service per window
    pub max_transaction_groups_per_service: Limit,
}

/// Service summary limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceTransactionOverflowConfig {
    /// Distinct services per window
    pub max_groups: Limit,
}

/// Pipeline driver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Capacity of each aggregator's event channel
    pub channel_capacity: usize,
    /// How often the wall clock is checked for a flush boundary
    #[serde(with = "humantime_serde")]
    pub tick_period: Duration,
    /// Which clock decides window boundaries
    pub clock: ClockMode,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: LogLevel,
    /// Structured (JSON) output
    pub structured: bool,
}

/// Source of time for flush boundaries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockMode {
    /// Wall clock ticks independent of event arrival
    Wall,
    /// Each event's `@timestamp` advances the clock
    Event,
}

/// Metricsets that can be enabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsetKind {
    /// Per-transaction-group metrics
    Transaction,
    /// Per-service transaction metrics
    ServiceTransaction,
    /// Per-service existence summary
    ServiceSummary,
}

/// Log levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        AggregationConfig {
            flush_interval: "1m".to_string(),
        }
    }
}

impl Default for OverflowConfig {
    fn default() -> Self {
        OverflowConfig {
            max_groups: Limit::Unbounded,
            transactions: TransactionOverflowConfig::default(),
            service_transactions: ServiceTransactionOverflowConfig::default(),
        }
    }
}

impl Default for ServiceTransactionOverflowConfig {
    fn default() -> Self {
        ServiceTransactionOverflowConfig {
            max_groups: Limit::Max(DEFAULT_SERVICE_SUMMARY_MAX_GROUPS),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            channel_capacity: 8192,
            tick_period: Duration::from_secs(1),
            clock: ClockMode::Wall,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: LogLevel::Info,
            structured: false,
        }
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Result<Self> {
        let config = Config::default();
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TxMetricsError::config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        ConfigBuilder::new().from_yaml(&content)?.build()
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.flush_interval()?;

        self.overflow.max_groups.validate("overflow.max_groups")?;
        self.overflow
            .transactions
            .max_services
            .validate("overflow.transactions.max_services")?;
        self.overflow
            .transactions
            .max_transaction_groups_per_service
            .validate("overflow.transactions.max_transaction_groups_per_service")?;
        self.overflow
            .service_transactions
            .max_groups
            .validate("overflow.service_transactions.max_groups")?;

        if self.pipeline.channel_capacity == 0 {
            return Err(TxMetricsError::config("channel_capacity must be greater than 0"));
        }

        if self.pipeline.tick_period.is_zero() {
            return Err(TxMetricsError::config("tick_period must be greater than 0"));
        }

        let mut seen = std::collections::HashSet::new();
        for kind in &self.metricsets {
            if !seen.insert(kind) {
                return Err(TxMetricsError::config(format!(
                    "metricset {:?} listed more than once",
                    kind
                )));
            }
        }

        Ok(())
    }

    /// Parsed flush interval
    pub fn flush_interval(&self) -> Result<FlushInterval> {
        FlushInterval::parse(&self.aggregation.flush_interval)
    }

    /// Metricsets to run; all of them when none are listed
    pub fn enabled_metricsets(&self) -> Vec<MetricsetKind> {
        if self.metricsets.is_empty() {
            vec![
                MetricsetKind::Transaction,
                MetricsetKind::ServiceTransaction,
                MetricsetKind::ServiceSummary,
            ]
        } else {
            self.metricsets.clone()
        }
    }
}

impl LogLevel {
    /// Convert to tracing filter string
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Configuration builder for programmatic construction
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        ConfigBuilder {
            config: Config::default(),
        }
    }

    /// Load configuration from YAML string
    pub fn from_yaml(mut self, yaml: &str) -> Result<Self> {
        self.config = serde_yaml::from_str(yaml)
            .map_err(|e| TxMetricsError::config(format!("Failed to parse YAML config: {}", e)))?;
        Ok(self)
    }

    /// Set flush interval
    pub fn flush_interval(mut self, interval: &str) -> Self {
        self.config.aggregation.flush_interval = interval.to_string();
        self
    }

    /// Set the window-wide group limit
    pub fn max_groups(mut self, limit: usize) -> Self {
        self.config.overflow.max_groups = Limit::Max(limit);
        self
    }

    /// Set the per-window service limit for transaction metricsets
    pub fn max_services(mut self, limit: usize) -> Self {
        self.config.overflow.transactions.max_services = Limit::Max(limit);
        self
    }

    /// Set the per-service transaction group limit
    pub fn max_transaction_groups_per_service(mut self, limit: usize) -> Self {
        self.config
            .overflow
            .transactions
            .max_transaction_groups_per_service = Limit::Max(limit);
        self
    }

    /// Set the service summary group limit
    pub fn service_summary_max_groups(mut self, limit: usize) -> Self {
        self.config.overflow.service_transactions.max_groups = Limit::Max(limit);
        self
    }

    /// Set the pipeline clock
    pub fn clock(mut self, clock: ClockMode) -> Self {
        self.config.pipeline.clock = clock;
        self
    }

    /// Set the pipeline tick period
    pub fn tick_period(mut self, period: Duration) -> Self {
        self.config.pipeline.tick_period = period;
        self
    }

    /// Restrict the enabled metricsets
    pub fn metricsets(mut self, kinds: &[MetricsetKind]) -> Self {
        self.config.metricsets = kinds.to_vec();
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<Config> {
        self.config.validate()?;
        Ok(self.config)
    }
}
