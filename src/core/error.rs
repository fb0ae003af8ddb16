use thiserror::Error;

#[derive(Error, Debug)]
pub enum TxMetricsError {
    #[error("Filter error in {metricset}: {message}")]
    Filter {
        metricset: &'static str,
        message: String,
    },

    #[error("Reduce error in {metricset}: {message}")]
    Reduce {
        metricset: &'static str,
        message: String,
    },

    #[error("Serialize error in {metricset}: {message}")]
    Serialize {
        metricset: &'static str,
        message: String,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Async task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

/// Result type alias for txmetrics operations
pub type Result<T> = std::result::Result<T, TxMetricsError>;

impl TxMetricsError {
    /// Creates a new filter error
    pub fn filter<S: Into<String>>(metricset: &'static str, msg: S) -> Self {
        Self::Filter {
            metricset,
            message: msg.into(),
        }
    }

    /// Creates a new reduce error
    pub fn reduce<S: Into<String>>(metricset: &'static str, msg: S) -> Self {
        Self::Reduce {
            metricset,
            message: msg.into(),
        }
    }

    /// Creates a new serialize error
    pub fn serialize<S: Into<String>>(metricset: &'static str, msg: S) -> Self {
        Self::Serialize {
            metricset,
            message: msg.into(),
        }
    }

    /// Creates a new configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Returns the error category for logging
    pub fn category(&self) -> &'static str {
        match self {
            Self::Filter { .. } => "filter",
            Self::Reduce { .. } => "reduce",
            Self::Serialize { .. } | Self::Serialization(_) => "serialization",
            Self::Config(_) => "config",
            Self::Join(_) => "async",
            Self::ChannelClosed(_) => "channel",
        }
    }
}
