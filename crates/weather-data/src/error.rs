//! Weather Data Error Types

use thiserror::Error;

/// Errors raised while decoding weather vocabulary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// Metric name is not part of the built-in set
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    /// Persisted metric key could not be decoded
    #[error("Malformed metric key: {0}")]
    MalformedKey(String),
}
