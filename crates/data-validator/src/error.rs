//! Validation Error Types

use thiserror::Error;
use weather_data::Metric;

/// Errors during sample validation
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value below the metric's physical minimum
    #[error("{metric} value {value} less than limits minimum of {min}")]
    BelowMinimum { metric: Metric, value: f64, min: f64 },

    /// Value above the metric's physical maximum
    #[error("{metric} value {value} more than limits maximum of {max}")]
    AboveMaximum { metric: Metric, value: f64, max: f64 },

    /// Limit row names a metric that is not built in
    #[error("Unknown metric in limits table: {0}")]
    UnknownMetric(String),
}
