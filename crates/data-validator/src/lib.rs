//! Weather Data Validation
//!
//! Holds the physical plausibility bounds of every built-in metric and
//! sanitizes raw samples against them before they reach storage. Values
//! outside the bounds are discarded, never clamped.

mod error;
mod validator;

pub use error::ValidationError;
pub use validator::{Bounds, LimitValidator, MetricLimit, MetricLimits, DEFAULT_SCOPE};
