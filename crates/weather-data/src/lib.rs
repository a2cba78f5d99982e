//! Weather Data Types
//!
//! Shared vocabulary for the observation pipeline: built-in metrics and
//! their reducer classification, raw samples reported by sources, forecast
//! ticks, and the blended records produced by the mixer.

mod error;
mod metric;
mod record;
mod time;
mod weather;

pub use error::DataError;
pub use metric::{Metric, MetricKey, MetricKind, UserMetricId};
pub use record::{ForecastTick, MixedRecord, MixedValue, Observation, Sample, SourceId, TickId};
pub use time::{current_timestamp, start_of_day, SECONDS_PER_DAY};
pub use weather::{WeatherData, WeatherValue};
