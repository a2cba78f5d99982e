//! Source-side Weather Data Container
//!
//! Sources fill one [`WeatherData`] per timestamp, using the built-in
//! metrics where they can and free-form names for anything else. Custom
//! names are resolved to registered ids when the data is stored.

use crate::metric::Metric;
use crate::record::Sample;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Raw value handed over by a source
#[derive(Debug, Clone, PartialEq)]
pub enum WeatherValue {
    Number(f64),
    Text(String),
    Missing,
}

impl WeatherValue {
    /// Numeric value rounded to two decimals, `None` when missing or unparsable
    fn normalize(self) -> Option<f64> {
        let value = match self {
            WeatherValue::Number(v) => v,
            WeatherValue::Text(s) => match s.trim().parse::<f64>() {
                Ok(v) => v,
                Err(e) => {
                    debug!("Cannot convert value '{}' to a number: {}", s, e);
                    return None;
                }
            },
            WeatherValue::Missing => return None,
        };
        if !value.is_finite() {
            return None;
        }
        Some((value * 100.0).round() / 100.0)
    }
}

impl From<f64> for WeatherValue {
    fn from(v: f64) -> Self {
        WeatherValue::Number(v)
    }
}

impl From<i64> for WeatherValue {
    fn from(v: i64) -> Self {
        WeatherValue::Number(v as f64)
    }
}

impl From<&str> for WeatherValue {
    fn from(v: &str) -> Self {
        WeatherValue::Text(v.to_string())
    }
}

impl From<String> for WeatherValue {
    fn from(v: String) -> Self {
        WeatherValue::Text(v)
    }
}

impl<T: Into<WeatherValue>> From<Option<T>> for WeatherValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(WeatherValue::Missing)
    }
}

/// Values reported by one source for one timestamp
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeatherData {
    /// Unix seconds
    pub timestamp: i64,
    values: BTreeMap<Metric, Option<f64>>,
    user_values: BTreeMap<String, Option<f64>>,
}

impl WeatherData {
    pub fn new(timestamp: i64) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    /// Set a built-in metric
    pub fn set_value(&mut self, metric: Metric, value: impl Into<WeatherValue>) {
        self.values.insert(metric, value.into().normalize());
    }

    /// Get a built-in metric
    pub fn get_value(&self, metric: Metric) -> Option<f64> {
        self.values.get(&metric).copied().flatten()
    }

    /// Set a source-defined metric by name
    pub fn set_user_value(&mut self, name: &str, value: impl Into<WeatherValue>) {
        self.user_values
            .insert(name.to_string(), value.into().normalize());
    }

    /// Get a source-defined metric by name
    pub fn get_user_value(&self, name: &str) -> Option<f64> {
        self.user_values.get(name).copied().flatten()
    }

    /// Names of every source-defined metric set on this record
    pub fn user_names(&self) -> impl Iterator<Item = &str> {
        self.user_values.keys().map(String::as_str)
    }

    /// Source-defined values keyed by name
    pub fn user_values(&self) -> impl Iterator<Item = (&str, Option<f64>)> {
        self.user_values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Built-in values as samples, including explicitly missing ones
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        self.values
            .iter()
            .map(move |(metric, value)| Sample::new(self.timestamp, *metric, *value))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty() && self.user_values.is_empty()
    }
}
