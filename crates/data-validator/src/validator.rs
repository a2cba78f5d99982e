//! Limit Validator for Range Checking

use crate::error::ValidationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{error, info, warn};
use weather_data::{Metric, MetricKey};

/// Scope under which the built-in weather limits are persisted
pub const DEFAULT_SCOPE: &str = "weather";

/// Inclusive plausibility interval; a missing side is unbounded
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl Bounds {
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub const fn between(min: f64, max: f64) -> Self {
        Self::new(Some(min), Some(max))
    }

    pub const fn at_least(min: f64) -> Self {
        Self::new(Some(min), None)
    }
}

/// A persisted limit row, unique per (scope, name)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricLimit {
    pub scope: String,
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl MetricLimit {
    pub fn new(scope: &str, name: &str, bounds: Bounds) -> Self {
        Self {
            scope: scope.to_string(),
            name: name.to_string(),
            min: bounds.min,
            max: bounds.max,
        }
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.min, self.max)
    }
}

/// Per-metric plausibility table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricLimits {
    bounds: BTreeMap<Metric, Bounds>,
}

impl MetricLimits {
    /// Table without any bounds; every value passes
    pub fn empty() -> Self {
        Self {
            bounds: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, metric: Metric, bounds: Bounds) {
        self.bounds.insert(metric, bounds);
    }

    pub fn get(&self, metric: Metric) -> Option<Bounds> {
        self.bounds.get(&metric).copied()
    }

    pub fn len(&self) -> usize {
        self.bounds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bounds.is_empty()
    }

    /// Rows for persisting this table under `scope`
    pub fn to_records(&self, scope: &str) -> Vec<MetricLimit> {
        self.bounds
            .iter()
            .map(|(metric, bounds)| MetricLimit::new(scope, metric.as_str(), *bounds))
            .collect()
    }
}

impl Default for MetricLimits {
    /// Records for planet Earth
    fn default() -> Self {
        let mut limits = Self::empty();
        limits.set(Metric::Temperature, Bounds::between(-60.0, 60.0));
        limits.set(Metric::MinTemp, Bounds::between(-60.0, 60.0));
        limits.set(Metric::MaxTemp, Bounds::between(-60.0, 60.0));
        limits.set(Metric::Rh, Bounds::between(0.0, 1.0));
        limits.set(Metric::MinRh, Bounds::between(0.0, 1.0));
        limits.set(Metric::MaxRh, Bounds::between(0.0, 1.0));
        // 200 km/h
        limits.set(Metric::Wind, Bounds::between(0.0, 55.55));
        limits.set(Metric::SolarRadiation, Bounds::at_least(0.0));
        limits.set(Metric::SkyCover, Bounds::between(0.0, 1.0));
        limits.set(Metric::Et0, Bounds::between(0.0, 100.0));
        limits.set(Metric::Pop, Bounds::between(0.0, 1.0));
        limits.set(Metric::Qpf, Bounds::between(0.0, 125.0));
        limits.set(Metric::Rain, Bounds::between(0.0, 125.0));
        limits.set(Metric::Pressure, Bounds::between(50.0, 120.0));
        limits
    }
}

/// Sanitizes raw samples against physical limits
#[derive(Debug, Clone)]
pub struct LimitValidator {
    limits: MetricLimits,
}

impl LimitValidator {
    /// Create a new validator with given limits
    pub fn new(limits: MetricLimits) -> Self {
        Self { limits }
    }

    /// Build a validator from persisted limit rows.
    ///
    /// Rows naming metrics that are not built in are skipped.
    pub fn from_limits<'a>(records: impl IntoIterator<Item = &'a MetricLimit>) -> Self {
        let mut limits = MetricLimits::empty();
        for record in records {
            match record.name.parse::<Metric>() {
                Ok(metric) => limits.set(metric, record.bounds()),
                Err(_) => warn!("{}", ValidationError::UnknownMetric(record.name.clone())),
            }
        }
        Self::new(limits)
    }

    pub fn limits(&self) -> &MetricLimits {
        &self.limits
    }

    /// Check a value, reporting which bound it violates
    pub fn check(&self, metric: Metric, value: f64) -> Result<f64, ValidationError> {
        let Some(bounds) = self.limits.get(metric) else {
            return Ok(value);
        };
        if let Some(min) = bounds.min {
            if value < min {
                return Err(ValidationError::BelowMinimum { metric, value, min });
            }
        }
        if let Some(max) = bounds.max {
            if value > max {
                return Err(ValidationError::AboveMaximum { metric, value, max });
            }
        }
        Ok(value)
    }

    /// Returns the value unchanged when plausible, `None` otherwise.
    /// Metrics without limits pass through.
    pub fn sanitize(&self, metric: Metric, value: f64) -> Option<f64> {
        if self.limits.get(metric).is_none() {
            info!("{} key not found in our limits definitions", metric);
            return Some(value);
        }
        match self.check(metric, value) {
            Ok(value) => Some(value),
            Err(e) => {
                error!("{}", e);
                None
            }
        }
    }

    /// Sanitize an optional value of any metric key. Custom metrics have no limits.
    pub fn sanitize_key(&self, key: MetricKey, value: Option<f64>) -> Option<f64> {
        let value = value?;
        match key {
            MetricKey::BuiltIn(metric) => self.sanitize(metric, value),
            MetricKey::User(_) => Some(value),
        }
    }
}

impl Default for LimitValidator {
    fn default() -> Self {
        Self::new(MetricLimits::default())
    }
}
