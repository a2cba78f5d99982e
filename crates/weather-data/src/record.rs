//! Tick, Sample and Mixed Record Types

use crate::metric::{Metric, MetricKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Forecast tick identifier, assigned by the observations store
pub type TickId = i64;

/// Identifier of the data source that reported a sample
pub type SourceId = i64;

/// One discrete collection cycle. Samples and blended results are grouped by tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForecastTick {
    pub id: TickId,
    /// Unix seconds
    pub timestamp: i64,
    pub processed: bool,
}

impl ForecastTick {
    pub fn new(id: TickId, timestamp: i64) -> Self {
        Self {
            id,
            timestamp,
            processed: false,
        }
    }
}

/// A raw value reported by a source, before it is attached to a tick
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Unix seconds the value refers to
    pub timestamp: i64,
    pub metric: MetricKey,
    pub value: Option<f64>,
}

impl Sample {
    pub fn new(timestamp: i64, metric: impl Into<MetricKey>, value: Option<f64>) -> Self {
        Self {
            timestamp,
            metric: metric.into(),
            value,
        }
    }
}

/// A persisted sample, unique per (source, metric, timestamp)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub forecast_tick_id: TickId,
    pub source_id: SourceId,
    pub metric: MetricKey,
    pub timestamp: i64,
    pub value: Option<f64>,
}

/// A blended value and how many sources contributed to it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MixedValue {
    pub value: f64,
    /// `None` when contributor counting is disabled
    pub contributors: Option<u32>,
}

impl MixedValue {
    pub fn new(value: f64, contributors: u32) -> Self {
        Self {
            value,
            contributors: Some(contributors),
        }
    }
}

/// Authoritative blended values for one timestamp of one tick
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MixedRecord {
    pub forecast_tick_id: TickId,
    pub forecast_timestamp: i64,
    pub timestamp: i64,
    /// Metrics absent from every source are simply missing here
    pub values: BTreeMap<MetricKey, MixedValue>,
}

impl MixedRecord {
    pub fn new(tick: &ForecastTick, timestamp: i64) -> Self {
        Self {
            forecast_tick_id: tick.id,
            forecast_timestamp: tick.timestamp,
            timestamp,
            values: BTreeMap::new(),
        }
    }

    /// Blended value of a metric
    pub fn get(&self, metric: impl Into<MetricKey>) -> Option<f64> {
        self.values.get(&metric.into()).map(|v| v.value)
    }

    /// Number of sources that contributed to a metric
    pub fn contributors(&self, metric: impl Into<MetricKey>) -> Option<u32> {
        self.values.get(&metric.into()).and_then(|v| v.contributors)
    }

    /// Built-in metrics present in this record
    pub fn builtin_metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.values.keys().filter_map(|k| k.builtin())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
