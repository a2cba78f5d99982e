//! Raw per-source observations (observations store)
//!
//! One row per (source, metric, timestamp). Writing the same key again
//! overwrites the value and the tick it is attached to.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use data_validator::LimitValidator;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info};
use weather_data::{
    current_timestamp, start_of_day, Metric, MetricKey, Observation, Sample, SourceId, TickId,
    WeatherData, SECONDS_PER_DAY,
};

use crate::executor::CommandExecutor;
use crate::stores::{StoreKind, Stores};
use crate::user_metrics::UserMetricRegistry;
use crate::{forecast, Result, StorageError};

type ObservationRow = (i64, i64, String, i64, Option<f64>);

fn from_row((forecast_tick_id, source_id, metric, timestamp, value): ObservationRow) -> Result<Observation> {
    let metric = metric
        .parse::<MetricKey>()
        .map_err(|e| StorageError::InvalidData(e.to_string()))?;
    Ok(Observation {
        forecast_tick_id,
        source_id,
        metric,
        timestamp,
        value,
    })
}

/// Rows removed by a retention pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneSummary {
    pub observations: u64,
    pub ticks: u64,
}

/// Daily temperature and humidity extremes of one source
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct DailyExtremes {
    min_temp: Option<f64>,
    max_temp: Option<f64>,
    min_rh: Option<f64>,
    max_rh: Option<f64>,
}

fn lower(current: Option<f64>, value: f64) -> Option<f64> {
    Some(current.map_or(value, |c| c.min(value)))
}

fn higher(current: Option<f64>, value: f64) -> Option<f64> {
    Some(current.map_or(value, |c| c.max(value)))
}

impl DailyExtremes {
    fn absorb(&mut self, metric: Metric, value: f64) {
        match metric {
            Metric::Temperature => {
                self.min_temp = lower(self.min_temp, value);
                self.max_temp = higher(self.max_temp, value);
            }
            Metric::MinTemp => self.min_temp = lower(self.min_temp, value),
            Metric::MaxTemp => self.max_temp = higher(self.max_temp, value),
            Metric::Rh => {
                self.min_rh = lower(self.min_rh, value);
                self.max_rh = higher(self.max_rh, value);
            }
            Metric::MinRh => self.min_rh = lower(self.min_rh, value),
            Metric::MaxRh => self.max_rh = higher(self.max_rh, value),
            _ => {}
        }
    }

    fn samples_at(&self, timestamp: i64) -> impl Iterator<Item = Sample> {
        [
            (Metric::MinTemp, self.min_temp),
            (Metric::MaxTemp, self.max_temp),
            (Metric::MinRh, self.min_rh),
            (Metric::MaxRh, self.max_rh),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_some())
        .map(move |(metric, value)| Sample::new(timestamp, metric, value))
    }
}

/// Extremes of the source's newest tick holding rows for the day
async fn stored_extremes(
    conn: &mut SqliteConnection,
    source_id: SourceId,
    day: i64,
) -> Result<DailyExtremes> {
    let rows: Vec<(String, f64)> = sqlx::query_as(
        "SELECT metric, value FROM observations
         WHERE source_id = ? AND timestamp >= ? AND timestamp < ? AND value IS NOT NULL
           AND forecast_tick_id = (
               SELECT MAX(forecast_tick_id) FROM observations
               WHERE source_id = ? AND timestamp >= ? AND timestamp < ?)",
    )
    .bind(source_id)
    .bind(day)
    .bind(day + SECONDS_PER_DAY)
    .bind(source_id)
    .bind(day)
    .bind(day + SECONDS_PER_DAY)
    .fetch_all(&mut *conn)
    .await?;

    let mut extremes = DailyExtremes::default();
    for (metric, value) in rows {
        if let Ok(metric) = metric.parse::<Metric>() {
            extremes.absorb(metric, value);
        }
    }
    Ok(extremes)
}

async fn upsert(
    conn: &mut SqliteConnection,
    tick_id: TickId,
    source_id: SourceId,
    sample: &Sample,
) -> Result<u64> {
    let written = sqlx::query(
        "INSERT INTO observations (forecast_tick_id, source_id, metric, timestamp, value)
         VALUES (?, ?, ?, ?, ?)
         ON CONFLICT(source_id, metric, timestamp)
         DO UPDATE SET value = excluded.value, forecast_tick_id = excluded.forecast_tick_id",
    )
    .bind(tick_id)
    .bind(source_id)
    .bind(sample.metric.to_string())
    .bind(sample.timestamp)
    .bind(sample.value)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    Ok(written)
}

/// Sanitize and upsert `samples` in one transaction. Out-of-range values are
/// stored as missing.
///
/// Every timestamp written also gets the source's daily MINTEMP, MAXTEMP,
/// MINRH and MAXRH for its day, folding the batch into the extremes of the
/// source's newest tick for that day.
pub async fn add_records(
    stores: &mut Stores,
    validator: &LimitValidator,
    tick_id: TickId,
    source_id: SourceId,
    samples: &[Sample],
) -> Result<u64> {
    let samples: Vec<Sample> = samples
        .iter()
        .map(|sample| Sample {
            value: validator.sanitize_key(sample.metric, sample.value),
            ..*sample
        })
        .collect();

    let conn = stores.get(StoreKind::Observations)?;
    let mut tx = conn.begin().await?;

    let mut days: BTreeMap<i64, DailyExtremes> = BTreeMap::new();
    for sample in &samples {
        let day = start_of_day(sample.timestamp);
        if !days.contains_key(&day) {
            let stored = stored_extremes(&mut *tx, source_id, day).await?;
            days.insert(day, stored);
        }
        if let (Some(metric), Some(value), Some(extremes)) =
            (sample.metric.builtin(), sample.value, days.get_mut(&day))
        {
            extremes.absorb(metric, value);
        }
    }

    let mut written = 0;
    for sample in &samples {
        written += upsert(&mut *tx, tick_id, source_id, sample).await?;
    }
    let timestamps: BTreeSet<i64> = samples.iter().map(|s| s.timestamp).collect();
    for timestamp in timestamps {
        if let Some(extremes) = days.get(&start_of_day(timestamp)) {
            for derived in extremes.samples_at(timestamp) {
                written += upsert(&mut *tx, tick_id, source_id, &derived).await?;
            }
        }
    }
    tx.commit().await?;
    debug!(
        "Stored {} observations from source {} for tick {}",
        written, source_id, tick_id
    );
    Ok(written)
}

/// Observations a tick's blend is built from: for every source, the rows of
/// its newest tick not after `tick_id`.
pub async fn records_for_mix(stores: &mut Stores, tick_id: TickId) -> Result<Vec<Observation>> {
    let conn = stores.get(StoreKind::Observations)?;
    let rows: Vec<ObservationRow> = sqlx::query_as(
        "SELECT o.forecast_tick_id, o.source_id, o.metric, o.timestamp, o.value
         FROM observations o
         JOIN (SELECT source_id, MAX(forecast_tick_id) AS tick FROM observations
               WHERE forecast_tick_id <= ? GROUP BY source_id) latest
           ON o.source_id = latest.source_id AND o.forecast_tick_id = latest.tick
         ORDER BY o.timestamp, o.metric, o.source_id",
    )
    .bind(tick_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Observations of a tick ordered by (timestamp, metric, source)
pub async fn records_for_tick(stores: &mut Stores, tick_id: TickId) -> Result<Vec<Observation>> {
    let conn = stores.get(StoreKind::Observations)?;
    let rows: Vec<ObservationRow> = sqlx::query_as(
        "SELECT forecast_tick_id, source_id, metric, timestamp, value FROM observations
         WHERE forecast_tick_id = ? ORDER BY timestamp, metric, source_id",
    )
    .bind(tick_id)
    .fetch_all(conn)
    .await?;
    rows.into_iter().map(from_row).collect()
}

pub async fn delete_older_than(stores: &mut Stores, timestamp: i64) -> Result<u64> {
    let conn = stores.get(StoreKind::Observations)?;
    let deleted = sqlx::query("DELETE FROM observations WHERE timestamp < ?")
        .bind(timestamp)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn delete_for_tick(stores: &mut Stores, tick_id: TickId) -> Result<u64> {
    let conn = stores.get(StoreKind::Observations)?;
    let deleted = sqlx::query("DELETE FROM observations WHERE forecast_tick_id = ?")
        .bind(tick_id)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn delete_for_source(stores: &mut Stores, source_id: SourceId) -> Result<u64> {
    let conn = stores.get(StoreKind::Observations)?;
    let deleted = sqlx::query("DELETE FROM observations WHERE source_id = ?")
        .bind(source_id)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

/// Drop observations older than `retention_days` whole days before `now`,
/// then processed ticks left without observations. The newest tick is kept
/// so gap detection still has a reference.
pub async fn prune_history(stores: &mut Stores, now: i64, retention_days: u32) -> Result<PruneSummary> {
    let threshold = start_of_day(now) - i64::from(retention_days) * SECONDS_PER_DAY;
    let conn = stores.get(StoreKind::Observations)?;
    let mut tx = conn.begin().await?;

    let observations = sqlx::query("DELETE FROM observations WHERE timestamp < ?")
        .bind(threshold)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    let ticks = sqlx::query(
        "DELETE FROM forecast
         WHERE processed = 1 AND timestamp < ?
           AND id < (SELECT MAX(id) FROM forecast)
           AND id NOT IN (SELECT DISTINCT forecast_tick_id FROM observations)",
    )
    .bind(threshold)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok(PruneSummary { observations, ticks })
}

pub async fn count(stores: &mut Stores) -> Result<i64> {
    let conn = stores.get(StoreKind::Observations)?;
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM observations")
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// Remove every observation and every tick together
pub async fn reset(stores: &mut Stores) -> Result<()> {
    let conn = stores.get(StoreKind::Observations)?;
    let mut tx = conn.begin().await?;
    sqlx::query("DELETE FROM observations")
        .execute(&mut *tx)
        .await?;
    forecast::clear(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Per-source observations, sanitized on the way in
#[derive(Clone)]
pub struct ObservationStore {
    executor: CommandExecutor,
    validator: Arc<LimitValidator>,
    user_metrics: UserMetricRegistry,
}

impl ObservationStore {
    pub fn new(
        executor: CommandExecutor,
        validator: Arc<LimitValidator>,
        user_metrics: UserMetricRegistry,
    ) -> Self {
        Self {
            executor,
            validator,
            user_metrics,
        }
    }

    /// Upsert samples of one source for one tick. Returns rows written.
    pub async fn add_records(&self, tick_id: TickId, source_id: SourceId, samples: Vec<Sample>) -> Result<u64> {
        let validator = self.validator.clone();
        self.executor
            .execute("observations.add_records", move |stores| {
                Box::pin(async move {
                    add_records(stores, &validator, tick_id, source_id, &samples).await
                })
            })
            .await
    }

    /// Store source containers, registering custom metric names as needed
    pub async fn add_weather_data(
        &self,
        tick_id: TickId,
        source_id: SourceId,
        data: &[WeatherData],
    ) -> Result<u64> {
        let names: BTreeSet<&str> = data.iter().flat_map(|d| d.user_names()).collect();
        self.user_metrics.add_records(names.iter().copied()).await?;

        let mut samples = Vec::new();
        for record in data {
            samples.extend(record.samples());
            for (name, value) in record.user_values() {
                let id = self
                    .user_metrics
                    .id_of(name)
                    .ok_or_else(|| StorageError::InvalidData(format!("unregistered metric {}", name)))?;
                samples.push(Sample::new(record.timestamp, id, value));
            }
        }
        self.add_records(tick_id, source_id, samples).await
    }

    pub async fn records_for_tick(&self, tick_id: TickId) -> Result<Vec<Observation>> {
        self.executor
            .execute("observations.records_for_tick", move |stores| {
                Box::pin(records_for_tick(stores, tick_id))
            })
            .await
    }

    pub async fn records_for_mix(&self, tick_id: TickId) -> Result<Vec<Observation>> {
        self.executor
            .execute("observations.records_for_mix", move |stores| {
                Box::pin(records_for_mix(stores, tick_id))
            })
            .await
    }

    pub async fn delete_older_than(&self, timestamp: i64) -> Result<u64> {
        self.executor
            .execute("observations.delete_older_than", move |stores| {
                Box::pin(delete_older_than(stores, timestamp))
            })
            .await
    }

    /// Roll back what a failed collection run stored
    pub async fn delete_for_tick(&self, tick_id: TickId) -> Result<u64> {
        self.executor
            .execute("observations.delete_for_tick", move |stores| {
                Box::pin(delete_for_tick(stores, tick_id))
            })
            .await
    }

    pub async fn delete_for_source(&self, source_id: SourceId) -> Result<u64> {
        self.executor
            .execute("observations.delete_for_source", move |stores| {
                Box::pin(delete_for_source(stores, source_id))
            })
            .await
    }

    pub async fn prune_history(&self, retention_days: u32) -> Result<PruneSummary> {
        let now = current_timestamp();
        let summary = self
            .executor
            .execute("observations.prune_history", move |stores| {
                Box::pin(prune_history(stores, now, retention_days))
            })
            .await?;
        info!(
            "Pruned {} observations and {} forecast ticks older than {} days",
            summary.observations, summary.ticks, retention_days
        );
        Ok(summary)
    }

    pub async fn count(&self) -> Result<i64> {
        self.executor
            .execute("observations.count", |stores| Box::pin(count(stores)))
            .await
    }

    pub async fn reset(&self) -> Result<()> {
        self.executor
            .execute("observations.reset", |stores| Box::pin(reset(stores)))
            .await
    }

    pub fn validator(&self) -> &LimitValidator {
        &self.validator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_stores;
    use crate::ForecastRegistry;
    use weather_data::Metric;

    fn store_for(executor: &CommandExecutor) -> ObservationStore {
        ObservationStore::new(
            executor.clone(),
            Arc::new(LimitValidator::default()),
            UserMetricRegistry::new(executor.clone()),
        )
    }

    #[tokio::test]
    async fn test_upsert_keeps_one_row_with_latest_value() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);
        let tick = ForecastRegistry::new(executor.clone()).add_record(Some(0)).await.unwrap();

        let sample = Sample::new(3_600, Metric::Rain, Some(4.0));
        store.add_records(tick, 1, vec![sample]).await.unwrap();
        store.add_records(tick, 1, vec![sample]).await.unwrap();
        store
            .add_records(tick, 1, vec![Sample::new(3_600, Metric::Rain, Some(6.5))])
            .await
            .unwrap();

        let rows = store.records_for_tick(tick).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, Some(6.5));
        assert_eq!(store.count().await.unwrap(), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_out_of_range_values_stored_as_missing() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);

        let written = store
            .add_records(
                1,
                7,
                vec![
                    Sample::new(0, Metric::Temperature, Some(61.0)),
                    Sample::new(0, Metric::Rh, Some(0.4)),
                ],
            )
            .await
            .unwrap();
        // Two samples plus the humidity extremes derived from the valid one
        assert_eq!(written, 4);

        let rows = store.records_for_tick(1).await.unwrap();
        let temperature = rows
            .iter()
            .find(|o| o.metric == MetricKey::BuiltIn(Metric::Temperature))
            .unwrap();
        assert_eq!(temperature.value, None);
        let rh = rows
            .iter()
            .find(|o| o.metric == MetricKey::BuiltIn(Metric::Rh))
            .unwrap();
        assert_eq!(rh.value, Some(0.4));
        let derived: Vec<_> = rows
            .iter()
            .filter_map(|o| o.metric.builtin().map(|m| (m, o.value)))
            .filter(|(m, _)| matches!(m, Metric::MinTemp | Metric::MaxTemp | Metric::MinRh | Metric::MaxRh))
            .collect();
        assert_eq!(derived, vec![(Metric::MinRh, Some(0.4)), (Metric::MaxRh, Some(0.4))]);
        executor.shutdown().await;
    }

    fn value_at(rows: &[Observation], metric: Metric, timestamp: i64) -> Option<f64> {
        rows.iter()
            .find(|o| o.metric == MetricKey::BuiltIn(metric) && o.timestamp == timestamp)
            .and_then(|o| o.value)
    }

    #[tokio::test]
    async fn test_daily_extremes_derived_from_hourly_values() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);
        let day = 10 * SECONDS_PER_DAY;

        let hourly: Vec<_> = [(0, 12.0, 0.8), (6, 9.5, 0.9), (12, 21.0, 0.45), (18, 16.0, 0.6)]
            .into_iter()
            .flat_map(|(hour, temp, rh)| {
                let ts = day + hour * 3_600;
                [
                    Sample::new(ts, Metric::Temperature, Some(temp)),
                    Sample::new(ts, Metric::Rh, Some(rh)),
                ]
            })
            .collect();
        store.add_records(1, 4, hourly).await.unwrap();

        let rows = store.records_for_tick(1).await.unwrap();
        for hour in [0, 6, 12, 18] {
            let ts = day + hour * 3_600;
            assert_eq!(value_at(&rows, Metric::MinTemp, ts), Some(9.5));
            assert_eq!(value_at(&rows, Metric::MaxTemp, ts), Some(21.0));
            assert_eq!(value_at(&rows, Metric::MinRh, ts), Some(0.45));
            assert_eq!(value_at(&rows, Metric::MaxRh, ts), Some(0.9));
        }

        // A later batch for the same day widens the stored extremes
        store
            .add_records(
                1,
                4,
                vec![
                    Sample::new(day + 21 * 3_600, Metric::Temperature, Some(4.0)),
                    Sample::new(day + SECONDS_PER_DAY, Metric::Temperature, Some(30.0)),
                ],
            )
            .await
            .unwrap();
        let rows = store.records_for_tick(1).await.unwrap();
        assert_eq!(value_at(&rows, Metric::MinTemp, day + 21 * 3_600), Some(4.0));
        assert_eq!(value_at(&rows, Metric::MaxTemp, day + 21 * 3_600), Some(21.0));
        // The next day starts from scratch
        assert_eq!(value_at(&rows, Metric::MinTemp, day + SECONDS_PER_DAY), Some(30.0));

        // Other sources keep their own extremes
        store
            .add_records(1, 5, vec![Sample::new(day, Metric::MaxTemp, Some(18.0))])
            .await
            .unwrap();
        let rows = store.records_for_tick(1).await.unwrap();
        let source_five: Vec<_> = rows.iter().filter(|o| o.source_id == 5).collect();
        assert_eq!(source_five.len(), 1);
        assert_eq!(source_five[0].value, Some(18.0));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_mix_input_uses_newest_tick_per_source() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);

        for (tick, source, value) in [(1, 1, 2.0), (1, 2, 3.0), (2, 1, 4.0), (3, 3, 5.0)] {
            store
                .add_records(tick, source, vec![Sample::new(3_600 * tick, Metric::Qpf, Some(value))])
                .await
                .unwrap();
        }

        let input = store.records_for_mix(2).await.unwrap();
        let seen: Vec<_> = input.iter().map(|o| (o.forecast_tick_id, o.source_id)).collect();
        // Source 1 contributes only its tick 2 rows
        assert_eq!(seen, vec![(1, 2), (2, 1)]);

        let input = store.records_for_mix(3).await.unwrap();
        assert_eq!(input.len(), 3);
        assert!(store.records_for_mix(0).await.unwrap().is_empty());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_weather_data_with_custom_metrics() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);

        let mut data = WeatherData::new(7_200);
        data.set_value(Metric::Qpf, 2.5);
        data.set_user_value("soilMoisture", "0.31");
        store.add_weather_data(3, 2, &[data]).await.unwrap();

        let rows = store.records_for_tick(3).await.unwrap();
        assert_eq!(rows.len(), 2);
        let custom = rows
            .iter()
            .find(|o| matches!(o.metric, MetricKey::User(_)))
            .unwrap();
        assert_eq!(custom.value, Some(0.31));
        assert_eq!(custom.timestamp, 7_200);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_deletion_paths() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);

        for (tick, source, ts) in [(1, 1, 100), (1, 2, 100), (2, 1, 200), (2, 2, 300)] {
            store
                .add_records(tick, source, vec![Sample::new(ts, Metric::Wind, Some(3.0))])
                .await
                .unwrap();
        }

        assert_eq!(store.delete_for_tick(1).await.unwrap(), 2);
        assert_eq!(store.delete_for_source(1).await.unwrap(), 1);
        assert_eq!(store.delete_older_than(300).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(store.delete_older_than(301).await.unwrap(), 1);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_prune_history_keeps_recent_data() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);
        let registry = ForecastRegistry::new(executor.clone());

        let now = current_timestamp();
        let old_ts = now - 40 * SECONDS_PER_DAY;
        let old = registry.add_record(Some(old_ts)).await.unwrap();
        let recent = registry.add_record(Some(now)).await.unwrap();
        registry.mark_records_as_processed(vec![old, recent]).await.unwrap();

        store
            .add_records(old, 1, vec![Sample::new(old_ts, Metric::Et0, Some(4.0))])
            .await
            .unwrap();
        store
            .add_records(recent, 1, vec![Sample::new(now, Metric::Et0, Some(5.0))])
            .await
            .unwrap();

        let summary = store.prune_history(30).await.unwrap();
        assert_eq!(summary, PruneSummary { observations: 1, ticks: 1 });
        assert_eq!(store.count().await.unwrap(), 1);
        assert!(registry.get_record(old).await.unwrap().is_none());
        assert!(registry.get_record(recent).await.unwrap().is_some());
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_reset_clears_observations_and_ticks() {
        let (_dir, executor, _manager) = open_stores().await;
        let store = store_for(&executor);
        let registry = ForecastRegistry::new(executor.clone());

        let tick = registry.add_record(None).await.unwrap();
        store
            .add_records(tick, 1, vec![Sample::new(0, Metric::Pop, Some(0.2))])
            .await
            .unwrap();
        store.reset().await.unwrap();

        assert_eq!(store.count().await.unwrap(), 0);
        assert_eq!(registry.count().await.unwrap(), 0);
        executor.shutdown().await;
    }
}
