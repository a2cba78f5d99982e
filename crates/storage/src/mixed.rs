//! Blended records (mixer store)
//!
//! Stored one row per (tick, timestamp, metric). A tick's rows are always
//! replaced as a whole.

use sqlx::Connection;
use weather_data::{ForecastTick, MetricKey, MixedRecord, MixedValue, TickId};

use crate::executor::CommandExecutor;
use crate::stores::{StoreKind, Stores};
use crate::{Result, StorageError};

type MixedRow = (i64, i64, i64, String, f64, Option<i64>);

/// Fold rows ordered by timestamp into one record per timestamp
fn from_rows(rows: Vec<MixedRow>) -> Result<Vec<MixedRecord>> {
    let mut records: Vec<MixedRecord> = Vec::new();
    for (tick_id, forecast_timestamp, timestamp, metric, value, contributors) in rows {
        let key = metric
            .parse::<MetricKey>()
            .map_err(|e| StorageError::InvalidData(e.to_string()))?;
        let contributors = contributors.and_then(|c| u32::try_from(c).ok());

        let starts_record = records.last().map_or(true, |last| {
            last.forecast_tick_id != tick_id || last.timestamp != timestamp
        });
        if starts_record {
            records.push(MixedRecord {
                forecast_tick_id: tick_id,
                forecast_timestamp,
                timestamp,
                ..Default::default()
            });
        }
        if let Some(record) = records.last_mut() {
            record.values.insert(key, MixedValue { value, contributors });
        }
    }
    Ok(records)
}

/// Replace everything stored for `tick` with `records`, in one transaction
pub async fn replace_for_tick(stores: &mut Stores, tick: &ForecastTick, records: &[MixedRecord]) -> Result<u64> {
    let conn = stores.get(StoreKind::Mixer)?;
    let mut tx = conn.begin().await?;
    sqlx::query("DELETE FROM mixed_records WHERE forecast_tick_id = ?")
        .bind(tick.id)
        .execute(&mut *tx)
        .await?;

    let mut written = 0;
    for record in records {
        for (metric, mixed) in &record.values {
            written += sqlx::query(
                "INSERT INTO mixed_records
                 (forecast_tick_id, forecast_timestamp, timestamp, metric, value, contributors)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(tick.id)
            .bind(tick.timestamp)
            .bind(record.timestamp)
            .bind(metric.to_string())
            .bind(mixed.value)
            .bind(mixed.contributors.map(i64::from))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }
    }
    tx.commit().await?;
    Ok(written)
}

pub async fn records_for_tick(stores: &mut Stores, tick_id: TickId) -> Result<Vec<MixedRecord>> {
    let conn = stores.get(StoreKind::Mixer)?;
    let rows: Vec<MixedRow> = sqlx::query_as(
        "SELECT forecast_tick_id, forecast_timestamp, timestamp, metric, value, contributors
         FROM mixed_records WHERE forecast_tick_id = ? ORDER BY timestamp, metric",
    )
    .bind(tick_id)
    .fetch_all(conn)
    .await?;
    from_rows(rows)
}

/// Id of the newest tick with mixed records
pub async fn last_tick_id(stores: &mut Stores) -> Result<Option<TickId>> {
    let conn = stores.get(StoreKind::Mixer)?;
    let id: Option<i64> = sqlx::query_scalar("SELECT MAX(forecast_tick_id) FROM mixed_records")
        .fetch_one(conn)
        .await?;
    Ok(id)
}

/// Records of the newest mixed tick
pub async fn latest(stores: &mut Stores) -> Result<Vec<MixedRecord>> {
    match last_tick_id(stores).await? {
        Some(id) => records_for_tick(stores, id).await,
        None => Ok(Vec::new()),
    }
}

pub async fn delete_older_than(stores: &mut Stores, timestamp: i64) -> Result<u64> {
    let conn = stores.get(StoreKind::Mixer)?;
    let deleted = sqlx::query("DELETE FROM mixed_records WHERE timestamp < ?")
        .bind(timestamp)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn clear(stores: &mut Stores) -> Result<u64> {
    let conn = stores.get(StoreKind::Mixer)?;
    let deleted = sqlx::query("DELETE FROM mixed_records")
        .execute(conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

/// Mixed records, one unit per call
#[derive(Clone)]
pub struct MixedRecordStore {
    executor: CommandExecutor,
}

impl MixedRecordStore {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    pub async fn replace_for_tick(&self, tick: ForecastTick, records: Vec<MixedRecord>) -> Result<u64> {
        self.executor
            .execute("mixed.replace_for_tick", move |stores| {
                Box::pin(async move { replace_for_tick(stores, &tick, &records).await })
            })
            .await
    }

    pub async fn records_for_tick(&self, tick_id: TickId) -> Result<Vec<MixedRecord>> {
        self.executor
            .execute("mixed.records_for_tick", move |stores| {
                Box::pin(records_for_tick(stores, tick_id))
            })
            .await
    }

    pub async fn last_tick_id(&self) -> Result<Option<TickId>> {
        self.executor
            .execute("mixed.last_tick_id", |stores| Box::pin(last_tick_id(stores)))
            .await
    }

    pub async fn latest(&self) -> Result<Vec<MixedRecord>> {
        self.executor
            .execute("mixed.latest", |stores| Box::pin(latest(stores)))
            .await
    }

    pub async fn delete_older_than(&self, timestamp: i64) -> Result<u64> {
        self.executor
            .execute("mixed.delete_older_than", move |stores| {
                Box::pin(delete_older_than(stores, timestamp))
            })
            .await
    }

    pub async fn clear(&self) -> Result<u64> {
        self.executor
            .execute("mixed.clear", |stores| Box::pin(clear(stores)))
            .await
    }
}
