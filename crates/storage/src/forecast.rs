//! Forecast tick registry (observations store)
//!
//! A tick is one collection cycle. Ids are assigned by SQLite
//! `AUTOINCREMENT`, so they keep increasing even after rows are deleted.

use sqlx::{Connection, SqliteConnection};
use tracing::{debug, info, warn};
use weather_data::{current_timestamp, ForecastTick, TickId};

use crate::executor::CommandExecutor;
use crate::stores::{StoreKind, Stores};
use crate::Result;

type TickRow = (i64, i64, bool);

fn from_row((id, timestamp, processed): TickRow) -> ForecastTick {
    ForecastTick {
        id,
        timestamp,
        processed,
    }
}

pub async fn add_record(stores: &mut Stores, timestamp: i64) -> Result<TickId> {
    let conn = stores.get(StoreKind::Observations)?;
    let id = sqlx::query("INSERT INTO forecast (timestamp) VALUES (?)")
        .bind(timestamp)
        .execute(conn)
        .await?
        .last_insert_rowid();
    debug!("Added forecast tick {} at {}", id, timestamp);
    Ok(id)
}

pub async fn get_record(stores: &mut Stores, id: TickId) -> Result<Option<ForecastTick>> {
    let conn = stores.get(StoreKind::Observations)?;
    let row: Option<TickRow> =
        sqlx::query_as("SELECT id, timestamp, processed FROM forecast WHERE id = ?")
            .bind(id)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(from_row))
}

pub async fn unprocessed(stores: &mut Stores) -> Result<Vec<ForecastTick>> {
    let conn = stores.get(StoreKind::Observations)?;
    let rows: Vec<TickRow> = sqlx::query_as(
        "SELECT id, timestamp, processed FROM forecast WHERE processed = 0 ORDER BY id",
    )
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(from_row).collect())
}

pub async fn mark_processed(stores: &mut Stores, ids: &[TickId]) -> Result<()> {
    let conn = stores.get(StoreKind::Observations)?;
    let mut tx = conn.begin().await?;
    for id in ids {
        sqlx::query("UPDATE forecast SET processed = 1 WHERE id = ?")
            .bind(*id)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(())
}

/// Reopen every tick that has observations, so the next pass mixes it again
pub async fn mark_all_not_processed(stores: &mut Stores) -> Result<u64> {
    let conn = stores.get(StoreKind::Observations)?;
    let reopened = sqlx::query(
        "UPDATE forecast SET processed = 0
         WHERE id IN (SELECT DISTINCT forecast_tick_id FROM observations)",
    )
    .execute(conn)
    .await?
    .rows_affected();
    info!("Marked {} forecast ticks as not processed", reopened);
    Ok(reopened)
}

pub async fn last(stores: &mut Stores) -> Result<Option<ForecastTick>> {
    let conn = stores.get(StoreKind::Observations)?;
    let row: Option<TickRow> = sqlx::query_as(
        "SELECT id, timestamp, processed FROM forecast ORDER BY id DESC LIMIT 1",
    )
    .fetch_optional(conn)
    .await?;
    Ok(row.map(from_row))
}

/// Heal a gap in the id sequence.
///
/// When no tick with id `>= expected_id` exists, a processed recovery tick
/// is inserted at `expected_id` and every tick is marked processed, so
/// nothing lost is reprocessed. Returns whether a gap was found.
pub async fn fix_corrupted_data(
    stores: &mut Stores,
    expected_id: TickId,
    expected_timestamp: i64,
) -> Result<bool> {
    let conn = stores.get(StoreKind::Observations)?;
    let found: Option<i64> = sqlx::query_scalar("SELECT id FROM forecast WHERE id >= ? LIMIT 1")
        .bind(expected_id)
        .fetch_optional(&mut *conn)
        .await?;
    if found.is_some() {
        return Ok(false);
    }

    warn!(
        "Forecast tick {} is missing, inserting recovery tick at {}",
        expected_id, expected_timestamp
    );
    let mut tx = conn.begin().await?;
    sqlx::query("INSERT INTO forecast (id, timestamp, processed) VALUES (?, ?, 1)")
        .bind(expected_id)
        .bind(expected_timestamp)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE forecast SET processed = 1")
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(true)
}

/// Delete every tick. Commits only with the caller's transaction.
pub async fn clear(conn: &mut SqliteConnection) -> Result<u64> {
    let deleted = sqlx::query("DELETE FROM forecast")
        .execute(conn)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn count(stores: &mut Stores) -> Result<i64> {
    let conn = stores.get(StoreKind::Observations)?;
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM forecast")
        .fetch_one(conn)
        .await?;
    Ok(count)
}

/// Forecast ticks, one unit per call
#[derive(Clone)]
pub struct ForecastRegistry {
    executor: CommandExecutor,
}

impl ForecastRegistry {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    /// Start a new tick, stamped now unless `timestamp` is given
    pub async fn add_record(&self, timestamp: Option<i64>) -> Result<TickId> {
        let timestamp = timestamp.unwrap_or_else(current_timestamp);
        self.executor
            .execute("forecast.add_record", move |stores| {
                Box::pin(add_record(stores, timestamp))
            })
            .await
    }

    pub async fn get_record(&self, id: TickId) -> Result<Option<ForecastTick>> {
        self.executor
            .execute("forecast.get_record", move |stores| {
                Box::pin(get_record(stores, id))
            })
            .await
    }

    /// Ticks not yet mixed, oldest first
    pub async fn get_unprocessed_records(&self) -> Result<Vec<ForecastTick>> {
        self.executor
            .execute("forecast.unprocessed", |stores| Box::pin(unprocessed(stores)))
            .await
    }

    pub async fn mark_records_as_processed(&self, ids: Vec<TickId>) -> Result<()> {
        self.executor
            .execute("forecast.mark_processed", move |stores| {
                Box::pin(async move { mark_processed(stores, &ids).await })
            })
            .await
    }

    pub async fn mark_all_records_as_not_processed(&self) -> Result<u64> {
        self.executor
            .execute("forecast.mark_all_not_processed", |stores| {
                Box::pin(mark_all_not_processed(stores))
            })
            .await
    }

    pub async fn get_last_forecast(&self) -> Result<Option<ForecastTick>> {
        self.executor
            .execute("forecast.last", |stores| Box::pin(last(stores)))
            .await
    }

    pub async fn fix_corrupted_data(&self, expected_id: TickId, expected_timestamp: i64) -> Result<bool> {
        self.executor
            .execute("forecast.fix_corrupted_data", move |stores| {
                Box::pin(fix_corrupted_data(stores, expected_id, expected_timestamp))
            })
            .await
    }

    /// Delete every tick and commit
    pub async fn clear(&self) -> Result<u64> {
        self.executor
            .execute("forecast.clear", |stores| {
                Box::pin(async move {
                    let conn = stores.get(StoreKind::Observations)?;
                    let mut tx = conn.begin().await?;
                    let deleted = clear(&mut *tx).await?;
                    tx.commit().await?;
                    Ok(deleted)
                })
            })
            .await
    }

    pub async fn count(&self) -> Result<i64> {
        self.executor
            .execute("forecast.count", |stores| Box::pin(count(stores)))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::open_stores;

    #[tokio::test]
    async fn test_ids_increase_in_call_order() {
        let (_dir, executor, _manager) = open_stores().await;
        let registry = ForecastRegistry::new(executor.clone());

        let mut ids = Vec::new();
        for ts in 0..5 {
            ids.push(registry.add_record(Some(1_000 + ts)).await.unwrap());
        }
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        // Deleted ids are never handed out again
        registry.clear().await.unwrap();
        let next = registry.add_record(None).await.unwrap();
        assert!(next > ids[4]);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_processed_ticks_leave_unprocessed_list() {
        let (_dir, executor, _manager) = open_stores().await;
        let registry = ForecastRegistry::new(executor.clone());

        let a = registry.add_record(Some(10)).await.unwrap();
        let b = registry.add_record(Some(20)).await.unwrap();
        let c = registry.add_record(Some(30)).await.unwrap();

        registry.mark_records_as_processed(vec![a, c]).await.unwrap();
        // Idempotent
        registry.mark_records_as_processed(vec![a]).await.unwrap();

        let pending = registry.get_unprocessed_records().await.unwrap();
        assert_eq!(pending.iter().map(|t| t.id).collect::<Vec<_>>(), vec![b]);
        assert!(registry.get_record(a).await.unwrap().unwrap().processed);

        let last = registry.get_last_forecast().await.unwrap().unwrap();
        assert_eq!((last.id, last.timestamp), (c, 30));
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_fix_corrupted_data_inserts_recovery_tick() {
        let (_dir, executor, _manager) = open_stores().await;
        let registry = ForecastRegistry::new(executor.clone());

        for ts in [1, 2, 3] {
            registry.add_record(Some(ts)).await.unwrap();
        }

        assert!(registry.fix_corrupted_data(100, 5_000).await.unwrap());

        let recovery = registry.get_record(100).await.unwrap().unwrap();
        assert_eq!(recovery.timestamp, 5_000);
        assert!(recovery.processed);
        assert!(registry.get_unprocessed_records().await.unwrap().is_empty());
        assert_eq!(registry.count().await.unwrap(), 4);

        // No gap any more
        assert!(!registry.fix_corrupted_data(100, 6_000).await.unwrap());
        assert!(registry.add_record(None).await.unwrap() > 100);
        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let (_dir, executor, _manager) = open_stores().await;
        let registry = ForecastRegistry::new(executor.clone());

        assert!(registry.get_last_forecast().await.unwrap().is_none());
        assert!(registry.get_unprocessed_records().await.unwrap().is_empty());
        assert_eq!(registry.mark_all_records_as_not_processed().await.unwrap(), 0);
        executor.shutdown().await;
    }
}
