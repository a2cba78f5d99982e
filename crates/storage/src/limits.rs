//! Persisted plausibility limits (main store)

use data_validator::{LimitValidator, MetricLimit};
use sqlx::{Connection, SqliteConnection};
use tracing::debug;

use crate::executor::CommandExecutor;
use crate::stores::{StoreKind, Stores};
use crate::Result;

type LimitRow = (String, String, Option<f64>, Option<f64>);

fn from_row((scope, name, min, max): LimitRow) -> MetricLimit {
    MetricLimit {
        scope,
        name,
        min,
        max,
    }
}

/// Insert or replace limits by (scope, name). Runs on the caller's
/// connection, so it joins any open transaction.
pub async fn upsert(conn: &mut SqliteConnection, limits: &[MetricLimit]) -> Result<u64> {
    let mut written = 0;
    for limit in limits {
        written += sqlx::query(
            "INSERT INTO limits (scope, name, min, max) VALUES (?, ?, ?, ?)
             ON CONFLICT(scope, name) DO UPDATE SET min = excluded.min, max = excluded.max",
        )
        .bind(&limit.scope)
        .bind(&limit.name)
        .bind(limit.min)
        .bind(limit.max)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }
    Ok(written)
}

pub async fn add_records(stores: &mut Stores, limits: &[MetricLimit]) -> Result<u64> {
    let conn = stores.get(StoreKind::Main)?;
    let mut tx = conn.begin().await?;
    let written = upsert(&mut *tx, limits).await?;
    tx.commit().await?;
    debug!("Stored {} limits", written);
    Ok(written)
}

pub async fn get_record(stores: &mut Stores, scope: &str, name: &str) -> Result<Option<MetricLimit>> {
    let conn = stores.get(StoreKind::Main)?;
    let row: Option<LimitRow> =
        sqlx::query_as("SELECT scope, name, min, max FROM limits WHERE scope = ? AND name = ?")
            .bind(scope)
            .bind(name)
            .fetch_optional(conn)
            .await?;
    Ok(row.map(from_row))
}

pub async fn all(stores: &mut Stores, scope: &str) -> Result<Vec<MetricLimit>> {
    let conn = stores.get(StoreKind::Main)?;
    let rows: Vec<LimitRow> =
        sqlx::query_as("SELECT scope, name, min, max FROM limits WHERE scope = ? ORDER BY name")
            .bind(scope)
            .fetch_all(conn)
            .await?;
    Ok(rows.into_iter().map(from_row).collect())
}

/// Limits table of the main store
#[derive(Clone)]
pub struct LimitTable {
    executor: CommandExecutor,
}

impl LimitTable {
    pub fn new(executor: CommandExecutor) -> Self {
        Self { executor }
    }

    pub async fn add_record(&self, limit: MetricLimit) -> Result<()> {
        self.add_records(vec![limit]).await.map(|_| ())
    }

    pub async fn add_records(&self, limits: Vec<MetricLimit>) -> Result<u64> {
        self.executor
            .execute("limits.add_records", move |stores| {
                Box::pin(async move { add_records(stores, &limits).await })
            })
            .await
    }

    pub async fn get_record(&self, scope: &str, name: &str) -> Result<Option<MetricLimit>> {
        let (scope, name) = (scope.to_string(), name.to_string());
        self.executor
            .execute("limits.get_record", move |stores| {
                Box::pin(async move { get_record(stores, &scope, &name).await })
            })
            .await
    }

    pub async fn all(&self, scope: &str) -> Result<Vec<MetricLimit>> {
        let scope = scope.to_string();
        self.executor
            .execute("limits.all", move |stores| {
                Box::pin(async move { all(stores, &scope).await })
            })
            .await
    }

    /// Validator built from the persisted limits of `scope`
    pub async fn load_validator(&self, scope: &str) -> Result<LimitValidator> {
        let limits = self.all(scope).await?;
        Ok(LimitValidator::from_limits(&limits))
    }
}
