//! Schema versioning.
//!
//! Every store keeps a single-row `version` table. A store file is brought
//! from its persisted version to the compiled target by applying the
//! registered upgrade steps in order. A brand-new file starts at version 0,
//! so creating a schema and evolving it go through the same steps.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, error, info};

use crate::stores::StoreKind;
use crate::{Result, StorageError};

/// Future returned by an upgrade step
pub type StepFuture<'c> = BoxFuture<'c, Result<()>>;

/// Upgrade entry point for one schema version
pub type StepFn = for<'c> fn(&'c mut SqliteConnection) -> StepFuture<'c>;

/// Brings a store from `version - 1` to `version`
#[derive(Clone, Copy)]
pub struct UpgradeStep {
    pub version: i64,
    pub description: &'static str,
    pub apply: StepFn,
}

impl UpgradeStep {
    pub const fn new(version: i64, description: &'static str, apply: StepFn) -> Self {
        Self {
            version,
            description,
            apply,
        }
    }
}

/// Result of a successful migration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    UpToDate,
    Upgraded { from: i64, to: i64 },
}

/// Applies ordered upgrade steps to one store
pub struct SchemaMigrator {
    store: StoreKind,
    target: i64,
    steps: BTreeMap<i64, UpgradeStep>,
}

impl SchemaMigrator {
    pub fn new(store: StoreKind, target: i64, steps: impl IntoIterator<Item = UpgradeStep>) -> Self {
        Self {
            store,
            target,
            steps: steps.into_iter().map(|s| (s.version, s)).collect(),
        }
    }

    /// Compiled steps of a store, targeting its latest version
    pub fn for_store(store: StoreKind) -> Self {
        let steps = crate::schema::steps(store);
        let target = steps.iter().map(|s| s.version).max().unwrap_or(0);
        Self::new(store, target, steps.iter().copied())
    }

    pub fn target(&self) -> i64 {
        self.target
    }

    /// Bring `conn` to the target version.
    ///
    /// A store newer than the target is refused untouched. A missing or
    /// failing step stops the sequence; the persisted version then names
    /// the last step that committed.
    pub async fn migrate(&self, conn: &mut SqliteConnection) -> Result<MigrationOutcome> {
        ensure_version_table(conn).await?;
        let persisted = persisted_version(conn).await?;

        if persisted > self.target {
            error!(
                "{} store is at version {} but only {} is supported",
                self.store, persisted, self.target
            );
            return Err(StorageError::DowngradeError {
                store: self.store,
                persisted,
                target: self.target,
            });
        }
        if persisted == self.target {
            debug!("{} store is up to date at version {}", self.store, persisted);
            return Ok(MigrationOutcome::UpToDate);
        }

        for version in (persisted + 1)..=self.target {
            let Some(step) = self.steps.get(&version) else {
                error!("No upgrade step for {} store version {}", self.store, version);
                return Err(StorageError::MigrationError {
                    store: self.store,
                    version,
                    reason: "no upgrade step registered".to_string(),
                });
            };

            info!(
                "Upgrading {} store to version {}: {}",
                self.store, version, step.description
            );
            let mut tx = conn.begin().await?;
            if let Err(e) = (step.apply)(&mut *tx).await {
                error!(error = %e, "Upgrade of {} store to version {} failed", self.store, version);
                return Err(StorageError::MigrationError {
                    store: self.store,
                    version,
                    reason: e.to_string(),
                });
            }
            write_version(&mut *tx, version).await?;
            tx.commit().await?;
        }

        Ok(MigrationOutcome::Upgraded {
            from: persisted,
            to: self.target,
        })
    }
}

async fn ensure_version_table(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS version (
            id INTEGER PRIMARY KEY CHECK (id = 0),
            version INTEGER NOT NULL
        )",
    )
    .execute(conn)
    .await?;
    Ok(())
}

/// Schema version recorded in a store, 0 when none was ever written
pub async fn persisted_version(conn: &mut SqliteConnection) -> Result<i64> {
    let version: Option<i64> = sqlx::query_scalar("SELECT version FROM version WHERE id = 0")
        .fetch_optional(conn)
        .await?;
    Ok(version.unwrap_or(0))
}

async fn write_version(conn: &mut SqliteConnection, version: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO version (id, version) VALUES (0, ?)
         ON CONFLICT(id) DO UPDATE SET version = excluded.version",
    )
    .bind(version)
    .execute(conn)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_table(conn: &mut SqliteConnection, name: &str) -> Result<()> {
        sqlx::query(&format!("CREATE TABLE {} (id INTEGER)", name))
            .execute(conn)
            .await?;
        Ok(())
    }

    fn step_one(conn: &mut SqliteConnection) -> StepFuture<'_> {
        Box::pin(create_table(conn, "one"))
    }

    fn step_two(conn: &mut SqliteConnection) -> StepFuture<'_> {
        Box::pin(create_table(conn, "two"))
    }

    fn step_three(conn: &mut SqliteConnection) -> StepFuture<'_> {
        Box::pin(create_table(conn, "three"))
    }

    fn step_five(conn: &mut SqliteConnection) -> StepFuture<'_> {
        Box::pin(create_table(conn, "five"))
    }

    fn failing_step(conn: &mut SqliteConnection) -> StepFuture<'_> {
        Box::pin(async move {
            sqlx::query("CREATE TABLE partial (id INTEGER)")
                .execute(&mut *conn)
                .await?;
            sqlx::query("INSERT INTO missing_table VALUES (1)")
                .execute(&mut *conn)
                .await?;
            Ok(())
        })
    }

    async fn memory_connection() -> SqliteConnection {
        SqliteConnection::connect("sqlite::memory:").await.unwrap()
    }

    async fn table_exists(conn: &mut SqliteConnection, name: &str) -> bool {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(name)
                .fetch_one(conn)
                .await
                .unwrap();
        count == 1
    }

    #[tokio::test]
    async fn test_fresh_store_runs_every_step() {
        let mut conn = memory_connection().await;
        let migrator = SchemaMigrator::new(
            StoreKind::Settings,
            2,
            [
                UpgradeStep::new(1, "one", step_one),
                UpgradeStep::new(2, "two", step_two),
            ],
        );

        let outcome = migrator.migrate(&mut conn).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::Upgraded { from: 0, to: 2 });
        assert_eq!(persisted_version(&mut conn).await.unwrap(), 2);
        assert!(table_exists(&mut conn, "two").await);

        let outcome = migrator.migrate(&mut conn).await.unwrap();
        assert_eq!(outcome, MigrationOutcome::UpToDate);
    }

    #[tokio::test]
    async fn test_missing_step_stops_at_last_good_version() {
        let mut conn = memory_connection().await;
        SchemaMigrator::new(
            StoreKind::Main,
            2,
            [
                UpgradeStep::new(1, "one", step_one),
                UpgradeStep::new(2, "two", step_two),
            ],
        )
        .migrate(&mut conn)
        .await
        .unwrap();

        let migrator = SchemaMigrator::new(
            StoreKind::Main,
            5,
            [
                UpgradeStep::new(1, "one", step_one),
                UpgradeStep::new(2, "two", step_two),
                UpgradeStep::new(3, "three", step_three),
                UpgradeStep::new(5, "five", step_five),
            ],
        );
        let result = migrator.migrate(&mut conn).await;

        assert!(matches!(
            result,
            Err(StorageError::MigrationError { version: 4, .. })
        ));
        assert_eq!(persisted_version(&mut conn).await.unwrap(), 3);
        assert!(table_exists(&mut conn, "three").await);
        assert!(!table_exists(&mut conn, "five").await);
    }

    #[tokio::test]
    async fn test_failing_step_rolls_back() {
        let mut conn = memory_connection().await;
        let migrator = SchemaMigrator::new(
            StoreKind::Mixer,
            2,
            [
                UpgradeStep::new(1, "one", step_one),
                UpgradeStep::new(2, "broken", failing_step),
            ],
        );

        let result = migrator.migrate(&mut conn).await;
        assert!(matches!(
            result,
            Err(StorageError::MigrationError { version: 2, .. })
        ));
        assert_eq!(persisted_version(&mut conn).await.unwrap(), 1);
        assert!(!table_exists(&mut conn, "partial").await);
    }

    #[tokio::test]
    async fn test_newer_store_is_refused() {
        let mut conn = memory_connection().await;
        SchemaMigrator::new(
            StoreKind::Climatology,
            2,
            [
                UpgradeStep::new(1, "one", step_one),
                UpgradeStep::new(2, "two", step_two),
            ],
        )
        .migrate(&mut conn)
        .await
        .unwrap();

        let older = SchemaMigrator::new(
            StoreKind::Climatology,
            1,
            [UpgradeStep::new(1, "one", step_one)],
        );
        let result = older.migrate(&mut conn).await;
        assert!(matches!(
            result,
            Err(StorageError::DowngradeError {
                persisted: 2,
                target: 1,
                ..
            })
        ));
        assert_eq!(persisted_version(&mut conn).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_compiled_tables_reach_their_target() {
        for store in StoreKind::ALL {
            let mut conn = memory_connection().await;
            let migrator = SchemaMigrator::for_store(store);
            assert!(migrator.target() >= 1);
            migrator.migrate(&mut conn).await.unwrap();
            assert_eq!(persisted_version(&mut conn).await.unwrap(), migrator.target());
        }
    }
}
