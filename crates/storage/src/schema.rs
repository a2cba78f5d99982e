//! Compiled upgrade steps of every store

use data_validator::{MetricLimits, DEFAULT_SCOPE};
use sqlx::SqliteConnection;

use crate::migration::{StepFuture, UpgradeStep};
use crate::stores::StoreKind;
use crate::{limits, Result};

const MAIN: &[UpgradeStep] = &[
    UpgradeStep::new(1, "limits table", create_limits),
    UpgradeStep::new(2, "default weather limits", seed_limits),
];

const OBSERVATIONS: &[UpgradeStep] = &[
    UpgradeStep::new(1, "forecast table", create_forecast),
    UpgradeStep::new(2, "observations table", create_observations),
    UpgradeStep::new(3, "user metric types table", create_user_metric_types),
];

const MIXER: &[UpgradeStep] = &[UpgradeStep::new(1, "mixed records table", create_mixed_records)];

const SETTINGS: &[UpgradeStep] = &[UpgradeStep::new(1, "settings table", create_settings)];

const CLIMATOLOGY: &[UpgradeStep] = &[UpgradeStep::new(1, "climatology table", create_climatology)];

const SIMULATOR: &[UpgradeStep] = &[UpgradeStep::new(1, "simulator runs table", create_simulator_runs)];

pub(crate) fn steps(store: StoreKind) -> &'static [UpgradeStep] {
    match store {
        StoreKind::Main => MAIN,
        StoreKind::Observations => OBSERVATIONS,
        StoreKind::Mixer => MIXER,
        StoreKind::Settings => SETTINGS,
        StoreKind::Climatology => CLIMATOLOGY,
        StoreKind::Simulator => SIMULATOR,
    }
}

async fn run_all(conn: &mut SqliteConnection, statements: &[&str]) -> Result<()> {
    for statement in statements {
        sqlx::query(statement).execute(&mut *conn).await?;
    }
    Ok(())
}

fn create_limits(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &["CREATE TABLE limits (
            scope TEXT NOT NULL,
            name TEXT NOT NULL,
            min REAL,
            max REAL,
            UNIQUE (scope, name)
        )"],
    ))
}

fn seed_limits(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(async move {
        let records = MetricLimits::default().to_records(DEFAULT_SCOPE);
        limits::upsert(conn, &records).await?;
        Ok(())
    })
}

fn create_forecast(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &["CREATE TABLE forecast (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp INTEGER NOT NULL,
            processed INTEGER NOT NULL DEFAULT 0
        )"],
    ))
}

fn create_observations(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &[
            "CREATE TABLE observations (
                forecast_tick_id INTEGER NOT NULL,
                source_id INTEGER NOT NULL,
                metric TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                value REAL,
                PRIMARY KEY (source_id, metric, timestamp)
            )",
            "CREATE INDEX idx_observations_tick ON observations (forecast_tick_id)",
            "CREATE INDEX idx_observations_timestamp ON observations (timestamp)",
        ],
    ))
}

fn create_user_metric_types(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &["CREATE TABLE user_metric_types (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE
        )"],
    ))
}

fn create_mixed_records(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &[
            "CREATE TABLE mixed_records (
                forecast_tick_id INTEGER NOT NULL,
                forecast_timestamp INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                metric TEXT NOT NULL,
                value REAL NOT NULL,
                contributors INTEGER,
                PRIMARY KEY (forecast_tick_id, timestamp, metric)
            )",
            "CREATE INDEX idx_mixed_records_timestamp ON mixed_records (timestamp)",
        ],
    ))
}

fn create_settings(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &["CREATE TABLE settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )"],
    ))
}

fn create_climatology(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &["CREATE TABLE climatology (
            day_of_year INTEGER NOT NULL,
            metric TEXT NOT NULL,
            value REAL,
            PRIMARY KEY (day_of_year, metric)
        )"],
    ))
}

fn create_simulator_runs(conn: &mut SqliteConnection) -> StepFuture<'_> {
    Box::pin(run_all(
        conn,
        &["CREATE TABLE simulator_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at INTEGER NOT NULL,
            description TEXT
        )"],
    ))
}
