//! Storage Layer
//!
//! Weather observations, forecast ticks, limits and mixed records live in
//! a set of SQLite stores. A single [`CommandExecutor`] worker owns every
//! connection; all SQL runs inside units submitted to it, so the stores
//! never see two writers at once.
//!
//! Table modules expose in-unit functions taking [`Stores`] so callers can
//! compose several operations into one unit. Each also offers a facade that
//! submits single operations on its own.

mod config;
mod executor;
mod manager;
mod migration;
mod schema;
mod stores;

#[cfg(test)]
mod testing;

pub mod forecast;
pub mod limits;
pub mod mixed;
pub mod observations;
pub mod user_metrics;

pub use config::StorageConfig;
pub use executor::{CommandExecutor, UnitFuture};
pub use forecast::ForecastRegistry;
pub use limits::LimitTable;
pub use manager::DatabaseManager;
pub use migration::{persisted_version, MigrationOutcome, SchemaMigrator, StepFuture, UpgradeStep};
pub use mixed::MixedRecordStore;
pub use observations::{ObservationStore, PruneSummary};
pub use stores::{StoreKind, Stores};
pub use user_metrics::{UserMetricCache, UserMetricRegistry};

use thiserror::Error;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Store {0} is not open")]
    StoreClosed(StoreKind),

    #[error("Command executor is stopped")]
    ExecutorStopped,

    #[error("Command {name} failed: {reason}")]
    CommandFailed { name: String, reason: String },

    #[error("Cannot upgrade {store} store to version {version}: {reason}")]
    MigrationError {
        store: StoreKind,
        version: i64,
        reason: String,
    },

    #[error("{store} store is at version {persisted}, newer than supported version {target}")]
    DowngradeError {
        store: StoreKind,
        persisted: i64,
        target: i64,
    },

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, StorageError>;
