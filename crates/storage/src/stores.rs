//! Named stores owned by the executor worker

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, warn};

use crate::{Result, StorageError};

/// One SQLite file per domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// Limits and other core tables
    Main,
    /// Forecast ticks, raw observations and custom metric names
    Observations,
    /// Mixed records
    Mixer,
    Settings,
    Climatology,
    Simulator,
}

impl StoreKind {
    pub const ALL: [StoreKind; 6] = [
        StoreKind::Main,
        StoreKind::Observations,
        StoreKind::Mixer,
        StoreKind::Settings,
        StoreKind::Climatology,
        StoreKind::Simulator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Main => "main",
            StoreKind::Observations => "observations",
            StoreKind::Mixer => "mixer",
            StoreKind::Settings => "settings",
            StoreKind::Climatology => "climatology",
            StoreKind::Simulator => "simulator",
        }
    }

    pub fn file_name(&self) -> String {
        format!("weather-{}.sqlite", self.as_str())
    }

    /// Location of this store's file under `dir`
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Open connections, reachable only from inside executor units
#[derive(Default)]
pub struct Stores {
    connections: BTreeMap<StoreKind, SqliteConnection>,
}

impl Stores {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Connection of an open store
    pub fn get(&mut self, kind: StoreKind) -> Result<&mut SqliteConnection> {
        self.connections
            .get_mut(&kind)
            .ok_or(StorageError::StoreClosed(kind))
    }

    pub fn is_open(&self, kind: StoreKind) -> bool {
        self.connections.contains_key(&kind)
    }

    pub(crate) fn insert(&mut self, kind: StoreKind, conn: SqliteConnection) {
        self.connections.insert(kind, conn);
    }

    /// Close every open store
    pub async fn close_all(&mut self) {
        let connections = std::mem::take(&mut self.connections);
        for (kind, conn) in connections {
            match conn.close().await {
                Ok(()) => debug!("Closed {} store", kind),
                Err(e) => warn!(error = %e, "Failed to close {} store cleanly", kind),
            }
        }
    }
}
