//! Store lifecycle.
//!
//! Stores are opened, migrated and closed only inside executor units.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Connection, SqliteConnection};
use tracing::{debug, error, info};

use crate::executor::CommandExecutor;
use crate::migration::{MigrationOutcome, SchemaMigrator};
use crate::stores::{StoreKind, Stores};
use crate::Result;

/// Opens and closes the set of named stores
#[derive(Clone)]
pub struct DatabaseManager {
    executor: CommandExecutor,
    root: Arc<RwLock<Option<PathBuf>>>,
    initialized: Arc<AtomicBool>,
}

impl DatabaseManager {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            root: Arc::new(RwLock::new(None)),
            initialized: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Open every store under `path`, creating and migrating as needed.
    ///
    /// All stores are opened in one unit. If any store fails to open or
    /// migrate, the ones already opened are closed again and the error is
    /// returned.
    pub async fn initialize(&self, path: impl AsRef<Path>) -> Result<()> {
        let root = path.as_ref().to_path_buf();
        let dir = root.clone();

        self.executor
            .execute("database.open_all", move |stores| {
                Box::pin(async move {
                    if let Err(e) = open_all(stores, &dir).await {
                        error!(error = %e, "Failed to open stores in {}", dir.display());
                        stores.close_all().await;
                        return Err(e);
                    }
                    Ok(())
                })
            })
            .await?;

        if let Ok(mut current) = self.root.write() {
            *current = Some(root.clone());
        }
        self.initialized.store(true, Ordering::Release);
        info!("Stores initialized in {}", root.display());
        Ok(())
    }

    /// Close every store
    pub async fn uninitialize(&self) -> Result<()> {
        self.executor
            .execute("database.close_all", |stores| {
                Box::pin(async move {
                    stores.close_all().await;
                    Ok(())
                })
            })
            .await?;
        self.initialized.store(false, Ordering::Release);
        info!("Stores closed");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// File backing `kind`, once initialized
    pub fn path_for(&self, kind: StoreKind) -> Option<PathBuf> {
        let root = self.root.read().ok()?;
        root.as_deref().map(|dir| kind.path_in(dir))
    }

    /// Rebuild a store file to reclaim free pages
    pub async fn vacuum(&self, kind: StoreKind) -> Result<()> {
        self.executor
            .execute("database.vacuum", move |stores| {
                Box::pin(async move {
                    let conn = stores.get(kind)?;
                    sqlx::query("VACUUM").execute(conn).await?;
                    info!("Vacuumed {} store", kind);
                    Ok(())
                })
            })
            .await
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }
}

async fn open_all(stores: &mut Stores, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;

    for kind in StoreKind::ALL {
        if stores.is_open(kind) {
            continue;
        }
        let conn = open_store(kind, dir).await?;
        stores.insert(kind, conn);
    }
    Ok(())
}

async fn open_store(kind: StoreKind, dir: &Path) -> Result<SqliteConnection> {
    let path = kind.path_in(dir);
    let options = SqliteConnectOptions::new()
        .filename(&path)
        .create_if_missing(true)
        .foreign_keys(true);
    let mut conn = SqliteConnection::connect_with(&options).await?;

    match SchemaMigrator::for_store(kind).migrate(&mut conn).await {
        Ok(MigrationOutcome::UpToDate) => debug!("Opened {} store", kind),
        Ok(MigrationOutcome::Upgraded { from, to }) => {
            info!("Opened {} store, upgraded from version {} to {}", kind, from, to)
        }
        Err(e) => {
            let _ = conn.close().await;
            return Err(e);
        }
    }
    Ok(conn)
}
