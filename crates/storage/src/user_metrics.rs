//! Registry of source-defined metric names (observations store)
//!
//! Names map to ids one to one and rows are never deleted, so an id stored
//! with an observation stays valid forever. Lookups read an in-memory copy
//! and never go through the executor; only new names are inserted via a unit.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, info};
use weather_data::UserMetricId;

use crate::executor::CommandExecutor;
use crate::stores::{StoreKind, Stores};
use crate::{Result, StorageError};

/// In-memory name/id bimap
#[derive(Debug, Default)]
pub struct UserMetricCache {
    ids: HashMap<String, UserMetricId>,
    names: HashMap<UserMetricId, String>,
}

impl UserMetricCache {
    fn insert(&mut self, id: UserMetricId, name: String) {
        self.names.insert(id, name.clone());
        self.ids.insert(name, id);
    }

    pub fn id_of(&self, name: &str) -> Option<UserMetricId> {
        self.ids.get(name).copied()
    }

    pub fn name_of(&self, id: UserMetricId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    fn clear(&mut self) {
        self.ids.clear();
        self.names.clear();
    }
}

pub async fn load_all(stores: &mut Stores) -> Result<Vec<(UserMetricId, String)>> {
    let conn = stores.get(StoreKind::Observations)?;
    let rows: Vec<(i64, String)> = sqlx::query_as("SELECT id, name FROM user_metric_types ORDER BY id")
        .fetch_all(conn)
        .await?;
    Ok(rows
        .into_iter()
        .map(|(id, name)| (UserMetricId(id), name))
        .collect())
}

/// Id of `name`, inserting it when unknown
pub async fn get_or_create(stores: &mut Stores, name: &str) -> Result<UserMetricId> {
    let conn = stores.get(StoreKind::Observations)?;
    sqlx::query("INSERT INTO user_metric_types (name) VALUES (?) ON CONFLICT(name) DO NOTHING")
        .bind(name)
        .execute(&mut *conn)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT id FROM user_metric_types WHERE name = ?")
        .bind(name)
        .fetch_one(conn)
        .await?;
    Ok(UserMetricId(id))
}

/// Shared name/id registry. Clones share one cache.
#[derive(Clone)]
pub struct UserMetricRegistry {
    executor: CommandExecutor,
    cache: Arc<RwLock<UserMetricCache>>,
}

impl UserMetricRegistry {
    pub fn new(executor: CommandExecutor) -> Self {
        Self {
            executor,
            cache: Arc::new(RwLock::new(UserMetricCache::default())),
        }
    }

    fn poisoned() -> StorageError {
        StorageError::InvalidData("user metric cache lock poisoned".to_string())
    }

    /// Load every persisted mapping into the cache
    pub async fn build_cache(&self) -> Result<usize> {
        let rows = self
            .executor
            .execute("user_metrics.load_all", |stores| Box::pin(load_all(stores)))
            .await?;

        let mut cache = self.cache.write().map_err(|_| Self::poisoned())?;
        cache.clear();
        for (id, name) in rows {
            cache.insert(id, name);
        }
        info!("Loaded {} user metric types", cache.len());
        Ok(cache.len())
    }

    /// Id of `name`, registering it on first use
    pub async fn add_record(&self, name: &str) -> Result<UserMetricId> {
        if let Some(id) = self.id_of(name) {
            return Ok(id);
        }

        let owned = name.to_string();
        let id = self
            .executor
            .execute("user_metrics.add_record", move |stores| {
                Box::pin(async move { get_or_create(stores, &owned).await })
            })
            .await?;

        self.cache
            .write()
            .map_err(|_| Self::poisoned())?
            .insert(id, name.to_string());
        debug!("Registered user metric {} as {}", name, id);
        Ok(id)
    }

    pub async fn add_records<'n>(
        &self,
        names: impl IntoIterator<Item = &'n str>,
    ) -> Result<Vec<UserMetricId>> {
        let mut ids = Vec::new();
        for name in names {
            ids.push(self.add_record(name).await?);
        }
        Ok(ids)
    }

    pub fn id_of(&self, name: &str) -> Option<UserMetricId> {
        self.cache.read().ok()?.id_of(name)
    }

    pub fn name_of(&self, id: UserMetricId) -> Option<String> {
        self.cache.read().ok()?.name_of(id).map(str::to_string)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.cache.read().map_err(|_| Self::poisoned())?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Drop the in-memory copy. Persisted rows are untouched.
    pub fn teardown(&self) -> Result<()> {
        self.cache.write().map_err(|_| Self::poisoned())?.clear();
        Ok(())
    }
}
