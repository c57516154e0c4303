//! Async access to the device's persisted state.
//!
//! Wraps a [`StateStore`] and runs every DuckDB call on the blocking pool.

use crate::error::SyncResult;
use crate::types::SnapshotData;
use chrono::{DateTime, Utc};
use huddle_storage::{StateStore, StorageResult};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Fixed storage keys. Changing any of these orphans existing installs.
pub mod keys {
    pub const DEVICE_ID: &str = "huddle.device_id";
    pub const DEVICE: &str = "huddle.device";
    pub const SYNC_CONFIG: &str = "huddle.sync_config";
    pub const LAST_SYNC_TIME: &str = "huddle.last_sync_time";

    pub const MEETINGS: &str = "meetings";
    pub const STAKEHOLDERS: &str = "stakeholders";
    pub const STAKEHOLDER_CATEGORIES: &str = "stakeholderCategories";
}

/// Handle to the local state store.
#[derive(Clone)]
pub struct LocalState {
    store: StateStore,
}

impl LocalState {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// The underlying store, for callers that manage their own threading.
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    async fn blocking<T, F>(&self, f: F) -> SyncResult<T>
    where
        F: FnOnce(&StateStore) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.store.clone();
        Ok(tokio::task::spawn_blocking(move || f(&store)).await??)
    }

    pub async fn get<T>(&self, key: &str) -> SyncResult<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let key = key.to_owned();
        self.blocking(move |s| s.get(&key)).await
    }

    pub async fn put<T>(&self, key: &str, value: T) -> SyncResult<()>
    where
        T: Serialize + Send + 'static,
    {
        let key = key.to_owned();
        self.blocking(move |s| s.put(&key, &value)).await
    }

    pub async fn remove(&self, key: &str) -> SyncResult<bool> {
        let key = key.to_owned();
        self.blocking(move |s| s.remove(&key)).await
    }

    /// Reads the three synced collections. Missing collections are empty.
    pub async fn load_data(&self) -> SyncResult<SnapshotData> {
        self.blocking(|s| {
            Ok(SnapshotData {
                meetings: s.get(keys::MEETINGS)?.unwrap_or_default(),
                stakeholders: s.get(keys::STAKEHOLDERS)?.unwrap_or_default(),
                stakeholder_categories: s.get(keys::STAKEHOLDER_CATEGORIES)?.unwrap_or_default(),
            })
        })
        .await
    }

    /// Replaces the three synced collections in one transaction.
    pub async fn save_data(&self, data: &SnapshotData) -> SyncResult<()> {
        let entries = vec![
            (keys::MEETINGS, serde_json::to_value(&data.meetings)?),
            (keys::STAKEHOLDERS, serde_json::to_value(&data.stakeholders)?),
            (
                keys::STAKEHOLDER_CATEGORIES,
                serde_json::to_value(&data.stakeholder_categories)?,
            ),
        ];
        self.blocking(move |s| s.put_many(&entries)).await
    }

    pub async fn last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        self.get(keys::LAST_SYNC_TIME).await
    }

    pub async fn set_last_sync_time(&self, at: DateTime<Utc>) -> SyncResult<()> {
        self.put(keys::LAST_SYNC_TIME, at).await
    }
}
