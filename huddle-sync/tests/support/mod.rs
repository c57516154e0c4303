//! Shared helpers for orchestrator tests: an in-memory backend shared by
//! several simulated devices, and record builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use huddle_storage::StateStore;
use huddle_sync::{
    BackendAdapter, BackendConfig, BackendFactory, EngineConfig, Meeting, Provider, Snapshot,
    SnapshotData, Stakeholder, SyncError, SyncEvent, SyncOrchestrator, SyncResult,
    UploadReceipt,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SYNC_KEY: &str = "huddle-sync-data";

type UploadFilter = Box<dyn Fn(&str, &Snapshot) -> bool + Send + Sync>;

/// Remote storage shared by every device in a test.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<HashMap<String, Snapshot>>,
    uploads: Mutex<Vec<(String, Snapshot)>>,
    downloads: AtomicUsize,
    fail_when: Mutex<Option<UploadFilter>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, key: &str) -> Option<Snapshot> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    /// Places a snapshot directly, bypassing any device.
    pub fn put(&self, key: &str, snapshot: Snapshot) {
        self.objects.lock().unwrap().insert(key.to_string(), snapshot);
    }

    /// Successful uploads to `key`, in order.
    pub fn uploads_to(&self, key: &str) -> Vec<Snapshot> {
        self.uploads
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, s)| s.clone())
            .collect()
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Makes uploads matching `filter` fail.
    pub fn fail_uploads_when<F>(&self, filter: F)
    where
        F: Fn(&str, &Snapshot) -> bool + Send + Sync + 'static,
    {
        *self.fail_when.lock().unwrap() = Some(Box::new(filter));
    }

    pub fn stop_failing(&self) {
        *self.fail_when.lock().unwrap() = None;
    }

    /// Alters the stored data for `key` without updating its checksum.
    pub fn tamper(&self, key: &str) {
        let mut objects = self.objects.lock().unwrap();
        let snapshot = objects.get_mut(key).expect("nothing stored to tamper with");
        snapshot
            .data
            .meetings
            .push(Meeting::new("injected").with_field("title", "not from any device"));
    }
}

pub struct MemoryBackend {
    store: Arc<MemoryStore>,
}

#[async_trait]
impl BackendAdapter for MemoryBackend {
    fn provider(&self) -> Provider {
        Provider::Http
    }

    async fn upload(
        &self,
        key: &str,
        payload: &Snapshot,
        _remote_ref: Option<&str>,
    ) -> SyncResult<UploadReceipt> {
        if let Some(filter) = self.store.fail_when.lock().unwrap().as_ref() {
            if filter(key, payload) {
                return Err(SyncError::Backend(format!("injected failure for {key}")));
            }
        }

        self.store
            .objects
            .lock()
            .unwrap()
            .insert(key.to_string(), payload.clone());
        self.store
            .uploads
            .lock()
            .unwrap()
            .push((key.to_string(), payload.clone()));

        Ok(UploadReceipt {
            remote_ref: Some(format!("mem://{key}")),
        })
    }

    async fn download(&self, key: &str, _remote_ref: Option<&str>) -> SyncResult<Option<Snapshot>> {
        self.store.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.get(key))
    }
}

/// Hands out backends over one [`MemoryStore`].
///
/// A backend config containing `"reject": true` fails construction.
pub struct MemoryFactory {
    pub store: Arc<MemoryStore>,
}

impl BackendFactory for MemoryFactory {
    fn create(
        &self,
        _provider: Provider,
        config: &BackendConfig,
        _engine: &EngineConfig,
    ) -> SyncResult<Arc<dyn BackendAdapter>> {
        if config.get("reject").and_then(|v| v.as_bool()) == Some(true) {
            return Err(SyncError::Config("rejected by test factory".into()));
        }
        Ok(Arc::new(MemoryBackend {
            store: self.store.clone(),
        }))
    }
}

/// Opens an unconfigured device over a fresh in-memory state store.
pub async fn open_device(store: &Arc<MemoryStore>, platform: &str) -> Arc<SyncOrchestrator> {
    let state = StateStore::open_in_memory().unwrap();
    SyncOrchestrator::open(
        state,
        Arc::new(MemoryFactory {
            store: store.clone(),
        }),
        EngineConfig::default(),
        platform,
    )
    .await
    .unwrap()
}

/// Opens a device, configures it against `store` and turns auto-sync off.
pub async fn configured_device(store: &Arc<MemoryStore>, platform: &str) -> Arc<SyncOrchestrator> {
    let device = open_device(store, platform).await;
    let result = device
        .configure(Provider::Http, BackendConfig::new())
        .await
        .unwrap();
    assert!(result.success, "configure failed: {:?}", result.error);
    device.set_auto_sync(false, None).await.unwrap();
    device
}

/// Collects every event `device` emits from now on.
pub fn record_events(device: &SyncOrchestrator) -> Arc<Mutex<Vec<SyncEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    device.add_listener(move |e| sink.lock().unwrap().push(e.clone()));
    events
}

pub fn event_names(events: &Mutex<Vec<SyncEvent>>) -> Vec<&'static str> {
    events.lock().unwrap().iter().map(|e| e.name()).collect()
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

pub fn minutes_ago(mins: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(mins)
}

pub fn meeting(id: &str, saved: DateTime<Utc>) -> Meeting {
    Meeting::new(id)
        .with_created_at(saved)
        .with_last_saved(saved)
        .with_field("title", format!("Meeting {id}"))
}

pub fn stakeholder(id: &str, updated: DateTime<Utc>) -> Stakeholder {
    Stakeholder::new(id)
        .with_updated_at(updated)
        .with_field("name", format!("Person {id}"))
}

pub fn meetings(records: Vec<Meeting>) -> SnapshotData {
    SnapshotData {
        meetings: records,
        ..Default::default()
    }
}

pub fn meeting_ids(data: &SnapshotData) -> Vec<String> {
    data.meetings.iter().map(|m| m.id.clone()).collect()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
