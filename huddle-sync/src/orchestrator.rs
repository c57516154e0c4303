//! Sync orchestrator.
//!
//! Drives upload and download cycles against the active backend and owns:
//! - the offline queue, drained FIFO when connectivity returns
//! - the auto-sync timer (a cancellable background task)
//! - the listener registry
//!
//! Cycles are serialized by a single in-flight lock. Manual calls wait for
//! it; an auto-sync tick that finds it held is skipped.

use crate::backend::{BackendAdapter, BackendFactory};
use crate::config::{BackendConfig, EngineConfig, Provider, SyncConfig};
use crate::conflict::ConflictDetector;
use crate::device::DeviceIdentity;
use crate::error::{SyncError, SyncResult};
use crate::events::{ListenerId, Listeners, SyncDirection, SyncEvent};
use crate::local::{LocalState, keys};
use crate::merge::merge;
use crate::queue::OfflineQueue;
use crate::types::{Conflict, DeviceRecord, QueueEntry, Snapshot, SnapshotData, SyncStatus};
use crate::versioning;

use chrono::{DateTime, Utc};
use huddle_storage::StateStore;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Result of a configuration or connectivity test.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConnectionResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ConnectionResult {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(error: impl ToString) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncUpOutcome {
    /// No enabled configuration.
    NotConfigured,
    /// Offline; the data was queued for replay.
    Queued { pending: usize },
    Uploaded {
        checksum: String,
        remote_ref: Option<String>,
    },
    /// Local data was empty while the remote held records, so the cycle
    /// downloaded instead of overwriting the remote.
    RedirectedToDown(SyncDownOutcome),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncDownOutcome {
    NotConfigured,
    Offline,
    /// Nothing has been uploaded for the sync key yet.
    NoCloudData,
    Merged {
        data: SnapshotData,
        conflict: Option<Conflict>,
    },
}

/// Both halves of [`SyncOrchestrator::sync_now`].
#[derive(Clone, Debug, PartialEq)]
pub struct SyncNowReport {
    pub down: SyncDownOutcome,
    pub up: SyncUpOutcome,
}

/// Outcome of replaying the offline queue.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub replayed: usize,
    pub remaining: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatusReport {
    pub status: SyncStatus,
    pub enabled: bool,
    pub provider: Option<Provider>,
    pub online: bool,
    pub pending_uploads: usize,
    pub last_sync_time: Option<DateTime<Utc>>,
    pub auto_sync_running: bool,
    pub device: DeviceRecord,
}

struct AutoSyncHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub struct SyncOrchestrator {
    state: LocalState,
    device: Mutex<DeviceIdentity>,
    factory: Arc<dyn BackendFactory>,
    engine: EngineConfig,
    detector: ConflictDetector,
    config: RwLock<Option<SyncConfig>>,
    backend: RwLock<Option<Arc<dyn BackendAdapter>>>,
    status: std::sync::Mutex<SyncStatus>,
    online: AtomicBool,
    queue: Mutex<OfflineQueue>,
    /// Held for the duration of every cycle.
    sync_lock: Mutex<()>,
    auto_sync: std::sync::Mutex<Option<AutoSyncHandle>>,
    listeners: Listeners,
    this: Weak<SyncOrchestrator>,
}

impl SyncOrchestrator {
    /// Opens the orchestrator over `store`, restoring any saved configuration.
    ///
    /// `platform` is a user-agent or platform string used to name this device.
    /// If the saved configuration is enabled with auto-sync on, the timer is
    /// started.
    pub async fn open(
        store: StateStore,
        factory: Arc<dyn BackendFactory>,
        engine: EngineConfig,
        platform: &str,
    ) -> SyncResult<Arc<Self>> {
        let state = LocalState::new(store);
        let device = DeviceIdentity::load_or_create(state.clone(), platform).await?;
        let config: Option<SyncConfig> = state.get(keys::SYNC_CONFIG).await?;

        let backend = match config.as_ref().filter(|c| c.enabled) {
            Some(cfg) => match factory.create(cfg.provider, &cfg.backend_config, &engine) {
                Ok(b) => Some(b),
                Err(e) => {
                    warn!("saved {} config could not be restored: {e}", cfg.provider);
                    None
                }
            },
            None => None,
        };

        info!(
            "sync orchestrator opened for {} ({}), provider {:?}",
            device.id(),
            device.name(),
            config.as_ref().map(|c| c.provider)
        );

        let start_timer = backend.is_some() && config.as_ref().is_some_and(|c| c.auto_sync);
        let detector =
            ConflictDetector::new(Duration::from_millis(engine.conflict_tolerance_ms));

        let orchestrator = Arc::new_cyclic(|this| Self {
            state,
            device: Mutex::new(device),
            factory,
            engine,
            detector,
            config: RwLock::new(config),
            backend: RwLock::new(backend),
            status: std::sync::Mutex::new(SyncStatus::Idle),
            online: AtomicBool::new(true),
            queue: Mutex::new(OfflineQueue::new()),
            sync_lock: Mutex::new(()),
            auto_sync: std::sync::Mutex::new(None),
            listeners: Listeners::new(),
            this: this.clone(),
        });

        if start_timer {
            orchestrator.start_auto_sync().await?;
        }

        Ok(orchestrator)
    }

    // ── Configuration ──

    /// Saves a new configuration and tests it with a sentinel upload.
    ///
    /// The configuration is only enabled if the test passes. Failures are
    /// reported in the result, not as errors.
    pub async fn configure(
        &self,
        provider: Provider,
        backend_config: BackendConfig,
    ) -> SyncResult<ConnectionResult> {
        self.stop_auto_sync();
        let guard = self.sync_lock.lock().await;

        let cfg = SyncConfig::new(provider, backend_config);
        self.state.put(keys::SYNC_CONFIG, cfg.clone()).await?;
        *self.config.write().await = Some(cfg.clone());
        *self.backend.write().await = None;
        self.emit(SyncEvent::ConfigUpdated {
            provider,
            enabled: false,
        });

        let backend = match self
            .factory
            .create(provider, &cfg.backend_config, &self.engine)
        {
            Ok(b) => b,
            Err(e) => {
                warn!("{provider} backend rejected its configuration: {e}");
                self.emit(SyncEvent::ConnectionError {
                    provider,
                    message: e.to_string(),
                });
                return Ok(ConnectionResult::failed(e));
            }
        };

        let sentinel = self.sentinel_upload(backend.as_ref()).await;
        self.persist_credentials(backend.as_ref()).await;
        if let Err(e) = sentinel {
            warn!("{provider} connection test failed: {e}");
            self.emit(SyncEvent::ConnectionError {
                provider,
                message: e.to_string(),
            });
            return Ok(ConnectionResult::failed(e));
        }

        let cfg = {
            let mut guard = self.config.write().await;
            let mut cfg = guard.take().unwrap_or(cfg);
            cfg.enabled = true;
            *guard = Some(cfg.clone());
            cfg
        };
        self.state.put(keys::SYNC_CONFIG, cfg.clone()).await?;
        *self.backend.write().await = Some(backend);

        info!("{provider} sync configured and enabled");
        self.emit(SyncEvent::ConnectionSuccess { provider });
        self.emit(SyncEvent::ConfigUpdated {
            provider,
            enabled: true,
        });

        drop(guard);
        if cfg.auto_sync {
            self.start_auto_sync().await?;
        }

        Ok(ConnectionResult::ok())
    }

    /// Re-runs the sentinel upload against the active backend.
    pub async fn test_connection(&self) -> ConnectionResult {
        if !self.is_online() {
            return ConnectionResult::failed(SyncError::Offline);
        }
        let Some((cfg, backend)) = self.active().await else {
            return ConnectionResult::failed(SyncError::NotConfigured);
        };

        let sentinel = self.sentinel_upload(backend.as_ref()).await;
        self.persist_credentials(backend.as_ref()).await;
        match sentinel {
            Ok(()) => {
                self.emit(SyncEvent::ConnectionSuccess {
                    provider: cfg.provider,
                });
                ConnectionResult::ok()
            }
            Err(e) => {
                self.emit(SyncEvent::ConnectionError {
                    provider: cfg.provider,
                    message: e.to_string(),
                });
                ConnectionResult::failed(e)
            }
        }
    }

    async fn sentinel_upload(&self, backend: &dyn BackendAdapter) -> SyncResult<()> {
        let snapshot = {
            let device = self.device.lock().await;
            Snapshot::build(SnapshotData::default(), device.record(), Utc::now())?
        };
        backend
            .upload(&self.engine.connection_test_key, &snapshot, None)
            .await?;
        Ok(())
    }

    /// Folds credentials the backend rotated during a call back into the saved
    /// backend config. A null value removes the key.
    async fn persist_credentials(&self, backend: &dyn BackendAdapter) {
        let Some(credentials) = backend.credentials().await else {
            return;
        };

        let updated = {
            let mut guard = self.config.write().await;
            let Some(cfg) = guard.as_mut() else {
                return;
            };
            let mut changed = false;
            for (key, value) in credentials {
                changed |= if value.is_null() {
                    cfg.backend_config.remove(&key).is_some()
                } else if cfg.backend_config.get(&key) != Some(&value) {
                    cfg.backend_config.insert(key, value);
                    true
                } else {
                    false
                };
            }
            changed.then(|| cfg.clone())
        };

        if let Some(cfg) = updated {
            debug!("saving rotated {} credentials", cfg.provider);
            if let Err(e) = self.state.put(keys::SYNC_CONFIG, cfg).await {
                warn!("could not save rotated credentials: {e}");
            }
        }
    }

    /// Turns auto-sync on or off and optionally changes its interval.
    pub async fn set_auto_sync(&self, enabled: bool, interval_ms: Option<u64>) -> SyncResult<()> {
        if interval_ms == Some(0) {
            return Err(SyncError::Config("auto-sync interval must be positive".into()));
        }

        let cfg = {
            let mut guard = self.config.write().await;
            let cfg = guard.as_mut().ok_or(SyncError::NotConfigured)?;
            cfg.auto_sync = enabled;
            if let Some(ms) = interval_ms {
                cfg.interval_ms = ms;
            }
            cfg.clone()
        };
        self.state.put(keys::SYNC_CONFIG, cfg.clone()).await?;

        if enabled && cfg.enabled {
            self.start_auto_sync().await
        } else {
            self.stop_auto_sync();
            Ok(())
        }
    }

    /// Enabled config and its backend, if both are present.
    async fn active(&self) -> Option<(SyncConfig, Arc<dyn BackendAdapter>)> {
        let cfg = self.config.read().await.clone().filter(|c| c.enabled)?;
        let backend = self.backend.read().await.clone()?;
        Some((cfg, backend))
    }

    // ── Sync cycles ──

    /// Uploads `data` as this device's snapshot.
    ///
    /// While offline the data is queued, unless it is identical to the newest
    /// queued entry. Empty local data never overwrites a populated remote: the
    /// cycle downloads instead.
    pub async fn sync_up(&self, data: SnapshotData) -> SyncResult<SyncUpOutcome> {
        let _guard = self.sync_lock.lock().await;
        self.sync_up_locked(data).await
    }

    async fn sync_up_locked(&self, data: SnapshotData) -> SyncResult<SyncUpOutcome> {
        if !self.is_online() {
            let (queued, pending) = {
                let mut queue = self.queue.lock().await;
                let queued = queue.push_unless_repeat(QueueEntry::upload(data));
                (queued, queue.len())
            };
            if queued {
                debug!("offline, queued upload ({pending} pending)");
            } else {
                debug!("offline, unchanged data already queued ({pending} pending)");
            }
            self.set_status(SyncStatus::Offline);
            return Ok(SyncUpOutcome::Queued { pending });
        }

        self.push_up(data).await
    }

    async fn push_up(&self, data: SnapshotData) -> SyncResult<SyncUpOutcome> {
        let Some((cfg, backend)) = self.active().await else {
            return Ok(SyncUpOutcome::NotConfigured);
        };

        self.set_status(SyncStatus::Syncing);

        if !data.has_records() {
            let remote_has_records = self.remote_has_records(&cfg, backend.as_ref()).await;
            self.persist_credentials(backend.as_ref()).await;
            match remote_has_records {
                Ok(true) => {
                    warn!("local data is empty but the remote holds records, downloading instead");
                    return self
                        .sync_down_locked()
                        .await
                        .map(SyncUpOutcome::RedirectedToDown);
                }
                Ok(false) => {}
                Err(e) => return Err(self.fail(e)),
            }
        }

        let result = self.upload(data, &cfg, backend.as_ref()).await;
        self.persist_credentials(backend.as_ref()).await;
        result.map_err(|e| self.fail(e))
    }

    async fn remote_has_records(
        &self,
        cfg: &SyncConfig,
        backend: &dyn BackendAdapter,
    ) -> SyncResult<bool> {
        let remote = backend
            .download(&self.engine.sync_key, cfg.remote_key_ref.as_deref())
            .await?;
        Ok(remote.is_some_and(|s| s.data.has_records()))
    }

    async fn upload(
        &self,
        data: SnapshotData,
        cfg: &SyncConfig,
        backend: &dyn BackendAdapter,
    ) -> SyncResult<SyncUpOutcome> {
        let mut device = self.device.lock().await;
        let snapshot = Snapshot::build(data, device.record(), Utc::now())?;
        let checksum = snapshot.metadata.checksum.clone();

        let receipt = backend
            .upload(&self.engine.sync_key, &snapshot, cfg.remote_key_ref.as_deref())
            .await?;

        if receipt.remote_ref.is_some() && receipt.remote_ref != cfg.remote_key_ref {
            self.store_remote_ref(receipt.remote_ref.clone()).await?;
        }

        self.state
            .set_last_sync_time(snapshot.metadata.timestamp)
            .await?;
        device.touch().await?;
        drop(device);

        info!("uploaded snapshot {checksum} via {}", backend.provider());
        self.set_status(SyncStatus::Success);
        self.emit(SyncEvent::SyncSuccess {
            direction: SyncDirection::Up,
            checksum: checksum.clone(),
            data: None,
        });

        Ok(SyncUpOutcome::Uploaded {
            checksum,
            remote_ref: receipt.remote_ref,
        })
    }

    async fn store_remote_ref(&self, remote_ref: Option<String>) -> SyncResult<()> {
        let updated = {
            let mut guard = self.config.write().await;
            match guard.as_mut() {
                Some(cfg) => {
                    cfg.remote_key_ref = remote_ref;
                    Some(cfg.clone())
                }
                None => None,
            }
        };
        if let Some(cfg) = updated {
            self.state.put(keys::SYNC_CONFIG, cfg).await?;
        }
        Ok(())
    }

    /// Downloads the remote snapshot and merges it into local state.
    pub async fn sync_down(&self) -> SyncResult<SyncDownOutcome> {
        let _guard = self.sync_lock.lock().await;
        self.sync_down_locked().await
    }

    async fn sync_down_locked(&self) -> SyncResult<SyncDownOutcome> {
        if !self.is_online() {
            self.set_status(SyncStatus::Offline);
            return Ok(SyncDownOutcome::Offline);
        }
        let Some((cfg, backend)) = self.active().await else {
            return Ok(SyncDownOutcome::NotConfigured);
        };

        self.set_status(SyncStatus::Syncing);
        let result = self.download(&cfg, backend.as_ref()).await;
        self.persist_credentials(backend.as_ref()).await;
        result.map_err(|e| self.fail(e))
    }

    async fn download(
        &self,
        cfg: &SyncConfig,
        backend: &dyn BackendAdapter,
    ) -> SyncResult<SyncDownOutcome> {
        let Some(remote) = backend
            .download(&self.engine.sync_key, cfg.remote_key_ref.as_deref())
            .await?
        else {
            info!("no cloud data for {}", self.engine.sync_key);
            self.set_status(SyncStatus::Idle);
            return Ok(SyncDownOutcome::NoCloudData);
        };

        remote.verify_integrity()?;

        let local_data = self.state.load_data().await?;
        let local_timestamp = self.state.last_sync_time().await?.unwrap_or_else(Utc::now);

        let mut device = self.device.lock().await;
        let local = Snapshot::build(local_data, device.record(), local_timestamp)?;

        let conflict = self.detector.detect(&local, &remote)?;
        if let Some(ref c) = conflict {
            warn!(
                "conflict between {} and {} ({}ms apart), merging",
                c.local_device, c.remote_device, c.delta_ms
            );
            self.set_status(SyncStatus::Conflict);
        }

        let merged = merge(&local.data, &remote.data);
        let checksum = versioning::checksum(&merged)?;
        self.state.save_data(&merged).await?;
        self.state.set_last_sync_time(Utc::now()).await?;
        device.touch().await?;
        drop(device);

        info!(
            "merged remote snapshot {} from {}: {} meetings, {} stakeholders",
            remote.metadata.checksum,
            remote.metadata.device_name,
            merged.meetings.len(),
            merged.stakeholders.len()
        );

        self.set_status(SyncStatus::Success);
        self.emit(SyncEvent::SyncSuccess {
            direction: SyncDirection::Down,
            checksum,
            data: Some(merged.clone()),
        });
        if let Some(ref c) = conflict {
            self.emit(SyncEvent::ConflictResolved {
                conflict: c.clone(),
            });
        }

        Ok(SyncDownOutcome::Merged {
            data: merged,
            conflict,
        })
    }

    /// Downloads and merges, then uploads the merged local state.
    pub async fn sync_now(&self) -> SyncResult<SyncNowReport> {
        let _guard = self.sync_lock.lock().await;
        let down = self.sync_down_locked().await?;
        let data = self.state.load_data().await?;
        let up = self.sync_up_locked(data).await?;
        Ok(SyncNowReport { down, up })
    }

    /// Logs, sets the error status and notifies listeners.
    fn fail(&self, e: SyncError) -> SyncError {
        error!("sync failed: {e}");
        self.set_status(SyncStatus::Error);
        self.emit(SyncEvent::SyncError {
            message: e.to_string(),
        });
        e
    }

    // ── Auto-sync ──

    /// Starts (or restarts) the auto-sync timer.
    ///
    /// Each tick uploads the current local collections. Tick failures are
    /// logged and left to the next tick.
    pub async fn start_auto_sync(&self) -> SyncResult<()> {
        let interval_ms = self
            .config
            .read()
            .await
            .as_ref()
            .map_or(self.engine.default_interval_ms, |c| c.interval_ms);
        if interval_ms == 0 {
            return Err(SyncError::Config("auto-sync interval must be positive".into()));
        }

        self.stop_auto_sync();

        let period = Duration::from_millis(interval_ms);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let this = self.this.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    _ = ticker.tick() => {
                        let Some(orchestrator) = this.upgrade() else { break };
                        orchestrator.auto_tick().await;
                    }
                }
            }
            debug!("auto-sync task exited");
        });

        info!("auto-sync started every {interval_ms}ms");
        *self.auto_sync.lock().unwrap_or_else(|e| e.into_inner()) =
            Some(AutoSyncHandle { stop_tx, task });
        Ok(())
    }

    /// Stops the timer. Returns false if it was not running.
    ///
    /// No tick starts after this returns; a tick already in flight finishes.
    pub fn stop_auto_sync(&self) -> bool {
        let handle = self
            .auto_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        match handle {
            Some(h) => {
                let _ = h.stop_tx.send(true);
                info!("auto-sync stopped");
                true
            }
            None => false,
        }
    }

    pub fn auto_sync_running(&self) -> bool {
        self.auto_sync
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }

    async fn auto_tick(&self) {
        let Ok(_guard) = self.sync_lock.try_lock() else {
            debug!("sync in flight, skipping auto-sync tick");
            return;
        };

        let data = match self.state.load_data().await {
            Ok(d) => d,
            Err(e) => {
                warn!("auto-sync could not read local data: {e}");
                return;
            }
        };

        match self.sync_up_locked(data).await {
            Ok(outcome) => debug!("auto-sync tick: {outcome:?}"),
            Err(e) => warn!("auto-sync tick failed: {e}"),
        }
    }

    // ── Connectivity ──

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Records a connectivity change.
    ///
    /// Going online drains the offline queue and returns its report.
    pub async fn set_online(&self, online: bool) -> SyncResult<Option<DrainReport>> {
        let was_online = self.online.swap(online, Ordering::SeqCst);
        match (was_online, online) {
            (false, true) => {
                info!("back online");
                Ok(Some(self.drain_queue().await?))
            }
            (true, false) => {
                info!("went offline");
                self.set_status(SyncStatus::Offline);
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// Replays queued uploads oldest first.
    ///
    /// Stops at the first failure, putting that entry back at the head.
    pub async fn drain_queue(&self) -> SyncResult<DrainReport> {
        let _guard = self.sync_lock.lock().await;
        let mut replayed = 0;

        loop {
            if !self.is_online() {
                break;
            }
            let Some(entry) = self.queue.lock().await.pop_front() else {
                break;
            };

            match self.push_up(entry.data.clone()).await {
                Ok(SyncUpOutcome::NotConfigured) => {
                    debug!("sync not configured, leaving queue in place");
                    self.queue.lock().await.push_front(entry);
                    break;
                }
                Ok(_) => replayed += 1,
                Err(e) => {
                    warn!("queued upload from {} failed: {e}", entry.enqueued_at);
                    self.queue.lock().await.push_front(entry);
                    break;
                }
            }
        }

        let remaining = self.queue.lock().await.len();
        info!("drained offline queue: {replayed} replayed, {remaining} remaining");
        Ok(DrainReport {
            replayed,
            remaining,
        })
    }

    pub async fn pending_uploads(&self) -> usize {
        self.queue.lock().await.len()
    }

    /// Queued entries, oldest first.
    pub async fn queued_entries(&self) -> Vec<QueueEntry> {
        self.queue.lock().await.entries()
    }

    // ── Status ──

    pub fn status(&self) -> SyncStatus {
        *self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: SyncStatus) {
        *self.status.lock().unwrap_or_else(|e| e.into_inner()) = status;
        self.emit(SyncEvent::StatusChange { status });
    }

    pub async fn status_report(&self) -> SyncResult<SyncStatusReport> {
        let (enabled, provider) = match self.config.read().await.as_ref() {
            Some(c) => (c.enabled, Some(c.provider)),
            None => (false, None),
        };

        Ok(SyncStatusReport {
            status: self.status(),
            enabled,
            provider,
            online: self.is_online(),
            pending_uploads: self.pending_uploads().await,
            last_sync_time: self.state.last_sync_time().await?,
            auto_sync_running: self.auto_sync_running(),
            device: self.device().await,
        })
    }

    pub async fn last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        self.state.last_sync_time().await
    }

    pub async fn config(&self) -> Option<SyncConfig> {
        self.config.read().await.clone()
    }

    pub async fn device(&self) -> DeviceRecord {
        self.device.lock().await.record().clone()
    }

    /// Local collections as currently persisted.
    pub async fn local_data(&self) -> SyncResult<SnapshotData> {
        self.state.load_data().await
    }

    /// Replaces the local collections, for hosts that own the records.
    pub async fn save_local_data(&self, data: &SnapshotData) -> SyncResult<()> {
        self.state.save_data(data).await
    }

    // ── Listeners ──

    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&SyncEvent) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn emit(&self, event: SyncEvent) {
        self.listeners.emit(&event);
    }

    // ── Lifecycle ──

    /// Forgets the sync configuration, queue and last-sync time.
    ///
    /// The device identity and local collections are kept.
    pub async fn reset(&self) -> SyncResult<()> {
        self.stop_auto_sync();
        let _guard = self.sync_lock.lock().await;

        *self.config.write().await = None;
        *self.backend.write().await = None;
        self.queue.lock().await.clear();
        self.state.remove(keys::SYNC_CONFIG).await?;
        self.state.remove(keys::LAST_SYNC_TIME).await?;

        info!("sync configuration reset");
        self.set_status(SyncStatus::Idle);
        Ok(())
    }

    /// Stops background work.
    pub fn shutdown(&self) {
        self.stop_auto_sync();
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        self.stop_auto_sync();
    }
}
