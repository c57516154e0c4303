//! Listener fan-out for sync lifecycle events.

use crate::config::Provider;
use crate::types::{Conflict, SnapshotData, SyncStatus};
use serde::Serialize;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Which half of a cycle produced a [`SyncEvent::SyncSuccess`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Up,
    Down,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SyncEvent {
    ConfigUpdated {
        provider: Provider,
        enabled: bool,
    },
    ConnectionSuccess {
        provider: Provider,
    },
    ConnectionError {
        provider: Provider,
        message: String,
    },
    SyncSuccess {
        direction: SyncDirection,
        checksum: String,
        /// Merged collections after a download; absent for uploads.
        #[serde(skip_serializing_if = "Option::is_none")]
        data: Option<SnapshotData>,
    },
    SyncError {
        message: String,
    },
    StatusChange {
        status: SyncStatus,
    },
    ConflictResolved {
        conflict: Conflict,
    },
}

impl SyncEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            SyncEvent::ConfigUpdated { .. } => "config_updated",
            SyncEvent::ConnectionSuccess { .. } => "connection_success",
            SyncEvent::ConnectionError { .. } => "connection_error",
            SyncEvent::SyncSuccess { .. } => "sync_success",
            SyncEvent::SyncError { .. } => "sync_error",
            SyncEvent::StatusChange { .. } => "status_change",
            SyncEvent::ConflictResolved { .. } => "conflict_resolved",
        }
    }
}

/// Handle returned by [`Listeners::add`], used to unregister.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type Listener = Arc<dyn Fn(&SyncEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<(ListenerId, Listener)>,
}

/// Registered callbacks, invoked in registration order.
#[derive(Default)]
pub struct Listeners {
    inner: RwLock<Registry>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Listener) -> ListenerId {
        let mut reg = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = ListenerId(reg.next_id);
        reg.next_id += 1;
        reg.listeners.push((id, listener));
        id
    }

    /// Returns false if `id` was not registered.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut reg = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let before = reg.listeners.len();
        reg.listeners.retain(|(lid, _)| *lid != id);
        reg.listeners.len() != before
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event` to every listener.
    ///
    /// Runs on a copy of the list so a listener may add or remove listeners.
    /// A panicking listener is logged and skipped.
    pub fn emit(&self, event: &SyncEvent) {
        let snapshot: Vec<Listener> = self
            .inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .listeners
            .iter()
            .map(|(_, l)| l.clone())
            .collect();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                warn!("listener panicked while handling {}", event.name());
            }
        }
    }
}
