//! Cross-device sync engine for Huddle.
//!
//! Reconciles a device's meetings, stakeholders and stakeholder categories
//! against a shared remote snapshot:
//! - Stable device identity persisted in local state
//! - Order-independent content checksums
//! - Conflict detection with a clock-skew tolerance
//! - Record-level merge that never drops an id
//! - Offline queue drained FIFO on reconnect
//! - Pluggable backends (S3 with STS credentials, REST file store with OAuth)

pub mod api_client;
pub mod backend;
pub mod config;
pub mod conflict;
pub mod credential_manager;
pub mod device;
pub mod error;
pub mod events;
pub mod local;
pub mod merge;
pub mod orchestrator;
pub mod queue;
pub mod s3_transport;
pub mod types;
pub mod versioning;

pub use backend::{BackendAdapter, BackendFactory, ProviderRegistry, UploadReceipt};
pub use config::{BackendConfig, EngineConfig, Provider, SyncConfig};
pub use conflict::ConflictDetector;
pub use device::DeviceIdentity;
pub use error::{ErrorKind, SyncError, SyncResult};
pub use events::{ListenerId, SyncDirection, SyncEvent};
pub use local::LocalState;
pub use orchestrator::{
    ConnectionResult, DrainReport, SyncDownOutcome, SyncNowReport, SyncOrchestrator,
    SyncStatusReport, SyncUpOutcome,
};
pub use types::*;
