//! Pluggable remote storage backends.
//!
//! Every provider implements [`BackendAdapter`]: one upload and one download
//! call keyed by a logical name, plus whatever credential lifecycle the
//! provider needs. The orchestrator only ever sees the trait; the
//! [`BackendFactory`] is the single place that maps a [`Provider`] to a type.

pub mod http;
pub mod s3;

use crate::config::{BackendConfig, EngineConfig, Provider};
use crate::error::{SyncError, SyncResult};
use crate::types::Snapshot;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;

pub use http::{HttpBackend, HttpBackendConfig};
pub use s3::{S3Backend, S3BackendConfig};

/// Result of a successful upload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UploadReceipt {
    /// Handle for updating the same remote object in place next time.
    pub remote_ref: Option<String>,
}

/// Uniform upload/download contract implemented once per provider.
///
/// Implementations refresh their own time-limited credentials before a call
/// and report an unrecoverable refresh as [`SyncError::AuthExpired`].
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn provider(&self) -> Provider;

    /// Creates the remote object for `key`, or updates it in place when
    /// `remote_ref` (or an existing object with the same key) is found.
    async fn upload(
        &self,
        key: &str,
        payload: &Snapshot,
        remote_ref: Option<&str>,
    ) -> SyncResult<UploadReceipt>;

    /// Fetches the snapshot for `key`. `Ok(None)` means nothing was uploaded yet.
    async fn download(&self, key: &str, remote_ref: Option<&str>) -> SyncResult<Option<Snapshot>>;

    /// Session credentials as they stand now, keyed like the backend config,
    /// so rotated tokens survive a restart. A null value means the key should
    /// be dropped. `None` for providers with nothing to save.
    async fn credentials(&self) -> Option<BackendConfig> {
        None
    }
}

/// Builds backends from persisted configuration.
pub trait BackendFactory: Send + Sync {
    fn create(
        &self,
        provider: Provider,
        config: &BackendConfig,
        engine: &EngineConfig,
    ) -> SyncResult<Arc<dyn BackendAdapter>>;
}

/// The production factory covering every [`Provider`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ProviderRegistry;

impl BackendFactory for ProviderRegistry {
    fn create(
        &self,
        provider: Provider,
        config: &BackendConfig,
        engine: &EngineConfig,
    ) -> SyncResult<Arc<dyn BackendAdapter>> {
        match provider {
            Provider::S3 => Ok(Arc::new(S3Backend::from_config(
                parse_backend_config(provider, config)?,
                engine,
            )?)),
            Provider::Http => Ok(Arc::new(HttpBackend::from_config(
                parse_backend_config(provider, config)?,
                engine,
            )?)),
        }
    }
}

/// Parses the opaque provider map into a typed config.
pub fn parse_backend_config<T: DeserializeOwned>(
    provider: Provider,
    config: &BackendConfig,
) -> SyncResult<T> {
    serde_json::from_value(serde_json::Value::Object(config.clone()))
        .map_err(|e| SyncError::Config(format!("{provider} backend config: {e}")))
}
