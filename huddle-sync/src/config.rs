//! Sync configuration.

use serde::{Deserialize, Serialize};

/// Provider-specific settings, opaque to the orchestrator.
pub type BackendConfig = serde_json::Map<String, serde_json::Value>;

/// Default auto-sync interval (5 minutes).
pub const DEFAULT_INTERVAL_MS: u64 = 300_000;

/// Remote storage providers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// S3-compatible object store with STS credentials from the control plane.
    S3,
    /// REST file store authenticated with OAuth bearer tokens.
    Http,
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Provider::S3 => f.write_str("s3"),
            Provider::Http => f.write_str("http"),
        }
    }
}

/// Engine-wide settings fixed at construction.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Logical remote key the snapshot is stored under.
    pub sync_key: String,

    /// Key used for the sentinel upload that tests a new configuration.
    pub connection_test_key: String,

    /// Auto-sync interval when the sync config does not specify one.
    pub default_interval_ms: u64,

    /// Snapshots closer together than this are never a conflict.
    pub conflict_tolerance_ms: u64,

    /// Refresh provider credentials this long before they expire.
    pub credential_refresh_margin_secs: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sync_key: "huddle-sync-data".to_string(),
            connection_test_key: "huddle-connection-test".to_string(),
            default_interval_ms: DEFAULT_INTERVAL_MS,
            conflict_tolerance_ms: 10_000,
            credential_refresh_margin_secs: 300, // 5 minutes before expiry
        }
    }
}

/// Persisted sync configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncConfig {
    pub provider: Provider,

    #[serde(default)]
    pub backend_config: BackendConfig,

    /// Only set once the connectivity test has passed.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_auto_sync")]
    pub auto_sync: bool,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Backend-assigned handle for updating the remote snapshot in place.
    #[serde(default)]
    pub remote_key_ref: Option<String>,
}

fn default_auto_sync() -> bool {
    true
}

fn default_interval_ms() -> u64 {
    DEFAULT_INTERVAL_MS
}

impl SyncConfig {
    /// A fresh, not-yet-enabled configuration for `provider`.
    pub fn new(provider: Provider, backend_config: BackendConfig) -> Self {
        Self {
            provider,
            backend_config,
            enabled: false,
            auto_sync: default_auto_sync(),
            interval_ms: DEFAULT_INTERVAL_MS,
            remote_key_ref: None,
        }
    }
}
