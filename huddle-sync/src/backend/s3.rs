//! S3-compatible object store provider.
//!
//! Snapshots are stored as JSON objects under
//! `{key_prefix}/{container}/{key}.json`. Credentials are short-lived STS
//! credentials vended by the control plane for one container and refreshed
//! by [`CredentialManager`] ahead of expiry.

use super::{BackendAdapter, UploadReceipt};
use crate::api_client::CloudApiClient;
use crate::config::{BackendConfig, EngineConfig, Provider};
use crate::credential_manager::CredentialManager;
use crate::error::{SyncError, SyncResult};
use crate::s3_transport::S3Transport;
use crate::types::Snapshot;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Typed view of the `s3` backend config map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct S3BackendConfig {
    /// Control-plane base URL that vends credentials.
    pub api_base_url: String,
    /// Per-user or per-team scope the credentials are issued for.
    pub container: String,
    pub bucket: String,
    pub region: String,
    /// Custom endpoint for MinIO and other S3-compatible stores.
    #[serde(default)]
    pub endpoint_override: Option<String>,
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_key_prefix() -> String {
    "huddle".to_string()
}

pub struct S3Backend {
    config: S3BackendConfig,
    api: Arc<CloudApiClient>,
    credentials: CredentialManager,
    transport: S3Transport,
}

impl S3Backend {
    pub fn from_config(config: S3BackendConfig, engine: &EngineConfig) -> SyncResult<Self> {
        if config.container.is_empty() || config.bucket.is_empty() {
            return Err(SyncError::Config(
                "s3 backend needs a container and a bucket".to_string(),
            ));
        }

        let api = match (&config.access_token, &config.refresh_token) {
            (Some(access), Some(refresh)) => {
                CloudApiClient::with_tokens(&config.api_base_url, access.clone(), refresh.clone())?
            }
            _ => CloudApiClient::new(&config.api_base_url)?,
        };
        let api = Arc::new(api);

        let credentials = CredentialManager::new(
            api.clone(),
            config.container.clone(),
            engine.credential_refresh_margin_secs,
        );
        let transport = S3Transport::new(
            config.bucket.clone(),
            config.region.clone(),
            config.endpoint_override.clone(),
        );

        Ok(Self {
            config,
            api,
            credentials,
            transport,
        })
    }

    pub fn object_key(&self, key: &str) -> String {
        format!(
            "{}/{}/{key}.json",
            self.config.key_prefix.trim_end_matches('/'),
            self.config.container
        )
    }

    fn resolve_key(&self, key: &str, remote_ref: Option<&str>) -> String {
        match remote_ref {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => self.object_key(key),
        }
    }
}

#[async_trait]
impl BackendAdapter for S3Backend {
    fn provider(&self) -> Provider {
        Provider::S3
    }

    async fn upload(
        &self,
        key: &str,
        payload: &Snapshot,
        remote_ref: Option<&str>,
    ) -> SyncResult<UploadReceipt> {
        let object_key = self.resolve_key(key, remote_ref);
        let body = serde_json::to_vec(payload)?;
        let creds = self.credentials.get_credentials().await?;

        match self.transport.upload(&creds, &object_key, body.clone()).await {
            Ok(()) => {}
            Err(SyncError::AuthExpired) => {
                warn!("credentials expired mid-call, refreshing once");
                let creds = self.credentials.refresh().await?;
                self.transport.upload(&creds, &object_key, body).await?;
            }
            Err(e) => return Err(e),
        }

        debug!(
            "uploaded snapshot {} to s3://{}/{object_key}",
            payload.metadata.checksum,
            self.transport.bucket()
        );
        Ok(UploadReceipt {
            remote_ref: Some(object_key),
        })
    }

    /// Control-plane tokens; both null once the session was revoked.
    async fn credentials(&self) -> Option<BackendConfig> {
        let tokens = self.api.current_tokens().await;
        let mut saved = BackendConfig::new();
        saved.insert(
            "accessToken".to_string(),
            tokens
                .as_ref()
                .map_or(Value::Null, |t| Value::from(t.access_token.clone())),
        );
        saved.insert(
            "refreshToken".to_string(),
            tokens.map_or(Value::Null, |t| Value::from(t.refresh_token)),
        );
        Some(saved)
    }

    async fn download(&self, key: &str, remote_ref: Option<&str>) -> SyncResult<Option<Snapshot>> {
        let object_key = self.resolve_key(key, remote_ref);
        let creds = self.credentials.get_credentials().await?;

        let bytes = match self.transport.download_optional(&creds, &object_key).await {
            Err(SyncError::AuthExpired) => {
                let creds = self.credentials.refresh().await?;
                self.transport.download_optional(&creds, &object_key).await?
            }
            other => other?,
        };

        match bytes {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }
}
