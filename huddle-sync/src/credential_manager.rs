//! Short-lived S3 credentials with refresh ahead of expiry.
//!
//! One cached credential set per container. Callers always go through
//! [`CredentialManager::get_credentials`]; a failure to obtain new credentials
//! because the session is gone surfaces as [`SyncError::AuthExpired`].

use crate::api_client::CloudApiClient;
use crate::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Temporary S3 credentials vended by the control plane.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
    pub bucket: String,
    pub region: String,
}

impl StsCredentials {
    /// Returns true if the credentials expire within `secs` seconds.
    pub fn expires_within_secs(&self, secs: i64) -> bool {
        Utc::now() + chrono::Duration::seconds(secs) >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct CredentialManager {
    api: Arc<CloudApiClient>,
    container: String,
    credentials: RwLock<Option<StsCredentials>>,
    refresh_margin_secs: i64,
}

impl CredentialManager {
    pub fn new(api: Arc<CloudApiClient>, container: String, refresh_margin_secs: i64) -> Self {
        Self {
            api,
            container,
            credentials: RwLock::new(None),
            refresh_margin_secs,
        }
    }

    /// Returns cached credentials, refreshing them when inside the margin.
    pub async fn get_credentials(&self) -> SyncResult<StsCredentials> {
        {
            let creds = self.credentials.read().await;
            if let Some(ref c) = *creds {
                if !c.expires_within_secs(self.refresh_margin_secs) {
                    return Ok(c.clone());
                }
                debug!(
                    "credentials for {} expire within {}s, refreshing",
                    self.container, self.refresh_margin_secs
                );
            }
        }

        self.refresh().await
    }

    /// Fetches a new credential set regardless of the cached one.
    pub async fn refresh(&self) -> SyncResult<StsCredentials> {
        let new_creds = match self.api.get_sts_credentials(&self.container).await {
            Ok(c) => c,
            Err(e @ (SyncError::AuthFailed(_) | SyncError::AuthRequired)) => {
                warn!("credential refresh for {} rejected: {e}", self.container);
                self.clear().await;
                return Err(SyncError::AuthExpired);
            }
            Err(e) => {
                warn!("credential refresh for {} failed: {e}", self.container);
                return Err(e);
            }
        };

        debug!(
            "refreshed credentials for {}, expires at {}",
            self.container, new_creds.expires_at
        );

        *self.credentials.write().await = Some(new_creds.clone());
        Ok(new_creds)
    }

    pub async fn clear(&self) {
        *self.credentials.write().await = None;
    }

    /// True if credentials are cached and outside the refresh margin.
    pub async fn has_valid_credentials(&self) -> bool {
        self.credentials
            .read()
            .await
            .as_ref()
            .is_some_and(|c| !c.expires_within_secs(self.refresh_margin_secs))
    }
}
