//! HTTP client for the control plane that vends S3 credentials.
//!
//! Handles bearer-token authentication and token refresh on 401. Uses
//! reqwest with JSON serialization.

use crate::credential_manager::StsCredentials;
use crate::error::{SyncError, SyncResult};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// State shared across API client clones.
struct AuthState {
    access_token: Option<String>,
    refresh_token: Option<String>,
    /// Monotonically increasing counter bumped on every successful refresh.
    /// Used to detect when a concurrent refresh has already updated tokens.
    refresh_generation: u64,
}

/// Access/refresh token pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthTokens {
    pub access_token: String,
    pub refresh_token: String,
}

/// HTTP client for the control plane.
pub struct CloudApiClient {
    client: Client,
    base_url: String,
    auth: Arc<RwLock<AuthState>>,
    /// Serializes refresh operations. The server rotates refresh tokens, so
    /// concurrent refreshes with the same old token would all but one fail.
    refresh_lock: Arc<tokio::sync::Mutex<()>>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
}

impl CloudApiClient {
    pub fn new(base_url: impl Into<String>) -> SyncResult<Self> {
        Self::build(base_url.into(), None, None)
    }

    /// Creates a client with a saved session.
    pub fn with_tokens(
        base_url: impl Into<String>,
        access_token: String,
        refresh_token: String,
    ) -> SyncResult<Self> {
        Self::build(base_url.into(), Some(access_token), Some(refresh_token))
    }

    fn build(
        base_url: String,
        access_token: Option<String>,
        refresh_token: Option<String>,
    ) -> SyncResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth: Arc::new(RwLock::new(AuthState {
                access_token,
                refresh_token,
                refresh_generation: 0,
            })),
            refresh_lock: Arc::new(tokio::sync::Mutex::new(())),
        })
    }

    pub async fn set_tokens(&self, access_token: String, refresh_token: String) {
        let mut auth = self.auth.write().await;
        auth.access_token = Some(access_token);
        auth.refresh_token = Some(refresh_token);
    }

    pub async fn is_authenticated(&self) -> bool {
        self.auth.read().await.access_token.is_some()
    }

    pub async fn logout(&self) {
        let mut auth = self.auth.write().await;
        auth.access_token = None;
        auth.refresh_token = None;
    }

    /// Returns current auth tokens for persistence.
    pub async fn current_tokens(&self) -> Option<AuthTokens> {
        let auth = self.auth.read().await;
        Some(AuthTokens {
            access_token: auth.access_token.clone()?,
            refresh_token: auth.refresh_token.clone()?,
        })
    }

    pub async fn refresh_access_token(&self) -> SyncResult<String> {
        // Capture the generation before acquiring the lock so we can
        // detect if a concurrent refresh already completed.
        let pre_gen = self.auth.read().await.refresh_generation;

        let _guard = self.refresh_lock.lock().await;

        {
            let auth = self.auth.read().await;
            if auth.refresh_generation > pre_gen {
                return auth.access_token.clone().ok_or(SyncError::AuthRequired);
            }
        }

        let refresh_token = {
            let auth = self.auth.read().await;
            auth.refresh_token.clone().ok_or(SyncError::AuthRequired)?
        };

        let url = format!("{}/api/auth/refresh", self.base_url);
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if resp.status() == StatusCode::UNAUTHORIZED || resp.status() == StatusCode::FORBIDDEN {
            // Refresh token expired or revoked.
            warn!("control plane rejected refresh token, clearing session");
            self.logout().await;
            return Err(SyncError::AuthFailed(
                "token refresh failed: session expired, re-authentication required".to_string(),
            ));
        }

        let resp: TokenResponse = resp
            .error_for_status()
            .map_err(|e| SyncError::AuthFailed(format!("token refresh failed: {e}")))?
            .json()
            .await?;

        let mut auth = self.auth.write().await;
        auth.access_token = Some(resp.access_token.clone());
        auth.refresh_token = Some(resp.refresh_token);
        auth.refresh_generation += 1;

        Ok(resp.access_token)
    }

    /// Makes an authenticated POST request, retrying once on 401.
    async fn auth_post(&self, path: &str, body: &impl Serialize) -> SyncResult<Response> {
        let url = format!("{}{}", self.base_url, path);
        let token = self.get_token().await?;

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(body)
            .send()
            .await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            debug!("401 on POST {path}, refreshing token");
            let new_token = self.refresh_access_token().await?;
            return Ok(self
                .client
                .post(&url)
                .bearer_auth(&new_token)
                .json(body)
                .send()
                .await?);
        }

        Ok(resp)
    }

    async fn get_token(&self) -> SyncResult<String> {
        self.auth
            .read()
            .await
            .access_token
            .clone()
            .ok_or(SyncError::AuthRequired)
    }

    // ── Credentials ──

    /// Requests short-lived S3 credentials scoped to `container`.
    pub async fn get_sts_credentials(&self, container: &str) -> SyncResult<StsCredentials> {
        let resp = self
            .auth_post(
                "/api/cloud/credentials",
                &serde_json::json!({ "container": container }),
            )
            .await?;

        match resp.status() {
            StatusCode::UNAUTHORIZED => {
                return Err(SyncError::AuthFailed(
                    "credential request rejected after token refresh".to_string(),
                ));
            }
            // Signed in, but not allowed into this container.
            StatusCode::FORBIDDEN => {
                return Err(SyncError::Api(format!(
                    "credential request for {container} forbidden"
                )));
            }
            _ => {}
        }

        let resp = resp
            .error_for_status()
            .map_err(|e| SyncError::Api(e.to_string()))?;

        Ok(resp.json().await?)
    }
}
