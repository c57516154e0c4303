//! REST file-store provider authenticated with OAuth bearer tokens.
//!
//! Wire layout under `{base_url}/folders/{folder_id}/files`:
//!
//! | call                        | purpose                          |
//! |-----------------------------|----------------------------------|
//! | `POST ?name={key}`          | create, returns `{"id": ...}`    |
//! | `PUT /{id}`                 | replace content in place         |
//! | `GET ?name={key}`           | locate, returns `{"files": [..]}`|
//! | `GET /{id}`                 | read content                     |
//!
//! The access token is refreshed ahead of expiry and once more on a 401.
//! Rate-limited responses (429) are retried with exponential backoff.

use super::{BackendAdapter, UploadReceipt};
use crate::config::{BackendConfig, EngineConfig, Provider};
use crate::error::{SyncError, SyncResult};
use crate::types::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// 429 responses are retried this many times before giving up.
const MAX_RATE_LIMIT_RETRIES: u32 = 2;
const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Typed view of the `http` backend config map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpBackendConfig {
    pub base_url: String,
    pub folder_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Token fields written back into the saved config.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SessionTokens<'a> {
    access_token: &'a str,
    refresh_token: Option<&'a str>,
    expires_at: Option<DateTime<Utc>>,
}

struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<DateTime<Utc>>,
    /// Bumped on every successful refresh.
    generation: u64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

#[derive(Deserialize)]
struct CreatedFile {
    id: String,
}

#[derive(Deserialize)]
struct FileEntry {
    id: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<FileEntry>,
}

pub struct HttpBackend {
    client: Client,
    files_url: String,
    token_url: Option<String>,
    client_id: Option<String>,
    token: RwLock<TokenState>,
    refresh_lock: Mutex<()>,
    refresh_margin_secs: i64,
    retry_backoff: Duration,
}

impl HttpBackend {
    pub fn from_config(config: HttpBackendConfig, engine: &EngineConfig) -> SyncResult<Self> {
        if config.base_url.is_empty() || config.folder_id.is_empty() {
            return Err(SyncError::Config(
                "http backend needs a base URL and a folder id".to_string(),
            ));
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            files_url: format!(
                "{}/folders/{}/files",
                config.base_url.trim_end_matches('/'),
                config.folder_id
            ),
            token_url: config.token_url,
            client_id: config.client_id,
            token: RwLock::new(TokenState {
                access_token: config.access_token,
                refresh_token: config.refresh_token,
                expires_at: config.expires_at,
                generation: 0,
            }),
            refresh_lock: Mutex::new(()),
            refresh_margin_secs: engine.credential_refresh_margin_secs,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        })
    }

    /// Overrides the base delay between rate-limit retries.
    pub fn with_retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    /// The bearer token currently in use.
    pub async fn access_token(&self) -> String {
        self.token.read().await.access_token.clone()
    }

    // ── Auth ──

    /// Returns a usable token, refreshing first when it is inside the margin.
    async fn valid_token(&self) -> SyncResult<(String, u64)> {
        let (token, generation, expires_at) = {
            let t = self.token.read().await;
            (t.access_token.clone(), t.generation, t.expires_at)
        };

        let Some(expires_at) = expires_at else {
            return Ok((token, generation));
        };

        if Utc::now() + chrono::Duration::seconds(self.refresh_margin_secs) < expires_at {
            return Ok((token, generation));
        }

        debug!("access token expires at {expires_at}, refreshing");
        self.refresh(generation).await
    }

    /// Exchanges the refresh token for a new access token.
    ///
    /// `seen_generation` is the generation the caller's token came from; if a
    /// concurrent refresh already moved past it, that result is reused.
    async fn refresh(&self, seen_generation: u64) -> SyncResult<(String, u64)> {
        let _guard = self.refresh_lock.lock().await;

        let refresh_token = {
            let t = self.token.read().await;
            if t.generation > seen_generation {
                return Ok((t.access_token.clone(), t.generation));
            }
            t.refresh_token.clone()
        };

        let (Some(token_url), Some(refresh_token)) = (&self.token_url, refresh_token) else {
            warn!("access token expired and no refresh token is configured");
            return Err(SyncError::AuthExpired);
        };

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token),
        ];
        if let Some(ref client_id) = self.client_id {
            form.push(("client_id", client_id.clone()));
        }

        let resp = self.client.post(token_url).form(&form).send().await?;
        if !resp.status().is_success() {
            warn!("token endpoint rejected refresh with {}", resp.status());
            return Err(SyncError::AuthExpired);
        }
        let resp: TokenResponse = resp.json().await?;

        let mut t = self.token.write().await;
        t.access_token = resp.access_token;
        if let Some(rotated) = resp.refresh_token {
            t.refresh_token = Some(rotated);
        }
        t.expires_at = resp
            .expires_in
            .map(|secs| Utc::now() + chrono::Duration::seconds(secs));
        t.generation += 1;

        info!("refreshed http backend access token");
        Ok((t.access_token.clone(), t.generation))
    }

    /// Sends an authenticated request built by `build`.
    ///
    /// Refreshes once on 401 and retries 429 with backoff. Any other status is
    /// returned to the caller as-is.
    async fn send<F>(&self, build: F) -> SyncResult<Response>
    where
        F: Fn(&Client) -> RequestBuilder + Send + Sync,
    {
        let (mut token, mut generation) = self.valid_token().await?;
        let mut refreshed = false;
        let mut attempt = 0;

        loop {
            let resp = build(&self.client).bearer_auth(&token).send().await?;

            match resp.status() {
                StatusCode::UNAUTHORIZED if !refreshed => {
                    debug!("401 from file store, refreshing token");
                    refreshed = true;
                    (token, generation) = self.refresh(generation).await?;
                }
                StatusCode::UNAUTHORIZED => return Err(SyncError::AuthExpired),
                StatusCode::TOO_MANY_REQUESTS if attempt < MAX_RATE_LIMIT_RETRIES => {
                    let delay = self.retry_backoff * 2u32.pow(attempt);
                    warn!("rate limited, retrying in {}ms", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                _ => return Ok(resp),
            }
        }
    }

    // ── Files ──

    async fn find(&self, name: &str) -> SyncResult<Option<String>> {
        let resp = self
            .send(|c| c.get(&self.files_url).query(&[("name", name)]))
            .await?;
        let resp = ensure_success(resp, "listing files").await?;
        let list: FileList = resp.json().await?;

        Ok(list
            .files
            .into_iter()
            .find(|f| f.name.as_deref().is_none_or(|n| n == name))
            .map(|f| f.id))
    }

    async fn create(&self, name: &str, payload: &Snapshot) -> SyncResult<String> {
        let resp = self
            .send(|c| {
                c.post(&self.files_url)
                    .query(&[("name", name)])
                    .json(payload)
            })
            .await?;
        let resp = ensure_success(resp, "creating file").await?;
        let created: CreatedFile = resp.json().await?;
        debug!("created remote file {} for {name}", created.id);
        Ok(created.id)
    }

    /// Replaces file `id`. Returns false if it no longer exists.
    async fn update(&self, id: &str, payload: &Snapshot) -> SyncResult<bool> {
        let url = format!("{}/{id}", self.files_url);
        let resp = self.send(|c| c.put(&url).json(payload)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        ensure_success(resp, "updating file").await?;
        Ok(true)
    }

    async fn read(&self, id: &str) -> SyncResult<Option<Snapshot>> {
        let url = format!("{}/{id}", self.files_url);
        let resp = self.send(|c| c.get(&url)).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = ensure_success(resp, "reading file").await?;
        Ok(Some(resp.json().await?))
    }
}

/// Maps a failed file-store response to [`SyncError::Backend`].
///
/// A 429 that outlived its retries stays a transport error so callers can
/// still recognise rate limiting.
async fn ensure_success(resp: Response, action: &str) -> SyncResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Ok(resp.error_for_status()?);
    }

    let body = resp.text().await.unwrap_or_default();
    let detail: String = body.chars().take(200).collect();
    Err(SyncError::Backend(format!(
        "{action} failed with {status}: {}",
        detail.trim()
    )))
}

#[async_trait]
impl BackendAdapter for HttpBackend {
    fn provider(&self) -> Provider {
        Provider::Http
    }

    async fn upload(
        &self,
        key: &str,
        payload: &Snapshot,
        remote_ref: Option<&str>,
    ) -> SyncResult<UploadReceipt> {
        if let Some(id) = remote_ref {
            if self.update(id, payload).await? {
                return Ok(UploadReceipt {
                    remote_ref: Some(id.to_string()),
                });
            }
            debug!("remote ref {id} is stale, looking up {key} by name");
        }

        if let Some(id) = self.find(key).await? {
            if self.update(&id, payload).await? {
                return Ok(UploadReceipt {
                    remote_ref: Some(id),
                });
            }
        }

        let id = self.create(key, payload).await?;
        Ok(UploadReceipt {
            remote_ref: Some(id),
        })
    }

    async fn credentials(&self) -> Option<BackendConfig> {
        let t = self.token.read().await;
        let tokens = SessionTokens {
            access_token: &t.access_token,
            refresh_token: t.refresh_token.as_deref(),
            expires_at: t.expires_at,
        };
        match serde_json::to_value(tokens) {
            Ok(Value::Object(map)) => Some(map),
            _ => None,
        }
    }

    async fn download(&self, key: &str, remote_ref: Option<&str>) -> SyncResult<Option<Snapshot>> {
        if let Some(id) = remote_ref {
            if let Some(snapshot) = self.read(id).await? {
                return Ok(Some(snapshot));
            }
            debug!("remote ref {id} is stale, looking up {key} by name");
        }

        match self.find(key).await? {
            Some(id) => self.read(&id).await,
            None => Ok(None),
        }
    }
}
