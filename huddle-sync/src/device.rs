//! Stable per-installation device identity.
//!
//! The id is generated once (UUID v4) and persisted; every later call returns
//! the stored value. The human-readable name is derived from a platform or
//! user-agent string and never fails: unknown input maps to "Unknown Device".

use crate::error::SyncResult;
use crate::local::{keys, LocalState};
use crate::types::DeviceRecord;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

pub const MOBILE_DEVICE: &str = "Mobile Device";
pub const WINDOWS_PC: &str = "Windows PC";
pub const MAC: &str = "Mac";
pub const LINUX_PC: &str = "Linux PC";
pub const UNKNOWN_DEVICE: &str = "Unknown Device";

/// Returns the persisted device id, generating and storing one if absent.
pub async fn ensure_id(state: &LocalState) -> SyncResult<String> {
    if let Some(id) = state.get::<String>(keys::DEVICE_ID).await? {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    state.put(keys::DEVICE_ID, id.clone()).await?;
    info!("generated device id {id}");
    Ok(id)
}

/// Maps a platform / user-agent string to a fixed device label.
///
/// Mobile markers are checked first: Android user agents also contain "Linux"
/// and iPad ones contain "Mac OS X".
pub fn device_name(platform: &str) -> &'static str {
    let p = platform.to_ascii_lowercase();
    if ["mobile", "android", "iphone", "ipad", "ipod", "ios"]
        .iter()
        .any(|m| p.contains(m))
    {
        MOBILE_DEVICE
    } else if p.contains("windows") || p.contains("win32") || p.contains("win64") {
        WINDOWS_PC
    } else if p.contains("mac") || p.contains("darwin") {
        MAC
    } else if p.contains("linux") || p.contains("x11") {
        LINUX_PC
    } else {
        UNKNOWN_DEVICE
    }
}

/// Platform string for the running binary, for hosts without a user agent.
pub fn platform_descriptor() -> String {
    format!("{}; {}", std::env::consts::OS, std::env::consts::ARCH)
}

/// Persisted device record plus the store it lives in.
#[derive(Clone)]
pub struct DeviceIdentity {
    state: LocalState,
    record: DeviceRecord,
}

impl DeviceIdentity {
    /// Loads the device record, creating it on first launch.
    ///
    /// The name is re-derived from `platform` on every load so an install
    /// migrated between machines reports where it runs now.
    pub async fn load_or_create(state: LocalState, platform: &str) -> SyncResult<Self> {
        let id = ensure_id(&state).await?;
        let name = device_name(platform).to_string();

        let record = match state.get::<DeviceRecord>(keys::DEVICE).await? {
            Some(existing) if existing.id == id && existing.name == name => existing,
            _ => {
                let record = DeviceRecord {
                    id,
                    name,
                    last_seen: Utc::now(),
                };
                state.put(keys::DEVICE, record.clone()).await?;
                record
            }
        };

        Ok(Self { state, record })
    }

    pub fn record(&self) -> &DeviceRecord {
        &self.record
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Marks the device as seen now and persists the record.
    pub async fn touch(&mut self) -> SyncResult<()> {
        self.record.last_seen = Utc::now();
        self.state.put(keys::DEVICE, self.record.clone()).await
    }
}
