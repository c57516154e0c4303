//! Shared types for sync operations.
//!
//! Records are deliberately thin: each carries a stable `id`, the timestamps
//! the merge engine compares, and every other field verbatim in `fields`.
//! Nothing the sync engine does not understand is ever dropped.
//!
//! Record parsing is lenient. Numeric ids are read as their decimal string,
//! and a timestamp that is neither RFC 3339 nor epoch milliseconds is left
//! untouched in `fields` and treated as absent for merging.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Behaviour the merge engine and checksum canonicalization need from a record.
pub trait SyncRecord {
    /// Stable identifier shared by every copy of the record.
    fn record_id(&self) -> &str;

    /// Timestamp used to pick a winner when both sides hold the record.
    fn compared_at(&self) -> Option<DateTime<Utc>>;
}

/// A recorded meeting.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Meeting {
    pub id: String,
    #[serde(
        serialize_with = "lenient::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "lenient::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_saved: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Meeting {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            last_saved: None,
            fields: Map::new(),
        }
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.fields.remove("createdAt");
        self.created_at = Some(at);
        self
    }

    pub fn with_last_saved(mut self, at: DateTime<Utc>) -> Self {
        self.fields.remove("lastSaved");
        self.last_saved = Some(at);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl<'de> Deserialize<'de> for Meeting {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            id: lenient::take_id::<D::Error>(&mut fields)?,
            created_at: lenient::take(&mut fields, "createdAt"),
            last_saved: lenient::take(&mut fields, "lastSaved"),
            fields,
        })
    }
}

impl SyncRecord for Meeting {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn compared_at(&self) -> Option<DateTime<Utc>> {
        self.last_saved.or(self.created_at)
    }
}

/// A person tracked across meetings.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Stakeholder {
    pub id: String,
    #[serde(
        serialize_with = "lenient::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(
        serialize_with = "lenient::serialize",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Stakeholder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            created_at: None,
            updated_at: None,
            fields: Map::new(),
        }
    }

    pub fn with_created_at(mut self, at: DateTime<Utc>) -> Self {
        self.fields.remove("createdAt");
        self.created_at = Some(at);
        self
    }

    pub fn with_updated_at(mut self, at: DateTime<Utc>) -> Self {
        self.fields.remove("updatedAt");
        self.updated_at = Some(at);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl<'de> Deserialize<'de> for Stakeholder {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            id: lenient::take_id::<D::Error>(&mut fields)?,
            created_at: lenient::take(&mut fields, "createdAt"),
            updated_at: lenient::take(&mut fields, "updatedAt"),
            fields,
        })
    }
}

impl SyncRecord for Stakeholder {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn compared_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at.or(self.created_at)
    }
}

/// A stakeholder grouping. Treated as global taxonomy, not merged per record.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StakeholderCategory {
    pub id: String,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl StakeholderCategory {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

impl<'de> Deserialize<'de> for StakeholderCategory {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let mut fields = Map::<String, Value>::deserialize(deserializer)?;
        Ok(Self {
            id: lenient::take_id::<D::Error>(&mut fields)?,
            fields,
        })
    }
}

impl SyncRecord for StakeholderCategory {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn compared_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// The synced collections of one device.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotData {
    #[serde(default)]
    pub meetings: Vec<Meeting>,
    #[serde(default)]
    pub stakeholders: Vec<Stakeholder>,
    #[serde(default)]
    pub stakeholder_categories: Vec<StakeholderCategory>,
}

impl SnapshotData {
    /// True if there is at least one meeting or stakeholder.
    ///
    /// Categories alone do not count: a device with only the default taxonomy
    /// has no user data worth protecting.
    pub fn has_records(&self) -> bool {
        !self.meetings.is_empty() || !self.stakeholders.is_empty()
    }
}

/// Provenance and fingerprint attached to every uploaded snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub device_id: String,
    pub device_name: String,
    pub timestamp: DateTime<Utc>,
    pub checksum: String,
}

/// The unit exchanged with a backend.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub data: SnapshotData,
    pub metadata: SnapshotMetadata,
}

impl Snapshot {
    /// Builds a snapshot of `data` stamped with `device` and `timestamp`.
    pub fn build(
        data: SnapshotData,
        device: &DeviceRecord,
        timestamp: DateTime<Utc>,
    ) -> crate::SyncResult<Self> {
        let checksum = crate::versioning::checksum(&data)?;
        Ok(Self {
            data,
            metadata: SnapshotMetadata {
                device_id: device.id.clone(),
                device_name: device.name.clone(),
                timestamp,
                checksum,
            },
        })
    }

    /// Recomputes the checksum of `data` and compares it with the stated one.
    pub fn verify_integrity(&self) -> crate::SyncResult<()> {
        let actual = crate::versioning::checksum(&self.data)?;
        if actual != self.metadata.checksum {
            return Err(crate::SyncError::Integrity {
                expected: self.metadata.checksum.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Identity of this installation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub name: String,
    pub last_seen: DateTime<Utc>,
}

/// Coarse sync state reported to the UI.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
    Conflict,
    Offline,
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Success => "success",
            SyncStatus::Error => "error",
            SyncStatus::Conflict => "conflict",
            SyncStatus::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Operation kinds held in the offline queue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueAction {
    Upload,
}

/// A write captured while offline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub action: QueueAction,
    pub data: SnapshotData,
    pub enqueued_at: DateTime<Utc>,
}

impl QueueEntry {
    pub fn upload(data: SnapshotData) -> Self {
        Self {
            action: QueueAction::Upload,
            data,
            enqueued_at: Utc::now(),
        }
    }
}

/// Two snapshots from different devices with diverging content.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub local_timestamp: DateTime<Utc>,
    pub remote_timestamp: DateTime<Utc>,
    pub local_device: String,
    pub remote_device: String,
    pub delta_ms: i64,
}

/// Record id and timestamp extraction. Timestamps are read as RFC 3339 strings
/// or epoch milliseconds and always written as RFC 3339.
mod lenient {
    use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Serializer};
    use serde_json::{Map, Value};
    use tracing::debug;

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(dt) => serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn take_id<E: de::Error>(fields: &mut Map<String, Value>) -> Result<String, E> {
        match fields.remove("id") {
            Some(Value::String(id)) => Ok(id),
            Some(Value::Number(n)) => Ok(n.to_string()),
            Some(other) => Err(E::custom(format!("invalid record id {other}"))),
            None => Err(E::missing_field("id")),
        }
    }

    /// Removes and returns `key` when it holds a usable timestamp or null.
    /// Anything else stays in `fields` and reads as no timestamp.
    pub fn take(fields: &mut Map<String, Value>, key: &str) -> Option<DateTime<Utc>> {
        let parsed = match fields.get(key)? {
            Value::Null => None,
            Value::String(s) => match DateTime::parse_from_rfc3339(s) {
                Ok(dt) => Some(dt.with_timezone(&Utc)),
                Err(_) => return unparsed(key),
            },
            Value::Number(n) => match n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
            {
                Some(dt) => Some(dt),
                None => return unparsed(key),
            },
            _ => return unparsed(key),
        };
        fields.remove(key);
        parsed
    }

    fn unparsed(key: &str) -> Option<DateTime<Utc>> {
        debug!(field = key, "keeping unparseable timestamp verbatim");
        None
    }
}
