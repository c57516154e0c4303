//! Conflict detection between a local and a downloaded snapshot.
//!
//! A genuine conflict needs both different devices and different content,
//! outside the clock-skew tolerance window. Successive syncs by one device
//! and benign re-uploads of unchanged data never count.

use crate::error::SyncResult;
use crate::types::{Conflict, Snapshot};
use crate::versioning::checksum;
use std::time::Duration;
use tracing::debug;

/// Default clock-skew / rapid-resync tolerance.
pub const DEFAULT_TOLERANCE: Duration = Duration::from_secs(10);

/// Decides whether two snapshots diverged.
#[derive(Debug, Clone, Copy)]
pub struct ConflictDetector {
    tolerance: Duration,
}

impl ConflictDetector {
    pub fn new(tolerance: Duration) -> Self {
        Self { tolerance }
    }

    pub fn tolerance(&self) -> Duration {
        self.tolerance
    }

    /// Returns `Some(Conflict)` only if the snapshots are further apart than
    /// the tolerance, come from different devices, and hash differently.
    pub fn detect(&self, local: &Snapshot, remote: &Snapshot) -> SyncResult<Option<Conflict>> {
        let delta_ms = (remote.metadata.timestamp - local.metadata.timestamp).num_milliseconds();
        let tolerance_ms = i64::try_from(self.tolerance.as_millis()).unwrap_or(i64::MAX);

        if delta_ms.abs() < tolerance_ms {
            debug!("snapshots {delta_ms}ms apart, inside tolerance");
            return Ok(None);
        }

        if local.metadata.device_id == remote.metadata.device_id {
            debug!("remote snapshot is our own upload");
            return Ok(None);
        }

        if checksum(&local.data)? == checksum(&remote.data)? {
            debug!("snapshots differ in time only, content identical");
            return Ok(None);
        }

        Ok(Some(Conflict {
            local_timestamp: local.metadata.timestamp,
            remote_timestamp: remote.metadata.timestamp,
            local_device: local.metadata.device_name.clone(),
            remote_device: remote.metadata.device_name.clone(),
            delta_ms,
        }))
    }
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DEFAULT_TOLERANCE)
    }
}
