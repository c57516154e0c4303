//! Content fingerprinting for snapshots.
//!
//! The checksum is a 32-bit polynomial rolling hash (`h = h * 31 + byte`,
//! wrapping as signed 32-bit) over the canonical JSON of the data, rendered
//! in base 36. It is a cheap "did anything change" signal shared by every
//! device; it is not collision resistant and must not be used for security.
//! Changing the algorithm breaks compatibility with snapshots already in
//! remote storage.

use crate::error::SyncResult;
use crate::types::{SnapshotData, SyncRecord};
use serde::Serialize;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Returns a copy of `data` with every collection sorted by record id.
///
/// Records sharing an id are ordered by their serialized form, so the result
/// never depends on input order.
pub fn canonicalize(data: &SnapshotData) -> SnapshotData {
    let mut canonical = data.clone();
    sort_by_id(&mut canonical.meetings);
    sort_by_id(&mut canonical.stakeholders);
    sort_by_id(&mut canonical.stakeholder_categories);
    canonical
}

fn sort_by_id<T: SyncRecord + Serialize>(records: &mut [T]) {
    records.sort_by_cached_key(|r| {
        (
            r.record_id().to_string(),
            serde_json::to_string(r).unwrap_or_default(),
        )
    });
}

/// Deterministic, order-independent fingerprint of `data`.
pub fn checksum(data: &SnapshotData) -> SyncResult<String> {
    let bytes = serde_json::to_vec(&canonicalize(data))?;
    Ok(to_base36(rolling_hash(&bytes)))
}

/// Version tag for `data`. Identical to [`checksum`]; kept as a separate name
/// because metadata consumers use the two interchangeably.
pub fn version(data: &SnapshotData) -> SyncResult<String> {
    checksum(data)
}

/// 32-bit polynomial rolling hash with signed wrap-around.
pub fn rolling_hash(bytes: &[u8]) -> i32 {
    bytes
        .iter()
        .fold(0i32, |h, &b| h.wrapping_mul(31).wrapping_add(i32::from(b)))
}

/// Renders a signed integer in base 36 with a leading `-` for negatives.
pub fn to_base36(value: i32) -> String {
    let mut n = i64::from(value).unsigned_abs();
    if n == 0 {
        return "0".to_string();
    }

    let mut digits = Vec::new();
    while n > 0 {
        digits.push(BASE36_DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    if value < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}
