//! Record-level merge of two snapshots.
//!
//! For meetings and stakeholders the result holds the union of ids from both
//! sides. When both sides hold an id, the record with the strictly newer
//! comparison timestamp wins; ties (including two missing timestamps) keep the
//! local record. A missing timestamp is older than any present one.
//!
//! Output order is stable: local records in local order (winners replace in
//! place), followed by remote-only records in remote order. Re-merging the
//! result with the same remote is therefore a no-op.
//!
//! Stakeholder categories are not merged: the local list passes through.

use crate::types::{SnapshotData, SyncRecord};
use std::collections::{HashMap, HashSet};

/// Merges `remote` into `local` without dropping any record id.
pub fn merge(local: &SnapshotData, remote: &SnapshotData) -> SnapshotData {
    SnapshotData {
        meetings: merge_records(&local.meetings, &remote.meetings),
        stakeholders: merge_records(&local.stakeholders, &remote.stakeholders),
        stakeholder_categories: local.stakeholder_categories.clone(),
    }
}

/// Union-by-id merge of one collection.
pub fn merge_records<T: SyncRecord + Clone>(local: &[T], remote: &[T]) -> Vec<T> {
    let local = dedupe(local);
    let remote = dedupe(remote);

    let remote_index: HashMap<&str, usize> = remote
        .iter()
        .enumerate()
        .map(|(i, r)| (r.record_id(), i))
        .collect();

    let mut merged = Vec::with_capacity(local.len() + remote.len());
    for record in &local {
        let winner = match remote_index.get(record.record_id()) {
            Some(&i) if is_newer(&remote[i], record) => &remote[i],
            _ => record,
        };
        merged.push(winner.clone());
    }

    let local_ids: HashSet<&str> = local.iter().map(|r| r.record_id()).collect();
    merged.extend(
        remote
            .iter()
            .filter(|r| !local_ids.contains(r.record_id()))
            .cloned(),
    );
    merged
}

/// True if `candidate` is strictly newer than `current`.
fn is_newer<T: SyncRecord>(candidate: &T, current: &T) -> bool {
    match (candidate.compared_at(), current.compared_at()) {
        (Some(c), Some(cur)) => c > cur,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Collapses duplicate ids to their newest record, keeping first-seen order.
fn dedupe<T: SyncRecord + Clone>(records: &[T]) -> Vec<T> {
    let mut position: HashMap<&str, usize> = HashMap::new();
    let mut out: Vec<T> = Vec::with_capacity(records.len());
    for record in records {
        match position.get(record.record_id()) {
            Some(&i) => {
                if is_newer(record, &out[i]) {
                    out[i] = record.clone();
                }
            }
            None => {
                position.insert(record.record_id(), out.len());
                out.push(record.clone());
            }
        }
    }
    out
}
