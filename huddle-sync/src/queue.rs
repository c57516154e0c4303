//! Order-preserving buffer of uploads captured while offline.
//!
//! Entries are drained front to back. A replay that fails goes back to the
//! front with [`OfflineQueue::push_front`], so nothing is dropped or reordered.

use crate::types::QueueEntry;
use std::collections::VecDeque;

#[derive(Debug, Default)]
pub struct OfflineQueue {
    entries: VecDeque<QueueEntry>,
    pending_size: usize,
}

fn estimated_size(entry: &QueueEntry) -> usize {
    serde_json::to_vec(&entry.data).map(|v| v.len()).unwrap_or(128)
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry at the back.
    pub fn push(&mut self, entry: QueueEntry) {
        self.pending_size += estimated_size(&entry);
        self.entries.push_back(entry);
    }

    /// Appends `entry` unless the newest pending entry carries the same data.
    /// Returns whether it was added.
    pub fn push_unless_repeat(&mut self, entry: QueueEntry) -> bool {
        if self.entries.back().is_some_and(|last| last.data == entry.data) {
            return false;
        }
        self.push(entry);
        true
    }

    /// Re-inserts an entry at the head.
    pub fn push_front(&mut self, entry: QueueEntry) {
        self.pending_size += estimated_size(&entry);
        self.entries.push_front(entry);
    }

    pub fn pop_front(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front()?;
        self.pending_size = self.pending_size.saturating_sub(estimated_size(&entry));
        Some(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copies of the pending entries, oldest first.
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.pending_size = 0;
    }

    /// Estimated serialized size of all pending payloads, in bytes.
    pub fn buffer_size(&self) -> usize {
        self.pending_size
    }
}
