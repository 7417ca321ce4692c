//! Ordered timeline of entries with in-place patching.
//!
//! The store is the single source of truth for rendering. Entries keep their
//! insertion order; a patch mutates one payload in place, and replacement is
//! always remove-then-append at the tail.

use parley_core::types::{CorrelationId, EntryKind, EntryPayload, TimelineEntry};
use tracing::trace;

/// Reference to an appended entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntryRef {
    pub correlation_id: CorrelationId,
    /// Position at the time of insertion.
    pub index: usize,
}

#[derive(Debug, Default)]
pub struct TimelineStore {
    entries: Vec<TimelineEntry>,
    revision: u64,
}

impl TimelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, entry: TimelineEntry) -> EntryRef {
        let entry_ref = EntryRef {
            correlation_id: entry.correlation_id,
            index: self.entries.len(),
        };
        self.entries.push(entry);
        self.bump();
        entry_ref
    }

    /// Apply `updater` to the payload of the entry with this correlation id.
    ///
    /// Returns `false` without touching anything when the entry is gone or
    /// no longer patchable. Identity and role are never exposed to the updater.
    pub fn patch<F>(&mut self, correlation_id: &CorrelationId, updater: F) -> bool
    where
        F: FnOnce(&mut EntryPayload),
    {
        let Some(entry) = self
            .entries
            .iter_mut()
            .find(|e| e.correlation_id == *correlation_id)
        else {
            trace!(correlation_id = %correlation_id, "patch for missing entry dropped");
            return false;
        };
        if !entry.is_patchable() {
            trace!(correlation_id = %correlation_id, kind = ?entry.kind(), "patch for frozen entry dropped");
            return false;
        }
        updater(&mut entry.payload);
        self.bump();
        true
    }

    pub fn remove(&mut self, correlation_id: &CorrelationId) -> Option<TimelineEntry> {
        let index = self
            .entries
            .iter()
            .position(|e| e.correlation_id == *correlation_id)?;
        let removed = self.entries.remove(index);
        self.bump();
        Some(removed)
    }

    /// Atomically replace the whole timeline.
    pub fn replace_all(&mut self, entries: Vec<TimelineEntry>) {
        self.entries = entries;
        self.bump();
    }

    pub fn find(&self, correlation_id: &CorrelationId) -> Option<&TimelineEntry> {
        self.entries
            .iter()
            .find(|e| e.correlation_id == *correlation_id)
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    /// Owned copy for renderers.
    pub fn snapshot(&self) -> Vec<TimelineEntry> {
        self.entries.clone()
    }

    pub fn progress_ids(&self) -> Vec<CorrelationId> {
        self.entries
            .iter()
            .filter(|e| e.kind() == EntryKind::Progress)
            .map(|e| e.correlation_id)
            .collect()
    }

    pub fn running_progress_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.is_running_progress())
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Monotonic counter bumped by every mutation.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Bump the revision without touching entries. Used when state rendered
    /// next to an entry (survey drafts) changes.
    pub fn touch(&mut self) {
        self.bump();
    }

    fn bump(&mut self) {
        self.revision += 1;
    }
}
