//! Bounded, time-pruned changelog of one model.

use crate::types::{ChangeEntry, EntityKey, Sequence, Timestamp};
use std::collections::VecDeque;

/// Seq-ordered log of changes, oldest first.
///
/// Pruning only ever removes a contiguous prefix, so the log always covers
/// `oldest_seq()..=newest_seq()` without gaps.
#[derive(Debug, Default)]
pub struct Changelog {
    entries: VecDeque<ChangeEntry>,
}

impl Changelog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Callers hand in strictly increasing sequences.
    pub fn append(&mut self, entry: ChangeEntry) {
        debug_assert!(self
            .entries
            .back()
            .map_or(true, |last| last.seq() < entry.seq()));
        self.entries.push_back(entry);
    }

    /// Drop entries stamped before `cutoff`, then trim to `capacity`.
    /// Returns the number of entries removed.
    pub fn prune(&mut self, cutoff: Timestamp, capacity: usize) -> usize {
        let before = self.entries.len();

        while let Some(front) = self.entries.front() {
            if front.version().timestamp >= cutoff {
                break;
            }
            self.entries.pop_front();
        }

        while self.entries.len() > capacity {
            self.entries.pop_front();
        }

        before - self.entries.len()
    }

    pub fn oldest_seq(&self) -> Option<Sequence> {
        self.entries.front().map(ChangeEntry::seq)
    }

    pub fn newest_seq(&self) -> Option<Sequence> {
        self.entries.back().map(ChangeEntry::seq)
    }

    /// Whether a client holding everything up to `last_seq` can be caught up
    /// from this log alone.
    ///
    /// A `last_seq` past the newest entry was never issued by this log and
    /// is not covered.
    pub fn covers(&self, last_seq: Sequence) -> bool {
        match (self.oldest_seq(), self.newest_seq()) {
            (Some(oldest), Some(newest)) => {
                oldest.0 <= last_seq.0.saturating_add(1) && last_seq <= newest
            }
            _ => false,
        }
    }

    /// Entries after `last_seq` that pertain to `key`.
    pub fn since_for_key(
        &self,
        last_seq: Sequence,
        key: &EntityKey,
        primary_key: &str,
    ) -> Vec<ChangeEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.seq() > last_seq)
            .filter(|entry| entry.key(primary_key).as_ref() == Some(key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChangeEntry> {
        self.entries.iter()
    }
}
