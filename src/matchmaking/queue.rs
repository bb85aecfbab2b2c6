//! Preference queue for waiting searchers
//!
//! This module contains the in-memory queue of participants waiting for an
//! opponent, with timestamp-based eviction and exact-preference matching.

use crate::types::{MatchPreference, Participant, QueueEntry};
use crate::utils::current_timestamp;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// Default age after which a waiting entry is evicted.
///
/// Matches the client's own give-up horizon: if the client abandoned its
/// search before the queue forgot it, a stale entry could still be matched.
pub const DEFAULT_ENTRY_TTL_SECONDS: i64 = 30;

/// In-memory FIFO queue of waiting searchers.
///
/// The queue itself is a plain owned structure with no interior locking.
/// All operations must run under the owner's single mutual-exclusion domain:
/// `find_match` plus removal of both matched parties has to be atomic, or two
/// concurrent searches can each match the same third party.
#[derive(Debug)]
pub struct PreferenceQueue {
    entries: VecDeque<QueueEntry>,
    entry_ttl: Duration,
}

impl PreferenceQueue {
    pub fn new() -> Self {
        Self::with_ttl(Duration::seconds(DEFAULT_ENTRY_TTL_SECONDS))
    }

    pub fn with_ttl(entry_ttl: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            entry_ttl,
        }
    }

    /// Insert a new entry, or refresh the timestamp of an existing one.
    ///
    /// At most one live entry per participant id: a repeated search refreshes
    /// `enqueued_at` in place and updates the stored preference rather than
    /// duplicating the entry.
    pub fn enqueue(&mut self, participant: Participant, preference: MatchPreference) -> QueueEntry {
        let now = current_timestamp();

        if let Some(existing) = self
            .entries
            .iter_mut()
            .find(|e| e.participant.id == participant.id)
        {
            existing.enqueued_at = now;
            existing.preference = preference;
            return existing.clone();
        }

        let entry = QueueEntry {
            participant,
            preference,
            enqueued_at: now,
        };
        self.entries.push_back(entry.clone());
        entry
    }

    /// Remove all entries older than the TTL, oldest-first.
    ///
    /// Idempotent: running it twice with the same `now` yields the same queue.
    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.entry_ttl;
        let before = self.entries.len();
        self.entries.retain(|e| now - e.enqueued_at <= ttl);
        before - self.entries.len()
    }

    /// First entry (excluding the caller) whose preference equals the
    /// caller's exactly. First-fit by insertion order; no secondary ranking.
    pub fn find_match(
        &self,
        caller_id: &str,
        preference: &MatchPreference,
    ) -> Option<QueueEntry> {
        self.entries
            .iter()
            .find(|e| e.participant.id != caller_id && e.preference == *preference)
            .cloned()
    }

    /// Remove a participant's entry. Idempotent.
    pub fn remove(&mut self, participant_id: &str) -> Option<QueueEntry> {
        let mut removed = None;
        self.entries.retain(|e| {
            if e.participant.id == participant_id {
                removed = Some(e.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn contains(&self, participant_id: &str) -> bool {
        self.entries.iter().any(|e| e.participant.id == participant_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for PreferenceQueue {
    fn default() -> Self {
        Self::new()
    }
}
