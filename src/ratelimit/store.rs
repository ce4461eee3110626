//! Window store: per-key counter records.

use dashmap::DashMap;

use super::key::RateLimitKey;

/// A counter for one key within its current fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowRecord {
    /// Requests admitted in the current window
    count: u64,
    /// When the current window started, ms since epoch
    window_start: u64,
    /// Window length of the rule this record belongs to
    window_ms: u64,
}

impl WindowRecord {
    /// Start a fresh, empty window at `now`.
    pub fn new(now: u64, window_ms: u64) -> Self {
        Self {
            count: 0,
            window_start: now,
            window_ms,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn window_start(&self) -> u64 {
        self.window_start
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// When the current window closes.
    pub fn reset_at(&self) -> u64 {
        self.window_start.saturating_add(self.window_ms)
    }

    /// The window started after `now`, which only happens if the clock moved
    /// backwards.
    pub fn is_future(&self, now: u64) -> bool {
        self.window_start > now
    }

    /// The window has fully elapsed. The boundary instant belongs to the next
    /// window.
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.window_start) >= self.window_ms
    }

    /// Whether this record may be used for a decision at `now` as-is.
    pub fn is_live(&self, now: u64) -> bool {
        !self.is_future(now) && !self.is_expired(now)
    }

    /// Whether a sweep at `now` may drop this record.
    pub fn is_evictable(&self, now: u64, grace_multiple: u64) -> bool {
        self.is_future(now)
            || now.saturating_sub(self.window_start)
                >= self.window_ms.saturating_mul(grace_multiple.max(1))
    }

    pub(crate) fn reset(&mut self, now: u64) {
        self.count = 0;
        self.window_start = now;
    }

    pub(crate) fn admit(&mut self) {
        self.count = self.count.saturating_add(1);
    }
}

/// Map from key to its live window record.
///
/// Each key maps to at most one record. Mutation is confined to the crate's
/// limiter; everything public here is read-only.
#[derive(Debug, Default)]
pub struct WindowStore {
    records: DashMap<RateLimitKey, WindowRecord>,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the record for `key`, creating an empty window at
    /// `now` if the key is new.
    ///
    /// The shard holding `key` stays locked for the duration of `f`, so
    /// read-compare-update inside `f` is atomic with respect to other checks
    /// on the same key.
    pub(crate) fn with_record<R>(
        &self,
        key: RateLimitKey,
        now: u64,
        window_ms: u64,
        f: impl FnOnce(&mut WindowRecord) -> R,
    ) -> R {
        let mut entry = self
            .records
            .entry(key)
            .or_insert_with(|| WindowRecord::new(now, window_ms));
        f(entry.value_mut())
    }

    /// Remove up to `budget` evictable records, returning how many went.
    ///
    /// Candidates are collected first and each removal re-checks the record,
    /// so a key refreshed between collection and removal survives.
    pub(crate) fn evict(&self, now: u64, grace_multiple: u64, budget: usize) -> usize {
        let candidates: Vec<RateLimitKey> = self
            .records
            .iter()
            .filter(|entry| entry.value().is_evictable(now, grace_multiple))
            .take(budget.max(1))
            .map(|entry| entry.key().clone())
            .collect();

        candidates
            .into_iter()
            .filter(|key| {
                self.records
                    .remove_if(key, |_, record| record.is_evictable(now, grace_multiple))
                    .is_some()
            })
            .count()
    }

    /// A copy of the record for `key`, if one exists.
    pub fn get(&self, key: &RateLimitKey) -> Option<WindowRecord> {
        self.records.get(key).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Drop every record.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.records.clear();
    }
}
