// Replacement policies decide eviction order over a key space (page-ids in
// this crate). Both implementations are pure in-memory structures: no I/O,
// one policy-wide exclusive lock per operation, O(1) amortized per call.

mod clock;
mod lru;

pub use clock::ClockPolicy;
pub use lru::LruPolicy;

use std::hash::Hash;

/// Result of a victim search: either a key chosen for eviction, or nothing
/// if the policy holds no entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evicted<K> {
    Victim(K),
    Empty,
}

impl<K> Evicted<K> {
    pub fn into_option(self) -> Option<K> {
        match self {
            Evicted::Victim(k) => Some(k),
            Evicted::Empty => None,
        }
    }
}

/// Point-in-time counters for a replacement policy, exposed purely for
/// diagnostics; nothing in the buffer manager depends on these values.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolicyStats {
    pub victim_searches: u64,
    pub evictions: u64,
    pub failed_evictions: u64,
    pub avg_search_length: f64,
}

/// Eviction-order contract shared by LRU and CLOCK.
///
/// All three operations take a single internal exclusive lock and never
/// block on I/O; callers must not hold this lock across a store or latch
/// acquisition.
pub trait ReplacementPolicy<K>: Send + Sync
where
    K: Copy + Eq + Hash,
{
    /// Promote `key` to the most-recently-used position, inserting it if
    /// absent. Idempotent: repeated calls with the same key never produce
    /// duplicate entries.
    fn bump(&self, key: K);

    /// Choose and remove a victim. Returns `Evicted::Empty` without
    /// mutating anything if the policy holds no entries.
    fn try_evict(&self) -> Evicted<K>;

    /// Remove a specific key if present. Returns `false` without mutating
    /// order if the key is absent.
    fn remove(&self, key: K) -> bool;

    /// Snapshot of this policy's counters.
    fn stats(&self) -> PolicyStats;
}
