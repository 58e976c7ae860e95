use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Evicted, PolicyStats, ReplacementPolicy};

struct Node<K> {
    key: K,
    ref_bit: bool,
    prev: usize,
    next: usize,
}

/// Ring represented as an arena with explicit prev/next slots rather than a
/// literal singly-linked list: removal of an arbitrary node (including the
/// hand's current target) is then O(1) instead of requiring a predecessor
/// scan, while the observable sweep order and tie-break are unchanged.
struct Inner<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    hand: Option<usize>,
}

impl<K: Copy + Eq + Hash> Inner<K> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            hand: None,
        }
    }

    fn alloc(&mut self, node: Node<K>) -> usize {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn node(&self, idx: usize) -> &Node<K> {
        self.nodes[idx].as_ref().unwrap()
    }

    fn node_mut(&mut self, idx: usize) -> &mut Node<K> {
        self.nodes[idx].as_mut().unwrap()
    }

    /// Splice `idx` out of the ring, returning the node after it (or `idx`
    /// itself if it was the ring's only member).
    fn unlink(&mut self, idx: usize) -> Option<usize> {
        let (prev, next) = {
            let n = self.node(idx);
            (n.prev, n.next)
        };
        if prev == idx {
            // sole member
            self.hand = None;
            return None;
        }
        self.node_mut(prev).next = next;
        self.node_mut(next).prev = prev;
        if self.hand == Some(idx) {
            self.hand = Some(next);
        }
        Some(next)
    }

    fn free_slot(&mut self, idx: usize) {
        self.nodes[idx] = None;
        self.free.push(idx);
    }
}

/// CLOCK (second-chance) replacement policy: a circular ring of keys each
/// carrying a reference bit, swept by a hand. `bump` sets the bit (or
/// inserts a fresh node, referenced, immediately after the hand so it is
/// examined last in the current sweep); `try_evict` clears bits as it
/// passes them and removes the first node it finds already clear.
pub struct ClockPolicy<K> {
    inner: Mutex<Inner<K>>,
    victim_searches: AtomicU64,
    evictions: AtomicU64,
    failed_evictions: AtomicU64,
    total_search_length: AtomicU64,
}

impl<K: Copy + Eq + Hash> ClockPolicy<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            victim_searches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            failed_evictions: AtomicU64::new(0),
            total_search_length: AtomicU64::new(0),
        }
    }
}

impl<K: Copy + Eq + Hash> Default for ClockPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + Send + Sync> ReplacementPolicy<K> for ClockPolicy<K> {
    fn bump(&self, key: K) {
        let mut inner = self.inner.lock();
        if let Some(&idx) = inner.index.get(&key) {
            inner.node_mut(idx).ref_bit = true;
            return;
        }
        let idx = match inner.hand {
            None => {
                let idx = inner.alloc(Node {
                    key,
                    ref_bit: true,
                    prev: 0,
                    next: 0,
                });
                inner.node_mut(idx).prev = idx;
                inner.node_mut(idx).next = idx;
                inner.hand = Some(idx);
                idx
            }
            Some(h) => {
                let h_next = inner.node(h).next;
                let idx = inner.alloc(Node {
                    key,
                    ref_bit: true,
                    prev: h,
                    next: h_next,
                });
                inner.node_mut(h).next = idx;
                inner.node_mut(h_next).prev = idx;
                idx
            }
        };
        inner.index.insert(key, idx);
    }

    fn try_evict(&self) -> Evicted<K> {
        self.victim_searches.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        let mut steps: u64 = 0;
        loop {
            let h = match inner.hand {
                None => {
                    self.failed_evictions.fetch_add(1, Ordering::Relaxed);
                    return Evicted::Empty;
                }
                Some(h) => h,
            };
            steps += 1;
            if inner.node(h).ref_bit {
                inner.node_mut(h).ref_bit = false;
                inner.hand = Some(inner.node(h).next);
                continue;
            }
            let key = inner.node(h).key;
            inner.unlink(h);
            inner.index.remove(&key);
            inner.free_slot(h);
            self.evictions.fetch_add(1, Ordering::Relaxed);
            self.total_search_length.fetch_add(steps, Ordering::Relaxed);
            return Evicted::Victim(key);
        }
    }

    fn remove(&self, key: K) -> bool {
        let mut inner = self.inner.lock();
        match inner.index.remove(&key) {
            Some(idx) => {
                inner.unlink(idx);
                inner.free_slot(idx);
                true
            }
            None => false,
        }
    }

    fn stats(&self) -> PolicyStats {
        let evictions = self.evictions.load(Ordering::Relaxed);
        let total_search_length = self.total_search_length.load(Ordering::Relaxed);
        PolicyStats {
            victim_searches: self.victim_searches.load(Ordering::Relaxed),
            evictions,
            failed_evictions: self.failed_evictions.load(Ordering::Relaxed),
            avg_search_length: if evictions > 0 {
                total_search_length as f64 / evictions as f64
            } else {
                0.0
            },
        }
    }
}
