use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Evicted, PolicyStats, ReplacementPolicy};

struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Doubly-linked arena so bump/evict never touch the allocator: nodes are
/// slots in a `Vec`, recycled through a free list, with a hash index from
/// key to slot for O(1) lookup.
struct Inner<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K: Copy + Eq + Hash> Inner<K> {
    fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
        }
    }

    fn alloc(&mut self, key: K) -> usize {
        let node = Node {
            key,
            prev: None,
            next: None,
        };
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            slot
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = {
            let node = self.nodes[idx].as_ref().unwrap();
            (node.prev, node.next)
        };
        match prev {
            Some(p) => self.nodes[p].as_mut().unwrap().next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].as_mut().unwrap().prev = prev,
            None => self.tail = prev,
        }
    }

    fn prepend(&mut self, idx: usize) {
        self.nodes[idx].as_mut().unwrap().prev = None;
        self.nodes[idx].as_mut().unwrap().next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].as_mut().unwrap().prev = Some(idx);
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn free_slot(&mut self, idx: usize) {
        self.nodes[idx] = None;
        self.free.push(idx);
    }
}

/// Least-recently-used replacement policy. `bump` moves a key to the head
/// of the list (or inserts it there); `try_evict` removes the tail.
pub struct LruPolicy<K> {
    inner: Mutex<Inner<K>>,
    victim_searches: AtomicU64,
    evictions: AtomicU64,
    failed_evictions: AtomicU64,
}

impl<K: Copy + Eq + Hash> LruPolicy<K> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::new()),
            victim_searches: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            failed_evictions: AtomicU64::new(0),
        }
    }
}

impl<K: Copy + Eq + Hash> Default for LruPolicy<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + Send + Sync> ReplacementPolicy<K> for LruPolicy<K> {
    fn bump(&self, key: K) {
        let mut inner = self.inner.lock();
        match inner.index.get(&key).copied() {
            Some(idx) if inner.head == Some(idx) => {
                // already at the head: no-op early exit
            }
            Some(idx) => {
                inner.detach(idx);
                inner.prepend(idx);
            }
            None => {
                let idx = inner.alloc(key);
                inner.index.insert(key, idx);
                inner.prepend(idx);
            }
        }
    }

    fn try_evict(&self) -> Evicted<K> {
        self.victim_searches.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.lock();
        match inner.tail {
            None => {
                self.failed_evictions.fetch_add(1, Ordering::Relaxed);
                Evicted::Empty
            }
            Some(idx) => {
                let key = inner.nodes[idx].as_ref().unwrap().key;
                inner.detach(idx);
                inner.index.remove(&key);
                inner.free_slot(idx);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                Evicted::Victim(key)
            }
        }
    }

    fn remove(&self, key: K) -> bool {
        let mut inner = self.inner.lock();
        match inner.index.remove(&key) {
            Some(idx) => {
                inner.detach(idx);
                inner.free_slot(idx);
                true
            }
            None => false,
        }
    }

    fn stats(&self) -> PolicyStats {
        PolicyStats {
            victim_searches: self.victim_searches.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            failed_evictions: self.failed_evictions.load(Ordering::Relaxed),
            avg_search_length: 1.0,
        }
    }
}
