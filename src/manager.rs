use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam::queue::SegQueue;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::config::BufferPoolConfig;
use crate::error::{BufferPoolError, Result};
use crate::frame::Frame;
use crate::latch::LatchKind;
use crate::policy::{ClockPolicy, Evicted, LruPolicy, PolicyStats, ReplacementPolicy};
use crate::rental::RentalPool;
use crate::store::BackingStore;
use crate::PageId;

/// Selects which concrete replacement policy backs a buffer pool.
pub enum Policy {
    Lru,
    Clock,
}

impl Policy {
    fn build(self) -> Arc<dyn ReplacementPolicy<PageId>> {
        match self {
            Policy::Lru => Arc::new(LruPolicy::new()),
            Policy::Clock => Arc::new(ClockPolicy::new()),
        }
    }
}

/// A buffer rented from the pool outside the frame table (`read_through`).
/// Returned to the rental pool automatically on drop. The caller "owns
/// the buffer's lifetime" in the sense that it controls when this value
/// goes out of scope, not in the sense of manual bookkeeping.
pub struct OwnedBuffer {
    data: Option<Vec<u8>>,
    rental: Arc<RentalPool>,
}

impl std::ops::Deref for OwnedBuffer {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.data.as_deref().expect("buffer taken")
    }
}

impl std::ops::DerefMut for OwnedBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.data.as_deref_mut().expect("buffer taken")
    }
}

impl Drop for OwnedBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.data.take() {
            self.rental.give_back(buf);
        }
    }
}

/// A latched, resident page. The read/write split is enforced by the type
/// system: a `Read` guard has no dirty-marking method at all, so the
/// `LatchViolation` error is structurally unreachable when mutation goes
/// through a guard rather than the id-based `mark_dirty`/`flush` entry
/// points.
pub enum PageGuard {
    Read(ReadGuard),
    Write(WriteGuard),
}

impl PageGuard {
    pub fn page_id(&self) -> PageId {
        match self {
            PageGuard::Read(g) => g.page_id(),
            PageGuard::Write(g) => g.page_id(),
        }
    }

    pub fn kind(&self) -> LatchKind {
        match self {
            PageGuard::Read(_) => LatchKind::Read,
            PageGuard::Write(_) => LatchKind::Write,
        }
    }

    pub fn read(&self, out: &mut [u8]) {
        match self {
            PageGuard::Read(g) => g.read(out),
            PageGuard::Write(g) => g.read(out),
        }
    }

    pub fn into_write(self) -> Option<WriteGuard> {
        match self {
            PageGuard::Write(g) => Some(g),
            PageGuard::Read(_) => None,
        }
    }

    pub fn release(self) {
        match self {
            PageGuard::Read(g) => g.release(),
            PageGuard::Write(g) => g.release(),
        }
    }
}

pub struct ReadGuard {
    frame: Option<Arc<Frame>>,
}

impl ReadGuard {
    fn new(frame: Arc<Frame>) -> Self {
        Self { frame: Some(frame) }
    }

    pub fn page_id(&self) -> PageId {
        self.frame.as_ref().expect("guard released").page_id()
    }

    pub fn read(&self, out: &mut [u8]) {
        self.frame.as_ref().expect("guard released").copy_into(out);
    }

    /// Releases the read latch. Equivalent to the buffer manager's
    /// id-based `return_page(id, Read)`, offered here so callers that
    /// still hold the guard don't need to thread the id back through.
    pub fn release(mut self) {
        if let Some(frame) = self.frame.take() {
            frame.latch().release(LatchKind::Read);
        }
    }
}

impl Drop for ReadGuard {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.latch().release(LatchKind::Read);
        }
    }
}

pub struct WriteGuard {
    frame: Option<Arc<Frame>>,
    dirty_queue: Arc<SegQueue<PageId>>,
    policy: Arc<dyn ReplacementPolicy<PageId>>,
}

impl WriteGuard {
    fn new(
        frame: Arc<Frame>,
        dirty_queue: Arc<SegQueue<PageId>>,
        policy: Arc<dyn ReplacementPolicy<PageId>>,
    ) -> Self {
        Self {
            frame: Some(frame),
            dirty_queue,
            policy,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.frame.as_ref().expect("guard released").page_id()
    }

    pub fn read(&self, out: &mut [u8]) {
        self.frame.as_ref().expect("guard released").copy_into(out);
    }

    pub fn write(&self, data: &[u8]) {
        self.frame.as_ref().expect("guard released").copy_from(data);
    }

    /// Marks the frame dirty and enqueues it for flush. Requires no runtime
    /// check: holding a `WriteGuard` already proves the write latch is
    /// held, satisfying the pre-condition statically.
    pub fn set_dirty(&self) {
        let frame = self.frame.as_ref().expect("guard released");
        frame.set_dirty();
        self.dirty_queue.push(frame.page_id());
        self.policy.bump(frame.page_id());
    }

    pub fn clean(&self) {
        self.frame.as_ref().expect("guard released").clear_dirty();
    }

    pub fn release(mut self) {
        if let Some(frame) = self.frame.take() {
            frame.latch().release(LatchKind::Write);
        }
    }
}

impl Drop for WriteGuard {
    fn drop(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.latch().release(LatchKind::Write);
        }
    }
}

/// Point-in-time counters for diagnostics; nothing in the manager depends
/// on these values for correctness.
#[derive(Debug, Clone, Copy, Default)]
pub struct BufferPoolStats {
    pub resident_frames: usize,
    pub frame_capacity: usize,
    pub lookups: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub page_reads: u64,
    pub page_writes: u64,
}

/// Frame table, replacement policy, backing store, rental pool and dirty
/// queue, wired together behind the lease/return/mark_dirty/flush surface.
pub struct BufferPoolManager {
    config: BufferPoolConfig,
    store: BackingStore,
    rental: Arc<RentalPool>,
    policy: Arc<dyn ReplacementPolicy<PageId>>,
    frame_table: DashMap<PageId, Arc<Frame>>,
    dirty_queue: Arc<SegQueue<PageId>>,
    disposed: AtomicBool,

    lookups: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    page_reads: AtomicU64,
    page_writes: AtomicU64,
}

impl BufferPoolManager {
    pub fn create(path: impl AsRef<Path>, config: BufferPoolConfig, policy: Policy) -> Result<Self> {
        config.validate()?;
        let store = BackingStore::open(path, config.page_size, config.frame_capacity)?;
        let rental = Arc::new(RentalPool::new(config.page_size, config.rental_capacity()));
        Ok(Self {
            config,
            store,
            rental,
            policy: policy.build(),
            frame_table: DashMap::new(),
            dirty_queue: Arc::new(SegQueue::new()),
            disposed: AtomicBool::new(false),
            lookups: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            page_reads: AtomicU64::new(0),
            page_writes: AtomicU64::new(0),
        })
    }

    fn check_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(BufferPoolError::Disposed)
        } else {
            Ok(())
        }
    }

    fn make_guard(&self, frame: Arc<Frame>, kind: LatchKind) -> PageGuard {
        match kind {
            LatchKind::Read => PageGuard::Read(ReadGuard::new(frame)),
            LatchKind::Write => PageGuard::Write(WriteGuard::new(
                frame,
                Arc::clone(&self.dirty_queue),
                Arc::clone(&self.policy),
            )),
            LatchKind::None => unreachable!("BadLatchRequest rejected before make_guard"),
        }
    }

    /// A frame is only safe to hand back once it is proven still resident
    /// under a fresh table lookup taken *after* the latch was granted: the
    /// latch's own state is independent of table residency, so a frame can
    /// be evicted (buffer returned to the rental pool, frame dropped from
    /// the table) in the window between an earlier lookup and the latch
    /// grant on it. Comparing the `Arc` pointer rather than re-reading
    /// `page_id` catches exactly that: a stale frame still answers to the
    /// right id but no longer owns a live buffer.
    fn frame_still_resident(&self, page_id: PageId, frame: &Arc<Frame>) -> bool {
        matches!(self.frame_table.get(&page_id), Some(current) if Arc::ptr_eq(current.value(), frame))
    }

    /// Hit path: frame table lookup, latch, bump. Miss path: rent a buffer,
    /// read through the store, evict on overflow, install (or adopt the
    /// winner of a concurrent install race). Both paths re-validate the
    /// frame's residency after the latch is granted and retry as a fresh
    /// lookup on a stale hit, since a concurrent eviction can remove the
    /// frame in the window between the table lookup and the latch grant.
    pub fn lease(&self, page_id: PageId, kind: LatchKind, cancel: &CancelToken) -> Result<PageGuard> {
        self.check_disposed()?;
        if kind == LatchKind::None {
            return Err(BufferPoolError::BadLatchRequest);
        }

        loop {
            self.lookups.fetch_add(1, Ordering::Relaxed);

            if let Some(entry) = self.frame_table.get(&page_id) {
                let frame = Arc::clone(entry.value());
                drop(entry);
                frame.latch().acquire(kind, cancel)?;
                if !self.frame_still_resident(page_id, &frame) {
                    frame.latch().release(kind);
                    debug!(page_id, "lease hit raced with eviction, retrying");
                    continue;
                }
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.policy.bump(page_id);
                frame.touch();
                debug!(page_id, "lease hit");
                return Ok(self.make_guard(frame, kind));
            }

            self.misses.fetch_add(1, Ordering::Relaxed);
            debug!(page_id, "lease miss");

            let mut buf = self.rental.rent();
            if cancel.is_cancelled() {
                self.rental.give_back(buf);
                return Err(BufferPoolError::Cancelled);
            }
            if let Err(e) = self.store.read_page(page_id, &mut buf) {
                self.rental.give_back(buf);
                return Err(e);
            }
            self.page_reads.fetch_add(1, Ordering::Relaxed);
            if cancel.is_cancelled() {
                self.rental.give_back(buf);
                return Err(BufferPoolError::Cancelled);
            }

            if self.frame_table.len() >= self.config.frame_capacity {
                self.run_eviction_attempt();
            }

            let candidate = Arc::new(Frame::new(page_id, buf));
            let frame = match self.frame_table.entry(page_id) {
                dashmap::mapref::entry::Entry::Occupied(occupied) => {
                    // Someone else installed this page first; discard our
                    // buffer and adopt the winner.
                    let winner = Arc::clone(occupied.get());
                    self.rental.give_back(candidate.take_buffer());
                    winner
                }
                dashmap::mapref::entry::Entry::Vacant(vacant) => {
                    vacant.insert(Arc::clone(&candidate));
                    candidate
                }
            };

            frame.latch().acquire(kind, cancel)?;
            if !self.frame_still_resident(page_id, &frame) {
                frame.latch().release(kind);
                debug!(page_id, "lease install raced with eviction, retrying");
                continue;
            }
            self.policy.bump(page_id);
            frame.touch();
            return Ok(self.make_guard(frame, kind));
        }
    }

    /// Id-based release, matching the external operation table exactly.
    /// Guards also release on `Drop`/`release()`; calling both is safe,
    /// since the second release of an already-unlatched kind is a no-op.
    pub fn return_page(&self, page_id: PageId, kind: LatchKind) -> Result<()> {
        self.check_disposed()?;
        if kind == LatchKind::None {
            return Err(BufferPoolError::BadLatchRequest);
        }
        match self.frame_table.get(&page_id) {
            Some(frame) => {
                frame.latch().release(kind);
                Ok(())
            }
            None => Err(BufferPoolError::NotFound(page_id)),
        }
    }

    /// Id-based dirty mark for callers that don't hold a `WriteGuard`.
    /// Performs the runtime write-latch check the guard path gets for free.
    pub fn mark_dirty(&self, page_id: PageId) -> Result<bool> {
        self.check_disposed()?;
        let frame = match self.frame_table.get(&page_id) {
            Some(f) => Arc::clone(f.value()),
            None => return Ok(false),
        };
        if !frame.latch().has_write_latch() {
            return Err(BufferPoolError::LatchViolation(page_id));
        }
        frame.set_dirty();
        self.dirty_queue.push(page_id);
        self.policy.bump(page_id);
        Ok(true)
    }

    /// Bypass path: reads directly into a rented buffer, never touching
    /// the frame table or the policy.
    pub fn read_through(&self, page_id: PageId) -> Result<OwnedBuffer> {
        self.check_disposed()?;
        let mut buf = self.rental.rent();
        if let Err(e) = self.store.read_page(page_id, &mut buf) {
            self.rental.give_back(buf);
            return Err(e);
        }
        self.page_reads.fetch_add(1, Ordering::Relaxed);
        Ok(OwnedBuffer {
            data: Some(buf),
            rental: Arc::clone(&self.rental),
        })
    }

    fn flush_frame(&self, frame: &Arc<Frame>) -> Result<()> {
        let page_id = frame.page_id();
        let result = frame.with_buffer(|buf| self.store.write_page(page_id, buf));
        match result {
            Ok(()) => {
                self.page_writes.fetch_add(1, Ordering::Relaxed);
                frame.clear_dirty();
                Ok(())
            }
            Err(e) => Err(e), // dirty flag left set; retry-safe
        }
    }

    /// Resolves `page_id` to a frame and flushes it. The pre-condition
    /// (dirty, write latch held by the caller) is checked symmetrically
    /// with `mark_dirty`'s.
    pub fn flush(&self, page_id: PageId) -> Result<bool> {
        self.check_disposed()?;
        let frame = match self.frame_table.get(&page_id) {
            Some(f) => Arc::clone(f.value()),
            None => return Ok(false),
        };
        if !frame.is_dirty() {
            return Ok(false);
        }
        if !frame.latch().has_write_latch() {
            return Err(BufferPoolError::LatchViolation(page_id));
        }
        self.flush_frame(&frame)?;
        Ok(true)
    }

    /// Snapshots the dirty queue and flushes every frame still dirty,
    /// continuing past per-frame I/O failures and aggregating them. Unlike
    /// `flush`, this sweeps frames the calling thread never leased, so it
    /// acquires each write latch itself (skipping frames currently
    /// contended rather than blocking) instead of assuming the caller
    /// already holds it.
    pub fn flush_all(&self) -> Result<()> {
        self.check_disposed()?;
        let mut drained = Vec::new();
        while let Some(page_id) = self.dirty_queue.pop() {
            drained.push(page_id);
        }

        let mut seen = HashSet::new();
        let mut errors = Vec::new();
        for page_id in drained {
            if !seen.insert(page_id) {
                continue;
            }
            let frame = match self.frame_table.get(&page_id) {
                Some(f) => Arc::clone(f.value()),
                None => continue,
            };
            if !frame.is_dirty() {
                continue;
            }
            if frame.latch().try_acquire(LatchKind::Write) {
                let result = self.flush_frame(&frame);
                frame.latch().release(LatchKind::Write);
                if let Err(e) = result {
                    self.dirty_queue.push(page_id);
                    errors.push(e);
                }
            } else {
                // contended: defer to a later flush_all / explicit flush
                self.dirty_queue.push(page_id);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            let count = errors.len();
            Err(BufferPoolError::AggregateIo(count, errors))
        }
    }

    /// One overflow observation triggers one eviction attempt, but that
    /// attempt examines successive victims, re-bumping each ineligible one,
    /// until it reclaims a frame or the policy runs dry. Bounded by
    /// the current resident count so an all-dirty/all-latched population
    /// can't loop forever; in that case the overshoot is left for the next
    /// observation, absorbed by the rental headroom.
    fn run_eviction_attempt(&self) {
        let bound = self.frame_table.len().max(1);
        for _ in 0..=bound {
            let victim_id = match self.policy.try_evict() {
                Evicted::Empty => return,
                Evicted::Victim(id) => id,
            };

            let frame = match self.frame_table.get(&victim_id) {
                Some(f) => Arc::clone(f.value()),
                None => continue, // race: id already gone, try the next candidate
            };

            if frame.any_latch_held() || frame.is_dirty() {
                self.policy.bump(victim_id);
                warn!(page_id = victim_id, "eviction candidate ineligible, re-bumped");
                continue;
            }

            let removed = self
                .frame_table
                .remove_if(&victim_id, |_, f| !f.any_latch_held() && !f.is_dirty());
            match removed {
                Some((_, frame)) => {
                    let buf = frame.take_buffer();
                    self.rental.give_back(buf);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                    debug!(page_id = victim_id, "evicted");
                    return;
                }
                None => {
                    // Became ineligible between the check above and the
                    // remove_if (another thread latched or dirtied it, or
                    // already evicted it). Re-bump defensively and try the
                    // next candidate.
                    self.policy.bump(victim_id);
                }
            }
        }
    }

    pub fn dirty_page_ratio(&self) -> f64 {
        let resident = self.frame_table.len();
        if resident == 0 {
            return 0.0;
        }
        let dirty = self
            .frame_table
            .iter()
            .filter(|entry| entry.value().is_dirty())
            .count();
        dirty as f64 / resident as f64
    }

    pub fn stats(&self) -> BufferPoolStats {
        BufferPoolStats {
            resident_frames: self.frame_table.len(),
            frame_capacity: self.config.frame_capacity,
            lookups: self.lookups.load(Ordering::Relaxed),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            page_reads: self.page_reads.load(Ordering::Relaxed),
            page_writes: self.page_writes.load(Ordering::Relaxed),
        }
    }

    pub fn policy_stats(&self) -> PolicyStats {
        self.policy.stats()
    }

    pub fn config(&self) -> BufferPoolConfig {
        self.config
    }

    /// One-way transition to a terminal state. Best-effort flush of
    /// outstanding dirty pages; failures are logged, not returned, since
    /// `dispose` itself carries no error in the external operation table.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return; // already disposed
        }
        if let Err(e) = self.flush_all() {
            warn!(error = %e, "flush_all failed during dispose");
        }
    }
}

impl Drop for BufferPoolManager {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Ergonomic construction from a `BufferPoolConfig`, mirroring the
/// lease/return surface's separation of configuration from policy choice.
pub struct BufferPoolBuilder {
    path: Option<std::path::PathBuf>,
    config: BufferPoolConfig,
    policy: Policy,
}

impl BufferPoolBuilder {
    pub fn new() -> Self {
        Self {
            path: None,
            config: BufferPoolConfig::default(),
            policy: Policy::Lru,
        }
    }

    pub fn path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.config.page_size = page_size;
        self
    }

    pub fn frame_capacity(mut self, frame_capacity: usize) -> Self {
        self.config.frame_capacity = frame_capacity;
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn build(self) -> Result<BufferPoolManager> {
        let path = self
            .path
            .ok_or_else(|| BufferPoolError::InvalidArg("path is required".into()))?;
        BufferPoolManager::create(path, self.config, self.policy)
    }
}

impl Default for BufferPoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn seed_file(path: &std::path::Path, page_size: usize, page_bytes: &[u8]) {
        let mut contents = Vec::with_capacity(page_size * page_bytes.len());
        for &b in page_bytes {
            contents.extend(std::iter::repeat(b).take(page_size));
        }
        fs::write(path, contents).unwrap();
    }

    fn resident_ids(mgr: &BufferPoolManager) -> HashSet<PageId> {
        mgr.frame_table.iter().map(|e| *e.key()).collect()
    }

    #[test]
    fn scenario_1_lru_hit_path_re_bumps_and_evicts_correct_frame() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1, 2, 3, 4]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        for id in [1u64, 2, 3] {
            mgr.lease(id, LatchKind::Read, &cancel).unwrap().release();
        }
        mgr.lease(1, LatchKind::Read, &cancel).unwrap().release();
        mgr.lease(4, LatchKind::Read, &cancel).unwrap().release();

        assert_eq!(resident_ids(&mgr), HashSet::from([1, 3, 4]));
    }

    #[test]
    fn scenario_2_clock_second_chance_residents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1, 2, 3, 4, 5, 6]);
        let mgr =
            BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Clock).unwrap();
        let cancel = CancelToken::new();

        for id in [1u64, 2, 3] {
            mgr.lease(id, LatchKind::Read, &cancel).unwrap().release();
        }
        mgr.lease(2, LatchKind::Read, &cancel).unwrap().release(); // bump 2
        mgr.lease(4, LatchKind::Read, &cancel).unwrap().release(); // evicts 1
        mgr.lease(3, LatchKind::Read, &cancel).unwrap().release(); // bump 3
        mgr.lease(5, LatchKind::Read, &cancel).unwrap().release(); // evicts 2
        mgr.lease(6, LatchKind::Read, &cancel).unwrap().release(); // evicts 3

        assert_eq!(resident_ids(&mgr), HashSet::from([4, 5, 6]));
    }

    #[test]
    fn scenario_3_dirty_frame_is_skipped_by_eviction() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1, 2, 3, 4]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        let g1 = mgr.lease(1, LatchKind::Write, &cancel).unwrap();
        let g1 = g1.into_write().unwrap();
        g1.set_dirty();
        g1.release();
        mgr.lease(2, LatchKind::Write, &cancel).unwrap().release();
        mgr.lease(3, LatchKind::Write, &cancel).unwrap().release();

        mgr.lease(4, LatchKind::Read, &cancel).unwrap().release();

        assert_eq!(resident_ids(&mgr), HashSet::from([1, 3, 4]));
        assert!(mgr.frame_table.get(&1).unwrap().is_dirty());
    }

    #[test]
    fn scenario_4_flush_round_trips_through_dispose_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1, 2, 3, 4]);

        {
            let mgr =
                BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
            let cancel = CancelToken::new();
            let guard = mgr.lease(2, LatchKind::Write, &cancel).unwrap();
            let guard = guard.into_write().unwrap();
            guard.write(&[0xAAu8; 16]);
            guard.set_dirty();
            mgr.flush(2).unwrap();
            guard.release();
            mgr.dispose();
        }

        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let buf = mgr.read_through(2).unwrap();
        assert_eq!(&*buf, &[0xAAu8; 16]);
    }

    #[test]
    fn scenario_6_cancellation_before_store_read_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1, 2, 3]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();

        let cancel = CancelToken::new();
        cancel.cancel();
        let result = mgr.lease(1, LatchKind::Read, &cancel);
        assert!(matches!(result, Err(BufferPoolError::Cancelled)));
        assert_eq!(resident_ids(&mgr), HashSet::new());
    }

    #[test]
    fn property_p9_every_operation_rejects_after_dispose() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        mgr.dispose();
        assert!(matches!(
            mgr.lease(1, LatchKind::Read, &cancel),
            Err(BufferPoolError::Disposed)
        ));
        assert!(matches!(
            mgr.return_page(1, LatchKind::Read),
            Err(BufferPoolError::Disposed)
        ));
        assert!(matches!(mgr.mark_dirty(1), Err(BufferPoolError::Disposed)));
        assert!(matches!(mgr.read_through(1), Err(BufferPoolError::Disposed)));
        assert!(matches!(mgr.flush(1), Err(BufferPoolError::Disposed)));
        assert!(matches!(mgr.flush_all(), Err(BufferPoolError::Disposed)));
    }

    #[test]
    fn property_p5_buffer_identity_across_re_lease() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[9]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        let g = mgr.lease(1, LatchKind::Write, &cancel).unwrap();
        let g = g.into_write().unwrap();
        g.write(b"0123456789abcdef");
        g.release();

        let g2 = mgr.lease(1, LatchKind::Read, &cancel).unwrap();
        let mut out = [0u8; 16];
        g2.read(&mut out);
        g2.release();
        assert_eq!(&out, b"0123456789abcdef");
    }

    #[test]
    fn frame_still_resident_detects_eviction_race() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        // Lease and release page 1 so it is resident, unlatched, and known
        // to the policy.
        mgr.lease(1, LatchKind::Read, &cancel).unwrap().release();

        // Snapshot the frame's `Arc` the way the hit path does, before the
        // shard guard that produced it would be dropped.
        let frame = Arc::clone(mgr.frame_table.get(&1).unwrap().value());
        assert!(mgr.frame_still_resident(1, &frame));

        // Simulate a concurrent eviction winning the race: the frame is
        // pulled out from under the snapshot and its buffer returned to the
        // rental pool, exactly as `run_eviction_attempt` does.
        let (_, evicted) = mgr.frame_table.remove(&1).unwrap();
        let buf = evicted.take_buffer();
        mgr.rental.give_back(buf);

        // The stale snapshot still answers to page_id 1 but is no longer
        // the table's entry for it: residency re-validation must catch
        // this instead of handing back a guard over a reclaimed buffer.
        assert!(!mgr.frame_still_resident(1, &frame));
    }

    #[test]
    fn lease_recovers_after_its_frame_is_evicted_out_from_under_it() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[7]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        mgr.lease(1, LatchKind::Read, &cancel).unwrap().release();

        // Evict the frame directly, as a concurrent `run_eviction_attempt`
        // racing a hit-path `lease` would.
        let (_, evicted) = mgr.frame_table.remove(&1).unwrap();
        mgr.rental.give_back(evicted.take_buffer());

        // A fresh lease for the same id must take the miss path and return
        // a guard backed by a live buffer rather than panicking against a
        // stale frame.
        let guard = mgr.lease(1, LatchKind::Read, &cancel).unwrap();
        let mut out = [0u8; 16];
        guard.read(&mut out);
        guard.release();
        assert_eq!(out, [7u8; 16]);
    }

    #[test]
    fn property_p7_write_latch_excludes_concurrent_writer() {
        use std::thread;
        use std::time::Duration;

        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1]);
        let mgr = Arc::new(
            BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap(),
        );
        let cancel = CancelToken::new();
        let holder = mgr.lease(1, LatchKind::Write, &cancel).unwrap();

        let mgr2 = Arc::clone(&mgr);
        let handle = thread::spawn(move || {
            let cancel = CancelToken::new();
            mgr2.lease(1, LatchKind::Write, &cancel).unwrap().release();
        });
        thread::sleep(Duration::from_millis(50));
        assert!(!handle.is_finished());
        holder.release();
        handle.join().unwrap();
    }

    #[test]
    fn mark_dirty_without_write_latch_is_a_latch_violation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        let g = mgr.lease(1, LatchKind::Read, &cancel).unwrap();
        assert!(matches!(
            mgr.mark_dirty(1),
            Err(BufferPoolError::LatchViolation(1))
        ));
        g.release();
    }

    #[test]
    fn bad_latch_request_rejected_for_lease_and_return() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("f.db");
        seed_file(&path, 16, &[1]);
        let mgr = BufferPoolManager::create(&path, BufferPoolConfig::new(16, 3), Policy::Lru).unwrap();
        let cancel = CancelToken::new();

        assert!(matches!(
            mgr.lease(1, LatchKind::None, &cancel),
            Err(BufferPoolError::BadLatchRequest)
        ));
        assert!(matches!(
            mgr.return_page(1, LatchKind::None),
            Err(BufferPoolError::BadLatchRequest)
        ));
    }
}
