// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU64, Ordering};

/// The global sequence lock: the single serialization point of the engine.
///
/// The counter is even while no exclusive holder exists and odd while one
/// does. Exactly two kinds of exclusive holder exist: a software committer
/// flushing its redo log, and the serializing fallback holder. Both
/// acquire by CAS'ing an even value to the next odd value and release by
/// storing back an even value, so every other thread observes exclusivity
/// through this one address:
///
/// - software transactions snapshot the counter at begin and revalidate
///   whenever it moves;
/// - hardware transactions read it immediately after starting, which puts
///   it into their hardware read set, so any acquisition aborts them.
///
/// Ordering discipline: reads are Acquire, the odd/even transitions are
/// SeqCst (a full fence around the exclusive window). Data words
/// themselves only need Relaxed stores because this release publishes
/// them.
pub struct GlobalSeqLock {
    clock: CachePadded<AtomicU64>,
}

impl GlobalSeqLock {
    pub fn new() -> Self {
        Self {
            clock: CachePadded::new(AtomicU64::new(0)),
        }
    }

    pub fn load(&self) -> u64 {
        self.clock.load(Ordering::Acquire)
    }

    /// Whether an exclusive holder is currently active.
    pub fn write_locked(&self) -> bool {
        self.load() & 1 == 1
    }

    /// Spin until the counter is observed even and return that value.
    pub fn read_even(&self) -> u64 {
        loop {
            let observed = self.load();
            if observed & 1 == 0 {
                return observed;
            }
            std::hint::spin_loop();
        }
    }

    /// Attempt to take the exclusive window from a previously observed
    /// even value. Fails iff the counter has moved.
    pub fn try_acquire(&self, from_even: u64) -> bool {
        debug_assert_eq!(from_even & 1, 0);
        self.clock
            .compare_exchange(from_even, from_even + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_ok()
    }

    /// Block until the exclusive window is taken; returns the even value
    /// it was taken from.
    pub fn acquire(&self) -> u64 {
        loop {
            let observed = self.read_even();
            if self.try_acquire(observed) {
                return observed;
            }
        }
    }

    /// Release after publishing writes. The +2 step lands back on even and
    /// simultaneously signals every snapshot holder to revalidate.
    pub fn release_dirty(&self, acquired_from: u64) {
        self.clock.store(acquired_from + 2, Ordering::SeqCst);
    }

    /// Release without having modified memory; the counter returns to the
    /// value it was acquired from.
    pub fn release_clean(&self, acquired_from: u64) {
        self.clock.store(acquired_from, Ordering::SeqCst);
    }

    /// Advance the counter by 2 from inside a live hardware transaction
    /// after it performed writes, so concurrent software snapshots
    /// revalidate. Atomicity comes from the enclosing transaction (the
    /// counter is already in its read set), hence plain orderings.
    pub(crate) fn bump_within_txn(&self) {
        let observed = self.clock.load(Ordering::Relaxed);
        debug_assert_eq!(observed & 1, 0);
        self.clock.store(observed + 2, Ordering::Relaxed);
    }
}

impl Default for GlobalSeqLock {
    fn default() -> Self {
        Self::new()
    }
}
