// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use std::sync::atomic::{AtomicU64, Ordering};

/// Word index into the shared heap.
pub type Addr = usize;
/// The unit of transactional access.
pub type Word = u64;

/// The process-wide word-addressable heap that transactions operate on.
///
/// Every word is an atomic cell so concurrent access is never a data race;
/// consistency across words is provided by the global sequence lock, not by
/// the per-word orderings. Loads are Acquire so that a subsequent re-read
/// of the sequence counter cannot be reordered ahead of the data load;
/// stores are Relaxed because the committer's counter release publishes
/// them.
pub struct SharedMemory {
    words: Box<[AtomicU64]>,
}

impl SharedMemory {
    pub fn new(len: usize) -> Self {
        Self {
            words: (0..len).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub(crate) fn load(&self, addr: Addr) -> Word {
        self.words[addr].load(Ordering::Acquire)
    }

    pub(crate) fn store(&self, addr: Addr, value: Word) {
        self.words[addr].store(value, Ordering::Relaxed);
    }

    /// Non-transactional read, for collaborators inspecting memory outside
    /// any transaction (statistics, test assertions). Racing an in-flight
    /// commit returns either the old or the new value of that word.
    pub fn peek(&self, addr: Addr) -> Word {
        self.words[addr].load(Ordering::Acquire)
    }

    /// Non-transactional store. Only safe while no transaction can access
    /// `addr`, e.g. during workload setup before threads are launched.
    pub fn poke(&self, addr: Addr, value: Word) {
        self.words[addr].store(value, Ordering::Release);
    }
}
