// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::{AbortCategory, AbortReason},
    memory::Addr,
    stm::StmState,
    txn::TxPath,
};

pub type ThreadId = usize;

/// State of the manual (`tx_begin`-style) call surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ManualMode {
    /// No transaction in flight.
    Inactive,
    /// A software transaction is open.
    Software,
    /// The serializing fallback is held; `held_from` is the even counter
    /// value the exclusive window was taken at.
    Serial { held_from: u64 },
}

/// Per-thread transaction context: logs, snapshot, retry budget, abort
/// tallies and deferred allocator work. Created by
/// [`crate::TmEngine::register_thread`], owned exclusively by one thread,
/// retired through [`crate::TmEngine::unregister_thread`].
pub struct ThreadContext {
    id: ThreadId,
    pub(crate) stm: StmState,
    pub(crate) manual: ManualMode,
    pub(crate) read_only: bool,
    pub(crate) budget: u32,
    pub(crate) consecutive_capacity: u32,
    pub(crate) consecutive_sw_aborts: u32,
    /// Allocations made by the current attempt, handed back on abort.
    pub(crate) txn_allocs: Vec<(Addr, usize)>,
    /// Frees requested by the current attempt, applied on commit.
    pub(crate) deferred_frees: Vec<(Addr, usize)>,
    stats: ThreadStats,
}

impl ThreadContext {
    pub(crate) fn new(id: ThreadId, budget: u32) -> Self {
        Self {
            id,
            stm: StmState::default(),
            manual: ManualMode::Inactive,
            read_only: false,
            budget,
            consecutive_capacity: 0,
            consecutive_sw_aborts: 0,
            txn_allocs: Vec::new(),
            deferred_frees: Vec::new(),
            stats: ThreadStats::default(),
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// Read-only view of this thread's counters.
    pub fn stats(&self) -> &ThreadStats {
        &self.stats
    }

    /// Reset per-cycle state at the start of a logical transaction.
    /// Consecutive-abort counters survive manual-API cycles so the policy
    /// can demote across restarts; `finish_cycle` clears them on success.
    pub(crate) fn begin_cycle(&mut self, budget: u32, read_only: bool) {
        self.budget = budget;
        self.read_only = read_only;
        self.consecutive_capacity = 0;
        self.txn_allocs.clear();
        self.deferred_frees.clear();
    }

    pub(crate) fn note_commit(&mut self, path: TxPath) {
        self.stats.commits[path as usize] += 1;
        self.consecutive_sw_aborts = 0;
        self.consecutive_capacity = 0;
    }

    pub(crate) fn note_abort(&mut self, category: AbortCategory) {
        self.stats.aborts[category as usize] += 1;
    }

    pub(crate) fn note_hardware_attempt(&mut self) {
        self.stats.hardware_attempts += 1;
    }

    pub(crate) fn note_fallback_acquisition(&mut self) {
        self.stats.fallback_acquisitions += 1;
    }

    pub(crate) fn note_hardware_abort(&mut self, reason: AbortReason) {
        self.note_abort(reason.category());
        if reason.is_capacity() {
            self.consecutive_capacity += 1;
        } else {
            self.consecutive_capacity = 0;
        }
    }

    pub(crate) fn into_stats(self) -> ThreadStats {
        self.stats
    }
}

/// Monotonic per-thread counters, exposed read-only to the statistics
/// collaborator. Formatting and export happen elsewhere.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ThreadStats {
    commits: [u64; 3],
    aborts: [u64; AbortCategory::COUNT],
    hardware_attempts: u64,
    fallback_acquisitions: u64,
}

impl ThreadStats {
    pub fn commits(&self, path: TxPath) -> u64 {
        self.commits[path as usize]
    }

    pub fn total_commits(&self) -> u64 {
        self.commits.iter().sum()
    }

    pub fn aborts(&self, category: AbortCategory) -> u64 {
        self.aborts[category as usize]
    }

    pub fn total_aborts(&self) -> u64 {
        self.aborts.iter().sum()
    }

    pub fn hardware_attempts(&self) -> u64 {
        self.hardware_attempts
    }

    pub fn fallback_acquisitions(&self) -> u64 {
        self.fallback_acquisitions
    }

    /// Fold another thread's tallies into this one; used when retiring
    /// contexts into the engine-wide aggregate.
    pub fn merge(&mut self, other: &ThreadStats) {
        for (mine, theirs) in self.commits.iter_mut().zip(other.commits.iter()) {
            *mine += theirs;
        }
        for (mine, theirs) in self.aborts.iter_mut().zip(other.aborts.iter()) {
            *mine += theirs;
        }
        self.hardware_attempts += other.hardware_attempts;
        self.fallback_acquisitions += other.fallback_acquisitions;
    }
}
