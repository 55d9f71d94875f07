// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::{AbortReason, TxAbort, TxResult},
    logs::{ReadLog, WriteLog},
    memory::{Addr, SharedMemory, Word},
    seqlock::GlobalSeqLock,
};

/// Per-thread software transaction state: the counter snapshot plus both
/// logs. Owned exclusively by its thread; never shared.
#[derive(Debug, Default)]
pub(crate) struct StmState {
    pub start_time: u64,
    pub read_log: ReadLog,
    pub write_log: WriteLog,
}

impl StmState {
    pub fn clear(&mut self) {
        self.read_log.clear();
        self.write_log.clear();
    }
}

/// The software engine: begin/read/write/commit over the shared heap and
/// the global sequence lock, with value-based validation and on-the-fly
/// snapshot extension.
#[derive(Clone, Copy)]
pub(crate) struct StmEngine<'e> {
    pub memory: &'e SharedMemory,
    pub clock: &'e GlobalSeqLock,
}

impl<'e> StmEngine<'e> {
    /// Start an attempt: discard any previous logs and snapshot the
    /// counter, spinning while a committer holds it odd.
    pub fn begin(&self, state: &mut StmState) {
        state.clear();
        state.start_time = self.clock.read_even();
    }

    /// Transactional read. The write log is consulted first so the
    /// transaction observes its own buffered writes; otherwise the value
    /// comes from memory and joins the validation set. If the counter
    /// moved since the snapshot, the entire read set is revalidated
    /// against live memory and the snapshot advances — aborting only on an
    /// actual value change, which is what keeps false aborts rare.
    pub fn read(&self, state: &mut StmState, addr: Addr) -> TxResult<Word> {
        if let Some(buffered) = state.write_log.lookup(addr) {
            return Ok(buffered);
        }

        let mut value = self.memory.load(addr);
        while self.clock.load() != state.start_time {
            state.start_time = self.validate(&state.read_log)?;
            value = self.memory.load(addr);
        }
        state.read_log.record(addr, value);
        Ok(value)
    }

    /// Buffer a write. Memory is untouched until commit; no validation is
    /// needed for a pure write.
    pub fn write(&self, state: &mut StmState, addr: Addr, value: Word) {
        state.write_log.record(addr, value);
    }

    /// Commit the attempt. A read-only transaction succeeds trivially: its
    /// reads were consistent as of the last (possibly extended) snapshot.
    /// A writer takes the counter's exclusive window, revalidates if
    /// anyone committed since its snapshot, flushes the redo log, and
    /// releases to even+2. On validation failure the counter is released
    /// unmodified and the attempt aborts.
    pub fn commit(&self, state: &mut StmState) -> TxResult<()> {
        if state.write_log.is_empty() {
            state.clear();
            return Ok(());
        }

        let mut acquired_from = state.start_time;
        while !self.clock.try_acquire(acquired_from) {
            acquired_from = self.clock.read_even();
        }

        if acquired_from != state.start_time && !self.reads_current(&state.read_log) {
            self.clock.release_clean(acquired_from);
            state.clear();
            return Err(TxAbort::Conflict(AbortReason::validation()));
        }

        for (addr, value) in state.write_log.iter() {
            self.memory.store(addr, value);
        }
        self.clock.release_dirty(acquired_from);
        state.clear();
        Ok(())
    }

    /// Discard the attempt. Safe to call any number of times.
    pub fn restart(&self, state: &mut StmState) {
        state.clear();
    }

    /// Wait for a quiescent counter, re-check every logged read against
    /// live memory, and return the counter value the read set is known
    /// consistent at. Loops if a commit lands mid-check.
    fn validate(&self, read_log: &ReadLog) -> TxResult<u64> {
        loop {
            let observed = self.clock.read_even();
            if !self.reads_current(read_log) {
                return Err(TxAbort::Conflict(AbortReason::validation()));
            }
            if self.clock.load() == observed {
                return Ok(observed);
            }
        }
    }

    fn reads_current(&self, read_log: &ReadLog) -> bool {
        read_log
            .iter()
            .all(|(addr, seen)| self.memory.load(addr) == seen)
    }
}
