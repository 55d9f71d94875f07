// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{
    context::ThreadContext,
    engine::TmEngine,
    errors::{AbortReason, TmError, TxAbort, TxResult},
    htm::abort_codes,
    memory::{Addr, Word},
};

/// Which execution path a transaction attempt is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum TxPath {
    Hardware = 0,
    Software = 1,
    Serial = 2,
}

impl TxPath {
    pub fn label(self) -> &'static str {
        match self {
            TxPath::Hardware => "hardware",
            TxPath::Software => "software",
            TxPath::Serial => "serial",
        }
    }
}

/// Per-attempt view handed to the transactional region. Acts as the proxy
/// through which every read and write resolves according to the attempt's
/// path:
///
/// - hardware: straight to memory, conflict detection is the CPU's job;
/// - software: redo-log writes, validated reads with snapshot extension;
/// - serial: redo-log writes, direct reads — the holder is exclusive, so
///   no validation is needed, and buffering keeps restart cheap.
pub struct Txn<'e, 'c> {
    engine: &'e TmEngine,
    ctx: &'c mut ThreadContext,
    path: TxPath,
    wrote_direct: bool,
}

impl<'e, 'c> Txn<'e, 'c> {
    pub(crate) fn hardware(engine: &'e TmEngine, ctx: &'c mut ThreadContext) -> Self {
        Self::with_path(engine, ctx, TxPath::Hardware)
    }

    pub(crate) fn software(engine: &'e TmEngine, ctx: &'c mut ThreadContext) -> Self {
        Self::with_path(engine, ctx, TxPath::Software)
    }

    pub(crate) fn serial(engine: &'e TmEngine, ctx: &'c mut ThreadContext) -> Self {
        Self::with_path(engine, ctx, TxPath::Serial)
    }

    fn with_path(engine: &'e TmEngine, ctx: &'c mut ThreadContext, path: TxPath) -> Self {
        Self {
            engine,
            ctx,
            path,
            wrote_direct: false,
        }
    }

    pub fn path(&self) -> TxPath {
        self.path
    }

    /// Transactional read of one word.
    pub fn read(&mut self, addr: Addr) -> TxResult<Word> {
        match self.path {
            TxPath::Hardware => Ok(self.engine.memory().load(addr)),
            TxPath::Software => self.engine.stm().read(&mut self.ctx.stm, addr),
            TxPath::Serial => Ok(self
                .ctx
                .stm
                .write_log
                .lookup(addr)
                .unwrap_or_else(|| self.engine.memory().load(addr))),
        }
    }

    /// Transactional write of one word.
    pub fn write(&mut self, addr: Addr, value: Word) -> TxResult<()> {
        debug_assert!(
            !self.ctx.read_only,
            "write inside a transaction opened with the read-only hint"
        );
        match self.path {
            TxPath::Hardware => {
                self.engine.memory().store(addr, value);
                self.wrote_direct = true;
            }
            TxPath::Software | TxPath::Serial => self.ctx.stm.write_log.record(addr, value),
        }
        Ok(())
    }

    /// Request a restart of the whole transaction, e.g. on a failed
    /// precondition. Usage: `return txn.restart();`.
    pub fn restart<T>(&mut self) -> TxResult<T> {
        Err(TxAbort::Restart)
    }

    /// Allocate `words` contiguous words. The allocation survives only if
    /// this transaction commits. Hardware attempts cannot run the
    /// allocator and divert the transaction to the software path.
    pub fn alloc(&mut self, words: usize) -> TxResult<Addr> {
        if self.path == TxPath::Hardware {
            return Err(TxAbort::Conflict(AbortReason::explicit(
                abort_codes::NEEDS_SOFTWARE,
            )));
        }
        match self.engine.allocator().alloc(words) {
            Some(addr) => {
                self.ctx.txn_allocs.push((addr, words));
                Ok(addr)
            }
            None => Err(TxAbort::Fatal(TmError::AllocatorExhausted(words))),
        }
    }

    /// Free a range. The words return to the allocator only when this
    /// transaction commits, so concurrently-validating readers never
    /// observe a recycled word.
    pub fn free(&mut self, addr: Addr, words: usize) -> TxResult<()> {
        if self.path == TxPath::Hardware {
            return Err(TxAbort::Conflict(AbortReason::explicit(
                abort_codes::NEEDS_SOFTWARE,
            )));
        }
        self.ctx.deferred_frees.push((addr, words));
        Ok(())
    }

    /// Whether this attempt wrote memory directly (hardware path only);
    /// decides whether the commit must advance the global counter.
    pub(crate) fn performed_direct_writes(&self) -> bool {
        self.wrote_direct
    }
}
