// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{
    alloc::{FreeListAlloc, TmAlloc},
    arbiter::{self, ArbiterPolicy, Decision, FixedPolicy},
    config::TmConfig,
    context::{ManualMode, ThreadContext, ThreadStats},
    counters,
    errors::{AbortCategory, TmError, TxAbort, TxResult},
    fallback::{FallbackKind, FallbackLock},
    htm::{unsupported::UnsupportedHtm, HardwareTm},
    memory::{Addr, SharedMemory, Word},
    seqlock::GlobalSeqLock,
    stm::StmEngine,
    txn::{Txn, TxPath},
};
use seqtm_infallible::Mutex;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// The process-wide transactional-memory context: the shared heap, the
/// global sequence lock, the fallback coordination state, the hardware
/// backend and the policy. Constructed once at startup; threads attach
/// through [`TmEngine::register_thread`] and detach through
/// [`TmEngine::unregister_thread`].
pub struct TmEngine {
    memory: SharedMemory,
    clock: GlobalSeqLock,
    fallback: FallbackLock,
    htm: Arc<dyn HardwareTm>,
    policy: Arc<dyn ArbiterPolicy>,
    allocator: Arc<dyn TmAlloc>,
    next_thread_id: AtomicUsize,
    retired: Mutex<ThreadStats>,
}

impl TmEngine {
    pub fn new(config: TmConfig) -> Self {
        let policy = config
            .policy
            .clone()
            .unwrap_or_else(|| Arc::new(FixedPolicy::from_config(&config)));
        let htm = config.htm.clone().unwrap_or_else(default_backend);
        let allocator = config
            .allocator
            .clone()
            .unwrap_or_else(|| Arc::new(FreeListAlloc::new(0, config.heap_words)));
        Self {
            memory: SharedMemory::new(config.heap_words),
            clock: GlobalSeqLock::new(),
            fallback: FallbackLock::new(config.fallback),
            htm,
            policy,
            allocator,
            next_thread_id: AtomicUsize::new(0),
            retired: Mutex::new(ThreadStats::default()),
        }
    }

    /// Thread-lifecycle hook: allocate this thread's transaction context.
    /// Call from the thread-enter hook of the threading collaborator.
    pub fn register_thread(&self) -> ThreadContext {
        let id = self.next_thread_id.fetch_add(1, Ordering::Relaxed);
        ThreadContext::new(id, self.policy.initial_budget())
    }

    /// Thread-lifecycle hook: retire a context, folding its tallies into
    /// the engine aggregate and the exported counters.
    pub fn unregister_thread(&self, ctx: ThreadContext) {
        debug_assert!(
            matches!(ctx.manual, ManualMode::Inactive),
            "thread retired with a transaction in flight"
        );
        let stats = ctx.into_stats();
        counters::flush_thread_stats(&stats);
        self.retired.lock().merge(&stats);
    }

    /// Aggregate of all retired threads' counters.
    pub fn retired_stats(&self) -> ThreadStats {
        self.retired.lock().clone()
    }

    /// Run a transactional region to successful commit, absorbing every
    /// transient abort. The closure may run many times and on any path
    /// (hardware, software, serial), so it must be free of side effects
    /// other than through [`Txn`]. Only fatal faults surface.
    ///
    /// This is the only surface that attempts hardware transactions: a
    /// hardware abort rewinds control to the begin point, which therefore
    /// has to share a stack frame with the whole region.
    pub fn execute<T, F>(&self, ctx: &mut ThreadContext, read_only: bool, f: F) -> Result<T, TmError>
    where
        F: FnMut(&mut Txn<'_, '_>) -> TxResult<T>,
    {
        arbiter::run(self, ctx, read_only, f)
    }

    pub fn memory(&self) -> &SharedMemory {
        &self.memory
    }

    pub fn fallback_kind(&self) -> FallbackKind {
        self.fallback.kind()
    }

    /// Whether a fallback holder is currently serialized. Exposed for the
    /// statistics collaborator; the engine's own paths consult it
    /// internally.
    pub fn fallback_locked(&self) -> bool {
        self.fallback.is_locked()
    }

    // ------------------------------------------------------------------
    // Manual per-call surface. Drives the software engine, demoting to
    // the serializing fallback when the policy says a thread's aborts
    // warrant it. See `execute` for the hardware path.

    /// Open a transaction. Any in-flight transaction on this context is
    /// discarded first, so `tx_begin` doubles as restart-and-begin.
    pub fn tx_begin(&self, ctx: &mut ThreadContext, read_only: bool) {
        self.tx_restart(ctx);
        ctx.read_only = read_only;

        let serialize = ctx.consecutive_sw_aborts > 0
            && matches!(
                self.policy.on_software_abort(ctx.consecutive_sw_aborts),
                Decision::Serialize
            );
        if serialize {
            self.fallback.acquire();
            ctx.note_fallback_acquisition();
            let held_from = self.clock.acquire();
            ctx.manual = ManualMode::Serial { held_from };
        } else {
            self.stm().begin(&mut ctx.stm);
            ctx.manual = ManualMode::Software;
        }
    }

    /// Transactional read. A conflict abort discards the transaction; the
    /// caller is expected to `tx_begin` again.
    pub fn tx_read(&self, ctx: &mut ThreadContext, addr: Addr) -> TxResult<Word> {
        match ctx.manual {
            ManualMode::Software => match self.stm().read(&mut ctx.stm, addr) {
                Ok(value) => Ok(value),
                Err(abort) => {
                    self.manual_abort(ctx, &abort);
                    Err(abort)
                }
            },
            ManualMode::Serial { .. } => Ok(ctx
                .stm
                .write_log
                .lookup(addr)
                .unwrap_or_else(|| self.memory.load(addr))),
            ManualMode::Inactive => Err(TxAbort::Fatal(TmError::InvariantViolation(
                "tx_read outside an active transaction",
            ))),
        }
    }

    /// Buffer a transactional write; memory is untouched until
    /// `tx_commit`.
    pub fn tx_write(&self, ctx: &mut ThreadContext, addr: Addr, value: Word) -> TxResult<()> {
        match ctx.manual {
            ManualMode::Software | ManualMode::Serial { .. } => {
                debug_assert!(
                    !ctx.read_only,
                    "tx_write inside a transaction opened with the read-only hint"
                );
                ctx.stm.write_log.record(addr, value);
                Ok(())
            }
            ManualMode::Inactive => Err(TxAbort::Fatal(TmError::InvariantViolation(
                "tx_write outside an active transaction",
            ))),
        }
    }

    /// Commit. On success the transaction's writes are globally visible
    /// when this returns; a conflict abort discards the transaction and
    /// the caller restarts it.
    pub fn tx_commit(&self, ctx: &mut ThreadContext) -> TxResult<()> {
        match ctx.manual {
            ManualMode::Software => match self.stm().commit(&mut ctx.stm) {
                Ok(()) => {
                    self.commit_side_effects(ctx);
                    ctx.manual = ManualMode::Inactive;
                    ctx.note_commit(TxPath::Software);
                    Ok(())
                }
                Err(abort) => {
                    self.manual_abort(ctx, &abort);
                    Err(abort)
                }
            },
            ManualMode::Serial { held_from } => {
                if ctx.stm.write_log.is_empty() {
                    self.clock.release_clean(held_from);
                } else {
                    for (addr, value) in ctx.stm.write_log.iter() {
                        self.memory.store(addr, value);
                    }
                    self.clock.release_dirty(held_from);
                }
                self.fallback.release();
                ctx.stm.clear();
                self.commit_side_effects(ctx);
                ctx.manual = ManualMode::Inactive;
                ctx.note_commit(TxPath::Serial);
                Ok(())
            }
            ManualMode::Inactive => Err(TxAbort::Fatal(TmError::InvariantViolation(
                "tx_commit outside an active transaction",
            ))),
        }
    }

    /// Discard the in-flight transaction, if any. Idempotent: any number
    /// of consecutive calls leaves the logs empty and memory untouched.
    pub fn tx_restart(&self, ctx: &mut ThreadContext) {
        match ctx.manual {
            ManualMode::Software => {
                self.stm().restart(&mut ctx.stm);
                ctx.note_abort(AbortCategory::Explicit);
            }
            ManualMode::Serial { held_from } => {
                self.clock.release_clean(held_from);
                self.fallback.release();
                ctx.stm.clear();
                ctx.note_abort(AbortCategory::Explicit);
            }
            ManualMode::Inactive => {}
        }
        self.abort_side_effects(ctx);
        ctx.manual = ManualMode::Inactive;
    }

    /// Allocate words inside the open transaction; the allocation is kept
    /// only if it commits.
    pub fn tx_alloc(&self, ctx: &mut ThreadContext, words: usize) -> TxResult<Addr> {
        if matches!(ctx.manual, ManualMode::Inactive) {
            return Err(TxAbort::Fatal(TmError::InvariantViolation(
                "tx_alloc outside an active transaction",
            )));
        }
        match self.allocator.alloc(words) {
            Some(addr) => {
                ctx.txn_allocs.push((addr, words));
                Ok(addr)
            }
            None => Err(TxAbort::Fatal(TmError::AllocatorExhausted(words))),
        }
    }

    /// Free words inside the open transaction; deferred until commit.
    pub fn tx_free(&self, ctx: &mut ThreadContext, addr: Addr, words: usize) -> TxResult<()> {
        if matches!(ctx.manual, ManualMode::Inactive) {
            return Err(TxAbort::Fatal(TmError::InvariantViolation(
                "tx_free outside an active transaction",
            )));
        }
        ctx.deferred_frees.push((addr, words));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Attempt machinery shared by the arbiter and the manual surface.

    pub(crate) fn software_attempt<T, F>(&self, ctx: &mut ThreadContext, f: &mut F) -> TxResult<T>
    where
        F: FnMut(&mut Txn<'_, '_>) -> TxResult<T>,
    {
        self.stm().begin(&mut ctx.stm);
        ctx.txn_allocs.clear();
        ctx.deferred_frees.clear();

        let result = {
            let mut txn = Txn::software(self, ctx);
            f(&mut txn)
        };

        match result {
            Ok(out) => match self.stm().commit(&mut ctx.stm) {
                Ok(()) => {
                    self.commit_side_effects(ctx);
                    ctx.note_commit(TxPath::Software);
                    Ok(out)
                }
                Err(abort) => {
                    self.abort_side_effects(ctx);
                    Err(abort)
                }
            },
            Err(abort) => {
                self.stm().restart(&mut ctx.stm);
                self.abort_side_effects(ctx);
                Err(abort)
            }
        }
    }

    /// The union point of all degradation paths: exclusive, blocking,
    /// always succeeds unless the region itself faults. Writes are still
    /// buffered so an application-requested restart stays cheap; the
    /// flush happens under the odd counter window as usual.
    pub(crate) fn serial_attempt<T, F>(
        &self,
        ctx: &mut ThreadContext,
        f: &mut F,
    ) -> Result<T, TmError>
    where
        F: FnMut(&mut Txn<'_, '_>) -> TxResult<T>,
    {
        loop {
            self.fallback.acquire();
            ctx.note_fallback_acquisition();
            let held_from = self.clock.acquire();
            ctx.stm.clear();
            ctx.txn_allocs.clear();
            ctx.deferred_frees.clear();

            let result = {
                let mut txn = Txn::serial(self, ctx);
                f(&mut txn)
            };

            match result {
                Ok(out) => {
                    if ctx.stm.write_log.is_empty() {
                        self.clock.release_clean(held_from);
                    } else {
                        for (addr, value) in ctx.stm.write_log.iter() {
                            self.memory.store(addr, value);
                        }
                        self.clock.release_dirty(held_from);
                    }
                    self.fallback.release();
                    ctx.stm.clear();
                    self.commit_side_effects(ctx);
                    ctx.note_commit(TxPath::Serial);
                    return Ok(out);
                }
                Err(TxAbort::Restart) => {
                    self.clock.release_clean(held_from);
                    self.fallback.release();
                    ctx.stm.clear();
                    self.abort_side_effects(ctx);
                    ctx.note_abort(AbortCategory::Explicit);
                    continue;
                }
                Err(TxAbort::Conflict(_)) => {
                    self.clock.release_clean(held_from);
                    self.fallback.release();
                    ctx.stm.clear();
                    self.abort_side_effects(ctx);
                    // Nothing can conflict with an exclusive holder.
                    return Err(TmError::InvariantViolation(
                        "conflict abort on the serial path",
                    ));
                }
                Err(TxAbort::Fatal(err)) => {
                    self.clock.release_clean(held_from);
                    self.fallback.release();
                    ctx.stm.clear();
                    self.abort_side_effects(ctx);
                    return Err(err);
                }
            }
        }
    }

    fn manual_abort(&self, ctx: &mut ThreadContext, abort: &TxAbort) {
        self.stm().restart(&mut ctx.stm);
        self.abort_side_effects(ctx);
        if let TxAbort::Conflict(reason) = abort {
            ctx.note_abort(reason.category());
            ctx.consecutive_sw_aborts += 1;
        }
        ctx.manual = ManualMode::Inactive;
    }

    fn commit_side_effects(&self, ctx: &mut ThreadContext) {
        for (addr, words) in ctx.deferred_frees.drain(..) {
            self.allocator.free(addr, words);
        }
        ctx.txn_allocs.clear();
    }

    fn abort_side_effects(&self, ctx: &mut ThreadContext) {
        for (addr, words) in ctx.txn_allocs.drain(..) {
            self.allocator.free(addr, words);
        }
        ctx.deferred_frees.clear();
    }

    pub(crate) fn stm(&self) -> StmEngine<'_> {
        StmEngine {
            memory: &self.memory,
            clock: &self.clock,
        }
    }

    pub(crate) fn htm(&self) -> &dyn HardwareTm {
        self.htm.as_ref()
    }

    pub(crate) fn policy(&self) -> &dyn ArbiterPolicy {
        self.policy.as_ref()
    }

    pub(crate) fn clock(&self) -> &GlobalSeqLock {
        &self.clock
    }

    pub(crate) fn allocator(&self) -> &dyn TmAlloc {
        self.allocator.as_ref()
    }
}

fn default_backend() -> Arc<dyn HardwareTm> {
    #[cfg(all(target_arch = "x86_64", feature = "rtm"))]
    {
        let rtm = crate::htm::rtm::RtmHtm;
        if rtm.is_supported() {
            return Arc::new(rtm);
        }
    }
    Arc::new(UnsupportedHtm)
}
