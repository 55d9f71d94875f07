// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

//! Mode arbitration: which of the three paths (hardware, software,
//! serializing fallback) a transaction runs on, and when it demotes.

use crate::{
    config::TmConfig,
    context::ThreadContext,
    engine::TmEngine,
    errors::{AbortCategory, AbortReason, TmError, TxAbort, TxResult},
    retry::{self, PhaseOutcome},
    txn::{Txn, TxPath},
};
use tracing::debug;

/// What to do after an aborted attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Try the hardware path again.
    RetryHardware,
    /// Run (or keep running) on the software path.
    Software,
    /// Take the serializing fallback lock and run exclusively.
    Serialize,
}

/// Pluggable mode-selection policy. The arbiter tracks the per-thread
/// counters (budget, consecutive aborts) and asks the policy what to do
/// with them; the policy holds no per-transaction state itself.
pub trait ArbiterPolicy: Send + Sync {
    /// Retry budget installed at the start of each attempt cycle.
    fn initial_budget(&self) -> u32;

    /// Whether to open the cycle with hardware attempts at all.
    fn attempt_hardware(&self, hardware_supported: bool, read_only: bool) -> bool {
        let _ = read_only;
        hardware_supported
    }

    /// Decide after a hardware abort. `budget_remaining` has already been
    /// decremented for this abort.
    fn on_hardware_abort(
        &self,
        reason: AbortReason,
        consecutive_capacity: u32,
        budget_remaining: u32,
    ) -> Decision;

    /// Decide after a software validation abort.
    fn on_software_abort(&self, consecutive_aborts: u32) -> Decision;

    /// Whether this many consecutive capacity aborts means the region will
    /// never fit in hardware buffering.
    fn capacity_is_persistent(&self, consecutive_capacity: u32) -> bool;
}

/// Default policy with fixed thresholds from [`TmConfig`]: hardware until
/// the budget runs dry (then serialize), permanent software demotion for
/// persistently-overflowing regions, serialization after a run of
/// software aborts.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy {
    pub retry_budget: u32,
    pub software_abort_cap: u32,
    pub capacity_abort_cap: u32,
}

impl FixedPolicy {
    pub fn from_config(config: &TmConfig) -> Self {
        Self {
            retry_budget: config.retry_budget,
            software_abort_cap: config.software_abort_cap,
            capacity_abort_cap: config.capacity_abort_cap,
        }
    }
}

impl ArbiterPolicy for FixedPolicy {
    fn initial_budget(&self) -> u32 {
        self.retry_budget
    }

    fn on_hardware_abort(
        &self,
        reason: AbortReason,
        consecutive_capacity: u32,
        budget_remaining: u32,
    ) -> Decision {
        // Retrying is known futile: the hardware could not even classify
        // the abort, or cannot run transactions at all.
        if reason.is_unsupported() || reason.is_unspecified() {
            return Decision::Serialize;
        }
        if reason.is_capacity() && self.capacity_is_persistent(consecutive_capacity) {
            return Decision::Software;
        }
        if budget_remaining == 0 {
            return Decision::Serialize;
        }
        Decision::RetryHardware
    }

    fn on_software_abort(&self, consecutive_aborts: u32) -> Decision {
        if consecutive_aborts >= self.software_abort_cap {
            Decision::Serialize
        } else {
            Decision::Software
        }
    }

    fn capacity_is_persistent(&self, consecutive_capacity: u32) -> bool {
        consecutive_capacity >= self.capacity_abort_cap
    }
}

/// Run one logical transaction to completion: hardware attempts first
/// (budgeted), then software retries, then the serializing fallback.
/// Transient aborts never escape; only fatal faults do.
pub(crate) fn run<T, F>(
    engine: &TmEngine,
    ctx: &mut ThreadContext,
    read_only: bool,
    mut f: F,
) -> Result<T, TmError>
where
    F: FnMut(&mut Txn<'_, '_>) -> TxResult<T>,
{
    ctx.begin_cycle(engine.policy().initial_budget(), read_only);

    let mut target = if engine
        .policy()
        .attempt_hardware(engine.htm().is_supported(), read_only)
    {
        TxPath::Hardware
    } else {
        TxPath::Software
    };

    if target == TxPath::Hardware {
        match retry::run_hardware_phase(engine, ctx, &mut f) {
            PhaseOutcome::Committed(out) => return Ok(out),
            PhaseOutcome::Fatal(err) => return Err(err),
            PhaseOutcome::Degraded(next) => {
                debug!(thread = ctx.id(), to = next.label(), "hardware phase degraded");
                target = next;
            }
        }
    }

    if target == TxPath::Software {
        loop {
            match engine.software_attempt(ctx, &mut f) {
                Ok(out) => return Ok(out),
                Err(TxAbort::Fatal(err)) => return Err(err),
                Err(TxAbort::Restart) => {
                    // Application-requested; honored immediately without
                    // advancing the demotion counter.
                    ctx.note_abort(AbortCategory::Explicit);
                    continue;
                }
                Err(TxAbort::Conflict(reason)) => {
                    ctx.note_abort(reason.category());
                    ctx.consecutive_sw_aborts += 1;
                    match engine.policy().on_software_abort(ctx.consecutive_sw_aborts) {
                        Decision::Serialize => {
                            debug!(thread = ctx.id(), "software phase degraded to fallback");
                            break;
                        }
                        Decision::Software | Decision::RetryHardware => continue,
                    }
                }
            }
        }
    }

    engine.serial_attempt(ctx, &mut f)
}
