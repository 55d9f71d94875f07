// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

//! Bounded-budget hardware attempt loop with abort classification and
//! graceful degradation.

use crate::{
    arbiter::Decision,
    context::ThreadContext,
    engine::TmEngine,
    errors::{AbortReason, TmError, TxAbort, TxResult},
    htm::abort_codes,
    txn::{Txn, TxPath},
};
use tracing::error;

/// Result of the hardware phase of an attempt cycle.
pub(crate) enum PhaseOutcome<T> {
    Committed(T),
    /// The phase gave up; continue on the given path.
    Degraded(TxPath),
    Fatal(TmError),
}

enum HwAttempt<T> {
    Committed(T),
    Aborted(AbortReason),
    Fatal(TmError),
}

/// Run hardware attempts until one commits, the policy degrades the
/// transaction, or a fatal fault surfaces. Budget exhaustion is scheduled
/// degradation, not an error.
pub(crate) fn run_hardware_phase<T, F>(
    engine: &TmEngine,
    ctx: &mut ThreadContext,
    f: &mut F,
) -> PhaseOutcome<T>
where
    F: FnMut(&mut Txn<'_, '_>) -> TxResult<T>,
{
    loop {
        // A transaction started while an exclusive holder is active is
        // doomed; wait outside the transaction instead of burning an
        // attempt on it.
        wait_until_quiescent(engine);

        ctx.note_hardware_attempt();
        match attempt(engine, ctx, f) {
            HwAttempt::Committed(out) => {
                ctx.note_commit(TxPath::Hardware);
                return PhaseOutcome::Committed(out);
            }
            HwAttempt::Fatal(err) => {
                error!(thread = ctx.id(), %err, "fatal fault inside hardware transaction");
                return PhaseOutcome::Fatal(err);
            }
            HwAttempt::Aborted(reason) => {
                ctx.note_hardware_abort(reason);

                if reason.is_explicit() {
                    match reason.explicit_code() {
                        // Application-requested restart: honored
                        // immediately, budget untouched.
                        abort_codes::USER_RESTART => continue,
                        abort_codes::NEEDS_SOFTWARE => {
                            return PhaseOutcome::Degraded(TxPath::Software)
                        }
                        abort_codes::UNSUPPORTED_OP => {
                            return PhaseOutcome::Fatal(TmError::IllegalOperation(
                                abort_codes::UNSUPPORTED_OP,
                            ))
                        }
                        // CLOCK_HELD and application codes take the
                        // ordinary classification path below.
                        _ => {}
                    }
                }

                ctx.budget = ctx.budget.saturating_sub(1);
                match engine
                    .policy()
                    .on_hardware_abort(reason, ctx.consecutive_capacity, ctx.budget)
                {
                    Decision::RetryHardware => continue,
                    Decision::Software => return PhaseOutcome::Degraded(TxPath::Software),
                    Decision::Serialize => return PhaseOutcome::Degraded(TxPath::Serial),
                }
            }
        }
    }
}

/// One hardware attempt: begin, subscribe to the global counter, run the
/// region, publish. On real hardware any abort rewinds control to the
/// `begin` call, which then reports the abort status; the emulated
/// backends return from `abort` instead, so both exits are handled.
fn attempt<T, F>(engine: &TmEngine, ctx: &mut ThreadContext, f: &mut F) -> HwAttempt<T>
where
    F: FnMut(&mut Txn<'_, '_>) -> TxResult<T>,
{
    let htm = engine.htm();

    let status = htm.begin();
    if !status.started() {
        return HwAttempt::Aborted(status.reason());
    }

    // Reading the counter here puts it into the transaction's read set:
    // any exclusive acquisition from now on conflicts us out, which is
    // what keeps hardware commits disjoint from software commit windows
    // and fallback sections.
    if engine.clock().write_locked() {
        htm.abort(abort_codes::CLOCK_HELD);
        return HwAttempt::Aborted(AbortReason::explicit(abort_codes::CLOCK_HELD));
    }

    let mut txn = Txn::hardware(engine, ctx);
    let result = f(&mut txn);
    let wrote = txn.performed_direct_writes();

    match result {
        Ok(out) => {
            if wrote {
                // Advance the counter inside the transaction so software
                // snapshots revalidate against our writes.
                engine.clock().bump_within_txn();
            }
            htm.end();
            HwAttempt::Committed(out)
        }
        Err(abort) => {
            let code = match &abort {
                TxAbort::Restart => abort_codes::USER_RESTART,
                TxAbort::Conflict(reason) if reason.is_explicit() => reason.explicit_code(),
                TxAbort::Conflict(_) => 0,
                TxAbort::Fatal(_) => abort_codes::UNSUPPORTED_OP,
            };
            htm.abort(code);
            // Reached only with an emulated backend.
            match abort {
                TxAbort::Restart => {
                    HwAttempt::Aborted(AbortReason::explicit(abort_codes::USER_RESTART))
                }
                TxAbort::Conflict(reason) => HwAttempt::Aborted(reason),
                TxAbort::Fatal(err) => HwAttempt::Fatal(err),
            }
        }
    }
}

fn wait_until_quiescent(engine: &TmEngine) {
    while engine.fallback_locked() || engine.clock().write_locked() {
        std::hint::spin_loop();
    }
}
