// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{
    errors::{AbortCategory, AbortReason, TmError, TxAbort},
    htm::{abort_codes, probe::ProbeHtm, BeginStatus},
    stm::StmState,
    txn::TxPath,
    FallbackKind, FreeListAlloc, TmConfig, TmEngine,
};
use claims::{assert_err, assert_ok};
use std::{sync::Arc, time::Duration};

fn small_config() -> TmConfig {
    TmConfig {
        heap_words: 64,
        ..Default::default()
    }
}

/// Engine whose hardware backend never starts, so every transaction runs
/// the software (or fallback) path.
fn software_engine() -> TmEngine {
    TmEngine::new(small_config())
}

fn probe_engine(probe: Arc<ProbeHtm>, mutate: impl FnOnce(&mut TmConfig)) -> TmEngine {
    let mut config = small_config();
    config.htm = Some(probe);
    mutate(&mut config);
    TmEngine::new(config)
}

#[test]
fn read_your_writes_before_commit() {
    let engine = software_engine();
    let mut ctx = engine.register_thread();

    engine.tx_begin(&mut ctx, false);
    assert_ok!(engine.tx_write(&mut ctx, 3, 5));
    assert_eq!(engine.tx_read(&mut ctx, 3).unwrap(), 5);
    // A reader outside the transaction still observes the pre-commit value.
    assert_eq!(engine.memory().peek(3), 0);

    assert_ok!(engine.tx_commit(&mut ctx));
    assert_eq!(engine.memory().peek(3), 5);

    engine.unregister_thread(ctx);
}

#[test]
fn read_only_commit_is_trivial() {
    let engine = software_engine();
    let mut ctx = engine.register_thread();
    let clock_before = engine.clock().load();

    engine.tx_begin(&mut ctx, true);
    assert_eq!(engine.tx_read(&mut ctx, 0).unwrap(), 0);
    assert_ok!(engine.tx_commit(&mut ctx));

    // No writer acquired the counter.
    assert_eq!(engine.clock().load(), clock_before);
    assert_eq!(ctx.stats().commits(TxPath::Software), 1);
    engine.unregister_thread(ctx);
}

#[test]
fn snapshot_extension_advances_unaffected_reader() {
    let engine = software_engine();
    let stm = engine.stm();
    let mut reader = StmState::default();
    let mut writer = StmState::default();

    stm.begin(&mut reader);
    assert_eq!(stm.read(&mut reader, 0).unwrap(), 0);
    let snapshot_before = reader.start_time;

    // A disjoint commit moves the counter.
    stm.begin(&mut writer);
    stm.write(&mut writer, 9, 1);
    assert_ok!(stm.commit(&mut writer));

    // The next read revalidates the (unaffected) read set and extends.
    assert_eq!(stm.read(&mut reader, 1).unwrap(), 0);
    assert!(reader.start_time > snapshot_before);
    assert_ok!(stm.commit(&mut reader));
}

#[test]
fn validation_aborts_stale_reader() {
    let engine = software_engine();
    let mut a = engine.register_thread();
    let mut b = engine.register_thread();

    engine.tx_begin(&mut a, false);
    assert_eq!(engine.tx_read(&mut a, 0).unwrap(), 0);

    // B overwrites the word A has read.
    engine.tx_begin(&mut b, false);
    assert_ok!(engine.tx_write(&mut b, 0, 1));
    assert_ok!(engine.tx_commit(&mut b));

    // A's next read forces revalidation, which must fail.
    match engine.tx_read(&mut a, 1) {
        Err(TxAbort::Conflict(reason)) => assert!(reason.is_validation()),
        other => panic!("expected a validation abort, got {:?}", other),
    }
    assert_eq!(a.stats().aborts(AbortCategory::Validation), 1);

    engine.unregister_thread(a);
    engine.unregister_thread(b);
}

#[test]
fn commit_validation_catches_interleaved_writer() {
    let engine = software_engine();
    let mut a = engine.register_thread();
    let mut b = engine.register_thread();

    engine.tx_begin(&mut a, false);
    assert_eq!(engine.tx_read(&mut a, 0).unwrap(), 0);
    assert_ok!(engine.tx_write(&mut a, 1, 7));

    engine.tx_begin(&mut b, false);
    assert_ok!(engine.tx_write(&mut b, 0, 1));
    assert_ok!(engine.tx_commit(&mut b));

    // A must not commit a write that depended on the stale read of 0.
    assert_err!(engine.tx_commit(&mut a));
    assert_eq!(engine.memory().peek(1), 0);

    engine.unregister_thread(a);
    engine.unregister_thread(b);
}

#[test]
fn concurrent_counter_increments_lose_no_updates() {
    const THREADS: usize = 8;
    const INCREMENTS: u64 = 1_000;

    let engine = software_engine();
    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut ctx = engine.register_thread();
                for _ in 0..INCREMENTS {
                    engine
                        .execute(&mut ctx, false, |txn| {
                            let v = txn.read(0)?;
                            txn.write(0, v + 1)
                        })
                        .unwrap();
                }
                engine.unregister_thread(ctx);
            });
        }
    });

    assert_eq!(engine.memory().peek(0), THREADS as u64 * INCREMENTS);
    assert_eq!(
        engine.retired_stats().total_commits(),
        THREADS as u64 * INCREMENTS
    );
}

#[test]
fn manual_surface_loses_no_updates_under_contention() {
    const THREADS: usize = 4;
    const INCREMENTS: u64 = 500;

    let engine = software_engine();
    std::thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut ctx = engine.register_thread();
                for _ in 0..INCREMENTS {
                    loop {
                        engine.tx_begin(&mut ctx, false);
                        let value = match engine.tx_read(&mut ctx, 0) {
                            Ok(value) => value,
                            Err(_) => continue,
                        };
                        if engine.tx_write(&mut ctx, 0, value + 1).is_err() {
                            continue;
                        }
                        if engine.tx_commit(&mut ctx).is_ok() {
                            break;
                        }
                    }
                }
                engine.unregister_thread(ctx);
            });
        }
    });

    assert_eq!(engine.memory().peek(0), THREADS as u64 * INCREMENTS);
}

#[test]
fn fallback_holder_is_isolated_from_transactions() {
    let engine = software_engine();

    std::thread::scope(|s| {
        s.spawn(|| {
            let mut ctx = engine.register_thread();
            engine
                .serial_attempt(&mut ctx, &mut |txn| {
                    txn.write(0, 1)?;
                    // Keep the exclusive window open for a while with the
                    // pair half-written in the redo log.
                    std::thread::sleep(Duration::from_millis(40));
                    txn.write(1, 1)
                })
                .unwrap();
            engine.unregister_thread(ctx);
        });

        for _ in 0..3 {
            s.spawn(|| {
                let mut ctx = engine.register_thread();
                for _ in 0..200 {
                    let pair = engine
                        .execute(&mut ctx, true, |txn| Ok((txn.read(0)?, txn.read(1)?)))
                        .unwrap();
                    // Both words flip together or not at all; no commit
                    // can overlap the fallback window.
                    assert_eq!(pair.0, pair.1);
                }
                engine.unregister_thread(ctx);
            });
        }
    });

    assert_eq!(engine.memory().peek(0), 1);
    assert_eq!(engine.memory().peek(1), 1);
}

#[test]
fn budget_exhaustion_degrades_to_fallback() {
    const BUDGET: u32 = 4;
    let probe = Arc::new(ProbeHtm::with_script(
        (0..BUDGET).map(|_| BeginStatus::aborted(AbortReason::conflict())),
    ));
    let engine = probe_engine(probe.clone(), |config| config.retry_budget = BUDGET);
    let mut ctx = engine.register_thread();

    engine
        .execute(&mut ctx, false, |txn| {
            let v = txn.read(0)?;
            txn.write(0, v + 1)
        })
        .unwrap();

    // Exactly K hardware attempts, then the K+1th ran serialized.
    assert_eq!(probe.begins(), BUDGET as u64);
    assert_eq!(ctx.stats().hardware_attempts(), BUDGET as u64);
    assert_eq!(ctx.stats().commits(TxPath::Hardware), 0);
    assert_eq!(ctx.stats().commits(TxPath::Serial), 1);
    assert_eq!(ctx.stats().fallback_acquisitions(), 1);
    assert_eq!(engine.memory().peek(0), 1);
    engine.unregister_thread(ctx);
}

#[test]
fn persistent_capacity_demotes_to_software() {
    let probe = Arc::new(ProbeHtm::with_script([
        BeginStatus::aborted(AbortReason::capacity()),
        BeginStatus::aborted(AbortReason::capacity()),
    ]));
    let engine = probe_engine(probe.clone(), |config| config.capacity_abort_cap = 2);
    let mut ctx = engine.register_thread();

    engine
        .execute(&mut ctx, false, |txn| {
            let v = txn.read(0)?;
            txn.write(0, v + 1)
        })
        .unwrap();

    assert_eq!(probe.begins(), 2);
    assert_eq!(ctx.stats().aborts(AbortCategory::Capacity), 2);
    assert_eq!(ctx.stats().commits(TxPath::Software), 1);
    assert_eq!(ctx.stats().fallback_acquisitions(), 0);
    engine.unregister_thread(ctx);
}

#[test]
fn unclassified_hardware_abort_serializes_immediately() {
    let probe = Arc::new(ProbeHtm::with_script([BeginStatus::from_raw(0)]));
    let engine = probe_engine(probe.clone(), |_| {});
    let mut ctx = engine.register_thread();

    engine
        .execute(&mut ctx, false, |txn| txn.write(2, 9))
        .unwrap();

    // One doomed attempt, no software retries, straight to fallback.
    assert_eq!(probe.begins(), 1);
    assert_eq!(ctx.stats().commits(TxPath::Serial), 1);
    assert_eq!(engine.memory().peek(2), 9);
    engine.unregister_thread(ctx);
}

#[test]
fn illegal_operation_is_fatal() {
    let probe = Arc::new(ProbeHtm::with_script([BeginStatus::aborted(
        AbortReason::explicit(abort_codes::UNSUPPORTED_OP),
    )]));
    let engine = probe_engine(probe, |_| {});
    let mut ctx = engine.register_thread();

    let result = engine.execute(&mut ctx, false, |txn| txn.write(0, 1));
    assert_eq!(
        result,
        Err(TmError::IllegalOperation(abort_codes::UNSUPPORTED_OP))
    );
    // Nothing committed.
    assert_eq!(engine.memory().peek(0), 0);
    assert_eq!(ctx.stats().total_commits(), 0);
    engine.unregister_thread(ctx);
}

#[test]
fn explicit_restart_is_honored_without_consuming_budget() {
    let probe = Arc::new(ProbeHtm::new());
    let engine = probe_engine(probe.clone(), |config| config.retry_budget = 1);
    let mut ctx = engine.register_thread();

    let mut calls = 0u32;
    engine
        .execute(&mut ctx, false, |txn| {
            calls += 1;
            if calls == 1 {
                return txn.restart();
            }
            let v = txn.read(0)?;
            txn.write(0, v + 1)
        })
        .unwrap();

    // The restart did not count against the single-attempt budget: the
    // second attempt still ran (and committed) in hardware.
    assert_eq!(calls, 2);
    assert_eq!(probe.begins(), 2);
    assert_eq!(probe.aborts(), 1);
    assert_eq!(ctx.stats().commits(TxPath::Hardware), 1);
    assert_eq!(ctx.stats().aborts(AbortCategory::Explicit), 1);
    engine.unregister_thread(ctx);
}

#[test]
fn hardware_commit_with_writes_advances_the_clock() {
    let probe = Arc::new(ProbeHtm::new());
    let engine = probe_engine(probe.clone(), |_| {});
    let mut ctx = engine.register_thread();

    let before = engine.clock().load();
    engine
        .execute(&mut ctx, false, |txn| txn.write(0, 1))
        .unwrap();
    // Writers bump by 2 so software snapshots revalidate.
    assert_eq!(engine.clock().load(), before + 2);

    let before = engine.clock().load();
    engine.execute(&mut ctx, true, |txn| txn.read(0)).unwrap();
    // Read-only hardware commits leave the counter alone.
    assert_eq!(engine.clock().load(), before);
    assert_eq!(probe.commits(), 2);
    engine.unregister_thread(ctx);
}

#[test]
fn allocation_diverts_hardware_to_software() {
    let allocator = Arc::new(FreeListAlloc::new(8, 56));
    let probe = Arc::new(ProbeHtm::new());
    let engine = probe_engine(probe.clone(), |config| {
        config.allocator = Some(allocator.clone())
    });
    let mut ctx = engine.register_thread();

    let addr = engine
        .execute(&mut ctx, false, |txn| {
            let addr = txn.alloc(2)?;
            txn.write(addr, 9)?;
            Ok(addr)
        })
        .unwrap();

    // One hardware attempt aborted itself, the commit happened in software.
    assert_eq!(probe.begins(), 1);
    assert_eq!(probe.aborts(), 1);
    assert_eq!(ctx.stats().commits(TxPath::Software), 1);
    assert_eq!(engine.memory().peek(addr), 9);
    assert_eq!(allocator.free_words(), 54);
    engine.unregister_thread(ctx);
}

#[test]
fn deferred_frees_apply_on_commit_and_allocs_roll_back_on_abort() {
    let allocator = Arc::new(FreeListAlloc::new(0, 64));
    let mut config = small_config();
    config.allocator = Some(allocator.clone());
    let engine = TmEngine::new(config);
    let mut ctx = engine.register_thread();

    let addr = engine.execute(&mut ctx, false, |txn| txn.alloc(4)).unwrap();
    assert_eq!(allocator.free_words(), 60);

    // The free lands only when the transaction commits.
    engine
        .execute(&mut ctx, false, |txn| txn.free(addr, 4))
        .unwrap();
    assert_eq!(allocator.free_words(), 64);

    // An allocation made by a restarted attempt is handed back.
    let mut calls = 0u32;
    engine
        .execute(&mut ctx, false, |txn| {
            calls += 1;
            if calls == 1 {
                txn.alloc(8)?;
                return txn.restart();
            }
            Ok(())
        })
        .unwrap();
    assert_eq!(allocator.free_words(), 64);
    engine.unregister_thread(ctx);
}

#[test]
fn restart_is_idempotent() {
    let engine = software_engine();
    let mut ctx = engine.register_thread();

    // Restart with no transaction in flight is a no-op.
    engine.tx_restart(&mut ctx);

    engine.tx_begin(&mut ctx, false);
    assert_ok!(engine.tx_write(&mut ctx, 0, 3));
    for _ in 0..4 {
        engine.tx_restart(&mut ctx);
    }

    assert_eq!(engine.memory().peek(0), 0);
    assert!(ctx.stm.write_log.is_empty());
    assert!(ctx.stm.read_log.is_empty());
    // Only the restart that discarded a live transaction is tallied.
    assert_eq!(ctx.stats().aborts(AbortCategory::Explicit), 1);

    // The context is reusable afterwards.
    engine.tx_begin(&mut ctx, false);
    assert_ok!(engine.tx_write(&mut ctx, 0, 4));
    assert_ok!(engine.tx_commit(&mut ctx));
    assert_eq!(engine.memory().peek(0), 4);
    engine.unregister_thread(ctx);
}

#[test]
fn operations_outside_a_transaction_are_invariant_violations() {
    let engine = software_engine();
    let mut ctx = engine.register_thread();

    assert!(matches!(
        engine.tx_read(&mut ctx, 0),
        Err(TxAbort::Fatal(TmError::InvariantViolation(_)))
    ));
    assert!(matches!(
        engine.tx_commit(&mut ctx),
        Err(TxAbort::Fatal(TmError::InvariantViolation(_)))
    ));
    engine.unregister_thread(ctx);
}

#[test]
fn repeated_software_aborts_serialize_the_manual_surface() {
    let mut config = small_config();
    config.software_abort_cap = 2;
    let engine = TmEngine::new(config);
    let mut a = engine.register_thread();
    let mut b = engine.register_thread();

    for round in 0..2 {
        engine.tx_begin(&mut a, false);
        let value = engine.tx_read(&mut a, 0).unwrap();
        assert_ok!(engine.tx_write(&mut a, 0, value + 1));

        // A conflicting commit lands before A's.
        engine.tx_begin(&mut b, false);
        assert_ok!(engine.tx_write(&mut b, 0, 100 + round));
        assert_ok!(engine.tx_commit(&mut b));

        assert_err!(engine.tx_commit(&mut a));
    }

    // The policy now serializes A's next transaction.
    engine.tx_begin(&mut a, false);
    assert!(engine.fallback_locked());
    let value = engine.tx_read(&mut a, 0).unwrap();
    assert_ok!(engine.tx_write(&mut a, 0, value + 1));
    assert_ok!(engine.tx_commit(&mut a));
    assert!(!engine.fallback_locked());

    assert_eq!(a.stats().commits(TxPath::Serial), 1);
    assert_eq!(engine.memory().peek(0), 102);
    engine.unregister_thread(a);
    engine.unregister_thread(b);
}

#[test]
fn ticket_fallback_serializes_like_the_spin_lock() {
    let mut config = small_config();
    config.fallback = FallbackKind::Ticket;
    let engine = TmEngine::new(config);
    assert_eq!(engine.fallback_kind(), FallbackKind::Ticket);

    let mut ctx = engine.register_thread();
    engine
        .serial_attempt(&mut ctx, &mut |txn| {
            let v = txn.read(5)?;
            txn.write(5, v + 40)
        })
        .unwrap();
    assert_eq!(engine.memory().peek(5), 40);
    assert_eq!(ctx.stats().commits(TxPath::Serial), 1);
    assert!(!engine.fallback_locked());
    engine.unregister_thread(ctx);
}

#[test]
fn serial_restart_discards_buffered_writes() {
    let engine = software_engine();
    let mut ctx = engine.register_thread();

    let mut calls = 0u32;
    engine
        .serial_attempt(&mut ctx, &mut |txn| {
            calls += 1;
            txn.write(0, 99)?;
            if calls == 1 {
                return txn.restart();
            }
            Ok(())
        })
        .unwrap();

    assert_eq!(calls, 2);
    assert_eq!(engine.memory().peek(0), 99);
    assert_eq!(ctx.stats().aborts(AbortCategory::Explicit), 1);
    assert_eq!(ctx.stats().fallback_acquisitions(), 2);
    engine.unregister_thread(ctx);
}
