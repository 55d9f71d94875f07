// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{context::ThreadStats, errors::AbortCategory, txn::TxPath};
use once_cell::sync::Lazy;
use seqtm_metrics::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

pub static COMMITTED_TXNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seqtm_committed_txns",
        "Committed transactions by execution path",
        &["path"]
    )
    .unwrap()
});

pub static ABORTED_TXNS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "seqtm_aborted_txns",
        "Aborted transaction attempts by abort category",
        &["category"]
    )
    .unwrap()
});

pub static HARDWARE_ATTEMPTS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seqtm_hardware_attempts",
        "Hardware transaction attempts, including aborted ones"
    )
    .unwrap()
});

pub static FALLBACK_ACQUISITIONS: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "seqtm_fallback_acquisitions",
        "Times the serializing fallback lock was taken"
    )
    .unwrap()
});

/// Fold one retired thread's tallies into the exported counters. Hot
/// paths only touch the per-thread fields; this runs at thread exit.
pub(crate) fn flush_thread_stats(stats: &ThreadStats) {
    for path in [TxPath::Hardware, TxPath::Software, TxPath::Serial] {
        let commits = stats.commits(path);
        if commits > 0 {
            COMMITTED_TXNS
                .with_label_values(&[path.label()])
                .inc_by(commits);
        }
    }
    for category in AbortCategory::ALL {
        let aborts = stats.aborts(category);
        if aborts > 0 {
            ABORTED_TXNS
                .with_label_values(&[category.label()])
                .inc_by(aborts);
        }
    }
    HARDWARE_ATTEMPTS.inc_by(stats.hardware_attempts());
    FALLBACK_ACQUISITIONS.inc_by(stats.fallback_acquisitions());
}
