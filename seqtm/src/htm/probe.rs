// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use super::{BeginStatus, HardwareTm};
use seqtm_infallible::Mutex;
use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
};

/// Deterministic test backend. Each `begin` pops the next scripted status;
/// an exhausted script starts the transaction. Started sections are made
/// mutually exclusive among probe users with an internal flag so they
/// still execute atomically with respect to each other.
///
/// Unlike real hardware, an abort after a successful `begin` cannot rewind
/// control, so scripted aborts happen only at `begin`; an `abort` call on
/// a live emulated section simply releases it and returns, and the caller
/// treats the attempt as aborted (see [`HardwareTm::abort`]).
pub struct ProbeHtm {
    script: Mutex<VecDeque<BeginStatus>>,
    section: AtomicBool,
    begins: AtomicU64,
    commits: AtomicU64,
    aborts: AtomicU64,
}

impl ProbeHtm {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            section: AtomicBool::new(false),
            begins: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            aborts: AtomicU64::new(0),
        }
    }

    pub fn with_script(outcomes: impl IntoIterator<Item = BeginStatus>) -> Self {
        let probe = Self::new();
        probe.script.lock().extend(outcomes);
        probe
    }

    pub fn push_outcome(&self, outcome: BeginStatus) {
        self.script.lock().push_back(outcome);
    }

    /// Number of `begin` calls observed, i.e. hardware attempts.
    pub fn begins(&self) -> u64 {
        self.begins.load(Ordering::Relaxed)
    }

    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    pub fn aborts(&self) -> u64 {
        self.aborts.load(Ordering::Relaxed)
    }
}

impl Default for ProbeHtm {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareTm for ProbeHtm {
    fn is_supported(&self) -> bool {
        true
    }

    fn begin(&self) -> BeginStatus {
        self.begins.fetch_add(1, Ordering::Relaxed);
        if let Some(scripted) = self.script.lock().pop_front() {
            if !scripted.started() {
                return scripted;
            }
        }
        while self
            .section
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            std::hint::spin_loop();
        }
        BeginStatus::STARTED
    }

    fn end(&self) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.section.store(false, Ordering::Release);
    }

    fn abort(&self, _code: u8) {
        self.aborts.fetch_add(1, Ordering::Relaxed);
        self.section.store(false, Ordering::Release);
    }

    fn in_transaction(&self) -> bool {
        self.section.load(Ordering::Relaxed)
    }
}
