// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Which mutual-exclusion primitive serializes the fallback path. Chosen
/// at engine construction, not per call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackKind {
    /// Test-and-test-and-set spin lock.
    Spin,
    /// FIFO ticket lock; fair under heavy fallback traffic.
    Ticket,
}

/// The serializing fallback lock. Holding it grants the right to park the
/// global sequence counter odd and execute non-transactionally; the lock
/// itself only arbitrates among fallback contenders, while visibility to
/// the hardware and software paths flows through the counter. `is_locked`
/// is exposed so hardware attempts can avoid entering doomed transactions
/// while a fallback holder is active.
pub(crate) enum FallbackLock {
    Spin {
        locked: CachePadded<AtomicBool>,
    },
    Ticket {
        next: CachePadded<AtomicU64>,
        serving: CachePadded<AtomicU64>,
    },
}

impl FallbackLock {
    pub fn new(kind: FallbackKind) -> Self {
        match kind {
            FallbackKind::Spin => FallbackLock::Spin {
                locked: CachePadded::new(AtomicBool::new(false)),
            },
            FallbackKind::Ticket => FallbackLock::Ticket {
                next: CachePadded::new(AtomicU64::new(0)),
                serving: CachePadded::new(AtomicU64::new(0)),
            },
        }
    }

    pub fn kind(&self) -> FallbackKind {
        match self {
            FallbackLock::Spin { .. } => FallbackKind::Spin,
            FallbackLock::Ticket { .. } => FallbackKind::Ticket,
        }
    }

    pub fn acquire(&self) {
        match self {
            FallbackLock::Spin { locked } => loop {
                if !locked.load(Ordering::Relaxed)
                    && locked
                        .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                        .is_ok()
                {
                    return;
                }
                std::hint::spin_loop();
            },
            FallbackLock::Ticket { next, serving } => {
                let ticket = next.fetch_add(1, Ordering::Relaxed);
                while serving.load(Ordering::Acquire) != ticket {
                    std::hint::spin_loop();
                }
            }
        }
    }

    pub fn release(&self) {
        match self {
            FallbackLock::Spin { locked } => locked.store(false, Ordering::Release),
            FallbackLock::Ticket { next: _, serving } => {
                let current = serving.load(Ordering::Relaxed);
                serving.store(current + 1, Ordering::Release);
            }
        }
    }

    pub fn is_locked(&self) -> bool {
        match self {
            FallbackLock::Spin { locked } => locked.load(Ordering::Acquire),
            FallbackLock::Ticket { next, serving } => {
                serving.load(Ordering::Acquire) != next.load(Ordering::Acquire)
            }
        }
    }
}
