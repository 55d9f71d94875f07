// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

//! Hybrid transactional memory over a word-addressable shared heap.
//!
//! Three coordinated execution paths give a transactional region
//! atomicity and isolation without programmer-managed locks:
//!
//! - a software engine using a single global sequence lock, per-thread
//!   redo/read logs and value-based validation with snapshot extension;
//! - opportunistic hardware transactions behind a capability interface,
//!   driven by a bounded-budget retry controller that classifies abort
//!   causes;
//! - a serializing fallback lock as the union point every path degrades
//!   to.
//!
//! The soundness invariant tying them together: at most one thread holds
//! exclusive semantics at a time, and both ways of being exclusive (the
//! fallback lock, a software commit's flush window) are visible through
//! the odd phase of the one counter that every hardware transaction
//! subscribes to and every software transaction validates against.
//!
//! [`TmEngine`] owns all shared state; threads attach with
//! [`TmEngine::register_thread`] and then either run whole regions
//! through [`TmEngine::execute`] or drive the per-call
//! `tx_begin`/`tx_read`/`tx_write`/`tx_commit` surface.

pub mod alloc;
pub mod arbiter;
pub mod config;
pub mod context;
pub mod counters;
pub mod engine;
pub mod errors;
pub mod fallback;
pub mod htm;
pub mod memory;
pub mod seqlock;
pub mod txn;

mod logs;
mod retry;
mod stm;

#[cfg(test)]
mod proptest_types;
#[cfg(test)]
mod unit_tests;

pub use crate::{
    alloc::{FreeListAlloc, TmAlloc},
    arbiter::{ArbiterPolicy, Decision, FixedPolicy},
    config::TmConfig,
    context::{ThreadContext, ThreadId, ThreadStats},
    engine::TmEngine,
    errors::{AbortCategory, AbortReason, TmError, TxAbort, TxResult},
    fallback::FallbackKind,
    htm::{abort_codes, probe::ProbeHtm, unsupported::UnsupportedHtm, BeginStatus, HardwareTm},
    memory::{Addr, SharedMemory, Word},
    txn::{Txn, TxPath},
};
