// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use crate::{alloc::TmAlloc, arbiter::ArbiterPolicy, fallback::FallbackKind, htm::HardwareTm};
use std::sync::Arc;

/// Init-time engine configuration. None of these parameters can change
/// after [`crate::TmEngine::new`]; the per-call API carries no tuning
/// knobs.
#[derive(Clone)]
pub struct TmConfig {
    /// Size of the shared word heap.
    pub heap_words: usize,
    /// Hardware attempts permitted per transaction before degradation.
    pub retry_budget: u32,
    /// Consecutive software aborts before the fallback path is taken.
    pub software_abort_cap: u32,
    /// Consecutive hardware capacity aborts before the region is deemed
    /// too large for hardware buffering.
    pub capacity_abort_cap: u32,
    /// Serializing-lock primitive for the fallback path.
    pub fallback: FallbackKind,
    /// Policy override; defaults to [`crate::FixedPolicy`] built from the
    /// thresholds above.
    pub policy: Option<Arc<dyn ArbiterPolicy>>,
    /// Hardware backend override, used by tests to script abort patterns.
    /// Defaults to RTM when compiled in and detected, otherwise to the
    /// unsupported stub.
    pub htm: Option<Arc<dyn HardwareTm>>,
    /// Allocator override; defaults to a first-fit free list spanning the
    /// whole heap.
    pub allocator: Option<Arc<dyn TmAlloc>>,
}

impl Default for TmConfig {
    fn default() -> Self {
        Self {
            heap_words: 1 << 20,
            retry_budget: 8,
            software_abort_cap: 8,
            capacity_abort_cap: 2,
            fallback: FallbackKind::Spin,
            policy: None,
            htm: None,
            allocator: None,
        }
    }
}

impl std::fmt::Debug for TmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TmConfig")
            .field("heap_words", &self.heap_words)
            .field("retry_budget", &self.retry_budget)
            .field("software_abort_cap", &self.software_abort_cap)
            .field("capacity_abort_cap", &self.capacity_abort_cap)
            .field("fallback", &self.fallback)
            .field("policy", &self.policy.as_ref().map(|_| "<custom>"))
            .field("htm", &self.htm.as_ref().map(|_| "<custom>"))
            .field("allocator", &self.allocator.as_ref().map(|_| "<custom>"))
            .finish()
    }
}
