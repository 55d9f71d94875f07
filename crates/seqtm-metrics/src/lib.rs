// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

// Re-export counter types from prometheus crate so downstream crates
// depend on one metrics surface.
pub use prometheus::{
    gather, register_int_counter, register_int_counter_vec, register_int_gauge, Encoder,
    IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
