// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

use super::{BeginStatus, HardwareTm};
use crate::errors::AbortReason;

/// Backend for targets without transactional hardware. `begin` reports an
/// unsupported abort, which the default policy treats as persistent, so
/// every transaction takes the software path. `end`/`abort` can only be
/// reached through caller bugs and are no-ops.
pub struct UnsupportedHtm;

impl HardwareTm for UnsupportedHtm {
    fn is_supported(&self) -> bool {
        false
    }

    fn begin(&self) -> BeginStatus {
        BeginStatus::aborted(AbortReason::unsupported())
    }

    fn end(&self) {
        debug_assert!(false, "no hardware transaction can be live");
    }

    fn abort(&self, _code: u8) {}

    fn in_transaction(&self) -> bool {
        false
    }
}
