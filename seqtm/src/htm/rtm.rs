// Copyright (c) seqtm
// SPDX-License-Identifier: Apache-2.0

//! x86-64 Restricted Transactional Memory backend.
//!
//! Status decoding follows the Intel layout: bit 0 explicit abort (code in
//! bits 24..32), bit 1 retry possible, bit 2 conflict, bit 3 capacity,
//! bit 4 debug trap, bit 5 nested abort. A status of `!0` means the
//! transaction started. [`crate::AbortReason`] uses the same layout, so
//! statuses pass through unchanged.
//!
//! `xbegin` behaves like setjmp: it returns once with `STARTED`, and again
//! with the abort status when the hardware rolls the transaction back to
//! it. The fallback target of the instruction is its own successor, so
//! both returns leave through the same exit with the status in `eax`.

use super::{abort_codes, BeginStatus, HardwareTm};
use std::arch::asm;

#[target_feature(enable = "rtm")]
unsafe fn xbegin() -> u32 {
    let status: u32;
    asm!(
        "mov eax, -1",
        "xbegin 2f",
        "2:",
        out("eax") status,
        options(nostack),
    );
    status
}

#[target_feature(enable = "rtm")]
unsafe fn xend() {
    asm!("xend", options(nostack));
}

#[target_feature(enable = "rtm")]
unsafe fn xtest() -> bool {
    let in_txn: u8;
    asm!(
        "xtest",
        "setnz {0}",
        out(reg_byte) in_txn,
        options(nostack),
    );
    in_txn != 0
}

/// RTM-backed hardware transactions. Construction is free; CPU support is
/// checked at runtime via feature detection, and the engine only installs
/// this backend when detection succeeds.
pub struct RtmHtm;

impl HardwareTm for RtmHtm {
    fn is_supported(&self) -> bool {
        std::is_x86_feature_detected!("rtm")
    }

    fn begin(&self) -> BeginStatus {
        BeginStatus::from_raw(unsafe { xbegin() })
    }

    fn end(&self) {
        unsafe { xend() }
    }

    fn abort(&self, code: u8) {
        // xabort takes an immediate operand; route the codes the engine
        // uses through literal call sites.
        unsafe {
            match code {
                abort_codes::CLOCK_HELD => asm!("xabort 1", options(nostack)),
                abort_codes::USER_RESTART => asm!("xabort 2", options(nostack)),
                abort_codes::NEEDS_SOFTWARE => asm!("xabort 3", options(nostack)),
                abort_codes::UNSUPPORTED_OP => asm!("xabort 255", options(nostack)),
                _ => asm!("xabort 0", options(nostack)),
            }
        }
    }

    fn in_transaction(&self) -> bool {
        unsafe { xtest() }
    }
}
