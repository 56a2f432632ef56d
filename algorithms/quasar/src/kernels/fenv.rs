//! Floating-point rounding-mode control.
//!
//! The VM's round-control instruction switches the hardware rounding mode for
//! all subsequent group-F/E operations. Modes are numbered 0 = nearest,
//! 1 = toward negative infinity, 2 = toward positive infinity, 3 = toward
//! zero, and are mapped to the target's control register encoding here.
//!
//! On targets without accessible rounding control this is a no-op; such
//! targets cannot reproduce reference digests and are only suitable for
//! exercising the machinery.
#![allow(unsafe_code)]

/// Sets the hardware rounding mode for the current thread. Only the two low
/// bits of `mode` are used.
#[cfg(target_arch = "x86_64")]
pub(crate) fn set_rounding_mode(mode: u32) {
    let mut csr: u32 = 0;
    // SAFETY: stmxcsr/ldmxcsr only read and write the SSE control/status
    // register of the current thread; the pointer is a valid local.
    unsafe {
        core::arch::asm!(
            "stmxcsr [{ptr}]",
            ptr = in(reg) core::ptr::addr_of_mut!(csr),
            options(nostack),
        );
        csr = (csr & !0x6000) | ((mode & 3) << 13);
        core::arch::asm!(
            "ldmxcsr [{ptr}]",
            ptr = in(reg) core::ptr::addr_of!(csr),
            options(nostack, readonly),
        );
    }
}

/// Sets the hardware rounding mode for the current thread. Only the two low
/// bits of `mode` are used.
#[cfg(target_arch = "aarch64")]
pub(crate) fn set_rounding_mode(mode: u32) {
    // FPCR encodes round-down as 0b10 and round-up as 0b01, the reverse of
    // the VM numbering.
    let rmode: u64 = match mode & 3 {
        1 => 0b10,
        2 => 0b01,
        3 => 0b11,
        _ => 0b00,
    };
    // SAFETY: mrs/msr on FPCR only touch the floating-point control register
    // of the current thread.
    unsafe {
        let mut fpcr: u64;
        core::arch::asm!("mrs {r}, fpcr", r = out(reg) fpcr, options(nostack, nomem));
        fpcr = (fpcr & !(0b11 << 22)) | (rmode << 22);
        core::arch::asm!("msr fpcr, {r}", r = in(reg) fpcr, options(nostack, nomem));
    }
}

/// Fallback for targets without accessible rounding control.
#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) fn set_rounding_mode(_mode: u32) {}

/// Restores round-to-nearest, the mode every hash computation starts in.
pub(crate) fn reset_rounding_mode() {
    set_rounding_mode(0);
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
mod tests {
    use super::*;

    use std::hint::black_box;

    // The optimizer may otherwise schedule the addition across the control
    // register writes; an opaque call pins it between them.
    #[inline(never)]
    fn add(a: f64, b: f64) -> f64 {
        black_box(black_box(a) + black_box(b))
    }

    #[test]
    fn rounding_modes_change_results() {
        // 1.0 + 2^-60 is inexact in f64, so the rounding direction shows.
        let tiny = black_box((2.0_f64).powi(-60));

        set_rounding_mode(1);
        let down = add(1.0, tiny);
        set_rounding_mode(2);
        let up = add(1.0, tiny);
        reset_rounding_mode();

        assert_eq!(down, 1.0);
        assert!(up > 1.0);
    }

    #[test]
    fn reset_restores_nearest() {
        set_rounding_mode(3);
        reset_rounding_mode();
        let tiny = black_box((2.0_f64).powi(-60));
        // Round-to-nearest drops the tiny addend in both directions.
        assert_eq!(add(1.0, tiny), 1.0);
        assert_eq!(add(-1.0, -tiny), -1.0);
    }
}
