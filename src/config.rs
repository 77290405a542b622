//! Process-wide mangling configuration.
//!
//! The reference implementation keeps the stolen register, the IBL target register, and the
//! TLS slot layout as compile-time constants and a couple of mutable globals set once at
//! engine init. This crate collects the same values into one immutable, validated struct and
//! threads it by reference through every mangling entry point instead.

use crate::isa::registers::Reg;

/// A TLS slot offset, in bytes from the thread-local storage base the engine reserves.
pub type TlsOffset = i32;

/// Validated, immutable mangling configuration.
#[derive(Clone, Copy, Debug)]
pub struct MangleConfig {
    /// The application register the engine permanently repurposes to hold its per-thread
    /// TLS base while executing from the code cache. Must be r8-r11 (the callee-saved,
    /// non-argument registers least likely to be load-bearing across a single instruction).
    stolen_reg: Reg,
    /// The scratch register used to carry an indirect branch target to the IBL.
    ibl_target_reg: Reg,
    /// TLS slot holding the application's value for `stolen_reg` while the engine's TLS base
    /// occupies the real register.
    stolen_reg_slot: TlsOffset,
    /// TLS slot used to spill `ibl_target_reg` for its own sake (when it must be freed to
    /// compute something else first).
    ibl_target_slot: TlsOffset,
    /// TLS slots for the four scratch-register candidates r0-r3, indexed by register number.
    scratch_slots: [TlsOffset; 4],
    /// Spare TLS slot used by the syscall wrapper to save r0 across registers that alias the
    /// kernel's restart-on-`-EINTR` convention.
    syscall_r0_slot: TlsOffset,
    /// Spare TLS slot used by the syscall wrapper when the stolen register is caller-saved
    /// (r8 or r9) and must additionally swap through r10.
    syscall_r10_slot: TlsOffset,
}

impl MangleConfig {
    /// Build and validate a configuration. Returns `None` if `stolen_reg` or
    /// `ibl_target_reg` violate the placement invariants every mangle rule assumes.
    pub fn new(
        stolen_reg: Reg,
        ibl_target_reg: Reg,
        stolen_reg_slot: TlsOffset,
        ibl_target_slot: TlsOffset,
        scratch_slots: [TlsOffset; 4],
        syscall_r0_slot: TlsOffset,
        syscall_r10_slot: TlsOffset,
    ) -> Option<Self> {
        let stolen_num = stolen_reg.num();
        if !(8..=11).contains(&stolen_num) {
            return None;
        }
        if !ibl_target_reg.is_scratch_candidate() {
            return None;
        }
        if stolen_reg == ibl_target_reg {
            return None;
        }
        Some(MangleConfig {
            stolen_reg,
            ibl_target_reg,
            stolen_reg_slot,
            ibl_target_slot,
            scratch_slots,
            syscall_r0_slot,
            syscall_r10_slot,
        })
    }

    /// A configuration matching the reference system's usual layout: r10 stolen, r2 as the
    /// IBL target register. Useful for tests and as a documented default.
    pub fn reference_default() -> Self {
        MangleConfig::new(
            Reg::R10,
            Reg::R2,
            0x00,
            0x04,
            [0x10, 0x14, 0x18, 0x1c],
            0x20,
            0x24,
        )
        .expect("reference_default parameters satisfy MangleConfig invariants")
    }

    pub fn stolen_reg(&self) -> Reg {
        self.stolen_reg
    }

    pub fn ibl_target_reg(&self) -> Reg {
        self.ibl_target_reg
    }

    pub fn stolen_reg_slot(&self) -> TlsOffset {
        self.stolen_reg_slot
    }

    pub fn ibl_target_slot(&self) -> TlsOffset {
        self.ibl_target_slot
    }

    /// TLS slot backing `r`, which must be one of r0-r3.
    pub fn scratch_slot(&self, r: Reg) -> TlsOffset {
        debug_assert!(r.is_scratch_candidate());
        self.scratch_slots[r.num() as usize]
    }

    pub fn syscall_r0_slot(&self) -> TlsOffset {
        self.syscall_r0_slot
    }

    pub fn syscall_r10_slot(&self) -> TlsOffset {
        self.syscall_r10_slot
    }

    /// Whether the stolen register is caller-saved under the standard ARM EABI (r8, r9), and
    /// therefore needs the syscall wrapper's extra r10 swap (see mangle::syscall).
    pub fn stolen_is_caller_saved(&self) -> bool {
        matches!(self.stolen_reg.num(), 8 | 9)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_stolen_reg_outside_r8_r11() {
        assert!(MangleConfig::new(Reg::R4, Reg::R2, 0, 4, [8, 12, 16, 20], 24, 28).is_none());
    }

    #[test]
    fn rejects_ibl_target_outside_scratch_range() {
        assert!(MangleConfig::new(Reg::R10, Reg::R5, 0, 4, [8, 12, 16, 20], 24, 28).is_none());
    }

    #[test]
    fn rejects_stolen_reg_equal_to_ibl_target() {
        assert!(MangleConfig::new(Reg::R10, Reg::R10, 0, 4, [8, 12, 16, 20], 24, 28).is_none());
    }

    #[test]
    fn reference_default_is_valid() {
        let cfg = MangleConfig::reference_default();
        assert_eq!(cfg.stolen_reg(), Reg::R10);
        assert_eq!(cfg.ibl_target_reg(), Reg::R2);
        assert!(!cfg.stolen_is_caller_saved());
    }
}
