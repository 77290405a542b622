//! TLS save/restore instruction synthesis.
//!
//! Every register swap the mangler performs (scratch spills, the stolen-register dance, the
//! syscall wrapper's r0/r10 saves) bottoms out in one of the two helpers here. Centralizing
//! them means the scratch-register picker can recognize a restore it just emitted by its
//! `tls_marker` tag instead of pattern-matching mnemonics.

use crate::ir::{InstructionData, Opcode, Operand, TlsMarker, Translation};
use crate::isa::registers::Reg;
use crate::isa::IsaMode;

/// `str Rn, [tls-base, #offset]`, tagged as a save of `reg`.
pub fn save_to_tls(reg: Reg, offset: i32, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "str", mode, Translation::Meta)
        .with_srcs([Operand::Reg(reg), Operand::Tls(offset)])
        .with_tls_marker(TlsMarker::Save(reg))
}

/// `ldr Rn, [tls-base, #offset]`, tagged as a restore of `reg`.
pub fn restore_from_tls(reg: Reg, offset: i32, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "ldr", mode, Translation::Meta)
        .with_dsts([Operand::Reg(reg)])
        .with_srcs([Operand::Tls(offset)])
        .with_tls_marker(TlsMarker::Restore(reg))
}

/// If `data` is a restore created by `restore_from_tls`, the register it restores.
pub fn restored_reg(data: &InstructionData) -> Option<Reg> {
    match data.tls_marker {
        Some(TlsMarker::Restore(r)) => Some(r),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn restore_is_recognized_by_marker() {
        let data = restore_from_tls(Reg::R1, 0x10, IsaMode::A32);
        assert_eq!(restored_reg(&data), Some(Reg::R1));
        let save = save_to_tls(Reg::R1, 0x10, IsaMode::A32);
        assert_eq!(restored_reg(&save), None);
    }
}
