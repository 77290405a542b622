//! Pointer-size immediate materialization.
//!
//! Every rewrite that needs to load a concrete address into a register (a PC-relative base,
//! a call's return address, an indirect branch target, a clone thread's entry point) goes
//! through `insert_mov_immed_arch`, which picks between a one-instruction `mvn` for small
//! negated values and a two-instruction `movw`+`movt` pair otherwise.

use crate::cursor::ListCursor;
use crate::ir::{Inst, InstructionData, Opcode, Operand, Translation};
use crate::isa::registers::Reg;
use crate::isa::{IsaMode, Predicate};

/// `mvn` can materialize any value whose bitwise complement fits in an 8-bit immediate
/// (trivially, any value in `0xffffff00..=0xffffffff`, i.e. `~val` in `0..=255`).
fn fits_mvn(val: u32) -> bool {
    (!val) <= 0xff
}

/// Insert instructions before the cursor's current position that leave `val` in `dst`,
/// returning the last instruction inserted. Predication, if any, is applied to every
/// inserted instruction identically (materializing a value is never itself split across a
/// predicate boundary).
pub fn insert_mov_immed_arch(
    cursor: &mut ListCursor,
    dst: Reg,
    val: u32,
    pred: Predicate,
    mode: IsaMode,
) -> Inst {
    if fits_mvn(val) {
        let data = InstructionData::new(Opcode::DataOrMem, "mvn", mode, Translation::Meta)
            .with_predicate(pred)
            .with_dsts([Operand::Reg(dst)])
            .with_srcs([Operand::Imm(i64::from(!val))]);
        return cursor.insert_before(data);
    }

    let movw = InstructionData::new(Opcode::MovWide { top_half: false }, "movw", mode, Translation::Meta)
        .with_predicate(pred)
        .with_dsts([Operand::Reg(dst)])
        .with_srcs([Operand::Imm(i64::from(val & 0xffff))]);
    cursor.insert_before(movw);

    if val >> 16 == 0 {
        return cursor.current().expect("cursor still valid after insert");
    }

    let movt = InstructionData::new(Opcode::MovWide { top_half: true }, "movt", mode, Translation::Meta)
        .with_predicate(pred)
        .with_dsts([Operand::Reg(dst)])
        .with_srcs([Operand::Imm(i64::from(val >> 16))]);
    cursor.insert_before(movt)
}
