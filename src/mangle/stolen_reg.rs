//! Stolen-register virtualization.
//!
//! The engine keeps its per-thread TLS base permanently in `dr_reg_stolen`. Any app
//! instruction that reads or writes that register must have the swap applied around it so it
//! observes (and updates) the application's own value instead of the engine's.

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::errors::MangleResult;
use crate::ir::{InstructionData, Opcode, Operand, Translation};
use crate::isa::registers::Reg;
use crate::isa::{IsaMode, Predicate};
use crate::regalloc::scratch::{emit_scratch_restore_after, emit_scratch_save, pick_scratch_reg};

fn mov_reg(dst: Reg, src: Reg, pred: Predicate, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "mov", mode, Translation::Meta)
        .with_predicate(pred)
        .with_dsts([Operand::Reg(dst)])
        .with_srcs([Operand::Reg(src)])
}

fn str_reg(src: Reg, slot: i32, pred: Predicate, mode: IsaMode, translation: Translation) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "str", mode, translation)
        .with_predicate(pred)
        .with_srcs([Operand::Reg(src), Operand::Tls(slot)])
}

fn ldr_reg(dst: Reg, slot: i32, pred: Predicate, mode: IsaMode, translation: Translation) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "ldr", mode, translation)
        .with_predicate(pred)
        .with_dsts([Operand::Reg(dst)])
        .with_srcs([Operand::Tls(slot)])
}

/// If `at` is exactly `mov Rx, dr_reg_stolen` or `mov dr_reg_stolen, Rx`, collapse it in
/// place into a direct TLS load/store and report that no further handling is needed. This
/// sidesteps the general save/restore dance entirely, since the net architectural effect
/// (application register gets or gives the stashed stolen-reg value) is identical.
pub fn try_stolen_mov_peephole(cursor: &mut ListCursor, cfg: &MangleConfig) -> bool {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    if data.mnemonic != "mov" || data.srcs.len() != 1 || data.dsts.len() != 1 {
        return false;
    }
    let (dst, src) = match (data.dsts.first().copied(), data.srcs.first().copied()) {
        (Some(Operand::Reg(dst)), Some(Operand::Reg(src))) => (dst, src),
        _ => return false,
    };

    let stolen = cfg.stolen_reg();
    if src == stolen && dst != stolen {
        *cursor.list.data_mut(at) =
            ldr_reg(dst, cfg.stolen_reg_slot(), data.predicate, data.mode, data.translation);
        return true;
    }
    if dst == stolen && src != stolen {
        *cursor.list.data_mut(at) =
            str_reg(src, cfg.stolen_reg_slot(), data.predicate, data.mode, data.translation);
        return true;
    }
    false
}

/// General-case stolen-register virtualization: bracket `at` with a save/swap/restore
/// sequence so it sees the application's value in `dr_reg_stolen` instead of the engine's.
pub fn virtualize_stolen_reg(cursor: &mut ListCursor, cfg: &MangleConfig) -> MangleResult<()> {
    if try_stolen_mov_peephole(cursor, cfg) {
        return Ok(());
    }

    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    let stolen = cfg.stolen_reg();

    let pick = pick_scratch_reg(cursor.list, at, &data, false, false, cfg).ok_or_else(|| {
        crate::errors::MangleError::invariant("virtualize_stolen_reg", "no scratch register available")
    })?;

    emit_scratch_save(cursor, pick.reg, cfg.scratch_slot(pick.reg), data.mode);
    cursor.insert_before(mov_reg(pick.reg, stolen, Predicate::Al, data.mode));

    let writes_unconditionally = data.writes_reg(stolen) && !data.is_predicated();
    if data.reads_reg(stolen) || !writes_unconditionally {
        cursor.insert_before(ldr_reg(stolen, cfg.stolen_reg_slot(), Predicate::Al, data.mode, Translation::Meta));
    }

    // Chained off the previous insertion, not off `at`: `insert_after_data(at, ..)` always
    // lands immediately next to `at`, so repeated calls against the same anchor would emit
    // this sequence in reverse.
    let mut tail = at;

    if data.writes_reg(stolen) {
        tail = cursor.list.insert_after_data(
            tail,
            str_reg(stolen, cfg.stolen_reg_slot(), data.predicate, data.mode, Translation::Meta),
        );
    }

    tail = cursor.list.insert_after_data(tail, mov_reg(stolen, pick.reg, Predicate::Al, data.mode));

    emit_scratch_restore_after(cursor.list, tail, pick.reg, cfg.scratch_slot(pick.reg), pick.should_restore, data.mode);

    Ok(())
}
