//! Syscall wrapper and clone post-processing.

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::errors::{MangleError, MangleResult};
use crate::ir::{BranchTarget, InstructionData, Opcode, Operand, Translation};
use crate::isa::registers::Reg;
use crate::isa::{IsaMode, Predicate};
use crate::mangle::materialize::insert_mov_immed_arch;

fn str_tls(reg: Reg, slot: i32, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "str", mode, Translation::Meta)
        .with_srcs([Operand::Reg(reg), Operand::Tls(slot)])
}

fn ldr_tls(reg: Reg, slot: i32, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "ldr", mode, Translation::Meta)
        .with_dsts([Operand::Reg(reg)])
        .with_srcs([Operand::Tls(slot)])
}

fn mov_reg(dst: Reg, src: Reg, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "mov", mode, Translation::Meta)
        .with_dsts([Operand::Reg(dst)])
        .with_srcs([Operand::Reg(src)])
}

/// Bracket a `svc` with the bookkeeping every ignorable syscall needs: r0 is saved so the
/// kernel's restart-on-`-EINTR` convention can be honored, and if the stolen register is
/// caller-saved under the Linux EABI (r8 or r9), it is additionally swapped out through r10
/// for the duration of the kernel call.
pub fn mangle_syscall(cursor: &mut ListCursor, cfg: &MangleConfig) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    if data.opcode != Opcode::Syscall {
        return Err(MangleError::invariant("mangle_syscall", "not a syscall instruction"));
    }

    log::trace!("mangle_syscall: stolen_is_caller_saved={}", cfg.stolen_is_caller_saved());

    if cfg.stolen_is_caller_saved() {
        cursor.insert_before(str_tls(Reg::R10, cfg.syscall_r10_slot(), data.mode));
        cursor.insert_before(mov_reg(Reg::R10, cfg.stolen_reg(), data.mode));
    }
    cursor.insert_before(str_tls(Reg::R0, cfg.syscall_r0_slot(), data.mode));

    let mut tail = at;
    if cfg.stolen_is_caller_saved() {
        tail = cursor.list.insert_after_data(tail, mov_reg(cfg.stolen_reg(), Reg::R10, data.mode));
        tail = cursor.list.insert_after_data(tail, ldr_tls(Reg::R10, cfg.syscall_r10_slot(), data.mode));
    }
    let _ = tail;

    Ok(())
}

/// After a `clone` syscall returns, the child and parent must diverge: the child (r0 == 0)
/// continues at `new_thread_start`, the parent falls through. Marks the `svc` itself meta so
/// it is never re-translated as an app instruction (its effective behavior already changed).
pub fn mangle_insert_clone_code(cursor: &mut ListCursor, new_thread_start: u32, cfg: &MangleConfig) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    if data.opcode != Opcode::Syscall {
        return Err(MangleError::invariant("mangle_insert_clone_code", "not a syscall instruction"));
    }
    cursor.list.data_mut(at).translation = Translation::Meta;

    log::trace!("mangle_insert_clone_code: new_thread_start=0x{:x}", new_thread_start);

    let parent_label = cursor.list.create_label();

    let mut tail = at;
    tail = cursor.list.insert_after_data(
        tail,
        InstructionData::new(
            Opcode::CompareBranchZero { negate: true },
            "cbnz",
            data.mode,
            Translation::Meta,
        )
        .with_srcs([Operand::Reg(Reg::R0), Operand::Branch(BranchTarget::Label(parent_label))]),
    );

    let mut jump_cursor = ListCursor::at(cursor.list, tail);
    insert_mov_immed_arch(
        &mut jump_cursor,
        cfg.ibl_target_reg(),
        data.mode.tag_target(new_thread_start),
        Predicate::Al,
        data.mode,
    );
    tail = jump_cursor.current().expect("materialization leaves the cursor at an instruction");
    tail = cursor.list.insert_after_data(
        tail,
        InstructionData::new(Opcode::DataOrMem, "mov", data.mode, Translation::Meta)
            .with_dsts([Operand::Reg(Reg::PC)])
            .with_srcs([Operand::Reg(cfg.ibl_target_reg())]),
    );

    let parent_label_inst = cursor.list.insert_after_data(
        tail,
        InstructionData::new(Opcode::Label, "label", data.mode, Translation::Meta),
    );
    cursor.list.bind_label(parent_label, parent_label_inst);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Inst, InstrList};

    fn cfg() -> MangleConfig {
        MangleConfig::reference_default()
    }

    fn caller_saved_cfg() -> MangleConfig {
        MangleConfig::new(Reg::R8, Reg::R2, 0x00, 0x04, [0x10, 0x14, 0x18, 0x1c], 0x20, 0x24).unwrap()
    }

    #[test]
    fn plain_syscall_saves_and_restores_r0_only() {
        let mut list = InstrList::new();
        let data = InstructionData::new(Opcode::Syscall, "svc", IsaMode::A32, Translation::App(0x1000));
        let at = list.append_data(data);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_syscall(&mut cursor, &cfg()).unwrap();
        let order: Vec<Inst> = cursor.list.iter().collect();
        assert_eq!(order.len(), 2);
    }

    #[test]
    fn caller_saved_stolen_reg_swaps_through_r10() {
        let mut list = InstrList::new();
        let data = InstructionData::new(Opcode::Syscall, "svc", IsaMode::A32, Translation::App(0x1000));
        let at = list.append_data(data);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_syscall(&mut cursor, &caller_saved_cfg()).unwrap();
        let order: Vec<Inst> = cursor.list.iter().collect();
        assert_eq!(order.len(), 5);
    }

    #[test]
    fn clone_code_inserts_cbnz_and_jump_and_marks_svc_meta() {
        let mut list = InstrList::new();
        let data = InstructionData::new(Opcode::Syscall, "svc", IsaMode::T32, Translation::App(0x2000));
        let at = list.append_data(data);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_insert_clone_code(&mut cursor, 0x9000, &cfg()).unwrap();
        assert!(cursor.list.data(at).translation.is_meta());
        let order: Vec<Inst> = cursor.list.iter().collect();
        assert!(order.len() >= 4);
    }
}
