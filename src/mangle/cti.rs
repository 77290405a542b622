//! Direct and indirect control-transfer mangling.
//!
//! Every call and every return/indirect-jump is rewritten so the actual transfer goes through
//! a scratch register (`IBL_TARGET_REG`) and, for a predicated source, lands on the correct
//! fall-through PC when the condition doesn't hold (§4.9's predicated-fallthrough trick).

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::errors::{MangleError, MangleResult};
use crate::ir::{BranchTarget, Inst, InstructionData, Opcode, Operand, Translation};
use crate::isa::registers::Reg;
use crate::isa::{IsaMode, Predicate};
use crate::mangle::materialize::insert_mov_immed_arch;
use crate::mangle::stolen_reg::virtualize_stolen_reg;
use crate::regalloc::scratch::{emit_scratch_restore_after, emit_scratch_save};

fn pc_as_jmp_tgt(mode: IsaMode, pc: u32) -> u32 {
    mode.tag_target(pc)
}

fn mov_reg(dst: Reg, src: Reg, pred: Predicate, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "mov", mode, Translation::Meta)
        .with_predicate(pred)
        .with_dsts([Operand::Reg(dst)])
        .with_srcs([Operand::Reg(src)])
}

fn unconditional_branch(target: Operand, mode: IsaMode, translation: Translation, pred: Predicate) -> InstructionData {
    InstructionData::new(Opcode::Branch, "b", mode, translation)
        .with_predicate(pred)
        .with_srcs([target])
}

/// §4.9: after the taken-path materialization of `IBL_TARGET_REG`, materialize the
/// fall-through PC into the same register under the inverted predicate, so a false condition
/// resumes at the instruction immediately following the mangled one instead of at the taken
/// target.
fn insert_predicated_fallthrough(
    cursor: &mut ListCursor,
    pred: Predicate,
    fallthrough_pc: u32,
    mode: IsaMode,
    cfg: &MangleConfig,
) {
    if !pred.is_conditional() {
        return;
    }
    insert_mov_immed_arch(cursor, cfg.ibl_target_reg(), fallthrough_pc, pred.invert(), mode);
}

/// `bl`/`blx imm`: materialize the return address into LR, then either fall straight through
/// to the direct target (`bl`) or route through the IBL (`blx`, since it also switches mode).
pub fn mangle_direct_call(
    cursor: &mut ListCursor,
    target_pc: u32,
    mode_switch: bool,
    cfg: &MangleConfig,
) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    let app_pc = data
        .translation
        .app_pc()
        .ok_or_else(|| MangleError::invariant("mangle_direct_call", "direct call on a meta instruction"))?;
    let ret_pc = pc_as_jmp_tgt(data.mode, app_pc.wrapping_add(4));

    log::trace!("mangle_direct_call: target=0x{:x} mode_switch={}", target_pc, mode_switch);

    insert_mov_immed_arch(cursor, Reg::LR, ret_pc, data.predicate, data.mode);

    if !mode_switch {
        cursor.insert_before(unconditional_branch(
            Operand::Branch(BranchTarget::AppAddr(target_pc)),
            data.mode,
            Translation::Meta,
            data.predicate,
        ));
    } else {
        emit_scratch_save(cursor, cfg.ibl_target_reg(), cfg.ibl_target_slot(), data.mode);
        let dest_mode = if data.mode == IsaMode::A32 { IsaMode::T32 } else { IsaMode::A32 };
        insert_mov_immed_arch(cursor, cfg.ibl_target_reg(), dest_mode.tag_target(target_pc), data.predicate, data.mode);
        insert_predicated_fallthrough(cursor, data.predicate, ret_pc, data.mode, cfg);
        emit_scratch_restore_after(cursor.list, at, cfg.ibl_target_reg(), cfg.ibl_target_slot(), true, data.mode);
    }

    cursor.remove_and_advance();
    Ok(())
}

/// `blx reg`: indirect call. Saves `IBL_TARGET_REG`, materializes the target (pulling it from
/// the stolen-reg TLS slot instead of the register itself if the target happens to be the
/// stolen register), materializes the return address into LR, and falls through to the IBL.
pub fn mangle_indirect_call(cursor: &mut ListCursor, target_reg: Reg, cfg: &MangleConfig) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    let app_pc = data
        .translation
        .app_pc()
        .ok_or_else(|| MangleError::invariant("mangle_indirect_call", "indirect call on a meta instruction"))?;
    let ret_pc = pc_as_jmp_tgt(data.mode, app_pc.wrapping_add(4));

    log::trace!("mangle_indirect_call: target_reg={}", target_reg);

    emit_scratch_save(cursor, cfg.ibl_target_reg(), cfg.ibl_target_slot(), data.mode);
    if target_reg == cfg.stolen_reg() {
        cursor.insert_before(
            InstructionData::new(Opcode::DataOrMem, "ldr", data.mode, Translation::Meta)
                .with_predicate(data.predicate)
                .with_dsts([Operand::Reg(cfg.ibl_target_reg())])
                .with_srcs([Operand::Tls(cfg.stolen_reg_slot())]),
        );
    } else {
        cursor.insert_before(mov_reg(cfg.ibl_target_reg(), target_reg, data.predicate, data.mode));
    }
    insert_mov_immed_arch(cursor, Reg::LR, ret_pc, data.predicate, data.mode);
    insert_predicated_fallthrough(cursor, data.predicate, ret_pc, data.mode, cfg);
    emit_scratch_restore_after(cursor.list, at, cfg.ibl_target_reg(), cfg.ibl_target_slot(), true, data.mode);

    cursor.remove_and_advance();
    Ok(())
}

/// The source of the return-address/jump-target value the unified return/indirect-jump
/// handler redirects into `IBL_TARGET_REG`.
pub enum JumpSource {
    /// `bx`/`bxj Rn`.
    Register(Reg),
    /// A previously-computed value already materialized into a register by an earlier
    /// normalization step (e.g. the `ldr pc` tail of §4.7.1), redirected here instead of PC.
    AlreadyInReg(Reg),
}

/// Unified handler for `bx`, `bxj`, `pop {pc}`/`ldm{..,pc}` (after §4.7.1 redirection), and
/// arithmetic writes to PC. Computes the jump target into `IBL_TARGET_REG` and falls through
/// to the IBL, applying the predicated-fallthrough trick if the source instruction was
/// predicated.
pub fn mangle_indirect_jump(cursor: &mut ListCursor, source: JumpSource, cfg: &MangleConfig) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();

    log::trace!("mangle_indirect_jump: {}", data.opcode);

    match source {
        JumpSource::Register(reg) if reg == cfg.ibl_target_reg() => {}
        JumpSource::Register(reg) => {
            emit_scratch_save(cursor, cfg.ibl_target_reg(), cfg.ibl_target_slot(), data.mode);
            if reg == cfg.stolen_reg() {
                cursor.insert_before(
                    InstructionData::new(Opcode::DataOrMem, "ldr", data.mode, Translation::Meta)
                        .with_predicate(data.predicate)
                        .with_dsts([Operand::Reg(cfg.ibl_target_reg())])
                        .with_srcs([Operand::Tls(cfg.stolen_reg_slot())]),
                );
            } else {
                cursor.insert_before(mov_reg(cfg.ibl_target_reg(), reg, data.predicate, data.mode));
            }
            if let Some(ret_pc) = data.translation.app_pc().map(|pc| pc_as_jmp_tgt(data.mode, pc.wrapping_add(4))) {
                insert_predicated_fallthrough(cursor, data.predicate, ret_pc, data.mode, cfg);
            }
            emit_scratch_restore_after(cursor.list, at, cfg.ibl_target_reg(), cfg.ibl_target_slot(), true, data.mode);
        }
        JumpSource::AlreadyInReg(reg) if reg != cfg.ibl_target_reg() => {
            return Err(MangleError::invariant(
                "mangle_indirect_jump",
                "pc value was materialized into a register other than the ibl target register",
            ));
        }
        JumpSource::AlreadyInReg(_) => {}
    }

    cursor.remove_and_advance();
    Ok(())
}

/// `tbb`/`tbh [base, index{, lsl #1}]`: table branch. Loads a byte/halfword offset, doubles
/// it, and adds the decode-time PC, landing the result in `IBL_TARGET_REG`.
pub fn mangle_table_branch(
    cursor: &mut ListCursor,
    base: Reg,
    index: Reg,
    halfword: bool,
    cfg: &MangleConfig,
) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    let app_pc = data
        .translation
        .app_pc()
        .ok_or_else(|| MangleError::invariant("mangle_table_branch", "tbb/tbh on a meta instruction"))?;
    let table_pc = data.mode.cur_pc(app_pc);

    log::trace!("mangle_table_branch: halfword={}", halfword);

    emit_scratch_save(cursor, cfg.ibl_target_reg(), cfg.ibl_target_slot(), data.mode);
    let load_mnemonic = if halfword { "ldrh" } else { "ldrb" };
    cursor.insert_before(
        InstructionData::new(Opcode::DataOrMem, load_mnemonic, data.mode, Translation::Meta)
            .with_predicate(data.predicate)
            .with_dsts([Operand::Reg(cfg.ibl_target_reg())])
            .with_srcs([Operand::Mem(crate::ir::MemOperand {
                base,
                index: Some(index),
                shift: if halfword { 1 } else { 0 },
                disp: 0,
                negated: false,
                size: if halfword { 2 } else { 1 },
            })]),
    );
    cursor.insert_before(
        InstructionData::new(Opcode::DataOrMem, "lsl", data.mode, Translation::Meta)
            .with_predicate(data.predicate)
            .with_dsts([Operand::Reg(cfg.ibl_target_reg())])
            .with_srcs([Operand::Reg(cfg.ibl_target_reg()), Operand::Imm(1)]),
    );
    let pick_addend = InstructionData::new(Opcode::DataOrMem, "add", data.mode, Translation::Meta)
        .with_predicate(data.predicate)
        .with_dsts([Operand::Reg(cfg.ibl_target_reg())])
        .with_srcs([Operand::Reg(cfg.ibl_target_reg()), Operand::Imm(i64::from(table_pc))]);
    cursor.insert_before(pick_addend);
    emit_scratch_restore_after(cursor.list, at, cfg.ibl_target_reg(), cfg.ibl_target_slot(), true, data.mode);

    cursor.remove_and_advance();
    Ok(())
}

/// Emit a scratch-loaded indirect branch to `target`, for callers that need to reach an
/// out-of-range destination (a clean-call callee, a trampoline) without an encodable direct
/// branch. If `returns` and this is a call (`!jmp`), also materializes the return address into
/// LR using `after_pc` as the resume point.
pub fn insert_reachable_cti(
    cursor: &mut ListCursor,
    after_pc: u32,
    target: u32,
    jmp: bool,
    returns: bool,
    scratch: Reg,
    mode: IsaMode,
) {
    insert_mov_immed_arch(cursor, scratch, pc_as_jmp_tgt(mode, target), Predicate::Al, mode);
    if !jmp && returns {
        insert_mov_immed_arch(cursor, Reg::LR, pc_as_jmp_tgt(mode, after_pc), Predicate::Al, mode);
    }
    cursor.insert_before(mov_reg(Reg::PC, scratch, Predicate::Al, mode));
}

/// Apply the stolen-register virtualization pass (§4.5) to an instruction after it has already
/// been redirected to write `IBL_TARGET_REG` instead of PC, per §4.8's ordering note (the
/// mode-bit `orr` fixup, if any, must happen before this).
pub fn apply_stolen_reg_if_needed(cursor: &mut ListCursor, cfg: &MangleConfig) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();
    if data.reads_or_writes(cfg.stolen_reg()) {
        virtualize_stolen_reg(cursor, cfg)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::InstrList;

    fn cfg() -> MangleConfig {
        MangleConfig::reference_default()
    }

    #[test]
    fn direct_call_materializes_return_address_and_branches() {
        let mut list = InstrList::new();
        let data = InstructionData::new(
            Opcode::BranchLinkImm { mode_switch: false },
            "bl",
            IsaMode::T32,
            Translation::App(0x1000),
        );
        let at = list.append_data(data);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_direct_call(&mut cursor, 0x5000, false, &cfg()).unwrap();

        let order: Vec<Inst> = cursor.list.iter().collect();
        assert!(order.len() >= 2);
        let branch = cursor.list.data(*order.last().unwrap());
        assert_eq!(branch.opcode, Opcode::Branch);
    }

    #[test]
    fn indirect_call_routes_through_ibl_target_reg() {
        let mut list = InstrList::new();
        let data = InstructionData::new(Opcode::BranchLinkReg, "blx", IsaMode::A32, Translation::App(0x2000));
        let at = list.append_data(data);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_indirect_call(&mut cursor, Reg::R5, &cfg()).unwrap();

        let order: Vec<Inst> = cursor.list.iter().collect();
        assert!(order.iter().any(|&i| cursor.list.data(i).dsts.first().copied() == Some(Operand::Reg(cfg().ibl_target_reg()))));
    }

    #[test]
    fn predicated_indirect_jump_emits_fallthrough_materialization() {
        let mut list = InstrList::new();
        let data = InstructionData::new(Opcode::BranchExchange, "bx", IsaMode::A32, Translation::App(0x3000))
            .with_predicate(Predicate::Eq);
        let at = list.append_data(data);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_indirect_jump(&mut cursor, JumpSource::Register(Reg::R7), &cfg()).unwrap();

        // save + mov + movw(+movt) fallthrough + restore, at minimum.
        let order: Vec<Inst> = cursor.list.iter().collect();
        assert!(order.len() >= 4);
    }

    #[test]
    fn reachable_cti_call_materializes_target_and_return_address() {
        let mut list = InstrList::new();
        let sentinel = list.append_data(InstructionData::new(Opcode::Other, "sentinel", IsaMode::A32, Translation::Meta));
        let mut cursor = ListCursor::at(&mut list, sentinel);
        insert_reachable_cti(&mut cursor, 0x4100, 0x8000, false, true, Reg::R2, IsaMode::A32);
        let order: Vec<Inst> = cursor.list.iter().collect();
        assert!(order.len() >= 4);
    }
}
