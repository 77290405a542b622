//! Scratch-register selection and spill elision.
//!
//! Every mangle rule that needs a working register borrows one of r0-r3, since those are the
//! registers the engine's calling convention never expects to survive across an app
//! instruction. `pick_scratch_reg` chooses which one; `emit_scratch_save`/`emit_scratch_restore`
//! bracket the borrow, eliding the pair entirely when doing so is observably safe.

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::ir::{Inst, InstrList, InstructionData, Opcode};
use crate::isa::registers::Reg;
use crate::isa::IsaMode;
use crate::mangle::tls;
use crate::regalloc::register_set::RegisterSet;

/// The result of `pick_scratch_reg`: which register, and whether its app-side value needs to
/// be restored afterward (always true unless the destination was provably dead).
#[derive(Copy, Clone, Debug)]
pub struct ScratchPick {
    pub reg: Reg,
    pub should_restore: bool,
}

/// Walk backward from `inst` (exclusive) over engine-inserted label pseudo-instructions,
/// returning the first substantive instruction found.
fn prior_non_label(list: &InstrList, inst: Inst) -> Option<Inst> {
    let mut cur = list.prev(inst)?;
    loop {
        if list.data(cur).opcode != Opcode::Label {
            return Some(cur);
        }
        cur = list.prev(cur)?;
    }
}

/// Choose a scratch register to use while mangling `instr`, which sits at `at` in `list`.
///
/// `dead_reg_ok` widens the search to registers `instr` overwrites without reading, at the
/// cost of not restoring them afterward. `is_cti` additionally excludes the IBL target
/// register, which control-transfer mangling is actively using for its own purposes.
pub fn pick_scratch_reg(
    list: &InstrList,
    at: Inst,
    instr: &InstructionData,
    dead_reg_ok: bool,
    is_cti: bool,
    cfg: &MangleConfig,
) -> Option<ScratchPick> {
    // Step 1: fuse with an immediately preceding restore, if safe.
    if let Some(prior) = prior_non_label(list, at) {
        if let Some(r) = tls::restored_reg(list.data(prior)) {
            let collides_with_ibl = is_cti && r == cfg.ibl_target_reg();
            if !instr.reads_or_writes(r) && !collides_with_ibl {
                return Some(ScratchPick {
                    reg: r,
                    should_restore: false,
                });
            }
        }
    }

    let mut candidates = RegisterSet::scratch_candidates();
    if is_cti {
        candidates = candidates.without(cfg.ibl_target_reg());
    }

    // Step 2: any candidate untouched by the instruction.
    for r in candidates.iter() {
        if !instr.reads_or_writes(r) {
            return Some(ScratchPick {
                reg: r,
                should_restore: true,
            });
        }
    }

    // Step 3: a candidate that is overwritten but never read, if the caller can tolerate
    // skipping the restore.
    if dead_reg_ok {
        for r in candidates.iter() {
            if !instr.reads_reg(r) {
                return Some(ScratchPick {
                    reg: r,
                    should_restore: false,
                });
            }
        }
    }

    None
}

/// Insert a save of `reg` immediately before the cursor's current instruction, eliding it if
/// the nearest preceding substantive instruction is already a restore of `reg` bracketed only
/// by engine labels (in which case that restore is removed instead, since the register never
/// left its TLS slot in between).
pub fn emit_scratch_save(cursor: &mut ListCursor, reg: Reg, slot: i32, mode: IsaMode) -> Option<Inst> {
    let at = cursor.current().expect("cursor must be at an instruction");
    if let Some(prior) = prior_non_label(cursor.list, at) {
        if tls::restored_reg(cursor.list.data(prior)) == Some(reg) {
            cursor.list.remove(prior);
            return None;
        }
    }
    Some(cursor.insert_before(tls::save_to_tls(reg, slot, mode)))
}

/// Insert a restore of `reg` immediately before the cursor's current instruction, unless
/// `should_restore` is false (the register was provably dead and the save above was itself
/// elided or unnecessary).
pub fn emit_scratch_restore(
    cursor: &mut ListCursor,
    reg: Reg,
    slot: i32,
    should_restore: bool,
    mode: IsaMode,
) -> Option<Inst> {
    if !should_restore {
        return None;
    }
    Some(cursor.insert_before(tls::restore_from_tls(reg, slot, mode)))
}

/// Insert a restore of `reg` immediately after `at`, unconditionally of cursor position.
/// Used when the bracketed app instruction must stay under the cursor while its restore is
/// appended on the far side of it.
pub fn emit_scratch_restore_after(
    list: &mut InstrList,
    at: Inst,
    reg: Reg,
    slot: i32,
    should_restore: bool,
    mode: IsaMode,
) -> Option<Inst> {
    if !should_restore {
        return None;
    }
    Some(list.insert_after_data(at, tls::restore_from_tls(reg, slot, mode)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstructionData, Operand, Translation};
    use crate::isa::registers::RegList;

    fn cfg() -> MangleConfig {
        MangleConfig::reference_default()
    }

    fn instr_using(regs: &[Reg]) -> InstructionData {
        let mut l = RegList::empty();
        for &r in regs {
            l.insert(r);
        }
        InstructionData::new(Opcode::DataOrMem, "ldm", IsaMode::A32, Translation::App(0x1000))
            .with_dsts([Operand::RegList(l)])
    }

    #[test]
    fn picks_first_untouched_scratch() {
        let mut list = InstrList::new();
        let instr = instr_using(&[Reg::R0, Reg::R1]);
        let at = list.append_data(instr.clone());
        let pick = pick_scratch_reg(&list, at, &instr, false, false, &cfg()).unwrap();
        assert_eq!(pick.reg, Reg::R2);
        assert!(pick.should_restore);
    }

    #[test]
    fn excludes_ibl_target_for_cti() {
        let mut list = InstrList::new();
        let instr = instr_using(&[Reg::R0, Reg::R1]);
        let at = list.append_data(instr.clone());
        // cfg's ibl target is r2, so a CTI mangle must skip it even though the instr doesn't
        // touch it, landing on r3 instead.
        let pick = pick_scratch_reg(&list, at, &instr, false, true, &cfg()).unwrap();
        assert_eq!(pick.reg, Reg::R3);
    }

    #[test]
    fn fuses_with_prior_restore() {
        let mut list = InstrList::new();
        let restore = list.append_data(tls::restore_from_tls(Reg::R1, 0x10, IsaMode::A32));
        let instr = instr_using(&[Reg::R0]);
        let at = list.append_data(instr.clone());
        let _ = restore;
        let pick = pick_scratch_reg(&list, at, &instr, false, false, &cfg()).unwrap();
        assert_eq!(pick.reg, Reg::R1);
        assert!(!pick.should_restore);
    }

    #[test]
    fn dead_reg_ok_finds_overwritten_only_register() {
        // All four scratch regs read by the instruction: none qualify under step 2.
        let instr = InstructionData::new(Opcode::DataOrMem, "ldr", IsaMode::A32, Translation::App(0x1000))
            .with_srcs([Operand::Reg(Reg::R0), Operand::Reg(Reg::R1), Operand::Reg(Reg::R2)])
            .with_dsts([Operand::Reg(Reg::R3)]);
        let mut list = InstrList::new();
        let at = list.append_data(instr.clone());
        assert!(pick_scratch_reg(&list, at, &instr, false, false, &cfg()).is_none());
        let pick = pick_scratch_reg(&list, at, &instr, true, false, &cfg()).unwrap();
        assert_eq!(pick.reg, Reg::R3);
        assert!(!pick.should_restore);
    }
}
