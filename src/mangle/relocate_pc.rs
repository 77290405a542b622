//! PC-relative memory operand relocation.
//!
//! An app instruction addressing `[pc, ...]` can't be left alone once it is relocated into
//! the code cache: its architectural r15 no longer matches the value the application author
//! intended. This rewrite materializes the original r15 into a scratch register and rebases
//! the memory operand onto it.

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::errors::{MangleError, MangleResult};
use crate::ir::{Inst, Operand};
use crate::isa::registers::Reg;
use crate::isa::Predicate;
use crate::mangle::materialize::insert_mov_immed_arch;
use crate::regalloc::scratch::{emit_scratch_restore_after, emit_scratch_save, pick_scratch_reg};

fn find_pc_mem_operand(data: &crate::ir::InstructionData) -> Option<(bool, usize)> {
    for (idx, op) in data.dsts.iter().enumerate() {
        if matches!(op, Operand::Mem(m) if m.base == Reg::PC) {
            return Some((true, idx));
        }
    }
    for (idx, op) in data.srcs.iter().enumerate() {
        if matches!(op, Operand::Mem(m) if m.base == Reg::PC) {
            return Some((false, idx));
        }
    }
    None
}

/// Relocate the single `[pc, ...]` memory operand of the instruction under the cursor onto a
/// scratch register holding the original architectural PC value.
///
/// `ldm`/`stm` with a PC base is architecturally undefined and must never reach this
/// function; it is rejected as an invariant violation.
pub fn mangle_rel_addr(cursor: &mut ListCursor, cfg: &MangleConfig) -> MangleResult<()> {
    let at = cursor.current().expect("cursor must be at an instruction");
    let data = cursor.list.data(at).clone();

    if data.opcode.is_multi_reg() {
        return Err(MangleError::invariant(
            "mangle_rel_addr",
            "ldm/stm with a pc base is architecturally undefined",
        ));
    }

    let (is_dst, idx) = find_pc_mem_operand(&data)
        .ok_or_else(|| MangleError::invariant("mangle_rel_addr", "instruction has no pc-relative memory operand"))?;
    let mut mem = match if is_dst { data.dsts[idx] } else { data.srcs[idx] } {
        Operand::Mem(m) => m,
        _ => unreachable!(),
    };

    let app_pc = data
        .translation
        .app_pc()
        .ok_or_else(|| MangleError::invariant("mangle_rel_addr", "pc-relative operand on a meta instruction"))?;
    let mut r15_app = data.mode.cur_pc(app_pc);

    // T32's negated-displacement encoding has no 12-bit immediate form off a non-pc base;
    // fold the displacement into the materialized constant instead of leaving it on the
    // instruction.
    if mem.negated && mem.disp >= 256 {
        r15_app = r15_app.wrapping_sub(mem.disp as u32);
        mem.disp = 0;
        mem.negated = false;
    }

    let pick = pick_scratch_reg(cursor.list, at, &data, false, false, cfg)
        .ok_or_else(|| MangleError::invariant("mangle_rel_addr", "no scratch register available"))?;

    emit_scratch_save(cursor, pick.reg, cfg.scratch_slot(pick.reg), data.mode);
    // Materialization runs unconditionally: it only ever writes the scratch register we just
    // saved, which is harmless whether or not the app instruction's predicate holds.
    insert_mov_immed_arch(cursor, pick.reg, r15_app, Predicate::Al, data.mode);

    mem.base = pick.reg;
    if is_dst {
        cursor.list.data_mut(at).dsts[idx] = Operand::Mem(mem);
    } else {
        cursor.list.data_mut(at).srcs[idx] = Operand::Mem(mem);
    }

    emit_scratch_restore_after(
        cursor.list,
        at,
        pick.reg,
        cfg.scratch_slot(pick.reg),
        pick.should_restore,
        data.mode,
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{InstrList, InstructionData, MemOperand, Opcode, Translation};
    use crate::isa::IsaMode;

    fn cfg() -> MangleConfig {
        MangleConfig::reference_default()
    }

    #[test]
    fn relocates_ldr_from_pc() {
        let mut list = InstrList::new();
        let ldr = InstructionData::new(Opcode::DataOrMem, "ldr", IsaMode::A32, Translation::App(0x1000))
            .with_dsts([Operand::Reg(Reg::R1)])
            .with_srcs([Operand::Mem(MemOperand::simple(Reg::PC, 8))]);
        let at = list.append_data(ldr);
        let mut cursor = ListCursor::at(&mut list, at);
        mangle_rel_addr(&mut cursor, &cfg()).unwrap();

        let order: Vec<Inst> = cursor.list.iter().collect();
        // save, movw(+movt), ldr(rewritten), restore
        assert!(order.len() >= 4);
        let ldr_idx = order.iter().position(|&i| i == at).unwrap();
        let ldr_data = cursor.list.data(order[ldr_idx]);
        match ldr_data.srcs[0] {
            Operand::Mem(m) => assert_ne!(m.base, Reg::PC),
            _ => panic!("expected mem operand"),
        }
    }

    #[test]
    fn rejects_ldm_with_pc_base() {
        let mut list = InstrList::new();
        let ldm = InstructionData::new(
            Opcode::LoadMulti(crate::ir::MultiMode::Ia),
            "ldm",
            IsaMode::A32,
            Translation::App(0x2000),
        );
        let at = list.append_data(ldm);
        let mut cursor = ListCursor::at(&mut list, at);
        assert!(mangle_rel_addr(&mut cursor, &cfg()).is_err());
    }
}
