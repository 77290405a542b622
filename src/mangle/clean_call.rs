//! Clean-call context save/restore and parameter preparation.
//!
//! Push order mirrors the engine's `priv_mcontext_t` layout exactly, since the clean-call
//! machinery on the other side of the stack swap reads the pushed bytes back as that struct:
//! SIMD high half, SIMD low half, CPSR + PC, then the GPR bank.

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::errors::{MangleError, MangleResult};
use crate::ir::{InstructionData, Opcode, Operand, Translation};
use crate::isa::registers::{Reg, RegList};
use crate::isa::IsaMode;
use crate::mangle::materialize::insert_mov_immed_arch;
use crate::mangle::tls;

/// Number of argument registers the calling convention commits to for clean-call parameters.
pub const NUM_REGPARM: usize = 4;

/// Registers carrying clean-call arguments, in order.
const REGPARMS: [Reg; NUM_REGPARM] = [Reg::R0, Reg::R1, Reg::R2, Reg::R3];

const SIMD_DREGS_PER_HALF: i64 = 16;

fn vstmdb(mode: IsaMode, count: i64) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "vstmdb", mode, Translation::Meta)
        .with_dsts([Operand::Reg(Reg::SP)])
        .with_srcs([Operand::Imm(count)])
}

fn vldmia(mode: IsaMode, count: i64) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "vldmia", mode, Translation::Meta)
        .with_dsts([Operand::Reg(Reg::SP)])
        .with_srcs([Operand::Imm(count)])
}

fn push_reg(reg: Reg, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::Push, "push", mode, Translation::Meta)
        .with_dsts([Operand::Reg(Reg::SP)])
        .with_srcs([Operand::RegList(RegList::from_bits(1 << reg.num()))])
}

fn pop_reg(reg: Reg, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::Pop, "pop", mode, Translation::Meta)
        .with_dsts([Operand::RegList(RegList::from_bits(1 << reg.num())), Operand::Reg(Reg::SP)])
}

fn mrs_cpsr(scratch: Reg, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "mrs", mode, Translation::Meta)
        .with_dsts([Operand::Reg(scratch)])
}

fn msr_cpsr(scratch: Reg, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "msr", mode, Translation::Meta)
        .with_srcs([Operand::Reg(scratch)])
}

fn add_sp(delta: i64, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "add", mode, Translation::Meta)
        .with_dsts([Operand::Reg(Reg::SP)])
        .with_srcs([Operand::Reg(Reg::SP), Operand::Imm(delta)])
}

fn sub_sp(delta: i64, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "sub", mode, Translation::Meta)
        .with_dsts([Operand::Reg(Reg::SP)])
        .with_srcs([Operand::Reg(Reg::SP), Operand::Imm(delta)])
}

fn gpr_bank_reglist(mode: IsaMode) -> RegList {
    let mut l = RegList::empty();
    for n in 0..=12u8 {
        l.insert(Reg::from_num(n));
    }
    if mode == IsaMode::A32 {
        l.insert(Reg::LR);
    }
    l
}

fn stmdb_wb(reglist: RegList, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "stmdb", mode, Translation::Meta)
        .with_dsts([Operand::Reg(Reg::SP)])
        .with_srcs([Operand::Mem(crate::ir::MemOperand::simple(Reg::SP, 0)), Operand::RegList(reglist)])
}

fn ldm_wb(reglist: RegList, mode: IsaMode) -> InstructionData {
    InstructionData::new(Opcode::DataOrMem, "ldm", mode, Translation::Meta)
        .with_dsts([Operand::RegList(reglist), Operand::Reg(Reg::SP)])
        .with_srcs([Operand::Mem(crate::ir::MemOperand::simple(Reg::SP, 0))])
}

/// Either an immediate PC value to materialize and push, or a register already holding it.
pub enum PushPc {
    Imm(i64),
    Reg(Reg),
}

/// Push the full machine context before a clean call. Returns the number of bytes pushed, so
/// the matching `insert_pop_all_registers` call (and any alignment padding around it) can
/// reproduce the exact layout. `alignment` is accepted for call-site parity with callers that
/// track a known stack alignment entering the clean call, but this crate's stack layout is
/// fixed width and does not need it.
pub fn insert_push_all_registers(
    cursor: &mut ListCursor,
    skip_save_aflags: bool,
    push_pc: PushPc,
    _alignment: u32,
    cfg: &MangleConfig,
    mode: IsaMode,
) -> u32 {
    let mut bytes = 0u32;

    cursor.insert_before(vstmdb(mode, SIMD_DREGS_PER_HALF));
    cursor.insert_before(vstmdb(mode, SIMD_DREGS_PER_HALF));
    bytes += 2 * 16 * 8;

    if !skip_save_aflags {
        let mut scratch = Reg::R0;
        let mut slot = cfg.scratch_slot(Reg::R0);
        if let PushPc::Reg(r) = push_pc {
            if r == scratch {
                scratch = Reg::R1;
                slot = cfg.scratch_slot(Reg::R1);
            }
        }
        cursor.insert_before(tls::save_to_tls(scratch, slot, mode));
        cursor.insert_before(mrs_cpsr(scratch, mode));
        cursor.insert_before(push_reg(scratch, mode));
        bytes += 4;
        match push_pc {
            PushPc::Imm(val) => {
                insert_mov_immed_arch(cursor, scratch, val as u32, crate::isa::Predicate::Al, mode);
                cursor.insert_before(push_reg(scratch, mode));
            }
            PushPc::Reg(r) => {
                cursor.insert_before(push_reg(r, mode));
            }
        }
        bytes += 4;
        cursor.insert_before(tls::restore_from_tls(scratch, slot, mode));
    }

    let gprs = gpr_bank_reglist(mode);
    if mode == IsaMode::T32 {
        cursor.insert_before(push_reg(Reg::LR, mode));
        cursor.insert_before(sub_sp(4, mode));
        cursor.insert_before(stmdb_wb(gprs, mode));
        bytes += 15 * 4;
    } else {
        cursor.insert_before(stmdb_wb(gprs, mode));
        bytes += 14 * 4;
    }

    bytes
}

/// Pop the context pushed by `insert_push_all_registers`, in reverse order. The popped PC slot
/// is discarded; the real resume address comes from the indirect-branch path, not the stack.
/// T32's `stm`/`ldm` can't list `sp`, so the push side spills `lr` separately with a padding
/// slot ahead of the 13-register block; the pop side undoes exactly that, register by register,
/// in reverse. A32's `ldm` lists `lr` directly alongside r0-r12, so a single `ldm` suffices.
pub fn insert_pop_all_registers(cursor: &mut ListCursor, skip_save_aflags: bool, cfg: &MangleConfig, mode: IsaMode) {
    let gprs = gpr_bank_reglist(mode);
    if mode == IsaMode::T32 {
        cursor.insert_before(ldm_wb(gprs, mode));
        cursor.insert_before(add_sp(4, mode));
        cursor.insert_before(pop_reg(Reg::LR, mode));
    } else {
        cursor.insert_before(ldm_wb(gprs, mode));
    }

    if !skip_save_aflags {
        let scratch = Reg::R0;
        let slot = cfg.scratch_slot(Reg::R0);
        cursor.insert_before(add_sp(4, mode)); // discard the saved pc slot
        cursor.insert_before(tls::save_to_tls(scratch, slot, mode));
        cursor.insert_before(pop_reg(scratch, mode));
        cursor.insert_before(msr_cpsr(scratch, mode));
        cursor.insert_before(tls::restore_from_tls(scratch, slot, mode));
    }

    cursor.insert_before(vldmia(mode, SIMD_DREGS_PER_HALF));
    cursor.insert_before(vldmia(mode, SIMD_DREGS_PER_HALF));
}

/// An argument to a clean call: a register value or an immediate. Other operand shapes are
/// not implemented (matching the reference's own naive parameter preparation).
#[derive(Copy, Clone, Debug)]
pub enum CallArg {
    Reg(Reg),
    Imm(i64),
}

/// Place up to `NUM_REGPARM` arguments into r0..r(N-1), ahead of a clean call.
pub fn insert_parameter_preparation(
    cursor: &mut ListCursor,
    args: &[CallArg],
    mode: IsaMode,
) -> MangleResult<()> {
    if args.len() > NUM_REGPARM {
        return Err(MangleError::not_implemented("insert_parameter_preparation: only up to NUM_REGPARM args"));
    }
    for (i, arg) in args.iter().enumerate() {
        let dst = REGPARMS[i];
        match *arg {
            CallArg::Imm(val) => {
                insert_mov_immed_arch(cursor, dst, val as u32, crate::isa::Predicate::Al, mode);
            }
            CallArg::Reg(src) if src != dst => {
                cursor.insert_before(
                    InstructionData::new(Opcode::DataOrMem, "mov", mode, Translation::Meta)
                        .with_dsts([Operand::Reg(dst)])
                        .with_srcs([Operand::Reg(src)]),
                );
            }
            CallArg::Reg(_) => {}
        }
    }
    Ok(())
}
