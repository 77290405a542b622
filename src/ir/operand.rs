//! Instruction operands.

use crate::isa::registers::{Reg, RegList};
use crate::ir::entities::{Inst, Label};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A memory operand: `[base, index <shift> #disp]` with an optional negated-displacement
/// marker (the T32 encoding space for negative literal-pool offsets has no direct immediate
/// form, so mangling code needs to know the sign was folded into `disp`).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct MemOperand {
    pub base: Reg,
    pub index: Option<Reg>,
    pub shift: u8,
    pub disp: i32,
    pub negated: bool,
    /// Size in bytes of the transfer (1, 2, 4, or 8), used to pick ldrb/ldrh/ldr/ldrd.
    pub size: u8,
}

impl MemOperand {
    pub fn simple(base: Reg, disp: i32) -> Self {
        MemOperand {
            base,
            index: None,
            shift: 0,
            disp,
            negated: false,
            size: 4,
        }
    }

    pub fn with_base(self, base: Reg) -> Self {
        MemOperand { base, ..self }
    }
}

/// A branch target: either a concrete label already in the list, or a raw application address
/// (used before the target's corresponding `Inst`/`Label` is known, e.g. cross-fragment
/// targets resolved only at link time).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum BranchTarget {
    Label(Label),
    /// An absolute address in application space, tagged with the interworking mode bit.
    AppAddr(u32),
}

/// A single operand in an instruction's source or destination list.
#[derive(Copy, Clone, PartialEq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Operand {
    Reg(Reg),
    /// A signed immediate, wide enough to cover pointer-sized materializations.
    Imm(i64),
    Mem(MemOperand),
    RegList(RegList),
    Branch(BranchTarget),
    /// A reference to another instruction, used by `it` to track the instructions it governs
    /// and by split/splice bookkeeping; never an encodable operand on its own.
    InstRef(Inst),
    /// A thread-local storage slot, addressed relative to the engine's per-thread base
    /// register. Used only by the save/restore/swap instructions `mangle::tls` synthesizes;
    /// real application instructions never carry this operand kind.
    Tls(i32),
}

impl Operand {
    pub fn as_reg(self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_mem(self) -> Option<MemOperand> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_mem_mut(&mut self) -> Option<&mut MemOperand> {
        match self {
            Operand::Mem(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_reglist(self) -> Option<RegList> {
        match self {
            Operand::RegList(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_imm(self) -> Option<i64> {
        match self {
            Operand::Imm(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_branch_target(self) -> Option<BranchTarget> {
        match self {
            Operand::Branch(t) => Some(t),
            _ => None,
        }
    }
}
