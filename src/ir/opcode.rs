//! The slice of the ARM A32/T32 opcode space the mangler dispatches on.
//!
//! This is not a full disassembler's opcode table: it only names the operations the
//! mangling rules inspect or synthesize. An embedder's decoder is expected to map its own,
//! richer opcode space down onto these variants (or onto `Opcode::Other`, carried with raw
//! bytes) before handing instructions to this crate.

use core::fmt;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Addressing mode of a multi-register load/store, named the way the reference manual does:
/// increment-after, increment-before, decrement-after, decrement-before.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum MultiMode {
    Ia,
    Ib,
    Da,
    Db,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Opcode {
    /// Data-processing or single-register transfer with no special mangling relevance beyond
    /// operand inspection (`mov`, `add`, `sub`, `orr`, `mvn`, `ldr`, `str`, `ldrb`, `ldrh`, ...).
    /// The specific mnemonic lives in `InstructionData::mnemonic` for display and for the
    /// handful of rewrites (`mov`/`mvn`/`add`/`orr`) that match on it explicitly.
    DataOrMem,
    /// `movw`/`movt` pointer materialization half.
    MovWide { top_half: bool },
    /// `ldm`/`stm` with explicit addressing mode.
    LoadMulti(MultiMode),
    StoreMulti(MultiMode),
    /// `push`/`pop`, the sp-implicit aliases of stm/ldm.
    Push,
    Pop,
    /// Unconditional or conditional branch with a long (word-reaching) displacement.
    Branch,
    /// A short (T16) conditional branch, limited displacement.
    BranchShort,
    /// `cbz`/`cbnz`, compare-and-branch, T16-only, extremely limited displacement.
    CompareBranchZero { negate: bool },
    /// `bl`/`blx` with an immediate target.
    BranchLinkImm { mode_switch: bool },
    /// `blx reg`, indirect call.
    BranchLinkReg,
    /// `bx`/`bxj reg`.
    BranchExchange,
    /// `tbb`/`tbh`, table branch byte/halfword.
    TableBranch { halfword: bool },
    /// `it`, Thumb-2 if-then block header. Operand 0 carries the packed mask, src0 the base
    /// predicate, and `it_len` the number of predicated instructions it covers.
    It { it_len: u8 },
    /// A pseudo-instruction marking a branch target; never encoded, only used for layout.
    Label,
    /// `svc`/`swi`, a system call.
    Syscall,
    /// Any instruction this crate does not need to mangle specially.
    Other,
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Opcode::DataOrMem => write!(f, "dataormem"),
            Opcode::MovWide { top_half } => {
                write!(f, "{}", if *top_half { "movt" } else { "movw" })
            }
            Opcode::LoadMulti(m) => write!(f, "ldm{}", mode_suffix(*m)),
            Opcode::StoreMulti(m) => write!(f, "stm{}", mode_suffix(*m)),
            Opcode::Push => write!(f, "push"),
            Opcode::Pop => write!(f, "pop"),
            Opcode::Branch => write!(f, "b"),
            Opcode::BranchShort => write!(f, "b_short"),
            Opcode::CompareBranchZero { negate } => {
                write!(f, "{}", if *negate { "cbnz" } else { "cbz" })
            }
            Opcode::BranchLinkImm { mode_switch } => {
                write!(f, "{}", if *mode_switch { "blx" } else { "bl" })
            }
            Opcode::BranchLinkReg => write!(f, "blx"),
            Opcode::BranchExchange => write!(f, "bx"),
            Opcode::TableBranch { halfword } => write!(f, "{}", if *halfword { "tbh" } else { "tbb" }),
            Opcode::It { it_len } => write!(f, "it(len={})", it_len),
            Opcode::Label => write!(f, "label"),
            Opcode::Syscall => write!(f, "svc"),
            Opcode::Other => write!(f, "other"),
        }
    }
}

fn mode_suffix(m: MultiMode) -> &'static str {
    match m {
        MultiMode::Ia => "ia",
        MultiMode::Ib => "ib",
        MultiMode::Da => "da",
        MultiMode::Db => "db",
    }
}

impl Opcode {
    pub fn is_cti(self) -> bool {
        matches!(
            self,
            Opcode::Branch
                | Opcode::BranchShort
                | Opcode::CompareBranchZero { .. }
                | Opcode::BranchLinkImm { .. }
                | Opcode::BranchLinkReg
                | Opcode::BranchExchange
                | Opcode::TableBranch { .. }
        )
    }

    pub fn is_multi_reg(self) -> bool {
        matches!(
            self,
            Opcode::LoadMulti(_) | Opcode::StoreMulti(_) | Opcode::Push | Opcode::Pop
        )
    }
}
