//! ARM ISA description: registers, condition codes, and instruction set state.
//!
//! Unlike a multi-target code generator, this crate speaks exactly one instruction set family
//! (ARM A32 plus its T32/Thumb-2 encoding), so the register file and predicate space are
//! hand-written constants rather than machine-generated from a shared description.

pub mod registers;

pub use registers::{Reg, GPR_COUNT};

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Which of the two interworking encodings an instruction belongs to.
///
/// The mode is a property of the instruction stream position, not of the processor alone:
/// A32 and T32 code can be interleaved through `bx`/`blx` mode switches, and the low bit of
/// every branch target encodes which mode the target expects.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum IsaMode {
    /// 32-bit ARM encoding.
    A32,
    /// Thumb-2, a mix of 16- and 32-bit encodings.
    T32,
}

impl IsaMode {
    /// The bit that a branch target's low bit must carry for the CPU to enter this mode.
    pub fn target_bit(self) -> u32 {
        match self {
            IsaMode::A32 => 0,
            IsaMode::T32 => 1,
        }
    }

    /// `dr_get_isa_mode`-equivalent: OR the mode marker into a raw target address so that
    /// `bx`/`blx`-style transfers land in the right mode.
    pub fn tag_target(self, pc: u32) -> u32 {
        (pc & !1) | self.target_bit()
    }

    /// Architectural bias added to a literal PC read by an instruction at `pc`, before any
    /// T32 word alignment is applied. A32 reads r15 as `pc + 8`; T32 reads it as `pc + 4`.
    pub fn pc_read_bias(self) -> u32 {
        match self {
            IsaMode::A32 => 8,
            IsaMode::T32 => 4,
        }
    }

    /// The architectural value of r15 observed by an instruction decoded at `pc`.
    ///
    /// T32 additionally rounds the biased value down to a word boundary (ARM ARM A2.3).
    pub fn cur_pc(self, pc: u32) -> u32 {
        let biased = pc.wrapping_add(self.pc_read_bias());
        match self {
            IsaMode::A32 => biased,
            IsaMode::T32 => biased & !0b11,
        }
    }
}

/// The 16 ARM condition codes, including the always-execute sentinel used by unpredicated
/// instructions.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Predicate {
    Eq = 0b0000,
    Ne = 0b0001,
    Cs = 0b0010,
    Cc = 0b0011,
    Mi = 0b0100,
    Pl = 0b0101,
    Vs = 0b0110,
    Vc = 0b0111,
    Hi = 0b1000,
    Ls = 0b1001,
    Ge = 0b1010,
    Lt = 0b1011,
    Gt = 0b1100,
    Le = 0b1101,
    Al = 0b1110,
}

impl Predicate {
    /// Whether this predicate requires IT-block cover in T32.
    pub fn is_conditional(self) -> bool {
        self != Predicate::Al
    }

    /// The logical inverse condition, used by the predicated-fallthrough trick and by
    /// CBZ/CBNZ widening.
    pub fn invert(self) -> Predicate {
        use Predicate::*;
        match self {
            Eq => Ne,
            Ne => Eq,
            Cs => Cc,
            Cc => Cs,
            Mi => Pl,
            Pl => Mi,
            Vs => Vc,
            Vc => Vs,
            Hi => Ls,
            Ls => Hi,
            Ge => Lt,
            Lt => Ge,
            Gt => Le,
            Le => Gt,
            // AL has no complement; by ARM ARM convention 0b1111 ("NV") is reserved and never
            // produced by this crate.
            Al => Al,
        }
    }

    /// The single-bit IT-block "then" (0) vs "else" (1) marker for `other` relative to the
    /// block's governing condition `self`.
    pub fn it_mask_bit(self, other: Predicate) -> bool {
        if other == self {
            false
        } else {
            debug_assert_eq!(other, self.invert());
            true
        }
    }
}
