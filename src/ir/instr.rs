//! The instruction record stored per `Inst` in an `InstrList`.

use smallvec::SmallVec;

use crate::isa::{IsaMode, Predicate};
use crate::ir::opcode::Opcode;
use crate::ir::operand::Operand;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// Most instructions this crate manipulates have at most four operands on either side; a few
/// synthesized raw-byte CBZ sequences and `it` carry a couple more logical operands for
/// bookkeeping, but never enough to justify heap storage on the common path.
pub type OperandVec = SmallVec<[Operand; 4]>;

/// Translation provenance of an instruction.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum Translation {
    /// Corresponds to a real application instruction at this address; it will be translated
    /// back to the application PC when the engine needs to recover context.
    App(u32),
    /// Synthesized by the mangler; never mapped back to an application address.
    Meta,
}

impl Translation {
    pub fn is_meta(self) -> bool {
        matches!(self, Translation::Meta)
    }

    pub fn app_pc(self) -> Option<u32> {
        match self {
            Translation::App(pc) => Some(pc),
            Translation::Meta => None,
        }
    }
}

/// A single instruction. Operand lists are mutable in place so that in-place peepholes
/// (the stolen-register `mov`/`mvn` rewrite, PC-relative base substitution) don't need to
/// remove and reinsert the instruction.
/// Not `Deserialize`: `mnemonic` is a `&'static str` naming one of this crate's own built-in
/// literals, which a deserializer has no way to produce; `enable-serde` only needs to let an
/// embedder inspect a mangled list (e.g. to log or snapshot it), not round-trip one.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize))]
pub struct InstructionData {
    pub opcode: Opcode,
    /// Mnemonic as the source disassembler named it; used for display and for the few
    /// rewrites that care about the exact instruction (`mov`, `mvn`, `add`, `orr`, `ldr`).
    pub mnemonic: &'static str,
    pub predicate: Predicate,
    pub mode: IsaMode,
    pub srcs: OperandVec,
    pub dsts: OperandVec,
    pub translation: Translation,
    /// Raw encoding override. Set only by rewrites (CBZ/CBNZ widening, short-branch
    /// re-relativization) whose logical operand model can't express the synthesized bytes.
    pub raw_bytes: Option<SmallVec<[u8; 6]>>,
    /// Tags instructions created by `mangle::tls` so the scratch-register picker can
    /// recognize and fuse adjacent save/restore pairs without pattern-matching mnemonics.
    pub tls_marker: Option<TlsMarker>,
}

/// Marks a meta instruction as a TLS-slot spill or fill of a scratch register, so later
/// passes can recognize it without inspecting its encoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub enum TlsMarker {
    Save(crate::isa::registers::Reg),
    Restore(crate::isa::registers::Reg),
}

impl InstructionData {
    pub fn new(opcode: Opcode, mnemonic: &'static str, mode: IsaMode, translation: Translation) -> Self {
        InstructionData {
            opcode,
            mnemonic,
            predicate: Predicate::Al,
            mode,
            srcs: OperandVec::new(),
            dsts: OperandVec::new(),
            translation,
            raw_bytes: None,
            tls_marker: None,
        }
    }

    pub fn with_tls_marker(mut self, marker: TlsMarker) -> Self {
        self.tls_marker = Some(marker);
        self
    }

    pub fn with_predicate(mut self, p: Predicate) -> Self {
        self.predicate = p;
        self
    }

    pub fn with_srcs(mut self, srcs: impl IntoIterator<Item = Operand>) -> Self {
        self.srcs = srcs.into_iter().collect();
        self
    }

    pub fn with_dsts(mut self, dsts: impl IntoIterator<Item = Operand>) -> Self {
        self.dsts = dsts.into_iter().collect();
        self
    }

    pub fn is_predicated(&self) -> bool {
        self.predicate.is_conditional()
    }

    pub fn reads_reg(&self, r: crate::isa::registers::Reg) -> bool {
        self.srcs.iter().any(|o| operand_reads(o, r))
    }

    pub fn writes_reg(&self, r: crate::isa::registers::Reg) -> bool {
        self.dsts.iter().any(|o| operand_writes(o, r))
    }

    pub fn reads_or_writes(&self, r: crate::isa::registers::Reg) -> bool {
        self.reads_reg(r) || self.writes_reg(r)
    }
}

fn operand_reads(op: &Operand, r: crate::isa::registers::Reg) -> bool {
    match *op {
        Operand::Reg(rr) => rr == r,
        Operand::Mem(m) => m.base == r || m.index == Some(r),
        Operand::RegList(l) => l.contains(r),
        _ => false,
    }
}

fn operand_writes(op: &Operand, r: crate::isa::registers::Reg) -> bool {
    match *op {
        Operand::Reg(rr) => rr == r,
        Operand::RegList(l) => l.contains(r),
        _ => false,
    }
}
