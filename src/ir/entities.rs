//! Opaque entity references into an instruction list.
//!
//! Instructions are not addressed by Rust references. Instead every instruction in an
//! `InstrList` is identified by an `Inst`, a small `u32`-wrapped index into the arena that
//! backs the list. This keeps instruction records movable in memory and keeps references
//! to them `Copy`.

use cranelift_entity::entity_impl;

#[cfg(feature = "enable-serde")]
use serde::{Deserialize, Serialize};

/// A reference to an instruction stored in an `InstrList`.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Inst(u32);
entity_impl!(Inst, "inst");

/// A reference to a meta label used as a branch target inside a mangled sequence.
///
/// Labels never carry application bytes; they exist purely to give a `mov`/`b` inserted by
/// the mangler something concrete to target before encoding time.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "enable-serde", derive(Serialize, Deserialize))]
pub struct Label(u32);
entity_impl!(Label, "lbl");
