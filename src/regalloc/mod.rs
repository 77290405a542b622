//! Scratch-register selection for the mangler.
//!
//! There is no general-purpose allocator here: the mangler only ever borrows a register from
//! the fixed r0-r3 scratch pool, for the duration of a single app instruction's rewrite.

pub mod register_set;
pub mod scratch;

pub use register_set::RegisterSet;
pub use scratch::{pick_scratch_reg, ScratchPick};
