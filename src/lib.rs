//! ARM A32/T32 instruction-stream mangling: the pass a dynamic binary instrumentation engine
//! runs over each block of decoded application instructions before it is copied into the code
//! cache.
//!
//! The mangler turns an instruction the application could not run unmodified in the code
//! cache (a PC-relative reference, a control transfer, an instruction touching the engine's
//! reserved stolen register, a short branch that may no longer reach) into an equivalent
//! sequence that can. It never decodes or encodes application bytes itself; see [`codec`] for
//! the seam where a real frontend/backend plugs in.
//!
//! [`mangle`] holds the rewrite rules, organized one family per module. [`ir`] is the
//! arena-backed instruction list they edit; [`cursor`] is how a rewrite walks and edits it.
//! [`config`] threads the engine's stolen-register and TLS-slot layout through every entry
//! point instead of relying on globals.

pub mod codec;
pub mod config;
pub mod cursor;
pub mod errors;
pub mod ir;
pub mod isa;
pub mod mangle;
pub mod regalloc;
