//! Instruction-stream mangling: the public dispatch surface.
//!
//! Each submodule owns one rewrite family from the design; this module just re-exports the
//! entry points an embedder calls once its decoder has classified an instruction.

pub mod clean_call;
pub mod cti;
pub mod it_block;
pub mod ldm_stm;
pub mod materialize;
pub mod relocate_pc;
pub mod short_branch;
pub mod stolen_reg;
pub mod syscall;
pub mod tls;

pub use clean_call::{insert_parameter_preparation, insert_pop_all_registers, insert_push_all_registers, CallArg, PushPc, NUM_REGPARM};
pub use cti::{
    insert_reachable_cti, mangle_direct_call, mangle_indirect_call, mangle_indirect_jump, mangle_table_branch,
    JumpSource,
};
pub use it_block::reinstate_it_blocks;
pub use ldm_stm::{mangle_ldm_write, mangle_stm_read};
pub use materialize::insert_mov_immed_arch;
pub use relocate_pc::mangle_rel_addr;
pub use short_branch::{remangle_short_rewrite, widen_b_short, widen_cbz};
pub use stolen_reg::virtualize_stolen_reg;
pub use syscall::{mangle_insert_clone_code, mangle_syscall};

use crate::config::MangleConfig;
use crate::cursor::ListCursor;
use crate::errors::MangleResult;
use crate::ir::InstructionData;
use crate::isa::registers::Reg;

/// `bx`/`pop{pc}`/`ldm{..,pc}` are handled identically once reduced to "compute this value
/// into IBL_TARGET_REG and fall through" by `mangle_indirect_jump`; `mangle_return` is a thin
/// name matching the reference system's `instr_is_return` classification for callers that
/// dispatch on "this instruction is a plain function return" rather than on the general
/// indirect-jump family.
pub fn mangle_return(cursor: &mut ListCursor, source_reg: Reg, cfg: &MangleConfig) -> MangleResult<()> {
    mangle_indirect_jump(cursor, JumpSource::Register(source_reg), cfg)
}

/// Whether `data` reads the engine's reserved thread-register (the stolen register), and
/// therefore needs `virtualize_stolen_reg` applied before it can run unmodified.
pub fn mangle_reads_thread_register(data: &InstructionData, cfg: &MangleConfig) -> bool {
    data.reads_reg(cfg.stolen_reg())
}

/// Whether `data` touches any register the mangler treats specially (the stolen register or
/// PC), the trigger the reference system uses to decide whether an instruction needs any
/// mangling pass at all before it can be copied into the code cache verbatim.
pub fn mangle_special_registers(data: &InstructionData, cfg: &MangleConfig) -> bool {
    data.reads_or_writes(cfg.stolen_reg()) || data.reads_or_writes(Reg::PC)
}
