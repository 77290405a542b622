//! The instruction IR the mangler operates on.

pub mod entities;
pub mod instr;
pub mod list;
pub mod opcode;
pub mod operand;

pub use entities::{Inst, Label};
pub use instr::{InstructionData, OperandVec, TlsMarker, Translation};
pub use list::InstrList;
pub use opcode::{MultiMode, Opcode};
pub use operand::{BranchTarget, MemOperand, Operand};
