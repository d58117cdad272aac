#[cfg(test)]
pub mod asm;
pub mod disasm;
pub mod ir;
pub mod op;

pub use ir::{ConvImage, DataType, ImportedItem};
pub use op::{OPCODES, Opcode, OpcodeInfo};
