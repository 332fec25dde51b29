pub mod a32;
pub mod a64;
pub mod code_buffer;
pub mod cond;
pub mod decode;
pub mod disasm;
pub mod emit;
pub mod error;
pub mod imm;
pub mod label;

pub use code_buffer::CodeBuffer;
pub use cond::{Cond, Shift};
pub use emit::{Arm, Arm64, Code, Emitter, Isa, Target};
pub use error::EncodeError;
pub use label::{FixupKind, Label};

#[cfg(test)]
mod tests;
