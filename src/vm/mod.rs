mod dynstr;
mod image;
mod ops;
mod profile;
mod value;
mod vm;
pub mod dump;
pub mod verifier;

pub use dynstr::{DynString, Str};
pub use image::{Image, ImageBuilder, ImageError, Instruction, Operand, MAX_OPERANDS, WORD};
pub use ops::{Arity, Opcode};
pub use profile::OpcodeProfile;
pub use value::Value;
pub use verifier::{Verifier, VerifyError};
pub use vm::{RuntimeError, Trap, STACK_SIZE, VM};
