//! Static verifier for loaded images.
//!
//! Checks, per instruction:
//! - The opcode is known and executable
//! - The operand count matches the opcode
//! - Literal and register operands stay inside their tables
//! - Integer jump targets name an instruction
//!
//! Register-valued jump targets and slot indices computed at run time are
//! left to the engine's traps.

use thiserror::Error;

use super::image::{Image, Operand};
use super::ops::Opcode;
use super::vm::STACK_SIZE;

/// Verification error types. `index` is the one-based instruction index.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("instruction {index}: unknown opcode {code}")]
    UnknownOpcode { index: usize, code: u64 },

    #[error("instruction {index}: reserved opcode {op}")]
    ReservedOpcode { index: usize, op: Opcode },

    #[error("instruction {index}: {op} takes {expected} operands, found {actual}")]
    OperandCount {
        index: usize,
        op: Opcode,
        expected: usize,
        actual: usize,
    },

    #[error("instruction {index}: literal index {literal} out of range ({count} literals)")]
    LiteralOutOfRange {
        index: usize,
        literal: u64,
        count: usize,
    },

    #[error("instruction {index}: register r{register} is beyond the stack")]
    RegisterOutOfRange { index: usize, register: u64 },

    #[error("instruction {index}: jump target {target} is outside 1..={count}")]
    InvalidJumpTarget {
        index: usize,
        target: i64,
        count: usize,
    },
}

/// Image verifier
pub struct Verifier {
    stack_size: usize,
}

impl Default for Verifier {
    fn default() -> Self {
        Self {
            stack_size: STACK_SIZE,
        }
    }
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report the first problem found, scanning in instruction order.
    pub fn verify(&self, image: &Image) -> Result<(), VerifyError> {
        let count = image.instruction_count();
        for (i, instr) in image.instructions().iter().enumerate() {
            let index = i + 1;
            let op = instr.op.ok_or(VerifyError::UnknownOpcode {
                index,
                code: instr.code,
            })?;
            if op.is_reserved() {
                return Err(VerifyError::ReservedOpcode { index, op });
            }

            let arity = op.arity();
            if !arity.accepts(instr.operands.len()) {
                return Err(VerifyError::OperandCount {
                    index,
                    op,
                    expected: arity.expected(),
                    actual: instr.operands.len(),
                });
            }

            for operand in &instr.operands {
                match *operand {
                    Operand::Literal(literal) if literal >= image.literal_count() as u64 => {
                        return Err(VerifyError::LiteralOutOfRange {
                            index,
                            literal,
                            count: image.literal_count(),
                        });
                    }
                    Operand::Register(register) if register >= self.stack_size as u64 => {
                        return Err(VerifyError::RegisterOutOfRange { index, register });
                    }
                    _ => {}
                }
            }

            if op.is_jump() {
                if let Some(&Operand::Int(target)) = instr.operands.first() {
                    if target < 1 || target as u64 > count as u64 {
                        return Err(VerifyError::InvalidJumpTarget {
                            index,
                            target,
                            count,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
