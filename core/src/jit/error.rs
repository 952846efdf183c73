use thiserror::Error;

use crate::code::{DecodeError, Opcode};

/// Why a code unit could not be compiled at some level. Every variant leads
/// to a permanent interpreter fallback for that (unit, level) pair.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("malformed bytecode: {0}")]
    Decode(#[from] DecodeError),
    #[error("{opcode} at offset {offset} is not supported by the compiler")]
    Unsupported { opcode: Opcode, offset: usize },
    #[error("stack depth {found} at offset {offset} does not match {expected} from an earlier path")]
    StackMismatch {
        offset: usize,
        expected: usize,
        found: usize,
    },
    #[error("operand stack underflow at offset {offset}")]
    StackUnderflow { offset: usize },
    #[error("inconsistent block structure reaching offset {offset}")]
    InconsistentHandler { offset: usize },
}

impl CompileError {
    /// Lowering found the operand stack inconsistent. Well-formed bytecode
    /// never does this; the interpreter still runs the unit.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            CompileError::StackMismatch { .. }
                | CompileError::StackUnderflow { .. }
                | CompileError::InconsistentHandler { .. }
        )
    }

    /// Short machine-friendly tag for logs and statistics.
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Decode(_) => "decode",
            CompileError::Unsupported { .. } => "unsupported",
            CompileError::StackMismatch { .. } => "stack_mismatch",
            CompileError::StackUnderflow { .. } => "stack_underflow",
            CompileError::InconsistentHandler { .. } => "inconsistent_handler",
        }
    }
}
