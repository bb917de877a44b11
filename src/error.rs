//! Assembly and execution error types.

use crate::token::Op;
use thiserror::Error;

/// Errors raised while compiling source text. Any of them aborts the whole compile.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum AsmError {
    /// Mnemonic is not one of the known opcodes.
    #[error("line {line}: unknown instruction `{token}`")]
    UnknownInstruction { token: String, line: usize },
    /// Operand is neither a label reference nor a decimal integer.
    #[error("line {line}: invalid operand `{token}`")]
    InvalidOperand { token: String, line: usize },
    /// Operand refers to a label that is never declared.
    #[error("line {line}: undefined label `{name}`")]
    UndefinedLabel { name: String, line: usize },
    /// Label declared more than once.
    #[error("line {line}: duplicate label `{name}`")]
    DuplicateLabel { name: String, line: usize },
    /// Something follows the operand or the label declaration.
    #[error("line {line}: unexpected token `{token}`")]
    TrailingToken { token: String, line: usize },
}

impl AsmError {
    /// 1-based source line the error was found on.
    pub fn line(&self) -> usize {
        match self {
            AsmError::UnknownInstruction { line, .. }
            | AsmError::InvalidOperand { line, .. }
            | AsmError::UndefinedLabel { line, .. }
            | AsmError::DuplicateLabel { line, .. }
            | AsmError::TrailingToken { line, .. } => *line,
        }
    }
}

/// Runtime faults. A fault stops the machine until the next load.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum Fault {
    #[error("stack underflow")]
    StackUnderflow,
    #[error("memory address out of bounds: {0}")]
    MemoryOutOfBounds(i64),
    #[error("division by zero")]
    DivisionByZero,
    #[error("call stack underflow")]
    CallStackUnderflow,
    #[error("{0} instruction requires an operand")]
    MissingOperand(Op),
    #[error("invalid jump target: {0}")]
    InvalidJumpTarget(i64),
    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(Op),
    #[error("step limit of {0} exceeded")]
    StepLimitExceeded(u64),
    #[error("output failed: {0}")]
    Output(String),
}
