use std::io;

use thiserror::Error;

use crate::opcode::Opcode;

/// Failures raised by the execution engine and its components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("memory address {0} is out of range (0-255)")]
    AddressOutOfRange(usize),

    #[error("register index {0} is out of range (0-7)")]
    RegisterOutOfRange(usize),

    /// The loaded program contains a byte that is not in the opcode table.
    #[error("unknown opcode {opcode:#010b} at address {address:#04X}")]
    UnknownOpcode { opcode: u8, address: usize },

    /// The engine routed a non-arithmetic opcode to the ALU. This is a
    /// dispatch bug, never a property of the program.
    #[error("unsupported ALU operation: {0:?}")]
    UnsupportedAluOp(Opcode),

    #[error("program is {0} bytes, memory holds 256")]
    ProgramTooLarge(usize),

    #[error("step limit of {0} instructions exceeded")]
    StepLimitExceeded(usize),

    #[error("failed to write output: {0}")]
    Output(#[from] io::Error),
}

/// Failures raised while turning a program listing into a memory image.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read program: {0}")]
    Io(#[from] io::Error),

    #[error("line {line}: '{text}' is not an 8-bit binary literal")]
    Malformed { line: usize, text: String },

    #[error("program is {len} bytes, memory holds 256")]
    TooLarge { len: usize },
}
