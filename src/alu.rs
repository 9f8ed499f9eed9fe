use crate::error::Error;
use crate::flags::Flags;
use crate::opcode::Opcode;

/// What an ALU operation produces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AluOutput {
    /// New value for the destination register.
    Value(u8),
    /// New contents of the flags register.
    Flags(Flags),
}

/// Apply `op` to two already-resolved register values.
///
/// Arithmetic wraps modulo 256. Any opcode other than ADD, MUL or CMP is a
/// dispatch bug and yields `UnsupportedAluOp`.
pub fn execute(op: Opcode, a: u8, b: u8) -> Result<AluOutput, Error> {
    match op {
        Opcode::Add => Ok(AluOutput::Value(a.wrapping_add(b))),
        Opcode::Mul => Ok(AluOutput::Value(a.wrapping_mul(b))),
        Opcode::Cmp => Ok(AluOutput::Flags(Flags::compare(a, b))),
        other => Err(Error::UnsupportedAluOp(other)),
    }
}
