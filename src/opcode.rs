/// Operations understood by the machine, plus `Unknown` for any other byte.
///
/// Opcode byte layout:
/// - bits 7-6: number of operand bytes that follow (0, 1 or 2)
/// - bit 5: 1 if the operation runs through the ALU
/// - bit 4: 1 if the operation writes the PC itself
/// - bits 3-0: operation identifier
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Opcode {
    Hlt,
    Ldi,
    Prn,
    Add,
    Mul,
    Cmp,
    Push,
    Pop,
    Call,
    Ret,
    Jmp,
    Jeq,
    Jne,
    Unknown(u8),
}

impl Opcode {
    /// Every defined opcode, in table order.
    pub const ALL: [Opcode; 13] = [
        Opcode::Hlt,
        Opcode::Ldi,
        Opcode::Prn,
        Opcode::Add,
        Opcode::Mul,
        Opcode::Cmp,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Jmp,
        Opcode::Jeq,
        Opcode::Jne,
    ];

    /// The encoding of each opcode. `from_byte` is derived from this.
    pub const fn to_byte(self) -> u8 {
        match self {
            Opcode::Hlt => 0b0000_0001,
            Opcode::Ldi => 0b1000_0010,
            Opcode::Prn => 0b0100_0111,
            Opcode::Add => 0b1010_0000,
            Opcode::Mul => 0b1010_0010,
            Opcode::Cmp => 0b1010_0111,
            Opcode::Push => 0b0100_0101,
            Opcode::Pop => 0b0100_0110,
            Opcode::Call => 0b0101_0000,
            Opcode::Ret => 0b0001_0001,
            Opcode::Jmp => 0b0101_0100,
            Opcode::Jeq => 0b0101_0101,
            Opcode::Jne => 0b0101_0110,
            Opcode::Unknown(byte) => byte,
        }
    }

    pub fn from_byte(byte: u8) -> Self {
        DECODE_TABLE[byte as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Hlt => "HLT",
            Opcode::Ldi => "LDI",
            Opcode::Prn => "PRN",
            Opcode::Add => "ADD",
            Opcode::Mul => "MUL",
            Opcode::Cmp => "CMP",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Jmp => "JMP",
            Opcode::Jeq => "JEQ",
            Opcode::Jne => "JNE",
            Opcode::Unknown(_) => "???",
        }
    }
}

/// Byte-indexed lookup built from `Opcode::to_byte`.
static DECODE_TABLE: [Opcode; 256] = build_decode_table();

const fn build_decode_table() -> [Opcode; 256] {
    let mut table = [Opcode::Unknown(0); 256];
    let mut byte = 0;
    while byte < 256 {
        table[byte] = Opcode::Unknown(byte as u8);
        byte += 1;
    }
    let mut i = 0;
    while i < Opcode::ALL.len() {
        let op = Opcode::ALL[i];
        table[op.to_byte() as usize] = op;
        i += 1;
    }
    table
}

/// A decoded opcode byte.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    /// Operand bytes following the opcode (0, 1 or 2).
    pub operand_count: usize,
    /// Route through the ALU.
    pub is_alu: bool,
    /// The operation writes the PC itself instead of falling through.
    pub sets_pc: bool,
}

impl Instruction {
    /// Total encoded length in bytes, opcode included.
    pub fn size(&self) -> usize {
        1 + self.operand_count
    }
}

/// Classify a fetched byte. Pure; unknown bytes decode to `Opcode::Unknown`
/// with the operand count and routing bits still taken from the byte.
pub fn decode(byte: u8) -> Instruction {
    Instruction {
        opcode: Opcode::from_byte(byte),
        operand_count: (byte >> 6) as usize,
        is_alu: (byte >> 5) & 1 == 1,
        sets_pc: (byte >> 4) & 1 == 1,
    }
}
