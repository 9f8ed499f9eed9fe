pub mod error;
pub mod memory;
pub mod registers;
pub mod flags;
pub mod opcode;
pub mod alu;
pub mod cpu;
pub mod loader;
pub mod batch;
