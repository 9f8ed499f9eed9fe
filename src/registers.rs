use crate::error::Error;

pub const NUM_REGISTERS: usize = 8;

/// R6 holds the stack pointer by convention.
pub const SP: usize = 6;

/// Eight byte-wide general purpose registers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RegisterFile {
    regs: [u8; NUM_REGISTERS],
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, index: usize) -> Result<u8, Error> {
        self.regs
            .get(index)
            .copied()
            .ok_or(Error::RegisterOutOfRange(index))
    }

    pub fn set(&mut self, index: usize, value: u8) -> Result<(), Error> {
        let reg = self
            .regs
            .get_mut(index)
            .ok_or(Error::RegisterOutOfRange(index))?;
        *reg = value;
        Ok(())
    }

    #[inline]
    pub fn sp(&self) -> u8 {
        self.regs[SP]
    }

    #[inline]
    pub fn set_sp(&mut self, value: u8) {
        self.regs[SP] = value;
    }

    pub fn as_array(&self) -> &[u8; NUM_REGISTERS] {
        &self.regs
    }
}
