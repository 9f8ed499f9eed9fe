use crate::error::Error;

/// Number of addressable cells.
pub const MEMORY_SIZE: usize = 256;

/// Flat byte-addressable storage shared by code, data and the stack.
///
/// Addresses are `usize` so that an instruction fetch past the last cell
/// surfaces as `AddressOutOfRange` instead of silently wrapping to 0.
#[derive(Clone)]
pub struct Memory {
    cells: [u8; MEMORY_SIZE],
}

impl Memory {
    pub fn new() -> Self {
        Self {
            cells: [0u8; MEMORY_SIZE],
        }
    }

    pub fn read(&self, address: usize) -> Result<u8, Error> {
        self.cells
            .get(address)
            .copied()
            .ok_or(Error::AddressOutOfRange(address))
    }

    pub fn write(&mut self, address: usize, value: u8) -> Result<(), Error> {
        let cell = self
            .cells
            .get_mut(address)
            .ok_or(Error::AddressOutOfRange(address))?;
        *cell = value;
        Ok(())
    }

    /// Unchecked-by-contract read for diagnostics: out-of-range yields `None`.
    pub fn peek(&self, address: usize) -> Option<u8> {
        self.cells.get(address).copied()
    }

    /// Install `image` at address 0. Cells past the image are zeroed.
    pub fn load(&mut self, image: &[u8]) -> Result<(), Error> {
        if image.len() > MEMORY_SIZE {
            return Err(Error::ProgramTooLarge(image.len()));
        }
        self.cells = [0u8; MEMORY_SIZE];
        self.cells[..image.len()].copy_from_slice(image);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.cells
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}
