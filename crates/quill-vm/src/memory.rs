//! Byte-addressable frame memory.
//!
//! Memory grows in 32-byte steps on first touch and reads zero beyond its
//! current end. Accesses past [`MEMORY_LIMIT`] halt the frame as if gas had
//! run out.

use num_bigint::BigUint;
use quill_core::num::{to_u64, word_from_bytes, word_to_bytes};

use crate::error::Halt;

/// Largest memory a frame may grow to.
pub const MEMORY_LIMIT: usize = 1 << 25;

#[derive(Debug, Default, Clone)]
pub struct Memory {
    data: Vec<u8>,
}

/// Byte range of an access, validated against [`MEMORY_LIMIT`]. Zero-sized
/// ranges never touch memory, whatever their offset.
pub fn range(offset: &BigUint, size: &BigUint) -> Result<(usize, usize), Halt> {
    let size = to_usize(size)?;
    if size == 0 {
        return Ok((0, 0));
    }
    let offset = to_usize(offset)?;
    if offset + size > MEMORY_LIMIT {
        return Err(Halt::OutOfGas);
    }
    Ok((offset, size))
}

/// A word used as a size or offset.
pub fn to_usize(word: &BigUint) -> Result<usize, Halt> {
    to_u64(word)
        .and_then(|value| usize::try_from(value).ok())
        .filter(|value| *value <= MEMORY_LIMIT)
        .ok_or(Halt::OutOfGas)
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current size in bytes, always a multiple of 32.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn expand(&mut self, offset: usize, size: usize) {
        if size == 0 {
            return;
        }
        let end = (offset + size).div_ceil(32) * 32;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
    }

    pub fn load(&mut self, offset: &BigUint) -> Result<BigUint, Halt> {
        let (offset, _) = range(offset, &BigUint::from(32u32))?;
        self.expand(offset, 32);
        Ok(word_from_bytes(&self.data[offset..offset + 32]))
    }

    pub fn store(&mut self, offset: &BigUint, value: &BigUint) -> Result<(), Halt> {
        let (offset, _) = range(offset, &BigUint::from(32u32))?;
        self.expand(offset, 32);
        self.data[offset..offset + 32].copy_from_slice(&word_to_bytes(value));
        Ok(())
    }

    pub fn store_byte(&mut self, offset: &BigUint, value: &BigUint) -> Result<(), Halt> {
        let (offset, _) = range(offset, &BigUint::from(1u32))?;
        self.expand(offset, 1);
        self.data[offset] = word_to_bytes(value)[31];
        Ok(())
    }

    /// Copy of `size` bytes at `offset`.
    pub fn read(&mut self, offset: &BigUint, size: &BigUint) -> Result<Vec<u8>, Halt> {
        let (offset, size) = range(offset, size)?;
        self.expand(offset, size);
        Ok(self.data[offset..offset + size].to_vec())
    }

    /// Write `size` bytes at `offset` taken from `source[start..]`, padding
    /// with zeros past the end of `source`.
    pub fn copy_from(&mut self, offset: &BigUint, source: &[u8], start: &BigUint, size: &BigUint) -> Result<(), Halt> {
        let (offset, size) = range(offset, size)?;
        if size == 0 {
            return Ok(());
        }
        self.expand(offset, size);
        let start = to_u64(start)
            .and_then(|value| usize::try_from(value).ok())
            .unwrap_or(usize::MAX);
        let target = &mut self.data[offset..offset + size];
        for (index, byte) in target.iter_mut().enumerate() {
            *byte = start
                .checked_add(index)
                .and_then(|position| source.get(position))
                .copied()
                .unwrap_or(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(value: u64) -> BigUint {
        BigUint::from(value)
    }

    #[test]
    fn memory_grows_in_words() {
        let mut memory = Memory::new();
        memory.store_byte(&word(33), &word(0xab)).unwrap();
        assert_eq!(memory.len(), 64);
        assert_eq!(memory.load(&word(2)).unwrap(), word(0xab));
        assert_eq!(memory.load(&word(3)).unwrap(), word(0xab) << 8u32);
    }

    #[test]
    fn copies_pad_with_zeros() {
        let mut memory = Memory::new();
        memory.copy_from(&word(0), &[1, 2, 3], &word(1), &word(4)).unwrap();
        assert_eq!(memory.read(&word(0), &word(4)).unwrap(), vec![2, 3, 0, 0]);
    }

    #[test]
    fn empty_ranges_ignore_the_offset() {
        let mut memory = Memory::new();
        let huge = BigUint::from(1u32) << 200u32;
        assert_eq!(memory.read(&huge, &word(0)).unwrap(), Vec::<u8>::new());
        assert_eq!(memory.len(), 0);
        assert_eq!(memory.load(&huge), Err(Halt::OutOfGas));
    }
}
