//! The emulated ROM window.

use thiserror::Error;

/// Size of the host's address space
pub const ADDRESS_SPACE: u32 = 0x1_0000;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ImageError {
    #[error("ROM image is empty")]
    Empty,
    #[error("ROM image of {len} bytes at {base:#06X} runs past the 64K address space")]
    Overflow { base: u16, len: usize },
}

/// Immutable map from absolute host address to byte, defined over
/// `[base, base + len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryImage<'a> {
    base: u16,
    data: &'a [u8],
}

impl<'a> MemoryImage<'a> {
    pub fn new(base: u16, data: &'a [u8]) -> Result<Self, ImageError> {
        if data.is_empty() {
            return Err(ImageError::Empty);
        }
        if data.len() > ADDRESS_SPACE as usize || u32::from(base) + data.len() as u32 > ADDRESS_SPACE {
            return Err(ImageError::Overflow {
                base,
                len: data.len(),
            });
        }
        Ok(Self { base, data })
    }

    /// Byte at `addr`, or `None` when the address is outside the window.
    #[inline(always)]
    pub fn lookup(&self, addr: u16) -> Option<u8> {
        let offset = addr.wrapping_sub(self.base) as usize;
        if addr >= self.base && offset < self.data.len() {
            Some(self.data[offset])
        } else {
            None
        }
    }

    pub fn contains(&self, addr: u16) -> bool {
        addr >= self.base && u32::from(addr) < self.end()
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    /// One past the last mapped address
    pub fn end(&self) -> u32 {
        u32::from(self.base) + self.data.len() as u32
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
