//! Unaligned POD access over byte windows
//!
//! Records travel through the SPSC queues as raw bytes laid out in the
//! producer's native byte order. These cursors are the only way the rest of
//! the system touches those bytes.

use anyhow::{bail, Result};

/// Writes plain-old-data fields into a reserved queue slot.
pub struct WriteCursor<'a> {
    buffer: &'a mut [u8],
    pos: usize,
}

impl<'a> WriteCursor<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    /// The producer computes the record size before reserving the slot, so a
    /// write past the end of the reservation is a bug, not a runtime error.
    #[inline(always)]
    pub fn write_pod<T: Copy>(&mut self, value: &T) {
        let size = std::mem::size_of::<T>();
        assert!(
            self.pos + size <= self.buffer.len(),
            "write of {} bytes overflows a {} byte reservation at offset {}",
            size,
            self.buffer.len(),
            self.pos
        );
        unsafe {
            std::ptr::copy_nonoverlapping(
                (value as *const T).cast::<u8>(),
                self.buffer.as_mut_ptr().add(self.pos),
                size,
            );
        }
        self.pos += size;
    }

    #[inline(always)]
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        assert!(self.pos + bytes.len() <= self.buffer.len());
        self.buffer[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
    }

    pub fn written(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }
}

/// Reads plain-old-data fields back out of a queue slot.
///
/// Unlike the write side, reads are fallible: the decoder function embedded
/// in a record is user-provided and a disagreement about the payload layout
/// must surface as an error, not as an out-of-bounds access.
pub struct ReadCursor<'a> {
    buffer: &'a [u8],
    pos: usize,
}

impl<'a> ReadCursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, pos: 0 }
    }

    #[inline(always)]
    pub fn read_pod<T: Copy>(&mut self) -> Result<T> {
        let size = std::mem::size_of::<T>();
        if self.pos + size > self.buffer.len() {
            bail!(
                "record truncated: needed {} bytes, {} remaining",
                size,
                self.buffer.len() - self.pos
            );
        }
        let value =
            unsafe { std::ptr::read_unaligned(self.buffer.as_ptr().add(self.pos).cast::<T>()) };
        self.pos += size;
        Ok(value)
    }

    #[inline(always)]
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.buffer.len() {
            bail!(
                "record truncated: needed {} bytes, {} remaining",
                len,
                self.buffer.len() - self.pos
            );
        }
        let bytes = &self.buffer[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Bytes consumed so far; the queue advances by this amount.
    pub fn consumed(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len() - self.pos
    }
}
