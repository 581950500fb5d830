//! Bounds-checked access to guest linear memory.
//!
//! [`MemoryView`] borrows the raw byte slice of a guest memory for the span of
//! one host operation. Every accessor validates the full range before touching
//! a byte, so an out-of-range guest address turns into a [`MemoryError`]
//! instead of a partial write.

use thiserror::Error;

/// Out-of-range guest memory access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("guest memory access out of bounds: {len} bytes at {addr:#x} (memory size {size})")]
pub struct MemoryError {
    /// Start address.
    pub addr: usize,
    /// Requested length.
    pub len: usize,
    /// Memory size in bytes.
    pub size: usize,
}

/// Typed view over guest linear memory.
pub struct MemoryView<'a> {
    bytes: &'a mut [u8],
}

impl<'a> MemoryView<'a> {
    /// Wrap the byte slice of a guest memory.
    pub fn new(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Memory size in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the memory is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn range(&self, addr: usize, len: usize) -> Result<std::ops::Range<usize>, MemoryError> {
        let err = MemoryError {
            addr,
            len,
            size: self.bytes.len(),
        };
        let end = addr.checked_add(len).ok_or_else(|| err.clone())?;
        if end > self.bytes.len() {
            return Err(err);
        }
        Ok(addr..end)
    }

    /// Read `len` bytes starting at `addr`.
    pub fn read_bytes(&self, addr: usize, len: usize) -> Result<&[u8], MemoryError> {
        let range = self.range(addr, len)?;
        Ok(&self.bytes[range])
    }

    /// Write `data` starting at `addr`.
    pub fn write_bytes(&mut self, addr: usize, data: &[u8]) -> Result<(), MemoryError> {
        let range = self.range(addr, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Read a little-endian 32-bit integer.
    pub fn read_i32(&self, addr: usize) -> Result<i32, MemoryError> {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(self.read_bytes(addr, 4)?);
        Ok(i32::from_le_bytes(raw))
    }

    /// Write a little-endian 32-bit integer.
    pub fn write_i32(&mut self, addr: usize, value: i32) -> Result<(), MemoryError> {
        self.write_bytes(addr, &value.to_le_bytes())
    }

    /// Write `value` as UTF-8 followed by a NUL into a region of `max_len`
    /// bytes. The text is truncated to `max_len - 1` bytes when it does not
    /// fit. Returns the number of text bytes written.
    pub fn write_cstr(&mut self, addr: usize, value: &str, max_len: usize) -> Result<usize, MemoryError> {
        if max_len == 0 {
            return Ok(0);
        }
        let encoded = value.as_bytes();
        let written = encoded.len().min(max_len - 1);
        let range = self.range(addr, written + 1)?;
        self.bytes[range.start..range.start + written].copy_from_slice(&encoded[..written]);
        self.bytes[range.start + written] = 0;
        Ok(written)
    }

    /// Read a NUL-terminated UTF-8 string.
    ///
    /// Address zero and addresses past the end yield an empty string. A
    /// missing terminator ends the string at the end of memory; invalid UTF-8
    /// sequences are replaced.
    pub fn read_cstr(&self, addr: usize) -> String {
        if addr == 0 || addr >= self.bytes.len() {
            return String::new();
        }
        let tail = &self.bytes[addr..];
        let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
        String::from_utf8_lossy(&tail[..end]).into_owned()
    }

    /// Copy `count` bytes from `src` to `dest` inside this memory, clamped so
    /// neither range runs past the end. Overlapping ranges are handled.
    /// Returns the number of bytes copied.
    pub fn copy_within_clamped(&mut self, dest: usize, src: usize, count: usize) -> usize {
        let size = self.bytes.len();
        if dest >= size || src >= size {
            return 0;
        }
        let count = count.min(size - dest).min(size - src);
        self.bytes.copy_within(src..src + count, dest);
        count
    }
}
