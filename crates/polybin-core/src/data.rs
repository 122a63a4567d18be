//! Bounds-checked byte access used internally by [`crate::mp4`] and [`crate::zip`].
//!
//! Every format-surgery routine in this crate reads and writes fixed-width
//! integers at computed offsets inside an in-memory buffer. Rather than
//! index slices by hand at every call site (and risk an out-of-bounds panic
//! on a malformed input), reads and writes go through the small set of
//! helpers here, all of which return [`Error::EndOfFile`] instead of
//! panicking.

use snafu::prelude::*;

/// Error conditions for out-of-bounds buffer access.
#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    /// Thrown if reading or writing would go past the end of the buffer.
    #[snafu(display("Unexpected end-of-file encountered"))]
    EndOfFile,
}

pub type Result<T> = core::result::Result<T, Error>;

/// A forward-only, bounds-checked cursor over a borrowed byte slice.
///
/// Used for sequential parsing (ISO-BMFF box headers, ZIP central-directory
/// entries) where each read advances the position.
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    #[inline]
    #[must_use]
    pub const fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn set_position(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn get_slice(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(length).context(EndOfFileSnafu)?;
        ensure!(end <= self.data.len(), EndOfFileSnafu);
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    #[inline]
    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.get_slice(1)?[0])
    }

    #[inline]
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.get_slice(2)?.try_into().unwrap()))
    }

    #[inline]
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.get_slice(4)?.try_into().unwrap()))
    }

    #[inline]
    pub fn read_u32_be(&mut self) -> Result<u32> {
        Ok(u32::from_be_bytes(self.get_slice(4)?.try_into().unwrap()))
    }

    #[inline]
    pub fn read_u64_be(&mut self) -> Result<u64> {
        Ok(u64::from_be_bytes(self.get_slice(8)?.try_into().unwrap()))
    }
}

/// Reads a big-endian `u32` at `offset`, without advancing anything.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 4` exceeds the buffer length.
#[inline]
pub fn be_u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    let end = offset.checked_add(4).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    Ok(u32::from_be_bytes(buf[offset..end].try_into().unwrap()))
}

/// Reads a big-endian `u64` at `offset`, without advancing anything.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 8` exceeds the buffer length.
#[inline]
pub fn be_u64_at(buf: &[u8], offset: usize) -> Result<u64> {
    let end = offset.checked_add(8).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    Ok(u64::from_be_bytes(buf[offset..end].try_into().unwrap()))
}

/// Writes a big-endian `u32` at `offset`.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 4` exceeds the buffer length.
#[inline]
pub fn set_be_u32_at(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let end = offset.checked_add(4).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    buf[offset..end].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Writes a big-endian `u64` at `offset`.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 8` exceeds the buffer length.
#[inline]
pub fn set_be_u64_at(buf: &mut [u8], offset: usize, value: u64) -> Result<()> {
    let end = offset.checked_add(8).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    buf[offset..end].copy_from_slice(&value.to_be_bytes());
    Ok(())
}

/// Reads a little-endian `u16` at `offset`, without advancing anything.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 2` exceeds the buffer length.
#[inline]
pub fn le_u16_at(buf: &[u8], offset: usize) -> Result<u16> {
    let end = offset.checked_add(2).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    Ok(u16::from_le_bytes(buf[offset..end].try_into().unwrap()))
}

/// Reads a little-endian `u32` at `offset`, without advancing anything.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 4` exceeds the buffer length.
#[inline]
pub fn le_u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    let end = offset.checked_add(4).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    Ok(u32::from_le_bytes(buf[offset..end].try_into().unwrap()))
}

/// Reads a little-endian `u64` at `offset`, without advancing anything.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 8` exceeds the buffer length.
#[inline]
pub fn le_u64_at(buf: &[u8], offset: usize) -> Result<u64> {
    let end = offset.checked_add(8).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    Ok(u64::from_le_bytes(buf[offset..end].try_into().unwrap()))
}

/// Writes a little-endian `u32` at `offset`.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 4` exceeds the buffer length.
#[inline]
pub fn set_le_u32_at(buf: &mut [u8], offset: usize, value: u32) -> Result<()> {
    let end = offset.checked_add(4).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    buf[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}

/// Writes a little-endian `u64` at `offset`.
///
/// # Errors
/// Returns [`Error::EndOfFile`] if `offset + 8` exceeds the buffer length.
#[inline]
pub fn set_le_u64_at(buf: &mut [u8], offset: usize, value: u64) -> Result<()> {
    let end = offset.checked_add(8).context(EndOfFileSnafu)?;
    ensure!(end <= buf.len(), EndOfFileSnafu);
    buf[offset..end].copy_from_slice(&value.to_le_bytes());
    Ok(())
}
