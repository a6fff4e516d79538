//! Positioned little-endian reads over a borrowed byte buffer.
//!
//! Every decoder creates its own [`Cursor`] at the absolute offset it needs;
//! there is no shared position anywhere in the crate.

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum;
use crate::error::{FormatError, Result};

/// Address and length field widths taken from the superblock.
///
/// Threaded explicitly through every decoder that reads an address or a
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sizes {
    /// Size of offsets (addresses) in bytes.
    pub offset_size: u8,
    /// Size of lengths in bytes.
    pub length_size: u8,
}

impl Sizes {
    /// Validate and build. Both widths must be 1, 2, 4 or 8.
    pub fn new(offset_size: u8, length_size: u8) -> Result<Self> {
        for s in [offset_size, length_size] {
            if !matches!(s, 1 | 2 | 4 | 8) {
                return Err(FormatError::InvalidFieldSize(s));
            }
        }
        Ok(Sizes {
            offset_size,
            length_size,
        })
    }

    /// The all-ones sentinel for this offset width.
    pub fn undefined_address(&self) -> u64 {
        undefined_for_width(self.offset_size as usize)
    }

    /// Whether `addr` is the undefined-address sentinel.
    pub fn is_undefined(&self, addr: u64) -> bool {
        addr == self.undefined_address()
    }
}

impl Default for Sizes {
    fn default() -> Self {
        Sizes {
            offset_size: 8,
            length_size: 8,
        }
    }
}

fn undefined_for_width(width: usize) -> u64 {
    if width >= 8 {
        u64::MAX
    } else {
        (1u64 << (width * 8)) - 1
    }
}

/// A saved cursor position, used to delimit checksum ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mark(usize);

impl Mark {
    pub fn position(self) -> usize {
        self.0
    }
}

/// Read cursor over a byte slice with an absolute position.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    /// Cursor at position 0.
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    /// Cursor at an absolute position. Positions past the end are allowed;
    /// the first read will fail.
    pub fn at(data: &'a [u8], pos: usize) -> Self {
        Cursor { data, pos }
    }

    /// Cursor at a file address.
    pub fn at_address(data: &'a [u8], address: u64) -> Result<Self> {
        let pos = usize::try_from(address).map_err(|_| FormatError::UnexpectedEof {
            offset: address,
            needed: 1,
            available: data.len(),
        })?;
        Ok(Cursor { data, pos })
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn mark(&self) -> Mark {
        Mark(self.pos)
    }

    pub fn reset(&mut self, mark: Mark) {
        self.pos = mark.0;
    }

    /// Fail unless `n` more bytes are available.
    pub fn ensure(&self, n: usize) -> Result<()> {
        if self.remaining() < n {
            return Err(FormatError::UnexpectedEof {
                offset: self.pos as u64,
                needed: n,
                available: self.remaining(),
            });
        }
        Ok(())
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }

    /// Advance to the next multiple of `align` relative to `origin`.
    pub fn align_from(&mut self, origin: usize, align: usize) -> Result<()> {
        let rel = self.pos.saturating_sub(origin);
        let pad = (align - rel % align) % align;
        self.skip(pad)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let bytes = self.read_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Look at the next `n` bytes without consuming them.
    pub fn peek(&self, n: usize) -> Result<&'a [u8]> {
        self.ensure(n)?;
        Ok(&self.data[self.pos..self.pos + n])
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        Ok(LittleEndian::read_u16(self.read_bytes(2)?))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(LittleEndian::read_u32(self.read_bytes(4)?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.read_bytes(8)?))
    }

    /// Unsigned little-endian integer of 1 to 8 bytes.
    pub fn read_uint(&mut self, width: usize) -> Result<u64> {
        if width == 0 || width > 8 {
            return Err(FormatError::malformed(
                "integer field",
                self.pos as u64,
                format!("unsupported width {width}"),
            ));
        }
        Ok(LittleEndian::read_uint(self.read_bytes(width)?, width))
    }

    /// Signed little-endian integer of 1 to 8 bytes, sign-extended.
    pub fn read_int(&mut self, width: usize) -> Result<i64> {
        if width == 0 || width > 8 {
            return Err(FormatError::malformed(
                "integer field",
                self.pos as u64,
                format!("unsupported width {width}"),
            ));
        }
        Ok(LittleEndian::read_int(self.read_bytes(width)?, width))
    }

    /// An offset-width field, returned as-is (sentinel included).
    pub fn read_offset(&mut self, sizes: Sizes) -> Result<u64> {
        self.read_uint(sizes.offset_size as usize)
    }

    pub fn read_length(&mut self, sizes: Sizes) -> Result<u64> {
        self.read_uint(sizes.length_size as usize)
    }

    /// An offset-width field; `None` for the undefined-address sentinel.
    pub fn read_address(&mut self, sizes: Sizes) -> Result<Option<u64>> {
        let v = self.read_offset(sizes)?;
        Ok(if sizes.is_undefined(v) { None } else { Some(v) })
    }

    /// Consume `expected` or fail with `InvalidSignature`.
    pub fn read_signature(&mut self, expected: &[u8], structure: &'static str) -> Result<()> {
        let at = self.pos as u64;
        let got = self.read_bytes(expected.len())?;
        if got != expected {
            return Err(FormatError::InvalidSignature {
                structure,
                offset: at,
            });
        }
        Ok(())
    }

    /// Null-terminated string; consumes the terminator.
    pub fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos.min(self.data.len())..];
        let end = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or(FormatError::UnexpectedEof {
                offset: self.pos as u64,
                needed: rest.len() + 1,
                available: rest.len(),
            })?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    /// Validate the lookup3 checksum over `[mark, current)` against the next
    /// four bytes, and consume them.
    pub fn verify_checksum_from(&mut self, mark: Mark, structure: &'static str) -> Result<u32> {
        let end = self.pos;
        let stored = checksum::validate_range(self.data, mark.0, end, structure)?;
        self.pos = end + 4;
        Ok(stored)
    }
}

/// Test whether bit `index` is set in a flags value.
#[inline]
pub fn bit(flags: u64, index: u32) -> bool {
    (flags >> index) & 1 == 1
}
