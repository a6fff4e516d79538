//! Local heaps ("HEAP"), which hold the link names of legacy groups.

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalHeap {
    pub address: u64,
    pub data_segment_size: u64,
    /// Offset of the first free block, `None` if the free list is empty.
    pub free_list_head_offset: Option<u64>,
    pub data_segment_address: u64,
}

impl LocalHeap {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<LocalHeap> {
        let mut c = Cursor::at_address(data, address)?;
        c.read_signature(b"HEAP", "local heap")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "local heap",
                version,
            });
        }
        c.skip(3)?;
        let data_segment_size = c.read_length(sizes)?;
        let free = c.read_length(sizes)?;
        let free_list_head_offset = if sizes.is_undefined(free) || free == 1 {
            None
        } else {
            Some(free)
        };
        let data_segment_address = c.read_offset(sizes)?;
        Ok(LocalHeap {
            address,
            data_segment_size,
            free_list_head_offset,
            data_segment_address,
        })
    }

    /// The data segment as a slice of `data`.
    pub fn segment<'a>(&self, data: &'a [u8]) -> Result<&'a [u8]> {
        let mut c = Cursor::at_address(data, self.data_segment_address)?;
        let len = usize::try_from(self.data_segment_size)
            .map_err(|_| FormatError::ArithmeticOverflow("local heap segment size"))?;
        c.read_bytes(len)
    }

    /// Null-terminated bytes at `offset` in the data segment, without the
    /// terminator.
    pub fn bytes_at<'a>(&self, data: &'a [u8], offset: u64) -> Result<&'a [u8]> {
        let seg = self.segment(data)?;
        let start = usize::try_from(offset)
            .ok()
            .filter(|&s| s < seg.len())
            .ok_or_else(|| {
                FormatError::malformed(
                    "local heap",
                    self.address,
                    format!("offset {offset} outside segment of {} bytes", seg.len()),
                )
            })?;
        let rest = &seg[start..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            FormatError::malformed("local heap", self.address, format!("unterminated string at {offset}"))
        })?;
        Ok(&rest[..end])
    }

    pub fn string_at(&self, data: &[u8], offset: u64) -> Result<String> {
        Ok(String::from_utf8_lossy(self.bytes_at(data, offset)?).into_owned())
    }
}
