//! Fractal heaps ("FRHP"), which hold dense link and attribute messages.
//!
//! Managed objects in direct blocks (reached through any depth of indirect
//! blocks) and tiny objects stored inside the heap ID are supported. Huge
//! objects and heaps with I/O filters are reported as unsupported.

use std::collections::HashSet;

use crate::checksum::jenkins_lookup3;
use crate::cursor::{bit, Cursor, Sizes};
use crate::error::{FormatError, Result};

const ID_VERSION_MASK: u8 = 0xc0;
const ID_TYPE_MASK: u8 = 0x30;
const ID_MANAGED: u8 = 0x00;
const ID_HUGE: u8 = 0x10;
const ID_TINY: u8 = 0x20;

/// Heap IDs longer than this use a two-byte tiny length.
const TINY_EXTENDED_THRESHOLD: u16 = 18;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FractalHeap {
    pub address: u64,
    pub heap_id_length: u16,
    pub io_filters_length: u16,
    pub flags: u8,
    pub max_managed_object_size: u32,
    pub managed_object_count: u64,
    pub huge_object_count: u64,
    pub tiny_object_count: u64,
    pub table_width: u16,
    pub starting_block_size: u64,
    pub max_direct_block_size: u64,
    /// log2 of the maximum heap size; sizes heap offsets.
    pub max_heap_size_bits: u16,
    pub starting_root_rows: u16,
    pub root_block_address: Option<u64>,
    /// 0 when the root is a direct block.
    pub root_rows: u16,
}

impl FractalHeap {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<Self> {
        let mut c = Cursor::at_address(data, address)?;
        let start = c.mark();
        c.read_signature(b"FRHP", "fractal heap header")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap header",
                version,
            });
        }
        let heap_id_length = c.read_u16()?;
        let io_filters_length = c.read_u16()?;
        let flags = c.read_u8()?;
        let max_managed_object_size = c.read_u32()?;
        c.read_length(sizes)?; // next huge object id
        c.read_offset(sizes)?; // huge object B-tree
        c.read_length(sizes)?; // free space in managed blocks
        c.read_offset(sizes)?; // free space manager
        c.read_length(sizes)?; // managed space
        c.read_length(sizes)?; // allocated managed space
        c.read_length(sizes)?; // direct block allocation iterator
        let managed_object_count = c.read_length(sizes)?;
        c.read_length(sizes)?; // huge object size
        let huge_object_count = c.read_length(sizes)?;
        c.read_length(sizes)?; // tiny object size
        let tiny_object_count = c.read_length(sizes)?;
        let table_width = c.read_u16()?;
        let starting_block_size = c.read_length(sizes)?;
        let max_direct_block_size = c.read_length(sizes)?;
        let max_heap_size_bits = c.read_u16()?;
        let starting_root_rows = c.read_u16()?;
        let root_block_address = c.read_address(sizes)?;
        let root_rows = c.read_u16()?;
        if io_filters_length > 0 {
            c.read_length(sizes)?; // filtered root direct block size
            c.read_u32()?; // root filter mask
            c.skip(io_filters_length as usize)?;
        }
        c.verify_checksum_from(start, "fractal heap header")?;

        if table_width == 0
            || !table_width.is_power_of_two()
            || !starting_block_size.is_power_of_two()
            || !max_direct_block_size.is_power_of_two()
            || max_direct_block_size < starting_block_size
            || max_heap_size_bits == 0
            || max_heap_size_bits > 64
        {
            return Err(FormatError::malformed(
                "fractal heap header",
                address,
                "invalid doubling table parameters",
            ));
        }

        Ok(FractalHeap {
            address,
            heap_id_length,
            io_filters_length,
            flags,
            max_managed_object_size,
            managed_object_count,
            huge_object_count,
            tiny_object_count,
            table_width,
            starting_block_size,
            max_direct_block_size,
            max_heap_size_bits,
            starting_root_rows,
            root_block_address,
            root_rows,
        })
    }

    /// Whether direct blocks carry a checksum.
    pub fn direct_blocks_checksummed(&self) -> bool {
        bit(self.flags as u64, 1)
    }

    /// Width of heap offsets (object offsets and block offsets).
    fn heap_offset_size(&self) -> usize {
        (self.max_heap_size_bits as usize).div_ceil(8)
    }

    /// Width of managed object lengths in heap IDs.
    fn heap_length_size(&self) -> usize {
        let max_dblock_bits = self.max_direct_block_size.trailing_zeros() as usize;
        let block_off = max_dblock_bits.div_ceil(8);
        let m = self.max_managed_object_size as u64;
        let enc = if m == 0 { 1 } else { (63 - m.leading_zeros() as usize) / 8 + 1 };
        block_off.min(enc)
    }

    fn row_block_size(&self, row: usize) -> u64 {
        if row == 0 {
            self.starting_block_size
        } else {
            self.starting_block_size << (row - 1)
        }
    }

    /// Rows whose entries are direct blocks.
    fn max_direct_rows(&self) -> usize {
        let max_bits = self.max_direct_block_size.trailing_zeros() as usize;
        let start_bits = self.starting_block_size.trailing_zeros() as usize;
        max_bits - start_bits + 2
    }

    /// Row count of an indirect block spanning `span` bytes.
    fn rows_for_span(&self, span: u64) -> usize {
        let first_row_bits =
            self.starting_block_size.trailing_zeros() as usize + self.table_width.trailing_zeros() as usize;
        (span.trailing_zeros() as usize + 1).saturating_sub(first_row_bits)
    }

    /// The bytes of the object named by `heap_id`.
    pub fn read_object(&self, data: &[u8], heap_id: &[u8], sizes: Sizes) -> Result<Vec<u8>> {
        let first = *heap_id
            .first()
            .ok_or_else(|| FormatError::malformed("fractal heap ID", self.address, "empty heap ID"))?;
        if first & ID_VERSION_MASK != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap ID",
                version: first >> 6,
            });
        }
        match first & ID_TYPE_MASK {
            ID_MANAGED => self.read_managed(data, heap_id, sizes),
            ID_TINY => self.read_tiny(heap_id),
            ID_HUGE => Err(FormatError::Unsupported("huge fractal heap objects".into())),
            other => Err(FormatError::malformed(
                "fractal heap ID",
                self.address,
                format!("unknown ID type {:#x}", other),
            )),
        }
    }

    fn read_tiny(&self, heap_id: &[u8]) -> Result<Vec<u8>> {
        let (len, skip) = if self.heap_id_length <= TINY_EXTENDED_THRESHOLD {
            ((heap_id[0] & 0x0f) as usize + 1, 1)
        } else {
            let hi = (heap_id[0] & 0x0f) as usize;
            let lo = *heap_id.get(1).ok_or_else(|| {
                FormatError::malformed("fractal heap ID", self.address, "truncated tiny ID")
            })? as usize;
            (((hi << 8) | lo) + 1, 2)
        };
        heap_id
            .get(skip..skip + len)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| FormatError::malformed("fractal heap ID", self.address, "tiny object overruns its ID"))
    }

    fn read_managed(&self, data: &[u8], heap_id: &[u8], sizes: Sizes) -> Result<Vec<u8>> {
        if self.io_filters_length > 0 {
            return Err(FormatError::Unsupported("filtered fractal heap blocks".into()));
        }
        let mut c = Cursor::new(&heap_id[1..]);
        let offset = c.read_uint(self.heap_offset_size())?;
        let length = c.read_uint(self.heap_length_size())?;
        let root = self
            .root_block_address
            .ok_or_else(|| FormatError::malformed("fractal heap", self.address, "object ID in an empty heap"))?;

        let (block, block_offset, block_size) = if self.root_rows == 0 {
            (root, 0, self.starting_block_size)
        } else {
            self.locate_direct_block(data, root, self.root_rows as usize, offset, sizes)?
        };
        if self.direct_blocks_checksummed() {
            self.verify_direct_block(data, block, block_size, sizes)?;
        }

        let rel = offset - block_offset;
        if rel.checked_add(length).map_or(true, |end| end > block_size) {
            return Err(FormatError::malformed(
                "fractal heap direct block",
                block,
                format!("object at {offset} of {length} bytes overruns the block"),
            ));
        }
        let mut r = Cursor::at_address(data, block + rel)?;
        Ok(r.read_bytes(length as usize)?.to_vec())
    }

    /// Walk indirect blocks down to the direct block holding heap `offset`.
    /// Returns `(address, heap offset of the block, block size)`.
    fn locate_direct_block(
        &self,
        data: &[u8],
        root: u64,
        root_rows: usize,
        offset: u64,
        sizes: Sizes,
    ) -> Result<(u64, u64, u64)> {
        let width = self.table_width as usize;
        let max_direct = self.max_direct_rows();
        let mut visited = HashSet::new();
        let (mut iblock, mut nrows, mut iblock_offset) = (root, root_rows, 0u64);

        loop {
            if !visited.insert(iblock) {
                return Err(FormatError::malformed("fractal heap indirect block", iblock, "block visited twice"));
            }
            let mut c = Cursor::at_address(data, iblock)?;
            let start = c.mark();
            c.read_signature(b"FHIB", "fractal heap indirect block")?;
            let version = c.read_u8()?;
            if version != 0 {
                return Err(FormatError::UnsupportedVersion {
                    structure: "fractal heap indirect block",
                    version,
                });
            }
            c.read_offset(sizes)?; // heap header
            let stored_offset = c.read_uint(self.heap_offset_size())?;
            if stored_offset != iblock_offset {
                return Err(FormatError::malformed(
                    "fractal heap indirect block",
                    iblock,
                    format!("block offset {stored_offset}, expected {iblock_offset}"),
                ));
            }
            let mut entries = Vec::with_capacity(nrows * width);
            for _ in 0..nrows * width {
                entries.push(c.read_address(sizes)?);
            }
            c.verify_checksum_from(start, "fractal heap indirect block")?;

            let mut entry_offset = iblock_offset;
            let mut next = None;
            for (i, entry) in entries.iter().enumerate() {
                let row = i / width;
                let span = self.row_block_size(row);
                if offset >= entry_offset && offset < entry_offset + span {
                    let addr = entry.ok_or_else(|| {
                        FormatError::malformed("fractal heap", self.address, format!("offset {offset} in an unallocated block"))
                    })?;
                    if row < max_direct {
                        return Ok((addr, entry_offset, span));
                    }
                    next = Some((addr, self.rows_for_span(span), entry_offset));
                    break;
                }
                entry_offset += span;
            }
            match next {
                Some((addr, rows, off)) => {
                    iblock = addr;
                    nrows = rows;
                    iblock_offset = off;
                }
                None => {
                    return Err(FormatError::malformed(
                        "fractal heap",
                        self.address,
                        format!("offset {offset} beyond the heap"),
                    ))
                }
            }
        }
    }

    /// Direct block checksums cover the whole block with the checksum field
    /// zeroed.
    fn verify_direct_block(&self, data: &[u8], block: u64, block_size: u64, sizes: Sizes) -> Result<()> {
        let mut c = Cursor::at_address(data, block)?;
        let size = usize::try_from(block_size).map_err(|_| FormatError::ArithmeticOverflow("heap block size"))?;
        let image = c.peek(size)?;
        let mut h = Cursor::new(image);
        h.read_signature(b"FHDB", "fractal heap direct block")?;
        let version = h.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fractal heap direct block",
                version,
            });
        }
        h.read_offset(sizes)?;
        h.skip(self.heap_offset_size())?;
        let chk_at = h.position();
        let stored = h.read_u32()?;
        let mut copy = image.to_vec();
        copy[chk_at..chk_at + 4].fill(0);
        let computed = jenkins_lookup3(&copy);
        if stored != computed {
            return Err(FormatError::ChecksumMismatch {
                structure: "fractal heap direct block",
                stored,
                computed,
            });
        }
        c.skip(size)?;
        Ok(())
    }
}
