//! Fixed array chunk index ("FAHD" header, "FADB" data block), paged and
//! unpaged.

use crate::chunk_index::{read_element, IndexedChunk};
use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedArrayHeader {
    pub address: u64,
    /// 0 for unfiltered chunks, 1 for filtered.
    pub client_id: u8,
    pub entry_size: u8,
    /// log2 of the entries per data block page.
    pub page_bits: u8,
    pub num_entries: u64,
    pub data_block_address: Option<u64>,
}

impl FixedArrayHeader {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<Self> {
        let mut c = Cursor::at_address(data, address)?;
        let origin = c.mark();
        c.read_signature(b"FAHD", "fixed array header")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "fixed array header",
                version,
            });
        }
        let client_id = c.read_u8()?;
        if client_id > 1 {
            return Err(FormatError::malformed(
                "fixed array header",
                address,
                format!("client id {client_id}"),
            ));
        }
        let entry_size = c.read_u8()?;
        let page_bits = c.read_u8()?;
        if page_bits >= 64 {
            return Err(FormatError::malformed(
                "fixed array header",
                address,
                format!("page bits {page_bits}"),
            ));
        }
        let num_entries = c.read_length(sizes)?;
        let data_block_address = c.read_address(sizes)?;
        c.verify_checksum_from(origin, "fixed array header")?;
        Ok(FixedArrayHeader {
            address,
            client_id,
            entry_size,
            page_bits,
            num_entries,
            data_block_address,
        })
    }

    fn entries_per_page(&self) -> u64 {
        1u64 << self.page_bits
    }

    pub fn is_paged(&self) -> bool {
        self.num_entries > self.entries_per_page()
    }
}

/// Every allocated entry of the fixed array at `address`.
pub fn read_chunks(data: &[u8], address: u64, sizes: Sizes) -> Result<Vec<IndexedChunk>> {
    let header = FixedArrayHeader::read(data, address, sizes)?;
    let Some(block) = header.data_block_address else {
        return Ok(Vec::new());
    };
    let filtered = header.client_id == 1;
    let entry = header.entry_size as usize;

    let mut c = Cursor::at_address(data, block)?;
    let origin = c.mark();
    c.read_signature(b"FADB", "fixed array data block")?;
    let version = c.read_u8()?;
    if version != 0 {
        return Err(FormatError::UnsupportedVersion {
            structure: "fixed array data block",
            version,
        });
    }
    c.skip(1)?;
    let owner = c.read_offset(sizes)?;
    if owner != header.address {
        return Err(FormatError::malformed(
            "fixed array data block",
            block,
            format!("belongs to header {owner:#x}"),
        ));
    }

    let mut out = Vec::new();
    if !header.is_paged() {
        for i in 0..header.num_entries {
            if let Some(e) = read_element(&mut c, i, filtered, entry, sizes)? {
                out.push(e);
            }
        }
        c.verify_checksum_from(origin, "fixed array data block")?;
        return Ok(out);
    }

    let per_page = header.entries_per_page();
    let pages = header.num_entries.div_ceil(per_page);
    let bitmap_len = usize::try_from(pages.div_ceil(8))
        .map_err(|_| FormatError::ArithmeticOverflow("fixed array page bitmap"))?;
    let bitmap = c.read_bytes(bitmap_len)?;
    c.verify_checksum_from(origin, "fixed array data block")?;

    for page in 0..pages {
        let first = page * per_page;
        let count = per_page.min(header.num_entries - first);
        let page_bytes = (count as usize)
            .checked_mul(entry)
            .ok_or(FormatError::ArithmeticOverflow("fixed array page size"))?;
        let page_start = c.mark();
        if bitmap[(page / 8) as usize] & (0x80 >> (page % 8)) == 0 {
            // uninitialized page: all holes
            c.skip(page_bytes + 4)?;
            continue;
        }
        for i in first..first + count {
            if let Some(e) = read_element(&mut c, i, filtered, entry, sizes)? {
                out.push(e);
            }
        }
        c.verify_checksum_from(page_start, "fixed array data block page")?;
    }
    Ok(out)
}
