//! Extensible array chunk index: header ("EAHD"), index block ("EAIB"),
//! super blocks ("EASB") and data blocks ("EADB"), with data block paging.
//!
//! Elements are numbered with the index block's own elements first, then
//! the data blocks in super block order. Super block `u` holds
//! `2^(u/2)` data blocks of `2^((u+1)/2) × min_elements` elements each; the
//! first few super blocks have their data block addresses stored directly in
//! the index block.

use crate::chunk_index::{read_element, IndexedChunk};
use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensibleArrayHeader {
    pub address: u64,
    pub client_id: u8,
    pub element_size: u8,
    pub max_elements_bits: u8,
    pub index_block_elements: u8,
    pub data_block_min_elements: u8,
    pub super_block_min_pointers: u8,
    pub page_bits: u8,
    /// Highest element index set, plus one.
    pub max_index_set: u64,
    pub index_block_address: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SuperBlockInfo {
    data_blocks: u64,
    block_elements: u64,
    /// First element index, counted after the index block's elements.
    start_index: u64,
    start_block: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Geometry {
    super_blocks: Vec<SuperBlockInfo>,
    /// Super blocks whose data blocks the index block addresses directly.
    direct_super_blocks: usize,
    direct_data_blocks: usize,
    super_block_addresses: usize,
    offset_width: usize,
    page_elements: u64,
}

fn log2_exact(v: u8, what: &'static str) -> Result<u32> {
    if v == 0 || !v.is_power_of_two() {
        return Err(FormatError::malformed(
            "extensible array header",
            0,
            format!("{what} {v} is not a power of two"),
        ));
    }
    Ok(v.trailing_zeros())
}

impl ExtensibleArrayHeader {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<Self> {
        let mut c = Cursor::at_address(data, address)?;
        let origin = c.mark();
        c.read_signature(b"EAHD", "extensible array header")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "extensible array header",
                version,
            });
        }
        let [client_id, element_size, max_elements_bits, index_block_elements, data_block_min_elements, super_block_min_pointers, page_bits] =
            c.read_array::<7>()?;
        // super block count and size, data block count and size
        for _ in 0..4 {
            c.read_length(sizes)?;
        }
        let max_index_set = c.read_length(sizes)?;
        let _realized = c.read_length(sizes)?;
        let index_block_address = c.read_address(sizes)?;
        c.verify_checksum_from(origin, "extensible array header")?;
        Ok(ExtensibleArrayHeader {
            address,
            client_id,
            element_size,
            max_elements_bits,
            index_block_elements,
            data_block_min_elements,
            super_block_min_pointers,
            page_bits,
            max_index_set,
            index_block_address,
        })
    }

    fn geometry(&self) -> Result<Geometry> {
        let min_elements_log = log2_exact(self.data_block_min_elements, "data block minimum elements")?;
        let min_pointers_log = log2_exact(self.super_block_min_pointers, "super block minimum pointers")?;
        if self.max_elements_bits == 0 || self.max_elements_bits > 64 || u32::from(self.max_elements_bits) < min_elements_log {
            return Err(FormatError::malformed(
                "extensible array header",
                self.address,
                format!("maximum element bits {}", self.max_elements_bits),
            ));
        }
        if self.page_bits >= 64 {
            return Err(FormatError::malformed(
                "extensible array header",
                self.address,
                format!("page bits {}", self.page_bits),
            ));
        }
        let count = 1 + (u32::from(self.max_elements_bits) - min_elements_log) as usize;
        let mut super_blocks = Vec::with_capacity(count);
        let (mut start_index, mut start_block) = (0u64, 0u64);
        for u in 0..count as u32 {
            let data_blocks = 1u64 << (u / 2);
            let block_elements = (1u64 << ((u + 1) / 2))
                .checked_mul(u64::from(self.data_block_min_elements))
                .ok_or(FormatError::ArithmeticOverflow("extensible array data block size"))?;
            super_blocks.push(SuperBlockInfo {
                data_blocks,
                block_elements,
                start_index,
                start_block,
            });
            start_index = start_index.saturating_add(data_blocks.saturating_mul(block_elements));
            start_block = start_block.saturating_add(data_blocks);
        }
        let direct_super_blocks = (2 * min_pointers_log as usize).min(count);
        Ok(Geometry {
            direct_data_blocks: 2 * (self.super_block_min_pointers as usize - 1),
            super_block_addresses: count - direct_super_blocks,
            direct_super_blocks,
            super_blocks,
            offset_width: (self.max_elements_bits as usize).div_ceil(8),
            page_elements: 1u64 << self.page_bits,
        })
    }
}

struct Reader<'a> {
    data: &'a [u8],
    header: &'a ExtensibleArrayHeader,
    geometry: Geometry,
    sizes: Sizes,
    out: Vec<IndexedChunk>,
}

/// Every allocated element of the extensible array at `address`.
pub fn read_chunks(data: &[u8], address: u64, sizes: Sizes) -> Result<Vec<IndexedChunk>> {
    let header = ExtensibleArrayHeader::read(data, address, sizes)?;
    let Some(index_block) = header.index_block_address else {
        return Ok(Vec::new());
    };
    let mut r = Reader {
        data,
        geometry: header.geometry()?,
        header: &header,
        sizes,
        out: Vec::new(),
    };
    r.index_block(index_block)?;
    Ok(r.out)
}

impl<'a> Reader<'a> {
    fn filtered(&self) -> bool {
        self.header.client_id == 1
    }

    fn prefix(&self, c: &mut Cursor<'_>, signature: &[u8; 4], structure: &'static str) -> Result<()> {
        c.read_signature(signature, structure)?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion { structure, version });
        }
        c.skip(1)?;
        let owner = c.read_offset(self.sizes)?;
        if owner != self.header.address {
            return Err(FormatError::malformed(
                structure,
                c.position() as u64,
                format!("belongs to header {owner:#x}"),
            ));
        }
        Ok(())
    }

    fn element(&mut self, c: &mut Cursor<'_>, index: u64) -> Result<()> {
        let entry = self.header.element_size as usize;
        if let Some(e) = read_element(c, index, self.filtered(), entry, self.sizes)? {
            self.out.push(e);
        }
        Ok(())
    }

    fn index_block(&mut self, address: u64) -> Result<()> {
        let mut c = Cursor::at_address(self.data, address)?;
        let origin = c.mark();
        self.prefix(&mut c, b"EAIB", "extensible array index block")?;
        for i in 0..u64::from(self.header.index_block_elements) {
            self.element(&mut c, i)?;
        }
        let direct = (0..self.geometry.direct_data_blocks)
            .map(|_| c.read_address(self.sizes))
            .collect::<Result<Vec<_>>>()?;
        let supers = (0..self.geometry.super_block_addresses)
            .map(|_| c.read_address(self.sizes))
            .collect::<Result<Vec<_>>>()?;
        c.verify_checksum_from(origin, "extensible array index block")?;

        let base = u64::from(self.header.index_block_elements);
        for u in 0..self.geometry.direct_super_blocks {
            let info = self.geometry.super_blocks[u];
            for j in 0..info.data_blocks {
                let slot = (info.start_block + j) as usize;
                if let Some(Some(block)) = direct.get(slot) {
                    let first = base + info.start_index + j * info.block_elements;
                    self.data_block(*block, first, info.block_elements, None)?;
                }
            }
        }
        for (s, addr) in supers.iter().enumerate() {
            if let Some(addr) = addr {
                self.super_block(*addr, self.geometry.direct_super_blocks + s)?;
            }
        }
        Ok(())
    }

    fn pages_per_block(&self, block_elements: u64) -> u64 {
        if block_elements > self.geometry.page_elements {
            block_elements / self.geometry.page_elements
        } else {
            0
        }
    }

    fn super_block(&mut self, address: u64, index: usize) -> Result<()> {
        let info = self.geometry.super_blocks[index];
        let mut c = Cursor::at_address(self.data, address)?;
        let origin = c.mark();
        self.prefix(&mut c, b"EASB", "extensible array super block")?;
        c.skip(self.geometry.offset_width)?;
        let pages = self.pages_per_block(info.block_elements);
        let bitmap_len = pages.div_ceil(8) as usize;
        let bitmaps = if pages > 0 {
            Some(c.read_bytes(bitmap_len * info.data_blocks as usize)?)
        } else {
            None
        };
        let blocks = (0..info.data_blocks)
            .map(|_| c.read_address(self.sizes))
            .collect::<Result<Vec<_>>>()?;
        c.verify_checksum_from(origin, "extensible array super block")?;

        let base = u64::from(self.header.index_block_elements);
        for (j, block) in blocks.iter().enumerate() {
            let Some(block) = block else { continue };
            let first = base + info.start_index + j as u64 * info.block_elements;
            let bitmap = bitmaps.map(|b| &b[j * bitmap_len..(j + 1) * bitmap_len]);
            self.data_block(*block, first, info.block_elements, bitmap)?;
        }
        Ok(())
    }

    fn data_block(&mut self, address: u64, first: u64, elements: u64, page_init: Option<&[u8]>) -> Result<()> {
        let mut c = Cursor::at_address(self.data, address)?;
        let origin = c.mark();
        self.prefix(&mut c, b"EADB", "extensible array data block")?;
        c.skip(self.geometry.offset_width)?;

        let pages = self.pages_per_block(elements);
        if pages == 0 {
            for i in first..first + elements {
                self.element(&mut c, i)?;
            }
            c.verify_checksum_from(origin, "extensible array data block")?;
            return Ok(());
        }

        c.verify_checksum_from(origin, "extensible array data block")?;
        let per_page = self.geometry.page_elements;
        let page_bytes = (per_page as usize)
            .checked_mul(self.header.element_size as usize)
            .ok_or(FormatError::ArithmeticOverflow("extensible array page size"))?;
        for p in 0..pages {
            let initialized = page_init.map_or(true, |bits| {
                bits.get((p / 8) as usize)
                    .is_some_and(|b| b & (0x80 >> (p % 8)) != 0)
            });
            if !initialized {
                c.skip(page_bytes + 4)?;
                continue;
            }
            let page_start = c.mark();
            let start = first + p * per_page;
            for i in start..start + per_page {
                self.element(&mut c, i)?;
            }
            c.verify_checksum_from(page_start, "extensible array data block page")?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::jenkins_lookup3;
    use crate::symbol_table::tests::push_offset;

    const HEADER_LEN: usize = 4 + 1 + 7 + 6 * 8 + 8 + 4;

    fn seal(buf: &mut Vec<u8>, from: usize) {
        let sum = jenkins_lookup3(&buf[from..]);
        buf.extend_from_slice(&sum.to_le_bytes());
    }

    fn params(max_index_set: u64) -> ExtensibleArrayHeader {
        ExtensibleArrayHeader {
            address: 0,
            client_id: 0,
            element_size: 8,
            max_elements_bits: 5,
            index_block_elements: 2,
            data_block_min_elements: 2,
            super_block_min_pointers: 2,
            page_bits: 2,
            max_index_set,
            index_block_address: None,
        }
    }

    fn prefix(buf: &mut Vec<u8>, sig: &[u8], header: usize) -> usize {
        let start = buf.len();
        buf.extend_from_slice(sig);
        buf.extend_from_slice(&[0, 0]);
        push_offset(buf, header as u64, 8);
        start
    }

    fn entry(buf: &mut Vec<u8>, entries: &[Option<u64>], i: u64) {
        let v = entries.get(i as usize).copied().flatten().unwrap_or(u64::MAX);
        push_offset(buf, v, 8);
    }

    fn append_data_block(buf: &mut Vec<u8>, g: &Geometry, header: usize, entries: &[Option<u64>], first: u64, n: u64) -> u64 {
        let at = prefix(buf, b"EADB", header);
        buf.extend_from_slice(&vec![0; g.offset_width]);
        if n <= g.page_elements {
            for i in first..first + n {
                entry(buf, entries, i);
            }
            seal(buf, at);
        } else {
            seal(buf, at);
            for p in 0..n / g.page_elements {
                let start = buf.len();
                let s = first + p * g.page_elements;
                for i in s..s + g.page_elements {
                    entry(buf, entries, i);
                }
                seal(buf, start);
            }
        }
        at as u64
    }

    /// Append an unfiltered extensible array (5 max element bits, 2 index
    /// block elements, 2 minimum data block elements and pointers, 4
    /// elements per page) and return the header address.
    pub(crate) fn append_extensible_array(buf: &mut Vec<u8>, entries: &[Option<u64>]) -> u64 {
        let p = params(entries.len() as u64);
        let g = p.geometry().unwrap();
        let header = buf.len();
        buf.resize(header + HEADER_LEN, 0);
        let base = p.index_block_elements as u64;
        let has = |from: u64, n: u64| (from..from + n).any(|i| entries.get(i as usize).copied().flatten().is_some());

        let mut direct = Vec::new();
        for u in 0..g.direct_super_blocks {
            let info = g.super_blocks[u];
            for j in 0..info.data_blocks {
                let first = base + info.start_index + j * info.block_elements;
                direct.push(if has(first, info.block_elements) {
                    append_data_block(buf, &g, header, entries, first, info.block_elements)
                } else {
                    u64::MAX
                });
            }
        }
        let mut supers = Vec::new();
        for u in g.direct_super_blocks..g.super_blocks.len() {
            let info = g.super_blocks[u];
            let first = base + info.start_index;
            if !has(first, info.data_blocks * info.block_elements) {
                supers.push(u64::MAX);
                continue;
            }
            let mut blocks = Vec::new();
            for j in 0..info.data_blocks {
                let f = first + j * info.block_elements;
                blocks.push(if has(f, info.block_elements) {
                    append_data_block(buf, &g, header, entries, f, info.block_elements)
                } else {
                    u64::MAX
                });
            }
            let at = prefix(buf, b"EASB", header);
            buf.extend_from_slice(&vec![0; g.offset_width]);
            let pages = if info.block_elements > g.page_elements {
                info.block_elements / g.page_elements
            } else {
                0
            };
            if pages > 0 {
                for j in 0..info.data_blocks {
                    let mut bits = vec![0u8; pages.div_ceil(8) as usize];
                    for pg in 0..pages {
                        let s = first + j * info.block_elements + pg * g.page_elements;
                        if has(s, g.page_elements) {
                            bits[(pg / 8) as usize] |= 0x80 >> (pg % 8);
                        }
                    }
                    buf.extend_from_slice(&bits);
                }
            }
            for b in &blocks {
                push_offset(buf, *b, 8);
            }
            seal(buf, at);
            supers.push(at as u64);
        }

        let iblock = prefix(buf, b"EAIB", header);
        for i in 0..base {
            entry(buf, entries, i);
        }
        for d in &direct {
            push_offset(buf, *d, 8);
        }
        for s in &supers {
            push_offset(buf, *s, 8);
        }
        seal(buf, iblock);

        let mut h = Vec::new();
        h.extend_from_slice(b"EAHD");
        h.extend_from_slice(&[0, p.client_id, p.element_size, p.max_elements_bits, p.index_block_elements]);
        h.extend_from_slice(&[p.data_block_min_elements, p.super_block_min_pointers, p.page_bits]);
        for v in [0u64, 0, 0, 0, p.max_index_set, p.max_index_set] {
            push_offset(&mut h, v, 8);
        }
        push_offset(&mut h, iblock as u64, 8);
        let sum = jenkins_lookup3(&h);
        h.extend_from_slice(&sum.to_le_bytes());
        buf[header..header + HEADER_LEN].copy_from_slice(&h);
        header as u64
    }

    #[test]
    fn geometry_matches_layout_rules() {
        let g = params(0).geometry().unwrap();
        assert_eq!(g.super_blocks.len(), 5);
        assert_eq!(g.direct_super_blocks, 2);
        assert_eq!(g.direct_data_blocks, 2);
        assert_eq!(g.super_block_addresses, 3);
        let starts: Vec<_> = g.super_blocks.iter().map(|s| s.start_index).collect();
        assert_eq!(starts, vec![0, 2, 6, 14, 30]);
        let sizes: Vec<_> = g.super_blocks.iter().map(|s| (s.data_blocks, s.block_elements)).collect();
        assert_eq!(sizes, vec![(1, 2), (1, 4), (2, 4), (2, 8), (4, 8)]);
    }

    #[test]
    fn index_block_elements_only() {
        let mut buf = vec![0u8; 16];
        let addr = append_extensible_array(&mut buf, &[Some(0x700), None]);
        let chunks = read_chunks(&buf, addr, Sizes::default()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].address, 0x700);
    }

    #[test]
    fn elements_across_direct_and_super_blocks_with_pages() {
        // 24 elements reach super block 3, whose 8-element data blocks are
        // paged in two pages of four.
        let mut entries: Vec<Option<u64>> = (0..24).map(|i| Some(0x1000 + 0x10 * i)).collect();
        entries[5] = None;
        // entries 16..20 form one whole page of super block 3
        for e in &mut entries[16..20] {
            *e = None;
        }
        let mut buf = Vec::new();
        let addr = append_extensible_array(&mut buf, &entries);
        let chunks = read_chunks(&buf, addr, Sizes::default()).unwrap();
        let expected: Vec<u64> = (0..24u64).filter(|&i| i != 5 && !(16..20).contains(&i)).collect();
        let got: Vec<u64> = chunks.iter().map(|c| c.index).collect();
        assert_eq!(got, expected);
        for c in &chunks {
            assert_eq!(c.address, 0x1000 + 0x10 * c.index);
        }
    }

    #[test]
    fn corrupt_index_block_fails() {
        let mut buf = Vec::new();
        let addr = append_extensible_array(&mut buf, &[Some(1), Some(2), Some(3)]);
        let ib = {
            let h = ExtensibleArrayHeader::read(&buf, addr, Sizes::default()).unwrap();
            h.index_block_address.unwrap() as usize
        };
        buf[ib + 15] ^= 0x40;
        assert!(matches!(
            read_chunks(&buf, addr, Sizes::default()),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }
}
