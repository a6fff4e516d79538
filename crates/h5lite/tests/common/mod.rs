//! Builds small synthetic files: v0, v2 or v3 superblocks, v1 and v2
//! object headers, legacy symbol-table groups and the messages the
//! integration tests need.

#![allow(dead_code)]

use std::io::Write;

use h5lite_format::checksum::jenkins_lookup3;

pub const DATASPACE: u8 = 0x01;
pub const LINK_INFO: u8 = 0x02;
pub const DATATYPE: u8 = 0x03;
pub const FILL_VALUE: u8 = 0x05;
pub const LINK: u8 = 0x06;
pub const LAYOUT: u8 = 0x08;
pub const FILTER_PIPELINE: u8 = 0x0b;
pub const ATTRIBUTE: u8 = 0x0c;
pub const MODIFICATION_TIME: u8 = 0x12;
pub const SYMBOL_TABLE: u8 = 0x11;

/// v2 envelope flag: the message body is a shared reference.
pub const SHARED: u8 = 0x02;

const SUPERBLOCK_LEN: usize = 48;
const LEGACY_SUPERBLOCK_LEN: usize = 96;
const UNDEFINED: u64 = u64::MAX;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub struct FileBuilder {
    buf: Vec<u8>,
    version: u8,
}

impl Default for FileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A member of a symbol-table group.
pub enum Entry<'a> {
    Object(u64),
    Group(LegacyGroup),
    Soft(&'a str),
}

/// A symbol-table group: its v1 object header, B-tree and local heap.
#[derive(Debug, Clone, Copy)]
pub struct LegacyGroup {
    pub header: u64,
    pub btree: u64,
    pub heap: u64,
}

impl FileBuilder {
    /// A file with a v2 superblock.
    pub fn new() -> Self {
        Self::with_version(2)
    }

    /// Superblock versions 0, 2 and 3. Version 0 files are finished with
    /// [`FileBuilder::finish_legacy`].
    pub fn with_version(version: u8) -> Self {
        let len = match version {
            0 => LEGACY_SUPERBLOCK_LEN,
            2 | 3 => SUPERBLOCK_LEN,
            v => panic!("no builder for superblock version {v}"),
        };
        FileBuilder {
            buf: vec![0; len],
            version,
        }
    }

    fn align(&mut self) {
        while self.buf.len() % 8 != 0 {
            self.buf.push(0);
        }
    }

    /// Append raw bytes (chunk or contiguous data) and return their address.
    pub fn raw(&mut self, bytes: &[u8]) -> u64 {
        self.align();
        let at = self.buf.len() as u64;
        self.buf.extend_from_slice(bytes);
        at
    }

    /// Append a v2 object header holding `messages`.
    pub fn object(&mut self, messages: &[(u8, Vec<u8>)]) -> u64 {
        let flagged: Vec<(u8, u8, Vec<u8>)> = messages.iter().map(|(t, m)| (*t, 0, m.clone())).collect();
        self.object_flagged(&flagged)
    }

    /// Append a v2 object header of `(type, envelope flags, payload)`.
    pub fn object_flagged(&mut self, messages: &[(u8, u8, Vec<u8>)]) -> u64 {
        self.align();
        let at = self.buf.len();
        let mut body = Vec::new();
        for (t, flags, payload) in messages {
            body.push(*t);
            body.extend_from_slice(&(payload.len() as u16).to_le_bytes());
            body.push(*flags);
            body.extend_from_slice(payload);
        }
        self.buf.extend_from_slice(b"OHDR");
        self.buf.extend_from_slice(&[2, 0x02]);
        self.buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&body);
        let sum = jenkins_lookup3(&self.buf[at..]);
        self.buf.extend_from_slice(&sum.to_le_bytes());
        at as u64
    }

    /// Append a v1 object header; payloads are padded to 8 bytes.
    pub fn object_v1(&mut self, messages: &[(u8, Vec<u8>)]) -> u64 {
        let mut body = Vec::new();
        for (t, payload) in messages {
            let padded = (payload.len() + 7) & !7;
            body.extend_from_slice(&u16::from(*t).to_le_bytes());
            body.extend_from_slice(&(padded as u16).to_le_bytes());
            body.extend_from_slice(&[0; 4]);
            body.extend_from_slice(payload);
            body.resize(body.len() + padded - payload.len(), 0);
        }
        self.align();
        let at = self.buf.len() as u64;
        self.buf.extend_from_slice(&[1, 0]);
        self.buf.extend_from_slice(&(messages.len() as u16).to_le_bytes());
        self.buf.extend_from_slice(&1u32.to_le_bytes());
        self.buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(&[0; 4]);
        self.buf.extend_from_slice(&body);
        at
    }

    /// A group object linking each `(name, address)`.
    pub fn group(&mut self, links: &[(&str, u64)]) -> u64 {
        let mut messages = vec![(LINK_INFO, link_info())];
        messages.extend(links.iter().map(|(n, a)| (LINK, hard_link(n, *a))));
        self.object(&messages)
    }

    /// A symbol-table group: a local heap of names, one SNOD leaf with the
    /// entries in name order, a one-level group B-tree over it and a v1
    /// header with the symbol table message.
    pub fn legacy_group(&mut self, members: &[(&str, Entry<'_>)]) -> LegacyGroup {
        let mut order: Vec<&(&str, Entry<'_>)> = members.iter().collect();
        order.sort_by_key(|(name, _)| *name);

        let mut segment = vec![0u8; 8];
        let mut put = |text: &str| {
            let at = segment.len() as u64;
            segment.extend_from_slice(text.as_bytes());
            segment.push(0);
            segment.resize((segment.len() + 7) & !7, 0);
            at
        };
        let mut names = Vec::new();
        let mut values = Vec::new();
        for (name, entry) in &order {
            names.push(put(name));
            values.push(match entry {
                Entry::Soft(target) => put(target),
                _ => 0,
            });
        }

        self.align();
        let heap = self.buf.len() as u64;
        self.buf.extend_from_slice(b"HEAP");
        self.buf.extend_from_slice(&[0; 4]);
        for v in [segment.len() as u64, UNDEFINED, heap + 32] {
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
        self.buf.extend_from_slice(&segment);

        let mut snod = b"SNOD".to_vec();
        snod.extend_from_slice(&[1, 0]);
        snod.extend_from_slice(&(order.len() as u16).to_le_bytes());
        for (((_, entry), name), value) in order.iter().zip(&names).zip(&values) {
            let (address, cache) = match entry {
                Entry::Object(a) => (*a, EntryCache::None),
                Entry::Group(g) => (g.header, EntryCache::Group(g.btree, g.heap)),
                Entry::Soft(_) => (UNDEFINED, EntryCache::Soft(*value as u32)),
            };
            symbol_table_entry(&mut snod, *name, address, cache);
        }
        let snod = self.raw(&snod);

        let mut tree = b"TREE".to_vec();
        tree.extend_from_slice(&[0, 0]);
        tree.extend_from_slice(&1u16.to_le_bytes());
        let last = names.last().copied().unwrap_or(0);
        for v in [UNDEFINED, UNDEFINED, 0, snod, last] {
            tree.extend_from_slice(&v.to_le_bytes());
        }
        let btree = self.raw(&tree);

        let mut st = btree.to_le_bytes().to_vec();
        st.extend_from_slice(&heap.to_le_bytes());
        let header = self.object_v1(&[(SYMBOL_TABLE, st)]);
        LegacyGroup { header, btree, heap }
    }

    /// Write the v2 or v3 superblock with `root` as the root group and
    /// return the file bytes.
    pub fn finish(mut self, root: u64) -> Vec<u8> {
        assert!(self.version >= 2, "version 0 files end with finish_legacy");
        let eof = self.buf.len() as u64;
        let mut sb = b"\x89HDF\r\n\x1a\n".to_vec();
        sb.extend_from_slice(&[self.version, 8, 8, 0]);
        for v in [0, UNDEFINED, eof, root] {
            sb.extend_from_slice(&u64::to_le_bytes(v));
        }
        let sum = jenkins_lookup3(&sb);
        sb.extend_from_slice(&sum.to_le_bytes());
        self.buf[..SUPERBLOCK_LEN].copy_from_slice(&sb);
        self.buf
    }

    /// Write a v0 superblock whose root entry caches `root`'s B-tree and
    /// heap addresses.
    pub fn finish_legacy(mut self, root: LegacyGroup) -> Vec<u8> {
        assert_eq!(self.version, 0);
        let eof = self.buf.len() as u64;
        let mut sb = b"\x89HDF\r\n\x1a\n".to_vec();
        sb.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        sb.extend_from_slice(&4u16.to_le_bytes());
        sb.extend_from_slice(&16u16.to_le_bytes());
        sb.extend_from_slice(&0u32.to_le_bytes());
        for v in [0, UNDEFINED, eof, UNDEFINED] {
            sb.extend_from_slice(&v.to_le_bytes());
        }
        symbol_table_entry(&mut sb, 0, root.header, EntryCache::Group(root.btree, root.heap));
        self.buf[..LEGACY_SUPERBLOCK_LEN].copy_from_slice(&sb);
        self.buf
    }
}

enum EntryCache {
    None,
    Group(u64, u64),
    Soft(u32),
}

fn symbol_table_entry(buf: &mut Vec<u8>, name: u64, address: u64, cache: EntryCache) {
    buf.extend_from_slice(&name.to_le_bytes());
    buf.extend_from_slice(&address.to_le_bytes());
    let mut scratch = Vec::new();
    let kind: u32 = match cache {
        EntryCache::None => 0,
        EntryCache::Group(btree, heap) => {
            scratch.extend_from_slice(&btree.to_le_bytes());
            scratch.extend_from_slice(&heap.to_le_bytes());
            1
        }
        EntryCache::Soft(offset) => {
            scratch.extend_from_slice(&offset.to_le_bytes());
            2
        }
    };
    buf.extend_from_slice(&kind.to_le_bytes());
    buf.extend_from_slice(&[0; 4]);
    scratch.resize(16, 0);
    buf.extend_from_slice(&scratch);
}

pub fn dataspace(dims: &[u64]) -> Vec<u8> {
    let kind = if dims.is_empty() { 0 } else { 1 };
    let mut b = vec![2, dims.len() as u8, 0, kind];
    for d in dims {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

pub fn dataspace_with_max(dims: &[u64], max: &[u64]) -> Vec<u8> {
    let mut b = vec![2, dims.len() as u8, 1, 1];
    for d in dims.iter().chain(max) {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

fn type_header(class: u8, bits: [u8; 3], size: u32) -> Vec<u8> {
    let mut b = vec![0x10 | class, bits[0], bits[1], bits[2]];
    b.extend_from_slice(&size.to_le_bytes());
    b
}

pub fn int_type(size: u32, signed: bool) -> Vec<u8> {
    let mut b = type_header(0, [if signed { 0x08 } else { 0 }, 0, 0], size);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&((size * 8) as u16).to_le_bytes());
    b
}

pub fn f64_type() -> Vec<u8> {
    let mut b = type_header(1, [0x20, 63, 0], 8);
    b.extend_from_slice(&0u16.to_le_bytes());
    b.extend_from_slice(&64u16.to_le_bytes());
    b.extend_from_slice(&[52, 11, 0, 52]);
    b.extend_from_slice(&1023u32.to_le_bytes());
    b
}

/// Fixed-length string; `pad` 0 null-terminates, 1 null-pads, 2 space-pads.
pub fn string_type(size: u32, pad: u8) -> Vec<u8> {
    type_header(3, [pad, 0, 0], size)
}

pub fn contiguous(address: u64, size: u64) -> Vec<u8> {
    let mut b = vec![3, 1];
    b.extend_from_slice(&address.to_le_bytes());
    b.extend_from_slice(&size.to_le_bytes());
    b
}

pub fn compact(data: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0];
    b.extend_from_slice(&(data.len() as u16).to_le_bytes());
    b.extend_from_slice(data);
    b
}

/// Layout version 3 with a v1 B-tree chunk index.
pub fn chunked(btree: u64, chunk: &[u32], element_size: u32) -> Vec<u8> {
    let mut b = vec![3, 2, chunk.len() as u8 + 1];
    b.extend_from_slice(&btree.to_le_bytes());
    for d in chunk.iter().chain([&element_size]) {
        b.extend_from_slice(&d.to_le_bytes());
    }
    b
}

/// A leaf chunk node. Each entry is `(stored size, filter mask, offsets,
/// address)` with `rank` offsets; the trailing zero offset is added here.
pub fn chunk_btree_leaf(entries: &[(u32, u32, Vec<u64>, u64)], extent: &[u64]) -> Vec<u8> {
    let mut b = b"TREE".to_vec();
    b.push(1);
    b.push(0);
    b.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    b.extend_from_slice(&UNDEFINED.to_le_bytes());
    b.extend_from_slice(&UNDEFINED.to_le_bytes());
    for (size, mask, offsets, address) in entries {
        b.extend_from_slice(&size.to_le_bytes());
        b.extend_from_slice(&mask.to_le_bytes());
        for o in offsets.iter().chain([&0]) {
            b.extend_from_slice(&o.to_le_bytes());
        }
        b.extend_from_slice(&address.to_le_bytes());
    }
    b.extend_from_slice(&[0; 8]);
    for o in extent.iter().chain([&0]) {
        b.extend_from_slice(&o.to_le_bytes());
    }
    b
}

/// Filter pipeline version 2: `(id, name, optional, client data)`.
pub fn filter_pipeline(filters: &[(u16, Option<&str>, bool, &[u32])]) -> Vec<u8> {
    let mut b = vec![2, filters.len() as u8];
    for (id, name, optional, values) in filters {
        b.extend_from_slice(&id.to_le_bytes());
        let name = name.map(|n| {
            let mut v = n.as_bytes().to_vec();
            v.push(0);
            v
        });
        if *id >= 256 {
            b.extend_from_slice(&(name.as_ref().map_or(0, Vec::len) as u16).to_le_bytes());
        }
        b.extend_from_slice(&u16::from(*optional).to_le_bytes());
        b.extend_from_slice(&(values.len() as u16).to_le_bytes());
        if *id >= 256 {
            if let Some(n) = &name {
                b.extend_from_slice(n);
            }
        }
        for v in values.iter() {
            b.extend_from_slice(&v.to_le_bytes());
        }
    }
    b
}

pub fn fill_value(value: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0b0010_1010];
    b.extend_from_slice(&(value.len() as u32).to_le_bytes());
    b.extend_from_slice(value);
    b
}

/// Compact link info: no dense storage.
pub fn link_info() -> Vec<u8> {
    let mut b = vec![0, 0];
    b.extend_from_slice(&UNDEFINED.to_le_bytes());
    b.extend_from_slice(&UNDEFINED.to_le_bytes());
    b
}

pub fn hard_link(name: &str, address: u64) -> Vec<u8> {
    let mut b = vec![1, 0x00, name.len() as u8];
    b.extend_from_slice(name.as_bytes());
    b.extend_from_slice(&address.to_le_bytes());
    b
}

pub fn soft_link(name: &str, target: &str) -> Vec<u8> {
    let mut b = vec![1, 0x08, 1, name.len() as u8];
    b.extend_from_slice(name.as_bytes());
    b.extend_from_slice(&(target.len() as u16).to_le_bytes());
    b.extend_from_slice(target.as_bytes());
    b
}

pub fn attribute(name: &str, datatype: &[u8], dataspace: &[u8], data: &[u8]) -> Vec<u8> {
    let mut b = vec![3, 0];
    b.extend_from_slice(&(name.len() as u16 + 1).to_le_bytes());
    b.extend_from_slice(&(datatype.len() as u16).to_le_bytes());
    b.extend_from_slice(&(dataspace.len() as u16).to_le_bytes());
    b.push(0);
    b.extend_from_slice(name.as_bytes());
    b.push(0);
    b.extend_from_slice(datatype);
    b.extend_from_slice(dataspace);
    b.extend_from_slice(data);
    b
}

/// A version 3 shared message reference to the object header at `address`.
pub fn shared_in_header(address: u64) -> Vec<u8> {
    let mut b = vec![3, 2];
    b.extend_from_slice(&address.to_le_bytes());
    b
}

/// A version 3 shared message reference into the shared message heap.
pub fn shared_in_heap(id: [u8; 8]) -> Vec<u8> {
    let mut b = vec![3, 1];
    b.extend_from_slice(&id);
    b
}

/// An attribute whose datatype field is the shared reference `datatype`.
pub fn shared_type_attribute(name: &str, datatype: &[u8], dataspace: &[u8], data: &[u8]) -> Vec<u8> {
    let mut b = attribute(name, datatype, dataspace, data);
    b[1] = 0x01;
    b
}

pub fn modification_time(seconds: u32) -> Vec<u8> {
    let mut b = vec![1, 0, 0, 0];
    b.extend_from_slice(&seconds.to_le_bytes());
    b
}

pub fn zlib(data: &[u8]) -> Vec<u8> {
    let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
    enc.write_all(data).expect("in-memory write");
    enc.finish().expect("in-memory finish")
}

pub fn f64_bytes(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// A 6x5 f64 dataset, value `10 * row + col`, stored in deflated 4x3
/// chunks (the last row and column of chunks are partial). Returns the
/// dataset's header address.
pub fn chunked_grid(b: &mut FileBuilder, extra: &[(u8, Vec<u8>)]) -> u64 {
    let (rows, cols, cr, cc) = (6u64, 5u64, 4u64, 3u64);
    let mut entries = Vec::new();
    for r0 in (0..rows).step_by(cr as usize) {
        for c0 in (0..cols).step_by(cc as usize) {
            let mut chunk = Vec::new();
            for r in r0..r0 + cr {
                for c in c0..c0 + cc {
                    chunk.push((10 * r + c) as f64);
                }
            }
            let stored = zlib(&f64_bytes(&chunk));
            let at = b.raw(&stored);
            entries.push((stored.len() as u32, 0, vec![r0, c0], at));
        }
    }
    let btree = b.raw(&chunk_btree_leaf(&entries, &[rows, cols]));
    let mut messages = vec![
        (DATASPACE, dataspace(&[rows, cols])),
        (DATATYPE, f64_type()),
        (LAYOUT, chunked(btree, &[cr as u32, cc as u32], 8)),
        (FILTER_PIPELINE, filter_pipeline(&[(1, None, false, &[6])])),
    ];
    messages.extend_from_slice(extra);
    b.object(&messages)
}

pub fn grid_value(r: u64, c: u64) -> f64 {
    (10 * r + c) as f64
}
