//! Symbol table entries, group symbol table nodes (SNOD) and the Symbol
//! Table message (type 0x0011) of legacy groups.

use std::fmt;

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

/// Cached information in an entry's 16-byte scratch pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCache {
    /// Cache type 0: nothing cached.
    None,
    /// Cache type 1: the entry is a group with these structures.
    Group {
        btree_address: u64,
        name_heap_address: u64,
    },
    /// Cache type 2: the entry is a soft link whose value is in the heap.
    SoftLink { link_value_offset: u32 },
}

impl EntryCache {
    pub fn cache_type(&self) -> u32 {
        match self {
            EntryCache::None => 0,
            EntryCache::Group { .. } => 1,
            EntryCache::SoftLink { .. } => 2,
        }
    }
}

/// One directory entry of a legacy group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableEntry {
    /// File position the entry was decoded from.
    pub address: u64,
    /// Offset of the link name in the group's local heap.
    pub link_name_offset: u64,
    /// Address of the child object's header.
    pub object_header_address: u64,
    pub cache: EntryCache,
}

impl SymbolTableEntry {
    /// Encoded size for the given widths.
    pub fn encoded_size(sizes: Sizes) -> usize {
        2 * sizes.offset_size as usize + 4 + 4 + 16
    }

    /// Decode an entry at the cursor position.
    pub fn read(c: &mut Cursor<'_>, sizes: Sizes) -> Result<Self> {
        let address = c.position() as u64;
        let link_name_offset = c.read_offset(sizes)?;
        let object_header_address = c.read_offset(sizes)?;
        let cache_type = c.read_u32()?;
        c.skip(4)?; // reserved
        let scratch = c.read_bytes(16)?;
        let mut sc = Cursor::new(scratch);
        let cache = match cache_type {
            0 => EntryCache::None,
            1 => EntryCache::Group {
                btree_address: sc.read_offset(sizes)?,
                name_heap_address: sc.read_offset(sizes)?,
            },
            2 => EntryCache::SoftLink {
                link_value_offset: sc.read_u32()?,
            },
            other => {
                return Err(FormatError::malformed(
                    "symbol table entry",
                    address,
                    format!("unknown cache type {other}"),
                ))
            }
        };
        Ok(SymbolTableEntry {
            address,
            link_name_offset,
            object_header_address,
            cache,
        })
    }
}

impl fmt::Display for SymbolTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SymbolTableEntry [address={:#x}, link_name_offset={}, object_header_address={:#x}, cache_type={}",
            self.address,
            self.link_name_offset,
            self.object_header_address,
            self.cache.cache_type()
        )?;
        match self.cache {
            EntryCache::None => {}
            EntryCache::Group {
                btree_address,
                name_heap_address,
            } => write!(
                f,
                ", btree_address={btree_address:#x}, name_heap_address={name_heap_address:#x}"
            )?,
            EntryCache::SoftLink { link_value_offset } => {
                write!(f, ", link_value_offset={link_value_offset}")?
            }
        }
        write!(f, "]")
    }
}

/// A group symbol table node ("SNOD"), a leaf of the group B-tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSymbolTableNode {
    pub address: u64,
    pub version: u8,
    /// Entries in on-disk order.
    pub entries: Vec<SymbolTableEntry>,
}

impl GroupSymbolTableNode {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<Self> {
        let mut c = Cursor::at_address(data, address)?;
        c.read_signature(b"SNOD", "symbol table node")?;
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "symbol table node",
                version,
            });
        }
        c.skip(1)?;
        let count = c.read_u16()? as usize;
        c.ensure(count * SymbolTableEntry::encoded_size(sizes))?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            entries.push(SymbolTableEntry::read(&mut c, sizes)?);
        }
        Ok(GroupSymbolTableNode {
            address,
            version,
            entries,
        })
    }
}

impl fmt::Display for GroupSymbolTableNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GroupSymbolTableNode [address={:#x}, version={}, entries={}, symbol_table_entries=[",
            self.address,
            self.version,
            self.entries.len()
        )?;
        for (i, e) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{e}")?;
        }
        write!(f, "]]")
    }
}

/// Symbol Table message: where a legacy group keeps its B-tree and heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolTableMessage {
    pub btree_address: u64,
    pub local_heap_address: u64,
}

impl SymbolTableMessage {
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<Self> {
        let mut c = Cursor::new(data);
        Ok(SymbolTableMessage {
            btree_address: c.read_offset(sizes)?,
            local_heap_address: c.read_offset(sizes)?,
        })
    }
}
