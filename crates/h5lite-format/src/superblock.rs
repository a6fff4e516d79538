//! Superblock parsing (versions 0 through 3).

use crate::checksum;
use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};
use crate::signature::{find_signature, SIGNATURE};
use crate::symbol_table::SymbolTableEntry;

/// Where the root group lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootLocator {
    /// v0/v1: the root group's symbol table entry, embedded in the superblock.
    SymbolTableEntry {
        /// File position of the embedded entry.
        entry_address: u64,
        entry: SymbolTableEntry,
    },
    /// v2/v3: the root group's object header address.
    ObjectHeader(u64),
}

/// Parsed superblock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Superblock {
    pub version: u8,
    /// File position of the signature.
    pub signature_offset: u64,
    pub sizes: Sizes,
    /// Absolute file position that all addresses are relative to.
    pub base_address: u64,
    /// End-of-file address, relative to the base address.
    pub eof_address: u64,
    pub root: RootLocator,
    /// v0/v1 only; `None` when undefined.
    pub free_space_address: Option<u64>,
    /// v0/v1 only; `None` when undefined.
    pub driver_info_address: Option<u64>,
    /// v2/v3 only; `None` when undefined.
    pub superblock_extension_address: Option<u64>,
    /// v0/v1 only.
    pub group_leaf_node_k: u16,
    /// v0/v1 only.
    pub group_internal_node_k: u16,
    /// v1 only (default 32 otherwise).
    pub indexed_storage_internal_node_k: u16,
    pub consistency_flags: u32,
}

impl Superblock {
    /// Search for the signature from `search_start` and parse the
    /// superblock found there.
    pub fn read(data: &[u8], search_start: u64) -> Result<Superblock> {
        let sig = find_signature(data, search_start)?;
        Superblock::parse(data, sig)
    }

    /// Parse the superblock whose signature starts at `signature_offset`.
    pub fn parse(data: &[u8], signature_offset: usize) -> Result<Superblock> {
        let mut c = Cursor::at(data, signature_offset);
        c.read_signature(&SIGNATURE, "superblock")?;
        let version = c.read_u8()?;
        match version {
            0 | 1 => Self::parse_v0_v1(c, signature_offset, version),
            2 | 3 => Self::parse_v2_v3(c, signature_offset, version),
            _ => Err(FormatError::UnsupportedVersion {
                structure: "superblock",
                version,
            }),
        }
    }

    fn parse_v0_v1(mut c: Cursor<'_>, sig: usize, version: u8) -> Result<Superblock> {
        // free-space version, root symbol table version, reserved, shared header version
        c.skip(4)?;
        let sizes = Sizes::new(c.read_u8()?, c.read_u8()?)?;
        c.skip(1)?;
        let group_leaf_node_k = c.read_u16()?;
        let group_internal_node_k = c.read_u16()?;
        let consistency_flags = c.read_u32()?;
        let indexed_storage_internal_node_k = if version == 1 {
            let k = c.read_u16()?;
            c.skip(2)?;
            k
        } else {
            32
        };

        let base_address = c.read_offset(sizes)?;
        let free_space_address = c.read_address(sizes)?;
        let eof_address = c.read_offset(sizes)?;
        let driver_info_address = c.read_address(sizes)?;

        let entry_address = c.position() as u64;
        let entry = SymbolTableEntry::read(&mut c, sizes)?;

        Ok(Superblock {
            version,
            signature_offset: sig as u64,
            sizes,
            base_address,
            eof_address,
            root: RootLocator::SymbolTableEntry {
                entry_address,
                entry,
            },
            free_space_address,
            driver_info_address,
            superblock_extension_address: None,
            group_leaf_node_k,
            group_internal_node_k,
            indexed_storage_internal_node_k,
            consistency_flags,
        })
    }

    fn parse_v2_v3(mut c: Cursor<'_>, sig: usize, version: u8) -> Result<Superblock> {
        let sizes = Sizes::new(c.read_u8()?, c.read_u8()?)?;
        let consistency_flags = u32::from(c.read_u8()?);
        let base_address = c.read_offset(sizes)?;
        let superblock_extension_address = c.read_address(sizes)?;
        let eof_address = c.read_offset(sizes)?;
        let root_address = c.read_offset(sizes)?;
        checksum::validate_range(c.data(), sig, c.position(), "superblock")?;

        Ok(Superblock {
            version,
            signature_offset: sig as u64,
            sizes,
            base_address,
            eof_address,
            root: RootLocator::ObjectHeader(root_address),
            free_space_address: None,
            driver_info_address: None,
            superblock_extension_address,
            group_leaf_node_k: 4,
            group_internal_node_k: 16,
            indexed_storage_internal_node_k: 32,
            consistency_flags,
        })
    }

    /// Address of the root group's object header.
    pub fn root_object_header_address(&self) -> u64 {
        match self.root {
            RootLocator::SymbolTableEntry { entry, .. } => entry.object_header_address,
            RootLocator::ObjectHeader(addr) => addr,
        }
    }

    /// Whether `addr` is the undefined sentinel for this file's offset width.
    pub fn is_undefined_address(&self, addr: u64) -> bool {
        self.sizes.is_undefined(addr)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::checksum::jenkins_lookup3;
    use crate::symbol_table::tests::{encode_entry, push_offset};
    use crate::symbol_table::EntryCache;

    pub(crate) fn build_v0(root_ohdr: u64, cache: EntryCache) -> Vec<u8> {
        let sizes = Sizes::default();
        let mut b = SIGNATURE.to_vec();
        b.extend_from_slice(&[0, 0, 0, 0, 0, 8, 8, 0]);
        b.extend_from_slice(&4u16.to_le_bytes());
        b.extend_from_slice(&16u16.to_le_bytes());
        b.extend_from_slice(&0u32.to_le_bytes());
        push_offset(&mut b, 0, 8); // base
        push_offset(&mut b, u64::MAX, 8); // free space
        push_offset(&mut b, 4096, 8); // eof
        push_offset(&mut b, u64::MAX, 8); // driver info
        encode_entry(&mut b, 0, root_ohdr, cache, sizes);
        b
    }

    pub(crate) fn build_v2(root_ohdr: u64, eof: u64) -> Vec<u8> {
        let mut b = SIGNATURE.to_vec();
        b.extend_from_slice(&[2, 8, 8, 0]);
        push_offset(&mut b, 0, 8);
        push_offset(&mut b, u64::MAX, 8);
        push_offset(&mut b, eof, 8);
        push_offset(&mut b, root_ohdr, 8);
        let sum = jenkins_lookup3(&b);
        b.extend_from_slice(&sum.to_le_bytes());
        b
    }

    #[test]
    fn v0_parameters() {
        let data = build_v0(
            0x60,
            EntryCache::Group {
                btree_address: 0x88,
                name_heap_address: 0xa8,
            },
        );
        let sb = Superblock::read(&data, 0).unwrap();
        assert_eq!(sb.version, 0);
        assert_eq!(sb.sizes.offset_size, 8);
        assert_eq!(sb.sizes.length_size, 8);
        assert_eq!(sb.group_leaf_node_k, 4);
        assert_eq!(sb.group_internal_node_k, 16);
        assert_eq!(sb.free_space_address, None);
        assert_eq!(sb.driver_info_address, None);
        assert_eq!(sb.base_address, 0);
        assert_eq!(sb.eof_address, 4096);
        match sb.root {
            RootLocator::SymbolTableEntry { entry_address, entry } => {
                assert_eq!(entry_address, 56);
                assert_eq!(entry.object_header_address, 0x60);
            }
            other => panic!("unexpected root {other:?}"),
        }
        assert_eq!(sb.root_object_header_address(), 0x60);
    }

    #[test]
    fn v1_reads_indexed_storage_k() {
        let mut data = build_v0(0x60, EntryCache::None);
        data[8] = 1;
        // Insert indexed storage K (u16) + reserved (u16) after the flags.
        data.splice(24..24, [64u8, 0, 0, 0]);
        let sb = Superblock::parse(&data, 0).unwrap();
        assert_eq!(sb.version, 1);
        assert_eq!(sb.indexed_storage_internal_node_k, 64);
        assert_eq!(sb.eof_address, 4096);
    }

    #[test]
    fn parse_at_wrong_offset_fails() {
        let data = build_v0(0x60, EntryCache::None);
        assert!(matches!(
            Superblock::parse(&data, 5),
            Err(FormatError::InvalidSignature { .. })
        ));
    }

    #[test]
    fn v2_checksum_validated() {
        let data = build_v2(48, 4096);
        let sb = Superblock::parse(&data, 0).unwrap();
        assert_eq!(sb.version, 2);
        assert_eq!(sb.root, RootLocator::ObjectHeader(48));
        assert_eq!(sb.superblock_extension_address, None);

        let mut bad = data.clone();
        bad[20] ^= 0x01;
        assert!(matches!(
            Superblock::parse(&bad, 0),
            Err(FormatError::ChecksumMismatch {
                structure: "superblock",
                ..
            })
        ));
    }

    #[test]
    fn v2_behind_user_block() {
        let mut data = vec![0u8; 512];
        data.extend_from_slice(&build_v2(48, 4096));
        let sb = Superblock::read(&data, 0).unwrap();
        assert_eq!(sb.signature_offset, 512);
    }

    #[test]
    fn unsupported_version() {
        let mut data = SIGNATURE.to_vec();
        data.push(9);
        data.extend_from_slice(&[0; 100]);
        assert_eq!(
            Superblock::parse(&data, 0),
            Err(FormatError::UnsupportedVersion {
                structure: "superblock",
                version: 9
            })
        );
    }

    #[test]
    fn invalid_offset_size() {
        let mut data = build_v2(48, 4096);
        data[9] = 3;
        assert_eq!(Superblock::parse(&data, 0), Err(FormatError::InvalidFieldSize(3)));
    }

    #[test]
    fn truncated_superblock() {
        let data = build_v0(0x60, EntryCache::None);
        assert!(matches!(
            Superblock::parse(&data[..40], 0),
            Err(FormatError::UnexpectedEof { .. })
        ));
    }
}
