//! Link message (type 0x0006), link info message (type 0x0002) and group info
//! message (type 0x000A).

use std::fmt;

use crate::cursor::{bit, Cursor, Sizes};
use crate::error::{FormatError, Result};

/// Where a link points.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkTarget {
    /// Object header address.
    Hard(u64),
    /// Path in the same file, absolute or relative to the containing group.
    Soft(String),
    External { file: String, path: String },
    /// A user-defined link class, kept undecoded.
    UserDefined { link_type: u8, data: Vec<u8> },
}

impl fmt::Display for LinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkTarget::Hard(addr) => write!(f, "hard link to {addr:#x}"),
            LinkTarget::Soft(path) => write!(f, "soft link to {path}"),
            LinkTarget::External { file, path } => write!(f, "external link to {file}:{path}"),
            LinkTarget::UserDefined { link_type, .. } => write!(f, "user-defined link type {link_type}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkMessage {
    pub name: String,
    pub creation_order: Option<u64>,
    pub target: LinkTarget,
}

impl LinkMessage {
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<LinkMessage> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link message",
                version,
            });
        }
        let flags = c.read_u8()?;
        let f = u64::from(flags);
        let link_type = if bit(f, 3) { c.read_u8()? } else { 0 };
        let creation_order = if bit(f, 2) { Some(c.read_u64()?) } else { None };
        if bit(f, 4) {
            // character set of the name
            c.skip(1)?;
        }
        let name_len = c.read_uint(1 << (flags & 0x03))? as usize;
        let name = String::from_utf8_lossy(c.read_bytes(name_len)?).into_owned();

        let target = match link_type {
            0 => LinkTarget::Hard(c.read_offset(sizes)?),
            1 => {
                let len = c.read_u16()? as usize;
                LinkTarget::Soft(String::from_utf8_lossy(c.read_bytes(len)?).into_owned())
            }
            64 => {
                let len = c.read_u16()? as usize;
                let body = c.read_bytes(len)?;
                parse_external(body)?
            }
            other if other >= 65 => {
                let len = c.read_u16()? as usize;
                LinkTarget::UserDefined {
                    link_type: other,
                    data: c.read_bytes(len)?.to_vec(),
                }
            }
            other => {
                return Err(FormatError::malformed(
                    "link message",
                    1,
                    format!("reserved link type {other}"),
                ))
            }
        };

        Ok(LinkMessage {
            name,
            creation_order,
            target,
        })
    }
}

/// External link body: a flags byte, then the file name and the object path,
/// both null-terminated.
fn parse_external(body: &[u8]) -> Result<LinkTarget> {
    let mut c = Cursor::new(body);
    let version_flags = c.read_u8()?;
    if version_flags >> 4 != 0 {
        return Err(FormatError::UnsupportedVersion {
            structure: "external link",
            version: version_flags >> 4,
        });
    }
    let file = c.read_cstring()?;
    let path = c.read_cstring()?;
    Ok(LinkTarget::External { file, path })
}

/// Dense link storage addresses of a new-style group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkInfo {
    pub max_creation_index: Option<u64>,
    pub fractal_heap_address: Option<u64>,
    pub name_index_address: Option<u64>,
    pub creation_order_index_address: Option<u64>,
}

impl LinkInfo {
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<LinkInfo> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "link info message",
                version,
            });
        }
        let flags = c.read_u8()? as u64;
        let max_creation_index = if bit(flags, 0) { Some(c.read_u64()?) } else { None };
        let fractal_heap_address = c.read_address(sizes)?;
        let name_index_address = c.read_address(sizes)?;
        let creation_order_index_address = if bit(flags, 1) { c.read_address(sizes)? } else { None };
        Ok(LinkInfo {
            max_creation_index,
            fractal_heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }

    /// Links live in a fractal heap rather than in header messages.
    pub fn is_dense(&self) -> bool {
        self.fractal_heap_address.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupInfo {
    pub max_compact: Option<u16>,
    pub min_dense: Option<u16>,
    pub estimated_entries: Option<u16>,
    pub estimated_name_length: Option<u16>,
}

impl GroupInfo {
    pub fn parse(data: &[u8]) -> Result<GroupInfo> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "group info message",
                version,
            });
        }
        let flags = c.read_u8()? as u64;
        let mut info = GroupInfo::default();
        if bit(flags, 0) {
            info.max_compact = Some(c.read_u16()?);
            info.min_dense = Some(c.read_u16()?);
        }
        if bit(flags, 1) {
            info.estimated_entries = Some(c.read_u16()?);
            info.estimated_name_length = Some(c.read_u16()?);
        }
        Ok(info)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::symbol_table::tests::push_offset;

    pub(crate) fn hard(name: &str, address: u64) -> Vec<u8> {
        let mut b = vec![1, 0x00, name.len() as u8];
        b.extend_from_slice(name.as_bytes());
        push_offset(&mut b, address, 8);
        b
    }

    pub(crate) fn soft(name: &str, path: &str) -> Vec<u8> {
        let mut b = vec![1, 0x08, 1, name.len() as u8];
        b.extend_from_slice(name.as_bytes());
        b.extend_from_slice(&(path.len() as u16).to_le_bytes());
        b.extend_from_slice(path.as_bytes());
        b
    }

    pub(crate) fn external(name: &str, file: &str, path: &str) -> Vec<u8> {
        let mut b = vec![1, 0x08, 64, name.len() as u8];
        b.extend_from_slice(name.as_bytes());
        let body_len = 1 + file.len() + 1 + path.len() + 1;
        b.extend_from_slice(&(body_len as u16).to_le_bytes());
        b.push(0);
        for s in [file, path] {
            b.extend_from_slice(s.as_bytes());
            b.push(0);
        }
        b
    }

    /// Link info pointing at a fractal heap and a name-index B-tree.
    pub(crate) fn dense_info(heap: u64, name_index: u64) -> Vec<u8> {
        let mut b = vec![0, 0];
        push_offset(&mut b, heap, 8);
        push_offset(&mut b, name_index, 8);
        b
    }

    #[test]
    fn link_kinds() {
        let l = LinkMessage::parse(&hard("data", 0x310), Sizes::default()).unwrap();
        assert_eq!(l.name, "data");
        assert_eq!(l.target, LinkTarget::Hard(0x310));

        let l = LinkMessage::parse(&soft("alias", "/grp/data"), Sizes::default()).unwrap();
        assert_eq!(l.target, LinkTarget::Soft("/grp/data".into()));

        let l = LinkMessage::parse(&external("ext", "other.h5", "/x"), Sizes::default()).unwrap();
        assert_eq!(
            l.target,
            LinkTarget::External {
                file: "other.h5".into(),
                path: "/x".into()
            }
        );
        assert_eq!(l.target.to_string(), "external link to other.h5:/x");
    }

    #[test]
    fn creation_order_and_wide_name_length() {
        // creation order present, 2-byte name length, charset present
        let mut b = vec![1, 0x01 | 0x04 | 0x10];
        b.extend_from_slice(&9u64.to_le_bytes());
        b.push(1);
        b.extend_from_slice(&3u16.to_le_bytes());
        b.extend_from_slice(b"abc");
        push_offset(&mut b, 0x40, 8);
        let l = LinkMessage::parse(&b, Sizes::default()).unwrap();
        assert_eq!(l.creation_order, Some(9));
        assert_eq!(l.name, "abc");
        assert_eq!(l.target, LinkTarget::Hard(0x40));
    }

    #[test]
    fn reserved_link_type_and_version() {
        let mut b = soft("x", "y");
        b[2] = 5;
        assert!(matches!(
            LinkMessage::parse(&b, Sizes::default()),
            Err(FormatError::Malformed { .. })
        ));
        assert!(LinkMessage::parse(&[2, 0], Sizes::default()).is_err());
    }

    #[test]
    fn link_info_and_group_info() {
        let info = LinkInfo::parse(&dense_info(0x800, 0x900), Sizes::default()).unwrap();
        assert!(info.is_dense());
        assert_eq!(info.name_index_address, Some(0x900));

        let mut compact = vec![0, 0];
        push_offset(&mut compact, u64::MAX, 8);
        push_offset(&mut compact, u64::MAX, 8);
        assert!(!LinkInfo::parse(&compact, Sizes::default()).unwrap().is_dense());

        let mut g = vec![0, 0x03];
        for v in [8u16, 6, 4, 12] {
            g.extend_from_slice(&v.to_le_bytes());
        }
        let gi = GroupInfo::parse(&g).unwrap();
        assert_eq!(gi.max_compact, Some(8));
        assert_eq!(gi.estimated_name_length, Some(12));
        assert_eq!(GroupInfo::parse(&[0, 0]).unwrap(), GroupInfo::default());
    }
}
