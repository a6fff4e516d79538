//! Shared message references.
//!
//! A header message with the shared flag set stores a reference to the real
//! message instead of the message itself.

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};
use crate::message_type::MessageType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharedLocation {
    /// The message lives in another object header (committed datatype and
    /// similar).
    ObjectHeader(u64),
    /// The message lives in the shared object header message heap.
    SohmHeap([u8; 8]),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedRef {
    pub version: u8,
    /// Type of the message that was shared.
    pub msg_type: MessageType,
    pub location: SharedLocation,
}

impl SharedRef {
    pub fn parse(data: &[u8], msg_type: MessageType, sizes: Sizes) -> Result<SharedRef> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let kind = c.read_u8()?;
        let location = match version {
            1 => {
                c.skip(6)?;
                SharedLocation::ObjectHeader(c.read_offset(sizes)?)
            }
            2 => SharedLocation::ObjectHeader(c.read_offset(sizes)?),
            3 => match kind {
                1 => SharedLocation::SohmHeap(c.read_array::<8>()?),
                2 => SharedLocation::ObjectHeader(c.read_offset(sizes)?),
                other => {
                    return Err(FormatError::malformed(
                        "shared message",
                        1,
                        format!("unknown share type {other}"),
                    ))
                }
            },
            _ => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "shared message",
                    version,
                })
            }
        };
        Ok(SharedRef {
            version,
            msg_type,
            location,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions() {
        let mut v1 = vec![1, 0, 0, 0, 0, 0, 0, 0];
        v1.extend_from_slice(&0x440u64.to_le_bytes());
        let r = SharedRef::parse(&v1, MessageType::Datatype, Sizes::default()).unwrap();
        assert_eq!(r.location, SharedLocation::ObjectHeader(0x440));

        let mut v2 = vec![2, 0];
        v2.extend_from_slice(&0x80u64.to_le_bytes());
        let r = SharedRef::parse(&v2, MessageType::Datatype, Sizes::default()).unwrap();
        assert_eq!(r.location, SharedLocation::ObjectHeader(0x80));

        let v3 = [3, 1, 1, 2, 3, 4, 5, 6, 7, 8];
        let r = SharedRef::parse(&v3, MessageType::Dataspace, Sizes::default()).unwrap();
        assert_eq!(r.location, SharedLocation::SohmHeap([1, 2, 3, 4, 5, 6, 7, 8]));
        assert_eq!(r.msg_type, MessageType::Dataspace);
    }

    #[test]
    fn bad_share_type() {
        assert!(SharedRef::parse(&[3, 7, 0], MessageType::Datatype, Sizes::default()).is_err());
        assert!(matches!(
            SharedRef::parse(&[4, 0], MessageType::Datatype, Sizes::default()),
            Err(FormatError::UnsupportedVersion { .. })
        ));
    }
}
