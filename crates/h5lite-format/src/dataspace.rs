//! Dataspace message (type 0x0001): rank and extents.

use crate::cursor::{bit, Cursor, Sizes};
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataspaceKind {
    Scalar,
    Simple,
    Null,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dataspace {
    pub version: u8,
    pub kind: DataspaceKind,
    pub dims: Vec<u64>,
    /// Maximum extents; the undefined length value means unlimited.
    pub max_dims: Option<Vec<u64>>,
    /// Version 1 permutation indices were present and skipped.
    pub permutation_present: bool,
}

impl Dataspace {
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<Dataspace> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let rank = c.read_u8()? as usize;
        let flags = c.read_u8()? as u64;
        let kind = match version {
            1 => {
                c.skip(5)?;
                if rank == 0 {
                    DataspaceKind::Scalar
                } else {
                    DataspaceKind::Simple
                }
            }
            2 => match c.read_u8()? {
                0 => DataspaceKind::Scalar,
                1 => DataspaceKind::Simple,
                2 => DataspaceKind::Null,
                other => {
                    return Err(FormatError::malformed(
                        "dataspace message",
                        1,
                        format!("unknown dataspace type {other}"),
                    ))
                }
            },
            _ => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "dataspace message",
                    version,
                })
            }
        };

        let dims = (0..rank).map(|_| c.read_length(sizes)).collect::<Result<Vec<_>>>()?;
        let max_dims = if bit(flags, 0) {
            Some((0..rank).map(|_| c.read_length(sizes)).collect::<Result<Vec<_>>>()?)
        } else {
            None
        };
        let permutation_present = version == 1 && bit(flags, 1);
        if permutation_present {
            c.skip(rank * sizes.length_size as usize)?;
        }

        Ok(Dataspace {
            version,
            kind,
            dims,
            max_dims,
            permutation_present,
        })
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Element count: the checked product of the extents. Scalar spaces hold
    /// one element and null spaces none.
    pub fn num_elements(&self) -> Result<u64> {
        match self.kind {
            DataspaceKind::Null => Ok(0),
            DataspaceKind::Scalar => Ok(1),
            DataspaceKind::Simple => self
                .dims
                .iter()
                .try_fold(1u64, |acc, &d| acc.checked_mul(d))
                .ok_or(FormatError::ArithmeticOverflow("dataspace element count")),
        }
    }
}
