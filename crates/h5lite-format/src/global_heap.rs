//! Global heap collections ("GCOL"), used for variable-length data.

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapObject {
    /// 1-based; index 0 marks free space.
    pub index: u16,
    pub reference_count: u16,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalHeapCollection {
    pub address: u64,
    pub collection_size: u64,
    pub objects: Vec<GlobalHeapObject>,
}

impl GlobalHeapCollection {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<GlobalHeapCollection> {
        let mut c = Cursor::at_address(data, address)?;
        c.read_signature(b"GCOL", "global heap collection")?;
        let version = c.read_u8()?;
        if version != 1 {
            return Err(FormatError::UnsupportedVersion {
                structure: "global heap collection",
                version,
            });
        }
        c.skip(3)?;
        let collection_size = c.read_length(sizes)?;
        let end = usize::try_from(address)
            .ok()
            .and_then(|a| a.checked_add(usize::try_from(collection_size).ok()?))
            .ok_or(FormatError::ArithmeticOverflow("global heap collection end"))?;
        if end > data.len() {
            return Err(FormatError::UnexpectedEof {
                offset: address,
                needed: collection_size as usize,
                available: data.len().saturating_sub(address as usize),
            });
        }
        let object_header = 8 + sizes.length_size as usize;

        let mut objects = Vec::new();
        while c.position() + object_header <= end {
            let index = c.read_u16()?;
            if index == 0 {
                break;
            }
            let reference_count = c.read_u16()?;
            c.skip(4)?;
            let size = usize::try_from(c.read_length(sizes)?)
                .map_err(|_| FormatError::ArithmeticOverflow("global heap object size"))?;
            let start = c.position();
            if start.checked_add(size).map_or(true, |e| e > end) {
                return Err(FormatError::malformed(
                    "global heap collection",
                    start as u64,
                    format!("object {index} of {size} bytes overruns the collection"),
                ));
            }
            let body = c.read_bytes(size)?.to_vec();
            // The last object may end flush with the collection.
            let padded = start + size + (8 - size % 8) % 8;
            c.seek(padded.min(end));
            objects.push(GlobalHeapObject {
                index,
                reference_count,
                data: body,
            });
        }

        Ok(GlobalHeapCollection {
            address,
            collection_size,
            objects,
        })
    }

    pub fn object(&self, index: u16) -> Option<&GlobalHeapObject> {
        self.objects.iter().find(|o| o.index == index)
    }
}

/// A variable-length element as stored in a dataset or attribute: sequence
/// length, collection address and object index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlobalHeapId {
    pub length: u32,
    pub collection_address: Option<u64>,
    pub index: u32,
}

impl GlobalHeapId {
    pub fn encoded_size(sizes: Sizes) -> usize {
        4 + sizes.offset_size as usize + 4
    }

    pub fn parse(raw: &[u8], sizes: Sizes) -> Result<GlobalHeapId> {
        let mut c = Cursor::new(raw);
        Ok(GlobalHeapId {
            length: c.read_u32()?,
            collection_address: c.read_address(sizes)?,
            index: c.read_u32()?,
        })
    }
}
