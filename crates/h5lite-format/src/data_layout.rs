//! Data layout message (type 0x0008), versions 1 through 4.

use crate::cursor::{bit, Cursor, Sizes};
use crate::error::{FormatError, Result};

/// Parameters of an extensible array chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtensibleArrayParams {
    /// Bits needed to store the maximum number of elements.
    pub max_elements_bits: u8,
    /// Elements stored directly in the index block.
    pub index_elements: u8,
    /// Minimum data block pointers in a super block.
    pub min_pointers: u8,
    /// Minimum elements per data block.
    pub min_elements: u8,
    /// Bits for the number of elements in a data block page.
    pub page_bits: u8,
}

/// How the chunks of a dataset are located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkIndexKind {
    /// Version 1 B-tree, type 1 (layout versions 1 to 3).
    BTreeV1 { address: Option<u64> },
    /// One chunk covering the whole dataset.
    Single {
        address: Option<u64>,
        /// `(stored size, filter mask)` when the chunk is filtered.
        filtered: Option<(u64, u32)>,
    },
    /// Chunks laid out back to back in row-major chunk order.
    Implicit { address: Option<u64> },
    FixedArray { address: Option<u64>, page_bits: u8 },
    ExtensibleArray {
        address: Option<u64>,
        params: ExtensibleArrayParams,
    },
    BTreeV2 {
        address: Option<u64>,
        node_size: u32,
        split_percent: u8,
        merge_percent: u8,
    },
}

impl ChunkIndexKind {
    pub fn address(&self) -> Option<u64> {
        match self {
            ChunkIndexKind::BTreeV1 { address }
            | ChunkIndexKind::Single { address, .. }
            | ChunkIndexKind::Implicit { address }
            | ChunkIndexKind::FixedArray { address, .. }
            | ChunkIndexKind::ExtensibleArray { address, .. }
            | ChunkIndexKind::BTreeV2 { address, .. } => *address,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChunkIndexKind::BTreeV1 { .. } => "B-tree v1",
            ChunkIndexKind::Single { .. } => "single chunk",
            ChunkIndexKind::Implicit { .. } => "implicit",
            ChunkIndexKind::FixedArray { .. } => "fixed array",
            ChunkIndexKind::ExtensibleArray { .. } => "extensible array",
            ChunkIndexKind::BTreeV2 { .. } => "B-tree v2",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLayout {
    Compact {
        data: Vec<u8>,
    },
    Contiguous {
        address: Option<u64>,
        /// Stored byte size; layout versions 1 and 2 leave it to the
        /// dataspace and datatype.
        size: Option<u64>,
    },
    Chunked {
        /// Chunk extent per dataset dimension.
        chunk_dims: Vec<u64>,
        element_size: u32,
        index: ChunkIndexKind,
        /// Edge chunks that do not fill the chunk are stored unfiltered.
        unfiltered_partial_edges: bool,
    },
    Virtual {
        heap_address: Option<u64>,
        heap_index: u32,
    },
}

impl DataLayout {
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<DataLayout> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        match version {
            1 | 2 => parse_legacy(&mut c, sizes),
            3 | 4 => parse_modern(&mut c, version, sizes),
            _ => Err(FormatError::UnsupportedVersion {
                structure: "data layout message",
                version,
            }),
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            DataLayout::Compact { .. } => "compact",
            DataLayout::Contiguous { .. } => "contiguous",
            DataLayout::Chunked { .. } => "chunked",
            DataLayout::Virtual { .. } => "virtual",
        }
    }
}

fn unknown_class(class: u8) -> FormatError {
    FormatError::malformed("data layout message", 0, format!("unknown layout class {class}"))
}

/// Split stored chunk dimensions into the dataset part and the trailing
/// element size entry.
fn split_element_dim(mut dims: Vec<u64>) -> Result<(Vec<u64>, u32)> {
    let element = dims
        .pop()
        .ok_or_else(|| FormatError::malformed("data layout message", 0, "chunked layout without dimensions"))?;
    if dims.iter().any(|&d| d == 0) {
        return Err(FormatError::malformed("data layout message", 0, "zero chunk dimension"));
    }
    let element = u32::try_from(element).map_err(|_| FormatError::ArithmeticOverflow("chunk element size"))?;
    Ok((dims, element))
}

fn parse_legacy(c: &mut Cursor<'_>, sizes: Sizes) -> Result<DataLayout> {
    let ndims = c.read_u8()? as usize;
    let class = c.read_u8()?;
    c.skip(5)?;
    let address = if class != 0 { c.read_address(sizes)? } else { None };
    let dims = (0..ndims).map(|_| c.read_u32().map(u64::from)).collect::<Result<Vec<_>>>()?;
    match class {
        0 => {
            let size = c.read_u32()? as usize;
            Ok(DataLayout::Compact {
                data: c.read_bytes(size)?.to_vec(),
            })
        }
        1 => Ok(DataLayout::Contiguous { address, size: None }),
        2 => {
            let (chunk_dims, _) = split_element_dim(dims)?;
            let element_size = c.read_u32()?;
            Ok(DataLayout::Chunked {
                chunk_dims,
                element_size,
                index: ChunkIndexKind::BTreeV1 { address },
                unfiltered_partial_edges: false,
            })
        }
        other => Err(unknown_class(other)),
    }
}

fn parse_modern(c: &mut Cursor<'_>, version: u8, sizes: Sizes) -> Result<DataLayout> {
    let class = c.read_u8()?;
    match class {
        0 => {
            let size = c.read_u16()? as usize;
            Ok(DataLayout::Compact {
                data: c.read_bytes(size)?.to_vec(),
            })
        }
        1 => {
            let address = c.read_address(sizes)?;
            let size = c.read_length(sizes)?;
            Ok(DataLayout::Contiguous {
                address,
                size: Some(size),
            })
        }
        2 if version == 3 => {
            let ndims = c.read_u8()? as usize;
            let address = c.read_address(sizes)?;
            let dims = (0..ndims).map(|_| c.read_u32().map(u64::from)).collect::<Result<Vec<_>>>()?;
            let (chunk_dims, element_size) = split_element_dim(dims)?;
            Ok(DataLayout::Chunked {
                chunk_dims,
                element_size,
                index: ChunkIndexKind::BTreeV1 { address },
                unfiltered_partial_edges: false,
            })
        }
        2 => parse_v4_chunked(c, sizes),
        3 if version == 4 => Ok(DataLayout::Virtual {
            heap_address: c.read_address(sizes)?,
            heap_index: c.read_u32()?,
        }),
        other => Err(unknown_class(other)),
    }
}

fn parse_v4_chunked(c: &mut Cursor<'_>, sizes: Sizes) -> Result<DataLayout> {
    let flags = c.read_u8()? as u64;
    let ndims = c.read_u8()? as usize;
    let width = c.read_u8()? as usize;
    if !(1..=8).contains(&width) {
        return Err(FormatError::malformed(
            "data layout message",
            c.position() as u64,
            format!("dimension size width {width}"),
        ));
    }
    let dims = (0..ndims).map(|_| c.read_uint(width)).collect::<Result<Vec<_>>>()?;
    let (chunk_dims, element_size) = split_element_dim(dims)?;

    let index_type = c.read_u8()?;
    let index = match index_type {
        1 => {
            let filtered = if bit(flags, 1) {
                Some((c.read_length(sizes)?, c.read_u32()?))
            } else {
                None
            };
            ChunkIndexKind::Single {
                filtered,
                address: c.read_address(sizes)?,
            }
        }
        2 => ChunkIndexKind::Implicit {
            address: c.read_address(sizes)?,
        },
        3 => {
            let page_bits = c.read_u8()?;
            ChunkIndexKind::FixedArray {
                page_bits,
                address: c.read_address(sizes)?,
            }
        }
        4 => {
            let params = ExtensibleArrayParams {
                max_elements_bits: c.read_u8()?,
                index_elements: c.read_u8()?,
                min_pointers: c.read_u8()?,
                min_elements: c.read_u8()?,
                page_bits: c.read_u8()?,
            };
            ChunkIndexKind::ExtensibleArray {
                params,
                address: c.read_address(sizes)?,
            }
        }
        5 => {
            let node_size = c.read_u32()?;
            let split_percent = c.read_u8()?;
            let merge_percent = c.read_u8()?;
            ChunkIndexKind::BTreeV2 {
                node_size,
                split_percent,
                merge_percent,
                address: c.read_address(sizes)?,
            }
        }
        other => {
            return Err(FormatError::malformed(
                "data layout message",
                c.position() as u64,
                format!("unknown chunk index type {other}"),
            ))
        }
    };

    Ok(DataLayout::Chunked {
        chunk_dims,
        element_size,
        index,
        unfiltered_partial_edges: bit(flags, 0),
    })
}
