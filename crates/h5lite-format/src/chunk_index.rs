//! Pieces shared by the array-based chunk indexes: element decoding and the
//! linear-index to chunk-coordinate mapping.

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

/// One allocated entry of a fixed or extensible array, keyed by its linear
/// chunk index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexedChunk {
    pub index: u64,
    pub address: u64,
    /// Stored size; only filtered arrays record it.
    pub size: Option<u64>,
    pub filter_mask: u32,
}

/// Decode one array element at the cursor. `filtered` arrays store the
/// address, the stored size in the bytes left over and a filter mask.
/// Returns `None` for an unallocated chunk.
pub(crate) fn read_element(
    c: &mut Cursor<'_>,
    index: u64,
    filtered: bool,
    entry_size: usize,
    sizes: Sizes,
) -> Result<Option<IndexedChunk>> {
    let os = sizes.offset_size as usize;
    let address = c.read_address(sizes)?;
    let (size, filter_mask) = if filtered {
        let width = entry_size
            .checked_sub(os + 4)
            .filter(|w| (1..=8).contains(w))
            .ok_or_else(|| {
                FormatError::malformed(
                    "chunk index element",
                    c.position() as u64,
                    format!("filtered entry size {entry_size}"),
                )
            })?;
        (Some(c.read_uint(width)?), c.read_u32()?)
    } else {
        if entry_size > os {
            c.skip(entry_size - os)?;
        }
        (None, 0)
    };
    Ok(address.map(|address| IndexedChunk {
        index,
        address,
        size,
        filter_mask,
    }))
}

/// Row-major chunk grid used to turn a linear chunk index into chunk
/// coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkGrid {
    /// Dimension order of the linearization, slowest first.
    order: Vec<usize>,
    /// Chunks per dimension, in `order`.
    counts: Vec<u64>,
    chunk_dims: Vec<u64>,
}

impl ChunkGrid {
    /// Grid over `extent` (usually the maximum dimensions) with the natural
    /// dimension order.
    pub fn new(extent: &[u64], chunk_dims: &[u64]) -> Result<ChunkGrid> {
        ChunkGrid::with_order(extent, chunk_dims, (0..extent.len()).collect())
    }

    /// Grid that linearizes dimension `slowest` first and the rest in order.
    /// Extensible arrays index this way around their unlimited dimension.
    pub fn with_slowest(extent: &[u64], chunk_dims: &[u64], slowest: usize) -> Result<ChunkGrid> {
        let mut order = vec![slowest];
        order.extend((0..extent.len()).filter(|&d| d != slowest));
        ChunkGrid::with_order(extent, chunk_dims, order)
    }

    fn with_order(extent: &[u64], chunk_dims: &[u64], order: Vec<usize>) -> Result<ChunkGrid> {
        if extent.len() != chunk_dims.len() {
            return Err(FormatError::malformed(
                "chunked layout",
                0,
                format!("rank {} with {} chunk dimensions", extent.len(), chunk_dims.len()),
            ));
        }
        let counts = order
            .iter()
            .map(|&d| match chunk_dims[d] {
                0 => Err(FormatError::malformed("chunked layout", 0, "zero chunk dimension")),
                c => Ok(extent[d].div_ceil(c)),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(ChunkGrid {
            order,
            counts,
            chunk_dims: chunk_dims.to_vec(),
        })
    }

    /// Total number of chunks, saturating for unlimited extents.
    pub fn len(&self) -> u64 {
        self.counts.iter().fold(1u64, |acc, &n| acc.saturating_mul(n))
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element offsets of the chunk with linear index `index`.
    pub fn offsets(&self, index: u64) -> Result<Vec<u64>> {
        let mut out = vec![0u64; self.chunk_dims.len()];
        let mut rest = index;
        for (pos, &d) in self.order.iter().enumerate().rev() {
            let n = self.counts[pos];
            // The slowest dimension takes whatever is left.
            let scaled = if pos == 0 || n == 0 { rest } else { rest % n };
            if pos != 0 && n != 0 {
                rest /= n;
            }
            out[d] = scaled
                .checked_mul(self.chunk_dims[d])
                .ok_or(FormatError::ArithmeticOverflow("chunk offset"))?;
        }
        Ok(out)
    }

    /// Linear index of the chunk whose scaled coordinates are `scaled`.
    pub fn linear(&self, scaled: &[u64]) -> u64 {
        self.order
            .iter()
            .zip(&self.counts)
            .fold(0u64, |acc, (&d, &n)| acc.wrapping_mul(n).wrapping_add(scaled[d]))
    }
}
