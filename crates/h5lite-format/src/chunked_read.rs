//! Chunked dataset reading: locating chunks through any of the chunk index
//! kinds, decoding them through the filter pipeline, and assembling the
//! dataset or a window of it.

#[cfg(feature = "parallel")]
use std::sync::atomic::{AtomicBool, Ordering};

use crate::btree_v1::collect_chunk_entries;
use crate::btree_v2::{collect_records, BTreeV2Header, Record};
use crate::chunk_index::{ChunkGrid, IndexedChunk};
use crate::cursor::Sizes;
use crate::data_layout::{ChunkIndexKind, DataLayout};
use crate::dataspace::Dataspace;
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::{apply_filters, FilterRegistry};
use crate::selection::{copy_intersection, Region, Selection};
use crate::{extensible_array, fixed_array};

/// One stored chunk: its element offsets in the dataset, where it lives,
/// how many bytes it occupies and which filters were skipped for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub offsets: Vec<u64>,
    pub address: u64,
    pub size: u64,
    pub filter_mask: u32,
}

/// Tuning for chunk decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Decode chunks on the rayon pool. Ignored without the `parallel` feature.
    pub parallel: bool,
    /// Fewest chunks for which the parallel path is taken.
    pub parallel_threshold: usize,
    /// Chunks decoded per parallel batch.
    pub batch_size: usize,
}

impl Default for ReadOptions {
    fn default() -> Self {
        ReadOptions {
            parallel: true,
            parallel_threshold: 4,
            batch_size: 256,
        }
    }
}

fn chunk_byte_size(chunk_dims: &[u64], element_size: u64) -> Result<u64> {
    chunk_dims
        .iter()
        .try_fold(element_size, |acc, &d| acc.checked_mul(d))
        .ok_or(FormatError::ArithmeticOverflow("chunk byte size"))
}

fn length_is_unlimited(v: u64, sizes: Sizes) -> bool {
    let bits = 8 * u32::from(sizes.length_size);
    v == if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 }
}

/// Extent the array indexes are laid out over: the maximum dimensions when
/// they are fixed, otherwise the current ones.
fn index_extent(space: &Dataspace, sizes: Sizes) -> Vec<u64> {
    match &space.max_dims {
        Some(max) => max
            .iter()
            .zip(&space.dims)
            .map(|(&m, &d)| if length_is_unlimited(m, sizes) { u64::MAX } else { m.max(d) })
            .collect(),
        None => space.dims.clone(),
    }
}

fn inside(offsets: &[u64], dims: &[u64]) -> bool {
    offsets.iter().zip(dims).all(|(o, d)| o < d)
}

fn from_indexed(grid: &ChunkGrid, entries: Vec<IndexedChunk>, chunk_bytes: u64, dims: &[u64]) -> Result<Vec<ChunkRecord>> {
    let mut out = Vec::with_capacity(entries.len());
    for e in entries {
        let offsets = grid.offsets(e.index)?;
        if inside(&offsets, dims) {
            out.push(ChunkRecord {
                offsets,
                address: e.address,
                size: e.size.unwrap_or(chunk_bytes),
                filter_mask: e.filter_mask,
            });
        }
    }
    Ok(out)
}

/// Every allocated chunk of a chunked `layout` over `space`. Unallocated
/// chunks are left out and read as fill.
pub fn collect_chunks(data: &[u8], layout: &DataLayout, space: &Dataspace, sizes: Sizes) -> Result<Vec<ChunkRecord>> {
    let DataLayout::Chunked {
        chunk_dims,
        element_size,
        index,
        ..
    } = layout
    else {
        return Err(FormatError::Unsupported(format!(
            "chunk lookup on a {} layout",
            layout.class_name()
        )));
    };
    let rank = chunk_dims.len();
    if rank != space.rank() {
        return Err(FormatError::malformed(
            "chunked layout",
            0,
            format!("rank {rank} chunk with rank {} dataspace", space.rank()),
        ));
    }
    let chunk_bytes = chunk_byte_size(chunk_dims, u64::from(*element_size))?;
    let Some(address) = index.address() else {
        return Ok(Vec::new());
    };
    let dims = &space.dims;

    let records = match index {
        ChunkIndexKind::BTreeV1 { .. } => collect_chunk_entries(data, address, sizes, rank)?
            .into_iter()
            .map(|(key, child)| ChunkRecord {
                // the trailing key offset is the element-size dimension
                offsets: key.offsets[..rank].to_vec(),
                address: child,
                size: u64::from(key.chunk_size),
                filter_mask: key.filter_mask,
            })
            .filter(|r| inside(&r.offsets, dims))
            .collect(),
        ChunkIndexKind::Single { filtered, .. } => {
            let (size, filter_mask) = filtered.unwrap_or((chunk_bytes, 0));
            vec![ChunkRecord {
                offsets: vec![0; rank],
                address,
                size,
                filter_mask,
            }]
        }
        ChunkIndexKind::Implicit { .. } => {
            // implicit indexes never have unlimited dimensions
            let extent: Vec<u64> = index_extent(space, sizes)
                .into_iter()
                .zip(dims)
                .map(|(e, &d)| if e == u64::MAX { d } else { e })
                .collect();
            let grid = ChunkGrid::new(&extent, chunk_dims)?;
            let mut out = Vec::new();
            for i in 0..grid.len() {
                let offsets = grid.offsets(i)?;
                if !inside(&offsets, dims) {
                    continue;
                }
                let at = i
                    .checked_mul(chunk_bytes)
                    .and_then(|off| off.checked_add(address))
                    .ok_or(FormatError::ArithmeticOverflow("implicit chunk address"))?;
                out.push(ChunkRecord {
                    offsets,
                    address: at,
                    size: chunk_bytes,
                    filter_mask: 0,
                });
            }
            out
        }
        ChunkIndexKind::FixedArray { .. } => {
            let grid = ChunkGrid::new(&index_extent(space, sizes), chunk_dims)?;
            from_indexed(&grid, fixed_array::read_chunks(data, address, sizes)?, chunk_bytes, dims)?
        }
        ChunkIndexKind::ExtensibleArray { .. } => {
            let extent = index_extent(space, sizes);
            let slowest = extent.iter().position(|&e| e == u64::MAX).unwrap_or(0);
            let grid = ChunkGrid::with_slowest(&extent, chunk_dims, slowest)?;
            from_indexed(&grid, extensible_array::read_chunks(data, address, sizes)?, chunk_bytes, dims)?
        }
        ChunkIndexKind::BTreeV2 { .. } => {
            let header = BTreeV2Header::read(data, address, sizes)?;
            if !matches!(header.tree_type, 10 | 11) {
                return Err(FormatError::malformed(
                    "B-tree v2 header",
                    address,
                    format!("record type {} in a chunk index", header.tree_type),
                ));
            }
            let mut out = Vec::new();
            for raw in collect_records(data, &header, sizes)? {
                let Record::Chunk {
                    address: Some(at),
                    size,
                    filter_mask,
                    scaled,
                } = Record::decode(header.tree_type, raw, sizes, Some(rank))?
                else {
                    continue;
                };
                let offsets = scaled
                    .iter()
                    .zip(chunk_dims)
                    .map(|(&s, &c)| s.checked_mul(c))
                    .collect::<Option<Vec<_>>>()
                    .ok_or(FormatError::ArithmeticOverflow("chunk offset"))?;
                if inside(&offsets, dims) {
                    out.push(ChunkRecord {
                        offsets,
                        address: at,
                        size: size.unwrap_or(chunk_bytes),
                        filter_mask,
                    });
                }
            }
            out
        }
    };
    Ok(records)
}

/// Assembles chunks into an output buffer.
#[derive(Debug, Clone)]
pub struct ChunkReader<'a> {
    data: &'a [u8],
    dims: &'a [u64],
    chunk_dims: &'a [u64],
    element_size: usize,
    filters: &'a FilterRegistry,
    pipeline: Option<&'a FilterPipeline>,
    fill: Option<&'a FillValue>,
    unfiltered_partial_edges: bool,
    options: ReadOptions,
}

impl<'a> ChunkReader<'a> {
    pub fn new(data: &'a [u8], dims: &'a [u64], chunk_dims: &'a [u64], element_size: usize, filters: &'a FilterRegistry) -> Self {
        ChunkReader {
            data,
            dims,
            chunk_dims,
            element_size,
            filters,
            pipeline: None,
            fill: None,
            unfiltered_partial_edges: false,
            options: ReadOptions::default(),
        }
    }

    pub fn pipeline(mut self, pipeline: Option<&'a FilterPipeline>) -> Self {
        self.pipeline = pipeline;
        self
    }

    pub fn fill_value(mut self, fill: Option<&'a FillValue>) -> Self {
        self.fill = fill;
        self
    }

    /// Edge chunks extending past the dataset were stored without filters.
    pub fn unfiltered_partial_edges(mut self, yes: bool) -> Self {
        self.unfiltered_partial_edges = yes;
        self
    }

    pub fn options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    fn chunk_bytes(&self) -> Result<usize> {
        let n = chunk_byte_size(self.chunk_dims, self.element_size as u64)?;
        usize::try_from(n).map_err(|_| FormatError::ArithmeticOverflow("chunk byte size"))
    }

    fn is_partial_edge(&self, chunk: &ChunkRecord) -> bool {
        chunk
            .offsets
            .iter()
            .zip(self.chunk_dims)
            .zip(self.dims)
            .any(|((&o, &c), &d)| o.saturating_add(c) > d)
    }

    /// Read, unfilter and size-check one chunk.
    fn decode(&self, chunk: &ChunkRecord, expected: usize) -> Result<Vec<u8>> {
        let eof = || FormatError::UnexpectedEof {
            offset: chunk.address,
            needed: chunk.size as usize,
            available: self.data.len().saturating_sub(chunk.address as usize),
        };
        let start = usize::try_from(chunk.address).map_err(|_| eof())?;
        let len = usize::try_from(chunk.size).map_err(|_| eof())?;
        let raw = start
            .checked_add(len)
            .and_then(|end| self.data.get(start..end))
            .ok_or_else(eof)?;

        let decoded = match self.pipeline {
            Some(p) if !p.is_empty() && !(self.unfiltered_partial_edges && self.is_partial_edge(chunk)) => {
                apply_filters(raw.to_vec(), p, self.filters, chunk.filter_mask)?
            }
            _ => raw.to_vec(),
        };
        if decoded.len() != expected {
            return Err(FormatError::malformed(
                "chunk",
                chunk.address,
                format!("decoded to {} bytes, expected {expected}", decoded.len()),
            ));
        }
        Ok(decoded)
    }

    /// The whole dataset.
    pub fn read(&self, chunks: &[ChunkRecord]) -> Result<Vec<u8>> {
        self.read_window(chunks, &Selection::all(self.dims))
    }

    /// The window `selection`; only chunks overlapping it are decoded.
    pub fn read_selection(&self, chunks: &[ChunkRecord], selection: &Selection) -> Result<Vec<u8>> {
        selection.validate(self.dims)?;
        self.read_window(chunks, selection)
    }

    fn read_window(&self, chunks: &[ChunkRecord], window: &Selection) -> Result<Vec<u8>> {
        let count = usize::try_from(window.num_elements()?)
            .map_err(|_| FormatError::ArithmeticOverflow("selection element count"))?;
        let total = count
            .checked_mul(self.element_size)
            .ok_or(FormatError::ArithmeticOverflow("output size"))?;
        let mut out = match self.fill {
            Some(f) => f.pattern(self.element_size, count),
            None => vec![0u8; total],
        };

        let wanted: Vec<&ChunkRecord> = chunks
            .iter()
            .filter(|c| window.intersects_chunk(&c.offsets, self.chunk_dims))
            .collect();
        let expected = self.chunk_bytes()?;

        if self.use_parallel(wanted.len()) {
            self.read_parallel(&wanted, expected, window, &mut out)?;
        } else {
            for chunk in wanted {
                let decoded = self.decode(chunk, expected)?;
                self.place(&decoded, chunk, window, &mut out);
            }
        }
        Ok(out)
    }

    fn use_parallel(&self, chunks: usize) -> bool {
        cfg!(feature = "parallel") && self.options.parallel && chunks >= self.options.parallel_threshold.max(2)
    }

    fn place(&self, decoded: &[u8], chunk: &ChunkRecord, window: &Selection, out: &mut [u8]) {
        let from = Region {
            origin: &chunk.offsets,
            extent: self.chunk_dims,
        };
        copy_intersection(decoded, from, out, window.region(), self.dims, self.element_size);
    }

    #[cfg(feature = "parallel")]
    fn read_parallel(&self, chunks: &[&ChunkRecord], expected: usize, window: &Selection, out: &mut [u8]) -> Result<()> {
        use rayon::prelude::*;

        let abort = AtomicBool::new(false);
        for batch in chunks.chunks(self.options.batch_size.max(1)) {
            let decoded = batch
                .par_iter()
                .map(|chunk| {
                    if abort.load(Ordering::Relaxed) {
                        return Ok(None);
                    }
                    self.decode(chunk, expected).map(Some).map_err(|e| {
                        abort.store(true, Ordering::Relaxed);
                        e
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            for (chunk, bytes) in batch.iter().zip(decoded) {
                if let Some(bytes) = bytes {
                    self.place(&bytes, chunk, window, out);
                }
            }
        }
        Ok(())
    }

    #[cfg(not(feature = "parallel"))]
    fn read_parallel(&self, chunks: &[&ChunkRecord], expected: usize, window: &Selection, out: &mut [u8]) -> Result<()> {
        for chunk in chunks {
            let decoded = self.decode(chunk, expected)?;
            self.place(&decoded, chunk, window, out);
        }
        Ok(())
    }
}
