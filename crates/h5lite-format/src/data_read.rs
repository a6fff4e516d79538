//! Raw dataset reads for every layout, and typed conversion of raw bytes.

use std::collections::HashMap;

use byteorder::{BigEndian, ByteOrder as _, LittleEndian};

use crate::chunked_read::{collect_chunks, ChunkReader, ReadOptions};
use crate::cursor::Sizes;
use crate::data_layout::DataLayout;
use crate::dataspace::{Dataspace, DataspaceKind};
use crate::datatype::{ByteOrder, Datatype, StringPadding, VlenKind};
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::filters::FilterRegistry;
use crate::global_heap::{GlobalHeapCollection, GlobalHeapId};
use crate::selection::{copy_intersection, Region, Selection};

/// Reads the raw element bytes of one dataset.
#[derive(Debug, Clone)]
pub struct RawReader<'a> {
    data: &'a [u8],
    sizes: Sizes,
    layout: &'a DataLayout,
    space: &'a Dataspace,
    datatype: &'a Datatype,
    filters: &'a FilterRegistry,
    pipeline: Option<&'a FilterPipeline>,
    fill: Option<&'a FillValue>,
    options: ReadOptions,
}

impl<'a> RawReader<'a> {
    pub fn new(
        data: &'a [u8],
        sizes: Sizes,
        layout: &'a DataLayout,
        space: &'a Dataspace,
        datatype: &'a Datatype,
        filters: &'a FilterRegistry,
    ) -> Self {
        RawReader {
            data,
            sizes,
            layout,
            space,
            datatype,
            filters,
            pipeline: None,
            fill: None,
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

    pub fn options(mut self, options: ReadOptions) -> Self {
        self.options = options;
        self
    }

    fn element_size(&self) -> usize {
        self.datatype.size() as usize
    }

    fn expected_bytes(&self) -> Result<usize> {
        let n = usize::try_from(self.space.num_elements()?)
            .map_err(|_| FormatError::ArithmeticOverflow("dataset byte size"))?;
        n.checked_mul(self.element_size())
            .ok_or(FormatError::ArithmeticOverflow("dataset byte size"))
    }

    fn fill(&self, count: usize) -> Vec<u8> {
        match self.fill {
            Some(f) => f.pattern(self.element_size(), count),
            None => vec![0u8; count * self.element_size()],
        }
    }

    /// Every element of the dataset, in row-major order.
    pub fn read(&self) -> Result<Vec<u8>> {
        if self.space.kind == DataspaceKind::Null {
            return Ok(Vec::new());
        }
        let expected = self.expected_bytes()?;
        match self.layout {
            DataLayout::Compact { data } => {
                if data.len() != expected {
                    return Err(FormatError::DataSizeMismatch {
                        expected,
                        actual: data.len(),
                    });
                }
                Ok(data.clone())
            }
            DataLayout::Contiguous { .. } => match self.contiguous_bytes(expected)? {
                Some(bytes) => Ok(bytes.to_vec()),
                None => Ok(self.fill(expected / self.element_size().max(1))),
            },
            DataLayout::Chunked { .. } => {
                let chunks = collect_chunks(self.data, self.layout, self.space, self.sizes)?;
                self.chunk_reader()?.read(&chunks)
            }
            DataLayout::Virtual { .. } => Err(FormatError::Unsupported("virtual dataset layout".into())),
        }
    }

    /// The elements inside `selection`, in row-major order of the window.
    pub fn read_selection(&self, selection: &Selection) -> Result<Vec<u8>> {
        if self.space.kind == DataspaceKind::Null {
            return Err(FormatError::InvalidSelection("selection on a null dataspace".into()));
        }
        let dims = &self.space.dims;
        selection.validate(dims)?;
        let expected = self.expected_bytes()?;
        let count = usize::try_from(selection.num_elements()?)
            .map_err(|_| FormatError::ArithmeticOverflow("selection element count"))?;

        let whole: &[u8] = match self.layout {
            DataLayout::Compact { data } => {
                if data.len() != expected {
                    return Err(FormatError::DataSizeMismatch {
                        expected,
                        actual: data.len(),
                    });
                }
                data
            }
            DataLayout::Contiguous { .. } => match self.contiguous_bytes(expected)? {
                Some(bytes) => bytes,
                None => return Ok(self.fill(count)),
            },
            DataLayout::Chunked { .. } => {
                let chunks = collect_chunks(self.data, self.layout, self.space, self.sizes)?;
                return self.chunk_reader()?.read_selection(&chunks, selection);
            }
            DataLayout::Virtual { .. } => {
                return Err(FormatError::Unsupported("virtual dataset layout".into()))
            }
        };

        let mut out = vec![0u8; count * self.element_size()];
        let origin = vec![0u64; dims.len()];
        let from = Region {
            origin: &origin,
            extent: dims,
        };
        copy_intersection(whole, from, &mut out, selection.region(), dims, self.element_size());
        Ok(out)
    }

    /// The stored bytes of a contiguous layout, or `None` when no storage
    /// was ever allocated.
    fn contiguous_bytes(&self, expected: usize) -> Result<Option<&'a [u8]>> {
        let DataLayout::Contiguous { address, size } = self.layout else {
            return Ok(None);
        };
        let Some(address) = address else {
            return Ok(None);
        };
        if let Some(size) = size {
            if *size != expected as u64 {
                return Err(FormatError::DataSizeMismatch {
                    expected,
                    actual: *size as usize,
                });
            }
        }
        let eof = FormatError::UnexpectedEof {
            offset: *address,
            needed: expected,
            available: self.data.len().saturating_sub(*address as usize),
        };
        let start = usize::try_from(*address).map_err(|_| eof.clone())?;
        start
            .checked_add(expected)
            .and_then(|end| self.data.get(start..end))
            .map(Some)
            .ok_or(eof)
    }

    fn chunk_reader(&self) -> Result<ChunkReader<'a>> {
        let DataLayout::Chunked {
            chunk_dims,
            element_size,
            unfiltered_partial_edges,
            ..
        } = self.layout
        else {
            return Err(FormatError::Unsupported(format!("{} layout", self.layout.class_name())));
        };
        if *element_size as usize != self.element_size() {
            return Err(FormatError::malformed(
                "chunked layout",
                0,
                format!(
                    "chunk element size {element_size} for a {}-byte datatype",
                    self.element_size()
                ),
            ));
        }
        Ok(ChunkReader::new(self.data, &self.space.dims, chunk_dims, self.element_size(), self.filters)
            .pipeline(self.pipeline)
            .fill_value(self.fill)
            .unfiltered_partial_edges(*unfiltered_partial_edges)
            .options(self.options))
    }
}

#[derive(Debug, Clone, Copy)]
enum Numeric {
    Int { size: usize, signed: bool, big: bool },
    Float { size: usize, big: bool },
}

fn big_endian(order: ByteOrder, dt: &Datatype) -> Result<bool> {
    match order {
        ByteOrder::LittleEndian => Ok(false),
        ByteOrder::BigEndian => Ok(true),
        ByteOrder::Vax => Err(FormatError::Unsupported(format!("VAX byte order for {}", dt.class_name()))),
    }
}

fn numeric(dt: &Datatype, expected: &'static str) -> Result<Numeric> {
    match dt {
        Datatype::FixedPoint {
            size,
            byte_order,
            signed,
            ..
        } if (1..=8).contains(size) => Ok(Numeric::Int {
            size: *size as usize,
            signed: *signed,
            big: big_endian(*byte_order, dt)?,
        }),
        Datatype::FloatingPoint { size: size @ (4 | 8), byte_order, .. } => Ok(Numeric::Float {
            size: *size as usize,
            big: big_endian(*byte_order, dt)?,
        }),
        Datatype::Enumeration { base, .. } => numeric(base, expected),
        other => Err(FormatError::TypeMismatch {
            expected,
            actual: other.class_name(),
        }),
    }
}

fn elements<'r>(raw: &'r [u8], size: usize) -> Result<std::slice::ChunksExact<'r, u8>> {
    if size == 0 || raw.len() % size != 0 {
        return Err(FormatError::DataSizeMismatch {
            expected: raw.len().next_multiple_of(size.max(1)),
            actual: raw.len(),
        });
    }
    Ok(raw.chunks_exact(size))
}

impl Numeric {
    fn size(self) -> usize {
        match self {
            Numeric::Int { size, .. } | Numeric::Float { size, .. } => size,
        }
    }

    fn signed(b: &[u8], big: bool) -> i64 {
        if big {
            BigEndian::read_int(b, b.len())
        } else {
            LittleEndian::read_int(b, b.len())
        }
    }

    fn unsigned(b: &[u8], big: bool) -> u64 {
        if big {
            BigEndian::read_uint(b, b.len())
        } else {
            LittleEndian::read_uint(b, b.len())
        }
    }

    fn float(b: &[u8], big: bool) -> f64 {
        match (b.len(), big) {
            (4, false) => f64::from(LittleEndian::read_f32(b)),
            (4, true) => f64::from(BigEndian::read_f32(b)),
            (_, false) => LittleEndian::read_f64(b),
            (_, true) => BigEndian::read_f64(b),
        }
    }

    fn to_f64(self, b: &[u8]) -> f64 {
        match self {
            Numeric::Int { signed: true, big, .. } => Numeric::signed(b, big) as f64,
            Numeric::Int { signed: false, big, .. } => Numeric::unsigned(b, big) as f64,
            Numeric::Float { big, .. } => Numeric::float(b, big),
        }
    }
}

/// Decode numeric elements as `f64`; integers convert by value.
pub fn read_as_f64(raw: &[u8], datatype: &Datatype) -> Result<Vec<f64>> {
    let n = numeric(datatype, "numeric")?;
    Ok(elements(raw, n.size())?.map(|b| n.to_f64(b)).collect())
}

/// Decode numeric elements as `f32`. Doubles are narrowed.
pub fn read_as_f32(raw: &[u8], datatype: &Datatype) -> Result<Vec<f32>> {
    let n = numeric(datatype, "numeric")?;
    Ok(elements(raw, n.size())?
        .map(|b| match n {
            Numeric::Float { size: 4, big } if big => BigEndian::read_f32(b),
            Numeric::Float { size: 4, .. } => LittleEndian::read_f32(b),
            other => other.to_f64(b) as f32,
        })
        .collect())
}

fn integer(datatype: &Datatype, expected: &'static str) -> Result<(usize, bool, bool)> {
    match numeric(datatype, expected)? {
        Numeric::Int { size, signed, big } => Ok((size, signed, big)),
        Numeric::Float { .. } => Err(FormatError::TypeMismatch {
            expected,
            actual: datatype.class_name(),
        }),
    }
}

/// Decode integer elements as `i64`. Unsigned values above `i64::MAX` fail.
pub fn read_as_i64(raw: &[u8], datatype: &Datatype) -> Result<Vec<i64>> {
    let (size, signed, big) = integer(datatype, "integer")?;
    elements(raw, size)?
        .map(|b| {
            if signed {
                Ok(Numeric::signed(b, big))
            } else {
                i64::try_from(Numeric::unsigned(b, big)).map_err(|_| FormatError::ArithmeticOverflow("i64 element"))
            }
        })
        .collect()
}

/// Decode integer elements as `i32`; values outside its range fail.
pub fn read_as_i32(raw: &[u8], datatype: &Datatype) -> Result<Vec<i32>> {
    read_as_i64(raw, datatype)?
        .into_iter()
        .map(|v| i32::try_from(v).map_err(|_| FormatError::ArithmeticOverflow("i32 element")))
        .collect()
}

/// Decode integer elements as `u64`. Negative values fail.
pub fn read_as_u64(raw: &[u8], datatype: &Datatype) -> Result<Vec<u64>> {
    let (size, signed, big) = integer(datatype, "integer")?;
    elements(raw, size)?
        .map(|b| {
            if signed {
                u64::try_from(Numeric::signed(b, big)).map_err(|_| FormatError::ArithmeticOverflow("u64 element"))
            } else {
                Ok(Numeric::unsigned(b, big))
            }
        })
        .collect()
}

fn trim(bytes: &[u8], padding: StringPadding) -> &[u8] {
    match padding {
        StringPadding::NullTerminate => {
            let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
            &bytes[..end]
        }
        StringPadding::NullPad => {
            let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
            &bytes[..end]
        }
        StringPadding::SpacePad => {
            let end = bytes.iter().rposition(|&b| b != b' ' && b != 0).map_or(0, |p| p + 1);
            &bytes[..end]
        }
    }
}

/// Decode fixed-length string elements, removing their padding.
pub fn read_as_strings(raw: &[u8], datatype: &Datatype) -> Result<Vec<String>> {
    let Datatype::String { size, padding, .. } = datatype else {
        return Err(FormatError::TypeMismatch {
            expected: "string",
            actual: datatype.class_name(),
        });
    };
    if *size == 0 {
        return Ok(Vec::new());
    }
    Ok(elements(raw, *size as usize)?
        .map(|b| String::from_utf8_lossy(trim(b, *padding)).into_owned())
        .collect())
}

/// Decode variable-length string elements by following each one into its
/// global heap collection. Collections are read once per call.
pub fn read_vlen_strings(data: &[u8], raw: &[u8], datatype: &Datatype, sizes: Sizes) -> Result<Vec<String>> {
    let Datatype::VariableLength {
        kind: VlenKind::String { padding, .. },
        ..
    } = datatype
    else {
        return Err(FormatError::TypeMismatch {
            expected: "variable-length string",
            actual: datatype.class_name(),
        });
    };
    let mut collections: HashMap<u64, GlobalHeapCollection> = HashMap::new();
    let mut out = Vec::new();
    for element in elements(raw, GlobalHeapId::encoded_size(sizes))? {
        let id = GlobalHeapId::parse(element, sizes)?;
        let Some(address) = id.collection_address else {
            out.push(String::new());
            continue;
        };
        if id.length == 0 {
            out.push(String::new());
            continue;
        }
        if !collections.contains_key(&address) {
            collections.insert(address, GlobalHeapCollection::read(data, address, sizes)?);
        }
        let collection = &collections[&address];
        let object = u16::try_from(id.index)
            .ok()
            .and_then(|i| collection.object(i))
            .ok_or_else(|| {
                FormatError::malformed(
                    "global heap collection",
                    address,
                    format!("no object {}", id.index),
                )
            })?;
        let len = id.length as usize;
        let bytes = object.data.get(..len).ok_or_else(|| {
            FormatError::malformed(
                "global heap collection",
                address,
                format!("object {} holds {} bytes, string needs {len}", id.index, object.data.len()),
            )
        })?;
        out.push(String::from_utf8_lossy(trim(bytes, *padding)).into_owned());
    }
    Ok(out)
}
