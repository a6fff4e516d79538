//! Datatype message (type 0x0003).
//!
//! All eleven classes are decoded, recursively for compound, enumeration,
//! variable-length and array types.

use crate::cursor::Cursor;
use crate::error::{FormatError, Result};

/// Nested types deeper than this are treated as malformed.
const MAX_NESTING: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
    Vax,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringPadding {
    NullTerminate,
    NullPad,
    SpacePad,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacterSet {
    Ascii,
    Utf8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Object,
    Region,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VlenKind {
    Sequence,
    String {
        padding: StringPadding,
        charset: CharacterSet,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundMember {
    pub name: String,
    pub offset: u64,
    pub datatype: Datatype,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumMember {
    pub name: String,
    /// Raw value in the base type's representation.
    pub value: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    FixedPoint {
        size: u32,
        byte_order: ByteOrder,
        signed: bool,
        bit_offset: u16,
        bit_precision: u16,
    },
    FloatingPoint {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
        exponent_location: u8,
        exponent_size: u8,
        mantissa_location: u8,
        mantissa_size: u8,
        exponent_bias: u32,
    },
    Time {
        size: u32,
        byte_order: ByteOrder,
        bit_precision: u16,
    },
    String {
        size: u32,
        padding: StringPadding,
        charset: CharacterSet,
    },
    BitField {
        size: u32,
        byte_order: ByteOrder,
        bit_offset: u16,
        bit_precision: u16,
    },
    Opaque {
        size: u32,
        tag: String,
    },
    Compound {
        size: u32,
        members: Vec<CompoundMember>,
    },
    Reference {
        size: u32,
        kind: ReferenceKind,
    },
    Enumeration {
        size: u32,
        base: Box<Datatype>,
        members: Vec<EnumMember>,
    },
    VariableLength {
        size: u32,
        kind: VlenKind,
        base: Box<Datatype>,
    },
    Array {
        size: u32,
        dims: Vec<u32>,
        base: Box<Datatype>,
    },
}

fn padding(v: u8) -> Result<StringPadding> {
    match v {
        0 => Ok(StringPadding::NullTerminate),
        1 => Ok(StringPadding::NullPad),
        2 => Ok(StringPadding::SpacePad),
        other => Err(FormatError::malformed(
            "datatype message",
            0,
            format!("unknown string padding {other}"),
        )),
    }
}

fn charset(v: u8) -> Result<CharacterSet> {
    match v {
        0 => Ok(CharacterSet::Ascii),
        1 => Ok(CharacterSet::Utf8),
        other => Err(FormatError::malformed(
            "datatype message",
            0,
            format!("unknown character set {other}"),
        )),
    }
}

fn integer_order(bits: u8) -> ByteOrder {
    if bits & 0x01 == 0 {
        ByteOrder::LittleEndian
    } else {
        ByteOrder::BigEndian
    }
}

/// A null-terminated name, optionally padded to a multiple of eight bytes
/// (terminator included).
fn read_name(c: &mut Cursor<'_>, pad_to_eight: bool) -> Result<String> {
    let start = c.position();
    let name = c.read_cstring()?;
    if pad_to_eight {
        c.align_from(start, 8)?;
    }
    Ok(name)
}

impl Datatype {
    /// Decode a datatype message.
    pub fn parse(data: &[u8]) -> Result<Datatype> {
        let mut c = Cursor::new(data);
        Datatype::decode(&mut c, 0)
    }

    /// Decode one datatype at the cursor, leaving it just past the encoding.
    pub fn decode(c: &mut Cursor<'_>, depth: usize) -> Result<Datatype> {
        if depth > MAX_NESTING {
            return Err(FormatError::malformed(
                "datatype message",
                c.position() as u64,
                "datatype nesting too deep",
            ));
        }
        let class_version = c.read_u8()?;
        let class = class_version & 0x0f;
        let version = class_version >> 4;
        let [b0, b1, _b2] = c.read_array::<3>()?;
        let size = c.read_u32()?;

        let dt = match class {
            0 => {
                let bit_offset = c.read_u16()?;
                let bit_precision = c.read_u16()?;
                Datatype::FixedPoint {
                    size,
                    byte_order: integer_order(b0),
                    signed: b0 & 0x08 != 0,
                    bit_offset,
                    bit_precision,
                }
            }
            1 => {
                let byte_order = match (b0 & 0x40 != 0, b0 & 0x01 != 0) {
                    (false, false) => ByteOrder::LittleEndian,
                    (false, true) => ByteOrder::BigEndian,
                    (true, _) => ByteOrder::Vax,
                };
                Datatype::FloatingPoint {
                    size,
                    byte_order,
                    bit_offset: c.read_u16()?,
                    bit_precision: c.read_u16()?,
                    exponent_location: c.read_u8()?,
                    exponent_size: c.read_u8()?,
                    mantissa_location: c.read_u8()?,
                    mantissa_size: c.read_u8()?,
                    exponent_bias: c.read_u32()?,
                }
            }
            2 => Datatype::Time {
                size,
                byte_order: integer_order(b0),
                bit_precision: c.read_u16()?,
            },
            3 => Datatype::String {
                size,
                padding: padding(b0 & 0x0f)?,
                charset: charset(b0 >> 4)?,
            },
            4 => {
                let bit_offset = c.read_u16()?;
                let bit_precision = c.read_u16()?;
                Datatype::BitField {
                    size,
                    byte_order: integer_order(b0),
                    bit_offset,
                    bit_precision,
                }
            }
            5 => {
                let tag_len = b0 as usize;
                let start = c.position();
                let raw = c.read_bytes(tag_len)?;
                c.align_from(start, 8)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                Datatype::Opaque {
                    size,
                    tag: String::from_utf8_lossy(&raw[..end]).into_owned(),
                }
            }
            6 => Datatype::Compound {
                size,
                members: decode_compound_members(c, version, size, u16::from_le_bytes([b0, b1]), depth)?,
            },
            7 => Datatype::Reference {
                size,
                kind: match b0 & 0x0f {
                    0 => ReferenceKind::Object,
                    1 => ReferenceKind::Region,
                    other => {
                        return Err(FormatError::Unsupported(format!("reference type {other}")))
                    }
                },
            },
            8 => {
                let base = Datatype::decode(c, depth + 1)?;
                let count = u16::from_le_bytes([b0, b1]) as usize;
                let names = (0..count)
                    .map(|_| read_name(c, version < 3))
                    .collect::<Result<Vec<_>>>()?;
                let width = base.size() as usize;
                let mut members = Vec::with_capacity(count);
                for name in names {
                    members.push(EnumMember {
                        name,
                        value: c.read_bytes(width)?.to_vec(),
                    });
                }
                Datatype::Enumeration {
                    size,
                    base: Box::new(base),
                    members,
                }
            }
            9 => {
                let kind = match b0 & 0x0f {
                    0 => VlenKind::Sequence,
                    1 => VlenKind::String {
                        padding: padding(b0 >> 4)?,
                        charset: charset(b1 & 0x0f)?,
                    },
                    other => {
                        return Err(FormatError::malformed(
                            "datatype message",
                            c.position() as u64,
                            format!("unknown variable-length type {other}"),
                        ))
                    }
                };
                Datatype::VariableLength {
                    size,
                    kind,
                    base: Box::new(Datatype::decode(c, depth + 1)?),
                }
            }
            10 => {
                let rank = c.read_u8()? as usize;
                if version < 3 {
                    c.skip(3)?;
                }
                let dims = (0..rank).map(|_| c.read_u32()).collect::<Result<Vec<_>>>()?;
                if version < 3 {
                    c.skip(4 * rank)?; // permutation indices
                }
                Datatype::Array {
                    size,
                    dims,
                    base: Box::new(Datatype::decode(c, depth + 1)?),
                }
            }
            other => {
                return Err(FormatError::Unsupported(format!("datatype class {other}")));
            }
        };
        Ok(dt)
    }

    /// Element size in bytes.
    pub fn size(&self) -> u32 {
        match self {
            Datatype::FixedPoint { size, .. }
            | Datatype::FloatingPoint { size, .. }
            | Datatype::Time { size, .. }
            | Datatype::String { size, .. }
            | Datatype::BitField { size, .. }
            | Datatype::Opaque { size, .. }
            | Datatype::Compound { size, .. }
            | Datatype::Reference { size, .. }
            | Datatype::Enumeration { size, .. }
            | Datatype::VariableLength { size, .. }
            | Datatype::Array { size, .. } => *size,
        }
    }

    /// Byte order of numeric classes; enumerations report their base type's.
    pub fn byte_order(&self) -> Option<ByteOrder> {
        match self {
            Datatype::FixedPoint { byte_order, .. }
            | Datatype::FloatingPoint { byte_order, .. }
            | Datatype::Time { byte_order, .. }
            | Datatype::BitField { byte_order, .. } => Some(*byte_order),
            Datatype::Enumeration { base, .. } => base.byte_order(),
            _ => None,
        }
    }

    pub fn class_name(&self) -> &'static str {
        match self {
            Datatype::FixedPoint { .. } => "integer",
            Datatype::FloatingPoint { .. } => "float",
            Datatype::Time { .. } => "time",
            Datatype::String { .. } => "string",
            Datatype::BitField { .. } => "bitfield",
            Datatype::Opaque { .. } => "opaque",
            Datatype::Compound { .. } => "compound",
            Datatype::Reference { .. } => "reference",
            Datatype::Enumeration { .. } => "enum",
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => "variable-length string",
            Datatype::VariableLength { .. } => "variable-length sequence",
            Datatype::Array { .. } => "array",
        }
    }

    pub fn is_vlen_string(&self) -> bool {
        matches!(
            self,
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            }
        )
    }
}

fn decode_compound_members(
    c: &mut Cursor<'_>,
    version: u8,
    size: u32,
    count: u16,
    depth: usize,
) -> Result<Vec<CompoundMember>> {
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (name, offset) = match version {
            1 => {
                let name = read_name(c, true)?;
                let offset = c.read_u32()? as u64;
                // dimensionality, reserved, permutation, reserved, four dimension sizes
                c.skip(1 + 3 + 4 + 4 + 16)?;
                (name, offset)
            }
            2 => {
                let name = read_name(c, true)?;
                (name, c.read_u32()? as u64)
            }
            3 => {
                let name = read_name(c, false)?;
                let width = match size {
                    0..=0xff => 1,
                    0x100..=0xffff => 2,
                    0x1_0000..=0xff_ffff => 3,
                    _ => 4,
                };
                (name, c.read_uint(width)?)
            }
            other => {
                return Err(FormatError::UnsupportedVersion {
                    structure: "compound datatype",
                    version: other,
                })
            }
        };
        let datatype = Datatype::decode(c, depth + 1)?;
        members.push(CompoundMember {
            name,
            offset,
            datatype,
        });
    }
    Ok(members)
}
