//! Simplified type and value representations for the session API.

use std::fmt;

use h5lite_format::attribute::AttributeMessage;
use h5lite_format::cursor::Sizes;
use h5lite_format::data_read;
use h5lite_format::dataspace::DataspaceKind;
use h5lite_format::datatype::{Datatype, VlenKind};

use crate::error::Result;

/// A user-facing summary of a [`Datatype`].
#[derive(Debug, Clone, PartialEq)]
pub enum DType {
    F32,
    F64,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    /// Fixed-length string of the given byte size.
    String(u32),
    VariableLengthString,
    Compound(Vec<(String, DType)>),
    Enum(Vec<String>),
    Array(Box<DType>, Vec<u32>),
    Other(String),
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DType::F32 => write!(f, "f32"),
            DType::F64 => write!(f, "f64"),
            DType::I8 => write!(f, "i8"),
            DType::I16 => write!(f, "i16"),
            DType::I32 => write!(f, "i32"),
            DType::I64 => write!(f, "i64"),
            DType::U8 => write!(f, "u8"),
            DType::U16 => write!(f, "u16"),
            DType::U32 => write!(f, "u32"),
            DType::U64 => write!(f, "u64"),
            DType::String(n) => write!(f, "string[{n}]"),
            DType::VariableLengthString => write!(f, "vlen_string"),
            DType::Compound(fields) => {
                write!(f, "compound{{")?;
                for (i, (name, dt)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {dt}")?;
                }
                write!(f, "}}")
            }
            DType::Enum(names) => write!(f, "enum[{}]", names.join(", ")),
            DType::Array(base, dims) => write!(f, "array<{base}, {dims:?}>"),
            DType::Other(desc) => write!(f, "other({desc})"),
        }
    }
}

impl From<&Datatype> for DType {
    fn from(dt: &Datatype) -> DType {
        match dt {
            Datatype::FloatingPoint { size: 4, .. } => DType::F32,
            Datatype::FloatingPoint { size: 8, .. } => DType::F64,
            Datatype::FloatingPoint { size, .. } => DType::Other(format!("float{}", size * 8)),
            Datatype::FixedPoint { size, signed, .. } => match (*size, *signed) {
                (1, true) => DType::I8,
                (2, true) => DType::I16,
                (4, true) => DType::I32,
                (8, true) => DType::I64,
                (1, false) => DType::U8,
                (2, false) => DType::U16,
                (4, false) => DType::U32,
                (8, false) => DType::U64,
                (size, signed) => {
                    let prefix = if signed { "i" } else { "u" };
                    DType::Other(format!("{prefix}{}", size * 8))
                }
            },
            Datatype::String { size, .. } => DType::String(*size),
            Datatype::VariableLength {
                kind: VlenKind::String { .. },
                ..
            } => DType::VariableLengthString,
            Datatype::Compound { members, .. } => DType::Compound(
                members
                    .iter()
                    .map(|m| (m.name.clone(), DType::from(&m.datatype)))
                    .collect(),
            ),
            Datatype::Enumeration { members, .. } => {
                DType::Enum(members.iter().map(|m| m.name.clone()).collect())
            }
            Datatype::Array { dims, base, .. } => DType::Array(Box::new(DType::from(base.as_ref())), dims.clone()),
            other => DType::Other(other.class_name().to_string()),
        }
    }
}

/// A decoded attribute value. Scalar dataspaces give the single-value
/// variants, simple ones the arrays.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    F64(f64),
    I64(i64),
    U64(u64),
    String(String),
    F64Array(Vec<f64>),
    I64Array(Vec<i64>),
    U64Array(Vec<u64>),
    StringArray(Vec<String>),
}

impl AttrValue {
    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            AttrValue::F64(v) => Some(v),
            AttrValue::I64(v) => Some(v as f64),
            AttrValue::U64(v) => Some(v as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            AttrValue::I64(v) => Some(v),
            AttrValue::U64(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

fn pick<T>(scalar: bool, mut values: Vec<T>, one: fn(T) -> AttrValue, many: fn(Vec<T>) -> AttrValue) -> Option<AttrValue> {
    if scalar && values.len() == 1 {
        values.pop().map(one)
    } else {
        Some(many(values))
    }
}

/// Decode one attribute. Classes without a value mapping (compound,
/// opaque, references and the like) give `None`.
pub(crate) fn attr_value(attr: &AttributeMessage, data: &[u8], sizes: Sizes) -> Result<Option<AttrValue>> {
    let scalar = attr.dataspace.kind == DataspaceKind::Scalar;
    let raw = &attr.raw_data;
    let integer = |dt: &Datatype, signed: bool| -> Result<Option<AttrValue>> {
        Ok(if signed {
            pick(scalar, data_read::read_as_i64(raw, dt)?, AttrValue::I64, AttrValue::I64Array)
        } else {
            pick(scalar, data_read::read_as_u64(raw, dt)?, AttrValue::U64, AttrValue::U64Array)
        })
    };
    match &attr.datatype {
        dt @ Datatype::FloatingPoint { .. } => Ok(pick(
            scalar,
            data_read::read_as_f64(raw, dt)?,
            AttrValue::F64,
            AttrValue::F64Array,
        )),
        dt @ Datatype::FixedPoint { signed, .. } => integer(dt, *signed),
        Datatype::Enumeration { base, .. } => match base.as_ref() {
            b @ Datatype::FixedPoint { signed, .. } => integer(b, *signed),
            _ => Ok(None),
        },
        dt @ Datatype::String { .. } => Ok(pick(
            scalar,
            data_read::read_as_strings(raw, dt)?,
            AttrValue::String,
            AttrValue::StringArray,
        )),
        dt if dt.is_vlen_string() => Ok(pick(
            scalar,
            data_read::read_vlen_strings(data, raw, dt, sizes)?,
            AttrValue::String,
            AttrValue::StringArray,
        )),
        _ => Ok(None),
    }
}
