//! Fill value messages: the old form (type 0x0004) and versions 1 to 3 of
//! the current one (type 0x0005).

use crate::cursor::{bit, Cursor};
use crate::error::{FormatError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocTime {
    Early,
    Late,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillTime {
    OnAlloc,
    Never,
    IfSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillValue {
    pub alloc_time: AllocTime,
    pub fill_time: FillTime,
    /// `None` when no value is defined; readers then fill with zeros.
    pub value: Option<Vec<u8>>,
}

impl FillValue {
    /// The old message: a size and the raw value.
    pub fn parse_old(data: &[u8]) -> Result<FillValue> {
        let mut c = Cursor::new(data);
        let size = c.read_u32()? as usize;
        let value = (size > 0).then(|| c.read_bytes(size).map(<[u8]>::to_vec)).transpose()?;
        Ok(FillValue {
            alloc_time: AllocTime::Late,
            fill_time: FillTime::IfSet,
            value,
        })
    }

    pub fn parse(data: &[u8]) -> Result<FillValue> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        match version {
            1 | 2 => {
                let alloc_time = alloc_time(c.read_u8()?)?;
                let fill_time = fill_time(c.read_u8()?)?;
                let defined = c.read_u8()? != 0;
                let value = if version == 1 || defined {
                    read_sized_value(&mut c)?
                } else {
                    None
                };
                Ok(FillValue {
                    alloc_time,
                    fill_time,
                    value: value.filter(|_| defined),
                })
            }
            3 => {
                let flags = c.read_u8()?;
                let alloc_time = alloc_time(flags & 0x03)?;
                let fill_time = fill_time((flags >> 2) & 0x03)?;
                let value = if bit(u64::from(flags), 5) {
                    read_sized_value(&mut c)?
                } else {
                    None
                };
                Ok(FillValue {
                    alloc_time,
                    fill_time,
                    value,
                })
            }
            _ => Err(FormatError::UnsupportedVersion {
                structure: "fill value message",
                version,
            }),
        }
    }

    /// `count` copies of the fill pattern, or zeros when there is none or it
    /// does not match `element_size`.
    pub fn pattern(&self, element_size: usize, count: usize) -> Vec<u8> {
        match &self.value {
            Some(v) if v.len() == element_size && v.iter().any(|&b| b != 0) => v.repeat(count),
            _ => vec![0u8; element_size * count],
        }
    }
}

fn read_sized_value(c: &mut Cursor<'_>) -> Result<Option<Vec<u8>>> {
    let size = c.read_u32()? as usize;
    if size == 0 {
        return Ok(None);
    }
    Ok(Some(c.read_bytes(size)?.to_vec()))
}

fn alloc_time(v: u8) -> Result<AllocTime> {
    match v {
        0 | 2 => Ok(AllocTime::Late),
        1 => Ok(AllocTime::Early),
        3 => Ok(AllocTime::Incremental),
        other => Err(FormatError::malformed(
            "fill value message",
            1,
            format!("space allocation time {other}"),
        )),
    }
}

fn fill_time(v: u8) -> Result<FillTime> {
    match v {
        0 => Ok(FillTime::OnAlloc),
        1 => Ok(FillTime::Never),
        2 => Ok(FillTime::IfSet),
        other => Err(FormatError::malformed(
            "fill value message",
            2,
            format!("fill value write time {other}"),
        )),
    }
}
