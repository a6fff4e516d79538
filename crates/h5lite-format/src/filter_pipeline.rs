//! Filter pipeline message (type 0x000B), versions 1 and 2.

use crate::cursor::{bit, Cursor};
use crate::error::{FormatError, Result};

pub const FILTER_DEFLATE: u16 = 1;
pub const FILTER_SHUFFLE: u16 = 2;
pub const FILTER_FLETCHER32: u16 = 3;
pub const FILTER_SZIP: u16 = 4;
pub const FILTER_NBIT: u16 = 5;
pub const FILTER_SCALEOFFSET: u16 = 6;
pub const FILTER_BZIP2: u16 = 307;
pub const FILTER_LZF: u16 = 32000;
pub const FILTER_BLOSC: u16 = 32001;
pub const FILTER_LZ4: u16 = 32004;
pub const FILTER_ZSTD: u16 = 32015;

/// Conventional name of a registered filter id, if it has one.
pub fn well_known_name(id: u16) -> Option<&'static str> {
    Some(match id {
        FILTER_DEFLATE => "deflate",
        FILTER_SHUFFLE => "shuffle",
        FILTER_FLETCHER32 => "fletcher32",
        FILTER_SZIP => "szip",
        FILTER_NBIT => "nbit",
        FILTER_SCALEOFFSET => "scaleoffset",
        FILTER_BZIP2 => "bzip2",
        FILTER_LZF => "lzf",
        FILTER_BLOSC => "blosc",
        FILTER_LZ4 => "lz4",
        FILTER_ZSTD => "zstd",
        _ => return None,
    })
}

/// One stage of a pipeline, as stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterDescription {
    pub id: u16,
    pub name: Option<String>,
    /// The filter may be skipped when it is not available.
    pub optional: bool,
    pub client_data: Vec<u32>,
}

impl FilterDescription {
    /// Stored name, falling back to the conventional one.
    pub fn display_name(&self) -> Option<String> {
        self.name
            .clone()
            .or_else(|| well_known_name(self.id).map(str::to_string))
    }
}

/// Filters in the order they were applied when writing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPipeline {
    pub version: u8,
    pub filters: Vec<FilterDescription>,
}

impl FilterPipeline {
    pub fn parse(data: &[u8]) -> Result<FilterPipeline> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        let count = c.read_u8()? as usize;
        if !matches!(version, 1 | 2) {
            return Err(FormatError::UnsupportedVersion {
                structure: "filter pipeline message",
                version,
            });
        }
        if version == 1 {
            c.skip(6)?;
        }

        let mut filters = Vec::with_capacity(count.min(32));
        for _ in 0..count {
            let id = c.read_u16()?;
            let name_len = if version == 1 || id >= 256 {
                c.read_u16()? as usize
            } else {
                0
            };
            let flags = c.read_u16()? as u64;
            let n_values = c.read_u16()? as usize;

            let name = if name_len > 0 {
                let raw = c.read_bytes(name_len)?;
                if version == 1 {
                    c.skip((8 - name_len % 8) % 8)?;
                }
                let text = raw.split(|&b| b == 0).next().unwrap_or(raw);
                Some(String::from_utf8_lossy(text).into_owned())
            } else {
                None
            };

            let client_data = (0..n_values).map(|_| c.read_u32()).collect::<Result<Vec<_>>>()?;
            if version == 1 && n_values % 2 == 1 {
                c.skip(4)?;
            }

            filters.push(FilterDescription {
                id,
                name,
                optional: bit(flags, 0),
                client_data,
            });
        }

        Ok(FilterPipeline { version, filters })
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn ids(&self) -> Vec<u16> {
        self.filters.iter().map(|f| f.id).collect()
    }
}
