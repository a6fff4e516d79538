//! Attribute message (type 0x000C) and attribute info message (type 0x0015).

use crate::cursor::{bit, Cursor, Sizes};
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{FormatError, Result};
use crate::message_type::MessageType;
use crate::messages::Message;
use crate::shared::SharedRef;

/// A small named value attached to an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMessage {
    pub version: u8,
    pub name: String,
    pub datatype: Datatype,
    pub dataspace: Dataspace,
    /// Element bytes, `num_elements × datatype.size()` long.
    pub raw_data: Vec<u8>,
}

/// A datatype or dataspace field that is stored inline or shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributePart<T> {
    Inline(T),
    Shared(SharedRef),
}

/// An attribute with a shared datatype or dataspace (flags bits 0 and 1
/// of versions 2 and 3). Its element bytes cannot be measured until the
/// shared parts are looked up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedAttribute {
    pub version: u8,
    pub name: String,
    pub datatype: AttributePart<Datatype>,
    pub dataspace: AttributePart<Dataspace>,
    /// Every byte after the dataspace field.
    pub tail: Vec<u8>,
}

fn read_elements(c: &mut Cursor<'_>, datatype: &Datatype, dataspace: &Dataspace) -> Result<Vec<u8>> {
    let len = dataspace
        .num_elements()?
        .checked_mul(u64::from(datatype.size()))
        .and_then(|n| usize::try_from(n).ok())
        .ok_or(FormatError::ArithmeticOverflow("attribute data size"))?;
    Ok(c.read_bytes(len)?.to_vec())
}

impl AttributeMessage {
    /// Decode an attribute whose fields are all inline.
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<AttributeMessage> {
        match AttributeMessage::decode(data, sizes)? {
            Message::Attribute(a) => Ok(a),
            _ => Err(FormatError::Unsupported(
                "attribute with a shared datatype or dataspace".into(),
            )),
        }
    }

    /// Decode to [`Message::Attribute`], or to [`Message::SharedAttribute`]
    /// when a field is shared.
    pub fn decode(data: &[u8], sizes: Sizes) -> Result<Message> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if !(1..=3).contains(&version) {
            return Err(FormatError::UnsupportedVersion {
                structure: "attribute message",
                version,
            });
        }
        let flags = c.read_u8()? as u64;
        let shared_type = version >= 2 && bit(flags, 0);
        let shared_space = version >= 2 && bit(flags, 1);
        let name_size = c.read_u16()? as usize;
        let datatype_size = c.read_u16()? as usize;
        let dataspace_size = c.read_u16()? as usize;
        if version == 3 {
            // character set of the name
            c.skip(1)?;
        }

        let padded = |n: usize| if version == 1 { (n + 7) & !7 } else { n };

        let name_field = c.read_bytes(padded(name_size))?;
        let name_bytes = &name_field[..name_size];
        let name_bytes = name_bytes.split(|&b| b == 0).next().unwrap_or(name_bytes);
        let name = String::from_utf8_lossy(name_bytes).into_owned();

        let datatype_field = &c.read_bytes(padded(datatype_size))?[..datatype_size];
        let dataspace_field = &c.read_bytes(padded(dataspace_size))?[..dataspace_size];

        if !shared_type && !shared_space {
            let datatype = Datatype::parse(datatype_field)?;
            let dataspace = Dataspace::parse(dataspace_field, sizes)?;
            let raw_data = read_elements(&mut c, &datatype, &dataspace)?;
            return Ok(Message::Attribute(AttributeMessage {
                version,
                name,
                datatype,
                dataspace,
                raw_data,
            }));
        }

        let datatype = if shared_type {
            AttributePart::Shared(SharedRef::parse(datatype_field, MessageType::Datatype, sizes)?)
        } else {
            AttributePart::Inline(Datatype::parse(datatype_field)?)
        };
        let dataspace = if shared_space {
            AttributePart::Shared(SharedRef::parse(dataspace_field, MessageType::Dataspace, sizes)?)
        } else {
            AttributePart::Inline(Dataspace::parse(dataspace_field, sizes)?)
        };
        let tail = c.read_bytes(c.remaining())?.to_vec();
        Ok(Message::SharedAttribute(SharedAttribute {
            version,
            name,
            datatype,
            dataspace,
            tail,
        }))
    }
}

impl SharedAttribute {
    /// Complete the attribute. `lookup` returns the message a shared
    /// reference points to.
    pub fn resolve<F>(&self, mut lookup: F) -> Result<AttributeMessage>
    where
        F: FnMut(&SharedRef) -> Result<Message>,
    {
        let datatype = match &self.datatype {
            AttributePart::Inline(dt) => dt.clone(),
            AttributePart::Shared(r) => match lookup(r)? {
                Message::Datatype(dt) => dt,
                _ => return Err(self.wrong_target("datatype")),
            },
        };
        let dataspace = match &self.dataspace {
            AttributePart::Inline(ds) => ds.clone(),
            AttributePart::Shared(r) => match lookup(r)? {
                Message::Dataspace(ds) => ds,
                _ => return Err(self.wrong_target("dataspace")),
            },
        };
        let raw_data = read_elements(&mut Cursor::new(&self.tail), &datatype, &dataspace)?;
        Ok(AttributeMessage {
            version: self.version,
            name: self.name.clone(),
            datatype,
            dataspace,
            raw_data,
        })
    }

    fn wrong_target(&self, part: &str) -> FormatError {
        FormatError::malformed(
            "attribute message",
            0,
            format!("shared {part} of attribute {:?} resolved to another message type", self.name),
        )
    }
}

/// Where an object keeps attributes once they no longer fit in its header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeInfo {
    pub max_creation_index: Option<u16>,
    pub fractal_heap_address: Option<u64>,
    pub name_index_address: Option<u64>,
    pub creation_order_index_address: Option<u64>,
}

impl AttributeInfo {
    pub fn parse(data: &[u8], sizes: Sizes) -> Result<AttributeInfo> {
        let mut c = Cursor::new(data);
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "attribute info message",
                version,
            });
        }
        let flags = c.read_u8()? as u64;
        let max_creation_index = if bit(flags, 0) { Some(c.read_u16()?) } else { None };
        let fractal_heap_address = c.read_address(sizes)?;
        let name_index_address = c.read_address(sizes)?;
        let creation_order_index_address = if bit(flags, 1) { c.read_address(sizes)? } else { None };
        Ok(AttributeInfo {
            max_creation_index,
            fractal_heap_address,
            name_index_address,
            creation_order_index_address,
        })
    }

    /// Dense storage is in use.
    pub fn is_dense(&self) -> bool {
        self.fractal_heap_address.is_some() && self.name_index_address.is_some()
    }
}
