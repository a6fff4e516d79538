//! Typed header messages and the registry that decodes them.
//!
//! Dispatch is by numeric type code. [`MessageRegistry::default`] knows every
//! message this crate decodes; callers can add decoders for other codes.

use std::collections::HashMap;
use std::fmt;

use crate::attribute::{AttributeInfo, AttributeMessage, SharedAttribute};
use crate::cursor::{Cursor, Sizes};
use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::link::{GroupInfo, LinkInfo, LinkMessage};
use crate::message_type::MessageType;
use crate::shared::SharedRef;
use crate::symbol_table::SymbolTableMessage;

/// What a decoder knows about where its message came from.
#[derive(Debug, Clone, Copy)]
pub struct DecodeContext {
    pub sizes: Sizes,
    /// Address of the object header holding the message.
    pub header_address: u64,
}

/// Pointer to a further block of header messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Continuation {
    pub address: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BTreeK {
    pub indexed_storage_internal_k: u16,
    pub group_internal_k: u16,
    pub group_leaf_k: u16,
}

/// One decoded header message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Nil,
    Dataspace(Dataspace),
    LinkInfo(LinkInfo),
    Datatype(Datatype),
    FillValueOld(FillValue),
    FillValue(FillValue),
    Link(LinkMessage),
    DataLayout(DataLayout),
    GroupInfo(GroupInfo),
    FilterPipeline(FilterPipeline),
    Attribute(AttributeMessage),
    /// Attribute whose datatype or dataspace is shared.
    SharedAttribute(SharedAttribute),
    Continuation(Continuation),
    SymbolTable(SymbolTableMessage),
    /// Seconds since the epoch.
    ModificationTime(u32),
    BTreeK(BTreeK),
    AttributeInfo(AttributeInfo),
    RefCount(u32),
    /// The message body is stored elsewhere.
    Shared(SharedRef),
    /// No decoder is registered for this type.
    Unknown { type_id: u16, raw: Vec<u8> },
    /// A message that could not be decoded. The error is raised when the
    /// message is asked for.
    Undecodable { type_id: u16, error: FormatError },
}

pub type MessageDecoder = fn(&[u8], &DecodeContext) -> Result<Message>;

/// Type code to decoder map.
#[derive(Clone)]
pub struct MessageRegistry {
    decoders: HashMap<u16, MessageDecoder>,
}

impl MessageRegistry {
    /// A registry with no decoders; every message decodes as
    /// [`Message::Unknown`].
    pub fn empty() -> Self {
        MessageRegistry {
            decoders: HashMap::new(),
        }
    }

    /// Add or replace the decoder for `msg_type`.
    pub fn register(&mut self, msg_type: MessageType, decoder: MessageDecoder) -> &mut Self {
        self.decoders.insert(msg_type.code(), decoder);
        self
    }

    pub fn contains(&self, msg_type: MessageType) -> bool {
        self.decoders.contains_key(&msg_type.code())
    }

    pub fn get(&self, msg_type: MessageType) -> Option<MessageDecoder> {
        self.decoders.get(&msg_type.code()).copied()
    }

    /// Decode `raw`, or keep it as [`Message::Unknown`] when nothing is
    /// registered for the type.
    pub fn decode(&self, msg_type: MessageType, raw: &[u8], ctx: &DecodeContext) -> Result<Message> {
        match self.get(msg_type) {
            Some(decoder) => decoder(raw, ctx),
            None => Ok(Message::Unknown {
                type_id: msg_type.code(),
                raw: raw.to_vec(),
            }),
        }
    }
}

impl Default for MessageRegistry {
    fn default() -> Self {
        let mut r = MessageRegistry::empty();
        r.register(MessageType::Nil, |_, _| Ok(Message::Nil))
            .register(MessageType::Dataspace, |d, ctx| {
                Dataspace::parse(d, ctx.sizes).map(Message::Dataspace)
            })
            .register(MessageType::LinkInfo, |d, ctx| {
                LinkInfo::parse(d, ctx.sizes).map(Message::LinkInfo)
            })
            .register(MessageType::Datatype, |d, _| Datatype::parse(d).map(Message::Datatype))
            .register(MessageType::FillValueOld, |d, _| {
                FillValue::parse_old(d).map(Message::FillValueOld)
            })
            .register(MessageType::FillValue, |d, _| FillValue::parse(d).map(Message::FillValue))
            .register(MessageType::Link, |d, ctx| {
                LinkMessage::parse(d, ctx.sizes).map(Message::Link)
            })
            .register(MessageType::DataLayout, |d, ctx| {
                DataLayout::parse(d, ctx.sizes).map(Message::DataLayout)
            })
            .register(MessageType::GroupInfo, |d, _| GroupInfo::parse(d).map(Message::GroupInfo))
            .register(MessageType::FilterPipeline, |d, _| {
                FilterPipeline::parse(d).map(Message::FilterPipeline)
            })
            .register(MessageType::Attribute, |d, ctx| {
                AttributeMessage::decode(d, ctx.sizes)
            })
            .register(MessageType::Continuation, |d, ctx| {
                let mut c = Cursor::new(d);
                Ok(Message::Continuation(Continuation {
                    address: c.read_offset(ctx.sizes)?,
                    length: c.read_length(ctx.sizes)?,
                }))
            })
            .register(MessageType::SymbolTable, |d, ctx| {
                SymbolTableMessage::parse(d, ctx.sizes).map(Message::SymbolTable)
            })
            .register(MessageType::ModificationTime, decode_modification_time)
            .register(MessageType::BTreeK, decode_btree_k)
            .register(MessageType::AttributeInfo, |d, ctx| {
                AttributeInfo::parse(d, ctx.sizes).map(Message::AttributeInfo)
            })
            .register(MessageType::RefCount, |d, _| {
                let mut c = Cursor::new(d);
                expect_version(&mut c, 0, "reference count message")?;
                Ok(Message::RefCount(c.read_u32()?))
            });
        r
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut codes: Vec<_> = self.decoders.keys().copied().collect();
        codes.sort_unstable();
        f.debug_struct("MessageRegistry").field("types", &codes).finish()
    }
}

fn expect_version(c: &mut Cursor<'_>, expected: u8, structure: &'static str) -> Result<()> {
    let version = c.read_u8()?;
    if version != expected {
        return Err(FormatError::UnsupportedVersion { structure, version });
    }
    Ok(())
}

fn decode_modification_time(d: &[u8], _: &DecodeContext) -> Result<Message> {
    let mut c = Cursor::new(d);
    expect_version(&mut c, 1, "modification time message")?;
    c.skip(3)?;
    Ok(Message::ModificationTime(c.read_u32()?))
}

fn decode_btree_k(d: &[u8], _: &DecodeContext) -> Result<Message> {
    let mut c = Cursor::new(d);
    expect_version(&mut c, 0, "B-tree K values message")?;
    Ok(Message::BTreeK(BTreeK {
        indexed_storage_internal_k: c.read_u16()?,
        group_internal_k: c.read_u16()?,
        group_leaf_k: c.read_u16()?,
    }))
}
