//! Object header parsing, versions 1 and 2.
//!
//! The header is a chain of message blocks: the first block sits at the
//! header address and continuation messages point at the rest. Blocks are
//! decoded in the order they are referenced, so [`ObjectHeader::messages`]
//! is the logical message stream.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use crate::attribute::{AttributeInfo, AttributeMessage};
use crate::cursor::{bit, Cursor, Sizes};
use crate::data_layout::DataLayout;
use crate::dataspace::Dataspace;
use crate::datatype::Datatype;
use crate::error::{FormatError, Result};
use crate::fill_value::FillValue;
use crate::filter_pipeline::FilterPipeline;
use crate::link::{LinkInfo, LinkMessage};
use crate::message_type::MessageType;
use crate::messages::{DecodeContext, Message, MessageRegistry};
use crate::shared::{SharedLocation, SharedRef};
use crate::symbol_table::SymbolTableMessage;

const MSG_FLAG_SHARED: u32 = 1;
/// Fail if the type is unknown, whatever the access mode.
const MSG_FLAG_MUST_UNDERSTAND: u32 = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct HeaderMessage {
    pub msg_type: MessageType,
    pub flags: u8,
    /// Present in v2 headers that track attribute creation order.
    pub creation_order: Option<u16>,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectHeader {
    pub address: u64,
    pub version: u8,
    /// v1 only.
    pub reference_count: Option<u32>,
    /// v2 only; 0 for v1.
    pub flags: u8,
    /// v2 header timestamps, when stored.
    pub modification_time: Option<u32>,
    pub messages: Vec<HeaderMessage>,
}

/// A block of message envelopes still to be decoded.
struct Block {
    start: usize,
    end: usize,
}

struct Parser<'a> {
    data: &'a [u8],
    address: u64,
    version: u8,
    sizes: Sizes,
    registry: &'a MessageRegistry,
    creation_order: bool,
    /// v1 declared message count; decoding stops when it is reached.
    remaining: Option<usize>,
    queue: VecDeque<Block>,
    visited: HashSet<u64>,
    messages: Vec<HeaderMessage>,
}

impl ObjectHeader {
    pub fn read(data: &[u8], address: u64, sizes: Sizes, registry: &MessageRegistry) -> Result<ObjectHeader> {
        let mut c = Cursor::at_address(data, address)?;
        if c.peek(4)? == b"OHDR" {
            Self::read_v2(data, address, sizes, registry)
        } else {
            let version = c.read_u8()?;
            if version != 1 {
                return Err(FormatError::UnsupportedVersion {
                    structure: "object header",
                    version,
                });
            }
            Self::read_v1(data, address, sizes, registry)
        }
    }

    fn read_v1(data: &[u8], address: u64, sizes: Sizes, registry: &MessageRegistry) -> Result<ObjectHeader> {
        let mut c = Cursor::at_address(data, address)?;
        c.skip(2)?;
        let count = c.read_u16()? as usize;
        let reference_count = c.read_u32()?;
        let size = c.read_u32()? as usize;
        c.skip(4)?;
        let start = c.position();
        c.ensure(size)?;

        let mut p = Parser::new(data, address, 1, sizes, registry, false);
        p.remaining = Some(count);
        p.queue.push_back(Block {
            start,
            end: start + size,
        });
        let messages = p.run()?;

        Ok(ObjectHeader {
            address,
            version: 1,
            reference_count: Some(reference_count),
            flags: 0,
            modification_time: None,
            messages,
        })
    }

    fn read_v2(data: &[u8], address: u64, sizes: Sizes, registry: &MessageRegistry) -> Result<ObjectHeader> {
        let mut c = Cursor::at_address(data, address)?;
        let origin = c.mark();
        c.read_signature(b"OHDR", "object header")?;
        let version = c.read_u8()?;
        if version != 2 {
            return Err(FormatError::UnsupportedVersion {
                structure: "object header",
                version,
            });
        }
        let flags = c.read_u8()?;
        let f = u64::from(flags);
        let mut modification_time = None;
        if bit(f, 5) {
            let _access = c.read_u32()?;
            modification_time = Some(c.read_u32()?);
            let _change = c.read_u32()?;
            let _birth = c.read_u32()?;
        }
        if bit(f, 4) {
            // max compact / min dense attribute counts
            c.skip(4)?;
        }
        let chunk_size = usize::try_from(c.read_uint(1 << (flags & 0x03))?)
            .map_err(|_| FormatError::ArithmeticOverflow("object header chunk size"))?;
        let start = c.position();
        c.skip(chunk_size)?;
        let end = c.position();
        c.verify_checksum_from(origin, "object header")?;

        let mut p = Parser::new(data, address, 2, sizes, registry, bit(f, 2));
        p.queue.push_back(Block { start, end });
        let messages = p.run()?;

        Ok(ObjectHeader {
            address,
            version: 2,
            reference_count: None,
            flags,
            modification_time,
            messages,
        })
    }

    fn find<'s, T>(&'s self, pick: impl Fn(&'s Message) -> Option<&'s T>) -> Option<&'s T> {
        self.messages.iter().find_map(|m| pick(&m.message))
    }

    pub fn has(&self, msg_type: MessageType) -> bool {
        self.messages.iter().any(|m| m.msg_type == msg_type)
    }

    pub fn dataspace(&self) -> Option<&Dataspace> {
        self.find(|m| match m {
            Message::Dataspace(v) => Some(v),
            _ => None,
        })
    }

    pub fn datatype(&self) -> Option<&Datatype> {
        self.find(|m| match m {
            Message::Datatype(v) => Some(v),
            _ => None,
        })
    }

    pub fn layout(&self) -> Option<&DataLayout> {
        self.find(|m| match m {
            Message::DataLayout(v) => Some(v),
            _ => None,
        })
    }

    pub fn filter_pipeline(&self) -> Option<&FilterPipeline> {
        self.find(|m| match m {
            Message::FilterPipeline(v) => Some(v),
            _ => None,
        })
    }

    /// The current fill value message, falling back to the old one.
    pub fn fill_value(&self) -> Option<&FillValue> {
        self.find(|m| match m {
            Message::FillValue(v) => Some(v),
            _ => None,
        })
        .or_else(|| {
            self.find(|m| match m {
                Message::FillValueOld(v) => Some(v),
                _ => None,
            })
        })
    }

    pub fn attributes(&self) -> Vec<&AttributeMessage> {
        self.messages
            .iter()
            .filter_map(|m| match &m.message {
                Message::Attribute(a) => Some(a),
                _ => None,
            })
            .collect()
    }

    /// Messages kept as [`Message::Undecodable`], with their errors.
    pub fn undecodable(&self) -> impl Iterator<Item = (MessageType, &FormatError)> {
        self.messages.iter().filter_map(|m| match &m.message {
            Message::Undecodable { error, .. } => Some((m.msg_type, error)),
            _ => None,
        })
    }

    pub fn attribute_info(&self) -> Option<&AttributeInfo> {
        self.find(|m| match m {
            Message::AttributeInfo(v) => Some(v),
            _ => None,
        })
    }

    pub fn links(&self) -> Vec<&LinkMessage> {
        self.messages
            .iter()
            .filter_map(|m| match &m.message {
                Message::Link(l) => Some(l),
                _ => None,
            })
            .collect()
    }

    pub fn link_info(&self) -> Option<&LinkInfo> {
        self.find(|m| match m {
            Message::LinkInfo(v) => Some(v),
            _ => None,
        })
    }

    pub fn symbol_table(&self) -> Option<&SymbolTableMessage> {
        self.find(|m| match m {
            Message::SymbolTable(v) => Some(v),
            _ => None,
        })
    }

    /// Modification time from the v2 header fields or a modification time
    /// message.
    pub fn modification_time(&self) -> Option<u32> {
        self.modification_time.or_else(|| {
            self.messages.iter().find_map(|m| match m.message {
                Message::ModificationTime(t) => Some(t),
                _ => None,
            })
        })
    }

    pub fn shared_refs(&self) -> impl Iterator<Item = &SharedRef> {
        self.messages.iter().filter_map(|m| match &m.message {
            Message::Shared(r) => Some(r),
            _ => None,
        })
    }

    /// Some message still points into another object header.
    pub fn needs_resolution(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m.message, Message::Shared(_) | Message::SharedAttribute(_)))
    }

    /// Replace shared messages with the message they reference, and
    /// complete attributes with a shared datatype or dataspace.
    ///
    /// `load` returns the object header at an address. The referenced
    /// header must hold an unshared message of the same type. An attribute
    /// that cannot be completed is kept as [`Message::Undecodable`].
    pub fn resolve_shared<F>(&mut self, mut load: F) -> Result<()>
    where
        F: FnMut(u64) -> Result<Arc<ObjectHeader>>,
    {
        let own = self.address;
        for hm in self.messages.iter_mut() {
            let resolved = match &hm.message {
                Message::Shared(r) => shared_target(own, r, &mut load),
                Message::SharedAttribute(a) => a
                    .resolve(|r| shared_target(own, r, &mut load))
                    .map(Message::Attribute),
                _ => continue,
            };
            hm.message = match resolved {
                Ok(message) => message,
                Err(error) if hm.msg_type == MessageType::Attribute => Message::Undecodable {
                    type_id: hm.msg_type.code(),
                    error,
                },
                Err(e) => return Err(e),
            };
        }
        Ok(())
    }
}

/// The message `r` points to, loaded through `load`.
pub(crate) fn shared_target<F>(own: u64, r: &SharedRef, load: &mut F) -> Result<Message>
where
    F: FnMut(u64) -> Result<Arc<ObjectHeader>>,
{
    let address = match r.location {
        SharedLocation::ObjectHeader(a) => a,
        SharedLocation::SohmHeap(_) => {
            return Err(FormatError::Unsupported(format!(
                "{} stored in the shared message heap",
                r.msg_type
            )))
        }
    };
    if address == own {
        return Err(FormatError::malformed(
            "shared message",
            address,
            "references its own object header",
        ));
    }
    let target = load(address)?;
    target
        .messages
        .iter()
        .find(|m| {
            m.msg_type == r.msg_type
                && !matches!(
                    m.message,
                    Message::Shared(_) | Message::SharedAttribute(_) | Message::Undecodable { .. }
                )
        })
        .map(|m| m.message.clone())
        .ok_or_else(|| {
            FormatError::malformed(
                "shared message",
                address,
                format!("no {} in the referenced object header", r.msg_type),
            )
        })
}

impl<'a> Parser<'a> {
    fn new(
        data: &'a [u8],
        address: u64,
        version: u8,
        sizes: Sizes,
        registry: &'a MessageRegistry,
        creation_order: bool,
    ) -> Self {
        let mut visited = HashSet::new();
        visited.insert(address);
        Parser {
            data,
            address,
            version,
            sizes,
            registry,
            creation_order,
            remaining: None,
            queue: VecDeque::new(),
            visited,
            messages: Vec::new(),
        }
    }

    fn envelope_size(&self) -> usize {
        match (self.version, self.creation_order) {
            (1, _) => 8,
            (_, true) => 6,
            (_, false) => 4,
        }
    }

    fn run(mut self) -> Result<Vec<HeaderMessage>> {
        while let Some(block) = self.queue.pop_front() {
            self.decode_block(block)?;
            if self.remaining == Some(0) {
                break;
            }
        }
        Ok(self.messages)
    }

    fn decode_block(&mut self, block: Block) -> Result<()> {
        let envelope = self.envelope_size();
        let mut c = Cursor::at(self.data, block.start);
        while c.position() + envelope <= block.end {
            if self.remaining == Some(0) {
                return Ok(());
            }
            let at = c.position() as u64;
            let (type_id, size, flags) = if self.version == 1 {
                let t = c.read_u16()?;
                let s = c.read_u16()? as usize;
                let f = c.read_u8()?;
                c.skip(3)?;
                (t, s, f)
            } else {
                let t = u16::from(c.read_u8()?);
                let s = c.read_u16()? as usize;
                (t, s, c.read_u8()?)
            };
            let creation_order = if self.version == 2 && self.creation_order {
                Some(c.read_u16()?)
            } else {
                None
            };
            if c.position() + size > block.end {
                return Err(FormatError::malformed(
                    "object header",
                    at,
                    format!("message of {size} bytes overruns its block"),
                ));
            }
            let raw = c.read_bytes(size)?;
            if let Some(n) = self.remaining.as_mut() {
                *n -= 1;
            }
            self.push_message(type_id, flags, creation_order, raw)?;
        }
        Ok(())
    }

    fn push_message(&mut self, type_id: u16, flags: u8, creation_order: Option<u16>, raw: &[u8]) -> Result<()> {
        let msg_type = MessageType::from_code(type_id);
        let f = u64::from(flags);
        let ctx = DecodeContext {
            sizes: self.sizes,
            header_address: self.address,
        };

        let decoded = if bit(f, MSG_FLAG_SHARED) {
            SharedRef::parse(raw, msg_type, self.sizes).map(Message::Shared)
        } else if !self.registry.contains(msg_type) && bit(f, MSG_FLAG_MUST_UNDERSTAND) {
            return Err(FormatError::UnsupportedMessage {
                type_id,
                address: self.address,
            });
        } else {
            self.registry.decode(msg_type, raw, &ctx)
        };
        // a bad attribute only fails when it is read
        let message = match decoded {
            Ok(message) => message,
            Err(error) if msg_type == MessageType::Attribute => Message::Undecodable { type_id, error },
            Err(e) => return Err(e),
        };

        match &message {
            Message::Nil => return Ok(()),
            Message::Continuation(cont) => self.queue_continuation(cont.address, cont.length)?,
            _ => {}
        }
        self.messages.push(HeaderMessage {
            msg_type,
            flags,
            creation_order,
            message,
        });
        Ok(())
    }

    fn queue_continuation(&mut self, address: u64, length: u64) -> Result<()> {
        if !self.visited.insert(address) {
            return Err(FormatError::malformed(
                "object header",
                address,
                "continuation block visited twice",
            ));
        }
        let start = usize::try_from(address).map_err(|_| FormatError::ArithmeticOverflow("continuation address"))?;
        let length = usize::try_from(length).map_err(|_| FormatError::ArithmeticOverflow("continuation length"))?;
        let mut c = Cursor::at(self.data, start);
        c.ensure(length)?;

        if self.version == 1 {
            self.queue.push_back(Block {
                start,
                end: start + length,
            });
            return Ok(());
        }

        if length < 8 {
            return Err(FormatError::malformed(
                "object header continuation",
                address,
                format!("block of {length} bytes"),
            ));
        }
        let origin = c.mark();
        c.read_signature(b"OCHK", "object header continuation")?;
        let end = start + length - 4;
        c.seek(end);
        c.verify_checksum_from(origin, "object header continuation")?;
        self.queue.push_back(Block { start: start + 4, end });
        Ok(())
    }
}
