//! Object header message type codes.

use std::fmt;

macro_rules! message_types {
    ($($variant:ident = $code:literal, $name:literal;)*) => {
        /// Header message types this crate knows by name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum MessageType {
            $($variant,)*
            /// Any other type code.
            Other(u16),
        }

        impl MessageType {
            pub fn from_code(code: u16) -> MessageType {
                match code {
                    $($code => MessageType::$variant,)*
                    other => MessageType::Other(other),
                }
            }

            pub fn code(self) -> u16 {
                match self {
                    $(MessageType::$variant => $code,)*
                    MessageType::Other(code) => code,
                }
            }

            pub fn name(self) -> &'static str {
                match self {
                    $(MessageType::$variant => $name,)*
                    MessageType::Other(_) => "unknown",
                }
            }
        }
    };
}

message_types! {
    Nil = 0x0000, "nil";
    Dataspace = 0x0001, "dataspace";
    LinkInfo = 0x0002, "link info";
    Datatype = 0x0003, "datatype";
    FillValueOld = 0x0004, "fill value (old)";
    FillValue = 0x0005, "fill value";
    Link = 0x0006, "link";
    ExternalFiles = 0x0007, "external data files";
    DataLayout = 0x0008, "data layout";
    Bogus = 0x0009, "bogus";
    GroupInfo = 0x000a, "group info";
    FilterPipeline = 0x000b, "filter pipeline";
    Attribute = 0x000c, "attribute";
    Comment = 0x000d, "object comment";
    ModificationTimeOld = 0x000e, "modification time (old)";
    SharedMessageTable = 0x000f, "shared message table";
    Continuation = 0x0010, "header continuation";
    SymbolTable = 0x0011, "symbol table";
    ModificationTime = 0x0012, "modification time";
    BTreeK = 0x0013, "B-tree 'K' values";
    DriverInfo = 0x0014, "driver info";
    AttributeInfo = 0x0015, "attribute info";
    RefCount = 0x0016, "reference count";
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Other(code) => write!(f, "message type {code:#06x}"),
            known => write!(f, "{} message", known.name()),
        }
    }
}
