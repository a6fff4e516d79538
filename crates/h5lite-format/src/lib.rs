//! Read-only decoding of the HDF5 binary format.
//!
//! This crate turns the bytes of a file into its structures: the superblock,
//! object headers and their messages, group directories, heaps, B-trees and
//! chunk indexes. It reads dataset bytes through the filter pipeline. It does
//! no file I/O: every entry point takes the whole file as `&[u8]` with
//! absolute addresses, and every decoder builds its own [`cursor::Cursor`].
//!
//! ```no_run
//! use h5lite_format::group::{resolve_path, ObjectSource, RawSource};
//! use h5lite_format::superblock::Superblock;
//!
//! # fn run(bytes: &[u8]) -> h5lite_format::Result<()> {
//! let sb = Superblock::read(bytes, 0)?;
//! let source = RawSource::new(bytes, sb.sizes, sb.root_object_header_address());
//! let loc = resolve_path(&source, "/sensors/temperature")?;
//! let header = source.object_header(loc.address)?;
//! println!("{:?}", header.dataspace());
//! # Ok(())
//! # }
//! ```

pub mod attribute;
pub mod btree_v1;
pub mod btree_v2;
pub mod checksum;
pub mod chunk_index;
pub mod chunked_read;
pub mod cursor;
pub mod data_layout;
pub mod data_read;
pub mod dataspace;
pub mod datatype;
pub mod error;
pub mod extensible_array;
pub mod fill_value;
pub mod filter_pipeline;
pub mod filters;
pub mod fixed_array;
pub mod fractal_heap;
pub mod global_heap;
pub mod group;
pub mod link;
pub mod local_heap;
pub mod message_type;
pub mod messages;
pub mod object_header;
pub mod selection;
pub mod shared;
pub mod signature;
pub mod superblock;
pub mod symbol_table;

pub use cursor::Sizes;
pub use error::{ErrorCategory, FormatError, Result};
pub use filters::{Filter, FilterRegistry};
pub use group::{ObjectKind, ObjectLocation, ObjectSource, RawSource};
pub use message_type::MessageType;
pub use messages::{Message, MessageRegistry};
pub use object_header::ObjectHeader;
pub use selection::Selection;
pub use superblock::Superblock;
