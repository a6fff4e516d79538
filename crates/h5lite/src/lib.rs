//! Read-only access to HDF5 files.
//!
//! This crate is the session layer over `h5lite-format`: it owns the file
//! bytes (read or memory-mapped), caches decoded object headers and exposes
//! the group tree as [`Node`]s and [`Dataset`]s. All decoding is done by the
//! format crate.
//!
//! ```no_run
//! use h5lite::{File, Selection};
//!
//! let file = File::open("data.h5").unwrap();
//! let ds = file.dataset("/sensors/temperature").unwrap();
//! println!("shape: {:?}, dtype: {}", ds.shape().unwrap(), ds.dtype().unwrap());
//! let values = ds.read_f64().unwrap();
//! let window = ds.read_f64_selection(&Selection::slice(&[0..10])).unwrap();
//! assert_eq!(&values[..10], &window[..]);
//!
//! for child in file.root().children().unwrap() {
//!     println!("{} {:?}", child.path(), child.kind());
//! }
//! ```

pub mod dataset;
pub mod error;
pub mod file;
pub mod node;
pub mod props;
mod storage;
pub mod types;

pub use dataset::Dataset;
pub use error::{Error, Result};
pub use file::File;
pub use node::Node;
pub use props::AccessProps;
pub use types::{AttrValue, DType};

pub use h5lite_format::error::{ErrorCategory, FormatError};
pub use h5lite_format::filters::{Filter, FilterError, FilterRegistry};
pub use h5lite_format::group::{ObjectKind, ObjectLocation};
pub use h5lite_format::messages::MessageRegistry;
pub use h5lite_format::selection::Selection;
