//! Open files: the backing bytes, the superblock and the header cache.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use h5lite_format::cursor::Sizes;
use h5lite_format::error::FormatError;
use h5lite_format::group::{self, ObjectKind, ObjectLocation, ObjectSource};
use h5lite_format::object_header::ObjectHeader;
use h5lite_format::superblock::Superblock;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::node::Node;
use crate::props::AccessProps;
use crate::storage::Storage;

struct Inner {
    storage: Storage,
    superblock: Superblock,
    /// Bytes from the base address to the end-of-file address.
    view: Range<usize>,
    props: AccessProps,
    headers: RwLock<HashMap<u64, Arc<ObjectHeader>>>,
}

/// An open file.
///
/// Cloning is cheap and every clone shares the bytes and the header cache.
/// The cache lives until [`File::close`] or until the last clone (and the
/// last [`Node`]) is dropped.
#[derive(Clone)]
pub struct File {
    inner: Arc<Inner>,
}

fn view_range(sb: &Superblock, len: usize) -> Result<Range<usize>> {
    let base = usize::try_from(sb.base_address)
        .ok()
        .filter(|&b| b <= len)
        .ok_or_else(|| FormatError::Malformed {
            structure: "superblock",
            offset: sb.signature_offset,
            reason: format!("base address {:#x} beyond the {len}-byte file", sb.base_address),
        })?;
    let end = usize::try_from(sb.eof_address)
        .ok()
        .and_then(|eof| base.checked_add(eof))
        .map_or(len, |end| end.min(len));
    Ok(base..end)
}

impl File {
    /// Open the file at `path` with default properties, memory-mapping it
    /// when the `mmap` feature is enabled.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<File> {
        File::open_with(path, AccessProps::default())
    }

    pub fn open_with<P: AsRef<Path>>(path: P, props: AccessProps) -> Result<File> {
        let path = path.as_ref();
        #[cfg(feature = "mmap")]
        let storage = if props.mmap {
            Storage::map(path)?
        } else {
            Storage::read(path)?
        };
        #[cfg(not(feature = "mmap"))]
        let storage = Storage::read(path)?;
        debug!(path = %path.display(), mmap = storage.is_mmap(), "opening file");
        File::from_storage(storage, props)
    }

    /// Open an in-memory file.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<File> {
        File::from_bytes_with(bytes, AccessProps::default())
    }

    pub fn from_bytes_with(bytes: Vec<u8>, props: AccessProps) -> Result<File> {
        File::from_storage(Storage::Owned(bytes), props)
    }

    fn from_storage(storage: Storage, props: AccessProps) -> Result<File> {
        let bytes = storage.as_bytes();
        let superblock = Superblock::read(bytes, props.signature_search_start)?;
        let view = view_range(&superblock, bytes.len())?;
        debug!(
            version = superblock.version,
            offset_size = superblock.sizes.offset_size,
            length_size = superblock.sizes.length_size,
            size = bytes.len(),
            base = superblock.base_address,
            eof = superblock.eof_address,
            "opened file"
        );
        Ok(File {
            inner: Arc::new(Inner {
                storage,
                superblock,
                view,
                props,
                headers: RwLock::new(HashMap::new()),
            }),
        })
    }

    pub fn superblock(&self) -> &Superblock {
        &self.inner.superblock
    }

    pub fn props(&self) -> &AccessProps {
        &self.inner.props
    }

    pub fn is_mmap(&self) -> bool {
        self.inner.storage.is_mmap()
    }

    /// The root group.
    pub fn root(&self) -> Node {
        Node::root(self.clone())
    }

    /// The node at an absolute path. Each component is looked up through
    /// its parent, so the returned node knows its ancestors.
    pub fn node(&self, path: &str) -> Result<Node> {
        let node = self.root().get(path)?;
        debug!(path, address = node.address(), kind = ?node.kind(), "resolved node");
        Ok(node)
    }

    pub fn group(&self, path: &str) -> Result<Node> {
        let node = self.node(path)?;
        if node.kind() != ObjectKind::Group {
            return Err(FormatError::NotAGroup(node.path().to_string()).into());
        }
        Ok(node)
    }

    pub fn dataset(&self, path: &str) -> Result<Dataset> {
        self.node(path)?.as_dataset()
    }

    /// Resolve `path` straight to its object header address.
    pub fn resolve(&self, path: &str) -> Result<ObjectLocation> {
        let loc = group::resolve_path(self, path)?;
        debug!(path = %loc.path, address = loc.address, kind = ?loc.kind, "resolved path");
        Ok(loc)
    }

    /// Number of object headers in the cache.
    pub fn cached_headers(&self) -> usize {
        self.inner.headers.read().len()
    }

    /// Drop the header cache and this handle.
    pub fn close(self) {
        let mut headers = self.inner.headers.write();
        debug!(cached = headers.len(), "closing file");
        headers.clear();
    }

    pub(crate) fn header(&self, address: u64) -> Result<Arc<ObjectHeader>> {
        self.object_header(address).map_err(Error::from)
    }
}

impl ObjectSource for File {
    fn data(&self) -> &[u8] {
        &self.inner.storage.as_bytes()[self.inner.view.clone()]
    }

    fn sizes(&self) -> Sizes {
        self.inner.superblock.sizes
    }

    fn root_address(&self) -> u64 {
        self.inner.superblock.root_object_header_address()
    }

    fn object_header(&self, address: u64) -> h5lite_format::Result<Arc<ObjectHeader>> {
        let inner = &*self.inner;
        if inner.props.header_cache {
            if let Some(h) = inner.headers.read().get(&address) {
                trace!(address, "header cache hit");
                return Ok(Arc::clone(h));
            }
            trace!(address, "header cache miss");
        }
        let header = group::load_header(self.data(), address, self.sizes(), &inner.props.messages)?;
        if header.dataspace().map_or(false, |d| d.permutation_present) {
            warn!(address, "dataspace permutation indices present; ignored");
        }
        if !inner.props.header_cache {
            return Ok(header);
        }
        // Racing decoders of one address produce equal headers; the first
        // insert is kept.
        Ok(Arc::clone(inner.headers.write().entry(address).or_insert(header)))
    }
}

impl fmt::Debug for File {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("size", &self.inner.storage.as_bytes().len())
            .field("superblock_version", &self.inner.superblock.version)
            .field("mmap", &self.is_mmap())
            .field("cached_headers", &self.cached_headers())
            .finish()
    }
}
