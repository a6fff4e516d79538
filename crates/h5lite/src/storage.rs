//! Backing bytes of an open file: owned or memory-mapped.

use std::fs;
use std::io;
use std::path::Path;

pub(crate) enum Storage {
    Owned(Vec<u8>),
    #[cfg(feature = "mmap")]
    Mmap(memmap2::Mmap),
}

impl Storage {
    pub(crate) fn read(path: &Path) -> io::Result<Storage> {
        fs::read(path).map(Storage::Owned)
    }

    #[cfg(feature = "mmap")]
    pub(crate) fn map(path: &Path) -> io::Result<Storage> {
        let file = fs::File::open(path)?;
        // SAFETY: the mapping is read-only. The file must not be modified by
        // another process while it is mapped.
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        Ok(Storage::Mmap(mmap))
    }

    pub(crate) fn as_bytes(&self) -> &[u8] {
        match self {
            Storage::Owned(v) => v,
            #[cfg(feature = "mmap")]
            Storage::Mmap(m) => m,
        }
    }

    pub(crate) fn is_mmap(&self) -> bool {
        match self {
            Storage::Owned(_) => false,
            #[cfg(feature = "mmap")]
            Storage::Mmap(_) => true,
        }
    }
}
