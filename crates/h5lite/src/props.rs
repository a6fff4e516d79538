//! File access properties.

use h5lite_format::chunked_read::ReadOptions;
use h5lite_format::filters::{Filter, FilterRegistry};
use h5lite_format::message_type::MessageType;
use h5lite_format::messages::{MessageDecoder, MessageRegistry};
use std::sync::Arc;

/// How a file is opened and read.
///
/// ```
/// use h5lite::AccessProps;
///
/// let props = AccessProps::default().mmap(false).parallel_chunks(false);
/// assert!(!props.mmap);
/// assert_eq!(props.chunk_batch_size, 256);
/// ```
#[derive(Debug, Clone)]
pub struct AccessProps {
    /// Memory-map files opened from a path instead of reading them.
    pub mmap: bool,
    /// Byte offset from which the format signature is searched.
    pub signature_search_start: u64,
    /// Keep decoded object headers for the life of the file.
    pub header_cache: bool,
    pub parallel_chunks: bool,
    /// Fewest chunks in one read before decoding goes parallel.
    pub parallel_threshold: usize,
    pub chunk_batch_size: usize,
    pub filters: FilterRegistry,
    pub messages: MessageRegistry,
}

impl Default for AccessProps {
    fn default() -> Self {
        let read = ReadOptions::default();
        AccessProps {
            mmap: true,
            signature_search_start: 0,
            header_cache: true,
            parallel_chunks: read.parallel,
            parallel_threshold: read.parallel_threshold,
            chunk_batch_size: read.batch_size,
            filters: FilterRegistry::builtin(),
            messages: MessageRegistry::default(),
        }
    }
}

impl AccessProps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mmap(mut self, yes: bool) -> Self {
        self.mmap = yes;
        self
    }

    pub fn signature_search_start(mut self, offset: u64) -> Self {
        self.signature_search_start = offset;
        self
    }

    pub fn header_cache(mut self, yes: bool) -> Self {
        self.header_cache = yes;
        self
    }

    pub fn parallel_chunks(mut self, yes: bool) -> Self {
        self.parallel_chunks = yes;
        self
    }

    pub fn parallel_threshold(mut self, chunks: usize) -> Self {
        self.parallel_threshold = chunks;
        self
    }

    pub fn chunk_batch_size(mut self, chunks: usize) -> Self {
        self.chunk_batch_size = chunks.max(1);
        self
    }

    /// Replace the whole filter registry.
    pub fn filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    /// Add one filter to the registry.
    pub fn register_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.register(filter);
        self
    }

    pub fn messages(mut self, messages: MessageRegistry) -> Self {
        self.messages = messages;
        self
    }

    /// Add or replace the decoder for one message type.
    pub fn register_message(mut self, msg_type: MessageType, decoder: MessageDecoder) -> Self {
        self.messages.register(msg_type, decoder);
        self
    }

    pub(crate) fn read_options(&self) -> ReadOptions {
        ReadOptions {
            parallel: self.parallel_chunks,
            parallel_threshold: self.parallel_threshold,
            batch_size: self.chunk_batch_size,
        }
    }
}
