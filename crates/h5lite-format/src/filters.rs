//! Filter registry and the reverse pipeline applied to stored chunks.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub use h5lite_filters::FilterError;

use crate::error::{FormatError, Result};
use crate::filter_pipeline::{FilterPipeline, FILTER_DEFLATE, FILTER_FLETCHER32, FILTER_SHUFFLE};

/// A decoder for one filter id.
pub trait Filter: Send + Sync {
    fn id(&self) -> u16;

    fn name(&self) -> &str;

    /// Undo the filter on `input`.
    fn decode(&self, input: Vec<u8>, client_data: &[u32]) -> std::result::Result<Vec<u8>, FilterError>;
}

struct Deflate;

impl Filter for Deflate {
    fn id(&self) -> u16 {
        FILTER_DEFLATE
    }

    fn name(&self) -> &str {
        "deflate"
    }

    fn decode(&self, input: Vec<u8>, _client_data: &[u32]) -> std::result::Result<Vec<u8>, FilterError> {
        h5lite_filters::deflate_decompress(&input, input.len() * 4)
    }
}

struct Shuffle;

impl Filter for Shuffle {
    fn id(&self) -> u16 {
        FILTER_SHUFFLE
    }

    fn name(&self) -> &str {
        "shuffle"
    }

    fn decode(&self, input: Vec<u8>, client_data: &[u32]) -> std::result::Result<Vec<u8>, FilterError> {
        let element_size = client_data
            .first()
            .copied()
            .ok_or_else(|| FilterError::InvalidClientData("shuffle needs the element size".into()))?;
        Ok(h5lite_filters::unshuffle(&input, element_size as usize))
    }
}

struct Fletcher32;

impl Filter for Fletcher32 {
    fn id(&self) -> u16 {
        FILTER_FLETCHER32
    }

    fn name(&self) -> &str {
        "fletcher32"
    }

    fn decode(&self, input: Vec<u8>, _client_data: &[u32]) -> std::result::Result<Vec<u8>, FilterError> {
        h5lite_filters::fletcher32_verify(input)
    }
}

/// Filter id to decoder map.
#[derive(Clone)]
pub struct FilterRegistry {
    filters: HashMap<u16, Arc<dyn Filter>>,
}

impl FilterRegistry {
    pub fn empty() -> Self {
        FilterRegistry {
            filters: HashMap::new(),
        }
    }

    /// Deflate, shuffle and fletcher32.
    pub fn builtin() -> Self {
        let mut r = FilterRegistry::empty();
        r.register(Arc::new(Deflate))
            .register(Arc::new(Shuffle))
            .register(Arc::new(Fletcher32));
        r
    }

    /// Add a filter, replacing any previous one with the same id.
    pub fn register(&mut self, filter: Arc<dyn Filter>) -> &mut Self {
        self.filters.insert(filter.id(), filter);
        self
    }

    pub fn get(&self, id: u16) -> Option<&Arc<dyn Filter>> {
        self.filters.get(&id)
    }

    pub fn contains(&self, id: u16) -> bool {
        self.filters.contains_key(&id)
    }
}

impl Default for FilterRegistry {
    fn default() -> Self {
        FilterRegistry::builtin()
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.filters.keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("FilterRegistry").field("ids", &ids).finish()
    }
}

fn codec_error(id: u16, err: FilterError) -> FormatError {
    match err {
        FilterError::Fletcher32Mismatch { .. } => FormatError::FilterIntegrity {
            id,
            reason: err.to_string(),
        },
        other => FormatError::FilterFailed {
            id,
            reason: other.to_string(),
        },
    }
}

/// Undo `pipeline` on a stored chunk.
///
/// Descriptors run from last to first. Bit `i` of `filter_mask` means
/// descriptor `i` was not applied to this chunk. An unregistered optional
/// filter is skipped; an unregistered mandatory one is an error.
pub fn apply_filters(raw: Vec<u8>, pipeline: &FilterPipeline, registry: &FilterRegistry, filter_mask: u32) -> Result<Vec<u8>> {
    let mut data = raw;
    for (i, desc) in pipeline.filters.iter().enumerate().rev() {
        if i < 32 && (filter_mask >> i) & 1 == 1 {
            continue;
        }
        match registry.get(desc.id) {
            Some(filter) => {
                data = filter
                    .decode(data, &desc.client_data)
                    .map_err(|e| codec_error(desc.id, e))?;
            }
            None if desc.optional => continue,
            None => {
                return Err(FormatError::FilterNotFound {
                    id: desc.id,
                    name: desc.display_name(),
                })
            }
        }
    }
    Ok(data)
}

/// Fail early if a mandatory filter of `pipeline` is missing.
pub fn check_available(pipeline: &FilterPipeline, registry: &FilterRegistry) -> Result<()> {
    match pipeline
        .filters
        .iter()
        .find(|d| !d.optional && !registry.contains(d.id))
    {
        Some(d) => Err(FormatError::FilterNotFound {
            id: d.id,
            name: d.display_name(),
        }),
        None => Ok(()),
    }
}
