//! Dataset handles: metadata accessors and reads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use h5lite_format::data_layout::DataLayout;
use h5lite_format::data_read::{self, RawReader};
use h5lite_format::dataspace::Dataspace;
use h5lite_format::datatype::Datatype;
use h5lite_format::fill_value::FillValue;
use h5lite_format::filter_pipeline::FilterPipeline;
use h5lite_format::group::ObjectSource;
use h5lite_format::message_type::MessageType;
use h5lite_format::object_header::ObjectHeader;
use h5lite_format::selection::Selection;

use crate::error::{Error, Result};
use crate::node::Node;
use crate::types::{AttrValue, DType};

/// A dataset node with its header.
#[derive(Clone)]
pub struct Dataset {
    node: Node,
    header: Arc<ObjectHeader>,
}

impl Dataset {
    pub(crate) fn new(node: Node, header: Arc<ObjectHeader>) -> Dataset {
        Dataset { node, header }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn path(&self) -> &str {
        self.node.path()
    }

    pub fn header(&self) -> &ObjectHeader {
        &self.header
    }

    pub fn dataspace(&self) -> Result<&Dataspace> {
        self.header
            .dataspace()
            .ok_or(Error::MissingMessage(MessageType::Dataspace))
    }

    pub fn shape(&self) -> Result<Vec<u64>> {
        Ok(self.dataspace()?.dims.clone())
    }

    /// Maximum extents; `None` when the dataspace stores none (fixed size).
    pub fn max_shape(&self) -> Result<Option<Vec<u64>>> {
        Ok(self.dataspace()?.max_dims.clone())
    }

    pub fn num_elements(&self) -> Result<u64> {
        Ok(self.dataspace()?.num_elements()?)
    }

    pub fn datatype(&self) -> Result<&Datatype> {
        self.header
            .datatype()
            .ok_or(Error::MissingMessage(MessageType::Datatype))
    }

    pub fn dtype(&self) -> Result<DType> {
        Ok(DType::from(self.datatype()?))
    }

    pub fn layout(&self) -> Result<&DataLayout> {
        self.header
            .layout()
            .ok_or(Error::MissingMessage(MessageType::DataLayout))
    }

    pub fn filters(&self) -> Option<&FilterPipeline> {
        self.header.filter_pipeline()
    }

    pub fn fill_value(&self) -> Option<&FillValue> {
        self.header.fill_value()
    }

    pub fn attributes(&self) -> Result<BTreeMap<String, AttrValue>> {
        self.node.attributes()
    }

    fn reader(&self) -> Result<RawReader<'_>> {
        let file = self.node.file();
        let props = file.props();
        Ok(RawReader::new(
            file.data(),
            file.sizes(),
            self.layout()?,
            self.dataspace()?,
            self.datatype()?,
            &props.filters,
        )
        .pipeline(self.filters())
        .fill_value(self.fill_value())
        .options(props.read_options()))
    }

    fn log_read(&self, bytes: usize, window: Option<&Selection>) {
        let props = self.node.file().props();
        if let Ok(layout) = self.layout() {
            let index = match layout {
                DataLayout::Chunked { index, .. } => index.name(),
                _ => "none",
            };
            debug!(
                path = %self.path(),
                layout = layout.class_name(),
                chunk_index = index,
                parallel = props.parallel_chunks,
                bytes,
                window = ?window.map(|s| (&s.start, &s.count)),
                "read dataset"
            );
        }
    }

    /// Every element's bytes, row-major, in the stored byte order.
    pub fn read_raw(&self) -> Result<Vec<u8>> {
        let raw = self.reader()?.read()?;
        self.log_read(raw.len(), None);
        Ok(raw)
    }

    /// The bytes of the elements inside `selection`, row-major within it.
    pub fn read_raw_selection(&self, selection: &Selection) -> Result<Vec<u8>> {
        let raw = self.reader()?.read_selection(selection)?;
        self.log_read(raw.len(), Some(selection));
        Ok(raw)
    }

    pub fn read_f64(&self) -> Result<Vec<f64>> {
        let raw = self.read_raw()?;
        Ok(data_read::read_as_f64(&raw, self.datatype()?)?)
    }

    pub fn read_f64_selection(&self, selection: &Selection) -> Result<Vec<f64>> {
        let raw = self.read_raw_selection(selection)?;
        Ok(data_read::read_as_f64(&raw, self.datatype()?)?)
    }

    pub fn read_f32(&self) -> Result<Vec<f32>> {
        let raw = self.read_raw()?;
        Ok(data_read::read_as_f32(&raw, self.datatype()?)?)
    }

    pub fn read_i64(&self) -> Result<Vec<i64>> {
        let raw = self.read_raw()?;
        Ok(data_read::read_as_i64(&raw, self.datatype()?)?)
    }

    pub fn read_i32(&self) -> Result<Vec<i32>> {
        let raw = self.read_raw()?;
        Ok(data_read::read_as_i32(&raw, self.datatype()?)?)
    }

    pub fn read_u64(&self) -> Result<Vec<u64>> {
        let raw = self.read_raw()?;
        Ok(data_read::read_as_u64(&raw, self.datatype()?)?)
    }

    /// Fixed or variable-length strings.
    pub fn read_strings(&self) -> Result<Vec<String>> {
        let dt = self.datatype()?;
        let raw = self.read_raw()?;
        if dt.is_vlen_string() {
            let file = self.node.file();
            return Ok(data_read::read_vlen_strings(file.data(), &raw, dt, file.sizes())?);
        }
        match dt {
            Datatype::String { .. } => Ok(data_read::read_as_strings(&raw, dt)?),
            other => Err(Error::TypeMismatch {
                expected: "string",
                actual: DType::from(other).to_string(),
            }),
        }
    }
}

impl fmt::Debug for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dataset")
            .field("path", &self.path())
            .field("shape", &self.header.dataspace().map(|d| &d.dims))
            .field("dtype", &self.header.datatype().map(DType::from))
            .finish()
    }
}
