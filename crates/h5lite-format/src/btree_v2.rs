//! Version 2 B-trees: header ("BTHD"), internal ("BTIN") and leaf ("BTLF")
//! nodes, all checksummed.
//!
//! Field widths inside internal nodes depend on the node geometry, so the
//! header derives a [`NodeInfo`] table per depth exactly as the writer did.

use std::collections::HashSet;

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};

/// Signature, version, type and checksum.
const NODE_PREFIX: usize = 10;

/// Per-depth capacity figures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeInfo {
    pub max_nrec: u64,
    /// Maximum number of records in a subtree rooted at this depth.
    pub cum_max_nrec: u64,
    /// Byte width of the subtree total stored in child pointers.
    pub cum_max_nrec_size: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV2Header {
    pub address: u64,
    pub tree_type: u8,
    pub node_size: u32,
    pub record_size: u16,
    pub depth: u16,
    pub split_percent: u8,
    pub merge_percent: u8,
    pub root_address: Option<u64>,
    pub root_nrec: u16,
    pub total_records: u64,
    /// Width of every per-child record count, derived from the leaf capacity.
    pub max_nrec_size: usize,
    /// Indexed by depth; entry 0 describes leaves.
    pub node_info: Vec<NodeInfo>,
}

/// Bytes needed to encode values up to `limit`.
fn limit_enc_size(limit: u64) -> usize {
    let log2 = if limit == 0 { 0 } else { 63 - limit.leading_zeros() as usize };
    log2 / 8 + 1
}

impl BTreeV2Header {
    pub fn read(data: &[u8], address: u64, sizes: Sizes) -> Result<Self> {
        let mut c = Cursor::at_address(data, address)?;
        let start = c.mark();
        c.read_signature(b"BTHD", "B-tree v2 header")?;
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "B-tree v2 header",
                version,
            });
        }
        let tree_type = c.read_u8()?;
        let node_size = c.read_u32()?;
        let record_size = c.read_u16()?;
        let depth = c.read_u16()?;
        let split_percent = c.read_u8()?;
        let merge_percent = c.read_u8()?;
        let root_address = c.read_address(sizes)?;
        let root_nrec = c.read_u16()?;
        let total_records = c.read_length(sizes)?;
        c.verify_checksum_from(start, "B-tree v2 header")?;

        if record_size == 0 || (node_size as usize) <= NODE_PREFIX {
            return Err(FormatError::malformed(
                "B-tree v2 header",
                address,
                format!("node size {node_size} cannot hold records of {record_size} bytes"),
            ));
        }

        let (max_nrec_size, node_info) = node_geometry(node_size, record_size, depth, sizes)
            .ok_or_else(|| FormatError::malformed("B-tree v2 header", address, "node size too small for depth"))?;

        Ok(BTreeV2Header {
            address,
            tree_type,
            node_size,
            record_size,
            depth,
            split_percent,
            merge_percent,
            root_address,
            root_nrec,
            total_records,
            max_nrec_size,
            node_info,
        })
    }

    /// Size of one child pointer in an internal node at `depth` (>= 1).
    fn child_pointer_size(&self, depth: usize, sizes: Sizes) -> usize {
        let nested = if depth > 1 {
            self.node_info[depth - 1].cum_max_nrec_size
        } else {
            0
        };
        sizes.offset_size as usize + self.max_nrec_size + nested
    }
}

fn node_geometry(node_size: u32, record_size: u16, depth: u16, sizes: Sizes) -> Option<(usize, Vec<NodeInfo>)> {
    let node_size = node_size as u64;
    let rec = record_size as u64;
    let leaf_max = (node_size - NODE_PREFIX as u64) / rec;
    let max_nrec_size = limit_enc_size(leaf_max);
    let mut info = vec![NodeInfo {
        max_nrec: leaf_max,
        cum_max_nrec: leaf_max,
        cum_max_nrec_size: 0,
    }];
    for d in 1..=depth as usize {
        let nested = if d > 1 { info[d - 1].cum_max_nrec_size } else { 0 };
        let ptr = (sizes.offset_size as usize + max_nrec_size + nested) as u64;
        let avail = node_size.checked_sub(NODE_PREFIX as u64 + ptr)?;
        let max_nrec = avail / (rec + ptr);
        let cum = max_nrec
            .checked_add(1)?
            .checked_mul(info[d - 1].cum_max_nrec)?
            .checked_add(max_nrec)?;
        info.push(NodeInfo {
            max_nrec,
            cum_max_nrec: cum,
            cum_max_nrec_size: limit_enc_size(cum),
        });
    }
    Some((max_nrec_size, info))
}

enum Step {
    Node { address: u64, nrec: u64, depth: u16 },
    Record(usize),
}

/// Every record of the tree, in key order, as slices of `data`.
pub fn collect_records<'a>(data: &'a [u8], header: &BTreeV2Header, sizes: Sizes) -> Result<Vec<&'a [u8]>> {
    let Some(root) = header.root_address else {
        return Ok(Vec::new());
    };
    if header.root_nrec == 0 {
        return Ok(Vec::new());
    }
    let rec_size = header.record_size as usize;
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    let mut stack = vec![Step::Node {
        address: root,
        nrec: header.root_nrec as u64,
        depth: header.depth,
    }];

    while let Some(step) = stack.pop() {
        let (address, nrec, depth) = match step {
            Step::Record(pos) => {
                out.push(&data[pos..pos + rec_size]);
                continue;
            }
            Step::Node { address, nrec, depth } => (address, nrec, depth),
        };
        if !visited.insert(address) {
            return Err(FormatError::malformed("B-tree v2 node", address, "node visited twice"));
        }
        let d = depth as usize;
        if nrec > header.node_info[d].max_nrec {
            return Err(FormatError::malformed(
                "B-tree v2 node",
                address,
                format!("{nrec} records exceed node capacity {}", header.node_info[d].max_nrec),
            ));
        }
        let n = nrec as usize;
        let mut c = Cursor::at_address(data, address)?;
        let start = c.mark();
        if depth == 0 {
            c.read_signature(b"BTLF", "B-tree v2 leaf node")?;
        } else {
            c.read_signature(b"BTIN", "B-tree v2 internal node")?;
        }
        let version = c.read_u8()?;
        if version != 0 {
            return Err(FormatError::UnsupportedVersion {
                structure: "B-tree v2 node",
                version,
            });
        }
        let node_type = c.read_u8()?;
        if node_type != header.tree_type {
            return Err(FormatError::malformed(
                "B-tree v2 node",
                address,
                format!("type {node_type} in a tree of type {}", header.tree_type),
            ));
        }
        let records_at = c.position();
        c.skip(n * rec_size)?;

        if depth == 0 {
            c.verify_checksum_from(start, "B-tree v2 leaf node")?;
            for i in 0..n {
                let pos = records_at + i * rec_size;
                out.push(&data[pos..pos + rec_size]);
            }
            continue;
        }

        let nested = if d > 1 {
            header.node_info[d - 1].cum_max_nrec_size
        } else {
            0
        };
        c.ensure((n + 1) * header.child_pointer_size(d, sizes))?;
        let mut children = Vec::with_capacity(n + 1);
        for _ in 0..=n {
            let child = c.read_offset(sizes)?;
            let child_nrec = c.read_uint(header.max_nrec_size)?;
            if nested > 0 {
                c.skip(nested)?;
            }
            children.push((child, child_nrec));
        }
        c.verify_checksum_from(start, "B-tree v2 internal node")?;

        // Pushed in reverse so that child 0 is visited first.
        for i in (0..=n).rev() {
            let (child, child_nrec) = children[i];
            stack.push(Step::Node {
                address: child,
                nrec: child_nrec,
                depth: depth - 1,
            });
            if i > 0 {
                stack.push(Step::Record(records_at + (i - 1) * rec_size));
            }
        }
    }
    Ok(out)
}

/// A decoded record of one of the types this crate consumes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record<'a> {
    /// Type 5: link indexed by name hash.
    LinkName { hash: u32, heap_id: &'a [u8] },
    /// Type 6: link indexed by creation order.
    LinkCreationOrder { order: u64, heap_id: &'a [u8] },
    /// Type 8: attribute indexed by name hash.
    AttributeName {
        heap_id: &'a [u8],
        flags: u8,
        creation_order: u32,
        hash: u32,
    },
    /// Type 9: attribute indexed by creation order.
    AttributeCreationOrder {
        heap_id: &'a [u8],
        flags: u8,
        creation_order: u32,
    },
    /// Types 10 and 11: chunk location. `scaled` holds chunk-index offsets.
    Chunk {
        address: Option<u64>,
        /// Stored size, present for filtered chunks only.
        size: Option<u64>,
        filter_mask: u32,
        scaled: Vec<u64>,
    },
}

impl<'a> Record<'a> {
    /// Decode `raw` as a record of `tree_type`. `chunk_rank` is required for
    /// chunk records.
    pub fn decode(tree_type: u8, raw: &'a [u8], sizes: Sizes, chunk_rank: Option<usize>) -> Result<Self> {
        let mut c = Cursor::new(raw);
        match tree_type {
            5 => Ok(Record::LinkName {
                hash: c.read_u32()?,
                heap_id: &raw[4..],
            }),
            6 => Ok(Record::LinkCreationOrder {
                order: c.read_u64()?,
                heap_id: &raw[8..],
            }),
            8 => {
                let heap_id = c.read_bytes(8)?;
                Ok(Record::AttributeName {
                    heap_id,
                    flags: c.read_u8()?,
                    creation_order: c.read_u32()?,
                    hash: c.read_u32()?,
                })
            }
            9 => {
                let heap_id = c.read_bytes(8)?;
                Ok(Record::AttributeCreationOrder {
                    heap_id,
                    flags: c.read_u8()?,
                    creation_order: c.read_u32()?,
                })
            }
            10 | 11 => {
                let rank = chunk_rank.ok_or(FormatError::Unsupported(
                    "chunk record decoded without a rank".into(),
                ))?;
                let address = c.read_address(sizes)?;
                let (size, filter_mask) = if tree_type == 11 {
                    let fixed = sizes.offset_size as usize + 4 + 8 * rank;
                    let width = raw.len().checked_sub(fixed).filter(|w| (1..=8).contains(w)).ok_or_else(|| {
                        FormatError::malformed("B-tree v2 chunk record", 0, format!("record size {} for rank {rank}", raw.len()))
                    })?;
                    (Some(c.read_uint(width)?), c.read_u32()?)
                } else {
                    (None, 0)
                };
                let mut scaled = Vec::with_capacity(rank);
                for _ in 0..rank {
                    scaled.push(c.read_u64()?);
                }
                Ok(Record::Chunk {
                    address,
                    size,
                    filter_mask,
                    scaled,
                })
            }
            other => Err(FormatError::Unsupported(format!(
                "B-tree v2 record type {other}"
            ))),
        }
    }
}
