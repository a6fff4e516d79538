//! Version 1 B-trees ("TREE"): type 0 indexes group symbol table nodes,
//! type 1 indexes raw data chunks.
//!
//! Traversal is iterative with an explicit stack. A child must sit exactly one
//! level below its parent and no node may be visited twice, so corrupt
//! sibling or child pointers end in an error instead of a loop.

use std::cmp::Ordering;
use std::collections::HashSet;

use crate::cursor::{Cursor, Sizes};
use crate::error::{FormatError, Result};
use crate::local_heap::LocalHeap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Group,
    Chunk,
}

/// Key of a chunk B-tree: the chunk's stored size, its filter mask, and its
/// element offsets (one per dataset dimension plus a trailing zero).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub chunk_size: u32,
    pub filter_mask: u32,
    pub offsets: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKeys {
    /// Name offsets into the group's local heap.
    Group(Vec<u64>),
    Chunk(Vec<ChunkKey>),
}

impl NodeKeys {
    pub fn len(&self) -> usize {
        match self {
            NodeKeys::Group(k) => k.len(),
            NodeKeys::Chunk(k) => k.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeV1Node {
    pub address: u64,
    pub node_type: NodeType,
    /// 0 for leaves.
    pub level: u8,
    pub entries_used: u16,
    pub left_sibling: Option<u64>,
    pub right_sibling: Option<u64>,
    /// `entries_used + 1` keys.
    pub keys: NodeKeys,
    /// `entries_used` child addresses.
    pub children: Vec<u64>,
}

impl BTreeV1Node {
    /// Decode a node. `chunk_rank` is the dataset rank and is required to
    /// size chunk keys; it is ignored for group nodes.
    pub fn read(data: &[u8], address: u64, sizes: Sizes, chunk_rank: Option<usize>) -> Result<Self> {
        let mut c = Cursor::at_address(data, address)?;
        c.read_signature(b"TREE", "B-tree v1 node")?;
        let node_type = match c.read_u8()? {
            0 => NodeType::Group,
            1 => NodeType::Chunk,
            other => {
                return Err(FormatError::malformed(
                    "B-tree v1 node",
                    address,
                    format!("unknown node type {other}"),
                ))
            }
        };
        let level = c.read_u8()?;
        let entries_used = c.read_u16()?;
        let left_sibling = c.read_address(sizes)?;
        let right_sibling = c.read_address(sizes)?;

        let n = entries_used as usize;
        let mut children = Vec::with_capacity(n);
        let keys = match node_type {
            NodeType::Group => {
                c.ensure(n * (sizes.length_size as usize + sizes.offset_size as usize))?;
                let mut keys = Vec::with_capacity(n + 1);
                for _ in 0..n {
                    keys.push(c.read_length(sizes)?);
                    children.push(c.read_offset(sizes)?);
                }
                keys.push(c.read_length(sizes)?);
                NodeKeys::Group(keys)
            }
            NodeType::Chunk => {
                let rank = chunk_rank.ok_or_else(|| {
                    FormatError::malformed("B-tree v1 node", address, "chunk node read without a rank")
                })?;
                let key_size = 8 + 8 * (rank + 1);
                c.ensure(n * (key_size + sizes.offset_size as usize))?;
                let mut keys = Vec::with_capacity(n + 1);
                for _ in 0..n {
                    keys.push(read_chunk_key(&mut c, rank)?);
                    children.push(c.read_offset(sizes)?);
                }
                keys.push(read_chunk_key(&mut c, rank)?);
                NodeKeys::Chunk(keys)
            }
        };

        Ok(BTreeV1Node {
            address,
            node_type,
            level,
            entries_used,
            left_sibling,
            right_sibling,
            keys,
            children,
        })
    }
}

fn read_chunk_key(c: &mut Cursor<'_>, rank: usize) -> Result<ChunkKey> {
    let chunk_size = c.read_u32()?;
    let filter_mask = c.read_u32()?;
    let mut offsets = Vec::with_capacity(rank + 1);
    for _ in 0..=rank {
        offsets.push(c.read_u64()?);
    }
    Ok(ChunkKey {
        chunk_size,
        filter_mask,
        offsets,
    })
}

/// Depth-first walk that yields leaf nodes left to right.
struct Walk<'a> {
    data: &'a [u8],
    sizes: Sizes,
    expected: NodeType,
    chunk_rank: Option<usize>,
    stack: Vec<(u64, Option<u8>)>,
    visited: HashSet<u64>,
}

impl<'a> Walk<'a> {
    fn new(data: &'a [u8], root: u64, sizes: Sizes, expected: NodeType, chunk_rank: Option<usize>) -> Self {
        Walk {
            data,
            sizes,
            expected,
            chunk_rank,
            stack: vec![(root, None)],
            visited: HashSet::new(),
        }
    }

    fn load(&mut self, address: u64, expected_level: Option<u8>) -> Result<BTreeV1Node> {
        if !self.visited.insert(address) {
            return Err(FormatError::malformed("B-tree v1 node", address, "node visited twice"));
        }
        let node = BTreeV1Node::read(self.data, address, self.sizes, self.chunk_rank)?;
        if node.node_type != self.expected {
            return Err(FormatError::malformed(
                "B-tree v1 node",
                address,
                format!("expected {:?} node, found {:?}", self.expected, node.node_type),
            ));
        }
        if let Some(level) = expected_level {
            if node.level != level {
                return Err(FormatError::malformed(
                    "B-tree v1 node",
                    address,
                    format!("level {} under a parent expecting {level}", node.level),
                ));
            }
        }
        Ok(node)
    }

    fn next_leaf(&mut self) -> Result<Option<BTreeV1Node>> {
        while let Some((address, level)) = self.stack.pop() {
            let node = self.load(address, level)?;
            if node.level == 0 {
                return Ok(Some(node));
            }
            let child_level = node.level - 1;
            for &child in node.children.iter().rev() {
                self.stack.push((child, Some(child_level)));
            }
        }
        Ok(None)
    }
}

/// Addresses of every symbol table node under a group B-tree, in key order.
pub fn collect_group_leaves(data: &[u8], root: u64, sizes: Sizes) -> Result<Vec<u64>> {
    let mut walk = Walk::new(data, root, sizes, NodeType::Group, None);
    let mut out = Vec::new();
    while let Some(leaf) = walk.next_leaf()? {
        out.extend_from_slice(&leaf.children);
    }
    Ok(out)
}

/// Every chunk of a chunk B-tree as `(key, chunk address)`, in key order.
pub fn collect_chunk_entries(data: &[u8], root: u64, sizes: Sizes, rank: usize) -> Result<Vec<(ChunkKey, u64)>> {
    let mut walk = Walk::new(data, root, sizes, NodeType::Chunk, Some(rank));
    let mut out = Vec::new();
    while let Some(leaf) = walk.next_leaf()? {
        if let NodeKeys::Chunk(keys) = leaf.keys {
            out.extend(keys.into_iter().zip(leaf.children));
        }
    }
    Ok(out)
}

/// Descend a group B-tree by key comparison to the symbol table node that
/// could hold `name`. Child `i` covers names in `(key[i], key[i+1]]`.
pub fn find_group_leaf(
    data: &[u8],
    root: u64,
    sizes: Sizes,
    heap: &LocalHeap,
    name: &[u8],
) -> Result<Option<u64>> {
    let mut visited = HashSet::new();
    let mut address = root;
    let mut expected_level: Option<u8> = None;
    loop {
        if !visited.insert(address) {
            return Err(FormatError::malformed("B-tree v1 node", address, "node visited twice"));
        }
        let node = BTreeV1Node::read(data, address, sizes, None)?;
        if node.node_type != NodeType::Group {
            return Err(FormatError::malformed("B-tree v1 node", address, "expected a group node"));
        }
        if expected_level.is_some_and(|l| l != node.level) {
            return Err(FormatError::malformed("B-tree v1 node", address, "inconsistent node level"));
        }
        let NodeKeys::Group(keys) = &node.keys else {
            return Ok(None);
        };

        let mut chosen = None;
        for i in 0..node.children.len() {
            let left = heap.bytes_at(data, keys[i])?;
            let right = heap.bytes_at(data, keys[i + 1])?;
            // Key 0 of the leftmost child is the empty string, which sorts first.
            let above_left = (i == 0 && left.is_empty()) || name.cmp(left) == Ordering::Greater;
            if above_left && name.cmp(right) != Ordering::Greater {
                chosen = Some(node.children[i]);
                break;
            }
        }
        let Some(child) = chosen else {
            return Ok(None);
        };
        if node.level == 0 {
            return Ok(Some(child));
        }
        expected_level = Some(node.level - 1);
        address = child;
    }
}
