//! Group directories and path resolution.
//!
//! A group lists its members in one of three ways: a legacy symbol table
//! (v1 B-tree, SNOD leaves and a local heap), link messages in its own
//! header, or dense storage (a B-tree v2 name index over link messages kept
//! in a fractal heap). [`resolve_path`] walks a '/'-separated path through
//! any mix of them, following soft links.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::attribute::AttributeMessage;
use crate::btree_v1::{collect_group_leaves, find_group_leaf};
use crate::btree_v2::{collect_records, BTreeV2Header, Record};
use crate::cursor::Sizes;
use crate::error::{FormatError, Result};
use crate::fractal_heap::FractalHeap;
use crate::link::{LinkMessage, LinkTarget};
use crate::local_heap::LocalHeap;
use crate::message_type::MessageType;
use crate::messages::{Message, MessageRegistry};
use crate::object_header::{shared_target, ObjectHeader};
use crate::symbol_table::{EntryCache, GroupSymbolTableNode, SymbolTableEntry, SymbolTableMessage};

/// Soft links followed while resolving one path before giving up.
pub const MAX_SOFT_LINK_HOPS: usize = 16;

/// Where object headers come from. The session layer caches them; the
/// engine only needs the bytes and a way to get a decoded header.
pub trait ObjectSource {
    fn data(&self) -> &[u8];

    fn sizes(&self) -> Sizes;

    /// Object header address of the root group.
    fn root_address(&self) -> u64;

    /// The decoded header at `address`, with shared messages resolved.
    fn object_header(&self, address: u64) -> Result<Arc<ObjectHeader>>;
}

/// An uncached [`ObjectSource`] over a byte slice.
#[derive(Debug, Clone)]
pub struct RawSource<'a> {
    data: &'a [u8],
    sizes: Sizes,
    root: u64,
    registry: MessageRegistry,
}

impl<'a> RawSource<'a> {
    pub fn new(data: &'a [u8], sizes: Sizes, root: u64) -> Self {
        RawSource {
            data,
            sizes,
            root,
            registry: MessageRegistry::default(),
        }
    }

    pub fn with_registry(mut self, registry: MessageRegistry) -> Self {
        self.registry = registry;
        self
    }
}

impl ObjectSource for RawSource<'_> {
    fn data(&self) -> &[u8] {
        self.data
    }

    fn sizes(&self) -> Sizes {
        self.sizes
    }

    fn root_address(&self) -> u64 {
        self.root
    }

    fn object_header(&self, address: u64) -> Result<Arc<ObjectHeader>> {
        load_header(self.data, address, self.sizes, &self.registry)
    }
}

/// Decode the header at `address` and resolve its shared messages against
/// the headers they point to.
pub fn load_header(data: &[u8], address: u64, sizes: Sizes, registry: &MessageRegistry) -> Result<Arc<ObjectHeader>> {
    let mut header = ObjectHeader::read(data, address, sizes, registry)?;
    if header.needs_resolution() {
        header.resolve_shared(|a| ObjectHeader::read(data, a, sizes, registry).map(Arc::new))?;
    }
    Ok(Arc::new(header))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Group,
    Dataset,
    /// A committed (named) datatype.
    Datatype,
}

impl ObjectKind {
    pub fn of(header: &ObjectHeader) -> ObjectKind {
        if header.layout().is_some() {
            ObjectKind::Dataset
        } else if !is_group(header) && header.datatype().is_some() {
            ObjectKind::Datatype
        } else {
            ObjectKind::Group
        }
    }
}

/// A resolved path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    /// Absolute, normalized path; the root is "/".
    pub path: String,
    pub address: u64,
    pub kind: ObjectKind,
}

/// A named entry of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub name: String,
    pub target: LinkTarget,
}

/// Whether `header` describes a group.
pub fn is_group(header: &ObjectHeader) -> bool {
    header.symbol_table().is_some()
        || header.link_info().is_some()
        || header.has(MessageType::GroupInfo)
        || !header.links().is_empty()
}

fn symbol_table_member(data: &[u8], heap: &LocalHeap, entry: &SymbolTableEntry) -> Result<GroupMember> {
    let name = heap.string_at(data, entry.link_name_offset)?;
    let target = match entry.cache {
        EntryCache::SoftLink { link_value_offset } => {
            LinkTarget::Soft(heap.string_at(data, u64::from(link_value_offset))?)
        }
        _ => LinkTarget::Hard(entry.object_header_address),
    };
    Ok(GroupMember { name, target })
}

fn symbol_table_members(data: &[u8], sizes: Sizes, st: &SymbolTableMessage) -> Result<Vec<GroupMember>> {
    let heap = LocalHeap::read(data, st.local_heap_address, sizes)?;
    let mut out = Vec::new();
    for node_address in collect_group_leaves(data, st.btree_address, sizes)? {
        let node = GroupSymbolTableNode::read(data, node_address, sizes)?;
        for entry in &node.entries {
            out.push(symbol_table_member(data, &heap, entry)?);
        }
    }
    Ok(out)
}

/// Heap objects named by a B-tree v2 index of `tree_type` 5 or 8.
fn dense_objects(data: &[u8], sizes: Sizes, heap_address: u64, index_address: u64, tree_type: u8) -> Result<Vec<Vec<u8>>> {
    let heap = FractalHeap::read(data, heap_address, sizes)?;
    let index = BTreeV2Header::read(data, index_address, sizes)?;
    if index.tree_type != tree_type {
        return Err(FormatError::malformed(
            "B-tree v2 header",
            index_address,
            format!("record type {}, expected {tree_type}", index.tree_type),
        ));
    }
    collect_records(data, &index, sizes)?
        .into_iter()
        .map(|raw| {
            let heap_id = match Record::decode(tree_type, raw, sizes, None)? {
                Record::LinkName { heap_id, .. } | Record::AttributeName { heap_id, .. } => heap_id,
                other => {
                    return Err(FormatError::malformed(
                        "B-tree v2 record",
                        index_address,
                        format!("unexpected record {other:?} in a name index"),
                    ))
                }
            };
            heap.read_object(data, heap_id, sizes)
        })
        .collect()
}

fn link_members<S: ObjectSource + ?Sized>(source: &S, header: &ObjectHeader) -> Result<Vec<GroupMember>> {
    let mut out: Vec<GroupMember> = header
        .links()
        .into_iter()
        .map(|l| GroupMember {
            name: l.name.clone(),
            target: l.target.clone(),
        })
        .collect();
    if let Some(info) = header.link_info() {
        if let (Some(heap), Some(index)) = (info.fractal_heap_address, info.name_index_address) {
            for raw in dense_objects(source.data(), source.sizes(), heap, index, 5)? {
                let link = LinkMessage::parse(&raw, source.sizes())?;
                out.push(GroupMember {
                    name: link.name,
                    target: link.target,
                });
            }
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Every member of the group `header`, in name order.
pub fn group_members<S: ObjectSource + ?Sized>(source: &S, header: &ObjectHeader) -> Result<Vec<GroupMember>> {
    match header.symbol_table() {
        Some(st) => symbol_table_members(source.data(), source.sizes(), st),
        None => link_members(source, header),
    }
}

/// Look up one member of the group `header` by exact name.
pub fn find_member<S: ObjectSource + ?Sized>(source: &S, header: &ObjectHeader, name: &str) -> Result<Option<GroupMember>> {
    let Some(st) = header.symbol_table() else {
        if let Some(l) = header.links().into_iter().find(|l| l.name == name) {
            return Ok(Some(GroupMember {
                name: l.name.clone(),
                target: l.target.clone(),
            }));
        }
        return Ok(link_members(source, header)?.into_iter().find(|m| m.name == name));
    };

    let (data, sizes) = (source.data(), source.sizes());
    let heap = LocalHeap::read(data, st.local_heap_address, sizes)?;
    let Some(node_address) = find_group_leaf(data, st.btree_address, sizes, &heap, name.as_bytes())? else {
        return Ok(None);
    };
    let node = GroupSymbolTableNode::read(data, node_address, sizes)?;
    for entry in &node.entries {
        if heap.bytes_at(data, entry.link_name_offset)? == name.as_bytes() {
            return symbol_table_member(data, &heap, entry).map(Some);
        }
    }
    Ok(None)
}

fn join(parts: &[String]) -> String {
    if parts.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", parts.join("/"))
    }
}

fn components(path: &str) -> impl Iterator<Item = String> + '_ {
    path.split('/').filter(|c| !c.is_empty() && *c != ".").map(str::to_string)
}

/// Resolve an absolute (or root-relative) path to the object it names.
pub fn resolve_path<S: ObjectSource + ?Sized>(source: &S, path: &str) -> Result<ObjectLocation> {
    let requested: Vec<String> = components(path).collect();
    let mut pending: VecDeque<String> = requested.iter().cloned().collect();
    // Group addresses along the walk, so relative soft links start in the
    // group that holds them.
    let mut trail: Vec<(String, u64)> = Vec::new();
    let mut address = source.root_address();
    let mut hops = 0usize;
    let walked = |trail: &[(String, u64)]| trail.iter().map(|(n, _)| n.clone()).collect::<Vec<_>>();

    while let Some(name) = pending.pop_front() {
        let header = source.object_header(address)?;
        if !is_group(&header) {
            return Err(FormatError::NotAGroup(join(&walked(&trail))));
        }
        let Some(member) = find_member(source, &header, &name)? else {
            let mut missing = walked(&trail);
            missing.push(name);
            return Err(FormatError::PathNotFound(join(&missing)));
        };
        match member.target {
            LinkTarget::Hard(target) => {
                trail.push((name, address));
                address = target;
            }
            LinkTarget::Soft(target) => {
                hops += 1;
                if hops > MAX_SOFT_LINK_HOPS {
                    return Err(FormatError::malformed(
                        "soft link",
                        address,
                        format!("more than {MAX_SOFT_LINK_HOPS} soft links resolving {path}"),
                    ));
                }
                if target.starts_with('/') {
                    trail.clear();
                    address = source.root_address();
                }
                for (i, c) in components(&target).enumerate() {
                    pending.insert(i, c);
                }
            }
            LinkTarget::External { file, path: target } => {
                return Err(FormatError::Unsupported(format!(
                    "external link {name} to {file}:{target}"
                )))
            }
            LinkTarget::UserDefined { link_type, .. } => {
                return Err(FormatError::Unsupported(format!(
                    "user-defined link {name} of type {link_type}"
                )))
            }
        }
    }

    let header = source.object_header(address)?;
    Ok(ObjectLocation {
        path: join(&requested),
        address,
        kind: ObjectKind::of(&header),
    })
}

/// The attributes of one object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes {
    pub decoded: Vec<AttributeMessage>,
    /// Attributes that are present but could not be decoded.
    pub failed: Vec<FormatError>,
}

/// Every attribute of `header`: the compact ones in its messages followed
/// by any in dense storage. An attribute that cannot be decoded lands in
/// [`Attributes::failed`] and does not hide the others.
pub fn attributes<S: ObjectSource + ?Sized>(source: &S, header: &ObjectHeader) -> Result<Attributes> {
    let mut out = Attributes {
        decoded: header.attributes().into_iter().cloned().collect(),
        failed: header
            .undecodable()
            .filter(|(t, _)| *t == MessageType::Attribute)
            .map(|(_, e)| e.clone())
            .collect(),
    };
    if let Some(info) = header.attribute_info() {
        if let (Some(heap), Some(index)) = (info.fractal_heap_address, info.name_index_address) {
            for raw in dense_objects(source.data(), source.sizes(), heap, index, 8)? {
                let decoded = AttributeMessage::decode(&raw, source.sizes()).and_then(|m| match m {
                    Message::Attribute(a) => Ok(a),
                    Message::SharedAttribute(a) => {
                        a.resolve(|r| shared_target(header.address, r, &mut |at| source.object_header(at)))
                    }
                    _ => Err(FormatError::malformed("attribute message", heap, "not an attribute")),
                });
                match decoded {
                    Ok(a) => out.decoded.push(a),
                    Err(e) => out.failed.push(e),
                }
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::tests::{encode_v3, scalar_i32};
    use crate::datatype::tests::int_type;
    use crate::btree_v1::tests::encode_group_node;
    use crate::btree_v2::tests::{encode_header, encode_leaf};
    use crate::data_layout::tests::contiguous_v3;
    use crate::fractal_heap::tests::{encode_direct_block, encode_header as encode_heap, managed_id, HeapParams};
    use crate::link::tests::{dense_info, external, hard, soft};
    use crate::local_heap::tests::append_heap;
    use crate::object_header::tests::{append_v1, append_v2};
    use crate::symbol_table::tests::{encode_entry, push_offset};

    const LINK: u8 = 0x06;
    const LAYOUT: u8 = 0x08;
    const LINK_INFO: u8 = 0x02;
    const ATTRIBUTE: u8 = 0x0C;
    const ATTRIBUTE_INFO: u8 = 0x15;

    /// root: a -> group, s -> soft "/a/d", ext -> external,
    /// loop -> soft "/loop"; a: d -> dataset, same -> soft "d"
    fn link_file() -> (Vec<u8>, u64, u64, u64) {
        let mut buf = vec![0u8; 8];
        let dset = append_v2(&mut buf, &[(LAYOUT, 0, &contiguous_v3(u64::MAX, 0))]);
        let group = append_v2(&mut buf, &[(LINK, 0, &hard("d", dset)), (LINK, 0, &soft("same", "d"))]);
        let root = append_v2(
            &mut buf,
            &[
                (LINK, 0, &hard("a", group)),
                (LINK, 0, &soft("s", "/a/d")),
                (LINK, 0, &external("ext", "other.h5", "/x")),
                (LINK, 0, &soft("loop", "/loop")),
            ],
        );
        (buf, root, group, dset)
    }

    #[test]
    fn resolve_through_hard_and_soft_links() {
        let (buf, root, group, dset) = link_file();
        let src = RawSource::new(&buf, Sizes::default(), root);

        let loc = resolve_path(&src, "/a/d").unwrap();
        assert_eq!(loc.address, dset);
        assert_eq!(loc.kind, ObjectKind::Dataset);
        assert_eq!(loc.path, "/a/d");
        assert_eq!(resolve_path(&src, "a//d/").unwrap(), loc);

        assert_eq!(resolve_path(&src, "/s").unwrap().address, dset);
        // relative soft link stays in its group
        assert_eq!(resolve_path(&src, "/a/same").unwrap().address, dset);

        let g = resolve_path(&src, "/a").unwrap();
        assert_eq!((g.address, g.kind), (group, ObjectKind::Group));
        let r = resolve_path(&src, "/").unwrap();
        assert_eq!((r.address, r.path.as_str()), (root, "/"));
    }

    #[test]
    fn resolution_errors() {
        let (buf, root, _, _) = link_file();
        let src = RawSource::new(&buf, Sizes::default(), root);
        assert_eq!(
            resolve_path(&src, "/a/missing").unwrap_err(),
            FormatError::PathNotFound("/a/missing".into())
        );
        assert_eq!(
            resolve_path(&src, "/a/d/deeper").unwrap_err(),
            FormatError::NotAGroup("/a/d".into())
        );
        let err = resolve_path(&src, "/ext").unwrap_err();
        assert!(matches!(&err, FormatError::Unsupported(m) if m.contains("other.h5")), "{err}");
        assert!(matches!(
            resolve_path(&src, "/loop"),
            Err(FormatError::Malformed { structure: "soft link", .. })
        ));
    }

    #[test]
    fn compact_members_sorted_by_name() {
        let (buf, root, group, _) = link_file();
        let src = RawSource::new(&buf, Sizes::default(), root);
        let header = src.object_header(root).unwrap();
        let names: Vec<_> = group_members(&src, &header).unwrap().into_iter().map(|m| m.name).collect();
        assert_eq!(names, vec!["a", "ext", "loop", "s"]);
        let a = find_member(&src, &header, "a").unwrap().unwrap();
        assert_eq!(a.target, LinkTarget::Hard(group));
        assert_eq!(find_member(&src, &header, "zz").unwrap(), None);
    }

    #[test]
    fn symbol_table_group() {
        let sizes = Sizes::default();
        let mut buf = vec![0u8; 8];
        let dset = append_v2(&mut buf, &[(LAYOUT, 0, &contiguous_v3(u64::MAX, 0))]);
        let (heap, offs) = append_heap(&mut buf, &["alpha", "beta", "/alpha"]);

        let snod = buf.len() as u64;
        buf.extend_from_slice(b"SNOD");
        buf.extend_from_slice(&[1, 0]);
        buf.extend_from_slice(&2u16.to_le_bytes());
        encode_entry(&mut buf, offs[0], dset, EntryCache::None, sizes);
        encode_entry(
            &mut buf,
            offs[1],
            u64::MAX,
            EntryCache::SoftLink {
                link_value_offset: offs[2] as u32,
            },
            sizes,
        );
        let btree = buf.len() as u64;
        buf.extend_from_slice(&encode_group_node(0, &[0, offs[1]], &[snod]));

        let mut st = Vec::new();
        push_offset(&mut st, btree, 8);
        push_offset(&mut st, heap, 8);
        let root = append_v1(&mut buf, &[(0x0011, 0, &st)], 0);

        let src = RawSource::new(&buf, sizes, root);
        let header = src.object_header(root).unwrap();
        let members = group_members(&src, &header).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].target, LinkTarget::Soft("/alpha".into()));
        assert_eq!(
            find_member(&src, &header, "alpha").unwrap().unwrap().target,
            LinkTarget::Hard(dset)
        );
        assert_eq!(find_member(&src, &header, "gamma").unwrap(), None);
        assert_eq!(resolve_path(&src, "/beta").unwrap().address, dset);
    }

    fn place(data: &mut Vec<u8>, at: usize, bytes: &[u8]) {
        if data.len() < at + bytes.len() {
            data.resize(at + bytes.len(), 0);
        }
        data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Fractal heap at 0 with its root direct block at 0x400 holding
    /// `objects`, plus a B-tree v2 of `tree_type` naming them. Returns the
    /// B-tree header address.
    fn dense_storage(buf: &mut Vec<u8>, objects: &[Vec<u8>], tree_type: u8) -> u64 {
        let params = HeapParams {
            width: 4,
            start_block: 512,
            max_dblock: 65536,
            root: 0x400,
            root_rows: 0,
            checksum_dblocks: false,
        };
        place(buf, 0, &encode_heap(&params));
        let mut payload = Vec::new();
        let mut ids = Vec::new();
        for o in objects {
            ids.push(managed_id(32 + payload.len() as u16, o.len() as u16));
            payload.extend_from_slice(o);
        }
        place(buf, 0x400, &encode_direct_block(512, 0, 32, &payload, false));

        let records: Vec<Vec<u8>> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| match tree_type {
                5 => {
                    let mut r = (i as u32).to_le_bytes().to_vec();
                    r.extend_from_slice(id);
                    r
                }
                _ => {
                    let mut r = id.clone();
                    r.resize(8, 0);
                    r.push(0);
                    r.extend_from_slice(&(i as u32).to_le_bytes());
                    r.extend_from_slice(&(i as u32).to_le_bytes());
                    r
                }
            })
            .collect();
        let record_size = records[0].len() as u16;
        let leaf = 0x600u64;
        place(buf, leaf as usize, &encode_leaf(tree_type, &records));
        let header = 0x800u64;
        place(
            buf,
            header as usize,
            &encode_header(tree_type, 512, record_size, 0, leaf, records.len() as u16, records.len() as u64),
        );
        header
    }

    #[test]
    fn dense_links_and_attributes() {
        let mut buf = Vec::new();
        let links = vec![hard("zeta", 0x900), soft("eta", "/zeta")];
        let name_index = dense_storage(&mut buf, &links, 5);
        buf.resize(0x900, 0);
        let root = append_v2(&mut buf, &[(LINK_INFO, 0, &dense_info(0, name_index))]);

        let src = RawSource::new(&buf, Sizes::default(), root);
        let header = src.object_header(root).unwrap();
        let members = group_members(&src, &header).unwrap();
        let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["eta", "zeta"]);
        assert_eq!(members[1].target, LinkTarget::Hard(0x900));
        assert_eq!(find_member(&src, &header, "eta").unwrap().unwrap().target, LinkTarget::Soft("/zeta".into()));

        let mut buf = Vec::new();
        // the committed datatype lands at 0x900
        let mut type_ref = vec![3, 2];
        push_offset(&mut type_ref, 0x900, 8);
        let mut shared = encode_v3("gain", &type_ref, &[2, 0, 0, 0], &7u16.to_le_bytes());
        shared[1] = 0x01;
        let broken = scalar_i32("broken", 3);
        let attrs = vec![
            scalar_i32("first", 1),
            shared,
            broken[..broken.len() - 2].to_vec(),
            scalar_i32("second", 2),
        ];
        let name_index = dense_storage(&mut buf, &attrs, 8);
        buf.resize(0x900, 0);
        append_v2(&mut buf, &[(0x03, 0, &int_type(2, false, false))]);
        let mut ainfo = vec![0, 0];
        push_offset(&mut ainfo, 0, 8);
        push_offset(&mut ainfo, name_index, 8);
        let obj = append_v2(
            &mut buf,
            &[(ATTRIBUTE, 0, &scalar_i32("inline", 0)), (ATTRIBUTE_INFO, 0, &ainfo)],
        );
        let src = RawSource::new(&buf, Sizes::default(), obj);
        let header = src.object_header(obj).unwrap();
        let found = attributes(&src, &header).unwrap();
        let names: Vec<_> = found.decoded.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["inline", "first", "gain", "second"]);
        assert_eq!(found.decoded[2].raw_data, 7u16.to_le_bytes().to_vec());
        assert!(matches!(found.failed[..], [FormatError::UnexpectedEof { .. }]));
    }
}
