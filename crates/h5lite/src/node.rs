//! Named objects in the group tree.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use h5lite_format::attribute::AttributeMessage;
use h5lite_format::error::FormatError;
use h5lite_format::group::{self, GroupMember, ObjectKind, ObjectSource};
use h5lite_format::link::LinkTarget;
use h5lite_format::object_header::ObjectHeader;

use crate::dataset::Dataset;
use crate::error::{Error, Result};
use crate::file::File;
use crate::types::{attr_value, AttrValue};

#[derive(Clone)]
enum Origin {
    Root(File),
    Child(Arc<Node>),
}

/// A group, dataset or committed datatype, reached from the root through
/// its parents.
#[derive(Clone)]
pub struct Node {
    origin: Origin,
    name: String,
    path: String,
    address: u64,
    kind: ObjectKind,
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

impl Node {
    pub(crate) fn root(file: File) -> Node {
        let address = file.root_address();
        Node {
            origin: Origin::Root(file),
            name: String::new(),
            path: "/".to_string(),
            address,
            kind: ObjectKind::Group,
        }
    }

    /// The link name this node was reached by; empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Absolute path through the links followed to reach this node.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parent(&self) -> Option<&Node> {
        match &self.origin {
            Origin::Root(_) => None,
            Origin::Child(parent) => Some(&**parent),
        }
    }

    /// The file this node belongs to.
    pub fn file(&self) -> &File {
        let mut node = self;
        loop {
            match &node.origin {
                Origin::Root(file) => return file,
                Origin::Child(parent) => node = &**parent,
            }
        }
    }

    pub fn kind(&self) -> ObjectKind {
        self.kind
    }

    pub fn is_group(&self) -> bool {
        self.kind == ObjectKind::Group
    }

    pub fn is_dataset(&self) -> bool {
        self.kind == ObjectKind::Dataset
    }

    /// Object header address.
    pub fn address(&self) -> u64 {
        self.address
    }

    pub fn header(&self) -> Result<Arc<ObjectHeader>> {
        self.file().header(self.address)
    }

    /// Attribute messages, compact and dense, in storage order.
    /// Attributes that cannot be decoded are logged and left out.
    pub fn attribute_messages(&self) -> Result<Vec<AttributeMessage>> {
        Ok(self.all_attributes()?.decoded)
    }

    fn all_attributes(&self) -> Result<group::Attributes> {
        let header = self.header()?;
        let found = group::attributes(self.file(), &header)?;
        for error in &found.failed {
            debug!(path = %self.path, %error, "attribute not decoded");
        }
        Ok(found)
    }

    fn attribute_values(&self, attrs: Vec<AttributeMessage>) -> Result<BTreeMap<String, AttrValue>> {
        let file = self.file();
        let mut out = BTreeMap::new();
        for attr in attrs {
            match attr_value(&attr, file.data(), file.sizes())? {
                Some(value) => {
                    out.insert(attr.name, value);
                }
                None => debug!(path = %self.path, name = %attr.name, class = attr.datatype.class_name(), "attribute skipped"),
            }
        }
        Ok(out)
    }

    /// Attributes with a value mapping, by name. Attributes of other
    /// classes are left out; [`Node::attribute_messages`] has them all.
    pub fn attributes(&self) -> Result<BTreeMap<String, AttrValue>> {
        self.attribute_values(self.attribute_messages()?)
    }

    /// One attribute by name. When no decoded attribute has that name but
    /// some attribute failed to decode, its error is returned.
    pub fn attribute(&self, name: &str) -> Result<Option<AttrValue>> {
        let found = self.all_attributes()?;
        let failed = found.failed;
        let value = self.attribute_values(found.decoded)?.remove(name);
        match (value, failed.into_iter().next()) {
            (None, Some(error)) => Err(error.into()),
            (value, _) => Ok(value),
        }
    }

    fn group_header(&self) -> Result<Arc<ObjectHeader>> {
        let header = self.header()?;
        if !group::is_group(&header) {
            return Err(FormatError::NotAGroup(self.path.clone()).into());
        }
        Ok(header)
    }

    /// Links of this group in name order, unresolved.
    pub fn members(&self) -> Result<Vec<GroupMember>> {
        let header = self.group_header()?;
        Ok(group::group_members(self.file(), &header)?)
    }

    fn member_node(&self, member: GroupMember) -> Result<Node> {
        let file = self.file();
        let path = join(&self.path, &member.name);
        let address = match member.target {
            LinkTarget::Hard(address) => address,
            LinkTarget::Soft(target) => {
                let absolute = if target.starts_with('/') {
                    target
                } else {
                    join(&self.path, &target)
                };
                file.resolve(&absolute)?.address
            }
            LinkTarget::External { file: name, path: target } => {
                return Err(FormatError::Unsupported(format!(
                    "external link {path} to {name}:{target}"
                ))
                .into())
            }
            LinkTarget::UserDefined { link_type, .. } => {
                return Err(FormatError::Unsupported(format!(
                    "user-defined link {path} of type {link_type}"
                ))
                .into())
            }
        };
        let kind = ObjectKind::of(&*file.header(address)?);
        Ok(Node {
            origin: Origin::Child(Arc::new(self.clone())),
            name: member.name,
            path,
            address,
            kind,
        })
    }

    /// The members of this group that resolve inside the file. External,
    /// user-defined and dangling soft links are left out.
    pub fn children(&self) -> Result<Vec<Node>> {
        let mut out = Vec::new();
        for member in self.members()? {
            let name = member.name.clone();
            match self.member_node(member) {
                Ok(node) => out.push(node),
                Err(Error::Format(
                    e @ (FormatError::Unsupported(_) | FormatError::PathNotFound(_) | FormatError::NotAGroup(_)),
                )) => {
                    debug!(path = %self.path, name = %name, error = %e, "link not followed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(out)
    }

    /// The member called `name`.
    pub fn child(&self, name: &str) -> Result<Node> {
        let header = self.group_header()?;
        let member = group::find_member(self.file(), &header, name)?
            .ok_or_else(|| FormatError::PathNotFound(join(&self.path, name)))?;
        self.member_node(member)
    }

    /// Walk `path` from this node; a leading '/' starts from the root.
    pub fn get(&self, path: &str) -> Result<Node> {
        let mut node = if path.starts_with('/') {
            self.file().root()
        } else {
            self.clone()
        };
        for name in path.split('/').filter(|c| !c.is_empty() && *c != ".") {
            node = node.child(name)?;
        }
        Ok(node)
    }

    pub fn as_dataset(&self) -> Result<Dataset> {
        if self.kind != ObjectKind::Dataset {
            return Err(Error::NotADataset(self.path.clone()));
        }
        Ok(Dataset::new(self.clone(), self.header()?))
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("address", &format_args!("{:#x}", self.address))
            .field("kind", &self.kind)
            .finish()
    }
}
