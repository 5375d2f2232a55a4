//! Tree adapter contract: how the engine reads, constructs and mutates host trees.
use crate::engine::runtime::Error;
use crate::xdm::{ExpandedName, XdmAtomicValue};
use string_cache::DefaultAtom;

pub mod simple;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            ns_uri: None,
        }
    }

    pub fn new(prefix: Option<String>, local: impl Into<String>, ns_uri: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
            local: local.into(),
            ns_uri: ns_uri.filter(|u| !u.is_empty()),
        }
    }

    pub fn expanded(&self) -> ExpandedName {
        ExpandedName::new(self.ns_uri.clone(), self.local.clone())
    }

    /// Lexical `prefix:local` form.
    pub fn lexical(&self) -> String {
        match &self.prefix {
            Some(p) => format!("{p}:{}", self.local),
            None => self.local.clone(),
        }
    }
}

/// Pre-computed neighbour filter handed to the adapter by axis cursors.
///
/// Adapters that index their children by kind or name can answer bucketed
/// navigation without visiting every sibling; the default trait methods just filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Bucket {
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    /// Elements with this local name.
    Named(DefaultAtom),
}

impl Bucket {
    pub fn named(local: &str) -> Self {
        Bucket::Named(DefaultAtom::from(local))
    }

    pub fn admits<N: XdmNode>(&self, node: &N) -> bool {
        let kind = node.kind();
        match self {
            Bucket::Document => kind == NodeKind::Document,
            Bucket::Element => kind == NodeKind::Element,
            Bucket::Attribute => kind == NodeKind::Attribute,
            Bucket::Text => kind == NodeKind::Text,
            Bucket::Comment => kind == NodeKind::Comment,
            Bucket::ProcessingInstruction => kind == NodeKind::ProcessingInstruction,
            Bucket::Named(local) => {
                kind == NodeKind::Element && node.name().is_some_and(|n| &**local == n.local.as_str())
            }
        }
    }
}

fn admitted<N: XdmNode>(bucket: Option<&Bucket>, node: &N) -> bool {
    bucket.is_none_or(|b| b.admits(node))
}

/// Read-only navigation over a host tree.
///
/// Node identity is `Eq`/`Hash`; two handles are equal exactly when they denote the same node.
pub trait XdmNode: Clone + Eq + core::hash::Hash + core::fmt::Debug + Send + Sync + 'static {
    type Children<'a>: Iterator<Item = Self> + 'a
    where
        Self: 'a;
    type Attributes<'a>: Iterator<Item = Self> + 'a
    where
        Self: 'a;

    fn kind(&self) -> NodeKind;
    fn name(&self) -> Option<QName>;
    /// Content of text, comment, attribute and processing-instruction nodes.
    fn data(&self) -> Option<String>;
    fn parent(&self) -> Option<Self>;
    fn children(&self) -> Self::Children<'_>;
    fn attributes(&self) -> Self::Attributes<'_>;

    fn base_uri(&self) -> Option<String> {
        None
    }

    /// Optional total-order hint. When both nodes return a key the engine compares
    /// keys instead of walking ancestor chains.
    fn doc_order_key(&self) -> Option<u64> {
        None
    }

    fn string_value(&self) -> String {
        match self.kind() {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                fn collect<N: XdmNode>(n: &N, out: &mut String) {
                    for c in n.children() {
                        match c.kind() {
                            NodeKind::Text => out.push_str(&c.data().unwrap_or_default()),
                            NodeKind::Element => collect(&c, out),
                            _ => {}
                        }
                    }
                }
                collect(self, &mut out);
                out
            }
            _ => self.data().unwrap_or_default(),
        }
    }

    /// Typed value of an untyped tree: comments and PIs yield xs:string, everything else
    /// xs:untypedAtomic.
    fn typed_value(&self) -> XdmAtomicValue {
        match self.kind() {
            NodeKind::Comment | NodeKind::ProcessingInstruction => {
                XdmAtomicValue::String(self.string_value())
            }
            _ => XdmAtomicValue::UntypedAtomic(self.string_value()),
        }
    }

    fn expanded_name(&self) -> Option<ExpandedName> {
        self.name().map(|q| q.expanded())
    }

    /// Position among the parent's attributes followed by its children.
    fn index_in_parent(&self) -> Option<usize> {
        let parent = self.parent()?;
        if self.kind() == NodeKind::Attribute {
            return parent.attributes().position(|a| a == *self);
        }
        let attrs = parent.attributes().count();
        parent.children().position(|c| c == *self).map(|i| attrs + i)
    }

    fn first_child(&self, bucket: Option<&Bucket>) -> Option<Self> {
        self.children().find(|c| admitted(bucket, c))
    }

    fn last_child(&self, bucket: Option<&Bucket>) -> Option<Self> {
        self.children().filter(|c| admitted(bucket, c)).last()
    }

    fn next_sibling(&self, bucket: Option<&Bucket>) -> Option<Self> {
        if self.kind() == NodeKind::Attribute {
            return None;
        }
        let parent = self.parent()?;
        let mut siblings = parent.children().skip_while(|c| c != self);
        siblings.next();
        siblings.find(|c| admitted(bucket, c))
    }

    fn previous_sibling(&self, bucket: Option<&Bucket>) -> Option<Self> {
        if self.kind() == NodeKind::Attribute {
            return None;
        }
        let parent = self.parent()?;
        parent
            .children()
            .take_while(|c| c != self)
            .filter(|c| admitted(bucket, c))
            .last()
    }

    fn child_nodes(&self, bucket: Option<&Bucket>) -> Vec<Self> {
        self.children().filter(|c| admitted(bucket, c)).collect()
    }

    fn all_attributes(&self) -> Vec<Self> {
        self.attributes().collect()
    }

    fn attribute(&self, name: &ExpandedName) -> Option<Self> {
        self.attributes()
            .find(|a| a.expanded_name().as_ref() == Some(name))
    }

    fn root(&self) -> Self {
        let mut cur = self.clone();
        while let Some(p) = cur.parent() {
            cur = p;
        }
        cur
    }

    fn is_ancestor_of(&self, other: &Self) -> bool {
        let mut cur = other.parent();
        while let Some(p) = cur {
            if p == *self {
                return true;
            }
            cur = p.parent();
        }
        false
    }
}

/// Mutation primitives used when applying a pending update list.
pub trait DocumentWriter<N>: Send + Sync {
    /// Attach `node` as a child of `parent`, before `before` or at the end when `None`.
    /// A node that already has a parent is moved.
    fn insert_before(&self, parent: &N, node: &N, before: Option<&N>) -> Result<(), Error>;
    fn remove_child(&self, parent: &N, node: &N) -> Result<(), Error>;
    fn set_attribute_ns(&self, element: &N, name: &QName, value: &str) -> Result<(), Error>;
    fn remove_attribute_ns(&self, element: &N, name: &ExpandedName) -> Result<(), Error>;
    /// Replace the content of a text, comment, attribute or processing-instruction node.
    fn set_data(&self, node: &N, value: &str) -> Result<(), Error>;

    /// Rename in place. Returns `false` when the adapter cannot, in which case the
    /// node is rebuilt under the new name and swapped in.
    fn set_name(&self, _node: &N, _name: &QName) -> Result<bool, Error> {
        Ok(false)
    }
}

/// Creates detached nodes and assembles them into new trees.
pub trait NodeFactory<N>: Send + Sync {
    fn create_document(&self) -> Result<N, Error>;
    fn create_element(&self, name: &QName) -> Result<N, Error>;
    fn create_attribute(&self, name: &QName, value: &str) -> Result<N, Error>;
    fn create_text(&self, value: &str) -> Result<N, Error>;
    fn create_comment(&self, value: &str) -> Result<N, Error>;
    fn create_processing_instruction(&self, target: &str, data: &str) -> Result<N, Error>;
    /// Append `child` to a node this factory created. `child` may come from any tree
    /// and is copied when it belongs to another one.
    fn append_child(&self, parent: &N, child: &N) -> Result<N, Error>;
    fn append_attribute(&self, element: &N, attribute: &N) -> Result<N, Error>;
}
