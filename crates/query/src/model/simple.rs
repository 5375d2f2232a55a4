//! Arena-backed in-memory tree implementing the adapter traits, used in tests and
//! quick prototypes.
//!
//! Every tree lives in a `Store`; nodes are `{store, id}` handles and each record keeps
//! `{parent, index_in_parent}` instead of back-pointers.
//!
//! A store only grows. Detaching a subtree leaves its records in place, because a
//! handle to a removed node must keep reading that node and never a later one. The
//! memory goes away with the last handle into the store, so long-running update
//! loops should rebuild the tree (`to_builder().build()`) to compact it.
//!
//! ```
//! use sylva_query::model::simple::{attr, elem, text};
//! use sylva_query::model::XdmNode;
//!
//! // <root id="r"><child>Hello</child><child world="yes"/></root>
//! let root = elem("root")
//!     .attr(attr("id", "r"))
//!     .child(elem("child").child(text("Hello")))
//!     .child(elem("child").attr(attr("world", "yes")))
//!     .build();
//!
//! assert_eq!(root.name().unwrap().local, "root");
//! assert_eq!(root.children().count(), 2);
//! assert_eq!(root.string_value(), "Hello");
//! ```
use super::{Bucket, DocumentWriter, NodeFactory, NodeKind, QName, XdmNode};
use crate::engine::runtime::{Error, ErrorCode};
use crate::xdm::ExpandedName;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_STORE: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
struct NodeData {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    parent: Option<usize>,
    index_in_parent: usize,
    children: Vec<usize>,
    attributes: Vec<usize>,
}

impl NodeData {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        Self {
            kind,
            name,
            value,
            parent: None,
            index_in_parent: 0,
            children: Vec::new(),
            attributes: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Store {
    serial: u64,
    nodes: RwLock<Vec<NodeData>>,
}

impl Store {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            serial: NEXT_STORE.fetch_add(1, Ordering::Relaxed),
            nodes: RwLock::new(Vec::new()),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<NodeData>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<NodeData>> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a node in a `Store`.
#[derive(Clone)]
pub struct SimpleNode {
    store: Arc<Store>,
    id: usize,
}

impl PartialEq for SimpleNode {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.store, &other.store)
    }
}

impl Eq for SimpleNode {}

impl std::hash::Hash for SimpleNode {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.store.serial.hash(state);
        self.id.hash(state);
    }
}

impl fmt::Debug for SimpleNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nodes = self.store.read();
        let mut s = f.debug_struct("SimpleNode");
        s.field("id", &self.id);
        if let Some(d) = nodes.get(self.id) {
            s.field("kind", &d.kind).field("name", &d.name).field("value", &d.value);
        }
        s.finish()
    }
}

impl SimpleNode {
    fn at(&self, id: usize) -> SimpleNode {
        SimpleNode {
            store: self.store.clone(),
            id,
        }
    }

    fn same_store(&self, other: &SimpleNode) -> bool {
        Arc::ptr_eq(&self.store, &other.store)
    }

    fn with<R>(&self, f: impl FnOnce(&NodeData) -> R) -> Option<R> {
        self.store.read().get(self.id).map(f)
    }

    /// Detached copy of this subtree as a builder.
    pub fn to_builder(&self) -> SimpleNodeBuilder {
        let nodes = self.store.read();
        fn snapshot(nodes: &[NodeData], id: usize) -> SimpleNodeBuilder {
            let d = &nodes[id];
            SimpleNodeBuilder {
                kind: d.kind,
                name: d.name.clone(),
                value: d.value.clone(),
                attrs: d.attributes.iter().map(|&a| snapshot(nodes, a)).collect(),
                children: d.children.iter().map(|&c| snapshot(nodes, c)).collect(),
            }
        }
        snapshot(&nodes, self.id)
    }

    /// Lexical rendering of the subtree, for diagnostics and tests.
    pub fn to_xml(&self) -> String {
        let nodes = self.store.read();
        let mut out = String::new();
        fn escape(s: &str, attr: bool) -> String {
            let mut o = String::with_capacity(s.len());
            for c in s.chars() {
                match c {
                    '<' => o.push_str("&lt;"),
                    '&' => o.push_str("&amp;"),
                    '>' if !attr => o.push_str("&gt;"),
                    '"' if attr => o.push_str("&quot;"),
                    c => o.push(c),
                }
            }
            o
        }
        fn render(nodes: &[NodeData], id: usize, out: &mut String) {
            let d = &nodes[id];
            let name = d.name.as_ref().map(QName::lexical).unwrap_or_default();
            let value = d.value.clone().unwrap_or_default();
            match d.kind {
                NodeKind::Document => d.children.iter().for_each(|&c| render(nodes, c, out)),
                NodeKind::Element => {
                    out.push('<');
                    out.push_str(&name);
                    for &a in &d.attributes {
                        let ad = &nodes[a];
                        let an = ad.name.as_ref().map(QName::lexical).unwrap_or_default();
                        let av = ad.value.clone().unwrap_or_default();
                        out.push_str(&format!(" {an}=\"{}\"", escape(&av, true)));
                    }
                    if d.children.is_empty() {
                        out.push_str("/>");
                    } else {
                        out.push('>');
                        d.children.iter().for_each(|&c| render(nodes, c, out));
                        out.push_str(&format!("</{name}>"));
                    }
                }
                NodeKind::Attribute => out.push_str(&format!("{name}=\"{}\"", escape(&value, true))),
                NodeKind::Text => out.push_str(&escape(&value, false)),
                NodeKind::Comment => out.push_str(&format!("<!--{value}-->")),
                NodeKind::ProcessingInstruction => out.push_str(&format!("<?{name} {value}?>")),
            }
        }
        render(&nodes, self.id, &mut out);
        out
    }

    /// Copy `node`'s subtree into this node's store unless it already lives there.
    /// The copy appends new records; the foreign store is left untouched.
    fn adopt(&self, node: &SimpleNode) -> SimpleNode {
        if self.same_store(node) {
            return node.clone();
        }
        let spec = node.to_builder();
        let mut nodes = self.store.write();
        let id = spec.materialize(&mut nodes);
        self.at(id)
    }
}

fn reindex(nodes: &mut [NodeData], parent: usize) {
    let attrs = nodes[parent].attributes.clone();
    for (i, a) in attrs.into_iter().enumerate() {
        nodes[a].index_in_parent = i;
    }
    let children = nodes[parent].children.clone();
    for (i, c) in children.into_iter().enumerate() {
        nodes[c].index_in_parent = i;
    }
}

fn detach(nodes: &mut [NodeData], id: usize) {
    let Some(parent) = nodes[id].parent.take() else {
        return;
    };
    let is_attr = nodes[id].kind == NodeKind::Attribute;
    let list = if is_attr {
        &mut nodes[parent].attributes
    } else {
        &mut nodes[parent].children
    };
    list.retain(|&c| c != id);
    reindex(nodes, parent);
}

impl XdmNode for SimpleNode {
    type Children<'a> = std::vec::IntoIter<SimpleNode>;
    type Attributes<'a> = std::vec::IntoIter<SimpleNode>;

    fn kind(&self) -> NodeKind {
        self.with(|d| d.kind).unwrap_or(NodeKind::Text)
    }

    fn name(&self) -> Option<QName> {
        self.with(|d| d.name.clone()).flatten()
    }

    fn data(&self) -> Option<String> {
        self.with(|d| d.value.clone()).flatten()
    }

    fn parent(&self) -> Option<Self> {
        self.with(|d| d.parent).flatten().map(|p| self.at(p))
    }

    fn children(&self) -> Self::Children<'_> {
        let ids = self.with(|d| d.children.clone()).unwrap_or_default();
        ids.into_iter()
            .map(|id| self.at(id))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn attributes(&self) -> Self::Attributes<'_> {
        let ids = self.with(|d| d.attributes.clone()).unwrap_or_default();
        ids.into_iter()
            .map(|id| self.at(id))
            .collect::<Vec<_>>()
            .into_iter()
    }

    fn string_value(&self) -> String {
        let nodes = self.store.read();
        fn collect(nodes: &[NodeData], id: usize, out: &mut String) {
            for &c in &nodes[id].children {
                match nodes[c].kind {
                    NodeKind::Text => out.push_str(nodes[c].value.as_deref().unwrap_or_default()),
                    NodeKind::Element => collect(nodes, c, out),
                    _ => {}
                }
            }
        }
        let Some(d) = nodes.get(self.id) else {
            return String::new();
        };
        match d.kind {
            NodeKind::Document | NodeKind::Element => {
                let mut out = String::new();
                collect(&nodes, self.id, &mut out);
                out
            }
            _ => d.value.clone().unwrap_or_default(),
        }
    }

    fn index_in_parent(&self) -> Option<usize> {
        let nodes = self.store.read();
        let d = nodes.get(self.id)?;
        let parent = d.parent?;
        if d.kind == NodeKind::Attribute {
            Some(d.index_in_parent)
        } else {
            Some(nodes[parent].attributes.len() + d.index_in_parent)
        }
    }

    fn first_child(&self, bucket: Option<&Bucket>) -> Option<Self> {
        let first = self.with(|d| d.children.first().copied()).flatten()?;
        let n = self.at(first);
        if bucket.is_none_or(|b| b.admits(&n)) {
            Some(n)
        } else {
            n.next_sibling(bucket)
        }
    }

    fn next_sibling(&self, bucket: Option<&Bucket>) -> Option<Self> {
        let nodes = self.store.read();
        let d = nodes.get(self.id)?;
        if d.kind == NodeKind::Attribute {
            return None;
        }
        let siblings = &nodes[d.parent?].children;
        let ids: Vec<usize> = siblings[d.index_in_parent + 1..].to_vec();
        drop(nodes);
        ids.into_iter()
            .map(|id| self.at(id))
            .find(|n| bucket.is_none_or(|b| b.admits(n)))
    }

    fn previous_sibling(&self, bucket: Option<&Bucket>) -> Option<Self> {
        let nodes = self.store.read();
        let d = nodes.get(self.id)?;
        if d.kind == NodeKind::Attribute {
            return None;
        }
        let siblings = &nodes[d.parent?].children;
        let ids: Vec<usize> = siblings[..d.index_in_parent].to_vec();
        drop(nodes);
        ids.into_iter()
            .rev()
            .map(|id| self.at(id))
            .find(|n| bucket.is_none_or(|b| b.admits(n)))
    }
}

/// Detached tree description; `build()` materializes it into a fresh store.
#[derive(Debug, Clone)]
pub struct SimpleNodeBuilder {
    kind: NodeKind,
    name: Option<QName>,
    value: Option<String>,
    attrs: Vec<SimpleNodeBuilder>,
    children: Vec<SimpleNodeBuilder>,
}

impl SimpleNodeBuilder {
    fn new(kind: NodeKind, name: Option<QName>, value: Option<String>) -> Self {
        Self {
            kind,
            name,
            value,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn attr(mut self, attr: SimpleNodeBuilder) -> Self {
        debug_assert!(attr.kind == NodeKind::Attribute);
        self.attrs.push(attr);
        self
    }

    pub fn attrs<I: IntoIterator<Item = SimpleNodeBuilder>>(mut self, attrs: I) -> Self {
        self.attrs.extend(attrs);
        self
    }

    pub fn child(mut self, child: SimpleNodeBuilder) -> Self {
        self.children.push(child);
        self
    }

    pub fn children<I: IntoIterator<Item = SimpleNodeBuilder>>(mut self, it: I) -> Self {
        self.children.extend(it);
        self
    }

    pub fn build(self) -> SimpleNode {
        let store = Store::new();
        let id = {
            let mut nodes = store.write();
            self.materialize(&mut nodes)
        };
        SimpleNode { store, id }
    }

    fn materialize(self, nodes: &mut Vec<NodeData>) -> usize {
        let id = nodes.len();
        nodes.push(NodeData::new(self.kind, self.name, self.value));
        for (i, a) in self.attrs.into_iter().enumerate() {
            let aid = a.materialize(nodes);
            nodes[aid].parent = Some(id);
            nodes[aid].index_in_parent = i;
            nodes[id].attributes.push(aid);
        }
        for (i, c) in self.children.into_iter().enumerate() {
            let cid = c.materialize(nodes);
            nodes[cid].parent = Some(id);
            nodes[cid].index_in_parent = i;
            nodes[id].children.push(cid);
        }
        id
    }
}

/// `"p:local"` with the given namespace, or a plain local name.
fn qname_ns(ns_uri: Option<&str>, lexical: &str) -> QName {
    match lexical.split_once(':') {
        Some((p, l)) => QName::new(Some(p.to_string()), l, ns_uri.map(str::to_string)),
        None => QName::new(None, lexical, ns_uri.map(str::to_string)),
    }
}

pub fn doc() -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Document, None, None)
}

pub fn elem(name: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Element, Some(QName::local(name)), None)
}

pub fn elem_ns(ns_uri: &str, name: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Element, Some(qname_ns(Some(ns_uri), name)), None)
}

pub fn attr(name: &str, value: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(
        NodeKind::Attribute,
        Some(QName::local(name)),
        Some(value.to_string()),
    )
}

pub fn attr_ns(ns_uri: &str, name: &str, value: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(
        NodeKind::Attribute,
        Some(qname_ns(Some(ns_uri), name)),
        Some(value.to_string()),
    )
}

pub fn text(value: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Text, None, Some(value.to_string()))
}

pub fn comment(value: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(NodeKind::Comment, None, Some(value.to_string()))
}

pub fn pi(target: &str, data: &str) -> SimpleNodeBuilder {
    SimpleNodeBuilder::new(
        NodeKind::ProcessingInstruction,
        Some(QName::local(target)),
        Some(data.to_string()),
    )
}

/// Creates nodes inside one shared store.
pub struct SimpleNodeFactory {
    store: Arc<Store>,
}

impl Default for SimpleNodeFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl SimpleNodeFactory {
    pub fn new() -> Self {
        Self {
            store: Store::new(),
        }
    }

    /// Factory whose nodes live in the same store as `node`, so that inserting them
    /// into that tree needs no copy.
    pub fn for_document(node: &SimpleNode) -> Self {
        Self {
            store: node.store.clone(),
        }
    }

    /// Appends a record. Ids are never reused.
    fn create(&self, kind: NodeKind, name: Option<QName>, value: Option<String>) -> SimpleNode {
        let mut nodes = self.store.write();
        let id = nodes.len();
        nodes.push(NodeData::new(kind, name, value));
        SimpleNode {
            store: self.store.clone(),
            id,
        }
    }
}

impl NodeFactory<SimpleNode> for SimpleNodeFactory {
    fn create_document(&self) -> Result<SimpleNode, Error> {
        Ok(self.create(NodeKind::Document, None, None))
    }

    fn create_element(&self, name: &QName) -> Result<SimpleNode, Error> {
        Ok(self.create(NodeKind::Element, Some(name.clone()), None))
    }

    fn create_attribute(&self, name: &QName, value: &str) -> Result<SimpleNode, Error> {
        Ok(self.create(
            NodeKind::Attribute,
            Some(name.clone()),
            Some(value.to_string()),
        ))
    }

    fn create_text(&self, value: &str) -> Result<SimpleNode, Error> {
        Ok(self.create(NodeKind::Text, None, Some(value.to_string())))
    }

    fn create_comment(&self, value: &str) -> Result<SimpleNode, Error> {
        Ok(self.create(NodeKind::Comment, None, Some(value.to_string())))
    }

    fn create_processing_instruction(&self, target: &str, data: &str) -> Result<SimpleNode, Error> {
        Ok(self.create(
            NodeKind::ProcessingInstruction,
            Some(QName::local(target)),
            Some(data.to_string()),
        ))
    }

    fn append_child(&self, parent: &SimpleNode, child: &SimpleNode) -> Result<SimpleNode, Error> {
        let child = if child.parent().is_some() || !parent.same_store(child) {
            let copy = child.to_builder();
            let mut nodes = parent.store.write();
            parent.at(copy.materialize(&mut nodes))
        } else {
            child.clone()
        };
        SimpleDocumentWriter.insert_before(parent, &child, None)?;
        Ok(child)
    }

    fn append_attribute(&self, element: &SimpleNode, attribute: &SimpleNode) -> Result<SimpleNode, Error> {
        let name = attribute
            .name()
            .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "attribute without a name"))?;
        SimpleDocumentWriter.set_attribute_ns(element, &name, &attribute.data().unwrap_or_default())?;
        element
            .attribute(&name.expanded())
            .ok_or_else(|| Error::from_code(ErrorCode::ADPT0001, "attribute was not attached"))
    }
}

/// Applies mutations directly to the arena. Nodes from other stores are copied in.
#[derive(Debug, Default, Clone, Copy)]
pub struct SimpleDocumentWriter;

fn adapter_error(msg: &str) -> Error {
    Error::from_code(ErrorCode::ADPT0001, msg)
}

impl DocumentWriter<SimpleNode> for SimpleDocumentWriter {
    fn insert_before(
        &self,
        parent: &SimpleNode,
        node: &SimpleNode,
        before: Option<&SimpleNode>,
    ) -> Result<(), Error> {
        let node = parent.adopt(node);
        let mut nodes = parent.store.write();
        if nodes[node.id].kind == NodeKind::Attribute {
            return Err(adapter_error("attributes cannot be inserted as children"));
        }
        detach(&mut nodes, node.id);
        let pos = match before {
            Some(b) => {
                if !parent.same_store(b) || nodes[b.id].parent != Some(parent.id) {
                    return Err(adapter_error("reference node is not a child of the parent"));
                }
                nodes[b.id].index_in_parent
            }
            None => nodes[parent.id].children.len(),
        };
        nodes[parent.id].children.insert(pos, node.id);
        nodes[node.id].parent = Some(parent.id);
        reindex(&mut nodes, parent.id);
        Ok(())
    }

    fn remove_child(&self, parent: &SimpleNode, node: &SimpleNode) -> Result<(), Error> {
        if !parent.same_store(node) {
            return Err(adapter_error("node is not a child of the parent"));
        }
        let mut nodes = parent.store.write();
        if nodes[node.id].parent != Some(parent.id) {
            return Err(adapter_error("node is not a child of the parent"));
        }
        detach(&mut nodes, node.id);
        Ok(())
    }

    fn set_attribute_ns(&self, element: &SimpleNode, name: &QName, value: &str) -> Result<(), Error> {
        let mut nodes = element.store.write();
        if nodes[element.id].kind != NodeKind::Element {
            return Err(adapter_error("attributes can only be set on elements"));
        }
        let expanded = name.expanded();
        let existing = nodes[element.id]
            .attributes
            .iter()
            .copied()
            .find(|&a| nodes[a].name.as_ref().map(QName::expanded).as_ref() == Some(&expanded));
        match existing {
            Some(a) => {
                nodes[a].name = Some(name.clone());
                nodes[a].value = Some(value.to_string());
            }
            None => {
                let id = nodes.len();
                let mut data = NodeData::new(
                    NodeKind::Attribute,
                    Some(name.clone()),
                    Some(value.to_string()),
                );
                data.parent = Some(element.id);
                data.index_in_parent = nodes[element.id].attributes.len();
                nodes.push(data);
                nodes[element.id].attributes.push(id);
            }
        }
        Ok(())
    }

    fn remove_attribute_ns(&self, element: &SimpleNode, name: &ExpandedName) -> Result<(), Error> {
        let mut nodes = element.store.write();
        let found = nodes[element.id]
            .attributes
            .iter()
            .copied()
            .find(|&a| nodes[a].name.as_ref().map(QName::expanded).as_ref() == Some(name));
        if let Some(a) = found {
            detach(&mut nodes, a);
        }
        Ok(())
    }

    fn set_data(&self, node: &SimpleNode, value: &str) -> Result<(), Error> {
        let mut nodes = node.store.write();
        match nodes[node.id].kind {
            NodeKind::Document | NodeKind::Element => {
                Err(adapter_error("set_data requires a leaf node"))
            }
            _ => {
                nodes[node.id].value = Some(value.to_string());
                Ok(())
            }
        }
    }

    fn set_name(&self, node: &SimpleNode, name: &QName) -> Result<bool, Error> {
        let mut nodes = node.store.write();
        nodes[node.id].name = Some(name.clone());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siblings_follow_index_in_parent() {
        let root = elem("r")
            .child(elem("a"))
            .child(text("t"))
            .child(elem("b"))
            .build();
        let a = root.first_child(None).unwrap();
        let b = a.next_sibling(Some(&Bucket::Element)).unwrap();
        assert_eq!(b.name().unwrap().local, "b");
        assert_eq!(b.previous_sibling(Some(&Bucket::named("a"))), Some(a));
    }

    #[test]
    fn writer_moves_and_reindexes() {
        let root = elem("r").child(elem("a")).child(elem("b")).build();
        let kids: Vec<_> = root.children().collect();
        SimpleDocumentWriter
            .insert_before(&root, &kids[1], Some(&kids[0]))
            .unwrap();
        assert_eq!(root.to_xml(), "<r><b/><a/></r>");
        assert_eq!(kids[0].index_in_parent(), Some(1));
    }

    #[test]
    fn removed_nodes_keep_their_slot() {
        let root = elem("r").child(elem("a").child(text("kept"))).build();
        let a = root.first_child(None).unwrap();
        SimpleDocumentWriter.remove_child(&root, &a).unwrap();
        let factory = SimpleNodeFactory::for_document(&root);
        let fresh = factory.create_element(&QName::local("b")).unwrap();
        assert_ne!(fresh, a);
        assert!(a.parent().is_none());
        assert_eq!(a.name().unwrap().local, "a");
        assert_eq!(a.string_value(), "kept");
        assert_eq!(root.to_xml(), "<r/>");
    }

    #[test]
    fn foreign_nodes_are_copied_in() {
        let root = elem("r").build();
        let other = elem("x").attr(attr("k", "v")).build();
        SimpleDocumentWriter.insert_before(&root, &other, None).unwrap();
        assert_eq!(root.to_xml(), "<r><x k=\"v\"/></r>");
        assert!(other.parent().is_none());
    }
}
