//! Node tests, atomization and deep copies.
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeFactory, NodeKind, XdmNode};
use crate::types::{KindTest, NameTest, NodeTest};
use crate::xdm::{Sequence, XdmAtomicValue, XdmItem};

type Result<T> = std::result::Result<T, Error>;

fn name_matches<N: XdmNode>(node: &N, test: &NameTest) -> bool {
    match node.name() {
        Some(n) => test.matches(n.ns_uri.as_deref(), &n.local),
        None => false,
    }
}

/// `principal` is the node kind a bare name test selects on the current axis
/// (attributes on the attribute axis, elements everywhere else).
pub(crate) fn matches_test<N: XdmNode>(node: &N, test: &NodeTest, principal: NodeKind) -> bool {
    match test {
        NodeTest::Name(name) => node.kind() == principal && name_matches(node, name),
        NodeTest::Kind(kind) => matches_kind(node, kind),
    }
}

pub(crate) fn matches_kind<N: XdmNode>(node: &N, test: &KindTest) -> bool {
    let kind = node.kind();
    match test {
        KindTest::AnyKind => true,
        KindTest::Document(inner) => {
            kind == NodeKind::Document
                && inner.as_deref().is_none_or(|inner| {
                    let mut elements = node.children().filter(|c| c.kind() == NodeKind::Element);
                    matches!((elements.next(), elements.next()), (Some(e), None) if matches_kind(&e, inner))
                })
        }
        KindTest::Element(name) => {
            kind == NodeKind::Element && name.as_ref().is_none_or(|t| name_matches(node, t))
        }
        KindTest::Attribute(name) => {
            kind == NodeKind::Attribute && name.as_ref().is_none_or(|t| name_matches(node, t))
        }
        KindTest::SchemaElement(name) => {
            kind == NodeKind::Element && node.expanded_name().as_ref() == Some(name)
        }
        KindTest::SchemaAttribute(name) => {
            kind == NodeKind::Attribute && node.expanded_name().as_ref() == Some(name)
        }
        KindTest::Text => kind == NodeKind::Text,
        KindTest::Comment => kind == NodeKind::Comment,
        KindTest::ProcessingInstruction(target) => {
            kind == NodeKind::ProcessingInstruction
                && target
                    .as_ref()
                    .is_none_or(|t| node.name().is_some_and(|n| &n.local == t))
        }
        KindTest::NamespaceNode => false,
    }
}

/// Append the typed values of `item` to `out`. Arrays are flattened; function items
/// and maps have no typed value.
pub(crate) fn atomize_item<N: XdmNode>(item: XdmItem<N>, out: &mut Vec<XdmAtomicValue>) -> Result<()> {
    match item {
        XdmItem::Atomic(a) => out.push(a),
        XdmItem::Node(n) => out.push(n.typed_value()),
        XdmItem::Array(a) => {
            for member in a.members() {
                for inner in member {
                    atomize_item(inner.clone(), out)?;
                }
            }
        }
        XdmItem::Map(_) => {
            return Err(Error::from_code(ErrorCode::FOTY0013, "a map cannot be atomized"));
        }
        XdmItem::Function(f) => {
            return Err(Error::from_code(
                ErrorCode::FOTY0013,
                format!(
                    "function item {} cannot be atomized",
                    f.name.as_ref().map_or_else(|| "(anonymous)".to_string(), |n| n.display())
                ),
            ));
        }
    }
    Ok(())
}

pub(crate) fn atomize_vec<N: XdmNode>(seq: Sequence<N>) -> Result<Vec<XdmAtomicValue>> {
    let mut out = Vec::new();
    for item in seq {
        atomize_item(item?, &mut out)?;
    }
    Ok(out)
}

pub(crate) fn atomize_items<N: XdmNode>(items: &[XdmItem<N>]) -> Result<Vec<XdmAtomicValue>> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        atomize_item(item.clone(), &mut out)?;
    }
    Ok(out)
}

/// Atomize an operand that must hold at most one value; `what` names the operator in
/// the error message.
pub(crate) fn atomize_opt<N: XdmNode>(seq: Sequence<N>, what: &str) -> Result<Option<XdmAtomicValue>> {
    let mut out = Vec::with_capacity(1);
    for item in seq {
        atomize_item(item?, &mut out)?;
        if out.len() > 1 {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("operand of '{what}' is a sequence of more than one item"),
            ));
        }
    }
    Ok(out.pop())
}

/// Detached copy of `node` and its subtree, built through `factory`.
pub(crate) fn deep_copy<N: XdmNode>(factory: &dyn NodeFactory<N>, node: &N) -> Result<N> {
    match node.kind() {
        NodeKind::Document => {
            let doc = factory.create_document()?;
            for child in node.children() {
                let copy = deep_copy(factory, &child)?;
                factory.append_child(&doc, &copy)?;
            }
            Ok(doc)
        }
        NodeKind::Element => {
            let name = node
                .name()
                .ok_or_else(|| Error::from_code(ErrorCode::XUDY0021, "element node without a name"))?;
            let element = factory.create_element(&name)?;
            for attribute in node.attributes() {
                factory.append_attribute(&element, &attribute)?;
            }
            for child in node.children() {
                let copy = deep_copy(factory, &child)?;
                factory.append_child(&element, &copy)?;
            }
            Ok(element)
        }
        NodeKind::Attribute => {
            let name = node
                .name()
                .ok_or_else(|| Error::from_code(ErrorCode::XUDY0021, "attribute node without a name"))?;
            factory.create_attribute(&name, &node.data().unwrap_or_default())
        }
        NodeKind::Text => factory.create_text(&node.data().unwrap_or_default()),
        NodeKind::Comment => factory.create_comment(&node.data().unwrap_or_default()),
        NodeKind::ProcessingInstruction => {
            let target = node.name().map(|n| n.local).unwrap_or_default();
            factory.create_processing_instruction(&target, &node.data().unwrap_or_default())
        }
    }
}
