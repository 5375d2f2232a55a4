//! Direct and computed node constructors.
use super::node_ops::atomize_items;
use super::{Env, EvalCtx, Focus, Result, eval_vec};
use crate::compiler::ir::{Content, CtorName, ExprRef};
use crate::consts::{XML_URI, XMLNS_URI};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeFactory, NodeKind, QName, XdmNode};
use crate::types::cast::parse_qname;
use crate::types::lexical::is_ncname;
use crate::xdm::{ExpandedName, Sequence, XdmAtomicValue, XdmItem};
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;

fn factory<N: XdmNode>(ctx: &EvalCtx<N>) -> Result<Arc<dyn NodeFactory<N>>> {
    ctx.dyn_ctx.node_factory().cloned()
}

/// Space-separated string value of the atomized items, or `None` for an empty input.
fn joined<N: XdmNode>(items: &[XdmItem<N>]) -> Result<Option<String>> {
    if items.is_empty() {
        return Ok(None);
    }
    let parts: Vec<String> = atomize_items(items)?.iter().map(XdmAtomicValue::string_value).collect();
    Ok(Some(parts.join(" ")))
}

/// String value of literal text and enclosed expressions, as used by attribute, comment
/// and processing-instruction content.
fn content_string<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    content: &[Content],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Option<String>> {
    let mut out: Option<String> = None;
    for part in content {
        let piece = match part {
            Content::Text(t) => Some(t.clone()),
            Content::Expr(e) => joined(&eval_vec(ctx, e, env, focus)?)?,
        };
        if let Some(p) = piece {
            out.get_or_insert_with(String::new).push_str(&p);
        }
    }
    Ok(out)
}

/// Resolve a computed element or attribute name.
pub(crate) fn computed_name<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    expr: &ExprRef,
    element: bool,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<QName> {
    let values = atomize_items(&eval_vec(ctx, expr, env, focus)?)?;
    let [value] = values.as_slice() else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            "a computed node name must be a single atomic value",
        ));
    };
    let qname = match value {
        XdmAtomicValue::QName { .. } => value.clone(),
        XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => {
            parse_qname(s.trim(), Some(&ctx.module.namespaces)).map_err(|e| {
                Error::from_code(ErrorCode::XQDY0074, format!("'{s}' is not a valid node name"))
                    .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
            })?
        }
        other => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("a computed node name cannot be of type {}", other.type_name()),
            ));
        }
    };
    let XdmAtomicValue::QName { ns_uri, prefix, local } = qname else {
        return Err(Error::from_code(ErrorCode::XQDY0074, "computed name is not a QName"));
    };
    let ns_uri = match (ns_uri, &prefix) {
        (None, None) if element => ctx.module.static_ctx.default_element_namespace.clone(),
        (uri, _) => uri,
    };
    Ok(QName::new(prefix, local, ns_uri))
}

fn ctor_name<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    name: &CtorName,
    element: bool,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<QName> {
    match name {
        CtorName::Static(q) => Ok(q.clone()),
        CtorName::Computed(e) => computed_name(ctx, e, element, env, focus),
    }
}

/// Accumulates constructor content into child nodes of `parent`.
struct ChildBuilder<'a, N> {
    factory: &'a dyn NodeFactory<N>,
    parent: N,
    text: String,
    has_children: bool,
    /// `None` for document nodes, which cannot carry attributes.
    attributes: Option<HashSet<ExpandedName>>,
}

impl<'a, N: XdmNode> ChildBuilder<'a, N> {
    fn new(factory: &'a dyn NodeFactory<N>, parent: N, accepts_attributes: bool) -> Self {
        Self {
            factory,
            parent,
            text: String::new(),
            has_children: false,
            attributes: accepts_attributes.then(HashSet::new),
        }
    }

    fn flush_text(&mut self) -> Result<()> {
        if self.text.is_empty() {
            return Ok(());
        }
        let node = self.factory.create_text(&self.text)?;
        self.factory.append_child(&self.parent, &node)?;
        self.text.clear();
        self.has_children = true;
        Ok(())
    }

    fn push_text(&mut self, text: &str) {
        self.text.push_str(text);
    }

    /// One enclosed expression's worth of items: adjacent atomics are joined by a space.
    fn push_items(&mut self, items: Vec<XdmItem<N>>) -> Result<()> {
        let mut previous_atomic = false;
        for item in items {
            match item {
                XdmItem::Atomic(a) => {
                    if previous_atomic {
                        self.text.push(' ');
                    }
                    self.text.push_str(&a.string_value());
                    previous_atomic = true;
                }
                XdmItem::Node(n) => {
                    previous_atomic = false;
                    self.push_node(&n)?;
                }
                XdmItem::Array(a) => {
                    let members: Vec<XdmItem<N>> = a.members().iter().flatten().cloned().collect();
                    self.push_items(members)?;
                    previous_atomic = false;
                }
                XdmItem::Function(_) | XdmItem::Map(_) => {
                    return Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        "a function item cannot be used as node content",
                    ));
                }
            }
        }
        Ok(())
    }

    fn push_node(&mut self, node: &N) -> Result<()> {
        match node.kind() {
            NodeKind::Attribute => {
                let Some(seen) = self.attributes.as_mut() else {
                    return Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        "a document node cannot contain attribute nodes",
                    ));
                };
                if self.has_children || !self.text.is_empty() {
                    return Err(Error::from_code(
                        ErrorCode::XQTY0024,
                        "attribute node follows non-attribute content",
                    ));
                }
                let name = node.expanded_name().unwrap_or_else(|| ExpandedName::new(None, ""));
                if !seen.insert(name.clone()) {
                    return Err(Error::from_code(
                        ErrorCode::XQDY0025,
                        format!("duplicate attribute {}", name.display()),
                    ));
                }
                self.factory.append_attribute(&self.parent, node)?;
            }
            NodeKind::Text => {
                if let Some(t) = node.data() {
                    self.text.push_str(&t);
                }
            }
            NodeKind::Document => {
                for child in node.children() {
                    self.push_node(&child)?;
                }
            }
            _ => {
                self.flush_text()?;
                self.factory.append_child(&self.parent, node)?;
                self.has_children = true;
            }
        }
        Ok(())
    }

    fn finish(mut self) -> Result<N> {
        self.flush_text()?;
        Ok(self.parent)
    }
}

pub(crate) fn element<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    name: &CtorName,
    content: &[Content],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let name = ctor_name(ctx, name, true, env, focus)?;
    if name.ns_uri.as_deref() == Some(XMLNS_URI) || name.prefix.as_deref() == Some("xmlns") {
        return Err(Error::from_code(
            ErrorCode::XQDY0074,
            format!("element name {} is in the xmlns namespace", name.lexical()),
        ));
    }
    let factory = factory(ctx)?;
    let node = factory.create_element(&name)?;
    let mut builder = ChildBuilder::new(factory.as_ref(), node, true);
    for part in content {
        match part {
            Content::Text(t) => builder.push_text(t),
            Content::Expr(e) => builder.push_items(eval_vec(ctx, e, env, focus)?)?,
        }
    }
    Ok(Sequence::singleton(XdmItem::Node(builder.finish()?)))
}

pub(crate) fn attribute<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    name: &CtorName,
    value: &[Content],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let name = ctor_name(ctx, name, false, env, focus)?;
    let reserved = name.ns_uri.as_deref() == Some(XMLNS_URI)
        || name.prefix.as_deref() == Some("xmlns")
        || (name.prefix.is_none() && name.ns_uri.is_none() && name.local == "xmlns")
        || (name.prefix.as_deref() == Some("xml")) != (name.ns_uri.as_deref() == Some(XML_URI));
    if reserved {
        return Err(Error::from_code(
            ErrorCode::XQDY0044,
            format!("'{}' cannot be used as an attribute name", name.lexical()),
        ));
    }
    let text = content_string(ctx, value, env, focus)?.unwrap_or_default();
    let node = factory(ctx)?.create_attribute(&name, &text)?;
    Ok(Sequence::singleton(XdmItem::Node(node)))
}

pub(crate) fn document<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    content: Option<&ExprRef>,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let factory = factory(ctx)?;
    let node = factory.create_document()?;
    let mut builder = ChildBuilder::new(factory.as_ref(), node, false);
    if let Some(e) = content {
        builder.push_items(eval_vec(ctx, e, env, focus)?)?;
    }
    Ok(Sequence::singleton(XdmItem::Node(builder.finish()?)))
}

pub(crate) fn text<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    content: Option<&ExprRef>,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let Some(e) = content else {
        return Ok(Sequence::empty());
    };
    match joined(&eval_vec(ctx, e, env, focus)?)? {
        Some(t) => Ok(Sequence::singleton(XdmItem::Node(factory(ctx)?.create_text(&t)?))),
        None => Ok(Sequence::empty()),
    }
}

pub(crate) fn comment<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    content: &[Content],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let text = content_string(ctx, content, env, focus)?.unwrap_or_default();
    if text.contains("--") || text.ends_with('-') {
        return Err(Error::from_code(
            ErrorCode::XQDY0072,
            "comment content contains '--' or ends with '-'",
        ));
    }
    Ok(Sequence::singleton(XdmItem::Node(factory(ctx)?.create_comment(&text)?)))
}

pub(crate) fn pi_target<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: &CtorName,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<String> {
    let target = match target {
        CtorName::Static(q) => q.local.clone(),
        CtorName::Computed(e) => {
            let values = atomize_items(&eval_vec(ctx, e, env, focus)?)?;
            match values.as_slice() {
                [XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s)] => s.trim().to_string(),
                [XdmAtomicValue::DerivedString { value, .. }] => value.trim().to_string(),
                _ => {
                    return Err(Error::from_code(
                        ErrorCode::XPTY0004,
                        "processing-instruction target must be a single string",
                    ));
                }
            }
        }
    };
    if !is_ncname(&target) {
        return Err(Error::from_code(
            ErrorCode::XQDY0041,
            format!("'{target}' is not a valid processing-instruction target"),
        ));
    }
    if target.eq_ignore_ascii_case("xml") {
        return Err(Error::from_code(
            ErrorCode::XQDY0064,
            "processing-instruction target may not be 'xml'",
        ));
    }
    Ok(target)
}

pub(crate) fn processing_instruction<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: &CtorName,
    content: &[Content],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let target = pi_target(ctx, target, env, focus)?;
    let data = content_string(ctx, content, env, focus)?.unwrap_or_default();
    if data.contains("?>") {
        return Err(Error::from_code(
            ErrorCode::XQDY0026,
            "processing-instruction content contains '?>'",
        ));
    }
    let node = factory(ctx)?.create_processing_instruction(&target, data.trim_start())?;
    Ok(Sequence::singleton(XdmItem::Node(node)))
}
