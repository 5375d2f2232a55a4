//! Updating expressions: each one checks its operands, copies its content and records
//! pending updates on the evaluation context. `copy … modify … return` applies its own
//! list to private copies right away.
use super::constructors::{computed_name, pi_target};
use super::node_ops::{atomize_items, deep_copy};
use super::{Env, EvalCtx, Focus, Result, bind, eval, eval_vec};
use crate::compiler::ir::{CtorName, ExprRef, VarId};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeFactory, NodeKind, QName, XdmNode};
use crate::parser::ast::InsertPosition;
use crate::update::{PendingUpdate, apply_updates};
use crate::xdm::{Sequence, XdmAtomicValue, XdmItem};
use std::rc::Rc;

fn err(code: ErrorCode, msg: &str) -> Error {
    Error::from_code(code, msg.to_string())
}

/// Copies of the insertion or replacement content, split into attributes and children.
struct Content<N> {
    attributes: Vec<N>,
    children: Vec<N>,
}

fn content<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    expr: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Content<N>> {
    let items = eval_vec(ctx, expr, env, focus)?;
    let factory = ctx.dyn_ctx.node_factory()?.clone();
    let mut out = Content {
        attributes: Vec::new(),
        children: Vec::new(),
    };
    let mut text = String::new();
    let flush = |text: &mut String, children: &mut Vec<N>, factory: &dyn NodeFactory<N>| -> Result<()> {
        if !text.is_empty() {
            children.push(factory.create_text(text)?);
            text.clear();
        }
        Ok(())
    };
    let mut previous_atomic = false;
    for item in items {
        match item {
            XdmItem::Atomic(a) => {
                if previous_atomic {
                    text.push(' ');
                }
                text.push_str(&a.string_value());
                previous_atomic = true;
            }
            XdmItem::Node(n) => {
                previous_atomic = false;
                match n.kind() {
                    NodeKind::Attribute => {
                        if !out.children.is_empty() || !text.is_empty() {
                            return Err(err(
                                ErrorCode::XUTY0004,
                                "attribute nodes must precede the other content",
                            ));
                        }
                        out.attributes.push(deep_copy(factory.as_ref(), &n)?);
                    }
                    NodeKind::Document => {
                        flush(&mut text, &mut out.children, factory.as_ref())?;
                        for child in n.children() {
                            out.children.push(deep_copy(factory.as_ref(), &child)?);
                        }
                    }
                    _ => {
                        flush(&mut text, &mut out.children, factory.as_ref())?;
                        out.children.push(deep_copy(factory.as_ref(), &n)?);
                    }
                }
            }
            _ => {
                return Err(err(
                    ErrorCode::XPTY0004,
                    "update content must consist of nodes and atomic values",
                ));
            }
        }
    }
    flush(&mut text, &mut out.children, factory.as_ref())?;
    Ok(out)
}

/// The single node an insert, replace or rename works on.
fn single_target<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    expr: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
    wrong: ErrorCode,
) -> Result<N> {
    let mut items = eval_vec(ctx, expr, env, focus)?;
    match (items.pop(), items.is_empty()) {
        (None, _) => Err(err(ErrorCode::XUDY0027, "the target expression is empty")),
        (Some(XdmItem::Node(n)), true) => Ok(n),
        _ => Err(err(wrong, "the target must be a single node")),
    }
}

pub(crate) fn insert<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    source: &ExprRef,
    position: InsertPosition,
    target: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let content = content(ctx, source, env, focus)?;
    let into = matches!(
        position,
        InsertPosition::Into | InsertPosition::AsFirstInto | InsertPosition::AsLastInto
    );
    let wrong = if into { ErrorCode::XUTY0005 } else { ErrorCode::XUTY0006 };
    let target = single_target(ctx, target, env, focus, wrong)?;
    let attribute_owner = if into {
        match target.kind() {
            NodeKind::Element => target.clone(),
            NodeKind::Document => {
                if !content.attributes.is_empty() {
                    return Err(err(ErrorCode::XUTY0022, "attributes cannot be inserted into a document node"));
                }
                target.clone()
            }
            _ => return Err(err(wrong, "insert into requires an element or document target")),
        }
    } else {
        if matches!(target.kind(), NodeKind::Attribute | NodeKind::Document) {
            return Err(err(wrong, "insert before/after requires a child node as target"));
        }
        let parent = target
            .parent()
            .ok_or_else(|| err(ErrorCode::XUDY0029, "insert before/after target has no parent"))?;
        if !content.attributes.is_empty() && parent.kind() != NodeKind::Element {
            return Err(err(
                ErrorCode::XUDY0030,
                "attributes inserted before/after a child of a document node",
            ));
        }
        parent
    };
    if !content.attributes.is_empty() {
        ctx.push_pending(PendingUpdate::InsertAttributes {
            target: attribute_owner,
            content: content.attributes,
        });
    }
    if !content.children.is_empty() {
        let content = content.children;
        ctx.push_pending(match position {
            InsertPosition::Into => PendingUpdate::InsertInto { target, content },
            InsertPosition::AsFirstInto => PendingUpdate::InsertIntoAsFirst { target, content },
            InsertPosition::AsLastInto => PendingUpdate::InsertIntoAsLast { target, content },
            InsertPosition::Before => PendingUpdate::InsertBefore { target, content },
            InsertPosition::After => PendingUpdate::InsertAfter { target, content },
        });
    }
    Ok(Sequence::empty())
}

pub(crate) fn delete<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    for item in eval_vec(ctx, target, env, focus)? {
        let XdmItem::Node(target) = item else {
            return Err(err(ErrorCode::XUTY0007, "delete target is not a node"));
        };
        ctx.push_pending(PendingUpdate::Delete { target });
    }
    Ok(Sequence::empty())
}

pub(crate) fn replace_node<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: &ExprRef,
    replacement: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let content = content(ctx, replacement, env, focus)?;
    let target = single_target(ctx, target, env, focus, ErrorCode::XUTY0008)?;
    if target.kind() == NodeKind::Document {
        return Err(err(ErrorCode::XUTY0008, "a document node cannot be replaced"));
    }
    if target.parent().is_none() {
        return Err(err(ErrorCode::XUDY0009, "the replaced node has no parent"));
    }
    let replacement = if target.kind() == NodeKind::Attribute {
        if !content.children.is_empty() {
            return Err(err(ErrorCode::XUTY0011, "an attribute can only be replaced by attributes"));
        }
        content.attributes
    } else {
        if !content.attributes.is_empty() {
            return Err(err(ErrorCode::XUTY0010, "only an attribute can be replaced by attributes"));
        }
        content.children
    };
    ctx.push_pending(PendingUpdate::ReplaceNode { target, replacement });
    Ok(Sequence::empty())
}

pub(crate) fn replace_value<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: &ExprRef,
    value: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let parts: Vec<String> = atomize_items(&eval_vec(ctx, value, env, focus)?)?
        .iter()
        .map(XdmAtomicValue::string_value)
        .collect();
    let value = parts.join(" ");
    let target = single_target(ctx, target, env, focus, ErrorCode::XUTY0008)?;
    let update = match target.kind() {
        NodeKind::Document => return Err(err(ErrorCode::XUTY0008, "cannot replace the value of a document node")),
        NodeKind::Element => {
            let text = if value.is_empty() {
                None
            } else {
                Some(ctx.dyn_ctx.node_factory()?.create_text(&value)?)
            };
            PendingUpdate::ReplaceElementContent { target, text }
        }
        NodeKind::Comment if value.contains("--") || value.ends_with('-') => {
            return Err(err(ErrorCode::XQDY0072, "comment content contains '--' or ends with '-'"));
        }
        NodeKind::ProcessingInstruction if value.contains("?>") => {
            return Err(err(ErrorCode::XQDY0026, "processing-instruction content contains '?>'"));
        }
        _ => PendingUpdate::ReplaceValue { target, value },
    };
    ctx.push_pending(update);
    Ok(Sequence::empty())
}

pub(crate) fn rename<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: &ExprRef,
    name: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let target = single_target(ctx, target, env, focus, ErrorCode::XUTY0012)?;
    let name = match target.kind() {
        NodeKind::Element => computed_name(ctx, name, true, env, focus)?,
        NodeKind::Attribute => computed_name(ctx, name, false, env, focus)?,
        NodeKind::ProcessingInstruction => {
            QName::local(pi_target(ctx, &CtorName::Computed(name.clone()), env, focus)?)
        }
        _ => {
            return Err(err(
                ErrorCode::XUTY0012,
                "only elements, attributes and processing instructions can be renamed",
            ));
        }
    };
    ctx.push_pending(PendingUpdate::Rename { target, name });
    Ok(Sequence::empty())
}

/// `copy $v := src modify upd return ret`
pub(crate) fn transform<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    copies: &[(VarId, ExprRef)],
    modify: &ExprRef,
    ret: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let factory = ctx.dyn_ctx.node_factory()?.clone();
    let mut env = env.clone();
    let mut roots = Vec::with_capacity(copies.len());
    for (var, source) in copies {
        let mut items = eval_vec(ctx, source, &env, focus)?;
        let node = match (items.pop(), items.is_empty()) {
            (Some(XdmItem::Node(n)), true) => n,
            _ => return Err(err(ErrorCode::XUTY0013, "a copy source must be a single node")),
        };
        let copy = deep_copy(factory.as_ref(), &node)?;
        roots.push(copy.clone());
        env = bind(&env, *var, vec![XdmItem::Node(copy)]);
    }
    let outer = ctx.take_pending();
    let modified = eval_vec(ctx, modify, &env, focus);
    let updates = ctx.pending.replace(outer);
    modified?;
    for update in &updates {
        let target = update.target();
        if !roots.iter().any(|r| r == target || r.is_ancestor_of(target)) {
            return Err(err(
                ErrorCode::XUDY0014,
                "the modify clause updates a node that is not one of the copies",
            ));
        }
    }
    if !updates.is_empty() {
        let writer = ctx.dyn_ctx.document_writer()?.clone();
        apply_updates(updates, writer.as_ref(), Some(factory.as_ref()))?;
    }
    eval(ctx, ret, &env, focus)
}

/// `fn:put($node, $uri)`
pub(crate) fn put<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    node: &ExprRef,
    uri: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let mut items = eval_vec(ctx, node, env, focus)?;
    let node = match (items.pop(), items.is_empty()) {
        (Some(XdmItem::Node(n)), true) if matches!(n.kind(), NodeKind::Document | NodeKind::Element) => n,
        _ => {
            return Err(err(
                ErrorCode::FOUP0001,
                "the first argument of fn:put must be a document or element node",
            ));
        }
    };
    let uris = atomize_items(&eval_vec(ctx, uri, env, focus)?)?;
    let [uri] = uris.as_slice() else {
        return Err(err(ErrorCode::XPTY0004, "the second argument of fn:put must be a single string"));
    };
    ctx.push_pending(PendingUpdate::Put {
        node,
        uri: uri.string_value(),
    });
    Ok(Sequence::empty())
}
