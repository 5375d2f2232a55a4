//! Accessors that default to the context item.
use super::common::{FnResult, atomic, node_or_context, string};
use crate::engine::evaluator::node_ops::atomize_items;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::{Kind, cast_atomic};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

/// `position()` and `last()` are answered by the evaluator; reaching the registry
/// means they were called through a function item, which has no focus.
pub(super) fn focus_only_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Err(Error::from_code(
        ErrorCode::XPDY0002,
        "the focus is absent inside a function item",
    ))
}

fn item_or_context<'a, N>(
    ctx: &'a CallCtx<'_, N>,
    args: &'a [XdmSequence<N>],
    function: &str,
) -> Result<Option<&'a XdmItem<N>>, Error> {
    match args.first() {
        Some(arg) => Ok(arg.first()),
        None => ctx.context_item(function).map(Some),
    }
}

pub(super) fn data_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let atoms = match args.first() {
        Some(arg) => atomize_items(arg)?,
        None => atomize_items(std::slice::from_ref(ctx.context_item("data")?))?,
    };
    Ok(atoms.into_iter().map(XdmItem::Atomic).collect())
}

pub(super) fn string_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let value = match item_or_context(ctx, args, "string")? {
        None => String::new(),
        Some(XdmItem::Node(n)) => n.string_value(),
        Some(XdmItem::Atomic(a)) => a.string_value(),
        Some(_) => {
            return Err(Error::from_code(
                ErrorCode::FOTY0014,
                "fn:string is not defined for function items",
            ));
        }
    };
    Ok(string(value))
}

pub(super) fn number_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let value = match item_or_context(ctx, args, "number")? {
        None => None,
        Some(item) => atomize_items(std::slice::from_ref(item))?.into_iter().next(),
    };
    let number = value
        .and_then(|v| cast_atomic(v, Kind::Double, None).ok())
        .and_then(|v| v.as_f64())
        .unwrap_or(f64::NAN);
    Ok(atomic(XdmAtomicValue::Double(number)))
}

pub(super) fn root_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(node_or_context(ctx, args, "root")?
        .map(|n| vec![XdmItem::Node(n.root())])
        .unwrap_or_default())
}

pub(super) fn name_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let name = node_or_context(ctx, args, "name")?.and_then(|n| n.name());
    Ok(string(name.map(|q| q.lexical()).unwrap_or_default()))
}

pub(super) fn local_name_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let name = node_or_context(ctx, args, "local-name")?.and_then(|n| n.name());
    Ok(string(name.map(|q| q.local).unwrap_or_default()))
}

pub(super) fn namespace_uri_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let name = node_or_context(ctx, args, "namespace-uri")?.and_then(|n| n.name());
    let uri = name.and_then(|q| q.ns_uri).unwrap_or_default();
    Ok(atomic(XdmAtomicValue::AnyUri(uri)))
}

pub(super) fn node_name_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(node_or_context(ctx, args, "node-name")?
        .and_then(|n| n.name())
        .map(|q| {
            vec![XdmItem::Atomic(XdmAtomicValue::QName {
                ns_uri: q.ns_uri,
                prefix: q.prefix,
                local: q.local,
            })]
        })
        .unwrap_or_default())
}
