use super::common::{FnResult, opt_str};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{ExpandedName, XdmAtomicValue, XdmItem, XdmSequence};
use itertools::Itertools;

fn render<N: XdmNode>(items: &[XdmItem<N>]) -> String {
    items
        .iter()
        .map(|item| match item {
            XdmItem::Node(n) => n.string_value(),
            XdmItem::Atomic(a) => a.string_value(),
            XdmItem::Function(_) => "(function)".to_string(),
            XdmItem::Map(m) => format!("map{{{} entries}}", m.len()),
            XdmItem::Array(a) => format!("array[{} members]", a.len()),
        })
        .join(" ")
}

pub(super) fn error_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let code = match args.first().and_then(|a| a.first()) {
        Some(XdmItem::Atomic(XdmAtomicValue::QName { ns_uri, local, .. })) => {
            ExpandedName::new(ns_uri.clone(), local.clone())
        }
        _ => ErrorCode::FOER0000.qname(),
    };
    let message = opt_str(args.get(1)).unwrap_or_else(|| ErrorCode::FOER0000.description().to_string());
    let mut error = Error::new_qname(code, message);
    error.value = args.get(2).map(|v| render(v));
    Err(error)
}

pub(super) fn trace_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let label = opt_str(args.get(1)).unwrap_or_default();
    tracing::debug!(target: "sylva_query::trace", label, value = %render(&args[0]), "fn:trace");
    Ok(args[0].clone())
}

pub(super) fn put_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Err(Error::from_code(
        ErrorCode::XUST0001,
        "fn:put is an updating function and cannot be called dynamically",
    ))
}
