//! Small helpers shared by the builtin implementations.
use crate::engine::collation::Collation;
use crate::engine::evaluator::comparison::CompareEnv;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::numeric::{NumKind, classify};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};
use std::sync::Arc;

pub(super) type FnResult<N> = Result<XdmSequence<N>, Error>;

pub(super) fn atomic<N>(v: impl Into<XdmAtomicValue>) -> XdmSequence<N> {
    vec![XdmItem::Atomic(v.into())]
}

pub(super) fn boolean<N>(b: bool) -> XdmSequence<N> {
    atomic(XdmAtomicValue::Boolean(b))
}

pub(super) fn string<N>(s: impl Into<String>) -> XdmSequence<N> {
    atomic(XdmAtomicValue::String(s.into()))
}

pub(super) fn integer<N>(i: i64) -> XdmSequence<N> {
    atomic(XdmAtomicValue::Integer(i))
}

pub(super) fn count_to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// First atomic of an argument declared `xs:...?`.
pub(super) fn opt_atomic<N>(arg: &[XdmItem<N>]) -> Option<&XdmAtomicValue> {
    arg.first().and_then(XdmItem::as_atomic)
}

/// String value of an `xs:string?` argument; the empty sequence reads as "".
pub(super) fn str_arg<N>(arg: &[XdmItem<N>]) -> String {
    opt_atomic(arg).map(XdmAtomicValue::string_value).unwrap_or_default()
}

pub(super) fn opt_str<N>(arg: Option<&XdmSequence<N>>) -> Option<String> {
    arg.and_then(|a| opt_atomic(a)).map(XdmAtomicValue::string_value)
}

pub(super) fn int_arg<N>(arg: &[XdmItem<N>]) -> Result<i64, Error> {
    match opt_atomic(arg).and_then(classify) {
        Some(NumKind::Int(i)) => Ok(i),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "expected an xs:integer argument")),
    }
}

pub(super) fn double_arg<N>(arg: &[XdmItem<N>]) -> Option<f64> {
    opt_atomic(arg).and_then(XdmAtomicValue::as_f64)
}

/// Collation named by argument `index`, or the default one when it is absent.
pub(super) fn collation_arg<N>(
    ctx: &CallCtx<'_, N>,
    args: &[XdmSequence<N>],
    index: usize,
) -> Result<Arc<dyn Collation>, Error> {
    ctx.collation(opt_str(args.get(index)).as_deref())
}

pub(super) fn compare_env<'a, N>(ctx: &CallCtx<'_, N>, collation: &'a dyn Collation) -> CompareEnv<'a> {
    CompareEnv {
        collation,
        timezone: ctx.implicit_timezone,
    }
}

/// Node operand of the context-dependent accessors: the argument when one was
/// supplied (possibly empty), the context item otherwise.
pub(super) fn node_or_context<N: XdmNode>(
    ctx: &CallCtx<'_, N>,
    args: &[XdmSequence<N>],
    function: &str,
) -> Result<Option<N>, Error> {
    let item = match args.first() {
        Some(arg) => match arg.first() {
            Some(item) => item,
            None => return Ok(None),
        },
        None => ctx.context_item(function)?,
    };
    match item {
        XdmItem::Node(n) => Ok(Some(n.clone())),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("fn:{function} requires a node, the context item is not one"),
        )),
    }
}

/// Items of a single argument that was declared as a function.
pub(super) fn function_arg<N>(arg: &[XdmItem<N>]) -> Result<&XdmItem<N>, Error> {
    arg.first()
        .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "expected a function item"))
}

/// Effective boolean value of a predicate function's result, which must be a single
/// xs:boolean.
pub(super) fn predicate_result<N>(result: &[XdmItem<N>], function: &str) -> Result<bool, Error> {
    match result {
        [XdmItem::Atomic(XdmAtomicValue::Boolean(b))] => Ok(*b),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("the function passed to {function} must return a single xs:boolean"),
        )),
    }
}
