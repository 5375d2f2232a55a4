use super::common::{FnResult, count_to_i64, function_arg, int_arg, integer, predicate_result};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::numeric::{NumKind, classify};
use crate::xdm::{XdmArray, XdmItem, XdmSequence};

fn array_arg<N>(arg: &[XdmItem<N>]) -> Result<&XdmArray<N>, Error> {
    match arg.first() {
        Some(XdmItem::Array(a)) => Ok(a),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "expected an array")),
    }
}

fn array<N>(a: XdmArray<N>) -> XdmSequence<N> {
    vec![XdmItem::Array(a)]
}

pub(super) fn size_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(integer(count_to_i64(array_arg(&args[0])?.len())))
}

pub(super) fn get_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(array_arg(&args[0])?.get(int_arg(&args[1])?)?.clone())
}

pub(super) fn put_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(array(array_arg(&args[0])?.put(int_arg(&args[1])?, args[2].clone())?))
}

pub(super) fn append_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(array(array_arg(&args[0])?.append(args[1].clone())))
}

pub(super) fn subarray_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let length = args.get(2).map(|a| int_arg(a)).transpose()?;
    Ok(array(array_arg(&args[0])?.subarray(int_arg(&args[1])?, length)?))
}

pub(super) fn remove_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let source = array_arg(&args[0])?;
    let mut positions = Vec::with_capacity(args[1].len());
    for item in &args[1] {
        match item.as_atomic().and_then(classify) {
            Some(NumKind::Int(p)) => {
                // bounds are checked against the original array
                source.get(p)?;
                positions.push(p);
            }
            _ => return Err(Error::from_code(ErrorCode::XPTY0004, "array positions must be integers")),
        }
    }
    positions.sort_unstable();
    positions.dedup();
    let mut out = source.clone();
    for p in positions.into_iter().rev() {
        out = out.remove(p)?;
    }
    Ok(array(out))
}

pub(super) fn insert_before_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(array(array_arg(&args[0])?.insert_before(int_arg(&args[1])?, args[2].clone())?))
}

pub(super) fn head_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(array_arg(&args[0])?.get(1)?.clone())
}

pub(super) fn tail_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let source = array_arg(&args[0])?;
    if source.is_empty() {
        return Err(Error::from_code(ErrorCode::FOAY0001, "array:tail of an empty array"));
    }
    Ok(array(XdmArray::new(source.members()[1..].to_vec())))
}

pub(super) fn reverse_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let members = array_arg(&args[0])?.members().iter().rev().cloned().collect();
    Ok(array(XdmArray::new(members)))
}

pub(super) fn join_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut members = Vec::new();
    for item in &args[0] {
        let XdmItem::Array(a) = item else {
            return Err(Error::from_code(ErrorCode::XPTY0004, "array:join expects arrays"));
        };
        members.extend_from_slice(a.members());
    }
    Ok(array(XdmArray::new(members)))
}

pub(super) fn flatten_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut out = Vec::new();
    for item in &args[0] {
        match item {
            XdmItem::Array(a) => out.extend(a.flatten()),
            other => out.push(other.clone()),
        }
    }
    Ok(out)
}

pub(super) fn for_each_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[1])?;
    let members = array_arg(&args[0])?
        .members()
        .iter()
        .map(|m| ctx.caller.call_function(f, vec![m.clone()]))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(array(XdmArray::new(members)))
}

pub(super) fn filter_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[1])?;
    let mut members = Vec::new();
    for m in array_arg(&args[0])?.members() {
        let keep = ctx.caller.call_function(f, vec![m.clone()])?;
        if predicate_result(&keep, "array:filter")? {
            members.push(m.clone());
        }
    }
    Ok(array(XdmArray::new(members)))
}
