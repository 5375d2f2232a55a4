//! Functions that take function items. Every call goes back through the evaluator's
//! [`FunctionCaller`](crate::engine::runtime::FunctionCaller).
use super::common::{FnResult, atomic, collation_arg, compare_env, count_to_i64, function_arg, integer, predicate_result};
use crate::engine::evaluator::comparison::{CompareEnv, ComparatorTable};
use crate::engine::evaluator::node_ops::atomize_items;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};
use core::cmp::Ordering;

pub(super) fn for_each_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[1])?;
    let mut out = Vec::new();
    for item in &args[0] {
        out.extend(ctx.caller.call_function(f, vec![vec![item.clone()]])?);
    }
    Ok(out)
}

pub(super) fn filter_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[1])?;
    let mut out = Vec::new();
    for item in &args[0] {
        let keep = ctx.caller.call_function(f, vec![vec![item.clone()]])?;
        if predicate_result(&keep, "fn:filter")? {
            out.push(item.clone());
        }
    }
    Ok(out)
}

pub(super) fn fold_left_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[2])?;
    args[0].iter().try_fold(args[1].clone(), |acc, item| {
        ctx.caller.call_function(f, vec![acc, vec![item.clone()]])
    })
}

pub(super) fn fold_right_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[2])?;
    args[0].iter().rev().try_fold(args[1].clone(), |acc, item| {
        ctx.caller.call_function(f, vec![vec![item.clone()], acc])
    })
}

pub(super) fn for_each_pair_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[2])?;
    let mut out = Vec::new();
    for (a, b) in args[0].iter().zip(&args[1]) {
        out.extend(ctx.caller.call_function(f, vec![vec![a.clone()], vec![b.clone()]])?);
    }
    Ok(out)
}

fn sort_key(values: Vec<XdmAtomicValue>) -> Vec<XdmAtomicValue> {
    values
        .into_iter()
        .map(|v| match v {
            XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
            other => other,
        })
        .collect()
}

/// Lexicographic order of two sort keys; NaN sorts before every other value.
fn compare_keys(
    a: &[XdmAtomicValue],
    b: &[XdmAtomicValue],
    table: &ComparatorTable,
    env: &CompareEnv<'_>,
) -> Result<Ordering, Error> {
    for (x, y) in a.iter().zip(b) {
        let ord = match (x.is_nan(), y.is_nan()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => table.ordering(x, y, env)?.unwrap_or(Ordering::Equal),
        };
        if ord != Ordering::Equal {
            return Ok(ord);
        }
    }
    Ok(a.len().cmp(&b.len()))
}

pub(super) fn sort_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let collation = collation_arg(ctx, args, 1)?;
    let env = compare_env(ctx, collation.as_ref());
    let key_fn = args.get(2).and_then(|a| a.first());
    let mut keyed = Vec::with_capacity(args[0].len());
    for item in &args[0] {
        let key = match key_fn {
            Some(f) => atomize_items(&ctx.caller.call_function(f, vec![vec![item.clone()]])?)?,
            None => atomize_items(std::slice::from_ref(item))?,
        };
        keyed.push((sort_key(key), item.clone()));
    }
    let mut failure = None;
    keyed.sort_by(|(a, _), (b, _)| {
        compare_keys(a, b, ctx.comparators, &env).unwrap_or_else(|e| {
            failure.get_or_insert(e);
            Ordering::Equal
        })
    });
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(keyed.into_iter().map(|(_, item)| item).collect())
}

pub(super) fn apply_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let f = function_arg(&args[0])?;
    let Some(XdmItem::Array(array)) = args[1].first() else {
        return Err(Error::from_code(ErrorCode::XPTY0004, "fn:apply expects an array of arguments"));
    };
    if let Some(arity) = arity_of(f)
        && arity != array.len()
    {
        return Err(Error::from_code(
            ErrorCode::FOAP0001,
            format!("function of arity {arity} applied to {} argument(s)", array.len()),
        ));
    }
    ctx.caller.call_function(f, array.members().to_vec())
}

fn arity_of<N>(item: &XdmItem<N>) -> Option<usize> {
    match item {
        XdmItem::Function(f) => Some(f.arity),
        XdmItem::Map(_) | XdmItem::Array(_) => Some(1),
        _ => None,
    }
}

pub(super) fn function_arity_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let arity = arity_of(function_arg(&args[0])?)
        .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "fn:function-arity expects a function item"))?;
    Ok(integer(count_to_i64(arity)))
}

pub(super) fn function_name_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    match function_arg(&args[0])? {
        XdmItem::Function(f) => Ok(f
            .name
            .as_ref()
            .map(|name| {
                atomic(XdmAtomicValue::QName {
                    ns_uri: name.ns_uri.clone(),
                    prefix: None,
                    local: name.local.clone(),
                })
            })
            .unwrap_or_default()),
        XdmItem::Map(_) | XdmItem::Array(_) => Ok(Vec::new()),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "fn:function-name expects a function item")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::CodepointCollation;
    use chrono::Offset;

    #[test]
    fn nan_sorts_first_and_shorter_keys_win_ties() {
        let env = CompareEnv {
            collation: &CodepointCollation,
            timezone: chrono::Utc.fix(),
        };
        let table = ComparatorTable::new();
        let nan = [XdmAtomicValue::Double(f64::NAN)];
        let one = [XdmAtomicValue::Integer(1)];
        assert_eq!(compare_keys(&nan, &one, &table, &env).unwrap(), Ordering::Less);
        assert_eq!(compare_keys(&[], &one, &table, &env).unwrap(), Ordering::Less);
        let s = [XdmAtomicValue::String("a".into())];
        assert!(compare_keys(&s, &one, &table, &env).is_err());
    }
}
