use super::common::{FnResult, boolean, collation_arg, compare_env, count_to_i64, double_arg, int_arg, opt_atomic};
use crate::engine::evaluator::comparison::{CompareEnv, ComparatorTable};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::{NodeKind, XdmNode};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

pub(super) fn empty_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(args[0].is_empty()))
}

pub(super) fn exists_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(!args[0].is_empty()))
}

pub(super) fn head_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(args[0].first().cloned().into_iter().collect())
}

pub(super) fn tail_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(args[0].iter().skip(1).cloned().collect())
}

pub(super) fn reverse_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(args[0].iter().rev().cloned().collect())
}

pub(super) fn subsequence_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let round = |x: f64| if x.is_finite() { (x + 0.5).floor() } else { x };
    let start = round(double_arg(&args[1]).unwrap_or(f64::NAN));
    let end = match args.get(2) {
        Some(len) => start + round(double_arg(len).unwrap_or(f64::NAN)),
        None => f64::INFINITY,
    };
    #[allow(clippy::cast_precision_loss)]
    let out = args[0]
        .iter()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, item)| item.clone())
        .collect();
    Ok(out)
}

pub(super) fn insert_before_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let target = &args[0];
    let position = int_arg(&args[1])?;
    let at = usize::try_from(position.max(1) - 1).unwrap_or(usize::MAX).min(target.len());
    let mut out = Vec::with_capacity(target.len() + args[2].len());
    out.extend_from_slice(&target[..at]);
    out.extend_from_slice(&args[2]);
    out.extend_from_slice(&target[at..]);
    Ok(out)
}

pub(super) fn remove_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let position = int_arg(&args[1])?;
    let mut out = args[0].clone();
    if let Ok(i) = usize::try_from(position - 1)
        && i < out.len()
    {
        out.remove(i);
    }
    Ok(out)
}

pub(super) fn index_of_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(search) = opt_atomic(&args[1]) else {
        return Ok(Vec::new());
    };
    if search.is_nan() {
        return Ok(Vec::new());
    }
    let collation = collation_arg(ctx, args, 2)?;
    let env = compare_env(ctx, collation.as_ref());
    let table = ctx.comparators;
    Ok(args[0]
        .iter()
        .enumerate()
        .filter(|(_, item)| item.as_atomic().is_some_and(|a| table.equal(a, search, &env)))
        .map(|(i, _)| XdmItem::Atomic(XdmAtomicValue::Integer(count_to_i64(i + 1))))
        .collect())
}

pub(super) fn distinct_values_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let collation = collation_arg(ctx, args, 1)?;
    let env = compare_env(ctx, collation.as_ref());
    let table = ctx.comparators;
    let mut seen: Vec<&XdmAtomicValue> = Vec::new();
    for value in args[0].iter().filter_map(XdmItem::as_atomic) {
        if !seen.iter().any(|s| table.equal(s, value, &env)) {
            seen.push(value);
        }
    }
    Ok(seen.into_iter().map(|v| XdmItem::Atomic(v.clone())).collect())
}

pub(super) fn deep_equal_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let collation = collation_arg(ctx, args, 2)?;
    let env = compare_env(ctx, collation.as_ref());
    Ok(boolean(deep_equal(&args[0], &args[1], ctx.comparators, &env)?))
}

/// `fn:deep-equal` over two sequences. Function items other than maps and arrays
/// raise FOTY0015.
pub fn deep_equal<N: XdmNode>(
    a: &[XdmItem<N>],
    b: &[XdmItem<N>],
    table: &ComparatorTable,
    env: &CompareEnv<'_>,
) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !items_equal(x, y, table, env)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn items_equal<N: XdmNode>(
    a: &XdmItem<N>,
    b: &XdmItem<N>,
    table: &ComparatorTable,
    env: &CompareEnv<'_>,
) -> Result<bool, Error> {
    match (a, b) {
        (XdmItem::Function(_), _) | (_, XdmItem::Function(_)) => Err(Error::from_code(
            ErrorCode::FOTY0015,
            "fn:deep-equal cannot compare function items",
        )),
        (XdmItem::Atomic(x), XdmItem::Atomic(y)) => Ok(table.equal(x, y, env)),
        (XdmItem::Node(x), XdmItem::Node(y)) => nodes_equal(x, y, env),
        (XdmItem::Map(x), XdmItem::Map(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (key, value) in x.iter() {
                match y.get(key) {
                    Some(other) if deep_equal(value, other, table, env)? => {}
                    _ => return Ok(false),
                }
            }
            Ok(true)
        }
        (XdmItem::Array(x), XdmItem::Array(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (m, n) in x.members().iter().zip(y.members()) {
                if !deep_equal(m, n, table, env)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn significant_children<N: XdmNode>(node: &N) -> Vec<N> {
    node.children()
        .filter(|c| !matches!(c.kind(), NodeKind::Comment | NodeKind::ProcessingInstruction))
        .collect()
}

fn nodes_equal<N: XdmNode>(a: &N, b: &N, env: &CompareEnv<'_>) -> Result<bool, Error> {
    if a.kind() != b.kind() {
        return Ok(false);
    }
    let same_text = |x: &N, y: &N| env.collation.compare(&x.string_value(), &y.string_value()).is_eq();
    match a.kind() {
        NodeKind::Document => {
            let (ca, cb) = (significant_children(a), significant_children(b));
            sequences_of_nodes_equal(&ca, &cb, env)
        }
        NodeKind::Element => {
            if a.expanded_name() != b.expanded_name() {
                return Ok(false);
            }
            let attrs_a: Vec<N> = a.attributes().collect();
            let attrs_b: Vec<N> = b.attributes().collect();
            if attrs_a.len() != attrs_b.len() {
                return Ok(false);
            }
            for attr in &attrs_a {
                let name = attr.expanded_name();
                match attrs_b.iter().find(|o| o.expanded_name() == name) {
                    Some(other) if same_text(attr, other) => {}
                    _ => return Ok(false),
                }
            }
            let (ca, cb) = (significant_children(a), significant_children(b));
            sequences_of_nodes_equal(&ca, &cb, env)
        }
        NodeKind::Attribute | NodeKind::ProcessingInstruction => {
            Ok(a.expanded_name() == b.expanded_name() && same_text(a, b))
        }
        NodeKind::Text | NodeKind::Comment => Ok(same_text(a, b)),
    }
}

fn sequences_of_nodes_equal<N: XdmNode>(a: &[N], b: &[N], env: &CompareEnv<'_>) -> Result<bool, Error> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !nodes_equal(x, y, env)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn cardinality_error(code: ErrorCode, function: &str, len: usize) -> Error {
    Error::from_code(code, format!("fn:{function} called with a sequence of {len} items"))
}

pub(super) fn zero_or_one_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    if args[0].len() > 1 {
        return Err(cardinality_error(ErrorCode::FORG0003, "zero-or-one", args[0].len()));
    }
    Ok(args[0].clone())
}

pub(super) fn one_or_more_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    if args[0].is_empty() {
        return Err(cardinality_error(ErrorCode::FORG0004, "one-or-more", 0));
    }
    Ok(args[0].clone())
}

pub(super) fn exactly_one_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    if args[0].len() != 1 {
        return Err(cardinality_error(ErrorCode::FORG0005, "exactly-one", args[0].len()));
    }
    Ok(args[0].clone())
}

pub(super) fn unordered_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(args[0].clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::{CodepointCollation, FoldingCollation};
    use crate::model::simple::{SimpleNode, doc, elem, text};
    use crate::xdm::{XdmArray, XdmMap};
    use chrono::Offset;

    type N = SimpleNode;

    fn env(collation: &dyn crate::engine::collation::Collation) -> CompareEnv<'_> {
        CompareEnv {
            collation,
            timezone: chrono::Utc.fix(),
        }
    }

    fn int(i: i64) -> XdmItem<N> {
        XdmItem::Atomic(XdmAtomicValue::Integer(i))
    }

    #[test]
    fn numerics_compare_by_value() {
        let a = vec![int(1), XdmItem::Atomic(XdmAtomicValue::Double(2.0))];
        let b = vec![XdmItem::Atomic(XdmAtomicValue::Decimal(1.into())), int(2)];
        assert!(deep_equal(&a, &b, &ComparatorTable::new(), &env(&CodepointCollation)).unwrap());
        let nan = vec![XdmItem::<N>::Atomic(XdmAtomicValue::Double(f64::NAN))];
        assert!(deep_equal(&nan, &nan, &ComparatorTable::new(), &env(&CodepointCollation)).unwrap());
    }

    #[test]
    fn maps_and_arrays_compare_structurally() {
        let m1: XdmMap<N> = XdmMap::from_entries([(XdmAtomicValue::Integer(1), vec![int(10)])]);
        let m2: XdmMap<N> = XdmMap::from_entries([(XdmAtomicValue::Double(1.0), vec![int(10)])]);
        assert!(deep_equal(&[XdmItem::Map(m1)], &[XdmItem::Map(m2)], &ComparatorTable::new(), &env(&CodepointCollation)).unwrap());
        let a1 = XdmArray::new(vec![vec![int(1)], vec![]]);
        let a2 = XdmArray::new(vec![vec![int(1)]]);
        assert!(!deep_equal(&[XdmItem::Array(a1)], &[XdmItem::Array(a2)], &ComparatorTable::new(), &env(&CodepointCollation)).unwrap());
    }

    #[test]
    fn elements_compare_under_collation() {
        let a = doc().child(elem("p").child(text("Hello"))).build();
        let b = doc().child(elem("p").child(text("HELLO"))).build();
        let (a, b) = (vec![XdmItem::Node(a)], vec![XdmItem::Node(b)]);
        assert!(!deep_equal(&a, &b, &ComparatorTable::new(), &env(&CodepointCollation)).unwrap());
        assert!(deep_equal(&a, &b, &ComparatorTable::new(), &env(&FoldingCollation::simple_case())).unwrap());
    }
}
