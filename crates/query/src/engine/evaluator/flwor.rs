//! FLWOR tuple streams and quantified expressions.
//!
//! Each clause turns a stream of variable frames into another one. `for`, `let`,
//! `where` and `count` stay lazy; `order by` and `group by` have to see every tuple
//! before they can emit the first.
use super::comparison::CompareEnv;
use super::node_ops::atomize_items;
use super::type_check::check_matches;
use super::{Env, EvalCtx, Focus, Frame, Result, bind, ebv, eval, eval_vec, slot};
use crate::compiler::ir::{Binding, Clause, ExprRef, GroupKey, OrderSpec, VarId};
use crate::engine::collation::Collation;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::SequenceType;
use crate::xdm::{MapKey, Sequence, XdmAtomicValue, XdmItem, XdmSequence};
use core::cmp::Ordering;
use indexmap::IndexMap;
use std::iter;
use std::rc::Rc;
use std::sync::Arc;

type Tuples<N> = Box<dyn Iterator<Item = Result<Env<N>>>>;

fn failed<N: XdmNode>(e: Error) -> Tuples<N> {
    Box::new(iter::once(Err(e)))
}

pub(crate) fn eval_flwor<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    clauses: &[Clause],
    ret: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let mut tuples: Tuples<N> = Box::new(iter::once(Ok(env.clone())));
    for clause in clauses {
        tuples = apply_clause(ctx, clause, tuples, focus)?;
    }
    let ctx = ctx.clone();
    let ret = ret.clone();
    let focus = focus.clone();
    Ok(Sequence::from_iter_lazy(tuples.flat_map(
        move |tuple| -> Box<dyn Iterator<Item = Result<XdmItem<N>>>> {
            match tuple.and_then(|env| eval(&ctx, &ret, &env, &focus)) {
                Ok(seq) => Box::new(seq.into_iter()),
                Err(e) => Box::new(iter::once(Err(e))),
            }
        },
    )))
}

fn apply_clause<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    clause: &Clause,
    tuples: Tuples<N>,
    focus: &Focus<N>,
) -> Result<Tuples<N>> {
    Ok(match clause {
        Clause::For {
            var,
            position,
            ty,
            allowing_empty,
            source,
        } => for_clause(ctx, *var, *position, ty.clone(), *allowing_empty, source, tuples, focus),
        Clause::Let { var, ty, value } => {
            let (ctx, value, focus, var, ty) = (ctx.clone(), value.clone(), focus.clone(), *var, ty.clone());
            Box::new(tuples.map(move |tuple| {
                let env = tuple?;
                let values = eval_vec(&ctx, &value, &env, &focus)?;
                if let Some(ty) = &ty {
                    check_matches(&values, ty, || "let binding".to_string())?;
                }
                Ok(bind(&env, var, values))
            }))
        }
        Clause::Where(cond) => {
            let (ctx, cond, focus) = (ctx.clone(), cond.clone(), focus.clone());
            Box::new(tuples.filter_map(move |tuple| match tuple {
                Ok(env) => match ebv(&ctx, &cond, &env, &focus) {
                    Ok(true) => Some(Ok(env)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e)),
                },
                Err(e) => Some(Err(e)),
            }))
        }
        Clause::Count(var) => {
            let var = *var;
            Box::new(tuples.enumerate().map(move |(i, tuple)| {
                let env = tuple?;
                Ok(bind(&env, var, vec![integer(i + 1)]))
            }))
        }
        Clause::OrderBy { specs, .. } => order_by(ctx, specs, tuples, focus)?,
        Clause::GroupBy { keys, others } => group_by(ctx, keys, others, tuples)?,
    })
}

fn integer<N>(i: usize) -> XdmItem<N> {
    XdmItem::Atomic(XdmAtomicValue::Integer(i64::try_from(i).unwrap_or(i64::MAX)))
}

#[allow(clippy::too_many_arguments)]
fn for_clause<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    var: VarId,
    position: Option<VarId>,
    ty: Option<SequenceType>,
    allowing_empty: bool,
    source: &ExprRef,
    tuples: Tuples<N>,
    focus: &Focus<N>,
) -> Tuples<N> {
    let (ctx, source, focus) = (ctx.clone(), source.clone(), focus.clone());
    Box::new(tuples.flat_map(move |tuple| -> Tuples<N> {
        let (seq, env) = match tuple.and_then(|env| Ok((eval(&ctx, &source, &env, &focus)?, env))) {
            Ok(pair) => pair,
            Err(e) => return failed(e),
        };
        let mut items = seq.into_iter().peekable();
        if allowing_empty && items.peek().is_none() {
            let mut env = bind(&env, var, Vec::new());
            if let Some(p) = position {
                env = bind(&env, p, vec![integer(0)]);
            }
            return Box::new(iter::once(Ok(env)));
        }
        let ty = ty.clone();
        Box::new(items.enumerate().map(move |(i, item)| {
            let item = item?;
            if let Some(ty) = &ty {
                check_matches(std::slice::from_ref(&item), ty, || "for binding".to_string())?;
            }
            let mut env = bind(&env, var, vec![item]);
            if let Some(p) = position {
                env = bind(&env, p, vec![integer(i + 1)]);
            }
            Ok(env)
        }))
    }))
}

/// Single atomized sort or grouping key; untypedAtomic compares as a string.
fn single_key<N: XdmNode>(values: &[XdmItem<N>], what: &str) -> Result<Option<XdmAtomicValue>> {
    let mut atoms = atomize_items(values)?;
    if atoms.len() > 1 {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("{what} key is a sequence of more than one item"),
        ));
    }
    Ok(atoms.pop().map(|a| match a {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
        other => other,
    }))
}

struct SortRow<N> {
    keys: Vec<Option<XdmAtomicValue>>,
    env: Env<N>,
}

fn order_by<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    specs: &[OrderSpec],
    tuples: Tuples<N>,
    focus: &Focus<N>,
) -> Result<Tuples<N>> {
    let collations = specs
        .iter()
        .map(|s| ctx.collation_for(s.collation.as_deref()))
        .collect::<Result<Vec<_>>>()?;
    let mut rows = Vec::new();
    for tuple in tuples {
        let env = tuple?;
        let keys = specs
            .iter()
            .map(|s| single_key(&eval_vec(ctx, &s.key, &env, focus)?, "order by"))
            .collect::<Result<Vec<_>>>()?;
        rows.push(SortRow { keys, env });
    }
    let mut failure = None;
    rows.sort_by(|a, b| {
        for ((spec, collation), (x, y)) in specs.iter().zip(&collations).zip(a.keys.iter().zip(&b.keys)) {
            match compare_keys(ctx, spec, collation.as_ref(), x.as_ref(), y.as_ref()) {
                Ok(Ordering::Equal) => {}
                Ok(ord) => return ord,
                Err(e) => {
                    failure.get_or_insert(e);
                    return Ordering::Equal;
                }
            }
        }
        Ordering::Equal
    });
    if let Some(e) = failure {
        return Err(e);
    }
    tracing::trace!(rows = rows.len(), "order by");
    Ok(Box::new(rows.into_iter().map(|r| Ok(r.env))))
}

/// Empty sorts first unless `empty greatest`; NaN sits between empty and every other value.
fn compare_keys<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    spec: &OrderSpec,
    collation: &dyn Collation,
    a: Option<&XdmAtomicValue>,
    b: Option<&XdmAtomicValue>,
) -> Result<Ordering> {
    let rank = |v: Option<&XdmAtomicValue>| match v {
        None if spec.empty_greatest => 3,
        None => 0,
        Some(v) if v.is_nan() => {
            if spec.empty_greatest {
                2
            } else {
                1
            }
        }
        Some(_) => {
            if spec.empty_greatest {
                1
            } else {
                2
            }
        }
    };
    let ord = match (a, b) {
        (Some(x), Some(y)) if !x.is_nan() && !y.is_nan() => {
            let env = CompareEnv {
                collation,
                timezone: ctx.timezone,
            };
            ctx.comparators.ordering(x, y, &env)?.ok_or_else(|| {
                Error::from_code(
                    ErrorCode::XPTY0004,
                    format!("order by keys {} and {} are not comparable", x.type_name(), y.type_name()),
                )
            })?
        }
        _ => rank(a).cmp(&rank(b)),
    };
    Ok(if spec.descending { ord.reverse() } else { ord })
}

/// Hashable grouping key: deep-equal for atomics, strings folded by the collation.
fn group_key(value: Option<&XdmAtomicValue>, collation: &dyn Collation) -> Option<MapKey> {
    value.map(|v| match MapKey::from_atomic(v) {
        MapKey::Str(s) => MapKey::Str(collation.key(&s)),
        k => k,
    })
}

struct Group<N> {
    first: Env<N>,
    keys: Vec<Option<XdmAtomicValue>>,
    others: Vec<XdmSequence<N>>,
}

fn group_by<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    keys: &[GroupKey],
    others: &[VarId],
    tuples: Tuples<N>,
) -> Result<Tuples<N>> {
    let collations = keys
        .iter()
        .map(|k| ctx.collation_for(k.collation.as_deref()))
        .collect::<Result<Vec<_>>>()?;
    let mut groups: IndexMap<Vec<Option<MapKey>>, Group<N>> = IndexMap::new();
    for tuple in tuples {
        let env = tuple?;
        let values = keys
            .iter()
            .map(|k| single_key(&slot(&env, k.var)?, "group by"))
            .collect::<Result<Vec<_>>>()?;
        let hash = values
            .iter()
            .zip(&collations)
            .map(|(v, c)| group_key(v.as_ref(), c.as_ref()))
            .collect();
        let group = groups.entry(hash).or_insert_with(|| Group {
            first: env.clone(),
            keys: values,
            others: vec![Vec::new(); others.len()],
        });
        for (acc, var) in group.others.iter_mut().zip(others) {
            acc.extend(slot(&env, *var)?.iter().cloned());
        }
    }
    tracing::trace!(groups = groups.len(), "group by");
    let keys: Vec<VarId> = keys.iter().map(|k| k.var).collect();
    let others = others.to_vec();
    Ok(Box::new(groups.into_values().map(move |g| {
        let mut frame: Frame<N> = (*g.first).clone();
        for (var, value) in keys.iter().zip(g.keys) {
            frame[*var] = Some(Arc::new(value.into_iter().map(XdmItem::Atomic).collect()));
        }
        for (var, value) in others.iter().zip(g.others) {
            frame[*var] = Some(Arc::new(value));
        }
        Ok(Rc::new(frame))
    })))
}

/// `some`/`every`: short-circuits on the first witness or counterexample.
pub(crate) fn quantified<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    every: bool,
    bindings: &[Binding],
    satisfies: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<bool> {
    let Some((binding, rest)) = bindings.split_first() else {
        return ebv(ctx, satisfies, env, focus);
    };
    for item in eval(ctx, &binding.source, env, focus)? {
        let item = item?;
        if let Some(ty) = &binding.ty {
            check_matches(std::slice::from_ref(&item), ty, || "quantified binding".to_string())?;
        }
        let env = bind(env, binding.var, vec![item]);
        if quantified(ctx, every, rest, satisfies, &env, focus)? != every {
            return Ok(!every);
        }
    }
    Ok(every)
}
