//! Document order, node deduplication and the node-set operators.
use super::{EvalCtx, Result};
use crate::compiler::ir::{ExprKind, ExprRef, Sortedness};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode};
use crate::parser::ast::{NodeComp, SetOp};
use crate::xdm::{Sequence, XdmItem};
use core::cmp::Ordering;
use itertools::Itertools;
use smallvec::SmallVec;
use std::cell::RefCell;
use std::rc::Rc;

/// Total document order for one evaluation.
///
/// Nodes of the same tree compare by position; distinct trees are ranked by the order in
/// which their roots were first compared.
pub(crate) struct DocOrder<N> {
    roots: RefCell<Vec<N>>,
}

impl<N: XdmNode> DocOrder<N> {
    pub(crate) fn new() -> Self {
        Self {
            roots: RefCell::new(Vec::new()),
        }
    }

    fn root_rank(&self, root: &N) -> usize {
        let mut roots = self.roots.borrow_mut();
        if let Some(i) = roots.iter().position(|r| r == root) {
            return i;
        }
        roots.push(root.clone());
        roots.len() - 1
    }

    pub(crate) fn compare(&self, a: &N, b: &N) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        if let (Some(ka), Some(kb)) = (a.doc_order_key(), b.doc_order_key()) {
            return ka.cmp(&kb);
        }
        let pa = ancestry(a);
        let pb = ancestry(b);
        if pa[0] != pb[0] {
            return self.root_rank(&pa[0]).cmp(&self.root_rank(&pb[0]));
        }
        for (x, y) in pa.iter().zip(pb.iter()).skip(1) {
            if x != y {
                return sibling_key(x).cmp(&sibling_key(y));
            }
        }
        // one chain is a prefix of the other: the ancestor comes first
        pa.len().cmp(&pb.len())
    }

    pub(crate) fn sort_distinct(&self, nodes: &mut Vec<N>) {
        nodes.sort_by(|a, b| self.compare(a, b));
        nodes.dedup();
    }

    pub(crate) fn is_sorted(&self, nodes: &[N]) -> bool {
        nodes
            .windows(2)
            .all(|w| self.compare(&w[0], &w[1]) == Ordering::Less)
    }
}

/// Path from the root down to `node`, inclusive.
fn ancestry<N: XdmNode>(node: &N) -> SmallVec<[N; 16]> {
    let mut chain: SmallVec<[N; 16]> = SmallVec::new();
    let mut cur = Some(node.clone());
    while let Some(n) = cur {
        cur = n.parent();
        chain.push(n);
    }
    chain.reverse();
    chain
}

/// Attributes precede children; siblings go by index.
fn sibling_key<N: XdmNode>(node: &N) -> (u8, usize) {
    let rank = u8::from(node.kind() != NodeKind::Attribute);
    (rank, node.index_in_parent().unwrap_or(0))
}

pub(crate) fn node_compare<N: XdmNode>(ctx: &Rc<EvalCtx<N>>, op: NodeComp, a: &N, b: &N) -> bool {
    match op {
        NodeComp::Is => a == b,
        NodeComp::Precedes => ctx.order.compare(a, b) == Ordering::Less,
        NodeComp::Follows => ctx.order.compare(a, b) == Ordering::Greater,
    }
}

pub(crate) fn collect_nodes<N: XdmNode>(seq: Sequence<N>, what: &str) -> Result<Vec<N>> {
    let mut nodes = Vec::new();
    for item in seq {
        match item? {
            XdmItem::Node(n) => nodes.push(n),
            other => {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    format!(
                        "operand of '{what}' contains {}, not a node",
                        match other {
                            XdmItem::Atomic(a) => a.type_name(),
                            _ => "a function item".to_string(),
                        }
                    ),
                ));
            }
        }
    }
    Ok(nodes)
}

/// Order of `eval`'s output for `expr`. Standalone steps are put in document order by
/// `eval` itself; their metadata describes the raw axis order.
pub(crate) fn evaluated_order(expr: &ExprRef) -> Sortedness {
    match expr.kind {
        ExprKind::Step(_) => Sortedness::Sorted,
        _ => expr.meta.sortedness,
    }
}

/// Sorted, duplicate-free nodes of an operand; the sort is skipped when the operand
/// is statically known to be in document order.
fn normalized<N: XdmNode>(ctx: &EvalCtx<N>, seq: Sequence<N>, expr: &ExprRef, what: &str) -> Result<Vec<N>> {
    let mut nodes = collect_nodes(seq, what)?;
    match evaluated_order(expr) {
        Sortedness::Sorted => {}
        Sortedness::ReverseSorted => {
            nodes.reverse();
            nodes.dedup();
        }
        _ => ctx.order.sort_distinct(&mut nodes),
    }
    Ok(nodes)
}

pub(crate) fn set_operation<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    op: SetOp,
    left: Sequence<N>,
    left_expr: &ExprRef,
    right: Sequence<N>,
    right_expr: &ExprRef,
) -> Result<Sequence<N>> {
    let what = match op {
        SetOp::Union => "union",
        SetOp::Intersect => "intersect",
        SetOp::Except => "except",
    };
    let a = normalized(ctx, left, left_expr, what)?;
    let b = normalized(ctx, right, right_expr, what)?;
    let order = &ctx.order;
    let out: Vec<N> = match op {
        SetOp::Union => a
            .into_iter()
            .merge_by(b, |x, y| order.compare(x, y) != Ordering::Greater)
            .dedup()
            .collect(),
        SetOp::Intersect => {
            let mut out = Vec::with_capacity(a.len().min(b.len()));
            let mut rhs = b.iter().peekable();
            for x in a {
                while rhs.next_if(|y| order.compare(y, &x) == Ordering::Less).is_some() {}
                if rhs.peek().is_some_and(|y| **y == x) {
                    out.push(x);
                }
            }
            out
        }
        SetOp::Except => {
            let mut out = Vec::with_capacity(a.len());
            let mut rhs = b.iter().peekable();
            for x in a {
                while rhs.next_if(|y| order.compare(y, &x) == Ordering::Less).is_some() {}
                if !rhs.peek().is_some_and(|y| **y == x) {
                    out.push(x);
                }
            }
            out
        }
    };
    Ok(Sequence::from_vec(out.into_iter().map(XdmItem::Node).collect()))
}

/// k-way merge of per-context step results into one duplicate-free run in document
/// order. Each run is normalized first according to `sortedness`.
pub(crate) fn merge_runs<N: XdmNode>(order: &DocOrder<N>, runs: Vec<Vec<N>>, sortedness: Sortedness) -> Vec<N> {
    let runs: Vec<Vec<N>> = runs
        .into_iter()
        .filter(|r| !r.is_empty())
        .map(|mut run| {
            match sortedness {
                Sortedness::Sorted => {}
                Sortedness::ReverseSorted => run.reverse(),
                Sortedness::Unsorted => {
                    if !order.is_sorted(&run) {
                        tracing::trace!(len = run.len(), "sorting unsorted step result");
                        order.sort_distinct(&mut run);
                    }
                }
            }
            run
        })
        .collect();
    match runs.len() {
        0 => Vec::new(),
        1 => runs.into_iter().flatten().collect(),
        _ => runs
            .into_iter()
            .kmerge_by(|a, b| order.compare(a, b) == Ordering::Less)
            .dedup()
            .collect(),
    }
}
