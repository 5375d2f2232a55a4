//! Cursor types for streaming evaluation: axis steps, predicates, paths and `!`.
use super::node_ops::matches_test;
use super::set_ops::{evaluated_order, merge_runs};
use super::{Env, EvalCtx, Focus, Result, context_node, eval};
use crate::compiler::ir::{ExprKind, ExprRef, PathMode, StepIr};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{Bucket, NodeKind, XdmNode};
use crate::parser::ast::Axis;
use crate::types::NodeTest;
use crate::types::numeric::{NumKind, classify};
use crate::xdm::sequence::{SequenceIter, ebv_of};
use crate::xdm::{Sequence, XdmAtomicValue, XdmItem};
use core::cmp::Ordering;
use smallvec::SmallVec;
use std::rc::Rc;

enum AxisState<N> {
    Init,
    SelfOnce,
    Children(Option<N>),
    Attributes(std::vec::IntoIter<N>),
    Descend(Option<N>),
    Parent,
    Ancestors(Option<N>),
    FollowingSiblings(Option<N>),
    PrecedingSiblings(Option<N>),
    Following(Option<N>),
    Preceding {
        next: Option<N>,
        // ancestors of the reference node are not on the preceding axis
        ancestors: SmallVec<[N; 16]>,
    },
    Done,
}

/// Streams one axis from one context node, in axis order.
struct AxisCursor<N> {
    node: N,
    axis: Axis,
    test: NodeTest,
    bucket: Option<Bucket>,
    principal: NodeKind,
    state: AxisState<N>,
}

impl<N: XdmNode> AxisCursor<N> {
    fn new(node: N, step: &StepIr) -> Self {
        let principal = if step.axis == Axis::Attribute {
            NodeKind::Attribute
        } else {
            NodeKind::Element
        };
        Self {
            node,
            axis: step.axis,
            test: step.test.clone(),
            bucket: step.bucket.clone(),
            principal,
            state: AxisState::Init,
        }
    }

    fn init_state(&self) -> AxisState<N> {
        let node = &self.node;
        let bucket = self.bucket.as_ref();
        match self.axis {
            Axis::SelfAxis => AxisState::SelfOnce,
            Axis::Child => AxisState::Children(node.first_child(bucket)),
            Axis::Attribute => AxisState::Attributes(node.all_attributes().into_iter()),
            Axis::Descendant => AxisState::Descend(next_in_subtree(node, node)),
            Axis::DescendantOrSelf => AxisState::Descend(Some(node.clone())),
            Axis::Parent => AxisState::Parent,
            Axis::Ancestor => AxisState::Ancestors(node.parent()),
            Axis::AncestorOrSelf => AxisState::Ancestors(Some(node.clone())),
            Axis::FollowingSibling => AxisState::FollowingSiblings(node.next_sibling(bucket)),
            Axis::PrecedingSibling => AxisState::PrecedingSiblings(node.previous_sibling(bucket)),
            Axis::Following => {
                let start = if node.kind() == NodeKind::Attribute {
                    node.parent()
                        .and_then(|p| p.first_child(None).or_else(|| next_after_subtree(&p)))
                } else {
                    next_after_subtree(node)
                };
                AxisState::Following(start)
            }
            Axis::Preceding => {
                let reference = if node.kind() == NodeKind::Attribute {
                    node.parent()
                } else {
                    Some(node.clone())
                };
                match reference {
                    Some(r) => {
                        let mut ancestors = SmallVec::new();
                        let mut cur = r.parent();
                        while let Some(p) = cur {
                            cur = p.parent();
                            ancestors.push(p);
                        }
                        let next = previous_in_document(&r, &ancestors);
                        AxisState::Preceding { next, ancestors }
                    }
                    None => AxisState::Done,
                }
            }
            // rejected before a cursor is built
            Axis::Namespace => AxisState::Done,
        }
    }

    /// Next node on the axis, before the node test.
    fn advance(&mut self) -> Option<N> {
        let bucket = self.bucket.as_ref();
        match &mut self.state {
            AxisState::Init | AxisState::Done => None,
            AxisState::SelfOnce => {
                self.state = AxisState::Done;
                Some(self.node.clone())
            }
            AxisState::Parent => {
                self.state = AxisState::Done;
                self.node.parent()
            }
            AxisState::Children(next) | AxisState::FollowingSiblings(next) => {
                let cur = next.take()?;
                *next = cur.next_sibling(bucket);
                Some(cur)
            }
            AxisState::PrecedingSiblings(next) => {
                let cur = next.take()?;
                *next = cur.previous_sibling(bucket);
                Some(cur)
            }
            AxisState::Attributes(iter) => iter.next(),
            AxisState::Descend(next) => {
                let cur = next.take()?;
                *next = next_in_subtree(&cur, &self.node);
                Some(cur)
            }
            AxisState::Ancestors(next) => {
                let cur = next.take()?;
                *next = cur.parent();
                Some(cur)
            }
            AxisState::Following(next) => {
                let cur = next.take()?;
                *next = cur.first_child(None).or_else(|| next_after_subtree(&cur));
                Some(cur)
            }
            AxisState::Preceding { next, ancestors } => {
                let cur = next.take()?;
                *next = previous_in_document(&cur, ancestors);
                Some(cur)
            }
        }
    }
}

impl<N: XdmNode> Iterator for AxisCursor<N> {
    type Item = N;

    fn next(&mut self) -> Option<N> {
        if matches!(self.state, AxisState::Init) {
            self.state = self.init_state();
        }
        loop {
            let candidate = self.advance()?;
            if matches_test(&candidate, &self.test, self.principal) {
                return Some(candidate);
            }
        }
    }
}

/// Pre-order successor of `cur` that stays inside the subtree of `anchor`.
fn next_in_subtree<N: XdmNode>(cur: &N, anchor: &N) -> Option<N> {
    if let Some(child) = cur.first_child(None) {
        return Some(child);
    }
    let mut n = cur.clone();
    loop {
        if n == *anchor {
            return None;
        }
        if let Some(sibling) = n.next_sibling(None) {
            return Some(sibling);
        }
        n = n.parent()?;
    }
}

/// First node after the subtree of `node` in document order.
fn next_after_subtree<N: XdmNode>(node: &N) -> Option<N> {
    let mut n = node.clone();
    loop {
        if let Some(sibling) = n.next_sibling(None) {
            return Some(sibling);
        }
        n = n.parent()?;
    }
}

/// Reverse document order predecessor of `cur`, skipping `ancestors`.
fn previous_in_document<N: XdmNode>(cur: &N, ancestors: &[N]) -> Option<N> {
    let mut n = cur.clone();
    loop {
        if let Some(sibling) = n.previous_sibling(None) {
            let mut deepest = sibling;
            while let Some(last) = deepest.last_child(None) {
                deepest = last;
            }
            return Some(deepest);
        }
        let parent = n.parent()?;
        if !ancestors.contains(&parent) {
            return Some(parent);
        }
        n = parent;
    }
}

/// Evaluate one axis step against the context node. Predicates see positions in axis
/// order; with `doc_order` the result of a reverse axis is flipped into document order.
pub(crate) fn eval_step<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    step: &StepIr,
    env: &Env<N>,
    focus: &Focus<N>,
    doc_order: bool,
) -> Result<Sequence<N>> {
    let node = context_node(focus)?;
    if step.axis == Axis::Namespace {
        return Err(Error::not_implemented("the namespace axis"));
    }
    let cursor = AxisCursor::new(node, step);
    let mut seq = Sequence::from_iter_lazy(cursor.map(|n| Ok(XdmItem::Node(n))));
    if !step.predicates.is_empty() {
        seq = apply_predicates(ctx, seq, &step.predicates, env)?;
    }
    if doc_order && step.axis.is_reverse() {
        let mut items = seq.into_vec()?;
        items.reverse();
        return Ok(Sequence::from_vec(items));
    }
    Ok(seq)
}

pub(crate) fn apply_predicates<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    input: Sequence<N>,
    predicates: &[ExprRef],
    env: &Env<N>,
) -> Result<Sequence<N>> {
    predicates
        .iter()
        .try_fold(input, |seq, pred| apply_predicate(ctx, seq, pred, env))
}

fn apply_predicate<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    input: Sequence<N>,
    pred: &ExprRef,
    env: &Env<N>,
) -> Result<Sequence<N>> {
    // `[3]`: stop pulling once the item is found
    if let ExprKind::Literal(XdmAtomicValue::Integer(k)) = &pred.kind {
        let Ok(wanted) = usize::try_from(*k) else {
            return Ok(Sequence::empty());
        };
        if wanted == 0 {
            return Ok(Sequence::empty());
        }
        let mut position = 0;
        return Ok(Sequence::from_iter_lazy(
            input
                .into_iter()
                .filter_map(move |r| match r {
                    Ok(item) => {
                        position += 1;
                        (position == wanted).then_some(Ok(item))
                    }
                    Err(e) => Some(Err(e)),
                })
                .take(1),
        ));
    }
    if pred.meta.focus.last {
        let items = input.into_vec()?;
        let size = items.len();
        let mut out = Vec::new();
        for (i, item) in items.into_iter().enumerate() {
            let focus = Focus::at(item.clone(), i + 1, Some(size));
            if predicate_holds(eval(ctx, pred, env, &focus)?, i + 1)? {
                out.push(item);
            }
        }
        return Ok(Sequence::from_vec(out));
    }
    Ok(Sequence::from_iter_lazy(PredicateCursor {
        ctx: ctx.clone(),
        pred: pred.clone(),
        env: env.clone(),
        input: input.into_iter(),
        position: 0,
    }))
}

/// A numeric predicate value selects by position; anything else by its effective
/// boolean value.
fn predicate_holds<N: XdmNode>(result: Sequence<N>, position: usize) -> Result<bool> {
    let mut items = result.into_iter();
    let Some(first) = items.next().transpose()? else {
        return Ok(false);
    };
    let more = items.next().transpose()?.is_some();
    if let XdmItem::Atomic(a) = &first
        && let Some(n) = classify(a)
        && !more
    {
        let position = i64::try_from(position).unwrap_or(i64::MAX);
        return Ok(n.partial_cmp(NumKind::Int(position)) == Some(Ordering::Equal));
    }
    ebv_of(&first, more)
}

struct PredicateCursor<N> {
    ctx: Rc<EvalCtx<N>>,
    pred: ExprRef,
    env: Env<N>,
    input: SequenceIter<N>,
    position: usize,
}

impl<N: XdmNode> Iterator for PredicateCursor<N> {
    type Item = Result<XdmItem<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let item = match self.input.next()? {
                Ok(item) => item,
                Err(e) => return Some(Err(e)),
            };
            self.position += 1;
            let focus = Focus::at(item.clone(), self.position, None);
            let keep = eval(&self.ctx, &self.pred, &self.env, &focus)
                .and_then(|r| predicate_holds(r, self.position));
            match keep {
                Ok(true) => return Some(Ok(item)),
                Ok(false) => {}
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

/// Evaluates `right` once per item of the input with that item as focus and streams
/// the concatenated results.
struct FocusMapCursor<N> {
    ctx: Rc<EvalCtx<N>>,
    right: ExprRef,
    env: Env<N>,
    input: SequenceIter<N>,
    size: Option<usize>,
    position: usize,
    current: Option<SequenceIter<N>>,
    /// `E1/E2`: the input must consist of nodes.
    path: bool,
    /// Kind of the first result item (node or not), to reject mixed path results.
    seen_nodes: Option<bool>,
}

impl<N: XdmNode> FocusMapCursor<N> {
    fn next_input(&mut self) -> Option<Result<SequenceIter<N>>> {
        let item = match self.input.next()? {
            Ok(item) => item,
            Err(e) => return Some(Err(e)),
        };
        if self.path && !item.is_node() {
            return Some(Err(path_operand_error()));
        }
        self.position += 1;
        let focus = Focus::at(item, self.position, self.size);
        Some(eval_right(&self.ctx, &self.right, &self.env, &focus, false).map(IntoIterator::into_iter))
    }
}

impl<N: XdmNode> Iterator for FocusMapCursor<N> {
    type Item = Result<XdmItem<N>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(current) = &mut self.current {
                match current.next() {
                    Some(Ok(item)) => {
                        if self.path {
                            let is_node = item.is_node();
                            if *self.seen_nodes.get_or_insert(is_node) != is_node {
                                return Some(Err(mixed_path_error()));
                            }
                        }
                        return Some(Ok(item));
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => self.current = None,
                }
            }
            match self.next_input()? {
                Ok(iter) => self.current = Some(iter),
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

fn path_operand_error() -> Error {
    Error::from_code(
        ErrorCode::XPTY0019,
        "the left operand of '/' contains an item that is not a node",
    )
}

fn mixed_path_error() -> Error {
    Error::from_code(
        ErrorCode::XPTY0018,
        "the result of a path step mixes nodes and non-node items",
    )
}

/// `right` under `focus`; a bare step is left in axis order when `raw` is set.
fn eval_right<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    right: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
    raw: bool,
) -> Result<Sequence<N>> {
    match &right.kind {
        ExprKind::Step(step) if raw => {
            eval_step(ctx, step, env, focus, false).map_err(|e| e.or_span(right.meta.span))
        }
        _ => eval(ctx, right, env, focus),
    }
}

/// Input iterator plus the context size when `right` asks for `last()`.
fn focus_input<N: XdmNode>(input: Sequence<N>, right: &ExprRef) -> Result<(SequenceIter<N>, Option<usize>)> {
    if right.meta.focus.last {
        let items = input.into_vec()?;
        let size = items.len();
        Ok((Sequence::from_vec(items).into_iter(), Some(size)))
    } else {
        Ok((input.into_iter(), None))
    }
}

pub(crate) fn eval_path<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    left: &ExprRef,
    right: &ExprRef,
    mode: PathMode,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let input = eval(ctx, left, env, focus)?;
    match mode {
        PathMode::Concat | PathMode::Items => {
            let (input, size) = focus_input(input, right)?;
            Ok(Sequence::from_iter_lazy(FocusMapCursor {
                ctx: ctx.clone(),
                right: right.clone(),
                env: env.clone(),
                input,
                size,
                position: 0,
                current: None,
                path: true,
                seen_nodes: None,
            }))
        }
        PathMode::Merge => merge_path(ctx, input, right, env),
    }
}

fn merge_path<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    input: Sequence<N>,
    right: &ExprRef,
    env: &Env<N>,
) -> Result<Sequence<N>> {
    let contexts = input.into_vec()?;
    let size = contexts.len();
    let raw = matches!(right.kind, ExprKind::Step(_));
    let mut runs = Vec::with_capacity(size);
    let mut others = Vec::new();
    for (i, item) in contexts.into_iter().enumerate() {
        if !item.is_node() {
            return Err(path_operand_error());
        }
        let focus = Focus::at(item, i + 1, Some(size));
        let mut run = Vec::new();
        for out in eval_right(ctx, right, env, &focus, raw)? {
            match out? {
                XdmItem::Node(n) if others.is_empty() => run.push(n),
                XdmItem::Node(_) => return Err(mixed_path_error()),
                other => {
                    if !run.is_empty() || runs.iter().any(|r: &Vec<N>| !r.is_empty()) {
                        return Err(mixed_path_error());
                    }
                    others.push(other);
                }
            }
        }
        runs.push(run);
    }
    if !others.is_empty() {
        return Ok(Sequence::from_vec(others));
    }
    let sortedness = if raw {
        right.meta.sortedness
    } else {
        evaluated_order(right)
    };
    let nodes = merge_runs(&ctx.order, runs, sortedness);
    Ok(Sequence::from_vec(nodes.into_iter().map(XdmItem::Node).collect()))
}

/// `E1 ! E2`
pub(crate) fn simple_map<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    left: &ExprRef,
    right: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let (input, size) = focus_input(eval(ctx, left, env, focus)?, right)?;
    Ok(Sequence::from_iter_lazy(FocusMapCursor {
        ctx: ctx.clone(),
        right: right.clone(),
        env: env.clone(),
        input,
        size,
        position: 0,
        current: None,
        path: false,
        seen_nodes: None,
    }))
}
