//! Native closure backend.
//!
//! Lowers the navigational subset of the expression graph (context item, root, forward
//! and parent steps, paths, boolean predicates, string equality on paths) into
//! composed closures over the host node type. Anything outside the subset makes
//! [`compile_native`] return `None` and the caller stays on the interpreter.
use super::CompiledQuery;
use super::ir::{CallTarget, CompOp, Expr, ExprKind, PathMode, StepIr};
use crate::consts::{CODEPOINT_URI, FNS};
use crate::engine::evaluator::node_ops::matches_test;
use crate::engine::evaluator::set_ops::DocOrder;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, XdmNode};
use crate::parser::ast::Axis;
use crate::xdm::XdmAtomicValue;
use core::fmt;
use std::sync::Arc;

type Result<T> = std::result::Result<T, Error>;
type NodesFn<N> = Arc<dyn Fn(&N) -> Result<Vec<N>> + Send + Sync>;
type BoolFn<N> = Arc<dyn Fn(&N) -> Result<bool> + Send + Sync>;

/// A query lowered to closures, evaluated against a context node.
pub struct NativeQuery<N> {
    nodes: Option<NodesFn<N>>,
    boolean: BoolFn<N>,
}

impl<N> fmt::Debug for NativeQuery<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeQuery")
            .field("yields_nodes", &self.nodes.is_some())
            .finish()
    }
}

impl<N: XdmNode> NativeQuery<N> {
    /// True when the query is a node expression; false for boolean-valued ones.
    pub fn yields_nodes(&self) -> bool {
        self.nodes.is_some()
    }

    /// Selected nodes in document order, or `None` for a boolean-valued query.
    pub fn nodes(&self, context: &N) -> Option<Result<Vec<N>>> {
        self.nodes.as_ref().map(|f| f(context))
    }

    /// Effective boolean value of the query.
    pub fn boolean(&self, context: &N) -> Result<bool> {
        (self.boolean)(context)
    }
}

/// Lower `query` when every part of it lies in the supported subset.
pub fn compile_native<N: XdmNode>(query: &CompiledQuery) -> Option<NativeQuery<N>> {
    let module = &query.module;
    // string comparisons below are codepoint comparisons
    if module
        .default_collation
        .as_deref()
        .is_some_and(|c| c != CODEPOINT_URI)
        || !module.globals.is_empty()
        || query.is_updating()
    {
        return None;
    }
    let body = module.body.as_ref()?;
    if let Some(nodes) = lower_nodes::<N>(body) {
        let inner = nodes.clone();
        tracing::debug!("query lowered to native node closures");
        return Some(NativeQuery {
            nodes: Some(nodes),
            boolean: Arc::new(move |c: &N| Ok(!inner(c)?.is_empty())),
        });
    }
    let boolean = lower_bool::<N>(body)?;
    tracing::debug!("query lowered to a native predicate");
    Some(NativeQuery { nodes: None, boolean })
}

fn lower_nodes<N: XdmNode>(expr: &Expr) -> Option<NodesFn<N>> {
    match &expr.kind {
        ExprKind::ContextItem => Some(Arc::new(|c: &N| Ok(vec![c.clone()]))),
        ExprKind::Root => Some(Arc::new(|c: &N| {
            let root = c.root();
            if root.kind() != NodeKind::Document {
                return Err(Error::from_code(
                    ErrorCode::XPDY0050,
                    "the root of the context node is not a document node",
                ));
            }
            Ok(vec![root])
        })),
        ExprKind::Step(step) => lower_step(step),
        ExprKind::Path { left, right, mode } => {
            let merge = match mode {
                PathMode::Concat => false,
                PathMode::Merge => true,
                PathMode::Items => return None,
            };
            let left = lower_nodes::<N>(left)?;
            let right = lower_nodes::<N>(right)?;
            Some(Arc::new(move |c: &N| {
                let mut out = Vec::new();
                for n in left(c)? {
                    out.extend(right(&n)?);
                }
                if merge {
                    DocOrder::new().sort_distinct(&mut out);
                }
                Ok(out)
            }))
        }
        ExprKind::Filter { base, predicates } => {
            let base = lower_nodes::<N>(base)?;
            let predicates = lower_predicates::<N>(predicates)?;
            Some(Arc::new(move |c: &N| retain(base(c)?, &predicates)))
        }
        _ => None,
    }
}

fn lower_predicates<N: XdmNode>(predicates: &[Arc<Expr>]) -> Option<Vec<BoolFn<N>>> {
    predicates.iter().map(|p| lower_bool::<N>(p)).collect()
}

fn retain<N: XdmNode>(nodes: Vec<N>, predicates: &[BoolFn<N>]) -> Result<Vec<N>> {
    let mut out = Vec::with_capacity(nodes.len());
    'nodes: for n in nodes {
        for p in predicates {
            if !p(&n)? {
                continue 'nodes;
            }
        }
        out.push(n);
    }
    Ok(out)
}

fn lower_step<N: XdmNode>(step: &StepIr) -> Option<NodesFn<N>> {
    if !matches!(
        step.axis,
        Axis::Child | Axis::Attribute | Axis::SelfAxis | Axis::Parent | Axis::Descendant | Axis::DescendantOrSelf
    ) {
        return None;
    }
    let predicates = lower_predicates::<N>(&step.predicates)?;
    let (axis, test, bucket) = (step.axis, step.test.clone(), step.bucket.clone());
    let principal = if axis == Axis::Attribute {
        NodeKind::Attribute
    } else {
        NodeKind::Element
    };
    Some(Arc::new(move |c: &N| {
        let candidates = match axis {
            Axis::Child => c.child_nodes(bucket.as_ref()),
            Axis::Attribute => c.all_attributes(),
            Axis::Parent => c.parent().into_iter().collect(),
            Axis::Descendant => descendants(c, false),
            Axis::DescendantOrSelf => descendants(c, true),
            _ => vec![c.clone()],
        };
        let selected = candidates
            .into_iter()
            .filter(|n| matches_test(n, &test, principal))
            .collect();
        retain(selected, &predicates)
    }))
}

/// Pre-order walk of the subtree below `node`, attributes excluded.
fn descendants<N: XdmNode>(node: &N, include_self: bool) -> Vec<N> {
    let mut out = Vec::new();
    if include_self {
        out.push(node.clone());
    }
    let mut stack: Vec<N> = node.children().collect();
    stack.reverse();
    while let Some(n) = stack.pop() {
        let start = stack.len();
        stack.extend(n.children());
        stack[start..].reverse();
        out.push(n);
    }
    out
}

fn is_fn(name: &crate::xdm::ExpandedName, local: &str) -> bool {
    name.ns_uri.as_deref() == Some(FNS) && name.local == local
}

fn lower_bool<N: XdmNode>(expr: &Expr) -> Option<BoolFn<N>> {
    match &expr.kind {
        ExprKind::And(a, b) => {
            let (a, b) = (lower_bool::<N>(a)?, lower_bool::<N>(b)?);
            Some(Arc::new(move |c: &N| Ok(a(c)? && b(c)?)))
        }
        ExprKind::Or(a, b) => {
            let (a, b) = (lower_bool::<N>(a)?, lower_bool::<N>(b)?);
            Some(Arc::new(move |c: &N| Ok(a(c)? || b(c)?)))
        }
        ExprKind::Call {
            target: CallTarget::Builtin,
            name,
            args,
        } => match args.as_slice() {
            [] if is_fn(name, "true") => Some(Arc::new(|_: &N| Ok(true))),
            [] if is_fn(name, "false") => Some(Arc::new(|_: &N| Ok(false))),
            [arg] if is_fn(name, "not") => {
                let inner = lower_bool::<N>(arg)?;
                Some(Arc::new(move |c: &N| Ok(!inner(c)?)))
            }
            [arg] if is_fn(name, "boolean") => lower_bool::<N>(arg),
            [arg] if is_fn(name, "exists") => {
                let nodes = lower_nodes::<N>(arg)?;
                Some(Arc::new(move |c: &N| Ok(!nodes(c)?.is_empty())))
            }
            [arg] if is_fn(name, "empty") => {
                let nodes = lower_nodes::<N>(arg)?;
                Some(Arc::new(move |c: &N| Ok(nodes(c)?.is_empty())))
            }
            _ => None,
        },
        ExprKind::GeneralCompare { op, left, right } => {
            let equal = match op {
                CompOp::Eq => true,
                CompOp::Ne => false,
                _ => return None,
            };
            let (path, literal) = match (&left.kind, &right.kind) {
                (_, ExprKind::Literal(XdmAtomicValue::String(s))) => (left, s.clone()),
                (ExprKind::Literal(XdmAtomicValue::String(s)), _) => (right, s.clone()),
                _ => return None,
            };
            let nodes = lower_nodes::<N>(path)?;
            Some(Arc::new(move |c: &N| {
                Ok(nodes(c)?
                    .iter()
                    .any(|n| (n.string_value() == literal) == equal))
            }))
        }
        _ => {
            let nodes = lower_nodes::<N>(expr)?;
            Some(Arc::new(move |c: &N| Ok(!nodes(c)?.is_empty())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::compile;
    use crate::engine::evaluator::evaluate;
    use crate::engine::runtime::{DynamicContextBuilder, StaticContext};
    use crate::model::simple::{SimpleNode, attr, doc, elem, text};
    use crate::xdm::XdmItem;

    fn sample() -> SimpleNode {
        doc()
            .child(
                elem("root")
                    .child(elem("item").attr(attr("type", "a")).child(text("one")))
                    .child(elem("item").attr(attr("type", "b")).child(text("two")))
                    .child(elem("group").child(elem("item").attr(attr("type", "a")))),
            )
            .build()
    }

    fn interpreted(query: &str, context: &SimpleNode) -> Vec<SimpleNode> {
        let q = compile(query, &StaticContext::default()).unwrap();
        let ctx = DynamicContextBuilder::new()
            .with_context_item(XdmItem::Node(context.clone()))
            .build();
        evaluate(&q, &ctx)
            .unwrap()
            .into_iter()
            .filter_map(|i| i.as_node().cloned())
            .collect()
    }

    #[test]
    fn node_queries_match_the_interpreter() {
        let root = sample();
        for query in [
            "//item",
            "//item[@type = 'a']",
            "/root/item[not(@type = 'b')]",
            "//item[@type != 'a' or exists(text())]",
            "//group/item/..",
            "descendant-or-self::node()/item",
        ] {
            let q = compile(query, &StaticContext::default()).unwrap();
            let native = compile_native::<SimpleNode>(&q).unwrap_or_else(|| panic!("{query} not lowered"));
            assert_eq!(native.nodes(&root).unwrap().unwrap(), interpreted(query, &root), "{query}");
        }
    }

    #[test]
    fn boolean_queries_evaluate_natively() {
        let root = sample();
        let q = compile("exists(//group) and not(//item[@type = 'c'])", &StaticContext::default()).unwrap();
        let native = compile_native::<SimpleNode>(&q).unwrap();
        assert!(!native.yields_nodes());
        assert!(native.boolean(&root).unwrap());
    }

    #[test]
    fn queries_outside_the_subset_are_refused() {
        for query in ["1 + 2", "//item[1]", "//item[@type = 1]", "preceding::item", "$x"] {
            let Ok(q) = compile(query, &StaticContext::default()) else {
                continue;
            };
            assert!(compile_native::<SimpleNode>(&q).is_none(), "{query}");
        }
    }
}
