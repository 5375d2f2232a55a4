//! Interpreter for the compiled expression graph.
//!
//! [`eval`] hands back lazy [`Sequence`]s: steps, predicates, paths, FLWOR streams and
//! simple maps pull their inputs on demand through cursors that own an `Rc<EvalCtx>`
//! together with the sub-expressions and environments they still need, so a result can
//! outlive the call that produced it. Per-evaluation state (global variable values, the
//! fallback root order, pending updates) lives in [`EvalCtx`] and never leaves the
//! evaluating thread.
use crate::compiler::CompiledQuery;
use crate::compiler::ir::{Catch, ErrVars, ExprKind, ExprRef, LookupKey, Module};
use crate::consts::{CODEPOINT_URI, ERR_NS};
use crate::engine::collation::Collation;
use crate::engine::runtime::{DynamicContext, Error, ErrorCode, FancyRegexProvider, RegexProvider};
use crate::model::{NodeKind, XdmNode};
use crate::types::{Kind, cast_atomic, castable};
use crate::update::PendingUpdate;
use crate::xdm::{Sequence, XdmArray, XdmAtomicValue, XdmItem, XdmMap, XdmSequence};
use chrono::{DateTime, FixedOffset, Utc};
use std::cell::{OnceCell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

mod arithmetic;
mod calls;
pub(crate) mod comparison;
mod constructors;
mod cursors;
mod flwor;
pub(crate) mod node_ops;
pub(crate) mod set_ops;
pub(crate) mod type_check;
mod updating;

pub use comparison::ComparatorTable;
use node_ops::{atomize_opt, atomize_vec};
use set_ops::DocOrder;

type Result<T> = std::result::Result<T, Error>;

/// Variable slots of the body being evaluated; `None` until the binding clause runs.
pub(crate) type Frame<N> = Vec<Option<Arc<XdmSequence<N>>>>;
pub(crate) type Env<N> = Rc<Frame<N>>;

#[derive(Clone)]
pub(crate) struct Focus<N> {
    pub(crate) item: Option<XdmItem<N>>,
    pub(crate) position: usize,
    /// Context size, when it is already known without materializing the input.
    pub(crate) size: Option<usize>,
}

impl<N> Focus<N> {
    pub(crate) fn absent() -> Self {
        Self {
            item: None,
            position: 0,
            size: None,
        }
    }

    pub(crate) fn at(item: XdmItem<N>, position: usize, size: Option<usize>) -> Self {
        Self {
            item: Some(item),
            position,
            size,
        }
    }
}

enum GlobalState<N> {
    Unset,
    InProgress,
    Done(Arc<XdmSequence<N>>),
}

/// Everything one evaluation shares between its cursors.
pub(crate) struct EvalCtx<N> {
    pub(crate) dyn_ctx: DynamicContext<N>,
    pub(crate) module: Arc<Module>,
    pub(crate) comparators: Arc<ComparatorTable>,
    pub(crate) order: DocOrder<N>,
    pub(crate) collation: Arc<dyn Collation>,
    pub(crate) regex: Arc<dyn RegexProvider>,
    pub(crate) now: DateTime<FixedOffset>,
    pub(crate) timezone: FixedOffset,
    pub(crate) source: Arc<str>,
    pub(crate) pending: RefCell<Vec<PendingUpdate<N>>>,
    globals: RefCell<Vec<GlobalState<N>>>,
    initial: OnceCell<Focus<N>>,
}

impl<N: XdmNode> EvalCtx<N> {
    pub(crate) fn new(
        query: &CompiledQuery,
        dyn_ctx: &DynamicContext<N>,
        comparators: Arc<ComparatorTable>,
    ) -> Result<Rc<Self>> {
        let module = query.module.clone();
        let collation_uri = dyn_ctx
            .default_collation
            .clone()
            .or_else(|| module.default_collation.clone())
            .or_else(|| module.static_ctx.default_collation.clone())
            .unwrap_or_else(|| CODEPOINT_URI.to_string());
        let collation = dyn_ctx.collations.get(&collation_uri).ok_or_else(|| {
            Error::from_code(
                ErrorCode::FOCH0002,
                format!("unknown default collation: {collation_uri}"),
            )
        })?;
        let timezone = dyn_ctx.implicit_timezone();
        let regex = dyn_ctx
            .regex
            .clone()
            .unwrap_or_else(|| Arc::new(FancyRegexProvider) as Arc<dyn RegexProvider>);
        let now = dyn_ctx
            .now
            .unwrap_or_else(|| Utc::now().with_timezone(&timezone));
        let globals = module.globals.iter().map(|_| GlobalState::Unset).collect();
        Ok(Rc::new(Self {
            dyn_ctx: dyn_ctx.clone(),
            module,
            comparators,
            order: DocOrder::new(),
            collation,
            regex,
            now,
            timezone,
            source: Arc::from(query.source()),
            pending: RefCell::new(Vec::new()),
            globals: RefCell::new(globals),
            initial: OnceCell::new(),
        }))
    }

    /// Evaluate the main module body.
    pub(crate) fn run(self: &Rc<Self>) -> Result<Sequence<N>> {
        let Some(body) = self.module.body.clone() else {
            return Ok(Sequence::empty());
        };
        let focus = self.initial_focus()?;
        let env: Env<N> = Rc::new(vec![None; self.module.frame_size]);
        tracing::debug!(
            frame = self.module.frame_size,
            globals = self.module.globals.len(),
            functions = self.module.functions.len(),
            "evaluating query"
        );
        eval(self, &body, &env, &focus)
    }

    pub(crate) fn take_pending(&self) -> Vec<PendingUpdate<N>> {
        self.pending.take()
    }

    pub(crate) fn push_pending(&self, update: PendingUpdate<N>) {
        self.pending.borrow_mut().push(update);
    }

    /// Focus of the main body and of global initializers.
    fn initial_focus(self: &Rc<Self>) -> Result<Focus<N>> {
        if let Some(f) = self.initial.get() {
            return Ok(f.clone());
        }
        let item = match &self.dyn_ctx.context_item {
            Some(item) => Some(item.clone()),
            None => match &self.module.context_item_default {
                Some((init, frame)) => {
                    let env: Env<N> = Rc::new(vec![None; *frame]);
                    let mut values = eval(self, init, &env, &Focus::absent())?.into_vec()?;
                    if values.len() != 1 {
                        return Err(Error::from_code(
                            ErrorCode::XPTY0004,
                            "the context item declaration must yield exactly one item",
                        ));
                    }
                    values.pop()
                }
                None => None,
            },
        };
        if let (Some(item), Some(ty)) = (&item, &self.module.context_item_type)
            && !type_check::item_matches(item, ty)
        {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("the context item does not match the declared type {ty}"),
            ));
        }
        let focus = match item {
            Some(item) => Focus::at(item, 1, Some(1)),
            None => Focus::absent(),
        };
        let _ = self.initial.set(focus.clone());
        Ok(focus)
    }

    fn global(self: &Rc<Self>, index: usize) -> Result<Sequence<N>> {
        {
            let slots = self.globals.borrow();
            match slots.get(index) {
                Some(GlobalState::Done(v)) => return Ok(seq_of_arc(v.clone())),
                Some(GlobalState::InProgress) => {
                    let name = self.module.globals[index].name.display();
                    return Err(Error::from_code(
                        ErrorCode::XQDY0054,
                        format!("variable ${name} depends on itself"),
                    ));
                }
                Some(GlobalState::Unset) => {}
                None => return Err(Error::from_code(ErrorCode::XPST0008, "unknown global variable")),
            }
        }
        self.globals.borrow_mut()[index] = GlobalState::InProgress;
        match self.compute_global(index) {
            Ok(values) => {
                let values = Arc::new(values);
                self.globals.borrow_mut()[index] = GlobalState::Done(values.clone());
                Ok(seq_of_arc(values))
            }
            Err(e) => {
                self.globals.borrow_mut()[index] = GlobalState::Unset;
                Err(e)
            }
        }
    }

    fn compute_global(self: &Rc<Self>, index: usize) -> Result<XdmSequence<N>> {
        let global = &self.module.globals[index];
        let supplied = if global.external {
            self.dyn_ctx.variables.get(&global.name).cloned()
        } else {
            None
        };
        let values = match (supplied, &global.init) {
            (Some(v), _) => v,
            (None, Some(init)) => {
                let focus = self.initial_focus()?;
                let env: Env<N> = Rc::new(vec![None; global.frame_size]);
                eval(self, init, &env, &focus)?.into_vec()?
            }
            (None, None) => {
                return Err(Error::from_code(
                    ErrorCode::XPDY0002,
                    format!("no value supplied for external variable ${}", global.name.display()),
                ));
            }
        };
        if let Some(ty) = &global.ty {
            type_check::check_matches(&values, ty, || format!("variable ${}", global.name.display()))?;
        }
        Ok(values)
    }

    /// Context for running a function item created by another compiled query: same
    /// dynamic environment, that query's globals.
    pub(crate) fn rebased(self: &Rc<Self>, module: &Arc<Module>) -> Rc<Self> {
        if Arc::ptr_eq(module, &self.module) {
            return self.clone();
        }
        Rc::new(Self {
            dyn_ctx: self.dyn_ctx.clone(),
            module: module.clone(),
            comparators: self.comparators.clone(),
            order: DocOrder::new(),
            collation: self.collation.clone(),
            regex: self.regex.clone(),
            now: self.now,
            timezone: self.timezone,
            source: self.source.clone(),
            pending: RefCell::new(Vec::new()),
            globals: RefCell::new(module.globals.iter().map(|_| GlobalState::Unset).collect()),
            initial: OnceCell::new(),
        })
    }

    /// Collation named by `uri`, or the default one.
    pub(crate) fn collation_for(&self, uri: Option<&str>) -> Result<Arc<dyn Collation>> {
        match uri {
            None => Ok(self.collation.clone()),
            Some(u) => self.dyn_ctx.collations.get(u).ok_or_else(|| {
                Error::from_code(ErrorCode::FOCH0002, format!("unknown collation URI: {u}"))
            }),
        }
    }
}

/// Evaluates a compiled query and materializes the result.
///
/// Updating queries are rejected with `XUST0001`; use
/// [`evaluate_updating`] to obtain their pending update list.
///
/// ```
/// use sylva_query::compiler::compile;
/// use sylva_query::engine::evaluator::evaluate;
/// use sylva_query::engine::runtime::{DynamicContext, StaticContext};
/// use sylva_query::model::simple::SimpleNode;
///
/// let q = compile("sum((1, 2, 3))", &StaticContext::default()).unwrap();
/// let out = evaluate::<SimpleNode>(&q, &DynamicContext::default()).unwrap();
/// assert_eq!(out.len(), 1);
/// ```
pub fn evaluate<N: XdmNode>(query: &CompiledQuery, dyn_ctx: &DynamicContext<N>) -> Result<XdmSequence<N>> {
    evaluate_stream(query, dyn_ctx)?.into_vec()
}

/// Evaluates a compiled query lazily: items are computed as the returned sequence is
/// consumed, and dropping it early abandons the remaining work.
pub fn evaluate_stream<N: XdmNode>(query: &CompiledQuery, dyn_ctx: &DynamicContext<N>) -> Result<Sequence<N>> {
    evaluate_with(query, dyn_ctx, Arc::new(ComparatorTable::new()))
}

/// Evaluates an updating (or plain) query, returning its value and the pending updates
/// it produced. Nothing is applied.
pub fn evaluate_updating<N: XdmNode>(
    query: &CompiledQuery,
    dyn_ctx: &DynamicContext<N>,
) -> Result<(XdmSequence<N>, Vec<PendingUpdate<N>>)> {
    evaluate_updating_with(query, dyn_ctx, Arc::new(ComparatorTable::new()))
}

pub(crate) fn evaluate_with<N: XdmNode>(
    query: &CompiledQuery,
    dyn_ctx: &DynamicContext<N>,
    comparators: Arc<ComparatorTable>,
) -> Result<Sequence<N>> {
    if query.is_updating() {
        return Err(Error::from_code(
            ErrorCode::XUST0001,
            "updating query evaluated as a plain query; use the updating entry point",
        ));
    }
    let ctx = EvalCtx::new(query, dyn_ctx, comparators)?;
    ctx.run()
}

pub(crate) fn evaluate_updating_with<N: XdmNode>(
    query: &CompiledQuery,
    dyn_ctx: &DynamicContext<N>,
    comparators: Arc<ComparatorTable>,
) -> Result<(XdmSequence<N>, Vec<PendingUpdate<N>>)> {
    let ctx = EvalCtx::new(query, dyn_ctx, comparators)?;
    let items = ctx.run()?.into_vec()?;
    Ok((items, ctx.take_pending()))
}

/// Lazy view over a shared, already materialized value.
pub(crate) fn seq_of_arc<N: XdmNode>(values: Arc<XdmSequence<N>>) -> Sequence<N> {
    match values.len() {
        0 => Sequence::empty(),
        1 => Sequence::singleton(values[0].clone()),
        len => Sequence::from_iter_lazy((0..len).map(move |i| Ok(values[i].clone()))),
    }
}

pub(crate) fn context_item<N: Clone>(focus: &Focus<N>) -> Result<XdmItem<N>> {
    focus
        .item
        .clone()
        .ok_or_else(|| Error::from_code(ErrorCode::XPDY0002, "context item is absent"))
}

pub(crate) fn context_node<N: XdmNode>(focus: &Focus<N>) -> Result<N> {
    match context_item(focus)? {
        XdmItem::Node(n) => Ok(n),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0020,
            "axis step applied to a context item that is not a node",
        )),
    }
}

fn slot<N: XdmNode>(env: &Env<N>, var: usize) -> Result<Arc<XdmSequence<N>>> {
    env.get(var).and_then(Clone::clone).ok_or_else(|| {
        Error::from_code(ErrorCode::XPDY0002, "variable referenced before it was bound")
    })
}

/// Copy of `env` with `var` bound to `value`.
pub(crate) fn bind<N: XdmNode>(env: &Env<N>, var: usize, value: XdmSequence<N>) -> Env<N> {
    let mut frame: Frame<N> = (**env).clone();
    if var >= frame.len() {
        frame.resize(var + 1, None);
    }
    frame[var] = Some(Arc::new(value));
    Rc::new(frame)
}

pub(crate) fn eval<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    expr: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    eval_kind(ctx, expr, env, focus).map_err(|e| e.or_span(expr.meta.span))
}

fn eval_vec<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    expr: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<XdmSequence<N>> {
    eval(ctx, expr, env, focus)?
        .into_vec()
        .map_err(|e| e.or_span(expr.meta.span))
}

fn ebv<N: XdmNode>(ctx: &Rc<EvalCtx<N>>, expr: &ExprRef, env: &Env<N>, focus: &Focus<N>) -> Result<bool> {
    eval(ctx, expr, env, focus)?
        .effective_boolean_value()
        .map_err(|e| e.or_span(expr.meta.span))
}

fn eval_kind<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    expr: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    match &expr.kind {
        ExprKind::Literal(v) => Ok(Sequence::atomic(v.clone())),
        ExprKind::Empty => Ok(Sequence::empty()),
        ExprKind::Sequence(parts) => {
            let parts = parts
                .iter()
                .map(|p| eval(ctx, p, env, focus))
                .collect::<Result<Vec<_>>>()?;
            Ok(Sequence::concat(parts))
        }
        ExprKind::Range(from, to) => range(ctx, from, to, env, focus),
        ExprKind::Local(var) => Ok(seq_of_arc(slot(env, *var)?)),
        ExprKind::Global(index) => ctx.global(*index),
        ExprKind::ContextItem => Ok(Sequence::singleton(context_item(focus)?)),
        ExprKind::Position => {
            context_item(focus)?;
            Ok(Sequence::atomic(XdmAtomicValue::Integer(focus.position as i64)))
        }
        ExprKind::Last => {
            context_item(focus)?;
            let size = focus.size.ok_or_else(|| {
                Error::from_code(ErrorCode::XPDY0002, "context size is not available here")
            })?;
            Ok(Sequence::atomic(XdmAtomicValue::Integer(size as i64)))
        }
        ExprKind::Root => {
            let root = context_node(focus)?.root();
            if root.kind() != NodeKind::Document {
                return Err(Error::from_code(
                    ErrorCode::XPDY0050,
                    "the root of the context node is not a document node",
                ));
            }
            Ok(Sequence::singleton(XdmItem::Node(root)))
        }
        ExprKind::Step(step) => cursors::eval_step(ctx, step, env, focus, true),
        ExprKind::Path { left, right, mode } => cursors::eval_path(ctx, left, right, *mode, env, focus),
        ExprKind::Filter { base, predicates } => {
            let input = eval(ctx, base, env, focus)?;
            cursors::apply_predicates(ctx, input, predicates, env)
        }
        ExprKind::SimpleMap { left, right } => cursors::simple_map(ctx, left, right, env, focus),
        ExprKind::Arithmetic { op, left, right } => {
            let a = atomize_opt(eval(ctx, left, env, focus)?, op.symbol())?;
            let b = atomize_opt(eval(ctx, right, env, focus)?, op.symbol())?;
            match (a, b) {
                (Some(a), Some(b)) => Ok(Sequence::atomic(arithmetic::binary(ctx, *op, a, b)?)),
                _ => Ok(Sequence::empty()),
            }
        }
        ExprKind::Unary { negate, operand } => {
            match atomize_opt(eval(ctx, operand, env, focus)?, "unary minus")? {
                Some(v) => Ok(Sequence::atomic(arithmetic::unary(v, *negate)?)),
                None => Ok(Sequence::empty()),
            }
        }
        ExprKind::Concat(left, right) => {
            let mut out = String::new();
            for side in [left, right] {
                if let Some(v) = atomize_opt(eval(ctx, side, env, focus)?, "||")? {
                    out.push_str(&v.string_value());
                }
            }
            Ok(Sequence::atomic(XdmAtomicValue::String(out)))
        }
        ExprKind::And(left, right) => {
            let b = ebv(ctx, left, env, focus)? && ebv(ctx, right, env, focus)?;
            Ok(Sequence::boolean(b))
        }
        ExprKind::Or(left, right) => {
            let b = ebv(ctx, left, env, focus)? || ebv(ctx, right, env, focus)?;
            Ok(Sequence::boolean(b))
        }
        ExprKind::ValueCompare { op, left, right } => {
            let a = atomize_opt(eval(ctx, left, env, focus)?, op.symbol())?;
            let b = atomize_opt(eval(ctx, right, env, focus)?, op.symbol())?;
            match (a, b) {
                (Some(a), Some(b)) => Ok(Sequence::boolean(comparison::value_compare(ctx, *op, a, b)?)),
                _ => Ok(Sequence::empty()),
            }
        }
        ExprKind::GeneralCompare { op, left, right } => {
            let l = eval(ctx, left, env, focus)?;
            let r = eval(ctx, right, env, focus)?;
            Ok(Sequence::boolean(comparison::general_compare(ctx, *op, l, r)?))
        }
        ExprKind::NodeCompare { op, left, right } => {
            let a = single_node(eval(ctx, left, env, focus)?)?;
            let b = single_node(eval(ctx, right, env, focus)?)?;
            match (a, b) {
                (Some(a), Some(b)) => Ok(Sequence::boolean(set_ops::node_compare(ctx, *op, &a, &b))),
                _ => Ok(Sequence::empty()),
            }
        }
        ExprKind::SetOp { op, left, right } => {
            let l = eval(ctx, left, env, focus)?;
            let r = eval(ctx, right, env, focus)?;
            set_ops::set_operation(ctx, *op, l, left, r, right)
        }
        ExprKind::InstanceOf { operand, ty } => {
            let values = eval_vec(ctx, operand, env, focus)?;
            Ok(Sequence::boolean(type_check::sequence_matches(&values, ty)))
        }
        ExprKind::Treat { operand, ty } => {
            let values = eval_vec(ctx, operand, env, focus)?;
            if !type_check::sequence_matches(&values, ty) {
                return Err(Error::from_code(
                    ErrorCode::XPDY0050,
                    format!("value does not match the required type {ty}"),
                ));
            }
            Ok(Sequence::from_vec(values))
        }
        ExprKind::Cast {
            operand,
            target,
            optional,
        } => match atomize_opt(eval(ctx, operand, env, focus)?, "cast as")? {
            Some(v) => Ok(Sequence::atomic(cast_atomic(v, *target, Some(&ctx.module.namespaces))?)),
            None if *optional => Ok(Sequence::empty()),
            None => Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("empty sequence cannot be cast to {}", target.display_name()),
            )),
        },
        ExprKind::Castable {
            operand,
            target,
            optional,
        } => {
            let values = atomize_vec(eval(ctx, operand, env, focus)?)?;
            let ok = match values.as_slice() {
                [] => *optional,
                [v] => castable(v, *target, Some(&ctx.module.namespaces)),
                _ => false,
            };
            Ok(Sequence::boolean(ok))
        }
        ExprKind::If {
            cond,
            then,
            otherwise,
        } => {
            if ebv(ctx, cond, env, focus)? {
                eval(ctx, then, env, focus)
            } else {
                eval(ctx, otherwise, env, focus)
            }
        }
        ExprKind::Switch {
            operand,
            cases,
            default,
        } => {
            let key = atomize_opt(eval(ctx, operand, env, focus)?, "switch")?;
            for (values, result) in cases {
                for v in values {
                    let candidate = atomize_opt(eval(ctx, v, env, focus)?, "case")?;
                    let hit = match (&key, &candidate) {
                        (None, None) => true,
                        (Some(a), Some(b)) => comparison::atomic_equal(ctx, a, b, ctx.collation.as_ref()),
                        _ => false,
                    };
                    if hit {
                        return eval(ctx, result, env, focus);
                    }
                }
            }
            eval(ctx, default, env, focus)
        }
        ExprKind::Typeswitch {
            operand,
            cases,
            default_var,
            default,
        } => {
            let values = eval_vec(ctx, operand, env, focus)?;
            for case in cases {
                if case.types.iter().any(|t| type_check::sequence_matches(&values, t)) {
                    let env = match case.var {
                        Some(var) => bind(env, var, values),
                        None => env.clone(),
                    };
                    return eval(ctx, &case.result, &env, focus);
                }
            }
            let env = match default_var {
                Some(var) => bind(env, *var, values),
                None => env.clone(),
            };
            eval(ctx, default, &env, focus)
        }
        ExprKind::Quantified {
            every,
            bindings,
            satisfies,
        } => Ok(Sequence::boolean(flwor::quantified(
            ctx, *every, bindings, satisfies, env, focus,
        )?)),
        ExprKind::Flwor { clauses, ret } => flwor::eval_flwor(ctx, clauses, ret, env, focus),
        ExprKind::Try { body, catches, err } => try_catch(ctx, body, catches, err, env, focus),
        ExprKind::Call { target, name, args } => calls::static_call(ctx, *target, name, args, env, focus),
        ExprKind::Partial {
            target,
            name,
            arity,
            args,
        } => calls::partial(ctx, *target, name, *arity, args, env, focus),
        ExprKind::DynamicCall { function, args } => calls::dynamic_call(ctx, function, args, env, focus),
        ExprKind::FunctionRef { target, name, arity } => {
            Ok(Sequence::singleton(calls::function_ref(ctx, *target, name, *arity)))
        }
        ExprKind::Inline(func) => Ok(Sequence::singleton(calls::closure(ctx, func, env)?)),
        ExprKind::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                let Some(key) = atomize_opt(eval(ctx, k, env, focus)?, "map key")? else {
                    return Err(Error::from_code(ErrorCode::XPTY0004, "map key must be a single atomic value"));
                };
                pairs.push((key, eval_vec(ctx, v, env, focus)?));
            }
            let map = XdmMap::try_from_entries(pairs).map_err(|key| {
                Error::from_code(
                    ErrorCode::XQDY0137,
                    format!("duplicate key {} in map constructor", key.string_value()),
                )
            })?;
            Ok(Sequence::singleton(XdmItem::Map(map)))
        }
        ExprKind::SquareArray(members) => {
            let members = members
                .iter()
                .map(|m| eval_vec(ctx, m, env, focus))
                .collect::<Result<Vec<_>>>()?;
            Ok(Sequence::singleton(XdmItem::Array(XdmArray::new(members))))
        }
        ExprKind::CurlyArray(content) => {
            let members = match content {
                Some(e) => eval_vec(ctx, e, env, focus)?.into_iter().map(|i| vec![i]).collect(),
                None => Vec::new(),
            };
            Ok(Sequence::singleton(XdmItem::Array(XdmArray::new(members))))
        }
        ExprKind::Lookup { base, key } => lookup(ctx, base.as_ref(), key, env, focus),
        ExprKind::ElementCtor { name, content } => constructors::element(ctx, name, content, env, focus),
        ExprKind::AttributeCtor { name, value } => constructors::attribute(ctx, name, value, env, focus),
        ExprKind::DocumentCtor(content) => constructors::document(ctx, content.as_ref(), env, focus),
        ExprKind::TextCtor(content) => constructors::text(ctx, content.as_ref(), env, focus),
        ExprKind::CommentCtor(content) => constructors::comment(ctx, content, env, focus),
        ExprKind::PiCtor { target, content } => {
            constructors::processing_instruction(ctx, target, content, env, focus)
        }
        ExprKind::Insert {
            source,
            position,
            target,
        } => updating::insert(ctx, source, *position, target, env, focus),
        ExprKind::Delete(target) => updating::delete(ctx, target, env, focus),
        ExprKind::ReplaceNode { target, replacement } => {
            updating::replace_node(ctx, target, replacement, env, focus)
        }
        ExprKind::ReplaceValue { target, value } => updating::replace_value(ctx, target, value, env, focus),
        ExprKind::Rename { target, name } => updating::rename(ctx, target, name, env, focus),
        ExprKind::Transform { copies, modify, ret } => updating::transform(ctx, copies, modify, ret, env, focus),
        ExprKind::Put { node, uri } => updating::put(ctx, node, uri, env, focus),
    }
}

fn range<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    from: &ExprRef,
    to: &ExprRef,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let (Some(a), Some(b)) = (
        range_bound(atomize_opt(eval(ctx, from, env, focus)?, "to")?)?,
        range_bound(atomize_opt(eval(ctx, to, env, focus)?, "to")?)?,
    ) else {
        return Ok(Sequence::empty());
    };
    if a > b {
        return Ok(Sequence::empty());
    }
    if a == b {
        return Ok(Sequence::atomic(XdmAtomicValue::Integer(a)));
    }
    Ok(Sequence::from_iter_lazy(
        (a..=b).map(|i| Ok(XdmItem::Atomic(XdmAtomicValue::Integer(i)))),
    ))
}

fn range_bound(value: Option<XdmAtomicValue>) -> Result<Option<i64>> {
    let Some(value) = value else { return Ok(None) };
    let value = if let XdmAtomicValue::UntypedAtomic(_) = value {
        cast_atomic(value, Kind::Integer, None)?
    } else {
        value
    };
    match value {
        XdmAtomicValue::Integer(i) | XdmAtomicValue::DerivedInteger { value: i, .. } => Ok(Some(i)),
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("range bound must be an xs:integer, got {}", other.type_name()),
        )),
    }
}

fn single_node<N: XdmNode>(seq: Sequence<N>) -> Result<Option<N>> {
    let mut items = seq.into_iter();
    let first = match items.next().transpose()? {
        None => return Ok(None),
        Some(XdmItem::Node(n)) => n,
        Some(_) => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                "node comparison operand is not a node",
            ));
        }
    };
    if items.next().transpose()?.is_some() {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            "node comparison operand has more than one item",
        ));
    }
    Ok(Some(first))
}

fn lookup<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    base: Option<&ExprRef>,
    key: &LookupKey,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let inputs = match base {
        Some(b) => eval_vec(ctx, b, env, focus)?,
        None => vec![context_item(focus)?],
    };
    let keys: Option<Vec<XdmAtomicValue>> = match key {
        LookupKey::Name(n) => Some(vec![XdmAtomicValue::String(n.clone())]),
        LookupKey::Integer(i) => Some(vec![XdmAtomicValue::Integer(*i)]),
        LookupKey::Expr(e) => Some(atomize_vec(eval(ctx, e, env, focus)?)?),
        LookupKey::Wildcard => None,
    };
    let mut out = Vec::new();
    for item in inputs {
        match item {
            XdmItem::Map(m) => match &keys {
                None => {
                    for (_, v) in m.iter() {
                        out.extend(v.iter().cloned());
                    }
                }
                Some(keys) => {
                    for k in keys {
                        if let Some(v) = m.get(k) {
                            out.extend(v.iter().cloned());
                        }
                    }
                }
            },
            XdmItem::Array(a) => match &keys {
                None => {
                    for m in a.members() {
                        out.extend(m.iter().cloned());
                    }
                }
                Some(keys) => {
                    for k in keys {
                        let position = array_position(k)?;
                        out.extend(a.get(position)?.iter().cloned());
                    }
                }
            },
            _ => {
                return Err(Error::from_code(
                    ErrorCode::XPTY0004,
                    "the lookup operator applies to maps and arrays only",
                ));
            }
        }
    }
    Ok(Sequence::from_vec(out))
}

pub(crate) fn array_position(key: &XdmAtomicValue) -> Result<i64> {
    match key {
        XdmAtomicValue::Integer(i) | XdmAtomicValue::DerivedInteger { value: i, .. } => Ok(*i),
        XdmAtomicValue::UntypedAtomic(_) => match cast_atomic(key.clone(), Kind::Integer, None)? {
            XdmAtomicValue::Integer(i) => Ok(i),
            _ => Err(Error::from_code(ErrorCode::XPTY0004, "array index must be an integer")),
        },
        other => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("array index must be an xs:integer, got {}", other.type_name()),
        )),
    }
}

fn try_catch<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    body: &ExprRef,
    catches: &[Catch],
    err: &ErrVars,
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let mark = ctx.pending.borrow().len();
    let error = match eval_vec(ctx, body, env, focus) {
        Ok(values) => return Ok(Sequence::from_vec(values)),
        Err(e) => e,
    };
    let ns = error.code.ns_uri.as_deref();
    let Some(handler) = catches
        .iter()
        .find(|c| c.tests.iter().any(|t| t.matches(ns, &error.code.local)))
    else {
        return Err(error);
    };
    ctx.pending.borrow_mut().truncate(mark);
    tracing::trace!(code = %error.format_code(), "error caught");
    let code = XdmAtomicValue::QName {
        ns_uri: error.code.ns_uri.clone(),
        prefix: (ns == Some(ERR_NS)).then(|| "err".to_string()),
        local: error.code.local.clone(),
    };
    let (line, column) = match error.span {
        Some(span) => {
            let (l, c) = span.line_col(&ctx.source);
            (
                vec![XdmItem::Atomic(XdmAtomicValue::Integer(l as i64))],
                vec![XdmItem::Atomic(XdmAtomicValue::Integer(c as i64))],
            )
        }
        None => (Vec::new(), Vec::new()),
    };
    let mut frame = (**env).clone();
    let needed = [err.code, err.description, err.value, err.module, err.line_number, err.column_number]
        .into_iter()
        .max()
        .unwrap_or(0);
    if frame.len() <= needed {
        frame.resize(needed + 1, None);
    }
    frame[err.code] = Some(Arc::new(vec![XdmItem::Atomic(code)]));
    frame[err.description] = Some(Arc::new(vec![XdmItem::Atomic(XdmAtomicValue::String(
        error.message.clone(),
    ))]));
    frame[err.value] = Some(Arc::new(
        error
            .value
            .iter()
            .map(|v| XdmItem::Atomic(XdmAtomicValue::String(v.clone())))
            .collect(),
    ));
    frame[err.module] = Some(Arc::new(Vec::new()));
    frame[err.line_number] = Some(Arc::new(line));
    frame[err.column_number] = Some(Arc::new(column));
    eval(ctx, &handler.body, &Rc::new(frame), focus)
}
