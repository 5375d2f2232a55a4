//! Static, dynamic and partial function calls, function references and closures.
use super::node_ops::atomize_items;
use super::type_check::convert;
use super::{Env, EvalCtx, Focus, Result, array_position, eval, eval_vec, slot};
use crate::compiler::ir::{CallTarget, ExprRef, InlineFunction};
use crate::engine::runtime::{CallCtx, Error, ErrorCode, FunctionCaller, FunctionKey, ResolveError};
use crate::model::XdmNode;
use crate::xdm::{ExpandedName, FunctionBody, FunctionItem, Sequence, XdmItem, XdmSequence};
use std::rc::Rc;
use std::sync::Arc;

impl<N: XdmNode> FunctionCaller<N> for Rc<EvalCtx<N>> {
    fn call_function(&self, function: &XdmItem<N>, args: Vec<XdmSequence<N>>) -> Result<XdmSequence<N>> {
        call_item(self, function, args)
    }
}

pub(crate) fn static_call<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: CallTarget,
    name: &ExpandedName,
    args: &[ExprRef],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let values = args
        .iter()
        .map(|a| eval_vec(ctx, a, env, focus))
        .collect::<Result<Vec<_>>>()?;
    match target {
        CallTarget::Builtin => Ok(Sequence::from_vec(call_builtin(ctx, name, values, focus.item.as_ref())?)),
        CallTarget::User(index) => call_user(ctx, index, values),
    }
}

fn call_builtin<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    name: &ExpandedName,
    args: Vec<XdmSequence<N>>,
    context_item: Option<&XdmItem<N>>,
) -> Result<XdmSequence<N>> {
    let (sig, imp) = ctx
        .dyn_ctx
        .functions
        .resolve(name, args.len())
        .map_err(ResolveError::into_error)?;
    let args = args
        .into_iter()
        .enumerate()
        .map(|(i, value)| match sig.param(i) {
            Some(ty) => convert(value, ty, || format!("argument {} of {}()", i + 1, name.display())),
            None => Ok(value),
        })
        .collect::<Result<Vec<_>>>()?;
    let call = CallCtx {
        dyn_ctx: &ctx.dyn_ctx,
        static_ctx: &ctx.module.static_ctx,
        context_item,
        default_collation: ctx.collation.clone(),
        regex: ctx.regex.clone(),
        now: ctx.now,
        implicit_timezone: ctx.timezone,
        comparators: ctx.comparators.as_ref(),
        caller: ctx,
    };
    imp(&call, &args)
}

fn call_user<N: XdmNode>(ctx: &Rc<EvalCtx<N>>, index: usize, args: Vec<XdmSequence<N>>) -> Result<Sequence<N>> {
    let module = ctx.module.clone();
    let func = module
        .functions
        .get(index)
        .ok_or_else(|| Error::from_code(ErrorCode::XPST0017, "unknown user function"))?;
    let mut frame = vec![None; func.frame_size];
    for (i, (param, value)) in func.params.iter().zip(args).enumerate() {
        let value = match &param.ty {
            Some(ty) => convert(value, ty, || format!("argument {} of {}()", i + 1, func.name.display()))?,
            None => value,
        };
        frame[param.var] = Some(Arc::new(value));
    }
    let result = eval(ctx, &func.body, &Rc::new(frame), &Focus::absent())?;
    match &func.return_type {
        Some(ty) => Ok(Sequence::from_vec(convert(result.into_vec()?, ty, || {
            format!("result of {}()", func.name.display())
        })?)),
        None => Ok(result),
    }
}

fn call_inline<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    func: &InlineFunction,
    captured: &[(usize, Arc<XdmSequence<N>>)],
    args: Vec<XdmSequence<N>>,
) -> Result<XdmSequence<N>> {
    let mut frame = vec![None; func.frame_size];
    for (slot, value) in captured {
        frame[*slot] = Some(value.clone());
    }
    for (i, (param, value)) in func.params.iter().zip(args).enumerate() {
        let value = match &param.ty {
            Some(ty) => convert(value, ty, || format!("argument {} of an inline function", i + 1))?,
            None => value,
        };
        frame[param.var] = Some(Arc::new(value));
    }
    let result = eval(ctx, &func.body, &Rc::new(frame), &Focus::absent())?.into_vec()?;
    match &func.return_type {
        Some(ty) => convert(result, ty, || "result of an inline function".to_string()),
        None => Ok(result),
    }
}

fn arity_error(expected: usize, supplied: usize) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("function of arity {expected} called with {supplied} argument(s)"),
    )
}

/// Invoke a function item (including maps and arrays) with materialized arguments.
pub(crate) fn call_item<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    function: &XdmItem<N>,
    args: Vec<XdmSequence<N>>,
) -> Result<XdmSequence<N>> {
    match function {
        XdmItem::Function(f) => {
            if f.arity != args.len() {
                return Err(arity_error(f.arity, args.len()));
            }
            match &f.body {
                FunctionBody::Builtin(key) => call_builtin(ctx, &key.name, args, None),
                FunctionBody::User { module, index } => call_user(&ctx.rebased(module), *index, args)?.into_vec(),
                FunctionBody::Inline { func, module, captured } => {
                    call_inline(&ctx.rebased(module), func, captured, args)
                }
                FunctionBody::Partial { base, bound } => {
                    let mut supplied = args.into_iter();
                    let full = bound
                        .iter()
                        .map(|b| match b {
                            Some(v) => v.clone(),
                            None => supplied.next().unwrap_or_default(),
                        })
                        .collect();
                    call_item(ctx, base, full)
                }
            }
        }
        XdmItem::Map(map) => {
            let [key] = args.as_slice() else {
                return Err(arity_error(1, args.len()));
            };
            match atomize_items(key)?.as_slice() {
                [k] => Ok(map.get(k).cloned().unwrap_or_default()),
                _ => Err(Error::from_code(ErrorCode::XPTY0004, "map lookup key must be a single atomic value")),
            }
        }
        XdmItem::Array(array) => {
            let [position] = args.as_slice() else {
                return Err(arity_error(1, args.len()));
            };
            match atomize_items(position)?.as_slice() {
                [p] => Ok(array.get(array_position(p)?)?.clone()),
                _ => Err(Error::from_code(ErrorCode::XPTY0004, "array index must be a single integer")),
            }
        }
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            "the target of a dynamic function call is not a function item",
        )),
    }
}

fn item_arity<N>(item: &XdmItem<N>) -> Option<usize> {
    match item {
        XdmItem::Function(f) => Some(f.arity),
        XdmItem::Map(_) | XdmItem::Array(_) => Some(1),
        _ => None,
    }
}

/// Bind the supplied arguments of `base`, leaving `?` slots open.
fn partially_apply<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    base: XdmItem<N>,
    args: &[Option<ExprRef>],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<XdmItem<N>> {
    let bound = args
        .iter()
        .map(|a| a.as_ref().map(|e| eval_vec(ctx, e, env, focus)).transpose())
        .collect::<Result<Vec<_>>>()?;
    let open = bound.iter().filter(|b| b.is_none()).count();
    Ok(XdmItem::Function(Arc::new(FunctionItem::new(
        None,
        open,
        FunctionBody::Partial { base, bound },
    ))))
}

pub(crate) fn dynamic_call<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    function: &ExprRef,
    args: &[Option<ExprRef>],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let mut targets = eval_vec(ctx, function, env, focus)?;
    let target = match (targets.pop(), targets.is_empty()) {
        (Some(t), true) => t,
        _ => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                "the target of a dynamic function call must be a single function item",
            ));
        }
    };
    let Some(arity) = item_arity(&target) else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            "the target of a dynamic function call is not a function item",
        ));
    };
    if arity != args.len() {
        return Err(arity_error(arity, args.len()));
    }
    if args.iter().any(Option::is_none) {
        return Ok(Sequence::singleton(partially_apply(ctx, target, args, env, focus)?));
    }
    let values = args
        .iter()
        .flatten()
        .map(|a| eval_vec(ctx, a, env, focus))
        .collect::<Result<Vec<_>>>()?;
    Ok(Sequence::from_vec(call_item(ctx, &target, values)?))
}

/// `f(1, ?)` against a statically known function.
pub(crate) fn partial<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: CallTarget,
    name: &ExpandedName,
    arity: usize,
    args: &[Option<ExprRef>],
    env: &Env<N>,
    focus: &Focus<N>,
) -> Result<Sequence<N>> {
    let base = function_ref(ctx, target, name, arity);
    Ok(Sequence::singleton(partially_apply(ctx, base, args, env, focus)?))
}

/// `name#arity`
pub(crate) fn function_ref<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    target: CallTarget,
    name: &ExpandedName,
    arity: usize,
) -> XdmItem<N> {
    let body = match target {
        CallTarget::Builtin => FunctionBody::Builtin(FunctionKey {
            name: name.clone(),
            arity,
        }),
        CallTarget::User(index) => FunctionBody::User {
            module: ctx.module.clone(),
            index,
        },
    };
    XdmItem::Function(Arc::new(FunctionItem::new(Some(name.clone()), arity, body)))
}

/// Inline function expression: captures the free variables it references.
pub(crate) fn closure<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    func: &Arc<InlineFunction>,
    env: &Env<N>,
) -> Result<XdmItem<N>> {
    let captured = func
        .captures
        .iter()
        .map(|(outer, inner)| Ok((*inner, slot(env, *outer)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(XdmItem::Function(Arc::new(FunctionItem::new(
        None,
        func.params.len(),
        FunctionBody::Inline {
            func: func.clone(),
            module: ctx.module.clone(),
            captured,
        },
    ))))
}
