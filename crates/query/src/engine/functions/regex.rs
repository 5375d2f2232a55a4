use super::common::{FnResult, boolean, opt_atomic, opt_str, str_arg, string};
use crate::engine::runtime::CallCtx;
use crate::model::XdmNode;
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};

fn flags<N>(args: &[XdmSequence<N>], index: usize) -> String {
    opt_str(args.get(index)).unwrap_or_default()
}

pub(super) fn matches_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let input = str_arg(&args[0]);
    let pattern = str_arg(&args[1]);
    Ok(boolean(ctx.regex.matches(&pattern, &flags(args, 2), &input)?))
}

pub(super) fn replace_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let input = str_arg(&args[0]);
    let pattern = str_arg(&args[1]);
    let replacement = str_arg(&args[2]);
    Ok(string(ctx.regex.replace(&pattern, &flags(args, 3), &input, &replacement)?))
}

pub(super) fn tokenize_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(input) = opt_atomic(&args[0]).map(XdmAtomicValue::string_value) else {
        return Ok(Vec::new());
    };
    let tokens = match args.get(1) {
        Some(pattern) => ctx.regex.tokenize(&str_arg(pattern), &flags(args, 2), &input)?,
        None => input
            .split([' ', '\t', '\n', '\r'])
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
    };
    Ok(tokens
        .into_iter()
        .map(|t| XdmItem::Atomic(XdmAtomicValue::String(t)))
        .collect())
}
