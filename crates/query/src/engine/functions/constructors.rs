//! `xs:TYPE($arg)` constructor functions. Direct calls are lowered to casts by the
//! compiler; these entries serve named function references and dynamic calls.
use super::common::{FnResult, atomic, opt_atomic};
use crate::engine::runtime::CallCtx;
use crate::model::XdmNode;
use crate::types::{Kind, cast_atomic};
use crate::xdm::XdmSequence;

pub(super) fn construct<N: XdmNode>(ctx: &CallCtx<'_, N>, kind: Kind, args: &[XdmSequence<N>]) -> FnResult<N> {
    match opt_atomic(&args[0]) {
        Some(value) => Ok(atomic(cast_atomic(value.clone(), kind, Some(&ctx.static_ctx.namespaces))?)),
        None => Ok(Vec::new()),
    }
}
