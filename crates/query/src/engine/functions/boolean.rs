use super::common::{FnResult, boolean};
use crate::engine::runtime::{CallCtx, Error};
use crate::model::XdmNode;
use crate::xdm::{XdmItem, XdmSequence};
use crate::xdm::sequence::ebv_of;

pub(super) fn ebv<N>(items: &[XdmItem<N>]) -> Result<bool, Error> {
    match items.first() {
        None => Ok(false),
        Some(first) => ebv_of(first, items.len() > 1),
    }
}

pub(super) fn true_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(true))
}

pub(super) fn false_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(false))
}

pub(super) fn not_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(!ebv(&args[0])?))
}

pub(super) fn boolean_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(ebv(&args[0])?))
}
