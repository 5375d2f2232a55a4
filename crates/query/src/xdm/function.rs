use super::{ExpandedName, XdmItem, XdmSequence};
use crate::compiler::ir::{InlineFunction, Module, VarId};
use crate::engine::runtime::FunctionKey;
use core::fmt;
use std::sync::Arc;

/// A function value: named builtin/user reference, inline closure or partial application.
pub struct FunctionItem<N> {
    pub name: Option<ExpandedName>,
    pub arity: usize,
    pub(crate) body: FunctionBody<N>,
}

pub(crate) enum FunctionBody<N> {
    Builtin(FunctionKey),
    User {
        module: Arc<Module>,
        index: usize,
    },
    Inline {
        func: Arc<InlineFunction>,
        module: Arc<Module>,
        captured: Vec<(VarId, Arc<XdmSequence<N>>)>,
    },
    /// `f(1, ?)`: `None` slots are filled from the call's arguments, in order.
    Partial {
        base: XdmItem<N>,
        bound: Vec<Option<XdmSequence<N>>>,
    },
}

impl<N> FunctionItem<N> {
    pub(crate) fn new(name: Option<ExpandedName>, arity: usize, body: FunctionBody<N>) -> Self {
        Self { name, arity, body }
    }
}

impl<N> fmt::Debug for FunctionItem<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.body {
            FunctionBody::Builtin(_) => "builtin",
            FunctionBody::User { .. } => "user",
            FunctionBody::Inline { .. } => "inline",
            FunctionBody::Partial { .. } => "partial",
        };
        f.debug_struct("FunctionItem")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("kind", &kind)
            .finish()
    }
}
