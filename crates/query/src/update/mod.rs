//! XQuery Update Facility: pending update primitives and the validate / merge / apply
//! pipeline that turns them into `DocumentWriter` calls.
//!
//! Updating expressions never touch the tree. They record [`PendingUpdate`]s whose
//! targets and content are node handles captured at evaluation time; nothing is
//! mutated until [`apply_updates`] has validated the whole list.
use crate::model::{NodeKind, QName, XdmNode};
use core::fmt;

mod apply;
mod validate;

pub use apply::{ApplyReport, PutRequest, apply_updates};
pub use validate::validate;

/// One update primitive.
#[derive(Clone, PartialEq, Eq)]
pub enum PendingUpdate<N> {
    Delete { target: N },
    InsertBefore { target: N, content: Vec<N> },
    InsertAfter { target: N, content: Vec<N> },
    /// Position among the existing children is up to the implementation: appended.
    InsertInto { target: N, content: Vec<N> },
    InsertIntoAsFirst { target: N, content: Vec<N> },
    InsertIntoAsLast { target: N, content: Vec<N> },
    InsertAttributes { target: N, content: Vec<N> },
    Rename { target: N, name: QName },
    ReplaceNode { target: N, replacement: Vec<N> },
    /// New string value of an attribute, text, comment or processing-instruction node.
    ReplaceValue { target: N, value: String },
    /// Element children replaced by a single text node, or by nothing.
    ReplaceElementContent { target: N, text: Option<N> },
    Put { node: N, uri: String },
}

impl<N> PendingUpdate<N> {
    pub fn target(&self) -> &N {
        match self {
            PendingUpdate::Delete { target }
            | PendingUpdate::InsertBefore { target, .. }
            | PendingUpdate::InsertAfter { target, .. }
            | PendingUpdate::InsertInto { target, .. }
            | PendingUpdate::InsertIntoAsFirst { target, .. }
            | PendingUpdate::InsertIntoAsLast { target, .. }
            | PendingUpdate::InsertAttributes { target, .. }
            | PendingUpdate::Rename { target, .. }
            | PendingUpdate::ReplaceNode { target, .. }
            | PendingUpdate::ReplaceValue { target, .. }
            | PendingUpdate::ReplaceElementContent { target, .. } => target,
            PendingUpdate::Put { node, .. } => node,
        }
    }

    /// Primitive name as used in the update facility's vocabulary.
    pub fn primitive(&self) -> &'static str {
        match self {
            PendingUpdate::Delete { .. } => "delete",
            PendingUpdate::InsertBefore { .. } => "insertBefore",
            PendingUpdate::InsertAfter { .. } => "insertAfter",
            PendingUpdate::InsertInto { .. } => "insertInto",
            PendingUpdate::InsertIntoAsFirst { .. } => "insertIntoAsFirst",
            PendingUpdate::InsertIntoAsLast { .. } => "insertIntoAsLast",
            PendingUpdate::InsertAttributes { .. } => "insertAttributes",
            PendingUpdate::Rename { .. } => "rename",
            PendingUpdate::ReplaceNode { .. } => "replaceNode",
            PendingUpdate::ReplaceValue { .. } => "replaceValue",
            PendingUpdate::ReplaceElementContent { .. } => "replaceElementContent",
            PendingUpdate::Put { .. } => "put",
        }
    }
}

impl<N: fmt::Debug> fmt::Debug for PendingUpdate<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(self.primitive())
            .field("target", self.target())
            .finish_non_exhaustive()
    }
}

/// Ordered list of pending updates produced by one evaluation.
#[derive(Debug, Clone)]
pub struct PendingUpdateList<N> {
    updates: Vec<PendingUpdate<N>>,
}

impl<N> Default for PendingUpdateList<N> {
    fn default() -> Self {
        Self { updates: Vec::new() }
    }
}

impl<N: XdmNode> PendingUpdateList<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.updates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PendingUpdate<N>> {
        self.updates.iter()
    }

    pub fn push(&mut self, update: PendingUpdate<N>) {
        self.updates.push(update);
    }

    /// `upd:mergeUpdates`: concatenation, conflicts are found by [`validate`].
    pub fn merge(&mut self, other: PendingUpdateList<N>) {
        self.updates.extend(other.updates);
    }

    pub fn into_vec(self) -> Vec<PendingUpdate<N>> {
        self.updates
    }
}

impl<N> From<Vec<PendingUpdate<N>>> for PendingUpdateList<N> {
    fn from(updates: Vec<PendingUpdate<N>>) -> Self {
        Self { updates }
    }
}

impl<N> IntoIterator for PendingUpdateList<N> {
    type Item = PendingUpdate<N>;
    type IntoIter = std::vec::IntoIter<PendingUpdate<N>>;

    fn into_iter(self) -> Self::IntoIter {
        self.updates.into_iter()
    }
}

/// All updates that name the same target, in the order they were produced.
pub(crate) struct TargetUpdates<N> {
    pub(crate) target: N,
    pub(crate) attributes: Vec<N>,
    pub(crate) into: Vec<N>,
    pub(crate) as_first: Vec<N>,
    pub(crate) as_last: Vec<N>,
    pub(crate) before: Vec<N>,
    pub(crate) after: Vec<N>,
    pub(crate) rename: Option<QName>,
    pub(crate) replace_node: Option<Vec<N>>,
    pub(crate) replace_value: Option<String>,
    pub(crate) replace_content: Option<Option<N>>,
    pub(crate) delete: bool,
}

impl<N> TargetUpdates<N> {
    fn new(target: N) -> Self {
        Self {
            target,
            attributes: Vec::new(),
            into: Vec::new(),
            as_first: Vec::new(),
            as_last: Vec::new(),
            before: Vec::new(),
            after: Vec::new(),
            rename: None,
            replace_node: None,
            replace_value: None,
            replace_content: None,
            delete: false,
        }
    }
}

/// Group a validated list by target identity, batching inserts per position kind.
/// `fn:put` requests are returned separately in production order.
pub(crate) fn group_by_target<N: XdmNode>(
    updates: Vec<PendingUpdate<N>>,
) -> (Vec<TargetUpdates<N>>, Vec<PutRequest<N>>) {
    let mut groups: indexmap::IndexMap<N, TargetUpdates<N>> = indexmap::IndexMap::new();
    let mut puts = Vec::new();
    for update in updates {
        if let PendingUpdate::Put { node, uri } = update {
            puts.push(PutRequest { node, uri });
            continue;
        }
        let target = update.target().clone();
        let entry = groups
            .entry(target.clone())
            .or_insert_with(|| TargetUpdates::new(target));
        match update {
            PendingUpdate::Delete { .. } => entry.delete = true,
            PendingUpdate::InsertBefore { content, .. } => entry.before.extend(content),
            PendingUpdate::InsertAfter { content, .. } => entry.after.extend(content),
            PendingUpdate::InsertInto { content, .. } => entry.into.extend(content),
            PendingUpdate::InsertIntoAsFirst { content, .. } => entry.as_first.extend(content),
            PendingUpdate::InsertIntoAsLast { content, .. } => entry.as_last.extend(content),
            PendingUpdate::InsertAttributes { content, .. } => entry.attributes.extend(content),
            PendingUpdate::Rename { name, .. } => entry.rename = Some(name),
            PendingUpdate::ReplaceNode { replacement, .. } => entry.replace_node = Some(replacement),
            PendingUpdate::ReplaceValue { value, .. } => entry.replace_value = Some(value),
            PendingUpdate::ReplaceElementContent { text, .. } => entry.replace_content = Some(text),
            PendingUpdate::Put { .. } => {}
        }
    }
    (groups.into_values().collect(), puts)
}

/// Element whose namespace bindings an update touches, if any.
pub(crate) fn binding_owner<N: XdmNode>(node: &N) -> Option<N> {
    match node.kind() {
        NodeKind::Element => Some(node.clone()),
        NodeKind::Attribute => node.parent(),
        _ => None,
    }
}
