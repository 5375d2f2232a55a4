use super::{PendingUpdate, TargetUpdates, group_by_target, validate};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{DocumentWriter, NodeFactory, NodeKind, QName, XdmNode};
use itertools::Itertools;
use std::collections::HashMap;

/// A document handed to `fn:put`, to be stored by the host once the list is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest<N> {
    pub node: N,
    pub uri: String,
}

#[derive(Debug)]
pub struct ApplyReport<N> {
    /// Number of update primitives applied to the tree.
    pub applied: usize,
    pub puts: Vec<PutRequest<N>>,
}

struct Applier<'a, N> {
    writer: &'a dyn DocumentWriter<N>,
    factory: Option<&'a dyn NodeFactory<N>>,
    /// Nodes rebuilt by a rename, keyed by their old handle.
    remap: HashMap<N, N>,
}

fn invalid(code: ErrorCode, msg: &str) -> Error {
    Error::from_code(code, msg.to_string())
}

impl<N: XdmNode> Applier<'_, N> {
    fn current(&self, node: &N) -> N {
        self.remap.get(node).cloned().unwrap_or_else(|| node.clone())
    }

    fn checked<T>(&self, op: &str, node: &N, result: Result<T, Error>) -> Result<T, Error> {
        if let Err(e) = &result {
            tracing::warn!(op, ?node, error = %e, "document writer rejected an update");
        }
        result
    }

    fn insert(&self, parent: &N, node: &N, before: Option<&N>) -> Result<(), Error> {
        self.checked("insert_before", parent, self.writer.insert_before(parent, node, before))
    }

    fn remove(&self, node: &N) -> Result<(), Error> {
        match node.kind() {
            NodeKind::Attribute => {
                let (Some(owner), Some(name)) = (node.parent(), node.expanded_name()) else {
                    return Ok(());
                };
                self.checked("remove_attribute_ns", node, self.writer.remove_attribute_ns(&owner, &name))
            }
            _ => match node.parent() {
                Some(parent) => self.checked("remove_child", node, self.writer.remove_child(&parent, node)),
                None => Ok(()),
            },
        }
    }

    fn set_attributes(&self, element: &N, attributes: &[N]) -> Result<(), Error> {
        for a in attributes {
            let name = a
                .name()
                .ok_or_else(|| invalid(ErrorCode::XUDY0021, "attribute without a name"))?;
            let value = a.data().unwrap_or_default();
            self.checked(
                "set_attribute_ns",
                element,
                self.writer.set_attribute_ns(element, &name, &value),
            )?;
        }
        Ok(())
    }

    fn rename(&mut self, target: &N, name: &QName) -> Result<(), Error> {
        if self.checked("set_name", target, self.writer.set_name(target, name))? {
            return Ok(());
        }
        match target.kind() {
            NodeKind::Attribute => {
                let owner = target
                    .parent()
                    .ok_or_else(|| invalid(ErrorCode::ADPT0001, "cannot rename a parentless attribute"))?;
                let value = target.data().unwrap_or_default();
                self.remove(target)?;
                self.checked("set_attribute_ns", &owner, self.writer.set_attribute_ns(&owner, name, &value))?;
                if let Some(renamed) = owner.attribute(&name.expanded()) {
                    self.remap.insert(target.clone(), renamed);
                }
                Ok(())
            }
            NodeKind::Element | NodeKind::ProcessingInstruction => self.rebuild(target, name),
            _ => Err(invalid(
                ErrorCode::XUTY0012,
                "only elements, attributes and processing instructions can be renamed",
            )),
        }
    }

    /// Rename through the factory: a fresh node takes the old one's place and adopts its
    /// attributes and children, which keep their identity.
    fn rebuild(&mut self, target: &N, name: &QName) -> Result<(), Error> {
        let factory = self.factory.ok_or_else(|| {
            invalid(
                ErrorCode::ADPT0001,
                "adapter cannot rename in place and no node factory was supplied",
            )
        })?;
        let parent = target
            .parent()
            .ok_or_else(|| invalid(ErrorCode::ADPT0001, "cannot rebuild a parentless node"))?;
        let fresh = match target.kind() {
            NodeKind::ProcessingInstruction => {
                factory.create_processing_instruction(&name.local, &target.data().unwrap_or_default())?
            }
            _ => factory.create_element(name)?,
        };
        self.insert(&parent, &fresh, Some(target))?;
        let placed = target
            .previous_sibling(None)
            .ok_or_else(|| invalid(ErrorCode::ADPT0001, "renamed node was not attached"))?;
        if target.kind() == NodeKind::Element {
            let attributes = target.all_attributes();
            self.set_attributes(&placed, &attributes)?;
            for a in attributes {
                if let Some(moved) = a.expanded_name().and_then(|n| placed.attribute(&n)) {
                    self.remap.insert(a, moved);
                }
            }
            for child in target.child_nodes(None) {
                self.insert(&placed, &child, None)?;
            }
        }
        self.checked("remove_child", target, self.writer.remove_child(&parent, target))?;
        tracing::trace!(?target, "node rebuilt for rename");
        self.remap.insert(target.clone(), placed);
        Ok(())
    }

    /// Attribute inserts, child inserts into the target, rename and replace value.
    fn phase_one(&mut self, g: &TargetUpdates<N>) -> Result<(), Error> {
        let target = self.current(&g.target);
        if !g.attributes.is_empty() {
            self.set_attributes(&target, &g.attributes)?;
        }
        if !g.as_first.is_empty() {
            let first = target.first_child(None);
            for n in &g.as_first {
                self.insert(&target, n, first.as_ref())?;
            }
        }
        for n in g.into.iter().chain(&g.as_last) {
            self.insert(&target, n, None)?;
        }
        if let Some(name) = &g.rename {
            self.rename(&target, name)?;
        }
        if let Some(value) = &g.replace_value {
            let target = self.current(&g.target);
            self.checked("set_data", &target, self.writer.set_data(&target, value))?;
        }
        Ok(())
    }

    fn phase_two(&self, g: &TargetUpdates<N>) -> Result<(), Error> {
        if g.before.is_empty() && g.after.is_empty() {
            return Ok(());
        }
        let target = self.current(&g.target);
        let parent = target
            .parent()
            .ok_or_else(|| invalid(ErrorCode::XUDY0029, "insert target has no parent"))?;
        for n in &g.before {
            self.insert(&parent, n, Some(&target))?;
        }
        let next = target.next_sibling(None);
        for n in &g.after {
            self.insert(&parent, n, next.as_ref())?;
        }
        Ok(())
    }

    fn replace_node(&self, g: &TargetUpdates<N>, replacement: &[N]) -> Result<(), Error> {
        let target = self.current(&g.target);
        let parent = target
            .parent()
            .ok_or_else(|| invalid(ErrorCode::XUDY0009, "replaced node has no parent"))?;
        if target.kind() == NodeKind::Attribute {
            self.remove(&target)?;
            return self.set_attributes(&parent, replacement);
        }
        for n in replacement {
            self.insert(&parent, n, Some(&target))?;
        }
        self.checked("remove_child", &target, self.writer.remove_child(&parent, &target))
    }

    fn replace_content(&self, g: &TargetUpdates<N>, text: Option<&N>) -> Result<(), Error> {
        let target = self.current(&g.target);
        for child in target.child_nodes(None) {
            self.checked("remove_child", &child, self.writer.remove_child(&target, &child))?;
        }
        if let Some(t) = text {
            self.insert(&target, t, None)?;
        }
        Ok(())
    }
}

/// Validate, merge and apply a pending update list.
///
/// Phases run in a fixed order: attribute inserts, inserts into, renames and value
/// replacements; then inserts before/after; replace node; replace element content;
/// deletes. `fn:put` requests are handed back in the report. A conflicting list is
/// rejected before the first mutation.
pub fn apply_updates<N: XdmNode>(
    updates: Vec<PendingUpdate<N>>,
    writer: &dyn DocumentWriter<N>,
    factory: Option<&dyn NodeFactory<N>>,
) -> Result<ApplyReport<N>, Error> {
    validate(&updates)?;
    let counts = updates.iter().map(PendingUpdate::primitive).counts();
    tracing::debug!(?counts, "applying pending update list");
    let applied = updates
        .iter()
        .filter(|u| !matches!(u, PendingUpdate::Put { .. }))
        .count();
    let (groups, puts) = group_by_target(updates);
    let mut applier = Applier {
        writer,
        factory,
        remap: HashMap::new(),
    };
    for g in &groups {
        applier.phase_one(g)?;
    }
    for g in &groups {
        applier.phase_two(g)?;
    }
    for g in &groups {
        if let Some(replacement) = &g.replace_node {
            applier.replace_node(g, replacement)?;
        }
    }
    for g in &groups {
        if let Some(text) = &g.replace_content {
            applier.replace_content(g, text.as_ref())?;
        }
    }
    for g in groups.iter().filter(|g| g.delete) {
        let target = applier.current(&g.target);
        applier.remove(&target)?;
    }
    Ok(ApplyReport { applied, puts })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::simple::{SimpleDocumentWriter, SimpleNode, SimpleNodeFactory, attr, elem, text};

    fn doc() -> SimpleNode {
        elem("r")
            .child(elem("a").attr(attr("k", "1")).child(text("x")))
            .child(elem("b"))
            .build()
    }

    #[test]
    fn phases_apply_in_order() {
        let r = doc();
        let factory = SimpleNodeFactory::for_document(&r);
        let a = r.first_child(None).unwrap();
        let b = r.last_child(None).unwrap();
        let fresh = factory.create_element(&QName::local("n")).unwrap();
        let updates = vec![
            PendingUpdate::Delete { target: b.clone() },
            PendingUpdate::InsertAfter {
                target: a.clone(),
                content: vec![fresh],
            },
            PendingUpdate::Rename {
                target: a,
                name: QName::local("z"),
            },
        ];
        let report = apply_updates(updates, &SimpleDocumentWriter, Some(&factory)).unwrap();
        assert_eq!(report.applied, 3);
        assert_eq!(r.to_xml(), "<r><z k=\"1\">x</z><n/></r>");
    }

    #[test]
    fn conflict_leaves_tree_untouched() {
        let r = doc();
        let a = r.first_child(None).unwrap();
        let before = r.to_xml();
        let updates = vec![
            PendingUpdate::Delete { target: r.clone() },
            PendingUpdate::ReplaceNode {
                target: a,
                replacement: Vec::new(),
            },
        ];
        let err = apply_updates(updates, &SimpleDocumentWriter, None).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XUDY0016);
        assert_eq!(r.to_xml(), before);
    }

    #[test]
    fn element_content_is_replaced_by_text() {
        let r = doc();
        let factory = SimpleNodeFactory::for_document(&r);
        let a = r.first_child(None).unwrap();
        let t = factory.create_text("new").unwrap();
        let updates = vec![PendingUpdate::ReplaceElementContent {
            target: a,
            text: Some(t),
        }];
        apply_updates(updates, &SimpleDocumentWriter, None).unwrap();
        assert_eq!(r.to_xml(), "<r><a k=\"1\">new</a><b/></r>");
    }
}
