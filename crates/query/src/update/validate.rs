use super::{PendingUpdate, binding_owner};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::{NodeKind, QName, XdmNode};
use std::collections::{HashMap, HashSet};

fn conflict(code: ErrorCode, what: &str) -> Error {
    Error::from_code(code, what.to_string())
}

/// Record `prefix -> uri` for `owner`; a different URI for a prefix already seen is XUDY0024.
fn bind_prefix<N: XdmNode>(
    bindings: &mut HashMap<(N, String), Option<String>>,
    owner: N,
    name: &QName,
) -> Result<(), Error> {
    let Some(prefix) = name.prefix.clone() else {
        // unprefixed attributes bind nothing; unprefixed elements bind the default namespace
        return Ok(());
    };
    match bindings.entry((owner, prefix)) {
        std::collections::hash_map::Entry::Occupied(e) => {
            if *e.get() != name.ns_uri {
                return Err(Error::from_code(
                    ErrorCode::XUDY0024,
                    format!("prefix '{}' would be bound to two different namespaces", e.key().1),
                ));
            }
            Ok(())
        }
        std::collections::hash_map::Entry::Vacant(v) => {
            v.insert(name.ns_uri.clone());
            Ok(())
        }
    }
}

fn attribute_names<N: XdmNode>(nodes: &[N]) -> impl Iterator<Item = QName> + '_ {
    nodes
        .iter()
        .filter(|n| n.kind() == NodeKind::Attribute)
        .filter_map(XdmNode::name)
}

/// Check a pending update list for conflicts. Runs before anything is applied, so a
/// failing list leaves the tree untouched.
pub fn validate<N: XdmNode>(updates: &[PendingUpdate<N>]) -> Result<(), Error> {
    let mut renamed = HashSet::new();
    let mut replaced = HashSet::new();
    let mut value_replaced = HashSet::new();
    let mut deleted = Vec::new();
    let mut put_uris = HashSet::new();
    let mut bindings: HashMap<(N, String), Option<String>> = HashMap::new();

    for update in updates {
        match update {
            PendingUpdate::Rename { target, name } => {
                if !renamed.insert(target.clone()) {
                    return Err(conflict(ErrorCode::XUDY0015, "node is the target of more than one rename"));
                }
                if let Some(owner) = binding_owner(target) {
                    bind_prefix(&mut bindings, owner, name)?;
                }
            }
            PendingUpdate::ReplaceNode { target, replacement } => {
                if !replaced.insert(target.clone()) {
                    return Err(conflict(
                        ErrorCode::XUDY0016,
                        "node is the target of more than one replace node",
                    ));
                }
                if target.kind() == NodeKind::Attribute
                    && let Some(owner) = target.parent()
                {
                    for name in attribute_names(replacement) {
                        bind_prefix(&mut bindings, owner.clone(), &name)?;
                    }
                }
            }
            PendingUpdate::ReplaceValue { target, .. } | PendingUpdate::ReplaceElementContent { target, .. } => {
                if !value_replaced.insert(target.clone()) {
                    return Err(conflict(
                        ErrorCode::XUDY0017,
                        "node value is replaced more than once",
                    ));
                }
            }
            PendingUpdate::InsertAttributes { target, content } => {
                for name in attribute_names(content) {
                    bind_prefix(&mut bindings, target.clone(), &name)?;
                }
            }
            PendingUpdate::Delete { target } => deleted.push(target.clone()),
            PendingUpdate::Put { uri, .. } => {
                if !put_uris.insert(uri.clone()) {
                    return Err(Error::from_code(
                        ErrorCode::XUDY0031,
                        format!("fn:put called more than once for {uri}"),
                    ));
                }
            }
            _ => {}
        }
    }

    // deleting a replaced node, or one of its ancestors, leaves nothing to replace
    for d in &deleted {
        if replaced.iter().any(|r| d == r || d.is_ancestor_of(r)) {
            return Err(conflict(
                ErrorCode::XUDY0016,
                "a deleted node is, or contains, the target of a replace node",
            ));
        }
    }
    tracing::debug!(
        updates = updates.len(),
        renames = renamed.len(),
        replacements = replaced.len(),
        deletes = deleted.len(),
        "pending update list validated"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::simple::{SimpleNode, attr, elem};

    fn root() -> SimpleNode {
        elem("r")
            .child(elem("a").child(elem("b")))
            .child(elem("c").attr(attr("k", "v")))
            .build()
    }

    #[test]
    fn double_rename_conflicts() {
        let r = root();
        let a = r.first_child(None).unwrap();
        let list = vec![
            PendingUpdate::Rename {
                target: a.clone(),
                name: QName::local("x"),
            },
            PendingUpdate::Rename {
                target: a,
                name: QName::local("y"),
            },
        ];
        assert_eq!(validate(&list).unwrap_err().code_enum(), ErrorCode::XUDY0015);
    }

    #[test]
    fn delete_of_ancestor_conflicts_with_replace() {
        let r = root();
        let a = r.first_child(None).unwrap();
        let b = a.first_child(None).unwrap();
        let list = vec![
            PendingUpdate::Delete { target: a },
            PendingUpdate::ReplaceNode {
                target: b,
                replacement: Vec::new(),
            },
        ];
        assert_eq!(validate(&list).unwrap_err().code_enum(), ErrorCode::XUDY0016);
    }

    #[test]
    fn conflicting_prefixes_are_rejected() {
        let r = root();
        let c = r.last_child(None).unwrap();
        let list = vec![
            PendingUpdate::Rename {
                target: c.clone(),
                name: QName::new(Some("p".into()), "c", Some("urn:one".into())),
            },
            PendingUpdate::Rename {
                target: c.all_attributes()[0].clone(),
                name: QName::new(Some("p".into()), "k", Some("urn:two".into())),
            },
        ];
        assert_eq!(validate(&list).unwrap_err().code_enum(), ErrorCode::XUDY0024);
    }

    #[test]
    fn independent_updates_pass() {
        let r = root();
        let a = r.first_child(None).unwrap();
        let c = r.last_child(None).unwrap();
        let list = vec![
            PendingUpdate::Delete { target: a },
            PendingUpdate::ReplaceValue {
                target: c.all_attributes()[0].clone(),
                value: "w".into(),
            },
        ];
        assert!(validate(&list).is_ok());
    }
}
