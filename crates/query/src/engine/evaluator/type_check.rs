//! `instance of` matching and the function conversion rules.
use super::Result;
use super::node_ops::{atomize_items, matches_kind};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::numeric::classify;
use crate::types::{ItemType, Kind, SequenceType, cast_atomic};
use crate::xdm::{XdmAtomicValue, XdmItem};

fn atomic_matches(value: &XdmAtomicValue, kind: Kind) -> bool {
    value.kind().is_subtype_of(kind)
}

pub(crate) fn item_matches<N: XdmNode>(item: &XdmItem<N>, ty: &ItemType) -> bool {
    match (ty, item) {
        (ItemType::AnyItem, _) => true,
        (ItemType::Atomic(k), XdmItem::Atomic(a)) => atomic_matches(a, *k),
        (ItemType::Kind(test), XdmItem::Node(n)) => matches_kind(n, test),
        (ItemType::AnyFunction, XdmItem::Function(_) | XdmItem::Map(_) | XdmItem::Array(_)) => true,
        (ItemType::Function { params, .. }, XdmItem::Function(f)) => f.arity == params.len(),
        (ItemType::Function { params, .. }, XdmItem::Map(_) | XdmItem::Array(_)) => params.len() == 1,
        (ItemType::AnyMap, XdmItem::Map(_)) | (ItemType::AnyArray, XdmItem::Array(_)) => true,
        (ItemType::Map { key, value }, XdmItem::Map(m)) => m
            .iter()
            .all(|(k, v)| atomic_matches(k, *key) && sequence_matches(v, value)),
        (ItemType::Array(member), XdmItem::Array(a)) => a.members().iter().all(|m| sequence_matches(m, member)),
        _ => false,
    }
}

pub(crate) fn sequence_matches<N: XdmNode>(values: &[XdmItem<N>], ty: &SequenceType) -> bool {
    match ty {
        SequenceType::EmptySequence => values.is_empty(),
        SequenceType::Of { item, occurrence } => {
            occurrence.allows(values.len()) && values.iter().all(|v| item_matches(v, item))
        }
    }
}

fn describe<N: XdmNode>(values: &[XdmItem<N>]) -> String {
    match values {
        [] => "an empty sequence".to_string(),
        [XdmItem::Atomic(a)] => a.type_name(),
        [XdmItem::Node(_)] => "a node".to_string(),
        [XdmItem::Map(_)] => "a map".to_string(),
        [XdmItem::Array(_)] => "an array".to_string(),
        [XdmItem::Function(_)] => "a function item".to_string(),
        many => format!("a sequence of {} items", many.len()),
    }
}

fn mismatch<N: XdmNode>(values: &[XdmItem<N>], ty: &SequenceType, what: &str) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("{what}: required type is {ty}, supplied value is {}", describe(values)),
    )
}

/// Fail with XPTY0004 unless `values` is an instance of `ty`.
pub(crate) fn check_matches<N: XdmNode>(
    values: &[XdmItem<N>],
    ty: &SequenceType,
    what: impl Fn() -> String,
) -> Result<()> {
    if sequence_matches(values, ty) {
        Ok(())
    } else {
        Err(mismatch(values, ty, &what()))
    }
}

/// Coerce an atomic value towards `target`: untypedAtomic is cast, numerics are
/// promoted and anyURI becomes a string where that is what the target asks for.
fn coerce_atomic(value: XdmAtomicValue, target: Kind) -> Result<XdmAtomicValue> {
    if atomic_matches(&value, target) {
        return Ok(value);
    }
    match value {
        XdmAtomicValue::UntypedAtomic(_) => {
            if target == Kind::AnyAtomic {
                Ok(value)
            } else if target == Kind::Numeric {
                cast_atomic(value, Kind::Double, None)
            } else {
                cast_atomic(value, target, None)
            }
        }
        XdmAtomicValue::AnyUri(s) if target == Kind::String => {
            Ok(XdmAtomicValue::String(s))
        }
        v => match (classify(&v), target) {
            (Some(n), Kind::Double) => Ok(XdmAtomicValue::Double(n.to_f64())),
            (Some(n), Kind::Float) if !matches!(v, XdmAtomicValue::Double(_)) => Ok(XdmAtomicValue::Float(n.to_f32())),
            _ => Ok(v),
        },
    }
}

/// Apply the function conversion rules for an argument, parameter or return value
/// declared as `ty`.
pub(crate) fn convert<N: XdmNode>(
    values: Vec<XdmItem<N>>,
    ty: &SequenceType,
    what: impl Fn() -> String,
) -> Result<Vec<XdmItem<N>>> {
    let converted = match ty.item_type() {
        Some(ItemType::Atomic(kind)) => {
            let mut out = Vec::with_capacity(values.len());
            for a in atomize_items(&values)? {
                out.push(XdmItem::Atomic(coerce_atomic(a, *kind).map_err(|e| {
                    if e.code_enum() == ErrorCode::XPTY0004 {
                        mismatch(&values, ty, &what())
                    } else {
                        e
                    }
                })?));
            }
            out
        }
        _ => values,
    };
    check_matches(&converted, ty, what)?;
    Ok(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::simple::SimpleNode;
    use crate::types::Occurrence;

    type N = SimpleNode;

    #[test]
    fn untyped_argument_is_cast() {
        let ty = SequenceType::atomic(Kind::Double, Occurrence::ExactlyOne);
        let out = convert::<N>(
            vec![XdmItem::Atomic(XdmAtomicValue::UntypedAtomic("2.5".into()))],
            &ty,
            || "argument 1".into(),
        )
        .unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Double(2.5))]);
    }

    #[test]
    fn integer_promotes_to_double_not_string() {
        let ty = SequenceType::atomic(Kind::Double, Occurrence::ZeroOrOne);
        let out = convert::<N>(vec![XdmItem::Atomic(XdmAtomicValue::Integer(3))], &ty, String::new).unwrap();
        assert_eq!(out, vec![XdmItem::Atomic(XdmAtomicValue::Double(3.0))]);
        let ty = SequenceType::atomic(Kind::String, Occurrence::ExactlyOne);
        let err = convert::<N>(vec![XdmItem::Atomic(XdmAtomicValue::Integer(3))], &ty, String::new).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }

    #[test]
    fn cardinality_is_checked() {
        let ty = SequenceType::atomic(Kind::Integer, Occurrence::ExactlyOne);
        let err = convert::<N>(Vec::new(), &ty, || "argument 1".into()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
        assert!(err.message.contains("argument 1"));
    }
}
