use crate::types::Kind;
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use core::fmt;
use rust_decimal::Decimal;
use std::sync::Arc;

mod array;
mod function;
mod map;
pub mod sequence;

pub use array::XdmArray;
pub use function::FunctionItem;
pub(crate) use function::FunctionBody;
pub use map::{MapKey, XdmMap};
pub use sequence::{ItemIter, Sequence, XdmItemResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExpandedName {
    pub ns_uri: Option<String>,
    pub local: String,
}

impl ExpandedName {
    pub fn new(ns_uri: Option<String>, local: impl Into<String>) -> Self {
        Self {
            ns_uri: ns_uri.filter(|u| !u.is_empty()),
            local: local.into(),
        }
    }

    /// Name in no namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self::new(None, local)
    }

    pub fn ns(ns_uri: &str, local: impl Into<String>) -> Self {
        Self::new(Some(ns_uri.to_string()), local)
    }

    /// `Q{uri}local` notation, or the bare local name when there is no namespace.
    pub fn display(&self) -> String {
        match &self.ns_uri {
            Some(ns) => format!("Q{{{}}}{}", ns, self.local),
            None => self.local.clone(),
        }
    }
}

impl fmt::Display for ExpandedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum XdmAtomicValue {
    UntypedAtomic(String),
    String(String),
    /// normalizedString, token, language, NMTOKEN, Name, NCName, ID, IDREF, ENTITY
    DerivedString {
        kind: Kind,
        value: String,
    },
    AnyUri(String),
    Boolean(bool),
    Integer(i64),
    /// long, int, short, byte, the unsigned types and the sign-restricted integers
    DerivedInteger {
        kind: Kind,
        value: i64,
    },
    Decimal(Decimal),
    Float(f32),
    Double(f64),
    Duration {
        months: i64,
        seconds: Decimal,
    },
    YearMonthDuration(i64),
    /// Seconds, possibly fractional.
    DayTimeDuration(Decimal),
    DateTime {
        value: NaiveDateTime,
        tz: Option<FixedOffset>,
    },
    /// xs:dateTimeStamp: a dateTime whose timezone is mandatory.
    DateTimeStamp {
        value: NaiveDateTime,
        tz: FixedOffset,
    },
    Date {
        value: NaiveDate,
        tz: Option<FixedOffset>,
    },
    Time {
        value: NaiveTime,
        tz: Option<FixedOffset>,
    },
    GYearMonth {
        year: i32,
        month: u8,
        tz: Option<FixedOffset>,
    },
    GYear {
        year: i32,
        tz: Option<FixedOffset>,
    },
    GMonthDay {
        month: u8,
        day: u8,
        tz: Option<FixedOffset>,
    },
    GDay {
        day: u8,
        tz: Option<FixedOffset>,
    },
    GMonth {
        month: u8,
        tz: Option<FixedOffset>,
    },
    QName {
        ns_uri: Option<String>,
        prefix: Option<String>,
        local: String,
    },
    Notation(String),
    Base64Binary(Vec<u8>),
    HexBinary(Vec<u8>),
}

impl XdmAtomicValue {
    pub fn kind(&self) -> Kind {
        use XdmAtomicValue as V;
        match self {
            V::UntypedAtomic(_) => Kind::UntypedAtomic,
            V::String(_) => Kind::String,
            V::DerivedString { kind, .. } | V::DerivedInteger { kind, .. } => *kind,
            V::AnyUri(_) => Kind::AnyUri,
            V::Boolean(_) => Kind::Boolean,
            V::Integer(_) => Kind::Integer,
            V::Decimal(_) => Kind::Decimal,
            V::Float(_) => Kind::Float,
            V::Double(_) => Kind::Double,
            V::Duration { .. } => Kind::Duration,
            V::YearMonthDuration(_) => Kind::YearMonthDuration,
            V::DayTimeDuration(_) => Kind::DayTimeDuration,
            V::DateTime { .. } => Kind::DateTime,
            V::DateTimeStamp { .. } => Kind::DateTimeStamp,
            V::Date { .. } => Kind::Date,
            V::Time { .. } => Kind::Time,
            V::GYearMonth { .. } => Kind::GYearMonth,
            V::GYear { .. } => Kind::GYear,
            V::GMonthDay { .. } => Kind::GMonthDay,
            V::GDay { .. } => Kind::GDay,
            V::GMonth { .. } => Kind::GMonth,
            V::QName { .. } => Kind::QName,
            V::Notation(_) => Kind::Notation,
            V::Base64Binary(_) => Kind::Base64Binary,
            V::HexBinary(_) => Kind::HexBinary,
        }
    }

    /// `xs:` prefixed type name, used in diagnostics.
    pub fn type_name(&self) -> String {
        self.kind().display_name()
    }

    /// Canonical lexical form (the result of casting to xs:string).
    pub fn string_value(&self) -> String {
        crate::types::lexical::canonical(self)
    }

    pub fn is_numeric(&self) -> bool {
        self.kind().is_numeric()
    }

    /// Numeric value as f64 (None for non-numerics).
    pub fn as_f64(&self) -> Option<f64> {
        use rust_decimal::prelude::ToPrimitive;
        match self {
            XdmAtomicValue::Integer(i) | XdmAtomicValue::DerivedInteger { value: i, .. } => {
                Some(*i as f64)
            }
            XdmAtomicValue::Decimal(d) => d.to_f64(),
            XdmAtomicValue::Float(f) => Some(f64::from(*f)),
            XdmAtomicValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn is_nan(&self) -> bool {
        match self {
            XdmAtomicValue::Float(f) => f.is_nan(),
            XdmAtomicValue::Double(d) => d.is_nan(),
            _ => false,
        }
    }
}

impl From<bool> for XdmAtomicValue {
    fn from(b: bool) -> Self {
        XdmAtomicValue::Boolean(b)
    }
}

impl From<i64> for XdmAtomicValue {
    fn from(i: i64) -> Self {
        XdmAtomicValue::Integer(i)
    }
}

impl From<f64> for XdmAtomicValue {
    fn from(d: f64) -> Self {
        XdmAtomicValue::Double(d)
    }
}

impl From<Decimal> for XdmAtomicValue {
    fn from(d: Decimal) -> Self {
        XdmAtomicValue::Decimal(d)
    }
}

impl From<&str> for XdmAtomicValue {
    fn from(s: &str) -> Self {
        XdmAtomicValue::String(s.to_string())
    }
}

impl From<String> for XdmAtomicValue {
    fn from(s: String) -> Self {
        XdmAtomicValue::String(s)
    }
}

#[derive(Debug, Clone)]
pub enum XdmItem<N> {
    Node(N),
    Atomic(XdmAtomicValue),
    Function(Arc<FunctionItem<N>>),
    Map(XdmMap<N>),
    Array(XdmArray<N>),
}

pub type XdmSequence<N> = Vec<XdmItem<N>>;

impl<N: PartialEq> PartialEq for XdmItem<N> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (XdmItem::Node(a), XdmItem::Node(b)) => a == b,
            (XdmItem::Atomic(a), XdmItem::Atomic(b)) => a == b,
            (XdmItem::Function(a), XdmItem::Function(b)) => Arc::ptr_eq(a, b),
            (XdmItem::Map(a), XdmItem::Map(b)) => a.ptr_eq(b),
            (XdmItem::Array(a), XdmItem::Array(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl<N> XdmItem<N> {
    pub fn as_node(&self) -> Option<&N> {
        match self {
            XdmItem::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_atomic(&self) -> Option<&XdmAtomicValue> {
        match self {
            XdmItem::Atomic(a) => Some(a),
            _ => None,
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, XdmItem::Node(_))
    }

    /// True for function items, including maps and arrays.
    pub fn is_function(&self) -> bool {
        matches!(self, XdmItem::Function(_) | XdmItem::Map(_) | XdmItem::Array(_))
    }
}

impl<N> From<XdmAtomicValue> for XdmItem<N> {
    fn from(a: XdmAtomicValue) -> Self {
        XdmItem::Atomic(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Node type without `Clone`.
    #[derive(PartialEq)]
    struct Handle(u32);

    #[test]
    fn maps_and_arrays_compare_by_identity() {
        let map = XdmMap::<Handle>::default();
        let array = XdmArray::<Handle>::default();
        assert!(XdmItem::Map(map.clone()) == XdmItem::Map(map));
        assert!(XdmItem::Array(array.clone()) == XdmItem::Array(array));
        assert!(XdmItem::Map(XdmMap::<Handle>::default()) != XdmItem::Map(XdmMap::default()));
        assert!(XdmItem::Node(Handle(1)) == XdmItem::Node(Handle(1)));
    }
}
