//! Type lattice: atomic/node/function kinds under a single `item()` root, sequence types
//! and node tests.
use crate::xdm::ExpandedName;
use core::fmt;

pub mod cast;
pub mod lexical;
pub mod numeric;
pub mod temporal;

pub use cast::{cast_atomic, castable};
pub use numeric::{NumericKind, promote_pair};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Item,
    // nodes
    Node,
    Document,
    Element,
    Attribute,
    Text,
    Comment,
    ProcessingInstruction,
    // functions
    Function,
    Map,
    Array,
    // atomics
    AnyAtomic,
    Numeric,
    UntypedAtomic,
    String,
    NormalizedString,
    Token,
    Language,
    NmToken,
    Name,
    NcName,
    Id,
    IdRef,
    Entity,
    Boolean,
    Decimal,
    Integer,
    NonPositiveInteger,
    NegativeInteger,
    Long,
    Int,
    Short,
    Byte,
    NonNegativeInteger,
    UnsignedLong,
    UnsignedInt,
    UnsignedShort,
    UnsignedByte,
    PositiveInteger,
    Float,
    Double,
    Duration,
    YearMonthDuration,
    DayTimeDuration,
    DateTime,
    DateTimeStamp,
    Date,
    Time,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
    AnyUri,
    QName,
    Notation,
    Base64Binary,
    HexBinary,
}

pub(crate) const XS_NAMES: &[(Kind, &str)] = &[
    (Kind::AnyAtomic, "anyAtomicType"),
    (Kind::Numeric, "numeric"),
    (Kind::UntypedAtomic, "untypedAtomic"),
    (Kind::String, "string"),
    (Kind::NormalizedString, "normalizedString"),
    (Kind::Token, "token"),
    (Kind::Language, "language"),
    (Kind::NmToken, "NMTOKEN"),
    (Kind::Name, "Name"),
    (Kind::NcName, "NCName"),
    (Kind::Id, "ID"),
    (Kind::IdRef, "IDREF"),
    (Kind::Entity, "ENTITY"),
    (Kind::Boolean, "boolean"),
    (Kind::Decimal, "decimal"),
    (Kind::Integer, "integer"),
    (Kind::NonPositiveInteger, "nonPositiveInteger"),
    (Kind::NegativeInteger, "negativeInteger"),
    (Kind::Long, "long"),
    (Kind::Int, "int"),
    (Kind::Short, "short"),
    (Kind::Byte, "byte"),
    (Kind::NonNegativeInteger, "nonNegativeInteger"),
    (Kind::UnsignedLong, "unsignedLong"),
    (Kind::UnsignedInt, "unsignedInt"),
    (Kind::UnsignedShort, "unsignedShort"),
    (Kind::UnsignedByte, "unsignedByte"),
    (Kind::PositiveInteger, "positiveInteger"),
    (Kind::Float, "float"),
    (Kind::Double, "double"),
    (Kind::Duration, "duration"),
    (Kind::YearMonthDuration, "yearMonthDuration"),
    (Kind::DayTimeDuration, "dayTimeDuration"),
    (Kind::DateTime, "dateTime"),
    (Kind::DateTimeStamp, "dateTimeStamp"),
    (Kind::Date, "date"),
    (Kind::Time, "time"),
    (Kind::GYearMonth, "gYearMonth"),
    (Kind::GYear, "gYear"),
    (Kind::GMonthDay, "gMonthDay"),
    (Kind::GDay, "gDay"),
    (Kind::GMonth, "gMonth"),
    (Kind::AnyUri, "anyURI"),
    (Kind::QName, "QName"),
    (Kind::Notation, "NOTATION"),
    (Kind::Base64Binary, "base64Binary"),
    (Kind::HexBinary, "hexBinary"),
];

impl Kind {
    pub fn parent(self) -> Option<Kind> {
        use Kind::*;
        Some(match self {
            Item => return None,
            Node | Function | AnyAtomic => Item,
            Document | Element | Attribute | Text | Comment | ProcessingInstruction => Node,
            Map | Array => Function,
            Numeric | UntypedAtomic | String | Boolean | Decimal | Float | Double | Duration
            | DateTime | Date | Time | GYearMonth | GYear | GMonthDay | GDay | GMonth | AnyUri
            | QName | Notation | Base64Binary | HexBinary => AnyAtomic,
            NormalizedString => String,
            Token => NormalizedString,
            Language | NmToken | Name => Token,
            NcName => Name,
            Id | IdRef | Entity => NcName,
            Integer => Decimal,
            NonPositiveInteger | Long | NonNegativeInteger => Integer,
            NegativeInteger => NonPositiveInteger,
            Int => Long,
            Short => Int,
            Byte => Short,
            UnsignedLong | PositiveInteger => NonNegativeInteger,
            UnsignedInt => UnsignedLong,
            UnsignedShort => UnsignedInt,
            UnsignedByte => UnsignedShort,
            YearMonthDuration | DayTimeDuration => Duration,
            DateTimeStamp => DateTime,
        })
    }

    pub fn is_subtype_of(self, other: Kind) -> bool {
        if other == Kind::Numeric && self.is_numeric() {
            return true;
        }
        let mut cur = Some(self);
        while let Some(k) = cur {
            if k == other {
                return true;
            }
            cur = k.parent();
        }
        false
    }

    /// Nearest primitive ancestor (the kind itself for primitives).
    /// yearMonthDuration and dayTimeDuration are treated as primitive.
    pub fn primitive(self) -> Kind {
        let mut k = self;
        while let Some(p) = k.parent() {
            if matches!(p, Kind::AnyAtomic | Kind::Item | Kind::Node | Kind::Function) {
                return k;
            }
            if matches!(k, Kind::YearMonthDuration | Kind::DayTimeDuration) {
                return k;
            }
            k = p;
        }
        k
    }

    pub fn is_numeric(self) -> bool {
        matches!(self.primitive(), Kind::Decimal | Kind::Float | Kind::Double)
            || self == Kind::Numeric
    }

    pub fn is_atomic(self) -> bool {
        self != Kind::Item && self.is_subtype_of(Kind::AnyAtomic)
    }

    pub fn is_node(self) -> bool {
        self.is_subtype_of(Kind::Node)
    }

    /// Abstract or non-instantiable targets of `cast as`.
    pub fn is_abstract(self) -> bool {
        matches!(self, Kind::AnyAtomic | Kind::Numeric | Kind::Notation)
    }

    pub fn is_string_like(self) -> bool {
        matches!(self.primitive(), Kind::String | Kind::UntypedAtomic | Kind::AnyUri)
    }

    pub fn from_xs_local(local: &str) -> Option<Kind> {
        XS_NAMES.iter().find(|(_, n)| *n == local).map(|(k, _)| *k)
    }

    pub fn xs_local(self) -> Option<&'static str> {
        XS_NAMES.iter().find(|(k, _)| *k == self).map(|(_, n)| *n)
    }

    pub fn display_name(self) -> std::string::String {
        if let Some(local) = self.xs_local() {
            return format!("xs:{local}");
        }
        match self {
            Kind::Item => "item()",
            Kind::Node => "node()",
            Kind::Document => "document-node()",
            Kind::Element => "element()",
            Kind::Attribute => "attribute()",
            Kind::Text => "text()",
            Kind::Comment => "comment()",
            Kind::ProcessingInstruction => "processing-instruction()",
            Kind::Function => "function(*)",
            Kind::Map => "map(*)",
            Kind::Array => "array(*)",
            _ => "item()",
        }
        .to_string()
    }

    /// Inclusive value range of the derived integer types.
    pub fn integer_range(self) -> Option<(i128, i128)> {
        use Kind::*;
        Some(match self {
            Integer => (i128::from(i64::MIN), i128::from(i64::MAX)),
            NonPositiveInteger => (i128::from(i64::MIN), 0),
            NegativeInteger => (i128::from(i64::MIN), -1),
            Long => (i128::from(i64::MIN), i128::from(i64::MAX)),
            Int => (i128::from(i32::MIN), i128::from(i32::MAX)),
            Short => (i128::from(i16::MIN), i128::from(i16::MAX)),
            Byte => (i128::from(i8::MIN), i128::from(i8::MAX)),
            NonNegativeInteger | UnsignedLong => (0, i128::from(i64::MAX)),
            UnsignedInt => (0, i128::from(u32::MAX)),
            UnsignedShort => (0, i128::from(u16::MAX)),
            UnsignedByte => (0, i128::from(u8::MAX)),
            PositiveInteger => (1, i128::from(i64::MAX)),
            _ => return None,
        })
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Occurrence {
    ExactlyOne,
    ZeroOrOne,
    ZeroOrMore,
    OneOrMore,
}

impl Occurrence {
    pub fn allows(self, count: usize) -> bool {
        match self {
            Occurrence::ExactlyOne => count == 1,
            Occurrence::ZeroOrOne => count <= 1,
            Occurrence::ZeroOrMore => true,
            Occurrence::OneOrMore => count >= 1,
        }
    }

    pub fn allows_empty(self) -> bool {
        matches!(self, Occurrence::ZeroOrOne | Occurrence::ZeroOrMore)
    }

    pub fn allows_many(self) -> bool {
        matches!(self, Occurrence::ZeroOrMore | Occurrence::OneOrMore)
    }

    fn suffix(self) -> &'static str {
        match self {
            Occurrence::ExactlyOne => "",
            Occurrence::ZeroOrOne => "?",
            Occurrence::ZeroOrMore => "*",
            Occurrence::OneOrMore => "+",
        }
    }

    /// Occurrence of the concatenation of two sequences.
    pub fn concat(self, other: Occurrence) -> Occurrence {
        if !self.allows_empty() || !other.allows_empty() {
            Occurrence::OneOrMore
        } else {
            Occurrence::ZeroOrMore
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NameTest {
    Name(ExpandedName),
    /// `*`
    Any,
    /// `prefix:*` or `Q{uri}*`; `None` is the empty namespace.
    Namespace(Option<String>),
    /// `*:local`
    Local(String),
}

impl NameTest {
    pub fn matches(&self, ns_uri: Option<&str>, local: &str) -> bool {
        match self {
            NameTest::Any => true,
            NameTest::Name(n) => n.local == local && n.ns_uri.as_deref() == ns_uri,
            NameTest::Namespace(ns) => ns.as_deref() == ns_uri,
            NameTest::Local(l) => l == local,
        }
    }

    /// Local name when the test fixes one (used for bucket hints).
    pub fn fixed_local(&self) -> Option<&str> {
        match self {
            NameTest::Name(n) => Some(&n.local),
            NameTest::Local(l) => Some(l),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KindTest {
    AnyKind,
    Document(Option<Box<KindTest>>),
    Element(Option<NameTest>),
    Attribute(Option<NameTest>),
    Text,
    Comment,
    ProcessingInstruction(Option<String>),
    /// Schema-aware tests are matched like their untyped counterparts.
    SchemaElement(ExpandedName),
    SchemaAttribute(ExpandedName),
    NamespaceNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeTest {
    Name(NameTest),
    Kind(KindTest),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemType {
    AnyItem,
    Atomic(Kind),
    Kind(KindTest),
    AnyFunction,
    Function {
        params: Vec<SequenceType>,
        ret: Box<SequenceType>,
    },
    AnyMap,
    Map {
        key: Kind,
        value: Box<SequenceType>,
    },
    AnyArray,
    Array(Box<SequenceType>),
}

impl ItemType {
    /// Coarse lattice kind of the item type.
    pub fn kind(&self) -> Kind {
        match self {
            ItemType::AnyItem => Kind::Item,
            ItemType::Atomic(k) => *k,
            ItemType::Kind(kt) => match kt {
                KindTest::AnyKind | KindTest::NamespaceNode => Kind::Node,
                KindTest::Document(_) => Kind::Document,
                KindTest::Element(_) | KindTest::SchemaElement(_) => Kind::Element,
                KindTest::Attribute(_) | KindTest::SchemaAttribute(_) => Kind::Attribute,
                KindTest::Text => Kind::Text,
                KindTest::Comment => Kind::Comment,
                KindTest::ProcessingInstruction(_) => Kind::ProcessingInstruction,
            },
            ItemType::AnyFunction | ItemType::Function { .. } => Kind::Function,
            ItemType::AnyMap | ItemType::Map { .. } => Kind::Map,
            ItemType::AnyArray | ItemType::Array(_) => Kind::Array,
        }
    }

    pub fn node() -> Self {
        ItemType::Kind(KindTest::AnyKind)
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemType::Kind(KindTest::ProcessingInstruction(Some(t))) => {
                write!(f, "processing-instruction({t})")
            }
            ItemType::Kind(KindTest::Element(Some(NameTest::Name(n)))) => {
                write!(f, "element({})", n.display())
            }
            ItemType::Kind(KindTest::Attribute(Some(NameTest::Name(n)))) => {
                write!(f, "attribute({})", n.display())
            }
            ItemType::Function { params, ret } => {
                let ps: Vec<_> = params.iter().map(ToString::to_string).collect();
                write!(f, "function({}) as {ret}", ps.join(", "))
            }
            ItemType::Map { key, value } => write!(f, "map({key}, {value})"),
            ItemType::Array(m) => write!(f, "array({m})"),
            other => f.write_str(&other.kind().display_name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SequenceType {
    EmptySequence,
    Of {
        item: ItemType,
        occurrence: Occurrence,
    },
}

impl SequenceType {
    pub fn new(item: ItemType, occurrence: Occurrence) -> Self {
        SequenceType::Of { item, occurrence }
    }

    /// `item()*`
    pub fn any() -> Self {
        Self::new(ItemType::AnyItem, Occurrence::ZeroOrMore)
    }

    pub fn one(item: ItemType) -> Self {
        Self::new(item, Occurrence::ExactlyOne)
    }

    pub fn atomic(kind: Kind, occurrence: Occurrence) -> Self {
        Self::new(ItemType::Atomic(kind), occurrence)
    }

    pub fn occurrence(&self) -> Option<Occurrence> {
        match self {
            SequenceType::EmptySequence => None,
            SequenceType::Of { occurrence, .. } => Some(*occurrence),
        }
    }

    pub fn item_type(&self) -> Option<&ItemType> {
        match self {
            SequenceType::EmptySequence => None,
            SequenceType::Of { item, .. } => Some(item),
        }
    }

    /// Statically known to produce at most one item.
    pub fn is_singleton_or_empty(&self) -> bool {
        self.occurrence().is_none_or(|o| !o.allows_many())
    }

    pub fn is_exactly_one(&self) -> bool {
        self.occurrence() == Some(Occurrence::ExactlyOne)
    }

    /// Every item is a node.
    pub fn is_nodes(&self) -> bool {
        self.item_type().is_some_and(|i| i.kind().is_node())
    }

    /// Parse the compact notation used by builtin signatures, e.g. `xs:string?`,
    /// `item()*`, `node()`, `map(*)`, `function(*)`, `empty-sequence()`.
    pub fn parse_builtin(text: &str) -> Option<Self> {
        let text = text.trim();
        if text == "empty-sequence()" {
            return Some(SequenceType::EmptySequence);
        }
        let (body, occurrence) = match text.chars().last() {
            Some('?') => (&text[..text.len() - 1], Occurrence::ZeroOrOne),
            Some('*') if !text.ends_with("(*)") || text.ends_with("(*)*") => {
                (&text[..text.len() - 1], Occurrence::ZeroOrMore)
            }
            Some('+') => (&text[..text.len() - 1], Occurrence::OneOrMore),
            _ => (text, Occurrence::ExactlyOne),
        };
        let item = match body {
            "item()" => ItemType::AnyItem,
            "node()" => ItemType::node(),
            "element()" => ItemType::Kind(KindTest::Element(None)),
            "attribute()" => ItemType::Kind(KindTest::Attribute(None)),
            "document-node()" => ItemType::Kind(KindTest::Document(None)),
            "text()" => ItemType::Kind(KindTest::Text),
            "function(*)" => ItemType::AnyFunction,
            "map(*)" => ItemType::AnyMap,
            "array(*)" => ItemType::AnyArray,
            other => ItemType::Atomic(Kind::from_xs_local(other.strip_prefix("xs:")?)?),
        };
        Some(SequenceType::new(item, occurrence))
    }
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SequenceType::EmptySequence => f.write_str("empty-sequence()"),
            SequenceType::Of { item, occurrence } => write!(f, "{item}{}", occurrence.suffix()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_has_single_root() {
        for (k, _) in XS_NAMES {
            assert!(k.is_subtype_of(Kind::Item), "{k:?}");
        }
        assert!(Kind::Element.is_subtype_of(Kind::Item));
        assert!(Kind::Array.is_subtype_of(Kind::Function));
    }

    #[test]
    fn numeric_union_and_primitives() {
        assert!(Kind::UnsignedByte.is_subtype_of(Kind::Integer));
        assert!(Kind::UnsignedByte.is_subtype_of(Kind::Numeric));
        assert!(!Kind::String.is_subtype_of(Kind::Numeric));
        assert_eq!(Kind::Short.primitive(), Kind::Decimal);
        assert_eq!(Kind::NcName.primitive(), Kind::String);
        assert_eq!(Kind::DayTimeDuration.primitive(), Kind::DayTimeDuration);
    }

    #[test]
    fn parse_builtin_types() {
        assert_eq!(
            SequenceType::parse_builtin("xs:string?"),
            Some(SequenceType::atomic(Kind::String, Occurrence::ZeroOrOne))
        );
        assert_eq!(
            SequenceType::parse_builtin("map(*)"),
            Some(SequenceType::one(ItemType::AnyMap))
        );
        assert_eq!(
            SequenceType::parse_builtin("function(*)*"),
            Some(SequenceType::new(ItemType::AnyFunction, Occurrence::ZeroOrMore))
        );
    }
}
