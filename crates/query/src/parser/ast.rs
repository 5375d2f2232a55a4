//! Syntax tree for XQuery 3.1 / XPath 3.1 modules, including the Update Facility.
//!
//! Names are kept as written (`prefix:local` or `Q{uri}local`); namespace resolution
//! happens in the static analyzer. Every expression carries the byte span it was parsed
//! from so that later phases can report positions.
use crate::engine::runtime::Span;
use crate::types::Occurrence;
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    pub prefix: Option<String>,
    pub local: String,
    /// Set for `Q{uri}local` names.
    pub ns_uri: Option<String>,
}

impl QName {
    pub fn local(local: impl Into<String>) -> Self {
        Self {
            prefix: None,
            local: local.into(),
            ns_uri: None,
        }
    }

    pub fn prefixed(prefix: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            prefix: Some(prefix.into()),
            local: local.into(),
            ns_uri: None,
        }
    }

    pub fn is_uri_qualified(&self) -> bool {
        self.ns_uri.is_some()
    }
}

impl core::fmt::Display for QName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match (&self.ns_uri, &self.prefix) {
            (Some(uri), _) => write!(f, "Q{{{uri}}}{}", self.local),
            (None, Some(p)) => write!(f, "{p}:{}", self.local),
            (None, None) => f.write_str(&self.local),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Integer(i64),
    Decimal(Decimal),
    Double(f64),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnarySign {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    And,
    Or,
    /// `||`
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeneralComp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueComp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeComp {
    Is,
    Precedes,
    Follows,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOp {
    Union,
    Intersect,
    Except,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    Some,
    Every,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Literal(Literal),
    EmptySequence,
    Sequence(Vec<Expr>),
    VarRef(QName),
    ContextItem,
    /// `?` in an argument list (partial function application).
    Placeholder,
    FunctionCall {
        name: QName,
        args: Vec<Expr>,
    },
    NamedFunctionRef {
        name: QName,
        arity: usize,
    },
    InlineFunction {
        params: Vec<Param>,
        return_type: Option<SequenceType>,
        body: Box<Expr>,
    },
    DynamicCall {
        function: Box<Expr>,
        args: Vec<Expr>,
    },
    Filter {
        base: Box<Expr>,
        predicates: Vec<Expr>,
    },
    Lookup {
        base: Box<Expr>,
        key: KeySpecifier,
    },
    UnaryLookup(KeySpecifier),
    Binary {
        left: Box<Expr>,
        op: BinaryOp,
        right: Box<Expr>,
    },
    GeneralComparison {
        left: Box<Expr>,
        op: GeneralComp,
        right: Box<Expr>,
    },
    ValueComparison {
        left: Box<Expr>,
        op: ValueComp,
        right: Box<Expr>,
    },
    NodeComparison {
        left: Box<Expr>,
        op: NodeComp,
        right: Box<Expr>,
    },
    Unary {
        sign: UnarySign,
        expr: Box<Expr>,
    },
    /// `E1 ! E2`
    SimpleMap {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
    },
    SetOp {
        left: Box<Expr>,
        op: SetOp,
        right: Box<Expr>,
    },
    InstanceOf {
        expr: Box<Expr>,
        ty: SequenceType,
    },
    TreatAs {
        expr: Box<Expr>,
        ty: SequenceType,
    },
    CastableAs {
        expr: Box<Expr>,
        ty: SingleType,
    },
    CastAs {
        expr: Box<Expr>,
        ty: SingleType,
    },
    IfThenElse {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    Switch {
        operand: Box<Expr>,
        cases: Vec<SwitchCase>,
        default: Box<Expr>,
    },
    Typeswitch {
        operand: Box<Expr>,
        cases: Vec<TypeswitchCase>,
        default_var: Option<QName>,
        default: Box<Expr>,
    },
    Quantified {
        kind: Quantifier,
        bindings: Vec<QuantifiedBinding>,
        satisfies: Box<Expr>,
    },
    Flwor {
        clauses: Vec<Clause>,
        return_expr: Box<Expr>,
    },
    TryCatch {
        body: Box<Expr>,
        catches: Vec<CatchClause>,
    },

    // Paths
    /// `/` on its own: the root of the context node's tree.
    Root,
    Path(PathExpr),
    AxisStep(Step),

    // Constructors
    MapConstructor(Vec<(Expr, Expr)>),
    SquareArray(Vec<Expr>),
    CurlyArray(Option<Box<Expr>>),
    DirElement(DirElement),
    DirComment(String),
    DirPi {
        target: String,
        data: String,
    },
    CompDocument(Option<Box<Expr>>),
    CompElement {
        name: ConstructorName,
        content: Option<Box<Expr>>,
    },
    CompAttribute {
        name: ConstructorName,
        content: Option<Box<Expr>>,
    },
    CompText(Option<Box<Expr>>),
    CompComment(Option<Box<Expr>>),
    CompPi {
        target: ConstructorName,
        content: Option<Box<Expr>>,
    },

    // Update Facility
    Insert {
        source: Box<Expr>,
        position: InsertPosition,
        target: Box<Expr>,
    },
    Delete(Box<Expr>),
    ReplaceNode {
        target: Box<Expr>,
        replacement: Box<Expr>,
    },
    ReplaceValue {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Rename {
        target: Box<Expr>,
        name: Box<Expr>,
    },
    Transform {
        bindings: Vec<(QName, Expr)>,
        modify: Box<Expr>,
        return_expr: Box<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: QName,
    pub ty: Option<SequenceType>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KeySpecifier {
    Name(String),
    Integer(i64),
    Expr(Box<Expr>),
    Wildcard,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub values: Vec<Expr>,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeswitchCase {
    pub var: Option<QName>,
    pub types: Vec<SequenceType>,
    pub result: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuantifiedBinding {
    pub var: QName,
    pub ty: Option<SequenceType>,
    pub in_expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub tests: Vec<NameTest>,
    pub body: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Clause {
    For(ForBinding),
    Let(LetBinding),
    Where(Expr),
    Count(QName),
    GroupBy(Vec<GroupingSpec>),
    OrderBy {
        stable: bool,
        specs: Vec<OrderSpec>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForBinding {
    pub var: QName,
    pub ty: Option<SequenceType>,
    pub allowing_empty: bool,
    pub position: Option<QName>,
    pub in_expr: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LetBinding {
    pub var: QName,
    pub ty: Option<SequenceType>,
    pub value: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GroupingSpec {
    pub var: QName,
    pub ty: Option<SequenceType>,
    /// `group by $k := expr`; `None` groups by the existing binding of `$k`.
    pub value: Option<Expr>,
    pub collation: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderSpec {
    pub expr: Expr,
    pub descending: bool,
    /// `empty greatest` / `empty least`; `None` uses the prolog default.
    pub empty_greatest: Option<bool>,
    pub collation: Option<String>,
}

// ===== Paths and steps =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathStart {
    Root,
    RootDescendant,
    Relative,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathExpr {
    pub start: PathStart,
    /// Axis steps or arbitrary postfix expressions; `//` between steps is already
    /// expanded to a `descendant-or-self::node()` step.
    pub steps: Vec<Expr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    Child,
    Descendant,
    Attribute,
    SelfAxis,
    DescendantOrSelf,
    FollowingSibling,
    Following,
    Namespace,
    Parent,
    Ancestor,
    PrecedingSibling,
    Preceding,
    AncestorOrSelf,
}

impl Axis {
    pub fn is_reverse(self) -> bool {
        matches!(
            self,
            Axis::Parent
                | Axis::Ancestor
                | Axis::AncestorOrSelf
                | Axis::PrecedingSibling
                | Axis::Preceding
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub axis: Axis,
    pub test: NodeTest,
    pub predicates: Vec<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NodeTest {
    Name(NameTest),
    Kind(KindTest),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameTest {
    QName(QName),
    Wildcard(Wildcard),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wildcard {
    Any,
    /// `prefix:*`
    Prefix(String),
    /// `Q{uri}*`
    Uri(String),
    /// `*:local`
    Local(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum KindTest {
    AnyKind,
    Document(Option<Box<KindTest>>),
    Text,
    Comment,
    NamespaceNode,
    ProcessingInstruction(Option<String>),
    Element {
        name: Option<NameOrWildcard>,
        ty: Option<QName>,
        nillable: bool,
    },
    Attribute {
        name: Option<NameOrWildcard>,
        ty: Option<QName>,
    },
    SchemaElement(QName),
    SchemaAttribute(QName),
}

#[derive(Debug, Clone, PartialEq)]
pub enum NameOrWildcard {
    Name(QName),
    Any,
}

// ===== Types =====

#[derive(Debug, Clone, PartialEq)]
pub struct SingleType {
    pub atomic: QName,
    pub optional: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemType {
    Item,
    Atomic(QName),
    Kind(KindTest),
    AnyFunction,
    Function {
        params: Vec<SequenceType>,
        ret: Box<SequenceType>,
    },
    AnyMap,
    Map {
        key: QName,
        value: Box<SequenceType>,
    },
    AnyArray,
    Array(Box<SequenceType>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SequenceType {
    EmptySequence,
    Typed { item: ItemType, occ: Occurrence },
}

// ===== Constructors =====

#[derive(Debug, Clone, PartialEq)]
pub enum ConstructorName {
    Literal(QName),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirElement {
    pub name: QName,
    /// `xmlns` / `xmlns:p` declarations, in source order; `""` is the default namespace.
    pub namespaces: Vec<(String, String)>,
    pub attributes: Vec<DirAttribute>,
    pub content: Vec<DirContent>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DirAttribute {
    pub name: QName,
    pub value: Vec<AttrValuePart>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValuePart {
    Text(String),
    Enclosed(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DirContent {
    Text(String),
    /// `{ expr }`; an empty enclosed expression is dropped by the parser.
    Enclosed(Expr),
    /// Nested direct element, comment or processing instruction.
    Node(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertPosition {
    Into,
    AsFirstInto,
    AsLastInto,
    Before,
    After,
}

// ===== Modules =====

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Module {
    /// `module namespace p = "uri";` for library modules.
    pub library: Option<ModuleDecl>,
    pub prolog: Prolog,
    /// Query body; `None` for library modules.
    pub body: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDecl {
    pub prefix: String,
    pub uri: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Prolog {
    pub namespaces: Vec<(String, String)>,
    pub default_element_namespace: Option<String>,
    pub default_function_namespace: Option<String>,
    pub boundary_space_preserve: bool,
    pub default_collation: Option<String>,
    pub base_uri: Option<String>,
    pub empty_order_greatest: bool,
    pub imports: Vec<ModuleImport>,
    pub variables: Vec<VarDecl>,
    pub functions: Vec<FunctionDecl>,
    pub context_item: Option<ContextItemDecl>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleImport {
    pub prefix: Option<String>,
    pub uri: String,
    pub hints: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: QName,
    pub ty: Option<SequenceType>,
    pub external: bool,
    /// Initializer, or the default of an external variable.
    pub value: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: QName,
    pub params: Vec<Param>,
    pub return_type: Option<SequenceType>,
    pub body: Expr,
    pub updating: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContextItemDecl {
    pub ty: Option<ItemType>,
    pub external: bool,
    pub value: Option<Expr>,
}
