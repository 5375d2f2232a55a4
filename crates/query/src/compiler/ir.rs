//! Compiled expression graph.
//!
//! Nodes are immutable and shared through `Arc`, so lazy cursors can hold on to the
//! sub-expressions they still have to evaluate. Variables are resolved to frame slots
//! (`VarId`) at compile time; prolog variables live in `Module::globals`.
use crate::engine::runtime::{NamespaceBindings, Span, StaticContext};
use crate::model::{Bucket, QName};
use crate::parser::ast::{Axis, InsertPosition, NodeComp, SetOp};
use crate::types::numeric::ArithOp;
use crate::types::{ItemType, Kind, NameTest, NodeTest, SequenceType};
use crate::xdm::{ExpandedName, XdmAtomicValue};
use core::cmp::Ordering;
use core::fmt;
use std::sync::Arc;

/// Slot index in the frame of the enclosing body (main module, function or global initializer).
pub type VarId = usize;

pub type ExprRef = Arc<Expr>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sortedness {
    Sorted,
    ReverseSorted,
    Unsorted,
}

/// Which parts of the focus an expression reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FocusDeps {
    pub item: bool,
    pub position: bool,
    pub last: bool,
}

impl FocusDeps {
    pub fn union(self, other: FocusDeps) -> FocusDeps {
        FocusDeps {
            item: self.item || other.item,
            position: self.position || other.position,
            last: self.last || other.last,
        }
    }

    pub fn any(self) -> bool {
        self.item || self.position || self.last
    }
}

/// Ranking vector for selector-style expressions: when several compiled queries match
/// the same node, the one with the greater specificity is the more specific match.
///
/// Components are compared from most to least significant: external function calls,
/// attribute tests, name tests, kind tests, wildcards.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Specificity {
    pub external: u32,
    pub attribute: u32,
    pub node_name: u32,
    pub node_type: u32,
    pub universal: u32,
}

impl Specificity {
    pub const ZERO: Specificity = Specificity {
        external: 0,
        attribute: 0,
        node_name: 0,
        node_type: 0,
        universal: 0,
    };

    pub fn add(self, other: Specificity) -> Specificity {
        Specificity {
            external: self.external + other.external,
            attribute: self.attribute + other.attribute,
            node_name: self.node_name + other.node_name,
            node_type: self.node_type + other.node_type,
            universal: self.universal + other.universal,
        }
    }

    fn key(self) -> [u32; 5] {
        [
            self.external,
            self.attribute,
            self.node_name,
            self.node_type,
            self.universal,
        ]
    }
}

impl PartialOrd for Specificity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Specificity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

#[derive(Debug, Clone)]
pub struct ExprMeta {
    /// `None` when nothing useful is known statically.
    pub static_type: Option<SequenceType>,
    pub specificity: Specificity,
    pub sortedness: Sortedness,
    /// Every result node lies inside the subtree of the context node.
    pub subtree: bool,
    /// No result node is an ancestor of another.
    pub peer: bool,
    pub is_updating: bool,
    pub focus: FocusDeps,
    pub span: Option<Span>,
}

impl Default for ExprMeta {
    fn default() -> Self {
        Self {
            static_type: None,
            specificity: Specificity::ZERO,
            sortedness: Sortedness::Unsorted,
            subtree: false,
            peer: false,
            is_updating: false,
            focus: FocusDeps::default(),
            span: None,
        }
    }
}

pub struct Expr {
    pub kind: ExprKind,
    pub meta: ExprMeta,
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expr")
            .field("kind", &self.kind)
            .field("type", &self.meta.static_type)
            .finish_non_exhaustive()
    }
}

/// How `E1/E2` combines the per-context results of `E2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMode {
    /// Results are already in document order and disjoint: concatenate.
    Concat,
    /// Sort, deduplicate and merge.
    Merge,
    /// `E2` yields atomics or functions: concatenate, checking for mixed results.
    Items,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompOp {
    pub fn symbol(self) -> &'static str {
        match self {
            CompOp::Eq => "eq",
            CompOp::Ne => "ne",
            CompOp::Lt => "lt",
            CompOp::Le => "le",
            CompOp::Gt => "gt",
            CompOp::Ge => "ge",
        }
    }

    /// The operator with its operands swapped (`a < b` ⇔ `b > a`).
    pub fn flip(self) -> CompOp {
        match self {
            CompOp::Lt => CompOp::Gt,
            CompOp::Le => CompOp::Ge,
            CompOp::Gt => CompOp::Lt,
            CompOp::Ge => CompOp::Le,
            other => other,
        }
    }

    pub fn holds(self, ord: Ordering) -> bool {
        match self {
            CompOp::Eq => ord == Ordering::Equal,
            CompOp::Ne => ord != Ordering::Equal,
            CompOp::Lt => ord == Ordering::Less,
            CompOp::Le => ord != Ordering::Greater,
            CompOp::Gt => ord == Ordering::Greater,
            CompOp::Ge => ord != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StepIr {
    pub axis: Axis,
    pub test: NodeTest,
    /// Neighbour filter handed to the adapter.
    pub bucket: Option<Bucket>,
    /// Evaluated per context node, with positions counted in axis order.
    pub predicates: Vec<ExprRef>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallTarget {
    Builtin,
    /// Index into `Module::functions`.
    User(usize),
}

#[derive(Debug, Clone)]
pub enum LookupKey {
    Name(String),
    Integer(i64),
    Expr(ExprRef),
    Wildcard,
}

#[derive(Debug, Clone)]
pub enum CtorName {
    Static(QName),
    Computed(ExprRef),
}

#[derive(Debug, Clone)]
pub enum Content {
    /// Literal text of a direct constructor.
    Text(String),
    Expr(ExprRef),
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub var: VarId,
    pub ty: Option<SequenceType>,
    pub source: ExprRef,
}

#[derive(Debug, Clone)]
pub struct TypeswitchCase {
    pub var: Option<VarId>,
    pub types: Vec<SequenceType>,
    pub result: ExprRef,
}

#[derive(Debug, Clone)]
pub struct Catch {
    pub tests: Vec<NameTest>,
    pub body: ExprRef,
}

/// Slots of the implicit `$err:*` variables inside catch clauses.
#[derive(Debug, Clone, Copy)]
pub struct ErrVars {
    pub code: VarId,
    pub description: VarId,
    pub value: VarId,
    pub module: VarId,
    pub line_number: VarId,
    pub column_number: VarId,
}

#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub key: ExprRef,
    pub descending: bool,
    pub empty_greatest: bool,
    pub collation: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GroupKey {
    pub var: VarId,
    pub collation: Option<String>,
}

#[derive(Debug, Clone)]
pub enum Clause {
    For {
        var: VarId,
        position: Option<VarId>,
        ty: Option<SequenceType>,
        allowing_empty: bool,
        source: ExprRef,
    },
    Let {
        var: VarId,
        ty: Option<SequenceType>,
        value: ExprRef,
    },
    Where(ExprRef),
    Count(VarId),
    /// Key values are bound by the `let` clauses the compiler emits just before.
    GroupBy {
        keys: Vec<GroupKey>,
        /// Variables bound earlier in the same FLWOR; regrouped by concatenation.
        others: Vec<VarId>,
    },
    OrderBy {
        stable: bool,
        specs: Vec<OrderSpec>,
    },
}

#[derive(Debug)]
pub enum ExprKind {
    Literal(XdmAtomicValue),
    Empty,
    Sequence(Vec<ExprRef>),
    Range(ExprRef, ExprRef),
    Local(VarId),
    /// Index into `Module::globals`.
    Global(usize),
    ContextItem,
    /// `fn:position()`
    Position,
    /// `fn:last()`
    Last,
    /// `/`: the document node at the root of the context node's tree.
    Root,
    Step(Box<StepIr>),
    Path {
        left: ExprRef,
        right: ExprRef,
        mode: PathMode,
    },
    Filter {
        base: ExprRef,
        predicates: Vec<ExprRef>,
    },
    SimpleMap {
        left: ExprRef,
        right: ExprRef,
    },
    Arithmetic {
        op: ArithOp,
        left: ExprRef,
        right: ExprRef,
    },
    Unary {
        negate: bool,
        operand: ExprRef,
    },
    Concat(ExprRef, ExprRef),
    And(ExprRef, ExprRef),
    Or(ExprRef, ExprRef),
    ValueCompare {
        op: CompOp,
        left: ExprRef,
        right: ExprRef,
    },
    GeneralCompare {
        op: CompOp,
        left: ExprRef,
        right: ExprRef,
    },
    NodeCompare {
        op: NodeComp,
        left: ExprRef,
        right: ExprRef,
    },
    SetOp {
        op: SetOp,
        left: ExprRef,
        right: ExprRef,
    },
    InstanceOf {
        operand: ExprRef,
        ty: SequenceType,
    },
    Treat {
        operand: ExprRef,
        ty: SequenceType,
    },
    Cast {
        operand: ExprRef,
        target: Kind,
        optional: bool,
    },
    Castable {
        operand: ExprRef,
        target: Kind,
        optional: bool,
    },
    If {
        cond: ExprRef,
        then: ExprRef,
        otherwise: ExprRef,
    },
    Switch {
        operand: ExprRef,
        cases: Vec<(Vec<ExprRef>, ExprRef)>,
        default: ExprRef,
    },
    Typeswitch {
        operand: ExprRef,
        cases: Vec<TypeswitchCase>,
        default_var: Option<VarId>,
        default: ExprRef,
    },
    Quantified {
        every: bool,
        bindings: Vec<Binding>,
        satisfies: ExprRef,
    },
    Flwor {
        clauses: Vec<Clause>,
        ret: ExprRef,
    },
    Try {
        body: ExprRef,
        catches: Vec<Catch>,
        err: ErrVars,
    },
    Call {
        target: CallTarget,
        name: ExpandedName,
        args: Vec<ExprRef>,
    },
    /// Static call with `?` placeholders: builds a partially applied function item.
    Partial {
        target: CallTarget,
        name: ExpandedName,
        arity: usize,
        args: Vec<Option<ExprRef>>,
    },
    DynamicCall {
        function: ExprRef,
        args: Vec<Option<ExprRef>>,
    },
    FunctionRef {
        target: CallTarget,
        name: ExpandedName,
        arity: usize,
    },
    Inline(Arc<InlineFunction>),
    Map(Vec<(ExprRef, ExprRef)>),
    SquareArray(Vec<ExprRef>),
    CurlyArray(Option<ExprRef>),
    /// `base?key`, or the unary `?key` against the context item when `base` is `None`.
    Lookup {
        base: Option<ExprRef>,
        key: LookupKey,
    },
    ElementCtor {
        name: CtorName,
        content: Vec<Content>,
    },
    AttributeCtor {
        name: CtorName,
        value: Vec<Content>,
    },
    DocumentCtor(Option<ExprRef>),
    TextCtor(Option<ExprRef>),
    CommentCtor(Vec<Content>),
    PiCtor {
        target: CtorName,
        content: Vec<Content>,
    },
    Insert {
        source: ExprRef,
        position: InsertPosition,
        target: ExprRef,
    },
    Delete(ExprRef),
    ReplaceNode {
        target: ExprRef,
        replacement: ExprRef,
    },
    ReplaceValue {
        target: ExprRef,
        value: ExprRef,
    },
    Rename {
        target: ExprRef,
        name: ExprRef,
    },
    Transform {
        copies: Vec<(VarId, ExprRef)>,
        modify: ExprRef,
        ret: ExprRef,
    },
    /// `fn:put($node, $uri)`
    Put {
        node: ExprRef,
        uri: ExprRef,
    },
}

#[derive(Debug, Clone)]
pub struct Param {
    pub var: VarId,
    pub ty: Option<SequenceType>,
}

/// `function($a, $b) { ... }` after compilation.
#[derive(Debug)]
pub struct InlineFunction {
    pub params: Vec<Param>,
    pub return_type: Option<SequenceType>,
    pub body: ExprRef,
    pub frame_size: usize,
    /// `(slot in the creating frame, slot in this function's frame)`.
    pub captures: Vec<(VarId, VarId)>,
}

#[derive(Debug)]
pub struct UserFunction {
    pub name: ExpandedName,
    pub params: Vec<Param>,
    pub return_type: Option<SequenceType>,
    pub body: ExprRef,
    pub frame_size: usize,
    pub updating: bool,
}

#[derive(Debug)]
pub struct GlobalVar {
    pub name: ExpandedName,
    pub ty: Option<SequenceType>,
    pub external: bool,
    /// Initializer, or the default of an external variable.
    pub init: Option<ExprRef>,
    pub frame_size: usize,
}

/// A main module with every imported library flattened into it.
pub struct Module {
    pub functions: Vec<UserFunction>,
    pub globals: Vec<GlobalVar>,
    pub body: Option<ExprRef>,
    pub frame_size: usize,
    pub static_ctx: Arc<StaticContext>,
    /// Static namespaces after the prolog, used for computed names and QName casts.
    pub namespaces: NamespaceBindings,
    pub context_item_type: Option<ItemType>,
    /// `declare context item := ...`, evaluated when the caller supplies no context item.
    pub context_item_default: Option<(ExprRef, usize)>,
    pub default_collation: Option<String>,
    pub empty_greatest: bool,
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("functions", &self.functions.len())
            .field("globals", &self.globals.len())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

impl Module {
    pub fn is_updating(&self) -> bool {
        self.body.as_ref().is_some_and(|b| b.meta.is_updating)
    }
}
