//! Lowering of the syntax tree into the expression graph.
//!
//! The compiler resolves every name (namespaces, variables, functions, types), assigns
//! frame slots, and computes the metadata the evaluator relies on: static types,
//! sortedness, the subtree/peer flags that let paths stream without sorting, focus
//! dependencies, updating-ness and specificity.
use crate::compiler::analyze::{Namespaces, Scopes};
use crate::compiler::ir::{
    Binding, CallTarget, Catch, Clause, CompOp, Content, CtorName, ErrVars, Expr, ExprKind,
    ExprMeta, ExprRef, FocusDeps, GlobalVar, GroupKey, InlineFunction, LookupKey, Module,
    OrderSpec, Param, PathMode, Sortedness, Specificity, StepIr, TypeswitchCase, UserFunction,
    VarId,
};
use crate::consts::{ARRAY_NS, ERR_NS, FNS, MAP_NS, MATH_NS, XML_URI, XS};
use crate::engine::runtime::{Error, ErrorCode, NamespaceBindings, Span, StaticContext};
use crate::model::{Bucket, QName};
use crate::parser::{self, ast};
use crate::types::numeric::ArithOp;
use crate::types::{ItemType, Kind, KindTest, NameTest, NodeTest, Occurrence, SequenceType};
use crate::xdm::{ExpandedName, XdmAtomicValue};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub mod analyze;
pub mod closure;
pub mod ir;

type Result<T> = std::result::Result<T, Error>;

/// A compiled main module. Immutable and shareable across threads.
#[derive(Debug, Clone)]
pub struct CompiledQuery {
    pub(crate) module: Arc<Module>,
    source: Arc<str>,
}

impl CompiledQuery {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Root of the expression graph.
    pub fn expr(&self) -> Option<&Expr> {
        self.module.body.as_deref()
    }

    pub fn is_updating(&self) -> bool {
        self.module.is_updating()
    }

    pub fn specificity(&self) -> Specificity {
        self.expr()
            .map_or(Specificity::ZERO, |e| e.meta.specificity)
    }

    pub fn static_type(&self) -> Option<&SequenceType> {
        self.expr().and_then(|e| e.meta.static_type.as_ref())
    }

    pub fn static_context(&self) -> &StaticContext {
        &self.module.static_ctx
    }
}

/// Parse and compile `source` against `static_ctx`.
///
/// ```
/// use sylva_query::compiler::compile;
/// use sylva_query::engine::runtime::StaticContext;
///
/// let q = compile("for $x in (1, 2, 3) return $x * 2", &StaticContext::default()).unwrap();
/// assert!(!q.is_updating());
/// ```
pub fn compile(source: &str, static_ctx: &StaticContext) -> Result<CompiledQuery> {
    let module = parser::parse_module(source, static_ctx.language)?;
    compile_ast(&module, source, static_ctx)
}

/// Compile an already parsed main module. `source` is kept for diagnostics only.
pub fn compile_ast(module: &ast::Module, source: &str, static_ctx: &StaticContext) -> Result<CompiledQuery> {
    if module.library.is_some() {
        return Err(Error::from_code(
            ErrorCode::XPST0003,
            "a library module cannot be compiled as a query",
        ));
    }
    let compiled = Compiler::new(static_ctx).main(module)?;
    Ok(CompiledQuery {
        module: Arc::new(compiled),
        source: Arc::from(source),
    })
}

struct FnDecl {
    name: ExpandedName,
    updating: bool,
    return_type: Option<SequenceType>,
}

/// A library module waiting for its bodies to be compiled.
struct Unit {
    ns: Namespaces,
    ast: ast::Module,
    functions: Vec<usize>,
    globals: Vec<usize>,
}

struct Compiler<'a> {
    ctx: &'a StaticContext,
    ns: Namespaces,
    scopes: Scopes,
    fn_decls: Vec<FnDecl>,
    fn_index: HashMap<(ExpandedName, usize), usize>,
    global_names: Vec<ExpandedName>,
    global_index: HashMap<ExpandedName, usize>,
    globals: Vec<Option<GlobalVar>>,
    imported: HashSet<String>,
    units: Vec<Unit>,
    empty_greatest: bool,
}

const RESERVED_FUNCTION_NAMESPACES: &[&str] = &[FNS, XS, MATH_NS, MAP_NS, ARRAY_NS, XML_URI];

fn static_error(code: ErrorCode, msg: impl Into<String>, span: Span) -> Error {
    Error::from_code(code, msg).with_span(span)
}

fn node(kind: ExprKind, meta: ExprMeta) -> ExprRef {
    Arc::new(Expr { kind, meta })
}

fn meta_of(span: Span, children: &[&ExprRef]) -> ExprMeta {
    let mut meta = ExprMeta {
        span: Some(span),
        ..ExprMeta::default()
    };
    for c in children {
        meta.specificity = meta.specificity.add(c.meta.specificity);
        meta.focus = meta.focus.union(c.meta.focus);
    }
    meta
}

fn one(kind: Kind) -> Option<SequenceType> {
    Some(SequenceType::atomic(kind, Occurrence::ExactlyOne))
}

fn nodes_of(item: ItemType) -> Option<SequenceType> {
    Some(SequenceType::new(item, Occurrence::ZeroOrMore))
}

fn is_boolean_type(ty: Option<&SequenceType>) -> bool {
    ty.and_then(SequenceType::item_type)
        .is_some_and(|i| *i == ItemType::Atomic(Kind::Boolean) || i.kind().is_node())
}

/// Evaluates to `()` or raises: allowed wherever an updating expression is expected.
fn is_vacuous(e: &Expr) -> bool {
    match &e.kind {
        ExprKind::Empty => true,
        ExprKind::Call { name, .. } => name.ns_uri.as_deref() == Some(FNS) && name.local == "error",
        _ => false,
    }
}

/// Result is in document order once evaluated on its own.
fn yields_document_order(e: &Expr) -> bool {
    match e.kind {
        ExprKind::Step(_) => true,
        _ => e.meta.sortedness == Sortedness::Sorted,
    }
}

fn comp_op(op: ast::ValueComp) -> CompOp {
    match op {
        ast::ValueComp::Eq => CompOp::Eq,
        ast::ValueComp::Ne => CompOp::Ne,
        ast::ValueComp::Lt => CompOp::Lt,
        ast::ValueComp::Le => CompOp::Le,
        ast::ValueComp::Gt => CompOp::Gt,
        ast::ValueComp::Ge => CompOp::Ge,
    }
}

fn general_op(op: ast::GeneralComp) -> CompOp {
    match op {
        ast::GeneralComp::Eq => CompOp::Eq,
        ast::GeneralComp::Ne => CompOp::Ne,
        ast::GeneralComp::Lt => CompOp::Lt,
        ast::GeneralComp::Le => CompOp::Le,
        ast::GeneralComp::Gt => CompOp::Gt,
        ast::GeneralComp::Ge => CompOp::Ge,
    }
}

/// Static result kind of arithmetic on two single numerics.
fn arithmetic_type(op: ArithOp, l: Option<&SequenceType>, r: Option<&SequenceType>) -> Option<SequenceType> {
    let kind_of = |t: Option<&SequenceType>| match t? {
        SequenceType::Of {
            item: ItemType::Atomic(k),
            occurrence: Occurrence::ExactlyOne,
        } if k.is_numeric() && *k != Kind::Numeric => Some(k.primitive()),
        _ => None,
    };
    let (a, b) = (kind_of(l)?, kind_of(r)?);
    let rank = |k: Kind| match k {
        Kind::Decimal => 1,
        Kind::Float => 2,
        Kind::Double => 3,
        _ => 0,
    };
    // integers are decimals by primitive; tell them apart by the declared kind
    let int = |t: Option<&SequenceType>| {
        t.and_then(SequenceType::item_type)
            .is_some_and(|i| i.kind().is_subtype_of(Kind::Integer))
    };
    let top = if rank(a) >= rank(b) { a } else { b };
    let kind = match op {
        ArithOp::IDiv => Kind::Integer,
        ArithOp::Div if top == Kind::Decimal => Kind::Decimal,
        _ if top == Kind::Decimal && int(l) && int(r) => Kind::Integer,
        _ => top,
    };
    one(kind)
}

fn step_specificity(axis: ast::Axis, test: &NodeTest) -> Specificity {
    let mut s = Specificity::ZERO;
    match test {
        NodeTest::Name(NameTest::Name(_)) if axis == ast::Axis::Attribute => s.attribute = 1,
        NodeTest::Name(NameTest::Name(_)) => s.node_name = 1,
        NodeTest::Name(NameTest::Any) => s.universal = 1,
        NodeTest::Name(_) => s.node_type = 1,
        NodeTest::Kind(KindTest::AnyKind) => s.universal = 1,
        NodeTest::Kind(KindTest::Attribute(Some(_)) | KindTest::SchemaAttribute(_)) => s.attribute = 1,
        NodeTest::Kind(KindTest::Element(Some(_)) | KindTest::SchemaElement(_)) => s.node_name = 1,
        NodeTest::Kind(_) => s.node_type = 1,
    }
    s
}

/// Neighbour filter for the adapter. Attribute steps are not bucketed.
fn bucket_for(axis: ast::Axis, test: &NodeTest) -> Option<Bucket> {
    if axis == ast::Axis::Attribute {
        return None;
    }
    let named = |n: &NameTest| n.fixed_local().map_or(Bucket::Element, Bucket::named);
    match test {
        NodeTest::Name(n) => Some(named(n)),
        NodeTest::Kind(k) => match k {
            KindTest::Element(Some(n)) => Some(named(n)),
            KindTest::Element(None) => Some(Bucket::Element),
            KindTest::SchemaElement(n) => Some(Bucket::named(&n.local)),
            KindTest::Text => Some(Bucket::Text),
            KindTest::Comment => Some(Bucket::Comment),
            KindTest::ProcessingInstruction(_) => Some(Bucket::ProcessingInstruction),
            KindTest::Document(_) => Some(Bucket::Document),
            _ => None,
        },
    }
}

fn step_item_type(axis: ast::Axis, test: &NodeTest) -> ItemType {
    match test {
        NodeTest::Kind(k) => ItemType::Kind(k.clone()),
        NodeTest::Name(_) if axis == ast::Axis::Attribute => ItemType::Kind(KindTest::Attribute(None)),
        NodeTest::Name(_) => ItemType::Kind(KindTest::Element(None)),
    }
}

fn step_shape(axis: ast::Axis) -> (Sortedness, bool, bool) {
    use ast::Axis::*;
    match axis {
        Child | Attribute | SelfAxis => (Sortedness::Sorted, true, true),
        Descendant | DescendantOrSelf => (Sortedness::Sorted, true, false),
        FollowingSibling | Parent => (Sortedness::Sorted, false, true),
        Following | Namespace => (Sortedness::Sorted, false, false),
        PrecedingSibling => (Sortedness::ReverseSorted, false, true),
        Ancestor | AncestorOrSelf | Preceding => (Sortedness::ReverseSorted, false, false),
    }
}

fn make_step(axis: ast::Axis, test: NodeTest, predicates: Vec<ExprRef>, span: Span) -> ExprRef {
    let refs: Vec<&ExprRef> = predicates.iter().collect();
    let mut meta = meta_of(span, &refs);
    meta.focus = FocusDeps {
        item: true,
        ..FocusDeps::default()
    };
    meta.specificity = meta.specificity.add(step_specificity(axis, &test));
    let (sortedness, subtree, peer) = step_shape(axis);
    meta.sortedness = sortedness;
    meta.subtree = subtree;
    meta.peer = peer;
    meta.static_type = nodes_of(step_item_type(axis, &test));
    let bucket = bucket_for(axis, &test);
    node(
        ExprKind::Step(Box::new(StepIr {
            axis,
            test,
            bucket,
            predicates,
        })),
        meta,
    )
}

fn is_positional(p: &Expr) -> bool {
    p.meta.focus.position || p.meta.focus.last || !is_boolean_type(p.meta.static_type.as_ref())
}

/// `descendant-or-self::node()` without predicates.
fn is_dos_node(e: &Expr) -> bool {
    matches!(&e.kind, ExprKind::Step(s)
        if s.axis == ast::Axis::DescendantOrSelf
            && s.test == NodeTest::Kind(KindTest::AnyKind)
            && s.predicates.is_empty())
}

/// `child::x[p]` with non-positional predicates, re-expressed as `descendant::x[p]`.
fn as_descendant(e: &Expr) -> Option<ExprRef> {
    let ExprKind::Step(s) = &e.kind else {
        return None;
    };
    if s.axis != ast::Axis::Child || s.predicates.iter().any(|p| is_positional(p)) {
        return None;
    }
    let span = e.meta.span.unwrap_or_default();
    Some(make_step(ast::Axis::Descendant, s.test.clone(), s.predicates.clone(), span))
}

impl<'a> Compiler<'a> {
    fn new(ctx: &'a StaticContext) -> Self {
        Self {
            ctx,
            ns: Namespaces::new(
                ctx.namespaces.clone(),
                ctx.default_element_namespace.clone(),
                ctx.default_function_namespace.clone(),
            ),
            scopes: Scopes::new(),
            fn_decls: Vec::new(),
            fn_index: HashMap::new(),
            global_names: Vec::new(),
            global_index: HashMap::new(),
            globals: Vec::new(),
            imported: HashSet::new(),
            units: Vec::new(),
            empty_greatest: false,
        }
    }

    // ===== Modules and prolog =====

    fn main(mut self, module: &ast::Module) -> Result<Module> {
        self.ns = self.unit_namespaces(module);
        self.empty_greatest = module.prolog.empty_order_greatest;
        self.import_all(&module.prolog.imports)?;
        let main_fns = self.declare_functions(&module.prolog, None)?;
        let main_globals = self.declare_globals(&module.prolog, None)?;

        let mut functions: Vec<Option<UserFunction>> = (0..self.fn_decls.len()).map(|_| None).collect();
        for unit in std::mem::take(&mut self.units) {
            let saved = std::mem::replace(&mut self.ns, unit.ns);
            self.prolog_bodies(&unit.ast.prolog, &unit.functions, &unit.globals, &mut functions)?;
            self.ns = saved;
        }
        self.prolog_bodies(&module.prolog, &main_fns, &main_globals, &mut functions)?;

        let (context_item_type, context_item_default) = match &module.prolog.context_item {
            Some(decl) => {
                let span = Span::default();
                let ty = decl.ty.as_ref().map(|t| self.ns.item_type(t, span)).transpose()?;
                let default = match &decl.value {
                    Some(v) => {
                        self.scopes.push_frame(false);
                        let e = self.expr(v)?;
                        let e = self.simple(e)?;
                        let info = self.scopes.pop_frame();
                        Some((e, info.size))
                    }
                    None => None,
                };
                (ty, default)
            }
            None => (None, None),
        };

        let body = match &module.body {
            Some(b) => Some(self.expr(b)?),
            None => None,
        };
        let frame_size = self.scopes.frame_size();

        let functions = functions
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::from_code(ErrorCode::XPST0017, "function declared but never compiled"))?;
        let globals = std::mem::take(&mut self.globals)
            .into_iter()
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::from_code(ErrorCode::XPST0008, "variable declared but never compiled"))?;

        let mut static_ctx = self.ctx.clone();
        if let Some(base) = &module.prolog.base_uri {
            static_ctx.base_uri = Some(base.clone());
        }
        if let Some(c) = &module.prolog.default_collation {
            static_ctx.default_collation = Some(c.clone());
        }
        static_ctx.default_element_namespace = self.ns.default_element.clone();
        static_ctx.default_function_namespace = self.ns.default_function.clone();
        static_ctx.namespaces = self.ns.base.clone();

        Ok(Module {
            functions,
            globals,
            body,
            frame_size,
            default_collation: static_ctx.default_collation.clone(),
            namespaces: self.ns.base.clone(),
            static_ctx: Arc::new(static_ctx),
            context_item_type,
            context_item_default,
            empty_greatest: self.empty_greatest,
        })
    }

    fn unit_namespaces(&self, module: &ast::Module) -> Namespaces {
        let mut base: NamespaceBindings = self.ctx.namespaces.clone();
        let prolog = &module.prolog;
        for (p, u) in &prolog.namespaces {
            base.by_prefix.insert(p.clone(), u.clone());
        }
        for import in &prolog.imports {
            if let Some(p) = &import.prefix {
                base.by_prefix.insert(p.clone(), import.uri.clone());
            }
        }
        if let Some(lib) = &module.library {
            base.by_prefix.insert(lib.prefix.clone(), lib.uri.clone());
        }
        let non_empty = |s: &Option<String>| s.clone().filter(|u| !u.is_empty());
        let default_element = match &prolog.default_element_namespace {
            Some(u) => non_empty(&Some(u.clone())),
            None => self.ctx.default_element_namespace.clone(),
        };
        let default_function = match &prolog.default_function_namespace {
            Some(u) => non_empty(&Some(u.clone())),
            None => self.ctx.default_function_namespace.clone(),
        };
        Namespaces::new(base, default_element, default_function)
    }

    fn import_all(&mut self, imports: &[ast::ModuleImport]) -> Result<()> {
        let mut seen = HashSet::new();
        for import in imports {
            if !seen.insert(import.uri.as_str()) {
                return Err(Error::from_code(
                    ErrorCode::XQST0047,
                    format!("module {} is imported twice", import.uri),
                ));
            }
            self.import_module(import)?;
        }
        Ok(())
    }

    fn import_module(&mut self, import: &ast::ModuleImport) -> Result<()> {
        let uri = import.uri.clone();
        if !self.imported.insert(uri.clone()) {
            return Ok(());
        }
        let unresolved = || {
            Error::from_code(
                ErrorCode::XQST0059,
                format!("no module found for namespace {uri}"),
            )
        };
        let resolver = self.ctx.module_resolver.as_ref().ok_or_else(unresolved)?;
        let text = resolver.resolve(&uri, &import.hints).ok_or_else(unresolved)?;
        let library = parser::parse_module(&text, self.ctx.language)?;
        if library.library.as_ref().is_none_or(|d| d.uri != uri) {
            return Err(Error::from_code(
                ErrorCode::XQST0059,
                format!("resolved module does not declare namespace {uri}"),
            ));
        }
        tracing::debug!(namespace = %uri, "importing library module");
        let lib_ns = self.unit_namespaces(&library);
        let saved = std::mem::replace(&mut self.ns, lib_ns);
        let declared = self.import_all(&library.prolog.imports).and_then(|()| {
            let functions = self.declare_functions(&library.prolog, Some(&uri))?;
            let globals = self.declare_globals(&library.prolog, Some(&uri))?;
            Ok((functions, globals))
        });
        let ns = std::mem::replace(&mut self.ns, saved);
        let (functions, globals) = declared?;
        self.units.push(Unit {
            ns,
            ast: library,
            functions,
            globals,
        });
        Ok(())
    }

    fn declare_functions(&mut self, prolog: &ast::Prolog, library: Option<&str>) -> Result<Vec<usize>> {
        let mut out = Vec::with_capacity(prolog.functions.len());
        for f in &prolog.functions {
            let name = self.ns.function_name(&f.name, f.span)?;
            let ns = name.ns_uri.as_deref().unwrap_or_default();
            if RESERVED_FUNCTION_NAMESPACES.contains(&ns) {
                return Err(static_error(
                    ErrorCode::XQST0045,
                    format!("function {} is declared in a reserved namespace", f.name),
                    f.span,
                ));
            }
            if let Some(lib) = library
                && ns != lib
            {
                return Err(static_error(
                    ErrorCode::XQST0048,
                    format!("function {} is not in the module namespace", f.name),
                    f.span,
                ));
            }
            let key = (name.clone(), f.params.len());
            if self.fn_index.contains_key(&key) {
                return Err(static_error(
                    ErrorCode::XQST0034,
                    format!("function {}#{} is declared twice", f.name, f.params.len()),
                    f.span,
                ));
            }
            let mut params = HashSet::new();
            for p in &f.params {
                if !params.insert(self.ns.plain_name(&p.name, f.span)?) {
                    return Err(static_error(
                        ErrorCode::XQST0039,
                        format!("duplicate parameter ${}", p.name),
                        f.span,
                    ));
                }
            }
            let return_type = f
                .return_type
                .as_ref()
                .map(|t| self.ns.sequence_type(t, f.span))
                .transpose()?;
            let index = self.fn_decls.len();
            self.fn_decls.push(FnDecl {
                name,
                updating: f.updating,
                return_type,
            });
            self.fn_index.insert(key, index);
            out.push(index);
        }
        Ok(out)
    }

    fn declare_globals(&mut self, prolog: &ast::Prolog, library: Option<&str>) -> Result<Vec<usize>> {
        let mut out = Vec::with_capacity(prolog.variables.len());
        for v in &prolog.variables {
            let name = self.ns.plain_name(&v.name, v.span)?;
            if let Some(lib) = library
                && name.ns_uri.as_deref() != Some(lib)
            {
                return Err(static_error(
                    ErrorCode::XQST0048,
                    format!("variable ${} is not in the module namespace", v.name),
                    v.span,
                ));
            }
            if self.global_index.contains_key(&name) {
                return Err(static_error(
                    ErrorCode::XQST0049,
                    format!("variable ${} is declared twice", v.name),
                    v.span,
                ));
            }
            out.push(self.add_global(name, None));
        }
        Ok(out)
    }

    fn add_global(&mut self, name: ExpandedName, value: Option<GlobalVar>) -> usize {
        let index = self.globals.len();
        self.global_index.insert(name.clone(), index);
        self.global_names.push(name);
        self.globals.push(value);
        index
    }

    fn prolog_bodies(
        &mut self,
        prolog: &ast::Prolog,
        fn_indices: &[usize],
        global_indices: &[usize],
        out: &mut [Option<UserFunction>],
    ) -> Result<()> {
        for (decl, &gi) in prolog.variables.iter().zip(global_indices) {
            self.scopes.push_frame(false);
            let init = match &decl.value {
                Some(v) => self.expr(v).and_then(|e| self.simple(e)).map(Some),
                None => Ok(None),
            };
            let info = self.scopes.pop_frame();
            let ty = decl
                .ty
                .as_ref()
                .map(|t| self.ns.sequence_type(t, decl.span))
                .transpose()?;
            self.globals[gi] = Some(GlobalVar {
                name: self.global_names[gi].clone(),
                ty,
                external: decl.external,
                init: init?,
                frame_size: info.size,
            });
        }
        for (decl, &fi) in prolog.functions.iter().zip(fn_indices) {
            self.scopes.push_frame(false);
            let compiled = self.function_body(decl);
            let info = self.scopes.pop_frame();
            let (params, body) = compiled?;
            let d = &self.fn_decls[fi];
            out[fi] = Some(UserFunction {
                name: d.name.clone(),
                params,
                return_type: d.return_type.clone(),
                body,
                frame_size: info.size,
                updating: d.updating,
            });
        }
        Ok(())
    }

    fn function_body(&mut self, decl: &ast::FunctionDecl) -> Result<(Vec<Param>, ExprRef)> {
        let mut params = Vec::with_capacity(decl.params.len());
        for p in &decl.params {
            let ty = p.ty.as_ref().map(|t| self.ns.sequence_type(t, decl.span)).transpose()?;
            let var = self.scopes.bind(self.ns.plain_name(&p.name, decl.span)?);
            params.push(Param { var, ty });
        }
        let body = self.expr(&decl.body)?;
        if decl.updating && !body.meta.is_updating && !is_vacuous(&body) {
            return Err(static_error(
                ErrorCode::XUST0002,
                format!("body of updating function {} is not an updating expression", decl.name),
                decl.span,
            ));
        }
        if !decl.updating && body.meta.is_updating {
            return Err(static_error(
                ErrorCode::XUST0001,
                format!("function {} is not declared %updating", decl.name),
                decl.span,
            ));
        }
        Ok((params, body))
    }

    // ===== Expressions =====

    /// Reject updating expressions in a position that only allows simple ones.
    fn simple(&self, e: ExprRef) -> Result<ExprRef> {
        if e.meta.is_updating {
            return Err(Error::from_code(
                ErrorCode::XUST0001,
                "updating expression used where a value is required",
            )
            .or_span(e.meta.span));
        }
        Ok(e)
    }

    fn simple_expr(&mut self, e: &ast::Expr) -> Result<ExprRef> {
        let c = self.expr(e)?;
        self.simple(c)
    }

    fn opt_expr(&mut self, e: Option<&ast::Expr>) -> Result<Option<ExprRef>> {
        e.map(|x| self.simple_expr(x)).transpose()
    }

    /// Branches of a comma, conditional or switch: updating branches may only be mixed
    /// with other updating or vacuous ones.
    fn branches_meta(&self, meta: &mut ExprMeta, branches: &[&ExprRef]) -> Result<()> {
        let updating = branches.iter().any(|b| b.meta.is_updating);
        if updating {
            if let Some(bad) = branches
                .iter()
                .find(|b| !b.meta.is_updating && !is_vacuous(b))
            {
                return Err(Error::from_code(
                    ErrorCode::XUST0001,
                    "updating and non-updating expressions cannot be mixed",
                )
                .or_span(bad.meta.span));
            }
        }
        meta.is_updating = updating;
        Ok(())
    }

    fn expr(&mut self, e: &ast::Expr) -> Result<ExprRef> {
        use ast::ExprKind as K;
        let span = e.span;
        match &e.kind {
            K::Literal(lit) => {
                let value = match lit {
                    ast::Literal::Integer(i) => XdmAtomicValue::Integer(*i),
                    ast::Literal::Decimal(d) => XdmAtomicValue::Decimal(*d),
                    ast::Literal::Double(d) => XdmAtomicValue::Double(*d),
                    ast::Literal::String(s) => XdmAtomicValue::String(s.clone()),
                };
                let mut meta = meta_of(span, &[]);
                meta.static_type = one(value.kind());
                meta.sortedness = Sortedness::Sorted;
                Ok(node(ExprKind::Literal(value), meta))
            }
            K::EmptySequence => {
                let mut meta = meta_of(span, &[]);
                meta.static_type = Some(SequenceType::EmptySequence);
                meta.sortedness = Sortedness::Sorted;
                meta.peer = true;
                meta.subtree = true;
                Ok(node(ExprKind::Empty, meta))
            }
            K::Sequence(items) => {
                let parts = items.iter().map(|i| self.expr(i)).collect::<Result<Vec<_>>>()?;
                let refs: Vec<&ExprRef> = parts.iter().collect();
                let mut meta = meta_of(span, &refs);
                self.branches_meta(&mut meta, &refs)?;
                meta.static_type = sequence_type_of(&parts);
                Ok(node(ExprKind::Sequence(parts), meta))
            }
            K::VarRef(q) => self.var_ref(q, span),
            K::ContextItem => {
                let mut meta = meta_of(span, &[]);
                meta.focus.item = true;
                meta.sortedness = Sortedness::Sorted;
                meta.peer = true;
                meta.subtree = true;
                Ok(node(ExprKind::ContextItem, meta))
            }
            K::Placeholder => Err(static_error(
                ErrorCode::XPST0003,
                "'?' is only allowed as a function argument",
                span,
            )),
            K::FunctionCall { name, args } => self.function_call(name, args, span),
            K::NamedFunctionRef { name, arity } => self.function_ref(name, *arity, span),
            K::InlineFunction {
                params,
                return_type,
                body,
            } => self.inline_function(params, return_type.as_ref(), body, span),
            K::DynamicCall { function, args } => {
                let function = self.simple_expr(function)?;
                let args = self.arguments(args)?;
                let mut children: Vec<&ExprRef> = vec![&function];
                children.extend(args.iter().flatten());
                let meta = meta_of(span, &children);
                Ok(node(ExprKind::DynamicCall { function, args }, meta))
            }
            K::Filter { base, predicates } => {
                let base = self.simple_expr(base)?;
                let predicates = predicates
                    .iter()
                    .map(|p| self.simple_expr(p))
                    .collect::<Result<Vec<_>>>()?;
                let mut meta = meta_of(span, &[&base]);
                for p in &predicates {
                    meta.specificity = meta.specificity.add(p.meta.specificity);
                }
                meta.sortedness = if yields_document_order(&base) {
                    Sortedness::Sorted
                } else {
                    base.meta.sortedness
                };
                meta.peer = base.meta.peer;
                meta.subtree = base.meta.subtree;
                meta.static_type = base.meta.static_type.as_ref().and_then(|t| {
                    let item = t.item_type()?.clone();
                    let occ = if t.is_singleton_or_empty() {
                        Occurrence::ZeroOrOne
                    } else {
                        Occurrence::ZeroOrMore
                    };
                    Some(SequenceType::new(item, occ))
                });
                Ok(node(ExprKind::Filter { base, predicates }, meta))
            }
            K::Lookup { base, key } => {
                let base = self.simple_expr(base)?;
                let key = self.lookup_key(key)?;
                let mut meta = meta_of(span, &[&base]);
                if let LookupKey::Expr(k) = &key {
                    meta.focus = meta.focus.union(k.meta.focus);
                }
                Ok(node(
                    ExprKind::Lookup {
                        base: Some(base),
                        key,
                    },
                    meta,
                ))
            }
            K::UnaryLookup(key) => {
                let key = self.lookup_key(key)?;
                let mut meta = meta_of(span, &[]);
                meta.focus.item = true;
                if let LookupKey::Expr(k) = &key {
                    meta.focus = meta.focus.union(k.meta.focus);
                }
                Ok(node(ExprKind::Lookup { base: None, key }, meta))
            }
            K::Binary { left, op, right } => self.binary(left, *op, right, span),
            K::GeneralComparison { left, op, right } => {
                let (l, r) = (self.simple_expr(left)?, self.simple_expr(right)?);
                let mut meta = meta_of(span, &[&l, &r]);
                meta.static_type = one(Kind::Boolean);
                Ok(node(
                    ExprKind::GeneralCompare {
                        op: general_op(*op),
                        left: l,
                        right: r,
                    },
                    meta,
                ))
            }
            K::ValueComparison { left, op, right } => {
                let (l, r) = (self.simple_expr(left)?, self.simple_expr(right)?);
                let mut meta = meta_of(span, &[&l, &r]);
                let both_one = [&l, &r].iter().all(|x| {
                    x.meta.static_type.as_ref().is_some_and(SequenceType::is_exactly_one)
                });
                meta.static_type = Some(SequenceType::atomic(
                    Kind::Boolean,
                    if both_one {
                        Occurrence::ExactlyOne
                    } else {
                        Occurrence::ZeroOrOne
                    },
                ));
                Ok(node(
                    ExprKind::ValueCompare {
                        op: comp_op(*op),
                        left: l,
                        right: r,
                    },
                    meta,
                ))
            }
            K::NodeComparison { left, op, right } => {
                let (l, r) = (self.simple_expr(left)?, self.simple_expr(right)?);
                let mut meta = meta_of(span, &[&l, &r]);
                meta.static_type = Some(SequenceType::atomic(Kind::Boolean, Occurrence::ZeroOrOne));
                Ok(node(
                    ExprKind::NodeCompare {
                        op: *op,
                        left: l,
                        right: r,
                    },
                    meta,
                ))
            }
            K::Unary { sign, expr } => {
                let operand = self.simple_expr(expr)?;
                let mut meta = meta_of(span, &[&operand]);
                meta.static_type = operand
                    .meta
                    .static_type
                    .clone()
                    .filter(|t| matches!(t.item_type(), Some(ItemType::Atomic(k)) if k.is_numeric()));
                Ok(node(
                    ExprKind::Unary {
                        negate: *sign == ast::UnarySign::Minus,
                        operand,
                    },
                    meta,
                ))
            }
            K::SimpleMap { left, right } => {
                let left = self.simple_expr(left)?;
                let right = self.simple_expr(right)?;
                let mut meta = meta_of(span, &[&left]);
                meta.specificity = meta.specificity.add(right.meta.specificity);
                meta.static_type = right
                    .meta
                    .static_type
                    .as_ref()
                    .and_then(|t| t.item_type().cloned())
                    .map(|i| SequenceType::new(i, Occurrence::ZeroOrMore));
                Ok(node(ExprKind::SimpleMap { left, right }, meta))
            }
            K::Range { start, end } => {
                let (l, r) = (self.simple_expr(start)?, self.simple_expr(end)?);
                let mut meta = meta_of(span, &[&l, &r]);
                meta.static_type = Some(SequenceType::atomic(Kind::Integer, Occurrence::ZeroOrMore));
                Ok(node(ExprKind::Range(l, r), meta))
            }
            K::SetOp { left, op, right } => {
                let (l, r) = (self.simple_expr(left)?, self.simple_expr(right)?);
                let mut meta = meta_of(span, &[&l, &r]);
                if *op == ast::SetOp::Union {
                    meta.specificity = l.meta.specificity.max(r.meta.specificity);
                }
                meta.sortedness = Sortedness::Sorted;
                meta.subtree = l.meta.subtree && r.meta.subtree;
                meta.static_type = nodes_of(ItemType::node());
                Ok(node(
                    ExprKind::SetOp {
                        op: *op,
                        left: l,
                        right: r,
                    },
                    meta,
                ))
            }
            K::InstanceOf { expr, ty } => {
                let operand = self.simple_expr(expr)?;
                let ty = self.ns.sequence_type(ty, span)?;
                let mut meta = meta_of(span, &[&operand]);
                meta.static_type = one(Kind::Boolean);
                Ok(node(ExprKind::InstanceOf { operand, ty }, meta))
            }
            K::TreatAs { expr, ty } => {
                let operand = self.simple_expr(expr)?;
                let ty = self.ns.sequence_type(ty, span)?;
                let mut meta = meta_of(span, &[&operand]);
                meta.sortedness = operand.meta.sortedness;
                meta.static_type = Some(ty.clone());
                Ok(node(ExprKind::Treat { operand, ty }, meta))
            }
            K::CastAs { expr, ty } | K::CastableAs { expr, ty } => {
                let operand = self.simple_expr(expr)?;
                let target = self.ns.cast_target(&ty.atomic, span)?;
                let mut meta = meta_of(span, &[&operand]);
                let kind = if matches!(e.kind, K::CastAs { .. }) {
                    meta.static_type = Some(SequenceType::atomic(
                        target,
                        if ty.optional {
                            Occurrence::ZeroOrOne
                        } else {
                            Occurrence::ExactlyOne
                        },
                    ));
                    ExprKind::Cast {
                        operand,
                        target,
                        optional: ty.optional,
                    }
                } else {
                    meta.static_type = one(Kind::Boolean);
                    ExprKind::Castable {
                        operand,
                        target,
                        optional: ty.optional,
                    }
                };
                Ok(node(kind, meta))
            }
            K::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = self.simple_expr(cond)?;
                let then = self.expr(then_expr)?;
                let otherwise = self.expr(else_expr)?;
                let mut meta = meta_of(span, &[&cond, &then, &otherwise]);
                self.branches_meta(&mut meta, &[&then, &otherwise])?;
                if then.meta.static_type == otherwise.meta.static_type {
                    meta.static_type = then.meta.static_type.clone();
                }
                Ok(node(
                    ExprKind::If {
                        cond,
                        then,
                        otherwise,
                    },
                    meta,
                ))
            }
            K::Switch {
                operand,
                cases,
                default,
            } => {
                let operand = self.simple_expr(operand)?;
                let mut out = Vec::with_capacity(cases.len());
                for case in cases {
                    let values = case
                        .values
                        .iter()
                        .map(|v| self.simple_expr(v))
                        .collect::<Result<Vec<_>>>()?;
                    out.push((values, self.expr(&case.result)?));
                }
                let default = self.expr(default)?;
                let mut branches: Vec<&ExprRef> = out.iter().map(|(_, r)| r).collect();
                branches.push(&default);
                let mut meta = meta_of(span, &branches);
                meta.focus = meta.focus.union(operand.meta.focus);
                self.branches_meta(&mut meta, &branches)?;
                Ok(node(
                    ExprKind::Switch {
                        operand,
                        cases: out,
                        default,
                    },
                    meta,
                ))
            }
            K::Typeswitch {
                operand,
                cases,
                default_var,
                default,
            } => self.typeswitch(operand, cases, default_var.as_ref(), default, span),
            K::Quantified {
                kind,
                bindings,
                satisfies,
            } => {
                self.scopes.push_scope();
                let result = self.quantified(*kind, bindings, satisfies, span);
                self.scopes.pop_scope();
                result
            }
            K::Flwor {
                clauses,
                return_expr,
            } => {
                self.scopes.push_scope();
                let result = self.flwor(clauses, return_expr, span);
                self.scopes.pop_scope();
                result
            }
            K::TryCatch { body, catches } => self.try_catch(body, catches, span),
            K::Root => {
                let mut meta = meta_of(span, &[]);
                meta.focus.item = true;
                meta.sortedness = Sortedness::Sorted;
                meta.peer = true;
                meta.static_type = Some(SequenceType::one(ItemType::Kind(KindTest::Document(None))));
                Ok(node(ExprKind::Root, meta))
            }
            K::Path(p) => self.path(p, span),
            K::AxisStep(step) => {
                if step.axis == ast::Axis::Namespace {
                    return Err(Error::not_implemented("namespace axis").with_span(span));
                }
                let test = self
                    .ns
                    .node_test(&step.test, step.axis == ast::Axis::Attribute, span)?;
                let predicates = step
                    .predicates
                    .iter()
                    .map(|p| self.simple_expr(p))
                    .collect::<Result<Vec<_>>>()?;
                Ok(make_step(step.axis, test, predicates, span))
            }
            K::MapConstructor(entries) => {
                let mut out = Vec::with_capacity(entries.len());
                for (k, v) in entries {
                    out.push((self.simple_expr(k)?, self.simple_expr(v)?));
                }
                let refs: Vec<&ExprRef> = out.iter().flat_map(|(k, v)| [k, v]).collect();
                let mut meta = meta_of(span, &refs);
                meta.static_type = Some(SequenceType::one(ItemType::AnyMap));
                Ok(node(ExprKind::Map(out), meta))
            }
            K::SquareArray(members) => {
                let members = members
                    .iter()
                    .map(|m| self.simple_expr(m))
                    .collect::<Result<Vec<_>>>()?;
                let refs: Vec<&ExprRef> = members.iter().collect();
                let mut meta = meta_of(span, &refs);
                meta.static_type = Some(SequenceType::one(ItemType::AnyArray));
                Ok(node(ExprKind::SquareArray(members), meta))
            }
            K::CurlyArray(content) => {
                let content = self.opt_expr(content.as_deref())?;
                let refs: Vec<&ExprRef> = content.iter().collect();
                let mut meta = meta_of(span, &refs);
                meta.static_type = Some(SequenceType::one(ItemType::AnyArray));
                Ok(node(ExprKind::CurlyArray(content), meta))
            }
            K::DirElement(el) => self.dir_element(el, span),
            K::DirComment(text) => Ok(self.constructor(
                ExprKind::CommentCtor(vec![Content::Text(text.clone())]),
                KindTest::Comment,
                &[],
                span,
            )),
            K::DirPi { target, data } => Ok(self.constructor(
                ExprKind::PiCtor {
                    target: CtorName::Static(QName::local(target.clone())),
                    content: vec![Content::Text(data.clone())],
                },
                KindTest::ProcessingInstruction(None),
                &[],
                span,
            )),
            K::CompDocument(content) => {
                let content = self.opt_expr(content.as_deref())?;
                let children: Vec<ExprRef> = content.iter().cloned().collect();
                Ok(self.constructor(
                    ExprKind::DocumentCtor(content),
                    KindTest::Document(None),
                    &children,
                    span,
                ))
            }
            K::CompElement { name, content } => {
                let name = self.ctor_name(name, true, span)?;
                let content = self.opt_expr(content.as_deref())?;
                let mut children: Vec<ExprRef> = content.iter().cloned().collect();
                if let CtorName::Computed(n) = &name {
                    children.push(n.clone());
                }
                Ok(self.constructor(
                    ExprKind::ElementCtor {
                        name,
                        content: content.into_iter().map(Content::Expr).collect(),
                    },
                    KindTest::Element(None),
                    &children,
                    span,
                ))
            }
            K::CompAttribute { name, content } => {
                let name = self.ctor_name(name, false, span)?;
                let content = self.opt_expr(content.as_deref())?;
                let mut children: Vec<ExprRef> = content.iter().cloned().collect();
                if let CtorName::Computed(n) = &name {
                    children.push(n.clone());
                }
                Ok(self.constructor(
                    ExprKind::AttributeCtor {
                        name,
                        value: content.into_iter().map(Content::Expr).collect(),
                    },
                    KindTest::Attribute(None),
                    &children,
                    span,
                ))
            }
            K::CompText(content) => {
                let content = self.opt_expr(content.as_deref())?;
                let children: Vec<ExprRef> = content.iter().cloned().collect();
                Ok(self.constructor(ExprKind::TextCtor(content), KindTest::Text, &children, span))
            }
            K::CompComment(content) => {
                let content = self.opt_expr(content.as_deref())?;
                let children: Vec<ExprRef> = content.iter().cloned().collect();
                Ok(self.constructor(
                    ExprKind::CommentCtor(content.into_iter().map(Content::Expr).collect()),
                    KindTest::Comment,
                    &children,
                    span,
                ))
            }
            K::CompPi { target, content } => {
                let target = match target {
                    ast::ConstructorName::Literal(q) => CtorName::Static(QName::local(q.local.clone())),
                    ast::ConstructorName::Computed(e) => CtorName::Computed(self.simple_expr(e)?),
                };
                let content = self.opt_expr(content.as_deref())?;
                let mut children: Vec<ExprRef> = content.iter().cloned().collect();
                if let CtorName::Computed(n) = &target {
                    children.push(n.clone());
                }
                Ok(self.constructor(
                    ExprKind::PiCtor {
                        target,
                        content: content.into_iter().map(Content::Expr).collect(),
                    },
                    KindTest::ProcessingInstruction(None),
                    &children,
                    span,
                ))
            }
            K::Insert {
                source,
                position,
                target,
            } => {
                let (source, target) = (self.simple_expr(source)?, self.simple_expr(target)?);
                Ok(self.updating(
                    ExprKind::Insert {
                        source: source.clone(),
                        position: *position,
                        target: target.clone(),
                    },
                    &[&source, &target],
                    span,
                ))
            }
            K::Delete(target) => {
                let target = self.simple_expr(target)?;
                Ok(self.updating(ExprKind::Delete(target.clone()), &[&target], span))
            }
            K::ReplaceNode {
                target,
                replacement,
            } => {
                let (target, replacement) = (self.simple_expr(target)?, self.simple_expr(replacement)?);
                Ok(self.updating(
                    ExprKind::ReplaceNode {
                        target: target.clone(),
                        replacement: replacement.clone(),
                    },
                    &[&target, &replacement],
                    span,
                ))
            }
            K::ReplaceValue { target, value } => {
                let (target, value) = (self.simple_expr(target)?, self.simple_expr(value)?);
                Ok(self.updating(
                    ExprKind::ReplaceValue {
                        target: target.clone(),
                        value: value.clone(),
                    },
                    &[&target, &value],
                    span,
                ))
            }
            K::Rename { target, name } => {
                let (target, name) = (self.simple_expr(target)?, self.simple_expr(name)?);
                Ok(self.updating(
                    ExprKind::Rename {
                        target: target.clone(),
                        name: name.clone(),
                    },
                    &[&target, &name],
                    span,
                ))
            }
            K::Transform {
                bindings,
                modify,
                return_expr,
            } => {
                self.scopes.push_scope();
                let result = self.transform(bindings, modify, return_expr, span);
                self.scopes.pop_scope();
                result
            }
        }
    }

    fn var_ref(&mut self, q: &ast::QName, span: Span) -> Result<ExprRef> {
        let name = self.ns.plain_name(q, span)?;
        let kind = if let Some(id) = self.scopes.lookup(&name) {
            ExprKind::Local(id)
        } else if let Some(&gi) = self.global_index.get(&name) {
            ExprKind::Global(gi)
        } else if self.ctx.in_scope_variables.contains(&name) {
            let gi = self.add_global(
                name.clone(),
                Some(GlobalVar {
                    name,
                    ty: None,
                    external: true,
                    init: None,
                    frame_size: 0,
                }),
            );
            ExprKind::Global(gi)
        } else {
            return Err(static_error(
                ErrorCode::XPST0008,
                format!("variable ${q} is not declared"),
                span,
            ));
        };
        let mut meta = meta_of(span, &[]);
        if let ExprKind::Global(gi) = &kind {
            meta.static_type = self.globals[*gi].as_ref().and_then(|g| g.ty.clone());
        }
        Ok(node(kind, meta))
    }

    fn binary(&mut self, left: &ast::Expr, op: ast::BinaryOp, right: &ast::Expr, span: Span) -> Result<ExprRef> {
        let (l, r) = (self.simple_expr(left)?, self.simple_expr(right)?);
        let mut meta = meta_of(span, &[&l, &r]);
        let arith = |op: ArithOp| Some(op);
        let kind = match op {
            ast::BinaryOp::And => {
                meta.static_type = one(Kind::Boolean);
                ExprKind::And(l, r)
            }
            ast::BinaryOp::Or => {
                meta.static_type = one(Kind::Boolean);
                meta.specificity = l.meta.specificity.max(r.meta.specificity);
                ExprKind::Or(l, r)
            }
            ast::BinaryOp::Concat => {
                meta.static_type = one(Kind::String);
                ExprKind::Concat(l, r)
            }
            other => {
                let op = match other {
                    ast::BinaryOp::Add => arith(ArithOp::Add),
                    ast::BinaryOp::Sub => arith(ArithOp::Sub),
                    ast::BinaryOp::Mul => arith(ArithOp::Mul),
                    ast::BinaryOp::Div => arith(ArithOp::Div),
                    ast::BinaryOp::IDiv => arith(ArithOp::IDiv),
                    ast::BinaryOp::Mod => arith(ArithOp::Mod),
                    _ => None,
                }
                .ok_or_else(|| static_error(ErrorCode::XPST0003, "unknown operator", span))?;
                meta.static_type = arithmetic_type(op, l.meta.static_type.as_ref(), r.meta.static_type.as_ref());
                ExprKind::Arithmetic { op, left: l, right: r }
            }
        };
        Ok(node(kind, meta))
    }

    fn arguments(&mut self, args: &[ast::Expr]) -> Result<Vec<Option<ExprRef>>> {
        args.iter()
            .map(|a| match a.kind {
                ast::ExprKind::Placeholder => Ok(None),
                _ => self.simple_expr(a).map(Some),
            })
            .collect()
    }

    fn resolve_function(&self, name: &ExpandedName, arity: usize, span: Span) -> Result<(CallTarget, bool, Option<SequenceType>, bool)> {
        if let Some(&i) = self.fn_index.get(&(name.clone(), arity)) {
            let d = &self.fn_decls[i];
            return Ok((CallTarget::User(i), d.updating, d.return_type.clone(), false));
        }
        match self.ctx.functions.resolve(name, arity) {
            Ok(sig) => Ok((CallTarget::Builtin, sig.updating, Some(sig.return_type.clone()), sig.uses_focus)),
            Err(e) => Err(e.into_error().with_span(span)),
        }
    }

    fn function_call(&mut self, q: &ast::QName, args: &[ast::Expr], span: Span) -> Result<ExprRef> {
        let name = self.ns.function_name(q, span)?;
        let arity = args.len();
        let in_fn = name.ns_uri.as_deref() == Some(FNS);

        // constructor functions
        if name.ns_uri.as_deref() == Some(XS)
            && arity == 1
            && !matches!(args[0].kind, ast::ExprKind::Placeholder)
        {
            let target = Kind::from_xs_local(&name.local)
                .filter(|k| !k.is_abstract())
                .ok_or_else(|| static_error(ErrorCode::XPST0017, format!("unknown function {q}#1"), span))?;
            let operand = self.simple_expr(&args[0])?;
            let mut meta = meta_of(span, &[&operand]);
            meta.static_type = Some(SequenceType::atomic(target, Occurrence::ZeroOrOne));
            return Ok(node(
                ExprKind::Cast {
                    operand,
                    target,
                    optional: true,
                },
                meta,
            ));
        }
        if in_fn && arity == 0 && (name.local == "position" || name.local == "last") {
            let mut meta = meta_of(span, &[]);
            meta.static_type = one(Kind::Integer);
            return Ok(if name.local == "position" {
                meta.focus.position = true;
                node(ExprKind::Position, meta)
            } else {
                meta.focus.last = true;
                node(ExprKind::Last, meta)
            });
        }
        if in_fn && arity == 2 && name.local == "put" {
            if !self.ctx.language.allows_updates() {
                return Err(static_error(ErrorCode::XPST0017, "fn:put requires the Update Facility", span));
            }
            let (n, u) = (self.simple_expr(&args[0])?, self.simple_expr(&args[1])?);
            return Ok(self.updating(
                ExprKind::Put {
                    node: n.clone(),
                    uri: u.clone(),
                },
                &[&n, &u],
                span,
            ));
        }

        let (target, updating, return_type, uses_focus) = self.resolve_function(&name, arity, span)?;
        let args = self.arguments(args)?;
        let refs: Vec<&ExprRef> = args.iter().flatten().collect();
        let mut meta = meta_of(span, &refs);
        let builtin_ns = [FNS, MATH_NS, MAP_NS, ARRAY_NS]
            .contains(&name.ns_uri.as_deref().unwrap_or_default());
        if target == CallTarget::Builtin && !builtin_ns {
            meta.specificity.external += 1;
        }
        if args.iter().any(Option::is_none) {
            meta.static_type = Some(SequenceType::one(ItemType::AnyFunction));
            return Ok(node(
                ExprKind::Partial {
                    target,
                    name,
                    arity,
                    args,
                },
                meta,
            ));
        }
        meta.focus.item |= uses_focus;
        meta.is_updating = updating;
        meta.static_type = return_type;
        let args = args.into_iter().flatten().collect();
        Ok(node(ExprKind::Call { target, name, args }, meta))
    }

    fn function_ref(&mut self, q: &ast::QName, arity: usize, span: Span) -> Result<ExprRef> {
        let name = self.ns.function_name(q, span)?;
        let (target, updating, _, _) = self.resolve_function(&name, arity, span)?;
        if updating {
            return Err(static_error(
                ErrorCode::XUST0001,
                format!("updating function {q} cannot be referenced"),
                span,
            ));
        }
        let mut meta = meta_of(span, &[]);
        meta.static_type = Some(SequenceType::one(ItemType::AnyFunction));
        Ok(node(ExprKind::FunctionRef { target, name, arity }, meta))
    }

    fn inline_function(
        &mut self,
        params: &[ast::Param],
        return_type: Option<&ast::SequenceType>,
        body: &ast::Expr,
        span: Span,
    ) -> Result<ExprRef> {
        let return_type = return_type.map(|t| self.ns.sequence_type(t, span)).transpose()?;
        self.scopes.push_frame(true);
        let compiled = self.inline_body(params, body, span);
        let info = self.scopes.pop_frame();
        let (params, body) = compiled?;
        let func = InlineFunction {
            params,
            return_type,
            body,
            frame_size: info.size,
            captures: info.captures,
        };
        let mut meta = meta_of(span, &[]);
        meta.static_type = Some(SequenceType::one(ItemType::AnyFunction));
        Ok(node(ExprKind::Inline(Arc::new(func)), meta))
    }

    fn inline_body(&mut self, params: &[ast::Param], body: &ast::Expr, span: Span) -> Result<(Vec<Param>, ExprRef)> {
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(params.len());
        for p in params {
            let name = self.ns.plain_name(&p.name, span)?;
            if !seen.insert(name.clone()) {
                return Err(static_error(
                    ErrorCode::XQST0039,
                    format!("duplicate parameter ${}", p.name),
                    span,
                ));
            }
            let ty = p.ty.as_ref().map(|t| self.ns.sequence_type(t, span)).transpose()?;
            out.push(Param {
                var: self.scopes.bind(name),
                ty,
            });
        }
        let body = self.simple_expr(body)?;
        Ok((out, body))
    }

    fn lookup_key(&mut self, key: &ast::KeySpecifier) -> Result<LookupKey> {
        Ok(match key {
            ast::KeySpecifier::Name(n) => LookupKey::Name(n.clone()),
            ast::KeySpecifier::Integer(i) => LookupKey::Integer(*i),
            ast::KeySpecifier::Wildcard => LookupKey::Wildcard,
            ast::KeySpecifier::Expr(e) => LookupKey::Expr(self.simple_expr(e)?),
        })
    }

    fn typeswitch(
        &mut self,
        operand: &ast::Expr,
        cases: &[ast::TypeswitchCase],
        default_var: Option<&ast::QName>,
        default: &ast::Expr,
        span: Span,
    ) -> Result<ExprRef> {
        let operand = self.simple_expr(operand)?;
        let mut out = Vec::with_capacity(cases.len());
        for case in cases {
            let types = case
                .types
                .iter()
                .map(|t| self.ns.sequence_type(t, span))
                .collect::<Result<Vec<_>>>()?;
            self.scopes.push_scope();
            let var = match &case.var {
                Some(v) => Some(self.scopes.bind(self.ns.plain_name(v, span)?)),
                None => None,
            };
            let result = self.expr(&case.result);
            self.scopes.pop_scope();
            out.push(TypeswitchCase {
                var,
                types,
                result: result?,
            });
        }
        self.scopes.push_scope();
        let default_slot = match default_var {
            Some(v) => Some(self.scopes.bind(self.ns.plain_name(v, span)?)),
            None => None,
        };
        let default = self.expr(default);
        self.scopes.pop_scope();
        let default = default?;
        let mut branches: Vec<&ExprRef> = out.iter().map(|c| &c.result).collect();
        branches.push(&default);
        let mut meta = meta_of(span, &branches);
        meta.focus = meta.focus.union(operand.meta.focus);
        self.branches_meta(&mut meta, &branches)?;
        Ok(node(
            ExprKind::Typeswitch {
                operand,
                cases: out,
                default_var: default_slot,
                default,
            },
            meta,
        ))
    }

    fn quantified(
        &mut self,
        kind: ast::Quantifier,
        bindings: &[ast::QuantifiedBinding],
        satisfies: &ast::Expr,
        span: Span,
    ) -> Result<ExprRef> {
        let mut out = Vec::with_capacity(bindings.len());
        for b in bindings {
            let source = self.simple_expr(&b.in_expr)?;
            let ty = b.ty.as_ref().map(|t| self.ns.sequence_type(t, span)).transpose()?;
            let var = self.scopes.bind(self.ns.plain_name(&b.var, span)?);
            out.push(Binding { var, ty, source });
        }
        let satisfies = self.simple_expr(satisfies)?;
        let mut children: Vec<&ExprRef> = out.iter().map(|b| &b.source).collect();
        children.push(&satisfies);
        let mut meta = meta_of(span, &children);
        meta.static_type = one(Kind::Boolean);
        Ok(node(
            ExprKind::Quantified {
                every: kind == ast::Quantifier::Every,
                bindings: out,
                satisfies,
            },
            meta,
        ))
    }

    fn flwor(&mut self, clauses: &[ast::Clause], return_expr: &ast::Expr, span: Span) -> Result<ExprRef> {
        let mut out = Vec::with_capacity(clauses.len());
        let mut bound: Vec<(ExpandedName, VarId)> = Vec::new();
        let mut children: Vec<ExprRef> = Vec::new();
        for clause in clauses {
            match clause {
                ast::Clause::For(b) => {
                    let source = self.simple_expr(&b.in_expr)?;
                    let ty = b.ty.as_ref().map(|t| self.ns.sequence_type(t, span)).transpose()?;
                    let name = self.ns.plain_name(&b.var, span)?;
                    let var = self.scopes.bind(name.clone());
                    bound.push((name, var));
                    let position = match &b.position {
                        Some(p) => {
                            let pname = self.ns.plain_name(p, span)?;
                            let slot = self.scopes.bind(pname.clone());
                            bound.push((pname, slot));
                            Some(slot)
                        }
                        None => None,
                    };
                    children.push(source.clone());
                    out.push(Clause::For {
                        var,
                        position,
                        ty,
                        allowing_empty: b.allowing_empty,
                        source,
                    });
                }
                ast::Clause::Let(b) => {
                    let value = self.simple_expr(&b.value)?;
                    let ty = b.ty.as_ref().map(|t| self.ns.sequence_type(t, span)).transpose()?;
                    let name = self.ns.plain_name(&b.var, span)?;
                    let var = self.scopes.bind(name.clone());
                    bound.push((name, var));
                    children.push(value.clone());
                    out.push(Clause::Let { var, ty, value });
                }
                ast::Clause::Where(cond) => {
                    let cond = self.simple_expr(cond)?;
                    children.push(cond.clone());
                    out.push(Clause::Where(cond));
                }
                ast::Clause::Count(v) => {
                    let name = self.ns.plain_name(v, span)?;
                    let var = self.scopes.bind(name.clone());
                    bound.push((name, var));
                    out.push(Clause::Count(var));
                }
                ast::Clause::GroupBy(specs) => {
                    let mut keys = Vec::with_capacity(specs.len());
                    for spec in specs {
                        let name = self.ns.plain_name(&spec.var, span)?;
                        let var = match &spec.value {
                            Some(v) => {
                                let value = self.simple_expr(v)?;
                                let ty = spec
                                    .ty
                                    .as_ref()
                                    .map(|t| self.ns.sequence_type(t, span))
                                    .transpose()?;
                                let var = self.scopes.bind(name.clone());
                                bound.push((name, var));
                                children.push(value.clone());
                                out.push(Clause::Let { var, ty, value });
                                var
                            }
                            None => bound
                                .iter()
                                .rev()
                                .find(|(n, _)| *n == name)
                                .map(|(_, v)| *v)
                                .ok_or_else(|| {
                                    static_error(
                                        ErrorCode::XQST0094,
                                        format!("grouping variable ${} is not bound by this FLWOR expression", spec.var),
                                        span,
                                    )
                                })?,
                        };
                        keys.push(GroupKey {
                            var,
                            collation: spec.collation.clone(),
                        });
                    }
                    let others = bound
                        .iter()
                        .map(|(_, v)| *v)
                        .filter(|v| !keys.iter().any(|k| k.var == *v))
                        .collect();
                    out.push(Clause::GroupBy { keys, others });
                }
                ast::Clause::OrderBy { stable, specs } => {
                    let mut compiled = Vec::with_capacity(specs.len());
                    for s in specs {
                        let key = self.simple_expr(&s.expr)?;
                        children.push(key.clone());
                        compiled.push(OrderSpec {
                            key,
                            descending: s.descending,
                            empty_greatest: s.empty_greatest.unwrap_or(self.empty_greatest),
                            collation: s.collation.clone(),
                        });
                    }
                    out.push(Clause::OrderBy {
                        stable: *stable,
                        specs: compiled,
                    });
                }
            }
        }
        let ret = self.expr(return_expr)?;
        let mut refs: Vec<&ExprRef> = children.iter().collect();
        refs.push(&ret);
        let mut meta = meta_of(span, &refs);
        meta.is_updating = ret.meta.is_updating;
        meta.static_type = ret
            .meta
            .static_type
            .as_ref()
            .and_then(|t| t.item_type().cloned())
            .map(|i| SequenceType::new(i, Occurrence::ZeroOrMore));
        Ok(node(ExprKind::Flwor { clauses: out, ret }, meta))
    }

    fn try_catch(&mut self, body: &ast::Expr, catches: &[ast::CatchClause], span: Span) -> Result<ExprRef> {
        let body = self.expr(body)?;
        self.scopes.push_scope();
        let result = self.catch_clauses(catches, span);
        self.scopes.pop_scope();
        let (err, catches) = result?;
        let mut branches: Vec<&ExprRef> = catches.iter().map(|c| &c.body).collect();
        branches.push(&body);
        let mut meta = meta_of(span, &branches);
        self.branches_meta(&mut meta, &branches)?;
        Ok(node(ExprKind::Try { body, catches, err }, meta))
    }

    fn catch_clauses(&mut self, catches: &[ast::CatchClause], span: Span) -> Result<(ErrVars, Vec<Catch>)> {
        let mut bind = |local: &str| self.scopes.bind(ExpandedName::ns(ERR_NS, local));
        let err = ErrVars {
            code: bind("code"),
            description: bind("description"),
            value: bind("value"),
            module: bind("module"),
            line_number: bind("line-number"),
            column_number: bind("column-number"),
        };
        let mut out = Vec::with_capacity(catches.len());
        for c in catches {
            let tests = c
                .tests
                .iter()
                .map(|t| self.ns.catch_test(t, span))
                .collect::<Result<Vec<_>>>()?;
            out.push(Catch {
                tests,
                body: self.expr(&c.body)?,
            });
        }
        Ok((err, out))
    }

    fn path(&mut self, p: &ast::PathExpr, span: Span) -> Result<ExprRef> {
        let mut steps = Vec::with_capacity(p.steps.len() + 2);
        if p.start == ast::PathStart::RootDescendant {
            steps.push(make_step(
                ast::Axis::DescendantOrSelf,
                NodeTest::Kind(KindTest::AnyKind),
                Vec::new(),
                span,
            ));
        }
        for s in &p.steps {
            steps.push(self.simple_expr(s)?);
        }
        // `//x` → `descendant::x` when no predicate depends on position
        let mut rewritten: Vec<ExprRef> = Vec::with_capacity(steps.len());
        let mut i = 0;
        while i < steps.len() {
            if i + 1 < steps.len()
                && is_dos_node(&steps[i])
                && let Some(desc) = as_descendant(&steps[i + 1])
            {
                rewritten.push(desc);
                i += 2;
                continue;
            }
            rewritten.push(steps[i].clone());
            i += 1;
        }

        let mut acc = match p.start {
            ast::PathStart::Relative => None,
            _ => Some(self.expr(&ast::Expr::new(ast::ExprKind::Root, span))?),
        };
        for step in rewritten {
            acc = Some(match acc {
                None => step,
                Some(left) => path_node(left, step, span),
            });
        }
        acc.ok_or_else(|| static_error(ErrorCode::XPST0003, "empty path expression", span))
    }

    fn ctor_name(&mut self, name: &ast::ConstructorName, element: bool, span: Span) -> Result<CtorName> {
        Ok(match name {
            ast::ConstructorName::Literal(q) => CtorName::Static(self.ns.constructor_name(q, element, span)?),
            ast::ConstructorName::Computed(e) => CtorName::Computed(self.simple_expr(e)?),
        })
    }

    fn constructor(&self, kind: ExprKind, test: KindTest, children: &[ExprRef], span: Span) -> ExprRef {
        let refs: Vec<&ExprRef> = children.iter().collect();
        let mut meta = meta_of(span, &refs);
        meta.static_type = Some(SequenceType::one(ItemType::Kind(test)));
        meta.sortedness = Sortedness::Sorted;
        meta.peer = true;
        node(kind, meta)
    }

    fn updating(&self, kind: ExprKind, children: &[&ExprRef], span: Span) -> ExprRef {
        let mut meta = meta_of(span, children);
        meta.is_updating = true;
        meta.static_type = Some(SequenceType::EmptySequence);
        node(kind, meta)
    }

    fn dir_element(&mut self, el: &ast::DirElement, span: Span) -> Result<ExprRef> {
        self.ns.push_overlay(el.namespaces.clone());
        let result = self.dir_element_inner(el, span);
        self.ns.pop_overlay();
        result
    }

    fn dir_element_inner(&mut self, el: &ast::DirElement, span: Span) -> Result<ExprRef> {
        let name = self.ns.constructor_name(&el.name, true, span)?;
        let mut content = Vec::with_capacity(el.attributes.len() + el.content.len());
        let mut children = Vec::new();
        for a in &el.attributes {
            let attr_name = self.ns.constructor_name(&a.name, false, a.span)?;
            let mut value = Vec::with_capacity(a.value.len());
            for part in &a.value {
                value.push(match part {
                    ast::AttrValuePart::Text(t) => Content::Text(t.clone()),
                    ast::AttrValuePart::Enclosed(e) => {
                        let c = self.simple_expr(e)?;
                        children.push(c.clone());
                        Content::Expr(c)
                    }
                });
            }
            let refs: Vec<ExprRef> = value
                .iter()
                .filter_map(|v| match v {
                    Content::Expr(e) => Some(e.clone()),
                    Content::Text(_) => None,
                })
                .collect();
            let attr = self.constructor(
                ExprKind::AttributeCtor {
                    name: CtorName::Static(attr_name),
                    value,
                },
                KindTest::Attribute(None),
                &refs,
                a.span,
            );
            content.push(Content::Expr(attr));
        }
        for part in &el.content {
            content.push(match part {
                ast::DirContent::Text(t) => Content::Text(t.clone()),
                ast::DirContent::Enclosed(e) | ast::DirContent::Node(e) => {
                    let c = self.simple_expr(e)?;
                    children.push(c.clone());
                    Content::Expr(c)
                }
            });
        }
        Ok(self.constructor(
            ExprKind::ElementCtor {
                name: CtorName::Static(name),
                content,
            },
            KindTest::Element(None),
            &children,
            span,
        ))
    }

    fn transform(
        &mut self,
        bindings: &[(ast::QName, ast::Expr)],
        modify: &ast::Expr,
        return_expr: &ast::Expr,
        span: Span,
    ) -> Result<ExprRef> {
        let mut copies = Vec::with_capacity(bindings.len());
        for (name, source) in bindings {
            let source = self.simple_expr(source)?;
            let var = self.scopes.bind(self.ns.plain_name(name, span)?);
            copies.push((var, source));
        }
        let modify = self.expr(modify)?;
        if !modify.meta.is_updating && !is_vacuous(&modify) {
            return Err(Error::from_code(
                ErrorCode::XUST0002,
                "the modify clause must be an updating expression",
            )
            .or_span(modify.meta.span));
        }
        let ret = self.simple_expr(return_expr)?;
        let mut refs: Vec<&ExprRef> = copies.iter().map(|(_, s)| s).collect();
        refs.push(&ret);
        let mut meta = meta_of(span, &refs);
        meta.static_type = ret.meta.static_type.clone();
        Ok(node(ExprKind::Transform { copies, modify, ret }, meta))
    }
}

fn sequence_type_of(parts: &[ExprRef]) -> Option<SequenceType> {
    let mut item: Option<ItemType> = None;
    let mut occurrence: Option<Occurrence> = None;
    for p in parts {
        match p.meta.static_type.as_ref()? {
            SequenceType::EmptySequence => {}
            SequenceType::Of { item: i, occurrence: o } => {
                match &item {
                    None => item = Some(i.clone()),
                    Some(prev) if prev == i => {}
                    Some(_) => item = Some(ItemType::AnyItem),
                }
                occurrence = Some(match occurrence {
                    None => *o,
                    Some(prev) => prev.concat(*o),
                });
            }
        }
    }
    match (item, occurrence) {
        (Some(item), Some(occurrence)) => Some(SequenceType::new(item, occurrence)),
        _ => Some(SequenceType::EmptySequence),
    }
}

fn path_node(left: ExprRef, right: ExprRef, span: Span) -> ExprRef {
    let right_nodes = right.meta.static_type.as_ref().is_some_and(SequenceType::is_nodes);
    let right_atomic = right
        .meta
        .static_type
        .as_ref()
        .and_then(SequenceType::item_type)
        .is_some_and(|i| !matches!(i, ItemType::AnyItem) && !i.kind().is_node());
    let mode = if right_atomic {
        PathMode::Items
    } else if right_nodes
        && yields_document_order(&left)
        && left.meta.peer
        && matches!(right.kind, ExprKind::Step(_))
        && right.meta.sortedness == Sortedness::Sorted
        && right.meta.subtree
    {
        PathMode::Concat
    } else {
        PathMode::Merge
    };
    let mut meta = meta_of(span, &[&left]);
    meta.specificity = meta.specificity.add(right.meta.specificity);
    meta.sortedness = if mode == PathMode::Items {
        Sortedness::Unsorted
    } else {
        Sortedness::Sorted
    };
    meta.subtree = left.meta.subtree && right.meta.subtree;
    meta.peer = left.meta.peer && right.meta.peer;
    meta.static_type = right
        .meta
        .static_type
        .as_ref()
        .and_then(|t| t.item_type().cloned())
        .map(|i| SequenceType::new(i, Occurrence::ZeroOrMore));
    node(ExprKind::Path { left, right, mode }, meta)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compiled(q: &str) -> CompiledQuery {
        compile(q, &StaticContext::default()).unwrap()
    }

    #[test]
    fn double_slash_becomes_descendant_step() {
        let q = compiled("//item");
        let Some(ExprKind::Path { right, .. }) = q.expr().map(|e| &e.kind) else {
            panic!("expected a path");
        };
        let ExprKind::Step(step) = &right.kind else {
            panic!("expected a step");
        };
        assert_eq!(step.axis, ast::Axis::Descendant);
    }

    #[test]
    fn positional_predicates_block_the_rewrite() {
        let q = compiled("//item[1]");
        let Some(ExprKind::Path { right, .. }) = q.expr().map(|e| &e.kind) else {
            panic!("expected a path");
        };
        let ExprKind::Step(step) = &right.kind else {
            panic!("expected a step");
        };
        assert_eq!(step.axis, ast::Axis::Child);
    }

    #[test]
    fn child_paths_stream() {
        let q = compiled("a/b");
        let Some(ExprKind::Path { mode, .. }) = q.expr().map(|e| &e.kind) else {
            panic!("expected a path");
        };
        assert_eq!(*mode, PathMode::Concat);
        let q = compiled("a/ancestor::b");
        let Some(ExprKind::Path { mode, .. }) = q.expr().map(|e| &e.kind) else {
            panic!("expected a path");
        };
        assert_eq!(*mode, PathMode::Merge);
    }

    #[test]
    fn specificity_ranks_attributes_above_names() {
        let attr = compiled("self::x[@id]").specificity();
        let name = compiled("self::x/y").specificity();
        assert!(attr > name);
        assert!(compiled("self::x").specificity() > compiled("self::*").specificity());
    }

    #[test]
    fn unknown_variable_is_static_error() {
        let err = compile("$nope", &StaticContext::default()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0008);
    }

    #[test]
    fn updating_in_value_position_is_rejected() {
        let err = compile("1 + (delete node a)", &StaticContext::default()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XUST0001);
    }

    #[test]
    fn updating_flag_propagates_through_flwor() {
        let q = compiled("for $a in //a return delete node $a");
        assert!(q.is_updating());
    }
}
