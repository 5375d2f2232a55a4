//! Static analysis: namespace resolution, variable scoping and type-name resolution.
//!
//! Variables are resolved to slots in the frame of the enclosing body. Inline functions
//! open a *closure* frame: a reference to a variable of an enclosing frame allocates a
//! local slot and records a capture, so the function item can carry the value along.
use crate::compiler::ir::VarId;
use crate::consts::XS;
use crate::engine::runtime::{Error, ErrorCode, NamespaceBindings, Span};
use crate::model;
use crate::parser::ast;
use crate::types::{ItemType, Kind, KindTest, NameTest, NodeTest, SequenceType};
use crate::xdm::ExpandedName;
use smallvec::SmallVec;

type Result<T> = std::result::Result<T, Error>;

struct Frame {
    closure: bool,
    scopes: Vec<Vec<(ExpandedName, VarId)>>,
    next: VarId,
    captures: Vec<(VarId, VarId)>,
}

impl Frame {
    fn new(closure: bool) -> Self {
        Self {
            closure,
            scopes: vec![Vec::new()],
            next: 0,
            captures: Vec::new(),
        }
    }

    fn find(&self, name: &ExpandedName) -> Option<VarId> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|s| s.iter().rev())
            .find(|(n, _)| n == name)
            .map(|(_, id)| *id)
    }
}

/// Result of closing a frame.
pub(crate) struct FrameInfo {
    pub size: usize,
    pub captures: Vec<(VarId, VarId)>,
}

/// Stack of lexical frames and scopes. Shadowing is allowed: every binding gets a fresh slot.
pub(crate) struct Scopes {
    frames: SmallVec<[Frame; 4]>,
}

impl Scopes {
    pub fn new() -> Self {
        let mut frames = SmallVec::new();
        frames.push(Frame::new(false));
        Self { frames }
    }

    /// Start a function body, global initializer (`closure == false`) or inline function.
    pub fn push_frame(&mut self, closure: bool) {
        self.frames.push(Frame::new(closure));
    }

    pub fn pop_frame(&mut self) -> FrameInfo {
        match self.frames.pop() {
            Some(f) => FrameInfo {
                size: f.next,
                captures: f.captures,
            },
            None => FrameInfo {
                size: 0,
                captures: Vec::new(),
            },
        }
    }

    /// Size of the current frame so far.
    pub fn frame_size(&self) -> usize {
        self.frames.last().map_or(0, |f| f.next)
    }

    pub fn push_scope(&mut self) {
        if let Some(f) = self.frames.last_mut() {
            f.scopes.push(Vec::new());
        }
    }

    pub fn pop_scope(&mut self) {
        if let Some(f) = self.frames.last_mut()
            && f.scopes.len() > 1
        {
            f.scopes.pop();
        }
    }

    /// A slot that is not visible by name (used for `$err:*` and group keys).
    pub fn fresh(&mut self) -> VarId {
        match self.frames.last_mut() {
            Some(f) => {
                let id = f.next;
                f.next += 1;
                id
            }
            None => 0,
        }
    }

    /// Bind `name` in the innermost scope.
    pub fn bind(&mut self, name: ExpandedName) -> VarId {
        let id = self.fresh();
        if let Some(f) = self.frames.last_mut()
            && let Some(scope) = f.scopes.last_mut()
        {
            scope.push((name, id));
        }
        id
    }

    pub fn lookup(&mut self, name: &ExpandedName) -> Option<VarId> {
        let depth = self.frames.len().checked_sub(1)?;
        self.lookup_in(depth, name)
    }

    fn lookup_in(&mut self, depth: usize, name: &ExpandedName) -> Option<VarId> {
        let frame = &self.frames[depth];
        if let Some(id) = frame.find(name) {
            return Some(id);
        }
        if !frame.closure || depth == 0 {
            return None;
        }
        let outer = self.lookup_in(depth - 1, name)?;
        let frame = &mut self.frames[depth];
        let inner = frame.next;
        frame.next += 1;
        frame.captures.push((outer, inner));
        frame.scopes[0].push((name.clone(), inner));
        Some(inner)
    }
}

/// In-scope namespaces: the module's bindings plus the overlays opened by direct element
/// constructors. The empty prefix in an overlay sets the default element namespace.
pub(crate) struct Namespaces {
    pub base: NamespaceBindings,
    pub default_element: Option<String>,
    pub default_function: Option<String>,
    overlays: Vec<Vec<(String, String)>>,
}

impl Namespaces {
    pub fn new(
        base: NamespaceBindings,
        default_element: Option<String>,
        default_function: Option<String>,
    ) -> Self {
        Self {
            base,
            default_element,
            default_function,
            overlays: Vec::new(),
        }
    }

    pub fn push_overlay(&mut self, decls: Vec<(String, String)>) {
        self.overlays.push(decls);
    }

    pub fn pop_overlay(&mut self) {
        self.overlays.pop();
    }

    pub fn resolve_prefix(&self, prefix: &str) -> Option<String> {
        for overlay in self.overlays.iter().rev() {
            if let Some((_, uri)) = overlay.iter().rev().find(|(p, _)| p == prefix) {
                return Some(uri.clone());
            }
        }
        self.base.resolve(prefix).map(str::to_string)
    }

    fn default_element_ns(&self) -> Option<String> {
        for overlay in self.overlays.iter().rev() {
            if let Some((_, uri)) = overlay.iter().rev().find(|(p, _)| p.is_empty()) {
                return Some(uri.clone()).filter(|u| !u.is_empty());
            }
        }
        self.default_element.clone()
    }

    fn uri_for(&self, name: &ast::QName, default: Option<String>, span: Span) -> Result<Option<String>> {
        if let Some(uri) = &name.ns_uri {
            return Ok(Some(uri.clone()).filter(|u| !u.is_empty()));
        }
        match &name.prefix {
            None => Ok(default),
            Some(p) => self.resolve_prefix(p).map(Some).ok_or_else(|| {
                Error::from_code(
                    ErrorCode::XPST0081,
                    format!("namespace prefix '{p}' is not declared"),
                )
                .with_span(span)
            }),
        }
    }

    pub fn element_name(&self, name: &ast::QName, span: Span) -> Result<ExpandedName> {
        let uri = self.uri_for(name, self.default_element_ns(), span)?;
        Ok(ExpandedName::new(uri, name.local.clone()))
    }

    /// Attribute and variable names: no default namespace.
    pub fn plain_name(&self, name: &ast::QName, span: Span) -> Result<ExpandedName> {
        let uri = self.uri_for(name, None, span)?;
        Ok(ExpandedName::new(uri, name.local.clone()))
    }

    pub fn function_name(&self, name: &ast::QName, span: Span) -> Result<ExpandedName> {
        let uri = self.uri_for(name, self.default_function.clone(), span)?;
        Ok(ExpandedName::new(uri, name.local.clone()))
    }

    /// Constructor names keep their prefix so the result serializes as written.
    pub fn constructor_name(&self, name: &ast::QName, element: bool, span: Span) -> Result<model::QName> {
        let default = if element { self.default_element_ns() } else { None };
        let uri = self.uri_for(name, default, span)?;
        Ok(model::QName::new(name.prefix.clone(), name.local.clone(), uri))
    }

    pub fn atomic_type(&self, name: &ast::QName, span: Span) -> Result<Kind> {
        let uri = self.uri_for(name, self.default_element_ns(), span)?;
        let unknown = || {
            Error::from_code(ErrorCode::XPST0051, format!("unknown atomic type {name}"))
                .with_span(span)
        };
        if uri.as_deref() != Some(XS) {
            return Err(unknown());
        }
        let kind = match name.local.as_str() {
            "anyAtomicType" => Kind::AnyAtomic,
            local => Kind::from_xs_local(local).ok_or_else(unknown)?,
        };
        Ok(kind)
    }

    /// Target of `cast as` / `castable as`.
    pub fn cast_target(&self, name: &ast::QName, span: Span) -> Result<Kind> {
        let kind = self.atomic_type(name, span)?;
        if kind.is_abstract() {
            return Err(Error::from_code(
                ErrorCode::XPST0080,
                format!("cannot cast to abstract type {}", kind.display_name()),
            )
            .with_span(span));
        }
        Ok(kind)
    }

    pub fn sequence_type(&self, ty: &ast::SequenceType, span: Span) -> Result<SequenceType> {
        Ok(match ty {
            ast::SequenceType::EmptySequence => SequenceType::EmptySequence,
            ast::SequenceType::Typed { item, occ } => SequenceType::new(self.item_type(item, span)?, *occ),
        })
    }

    pub fn item_type(&self, ty: &ast::ItemType, span: Span) -> Result<ItemType> {
        Ok(match ty {
            ast::ItemType::Item => ItemType::AnyItem,
            ast::ItemType::Atomic(q) => ItemType::Atomic(self.atomic_type(q, span)?),
            ast::ItemType::Kind(k) => ItemType::Kind(self.kind_test(k, span)?),
            ast::ItemType::AnyFunction => ItemType::AnyFunction,
            ast::ItemType::Function { params, ret } => ItemType::Function {
                params: params
                    .iter()
                    .map(|p| self.sequence_type(p, span))
                    .collect::<Result<_>>()?,
                ret: Box::new(self.sequence_type(ret, span)?),
            },
            ast::ItemType::AnyMap => ItemType::AnyMap,
            ast::ItemType::Map { key, value } => ItemType::Map {
                key: self.atomic_type(key, span)?,
                value: Box::new(self.sequence_type(value, span)?),
            },
            ast::ItemType::AnyArray => ItemType::AnyArray,
            ast::ItemType::Array(m) => ItemType::Array(Box::new(self.sequence_type(m, span)?)),
        })
    }

    pub fn kind_test(&self, test: &ast::KindTest, span: Span) -> Result<KindTest> {
        Ok(match test {
            ast::KindTest::AnyKind => KindTest::AnyKind,
            ast::KindTest::Document(inner) => KindTest::Document(match inner {
                Some(k) => Some(Box::new(self.kind_test(k, span)?)),
                None => None,
            }),
            ast::KindTest::Text => KindTest::Text,
            ast::KindTest::Comment => KindTest::Comment,
            ast::KindTest::NamespaceNode => KindTest::NamespaceNode,
            ast::KindTest::ProcessingInstruction(t) => KindTest::ProcessingInstruction(t.clone()),
            ast::KindTest::Element { name, ty, .. } => {
                self.check_annotation(ty.as_ref(), span)?;
                KindTest::Element(match name {
                    Some(ast::NameOrWildcard::Name(q)) => Some(NameTest::Name(self.element_name(q, span)?)),
                    Some(ast::NameOrWildcard::Any) | None => None,
                })
            }
            ast::KindTest::Attribute { name, ty } => {
                self.check_annotation(ty.as_ref(), span)?;
                KindTest::Attribute(match name {
                    Some(ast::NameOrWildcard::Name(q)) => Some(NameTest::Name(self.plain_name(q, span)?)),
                    Some(ast::NameOrWildcard::Any) | None => None,
                })
            }
            ast::KindTest::SchemaElement(q) => KindTest::SchemaElement(self.element_name(q, span)?),
            ast::KindTest::SchemaAttribute(q) => KindTest::SchemaAttribute(self.plain_name(q, span)?),
        })
    }

    /// Type annotations in element()/attribute() tests must name a known type; on an
    /// untyped tree only `xs:untyped`/`xs:untypedAtomic`/`xs:anyType` can ever match and
    /// the annotation is otherwise ignored.
    fn check_annotation(&self, ty: Option<&ast::QName>, span: Span) -> Result<()> {
        let Some(q) = ty else { return Ok(()) };
        let uri = self.uri_for(q, self.default_element_ns(), span)?;
        let known = uri.as_deref() == Some(XS)
            && (matches!(q.local.as_str(), "untyped" | "anyType" | "anySimpleType")
                || Kind::from_xs_local(&q.local).is_some());
        if known {
            Ok(())
        } else {
            Err(Error::from_code(ErrorCode::XPST0008, format!("unknown type {q}")).with_span(span))
        }
    }

    /// Name test of a path step; `principal_attribute` selects the attribute axis rules.
    pub fn node_test(&self, test: &ast::NodeTest, principal_attribute: bool, span: Span) -> Result<NodeTest> {
        Ok(match test {
            ast::NodeTest::Kind(k) => NodeTest::Kind(self.kind_test(k, span)?),
            ast::NodeTest::Name(ast::NameTest::QName(q)) => NodeTest::Name(NameTest::Name(if principal_attribute {
                self.plain_name(q, span)?
            } else {
                self.element_name(q, span)?
            })),
            ast::NodeTest::Name(ast::NameTest::Wildcard(w)) => NodeTest::Name(match w {
                ast::Wildcard::Any => NameTest::Any,
                ast::Wildcard::Local(l) => NameTest::Local(l.clone()),
                ast::Wildcard::Uri(u) => NameTest::Namespace(Some(u.clone()).filter(|u| !u.is_empty())),
                ast::Wildcard::Prefix(p) => {
                    let uri = self.resolve_prefix(p).ok_or_else(|| {
                        Error::from_code(
                            ErrorCode::XPST0081,
                            format!("namespace prefix '{p}' is not declared"),
                        )
                        .with_span(span)
                    })?;
                    NameTest::Namespace(Some(uri).filter(|u| !u.is_empty()))
                }
            }),
        })
    }

    /// Name tests of `catch` clauses; unprefixed names are in no namespace.
    pub fn catch_test(&self, test: &ast::NameTest, span: Span) -> Result<NameTest> {
        match self.node_test(&ast::NodeTest::Name(test.clone()), true, span)? {
            NodeTest::Name(n) => Ok(n),
            NodeTest::Kind(_) => Ok(NameTest::Any),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadowing_gets_fresh_slots() {
        let mut s = Scopes::new();
        let x = ExpandedName::local("x");
        let a = s.bind(x.clone());
        s.push_scope();
        let b = s.bind(x.clone());
        assert_ne!(a, b);
        assert_eq!(s.lookup(&x), Some(b));
        s.pop_scope();
        assert_eq!(s.lookup(&x), Some(a));
    }

    #[test]
    fn closures_capture_outer_slots() {
        let mut s = Scopes::new();
        let x = ExpandedName::local("x");
        let outer = s.bind(x.clone());
        s.push_frame(true);
        let inner = s.lookup(&x).unwrap();
        // second lookup reuses the capture
        assert_eq!(s.lookup(&x), Some(inner));
        let info = s.pop_frame();
        assert_eq!(info.captures, vec![(outer, inner)]);
    }

    #[test]
    fn function_frames_do_not_see_outer_variables() {
        let mut s = Scopes::new();
        let x = ExpandedName::local("x");
        s.bind(x.clone());
        s.push_frame(false);
        assert_eq!(s.lookup(&x), None);
    }
}
