use crate::consts::{CODEPOINT_URI, ERR_NS, FNS, PREDECLARED_PREFIXES};
use crate::engine::collation::{Collation, CollationRegistry};
use crate::engine::evaluator::ComparatorTable;
use crate::model::{DocumentWriter, NodeFactory};
use crate::types::SequenceType;
use crate::xdm::{ExpandedName, XdmItem, XdmSequence};
use chrono::Offset as _;
use core::fmt;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub type Arity = usize;

/// Byte range into the query text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    /// 1-based line and column of `start` within `source`.
    pub fn line_col(&self, source: &str) -> (usize, usize) {
        let upto = &source[..self.start.min(source.len())];
        let line = upto.matches('\n').count() + 1;
        let col = upto.rsplit('\n').next().map_or(0, |l| l.chars().count()) + 1;
        (line, col)
    }
}

macro_rules! error_codes {
    ($($code:ident => $desc:literal),* $(,)?) => {
        /// Error codes emitted by the engine. All of them live in the `err` namespace.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        pub enum ErrorCode {
            $($code,)*
            Unknown,
        }

        impl ErrorCode {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(ErrorCode::$code => stringify!($code),)*
                    ErrorCode::Unknown => "UNKNOWN",
                }
            }

            pub fn description(&self) -> &'static str {
                match self {
                    $(ErrorCode::$code => $desc,)*
                    ErrorCode::Unknown => "unknown error",
                }
            }

            fn from_local(local: &str) -> Self {
                $(if local == stringify!($code) {
                    return ErrorCode::$code;
                })*
                ErrorCode::Unknown
            }
        }
    };
}

error_codes! {
    // static
    XPST0003 => "syntax error",
    XPST0005 => "static type is empty-sequence()",
    XPST0008 => "undeclared variable or type name",
    XPST0017 => "unknown function or wrong arity",
    XPST0051 => "unknown atomic type",
    XPST0080 => "cast to an abstract type",
    XPST0081 => "unbound namespace prefix",
    XQST0022 => "namespace declaration attribute value is not a URI literal",
    XQST0031 => "unsupported version",
    XQST0033 => "duplicate namespace declaration",
    XQST0034 => "duplicate function declaration",
    XQST0039 => "duplicate parameter name",
    XQST0040 => "duplicate attribute in direct constructor",
    XQST0045 => "function declared in a reserved namespace",
    XQST0047 => "duplicate module import",
    XQST0048 => "library function or variable outside the module namespace",
    XQST0049 => "duplicate variable declaration",
    XQST0059 => "module cannot be resolved",
    XQST0070 => "reserved namespace prefix or URI",
    XQST0071 => "duplicate namespace declaration attribute",
    XQST0076 => "unknown collation in order by or group by",
    XQST0090 => "character reference to an invalid character",
    XQST0094 => "grouping variable not in scope",
    XQST0118 => "mismatched end tag",
    XUST0001 => "updating expression in a non-updating position",
    XUST0002 => "non-updating expression where an updating one is required",
    // type
    XPTY0004 => "type mismatch",
    XPTY0018 => "path result mixes nodes and atomic values",
    XPTY0019 => "path step applied to a non-node",
    XPTY0020 => "axis step context item is not a node",
    XPDY0050 => "treat as failed",
    XQTY0024 => "attribute node after non-attribute content",
    FOTY0012 => "item has no typed value",
    FOTY0013 => "function item cannot be atomized",
    FOTY0014 => "function item has no string value",
    FOTY0015 => "function item supplied to fn:deep-equal",
    XUTY0004 => "attribute content after non-attribute content",
    XUTY0005 => "insert into target is not a single element or document",
    XUTY0006 => "insert before/after target is not a single child node",
    XUTY0007 => "delete target is not a node",
    XUTY0008 => "replace target is not a single node",
    XUTY0010 => "replacement for a non-attribute contains attributes",
    XUTY0011 => "replacement for an attribute contains non-attributes",
    XUTY0012 => "rename target is not an element, attribute or processing instruction",
    XUTY0013 => "copy source is not a single node",
    XUTY0022 => "insert attributes into a document node",
    // dynamic
    XPDY0002 => "context item or variable value absent",
    XQDY0025 => "duplicate attribute name in constructed element",
    XQDY0026 => "processing instruction content contains '?>'",
    XQDY0041 => "invalid processing instruction target",
    XQDY0044 => "invalid attribute name",
    XQDY0054 => "circular variable dependency",
    XQDY0072 => "comment content contains '--' or ends with '-'",
    XQDY0064 => "processing instruction target is 'xml'",
    XQDY0074 => "computed name cannot be converted to a QName",
    XQDY0137 => "duplicate key in map constructor",
    XUDY0009 => "replace target has no parent",
    XUDY0014 => "modify clause targets a node outside the copies",
    XUDY0015 => "node renamed more than once",
    XUDY0016 => "node replaced more than once",
    XUDY0017 => "node value replaced more than once",
    XUDY0021 => "update produces an invalid tree",
    XUDY0023 => "update conflicts with an existing namespace binding",
    XUDY0024 => "conflicting namespace bindings",
    XUDY0027 => "insert/replace/rename target is empty",
    XUDY0029 => "insert before/after target has no parent",
    XUDY0030 => "insert attributes before/after a document child",
    XUDY0031 => "fn:put called twice with the same URI",
    FOAR0001 => "division by zero",
    FOAR0002 => "numeric overflow",
    FOAY0001 => "array index out of bounds",
    FOAY0002 => "negative array length",
    FOAP0001 => "wrong number of arguments to fn:apply",
    FOCA0002 => "invalid lexical value",
    FOCA0003 => "input value too large for integer",
    FOCA0005 => "NaN supplied as float/double value",
    FOCH0001 => "codepoint is not a valid XML character",
    FOCH0002 => "unsupported collation",
    FOCH0003 => "unsupported normalization form",
    FODT0001 => "overflow in date/time arithmetic",
    FODT0002 => "overflow in duration arithmetic",
    FODT0003 => "invalid timezone value",
    FOER0000 => "unidentified error",
    FOJS0003 => "duplicate keys in map:merge",
    FOJS0005 => "invalid options for map:merge",
    FONS0004 => "no namespace found for prefix",
    FONS0005 => "base URI not defined in the static context",
    FORG0001 => "invalid value for cast/constructor",
    FORG0002 => "invalid argument to fn:resolve-uri",
    FORG0003 => "fn:zero-or-one called with more than one item",
    FORG0004 => "fn:one-or-more called with an empty sequence",
    FORG0005 => "fn:exactly-one called with zero or more than one item",
    FORG0006 => "invalid argument type",
    FORX0001 => "invalid regular expression flags",
    FORX0002 => "invalid regular expression",
    FORX0003 => "regular expression matches zero-length string",
    FORX0004 => "invalid replacement string",
    FOUP0001 => "fn:put first operand is not a document or element node",
    FOUP0002 => "fn:put target cannot be stored",
    ADPT0001 => "tree adapter capability missing",
    NYI0000 => "not implemented",
}

/// Broad classification of an error, derived from its code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    Syntax,
    Static,
    Type,
    Dynamic,
    UpdateConflict,
}

impl ErrorCode {
    /// Returns the QName (ExpandedName) for this error code in the `err` namespace.
    pub fn qname(&self) -> ExpandedName {
        ExpandedName::new(Some(ERR_NS.to_string()), self.as_str())
    }

    /// Parse `err:XPTY0004` (or a bare local part) into the typed code.
    pub fn from_code(s: &str) -> Self {
        Self::from_local(s.strip_prefix("err:").unwrap_or(s))
    }

    pub fn category(&self) -> ErrorCategory {
        use ErrorCode::*;
        match self {
            XPST0003 => ErrorCategory::Syntax,
            XUDY0015 | XUDY0016 | XUDY0017 | XUDY0024 => ErrorCategory::UpdateConflict,
            FORG0006 => ErrorCategory::Type,
            _ => {
                let s = self.as_str();
                if s.starts_with("XPST") || s.starts_with("XQST") || s.starts_with("XUST") {
                    ErrorCategory::Static
                } else if s.starts_with("XPTY")
                    || s.starts_with("XQTY")
                    || s.starts_with("XUTY")
                    || s.starts_with("FOTY")
                {
                    ErrorCategory::Type
                } else {
                    ErrorCategory::Dynamic
                }
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub struct Error {
    pub code: ExpandedName,
    pub message: String,
    pub span: Option<Span>,
    /// Value attached by `fn:error($code, $description, $value)`, rendered as a string.
    pub value: Option<String>,
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    pub fn new_qname(code: ExpandedName, msg: impl Into<String>) -> Self {
        Self {
            code,
            message: msg.into(),
            span: None,
            value: None,
            source: None,
        }
    }

    pub fn from_code(code: ErrorCode, msg: impl Into<String>) -> Self {
        Self::new_qname(code.qname(), msg)
    }

    pub fn not_implemented(feature: &str) -> Self {
        Self::from_code(ErrorCode::NYI0000, format!("not implemented: {feature}"))
    }

    pub fn code_enum(&self) -> ErrorCode {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            ErrorCode::from_local(&self.code.local)
        } else {
            ErrorCode::Unknown
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code_enum() {
            // user-raised codes via fn:error are dynamic errors
            ErrorCode::Unknown => ErrorCategory::Dynamic,
            c => c.category(),
        }
    }

    /// Format the code as `err:LOCAL` or `Q{ns}local`.
    pub fn format_code(&self) -> String {
        if self.code.ns_uri.as_deref() == Some(ERR_NS) {
            format!("err:{}", self.code.local)
        } else if let Some(ns) = &self.code.ns_uri {
            format!("Q{{{}}}{}", ns, self.code.local)
        } else {
            self.code.local.clone()
        }
    }

    pub fn with_source(
        mut self,
        source: impl Into<Option<Arc<dyn std::error::Error + Send + Sync>>>,
    ) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    pub(crate) fn or_span(mut self, span: Option<Span>) -> Self {
        if self.span.is_none() {
            self.span = span;
        }
        self
    }

    /// Render the error with line/column information taken from `source`.
    pub fn render(&self, source: &str) -> String {
        match self.span {
            Some(span) => {
                let (line, col) = span.line_col(source);
                format!("{self} at line {line}, column {col}")
            }
            None => self.to_string(),
        }
    }
}

impl From<fancy_regex::Error> for Error {
    fn from(e: fancy_regex::Error) -> Self {
        Error::from_code(ErrorCode::FORX0002, "regex error")
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl From<rust_decimal::Error> for Error {
    fn from(e: rust_decimal::Error) -> Self {
        Error::from_code(ErrorCode::FOAR0002, "decimal arithmetic overflow")
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {} ({})", self.message, self.format_code())
    }
}

/// Language level accepted by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    XPath31,
    XQuery31,
    #[default]
    XQueryUpdate31,
}

impl Language {
    pub fn allows_xquery(&self) -> bool {
        !matches!(self, Language::XPath31)
    }

    pub fn allows_updates(&self) -> bool {
        matches!(self, Language::XQueryUpdate31)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceBindings {
    pub by_prefix: HashMap<String, String>,
}

impl NamespaceBindings {
    pub fn predeclared() -> Self {
        let by_prefix = PREDECLARED_PREFIXES
            .iter()
            .map(|(p, u)| ((*p).to_string(), (*u).to_string()))
            .collect();
        Self { by_prefix }
    }

    pub fn resolve(&self, prefix: &str) -> Option<&str> {
        self.by_prefix.get(prefix).map(String::as_str)
    }

    /// Stable fingerprint used as part of compile cache keys.
    pub(crate) fn fingerprint(&self) -> String {
        let mut pairs: Vec<_> = self.by_prefix.iter().collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(p, u)| format!("{p}={u}"))
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Supplies the source text of library modules named by `import module`.
///
/// Resolution happens once, at compile time.
pub trait ModuleResolver: Send + Sync {
    fn resolve(&self, namespace: &str, location_hints: &[String]) -> Option<String>;
}

#[derive(Clone)]
pub struct StaticContext {
    pub base_uri: Option<String>,
    pub default_function_namespace: Option<String>,
    pub default_element_namespace: Option<String>,
    pub default_collation: Option<String>,
    pub namespaces: NamespaceBindings,
    pub in_scope_variables: HashSet<ExpandedName>,
    pub language: Language,
    pub functions: Arc<FunctionSignatures>,
    pub module_resolver: Option<Arc<dyn ModuleResolver>>,
}

impl fmt::Debug for StaticContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticContext")
            .field("base_uri", &self.base_uri)
            .field("default_function_namespace", &self.default_function_namespace)
            .field("default_element_namespace", &self.default_element_namespace)
            .field("default_collation", &self.default_collation)
            .field("namespaces", &self.namespaces)
            .field("in_scope_variables", &self.in_scope_variables)
            .field("language", &self.language)
            .finish_non_exhaustive()
    }
}

impl Default for StaticContext {
    fn default() -> Self {
        Self {
            base_uri: None,
            default_function_namespace: Some(FNS.to_string()),
            default_element_namespace: None,
            default_collation: Some(CODEPOINT_URI.to_string()),
            namespaces: NamespaceBindings::predeclared(),
            in_scope_variables: HashSet::new(),
            language: Language::default(),
            functions: crate::engine::functions::default_signatures(),
            module_resolver: None,
        }
    }
}

/// Builder for `StaticContext`: allows explicit namespace registrations
/// and default settings while preserving required implicit bindings.
pub struct StaticContextBuilder {
    ctx: StaticContext,
}

impl Default for StaticContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticContextBuilder {
    /// The resulting `StaticContext` is captured by the compiled query; the evaluator
    /// never consults a different static context afterwards.
    pub fn new() -> Self {
        Self {
            ctx: StaticContext::default(),
        }
    }

    pub fn with_base_uri(mut self, uri: impl Into<String>) -> Self {
        self.ctx.base_uri = Some(uri.into());
        self
    }

    pub fn with_default_function_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_function_namespace = Some(uri.into());
        self
    }

    pub fn with_default_element_namespace(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_element_namespace = Some(uri.into());
        self
    }

    pub fn with_default_collation(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_collation = Some(uri.into());
        self
    }

    /// Register a namespace prefix → URI mapping. The reserved `xml` prefix cannot be rebound.
    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        let p = prefix.into();
        if p == "xml" {
            return self;
        }
        self.ctx.namespaces.by_prefix.insert(p, uri.into());
        self
    }

    /// Register an external variable that may be referenced without being bound locally.
    pub fn with_variable(mut self, name: ExpandedName) -> Self {
        self.ctx.in_scope_variables.insert(name);
        self
    }

    pub fn with_language(mut self, language: Language) -> Self {
        self.ctx.language = language;
        self
    }

    pub fn with_functions(mut self, functions: Arc<FunctionSignatures>) -> Self {
        self.ctx.functions = functions;
        self
    }

    pub fn with_module_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.ctx.module_resolver = Some(resolver);
        self
    }

    pub fn build(self) -> StaticContext {
        self.ctx
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionKey {
    pub name: ExpandedName,
    pub arity: Arity,
}

/// Declared shape of a builtin or extension function.
#[derive(Debug, Clone)]
pub struct FunctionSignature {
    pub name: ExpandedName,
    pub params: Vec<SequenceType>,
    /// The last parameter repeats (fn:concat).
    pub variadic: bool,
    pub return_type: SequenceType,
    /// Reads the focus (context item, position or size) when called.
    pub uses_focus: bool,
    pub updating: bool,
}

impl FunctionSignature {
    pub fn accepts(&self, arity: Arity) -> bool {
        if self.variadic {
            arity + 1 >= self.params.len()
        } else {
            arity == self.params.len()
        }
    }

    /// Declared type of parameter `i` (variadic tails repeat the last one).
    pub fn param(&self, i: usize) -> Option<&SequenceType> {
        self.params
            .get(i)
            .or_else(|| if self.variadic { self.params.last() } else { None })
    }
}

/// Error type returned by function resolution.
#[derive(Debug, Clone)]
pub enum ResolveError {
    Unknown(ExpandedName),
    WrongArity {
        name: ExpandedName,
        available: Vec<Arity>,
    },
}

impl ResolveError {
    pub fn into_error(self) -> Error {
        match self {
            ResolveError::Unknown(name) => Error::from_code(
                ErrorCode::XPST0017,
                format!("unknown function {}", name.display()),
            ),
            ResolveError::WrongArity { name, available } => Error::from_code(
                ErrorCode::XPST0017,
                format!(
                    "function {} cannot be called with this number of arguments (available arities: {:?})",
                    name.display(),
                    available
                ),
            ),
        }
    }
}

/// Signatures only: what the static analyzer needs to validate calls.
#[derive(Debug, Clone, Default)]
pub struct FunctionSignatures {
    by_name: HashMap<ExpandedName, Vec<FunctionSignature>>,
}

impl FunctionSignatures {
    pub fn register(&mut self, sig: FunctionSignature) {
        let entry = self.by_name.entry(sig.name.clone()).or_default();
        entry.retain(|s| s.params.len() != sig.params.len() || s.variadic != sig.variadic);
        entry.push(sig);
        // exact arities before variadic ones
        entry.sort_by_key(|s| (s.variadic, s.params.len()));
    }

    pub fn resolve(&self, name: &ExpandedName, arity: Arity) -> Result<&FunctionSignature, ResolveError> {
        let Some(cands) = self.by_name.get(name) else {
            return Err(ResolveError::Unknown(name.clone()));
        };
        cands.iter().find(|s| s.accepts(arity)).ok_or_else(|| {
            let mut available: Vec<Arity> = cands.iter().map(|s| s.params.len()).collect();
            available.sort_unstable();
            available.dedup();
            ResolveError::WrongArity {
                name: name.clone(),
                available,
            }
        })
    }

    pub fn contains_name(&self, name: &ExpandedName) -> bool {
        self.by_name.contains_key(name)
    }
}

/// Lets builtin implementations call back into the evaluator (higher-order functions).
pub trait FunctionCaller<N> {
    fn call_function(
        &self,
        function: &XdmItem<N>,
        args: Vec<XdmSequence<N>>,
    ) -> Result<XdmSequence<N>, Error>;
}

pub struct CallCtx<'a, N> {
    pub dyn_ctx: &'a DynamicContext<N>,
    pub static_ctx: &'a StaticContext,
    pub context_item: Option<&'a XdmItem<N>>,
    pub default_collation: Arc<dyn Collation>,
    pub regex: Arc<dyn RegexProvider>,
    pub now: chrono::DateTime<chrono::FixedOffset>,
    pub implicit_timezone: chrono::FixedOffset,
    pub comparators: &'a ComparatorTable,
    pub caller: &'a dyn FunctionCaller<N>,
}

impl<N> CallCtx<'_, N> {
    pub fn context_item(&self, function: &str) -> Result<&XdmItem<N>, Error> {
        self.context_item.ok_or_else(|| {
            Error::from_code(
                ErrorCode::XPDY0002,
                format!("context item is absent in call to fn:{function}"),
            )
        })
    }

    pub fn collation(&self, uri: Option<&str>) -> Result<Arc<dyn Collation>, Error> {
        match uri {
            None => Ok(self.default_collation.clone()),
            Some(u) => self.dyn_ctx.collations.get(u).ok_or_else(|| {
                Error::from_code(ErrorCode::FOCH0002, format!("unknown collation URI: {u}"))
            }),
        }
    }
}

pub type FunctionImpl<N> =
    Arc<dyn Fn(&CallCtx<N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error> + Send + Sync>;

/// Signature plus implementation, keyed by name; resolution by arity.
pub struct FunctionRegistry<N> {
    signatures: FunctionSignatures,
    fns: HashMap<ExpandedName, Vec<(FunctionSignature, FunctionImpl<N>)>>,
}

impl<N> Default for FunctionRegistry<N> {
    fn default() -> Self {
        Self {
            signatures: FunctionSignatures::default(),
            fns: HashMap::new(),
        }
    }
}

impl<N> Clone for FunctionRegistry<N> {
    fn clone(&self) -> Self {
        Self {
            signatures: self.signatures.clone(),
            fns: self.fns.clone(),
        }
    }
}

impl<N> FunctionRegistry<N> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, sig: FunctionSignature, func: FunctionImpl<N>) {
        self.signatures.register(sig.clone());
        let entry = self.fns.entry(sig.name.clone()).or_default();
        entry.retain(|(s, _)| s.params.len() != sig.params.len() || s.variadic != sig.variadic);
        entry.push((sig, func));
        entry.sort_by_key(|(s, _)| (s.variadic, s.params.len()));
    }

    /// Register an extension function with a plain closure.
    pub fn register_fn<F>(&mut self, sig: FunctionSignature, f: F)
    where
        F: 'static
            + Send
            + Sync
            + Fn(&CallCtx<N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error>,
    {
        self.register(sig, Arc::new(f));
    }

    pub fn resolve(
        &self,
        name: &ExpandedName,
        arity: Arity,
    ) -> Result<(&FunctionSignature, &FunctionImpl<N>), ResolveError> {
        let Some(cands) = self.fns.get(name) else {
            return Err(ResolveError::Unknown(name.clone()));
        };
        cands
            .iter()
            .find(|(s, _)| s.accepts(arity))
            .map(|(s, f)| (s, f))
            .ok_or_else(|| ResolveError::WrongArity {
                name: name.clone(),
                available: cands.iter().map(|(s, _)| s.params.len()).collect(),
            })
    }

    pub fn signatures(&self) -> &FunctionSignatures {
        &self.signatures
    }
}

pub trait RegexProvider: Send + Sync {
    fn matches(&self, pattern: &str, flags: &str, text: &str) -> Result<bool, Error>;
    fn replace(
        &self,
        pattern: &str,
        flags: &str,
        text: &str,
        replacement: &str,
    ) -> Result<String, Error>;
    fn tokenize(&self, pattern: &str, flags: &str, text: &str) -> Result<Vec<String>, Error>;
}

/// Backreference-capable regex provider based on fancy-regex (backtracking engine).
pub struct FancyRegexProvider;

impl FancyRegexProvider {
    fn build_with_flags(pattern: &str, flags: &str) -> Result<fancy_regex::Regex, Error> {
        let mut builder = fancy_regex::RegexBuilder::new(pattern);
        for ch in flags.chars() {
            match ch {
                'i' => {
                    builder.case_insensitive(true);
                }
                'm' => {
                    builder.multi_line(true);
                }
                's' => {
                    builder.dot_matches_new_line(true);
                }
                'x' => {
                    builder.verbose_mode(true);
                }
                _ => {
                    return Err(Error::from_code(
                        ErrorCode::FORX0001,
                        format!("unsupported regex flag: {ch}"),
                    ));
                }
            }
        }
        builder.build().map_err(|e| {
            Error::from_code(ErrorCode::FORX0002, "invalid regex pattern")
                .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
        })
    }

    /// XPath replacement strings use `$N` and `\$`/`\\`; fancy-regex expects `${N}` and `$$`.
    fn translate_replacement(replacement: &str) -> Result<String, Error> {
        let mut out = String::with_capacity(replacement.len());
        let mut chars = replacement.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\\' => match chars.next() {
                    Some('$') => out.push_str("$$"),
                    Some('\\') => out.push('\\'),
                    _ => {
                        return Err(Error::from_code(
                            ErrorCode::FORX0004,
                            "invalid escape in replacement string",
                        ));
                    }
                },
                '$' => {
                    let mut digits = String::new();
                    while let Some(d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                        digits.push(*d);
                        chars.next();
                    }
                    if digits.is_empty() {
                        return Err(Error::from_code(
                            ErrorCode::FORX0004,
                            "'$' must be followed by a group number",
                        ));
                    }
                    out.push_str("${");
                    out.push_str(&digits);
                    out.push('}');
                }
                _ => out.push(c),
            }
        }
        Ok(out)
    }
}

impl RegexProvider for FancyRegexProvider {
    fn matches(&self, pattern: &str, flags: &str, text: &str) -> Result<bool, Error> {
        let re = Self::build_with_flags(pattern, flags)?;
        Ok(re.is_match(text)?)
    }

    fn replace(
        &self,
        pattern: &str,
        flags: &str,
        text: &str,
        replacement: &str,
    ) -> Result<String, Error> {
        let re = Self::build_with_flags(pattern, flags)?;
        if re.is_match("")? {
            return Err(Error::from_code(
                ErrorCode::FORX0003,
                "pattern matches the zero-length string",
            ));
        }
        let template = Self::translate_replacement(replacement)?;
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in re.captures_iter(text) {
            let caps = caps?;
            let Some(m) = caps.get(0) else { continue };
            out.push_str(&text[last..m.start()]);
            fancy_regex::Expander::default().append_expansion(&mut out, &template, &caps);
            last = m.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    fn tokenize(&self, pattern: &str, flags: &str, text: &str) -> Result<Vec<String>, Error> {
        let re = Self::build_with_flags(pattern, flags)?;
        if re.is_match("")? {
            return Err(Error::from_code(
                ErrorCode::FORX0003,
                "pattern matches the zero-length string",
            ));
        }
        if text.is_empty() {
            return Ok(vec![]);
        }
        let mut out = Vec::new();
        let mut last = 0;
        for m in re.find_iter(text) {
            let m = m?;
            out.push(text[last..m.start()].to_string());
            last = m.end();
        }
        out.push(text[last..].to_string());
        Ok(out)
    }
}

#[derive(Clone)]
pub struct DynamicContext<N> {
    pub context_item: Option<XdmItem<N>>,
    pub variables: HashMap<ExpandedName, XdmSequence<N>>,
    pub default_collation: Option<String>,
    pub functions: Arc<FunctionRegistry<N>>,
    pub collations: Arc<CollationRegistry>,
    pub regex: Option<Arc<dyn RegexProvider>>,
    pub now: Option<chrono::DateTime<chrono::FixedOffset>>,
    pub timezone_override: Option<chrono::FixedOffset>,
    pub node_factory: Option<Arc<dyn NodeFactory<N>>>,
    pub document_writer: Option<Arc<dyn DocumentWriter<N>>>,
}

impl<N: crate::model::XdmNode> Default for DynamicContext<N> {
    fn default() -> Self {
        Self {
            context_item: None,
            variables: HashMap::new(),
            default_collation: None,
            functions: Arc::new(crate::engine::functions::default_function_registry()),
            collations: Arc::new(CollationRegistry::default()),
            regex: None,
            now: None,
            timezone_override: None,
            node_factory: None,
            document_writer: None,
        }
    }
}

impl<N> DynamicContext<N> {
    /// Implicit timezone: the explicit override, otherwise UTC.
    pub fn implicit_timezone(&self) -> chrono::FixedOffset {
        self.timezone_override.unwrap_or_else(|| chrono::Utc.fix())
    }

    pub fn node_factory(&self) -> Result<&Arc<dyn NodeFactory<N>>, Error> {
        self.node_factory.as_ref().ok_or_else(|| {
            Error::from_code(
                ErrorCode::ADPT0001,
                "node construction requires a NodeFactory in the dynamic context",
            )
        })
    }

    pub fn document_writer(&self) -> Result<&Arc<dyn DocumentWriter<N>>, Error> {
        self.document_writer.as_ref().ok_or_else(|| {
            Error::from_code(
                ErrorCode::ADPT0001,
                "applying updates requires a DocumentWriter in the dynamic context",
            )
        })
    }
}

pub struct DynamicContextBuilder<N> {
    ctx: DynamicContext<N>,
}

impl<N: crate::model::XdmNode> Default for DynamicContextBuilder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: crate::model::XdmNode> DynamicContextBuilder<N> {
    pub fn new() -> Self {
        Self {
            ctx: DynamicContext::default(),
        }
    }

    pub fn with_context_item(mut self, item: impl Into<XdmItem<N>>) -> Self {
        self.ctx.context_item = Some(item.into());
        self
    }

    pub fn with_variable(mut self, name: ExpandedName, value: impl Into<XdmSequence<N>>) -> Self {
        self.ctx.variables.insert(name, value.into());
        self
    }

    pub fn with_default_collation(mut self, uri: impl Into<String>) -> Self {
        self.ctx.default_collation = Some(uri.into());
        self
    }

    pub fn with_functions(mut self, reg: Arc<FunctionRegistry<N>>) -> Self {
        self.ctx.functions = reg;
        self
    }

    pub fn with_collations(mut self, reg: Arc<CollationRegistry>) -> Self {
        self.ctx.collations = reg;
        self
    }

    pub fn with_regex(mut self, provider: Arc<dyn RegexProvider>) -> Self {
        self.ctx.regex = Some(provider);
        self
    }

    pub fn with_now(mut self, now: chrono::DateTime<chrono::FixedOffset>) -> Self {
        self.ctx.now = Some(now);
        self
    }

    pub fn with_timezone(mut self, offset_minutes: i32) -> Self {
        self.ctx.timezone_override = chrono::FixedOffset::east_opt(offset_minutes * 60);
        self
    }

    pub fn with_node_factory(mut self, factory: Arc<dyn NodeFactory<N>>) -> Self {
        self.ctx.node_factory = Some(factory);
        self
    }

    pub fn with_document_writer(mut self, writer: Arc<dyn DocumentWriter<N>>) -> Self {
        self.ctx.document_writer = Some(writer);
        self
    }

    pub fn build(self) -> DynamicContext<N> {
        self.ctx
    }
}
