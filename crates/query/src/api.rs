//! Host-facing entry points.
//!
//! An [`Engine`] owns the function registry, a compiled-query cache and the comparator
//! memo table; nothing is shared between engines. Queries are evaluated against a
//! context item and a set of external variables, and the result is coerced to the
//! [`ReturnType`] the caller asks for.
//!
//! ```
//! use sylva_query::api::{Engine, EvaluateOptions, QueryResult, ReturnType};
//! use sylva_query::model::simple::SimpleNode;
//!
//! let engine = Engine::<SimpleNode>::new();
//! let options = EvaluateOptions::builder().return_type(ReturnType::Numbers).build();
//! let out = engine.evaluate("for $x in (1, 2, 3) return $x * 2", None, [], &options).unwrap();
//! assert!(matches!(out, QueryResult::Numbers(v) if v == vec![2.0, 4.0, 6.0]));
//! ```
use crate::compiler::closure::{NativeQuery, compile_native};
use crate::compiler::{self, CompiledQuery};
use crate::engine::collation::CollationRegistry;
use crate::engine::evaluator::node_ops::atomize_items;
use crate::engine::evaluator::{ComparatorTable, evaluate_updating_with, evaluate_with};
use crate::engine::functions::default_function_registry;
use crate::engine::runtime::{
    CallCtx, DynamicContext, DynamicContextBuilder, Error, ErrorCode, FunctionRegistry, FunctionSignature, Language,
    ModuleResolver, StaticContext, StaticContextBuilder,
};
use crate::model::{DocumentWriter, NodeFactory, XdmNode};
use crate::types::{Kind, cast_atomic};
use crate::update::{ApplyReport, PendingUpdateList, apply_updates};
use crate::xdm::{ExpandedName, Sequence, XdmArray, XdmAtomicValue, XdmItem, XdmMap, XdmSequence};
use core::fmt;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

type Result<T> = std::result::Result<T, Error>;

/// Shape the caller wants the result in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReturnType {
    /// The materialized sequence, unchanged.
    #[default]
    Any,
    /// Effective boolean value.
    Boolean,
    /// Atomized string values joined by a single space; empty for the empty sequence.
    String,
    /// One string per atomized item.
    Strings,
    /// The single item cast to `xs:double`; NaN when empty or not numeric.
    Number,
    /// Every atomized item cast to `xs:double`.
    Numbers,
    /// First node, if any. Non-node items are a type error.
    FirstNode,
    /// All nodes in result order. Non-node items are a type error.
    AllNodes,
    /// Exactly one map.
    Map,
    /// Exactly one array.
    Array,
    /// The lazy sequence; items are computed as it is consumed.
    Iterator,
}

/// Result of [`Engine::evaluate`], one variant per [`ReturnType`].
pub enum QueryResult<N> {
    Items(XdmSequence<N>),
    Boolean(bool),
    String(String),
    Strings(Vec<String>),
    Number(f64),
    Numbers(Vec<f64>),
    FirstNode(Option<N>),
    AllNodes(Vec<N>),
    Map(XdmMap<N>),
    Array(XdmArray<N>),
    Iterator(Sequence<N>),
}

impl<N: fmt::Debug> fmt::Debug for QueryResult<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryResult::Items(items) => f.debug_tuple("Items").field(items).finish(),
            QueryResult::Boolean(b) => f.debug_tuple("Boolean").field(b).finish(),
            QueryResult::String(s) => f.debug_tuple("String").field(s).finish(),
            QueryResult::Strings(s) => f.debug_tuple("Strings").field(s).finish(),
            QueryResult::Number(n) => f.debug_tuple("Number").field(n).finish(),
            QueryResult::Numbers(n) => f.debug_tuple("Numbers").field(n).finish(),
            QueryResult::FirstNode(n) => f.debug_tuple("FirstNode").field(n).finish(),
            QueryResult::AllNodes(n) => f.debug_tuple("AllNodes").field(n).finish(),
            QueryResult::Map(m) => f.debug_tuple("Map").field(m).finish(),
            QueryResult::Array(a) => f.debug_tuple("Array").field(a).finish(),
            QueryResult::Iterator(_) => f.write_str("Iterator(..)"),
        }
    }
}

impl<N: XdmNode> QueryResult<N> {
    /// Materializes the result back into a plain sequence.
    pub fn into_items(self) -> Result<XdmSequence<N>> {
        let atomic = |v: XdmAtomicValue| vec![XdmItem::Atomic(v)];
        Ok(match self {
            QueryResult::Items(items) => items,
            QueryResult::Boolean(b) => atomic(XdmAtomicValue::Boolean(b)),
            QueryResult::String(s) => atomic(XdmAtomicValue::String(s)),
            QueryResult::Strings(s) => s
                .into_iter()
                .map(|s| XdmItem::Atomic(XdmAtomicValue::String(s)))
                .collect(),
            QueryResult::Number(n) => atomic(XdmAtomicValue::Double(n)),
            QueryResult::Numbers(n) => n
                .into_iter()
                .map(|n| XdmItem::Atomic(XdmAtomicValue::Double(n)))
                .collect(),
            QueryResult::FirstNode(n) => n.into_iter().map(XdmItem::Node).collect(),
            QueryResult::AllNodes(n) => n.into_iter().map(XdmItem::Node).collect(),
            QueryResult::Map(m) => vec![XdmItem::Map(m)],
            QueryResult::Array(a) => vec![XdmItem::Array(a)],
            QueryResult::Iterator(seq) => seq.into_vec()?,
        })
    }
}

/// Value and pending updates of an updating expression. Nothing has been applied yet.
#[derive(Debug)]
pub struct UpdatingResult<N> {
    pub pending_update_list: PendingUpdateList<N>,
    pub xdm_value: XdmSequence<N>,
}

/// Static and dynamic settings for one evaluation.
#[derive(Clone)]
pub struct EvaluateOptions<N> {
    return_type: ReturnType,
    language: Language,
    base_uri: Option<String>,
    namespaces: Vec<(String, String)>,
    default_function_namespace: Option<String>,
    default_element_namespace: Option<String>,
    default_collation: Option<String>,
    module_resolver: Option<Arc<dyn ModuleResolver>>,
    collations: Option<Arc<CollationRegistry>>,
    now: Option<chrono::DateTime<chrono::FixedOffset>>,
    timezone_minutes: Option<i32>,
    node_factory: Option<Arc<dyn NodeFactory<N>>>,
    document_writer: Option<Arc<dyn DocumentWriter<N>>>,
}

impl<N> Default for EvaluateOptions<N> {
    fn default() -> Self {
        Self {
            return_type: ReturnType::Any,
            language: Language::default(),
            base_uri: None,
            namespaces: Vec::new(),
            default_function_namespace: None,
            default_element_namespace: None,
            default_collation: None,
            module_resolver: None,
            collations: None,
            now: None,
            timezone_minutes: None,
            node_factory: None,
            document_writer: None,
        }
    }
}

impl<N> fmt::Debug for EvaluateOptions<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluateOptions")
            .field("return_type", &self.return_type)
            .field("language", &self.language)
            .field("base_uri", &self.base_uri)
            .field("namespaces", &self.namespaces)
            .field("default_collation", &self.default_collation)
            .field("timezone_minutes", &self.timezone_minutes)
            .finish_non_exhaustive()
    }
}

impl<N> EvaluateOptions<N> {
    pub fn builder() -> EvaluateOptionsBuilder<N> {
        EvaluateOptionsBuilder { options: Self::default() }
    }

    pub fn return_type(&self) -> ReturnType {
        self.return_type
    }

    pub fn language(&self) -> Language {
        self.language
    }

    fn static_context(&self, signatures: &Arc<crate::engine::runtime::FunctionSignatures>, variables: &[ExpandedName]) -> StaticContext {
        let mut b = StaticContextBuilder::new()
            .with_language(self.language)
            .with_functions(signatures.clone());
        if let Some(uri) = &self.base_uri {
            b = b.with_base_uri(uri.clone());
        }
        if let Some(uri) = &self.default_function_namespace {
            b = b.with_default_function_namespace(uri.clone());
        }
        if let Some(uri) = &self.default_element_namespace {
            b = b.with_default_element_namespace(uri.clone());
        }
        if let Some(uri) = &self.default_collation {
            b = b.with_default_collation(uri.clone());
        }
        for (prefix, uri) in &self.namespaces {
            b = b.with_namespace(prefix.clone(), uri.clone());
        }
        for name in variables {
            b = b.with_variable(name.clone());
        }
        if let Some(resolver) = &self.module_resolver {
            b = b.with_module_resolver(resolver.clone());
        }
        b.build()
    }
}

pub struct EvaluateOptionsBuilder<N> {
    options: EvaluateOptions<N>,
}

impl<N> EvaluateOptionsBuilder<N> {
    pub fn return_type(mut self, return_type: ReturnType) -> Self {
        self.options.return_type = return_type;
        self
    }

    pub fn language(mut self, language: Language) -> Self {
        self.options.language = language;
        self
    }

    pub fn base_uri(mut self, uri: impl Into<String>) -> Self {
        self.options.base_uri = Some(uri.into());
        self
    }

    pub fn namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.options.namespaces.push((prefix.into(), uri.into()));
        self
    }

    pub fn default_function_namespace(mut self, uri: impl Into<String>) -> Self {
        self.options.default_function_namespace = Some(uri.into());
        self
    }

    pub fn default_element_namespace(mut self, uri: impl Into<String>) -> Self {
        self.options.default_element_namespace = Some(uri.into());
        self
    }

    /// Default collation URI, applied both statically and dynamically.
    pub fn default_collation(mut self, uri: impl Into<String>) -> Self {
        self.options.default_collation = Some(uri.into());
        self
    }

    pub fn module_resolver(mut self, resolver: Arc<dyn ModuleResolver>) -> Self {
        self.options.module_resolver = Some(resolver);
        self
    }

    pub fn collations(mut self, collations: Arc<CollationRegistry>) -> Self {
        self.options.collations = Some(collations);
        self
    }

    /// Fixes the value of `fn:current-dateTime()` for the evaluation.
    pub fn now(mut self, now: chrono::DateTime<chrono::FixedOffset>) -> Self {
        self.options.now = Some(now);
        self
    }

    /// Implicit timezone as an offset from UTC in minutes.
    pub fn timezone(mut self, offset_minutes: i32) -> Self {
        self.options.timezone_minutes = Some(offset_minutes);
        self
    }

    pub fn node_factory(mut self, factory: Arc<dyn NodeFactory<N>>) -> Self {
        self.options.node_factory = Some(factory);
        self
    }

    pub fn document_writer(mut self, writer: Arc<dyn DocumentWriter<N>>) -> Self {
        self.options.document_writer = Some(writer);
        self
    }

    pub fn build(self) -> EvaluateOptions<N> {
        self.options
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Compiled queries kept per engine; 0 disables the cache.
    pub compile_cache_capacity: usize,
    /// Lower eligible queries to native closures for node and boolean results.
    pub native_backend: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            compile_cache_capacity: 64,
            native_backend: false,
        }
    }
}

pub struct EngineBuilder<N> {
    config: EngineConfig,
    functions: FunctionRegistry<N>,
}

impl<N: XdmNode> EngineBuilder<N> {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn compile_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.compile_cache_capacity = capacity;
        self
    }

    pub fn native_backend(mut self, enabled: bool) -> Self {
        self.config.native_backend = enabled;
        self
    }

    /// Registers an extension function. A signature with the name and arity of a
    /// builtin replaces it.
    pub fn register_function<F>(mut self, signature: FunctionSignature, f: F) -> Self
    where
        F: 'static + Send + Sync + Fn(&CallCtx<N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>>,
    {
        self.functions.register_fn(signature, f);
        self
    }

    pub fn build(self) -> Engine<N> {
        let cache = NonZeroUsize::new(self.config.compile_cache_capacity).map(|cap| Mutex::new(LruCache::new(cap)));
        let signatures = Arc::new(self.functions.signatures().clone());
        Engine {
            config: self.config,
            functions: Arc::new(self.functions),
            signatures,
            cache,
            comparators: Arc::new(ComparatorTable::new()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    source: String,
    language: Language,
    settings: String,
    variables: Vec<ExpandedName>,
}

struct CacheEntry<N> {
    query: CompiledQuery,
    native: OnceLock<Option<NativeQuery<N>>>,
}

/// Compiles and evaluates queries over trees of node type `N`.
pub struct Engine<N> {
    config: EngineConfig,
    functions: Arc<FunctionRegistry<N>>,
    signatures: Arc<crate::engine::runtime::FunctionSignatures>,
    cache: Option<Mutex<LruCache<CacheKey, Arc<CacheEntry<N>>>>>,
    comparators: Arc<ComparatorTable>,
}

impl<N> fmt::Debug for Engine<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish_non_exhaustive()
    }
}

impl<N: XdmNode> Default for Engine<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N: XdmNode> Engine<N> {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder<N> {
        EngineBuilder {
            config: EngineConfig::default(),
            functions: default_function_registry::<N>(),
        }
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Comparators resolved so far by this engine's evaluations.
    pub fn comparators(&self) -> &ComparatorTable {
        &self.comparators
    }

    /// Compiles `query` with the static settings of `options`. External variables
    /// referenced by the query must be declared in its prolog.
    pub fn compile(&self, query: &str, options: &EvaluateOptions<N>) -> Result<CompiledQuery> {
        Ok(self.compile_cached(query, options, Vec::new())?.query.clone())
    }

    fn compile_cached(
        &self,
        query: &str,
        options: &EvaluateOptions<N>,
        mut variables: Vec<ExpandedName>,
    ) -> Result<Arc<CacheEntry<N>>> {
        variables.sort();
        variables.dedup();
        let static_ctx = options.static_context(&self.signatures, &variables);
        let compile = || -> Result<Arc<CacheEntry<N>>> {
            let compiled = compiler::compile(query, &static_ctx).map_err(|e| with_position(e, query))?;
            Ok(Arc::new(CacheEntry {
                query: compiled,
                native: OnceLock::new(),
            }))
        };
        let Some(cache) = &self.cache else {
            return compile();
        };
        let key = CacheKey {
            source: query.to_string(),
            language: options.language,
            settings: settings_fingerprint(&static_ctx),
            variables,
        };
        if let Some(hit) = cache.lock().unwrap_or_else(PoisonError::into_inner).get(&key) {
            tracing::debug!(len = query.len(), language = ?options.language, "compile cache hit");
            return Ok(hit.clone());
        }
        tracing::debug!(len = query.len(), language = ?options.language, "compile cache miss");
        let entry = compile()?;
        cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .put(key, entry.clone());
        Ok(entry)
    }

    /// Compiles (or reuses) `query` and evaluates it.
    pub fn evaluate<V>(
        &self,
        query: &str,
        context_item: Option<XdmItem<N>>,
        variables: V,
        options: &EvaluateOptions<N>,
    ) -> Result<QueryResult<N>>
    where
        V: IntoIterator<Item = (ExpandedName, XdmSequence<N>)>,
    {
        let variables: Vec<_> = variables.into_iter().collect();
        let names = variables.iter().map(|(n, _)| n.clone()).collect();
        let entry = self.compile_cached(query, options, names)?;
        let native = self.native_for(&entry, context_item.as_ref(), &variables, options);
        self.run(&entry.query, native, context_item, variables, options)
    }

    /// Evaluates a query compiled earlier, by this or another engine.
    pub fn evaluate_compiled<V>(
        &self,
        query: &CompiledQuery,
        context_item: Option<XdmItem<N>>,
        variables: V,
        options: &EvaluateOptions<N>,
    ) -> Result<QueryResult<N>>
    where
        V: IntoIterator<Item = (ExpandedName, XdmSequence<N>)>,
    {
        let variables: Vec<_> = variables.into_iter().collect();
        let lowered = if self.native_eligible(context_item.as_ref(), &variables, options) {
            compile_native::<N>(query)
        } else {
            None
        };
        self.run(query, lowered.as_ref(), context_item, variables, options)
    }

    /// Evaluates an updating expression and returns its pending update list without
    /// applying it.
    pub fn evaluate_updating_expression<V>(
        &self,
        query: &str,
        context_item: Option<XdmItem<N>>,
        variables: V,
        options: &EvaluateOptions<N>,
    ) -> Result<UpdatingResult<N>>
    where
        V: IntoIterator<Item = (ExpandedName, XdmSequence<N>)>,
    {
        let variables: Vec<_> = variables.into_iter().collect();
        let names = variables.iter().map(|(n, _)| n.clone()).collect();
        let entry = self.compile_cached(query, options, names)?;
        let dyn_ctx = self.dynamic_context(context_item, variables, options);
        tracing::debug!(len = query.len(), "evaluating updating expression");
        let (xdm_value, pending) = evaluate_updating_with(&entry.query, &dyn_ctx, self.comparators.clone())
            .map_err(|e| with_position(e, query))?;
        tracing::debug!(pending = pending.len(), "pending update list collected");
        Ok(UpdatingResult {
            pending_update_list: PendingUpdateList::from(pending),
            xdm_value,
        })
    }

    /// Validates and applies a pending update list through the document writer of
    /// `options`. A conflicting list is rejected before any mutation.
    pub fn execute_pending_update_list(
        &self,
        list: PendingUpdateList<N>,
        options: &EvaluateOptions<N>,
    ) -> Result<ApplyReport<N>> {
        let Some(writer) = options.document_writer.as_deref() else {
            return Err(Error::from_code(
                ErrorCode::ADPT0001,
                "applying updates requires a DocumentWriter in the evaluate options",
            ));
        };
        apply_updates(list.into_vec(), writer, options.node_factory.as_deref())
    }

    fn dynamic_context(
        &self,
        context_item: Option<XdmItem<N>>,
        variables: Vec<(ExpandedName, XdmSequence<N>)>,
        options: &EvaluateOptions<N>,
    ) -> DynamicContext<N> {
        let mut b = DynamicContextBuilder::new().with_functions(self.functions.clone());
        if let Some(item) = context_item {
            b = b.with_context_item(item);
        }
        for (name, value) in variables {
            b = b.with_variable(name, value);
        }
        if let Some(uri) = &options.default_collation {
            b = b.with_default_collation(uri.clone());
        }
        if let Some(collations) = &options.collations {
            b = b.with_collations(collations.clone());
        }
        if let Some(now) = options.now {
            b = b.with_now(now);
        }
        if let Some(minutes) = options.timezone_minutes {
            b = b.with_timezone(minutes);
        }
        if let Some(factory) = &options.node_factory {
            b = b.with_node_factory(factory.clone());
        }
        if let Some(writer) = &options.document_writer {
            b = b.with_document_writer(writer.clone());
        }
        b.build()
    }

    fn native_eligible(
        &self,
        context_item: Option<&XdmItem<N>>,
        variables: &[(ExpandedName, XdmSequence<N>)],
        options: &EvaluateOptions<N>,
    ) -> bool {
        self.config.native_backend
            && matches!(
                options.return_type,
                ReturnType::Boolean | ReturnType::FirstNode | ReturnType::AllNodes
            )
            && matches!(context_item, Some(XdmItem::Node(_)))
            && variables.is_empty()
            && options.default_collation.is_none()
    }

    fn native_for<'a>(
        &self,
        entry: &'a CacheEntry<N>,
        context_item: Option<&XdmItem<N>>,
        variables: &[(ExpandedName, XdmSequence<N>)],
        options: &EvaluateOptions<N>,
    ) -> Option<&'a NativeQuery<N>> {
        if !self.native_eligible(context_item, variables, options) {
            return None;
        }
        entry.native.get_or_init(|| compile_native::<N>(&entry.query)).as_ref()
    }

    fn run(
        &self,
        query: &CompiledQuery,
        native: Option<&NativeQuery<N>>,
        context_item: Option<XdmItem<N>>,
        variables: Vec<(ExpandedName, XdmSequence<N>)>,
        options: &EvaluateOptions<N>,
    ) -> Result<QueryResult<N>> {
        let return_type = options.return_type;
        if let (Some(native), Some(XdmItem::Node(node))) = (native, context_item.as_ref()) {
            let out = match return_type {
                ReturnType::Boolean => Some(native.boolean(node).map(QueryResult::Boolean)),
                ReturnType::FirstNode => native
                    .nodes(node)
                    .map(|r| r.map(|nodes| QueryResult::FirstNode(nodes.into_iter().next()))),
                ReturnType::AllNodes => native.nodes(node).map(|r| r.map(QueryResult::AllNodes)),
                _ => None,
            };
            if let Some(out) = out {
                return out.map_err(|e| with_position(e, query.source()));
            }
        }
        let dyn_ctx = self.dynamic_context(context_item, variables, options);
        tracing::debug!(?return_type, "evaluating query");
        let seq = evaluate_with(query, &dyn_ctx, self.comparators.clone()).map_err(|e| with_position(e, query.source()))?;
        coerce(seq, return_type).map_err(|e| with_position(e, query.source()))
    }
}

fn settings_fingerprint(ctx: &StaticContext) -> String {
    // resolvers are compared by identity
    let resolver = ctx
        .module_resolver
        .as_ref()
        .map_or(0, |r| Arc::as_ptr(r).cast::<()>() as usize);
    format!(
        "{:?}|{:?}|{:?}|{:?}|{}|{resolver:x}",
        ctx.base_uri,
        ctx.default_function_namespace,
        ctx.default_element_namespace,
        ctx.default_collation,
        ctx.namespaces.fingerprint(),
    )
}

/// Appends the line and column of the error's span to its message.
fn with_position(mut err: Error, source: &str) -> Error {
    if let Some(span) = err.span {
        let (line, column) = span.line_col(source);
        err.message = format!("{} (line {line}, column {column})", err.message);
    }
    err
}

fn type_error(expected: &str) -> Error {
    Error::from_code(ErrorCode::XPTY0004, format!("query result is not {expected}"))
}

fn to_double(value: XdmAtomicValue) -> Option<f64> {
    match cast_atomic(value, Kind::Double, None) {
        Ok(XdmAtomicValue::Double(d)) => Some(d),
        _ => None,
    }
}

fn nodes_of<N: XdmNode>(items: XdmSequence<N>) -> Result<Vec<N>> {
    items
        .into_iter()
        .map(|item| match item {
            XdmItem::Node(n) => Ok(n),
            _ => Err(type_error("a sequence of nodes")),
        })
        .collect()
}

fn coerce<N: XdmNode>(seq: Sequence<N>, return_type: ReturnType) -> Result<QueryResult<N>> {
    Ok(match return_type {
        ReturnType::Iterator => QueryResult::Iterator(seq),
        ReturnType::Boolean => QueryResult::Boolean(seq.effective_boolean_value()?),
        ReturnType::FirstNode => match seq.first()? {
            None => QueryResult::FirstNode(None),
            Some(XdmItem::Node(n)) => QueryResult::FirstNode(Some(n)),
            Some(_) => return Err(type_error("a node")),
        },
        ReturnType::Any => QueryResult::Items(seq.into_vec()?),
        ReturnType::AllNodes => QueryResult::AllNodes(nodes_of(seq.into_vec()?)?),
        ReturnType::String => {
            let atoms = atomize_items(&seq.into_vec()?)?;
            QueryResult::String(atoms.iter().map(XdmAtomicValue::string_value).collect::<Vec<_>>().join(" "))
        }
        ReturnType::Strings => {
            let atoms = atomize_items(&seq.into_vec()?)?;
            QueryResult::Strings(atoms.iter().map(XdmAtomicValue::string_value).collect())
        }
        ReturnType::Number => {
            let mut atoms = atomize_items(&seq.into_vec()?)?;
            if atoms.len() > 1 {
                return Err(type_error("a single number"));
            }
            QueryResult::Number(atoms.pop().and_then(to_double).unwrap_or(f64::NAN))
        }
        ReturnType::Numbers => {
            let atoms = atomize_items(&seq.into_vec()?)?;
            let numbers = atoms
                .into_iter()
                .map(|a| to_double(a).ok_or_else(|| type_error("a sequence of numbers")))
                .collect::<Result<Vec<_>>>()?;
            QueryResult::Numbers(numbers)
        }
        ReturnType::Map => match seq.into_vec()?.as_slice() {
            [XdmItem::Map(m)] => QueryResult::Map(m.clone()),
            _ => return Err(type_error("a single map")),
        },
        ReturnType::Array => match seq.into_vec()?.as_slice() {
            [XdmItem::Array(a)] => QueryResult::Array(a.clone()),
            _ => return Err(type_error("a single array")),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::runtime::Span;

    #[test]
    fn positions_are_one_based() {
        let mut err = Error::from_code(ErrorCode::XPTY0004, "bad");
        err.span = Some(Span::new(7, 8));
        let err = with_position(err, "1 +\n2 + 'x'");
        assert_eq!(err.message, "bad (line 2, column 4)");
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
    }

    #[test]
    fn numbers_reject_non_numeric_items() {
        let seq: Sequence<crate::model::simple::SimpleNode> =
            Sequence::from_vec(vec![XdmItem::Atomic(XdmAtomicValue::String("a".into()))]);
        assert!(coerce(seq, ReturnType::Numbers).is_err());
    }
}
