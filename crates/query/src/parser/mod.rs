//! Query text → [`ast::Module`].
//!
//! One pest grammar covers XPath 3.1, XQuery 3.1 and the Update Facility; the builder
//! rejects constructs that the selected [`Language`] does not allow.
use crate::engine::runtime::{Error, ErrorCode, Language, Span};
use crate::types::Occurrence;
use crate::types::lexical::is_xml_char;
use ast::{
    AttrValuePart, Axis, BinaryOp, CatchClause, Clause, ConstructorName, DirAttribute, DirContent,
    DirElement, Expr, ExprKind, ForBinding, GeneralComp, GroupingSpec, InsertPosition, ItemType,
    KeySpecifier, KindTest, LetBinding, Literal, NameOrWildcard, NameTest, NodeComp, NodeTest,
    OrderSpec, Param, PathExpr, PathStart, QName, QuantifiedBinding, Quantifier, SequenceType,
    SetOp, SingleType, Step, SwitchCase, TypeswitchCase, UnarySign, ValueComp, Wildcard,
};
use pest::Parser as _;
use pest::iterators::Pair;
use rust_decimal::Decimal;
use std::cell::Cell;
use std::sync::Arc;

pub mod ast;

#[derive(pest_derive::Parser)]
#[grammar = "parser/xquery.pest"]
pub struct XQueryParser;

type Result<T> = std::result::Result<T, Error>;

impl From<pest::error::Error<Rule>> for Error {
    fn from(e: pest::error::Error<Rule>) -> Self {
        let span = match e.location {
            pest::error::InputLocation::Pos(p) => Span::new(p, p),
            pest::error::InputLocation::Span((start, end)) => Span::new(start, end),
        };
        let message = e.variant.message().into_owned();
        Error::from_code(ErrorCode::XPST0003, message)
            .with_span(span)
            .with_source(Some(Arc::new(e) as Arc<dyn std::error::Error + Send + Sync>))
    }
}

/// Parse a main or library module.
pub fn parse_module(input: &str, language: Language) -> Result<ast::Module> {
    let mut pairs = XQueryParser::parse(Rule::module, input)?;
    let module = pairs
        .next()
        .ok_or_else(|| syntax("empty query", Span::default()))?;
    let builder = AstBuilder {
        language,
        boundary_preserve: Cell::new(false),
    };
    builder.module(module)
}

/// Parse a query that must be a main module and return its body.
pub fn parse_expr(input: &str, language: Language) -> Result<Expr> {
    let module = parse_module(input, language)?;
    module
        .body
        .ok_or_else(|| syntax("expected an expression, found a library module", Span::new(0, input.len())))
}

fn syntax(msg: impl Into<String>, span: Span) -> Error {
    Error::from_code(ErrorCode::XPST0003, msg).with_span(span)
}

fn span(pair: &Pair<Rule>) -> Span {
    let s = pair.as_span();
    Span::new(s.start(), s.end())
}

fn unexpected(pair: &Pair<Rule>) -> Error {
    syntax(format!("unexpected {:?}", pair.as_rule()), span(pair))
}

fn only_child(pair: Pair<'_, Rule>) -> Result<Pair<'_, Rule>> {
    let sp = span(&pair);
    let rule = pair.as_rule();
    pair.into_inner()
        .next()
        .ok_or_else(|| syntax(format!("incomplete {rule:?}"), sp))
}

/// Walks down precedence levels that carry a single operand and no operator.
fn skip_single_operand(mut pair: Pair<'_, Rule>) -> Pair<'_, Rule> {
    loop {
        let collapsible = match pair.as_rule() {
            Rule::expr_single
            | Rule::or_expr
            | Rule::and_expr
            | Rule::comparison_expr
            | Rule::string_concat_expr
            | Rule::range_expr
            | Rule::additive_expr
            | Rule::multiplicative_expr
            | Rule::union_expr
            | Rule::intersect_except_expr
            | Rule::instanceof_expr
            | Rule::treat_expr
            | Rule::castable_expr
            | Rule::cast_expr
            | Rule::arrow_expr
            | Rule::unary_expr
            | Rule::value_expr
            | Rule::simple_map_expr
            | Rule::relative_path_expr
            | Rule::step_expr
            | Rule::postfix_expr
            | Rule::primary_expr
            | Rule::argument => true,
            Rule::path_expr => pair
                .clone()
                .into_inner()
                .next()
                .is_some_and(|p| p.as_rule() == Rule::relative_path_expr),
            _ => false,
        };
        if !collapsible {
            return pair;
        }
        let mut inner = pair.clone().into_inner();
        match (inner.next(), inner.next()) {
            (Some(only), None) => pair = only,
            _ => return pair,
        }
    }
}

fn join(a: Span, b: Span) -> Span {
    Span::new(a.start.min(b.start), a.end.max(b.end))
}

fn is_expr_rule(rule: Rule) -> bool {
    matches!(rule, Rule::expr | Rule::expr_single)
}

struct AstBuilder {
    language: Language,
    /// `declare boundary-space preserve` seen in the prolog.
    boundary_preserve: Cell<bool>,
}

/// Literal text between markup in a direct element constructor.
#[derive(Default)]
struct TextRun {
    text: String,
    /// Only literal whitespace so far: stripped unless boundary space is preserved.
    boundary: bool,
    started: bool,
}

impl TextRun {
    fn push_literal(&mut self, s: &str) {
        if !self.started {
            self.started = true;
            self.boundary = true;
        }
        let s = s.replace("\r\n", "\n").replace('\r', "\n");
        if !s.chars().all(|c| matches!(c, ' ' | '\t' | '\n')) {
            self.boundary = false;
        }
        self.text.push_str(&s);
    }

    fn push_verbatim(&mut self, s: &str) {
        self.started = true;
        self.boundary = false;
        self.text.push_str(s);
    }
}

impl AstBuilder {
    fn require_xquery(&self, pair: &Pair<Rule>, what: &str) -> Result<()> {
        if self.language.allows_xquery() {
            Ok(())
        } else {
            Err(syntax(format!("{what} is not allowed in XPath 3.1"), span(pair)))
        }
    }

    fn require_updates(&self, pair: &Pair<Rule>) -> Result<()> {
        if self.language.allows_updates() {
            Ok(())
        } else {
            Err(syntax(
                "updating expressions require the XQuery Update Facility",
                span(pair),
            ))
        }
    }

    // ===== Modules and prolog =====

    fn module(&self, pair: Pair<Rule>) -> Result<ast::Module> {
        let mut module = ast::Module::default();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::version_decl => {
                    self.require_xquery(&p, "version declaration")?;
                    self.version_decl(p)?;
                }
                Rule::main_module => {
                    for q in p.into_inner() {
                        match q.as_rule() {
                            Rule::prolog => module.prolog = self.prolog(q)?,
                            Rule::expr => module.body = Some(self.expr(q)?),
                            _ => return Err(unexpected(&q)),
                        }
                    }
                }
                Rule::library_module => {
                    self.require_xquery(&p, "library module")?;
                    for q in p.into_inner() {
                        match q.as_rule() {
                            Rule::module_decl => {
                                let (prefix, uri) = self.prefix_and_uri(q)?;
                                module.library = Some(ast::ModuleDecl { prefix, uri });
                            }
                            Rule::prolog => module.prolog = self.prolog(q)?,
                            _ => return Err(unexpected(&q)),
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(module)
    }

    fn version_decl(&self, pair: Pair<Rule>) -> Result<()> {
        let sp = span(&pair);
        let declares_version = pair
            .as_str()
            .trim_start_matches("xquery")
            .trim_start()
            .starts_with("version");
        if !declares_version {
            return Ok(());
        }
        let Some(version) = pair.into_inner().find(|p| p.as_rule() == Rule::string_literal) else {
            return Ok(());
        };
        let version = self.string_literal(&version)?;
        if matches!(version.as_str(), "1.0" | "3.0" | "3.1") {
            Ok(())
        } else {
            Err(Error::from_code(
                ErrorCode::XQST0031,
                format!("unsupported XQuery version {version}"),
            )
            .with_span(sp))
        }
    }

    fn prefix_and_uri(&self, pair: Pair<Rule>) -> Result<(String, String)> {
        let sp = span(&pair);
        let mut prefix = None;
        let mut uri = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::ncname => prefix = Some(p.as_str().to_string()),
                Rule::string_literal => uri = Some(self.string_literal(&p)?),
                _ => {}
            }
        }
        match (prefix, uri) {
            (Some(p), Some(u)) => Ok((p, u)),
            _ => Err(syntax("incomplete namespace declaration", sp)),
        }
    }

    fn prolog(&self, pair: Pair<Rule>) -> Result<ast::Prolog> {
        let mut prolog = ast::Prolog::default();
        for decl in pair.into_inner() {
            self.require_xquery(&decl, "prolog declaration")?;
            let sp = span(&decl);
            match decl.as_rule() {
                Rule::namespace_decl => {
                    let (prefix, uri) = self.prefix_and_uri(decl)?;
                    if prefix == "xml" || prefix == "xmlns" {
                        return Err(Error::from_code(
                            ErrorCode::XQST0070,
                            format!("the prefix {prefix} cannot be redeclared"),
                        )
                        .with_span(sp));
                    }
                    if prolog.namespaces.iter().any(|(p, _)| *p == prefix) {
                        return Err(Error::from_code(
                            ErrorCode::XQST0033,
                            format!("namespace prefix {prefix} declared twice"),
                        )
                        .with_span(sp));
                    }
                    prolog.namespaces.push((prefix, uri));
                }
                Rule::default_namespace_decl => {
                    let mut function = false;
                    let mut uri = String::new();
                    for p in decl.into_inner() {
                        match p.as_rule() {
                            Rule::default_ns_kind => function = p.as_str() == "function",
                            Rule::string_literal => uri = self.string_literal(&p)?,
                            _ => {}
                        }
                    }
                    if function {
                        prolog.default_function_namespace = Some(uri);
                    } else {
                        prolog.default_element_namespace = Some(uri);
                    }
                }
                Rule::boundary_space_decl => {
                    let preserve = decl
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::boundary_mode)
                        .is_some_and(|p| p.as_str() == "preserve");
                    self.boundary_preserve.set(preserve);
                    prolog.boundary_space_preserve = preserve;
                }
                Rule::default_collation_decl => {
                    prolog.default_collation = Some(self.first_string(decl)?);
                }
                Rule::base_uri_decl => {
                    prolog.base_uri = Some(self.first_string(decl)?);
                }
                Rule::empty_order_decl => {
                    prolog.empty_order_greatest = decl
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::empty_order)
                        .is_some_and(|p| p.as_str() == "greatest");
                }
                Rule::construction_decl
                | Rule::ordering_mode_decl
                | Rule::copy_namespaces_decl
                | Rule::option_decl => {}
                Rule::module_import => prolog.imports.push(self.module_import(decl)?),
                Rule::var_decl => prolog.variables.push(self.var_decl(decl)?),
                Rule::function_decl => prolog.functions.push(self.function_decl(decl)?),
                Rule::context_item_decl => prolog.context_item = Some(self.context_item_decl(decl)?),
                _ => return Err(unexpected(&decl)),
            }
        }
        Ok(prolog)
    }

    fn first_string(&self, pair: Pair<Rule>) -> Result<String> {
        let sp = span(&pair);
        let lit = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::string_literal)
            .ok_or_else(|| syntax("expected a URI literal", sp))?;
        self.string_literal(&lit)
    }

    fn module_import(&self, pair: Pair<Rule>) -> Result<ast::ModuleImport> {
        let mut prefix = None;
        let mut literals = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::ncname => prefix = Some(p.as_str().to_string()),
                Rule::string_literal => literals.push(self.string_literal(&p)?),
                _ => {}
            }
        }
        let mut literals = literals.into_iter();
        let uri = literals.next().unwrap_or_default();
        Ok(ast::ModuleImport {
            prefix,
            uri,
            hints: literals.collect(),
        })
    }

    fn var_decl(&self, pair: Pair<Rule>) -> Result<ast::VarDecl> {
        let sp = span(&pair);
        let mut name = None;
        let mut ty = None;
        let mut external = false;
        let mut value = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::eqname => name = Some(self.qname(p)?),
                Rule::type_declaration => ty = Some(self.type_declaration(p)?),
                Rule::K_EXTERNAL => external = true,
                Rule::expr_single => value = Some(self.expr(p)?),
                Rule::var_default => value = Some(self.expr(only_child(p)?)?),
                _ => {}
            }
        }
        Ok(ast::VarDecl {
            name: name.ok_or_else(|| syntax("variable declaration without a name", sp))?,
            ty,
            external,
            value,
            span: sp,
        })
    }

    fn function_decl(&self, pair: Pair<Rule>) -> Result<ast::FunctionDecl> {
        let sp = span(&pair);
        let mut name = None;
        let mut params = Vec::new();
        let mut return_type = None;
        let mut body = None;
        let mut updating = false;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::annotation => {
                    if let Some(n) = p.into_inner().next() {
                        updating |= self.qname(n)?.local == "updating";
                    }
                }
                Rule::eqname => name = Some(self.qname(p)?),
                Rule::param_list => params = self.params(p)?,
                Rule::sequence_type => return_type = Some(self.sequence_type(p)?),
                Rule::enclosed_expr => body = Some(self.enclosed_or_empty(p)?),
                Rule::K_EXTERNAL => {
                    return Err(Error::from_code(
                        ErrorCode::XPST0017,
                        "external function declarations are not supported",
                    )
                    .with_span(sp));
                }
                _ => {}
            }
        }
        Ok(ast::FunctionDecl {
            name: name.ok_or_else(|| syntax("function declaration without a name", sp))?,
            params,
            return_type,
            body: body.ok_or_else(|| syntax("function declaration without a body", sp))?,
            updating,
            span: sp,
        })
    }

    fn context_item_decl(&self, pair: Pair<Rule>) -> Result<ast::ContextItemDecl> {
        let mut decl = ast::ContextItemDecl {
            ty: None,
            external: false,
            value: None,
        };
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::item_type => decl.ty = Some(self.item_type(p)?),
                Rule::K_EXTERNAL => decl.external = true,
                Rule::expr_single => decl.value = Some(self.expr(p)?),
                Rule::var_default => decl.value = Some(self.expr(only_child(p)?)?),
                _ => {}
            }
        }
        Ok(decl)
    }

    fn params(&self, pair: Pair<Rule>) -> Result<Vec<Param>> {
        pair.into_inner()
            .filter(|p| p.as_rule() == Rule::param)
            .map(|p| {
                let mut name = None;
                let mut ty = None;
                let sp = span(&p);
                for q in p.into_inner() {
                    match q.as_rule() {
                        Rule::eqname => name = Some(self.qname(q)?),
                        Rule::type_declaration => ty = Some(self.type_declaration(q)?),
                        _ => {}
                    }
                }
                Ok(Param {
                    name: name.ok_or_else(|| syntax("parameter without a name", sp))?,
                    ty,
                })
            })
            .collect()
    }

    fn type_declaration(&self, pair: Pair<Rule>) -> Result<SequenceType> {
        let sp = span(&pair);
        let ty = pair
            .into_inner()
            .find(|p| p.as_rule() == Rule::sequence_type)
            .ok_or_else(|| syntax("expected a sequence type", sp))?;
        self.sequence_type(ty)
    }

    // ===== Names and literals =====

    fn qname(&self, pair: Pair<Rule>) -> Result<QName> {
        match pair.as_rule() {
            Rule::eqname | Rule::qname => self.qname(only_child(pair)?),
            Rule::ncname => Ok(QName::local(pair.as_str())),
            Rule::prefixed_name => {
                let mut parts = pair.into_inner().map(|p| p.as_str().to_string());
                let prefix = parts.next().unwrap_or_default();
                let local = parts.next().unwrap_or_default();
                Ok(QName::prefixed(prefix, local))
            }
            Rule::uri_qualified_name => {
                let mut uri = String::new();
                let mut local = String::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::braced_uri => uri = crate::types::lexical::collapse_whitespace(p.as_str()),
                        Rule::ncname => local = p.as_str().to_string(),
                        _ => {}
                    }
                }
                Ok(QName {
                    prefix: None,
                    local,
                    ns_uri: Some(uri),
                })
            }
            _ => Err(unexpected(&pair)),
        }
    }

    fn string_literal(&self, pair: &Pair<Rule>) -> Result<String> {
        let raw = pair.as_str();
        let quote = raw.chars().next().unwrap_or('"');
        let inner = raw
            .get(1..raw.len().saturating_sub(1))
            .unwrap_or_default();
        let doubled = if quote == '"' { "\"\"" } else { "''" };
        let unescaped = inner.replace(doubled, &quote.to_string());
        if self.language.allows_xquery() {
            decode_references(&unescaped, span(pair))
        } else {
            Ok(unescaped)
        }
    }

    fn literal(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let text = pair.as_str();
        let lit = match pair.as_rule() {
            Rule::integer_literal => Literal::Integer(text.parse::<i64>().map_err(|_| {
                Error::from_code(
                    ErrorCode::FOAR0002,
                    format!("integer literal {text} is out of range"),
                )
                .with_span(sp)
            })?),
            Rule::decimal_literal => {
                let mut normalized = String::with_capacity(text.len() + 2);
                if text.starts_with('.') {
                    normalized.push('0');
                }
                normalized.push_str(text);
                if text.ends_with('.') {
                    normalized.push('0');
                }
                Literal::Decimal(normalized.parse::<Decimal>().map_err(|_| {
                    Error::from_code(
                        ErrorCode::FOAR0002,
                        format!("decimal literal {text} is out of range"),
                    )
                    .with_span(sp)
                })?)
            }
            Rule::double_literal => Literal::Double(
                text.parse::<f64>()
                    .map_err(|_| syntax(format!("invalid double literal {text}"), sp))?,
            ),
            Rule::string_literal => Literal::String(self.string_literal(&pair)?),
            _ => return Err(unexpected(&pair)),
        };
        Ok(Expr::new(ExprKind::Literal(lit), sp))
    }

    // ===== Expressions =====

    fn expr(&self, pair: Pair<Rule>) -> Result<Expr> {
        let pair = skip_single_operand(pair);
        let sp = span(&pair);
        match pair.as_rule() {
            Rule::expr => {
                let mut items = pair
                    .into_inner()
                    .map(|p| self.expr(p))
                    .collect::<Result<Vec<_>>>()?;
                if items.len() == 1 {
                    items.pop().ok_or_else(|| syntax("empty expression", sp))
                } else {
                    Ok(Expr::new(ExprKind::Sequence(items), sp))
                }
            }
            Rule::expr_single
            | Rule::value_expr
            | Rule::step_expr
            | Rule::primary_expr
            | Rule::argument => self.expr(only_child(pair)?),
            Rule::flwor_expr => self.flwor(pair),
            Rule::quantified_expr => self.quantified(pair),
            Rule::switch_expr => self.switch(pair),
            Rule::typeswitch_expr => self.typeswitch(pair),
            Rule::if_expr => self.if_expr(pair),
            Rule::try_catch_expr => self.try_catch(pair),
            Rule::insert_expr => self.insert(pair),
            Rule::delete_expr => {
                self.require_updates(&pair)?;
                let target = self.nth_expr(pair, 0)?;
                Ok(Expr::new(ExprKind::Delete(Box::new(target)), sp))
            }
            Rule::replace_expr => self.replace(pair),
            Rule::rename_expr => {
                self.require_updates(&pair)?;
                let mut exprs = self.exprs(pair)?.into_iter();
                let (Some(target), Some(name)) = (exprs.next(), exprs.next()) else {
                    return Err(syntax("incomplete rename expression", sp));
                };
                Ok(Expr::new(
                    ExprKind::Rename {
                        target: Box::new(target),
                        name: Box::new(name),
                    },
                    sp,
                ))
            }
            Rule::transform_expr => self.transform(pair),
            Rule::or_expr => self.logical(pair, BinaryOp::Or),
            Rule::and_expr => self.logical(pair, BinaryOp::And),
            Rule::comparison_expr => self.comparison(pair),
            Rule::string_concat_expr => {
                let mut inner = pair.into_inner();
                let first = inner.next().ok_or_else(|| syntax("empty expression", sp))?;
                let mut acc = self.expr(first)?;
                for p in inner {
                    let right = self.expr(p)?;
                    let whole = join(acc.span, right.span);
                    acc = Expr::new(
                        ExprKind::Binary {
                            left: Box::new(acc),
                            op: BinaryOp::Concat,
                            right: Box::new(right),
                        },
                        whole,
                    );
                }
                Ok(acc)
            }
            Rule::range_expr => {
                let mut operands = pair.into_inner().filter(|p| p.as_rule() != Rule::K_TO);
                let start = self.expr(operands.next().ok_or_else(|| syntax("empty range", sp))?)?;
                match operands.next() {
                    None => Ok(start),
                    Some(end) => Ok(Expr::new(
                        ExprKind::Range {
                            start: Box::new(start),
                            end: Box::new(self.expr(end)?),
                        },
                        sp,
                    )),
                }
            }
            Rule::additive_expr | Rule::multiplicative_expr => self.arithmetic(pair),
            Rule::union_expr | Rule::intersect_except_expr => self.set_op(pair),
            Rule::instanceof_expr | Rule::treat_expr | Rule::castable_expr | Rule::cast_expr => {
                self.type_op(pair)
            }
            Rule::arrow_expr => self.arrow(pair),
            Rule::unary_expr => self.unary(pair),
            Rule::simple_map_expr => {
                let mut operands = pair.into_inner().filter(|p| p.as_rule() != Rule::OP_BANG);
                let first = operands.next().ok_or_else(|| syntax("empty expression", sp))?;
                let mut acc = self.expr(first)?;
                for p in operands {
                    let right = self.expr(p)?;
                    let whole = join(acc.span, right.span);
                    acc = Expr::new(
                        ExprKind::SimpleMap {
                            left: Box::new(acc),
                            right: Box::new(right),
                        },
                        whole,
                    );
                }
                Ok(acc)
            }
            Rule::path_expr => self.path(pair),
            Rule::relative_path_expr => self.relative_path(pair, PathStart::Relative, sp),
            Rule::axis_step => self.axis_step(pair),
            Rule::postfix_expr => self.postfix(pair),
            Rule::integer_literal
            | Rule::decimal_literal
            | Rule::double_literal
            | Rule::string_literal => self.literal(pair),
            Rule::var_ref => Ok(Expr::new(ExprKind::VarRef(self.qname(only_child(pair)?)?), sp)),
            Rule::parenthesized_expr => match pair.into_inner().next() {
                Some(inner) => self.expr(inner),
                None => Ok(Expr::new(ExprKind::EmptySequence, sp)),
            },
            Rule::context_item_expr => Ok(Expr::new(ExprKind::ContextItem, sp)),
            Rule::argument_placeholder => Ok(Expr::new(ExprKind::Placeholder, sp)),
            Rule::ordered_expr => {
                self.require_xquery(&pair, "ordered expression")?;
                let enclosed = pair
                    .into_inner()
                    .find(|p| p.as_rule() == Rule::enclosed_expr)
                    .ok_or_else(|| syntax("expected an enclosed expression", sp))?;
                self.enclosed_or_empty(enclosed)
            }
            Rule::function_call => {
                let mut inner = pair.into_inner();
                let name = self.qname(inner.next().ok_or_else(|| syntax("missing function name", sp))?)?;
                let args = match inner.next() {
                    Some(list) => self.arguments(list)?,
                    None => Vec::new(),
                };
                Ok(Expr::new(ExprKind::FunctionCall { name, args }, sp))
            }
            Rule::named_function_ref => {
                let mut inner = pair.into_inner();
                let name = self.qname(inner.next().ok_or_else(|| syntax("missing function name", sp))?)?;
                let arity = inner
                    .next()
                    .and_then(|p| p.as_str().parse::<usize>().ok())
                    .ok_or_else(|| syntax("invalid arity in function reference", sp))?;
                Ok(Expr::new(ExprKind::NamedFunctionRef { name, arity }, sp))
            }
            Rule::inline_function_expr => self.inline_function(pair),
            Rule::unary_lookup => {
                let key = self.key_specifier(only_child(pair)?)?;
                Ok(Expr::new(ExprKind::UnaryLookup(key), sp))
            }
            Rule::map_constructor => {
                let entries = pair
                    .into_inner()
                    .map(|entry| {
                        let esp = span(&entry);
                        let mut parts = entry.into_inner();
                        match (parts.next(), parts.next()) {
                            (Some(k), Some(v)) => Ok((self.expr(k)?, self.expr(v)?)),
                            _ => Err(syntax("incomplete map entry", esp)),
                        }
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Expr::new(ExprKind::MapConstructor(entries), sp))
            }
            Rule::array_constructor => {
                let inner = only_child(pair)?;
                match inner.as_rule() {
                    Rule::square_array_constructor => {
                        let members = inner
                            .into_inner()
                            .map(|p| self.expr(p))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(Expr::new(ExprKind::SquareArray(members), sp))
                    }
                    _ => {
                        let enclosed = only_child(inner)?;
                        let content = self.enclosed(enclosed)?.map(Box::new);
                        Ok(Expr::new(ExprKind::CurlyArray(content), sp))
                    }
                }
            }
            Rule::dir_elem_constructor => self.dir_element(pair),
            Rule::dir_comment_constructor => {
                self.require_xquery(&pair, "direct comment constructor")?;
                let text = pair.into_inner().next().map(|p| p.as_str()).unwrap_or_default();
                if text.ends_with('-') {
                    return Err(syntax("a direct comment cannot end with '-'", sp));
                }
                Ok(Expr::new(ExprKind::DirComment(text.to_string()), sp))
            }
            Rule::dir_pi_constructor => {
                self.require_xquery(&pair, "direct processing-instruction constructor")?;
                let mut target = String::new();
                let mut data = String::new();
                for p in pair.into_inner() {
                    match p.as_rule() {
                        Rule::ncname => target = p.as_str().to_string(),
                        Rule::dir_pi_text => data = p.as_str().to_string(),
                        _ => {}
                    }
                }
                if target.eq_ignore_ascii_case("xml") {
                    return Err(syntax("processing-instruction target cannot be 'xml'", sp));
                }
                Ok(Expr::new(ExprKind::DirPi { target, data }, sp))
            }
            Rule::comp_doc_constructor
            | Rule::comp_elem_constructor
            | Rule::comp_attr_constructor
            | Rule::comp_text_constructor
            | Rule::comp_comment_constructor
            | Rule::comp_pi_constructor => self.computed_constructor(pair),
            _ => Err(unexpected(&pair)),
        }
    }

    /// Every direct `expr` / `expr_single` child, in order.
    fn exprs(&self, pair: Pair<Rule>) -> Result<Vec<Expr>> {
        pair.into_inner()
            .filter(|p| is_expr_rule(p.as_rule()))
            .map(|p| self.expr(p))
            .collect()
    }

    fn nth_expr(&self, pair: Pair<Rule>, n: usize) -> Result<Expr> {
        let sp = span(&pair);
        let p = pair
            .into_inner()
            .filter(|p| is_expr_rule(p.as_rule()))
            .nth(n)
            .ok_or_else(|| syntax("missing operand", sp))?;
        self.expr(p)
    }

    fn enclosed(&self, pair: Pair<Rule>) -> Result<Option<Expr>> {
        match pair.into_inner().next() {
            Some(inner) => Ok(Some(self.expr(inner)?)),
            None => Ok(None),
        }
    }

    fn enclosed_or_empty(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        Ok(self
            .enclosed(pair)?
            .unwrap_or_else(|| Expr::new(ExprKind::EmptySequence, sp)))
    }

    fn logical(&self, pair: Pair<Rule>, op: BinaryOp) -> Result<Expr> {
        let sp = span(&pair);
        let mut operands = pair
            .into_inner()
            .filter(|p| !matches!(p.as_rule(), Rule::K_OR | Rule::K_AND));
        let first = operands.next().ok_or_else(|| syntax("empty expression", sp))?;
        let mut acc = self.expr(first)?;
        for p in operands {
            let right = self.expr(p)?;
            let whole = join(acc.span, right.span);
            acc = Expr::new(
                ExprKind::Binary {
                    left: Box::new(acc),
                    op,
                    right: Box::new(right),
                },
                whole,
            );
        }
        Ok(acc)
    }

    fn comparison(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let left = self.expr(inner.next().ok_or_else(|| syntax("empty comparison", sp))?)?;
        let Some(op) = inner.next() else {
            return Ok(left);
        };
        let right = self.expr(inner.next().ok_or_else(|| syntax("missing right operand", sp))?)?;
        let (left, right) = (Box::new(left), Box::new(right));
        let kind = match (op.as_rule(), op.as_str()) {
            (Rule::general_comp, s) => ExprKind::GeneralComparison {
                left,
                op: match s {
                    "=" => GeneralComp::Eq,
                    "!=" => GeneralComp::Ne,
                    "<" => GeneralComp::Lt,
                    "<=" => GeneralComp::Le,
                    ">" => GeneralComp::Gt,
                    _ => GeneralComp::Ge,
                },
                right,
            },
            (Rule::value_comp, s) => ExprKind::ValueComparison {
                left,
                op: match s {
                    "eq" => ValueComp::Eq,
                    "ne" => ValueComp::Ne,
                    "lt" => ValueComp::Lt,
                    "le" => ValueComp::Le,
                    "gt" => ValueComp::Gt,
                    _ => ValueComp::Ge,
                },
                right,
            },
            (Rule::node_comp, s) => ExprKind::NodeComparison {
                left,
                op: match s {
                    "is" => NodeComp::Is,
                    "<<" => NodeComp::Precedes,
                    _ => NodeComp::Follows,
                },
                right,
            },
            _ => return Err(unexpected(&op)),
        };
        Ok(Expr::new(kind, sp))
    }

    fn arithmetic(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.expr(inner.next().ok_or_else(|| syntax("empty expression", sp))?)?;
        while let Some(op) = inner.next() {
            let op = match op.as_str() {
                "+" => BinaryOp::Add,
                "-" => BinaryOp::Sub,
                "*" => BinaryOp::Mul,
                "div" => BinaryOp::Div,
                "idiv" => BinaryOp::IDiv,
                "mod" => BinaryOp::Mod,
                _ => return Err(unexpected(&op)),
            };
            let right = self.expr(inner.next().ok_or_else(|| syntax("missing right operand", sp))?)?;
            let whole = join(acc.span, right.span);
            acc = Expr::new(
                ExprKind::Binary {
                    left: Box::new(acc),
                    op,
                    right: Box::new(right),
                },
                whole,
            );
        }
        Ok(acc)
    }

    fn set_op(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.expr(inner.next().ok_or_else(|| syntax("empty expression", sp))?)?;
        while let Some(op) = inner.next() {
            let op = match op.as_str() {
                "union" | "|" => SetOp::Union,
                "intersect" => SetOp::Intersect,
                "except" => SetOp::Except,
                _ => return Err(unexpected(&op)),
            };
            let right = self.expr(inner.next().ok_or_else(|| syntax("missing right operand", sp))?)?;
            let whole = join(acc.span, right.span);
            acc = Expr::new(
                ExprKind::SetOp {
                    left: Box::new(acc),
                    op,
                    right: Box::new(right),
                },
                whole,
            );
        }
        Ok(acc)
    }

    fn type_op(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let rule = pair.as_rule();
        let mut inner = pair.into_inner();
        let operand = self.expr(inner.next().ok_or_else(|| syntax("empty expression", sp))?)?;
        let Some(ty) = inner.find(|p| matches!(p.as_rule(), Rule::sequence_type | Rule::single_type)) else {
            return Ok(operand);
        };
        let expr = Box::new(operand);
        let kind = match rule {
            Rule::instanceof_expr => ExprKind::InstanceOf {
                expr,
                ty: self.sequence_type(ty)?,
            },
            Rule::treat_expr => ExprKind::TreatAs {
                expr,
                ty: self.sequence_type(ty)?,
            },
            Rule::castable_expr => ExprKind::CastableAs {
                expr,
                ty: self.single_type(ty)?,
            },
            _ => ExprKind::CastAs {
                expr,
                ty: self.single_type(ty)?,
            },
        };
        Ok(Expr::new(kind, sp))
    }

    fn arrow(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.expr(inner.next().ok_or_else(|| syntax("empty expression", sp))?)?;
        while let Some(spec) = inner.next() {
            let list = inner
                .next()
                .ok_or_else(|| syntax("arrow without an argument list", sp))?;
            let whole = join(acc.span, span(&list));
            let mut args = vec![acc];
            args.extend(self.arguments(list)?);
            let target = only_child(spec)?;
            let kind = match target.as_rule() {
                Rule::eqname => ExprKind::FunctionCall {
                    name: self.qname(target)?,
                    args,
                },
                _ => ExprKind::DynamicCall {
                    function: Box::new(self.expr(target)?),
                    args,
                },
            };
            acc = Expr::new(kind, whole);
        }
        Ok(acc)
    }

    fn unary(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut signs = Vec::new();
        let mut operand = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::unary_op => signs.push(p.as_str() == "-"),
                _ => operand = Some(self.expr(p)?),
            }
        }
        let mut expr = operand.ok_or_else(|| syntax("missing operand", sp))?;
        for minus in signs.into_iter().rev() {
            let sign = if minus { UnarySign::Minus } else { UnarySign::Plus };
            expr = Expr::new(
                ExprKind::Unary {
                    sign,
                    expr: Box::new(expr),
                },
                sp,
            );
        }
        Ok(expr)
    }

    fn arguments(&self, pair: Pair<Rule>) -> Result<Vec<Expr>> {
        pair.into_inner().map(|p| self.expr(p)).collect()
    }

    // ===== Paths =====

    fn path(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let inner = only_child(pair)?;
        match inner.as_rule() {
            Rule::root_path => match inner.into_inner().next() {
                None => Ok(Expr::new(ExprKind::Root, sp)),
                Some(rel) => self.relative_path(rel, PathStart::Root, sp),
            },
            Rule::root_descendant_path => {
                let rel = only_child(inner)?;
                self.relative_path(rel, PathStart::RootDescendant, sp)
            }
            _ => self.relative_path(inner, PathStart::Relative, sp),
        }
    }

    fn relative_path(&self, pair: Pair<Rule>, start: PathStart, sp: Span) -> Result<Expr> {
        let mut steps = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::path_op => {
                    if p.as_str() == "//" {
                        steps.push(descendant_or_self_step(span(&p)));
                    }
                }
                _ => steps.push(self.expr(p)?),
            }
        }
        if start == PathStart::Relative && steps.len() == 1 {
            return steps.pop().ok_or_else(|| syntax("empty path", sp));
        }
        Ok(Expr::new(ExprKind::Path(PathExpr { start, steps }), sp))
    }

    fn axis_step(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let head = inner.next().ok_or_else(|| syntax("empty step", sp))?;
        let (axis, test) = self.step_head(head)?;
        let predicates = inner
            .map(|p| self.expr(only_child(p)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(Expr::new(
            ExprKind::AxisStep(Step {
                axis,
                test,
                predicates,
            }),
            sp,
        ))
    }

    fn step_head(&self, pair: Pair<Rule>) -> Result<(Axis, NodeTest)> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let first = inner.next().ok_or_else(|| syntax("empty step", sp))?;
        match first.as_rule() {
            Rule::forward_axis | Rule::reverse_axis => {
                let axis = axis_from_name(only_child(first)?.as_str());
                let test = inner.next().ok_or_else(|| syntax("missing node test", sp))?;
                Ok((axis, self.node_test(test)?))
            }
            Rule::abbrev_attribute_step => Ok((Axis::Attribute, self.node_test(only_child(first)?)?)),
            Rule::abbrev_reverse_step => Ok((Axis::Parent, NodeTest::Kind(KindTest::AnyKind))),
            Rule::node_test => {
                let test = self.node_test(first)?;
                let axis = match test {
                    NodeTest::Kind(KindTest::Attribute { .. } | KindTest::SchemaAttribute(_)) => {
                        Axis::Attribute
                    }
                    _ => Axis::Child,
                };
                Ok((axis, test))
            }
            _ => Err(unexpected(&first)),
        }
    }

    fn node_test(&self, pair: Pair<Rule>) -> Result<NodeTest> {
        let inner = only_child(pair)?;
        match inner.as_rule() {
            Rule::kind_test => Ok(NodeTest::Kind(self.kind_test(inner)?)),
            _ => Ok(NodeTest::Name(self.name_test(inner)?)),
        }
    }

    fn name_test(&self, pair: Pair<Rule>) -> Result<NameTest> {
        let inner = only_child(pair)?;
        match inner.as_rule() {
            Rule::wildcard => {
                let w = only_child(inner)?;
                let wildcard = match w.as_rule() {
                    Rule::any_wildcard => Wildcard::Any,
                    Rule::prefix_wildcard => Wildcard::Prefix(only_child(w)?.as_str().to_string()),
                    Rule::local_wildcard => Wildcard::Local(only_child(w)?.as_str().to_string()),
                    Rule::uri_wildcard => Wildcard::Uri(crate::types::lexical::collapse_whitespace(
                        w.into_inner().next().map(|p| p.as_str()).unwrap_or_default(),
                    )),
                    _ => return Err(unexpected(&w)),
                };
                Ok(NameTest::Wildcard(wildcard))
            }
            _ => Ok(NameTest::QName(self.qname(inner)?)),
        }
    }

    fn postfix(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut inner = pair.into_inner();
        let mut acc = self.expr(inner.next().ok_or_else(|| syntax("empty expression", sp))?)?;
        for p in inner {
            let whole = join(acc.span, span(&p));
            acc = match p.as_rule() {
                Rule::predicate => {
                    let predicate = self.expr(only_child(p)?)?;
                    match acc.kind {
                        ExprKind::Filter { base, mut predicates } => {
                            predicates.push(predicate);
                            Expr::new(ExprKind::Filter { base, predicates }, whole)
                        }
                        kind => Expr::new(
                            ExprKind::Filter {
                                base: Box::new(Expr::new(kind, acc.span)),
                                predicates: vec![predicate],
                            },
                            whole,
                        ),
                    }
                }
                Rule::argument_list => Expr::new(
                    ExprKind::DynamicCall {
                        function: Box::new(acc),
                        args: self.arguments(p)?,
                    },
                    whole,
                ),
                Rule::lookup => Expr::new(
                    ExprKind::Lookup {
                        base: Box::new(acc),
                        key: self.key_specifier(only_child(p)?)?,
                    },
                    whole,
                ),
                _ => return Err(unexpected(&p)),
            };
        }
        Ok(acc)
    }

    fn key_specifier(&self, pair: Pair<Rule>) -> Result<KeySpecifier> {
        let inner = only_child(pair)?;
        let sp = span(&inner);
        match inner.as_rule() {
            Rule::ncname => Ok(KeySpecifier::Name(inner.as_str().to_string())),
            Rule::integer_literal => inner
                .as_str()
                .parse::<i64>()
                .map(KeySpecifier::Integer)
                .map_err(|_| Error::from_code(ErrorCode::FOAR0002, "lookup key out of range").with_span(sp)),
            Rule::lookup_wildcard => Ok(KeySpecifier::Wildcard),
            _ => Ok(KeySpecifier::Expr(Box::new(self.expr(inner)?))),
        }
    }

    fn inline_function(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut params = Vec::new();
        let mut return_type = None;
        let mut body = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::param_list => params = self.params(p)?,
                Rule::sequence_type => return_type = Some(self.sequence_type(p)?),
                Rule::enclosed_expr => body = Some(self.enclosed_or_empty(p)?),
                _ => {}
            }
        }
        let body = body.ok_or_else(|| syntax("inline function without a body", sp))?;
        Ok(Expr::new(
            ExprKind::InlineFunction {
                params,
                return_type,
                body: Box::new(body),
            },
            sp,
        ))
    }

    // ===== XQuery expressions =====

    fn flwor(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut clauses = Vec::new();
        let mut return_expr = None;
        for c in pair.into_inner() {
            match c.as_rule() {
                Rule::for_clause => {
                    for b in c.into_inner().filter(|p| p.as_rule() == Rule::for_binding) {
                        clauses.push(Clause::For(self.for_binding(b)?));
                    }
                }
                Rule::let_clause => {
                    for b in c.into_inner().filter(|p| p.as_rule() == Rule::let_binding) {
                        let mut var = None;
                        let mut ty = None;
                        let mut value = None;
                        let bsp = span(&b);
                        for q in b.into_inner() {
                            match q.as_rule() {
                                Rule::eqname => var = Some(self.qname(q)?),
                                Rule::type_declaration => {
                                    self.require_xquery(&q, "typed let binding")?;
                                    ty = Some(self.type_declaration(q)?);
                                }
                                Rule::expr_single => value = Some(self.expr(q)?),
                                _ => {}
                            }
                        }
                        let (Some(var), Some(value)) = (var, value) else {
                            return Err(syntax("incomplete let binding", bsp));
                        };
                        clauses.push(Clause::Let(LetBinding { var, ty, value }));
                    }
                }
                Rule::where_clause => {
                    self.require_xquery(&c, "where clause")?;
                    clauses.push(Clause::Where(self.nth_expr(c, 0)?));
                }
                Rule::count_clause => {
                    self.require_xquery(&c, "count clause")?;
                    let csp = span(&c);
                    let var = c
                        .into_inner()
                        .find(|p| p.as_rule() == Rule::eqname)
                        .ok_or_else(|| syntax("count clause without a variable", csp))?;
                    clauses.push(Clause::Count(self.qname(var)?));
                }
                Rule::group_by_clause => {
                    self.require_xquery(&c, "group by clause")?;
                    let specs = c
                        .into_inner()
                        .filter(|p| p.as_rule() == Rule::grouping_spec)
                        .map(|p| self.grouping_spec(p))
                        .collect::<Result<Vec<_>>>()?;
                    clauses.push(Clause::GroupBy(specs));
                }
                Rule::order_by_clause => {
                    self.require_xquery(&c, "order by clause")?;
                    let mut stable = false;
                    let mut specs = Vec::new();
                    for p in c.into_inner() {
                        match p.as_rule() {
                            Rule::stable_marker => stable = true,
                            Rule::order_spec => specs.push(self.order_spec(p)?),
                            _ => {}
                        }
                    }
                    clauses.push(Clause::OrderBy { stable, specs });
                }
                Rule::return_clause => return_expr = Some(self.nth_expr(c, 0)?),
                _ => return Err(unexpected(&c)),
            }
        }
        let return_expr = return_expr.ok_or_else(|| syntax("FLWOR expression without return", sp))?;
        Ok(Expr::new(
            ExprKind::Flwor {
                clauses,
                return_expr: Box::new(return_expr),
            },
            sp,
        ))
    }

    fn for_binding(&self, pair: Pair<Rule>) -> Result<ForBinding> {
        let sp = span(&pair);
        let mut var = None;
        let mut ty = None;
        let mut allowing_empty = false;
        let mut position = None;
        let mut in_expr = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::eqname => var = Some(self.qname(p)?),
                Rule::type_declaration => {
                    self.require_xquery(&p, "typed for binding")?;
                    ty = Some(self.type_declaration(p)?);
                }
                Rule::allowing_empty => {
                    self.require_xquery(&p, "allowing empty")?;
                    allowing_empty = true;
                }
                Rule::positional_var => {
                    self.require_xquery(&p, "positional variable")?;
                    let v = p
                        .into_inner()
                        .find(|q| q.as_rule() == Rule::eqname)
                        .ok_or_else(|| syntax("positional variable without a name", sp))?;
                    position = Some(self.qname(v)?);
                }
                Rule::expr_single => in_expr = Some(self.expr(p)?),
                _ => {}
            }
        }
        let (Some(var), Some(in_expr)) = (var, in_expr) else {
            return Err(syntax("incomplete for binding", sp));
        };
        Ok(ForBinding {
            var,
            ty,
            allowing_empty,
            position,
            in_expr,
        })
    }

    fn grouping_spec(&self, pair: Pair<Rule>) -> Result<GroupingSpec> {
        let sp = span(&pair);
        let mut var = None;
        let mut ty = None;
        let mut value = None;
        let mut collation = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::eqname => var = Some(self.qname(p)?),
                Rule::type_declaration => ty = Some(self.type_declaration(p)?),
                Rule::expr_single => value = Some(self.expr(p)?),
                Rule::collation_spec => collation = Some(self.first_string(p)?),
                _ => {}
            }
        }
        Ok(GroupingSpec {
            var: var.ok_or_else(|| syntax("grouping spec without a variable", sp))?,
            ty,
            value,
            collation,
        })
    }

    fn order_spec(&self, pair: Pair<Rule>) -> Result<OrderSpec> {
        let sp = span(&pair);
        let mut expr = None;
        let mut descending = false;
        let mut empty_greatest = None;
        let mut collation = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::expr_single => expr = Some(self.expr(p)?),
                Rule::order_direction => descending = p.as_str() == "descending",
                Rule::empty_order_spec => {
                    empty_greatest = p
                        .into_inner()
                        .find(|q| q.as_rule() == Rule::empty_order)
                        .map(|q| q.as_str() == "greatest");
                }
                Rule::collation_spec => collation = Some(self.first_string(p)?),
                _ => {}
            }
        }
        Ok(OrderSpec {
            expr: expr.ok_or_else(|| syntax("order spec without an expression", sp))?,
            descending,
            empty_greatest,
            collation,
        })
    }

    fn quantified(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut kind = Quantifier::Some;
        let mut bindings = Vec::new();
        let mut satisfies = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::quantifier => {
                    if p.as_str() == "every" {
                        kind = Quantifier::Every;
                    }
                }
                Rule::quantified_binding => {
                    let bsp = span(&p);
                    let mut var = None;
                    let mut ty = None;
                    let mut in_expr = None;
                    for q in p.into_inner() {
                        match q.as_rule() {
                            Rule::eqname => var = Some(self.qname(q)?),
                            Rule::type_declaration => {
                                self.require_xquery(&q, "typed quantified binding")?;
                                ty = Some(self.type_declaration(q)?);
                            }
                            Rule::expr_single => in_expr = Some(self.expr(q)?),
                            _ => {}
                        }
                    }
                    let (Some(var), Some(in_expr)) = (var, in_expr) else {
                        return Err(syntax("incomplete quantified binding", bsp));
                    };
                    bindings.push(QuantifiedBinding { var, ty, in_expr });
                }
                Rule::expr_single => satisfies = Some(self.expr(p)?),
                _ => {}
            }
        }
        let satisfies = satisfies.ok_or_else(|| syntax("quantified expression without satisfies", sp))?;
        Ok(Expr::new(
            ExprKind::Quantified {
                kind,
                bindings,
                satisfies: Box::new(satisfies),
            },
            sp,
        ))
    }

    fn if_expr(&self, pair: Pair<Rule>) -> Result<Expr> {
        let sp = span(&pair);
        let mut parts = self.exprs(pair)?.into_iter();
        let (Some(cond), Some(then_expr), Some(else_expr)) = (parts.next(), parts.next(), parts.next())
        else {
            return Err(syntax("incomplete if expression", sp));
        };
        Ok(Expr::new(
            ExprKind::IfThenElse {
                cond: Box::new(cond),
                then_expr: Box::new(then_expr),
                else_expr: Box::new(else_expr),
            },
            sp,
        ))
    }

    fn switch(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_xquery(&pair, "switch expression")?;
        let sp = span(&pair);
        let mut operand = None;
        let mut cases = Vec::new();
        let mut default = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::expr => operand = Some(self.expr(p)?),
                Rule::switch_case_clause => {
                    let mut values = self.exprs(p)?;
                    let result = values
                        .pop()
                        .ok_or_else(|| syntax("switch case without a result", sp))?;
                    cases.push(SwitchCase { values, result });
                }
                Rule::expr_single => default = Some(self.expr(p)?),
                _ => {}
            }
        }
        let (Some(operand), Some(default)) = (operand, default) else {
            return Err(syntax("incomplete switch expression", sp));
        };
        Ok(Expr::new(
            ExprKind::Switch {
                operand: Box::new(operand),
                cases,
                default: Box::new(default),
            },
            sp,
        ))
    }

    fn typeswitch(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_xquery(&pair, "typeswitch expression")?;
        let sp = span(&pair);
        let mut operand = None;
        let mut cases = Vec::new();
        let mut default_var = None;
        let mut default = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::expr => operand = Some(self.expr(p)?),
                Rule::case_clause => {
                    let csp = span(&p);
                    let mut var = None;
                    let mut types = Vec::new();
                    let mut result = None;
                    for q in p.into_inner() {
                        match q.as_rule() {
                            Rule::eqname => var = Some(self.qname(q)?),
                            Rule::sequence_type => types.push(self.sequence_type(q)?),
                            Rule::expr_single => result = Some(self.expr(q)?),
                            _ => {}
                        }
                    }
                    let result = result.ok_or_else(|| syntax("case clause without a result", csp))?;
                    cases.push(TypeswitchCase { var, types, result });
                }
                Rule::eqname => default_var = Some(self.qname(p)?),
                Rule::expr_single => default = Some(self.expr(p)?),
                _ => {}
            }
        }
        let (Some(operand), Some(default)) = (operand, default) else {
            return Err(syntax("incomplete typeswitch expression", sp));
        };
        Ok(Expr::new(
            ExprKind::Typeswitch {
                operand: Box::new(operand),
                cases,
                default_var,
                default: Box::new(default),
            },
            sp,
        ))
    }

    fn try_catch(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_xquery(&pair, "try/catch expression")?;
        let sp = span(&pair);
        let mut body = None;
        let mut catches = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::enclosed_expr => body = Some(self.enclosed_or_empty(p)?),
                Rule::catch_clause => {
                    let mut tests = Vec::new();
                    let mut handler = None;
                    for q in p.into_inner() {
                        match q.as_rule() {
                            Rule::name_test => tests.push(self.name_test(q)?),
                            Rule::enclosed_expr => handler = Some(self.enclosed_or_empty(q)?),
                            _ => {}
                        }
                    }
                    let body = handler.ok_or_else(|| syntax("catch clause without a body", sp))?;
                    catches.push(CatchClause { tests, body });
                }
                _ => {}
            }
        }
        let body = body.ok_or_else(|| syntax("try without a body", sp))?;
        Ok(Expr::new(
            ExprKind::TryCatch {
                body: Box::new(body),
                catches,
            },
            sp,
        ))
    }

    fn insert(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_updates(&pair)?;
        let sp = span(&pair);
        let mut exprs = Vec::new();
        let mut position = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::expr_single => exprs.push(self.expr(p)?),
                Rule::insertion_target => {
                    position = Some(match only_child(p)?.as_rule() {
                        Rule::insert_as_first => InsertPosition::AsFirstInto,
                        Rule::insert_as_last => InsertPosition::AsLastInto,
                        Rule::insert_before => InsertPosition::Before,
                        Rule::insert_after => InsertPosition::After,
                        _ => InsertPosition::Into,
                    });
                }
                _ => {}
            }
        }
        let mut exprs = exprs.into_iter();
        let (Some(source), Some(position), Some(target)) = (exprs.next(), position, exprs.next()) else {
            return Err(syntax("incomplete insert expression", sp));
        };
        Ok(Expr::new(
            ExprKind::Insert {
                source: Box::new(source),
                position,
                target: Box::new(target),
            },
            sp,
        ))
    }

    fn replace(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_updates(&pair)?;
        let sp = span(&pair);
        let mut value_of = false;
        let mut exprs = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::value_of => value_of = true,
                Rule::expr_single => exprs.push(self.expr(p)?),
                _ => {}
            }
        }
        let mut exprs = exprs.into_iter();
        let (Some(target), Some(with)) = (exprs.next(), exprs.next()) else {
            return Err(syntax("incomplete replace expression", sp));
        };
        let (target, with) = (Box::new(target), Box::new(with));
        let kind = if value_of {
            ExprKind::ReplaceValue {
                target,
                value: with,
            }
        } else {
            ExprKind::ReplaceNode {
                target,
                replacement: with,
            }
        };
        Ok(Expr::new(kind, sp))
    }

    fn transform(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_updates(&pair)?;
        let sp = span(&pair);
        let mut bindings = Vec::new();
        let mut exprs = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::copy_binding => {
                    let bsp = span(&p);
                    let mut var = None;
                    let mut value = None;
                    for q in p.into_inner() {
                        match q.as_rule() {
                            Rule::eqname => var = Some(self.qname(q)?),
                            Rule::expr_single => value = Some(self.expr(q)?),
                            _ => {}
                        }
                    }
                    let (Some(var), Some(value)) = (var, value) else {
                        return Err(syntax("incomplete copy binding", bsp));
                    };
                    bindings.push((var, value));
                }
                Rule::expr_single => exprs.push(self.expr(p)?),
                _ => {}
            }
        }
        let mut exprs = exprs.into_iter();
        let (Some(modify), Some(return_expr)) = (exprs.next(), exprs.next()) else {
            return Err(syntax("incomplete copy/modify expression", sp));
        };
        Ok(Expr::new(
            ExprKind::Transform {
                bindings,
                modify: Box::new(modify),
                return_expr: Box::new(return_expr),
            },
            sp,
        ))
    }

    // ===== Constructors =====

    fn computed_constructor(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_xquery(&pair, "computed constructor")?;
        let sp = span(&pair);
        let rule = pair.as_rule();
        let mut name = None;
        let mut content = None;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::eqname => name = Some(ConstructorName::Literal(self.qname(p)?)),
                Rule::ncname => name = Some(ConstructorName::Literal(QName::local(p.as_str()))),
                Rule::computed_name => {
                    name = Some(ConstructorName::Computed(Box::new(self.expr(only_child(p)?)?)));
                }
                Rule::enclosed_expr => content = self.enclosed(p)?.map(Box::new),
                _ => {}
            }
        }
        let named = |name: Option<ConstructorName>| {
            name.ok_or_else(|| syntax("constructor without a name", sp))
        };
        let kind = match rule {
            Rule::comp_doc_constructor => ExprKind::CompDocument(content),
            Rule::comp_elem_constructor => ExprKind::CompElement {
                name: named(name)?,
                content,
            },
            Rule::comp_attr_constructor => ExprKind::CompAttribute {
                name: named(name)?,
                content,
            },
            Rule::comp_text_constructor => ExprKind::CompText(content),
            Rule::comp_comment_constructor => ExprKind::CompComment(content),
            _ => ExprKind::CompPi {
                target: named(name)?,
                content,
            },
        };
        Ok(Expr::new(kind, sp))
    }

    fn dir_element(&self, pair: Pair<Rule>) -> Result<Expr> {
        self.require_xquery(&pair, "direct element constructor")?;
        let sp = span(&pair);
        let mut start_tag: Option<(String, QName)> = None;
        let mut end_tag = None;
        let mut namespaces: Vec<(String, String)> = Vec::new();
        let mut attributes: Vec<DirAttribute> = Vec::new();
        let mut content = Vec::new();
        let mut run = TextRun::default();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::qname => start_tag = Some((p.as_str().to_string(), self.qname(p)?)),
                Rule::end_tag_name => end_tag = Some((p.as_str().to_string(), span(&p))),
                Rule::dir_attribute => self.dir_attribute(p, &mut namespaces, &mut attributes)?,
                Rule::elem_text => run.push_literal(p.as_str()),
                Rule::cdata_section => {
                    run.push_verbatim(p.into_inner().next().map(|t| t.as_str()).unwrap_or_default());
                }
                Rule::char_ref | Rule::predefined_entity_ref => {
                    run.push_verbatim(&decode_reference(p.as_str(), span(&p))?);
                }
                Rule::escaped_lbrace => run.push_verbatim("{"),
                Rule::escaped_rbrace => run.push_verbatim("}"),
                Rule::enclosed_content => {
                    self.flush_text(&mut run, &mut content);
                    if let Some(inner) = p.into_inner().next() {
                        content.push(DirContent::Enclosed(self.expr(inner)?));
                    }
                }
                Rule::dir_elem_constructor | Rule::dir_comment_constructor | Rule::dir_pi_constructor => {
                    self.flush_text(&mut run, &mut content);
                    content.push(DirContent::Node(self.expr(p)?));
                }
                _ => return Err(unexpected(&p)),
            }
        }
        self.flush_text(&mut run, &mut content);
        let (start_lexical, name) = start_tag.ok_or_else(|| syntax("element without a name", sp))?;
        if let Some((end_lexical, end_span)) = end_tag
            && end_lexical != start_lexical
        {
            return Err(Error::from_code(
                ErrorCode::XQST0118,
                format!("end tag </{end_lexical}> does not match start tag <{start_lexical}>"),
            )
            .with_span(end_span));
        }
        Ok(Expr::new(
            ExprKind::DirElement(DirElement {
                name,
                namespaces,
                attributes,
                content,
            }),
            sp,
        ))
    }

    fn flush_text(&self, run: &mut TextRun, content: &mut Vec<DirContent>) {
        let taken = std::mem::take(run);
        if taken.text.is_empty() || (taken.boundary && !self.boundary_preserve.get()) {
            return;
        }
        content.push(DirContent::Text(taken.text));
    }

    fn dir_attribute(
        &self,
        pair: Pair<Rule>,
        namespaces: &mut Vec<(String, String)>,
        attributes: &mut Vec<DirAttribute>,
    ) -> Result<()> {
        let sp = span(&pair);
        let mut name = None;
        let mut value = Vec::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::qname => name = Some(self.qname(p)?),
                Rule::dir_attr_value => value = self.attr_value(p)?,
                _ => {}
            }
        }
        let name = name.ok_or_else(|| syntax("attribute without a name", sp))?;
        let ns_prefix = match (&name.prefix, name.local.as_str()) {
            (None, "xmlns") => Some(String::new()),
            (Some(p), local) if p == "xmlns" => Some(local.to_string()),
            _ => None,
        };
        if let Some(prefix) = ns_prefix {
            let mut uri = String::new();
            for part in value {
                match part {
                    AttrValuePart::Text(t) => uri.push_str(&t),
                    AttrValuePart::Enclosed(e) => {
                        return Err(Error::from_code(
                            ErrorCode::XQST0022,
                            "namespace declaration attributes must have a literal value",
                        )
                        .with_span(e.span));
                    }
                }
            }
            if prefix == "xmlns"
                || (prefix == "xml" && uri != crate::consts::XML_URI)
                || (prefix != "xml" && uri == crate::consts::XML_URI)
            {
                return Err(Error::from_code(
                    ErrorCode::XQST0070,
                    format!("invalid namespace declaration for prefix '{prefix}'"),
                )
                .with_span(sp));
            }
            if namespaces.iter().any(|(p, _)| *p == prefix) {
                return Err(Error::from_code(
                    ErrorCode::XQST0071,
                    format!("namespace prefix '{prefix}' declared twice on one element"),
                )
                .with_span(sp));
            }
            namespaces.push((prefix, uri));
            return Ok(());
        }
        if attributes.iter().any(|a| a.name == name) {
            return Err(Error::from_code(
                ErrorCode::XQST0040,
                format!("duplicate attribute {name}"),
            )
            .with_span(sp));
        }
        attributes.push(DirAttribute {
            name,
            value,
            span: sp,
        });
        Ok(())
    }

    fn attr_value(&self, pair: Pair<Rule>) -> Result<Vec<AttrValuePart>> {
        let mut parts = Vec::new();
        let mut text = String::new();
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::quot_attr_text | Rule::apos_attr_text => {
                    let normalized = p.as_str().replace("\r\n", " ");
                    text.extend(normalized.chars().map(|c| match c {
                        '\t' | '\n' | '\r' => ' ',
                        other => other,
                    }));
                }
                Rule::escaped_quot => text.push('"'),
                Rule::escaped_apos => text.push('\''),
                Rule::escaped_lbrace => text.push('{'),
                Rule::escaped_rbrace => text.push('}'),
                Rule::char_ref | Rule::predefined_entity_ref => {
                    text.push_str(&decode_reference(p.as_str(), span(&p))?);
                }
                Rule::enclosed_content => {
                    if !text.is_empty() {
                        parts.push(AttrValuePart::Text(std::mem::take(&mut text)));
                    }
                    if let Some(inner) = p.into_inner().next() {
                        parts.push(AttrValuePart::Enclosed(self.expr(inner)?));
                    }
                }
                _ => return Err(unexpected(&p)),
            }
        }
        if !text.is_empty() {
            parts.push(AttrValuePart::Text(text));
        }
        Ok(parts)
    }

    // ===== Types =====

    fn single_type(&self, pair: Pair<Rule>) -> Result<SingleType> {
        let sp = span(&pair);
        let mut atomic = None;
        let mut optional = false;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::eqname => atomic = Some(self.qname(p)?),
                Rule::optional_marker => optional = true,
                _ => {}
            }
        }
        Ok(SingleType {
            atomic: atomic.ok_or_else(|| syntax("expected a type name", sp))?,
            optional,
        })
    }

    fn sequence_type(&self, pair: Pair<Rule>) -> Result<SequenceType> {
        let sp = span(&pair);
        let mut item = None;
        let mut occ = Occurrence::ExactlyOne;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::empty_sequence_type => return Ok(SequenceType::EmptySequence),
                Rule::item_type => item = Some(self.item_type(p)?),
                Rule::occurrence_indicator => {
                    occ = match p.as_str() {
                        "?" => Occurrence::ZeroOrOne,
                        "*" => Occurrence::ZeroOrMore,
                        _ => Occurrence::OneOrMore,
                    };
                }
                _ => {}
            }
        }
        Ok(SequenceType::Typed {
            item: item.ok_or_else(|| syntax("expected an item type", sp))?,
            occ,
        })
    }

    fn item_type(&self, pair: Pair<Rule>) -> Result<ItemType> {
        let inner = only_child(pair)?;
        let sp = span(&inner);
        match inner.as_rule() {
            Rule::kind_test => Ok(ItemType::Kind(self.kind_test(inner)?)),
            Rule::any_item_type => Ok(ItemType::Item),
            Rule::parenthesized_item_type => self.item_type(only_child(inner)?),
            Rule::eqname => Ok(ItemType::Atomic(self.qname(inner)?)),
            Rule::function_test => {
                let test = inner
                    .into_inner()
                    .find(|p| matches!(p.as_rule(), Rule::any_function_test | Rule::typed_function_test))
                    .ok_or_else(|| syntax("expected a function test", sp))?;
                if test.as_rule() == Rule::any_function_test {
                    return Ok(ItemType::AnyFunction);
                }
                let mut types = test
                    .into_inner()
                    .filter(|p| p.as_rule() == Rule::sequence_type)
                    .map(|p| self.sequence_type(p))
                    .collect::<Result<Vec<_>>>()?;
                let ret = types
                    .pop()
                    .ok_or_else(|| syntax("function test without a return type", sp))?;
                Ok(ItemType::Function {
                    params: types,
                    ret: Box::new(ret),
                })
            }
            Rule::map_test => {
                let test = only_child(inner)?;
                if test.as_rule() == Rule::any_map_test {
                    return Ok(ItemType::AnyMap);
                }
                let mut key = None;
                let mut value = None;
                for p in test.into_inner() {
                    match p.as_rule() {
                        Rule::eqname => key = Some(self.qname(p)?),
                        Rule::sequence_type => value = Some(self.sequence_type(p)?),
                        _ => {}
                    }
                }
                let (Some(key), Some(value)) = (key, value) else {
                    return Err(syntax("incomplete map test", sp));
                };
                Ok(ItemType::Map {
                    key,
                    value: Box::new(value),
                })
            }
            Rule::array_test => {
                let test = only_child(inner)?;
                if test.as_rule() == Rule::any_array_test {
                    return Ok(ItemType::AnyArray);
                }
                let member = self.sequence_type(only_child(test)?)?;
                Ok(ItemType::Array(Box::new(member)))
            }
            _ => Err(unexpected(&inner)),
        }
    }

    fn kind_test(&self, pair: Pair<Rule>) -> Result<KindTest> {
        let inner = only_child(pair)?;
        match inner.as_rule() {
            Rule::any_kind_test => Ok(KindTest::AnyKind),
            Rule::text_test => Ok(KindTest::Text),
            Rule::comment_test => Ok(KindTest::Comment),
            Rule::namespace_node_test => Ok(KindTest::NamespaceNode),
            Rule::document_test => match inner.into_inner().next() {
                None => Ok(KindTest::Document(None)),
                Some(p) => {
                    let element = match p.as_rule() {
                        Rule::element_test => self.element_test(p)?,
                        _ => KindTest::SchemaElement(self.qname(only_child(p)?)?),
                    };
                    Ok(KindTest::Document(Some(Box::new(element))))
                }
            },
            Rule::pi_test => match inner.into_inner().next() {
                None => Ok(KindTest::ProcessingInstruction(None)),
                Some(p) if p.as_rule() == Rule::string_literal => Ok(KindTest::ProcessingInstruction(
                    Some(crate::types::lexical::collapse_whitespace(&self.string_literal(&p)?)),
                )),
                Some(p) => Ok(KindTest::ProcessingInstruction(Some(p.as_str().to_string()))),
            },
            Rule::element_test => self.element_test(inner),
            Rule::attribute_test => {
                let mut name = None;
                let mut ty = None;
                for p in inner.into_inner() {
                    match p.as_rule() {
                        Rule::name_or_wildcard => name = Some(self.name_or_wildcard(p)?),
                        Rule::eqname => ty = Some(self.qname(p)?),
                        _ => {}
                    }
                }
                Ok(KindTest::Attribute { name, ty })
            }
            Rule::schema_element_test => Ok(KindTest::SchemaElement(self.qname(only_child(inner)?)?)),
            Rule::schema_attribute_test => {
                Ok(KindTest::SchemaAttribute(self.qname(only_child(inner)?)?))
            }
            _ => Err(unexpected(&inner)),
        }
    }

    fn element_test(&self, pair: Pair<Rule>) -> Result<KindTest> {
        let mut name = None;
        let mut ty = None;
        let mut nillable = false;
        for p in pair.into_inner() {
            match p.as_rule() {
                Rule::name_or_wildcard => name = Some(self.name_or_wildcard(p)?),
                Rule::eqname => ty = Some(self.qname(p)?),
                Rule::optional_marker => nillable = true,
                _ => {}
            }
        }
        Ok(KindTest::Element { name, ty, nillable })
    }

    fn name_or_wildcard(&self, pair: Pair<Rule>) -> Result<NameOrWildcard> {
        let inner = only_child(pair)?;
        match inner.as_rule() {
            Rule::any_wildcard => Ok(NameOrWildcard::Any),
            _ => Ok(NameOrWildcard::Name(self.qname(inner)?)),
        }
    }
}

fn axis_from_name(name: &str) -> Axis {
    match name {
        "descendant" => Axis::Descendant,
        "descendant-or-self" => Axis::DescendantOrSelf,
        "attribute" => Axis::Attribute,
        "self" => Axis::SelfAxis,
        "following-sibling" => Axis::FollowingSibling,
        "following" => Axis::Following,
        "namespace" => Axis::Namespace,
        "parent" => Axis::Parent,
        "ancestor" => Axis::Ancestor,
        "ancestor-or-self" => Axis::AncestorOrSelf,
        "preceding-sibling" => Axis::PrecedingSibling,
        "preceding" => Axis::Preceding,
        _ => Axis::Child,
    }
}

fn descendant_or_self_step(span: Span) -> Expr {
    Expr::new(
        ExprKind::AxisStep(Step {
            axis: Axis::DescendantOrSelf,
            test: NodeTest::Kind(KindTest::AnyKind),
            predicates: Vec::new(),
        }),
        span,
    )
}

/// Expand `&lt;`-style entity and character references.
fn decode_references(raw: &str, span: Span) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(i) = rest.find('&') {
        out.push_str(&rest[..i]);
        let tail = &rest[i..];
        let end = tail
            .find(';')
            .ok_or_else(|| syntax("unterminated entity reference", span))?;
        out.push_str(&decode_reference(&tail[..=end], span)?);
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn decode_reference(reference: &str, span: Span) -> Result<String> {
    let body = reference
        .strip_prefix('&')
        .and_then(|s| s.strip_suffix(';'))
        .ok_or_else(|| syntax(format!("invalid reference {reference}"), span))?;
    let ch = match body {
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "quot" => '"',
        "apos" => '\'',
        _ => {
            let code = if let Some(hex) = body.strip_prefix("#x") {
                u32::from_str_radix(hex, 16).ok()
            } else if let Some(dec) = body.strip_prefix('#') {
                dec.parse::<u32>().ok()
            } else {
                return Err(syntax(format!("unknown entity reference {reference}"), span));
            };
            code.and_then(char::from_u32)
                .filter(|c| is_xml_char(*c))
                .ok_or_else(|| {
                    Error::from_code(
                        ErrorCode::XQST0090,
                        format!("{reference} does not denote an XML character"),
                    )
                    .with_span(span)
                })?
        }
    };
    Ok(ch.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(q: &str) -> ExprKind {
        parse_expr(q, Language::XQueryUpdate31).unwrap().kind
    }

    #[test]
    fn double_slash_expands_to_descendant_or_self() {
        let ExprKind::Path(path) = body("a//b") else {
            panic!("expected path")
        };
        assert_eq!(path.steps.len(), 3);
        assert!(matches!(
            &path.steps[1].kind,
            ExprKind::AxisStep(Step {
                axis: Axis::DescendantOrSelf,
                ..
            })
        ));
    }

    #[test]
    fn keywords_are_names_in_paths() {
        let ExprKind::Path(path) = body("for/return") else {
            panic!("expected path")
        };
        assert_eq!(path.steps.len(), 2);
    }

    #[test]
    fn string_literal_escapes() {
        assert_eq!(
            body(r#""a""b&amp;""#),
            ExprKind::Literal(Literal::String("a\"b&".to_string()))
        );
        let xpath = parse_expr("'&amp;'", Language::XPath31).unwrap().kind;
        assert_eq!(xpath, ExprKind::Literal(Literal::String("&amp;".to_string())));
    }

    #[test]
    fn boundary_whitespace_is_stripped() {
        let ExprKind::DirElement(el) = body("<a>  <b/>  {1}</a>") else {
            panic!("expected element")
        };
        assert_eq!(el.content.len(), 2);
    }

    #[test]
    fn mismatched_end_tag() {
        let err = parse_expr("<a></b>", Language::XQuery31).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XQST0118);
    }

    #[test]
    fn xquery_constructs_rejected_in_xpath() {
        let err = parse_expr("<a/>", Language::XPath31).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0003);
        let err = parse_expr("delete node .", Language::XQuery31).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPST0003);
    }

    #[test]
    fn arrow_desugars_to_call() {
        let ExprKind::FunctionCall { name, args } = body("'a' => upper-case()") else {
            panic!("expected call")
        };
        assert_eq!(name.local, "upper-case");
        assert_eq!(args.len(), 1);
    }
}
