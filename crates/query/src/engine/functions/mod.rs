//! Builtin function library.
//!
//! Every function is registered once, by signature and implementation, through
//! [`register_default_functions`]. The signature-only view feeds the static context,
//! the full registry the dynamic one. Arguments reach an implementation already
//! converted to the declared parameter types.
use crate::consts::{ARRAY_NS, FNS, MAP_NS, MATH_NS, XS};
use crate::engine::runtime::{CallCtx, Error, FunctionRegistry, FunctionSignature, FunctionSignatures};
use crate::model::XdmNode;
use crate::types::{Kind, SequenceType, XS_NAMES};
use crate::xdm::{ExpandedName, XdmSequence};
use std::sync::Arc;

pub mod arrays;
pub mod boolean;
mod common;
pub mod constructors;
pub mod context;
pub mod datetime;
pub mod diagnostics;
pub mod higher_order;
pub mod maps;
pub mod numeric;
pub mod regex;
pub mod sequences;
pub mod strings;

pub use sequences::deep_equal;

type Builtin<N> = fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error>;

fn seq_type(text: &str) -> SequenceType {
    let parsed = SequenceType::parse_builtin(text);
    debug_assert!(parsed.is_some(), "bad builtin signature type {text}");
    parsed.unwrap_or_else(SequenceType::any)
}

/// Declarative signature used by the registration table.
struct Sig {
    ns: &'static str,
    local: &'static str,
    params: &'static [&'static str],
    ret: &'static str,
    variadic: bool,
    focus: bool,
    updating: bool,
}

fn sig(local: &'static str, params: &'static [&'static str], ret: &'static str) -> Sig {
    Sig {
        ns: FNS,
        local,
        params,
        ret,
        variadic: false,
        focus: false,
        updating: false,
    }
}

impl Sig {
    fn ns(mut self, ns: &'static str) -> Self {
        self.ns = ns;
        self
    }

    fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    /// Reads the context item when called.
    fn focus(mut self) -> Self {
        self.focus = true;
        self
    }

    fn updating(mut self) -> Self {
        self.updating = true;
        self
    }

    fn build(&self) -> FunctionSignature {
        FunctionSignature {
            name: ExpandedName::ns(self.ns, self.local),
            params: self.params.iter().map(|p| seq_type(p)).collect(),
            variadic: self.variadic,
            return_type: seq_type(self.ret),
            uses_focus: self.focus,
            updating: self.updating,
        }
    }
}

struct Library<'a, N> {
    reg: Option<&'a mut FunctionRegistry<N>>,
    sigs: Option<&'a mut FunctionSignatures>,
}

impl<N: XdmNode> Library<'_, N> {
    fn add(&mut self, sig: Sig, f: Builtin<N>) {
        let signature = sig.build();
        if let Some(s) = self.sigs.as_mut() {
            s.register(signature.clone());
        }
        if let Some(r) = self.reg.as_mut() {
            r.register_fn(signature, f);
        }
    }

    fn add_signature<F>(&mut self, signature: FunctionSignature, f: F)
    where
        F: Fn(&CallCtx<'_, N>, &[XdmSequence<N>]) -> Result<XdmSequence<N>, Error> + Send + Sync + 'static,
    {
        if let Some(s) = self.sigs.as_mut() {
            s.register(signature.clone());
        }
        if let Some(r) = self.reg.as_mut() {
            r.register_fn(signature, f);
        }
    }
}

fn register_default_functions<N: XdmNode>(
    reg: Option<&mut FunctionRegistry<N>>,
    sigs: Option<&mut FunctionSignatures>,
) {
    let mut lib = Library { reg, sigs };
    register_context(&mut lib);
    register_diagnostics(&mut lib);
    register_numeric(&mut lib);
    register_strings(&mut lib);
    register_regex(&mut lib);
    register_sequences(&mut lib);
    register_higher_order(&mut lib);
    register_maps(&mut lib);
    register_arrays(&mut lib);
    register_dates(&mut lib);
    register_update(&mut lib);
    register_constructors(&mut lib);
}

fn register_context<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("true", &[], "xs:boolean"), boolean::true_fn::<N>);
    lib.add(sig("false", &[], "xs:boolean"), boolean::false_fn::<N>);
    lib.add(sig("not", &["item()*"], "xs:boolean"), boolean::not_fn::<N>);
    lib.add(sig("boolean", &["item()*"], "xs:boolean"), boolean::boolean_fn::<N>);
    lib.add(sig("position", &[], "xs:integer").focus(), context::focus_only_fn::<N>);
    lib.add(sig("last", &[], "xs:integer").focus(), context::focus_only_fn::<N>);
    lib.add(sig("data", &[], "xs:anyAtomicType*").focus(), context::data_fn::<N>);
    lib.add(sig("data", &["item()*"], "xs:anyAtomicType*"), context::data_fn::<N>);
    lib.add(sig("string", &[], "xs:string").focus(), context::string_fn::<N>);
    lib.add(sig("string", &["item()?"], "xs:string"), context::string_fn::<N>);
    lib.add(sig("number", &[], "xs:double").focus(), context::number_fn::<N>);
    lib.add(sig("number", &["xs:anyAtomicType?"], "xs:double"), context::number_fn::<N>);
    lib.add(sig("root", &[], "node()").focus(), context::root_fn::<N>);
    lib.add(sig("root", &["node()?"], "node()?"), context::root_fn::<N>);
    lib.add(sig("name", &[], "xs:string").focus(), context::name_fn::<N>);
    lib.add(sig("name", &["node()?"], "xs:string"), context::name_fn::<N>);
    lib.add(sig("local-name", &[], "xs:string").focus(), context::local_name_fn::<N>);
    lib.add(sig("local-name", &["node()?"], "xs:string"), context::local_name_fn::<N>);
    lib.add(sig("namespace-uri", &[], "xs:anyURI").focus(), context::namespace_uri_fn::<N>);
    lib.add(sig("namespace-uri", &["node()?"], "xs:anyURI"), context::namespace_uri_fn::<N>);
    lib.add(sig("node-name", &[], "xs:QName?").focus(), context::node_name_fn::<N>);
    lib.add(sig("node-name", &["node()?"], "xs:QName?"), context::node_name_fn::<N>);
}

fn register_diagnostics<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("error", &[], "item()*"), diagnostics::error_fn::<N>);
    lib.add(sig("error", &["xs:QName?"], "item()*"), diagnostics::error_fn::<N>);
    lib.add(sig("error", &["xs:QName?", "xs:string"], "item()*"), diagnostics::error_fn::<N>);
    lib.add(sig("error", &["xs:QName?", "xs:string", "item()*"], "item()*"), diagnostics::error_fn::<N>);
    lib.add(sig("trace", &["item()*"], "item()*"), diagnostics::trace_fn::<N>);
    lib.add(sig("trace", &["item()*", "xs:string"], "item()*"), diagnostics::trace_fn::<N>);
}

fn register_numeric<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("abs", &["xs:numeric?"], "xs:numeric?"), numeric::abs_fn::<N>);
    lib.add(sig("ceiling", &["xs:numeric?"], "xs:numeric?"), numeric::ceiling_fn::<N>);
    lib.add(sig("floor", &["xs:numeric?"], "xs:numeric?"), numeric::floor_fn::<N>);
    lib.add(sig("round", &["xs:numeric?"], "xs:numeric?"), numeric::round_fn::<N>);
    lib.add(sig("round", &["xs:numeric?", "xs:integer"], "xs:numeric?"), numeric::round_fn::<N>);
    lib.add(sig("round-half-to-even", &["xs:numeric?"], "xs:numeric?"), numeric::round_half_to_even_fn::<N>);
    lib.add(
        sig("round-half-to-even", &["xs:numeric?", "xs:integer"], "xs:numeric?"),
        numeric::round_half_to_even_fn::<N>,
    );
    lib.add(sig("sum", &["xs:anyAtomicType*"], "xs:anyAtomicType"), numeric::sum_fn::<N>);
    lib.add(sig("sum", &["xs:anyAtomicType*", "xs:anyAtomicType?"], "xs:anyAtomicType?"), numeric::sum_fn::<N>);
    lib.add(sig("avg", &["xs:anyAtomicType*"], "xs:anyAtomicType?"), numeric::avg_fn::<N>);
    lib.add(sig("min", &["xs:anyAtomicType*"], "xs:anyAtomicType?"), numeric::min_fn::<N>);
    lib.add(sig("min", &["xs:anyAtomicType*", "xs:string"], "xs:anyAtomicType?"), numeric::min_fn::<N>);
    lib.add(sig("max", &["xs:anyAtomicType*"], "xs:anyAtomicType?"), numeric::max_fn::<N>);
    lib.add(sig("max", &["xs:anyAtomicType*", "xs:string"], "xs:anyAtomicType?"), numeric::max_fn::<N>);
    lib.add(sig("count", &["item()*"], "xs:integer"), numeric::count_fn::<N>);
    lib.add(sig("pi", &[], "xs:double").ns(MATH_NS), numeric::pi_fn::<N>);
    lib.add(sig("sqrt", &["xs:double?"], "xs:double?").ns(MATH_NS), numeric::sqrt_fn::<N>);
    lib.add(sig("pow", &["xs:double?", "xs:numeric"], "xs:double?").ns(MATH_NS), numeric::pow_fn::<N>);
}

fn register_strings<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(
        sig("concat", &["xs:anyAtomicType?", "xs:anyAtomicType?", "xs:anyAtomicType?"], "xs:string").variadic(),
        strings::concat_fn::<N>,
    );
    lib.add(sig("string-join", &["xs:anyAtomicType*"], "xs:string"), strings::string_join_fn::<N>);
    lib.add(sig("string-join", &["xs:anyAtomicType*", "xs:string"], "xs:string"), strings::string_join_fn::<N>);
    lib.add(sig("string-length", &[], "xs:integer").focus(), strings::string_length_fn::<N>);
    lib.add(sig("string-length", &["xs:string?"], "xs:integer"), strings::string_length_fn::<N>);
    lib.add(sig("substring", &["xs:string?", "xs:double"], "xs:string"), strings::substring_fn::<N>);
    lib.add(sig("substring", &["xs:string?", "xs:double", "xs:double"], "xs:string"), strings::substring_fn::<N>);
    for (name, f) in [
        ("substring-before", strings::substring_before_fn::<N> as Builtin<N>),
        ("substring-after", strings::substring_after_fn::<N>),
    ] {
        lib.add(sig(name, &["xs:string?", "xs:string?"], "xs:string"), f);
        lib.add(sig(name, &["xs:string?", "xs:string?", "xs:string"], "xs:string"), f);
    }
    for (name, f) in [
        ("contains", strings::contains_fn::<N> as Builtin<N>),
        ("starts-with", strings::starts_with_fn::<N>),
        ("ends-with", strings::ends_with_fn::<N>),
    ] {
        lib.add(sig(name, &["xs:string?", "xs:string?"], "xs:boolean"), f);
        lib.add(sig(name, &["xs:string?", "xs:string?", "xs:string"], "xs:boolean"), f);
    }
    lib.add(sig("upper-case", &["xs:string?"], "xs:string"), strings::upper_case_fn::<N>);
    lib.add(sig("lower-case", &["xs:string?"], "xs:string"), strings::lower_case_fn::<N>);
    lib.add(sig("normalize-space", &[], "xs:string").focus(), strings::normalize_space_fn::<N>);
    lib.add(sig("normalize-space", &["xs:string?"], "xs:string"), strings::normalize_space_fn::<N>);
    lib.add(sig("normalize-unicode", &["xs:string?"], "xs:string"), strings::normalize_unicode_fn::<N>);
    lib.add(sig("normalize-unicode", &["xs:string?", "xs:string"], "xs:string"), strings::normalize_unicode_fn::<N>);
    lib.add(sig("translate", &["xs:string?", "xs:string", "xs:string"], "xs:string"), strings::translate_fn::<N>);
    lib.add(sig("compare", &["xs:string?", "xs:string?"], "xs:integer?"), strings::compare_fn::<N>);
    lib.add(sig("compare", &["xs:string?", "xs:string?", "xs:string"], "xs:integer?"), strings::compare_fn::<N>);
    lib.add(sig("codepoint-equal", &["xs:string?", "xs:string?"], "xs:boolean?"), strings::codepoint_equal_fn::<N>);
    lib.add(sig("string-to-codepoints", &["xs:string?"], "xs:integer*"), strings::string_to_codepoints_fn::<N>);
    lib.add(sig("codepoints-to-string", &["xs:integer*"], "xs:string"), strings::codepoints_to_string_fn::<N>);
    lib.add(sig("resolve-uri", &["xs:string?"], "xs:anyURI?"), strings::resolve_uri_fn::<N>);
    lib.add(sig("resolve-uri", &["xs:string?", "xs:string"], "xs:anyURI?"), strings::resolve_uri_fn::<N>);
    lib.add(sig("encode-for-uri", &["xs:string?"], "xs:string"), strings::encode_for_uri_fn::<N>);
}

fn register_regex<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("matches", &["xs:string?", "xs:string"], "xs:boolean"), regex::matches_fn::<N>);
    lib.add(sig("matches", &["xs:string?", "xs:string", "xs:string"], "xs:boolean"), regex::matches_fn::<N>);
    lib.add(sig("replace", &["xs:string?", "xs:string", "xs:string"], "xs:string"), regex::replace_fn::<N>);
    lib.add(
        sig("replace", &["xs:string?", "xs:string", "xs:string", "xs:string"], "xs:string"),
        regex::replace_fn::<N>,
    );
    lib.add(sig("tokenize", &["xs:string?"], "xs:string*"), regex::tokenize_fn::<N>);
    lib.add(sig("tokenize", &["xs:string?", "xs:string"], "xs:string*"), regex::tokenize_fn::<N>);
    lib.add(sig("tokenize", &["xs:string?", "xs:string", "xs:string"], "xs:string*"), regex::tokenize_fn::<N>);
}

fn register_sequences<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("empty", &["item()*"], "xs:boolean"), sequences::empty_fn::<N>);
    lib.add(sig("exists", &["item()*"], "xs:boolean"), sequences::exists_fn::<N>);
    lib.add(sig("head", &["item()*"], "item()?"), sequences::head_fn::<N>);
    lib.add(sig("tail", &["item()*"], "item()*"), sequences::tail_fn::<N>);
    lib.add(sig("reverse", &["item()*"], "item()*"), sequences::reverse_fn::<N>);
    lib.add(sig("subsequence", &["item()*", "xs:double"], "item()*"), sequences::subsequence_fn::<N>);
    lib.add(sig("subsequence", &["item()*", "xs:double", "xs:double"], "item()*"), sequences::subsequence_fn::<N>);
    lib.add(sig("insert-before", &["item()*", "xs:integer", "item()*"], "item()*"), sequences::insert_before_fn::<N>);
    lib.add(sig("remove", &["item()*", "xs:integer"], "item()*"), sequences::remove_fn::<N>);
    lib.add(sig("index-of", &["xs:anyAtomicType*", "xs:anyAtomicType"], "xs:integer*"), sequences::index_of_fn::<N>);
    lib.add(
        sig("index-of", &["xs:anyAtomicType*", "xs:anyAtomicType", "xs:string"], "xs:integer*"),
        sequences::index_of_fn::<N>,
    );
    lib.add(sig("distinct-values", &["xs:anyAtomicType*"], "xs:anyAtomicType*"), sequences::distinct_values_fn::<N>);
    lib.add(
        sig("distinct-values", &["xs:anyAtomicType*", "xs:string"], "xs:anyAtomicType*"),
        sequences::distinct_values_fn::<N>,
    );
    lib.add(sig("deep-equal", &["item()*", "item()*"], "xs:boolean"), sequences::deep_equal_fn::<N>);
    lib.add(sig("deep-equal", &["item()*", "item()*", "xs:string"], "xs:boolean"), sequences::deep_equal_fn::<N>);
    lib.add(sig("zero-or-one", &["item()*"], "item()?"), sequences::zero_or_one_fn::<N>);
    lib.add(sig("one-or-more", &["item()*"], "item()+"), sequences::one_or_more_fn::<N>);
    lib.add(sig("exactly-one", &["item()*"], "item()"), sequences::exactly_one_fn::<N>);
    lib.add(sig("unordered", &["item()*"], "item()*"), sequences::unordered_fn::<N>);
}

fn register_higher_order<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("for-each", &["item()*", "function(*)"], "item()*"), higher_order::for_each_fn::<N>);
    lib.add(sig("filter", &["item()*", "function(*)"], "item()*"), higher_order::filter_fn::<N>);
    lib.add(sig("fold-left", &["item()*", "item()*", "function(*)"], "item()*"), higher_order::fold_left_fn::<N>);
    lib.add(sig("fold-right", &["item()*", "item()*", "function(*)"], "item()*"), higher_order::fold_right_fn::<N>);
    lib.add(
        sig("for-each-pair", &["item()*", "item()*", "function(*)"], "item()*"),
        higher_order::for_each_pair_fn::<N>,
    );
    lib.add(sig("sort", &["item()*"], "item()*"), higher_order::sort_fn::<N>);
    lib.add(sig("sort", &["item()*", "xs:string?"], "item()*"), higher_order::sort_fn::<N>);
    lib.add(sig("sort", &["item()*", "xs:string?", "function(*)"], "item()*"), higher_order::sort_fn::<N>);
    lib.add(sig("apply", &["function(*)", "array(*)"], "item()*"), higher_order::apply_fn::<N>);
    lib.add(sig("function-arity", &["function(*)"], "xs:integer"), higher_order::function_arity_fn::<N>);
    lib.add(sig("function-name", &["function(*)"], "xs:QName?"), higher_order::function_name_fn::<N>);
}

fn register_maps<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("size", &["map(*)"], "xs:integer").ns(MAP_NS), maps::size_fn::<N>);
    lib.add(sig("keys", &["map(*)"], "xs:anyAtomicType*").ns(MAP_NS), maps::keys_fn::<N>);
    lib.add(sig("contains", &["map(*)", "xs:anyAtomicType"], "xs:boolean").ns(MAP_NS), maps::contains_fn::<N>);
    lib.add(sig("get", &["map(*)", "xs:anyAtomicType"], "item()*").ns(MAP_NS), maps::get_fn::<N>);
    lib.add(sig("put", &["map(*)", "xs:anyAtomicType", "item()*"], "map(*)").ns(MAP_NS), maps::put_fn::<N>);
    lib.add(sig("remove", &["map(*)", "xs:anyAtomicType*"], "map(*)").ns(MAP_NS), maps::remove_fn::<N>);
    lib.add(sig("entry", &["xs:anyAtomicType", "item()*"], "map(*)").ns(MAP_NS), maps::entry_fn::<N>);
    lib.add(sig("merge", &["map(*)*"], "map(*)").ns(MAP_NS), maps::merge_fn::<N>);
    lib.add(sig("merge", &["map(*)*", "map(*)"], "map(*)").ns(MAP_NS), maps::merge_fn::<N>);
    lib.add(sig("for-each", &["map(*)", "function(*)"], "item()*").ns(MAP_NS), maps::for_each_fn::<N>);
}

fn register_arrays<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("size", &["array(*)"], "xs:integer").ns(ARRAY_NS), arrays::size_fn::<N>);
    lib.add(sig("get", &["array(*)", "xs:integer"], "item()*").ns(ARRAY_NS), arrays::get_fn::<N>);
    lib.add(sig("put", &["array(*)", "xs:integer", "item()*"], "array(*)").ns(ARRAY_NS), arrays::put_fn::<N>);
    lib.add(sig("append", &["array(*)", "item()*"], "array(*)").ns(ARRAY_NS), arrays::append_fn::<N>);
    lib.add(sig("subarray", &["array(*)", "xs:integer"], "array(*)").ns(ARRAY_NS), arrays::subarray_fn::<N>);
    lib.add(
        sig("subarray", &["array(*)", "xs:integer", "xs:integer"], "array(*)").ns(ARRAY_NS),
        arrays::subarray_fn::<N>,
    );
    lib.add(sig("remove", &["array(*)", "xs:integer*"], "array(*)").ns(ARRAY_NS), arrays::remove_fn::<N>);
    lib.add(
        sig("insert-before", &["array(*)", "xs:integer", "item()*"], "array(*)").ns(ARRAY_NS),
        arrays::insert_before_fn::<N>,
    );
    lib.add(sig("head", &["array(*)"], "item()*").ns(ARRAY_NS), arrays::head_fn::<N>);
    lib.add(sig("tail", &["array(*)"], "array(*)").ns(ARRAY_NS), arrays::tail_fn::<N>);
    lib.add(sig("reverse", &["array(*)"], "array(*)").ns(ARRAY_NS), arrays::reverse_fn::<N>);
    lib.add(sig("join", &["array(*)*"], "array(*)").ns(ARRAY_NS), arrays::join_fn::<N>);
    lib.add(sig("flatten", &["item()*"], "item()*").ns(ARRAY_NS), arrays::flatten_fn::<N>);
    lib.add(sig("for-each", &["array(*)", "function(*)"], "array(*)").ns(ARRAY_NS), arrays::for_each_fn::<N>);
    lib.add(sig("filter", &["array(*)", "function(*)"], "array(*)").ns(ARRAY_NS), arrays::filter_fn::<N>);
}

fn register_dates<N: XdmNode>(lib: &mut Library<'_, N>) {
    lib.add(sig("current-dateTime", &[], "xs:dateTimeStamp"), datetime::current_date_time_fn::<N>);
    lib.add(sig("current-date", &[], "xs:date"), datetime::current_date_fn::<N>);
    lib.add(sig("current-time", &[], "xs:time"), datetime::current_time_fn::<N>);
    lib.add(sig("implicit-timezone", &[], "xs:dayTimeDuration"), datetime::implicit_timezone_fn::<N>);
    for (name, param, f) in [
        ("year-from-dateTime", "xs:dateTime?", datetime::year_fn::<N> as Builtin<N>),
        ("month-from-dateTime", "xs:dateTime?", datetime::month_fn::<N>),
        ("day-from-dateTime", "xs:dateTime?", datetime::day_fn::<N>),
        ("hours-from-dateTime", "xs:dateTime?", datetime::hours_fn::<N>),
        ("minutes-from-dateTime", "xs:dateTime?", datetime::minutes_fn::<N>),
        ("year-from-date", "xs:date?", datetime::year_fn::<N>),
        ("month-from-date", "xs:date?", datetime::month_fn::<N>),
        ("day-from-date", "xs:date?", datetime::day_fn::<N>),
        ("hours-from-time", "xs:time?", datetime::hours_fn::<N>),
        ("minutes-from-time", "xs:time?", datetime::minutes_fn::<N>),
    ] {
        lib.add_signature(
            FunctionSignature {
                name: ExpandedName::ns(FNS, name),
                params: vec![seq_type(param)],
                variadic: false,
                return_type: seq_type("xs:integer?"),
                uses_focus: false,
                updating: false,
            },
            f,
        );
    }
    lib.add(sig("seconds-from-dateTime", &["xs:dateTime?"], "xs:decimal?"), datetime::seconds_fn::<N>);
    lib.add(sig("seconds-from-time", &["xs:time?"], "xs:decimal?"), datetime::seconds_fn::<N>);
    lib.add(sig("timezone-from-dateTime", &["xs:dateTime?"], "xs:dayTimeDuration?"), datetime::timezone_fn::<N>);
    lib.add(sig("timezone-from-date", &["xs:date?"], "xs:dayTimeDuration?"), datetime::timezone_fn::<N>);
    lib.add(sig("timezone-from-time", &["xs:time?"], "xs:dayTimeDuration?"), datetime::timezone_fn::<N>);
    lib.add(sig("years-from-duration", &["xs:duration?"], "xs:integer?"), datetime::years_from_duration_fn::<N>);
    lib.add(sig("months-from-duration", &["xs:duration?"], "xs:integer?"), datetime::months_from_duration_fn::<N>);
    lib.add(sig("days-from-duration", &["xs:duration?"], "xs:integer?"), datetime::days_from_duration_fn::<N>);
    lib.add(sig("hours-from-duration", &["xs:duration?"], "xs:integer?"), datetime::hours_from_duration_fn::<N>);
    lib.add(
        sig("minutes-from-duration", &["xs:duration?"], "xs:integer?"),
        datetime::minutes_from_duration_fn::<N>,
    );
    lib.add(
        sig("seconds-from-duration", &["xs:duration?"], "xs:decimal?"),
        datetime::seconds_from_duration_fn::<N>,
    );
}

fn register_update<N: XdmNode>(lib: &mut Library<'_, N>) {
    // Calls are lowered by the compiler; the entry makes the name resolvable.
    lib.add(sig("put", &["node()", "xs:string?"], "empty-sequence()").updating(), diagnostics::put_fn::<N>);
}

fn register_constructors<N: XdmNode>(lib: &mut Library<'_, N>) {
    for (kind, local) in XS_NAMES.iter().filter(|(k, _)| !k.is_abstract()) {
        let kind: Kind = *kind;
        lib.add_signature(
            FunctionSignature {
                name: ExpandedName::ns(XS, *local),
                params: vec![seq_type("xs:anyAtomicType?")],
                variadic: false,
                return_type: SequenceType::atomic(kind, crate::types::Occurrence::ZeroOrOne),
                uses_focus: false,
                updating: false,
            },
            move |ctx, args| constructors::construct(ctx, kind, args),
        );
    }
}

/// Builtin signatures for a static context that is not tied to an engine.
pub fn default_signatures() -> Arc<FunctionSignatures> {
    let mut sigs = FunctionSignatures::default();
    register_default_functions::<crate::model::simple::SimpleNode>(None, Some(&mut sigs));
    Arc::new(sigs)
}

/// A fresh registry holding the builtin implementations for node type `N`.
///
/// Every engine owns the registry it extends; nothing is shared between them.
pub fn default_function_registry<N: XdmNode>() -> FunctionRegistry<N> {
    let mut reg = FunctionRegistry::new();
    register_default_functions(Some(&mut reg), None);
    tracing::debug!(node_type = std::any::type_name::<N>(), "builtin function registry built");
    reg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::simple::SimpleNode;

    #[test]
    fn signatures_and_registry_agree() {
        let sigs = default_signatures();
        let reg = default_function_registry::<SimpleNode>();
        for (ns, local, arity) in [
            (FNS, "concat", 5),
            (FNS, "substring", 3),
            (MAP_NS, "merge", 1),
            (ARRAY_NS, "flatten", 1),
            (MATH_NS, "pow", 2),
            (XS, "integer", 1),
        ] {
            let name = ExpandedName::ns(ns, local);
            assert!(sigs.resolve(&name, arity).is_ok(), "{local}#{arity}");
            assert!(reg.resolve(&name, arity).is_ok(), "{local}#{arity}");
        }
    }

    #[test]
    fn abstract_types_have_no_constructor() {
        let sigs = default_signatures();
        assert!(!sigs.contains_name(&ExpandedName::ns(XS, "anyAtomicType")));
        assert!(!sigs.contains_name(&ExpandedName::ns(XS, "NOTATION")));
    }

    #[test]
    fn put_is_updating() {
        let sigs = default_signatures();
        let put = sigs.resolve(&ExpandedName::ns(FNS, "put"), 2).unwrap();
        assert!(put.updating);
    }
}
