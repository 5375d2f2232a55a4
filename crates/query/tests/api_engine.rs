use rstest::{fixture, rstest};
use std::sync::Arc;
use sylva_query::api::{Engine, EngineConfig, EvaluateOptions, QueryResult, ReturnType};
use sylva_query::engine::runtime::{ErrorCode, FunctionSignature, ModuleResolver};
use sylva_query::model::XdmNode;
use sylva_query::model::simple::{SimpleNode, attr, doc, elem, text};
use sylva_query::types::{Kind, Occurrence, SequenceType};
use sylva_query::xdm::{ExpandedName, XdmAtomicValue as A, XdmItem as I};

type N = SimpleNode;

#[fixture]
fn menu() -> N {
    doc()
        .child(
            elem("menu")
                .child(elem("item").attr(attr("kind", "file")).child(text("Open")))
                .child(elem("item").attr(attr("kind", "file")).child(text("Save")))
                .child(elem("item").attr(attr("kind", "edit")).child(text("Copy"))),
        )
        .build()
}

fn with(return_type: ReturnType) -> EvaluateOptions<N> {
    EvaluateOptions::builder().return_type(return_type).build()
}

fn eval(engine: &Engine<N>, root: &N, query: &str, return_type: ReturnType) -> QueryResult<N> {
    engine
        .evaluate(query, Some(I::Node(root.clone())), [], &with(return_type))
        .unwrap_or_else(|e| panic!("{query}: {e}"))
}

#[rstest]
fn return_types_shape_the_result(menu: N) {
    let engine = Engine::new();
    assert!(matches!(eval(&engine, &menu, "count(//item) = 3", ReturnType::Boolean), QueryResult::Boolean(true)));
    assert!(matches!(eval(&engine, &menu, "()", ReturnType::Boolean), QueryResult::Boolean(false)));
    assert!(
        matches!(eval(&engine, &menu, "//item[@kind = 'edit']", ReturnType::String), QueryResult::String(s) if s == "Copy")
    );
    assert!(matches!(eval(&engine, &menu, "()", ReturnType::String), QueryResult::String(s) if s.is_empty()));
    assert!(matches!(
        eval(&engine, &menu, "//item/@kind", ReturnType::Strings),
        QueryResult::Strings(s) if s == ["file", "file", "edit"]
    ));
    assert!(matches!(eval(&engine, &menu, "count(//item)", ReturnType::Number), QueryResult::Number(n) if n == 3.0));
    assert!(matches!(eval(&engine, &menu, "'abc'", ReturnType::Number), QueryResult::Number(n) if n.is_nan()));
    assert!(matches!(
        eval(&engine, &menu, "for $x in (1, 2, 3) return $x * 2", ReturnType::Numbers),
        QueryResult::Numbers(v) if v == [2.0, 4.0, 6.0]
    ));
    assert!(matches!(eval(&engine, &menu, "map{'a': 1}", ReturnType::Map), QueryResult::Map(m) if m.len() == 1));
    assert!(matches!(eval(&engine, &menu, "[1, 2]", ReturnType::Array), QueryResult::Array(a) if a.len() == 2));
}

#[rstest]
fn node_return_types(menu: N) {
    let engine = Engine::new();
    let QueryResult::FirstNode(Some(first)) = eval(&engine, &menu, "//item", ReturnType::FirstNode) else {
        panic!("expected a node");
    };
    assert_eq!(first.string_value(), "Open");
    let QueryResult::AllNodes(all) = eval(&engine, &menu, "//item[@kind = 'file']", ReturnType::AllNodes) else {
        panic!("expected nodes");
    };
    assert_eq!(all.iter().map(XdmNode::string_value).collect::<Vec<_>>(), ["Open", "Save"]);
    assert!(matches!(eval(&engine, &menu, "//nothing", ReturnType::FirstNode), QueryResult::FirstNode(None)));
}

#[rstest]
#[case("1", ReturnType::FirstNode)]
#[case("(//item, 1)", ReturnType::AllNodes)]
#[case("(1, 2)", ReturnType::Number)]
#[case("('a', 1)", ReturnType::Numbers)]
#[case("(map{}, map{})", ReturnType::Map)]
#[case("1", ReturnType::Array)]
fn mismatched_return_types_are_type_errors(menu: N, #[case] query: &str, #[case] return_type: ReturnType) {
    let engine = Engine::new();
    let err = engine
        .evaluate(query, Some(I::Node(menu)), [], &with(return_type))
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004, "{query}");
}

#[rstest]
fn iterator_results_are_lazy() {
    let engine = Engine::<N>::new();
    // the division by zero lies past the first item and is never reached
    let out = engine
        .evaluate("for $x in (1, 2, 0) return 10 idiv $x", None, [], &with(ReturnType::Iterator))
        .unwrap();
    let QueryResult::Iterator(seq) = out else {
        panic!("expected an iterator");
    };
    let first = seq.into_iter().next().unwrap().unwrap();
    assert_eq!(first, I::Atomic(A::Integer(10)));
}

#[rstest]
fn external_variables(menu: N) {
    let engine = Engine::new();
    let kind = ExpandedName::local("kind");
    let out = engine
        .evaluate(
            "count(//item[@kind = $kind])",
            Some(I::Node(menu.clone())),
            [(kind.clone(), vec![I::Atomic(A::String("file".into()))])],
            &with(ReturnType::Number),
        )
        .unwrap();
    assert!(matches!(out, QueryResult::Number(n) if n == 2.0));

    let err = engine
        .evaluate("$missing", Some(I::Node(menu)), [], &with(ReturnType::Any))
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0008);
}

#[rstest]
fn compiled_queries_are_reusable(menu: N) {
    let engine = Engine::new();
    let compiled = engine.compile("//item[@kind = 'file']", &EvaluateOptions::default()).unwrap();
    assert!(!compiled.is_updating());
    for _ in 0..2 {
        let out = engine
            .evaluate_compiled(&compiled, Some(I::Node(menu.clone())), [], &with(ReturnType::AllNodes))
            .unwrap();
        assert!(matches!(out, QueryResult::AllNodes(n) if n.len() == 2));
    }
}

#[rstest]
fn compile_cache_can_be_disabled(menu: N) {
    let engine = Engine::builder().compile_cache_capacity(0).build();
    assert_eq!(engine.config().compile_cache_capacity, 0);
    for _ in 0..2 {
        assert!(matches!(eval(&engine, &menu, "count(//item)", ReturnType::Number), QueryResult::Number(n) if n == 3.0));
    }
}

#[rstest]
#[case("//item")]
#[case("//item[@kind = 'file']")]
#[case("/menu/item[not(@kind = 'file')]")]
#[case("//item[@kind != 'edit' and exists(text())]/..")]
fn native_backend_agrees_with_interpreter(menu: N, #[case] query: &str) {
    let native = Engine::builder()
        .config(EngineConfig {
            compile_cache_capacity: 8,
            native_backend: true,
        })
        .build();
    let interpreted = Engine::new();
    for return_type in [ReturnType::AllNodes, ReturnType::FirstNode, ReturnType::Boolean] {
        let a = eval(&native, &menu, query, return_type).into_items().unwrap();
        let b = eval(&interpreted, &menu, query, return_type).into_items().unwrap();
        assert_eq!(a, b, "{query} as {return_type:?}");
    }
}

#[rstest]
fn native_backend_falls_back_outside_its_subset(menu: N) {
    let engine = Engine::builder().native_backend(true).build();
    let out = eval(&engine, &menu, "//item[position() = 2]", ReturnType::FirstNode);
    assert!(matches!(out, QueryResult::FirstNode(Some(n)) if n.string_value() == "Save"));
}

#[rstest]
fn extension_functions(menu: N) {
    let signature = FunctionSignature {
        name: ExpandedName::ns("urn:example:ext", "shout"),
        params: vec![SequenceType::atomic(Kind::String, Occurrence::ZeroOrOne)],
        variadic: false,
        return_type: SequenceType::atomic(Kind::String, Occurrence::ExactlyOne),
        uses_focus: false,
        updating: false,
    };
    let engine = Engine::<N>::builder()
        .register_function(signature, |_ctx, args| {
            let s = args[0]
                .first()
                .and_then(I::as_atomic)
                .map(A::string_value)
                .unwrap_or_default();
            Ok(vec![I::Atomic(A::String(s.to_uppercase()))])
        })
        .build();
    let options = EvaluateOptions::builder()
        .namespace("ext", "urn:example:ext")
        .return_type(ReturnType::Strings)
        .build();
    let out = engine
        .evaluate("//item[1] ! ext:shout(string(.))", Some(I::Node(menu.clone())), [], &options)
        .unwrap();
    assert!(matches!(out, QueryResult::Strings(s) if s == ["OPEN"]));

    // the default engine does not know the function
    let err = Engine::new()
        .evaluate("ext:shout('x')", Some(I::Node(menu)), [], &options)
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0017);
}

struct Library;

impl ModuleResolver for Library {
    fn resolve(&self, namespace: &str, _location_hints: &[String]) -> Option<String> {
        (namespace == "urn:example:lib").then(|| {
            r#"module namespace lib = "urn:example:lib";
               declare function lib:scale($x) { $x * 3 };"#
                .to_string()
        })
    }
}

#[rstest]
fn imported_library_modules() {
    let engine = Engine::<N>::new();
    let options = EvaluateOptions::builder()
        .module_resolver(Arc::new(Library))
        .return_type(ReturnType::Numbers)
        .build();
    let out = engine
        .evaluate(
            r#"import module namespace l = "urn:example:lib"; (1, 2) ! l:scale(.)"#,
            None,
            [],
            &options,
        )
        .unwrap();
    assert!(matches!(out, QueryResult::Numbers(v) if v == [3.0, 6.0]));
}

#[rstest]
fn prolog_declarations() {
    let engine = Engine::<N>::new();
    let query = r#"
        declare namespace p = "urn:p";
        declare variable $base := 10;
        declare function local:fact($n as xs:integer) as xs:integer {
            if ($n le 1) then 1 else $n * local:fact($n - 1)
        };
        local:fact(5) + $base
    "#;
    let out = engine.evaluate(query, None, [], &with(ReturnType::Number)).unwrap();
    assert!(matches!(out, QueryResult::Number(n) if n == 130.0));
}

#[rstest]
fn syntax_errors_carry_a_position() {
    let engine = Engine::<N>::new();
    let err = engine.evaluate("1 +\n (2", None, [], &with(ReturnType::Any)).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0003);
    assert!(err.message.contains("line 2"), "{}", err.message);
}

#[rstest]
fn xpath_language_rejects_xquery_syntax() {
    let engine = Engine::<N>::new();
    let options = EvaluateOptions::builder()
        .language(sylva_query::Language::XPath31)
        .build();
    let err = engine.evaluate("let $x := 1 return <a/>", None, [], &options).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPST0003);
}

#[rstest]
fn fixed_clock_and_timezone() {
    let engine = Engine::<N>::new();
    let now = chrono::DateTime::parse_from_rfc3339("2024-05-06T07:08:09+02:00").unwrap();
    let options = EvaluateOptions::builder()
        .now(now)
        .timezone(120)
        .return_type(ReturnType::Strings)
        .build();
    let out = engine
        .evaluate("(string(current-date()), string(implicit-timezone()))", None, [], &options)
        .unwrap();
    assert!(matches!(out, QueryResult::Strings(s) if s == ["2024-05-06+02:00", "PT2H"]));
}

#[rstest]
#[case("exists(1)")]
#[case("count(//item[@kind = 'file'])")]
#[case("string-join(for $i in 1 to 3 return string($i * 2), ',')")]
fn queries_run_on_a_two_megabyte_stack(menu: N, #[case] query: &'static str) {
    let worker = std::thread::Builder::new()
        .stack_size(2 << 20)
        .spawn(move || {
            Engine::<N>::new()
                .evaluate(query, Some(I::Node(menu)), [], &with(ReturnType::Strings))
                .map(|_| ())
                .map_err(|e| e.to_string())
        })
        .unwrap();
    worker.join().unwrap().unwrap();
}

#[rstest]
fn engines_keep_their_own_functions_and_comparators(menu: N) {
    let tagged = |tag: &'static str| {
        let signature = FunctionSignature {
            name: ExpandedName::ns("urn:example:ext", "tag"),
            params: Vec::new(),
            variadic: false,
            return_type: SequenceType::atomic(Kind::String, Occurrence::ExactlyOne),
            uses_focus: false,
            updating: false,
        };
        Engine::<N>::builder()
            .register_function(signature, move |_ctx, _args| Ok(vec![I::Atomic(A::String(tag.to_string()))]))
            .build()
    };
    let (a, b, plain) = (tagged("a"), tagged("b"), Engine::<N>::new());
    let options = EvaluateOptions::builder()
        .namespace("ext", "urn:example:ext")
        .return_type(ReturnType::Strings)
        .build();
    let run = |engine: &Engine<N>, query: &str| engine.evaluate(query, Some(I::Node(menu.clone())), [], &options);

    assert!(matches!(run(&a, "ext:tag()").unwrap(), QueryResult::Strings(s) if s == ["a"]));
    assert!(matches!(run(&b, "ext:tag()").unwrap(), QueryResult::Strings(s) if s == ["b"]));
    assert_eq!(run(&plain, "ext:tag()").unwrap_err().code_enum(), ErrorCode::XPST0017);

    run(&a, "string(1 = 1.0 and 'a' < 'b')").unwrap();
    run(&a, "distinct-values((1, 1.0, 2))").unwrap();
    assert!(!a.comparators().is_empty());
    assert!(b.comparators().is_empty());
    assert!(plain.comparators().is_empty());
}
