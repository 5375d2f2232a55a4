use rstest::{fixture, rstest};
use sylva_query::engine::runtime::{DynamicContextBuilder, Error, ErrorCode, StaticContext};
use sylva_query::model::XdmNode;
use sylva_query::model::simple::{SimpleNode, attr, comment, doc, elem, text};
use sylva_query::xdm::{XdmAtomicValue as A, XdmItem as I};
use sylva_query::{compile, evaluate};

type N = SimpleNode;

#[fixture]
fn library() -> N {
    doc()
        .child(
            elem("library")
                .child(
                    elem("book")
                        .attr(attr("id", "b1"))
                        .attr(attr("year", "1999"))
                        .child(elem("title").child(text("Dune")))
                        .child(elem("author").child(text("Herbert"))),
                )
                .child(comment("shelf two"))
                .child(
                    elem("book")
                        .attr(attr("id", "b2"))
                        .attr(attr("year", "2005"))
                        .child(elem("title").child(text("Anathem")))
                        .child(elem("author").child(text("Stephenson"))),
                )
                .child(
                    elem("magazine")
                        .attr(attr("id", "m1"))
                        .child(elem("title").child(text("Byte"))),
                ),
        )
        .build()
}

fn eval_on(root: &N, query: &str) -> Result<Vec<I<N>>, Error> {
    let q = compile(query, &StaticContext::default())?;
    let ctx = DynamicContextBuilder::new().with_context_item(I::Node(root.clone())).build();
    evaluate(&q, &ctx)
}

fn strings(root: &N, query: &str) -> Vec<String> {
    eval_on(root, query)
        .unwrap()
        .into_iter()
        .map(|i| match i {
            I::Node(n) => n.string_value(),
            I::Atomic(a) => a.string_value(),
            other => panic!("unexpected item {other:?}"),
        })
        .collect()
}

fn boolean(root: &N, query: &str) -> bool {
    match eval_on(root, query).unwrap().as_slice() {
        [I::Atomic(A::Boolean(b))] => *b,
        other => panic!("expected a boolean, got {other:?}"),
    }
}

#[rstest]
#[case("/library/book/title", vec!["Dune", "Anathem"])]
#[case("//title", vec!["Dune", "Anathem", "Byte"])]
#[case("//book[@year > 2000]/title", vec!["Anathem"])]
#[case("//book[2]/title", vec!["Anathem"])]
#[case("//book[last()]/@id", vec!["b2"])]
#[case("(//title)[1]", vec!["Dune"])]
#[case("//author/../@id", vec!["b1", "b2"])]
#[case("//title[. = 'Byte']/ancestor::*/@id", vec!["m1"])]
#[case("/library/book[1]/following-sibling::*/@id", vec!["b2", "m1"])]
#[case("/library/magazine/preceding-sibling::book/@id", vec!["b1", "b2"])]
#[case("//comment()", vec!["shelf two"])]
#[case("/library/node()[2]", vec!["shelf two"])]
#[case("//book[author = 'Herbert']/title/text()", vec!["Dune"])]
fn axis_and_predicate_paths(library: N, #[case] query: &str, #[case] expected: Vec<&str>) {
    assert_eq!(strings(&library, query), expected, "{query}");
}

#[rstest]
fn reverse_axis_positions_count_backwards(library: N) {
    assert_eq!(strings(&library, "//magazine/preceding-sibling::book[1]/@id"), vec!["b2"]);
    assert_eq!(strings(&library, "(//magazine/preceding-sibling::book)[1]/@id"), vec!["b1"]);
}

#[rstest]
fn paths_return_document_order_without_duplicates(library: N) {
    assert_eq!(
        strings(&library, "(//title/.. | //book)/@id"),
        vec!["b1", "b2", "m1"]
    );
    assert_eq!(
        strings(&library, "(//magazine, //book[1])/title"),
        vec!["Dune", "Byte"]
    );
}

#[rstest]
fn set_operators(library: N) {
    assert_eq!(strings(&library, "//book intersect //*[@year = '2005']"), vec!["AnathemStephenson"]);
    assert_eq!(strings(&library, "(//* except //book/*)/@id"), vec!["b1", "b2", "m1"]);
    assert_eq!(strings(&library, "//title union //title"), vec!["Dune", "Anathem", "Byte"]);
    assert_eq!(strings(&library, "count(//book | //book | //magazine)"), vec!["3"]);
}

#[rstest]
fn union_of_atomics_is_a_type_error(library: N) {
    let err = eval_on(&library, "(1, 2) union //book").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[rstest]
fn node_order_comparisons(library: N) {
    assert!(boolean(&library, "//book[1] << //book[2]"));
    assert!(!boolean(&library, "//book[2] << //book[1]"));
    assert!(boolean(&library, "//book[2] >> //book[1]/title"));
    assert!(boolean(&library, "//book[1] is /library/book[@id = 'b1']"));
    assert!(boolean(&library, "/library/book[1]/@id << /library/book[1]/title"));
}

#[rstest]
fn root_of_a_rootless_tree_raises(library: N) {
    let detached = elem("x").child(elem("y")).build();
    let q = compile("/y", &StaticContext::default()).unwrap();
    let ctx = DynamicContextBuilder::new().with_context_item(I::Node(detached)).build();
    let err = evaluate(&q, &ctx).unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPDY0050);
    // the fixture is untouched and still evaluates
    assert_eq!(strings(&library, "count(//book)"), vec!["2"]);
}

#[rstest]
fn path_step_on_atomic_is_a_type_error(library: N) {
    let err = eval_on(&library, "(1, 2)/foo").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0019);
}

#[rstest]
fn atomizing_paths_in_arithmetic(library: N) {
    assert_eq!(strings(&library, "sum(//book/@year)"), vec!["4004"]);
    assert_eq!(strings(&library, "//book[1]/@year + 1"), vec!["2000"]);
}
