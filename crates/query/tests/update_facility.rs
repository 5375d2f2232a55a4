use rstest::{fixture, rstest};
use std::sync::Arc;
use sylva_query::api::{Engine, EvaluateOptions};
use sylva_query::engine::runtime::{ErrorCategory, ErrorCode};
use sylva_query::model::simple::{SimpleDocumentWriter, SimpleNode, SimpleNodeFactory, attr, doc, elem, text};
use sylva_query::update::PendingUpdate;
use sylva_query::xdm::{XdmAtomicValue as A, XdmItem as I};

type N = SimpleNode;

#[fixture]
fn tree() -> N {
    doc()
        .child(
            elem("root")
                .child(elem("a").attr(attr("id", "1")).child(elem("b").child(text("old"))))
                .child(elem("c").child(text("keep"))),
        )
        .build()
}

fn options(root: &N) -> EvaluateOptions<N> {
    EvaluateOptions::builder()
        .node_factory(Arc::new(SimpleNodeFactory::for_document(root)))
        .document_writer(Arc::new(SimpleDocumentWriter))
        .build()
}

/// Evaluates an updating query against `root` and applies its pending updates.
fn run(engine: &Engine<N>, root: &N, query: &str) -> Result<(), sylva_query::Error> {
    let opts = options(root);
    let result = engine.evaluate_updating_expression(query, Some(I::Node(root.clone())), [], &opts)?;
    engine.execute_pending_update_list(result.pending_update_list, &opts)?;
    Ok(())
}

#[rstest]
fn pending_updates_are_not_applied_until_executed(tree: N) {
    let engine = Engine::new();
    let before = tree.to_xml();
    let result = engine
        .evaluate_updating_expression("delete node //c", Some(I::Node(tree.clone())), [], &options(&tree))
        .unwrap();
    assert_eq!(result.pending_update_list.len(), 1);
    assert!(matches!(
        result.pending_update_list.iter().next(),
        Some(PendingUpdate::Delete { .. })
    ));
    assert!(result.xdm_value.is_empty());
    assert_eq!(tree.to_xml(), before);
}

#[rstest]
#[case("delete node //c", r#"<root><a id="1"><b>old</b></a></root>"#)]
#[case("insert node <d/> into //c", r#"<root><a id="1"><b>old</b></a><c>keep<d/></c></root>"#)]
#[case("insert node <d/> as first into /root", r#"<root><d/><a id="1"><b>old</b></a><c>keep</c></root>"#)]
#[case("insert node <d/> before //c", r#"<root><a id="1"><b>old</b></a><d/><c>keep</c></root>"#)]
#[case("insert node <d/> after //a", r#"<root><a id="1"><b>old</b></a><d/><c>keep</c></root>"#)]
#[case("insert node attribute x {'y'} into //c", r#"<root><a id="1"><b>old</b></a><c x="y">keep</c></root>"#)]
#[case("replace node //b with <e>new</e>", r#"<root><a id="1"><e>new</e></a><c>keep</c></root>"#)]
#[case("replace value of node //b with 'new'", r#"<root><a id="1"><b>new</b></a><c>keep</c></root>"#)]
#[case("replace value of node //a/@id with '2'", r#"<root><a id="2"><b>old</b></a><c>keep</c></root>"#)]
#[case("rename node //c as 'z'", r#"<root><a id="1"><b>old</b></a><z>keep</z></root>"#)]
fn applied_updates(tree: N, #[case] query: &str, #[case] expected: &str) {
    let engine = Engine::new();
    run(&engine, &tree, query).unwrap_or_else(|e| panic!("{query}: {e}"));
    assert_eq!(tree.to_xml(), expected, "{query}");
}

#[rstest]
fn updates_see_the_tree_as_it_was(tree: N) {
    let engine = Engine::new();
    run(&engine, &tree, "for $n in //b return (delete node $n, insert node <f/> after //a)").unwrap();
    assert_eq!(tree.to_xml(), r#"<root><a id="1"/><f/><c>keep</c></root>"#);
}

#[rstest]
fn conflicting_delete_and_replace_leaves_tree_untouched(tree: N) {
    let engine = Engine::new();
    let before = tree.to_xml();
    let err = run(&engine, &tree, "delete node //a, replace node //b with <x/>").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUDY0016);
    assert_eq!(err.category(), ErrorCategory::UpdateConflict);
    assert_eq!(tree.to_xml(), before);
}

#[rstest]
#[case("rename node //c as 'x', rename node //c as 'y'", ErrorCode::XUDY0015)]
#[case("replace node //c with <x/>, replace node //c with <y/>", ErrorCode::XUDY0016)]
#[case("replace value of node //b with 'x', replace value of node //b with 'y'", ErrorCode::XUDY0017)]
fn duplicate_targets_conflict(tree: N, #[case] query: &str, #[case] code: ErrorCode) {
    let engine = Engine::new();
    let before = tree.to_xml();
    let err = run(&engine, &tree, query).unwrap_err();
    assert_eq!(err.code_enum(), code, "{query}");
    assert_eq!(tree.to_xml(), before);
}

#[rstest]
fn copy_modify_return_leaves_the_source_alone(tree: N) {
    let engine = Engine::new();
    let before = tree.to_xml();
    let out = engine
        .evaluate(
            "copy $c := /root modify delete node $c/a return count($c/*)",
            Some(I::Node(tree.clone())),
            [],
            &options(&tree),
        )
        .unwrap()
        .into_items()
        .unwrap();
    assert_eq!(out, vec![I::Atomic(A::Integer(1))]);
    assert_eq!(tree.to_xml(), before);
}

#[rstest]
fn updating_query_through_plain_entry_point_is_rejected(tree: N) {
    let engine = Engine::new();
    let err = engine
        .evaluate("delete node //c", Some(I::Node(tree.clone())), [], &options(&tree))
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUST0001);
}

#[rstest]
fn updating_expression_in_a_non_updating_position(tree: N) {
    let engine = Engine::new();
    let err = engine
        .evaluate_updating_expression("1 + (delete node //c)", Some(I::Node(tree.clone())), [], &options(&tree))
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XUST0001);
}

#[rstest]
fn put_requests_are_reported(tree: N) {
    let engine = Engine::new();
    let opts = options(&tree);
    let result = engine
        .evaluate_updating_expression("put(/root/c, 'urn:out')", Some(I::Node(tree.clone())), [], &opts)
        .unwrap();
    let report = engine.execute_pending_update_list(result.pending_update_list, &opts).unwrap();
    assert_eq!(report.applied, 0);
    assert_eq!(report.puts.len(), 1);
    assert_eq!(report.puts[0].uri, "urn:out");
}

#[rstest]
fn applying_without_a_writer_fails(tree: N) {
    let engine = Engine::new();
    let opts = options(&tree);
    let result = engine
        .evaluate_updating_expression("delete node //c", Some(I::Node(tree.clone())), [], &opts)
        .unwrap();
    let err = engine
        .execute_pending_update_list(result.pending_update_list, &EvaluateOptions::default())
        .unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::ADPT0001);
}
