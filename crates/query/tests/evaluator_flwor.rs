use rstest::rstest;
use sylva_query::engine::runtime::{DynamicContext, Error, ErrorCode, StaticContext};
use sylva_query::xdm::{XdmAtomicValue as A, XdmItem as I};
use sylva_query::{SimpleNode, compile, evaluate};

type N = SimpleNode;

fn eval(query: &str) -> Result<Vec<I<N>>, Error> {
    let q = compile(query, &StaticContext::default())?;
    evaluate::<N>(&q, &DynamicContext::default())
}

fn ints(query: &str) -> Vec<i64> {
    eval(query)
        .unwrap()
        .into_iter()
        .map(|i| match i {
            I::Atomic(A::Integer(v)) => v,
            other => panic!("expected integer, got {other:?}"),
        })
        .collect()
}

fn strings(query: &str) -> Vec<String> {
    eval(query)
        .unwrap()
        .into_iter()
        .map(|i| i.as_atomic().unwrap().string_value())
        .collect()
}

#[rstest]
fn for_return_doubles() {
    assert_eq!(ints("for $x in (1, 2, 3) return $x * 2"), vec![2, 4, 6]);
}

#[rstest]
#[case("for $x at $i in ('a', 'b', 'c') return $i", vec![1, 2, 3])]
#[case("for $x in (1, 2), $y in (10, 20) return $x + $y", vec![11, 21, 12, 22])]
#[case("for $x allowing empty in () return 7", vec![7])]
#[case("for $x in () return 7", vec![])]
#[case("let $a := 5, $b := $a + 1 return ($a, $b)", vec![5, 6])]
#[case("for $x in 1 to 10 where $x mod 3 = 0 return $x", vec![3, 6, 9])]
#[case("for $x in (3, 1, 2) order by $x return $x", vec![1, 2, 3])]
#[case("for $x in (3, 1, 2) order by $x descending return $x", vec![3, 2, 1])]
#[case("for $x in (5, 6, 7) count $c return $c", vec![1, 2, 3])]
fn flwor_clauses(#[case] query: &str, #[case] expected: Vec<i64>) {
    assert_eq!(ints(query), expected, "{query}");
}

#[rstest]
fn order_by_empty_greatest() {
    assert_eq!(
        strings(
            "for $p in (map{'k':'b'}, map{'k':()}, map{'k':'a'}) \
             order by $p?k empty greatest return string(($p?k, '-')[1])"
        ),
        vec!["a", "b", "-"]
    );
}

#[rstest]
fn group_by_collects_members() {
    let out = strings(
        "for $w in ('apple', 'avocado', 'banana', 'blueberry', 'cherry') \
         let $initial := substring($w, 1, 1) \
         group by $initial \
         order by $initial \
         return $initial || ':' || count($w)",
    );
    assert_eq!(out, vec!["a:2", "b:2", "c:1"]);
}

#[rstest]
fn quantified_expressions() {
    assert_eq!(eval("some $x in (1, 2, 3) satisfies $x > 2").unwrap(), vec![I::Atomic(A::Boolean(true))]);
    assert_eq!(eval("every $x in (1, 2, 3) satisfies $x > 2").unwrap(), vec![I::Atomic(A::Boolean(false))]);
    assert_eq!(eval("every $x in () satisfies false()").unwrap(), vec![I::Atomic(A::Boolean(true))]);
}

#[rstest]
fn typed_for_binding_is_checked() {
    let err = eval("for $x as xs:string in (1, 2) return $x").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
}

#[rstest]
fn conditionals_and_switch() {
    assert_eq!(ints("if (1 = 1) then 1 else 2"), vec![1]);
    assert_eq!(ints("switch (3) case 1 return 10 case 3 return 30 default return 0"), vec![30]);
    assert_eq!(
        strings("typeswitch (1.5) case xs:integer return 'int' case xs:decimal return 'dec' default return 'other'"),
        vec!["dec"]
    );
}

#[rstest]
fn try_catch_exposes_error_variables() {
    assert_eq!(strings("try { 1 div 0 } catch err:FOAR0001 { 'div' }"), vec!["div"]);
    assert_eq!(strings("try { 1 div 0 } catch * { string($err:code) }"), vec!["err:FOAR0001"]);
    assert_eq!(
        strings("try { error(xs:QName('err:XYZ1'), 'boom') } catch err:XYZ1 { $err:description }"),
        vec!["boom"]
    );
}

#[rstest]
fn simple_map_and_arrow() {
    assert_eq!(ints("(1, 2, 3) ! (. * .)"), vec![1, 4, 9]);
    assert_eq!(strings("'abc' => upper-case()"), vec!["ABC"]);
    assert_eq!(strings("('a', 'b') => string-join('-')"), vec!["a-b"]);
}
