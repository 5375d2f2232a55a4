use rstest::rstest;
use sylva_query::engine::runtime::{DynamicContext, Error, ErrorCode, StaticContext};
use sylva_query::xdm::{XdmAtomicValue as A, XdmItem as I};
use sylva_query::{SimpleNode, compile, evaluate};

type N = SimpleNode;

fn eval(query: &str) -> Result<Vec<I<N>>, Error> {
    let q = compile(query, &StaticContext::default())?;
    evaluate::<N>(&q, &DynamicContext::default())
}

/// Space-joined canonical string values of the result.
fn text_of(query: &str) -> String {
    eval(query)
        .unwrap_or_else(|e| panic!("{query}: {e}"))
        .iter()
        .map(|i| i.as_atomic().map(A::string_value).unwrap_or_default())
        .collect::<Vec<_>>()
        .join(" ")
}

fn code_of(query: &str) -> ErrorCode {
    eval(query).expect_err(query).code_enum()
}

#[rstest]
#[case("avg((1, 2, 3))", "2")]
#[case("avg(())", "")]
#[case("sum(())", "0")]
#[case("sum((1, 2.5))", "3.5")]
#[case("max((3, 1, 2))", "3")]
#[case("min(('b', 'a'))", "a")]
#[case("count((1, 2, 3))", "3")]
#[case("round(2.5)", "3")]
#[case("round(-2.5)", "-2")]
#[case("round-half-to-even(2.5)", "2")]
#[case("abs(-4)", "4")]
#[case("floor(1.7)", "1")]
fn numeric_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(text_of(query), expected, "{query}");
}

#[rstest]
fn avg_of_strings_is_a_type_error() {
    assert_eq!(code_of("avg(('a', 'b'))"), ErrorCode::FORG0006);
}

#[rstest]
fn avg_returns_an_exact_decimal() {
    assert_eq!(eval("avg((1, 2))").unwrap(), vec![I::Atomic(A::Decimal("1.5".parse().unwrap()))]);
}

#[rstest]
#[case("concat('a', 1, ())", "a1")]
#[case("string-join(('a', 'b', 'c'), '-')", "a-b-c")]
#[case("substring('motor car', 6)", " car")]
#[case("substring('12345', 1.5, 2.6)", "234")]
#[case("substring-before('tattoo', 'attoo')", "t")]
#[case("substring-after('tattoo', 'tat')", "too")]
#[case("string-length('Straße')", "6")]
#[case("upper-case('abc')", "ABC")]
#[case("normalize-space('  a   b ')", "a b")]
#[case("translate('bar', 'abc', 'ABC')", "BAr")]
#[case("contains('abc', 'b')", "true")]
#[case("starts-with('abc', 'ab')", "true")]
#[case("ends-with('abc', 'x')", "false")]
#[case("compare('a', 'b')", "-1")]
#[case("string-to-codepoints('AB')", "65 66")]
#[case("codepoints-to-string((72, 105))", "Hi")]
#[case("encode-for-uri('a b/c')", "a%20b%2Fc")]
#[case("tokenize('a,b,,c', ',')", "a b  c")]
#[case("tokenize(' x  y ')", "x y")]
#[case("replace('abracadabra', 'a(.)', 'a$1$1')", "abbraccaddabbra")]
#[case("matches('Hello', '^h', 'i')", "true")]
fn string_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(text_of(query), expected, "{query}");
}

#[rstest]
fn invalid_codepoint_is_rejected() {
    assert_eq!(code_of("codepoints-to-string(0)"), ErrorCode::FOCH0001);
}

#[rstest]
#[case("reverse((1, 2, 3))", "3 2 1")]
#[case("subsequence((1, 2, 3, 4, 5), 2, 3)", "2 3 4")]
#[case("insert-before((1, 2), 2, 9)", "1 9 2")]
#[case("remove((1, 2, 3), 2)", "1 3")]
#[case("index-of((10, 20, 10), 10)", "1 3")]
#[case("distinct-values((1, 1.0, 'a', 'a'))", "1 a")]
#[case("head((5, 6))", "5")]
#[case("tail((5, 6, 7))", "6 7")]
#[case("deep-equal((1, 2), (1, 2))", "true")]
#[case("deep-equal([1, map{'a': 2}], [1, map{'a': 2}])", "true")]
#[case("exists(())", "false")]
fn sequence_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(text_of(query), expected, "{query}");
}

#[rstest]
#[case("zero-or-one((1, 2))", ErrorCode::FORG0003)]
#[case("one-or-more(())", ErrorCode::FORG0004)]
#[case("exactly-one(())", ErrorCode::FORG0005)]
fn cardinality_checks(#[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(code_of(query), code);
}

#[rstest]
#[case("for-each((1, 2), function($x) { $x * 10 })", "10 20")]
#[case("filter(1 to 6, function($x) { $x mod 2 = 0 })", "2 4 6")]
#[case("fold-left((1, 2, 3), 0, function($a, $b) { $a + $b })", "6")]
#[case("fold-right(('a', 'b'), '', concat#2)", "ab")]
#[case("for-each-pair((1, 2), (10, 20), function($a, $b) { $a + $b })", "11 22")]
#[case("sort((3, 1, 2))", "1 2 3")]
#[case("sort(('bb', 'a', 'ccc'), (), string-length#1)", "a bb ccc")]
#[case("apply(concat#3, ['a', 'b', 'c'])", "abc")]
#[case("function-arity(substring#2)", "2")]
#[case("let $f := substring(?, 2) return $f('abc')", "bc")]
#[case("let $inc := function($x) { $x + 1 } return (1, 2) ! $inc(.)", "2 3")]
fn higher_order_functions(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(text_of(query), expected, "{query}");
}

#[rstest]
#[case("map:size(map{'a': 1, 'b': 2})", "2")]
#[case("map:get(map{'a': 1}, 'a')", "1")]
#[case("map{'a': 1}?a", "1")]
#[case("map:contains(map{1: 'x'}, 1.0)", "true")]
#[case("map:keys(map:put(map{'a': 1}, 'b', 2))", "a b")]
#[case("map:size(map:remove(map{'a': 1, 'b': 2}, 'a'))", "1")]
#[case("map:merge((map{'a': 1}, map{'a': 2}))?a", "1")]
#[case("map:merge((map{'a': 1}, map{'a': 2}), map{'duplicates': 'use-last'})?a", "2")]
#[case("map:merge((map{'a': 1}, map{'a': 2}), map{'duplicates': 'combine'})?a", "1 2")]
#[case("map:for-each(map{'a': 1}, function($k, $v) { $k || $v })", "a1")]
#[case("array:size([1, (2, 3), ()])", "3")]
#[case("[10, 20, 30](2)", "20")]
#[case("array:append([1], 2)?*", "1 2")]
#[case("array:subarray([1, 2, 3, 4], 2, 2)?*", "2 3")]
#[case("array:remove([1, 2, 3], (1, 3))?*", "2")]
#[case("array:insert-before([1, 3], 2, 2)?*", "1 2 3")]
#[case("array:reverse([1, 2])?*", "2 1")]
#[case("array:join(([1], [2, 3]))?*", "1 2 3")]
#[case("array:flatten([1, [2, [3]]])", "1 2 3")]
#[case("array:filter([1, 2, 3], function($x) { $x > 1 })?*", "2 3")]
#[case("array:for-each([1, 2], function($x) { $x * 2 })?*", "2 4")]
#[case("array{1, 2, 3}?2", "2")]
fn maps_and_arrays(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(text_of(query), expected, "{query}");
}

#[rstest]
#[case("map:merge((map{'a': 1}, map{'a': 2}), map{'duplicates': 'reject'})", ErrorCode::FOJS0003)]
#[case("map:merge((), map{'duplicates': 'sometimes'})", ErrorCode::FOJS0005)]
#[case("[1, 2](3)", ErrorCode::FOAY0001)]
#[case("array:tail([])", ErrorCode::FOAY0001)]
#[case("apply(concat#2, ['a'])", ErrorCode::FOAP0001)]
fn map_and_array_errors(#[case] query: &str, #[case] code: ErrorCode) {
    assert_eq!(code_of(query), code, "{query}");
}

#[rstest]
#[case("year-from-date(xs:date('2024-02-29'))", "2024")]
#[case("month-from-dateTime(xs:dateTime('2024-02-29T10:30:00'))", "2")]
#[case("hours-from-time(xs:time('23:15:00'))", "23")]
#[case("seconds-from-time(xs:time('10:00:01.5'))", "1.5")]
#[case("days-from-duration(xs:dayTimeDuration('P3DT4H'))", "3")]
#[case("hours-from-duration(xs:dayTimeDuration('-P1DT2H'))", "-2")]
#[case("years-from-duration(xs:yearMonthDuration('P2Y11M'))", "2")]
#[case("timezone-from-dateTime(xs:dateTime('2024-01-01T00:00:00+02:00'))", "PT2H")]
fn date_time_components(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(text_of(query), expected, "{query}");
}

#[rstest]
fn error_function_carries_code_and_value() {
    let err = eval("error(xs:QName('err:CUSTOM1'), 'custom failure', 42)").unwrap_err();
    assert_eq!(err.code.local, "CUSTOM1");
    assert_eq!(err.message, "custom failure");
    assert_eq!(err.value.as_deref(), Some("42"));
}

#[rstest]
fn unknown_function_is_a_static_error() {
    assert_eq!(code_of("no-such-function(1)"), ErrorCode::XPST0017);
    assert_eq!(code_of("concat('a')"), ErrorCode::XPST0017);
}
