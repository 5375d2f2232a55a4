use rstest::rstest;
use sylva_query::engine::runtime::{DynamicContext, Error, ErrorCode, StaticContext};
use sylva_query::xdm::{XdmAtomicValue as A, XdmItem as I};
use sylva_query::{SimpleNode, compile, evaluate};

type N = SimpleNode;

fn eval(query: &str) -> Result<Vec<I<N>>, Error> {
    let q = compile(query, &StaticContext::default())?;
    evaluate::<N>(&q, &DynamicContext::default())
}

fn single(query: &str) -> A {
    match eval(query).unwrap_or_else(|e| panic!("{query}: {e}")).as_slice() {
        [I::Atomic(a)] => a.clone(),
        other => panic!("{query}: expected one atomic value, got {other:?}"),
    }
}

fn truth(query: &str) -> bool {
    match single(query) {
        A::Boolean(b) => b,
        other => panic!("{query}: expected a boolean, got {other:?}"),
    }
}

#[rstest]
#[case("'2024-13-01' cast as xs:date")]
#[case("'2023-02-29' cast as xs:date")]
#[case("'abc' cast as xs:integer")]
#[case("'300' cast as xs:byte")]
#[case("'P1Y2' cast as xs:duration")]
#[case("'maybe' cast as xs:boolean")]
fn invalid_lexical_forms_raise_forg0001(#[case] query: &str) {
    assert_eq!(eval(query).unwrap_err().code_enum(), ErrorCode::FORG0001, "{query}");
}

#[rstest]
#[case("'12' cast as xs:integer", A::Integer(12))]
#[case("' true ' cast as xs:boolean", A::Boolean(true))]
#[case("1 cast as xs:boolean", A::Boolean(true))]
#[case("3.7 cast as xs:integer", A::Integer(3))]
#[case("'-0' cast as xs:double", A::Double(-0.0))]
#[case("xs:yearMonthDuration('P1Y2M')", A::YearMonthDuration(14))]
fn successful_casts(#[case] query: &str, #[case] expected: A) {
    assert_eq!(single(query), expected, "{query}");
}

#[rstest]
#[case("'INF' cast as xs:double", "INF")]
#[case("1e0 div 0", "INF")]
#[case("xs:double('NaN')", "NaN")]
#[case("1.0e6", "1.0E6")]
#[case("xs:decimal('1.50')", "1.5")]
#[case("xs:date('2024-02-29')", "2024-02-29")]
#[case("xs:dateTime('2024-01-01T10:00:00Z')", "2024-01-01T10:00:00Z")]
#[case("xs:dayTimeDuration('PT36H')", "P1DT12H")]
#[case("xs:hexBinary('0aff')", "0AFF")]
fn canonical_lexical_forms(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(single(query).string_value(), expected, "{query}");
}

#[rstest]
#[case("'12' castable as xs:integer", true)]
#[case("'x' castable as xs:integer", false)]
#[case("() castable as xs:integer?", true)]
#[case("() castable as xs:integer", false)]
#[case("1 instance of xs:integer", true)]
#[case("1 instance of xs:decimal", true)]
#[case("1.0 instance of xs:integer", false)]
#[case("(1, 2) instance of xs:integer+", true)]
#[case("() instance of xs:integer?", true)]
#[case("'a' instance of xs:anyAtomicType", true)]
#[case("map{} instance of function(*)", true)]
#[case("[1] instance of array(xs:integer)", true)]
#[case("function($x) { $x } instance of function(item()*) as item()*", true)]
fn type_tests(#[case] query: &str, #[case] expected: bool) {
    assert_eq!(truth(query), expected, "{query}");
}

#[rstest]
fn treat_as_failure() {
    let err = eval("(1, 2) treat as xs:integer").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::XPDY0050);
}

#[rstest]
#[case("1 + 2", A::Integer(3))]
#[case("7 idiv 2", A::Integer(3))]
#[case("-7 mod 2", A::Integer(-1))]
#[case("1 + 1.5", A::Decimal("2.5".parse().unwrap()))]
#[case("1 + 1.5e0", A::Double(2.5))]
#[case("xs:float(1) + 1", A::Float(2.0))]
fn numeric_promotion(#[case] query: &str, #[case] expected: A) {
    assert_eq!(single(query), expected, "{query}");
}

#[rstest]
fn integer_division_by_zero() {
    assert_eq!(eval("1 idiv 0").unwrap_err().code_enum(), ErrorCode::FOAR0001);
    assert_eq!(eval("1 div 0").unwrap_err().code_enum(), ErrorCode::FOAR0001);
}

#[rstest]
#[case("xs:date('2024-03-01') - xs:date('2024-02-28')", "P2D")]
#[case("xs:date('2024-01-31') + xs:yearMonthDuration('P1M')", "2024-02-29")]
#[case("xs:dayTimeDuration('PT1H') * 2", "PT2H")]
#[case("xs:yearMonthDuration('P1Y') div xs:yearMonthDuration('P3M')", "4")]
fn temporal_arithmetic(#[case] query: &str, #[case] expected: &str) {
    assert_eq!(single(query).string_value(), expected, "{query}");
}

#[rstest]
#[case("1 = 1.0", true)]
#[case("'a' < 'b'", true)]
#[case("(1, 2) = (2, 3)", true)]
#[case("(1, 2) != (1, 2)", true)]
#[case("() = ()", false)]
#[case("1 eq 1", true)]
#[case("xs:date('2024-01-01') lt xs:date('2024-01-02')", true)]
#[case("xs:dateTime('2024-01-01T12:00:00+01:00') eq xs:dateTime('2024-01-01T11:00:00Z')", true)]
#[case("xs:double('NaN') = xs:double('NaN')", false)]
fn comparisons(#[case] query: &str, #[case] expected: bool) {
    assert_eq!(truth(query), expected, "{query}");
}

#[rstest]
#[case("(for $i in (1, 0) return 1 div $i) = 1")]
#[case("1 = (for $i in (1, 0) return 1 div $i)")]
#[case("(2, 1) = (for $i in (2, 1, 0) return 2 idiv $i)")]
fn general_comparison_stops_at_first_match(#[case] query: &str) {
    assert!(truth(query), "{query}");
}

#[rstest]
fn general_comparison_reaches_errors_before_a_match() {
    let err = eval("1 = (for $i in (0, 1) return 1 div $i)").unwrap_err();
    assert_eq!(err.code_enum(), ErrorCode::FOAR0001);
}

#[rstest]
#[case("1 eq 'a'")]
#[case("(1, 2) eq 1")]
#[case("xs:date('2024-01-01') lt 1")]
fn incomparable_values(#[case] query: &str) {
    assert_eq!(eval(query).unwrap_err().code_enum(), ErrorCode::XPTY0004, "{query}");
}

#[rstest]
fn value_comparison_with_empty_is_empty() {
    assert!(eval("() eq 1").unwrap().is_empty());
}

#[rstest]
#[case("boolean(())", false)]
#[case("boolean(0)", false)]
#[case("boolean('')", false)]
#[case("boolean('0')", true)]
#[case("boolean(xs:double('NaN'))", false)]
fn effective_boolean_value(#[case] query: &str, #[case] expected: bool) {
    assert_eq!(truth(query), expected, "{query}");
}

#[rstest]
fn ebv_of_multiple_atomics_raises() {
    assert_eq!(eval("boolean((1, 2))").unwrap_err().code_enum(), ErrorCode::FORG0006);
}
