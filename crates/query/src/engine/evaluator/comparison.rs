//! Value and general comparisons over atomic values.
//!
//! Each pair of kind classes and operator resolves to a comparator function once;
//! [`ComparatorTable`] memoizes the resolution so repeated comparisons of the same
//! shape skip the dispatch.
use super::node_ops::atomize_item;
use super::{EvalCtx, Result};
use crate::compiler::ir::CompOp;
use crate::engine::collation::Collation;
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::numeric::classify;
use crate::types::{Kind, cast_atomic};
use crate::xdm::{Sequence, XdmAtomicValue};
use chrono::{FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use core::cmp::Ordering;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::RwLock;

/// Coarse grouping of atomic kinds that share a comparison routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KindClass {
    Numeric,
    /// string, its derived types, anyURI and untypedAtomic
    String,
    Boolean,
    QName,
    Notation,
    Duration,
    YearMonth,
    DayTime,
    DateTime,
    Date,
    Time,
    GYearMonth,
    GYear,
    GMonthDay,
    GDay,
    GMonth,
    Base64,
    Hex,
}

impl KindClass {
    pub fn of(value: &XdmAtomicValue) -> KindClass {
        use XdmAtomicValue as V;
        match value {
            V::Integer(_) | V::DerivedInteger { .. } | V::Decimal(_) | V::Float(_) | V::Double(_) => {
                KindClass::Numeric
            }
            V::UntypedAtomic(_) | V::String(_) | V::DerivedString { .. } | V::AnyUri(_) => KindClass::String,
            V::Boolean(_) => KindClass::Boolean,
            V::QName { .. } => KindClass::QName,
            V::Notation(_) => KindClass::Notation,
            V::Duration { .. } => KindClass::Duration,
            V::YearMonthDuration(_) => KindClass::YearMonth,
            V::DayTimeDuration(_) => KindClass::DayTime,
            V::DateTime { .. } | V::DateTimeStamp { .. } => KindClass::DateTime,
            V::Date { .. } => KindClass::Date,
            V::Time { .. } => KindClass::Time,
            V::GYearMonth { .. } => KindClass::GYearMonth,
            V::GYear { .. } => KindClass::GYear,
            V::GMonthDay { .. } => KindClass::GMonthDay,
            V::GDay { .. } => KindClass::GDay,
            V::GMonth { .. } => KindClass::GMonth,
            V::Base64Binary(_) => KindClass::Base64,
            V::HexBinary(_) => KindClass::Hex,
        }
    }
}

/// What a comparator needs besides its operands.
pub struct CompareEnv<'a> {
    pub collation: &'a dyn Collation,
    pub timezone: FixedOffset,
}

/// `None` when the operands are unordered (NaN).
type Comparator = fn(&XdmAtomicValue, &XdmAtomicValue, &CompareEnv<'_>) -> Result<Option<Ordering>>;

type TableKey = (KindClass, KindClass, CompOp);

/// Memo table of resolved comparators, shared by every evaluation of one engine.
#[derive(Default)]
pub struct ComparatorTable {
    entries: RwLock<HashMap<TableKey, Option<Comparator>>>,
}

impl ComparatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of resolved `(class, class, operator)` entries.
    pub fn len(&self) -> usize {
        self.entries.read().map_or(0, |e| e.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, a: KindClass, b: KindClass, op: CompOp) -> Option<Comparator> {
        let key = (a, b, op);
        if let Ok(entries) = self.entries.read()
            && let Some(hit) = entries.get(&key)
        {
            return *hit;
        }
        let resolved = select(a, b, op);
        tracing::trace!(?a, ?b, op = op.symbol(), found = resolved.is_some(), "comparator table miss");
        if let Ok(mut entries) = self.entries.write() {
            entries.insert(key, resolved);
        }
        resolved
    }

    /// `a op b` for two atomics that already went through untypedAtomic conversion.
    pub fn compare(
        &self,
        op: CompOp,
        a: &XdmAtomicValue,
        b: &XdmAtomicValue,
        env: &CompareEnv<'_>,
    ) -> Result<bool> {
        let Some(comparator) = self.lookup(KindClass::of(a), KindClass::of(b), op) else {
            return Err(incomparable(op, a, b));
        };
        Ok(match comparator(a, b, env)? {
            Some(ord) => op.holds(ord),
            None => op == CompOp::Ne,
        })
    }

    /// Ordering for sorting and min/max; XPTY0004 for kinds without an order.
    pub fn ordering(
        &self,
        a: &XdmAtomicValue,
        b: &XdmAtomicValue,
        env: &CompareEnv<'_>,
    ) -> Result<Option<Ordering>> {
        let Some(comparator) = self.lookup(KindClass::of(a), KindClass::of(b), CompOp::Lt) else {
            return Err(incomparable(CompOp::Lt, a, b));
        };
        comparator(a, b, env)
    }

    /// Equality used by `distinct-values`, `group by`, `switch` and friends: NaN equals
    /// NaN and incomparable values are simply different.
    pub fn equal(&self, a: &XdmAtomicValue, b: &XdmAtomicValue, env: &CompareEnv<'_>) -> bool {
        if a.is_nan() && b.is_nan() {
            return true;
        }
        let a = untyped_to_string(a.clone());
        let b = untyped_to_string(b.clone());
        match self.lookup(KindClass::of(&a), KindClass::of(&b), CompOp::Eq) {
            Some(comparator) => matches!(comparator(&a, &b, env), Ok(Some(Ordering::Equal))),
            None => false,
        }
    }
}

fn incomparable(op: CompOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!(
            "cannot compare {} with {} using '{}'",
            a.type_name(),
            b.type_name(),
            op.symbol()
        ),
    )
}

fn select(a: KindClass, b: KindClass, op: CompOp) -> Option<Comparator> {
    use KindClass as K;
    let ordered = !matches!(op, CompOp::Eq | CompOp::Ne);
    let comparator: Comparator = match (a, b) {
        (K::Numeric, K::Numeric) => compare_numeric,
        (K::String, K::String) => compare_string,
        (K::Boolean, K::Boolean) => compare_boolean,
        (K::YearMonth, K::YearMonth) | (K::DayTime, K::DayTime) => compare_duration,
        (K::Duration | K::YearMonth | K::DayTime, K::Duration | K::YearMonth | K::DayTime) if !ordered => {
            compare_duration
        }
        (K::DateTime, K::DateTime) | (K::Date, K::Date) | (K::Time, K::Time) => compare_temporal,
        (K::GYearMonth, K::GYearMonth)
        | (K::GYear, K::GYear)
        | (K::GMonthDay, K::GMonthDay)
        | (K::GDay, K::GDay)
        | (K::GMonth, K::GMonth)
            if !ordered =>
        {
            compare_temporal
        }
        (K::QName, K::QName) if !ordered => compare_qname,
        (K::Notation, K::Notation) if !ordered => compare_notation,
        (K::Base64, K::Base64) | (K::Hex, K::Hex) if !ordered => compare_binary,
        _ => return None,
    };
    Some(comparator)
}

fn compare_numeric(a: &XdmAtomicValue, b: &XdmAtomicValue, _: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (classify(a), classify(b)) {
        (Some(x), Some(y)) => Ok(x.partial_cmp(y)),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn string_of(v: &XdmAtomicValue) -> Option<&str> {
    match v {
        XdmAtomicValue::String(s)
        | XdmAtomicValue::UntypedAtomic(s)
        | XdmAtomicValue::AnyUri(s)
        | XdmAtomicValue::DerivedString { value: s, .. } => Some(s),
        _ => None,
    }
}

fn compare_string(a: &XdmAtomicValue, b: &XdmAtomicValue, env: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (string_of(a), string_of(b)) {
        (Some(x), Some(y)) => Ok(Some(env.collation.compare(x, y))),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn compare_boolean(a: &XdmAtomicValue, b: &XdmAtomicValue, _: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (a, b) {
        (XdmAtomicValue::Boolean(x), XdmAtomicValue::Boolean(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn duration_parts(v: &XdmAtomicValue) -> Option<(i64, rust_decimal::Decimal)> {
    match v {
        XdmAtomicValue::Duration { months, seconds } => Some((*months, *seconds)),
        XdmAtomicValue::YearMonthDuration(m) => Some((*m, rust_decimal::Decimal::ZERO)),
        XdmAtomicValue::DayTimeDuration(s) => Some((0, *s)),
        _ => None,
    }
}

fn compare_duration(a: &XdmAtomicValue, b: &XdmAtomicValue, _: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (duration_parts(a), duration_parts(b)) {
        (Some((ma, sa)), Some((mb, sb))) => Ok(Some(ma.cmp(&mb).then(sa.cmp(&sb)))),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn reference_date(year: i32, month: u8, day: u8) -> Result<NaiveDate> {
    NaiveDate::from_ymd_opt(year, u32::from(month), u32::from(day))
        .ok_or_else(|| Error::from_code(ErrorCode::FODT0001, "date out of range"))
}

/// Point on the UTC time line; values without a timezone take the implicit one.
/// Times and the g* kinds are anchored on 1972-12-31.
pub(crate) fn to_instant(v: &XdmAtomicValue, implicit: FixedOffset) -> Result<NaiveDateTime> {
    use XdmAtomicValue as V;
    let (local, tz) = match v {
        V::DateTime { value, tz } => (*value, *tz),
        V::DateTimeStamp { value, tz } => (*value, Some(*tz)),
        V::Date { value, tz } => (value.and_time(NaiveTime::MIN), *tz),
        V::Time { value, tz } => (reference_date(1972, 12, 31)?.and_time(*value), *tz),
        V::GYearMonth { year, month, tz } => (reference_date(*year, *month, 1)?.and_time(NaiveTime::MIN), *tz),
        V::GYear { year, tz } => (reference_date(*year, 1, 1)?.and_time(NaiveTime::MIN), *tz),
        V::GMonthDay { month, day, tz } => (reference_date(1972, *month, *day)?.and_time(NaiveTime::MIN), *tz),
        V::GDay { day, tz } => (reference_date(1972, 12, *day)?.and_time(NaiveTime::MIN), *tz),
        V::GMonth { month, tz } => (reference_date(1972, *month, 1)?.and_time(NaiveTime::MIN), *tz),
        other => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("{} is not a date or time value", other.type_name()),
            ));
        }
    };
    let offset = tz.unwrap_or(implicit).local_minus_utc();
    local
        .checked_sub_signed(chrono::Duration::seconds(i64::from(offset)))
        .ok_or_else(|| Error::from_code(ErrorCode::FODT0001, "date/time overflow during normalization"))
}

fn compare_temporal(a: &XdmAtomicValue, b: &XdmAtomicValue, env: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    let x = to_instant(a, env.timezone)?;
    let y = to_instant(b, env.timezone)?;
    Ok(Some(x.cmp(&y)))
}

fn compare_qname(a: &XdmAtomicValue, b: &XdmAtomicValue, _: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (a, b) {
        (
            XdmAtomicValue::QName {
                ns_uri: na, local: la, ..
            },
            XdmAtomicValue::QName {
                ns_uri: nb, local: lb, ..
            },
        ) => Ok(Some((na, la).cmp(&(nb, lb)))),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn compare_notation(a: &XdmAtomicValue, b: &XdmAtomicValue, _: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (a, b) {
        (XdmAtomicValue::Notation(x), XdmAtomicValue::Notation(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn compare_binary(a: &XdmAtomicValue, b: &XdmAtomicValue, _: &CompareEnv<'_>) -> Result<Option<Ordering>> {
    match (a, b) {
        (XdmAtomicValue::Base64Binary(x), XdmAtomicValue::Base64Binary(y))
        | (XdmAtomicValue::HexBinary(x), XdmAtomicValue::HexBinary(y)) => Ok(Some(x.cmp(y))),
        _ => Err(incomparable(CompOp::Eq, a, b)),
    }
}

fn untyped_to_string(v: XdmAtomicValue) -> XdmAtomicValue {
    match v {
        XdmAtomicValue::UntypedAtomic(s) => XdmAtomicValue::String(s),
        other => other,
    }
}

fn env_of<N: XdmNode>(ctx: &EvalCtx<N>) -> CompareEnv<'_> {
    CompareEnv {
        collation: ctx.collation.as_ref(),
        timezone: ctx.timezone,
    }
}

/// `eq ne lt le gt ge`: untypedAtomic operands compare as strings.
pub(crate) fn value_compare<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    op: CompOp,
    a: XdmAtomicValue,
    b: XdmAtomicValue,
) -> Result<bool> {
    let a = untyped_to_string(a);
    let b = untyped_to_string(b);
    ctx.comparators.compare(op, &a, &b, &env_of(ctx))
}

/// Convert an untypedAtomic operand of a general comparison against `other`.
fn general_operand(v: &XdmAtomicValue, other: &XdmAtomicValue) -> Result<XdmAtomicValue> {
    let XdmAtomicValue::UntypedAtomic(s) = v else {
        return Ok(v.clone());
    };
    match other {
        XdmAtomicValue::UntypedAtomic(_)
        | XdmAtomicValue::String(_)
        | XdmAtomicValue::DerivedString { .. }
        | XdmAtomicValue::AnyUri(_) => Ok(XdmAtomicValue::String(s.clone())),
        o if o.is_numeric() => cast_atomic(v.clone(), Kind::Double, None),
        o => cast_atomic(v.clone(), o.kind().primitive(), None),
    }
}

/// `= != < <= > >=`: true when some pair of atomized operands satisfies `op`.
///
/// Both operands are pulled lazily. Right-hand values are buffered as they are
/// read, so each left value is checked against what is already known before
/// the right side is pulled further.
pub(crate) fn general_compare<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    op: CompOp,
    left: Sequence<N>,
    right: Sequence<N>,
) -> Result<bool> {
    let env = env_of(ctx);
    let mut right = right.into_iter();
    let mut right_done = false;
    let mut rhs: Vec<XdmAtomicValue> = Vec::new();
    let mut lhs = Vec::with_capacity(1);
    let mut pulled = Vec::with_capacity(1);
    for item in left {
        lhs.clear();
        atomize_item(item?, &mut lhs)?;
        for a in &lhs {
            for b in &rhs {
                if pair_holds(ctx, op, a, b, &env)? {
                    return Ok(true);
                }
            }
            while !right_done {
                let Some(next) = right.next() else {
                    right_done = true;
                    break;
                };
                pulled.clear();
                atomize_item(next?, &mut pulled)?;
                for b in &pulled {
                    if pair_holds(ctx, op, a, b, &env)? {
                        return Ok(true);
                    }
                }
                rhs.append(&mut pulled);
            }
        }
        if right_done && rhs.is_empty() {
            return Ok(false);
        }
    }
    Ok(false)
}

fn pair_holds<N: XdmNode>(
    ctx: &EvalCtx<N>,
    op: CompOp,
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    env: &CompareEnv<'_>,
) -> Result<bool> {
    let x = general_operand(a, b)?;
    let y = general_operand(b, a)?;
    ctx.comparators.compare(op, &x, &y, env)
}

/// Equality for `switch` and grouping keys.
pub(crate) fn atomic_equal<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
    collation: &dyn Collation,
) -> bool {
    let env = CompareEnv {
        collation,
        timezone: ctx.timezone,
    };
    ctx.comparators.equal(a, b, &env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::CodepointCollation;
    use chrono::Offset;
    use rust_decimal::Decimal;

    fn env() -> CompareEnv<'static> {
        CompareEnv {
            collation: &CodepointCollation,
            timezone: chrono::Utc.fix(),
        }
    }

    #[test]
    fn nan_is_only_unequal() {
        let table = ComparatorTable::new();
        let nan = XdmAtomicValue::Double(f64::NAN);
        for op in [CompOp::Eq, CompOp::Lt, CompOp::Ge] {
            assert!(!table.compare(op, &nan, &nan, &env()).unwrap());
        }
        assert!(table.compare(CompOp::Ne, &nan, &nan, &env()).unwrap());
        assert!(table.equal(&nan, &nan, &env()));
    }

    #[test]
    fn entries_are_memoized_per_shape() {
        let table = ComparatorTable::new();
        let one = XdmAtomicValue::Integer(1);
        let half = XdmAtomicValue::Decimal(Decimal::new(5, 1));
        assert!(table.compare(CompOp::Gt, &one, &half, &env()).unwrap());
        assert!(!table.compare(CompOp::Gt, &half, &one, &env()).unwrap());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn durations_order_only_within_subtypes() {
        let table = ComparatorTable::new();
        let ym = XdmAtomicValue::YearMonthDuration(12);
        let dt = XdmAtomicValue::DayTimeDuration(Decimal::ZERO);
        assert!(!table.compare(CompOp::Eq, &ym, &dt, &env()).unwrap());
        let err = table.compare(CompOp::Lt, &ym, &dt, &env()).unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::XPTY0004);
        let zero_ym = XdmAtomicValue::YearMonthDuration(0);
        assert!(table.compare(CompOp::Eq, &zero_ym, &dt, &env()).unwrap());
    }

    #[test]
    fn qnames_have_no_order() {
        let table = ComparatorTable::new();
        let q = XdmAtomicValue::QName {
            ns_uri: None,
            prefix: None,
            local: "a".into(),
        };
        assert!(table.compare(CompOp::Eq, &q, &q, &env()).unwrap());
        assert!(table.compare(CompOp::Lt, &q, &q, &env()).is_err());
    }

    #[test]
    fn timezones_are_normalized() {
        let table = ComparatorTable::new();
        let (a, ta) = crate::types::temporal::parse_date_time("2024-01-01T12:00:00+02:00").unwrap();
        let (b, tb) = crate::types::temporal::parse_date_time("2024-01-01T10:00:00Z").unwrap();
        let a = XdmAtomicValue::DateTime { value: a, tz: ta };
        let b = XdmAtomicValue::DateTime { value: b, tz: tb };
        assert!(table.compare(CompOp::Eq, &a, &b, &env()).unwrap());
    }
}
