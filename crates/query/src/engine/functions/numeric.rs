use super::common::{FnResult, atomic, collation_arg, compare_env, count_to_i64, double_arg, integer, opt_atomic};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::numeric::{ArithOp, NumKind, NumericKind, arith, classify};
use crate::types::{Kind, cast_atomic};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};
use core::cmp::Ordering;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

fn overflow() -> Error {
    Error::from_code(ErrorCode::FOAR0002, "numeric overflow")
}

fn numeric_unary<N>(args: &[XdmSequence<N>], f: impl Fn(NumKind) -> Result<NumKind, Error>) -> FnResult<N> {
    match opt_atomic(&args[0]).and_then(classify) {
        Some(n) => Ok(atomic(f(n)?.into_atomic())),
        None => Ok(Vec::new()),
    }
}

pub(super) fn abs_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    numeric_unary(args, |n| {
        Ok(match n {
            NumKind::Int(i) => NumKind::Int(i.checked_abs().ok_or_else(overflow)?),
            NumKind::Dec(d) => NumKind::Dec(d.abs()),
            NumKind::Float(f) => NumKind::Float(f.abs()),
            NumKind::Double(d) => NumKind::Double(d.abs()),
        })
    })
}

pub(super) fn ceiling_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    numeric_unary(args, |n| {
        Ok(match n {
            NumKind::Int(i) => NumKind::Int(i),
            NumKind::Dec(d) => NumKind::Dec(d.ceil()),
            NumKind::Float(f) => NumKind::Float(f.ceil()),
            NumKind::Double(d) => NumKind::Double(d.ceil()),
        })
    })
}

pub(super) fn floor_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    numeric_unary(args, |n| {
        Ok(match n {
            NumKind::Int(i) => NumKind::Int(i),
            NumKind::Dec(d) => NumKind::Dec(d.floor()),
            NumKind::Float(f) => NumKind::Float(f.floor()),
            NumKind::Double(d) => NumKind::Double(d.floor()),
        })
    })
}

fn precision_arg<N>(args: &[XdmSequence<N>]) -> Result<i64, Error> {
    match args.get(1) {
        Some(p) => super::common::int_arg(p),
        None => Ok(0),
    }
}

/// Round an integer to a negative precision (`-2` rounds to hundreds).
fn round_integer(i: i64, precision: i64, half_even: bool) -> Result<i64, Error> {
    if precision >= 0 {
        return Ok(i);
    }
    if precision < -18 {
        return Ok(0);
    }
    let factor = 10_i128.pow(u32::try_from(-precision).unwrap_or(0));
    let value = i128::from(i);
    let low = value.div_euclid(factor) * factor;
    let rest = value - low;
    let up = match (rest * 2).cmp(&factor) {
        Ordering::Greater => true,
        Ordering::Less => false,
        Ordering::Equal if half_even => (low / factor) % 2 != 0,
        Ordering::Equal => true,
    };
    let rounded = if up { low + factor } else { low };
    i64::try_from(rounded).map_err(|_| overflow())
}

fn round_decimal(d: Decimal, precision: i64, half_even: bool) -> Decimal {
    let strategy = if half_even {
        RoundingStrategy::MidpointNearestEven
    } else if d.is_sign_negative() {
        RoundingStrategy::MidpointTowardZero
    } else {
        RoundingStrategy::MidpointAwayFromZero
    };
    if precision >= 0 {
        return d.round_dp_with_strategy(u32::try_from(precision).unwrap_or(u32::MAX), strategy);
    }
    let exp = u32::try_from(-precision).unwrap_or(u32::MAX).min(28);
    let scale = Decimal::from_i128_with_scale(10_i128.pow(exp), 0);
    (d / scale).round_dp_with_strategy(0, strategy) * scale
}

fn round_double(d: f64, precision: i64, half_even: bool) -> f64 {
    if !d.is_finite() || d == 0.0 {
        return d;
    }
    if half_even && let Some(dec) = Decimal::from_f64(d) {
        return round_decimal(dec, precision, true).to_f64().unwrap_or(d);
    }
    let factor = 10f64.powi(i32::try_from(precision).unwrap_or(0));
    let rounded = (d * factor + 0.5).floor() / factor;
    if rounded == 0.0 && d < 0.0 { -0.0 } else { rounded }
}

fn round_impl<N>(args: &[XdmSequence<N>], half_even: bool) -> FnResult<N> {
    let precision = precision_arg(args)?;
    numeric_unary(args, |n| {
        Ok(match n {
            NumKind::Int(i) => NumKind::Int(round_integer(i, precision, half_even)?),
            NumKind::Dec(d) => NumKind::Dec(round_decimal(d, precision, half_even)),
            #[allow(clippy::cast_possible_truncation)]
            NumKind::Float(f) => NumKind::Float(round_double(f64::from(f), precision, half_even) as f32),
            NumKind::Double(d) => NumKind::Double(round_double(d, precision, half_even)),
        })
    })
}

pub(super) fn round_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    round_impl(args, false)
}

pub(super) fn round_half_to_even_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    round_impl(args, true)
}

/// Operands of an aggregate: untypedAtomic becomes xs:double.
fn aggregate_operands<N>(arg: &[XdmItem<N>]) -> Result<Vec<XdmAtomicValue>, Error> {
    arg.iter()
        .filter_map(XdmItem::as_atomic)
        .map(|a| match a {
            XdmAtomicValue::UntypedAtomic(_) => cast_atomic(a.clone(), Kind::Double, None),
            other => Ok(other.clone()),
        })
        .collect()
}

fn not_summable(what: &str, v: &XdmAtomicValue) -> Error {
    Error::from_code(
        ErrorCode::FORG0006,
        format!("fn:{what} is not defined for {}", v.type_name()),
    )
}

enum Total {
    Number(NumKind),
    YearMonth(i64),
    DayTime(Decimal),
}

fn total(what: &str, values: &[XdmAtomicValue]) -> Result<Option<Total>, Error> {
    let mut acc: Option<Total> = None;
    for v in values {
        acc = Some(match (acc, v) {
            (None, v) => match (classify(v), v) {
                (Some(n), _) => Total::Number(n),
                (None, XdmAtomicValue::YearMonthDuration(m)) => Total::YearMonth(*m),
                (None, XdmAtomicValue::DayTimeDuration(s)) => Total::DayTime(*s),
                _ => return Err(not_summable(what, v)),
            },
            (Some(Total::Number(a)), v) => match classify(v) {
                Some(b) => Total::Number(arith(ArithOp::Add, a, b)?),
                None => return Err(not_summable(what, v)),
            },
            (Some(Total::YearMonth(a)), XdmAtomicValue::YearMonthDuration(b)) => {
                Total::YearMonth(a.checked_add(*b).ok_or_else(overflow)?)
            }
            (Some(Total::DayTime(a)), XdmAtomicValue::DayTimeDuration(b)) => {
                Total::DayTime(a.checked_add(*b).ok_or_else(overflow)?)
            }
            (Some(_), v) => return Err(not_summable(what, v)),
        });
    }
    Ok(acc)
}

pub(super) fn sum_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let values = aggregate_operands(&args[0])?;
    Ok(match total("sum", &values)? {
        None => match args.get(1) {
            Some(zero) => zero.clone(),
            None => integer(0),
        },
        Some(Total::Number(n)) => atomic(n.into_atomic()),
        Some(Total::YearMonth(m)) => atomic(XdmAtomicValue::YearMonthDuration(m)),
        Some(Total::DayTime(s)) => atomic(XdmAtomicValue::DayTimeDuration(s)),
    })
}

pub(super) fn avg_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let values = aggregate_operands(&args[0])?;
    let count = count_to_i64(values.len());
    Ok(match total("avg", &values)? {
        None => Vec::new(),
        Some(Total::Number(n)) => atomic(arith(ArithOp::Div, n, NumKind::Int(count))?.into_atomic()),
        Some(Total::YearMonth(m)) => {
            let mean = (Decimal::from(m) / Decimal::from(count))
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
            atomic(XdmAtomicValue::YearMonthDuration(mean.to_i64().ok_or_else(overflow)?))
        }
        Some(Total::DayTime(s)) => atomic(XdmAtomicValue::DayTimeDuration(s / Decimal::from(count))),
    })
}

fn extreme<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>], want: Ordering, what: &str) -> FnResult<N> {
    let collation = collation_arg(ctx, args, 1)?;
    let env = compare_env(ctx, collation.as_ref());
    let table = ctx.comparators;
    let mut values = aggregate_operands(&args[0])?.into_iter();
    let Some(mut best) = values.next() else {
        return Ok(Vec::new());
    };
    let mut kind = classify(&best).map(NumKind::kind);
    let mut nan = best.is_nan();
    for v in values {
        kind = match (kind, classify(&v)) {
            (Some(k), Some(n)) => Some(k.promote(n.kind())),
            (None, None) => None,
            _ => {
                return Err(Error::from_code(
                    ErrorCode::FORG0006,
                    format!("fn:{what} cannot compare {} with {}", best.type_name(), v.type_name()),
                ));
            }
        };
        nan |= v.is_nan();
        let ord = table.ordering(&v, &best, &env).map_err(|e| {
            Error::from_code(ErrorCode::FORG0006, format!("fn:{what}: {}", e.message))
        })?;
        if ord == Some(want) {
            best = v;
        }
    }
    if nan {
        return Ok(atomic(match kind {
            Some(NumericKind::Float) => XdmAtomicValue::Float(f32::NAN),
            _ => XdmAtomicValue::Double(f64::NAN),
        }));
    }
    if let (Some(k), Some(n)) = (kind, classify(&best)) {
        best = n.promote_to(k).into_atomic();
    }
    Ok(atomic(match best {
        XdmAtomicValue::AnyUri(s) => XdmAtomicValue::String(s),
        other => other,
    }))
}

pub(super) fn min_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    extreme(ctx, args, Ordering::Less, "min")
}

pub(super) fn max_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    extreme(ctx, args, Ordering::Greater, "max")
}

pub(super) fn count_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(integer(count_to_i64(args[0].len())))
}

pub(super) fn pi_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(atomic(XdmAtomicValue::Double(core::f64::consts::PI)))
}

pub(super) fn sqrt_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(double_arg(&args[0])
        .map(|d| atomic(XdmAtomicValue::Double(d.sqrt())))
        .unwrap_or_default())
}

pub(super) fn pow_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(x) = double_arg(&args[0]) else {
        return Ok(Vec::new());
    };
    let y = double_arg(&args[1]).unwrap_or(f64::NAN);
    Ok(atomic(XdmAtomicValue::Double(x.powf(y))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_round_to_negative_precision() {
        assert_eq!(round_integer(1250, -2, false).unwrap(), 1300);
        assert_eq!(round_integer(1250, -2, true).unwrap(), 1200);
        assert_eq!(round_integer(-1250, -2, false).unwrap(), -1200);
        assert_eq!(round_integer(7, 0, false).unwrap(), 7);
    }

    #[test]
    fn decimals_round_half_up() {
        assert_eq!(round_decimal(Decimal::new(25, 1), 0, false), Decimal::from(3));
        assert_eq!(round_decimal(Decimal::new(-25, 1), 0, false), Decimal::from(-2));
        assert_eq!(round_decimal(Decimal::new(25, 1), 0, true), Decimal::from(2));
        assert_eq!(round_decimal(Decimal::new(1234, 2), 1, false), Decimal::new(123, 1));
    }

    #[test]
    fn doubles_keep_negative_zero() {
        assert!(round_double(-0.4, 0, false).is_sign_negative());
        assert!((round_double(2.5, 0, false) - 3.0).abs() < f64::EPSILON);
        assert!((round_double(2.5, 0, true) - 2.0).abs() < f64::EPSILON);
    }
}
