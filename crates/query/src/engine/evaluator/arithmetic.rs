//! Arithmetic over numerics, durations and dates/times.
use super::comparison::to_instant;
use super::{EvalCtx, Result};
use crate::engine::runtime::{Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::numeric::{ArithOp, NumKind, arith, classify, negate};
use crate::types::temporal::{chrono_to_seconds, seconds_to_chrono};
use crate::types::{Kind, cast_atomic};
use crate::xdm::XdmAtomicValue;
use chrono::{Months, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use std::rc::Rc;

fn unsupported(op: ArithOp, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!(
            "operator '{}' is not defined for {} and {}",
            op.symbol(),
            a.type_name(),
            b.type_name()
        ),
    )
}

fn duration_overflow() -> Error {
    Error::from_code(ErrorCode::FODT0002, "duration overflow")
}

fn datetime_overflow() -> Error {
    Error::from_code(ErrorCode::FODT0001, "date/time overflow")
}

fn untyped_to_double(v: XdmAtomicValue) -> Result<XdmAtomicValue> {
    match v {
        XdmAtomicValue::UntypedAtomic(_) => cast_atomic(v, Kind::Double, None),
        other => Ok(other),
    }
}

pub(crate) fn binary<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    op: ArithOp,
    a: XdmAtomicValue,
    b: XdmAtomicValue,
) -> Result<XdmAtomicValue> {
    let a = untyped_to_double(a)?;
    let b = untyped_to_double(b)?;
    if let (Some(x), Some(y)) = (classify(&a), classify(&b)) {
        return Ok(arith(op, x, y)?.into_atomic());
    }
    use XdmAtomicValue as V;
    match (&a, &b) {
        (V::YearMonthDuration(x), V::YearMonthDuration(y)) => match op {
            ArithOp::Add => x.checked_add(*y).map(V::YearMonthDuration).ok_or_else(duration_overflow),
            ArithOp::Sub => x.checked_sub(*y).map(V::YearMonthDuration).ok_or_else(duration_overflow),
            ArithOp::Div => ratio(Decimal::from(*x), Decimal::from(*y)),
            _ => Err(unsupported(op, &a, &b)),
        },
        (V::DayTimeDuration(x), V::DayTimeDuration(y)) => match op {
            ArithOp::Add => x.checked_add(*y).map(V::DayTimeDuration).ok_or_else(duration_overflow),
            ArithOp::Sub => x.checked_sub(*y).map(V::DayTimeDuration).ok_or_else(duration_overflow),
            ArithOp::Div => ratio(*x, *y),
            _ => Err(unsupported(op, &a, &b)),
        },
        (V::YearMonthDuration(m), n) | (n, V::YearMonthDuration(m)) if n.is_numeric() => {
            let factor = numeric_factor(n)?;
            let divide_duration = matches!(a, V::YearMonthDuration(_));
            match op {
                ArithOp::Mul => scale_months(*m, factor),
                ArithOp::Div if divide_duration => {
                    if factor.is_zero() {
                        return Err(Error::from_code(ErrorCode::FODT0002, "division of a duration by zero"));
                    }
                    scale_months(*m, NumKind::Double(1.0 / factor.to_f64()))
                }
                _ => Err(unsupported(op, &a, &b)),
            }
        }
        (V::DayTimeDuration(s), n) | (n, V::DayTimeDuration(s)) if n.is_numeric() => {
            let factor = numeric_factor(n)?;
            let divide_duration = matches!(a, V::DayTimeDuration(_));
            match op {
                ArithOp::Mul => scale_seconds(*s, factor, false),
                ArithOp::Div if divide_duration => {
                    if factor.is_zero() {
                        return Err(Error::from_code(ErrorCode::FODT0002, "division of a duration by zero"));
                    }
                    scale_seconds(*s, factor, true)
                }
                _ => Err(unsupported(op, &a, &b)),
            }
        }
        _ => temporal(ctx, op, &a, &b),
    }
}

fn ratio(x: Decimal, y: Decimal) -> Result<XdmAtomicValue> {
    if y.is_zero() {
        return Err(Error::from_code(ErrorCode::FOAR0001, "division by a zero duration"));
    }
    x.checked_div(y)
        .map(|d| XdmAtomicValue::Decimal(d.normalize()))
        .ok_or_else(|| Error::from_code(ErrorCode::FOAR0002, "numeric overflow"))
}

fn numeric_factor(v: &XdmAtomicValue) -> Result<NumKind> {
    let n = classify(v).ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "expected a numeric operand"))?;
    if n.is_nan() {
        return Err(Error::from_code(
            ErrorCode::FOCA0005,
            "NaN supplied as a duration multiplier or divisor",
        ));
    }
    Ok(n)
}

fn scale_months(months: i64, factor: NumKind) -> Result<XdmAtomicValue> {
    let scaled = match factor {
        NumKind::Int(i) => {
            return months
                .checked_mul(i)
                .map(XdmAtomicValue::YearMonthDuration)
                .ok_or_else(duration_overflow);
        }
        other => months as f64 * other.to_f64(),
    };
    if !scaled.is_finite() || scaled.abs() >= 9.2e18 {
        return Err(duration_overflow());
    }
    // round half towards positive infinity
    #[allow(clippy::cast_possible_truncation)]
    Ok(XdmAtomicValue::YearMonthDuration((scaled + 0.5).floor() as i64))
}

fn scale_seconds(seconds: Decimal, factor: NumKind, divide: bool) -> Result<XdmAtomicValue> {
    if !factor.to_f64().is_finite() {
        return if divide {
            Ok(XdmAtomicValue::DayTimeDuration(Decimal::ZERO))
        } else {
            Err(duration_overflow())
        };
    }
    let f = factor.to_decimal().ok_or_else(duration_overflow)?;
    let scaled = if divide {
        seconds.checked_div(f)
    } else {
        seconds.checked_mul(f)
    };
    // durations carry at most nanosecond precision
    scaled
        .map(|d| XdmAtomicValue::DayTimeDuration(d.round_dp(9).normalize()))
        .ok_or_else(duration_overflow)
}

fn add_months(dt: NaiveDateTime, months: i64) -> Result<NaiveDateTime> {
    let magnitude = u32::try_from(months.unsigned_abs()).map_err(|_| datetime_overflow())?;
    let shifted = if months >= 0 {
        dt.checked_add_months(Months::new(magnitude))
    } else {
        dt.checked_sub_months(Months::new(magnitude))
    };
    shifted.ok_or_else(datetime_overflow)
}

fn add_seconds(dt: NaiveDateTime, seconds: Decimal) -> Result<NaiveDateTime> {
    let delta = seconds_to_chrono(seconds).ok_or_else(datetime_overflow)?;
    dt.checked_add_signed(delta).ok_or_else(datetime_overflow)
}

/// Shift a date/time value by a signed duration.
fn shift(value: &XdmAtomicValue, months: i64, seconds: Decimal) -> Result<XdmAtomicValue> {
    use XdmAtomicValue as V;
    let apply = |dt: NaiveDateTime| -> Result<NaiveDateTime> { add_seconds(add_months(dt, months)?, seconds) };
    Ok(match value {
        V::DateTime { value, tz } => V::DateTime {
            value: apply(*value)?,
            tz: *tz,
        },
        V::DateTimeStamp { value, tz } => V::DateTimeStamp {
            value: apply(*value)?,
            tz: *tz,
        },
        V::Date { value, tz } => V::Date {
            value: apply(value.and_time(NaiveTime::MIN))?.date(),
            tz: *tz,
        },
        V::Time { value, tz } if months == 0 => {
            let delta = seconds_to_chrono(seconds).ok_or_else(datetime_overflow)?;
            V::Time {
                value: value.overflowing_add_signed(delta).0,
                tz: *tz,
            }
        }
        other => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("cannot add a duration to {}", other.type_name()),
            ));
        }
    })
}

fn is_date_time(v: &XdmAtomicValue) -> bool {
    matches!(
        v,
        XdmAtomicValue::DateTime { .. } | XdmAtomicValue::DateTimeStamp { .. }
    )
}

fn temporal<N: XdmNode>(
    ctx: &Rc<EvalCtx<N>>,
    op: ArithOp,
    a: &XdmAtomicValue,
    b: &XdmAtomicValue,
) -> Result<XdmAtomicValue> {
    use XdmAtomicValue as V;
    let sign = match op {
        ArithOp::Add => 1,
        ArithOp::Sub => -1,
        _ => return Err(unsupported(op, a, b)),
    };
    match (a, b) {
        (V::Date { .. }, V::Date { .. }) | (V::Time { .. }, V::Time { .. }) if sign < 0 => {
            difference(ctx, a, b)
        }
        (x, y) if sign < 0 && is_date_time(x) && is_date_time(y) => difference(ctx, a, b),
        (t, V::YearMonthDuration(m)) if !matches!(t, V::Time { .. }) => {
            let m = if sign < 0 {
                m.checked_neg().ok_or_else(duration_overflow)?
            } else {
                *m
            };
            shift(t, m, Decimal::ZERO)
        }
        (t, V::DayTimeDuration(s)) => shift(t, 0, if sign < 0 { -*s } else { *s }),
        (V::YearMonthDuration(m), t) if sign > 0 && !matches!(t, V::Time { .. }) => shift(t, *m, Decimal::ZERO),
        (V::DayTimeDuration(s), t) if sign > 0 => shift(t, 0, *s),
        _ => Err(unsupported(op, a, b)),
    }
}

/// `a - b` for two dates, two times or two dateTimes, as an xs:dayTimeDuration.
fn difference<N: XdmNode>(ctx: &Rc<EvalCtx<N>>, a: &XdmAtomicValue, b: &XdmAtomicValue) -> Result<XdmAtomicValue> {
    let x = to_instant(a, ctx.timezone)?;
    let y = to_instant(b, ctx.timezone)?;
    Ok(XdmAtomicValue::DayTimeDuration(chrono_to_seconds(
        x.signed_duration_since(y),
    )))
}

pub(crate) fn unary(v: XdmAtomicValue, negate_value: bool) -> Result<XdmAtomicValue> {
    let v = untyped_to_double(v)?;
    let Some(n) = classify(&v) else {
        return Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("unary operator is not defined for {}", v.type_name()),
        ));
    };
    if !negate_value {
        return Ok(v);
    }
    Ok(negate(n)?.into_atomic())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn months_scale_and_round_half_up() {
        assert_eq!(
            scale_months(3, NumKind::Double(0.5)).unwrap(),
            XdmAtomicValue::YearMonthDuration(2)
        );
        assert_eq!(
            scale_months(12, NumKind::Int(2)).unwrap(),
            XdmAtomicValue::YearMonthDuration(24)
        );
    }

    #[test]
    fn nan_multiplier_is_rejected() {
        let e = numeric_factor(&XdmAtomicValue::Double(f64::NAN)).unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::FOCA0005);
    }

    #[test]
    fn month_end_is_clamped() {
        let (d, _) = crate::types::temporal::parse_date("2024-01-31").unwrap();
        let v = XdmAtomicValue::Date { value: d, tz: None };
        let shifted = shift(&v, 1, Decimal::ZERO).unwrap();
        assert_eq!(shifted.string_value(), "2024-02-29");
    }

    #[test]
    fn unary_plus_keeps_the_type() {
        assert_eq!(
            unary(XdmAtomicValue::Integer(4), false).unwrap(),
            XdmAtomicValue::Integer(4)
        );
        assert_eq!(
            unary(XdmAtomicValue::Integer(4), true).unwrap(),
            XdmAtomicValue::Integer(-4)
        );
    }
}
