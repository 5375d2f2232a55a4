use super::common::{FnResult, atomic, opt_atomic};
use crate::engine::runtime::CallCtx;
use crate::model::XdmNode;
use crate::xdm::{XdmAtomicValue, XdmSequence};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike};
use rust_decimal::Decimal;

fn tz_duration(tz: FixedOffset) -> XdmAtomicValue {
    XdmAtomicValue::DayTimeDuration(Decimal::from(tz.local_minus_utc()))
}

pub(super) fn current_date_time_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(atomic(XdmAtomicValue::DateTimeStamp {
        value: ctx.now.naive_local(),
        tz: *ctx.now.offset(),
    }))
}

pub(super) fn current_date_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(atomic(XdmAtomicValue::Date {
        value: ctx.now.date_naive(),
        tz: Some(*ctx.now.offset()),
    }))
}

pub(super) fn current_time_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(atomic(XdmAtomicValue::Time {
        value: ctx.now.time(),
        tz: Some(*ctx.now.offset()),
    }))
}

pub(super) fn implicit_timezone_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, _args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(atomic(tz_duration(ctx.implicit_timezone)))
}

/// Applies `f` to the single date/time argument; the empty sequence yields the empty sequence.
fn component<N>(args: &[XdmSequence<N>], f: impl FnOnce(&XdmAtomicValue) -> Option<XdmAtomicValue>) -> FnResult<N> {
    Ok(opt_atomic(&args[0]).and_then(f).map(atomic).unwrap_or_default())
}

fn date_part(v: &XdmAtomicValue) -> Option<NaiveDate> {
    match v {
        XdmAtomicValue::DateTime { value, .. } | XdmAtomicValue::DateTimeStamp { value, .. } => Some(value.date()),
        XdmAtomicValue::Date { value, .. } => Some(*value),
        _ => None,
    }
}

fn time_part(v: &XdmAtomicValue) -> Option<NaiveTime> {
    match v {
        XdmAtomicValue::DateTime { value, .. } | XdmAtomicValue::DateTimeStamp { value, .. } => Some(value.time()),
        XdmAtomicValue::Time { value, .. } => Some(*value),
        _ => None,
    }
}

pub(super) fn year_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| date_part(v).map(|d| XdmAtomicValue::Integer(i64::from(d.year()))))
}

pub(super) fn month_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| date_part(v).map(|d| XdmAtomicValue::Integer(i64::from(d.month()))))
}

pub(super) fn day_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| date_part(v).map(|d| XdmAtomicValue::Integer(i64::from(d.day()))))
}

pub(super) fn hours_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| time_part(v).map(|t| XdmAtomicValue::Integer(i64::from(t.hour()))))
}

pub(super) fn minutes_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| time_part(v).map(|t| XdmAtomicValue::Integer(i64::from(t.minute()))))
}

pub(super) fn seconds_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| {
        time_part(v).map(|t| {
            let nanos = Decimal::new(i64::from(t.nanosecond()), 9);
            XdmAtomicValue::Decimal((Decimal::from(t.second()) + nanos).normalize())
        })
    })
}

pub(super) fn timezone_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| match v {
        XdmAtomicValue::DateTime { tz, .. } | XdmAtomicValue::Date { tz, .. } | XdmAtomicValue::Time { tz, .. } => {
            tz.map(tz_duration)
        }
        XdmAtomicValue::DateTimeStamp { tz, .. } => Some(tz_duration(*tz)),
        _ => None,
    })
}

/// Month and second components of any duration value.
fn duration_parts(v: &XdmAtomicValue) -> Option<(i64, Decimal)> {
    match v {
        XdmAtomicValue::Duration { months, seconds } => Some((*months, *seconds)),
        XdmAtomicValue::YearMonthDuration(m) => Some((*m, Decimal::ZERO)),
        XdmAtomicValue::DayTimeDuration(s) => Some((0, *s)),
        _ => None,
    }
}

fn seconds_component<N>(args: &[XdmSequence<N>], modulus: i64, unit: i64) -> FnResult<N> {
    component(args, |v| {
        duration_parts(v).map(|(_, s)| {
            let within = if modulus > 0 { s % Decimal::from(modulus) } else { s };
            let whole = (within / Decimal::from(unit)).trunc();
            XdmAtomicValue::Integer(i64::try_from(whole).unwrap_or(0))
        })
    })
}

pub(super) fn years_from_duration_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| duration_parts(v).map(|(m, _)| XdmAtomicValue::Integer(m / 12)))
}

pub(super) fn months_from_duration_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| duration_parts(v).map(|(m, _)| XdmAtomicValue::Integer(m % 12)))
}

pub(super) fn days_from_duration_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    seconds_component(args, 0, 86_400)
}

pub(super) fn hours_from_duration_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    seconds_component(args, 86_400, 3_600)
}

pub(super) fn minutes_from_duration_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    seconds_component(args, 3_600, 60)
}

pub(super) fn seconds_from_duration_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    component(args, |v| {
        duration_parts(v).map(|(_, s)| XdmAtomicValue::Decimal((s % Decimal::from(60)).normalize()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::simple::SimpleNode;
    use crate::xdm::XdmItem;

    fn duration(seconds: i64) -> Vec<XdmSequence<SimpleNode>> {
        vec![vec![XdmItem::Atomic(XdmAtomicValue::DayTimeDuration(Decimal::from(seconds)))]]
    }

    fn single(seq: &XdmSequence<SimpleNode>) -> &XdmAtomicValue {
        seq[0].as_atomic().unwrap()
    }

    #[test]
    fn negative_durations_keep_their_sign_per_component() {
        // -P1DT2H3M4S
        let args = duration(-(86_400 + 2 * 3_600 + 3 * 60 + 4));
        let parts = [
            seconds_component(&args, 0, 86_400).unwrap(),
            seconds_component(&args, 86_400, 3_600).unwrap(),
            seconds_component(&args, 3_600, 60).unwrap(),
        ];
        let values: Vec<_> = parts.iter().map(|p| single(p).clone()).collect();
        assert_eq!(
            values,
            vec![
                XdmAtomicValue::Integer(-1),
                XdmAtomicValue::Integer(-2),
                XdmAtomicValue::Integer(-3)
            ]
        );
    }

    #[test]
    fn empty_duration_yields_empty() {
        let args: Vec<XdmSequence<SimpleNode>> = vec![vec![]];
        assert!(seconds_component(&args, 0, 86_400).unwrap().is_empty());
    }
}
