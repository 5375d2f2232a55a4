//! Lexical forms of the date/time and duration types.
use crate::engine::runtime::{Error, ErrorCode};
use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

fn invalid(kind: &str, s: &str) -> Error {
    Error::from_code(
        ErrorCode::FORG0001,
        format!("invalid lexical value for xs:{kind}: '{s}'"),
    )
}

/// Split a trailing timezone (`Z`, `+hh:mm`, `-hh:mm`) off a lexical value.
pub fn split_tz(s: &str) -> Result<(&str, Option<FixedOffset>), ()> {
    if let Some(body) = s.strip_suffix('Z') {
        return Ok((body, FixedOffset::east_opt(0)));
    }
    if s.len() >= 6 {
        let (body, tail) = s.split_at(s.len() - 6);
        let b = tail.as_bytes();
        if (b[0] == b'+' || b[0] == b'-') && b[3] == b':' {
            let hh: i32 = tail[1..3].parse().map_err(|_| ())?;
            let mm: i32 = tail[4..6].parse().map_err(|_| ())?;
            if hh > 14 || mm > 59 || (hh == 14 && mm != 0) {
                return Err(());
            }
            let secs = (hh * 60 + mm) * 60;
            let secs = if b[0] == b'-' { -secs } else { secs };
            return Ok((body, FixedOffset::east_opt(secs)));
        }
    }
    Ok((s, None))
}

pub fn parse_tz_offset(s: &str) -> Option<FixedOffset> {
    match split_tz(s) {
        Ok(("", tz)) => tz,
        _ => None,
    }
}

fn fixed_digits(s: &str, n: usize) -> Option<u32> {
    if s.len() == n && s.bytes().all(|b| b.is_ascii_digit()) {
        s.parse().ok()
    } else {
        None
    }
}

/// `-?YYYY` with at least four digits; no leading zeros beyond four digits.
fn parse_year(s: &str) -> Option<i32> {
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if digits.len() < 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 4 && digits.starts_with('0') {
        return None;
    }
    let y: i32 = digits.parse().ok()?;
    Some(if neg { -y } else { y })
}

fn parse_date_body(s: &str) -> Option<NaiveDate> {
    // year may be negative and longer than four digits: split from the right
    let (rest, day) = s.rsplit_once('-')?;
    let (year, month) = rest.rsplit_once('-')?;
    let y = parse_year(year)?;
    let m = fixed_digits(month, 2)?;
    let d = fixed_digits(day, 2)?;
    NaiveDate::from_ymd_opt(y, m, d)
}

/// Returns the time and whether it was written as `24:00:00`.
fn parse_time_body(s: &str) -> Option<(NaiveTime, bool)> {
    let mut parts = s.splitn(3, ':');
    let h = fixed_digits(parts.next()?, 2)?;
    let m = fixed_digits(parts.next()?, 2)?;
    let sec_part = parts.next()?;
    let (whole, frac) = match sec_part.split_once('.') {
        Some((w, f)) => {
            if f.is_empty() || !f.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (w, Some(f))
        }
        None => (sec_part, None),
    };
    let sec = fixed_digits(whole, 2)?;
    let nanos = match frac {
        Some(f) => {
            let mut padded: String = f.chars().take(9).collect();
            while padded.len() < 9 {
                padded.push('0');
            }
            padded.parse::<u32>().ok()?
        }
        None => 0,
    };
    if h == 24 {
        if m == 0 && sec == 0 && nanos == 0 {
            return Some((NaiveTime::MIN, true));
        }
        return None;
    }
    if m > 59 || sec > 59 {
        return None;
    }
    NaiveTime::from_hms_nano_opt(h, m, sec, nanos).map(|t| (t, false))
}

pub fn parse_date(s: &str) -> Result<(NaiveDate, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("date", s))?;
    let d = parse_date_body(body).ok_or_else(|| invalid("date", s))?;
    Ok((d, tz))
}

pub fn parse_time(s: &str) -> Result<(NaiveTime, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("time", s))?;
    let (t, _) = parse_time_body(body).ok_or_else(|| invalid("time", s))?;
    Ok((t, tz))
}

pub fn parse_date_time(s: &str) -> Result<(NaiveDateTime, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("dateTime", s))?;
    let (date, time) = body.split_once('T').ok_or_else(|| invalid("dateTime", s))?;
    let d = parse_date_body(date).ok_or_else(|| invalid("dateTime", s))?;
    let (t, end_of_day) = parse_time_body(time).ok_or_else(|| invalid("dateTime", s))?;
    let mut dt = d.and_time(t);
    if end_of_day {
        dt = dt
            .checked_add_signed(chrono::Duration::days(1))
            .ok_or_else(|| invalid("dateTime", s))?;
    }
    Ok((dt, tz))
}

pub fn parse_g_year_month(s: &str) -> Result<(i32, u8, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("gYearMonth", s))?;
    let (y, m) = body.rsplit_once('-').ok_or_else(|| invalid("gYearMonth", s))?;
    let y = parse_year(y).ok_or_else(|| invalid("gYearMonth", s))?;
    let m = fixed_digits(m, 2)
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| invalid("gYearMonth", s))?;
    Ok((y, u8::try_from(m).unwrap_or(1), tz))
}

pub fn parse_g_year(s: &str) -> Result<(i32, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("gYear", s))?;
    let y = parse_year(body).ok_or_else(|| invalid("gYear", s))?;
    Ok((y, tz))
}

pub fn parse_g_month_day(s: &str) -> Result<(u8, u8, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("gMonthDay", s))?;
    let rest = body.strip_prefix("--").ok_or_else(|| invalid("gMonthDay", s))?;
    let (m, d) = rest.split_once('-').ok_or_else(|| invalid("gMonthDay", s))?;
    let m = fixed_digits(m, 2).ok_or_else(|| invalid("gMonthDay", s))?;
    let d = fixed_digits(d, 2).ok_or_else(|| invalid("gMonthDay", s))?;
    // validate against a leap year so that --02-29 is accepted
    NaiveDate::from_ymd_opt(2000, m, d).ok_or_else(|| invalid("gMonthDay", s))?;
    Ok((u8::try_from(m).unwrap_or(1), u8::try_from(d).unwrap_or(1), tz))
}

pub fn parse_g_day(s: &str) -> Result<(u8, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("gDay", s))?;
    let d = body
        .strip_prefix("---")
        .and_then(|d| fixed_digits(d, 2))
        .filter(|d| (1..=31).contains(d))
        .ok_or_else(|| invalid("gDay", s))?;
    Ok((u8::try_from(d).unwrap_or(1), tz))
}

pub fn parse_g_month(s: &str) -> Result<(u8, Option<FixedOffset>), Error> {
    let (body, tz) = split_tz(s).map_err(|()| invalid("gMonth", s))?;
    let m = body
        .strip_prefix("--")
        .and_then(|m| fixed_digits(m, 2))
        .filter(|m| (1..=12).contains(m))
        .ok_or_else(|| invalid("gMonth", s))?;
    Ok((u8::try_from(m).unwrap_or(1), tz))
}

/// Parse `-?PnYnMnDTnHnMnS` into (months, seconds).
pub fn parse_duration(s: &str) -> Result<(i64, Decimal), Error> {
    parse_duration_as(s, "duration")
}

fn parse_duration_as(s: &str, kind: &str) -> Result<(i64, Decimal), Error> {
    let err = || invalid(kind, s);
    let (neg, rest) = match s.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, s),
    };
    let rest = rest.strip_prefix('P').ok_or_else(err)?;
    let (date_part, time_part) = match rest.split_once('T') {
        Some((d, t)) => {
            if t.is_empty() {
                return Err(err());
            }
            (d, Some(t))
        }
        None => (rest, None),
    };
    if date_part.is_empty() && time_part.is_none() {
        return Err(err());
    }
    let mut months: i64 = 0;
    let mut seconds = Decimal::ZERO;
    let mut num = String::new();
    let mut order = 0;
    for c in date_part.chars() {
        if c.is_ascii_digit() {
            num.push(c);
            continue;
        }
        let rank = match c {
            'Y' => 1,
            'M' => 2,
            'D' => 3,
            _ => return Err(err()),
        };
        if num.is_empty() || rank <= order {
            return Err(err());
        }
        order = rank;
        let n: i64 = num.parse().map_err(|_| err())?;
        num.clear();
        match c {
            'Y' => months = n.checked_mul(12).ok_or_else(err)?,
            'M' => months = months.checked_add(n).ok_or_else(err)?,
            _ => seconds += Decimal::from(n) * Decimal::from(86_400),
        }
    }
    if !num.is_empty() {
        return Err(err());
    }
    if let Some(tp) = time_part {
        let mut order = 0;
        for c in tp.chars() {
            if c.is_ascii_digit() || c == '.' {
                num.push(c);
                continue;
            }
            let (rank, factor) = match c {
                'H' => (1, 3600),
                'M' => (2, 60),
                'S' => (3, 1),
                _ => return Err(err()),
            };
            if num.is_empty() || rank <= order || (c != 'S' && num.contains('.')) {
                return Err(err());
            }
            if num.starts_with('.') || num.ends_with('.') {
                return Err(err());
            }
            order = rank;
            let n = Decimal::from_str(&num).map_err(|_| err())?;
            num.clear();
            seconds += n * Decimal::from(factor);
        }
        if !num.is_empty() {
            return Err(err());
        }
    }
    if neg {
        months = -months;
        seconds = -seconds;
    }
    Ok((months, seconds))
}

pub fn parse_year_month_duration(s: &str) -> Result<i64, Error> {
    if s.contains('D') || s.contains('T') {
        return Err(invalid("yearMonthDuration", s));
    }
    Ok(parse_duration_as(s, "yearMonthDuration")?.0)
}

pub fn parse_day_time_duration(s: &str) -> Result<Decimal, Error> {
    if s.contains('Y') || s.split('T').next().is_some_and(|d| d.contains('M')) {
        return Err(invalid("dayTimeDuration", s));
    }
    Ok(parse_duration_as(s, "dayTimeDuration")?.1)
}

pub fn format_tz(tz: Option<FixedOffset>) -> String {
    match tz {
        None => String::new(),
        Some(off) => {
            let secs = off.local_minus_utc();
            if secs == 0 {
                return "Z".to_string();
            }
            let sign = if secs < 0 { '-' } else { '+' };
            let mins = secs.abs() / 60;
            format!("{sign}{:02}:{:02}", mins / 60, mins % 60)
        }
    }
}

pub fn format_year(y: i32) -> String {
    if y < 0 {
        format!("-{:04}", -i64::from(y))
    } else {
        format!("{y:04}")
    }
}

pub fn format_date(d: NaiveDate, tz: Option<FixedOffset>) -> String {
    format!(
        "{}-{:02}-{:02}{}",
        format_year(d.year()),
        d.month(),
        d.day(),
        format_tz(tz)
    )
}

pub fn format_time(t: NaiveTime, tz: Option<FixedOffset>) -> String {
    let mut s = format!("{:02}:{:02}:{:02}", t.hour(), t.minute(), t.second());
    let nanos = t.nanosecond() % 1_000_000_000;
    if nanos > 0 {
        let frac = format!("{nanos:09}");
        s.push('.');
        s.push_str(frac.trim_end_matches('0'));
    }
    s.push_str(&format_tz(tz));
    s
}

pub fn format_date_time(dt: NaiveDateTime, tz: Option<FixedOffset>) -> String {
    format!(
        "{}T{}",
        format_date(dt.date(), None),
        format_time(dt.time(), tz)
    )
}

fn push_seconds(out: &mut String, seconds: Decimal) {
    let secs_total = seconds.abs();
    let days = (secs_total / Decimal::from(86_400)).trunc();
    let rem = secs_total - days * Decimal::from(86_400);
    let hours = (rem / Decimal::from(3600)).trunc();
    let rem = rem - hours * Decimal::from(3600);
    let minutes = (rem / Decimal::from(60)).trunc();
    let secs = (rem - minutes * Decimal::from(60)).normalize();
    if !days.is_zero() {
        out.push_str(&format!("{}D", days.normalize()));
    }
    if !(hours.is_zero() && minutes.is_zero() && secs.is_zero()) {
        out.push('T');
        if !hours.is_zero() {
            out.push_str(&format!("{}H", hours.normalize()));
        }
        if !minutes.is_zero() {
            out.push_str(&format!("{}M", minutes.normalize()));
        }
        if !secs.is_zero() {
            out.push_str(&format!("{secs}S"));
        }
    }
}

pub fn format_duration(months: i64, seconds: Decimal) -> String {
    if months == 0 && seconds.is_zero() {
        return "PT0S".to_string();
    }
    let negative = months < 0 || seconds.is_sign_negative() && !seconds.is_zero();
    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push('P');
    let m = months.unsigned_abs();
    if m / 12 > 0 {
        out.push_str(&format!("{}Y", m / 12));
    }
    if m % 12 > 0 {
        out.push_str(&format!("{}M", m % 12));
    }
    push_seconds(&mut out, seconds);
    out
}

pub fn format_year_month_duration(months: i64) -> String {
    if months == 0 {
        return "P0M".to_string();
    }
    format_duration(months, Decimal::ZERO)
}

pub fn format_day_time_duration(seconds: Decimal) -> String {
    format_duration(0, seconds)
}

/// Whole seconds of a dayTimeDuration as chrono duration (fraction kept in nanoseconds).
pub fn seconds_to_chrono(seconds: Decimal) -> Option<chrono::Duration> {
    let whole = seconds.trunc().to_i64()?;
    let nanos = ((seconds - seconds.trunc()) * Decimal::from(1_000_000_000))
        .trunc()
        .to_i64()?;
    chrono::Duration::try_seconds(whole)?.checked_add(&chrono::Duration::nanoseconds(nanos))
}

pub fn chrono_to_seconds(d: chrono::Duration) -> Decimal {
    let secs = d.num_seconds();
    let nanos = (d - chrono::Duration::seconds(secs))
        .num_nanoseconds()
        .unwrap_or(0);
    Decimal::from(secs) + Decimal::new(nanos, 9)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_month_is_forg0001() {
        let e = parse_date("2024-13-01").unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::FORG0001);
    }

    #[test]
    fn end_of_day_rolls_over() {
        let (dt, tz) = parse_date_time("2024-02-28T24:00:00Z").unwrap();
        assert_eq!(format_date_time(dt, tz), "2024-02-29T00:00:00Z");
    }

    #[test]
    fn durations_round_trip_canonically() {
        let (m, s) = parse_duration("P1Y2M3DT4H5M6.5S").unwrap();
        assert_eq!(format_duration(m, s), "P1Y2M3DT4H5M6.5S");
        assert_eq!(format_day_time_duration(parse_day_time_duration("PT90M").unwrap()), "PT1H30M");
        assert_eq!(format_year_month_duration(parse_year_month_duration("-P14M").unwrap()), "-P1Y2M");
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("P1DT").is_err());
        assert!(parse_year_month_duration("P1D").is_err());
    }

    #[test]
    fn timezone_suffixes() {
        let (_, tz) = parse_time("10:00:00-05:00").unwrap();
        assert_eq!(format_tz(tz), "-05:00");
        assert!(parse_time("10:00:00+15:00").is_err());
    }
}
