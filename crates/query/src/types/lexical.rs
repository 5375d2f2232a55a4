//! Canonical lexical forms and XML string helpers (whitespace facets, name productions).
use super::temporal::{
    format_date, format_date_time, format_day_time_duration, format_duration, format_time,
    format_tz, format_year, format_year_month_duration,
};
use crate::xdm::XdmAtomicValue;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};
use chrono::{FixedOffset, NaiveDateTime};

/// Canonical string form of an atomic value (the result of casting it to xs:string).
pub fn canonical(v: &XdmAtomicValue) -> String {
    use XdmAtomicValue as V;
    match v {
        V::UntypedAtomic(s) | V::String(s) | V::AnyUri(s) | V::Notation(s) => s.clone(),
        V::DerivedString { value, .. } => value.clone(),
        V::Boolean(b) => if *b { "true" } else { "false" }.to_string(),
        V::Integer(i) | V::DerivedInteger { value: i, .. } => i.to_string(),
        V::Decimal(d) => {
            if d.is_zero() {
                "0".to_string()
            } else {
                d.normalize().to_string()
            }
        }
        V::Float(f) => format_double(f64::from(*f), Some(*f)),
        V::Double(d) => format_double(*d, None),
        V::Duration { months, seconds } => format_duration(*months, *seconds),
        V::YearMonthDuration(m) => format_year_month_duration(*m),
        V::DayTimeDuration(s) => format_day_time_duration(*s),
        V::DateTime { value, tz } => format_date_time(*value, *tz),
        V::DateTimeStamp { value, tz } => format_date_time(*value, Some(*tz)),
        V::Date { value, tz } => format_date(*value, *tz),
        V::Time { value, tz } => format_time(*value, *tz),
        V::GYearMonth { year, month, tz } => {
            format!("{}-{month:02}{}", format_year(*year), format_tz(*tz))
        }
        V::GYear { year, tz } => format!("{}{}", format_year(*year), format_tz(*tz)),
        V::GMonthDay { month, day, tz } => format!("--{month:02}-{day:02}{}", format_tz(*tz)),
        V::GDay { day, tz } => format!("---{day:02}{}", format_tz(*tz)),
        V::GMonth { month, tz } => format!("--{month:02}{}", format_tz(*tz)),
        V::QName { prefix, local, .. } => match prefix {
            Some(p) if !p.is_empty() => format!("{p}:{local}"),
            _ => local.clone(),
        },
        V::Base64Binary(b) => BASE64_STANDARD.encode(b),
        V::HexBinary(b) => encode_hex_upper(b),
    }
}

/// XPath float/double formatting: plain decimal notation for magnitudes in
/// `[1e-6, 1e6)`, otherwise `mantissa E exponent` with at least one fraction digit.
///
/// `single` carries the original f32 so that its shortest representation is used.
pub fn format_double(d: f64, single: Option<f32>) -> String {
    if d.is_nan() {
        return "NaN".to_string();
    }
    if d.is_infinite() {
        return if d > 0.0 { "INF" } else { "-INF" }.to_string();
    }
    if d == 0.0 {
        return if d.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let abs = d.abs();
    if (1e-6..1e6).contains(&abs) {
        return match single {
            Some(f) => format!("{f}"),
            None => format!("{d}"),
        };
    }
    let sci = match single {
        Some(f) => format!("{f:e}"),
        None => format!("{d:e}"),
    };
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exp}")
    } else {
        format!("{mantissa}.0E{exp}")
    }
}

/// Key under which two temporal values are the same map key: timezoned values are
/// normalized to UTC, values without a timezone keep their local form.
pub fn comparable_key(v: &XdmAtomicValue) -> String {
    use XdmAtomicValue as V;
    fn utc(dt: NaiveDateTime, tz: FixedOffset) -> NaiveDateTime {
        dt - chrono::Duration::seconds(i64::from(tz.local_minus_utc()))
    }
    let epoch = chrono::NaiveDate::from_ymd_opt(1972, 12, 31).unwrap_or_default();
    match v {
        V::DateTime { value, tz: Some(tz) } | V::DateTimeStamp { value, tz } => {
            format!("Z{}", utc(*value, *tz))
        }
        V::Date { value, tz: Some(tz) } => {
            format!("Z{}", utc(value.and_time(chrono::NaiveTime::MIN), *tz))
        }
        V::Time { value, tz: Some(tz) } => format!("Z{}", utc(epoch.and_time(*value), *tz)),
        other => format!("L{}", canonical(other)),
    }
}

pub fn encode_hex_upper(bytes: &[u8]) -> String {
    use core::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

pub fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if !input.len().is_multiple_of(2) {
        return None;
    }
    let mut bytes = Vec::with_capacity(input.len() / 2);
    let mut chars = input.chars();
    while let (Some(high), Some(low)) = (chars.next(), chars.next()) {
        let high = high.to_digit(16)?;
        let low = low.to_digit(16)?;
        bytes.push(u8::try_from((high << 4) | low).ok()?);
    }
    Some(bytes)
}

pub fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    BASE64_STANDARD.decode(compact.as_bytes()).ok()
}

/// `replace` whitespace facet.
pub fn replace_whitespace(input: &str) -> String {
    input
        .chars()
        .map(|ch| match ch {
            '\t' | '\n' | '\r' => ' ',
            other => other,
        })
        .collect()
}

/// `collapse` whitespace facet (also fn:normalize-space).
pub fn collapse_whitespace(input: &str) -> String {
    input
        .split([' ', '\t', '\n', '\r'])
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// XML 1.0 `Char` production.
pub fn is_xml_char(ch: char) -> bool {
    matches!(ch,
        '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}')
}

pub fn is_name_start_char(ch: char) -> bool {
    matches!(ch,
        ':' | 'A'..='Z' | '_' | 'a'..='z'
        | '\u{C0}'..='\u{D6}' | '\u{D8}'..='\u{F6}' | '\u{F8}'..='\u{2FF}'
        | '\u{370}'..='\u{37D}' | '\u{37F}'..='\u{1FFF}' | '\u{200C}'..='\u{200D}'
        | '\u{2070}'..='\u{218F}' | '\u{2C00}'..='\u{2FEF}' | '\u{3001}'..='\u{D7FF}'
        | '\u{F900}'..='\u{FDCF}' | '\u{FDF0}'..='\u{FFFD}' | '\u{10000}'..='\u{EFFFF}')
}

pub fn is_name_char(ch: char) -> bool {
    is_name_start_char(ch)
        || matches!(ch,
            '-' | '.' | '0'..='9' | '\u{B7}' | '\u{300}'..='\u{36F}' | '\u{203F}'..='\u{2040}')
}

pub fn is_name(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(is_name_start_char) && chars.all(is_name_char)
}

pub fn is_ncname(s: &str) -> bool {
    !s.contains(':') && is_name(s)
}

pub fn is_nmtoken(s: &str) -> bool {
    !s.is_empty() && s.chars().all(is_name_char)
}

/// `prefix:local` or `local`, both parts NCNames.
pub fn is_qname(s: &str) -> bool {
    match s.split_once(':') {
        Some((p, l)) => is_ncname(p) && is_ncname(l),
        None => is_ncname(s),
    }
}

/// RFC 3066 shaped language tags: `[a-zA-Z]{1,8}(-[a-zA-Z0-9]{1,8})*`.
pub fn is_language(s: &str) -> bool {
    let mut parts = s.split('-');
    let Some(first) = parts.next() else {
        return false;
    };
    if !(1..=8).contains(&first.len()) || !first.chars().all(|c| c.is_ascii_alphabetic()) {
        return false;
    }
    parts.all(|p| (1..=8).contains(&p.len()) && p.chars().all(|c| c.is_ascii_alphanumeric()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn double_forms() {
        assert_eq!(format_double(1.0, None), "1");
        assert_eq!(format_double(0.5, None), "0.5");
        assert_eq!(format_double(1e6, None), "1.0E6");
        assert_eq!(format_double(1.5e-7, None), "1.5E-7");
        assert_eq!(format_double(-0.0, None), "-0");
        assert_eq!(format_double(f64::NEG_INFINITY, None), "-INF");
        assert_eq!(format_double(f64::from(0.1f32), Some(0.1f32)), "0.1");
    }

    #[test]
    fn decimal_forms() {
        assert_eq!(canonical(&XdmAtomicValue::Decimal(Decimal::new(1500, 3))), "1.5");
        assert_eq!(canonical(&XdmAtomicValue::Decimal(Decimal::new(100, 2))), "1");
    }

    #[test]
    fn names() {
        assert!(is_ncname("a-b.c"));
        assert!(!is_ncname("1a"));
        assert!(!is_ncname("a:b"));
        assert!(is_qname("a:b"));
        assert!(is_language("en-US"));
        assert!(!is_language("toolongtag"));
        assert_eq!(collapse_whitespace("  a \n b  "), "a b");
    }
}
