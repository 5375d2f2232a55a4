//! Casting between atomic types, including facet checks for the derived types.
use super::Kind;
use super::lexical::{
    canonical, collapse_whitespace, decode_base64, decode_hex, is_language, is_name, is_ncname,
    is_nmtoken, replace_whitespace,
};
use super::numeric::{NumKind, classify};
use super::temporal;
use crate::engine::runtime::{Error, ErrorCode, NamespaceBindings};
use crate::xdm::XdmAtomicValue;
use chrono::{Datelike, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

fn not_castable(from: &XdmAtomicValue, to: Kind) -> Error {
    Error::from_code(
        ErrorCode::XPTY0004,
        format!("cannot cast {} to {}", from.type_name(), to.display_name()),
    )
}

fn bad_lexical(text: &str, to: Kind) -> Error {
    Error::from_code(
        ErrorCode::FORG0001,
        format!("'{text}' is not a valid {}", to.display_name()),
    )
}

/// Cast `value` to the atomic type `target`.
///
/// `namespaces` resolves prefixes when casting strings to xs:QName; without it only
/// unprefixed names and `Q{uri}local` forms are accepted.
pub fn cast_atomic(
    value: XdmAtomicValue,
    target: Kind,
    namespaces: Option<&NamespaceBindings>,
) -> Result<XdmAtomicValue, Error> {
    if target.is_abstract() {
        return Err(Error::from_code(
            ErrorCode::XPST0080,
            format!("cannot cast to abstract type {}", target.display_name()),
        ));
    }
    if !target.is_atomic() {
        return Err(Error::from_code(
            ErrorCode::XPST0051,
            format!("{} is not an atomic type", target.display_name()),
        ));
    }
    if value.kind() == target {
        return Ok(value);
    }
    let primitive = target.primitive();
    if primitive != target {
        return cast_derived(value, target, primitive, namespaces);
    }
    cast_primitive(value, target, namespaces)
}

/// Whether `value` can be cast to `target` (errors of any kind mean no).
pub fn castable(value: &XdmAtomicValue, target: Kind, namespaces: Option<&NamespaceBindings>) -> bool {
    cast_atomic(value.clone(), target, namespaces).is_ok()
}

fn string_source(value: &XdmAtomicValue) -> Option<&str> {
    match value {
        XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => Some(s),
        XdmAtomicValue::DerivedString { value, .. } => Some(value),
        _ => None,
    }
}

fn cast_derived(
    value: XdmAtomicValue,
    target: Kind,
    primitive: Kind,
    namespaces: Option<&NamespaceBindings>,
) -> Result<XdmAtomicValue, Error> {
    match primitive {
        Kind::String => {
            let text = match &value {
                XdmAtomicValue::String(s) | XdmAtomicValue::UntypedAtomic(s) => s.clone(),
                XdmAtomicValue::DerivedString { value, .. } => value.clone(),
                other => match cast_primitive(other.clone(), Kind::String, namespaces)? {
                    XdmAtomicValue::String(s) => s,
                    _ => return Err(not_castable(other, target)),
                },
            };
            restrict_string(text, target)
        }
        Kind::Decimal => {
            let n = match cast_primitive(value, Kind::Integer, namespaces)? {
                XdmAtomicValue::Integer(i) => i,
                other => return Err(not_castable(&other, target)),
            };
            restrict_integer(n, target)
        }
        Kind::DateTime => match cast_primitive(value, Kind::DateTime, namespaces)? {
            XdmAtomicValue::DateTime {
                value,
                tz: Some(tz),
            } => Ok(XdmAtomicValue::DateTimeStamp { value, tz }),
            other => Err(Error::from_code(
                ErrorCode::FORG0001,
                format!("{} has no timezone", other.string_value()),
            )),
        },
        _ => cast_primitive(value, target, namespaces),
    }
}

fn restrict_string(text: String, target: Kind) -> Result<XdmAtomicValue, Error> {
    let value = match target {
        Kind::NormalizedString => replace_whitespace(&text),
        _ => collapse_whitespace(&text),
    };
    let ok = match target {
        Kind::NormalizedString | Kind::Token => true,
        Kind::Language => is_language(&value),
        Kind::NmToken => is_nmtoken(&value),
        Kind::Name => is_name(&value),
        Kind::NcName | Kind::Id | Kind::IdRef | Kind::Entity => is_ncname(&value),
        _ => false,
    };
    if !ok {
        return Err(bad_lexical(&text, target));
    }
    Ok(XdmAtomicValue::DerivedString {
        kind: target,
        value,
    })
}

fn restrict_integer(n: i64, target: Kind) -> Result<XdmAtomicValue, Error> {
    let (lo, hi) = target
        .integer_range()
        .ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "not an integer type"))?;
    if !(lo..=hi).contains(&i128::from(n)) {
        return Err(Error::from_code(
            ErrorCode::FORG0001,
            format!("{n} is out of range for {}", target.display_name()),
        ));
    }
    if target == Kind::Integer {
        return Ok(XdmAtomicValue::Integer(n));
    }
    Ok(XdmAtomicValue::DerivedInteger {
        kind: target,
        value: n,
    })
}

fn cast_primitive(
    value: XdmAtomicValue,
    target: Kind,
    namespaces: Option<&NamespaceBindings>,
) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    match target {
        Kind::String => return Ok(V::String(canonical(&value))),
        Kind::UntypedAtomic => return Ok(V::UntypedAtomic(canonical(&value))),
        _ => {}
    }
    if let Some(text) = string_source(&value) {
        return parse_lexical(text, target, namespaces);
    }
    if let Some(n) = classify(&value) {
        return match target {
            Kind::Boolean => Ok(V::Boolean(!n.is_zero() && !n.is_nan())),
            Kind::Integer => numeric_to_integer(n).map(V::Integer),
            Kind::Decimal => {
                if n.is_nan() || n.to_f64().is_infinite() {
                    return Err(Error::from_code(
                        ErrorCode::FOCA0002,
                        "cannot cast NaN or INF to xs:decimal",
                    ));
                }
                n.to_decimal().map(V::Decimal).ok_or_else(|| {
                    Error::from_code(ErrorCode::FOCA0003, "value too large for xs:decimal")
                })
            }
            Kind::Float => Ok(V::Float(n.to_f32())),
            Kind::Double => Ok(V::Double(n.to_f64())),
            _ => Err(not_castable(&value, target)),
        };
    }
    if let V::DateTimeStamp { value, tz } = value {
        let dt = V::DateTime {
            value,
            tz: Some(tz),
        };
        if target == Kind::DateTime {
            return Ok(dt);
        }
        return cast_primitive(dt, target, namespaces);
    }
    match (target, &value) {
        (Kind::Integer | Kind::Decimal | Kind::Float | Kind::Double, V::Boolean(b)) => {
            let one = NumKind::Int(i64::from(*b));
            Ok(match target {
                Kind::Integer => V::Integer(i64::from(*b)),
                Kind::Decimal => V::Decimal(Decimal::from(i64::from(*b))),
                Kind::Float => V::Float(one.to_f32()),
                _ => V::Double(one.to_f64()),
            })
        }
        (Kind::AnyUri, _) => Err(not_castable(&value, target)),
        // durations
        (Kind::Duration, V::YearMonthDuration(m)) => Ok(V::Duration {
            months: *m,
            seconds: Decimal::ZERO,
        }),
        (Kind::Duration, V::DayTimeDuration(s)) => Ok(V::Duration {
            months: 0,
            seconds: *s,
        }),
        (Kind::YearMonthDuration, V::Duration { months, .. }) => Ok(V::YearMonthDuration(*months)),
        (Kind::YearMonthDuration, V::DayTimeDuration(_)) => Ok(V::YearMonthDuration(0)),
        (Kind::DayTimeDuration, V::Duration { seconds, .. }) => Ok(V::DayTimeDuration(*seconds)),
        (Kind::DayTimeDuration, V::YearMonthDuration(_)) => Ok(V::DayTimeDuration(Decimal::ZERO)),
        // date/time family
        (Kind::DateTime, V::Date { value: d, tz }) => Ok(V::DateTime {
            value: d.and_time(NaiveTime::MIN),
            tz: *tz,
        }),
        (_, V::DateTime { value: dt, tz }) => {
            let d = dt.date();
            from_date_parts(d, Some(dt.time()), *tz, target).ok_or_else(|| not_castable(&value, target))
        }
        (_, V::Date { value: d, tz }) if target != Kind::Time => {
            from_date_parts(*d, None, *tz, target).ok_or_else(|| not_castable(&value, target))
        }
        // binary
        (Kind::HexBinary, V::Base64Binary(b)) => Ok(V::HexBinary(b.clone())),
        (Kind::Base64Binary, V::HexBinary(b)) => Ok(V::Base64Binary(b.clone())),
        _ => Err(not_castable(&value, target)),
    }
}

fn from_date_parts(
    d: NaiveDate,
    time: Option<NaiveTime>,
    tz: Option<chrono::FixedOffset>,
    target: Kind,
) -> Option<XdmAtomicValue> {
    use XdmAtomicValue as V;
    let month = u8::try_from(d.month()).ok()?;
    let day = u8::try_from(d.day()).ok()?;
    Some(match target {
        Kind::Date => V::Date { value: d, tz },
        Kind::Time => V::Time { value: time?, tz },
        Kind::GYearMonth => V::GYearMonth {
            year: d.year(),
            month,
            tz,
        },
        Kind::GYear => V::GYear { year: d.year(), tz },
        Kind::GMonthDay => V::GMonthDay { month, day, tz },
        Kind::GDay => V::GDay { day, tz },
        Kind::GMonth => V::GMonth { month, tz },
        _ => return None,
    })
}

fn numeric_to_integer(n: NumKind) -> Result<i64, Error> {
    match n {
        NumKind::Int(i) => Ok(i),
        NumKind::Dec(d) => d.trunc().to_i64().ok_or_else(|| {
            Error::from_code(ErrorCode::FOCA0003, "value too large for xs:integer")
        }),
        other => {
            let f = other.to_f64();
            if f.is_nan() || f.is_infinite() {
                return Err(Error::from_code(
                    ErrorCode::FOCA0002,
                    "cannot cast NaN or INF to xs:integer",
                ));
            }
            let t = f.trunc();
            if t.abs() >= 9.223_372_036_854_775_807e18 {
                return Err(Error::from_code(
                    ErrorCode::FOCA0003,
                    "value too large for xs:integer",
                ));
            }
            #[allow(clippy::cast_possible_truncation)]
            Ok(t as i64)
        }
    }
}

fn is_decimal_lexical(s: &str) -> bool {
    let body = s.strip_prefix(['+', '-']).unwrap_or(s);
    let (int, frac) = match body.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (body, None),
    };
    let digits = |p: &str| p.bytes().all(|b| b.is_ascii_digit());
    match frac {
        Some(f) => digits(int) && digits(f) && !(int.is_empty() && f.is_empty()),
        None => !int.is_empty() && digits(int),
    }
}

fn is_double_lexical(s: &str) -> bool {
    match s.split_once(['e', 'E']) {
        Some((mantissa, exp)) => {
            let exp = exp.strip_prefix(['+', '-']).unwrap_or(exp);
            is_decimal_lexical(mantissa) && !exp.is_empty() && exp.bytes().all(|b| b.is_ascii_digit())
        }
        None => is_decimal_lexical(s),
    }
}

fn parse_double(s: &str) -> Option<f64> {
    match s {
        "INF" | "+INF" => Some(f64::INFINITY),
        "-INF" => Some(f64::NEG_INFINITY),
        "NaN" => Some(f64::NAN),
        _ if is_double_lexical(s) => s.parse().ok(),
        _ => None,
    }
}

fn parse_lexical(
    text: &str,
    target: Kind,
    namespaces: Option<&NamespaceBindings>,
) -> Result<XdmAtomicValue, Error> {
    use XdmAtomicValue as V;
    let s = collapse_whitespace(text);
    let bad = || bad_lexical(text, target);
    Ok(match target {
        Kind::AnyUri => V::AnyUri(s),
        Kind::Boolean => match s.as_str() {
            "true" | "1" => V::Boolean(true),
            "false" | "0" => V::Boolean(false),
            _ => return Err(bad()),
        },
        Kind::Integer => {
            let digits = s.strip_prefix(['+', '-']).unwrap_or(&s);
            if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                return Err(bad());
            }
            V::Integer(s.trim_start_matches('+').parse().map_err(|_| {
                Error::from_code(ErrorCode::FOCA0003, format!("'{s}' is too large for xs:integer"))
            })?)
        }
        Kind::Decimal => {
            if !is_decimal_lexical(&s) {
                return Err(bad());
            }
            let normalized = s.trim_start_matches('+');
            let normalized = if normalized.ends_with('.') {
                &normalized[..normalized.len() - 1]
            } else {
                normalized
            };
            V::Decimal(Decimal::from_str(normalized).map_err(|_| {
                Error::from_code(ErrorCode::FOCA0003, format!("'{s}' is too large for xs:decimal"))
            })?)
        }
        Kind::Double => V::Double(parse_double(&s).ok_or_else(bad)?),
        #[allow(clippy::cast_possible_truncation)]
        Kind::Float => V::Float(parse_double(&s).ok_or_else(bad)? as f32),
        Kind::Duration => {
            let (months, seconds) = temporal::parse_duration(&s)?;
            V::Duration { months, seconds }
        }
        Kind::YearMonthDuration => V::YearMonthDuration(temporal::parse_year_month_duration(&s)?),
        Kind::DayTimeDuration => V::DayTimeDuration(temporal::parse_day_time_duration(&s)?),
        Kind::DateTime => {
            let (value, tz) = temporal::parse_date_time(&s)?;
            V::DateTime { value, tz }
        }
        Kind::Date => {
            let (value, tz) = temporal::parse_date(&s)?;
            V::Date { value, tz }
        }
        Kind::Time => {
            let (value, tz) = temporal::parse_time(&s)?;
            V::Time { value, tz }
        }
        Kind::GYearMonth => {
            let (year, month, tz) = temporal::parse_g_year_month(&s)?;
            V::GYearMonth { year, month, tz }
        }
        Kind::GYear => {
            let (year, tz) = temporal::parse_g_year(&s)?;
            V::GYear { year, tz }
        }
        Kind::GMonthDay => {
            let (month, day, tz) = temporal::parse_g_month_day(&s)?;
            V::GMonthDay { month, day, tz }
        }
        Kind::GDay => {
            let (day, tz) = temporal::parse_g_day(&s)?;
            V::GDay { day, tz }
        }
        Kind::GMonth => {
            let (month, tz) = temporal::parse_g_month(&s)?;
            V::GMonth { month, tz }
        }
        Kind::HexBinary => V::HexBinary(decode_hex(&s).ok_or_else(bad)?),
        Kind::Base64Binary => V::Base64Binary(decode_base64(&s).ok_or_else(bad)?),
        Kind::QName => parse_qname(&s, namespaces)?,
        _ => {
            return Err(Error::from_code(
                ErrorCode::XPTY0004,
                format!("cannot cast a string to {}", target.display_name()),
            ));
        }
    })
}

/// Resolve a lexical QName (`p:l`, `l`, or `Q{uri}l`) against in-scope namespaces.
pub fn parse_qname(s: &str, namespaces: Option<&NamespaceBindings>) -> Result<XdmAtomicValue, Error> {
    if let Some(rest) = s.strip_prefix("Q{")
        && let Some((uri, local)) = rest.split_once('}')
        && is_ncname(local)
    {
        return Ok(XdmAtomicValue::QName {
            ns_uri: (!uri.is_empty()).then(|| uri.to_string()),
            prefix: None,
            local: local.to_string(),
        });
    }
    let bad = || bad_lexical(s, Kind::QName);
    match s.split_once(':') {
        Some((prefix, local)) => {
            if !is_ncname(prefix) || !is_ncname(local) {
                return Err(bad());
            }
            let uri = namespaces.and_then(|ns| ns.resolve(prefix)).ok_or_else(|| {
                Error::from_code(
                    ErrorCode::FONS0004,
                    format!("no namespace is bound to prefix '{prefix}'"),
                )
            })?;
            Ok(XdmAtomicValue::QName {
                ns_uri: Some(uri.to_string()),
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            })
        }
        None => {
            if !is_ncname(s) {
                return Err(bad());
            }
            let default_ns = namespaces.and_then(|ns| ns.resolve("")).map(str::to_string);
            Ok(XdmAtomicValue::QName {
                ns_uri: default_ns,
                prefix: None,
                local: s.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> XdmAtomicValue {
        XdmAtomicValue::String(v.to_string())
    }

    #[test]
    fn string_to_numeric() {
        assert_eq!(cast_atomic(s(" 42 "), Kind::Integer, None).unwrap(), XdmAtomicValue::Integer(42));
        assert_eq!(
            cast_atomic(s("1.50"), Kind::Decimal, None).unwrap(),
            XdmAtomicValue::Decimal(Decimal::new(150, 2))
        );
        assert!(cast_atomic(s("inf"), Kind::Double, None).is_err());
        assert!(matches!(
            cast_atomic(s("-INF"), Kind::Double, None).unwrap(),
            XdmAtomicValue::Double(d) if d == f64::NEG_INFINITY
        ));
    }

    #[test]
    fn facets_on_derived_types() {
        let e = cast_atomic(XdmAtomicValue::Integer(300), Kind::Byte, None).unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::FORG0001);
        assert_eq!(
            cast_atomic(s("  a  b "), Kind::Token, None).unwrap(),
            XdmAtomicValue::DerivedString {
                kind: Kind::Token,
                value: "a b".into()
            }
        );
        assert!(cast_atomic(s("1abc"), Kind::NcName, None).is_err());
    }

    #[test]
    fn nan_to_integer() {
        let e = cast_atomic(XdmAtomicValue::Double(f64::NAN), Kind::Integer, None).unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::FOCA0002);
    }

    #[test]
    fn disallowed_pairs_and_abstract_targets() {
        let e = cast_atomic(XdmAtomicValue::Boolean(true), Kind::Date, None).unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::XPTY0004);
        let e = cast_atomic(s("1"), Kind::AnyAtomic, None).unwrap_err();
        assert_eq!(e.code_enum(), ErrorCode::XPST0080);
    }

    #[test]
    fn date_time_projection() {
        let dt = cast_atomic(s("2024-03-01T10:30:00Z"), Kind::DateTime, None).unwrap();
        let d = cast_atomic(dt.clone(), Kind::Date, None).unwrap();
        assert_eq!(d.string_value(), "2024-03-01Z");
        let m = cast_atomic(dt, Kind::GMonth, None).unwrap();
        assert_eq!(m.string_value(), "--03Z");
    }
}
