use super::common::{FnResult, atomic, boolean, collation_arg, count_to_i64, double_arg, integer, opt_atomic, opt_str, str_arg, string};
use crate::consts::CODEPOINT_URI;
use crate::engine::collation::Collation;
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::types::lexical::is_xml_char;
use crate::types::numeric::{NumKind, classify};
use crate::xdm::{XdmAtomicValue, XdmItem, XdmSequence};
use core::cmp::Ordering;
use itertools::Itertools;
use unicode_normalization::UnicodeNormalization;

pub(super) fn concat_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(string(args.iter().map(|a| str_arg(a)).collect::<String>()))
}

pub(super) fn string_join_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let separator = opt_str(args.get(1)).unwrap_or_default();
    let joined = args[0]
        .iter()
        .filter_map(XdmItem::as_atomic)
        .map(XdmAtomicValue::string_value)
        .join(&separator);
    Ok(string(joined))
}

/// The argument, or the string value of the context item when called without one.
fn string_or_context<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>], function: &str) -> Result<String, Error> {
    if let Some(arg) = args.first() {
        return Ok(str_arg(arg));
    }
    match ctx.context_item(function)? {
        XdmItem::Node(n) => Ok(n.string_value()),
        XdmItem::Atomic(a) => Ok(a.string_value()),
        _ => Err(Error::from_code(
            ErrorCode::XPTY0004,
            format!("fn:{function}: the context item has no string value"),
        )),
    }
}

pub(super) fn string_length_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_or_context(ctx, args, "string-length")?;
    Ok(integer(count_to_i64(s.chars().count())))
}

fn round_position(x: f64) -> f64 {
    if x.is_finite() { (x + 0.5).floor() } else { x }
}

pub(super) fn substring_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = str_arg(&args[0]);
    let start = round_position(double_arg(&args[1]).unwrap_or(f64::NAN));
    let end = match args.get(2) {
        Some(len) => start + round_position(double_arg(len).unwrap_or(f64::NAN)),
        None => f64::INFINITY,
    };
    #[allow(clippy::cast_precision_loss)]
    let out: String = s
        .chars()
        .enumerate()
        .filter(|(i, _)| {
            let p = (*i + 1) as f64;
            p >= start && p < end
        })
        .map(|(_, c)| c)
        .collect();
    Ok(string(out))
}

/// Byte range of the first match of `needle` in `haystack` under `collation`.
fn find(haystack: &str, needle: &str, collation: &dyn Collation) -> Option<(usize, usize)> {
    if collation.uri() == CODEPOINT_URI {
        return haystack.find(needle).map(|i| (i, i + needle.len()));
    }
    let target = collation.key(needle);
    if target.is_empty() {
        return Some((0, 0));
    }
    let bounds: Vec<usize> = haystack
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(haystack.len()))
        .collect();
    for (a, &i) in bounds.iter().enumerate() {
        for &j in &bounds[a + 1..] {
            let key = collation.key(&haystack[i..j]);
            if key == target {
                return Some((i, j));
            }
            if key.len() > target.len() {
                break;
            }
        }
    }
    None
}

fn two_strings<N>(args: &[XdmSequence<N>]) -> (String, String) {
    (str_arg(&args[0]), str_arg(&args[1]))
}

pub(super) fn substring_before_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (s, t) = two_strings(args);
    let collation = collation_arg(ctx, args, 2)?;
    Ok(string(match find(&s, &t, collation.as_ref()) {
        Some((start, _)) => &s[..start],
        None => "",
    }))
}

pub(super) fn substring_after_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (s, t) = two_strings(args);
    let collation = collation_arg(ctx, args, 2)?;
    Ok(string(match find(&s, &t, collation.as_ref()) {
        Some((_, end)) => &s[end..],
        None => "",
    }))
}

pub(super) fn contains_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (s, t) = two_strings(args);
    let collation = collation_arg(ctx, args, 2)?;
    Ok(boolean(find(&s, &t, collation.as_ref()).is_some()))
}

pub(super) fn starts_with_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (s, t) = two_strings(args);
    let collation = collation_arg(ctx, args, 2)?;
    Ok(boolean(collation.key(&s).starts_with(&collation.key(&t))))
}

pub(super) fn ends_with_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (s, t) = two_strings(args);
    let collation = collation_arg(ctx, args, 2)?;
    Ok(boolean(collation.key(&s).ends_with(&collation.key(&t))))
}

pub(super) fn upper_case_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(string(str_arg(&args[0]).to_uppercase()))
}

pub(super) fn lower_case_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(string(str_arg(&args[0]).to_lowercase()))
}

pub(super) fn normalize_space_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = string_or_context(ctx, args, "normalize-space")?;
    Ok(string(s.split([' ', '\t', '\n', '\r']).filter(|w| !w.is_empty()).join(" ")))
}

pub(super) fn normalize_unicode_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = str_arg(&args[0]);
    let form = opt_str(args.get(1)).map_or_else(|| "NFC".to_string(), |f| f.trim().to_uppercase());
    let normalized = match form.as_str() {
        "" => s,
        "NFC" => s.nfc().collect(),
        "NFD" => s.nfd().collect(),
        "NFKC" => s.nfkc().collect(),
        "NFKD" => s.nfkd().collect(),
        other => {
            return Err(Error::from_code(
                ErrorCode::FOCH0003,
                format!("unsupported normalization form '{other}'"),
            ));
        }
    };
    Ok(string(normalized))
}

pub(super) fn translate_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = str_arg(&args[0]);
    let from: Vec<char> = str_arg(&args[1]).chars().collect();
    let to: Vec<char> = str_arg(&args[2]).chars().collect();
    let out: String = s
        .chars()
        .filter_map(|c| match from.iter().position(|f| *f == c) {
            Some(i) => to.get(i).copied(),
            None => Some(c),
        })
        .collect();
    Ok(string(out))
}

pub(super) fn compare_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let (Some(a), Some(b)) = (opt_atomic(&args[0]), opt_atomic(&args[1])) else {
        return Ok(Vec::new());
    };
    let collation = collation_arg(ctx, args, 2)?;
    Ok(integer(match collation.compare(&a.string_value(), &b.string_value()) {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }))
}

pub(super) fn codepoint_equal_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    match (opt_atomic(&args[0]), opt_atomic(&args[1])) {
        (Some(a), Some(b)) => Ok(boolean(a.string_value() == b.string_value())),
        _ => Ok(Vec::new()),
    }
}

pub(super) fn string_to_codepoints_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(str_arg(&args[0])
        .chars()
        .map(|c| XdmItem::Atomic(XdmAtomicValue::Integer(i64::from(u32::from(c)))))
        .collect())
}

pub(super) fn codepoints_to_string_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut out = String::with_capacity(args[0].len());
    for item in &args[0] {
        let code = match item.as_atomic().and_then(classify) {
            Some(NumKind::Int(i)) => i,
            _ => return Err(Error::from_code(ErrorCode::XPTY0004, "codepoints must be integers")),
        };
        let c = u32::try_from(code)
            .ok()
            .and_then(char::from_u32)
            .filter(|c| is_xml_char(*c))
            .ok_or_else(|| Error::from_code(ErrorCode::FOCH0001, format!("{code} is not a valid XML character")))?;
        out.push(c);
    }
    Ok(string(out))
}

pub(super) fn resolve_uri_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let Some(relative) = opt_atomic(&args[0]).map(XdmAtomicValue::string_value) else {
        return Ok(Vec::new());
    };
    if let Ok(absolute) = url::Url::parse(&relative) {
        return Ok(atomic(XdmAtomicValue::AnyUri(absolute.to_string())));
    }
    let base = match opt_str(args.get(1)) {
        Some(b) => b,
        None => ctx.static_ctx.base_uri.clone().ok_or_else(|| {
            Error::from_code(ErrorCode::FONS0005, "fn:resolve-uri needs a base URI")
        })?,
    };
    let invalid = |e: url::ParseError| {
        Error::from_code(ErrorCode::FORG0002, format!("cannot resolve '{relative}' against '{base}'"))
            .with_source(Some(std::sync::Arc::new(e) as std::sync::Arc<dyn std::error::Error + Send + Sync>))
    };
    let resolved = url::Url::parse(&base)
        .and_then(|b| b.join(&relative))
        .map_err(invalid)?;
    Ok(atomic(XdmAtomicValue::AnyUri(resolved.to_string())))
}

pub(super) fn encode_for_uri_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let s = str_arg(&args[0]);
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    Ok(string(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::collation::{CodepointCollation, FoldingCollation};

    #[test]
    fn collated_find_maps_back_to_original_text() {
        assert_eq!(find("Hello World", "WORLD", &FoldingCollation::simple_case()), Some((6, 11)));
        assert_eq!(find("Hello World", "WORLD", &CodepointCollation), None);
        assert_eq!(find("abc", "", &FoldingCollation::simple_case()), Some((0, 0)));
    }

    #[test]
    fn positions_round_half_up() {
        assert!((round_position(1.5) - 2.0).abs() < f64::EPSILON);
        assert!(round_position(f64::NAN).is_nan());
        assert!(round_position(f64::NEG_INFINITY).is_infinite());
    }
}
