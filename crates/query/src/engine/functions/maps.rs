use super::common::{FnResult, boolean, count_to_i64, function_arg, integer, opt_atomic};
use crate::engine::runtime::{CallCtx, Error, ErrorCode};
use crate::model::XdmNode;
use crate::xdm::{MapKey, XdmAtomicValue, XdmItem, XdmMap, XdmSequence};
use indexmap::IndexMap;
use indexmap::map::Entry;

fn map_arg<N>(arg: &[XdmItem<N>]) -> Result<&XdmMap<N>, Error> {
    match arg.first() {
        Some(XdmItem::Map(m)) => Ok(m),
        _ => Err(Error::from_code(ErrorCode::XPTY0004, "expected a map")),
    }
}

fn key_arg<N>(arg: &[XdmItem<N>]) -> Result<&XdmAtomicValue, Error> {
    opt_atomic(arg).ok_or_else(|| Error::from_code(ErrorCode::XPTY0004, "map key must be a single atomic value"))
}

pub(super) fn size_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(integer(count_to_i64(map_arg(&args[0])?.len())))
}

pub(super) fn keys_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(map_arg(&args[0])?.keys().map(|k| XdmItem::Atomic(k.clone())).collect())
}

pub(super) fn contains_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(boolean(map_arg(&args[0])?.contains(key_arg(&args[1])?)))
}

pub(super) fn get_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    Ok(map_arg(&args[0])?.get(key_arg(&args[1])?).cloned().unwrap_or_default())
}

pub(super) fn put_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0])?.put(key_arg(&args[1])?.clone(), args[2].clone());
    Ok(vec![XdmItem::Map(map)])
}

pub(super) fn remove_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let mut map = map_arg(&args[0])?.clone();
    for key in args[1].iter().filter_map(XdmItem::as_atomic) {
        map = map.remove(key);
    }
    Ok(vec![XdmItem::Map(map)])
}

pub(super) fn entry_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let key = key_arg(&args[0])?.clone();
    Ok(vec![XdmItem::Map(XdmMap::from_entries([(key, args[1].clone())]))])
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Duplicates {
    UseFirst,
    UseLast,
    Combine,
    Reject,
}

fn duplicates_option<N: XdmNode>(options: Option<&XdmSequence<N>>) -> Result<Duplicates, Error> {
    let Some(options) = options else {
        return Ok(Duplicates::UseFirst);
    };
    let value = map_arg(options)?
        .get(&XdmAtomicValue::String("duplicates".into()))
        .and_then(|v| opt_atomic(v))
        .map(XdmAtomicValue::string_value);
    match value.as_deref() {
        None | Some("use-first") => Ok(Duplicates::UseFirst),
        Some("use-last") => Ok(Duplicates::UseLast),
        Some("combine") => Ok(Duplicates::Combine),
        Some("reject") => Ok(Duplicates::Reject),
        // use-any may pick either entry
        Some("use-any") => Ok(Duplicates::UseFirst),
        Some(other) => Err(Error::from_code(
            ErrorCode::FOJS0005,
            format!("invalid value '{other}' for the duplicates option of map:merge"),
        )),
    }
}

pub(super) fn merge_fn<N: XdmNode>(_ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let policy = duplicates_option(args.get(1))?;
    let mut merged: IndexMap<MapKey, (XdmAtomicValue, XdmSequence<N>)> = IndexMap::new();
    for item in &args[0] {
        let XdmItem::Map(map) = item else {
            return Err(Error::from_code(ErrorCode::XPTY0004, "map:merge expects a sequence of maps"));
        };
        for (key, value) in map.iter() {
            let mut entry = match merged.entry(MapKey::from_atomic(key)) {
                Entry::Vacant(slot) => {
                    slot.insert((key.clone(), value.clone()));
                    continue;
                }
                Entry::Occupied(entry) => entry,
            };
            match policy {
                Duplicates::UseFirst => {}
                Duplicates::UseLast => entry.get_mut().1.clone_from(value),
                Duplicates::Combine => entry.get_mut().1.extend(value.iter().cloned()),
                Duplicates::Reject => {
                    return Err(Error::from_code(
                        ErrorCode::FOJS0003,
                        format!("duplicate key {} in map:merge", key.string_value()),
                    ));
                }
            }
        }
    }
    let merged = XdmMap::from_entries(merged.into_values());
    Ok(vec![XdmItem::Map(merged)])
}

pub(super) fn for_each_fn<N: XdmNode>(ctx: &CallCtx<'_, N>, args: &[XdmSequence<N>]) -> FnResult<N> {
    let map = map_arg(&args[0])?;
    let f = function_arg(&args[1])?;
    let mut out = Vec::new();
    for (key, value) in map.iter() {
        out.extend(ctx.caller.call_function(f, vec![vec![XdmItem::Atomic(key.clone())], value.clone()])?);
    }
    Ok(out)
}
