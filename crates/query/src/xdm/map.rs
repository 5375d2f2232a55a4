use super::{XdmAtomicValue, XdmSequence};
use crate::types::Kind;
use indexmap::IndexMap;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Hashable form of an atomic map key under `op:same-key` semantics.
///
/// Numerics compare by value across types, strings/untypedAtomic/anyURI compare as strings,
/// NaN is the same key as NaN.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MapKey {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
    QName(Option<String>, String),
    Binary(Vec<u8>),
    Duration(i64, Decimal),
    Other(Kind, String),
}

impl MapKey {
    pub fn from_atomic(v: &XdmAtomicValue) -> Self {
        use XdmAtomicValue as V;
        match v {
            V::Integer(i) | V::DerivedInteger { value: i, .. } => MapKey::Int(*i),
            V::Decimal(_) | V::Float(_) | V::Double(_) => {
                let f = v.as_f64().unwrap_or(f64::NAN);
                if f.is_nan() {
                    MapKey::Float(f64::NAN.to_bits())
                } else if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    #[allow(clippy::cast_possible_truncation)]
                    MapKey::Int(f as i64)
                } else if f == 0.0 {
                    MapKey::Int(0)
                } else {
                    MapKey::Float(f.to_bits())
                }
            }
            V::String(s) | V::UntypedAtomic(s) | V::AnyUri(s) | V::DerivedString { value: s, .. } => {
                MapKey::Str(s.clone())
            }
            V::Boolean(b) => MapKey::Bool(*b),
            V::QName { ns_uri, local, .. } => MapKey::QName(ns_uri.clone(), local.clone()),
            V::Base64Binary(b) | V::HexBinary(b) => MapKey::Binary(b.clone()),
            V::YearMonthDuration(m) => MapKey::Duration(*m, Decimal::ZERO),
            V::DayTimeDuration(s) => MapKey::Duration(0, s.normalize()),
            V::Duration { months, seconds } => MapKey::Duration(*months, seconds.normalize()),
            other => MapKey::Other(other.kind().primitive(), crate::types::lexical::comparable_key(other)),
        }
    }
}

/// Immutable XDM map; updates return a new map sharing nothing mutable with the old one.
#[derive(Debug)]
pub struct XdmMap<N> {
    entries: Arc<IndexMap<MapKey, (XdmAtomicValue, XdmSequence<N>)>>,
}

impl<N> Clone for XdmMap<N> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<N> Default for XdmMap<N> {
    fn default() -> Self {
        Self {
            entries: Arc::new(IndexMap::new()),
        }
    }
}

impl<N> XdmMap<N> {
    /// Identity of the underlying storage, not deep equality.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.entries, &other.entries)
    }
}

impl<N: Clone> XdmMap<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates win; use [`XdmMap::try_from_entries`] to reject them.
    pub fn from_entries(entries: impl IntoIterator<Item = (XdmAtomicValue, XdmSequence<N>)>) -> Self {
        let mut m = IndexMap::new();
        for (k, v) in entries {
            m.insert(MapKey::from_atomic(&k), (k, v));
        }
        Self {
            entries: Arc::new(m),
        }
    }

    /// Returns the offending key when two entries share a key.
    pub fn try_from_entries(
        entries: impl IntoIterator<Item = (XdmAtomicValue, XdmSequence<N>)>,
    ) -> Result<Self, XdmAtomicValue> {
        let mut m = IndexMap::new();
        for (k, v) in entries {
            let key = MapKey::from_atomic(&k);
            if m.contains_key(&key) {
                return Err(k);
            }
            m.insert(key, (k, v));
        }
        Ok(Self {
            entries: Arc::new(m),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &XdmAtomicValue) -> Option<&XdmSequence<N>> {
        self.entries.get(&MapKey::from_atomic(key)).map(|(_, v)| v)
    }

    pub fn contains(&self, key: &XdmAtomicValue) -> bool {
        self.entries.contains_key(&MapKey::from_atomic(key))
    }

    pub fn put(&self, key: XdmAtomicValue, value: XdmSequence<N>) -> Self {
        let mut m = (*self.entries).clone();
        m.insert(MapKey::from_atomic(&key), (key, value));
        Self {
            entries: Arc::new(m),
        }
    }

    pub fn remove(&self, key: &XdmAtomicValue) -> Self {
        let mut m = (*self.entries).clone();
        m.shift_remove(&MapKey::from_atomic(key));
        Self {
            entries: Arc::new(m),
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &XdmAtomicValue> {
        self.entries.values().map(|(k, _)| k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&XdmAtomicValue, &XdmSequence<N>)> {
        self.entries.values().map(|(k, v)| (k, v))
    }
}
