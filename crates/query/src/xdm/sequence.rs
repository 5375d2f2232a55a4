//! Lazy sequence runtime.
//!
//! A [`Sequence`] is one of three representations:
//! - `Empty`: answers emptiness and effective boolean value without work,
//! - `Singleton`: one item; its effective boolean value is computed once,
//! - `Many`: a pull iterator with a small buffer, so `first()` and the effective boolean
//!   value only pull what they need and `to_vec()` materializes exactly once.
//!
//! Sequences are single-traversal values: consuming one with `into_iter` hands over the
//! buffered prefix followed by the rest of the underlying iterator.
use super::{XdmAtomicValue, XdmItem, XdmSequence};
use crate::engine::runtime::{Error, ErrorCode};
use std::cell::{OnceCell, RefCell};

pub type XdmItemResult<N> = Result<XdmItem<N>, Error>;
pub type ItemIter<N> = Box<dyn Iterator<Item = XdmItemResult<N>>>;

pub enum Sequence<N> {
    Empty,
    Singleton(Singleton<N>),
    Many(Many<N>),
}

pub struct Singleton<N> {
    item: XdmItem<N>,
    ebv: OnceCell<Result<bool, Error>>,
}

pub struct Many<N> {
    state: RefCell<ManyState<N>>,
}

struct ManyState<N> {
    buffer: Vec<XdmItem<N>>,
    source: Option<ItemIter<N>>,
}

impl<N: Clone + 'static> Sequence<N> {
    pub fn empty() -> Self {
        Sequence::Empty
    }

    pub fn singleton(item: XdmItem<N>) -> Self {
        Sequence::Singleton(Singleton {
            item,
            ebv: OnceCell::new(),
        })
    }

    pub fn atomic(value: XdmAtomicValue) -> Self {
        Self::singleton(XdmItem::Atomic(value))
    }

    pub fn boolean(b: bool) -> Self {
        Self::atomic(XdmAtomicValue::Boolean(b))
    }

    pub fn from_vec(mut items: XdmSequence<N>) -> Self {
        match items.len() {
            0 => Sequence::Empty,
            1 => match items.pop() {
                Some(item) => Self::singleton(item),
                None => Sequence::Empty,
            },
            _ => Sequence::Many(Many {
                state: RefCell::new(ManyState {
                    buffer: items,
                    source: None,
                }),
            }),
        }
    }

    pub fn from_iter_lazy<I>(iter: I) -> Self
    where
        I: Iterator<Item = XdmItemResult<N>> + 'static,
    {
        Sequence::Many(Many {
            state: RefCell::new(ManyState {
                buffer: Vec::new(),
                source: Some(Box::new(iter)),
            }),
        })
    }

    pub fn from_result(result: Result<Self, Error>) -> Self {
        match result {
            Ok(s) => s,
            Err(e) => Self::from_iter_lazy(std::iter::once(Err(e))),
        }
    }

    pub fn is_empty(&self) -> Result<bool, Error> {
        match self {
            Sequence::Empty => Ok(true),
            Sequence::Singleton(_) => Ok(false),
            Sequence::Many(m) => Ok(m.fill(1)? == 0),
        }
    }

    pub fn first(&self) -> Result<Option<XdmItem<N>>, Error> {
        match self {
            Sequence::Empty => Ok(None),
            Sequence::Singleton(s) => Ok(Some(s.item.clone())),
            Sequence::Many(m) => m.first(),
        }
    }

    /// Materialize the sequence. Repeated calls on a `Many` reuse the buffer.
    pub fn to_vec(&self) -> Result<XdmSequence<N>, Error> {
        match self {
            Sequence::Empty => Ok(Vec::new()),
            Sequence::Singleton(s) => Ok(vec![s.item.clone()]),
            Sequence::Many(m) => m.to_vec(),
        }
    }

    pub fn into_vec(self) -> Result<XdmSequence<N>, Error> {
        self.into_iter().collect()
    }

    pub fn effective_boolean_value(&self) -> Result<bool, Error> {
        match self {
            Sequence::Empty => Ok(false),
            Sequence::Singleton(s) => s.effective_boolean_value(),
            Sequence::Many(m) => m.effective_boolean_value(),
        }
    }

    /// The sequence is known to contain at most one item without pulling.
    pub fn is_singleton_or_empty_hint(&self) -> bool {
        !matches!(self, Sequence::Many(_))
    }

    pub fn map<F>(self, mut f: F) -> Self
    where
        F: FnMut(XdmItem<N>) -> XdmItemResult<N> + 'static,
    {
        match self {
            Sequence::Empty => Sequence::Empty,
            Sequence::Singleton(s) => match f(s.item) {
                Ok(item) => Self::singleton(item),
                Err(e) => Self::from_iter_lazy(std::iter::once(Err(e))),
            },
            many => Self::from_iter_lazy(many.into_iter().map(move |r| r.and_then(&mut f))),
        }
    }

    pub fn filter<F>(self, mut pred: F) -> Self
    where
        F: FnMut(&XdmItem<N>) -> Result<bool, Error> + 'static,
    {
        Self::from_iter_lazy(self.into_iter().filter_map(move |r| match r {
            Ok(item) => match pred(&item) {
                Ok(true) => Some(Ok(item)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        }))
    }

    pub fn try_fold<A, F>(self, init: A, mut f: F) -> Result<A, Error>
    where
        F: FnMut(A, XdmItem<N>) -> Result<A, Error>,
    {
        let mut acc = init;
        for item in self {
            acc = f(acc, item?)?;
        }
        Ok(acc)
    }

    pub fn concat(parts: Vec<Sequence<N>>) -> Self {
        let mut parts: Vec<Sequence<N>> = parts
            .into_iter()
            .filter(|p| !matches!(p, Sequence::Empty))
            .collect();
        match parts.len() {
            0 => Sequence::Empty,
            1 => parts.pop().unwrap_or(Sequence::Empty),
            _ => Self::from_iter_lazy(parts.into_iter().flatten()),
        }
    }
}

impl<N: Clone + 'static> From<XdmSequence<N>> for Sequence<N> {
    fn from(v: XdmSequence<N>) -> Self {
        Self::from_vec(v)
    }
}

impl<N: Clone> Singleton<N> {
    pub fn item(&self) -> &XdmItem<N> {
        &self.item
    }

    pub fn effective_boolean_value(&self) -> Result<bool, Error> {
        self.ebv
            .get_or_init(|| ebv_of(&self.item, false))
            .clone()
    }

    /// Whether the effective boolean value has already been computed.
    pub fn has_cached_ebv(&self) -> bool {
        self.ebv.get().is_some()
    }
}

impl<N: Clone> Many<N> {
    /// Pull until at least `n` items are buffered or the source is exhausted.
    fn fill(&self, n: usize) -> Result<usize, Error> {
        let mut st = self.state.borrow_mut();
        while st.buffer.len() < n {
            let next = match st.source.as_mut() {
                Some(src) => src.next(),
                None => break,
            };
            match next {
                Some(Ok(item)) => st.buffer.push(item),
                Some(Err(e)) => return Err(e),
                None => {
                    st.source = None;
                    break;
                }
            }
        }
        Ok(st.buffer.len())
    }

    pub fn first(&self) -> Result<Option<XdmItem<N>>, Error> {
        self.fill(1)?;
        Ok(self.state.borrow().buffer.first().cloned())
    }

    pub fn to_vec(&self) -> Result<XdmSequence<N>, Error> {
        self.fill(usize::MAX)?;
        Ok(self.state.borrow().buffer.clone())
    }

    pub fn effective_boolean_value(&self) -> Result<bool, Error> {
        let available = self.fill(2)?;
        let st = self.state.borrow();
        match st.buffer.first() {
            None => Ok(false),
            Some(first) => ebv_of(first, available > 1),
        }
    }

    /// Number of items pulled from the source so far.
    pub fn buffered(&self) -> usize {
        self.state.borrow().buffer.len()
    }
}

/// Effective boolean value of a sequence whose first item is `first`.
pub fn ebv_of<N>(first: &XdmItem<N>, has_more: bool) -> Result<bool, Error> {
    if let XdmItem::Node(_) = first {
        return Ok(true);
    }
    if has_more {
        return Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for a sequence of two or more items starting with an atomic value",
        ));
    }
    match first {
        XdmItem::Atomic(a) => match a {
            XdmAtomicValue::Boolean(b) => Ok(*b),
            XdmAtomicValue::String(s)
            | XdmAtomicValue::UntypedAtomic(s)
            | XdmAtomicValue::AnyUri(s)
            | XdmAtomicValue::DerivedString { value: s, .. } => Ok(!s.is_empty()),
            XdmAtomicValue::Integer(i) | XdmAtomicValue::DerivedInteger { value: i, .. } => {
                Ok(*i != 0)
            }
            XdmAtomicValue::Decimal(d) => Ok(!d.is_zero()),
            XdmAtomicValue::Float(f) => Ok(!(f.is_nan() || *f == 0.0)),
            XdmAtomicValue::Double(d) => Ok(!(d.is_nan() || *d == 0.0)),
            other => Err(Error::from_code(
                ErrorCode::FORG0006,
                format!(
                    "effective boolean value is not defined for {}",
                    other.type_name()
                ),
            )),
        },
        _ => Err(Error::from_code(
            ErrorCode::FORG0006,
            "effective boolean value is not defined for function items",
        )),
    }
}

pub enum SequenceIter<N> {
    Empty,
    Once(Option<XdmItem<N>>),
    Buffered {
        buffer: std::vec::IntoIter<XdmItem<N>>,
        source: Option<ItemIter<N>>,
    },
}

impl<N> Iterator for SequenceIter<N> {
    type Item = XdmItemResult<N>;

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            SequenceIter::Empty => None,
            SequenceIter::Once(item) => item.take().map(Ok),
            SequenceIter::Buffered { buffer, source } => {
                if let Some(item) = buffer.next() {
                    return Some(Ok(item));
                }
                source.as_mut()?.next()
            }
        }
    }
}

impl<N> IntoIterator for Sequence<N> {
    type Item = XdmItemResult<N>;
    type IntoIter = SequenceIter<N>;

    fn into_iter(self) -> Self::IntoIter {
        match self {
            Sequence::Empty => SequenceIter::Empty,
            Sequence::Singleton(s) => SequenceIter::Once(Some(s.item)),
            Sequence::Many(m) => {
                let st = m.state.into_inner();
                SequenceIter::Buffered {
                    buffer: st.buffer.into_iter(),
                    source: st.source,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    type Item = XdmItem<()>;

    fn int(i: i64) -> Item {
        XdmItem::Atomic(XdmAtomicValue::Integer(i))
    }

    fn counting(n: i64, pulls: Rc<Cell<usize>>) -> Sequence<()> {
        Sequence::from_iter_lazy((1..=n).map(move |i| {
            pulls.set(pulls.get() + 1);
            Ok(int(i))
        }))
    }

    #[test]
    fn empty_is_false() {
        let s: Sequence<()> = Sequence::empty();
        assert!(!s.effective_boolean_value().unwrap());
        assert!(s.is_empty().unwrap());
    }

    #[test]
    fn singleton_ebv_is_memoized() {
        let s: Sequence<()> = Sequence::singleton(int(3));
        let Sequence::Singleton(single) = &s else {
            panic!("expected singleton")
        };
        assert!(!single.has_cached_ebv());
        assert!(s.effective_boolean_value().unwrap());
        assert!(single.has_cached_ebv());
        assert!(s.effective_boolean_value().unwrap());
    }

    #[test]
    fn to_vec_does_not_reiterate() {
        let pulls = Rc::new(Cell::new(0));
        let s = counting(4, pulls.clone());
        assert_eq!(s.to_vec().unwrap().len(), 4);
        assert_eq!(s.to_vec().unwrap().len(), 4);
        assert_eq!(pulls.get(), 4);
    }

    #[test]
    fn ebv_pulls_at_most_two() {
        let pulls = Rc::new(Cell::new(0));
        let s = counting(100, pulls.clone());
        let err = s.effective_boolean_value().unwrap_err();
        assert_eq!(err.code_enum(), ErrorCode::FORG0006);
        assert_eq!(pulls.get(), 2);
    }

    #[test]
    fn first_then_iterate_yields_everything_once() {
        let pulls = Rc::new(Cell::new(0));
        let s = counting(3, pulls.clone());
        assert_eq!(s.first().unwrap(), Some(int(1)));
        let all: Vec<_> = s.into_iter().map(Result::unwrap).collect();
        assert_eq!(all, vec![int(1), int(2), int(3)]);
        assert_eq!(pulls.get(), 3);
    }
}
