use super::XdmSequence;
use crate::engine::runtime::{Error, ErrorCode};
use std::sync::Arc;

/// Immutable XDM array: an ordered list of members, each member a sequence.
#[derive(Debug)]
pub struct XdmArray<N> {
    members: Arc<Vec<XdmSequence<N>>>,
}

impl<N> Clone for XdmArray<N> {
    fn clone(&self) -> Self {
        Self {
            members: self.members.clone(),
        }
    }
}

impl<N> Default for XdmArray<N> {
    fn default() -> Self {
        Self {
            members: Arc::new(Vec::new()),
        }
    }
}

impl<N> XdmArray<N> {
    /// Identity of the underlying storage, not deep equality.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.members, &other.members)
    }
}

impl<N: Clone> XdmArray<N> {
    pub fn new(members: Vec<XdmSequence<N>>) -> Self {
        Self {
            members: Arc::new(members),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn members(&self) -> &[XdmSequence<N>] {
        &self.members
    }

    fn index(&self, position: i64) -> Result<usize, Error> {
        if position >= 1 && (position as u64) <= self.members.len() as u64 {
            Ok(usize::try_from(position - 1).unwrap_or(usize::MAX))
        } else {
            Err(Error::from_code(
                ErrorCode::FOAY0001,
                format!(
                    "array index {position} out of bounds (size {})",
                    self.members.len()
                ),
            ))
        }
    }

    /// 1-based member access.
    pub fn get(&self, position: i64) -> Result<&XdmSequence<N>, Error> {
        let i = self.index(position)?;
        Ok(&self.members[i])
    }

    pub fn put(&self, position: i64, member: XdmSequence<N>) -> Result<Self, Error> {
        let i = self.index(position)?;
        let mut v = (*self.members).clone();
        v[i] = member;
        Ok(Self::new(v))
    }

    pub fn append(&self, member: XdmSequence<N>) -> Self {
        let mut v = (*self.members).clone();
        v.push(member);
        Self::new(v)
    }

    pub fn remove(&self, position: i64) -> Result<Self, Error> {
        let i = self.index(position)?;
        let mut v = (*self.members).clone();
        v.remove(i);
        Ok(Self::new(v))
    }

    pub fn insert_before(&self, position: i64, member: XdmSequence<N>) -> Result<Self, Error> {
        let len = self.members.len() as i64;
        if position < 1 || position > len + 1 {
            return Err(Error::from_code(
                ErrorCode::FOAY0001,
                format!("array insert position {position} out of bounds (size {len})"),
            ));
        }
        let mut v = (*self.members).clone();
        v.insert(usize::try_from(position - 1).unwrap_or(0), member);
        Ok(Self::new(v))
    }

    pub fn subarray(&self, start: i64, length: Option<i64>) -> Result<Self, Error> {
        let len = self.members.len() as i64;
        let length = length.unwrap_or(len - start + 1);
        if length < 0 {
            return Err(Error::from_code(ErrorCode::FOAY0002, "negative subarray length"));
        }
        if start < 1 || start + length > len + 1 {
            return Err(Error::from_code(
                ErrorCode::FOAY0001,
                format!("subarray({start}, {length}) out of bounds (size {len})"),
            ));
        }
        let from = usize::try_from(start - 1).unwrap_or(0);
        let to = usize::try_from(start - 1 + length).unwrap_or(from);
        Ok(Self::new(self.members[from..to].to_vec()))
    }

    /// Members concatenated, nested arrays flattened recursively.
    pub fn flatten(&self) -> XdmSequence<N> {
        let mut out = Vec::new();
        for m in self.members.iter() {
            for item in m {
                match item {
                    super::XdmItem::Array(inner) => out.extend(inner.flatten()),
                    other => out.push(other.clone()),
                }
            }
        }
        out
    }
}
