use crate::value::{Value, canonical_cmp};
use std::cmp::Ordering;

///
/// OrdKey
///
/// OrdKey wraps a value with the canonical total order so it can key
/// ordered maps and sets (group header reuse, uniqueness tracking).
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct OrdKey(pub Value);

impl Ord for OrdKey {
    fn cmp(&self, other: &Self) -> Ordering {
        canonical_cmp(&self.0, &other.0)
    }
}

impl PartialOrd for OrdKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<Value> for OrdKey {
    fn from(value: Value) -> Self {
        Self(value)
    }
}
