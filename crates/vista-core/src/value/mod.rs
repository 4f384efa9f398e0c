mod compare;
mod float;
mod key;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::fmt;

// re-exports
pub use compare::{canonical_cmp, strict_order_cmp};
pub use float::Float64;
pub(crate) use key::OrdKey;

///
/// Value
///
/// Dynamic scalar carried by records, group ids, and filter/sort inputs.
///
/// Null → the field's value is absent (the projection treats it as SQL NULL).
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Float(Float64),
    Int(i64),
    /// Ordered list of values; used for compound group ids.
    /// List order is preserved for comparison.
    List(Vec<Self>),
    Null,
    Text(String),
    Uint(u64),
}

impl Value {
    /// Canonical variant rank used for mixed-variant comparison.
    #[must_use]
    pub const fn canonical_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Uint(_) => 3,
            Self::Float(_) => 4,
            Self::Text(_) => 5,
            Self::List(_) => 6,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub const fn as_text(&self) -> Option<&String> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_uint(&self) -> Option<u64> {
        match self {
            Self::Uint(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Build a `Value::List` from a list literal.
    ///
    /// Intended for tests and inline construction.
    pub fn from_slice<T>(items: &[T]) -> Self
    where
        T: Into<Self> + Clone,
    {
        Self::List(items.iter().cloned().map(Into::into).collect())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Self::Null => write!(f, "null"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Uint(n) => write!(f, "{n}"),
        }
    }
}

// Local helper to stamp out the scalar conversion impls.
macro_rules! impl_from_for {
    ($( $source:ty => $variant:ident ),* $(,)?) => {
        $(
            impl From<$source> for Value {
                fn from(v: $source) -> Self {
                    Self::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_for!(
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Uint,
    u64 => Uint,
    Float64 => Float,
    &str => Text,
    String => Text,
);

impl<T: Into<Self>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}
