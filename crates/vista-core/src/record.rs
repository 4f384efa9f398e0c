use crate::value::Value;
use std::{cell::RefCell, collections::BTreeMap};

///
/// FieldPresence
///
/// Result of attempting to read a field from a record. This distinguishes
/// between a missing field and a present field whose value may be `Null`.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldPresence {
    /// Field exists and has a value (including `Value::Null`).
    Present(Value),
    /// Field is not present on the record.
    Missing,
}

impl FieldPresence {
    #[must_use]
    pub fn into_option(self) -> Option<Value> {
        match self {
            Self::Present(value) => Some(value),
            Self::Missing => None,
        }
    }
}

///
/// Record
///
/// The projection reads source items only through this surface: named field
/// access for predicates/comparators, and an optional identity capability.
///

pub trait Record {
    fn field(&self, name: &str) -> FieldPresence;

    /// Domain identity capability; takes precedence over any configured
    /// id property.
    fn record_id(&self) -> Option<Value> {
        None
    }
}

///
/// ObjectRecord
///
/// Interior-mutable field map. Hosts mutate through `&self` setters and then
/// raise a per-item change notification on their source.
///

#[derive(Debug, Default)]
pub struct ObjectRecord {
    fields: RefCell<BTreeMap<String, Value>>,
}

impl ObjectRecord {
    #[must_use]
    pub fn new(fields: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            fields: RefCell::new(fields.into_iter().collect()),
        }
    }

    /// Build from `(&str, Value-convertible)` pairs.
    pub fn from_pairs<V>(pairs: impl IntoIterator<Item = (&'static str, V)>) -> Self
    where
        V: Into<Value>,
    {
        Self::new(
            pairs
                .into_iter()
                .map(|(name, value)| (name.to_string(), value.into())),
        )
    }

    pub fn set(&self, name: &str, value: impl Into<Value>) {
        self.fields
            .borrow_mut()
            .insert(name.to_string(), value.into());
    }

    /// Remove a field; subsequent reads report `Missing`.
    pub fn unset(&self, name: &str) -> bool {
        self.fields.borrow_mut().remove(name).is_some()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.borrow().get(name).cloned()
    }
}

impl Record for ObjectRecord {
    fn field(&self, name: &str) -> FieldPresence {
        match self.fields.borrow().get(name) {
            Some(value) => FieldPresence::Present(value.clone()),
            None => FieldPresence::Missing,
        }
    }
}

///
/// TESTS
///
