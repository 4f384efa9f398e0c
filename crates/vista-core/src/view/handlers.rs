//! Module: view::handlers
//! Responsibility: user-supplied sort comparators, filter predicates, and
//! group functions, plus their declared-property annotations.
//! Boundary: strategies and the filter engine consume these; they never
//! construct them.

use crate::{
    record::Record,
    value::{Value, canonical_cmp},
    view::item::ViewItem,
};
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, rc::Rc};

///
/// Direction
///
/// Canonical ordering direction for field-based sort handlers.
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

///
/// SortOperand
///
/// One side of a comparison handed to a sort handler.
///

pub struct SortOperand<'a, R: Record> {
    pub record: &'a Rc<R>,
    pub item: &'a Rc<ViewItem<R>>,
    /// Position in the sort stage's input.
    pub index: usize,
    /// Position in the source collection.
    pub collection_index: usize,
}

type SortCmp<R> = dyn Fn(&SortOperand<'_, R>, &SortOperand<'_, R>) -> Ordering;

///
/// SortFn
///
/// One link of the comparator chain; ties cascade to the next handler.
/// Declared properties are registered as important while the handler is
/// active.
///

pub struct SortFn<R: Record> {
    cmp: Rc<SortCmp<R>>,
    properties: Vec<String>,
}

impl<R: Record> Clone for SortFn<R> {
    fn clone(&self) -> Self {
        Self {
            cmp: Rc::clone(&self.cmp),
            properties: self.properties.clone(),
        }
    }
}

impl<R: Record> SortFn<R> {
    pub fn new(cmp: impl Fn(&SortOperand<'_, R>, &SortOperand<'_, R>) -> Ordering + 'static) -> Self {
        Self {
            cmp: Rc::new(cmp),
            properties: Vec::new(),
        }
    }

    /// Annotate the handler with the properties its ordering depends on.
    #[must_use]
    pub fn with_properties(mut self, properties: impl IntoIterator<Item = String>) -> Self {
        self.properties = properties.into_iter().collect();
        self
    }

    /// Compare by one record field under the canonical value order.
    #[must_use]
    pub fn by_field(name: &str, direction: Direction) -> Self {
        let field = name.to_string();
        let property = field.clone();
        Self {
            cmp: Rc::new(move |left, right| {
                let lv = left.record.field(&field).into_option().unwrap_or(Value::Null);
                let rv = right
                    .record
                    .field(&field)
                    .into_option()
                    .unwrap_or(Value::Null);
                let ord = canonical_cmp(&lv, &rv);
                match direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                }
            }),
            properties: vec![property],
        }
    }

    #[must_use]
    pub fn compare(&self, left: &SortOperand<'_, R>, right: &SortOperand<'_, R>) -> Ordering {
        (self.cmp)(left, right)
    }

    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    /// Handler identity; the setter short-circuits on element-wise identity.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cmp, &other.cmp)
    }
}

///
/// FilterArgs
///
/// The call record handed to each predicate. `record`/`source_index` are
/// absent for group headers; `group_visible` is supplied only for headers
/// and reports whether any data member of the group passed the other
/// filters.
///

pub struct FilterArgs<'a, R: Record> {
    pub record: Option<&'a Rc<R>>,
    pub source_index: Option<usize>,
    pub item: &'a Rc<ViewItem<R>>,
    /// Projection index (pre-filter, pipeline order).
    pub index: usize,
    pub group_visible: Option<bool>,
}

type FilterPredicate<R> = dyn Fn(&FilterArgs<'_, R>) -> bool;

///
/// FilterFn
///
/// One predicate of the filter chain. An item is visible iff every
/// predicate returns true.
///

pub struct FilterFn<R: Record> {
    f: Rc<FilterPredicate<R>>,
    uses_index: bool,
    properties: Vec<String>,
}

impl<R: Record> Clone for FilterFn<R> {
    fn clone(&self) -> Self {
        Self {
            f: Rc::clone(&self.f),
            uses_index: self.uses_index,
            properties: self.properties.clone(),
        }
    }
}

impl<R: Record> FilterFn<R> {
    pub fn new(f: impl Fn(&FilterArgs<'_, R>) -> bool + 'static) -> Self {
        Self {
            f: Rc::new(f),
            uses_index: false,
            properties: Vec::new(),
        }
    }

    /// Mark the predicate as consuming the projection index.
    ///
    /// Any active index-consuming predicate forces full re-filters.
    #[must_use]
    pub const fn with_index(mut self) -> Self {
        self.uses_index = true;
        self
    }

    #[must_use]
    pub fn with_properties(mut self, properties: impl IntoIterator<Item = String>) -> Self {
        self.properties = properties.into_iter().collect();
        self
    }

    /// Keep records whose field equals `value`; headers pass.
    #[must_use]
    pub fn by_field(name: &str, value: impl Into<Value>) -> Self {
        let field = name.to_string();
        let property = field.clone();
        let expected = value.into();
        Self {
            f: Rc::new(move |args| {
                args.record.is_none_or(|record| {
                    record.field(&field).into_option().unwrap_or(Value::Null) == expected
                })
            }),
            uses_index: false,
            properties: vec![property],
        }
    }

    /// Hide group headers whose group has no visible data member.
    #[must_use]
    pub fn hide_empty_groups() -> Self {
        Self::new(|args| args.group_visible.unwrap_or(true))
    }

    #[must_use]
    pub fn evaluate(&self, args: &FilterArgs<'_, R>) -> bool {
        (self.f)(args)
    }

    #[must_use]
    pub const fn uses_index(&self) -> bool {
        self.uses_index
    }

    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}

///
/// GroupFn
///
/// Maps a record to its group id. `Value::Null` suppresses the header for
/// the record's run.
///

pub struct GroupFn<R: Record> {
    f: Rc<dyn Fn(&Rc<R>) -> Value>,
    properties: Vec<String>,
}

impl<R: Record> Clone for GroupFn<R> {
    fn clone(&self) -> Self {
        Self {
            f: Rc::clone(&self.f),
            properties: self.properties.clone(),
        }
    }
}

impl<R: Record> GroupFn<R> {
    pub fn new(f: impl Fn(&Rc<R>) -> Value + 'static) -> Self {
        Self {
            f: Rc::new(f),
            properties: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_properties(mut self, properties: impl IntoIterator<Item = String>) -> Self {
        self.properties = properties.into_iter().collect();
        self
    }

    /// Group by one record field; a missing field yields `Null` (no header).
    #[must_use]
    pub fn by_field(name: &str) -> Self {
        let field = name.to_string();
        let property = field.clone();
        Self {
            f: Rc::new(move |record| record.field(&field).into_option().unwrap_or(Value::Null)),
            properties: vec![property],
        }
    }

    #[must_use]
    pub fn group_id(&self, record: &Rc<R>) -> Value {
        (self.f)(record)
    }

    #[must_use]
    pub fn properties(&self) -> &[String] {
        &self.properties
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.f, &other.f)
    }
}
