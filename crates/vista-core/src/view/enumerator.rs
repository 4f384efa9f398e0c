use crate::{
    record::Record,
    value::Value,
    view::{collection::ViewInner, item::ViewItem},
};
use std::{
    cell::Cell,
    rc::{Rc, Weak},
};

///
/// ViewCursor
///
/// Stateful traversal cursor over the visible sequence, obeying the filter
/// mask and sort permutation. Position lives in `[-1, visible_count)`;
/// `-1` is the before-first rest position.
///

pub struct ViewCursor<R: Record> {
    view: Weak<ViewInner<R>>,
    position: Cell<isize>,
}

impl<R: Record + 'static> ViewCursor<R> {
    pub(crate) fn new(view: Weak<ViewInner<R>>) -> Self {
        Self {
            view,
            position: Cell::new(-1),
        }
    }

    pub fn reset(&self) {
        self.position.set(-1);
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.view
            .upgrade()
            .map_or(0, |view| view.visible_count())
    }

    #[must_use]
    pub fn current_index(&self) -> isize {
        self.position.get()
    }

    #[must_use]
    pub fn current(&self) -> Option<Rc<ViewItem<R>>> {
        let position = self.position.get();
        if position < 0 {
            return None;
        }
        self.at(usize::try_from(position).ok()?)
    }

    #[must_use]
    pub fn at(&self, index: usize) -> Option<Rc<ViewItem<R>>> {
        self.view.upgrade()?.visible_item(index)
    }

    /// Advance; returns false (and rests on the last position) when
    /// exhausted.
    pub fn move_next(&self) -> bool {
        let count = isize::try_from(self.count()).unwrap_or(isize::MAX);
        let next = self.position.get() + 1;
        if next < count {
            self.position.set(next);
            true
        } else {
            self.position.set(count - 1);
            false
        }
    }

    pub fn move_previous(&self) -> bool {
        let previous = self.position.get() - 1;
        if previous >= 0 {
            self.position.set(previous);
            true
        } else {
            self.position.set(-1);
            false
        }
    }

    /// Position the cursor; out-of-range positions are rejected.
    pub fn set_position(&self, position: isize) -> bool {
        let count = isize::try_from(self.count()).unwrap_or(isize::MAX);
        if position < -1 || position >= count {
            return false;
        }
        self.position.set(position);
        true
    }

    /// Position the cursor on an item; false when it is not visible.
    pub fn set_current(&self, item: &Rc<ViewItem<R>>) -> bool {
        let Some(view) = self.view.upgrade() else {
            return false;
        };
        match view.visible_index_of(item) {
            Some(index) => {
                self.position
                    .set(isize::try_from(index).unwrap_or(isize::MAX));
                true
            }
            None => false,
        }
    }

    /// First visible position whose record field equals `value`.
    #[must_use]
    pub fn index_by_value(&self, property: &str, value: &Value) -> Option<usize> {
        self.view.upgrade()?.visible_index_by_value(property, value)
    }

    /// Source index → visible position.
    #[must_use]
    pub fn internal_by_source(&self, source_index: usize) -> Option<usize> {
        self.view
            .upgrade()?
            .visible_index_by_source_index(source_index)
    }

    /// Visible position → source index.
    #[must_use]
    pub fn source_by_internal(&self, index: usize) -> Option<usize> {
        self.view.upgrade()?.source_index_by_visible(index)
    }
}
