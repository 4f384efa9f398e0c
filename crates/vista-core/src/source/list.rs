use crate::{
    record::Record,
    source::{
        ChangeAction, EventMode, Source, SourceChange, SourceItemChange, SourceObserver,
        SubscriptionId,
    },
};
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};

///
/// ObservableVec
///
/// In-memory observable list: the reference `Source` implementation.
/// Cloning shares the underlying list.
///

pub struct ObservableVec<R: Record> {
    inner: Rc<ListInner<R>>,
}

struct ListInner<R: Record> {
    items: RefCell<Vec<Rc<R>>>,
    observers: RefCell<Vec<(SubscriptionId, Weak<dyn SourceObserver<R>>)>>,
    next_subscription: Cell<u64>,
    mode: Cell<EventMode>,
    queued: RefCell<Vec<QueuedNotice<R>>>,
}

enum QueuedNotice<R> {
    Structural(SourceChange<R>),
    Item(SourceItemChange<R>),
}

impl<R: Record> Clone for ObservableVec<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<R: Record + 'static> Default for ObservableVec<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record + 'static> ObservableVec<R> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ListInner {
                items: RefCell::new(Vec::new()),
                observers: RefCell::new(Vec::new()),
                next_subscription: Cell::new(0),
                mode: Cell::new(EventMode::default()),
                queued: RefCell::new(Vec::new()),
            }),
        }
    }

    #[must_use]
    pub fn from_items(items: impl IntoIterator<Item = R>) -> Self {
        let list = Self::new();
        *list.inner.items.borrow_mut() = items.into_iter().map(Rc::new).collect();
        list
    }

    // ---------------------------------------------------------------------
    // Structural mutation
    // ---------------------------------------------------------------------

    /// Replace the whole contents.
    pub fn assign(&self, items: impl IntoIterator<Item = Rc<R>>) {
        *self.inner.items.borrow_mut() = items.into_iter().collect();
        self.notify(SourceChange::reset());
    }

    pub fn append(&self, items: impl IntoIterator<Item = Rc<R>>) {
        let added: Vec<Rc<R>> = items.into_iter().collect();
        if added.is_empty() {
            return;
        }
        let at = self.inner.items.borrow().len();
        self.inner.items.borrow_mut().extend(added.iter().cloned());
        self.notify(SourceChange::added(added, at));
    }

    pub fn prepend(&self, items: impl IntoIterator<Item = Rc<R>>) {
        let added: Vec<Rc<R>> = items.into_iter().collect();
        if added.is_empty() {
            return;
        }
        self.inner
            .items
            .borrow_mut()
            .splice(0..0, added.iter().cloned());
        self.notify(SourceChange::added(added, 0));
    }

    pub fn add(&self, item: Rc<R>) {
        self.append([item]);
    }

    /// Insert one item at a position (clamped to the current length).
    pub fn insert(&self, index: usize, item: Rc<R>) {
        let at = index.min(self.inner.items.borrow().len());
        self.inner.items.borrow_mut().insert(at, Rc::clone(&item));
        self.notify(SourceChange::added(vec![item], at));
    }

    /// Remove an item by pointer identity.
    pub fn remove(&self, item: &Rc<R>) -> bool {
        let index = self.index_of(item);
        match index {
            Some(index) => {
                self.remove_at(index);
                true
            }
            None => false,
        }
    }

    pub fn remove_at(&self, index: usize) -> Option<Rc<R>> {
        let removed = {
            let mut items = self.inner.items.borrow_mut();
            if index >= items.len() {
                return None;
            }
            items.remove(index)
        };
        self.notify(SourceChange::removed(vec![Rc::clone(&removed)], index));
        Some(removed)
    }

    pub fn replace(&self, index: usize, item: Rc<R>) -> Option<Rc<R>> {
        let old = {
            let mut items = self.inner.items.borrow_mut();
            let slot = items.get_mut(index)?;
            std::mem::replace(slot, Rc::clone(&item))
        };
        self.notify(SourceChange::replaced(
            vec![Rc::clone(&old)],
            vec![item],
            index,
        ));
        Some(old)
    }

    pub fn move_item(&self, from: usize, to: usize) -> bool {
        if from == to {
            return true;
        }
        let moved = {
            let mut items = self.inner.items.borrow_mut();
            if from >= items.len() || to >= items.len() {
                return false;
            }
            let item = items.remove(from);
            items.insert(to, Rc::clone(&item));
            item
        };
        self.notify(SourceChange::moved(vec![moved], from, to));
        true
    }

    pub fn clear(&self) {
        self.inner.items.borrow_mut().clear();
        self.notify(SourceChange::reset());
    }

    // ---------------------------------------------------------------------
    // Per-item notification
    // ---------------------------------------------------------------------

    /// Raise a per-item change for the record at `index`.
    ///
    /// Callers mutate the record first (records are interior-mutable), then
    /// report which properties changed.
    pub fn notify_item_change(&self, index: usize, properties: impl IntoIterator<Item = String>) {
        let Some(item) = self.at(index) else {
            return;
        };
        let change = SourceItemChange {
            item,
            index,
            properties: properties.into_iter().collect(),
        };

        if self.inner.mode.get().enabled {
            self.each_observer(|observer| observer.on_source_item_change(&change));
        } else if self.inner.mode.get().analyze {
            self.inner
                .queued
                .borrow_mut()
                .push(QueuedNotice::Item(change));
        }
    }

    // ---------------------------------------------------------------------
    // Event-raising mode
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn event_mode(&self) -> EventMode {
        self.inner.mode.get()
    }

    /// Toggle batch mode.
    ///
    /// Disabling suppresses event delivery; with `analyze` the suppressed
    /// events are queued and replayed verbatim on re-enable, without it the
    /// re-enable collapses to a single `Reset`.
    pub fn set_event_raising(&self, enabled: bool, analyze: bool) {
        let previous = self.inner.mode.get();
        if previous.enabled == enabled {
            self.inner.mode.set(EventMode { enabled, analyze });
            return;
        }

        if enabled {
            let was_analyzing = previous.analyze;
            self.inner.mode.set(EventMode { enabled, analyze });
            self.each_observer(|observer| {
                observer.on_event_mode_change(EventMode { enabled, analyze });
            });

            let queued = std::mem::take(&mut *self.inner.queued.borrow_mut());
            if was_analyzing {
                for notice in &queued {
                    match notice {
                        QueuedNotice::Structural(change) => {
                            self.each_observer(|observer| observer.on_source_change(change));
                        }
                        QueuedNotice::Item(change) => {
                            self.each_observer(|observer| observer.on_source_item_change(change));
                        }
                    }
                }
            } else {
                let reset = SourceChange::reset();
                self.each_observer(|observer| observer.on_source_change(&reset));
            }
        } else {
            self.inner.mode.set(EventMode { enabled, analyze });
            self.each_observer(|observer| {
                observer.on_event_mode_change(EventMode { enabled, analyze });
            });
        }
    }

    // ---------------------------------------------------------------------
    // Internal emission
    // ---------------------------------------------------------------------

    fn notify(&self, change: SourceChange<R>) {
        let mode = self.inner.mode.get();
        if mode.enabled {
            self.each_observer(|observer| observer.on_source_change(&change));
        } else if mode.analyze && change.action != ChangeAction::Reset {
            self.inner
                .queued
                .borrow_mut()
                .push(QueuedNotice::Structural(change));
        } else if mode.analyze {
            // a reset supersedes anything queued before it
            let mut queued = self.inner.queued.borrow_mut();
            queued.clear();
            queued.push(QueuedNotice::Structural(change));
        }
    }

    fn each_observer(&self, mut f: impl FnMut(&dyn SourceObserver<R>)) {
        let observers: Vec<Weak<dyn SourceObserver<R>>> = self
            .inner
            .observers
            .borrow()
            .iter()
            .map(|(_, weak)| weak.clone())
            .collect();

        let mut any_dead = false;
        for weak in observers {
            match weak.upgrade() {
                Some(observer) => f(observer.as_ref()),
                None => any_dead = true,
            }
        }

        if any_dead {
            self.inner
                .observers
                .borrow_mut()
                .retain(|(_, weak)| weak.strong_count() > 0);
        }
    }
}

impl<R: Record + 'static> Source<R> for ObservableVec<R> {
    fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    fn at(&self, index: usize) -> Option<Rc<R>> {
        self.inner.items.borrow().get(index).cloned()
    }

    fn index_of(&self, item: &Rc<R>) -> Option<usize> {
        self.inner
            .items
            .borrow()
            .iter()
            .position(|candidate| Rc::ptr_eq(candidate, item))
    }

    fn subscribe(&self, observer: Weak<dyn SourceObserver<R>>) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_subscription.get());
        self.inner.next_subscription.set(id.0 + 1);
        self.inner.observers.borrow_mut().push((id, observer));
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.inner.observers.borrow_mut();
        let before = observers.len();
        observers.retain(|(candidate, _)| *candidate != id);
        observers.len() != before
    }
}

///
/// TESTS
///
