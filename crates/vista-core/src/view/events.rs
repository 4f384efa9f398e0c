use crate::{
    obs::{self, ObsEvent},
    record::Record,
    source::ChangeAction,
    view::item::ViewItem,
};
use std::{
    cell::RefCell,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::{Rc, Weak},
};

///
/// ChangePacket
///
/// One projection-level change notification, in visible index space.
/// Actions mirror the source vocabulary after projection mapping.
///

#[derive(Clone, Debug)]
pub struct ChangePacket<R: Record> {
    pub action: ChangeAction,
    pub new_items: Vec<Rc<ViewItem<R>>>,
    pub new_index: usize,
    pub old_items: Vec<Rc<ViewItem<R>>>,
    pub old_index: usize,
}

impl<R: Record> ChangePacket<R> {
    #[must_use]
    pub const fn reset() -> Self {
        Self {
            action: ChangeAction::Reset,
            new_items: Vec::new(),
            new_index: 0,
            old_items: Vec::new(),
            old_index: 0,
        }
    }

    #[must_use]
    pub const fn added(items: Vec<Rc<ViewItem<R>>>, at: usize) -> Self {
        Self {
            action: ChangeAction::Add,
            new_items: items,
            new_index: at,
            old_items: Vec::new(),
            old_index: 0,
        }
    }

    #[must_use]
    pub const fn removed(items: Vec<Rc<ViewItem<R>>>, at: usize) -> Self {
        Self {
            action: ChangeAction::Remove,
            new_items: Vec::new(),
            new_index: 0,
            old_items: items,
            old_index: at,
        }
    }

    #[must_use]
    pub const fn replaced(
        old_items: Vec<Rc<ViewItem<R>>>,
        new_items: Vec<Rc<ViewItem<R>>>,
        at: usize,
    ) -> Self {
        Self {
            action: ChangeAction::Replace,
            new_items,
            new_index: at,
            old_items,
            old_index: at,
        }
    }

    #[must_use]
    pub const fn moved(items: Vec<Rc<ViewItem<R>>>, from: usize, to: usize) -> Self {
        Self {
            action: ChangeAction::Move,
            new_items: items,
            new_index: to,
            old_items: Vec::new(),
            old_index: from,
        }
    }

    #[must_use]
    pub const fn changed(items: Vec<Rc<ViewItem<R>>>, at: usize) -> Self {
        Self {
            action: ChangeAction::Change,
            new_items: items,
            new_index: at,
            old_items: Vec::new(),
            old_index: 0,
        }
    }

    /// Position the packet sorts by in the emission pass.
    #[must_use]
    pub(crate) const fn anchor(&self) -> usize {
        match self.action {
            ChangeAction::Remove => self.old_index,
            _ => self.new_index,
        }
    }
}

///
/// ViewListener
///
/// The exposed event surface. Delivery is synchronous, strictly
/// `before → packets → after` per session.
///

pub trait ViewListener<R: Record> {
    fn on_before_collection_change(&self) {}

    fn on_collection_change(&self, packet: &ChangePacket<R>) {
        let _ = packet;
    }

    fn on_after_collection_change(&self) {}

    fn on_current_change(
        &self,
        new_item: Option<&Rc<ViewItem<R>>>,
        old_item: Option<&Rc<ViewItem<R>>>,
        new_position: isize,
        old_position: isize,
    ) {
        let _ = (new_item, old_item, new_position, old_position);
    }
}

///
/// ListenerRegistry
///
/// Weakly-held listeners; dead entries are pruned at emission and
/// reported to the diagnostics sink.
///

pub(crate) struct ListenerRegistry<R: Record> {
    listeners: RefCell<Vec<Weak<dyn ViewListener<R>>>>,
}

impl<R: Record> ListenerRegistry<R> {
    pub(crate) const fn new() -> Self {
        Self {
            listeners: RefCell::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self, listener: &Rc<dyn ViewListener<R>>) {
        self.listeners.borrow_mut().push(Rc::downgrade(listener));
    }

    pub(crate) fn unsubscribe(&self, listener: &Rc<dyn ViewListener<R>>) -> bool {
        let mut listeners = self.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|weak| {
            weak.upgrade()
                .is_some_and(|live| !Rc::ptr_eq(&live, listener))
        });
        listeners.len() != before
    }

    pub(crate) fn clear(&self) {
        self.listeners.borrow_mut().clear();
    }

    /// Deliver one session's packets.
    pub(crate) fn emit_session(&self, packets: &[ChangePacket<R>]) {
        if packets.is_empty() {
            return;
        }
        self.each(|listener| listener.on_before_collection_change());
        for packet in packets {
            self.each(|listener| listener.on_collection_change(packet));
        }
        self.each(|listener| listener.on_after_collection_change());

        obs::sink::record(ObsEvent::SessionClosed {
            packets: packets.len(),
        });
    }

    pub(crate) fn emit_current_change(
        &self,
        new_item: Option<&Rc<ViewItem<R>>>,
        old_item: Option<&Rc<ViewItem<R>>>,
        new_position: isize,
        old_position: isize,
    ) {
        self.each(|listener| {
            listener.on_current_change(new_item, old_item, new_position, old_position);
        });
    }

    /// Delivery is isolated per listener: a panicking callback is caught
    /// and reported, and the rest of the emission pass still runs.
    fn each(&self, mut f: impl FnMut(&dyn ViewListener<R>)) {
        let snapshot: Vec<Weak<dyn ViewListener<R>>> = self.listeners.borrow().clone();

        let mut any_dead = false;
        for weak in snapshot {
            match weak.upgrade() {
                Some(listener) => {
                    let delivery = catch_unwind(AssertUnwindSafe(|| f(listener.as_ref())));
                    if delivery.is_err() {
                        obs::sink::record(ObsEvent::ListenerPanicked);
                    }
                }
                None => any_dead = true,
            }
        }

        if any_dead {
            obs::sink::record(ObsEvent::ListenerLost);
            self.listeners
                .borrow_mut()
                .retain(|weak| weak.strong_count() > 0);
        }
    }
}
