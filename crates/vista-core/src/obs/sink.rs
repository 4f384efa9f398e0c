//! Diagnostics sink boundary.
//!
//! Projection logic MUST NOT reach for an ambient global logger.
//! All diagnostics flow through ObsEvent and an injected ObsSink.

use std::cell::{Cell, RefCell};

thread_local! {
    static SINK_OVERRIDE: RefCell<Option<*const dyn ObsSink>> = const { RefCell::new(None) };
}

///
/// ObsEvent
///

#[derive(Clone, Copy, Debug)]
pub enum ObsEvent {
    /// An update session closed and delivered this many change packets.
    SessionClosed { packets: usize },
    /// The whole filter mask was re-evaluated.
    RefilterFull { items: usize },
    /// Only a subrange of the mask was re-evaluated.
    RefilterRange { start: usize, count: usize },
    /// The sort permutation was recomputed from scratch.
    Resort { items: usize },
    /// The group stage re-derived headers and runs.
    Regroup { groups: usize },
    /// A per-item change was queued while the source was silent.
    ItemChangeQueued,
    /// A registered listener was dropped before delivery and pruned.
    ListenerLost,
    /// A listener panicked during delivery; the emission pass continued.
    ListenerPanicked,
}

///
/// ObsSink
///

pub trait ObsSink {
    fn record(&self, event: ObsEvent);
}

///
/// NoopObsSink
///

pub struct NoopObsSink;

impl ObsSink for NoopObsSink {
    fn record(&self, _: ObsEvent) {}
}

///
/// CountingObsSink
/// Test-facing sink that tallies events by kind.
///

#[derive(Debug, Default)]
pub struct CountingObsSink {
    pub sessions_closed: Cell<u64>,
    pub refilters_full: Cell<u64>,
    pub refilters_range: Cell<u64>,
    pub resorts: Cell<u64>,
    pub regroups: Cell<u64>,
    pub item_changes_queued: Cell<u64>,
    pub listeners_lost: Cell<u64>,
    pub listeners_panicked: Cell<u64>,
}

impl ObsSink for CountingObsSink {
    fn record(&self, event: ObsEvent) {
        let slot = match event {
            ObsEvent::SessionClosed { .. } => &self.sessions_closed,
            ObsEvent::RefilterFull { .. } => &self.refilters_full,
            ObsEvent::RefilterRange { .. } => &self.refilters_range,
            ObsEvent::Resort { .. } => &self.resorts,
            ObsEvent::Regroup { .. } => &self.regroups,
            ObsEvent::ItemChangeQueued => &self.item_changes_queued,
            ObsEvent::ListenerLost => &self.listeners_lost,
            ObsEvent::ListenerPanicked => &self.listeners_panicked,
        };
        slot.set(slot.get() + 1);
    }
}

pub(crate) fn record(event: ObsEvent) {
    let override_ptr = SINK_OVERRIDE.with(|cell| *cell.borrow());
    if let Some(ptr) = override_ptr {
        // SAFETY: override is scoped by with_obs_sink and only used synchronously.
        unsafe { (*ptr).record(event) };
    }
}

/// Run a closure with a temporary diagnostics sink override.
pub fn with_obs_sink<T>(sink: &dyn ObsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<*const dyn ObsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| {
                *cell.borrow_mut() = self.0;
            });
        }
    }

    // SAFETY: we erase the reference lifetime for scoped storage in TLS and
    // restore the previous value on scope exit via Guard.
    let sink_ptr = unsafe { std::mem::transmute::<&dyn ObsSink, *const dyn ObsSink>(sink) };
    let prev = SINK_OVERRIDE.with(|cell| {
        let mut slot = cell.borrow_mut();
        slot.replace(sink_ptr)
    });
    let _guard = Guard(prev);

    f()
}

///
/// TESTS
///
