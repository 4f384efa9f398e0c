use crate::{
    error::InternalError,
    obs::{self, ObsEvent},
    record::{FieldPresence, Record},
    source::{
        ChangeAction, EventMode, Source, SourceChange, SourceItemChange, SourceObserver,
        SubscriptionId,
    },
    value::Value,
    view::{
        enumerator::ViewCursor,
        events::{ChangePacket, ListenerRegistry, ViewListener},
        filter::FilterEngine,
        handlers::{FilterFn, GroupFn, SortFn},
        item::ViewItem,
        session::UpdateSession,
        state::{ItemState, ViewState},
        strategy::StrategyPipeline,
        uid::UidRegistry,
    },
};
use std::{
    cell::{Cell, RefCell},
    collections::{BTreeSet, HashSet, VecDeque},
    rc::{Rc, Weak},
};

///
/// ViewOptions
///

#[derive(Clone, Debug, Default)]
pub struct ViewOptions {
    /// Field used for identity extraction when the record carries no
    /// identity capability of its own.
    pub id_property: Option<String>,
    /// Elide records whose extracted id was already admitted.
    pub unique: bool,
    /// Properties whose changes always trigger re-analysis, in addition
    /// to those declared by active handlers.
    pub important_properties: Vec<String>,
}

///
/// View
///
/// The public projection façade: a live, read-only sorted/filtered/grouped
/// view over an observable source. Cloning shares the projection.
///

pub struct View<R: Record + 'static> {
    inner: Rc<ViewInner<R>>,
}

impl<R: Record + 'static> Clone for View<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

///
/// ViewInner
///

pub(crate) struct ViewInner<R: Record> {
    source: Rc<dyn Source<R>>,
    subscription: Cell<Option<SubscriptionId>>,
    adapter: RefCell<Option<Rc<SourceAdapter<R>>>>,
    destroyed: Cell<bool>,
    core: RefCell<ViewCore<R>>,
    listeners: ListenerRegistry<R>,
    cursor_position: Cell<isize>,
}

///
/// ViewCore
/// Projection state behind one borrow so maintenance stays atomic.
///

struct ViewCore<R: Record> {
    pipeline: StrategyPipeline<R>,
    filter: FilterEngine<R>,
    /// Materialised sequence in pipeline order (post-sort, post-group,
    /// pre-filter).
    items: Vec<Rc<ViewItem<R>>>,
    /// Visible position → index into `items`.
    sort_map: Vec<usize>,
    uid: UidRegistry,
    id_property: Option<String>,
    base_important: BTreeSet<String>,
    source_synchronized: bool,
    analyze: bool,
    needs_full_rebuild: bool,
    pending_item_changes: VecDeque<SourceItemChange<R>>,
    /// Rehydrated header state waiting for its header to materialise.
    pending_header_state: Vec<(Value, bool, u64)>,
}

impl<R: Record> ViewCore<R> {
    fn new(pipeline: StrategyPipeline<R>, options: &ViewOptions) -> Self {
        Self {
            pipeline,
            filter: FilterEngine::new(),
            items: Vec::new(),
            sort_map: Vec::new(),
            uid: UidRegistry::new(),
            id_property: options.id_property.clone(),
            base_important: options.important_properties.iter().cloned().collect(),
            source_synchronized: true,
            analyze: true,
            needs_full_rebuild: false,
            pending_item_changes: VecDeque::new(),
            pending_header_state: Vec::new(),
        }
    }

    /// Pull the pipeline result and re-shape dependent state.
    fn refresh(&mut self) {
        self.items = self.pipeline.result();
        self.filter.realign(&self.items);

        if !self.pending_header_state.is_empty() {
            let items = &self.items;
            self.pending_header_state.retain(|(id, selected, version)| {
                match items.iter().find(|item| item.group_id() == Some(id)) {
                    Some(header) => {
                        header.force_state(*selected, *version);
                        false
                    }
                    None => true,
                }
            });
        }

        let live: HashSet<u64> = self.items.iter().map(|item| item.instance_id()).collect();
        self.uid.retain_instances(&|instance| live.contains(&instance));
    }

    fn rebuild_sort_map(&mut self) {
        self.sort_map = (0..self.items.len())
            .filter(|&position| self.filter.visible(position))
            .collect();
    }

    fn visible_items(&self) -> Vec<Rc<ViewItem<R>>> {
        self.sort_map
            .iter()
            .map(|&index| Rc::clone(&self.items[index]))
            .collect()
    }

    fn visible_index_of(&self, item: &Rc<ViewItem<R>>) -> Option<usize> {
        self.sort_map
            .iter()
            .position(|&index| Rc::ptr_eq(&self.items[index], item))
    }

    fn items_index_of_record(&self, record: &Rc<R>) -> Option<usize> {
        self.items.iter().position(|item| {
            item.record()
                .is_some_and(|candidate| Rc::ptr_eq(candidate, record))
        })
    }

    /// A property is important when the base set, the id property, or any
    /// active handler declares it.
    fn is_important(&self, property: &str) -> bool {
        if self.base_important.contains(property) {
            return true;
        }
        if self.id_property.as_deref() == Some(property) {
            return true;
        }
        let declared_by_sort = self
            .pipeline
            .sort()
            .handlers()
            .iter()
            .any(|handler| handler.properties().iter().any(|p| p == property));
        let declared_by_group = self
            .pipeline
            .group()
            .group_fn()
            .is_some_and(|group| group.properties().iter().any(|p| p == property));
        let declared_by_filter = self
            .filter
            .filters()
            .iter()
            .any(|filter| filter.properties().iter().any(|p| p == property));

        declared_by_sort || declared_by_group || declared_by_filter
    }

    /// Full re-filter policy: chain change, an item moved, or an active
    /// index-consuming predicate.
    fn refilter(&mut self, force_full: bool, touched: &[usize]) -> Vec<usize> {
        let Self {
            ref pipeline,
            ref mut filter,
            ref items,
            ..
        } = *self;
        let resolver = |position: usize| pipeline.source_index(position);

        if force_full || filter.uses_index() {
            filter.refilter_full(items, &resolver)
        } else {
            let mut flips = Vec::new();
            for (start, count) in clusters(touched) {
                flips.extend(filter.refilter_range(items, start, count, &resolver));
            }
            flips
        }
    }
}

impl<R: Record + 'static> View<R> {
    // ---------------------------------------------------------------------
    // Construction / lifecycle
    // ---------------------------------------------------------------------

    pub fn new(source: Rc<dyn Source<R>>) -> Result<Self, InternalError> {
        Self::with_options(source, &ViewOptions::default())
    }

    pub fn with_options(
        source: Rc<dyn Source<R>>,
        options: &ViewOptions,
    ) -> Result<Self, InternalError> {
        let inner = Rc::new_cyclic(|weak: &Weak<ViewInner<R>>| {
            let pipeline =
                StrategyPipeline::standard(options.unique, options.id_property.clone());
            pipeline.factory().bind(weak.clone());
            ViewInner {
                source: Rc::clone(&source),
                subscription: Cell::new(None),
                adapter: RefCell::new(None),
                destroyed: Cell::new(false),
                core: RefCell::new(ViewCore::new(pipeline, options)),
                listeners: ListenerRegistry::new(),
                cursor_position: Cell::new(-1),
            }
        });

        let records = inner.source_records_checked()?;
        {
            let mut core = inner.core.borrow_mut();
            core.pipeline.rebuild(&records);
            core.refresh();
            core.refilter(true, &[]);
            core.rebuild_sort_map();
        }

        let adapter = Rc::new(SourceAdapter {
            view: Rc::downgrade(&inner),
        });
        let adapter_dyn: Rc<dyn SourceObserver<R>> = Rc::clone(&adapter) as Rc<dyn SourceObserver<R>>;
        let observer: Weak<dyn SourceObserver<R>> = Rc::downgrade(&adapter_dyn);
        let subscription = source.subscribe(observer);
        inner.subscription.set(Some(subscription));
        *inner.adapter.borrow_mut() = Some(adapter);

        Ok(Self { inner })
    }

    pub(crate) fn from_inner(inner: Rc<ViewInner<R>>) -> Self {
        Self { inner }
    }

    /// Tear the projection down. Idempotent; a destroyed view rejects
    /// further operations.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        if let Some(subscription) = self.inner.subscription.take() {
            self.inner.source.unsubscribe(subscription);
        }
        *self.inner.adapter.borrow_mut() = None;
        self.inner.listeners.clear();

        let mut core = self.inner.core.borrow_mut();
        for item in &core.items {
            item.clear_owner();
        }
        core.pipeline.reset();
        core.filter.clear_state();
        core.uid.clear();
        core.items.clear();
        core.sort_map.clear();
        core.pending_item_changes.clear();
        self.inner.cursor_position.set(-1);
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    #[must_use]
    pub fn source(&self) -> &Rc<dyn Source<R>> {
        &self.inner.source
    }

    fn guard(&self, op: &str) -> Result<(), InternalError> {
        if self.inner.destroyed.get() {
            return Err(InternalError::destroyed(op));
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Listeners
    // ---------------------------------------------------------------------

    pub fn subscribe(&self, listener: &Rc<dyn ViewListener<R>>) {
        if self.inner.destroyed.get() {
            return;
        }
        self.inner.listeners.subscribe(listener);
    }

    pub fn unsubscribe(&self, listener: &Rc<dyn ViewListener<R>>) -> bool {
        self.inner.listeners.unsubscribe(listener)
    }

    // ---------------------------------------------------------------------
    // Navigation
    // ---------------------------------------------------------------------

    /// Visible item at a position.
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Rc<ViewItem<R>>> {
        self.inner.visible_item(index)
    }

    /// Number of visible items (headers included).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.visible_count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn each(&self, mut f: impl FnMut(&Rc<ViewItem<R>>, usize)) {
        let visible = self.inner.core.borrow().visible_items();
        for (index, item) in visible.iter().enumerate() {
            f(item, index);
        }
    }

    /// A fresh utility cursor; its position is independent of the view's
    /// observable current position.
    #[must_use]
    pub fn cursor(&self) -> ViewCursor<R> {
        ViewCursor::new(Rc::downgrade(&self.inner))
    }

    /// First visible data item (group headers are skipped).
    #[must_use]
    pub fn first(&self) -> Option<Rc<ViewItem<R>>> {
        let core = self.inner.core.borrow();
        core.sort_map
            .iter()
            .map(|&index| &core.items[index])
            .find(|item| !item.is_group())
            .cloned()
    }

    /// Last visible data item (group headers are skipped).
    #[must_use]
    pub fn last(&self) -> Option<Rc<ViewItem<R>>> {
        let core = self.inner.core.borrow();
        core.sort_map
            .iter()
            .rev()
            .map(|&index| &core.items[index])
            .find(|item| !item.is_group())
            .cloned()
    }

    /// Next visible data item after `item`.
    #[must_use]
    pub fn next_of(&self, item: &Rc<ViewItem<R>>) -> Option<Rc<ViewItem<R>>> {
        let core = self.inner.core.borrow();
        let position = core.visible_index_of(item)?;
        core.sort_map[position + 1..]
            .iter()
            .map(|&index| &core.items[index])
            .find(|candidate| !candidate.is_group())
            .cloned()
    }

    /// Previous visible data item before `item`.
    #[must_use]
    pub fn previous_of(&self, item: &Rc<ViewItem<R>>) -> Option<Rc<ViewItem<R>>> {
        let core = self.inner.core.borrow();
        let position = core.visible_index_of(item)?;
        core.sort_map[..position]
            .iter()
            .rev()
            .map(|&index| &core.items[index])
            .find(|candidate| !candidate.is_group())
            .cloned()
    }

    // ---------------------------------------------------------------------
    // Current position (the observable cursor)
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn current(&self) -> Option<Rc<ViewItem<R>>> {
        let position = self.inner.cursor_position.get();
        if position < 0 {
            return None;
        }
        self.inner.visible_item(usize::try_from(position).ok()?)
    }

    #[must_use]
    pub fn current_position(&self) -> isize {
        self.inner.cursor_position.get()
    }

    /// Make `item` current; false when it is not visible.
    pub fn set_current(&self, item: &Rc<ViewItem<R>>) -> Result<bool, InternalError> {
        self.guard("set_current")?;
        let Some(position) = self.inner.core.borrow().visible_index_of(item) else {
            return Ok(false);
        };
        self.move_cursor(isize::try_from(position).unwrap_or(isize::MAX));
        Ok(true)
    }

    pub fn set_current_position(&self, position: isize) -> Result<bool, InternalError> {
        self.guard("set_current_position")?;
        let count = isize::try_from(self.inner.visible_count()).unwrap_or(isize::MAX);
        if position < -1 || position >= count {
            return Ok(false);
        }
        self.move_cursor(position);
        Ok(true)
    }

    pub fn move_to_first(&self) -> Result<bool, InternalError> {
        self.guard("move_to_first")?;
        if self.inner.visible_count() == 0 {
            return Ok(false);
        }
        self.move_cursor(0);
        Ok(true)
    }

    pub fn move_to_last(&self) -> Result<bool, InternalError> {
        self.guard("move_to_last")?;
        let count = self.inner.visible_count();
        if count == 0 {
            return Ok(false);
        }
        self.move_cursor(isize::try_from(count - 1).unwrap_or(isize::MAX));
        Ok(true)
    }

    pub fn move_to_next(&self) -> Result<bool, InternalError> {
        self.guard("move_to_next")?;
        let next = self.inner.cursor_position.get() + 1;
        let count = isize::try_from(self.inner.visible_count()).unwrap_or(isize::MAX);
        if next >= count {
            return Ok(false);
        }
        self.move_cursor(next);
        Ok(true)
    }

    pub fn move_to_previous(&self) -> Result<bool, InternalError> {
        self.guard("move_to_previous")?;
        let previous = self.inner.cursor_position.get() - 1;
        if previous < -1 {
            return Ok(false);
        }
        self.move_cursor(previous);
        Ok(true)
    }

    fn move_cursor(&self, position: isize) {
        let old_position = self.inner.cursor_position.get();
        if old_position == position {
            return;
        }
        let old_item = self.current();
        self.inner.cursor_position.set(position);
        let new_item = self.current();
        self.inner.listeners.emit_current_change(
            new_item.as_ref(),
            old_item.as_ref(),
            position,
            old_position,
        );
    }

    // ---------------------------------------------------------------------
    // Coordinate queries (unknown mappings yield None, never an error)
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn index_of(&self, item: &Rc<ViewItem<R>>) -> Option<usize> {
        self.inner.core.borrow().visible_index_of(item)
    }

    #[must_use]
    pub fn source_index_by_index(&self, index: usize) -> Option<usize> {
        self.inner.source_index_by_visible(index)
    }

    #[must_use]
    pub fn source_index_by_item(&self, item: &Rc<ViewItem<R>>) -> Option<usize> {
        let index = self.index_of(item)?;
        self.inner.source_index_by_visible(index)
    }

    #[must_use]
    pub fn index_by_source_index(&self, source_index: usize) -> Option<usize> {
        self.inner.visible_index_by_source_index(source_index)
    }

    #[must_use]
    pub fn index_by_source_item(&self, record: &Rc<R>) -> Option<usize> {
        let source_index = self.inner.source.index_of(record)?;
        self.inner.visible_index_by_source_index(source_index)
    }

    #[must_use]
    pub fn item_by_source_index(&self, source_index: usize) -> Option<Rc<ViewItem<R>>> {
        let index = self.inner.visible_index_by_source_index(source_index)?;
        self.inner.visible_item(index)
    }

    #[must_use]
    pub fn item_by_source_item(&self, record: &Rc<R>) -> Option<Rc<ViewItem<R>>> {
        let core = self.inner.core.borrow();
        let items_index = core.items_index_of_record(record)?;
        core.sort_map
            .iter()
            .position(|&index| index == items_index)
            .map(|_| Rc::clone(&core.items[items_index]))
    }

    // ---------------------------------------------------------------------
    // Filter
    // ---------------------------------------------------------------------

    /// Snapshot of the predicate chain.
    #[must_use]
    pub fn filter(&self) -> Vec<FilterFn<R>> {
        self.inner.core.borrow().filter.filters().to_vec()
    }

    pub fn set_filter(&self, filters: Vec<FilterFn<R>>) -> Result<(), InternalError> {
        self.guard("set_filter")?;
        {
            let core = self.inner.core.borrow();
            let current = core.filter.filters();
            if current.len() == filters.len()
                && current
                    .iter()
                    .zip(filters.iter())
                    .all(|(a, b)| a.ptr_eq(b))
            {
                return Ok(());
            }
        }
        self.inner.with_session(|core, session| {
            core.filter.set_filters(filters);
            core.refilter(true, &[]);
            core.rebuild_sort_map();
            session.push(ChangePacket::reset());
        });
        Ok(())
    }

    pub fn add_filter(
        &self,
        filter: FilterFn<R>,
        at: Option<usize>,
    ) -> Result<(), InternalError> {
        self.guard("add_filter")?;
        let mut filters = self.filter();
        let at = at.unwrap_or(filters.len()).min(filters.len());
        filters.insert(at, filter);
        self.set_filter(filters)
    }

    pub fn remove_filter(&self, filter: &FilterFn<R>) -> Result<bool, InternalError> {
        self.guard("remove_filter")?;
        let mut filters = self.filter();
        let before = filters.len();
        filters.retain(|candidate| !candidate.ptr_eq(filter));
        if filters.len() == before {
            return Ok(false);
        }
        self.set_filter(filters)?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Sort
    // ---------------------------------------------------------------------

    /// Snapshot of the comparator chain.
    #[must_use]
    pub fn sort(&self) -> Vec<SortFn<R>> {
        self.inner.core.borrow().pipeline.sort().handlers().to_vec()
    }

    pub fn set_sort(&self, handlers: Vec<SortFn<R>>) -> Result<(), InternalError> {
        self.guard("set_sort")?;
        {
            let core = self.inner.core.borrow();
            let current = core.pipeline.sort().handlers();
            if current.len() == handlers.len()
                && current
                    .iter()
                    .zip(handlers.iter())
                    .all(|(a, b)| a.ptr_eq(b))
            {
                return Ok(());
            }
        }
        self.inner.with_session(|core, session| {
            core.pipeline.sort_mut().set_handlers(handlers);
            core.refresh();
            core.refilter(true, &[]);
            core.rebuild_sort_map();
            session.push(ChangePacket::reset());
        });
        Ok(())
    }

    pub fn add_sort(&self, handler: SortFn<R>, at: Option<usize>) -> Result<(), InternalError> {
        self.guard("add_sort")?;
        let mut handlers = self.sort();
        let at = at.unwrap_or(handlers.len()).min(handlers.len());
        handlers.insert(at, handler);
        self.set_sort(handlers)
    }

    pub fn remove_sort(&self, handler: &SortFn<R>) -> Result<bool, InternalError> {
        self.guard("remove_sort")?;
        let mut handlers = self.sort();
        let before = handlers.len();
        handlers.retain(|candidate| !candidate.ptr_eq(handler));
        if handlers.len() == before {
            return Ok(false);
        }
        self.set_sort(handlers)?;
        Ok(true)
    }

    // ---------------------------------------------------------------------
    // Group
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn group(&self) -> Option<GroupFn<R>> {
        self.inner.core.borrow().pipeline.group().group_fn().cloned()
    }

    pub fn set_group(&self, group: Option<GroupFn<R>>) -> Result<(), InternalError> {
        self.guard("set_group")?;
        {
            let core = self.inner.core.borrow();
            let current = core.pipeline.group().group_fn();
            let unchanged = match (current, group.as_ref()) {
                (None, None) => true,
                (Some(a), Some(b)) => a.ptr_eq(b),
                _ => false,
            };
            if unchanged {
                return Ok(());
            }
        }
        self.inner.with_session(|core, session| {
            core.pipeline.group_mut().set_group(group);
            core.refresh();
            core.refilter(true, &[]);
            core.rebuild_sort_map();
            session.push(ChangePacket::reset());
        });
        Ok(())
    }

    /// Visible data items belonging to a group.
    #[must_use]
    pub fn group_items(&self, id: &Value) -> Vec<Rc<ViewItem<R>>> {
        let core = self.inner.core.borrow();
        let Some(group) = core.pipeline.group().group_fn().cloned() else {
            return Vec::new();
        };
        core.sort_map
            .iter()
            .map(|&index| &core.items[index])
            .filter(|item| {
                item.record()
                    .is_some_and(|record| group.group_id(record) == *id)
            })
            .cloned()
            .collect()
    }

    /// Group id of the visible item at `index`.
    #[must_use]
    pub fn group_by_index(&self, index: usize) -> Option<Value> {
        let core = self.inner.core.borrow();
        let item = core.sort_map.get(index).map(|&i| &core.items[i])?;
        if let Some(id) = item.group_id() {
            return Some(id.clone());
        }
        let group = core.pipeline.group().group_fn()?;
        item.record().map(|record| group.group_id(record))
    }

    // ---------------------------------------------------------------------
    // Selection
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn selected_items(&self) -> Vec<Rc<ViewItem<R>>> {
        self.inner
            .core
            .borrow()
            .items
            .iter()
            .filter(|item| item.selected())
            .cloned()
            .collect()
    }

    /// Flag the items wrapping `records`.
    pub fn set_selected(&self, records: &[Rc<R>], flag: bool) -> Result<(), InternalError> {
        self.guard("set_selected")?;
        self.inner.with_session(|core, _session| {
            for record in records {
                if let Some(index) = core.items_index_of_record(record) {
                    core.items[index].set_selected(flag);
                }
            }
        });
        Ok(())
    }

    pub fn set_selected_all(&self, flag: bool) -> Result<(), InternalError> {
        self.guard("set_selected_all")?;
        self.inner.with_session(|core, _session| {
            for item in &core.items {
                if !item.is_group() {
                    item.set_selected(flag);
                }
            }
        });
        Ok(())
    }

    pub fn invert_selected_all(&self) -> Result<(), InternalError> {
        self.guard("invert_selected_all")?;
        self.inner.with_session(|core, _session| {
            for item in &core.items {
                if !item.is_group() {
                    item.set_selected(!item.selected());
                }
            }
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Uniqueness
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.inner.core.borrow().pipeline.direct().unique()
    }

    pub fn set_unique(&self, unique: bool) -> Result<(), InternalError> {
        self.guard("set_unique")?;
        if self.is_unique() == unique {
            return Ok(());
        }
        let records = self.inner.source_records();
        self.inner.with_session(|core, session| {
            let factory = Rc::clone(core.pipeline.factory());
            core.pipeline
                .direct_mut()
                .set_unique(&factory, unique, &records);
            core.pipeline.invalidate();
            core.refresh();
            core.refilter(true, &[]);
            core.rebuild_sort_map();
            session.push(ChangePacket::reset());
        });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Unique ids
    // ---------------------------------------------------------------------

    pub fn item_uid(&self, item: &Rc<ViewItem<R>>) -> Result<String, InternalError> {
        self.guard("item_uid")?;
        let mut core = self.inner.core.borrow_mut();
        let id_property = core.id_property.clone();
        core.uid.uid_for(item, id_property.as_deref())
    }

    // ---------------------------------------------------------------------
    // Out-of-band item changes
    // ---------------------------------------------------------------------

    /// Report that an item's record changed the named properties outside
    /// the source event stream.
    pub fn notify_item_change(
        &self,
        item: &Rc<ViewItem<R>>,
        properties: &[String],
    ) -> Result<(), InternalError> {
        self.guard("notify_item_change")?;
        let Some(record) = item.record().cloned() else {
            return Ok(());
        };

        let queued = {
            let mut core = self.inner.core.borrow_mut();
            if core.source_synchronized {
                false
            } else {
                let index = self.inner.source.index_of(&record).unwrap_or(0);
                core.pending_item_changes.push_back(SourceItemChange {
                    item: Rc::clone(&record),
                    index,
                    properties: properties.to_vec(),
                });
                obs::sink::record(ObsEvent::ItemChangeQueued);
                true
            }
        };
        if !queued {
            self.inner.apply_item_change(&record, properties, true);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Mutation guard: the projection never mutates its source
    // ---------------------------------------------------------------------

    pub fn assign(&self, _records: &[Rc<R>]) -> Result<(), InternalError> {
        Err(InternalError::read_only("assign"))
    }

    pub fn append(&self, _records: &[Rc<R>]) -> Result<(), InternalError> {
        Err(InternalError::read_only("append"))
    }

    pub fn prepend(&self, _records: &[Rc<R>]) -> Result<(), InternalError> {
        Err(InternalError::read_only("prepend"))
    }

    pub fn clear(&self) -> Result<(), InternalError> {
        Err(InternalError::read_only("clear"))
    }

    pub fn add(&self, _record: Rc<R>) -> Result<(), InternalError> {
        Err(InternalError::read_only("add"))
    }

    pub fn remove(&self, _record: &Rc<R>) -> Result<bool, InternalError> {
        Err(InternalError::read_only("remove"))
    }

    pub fn remove_at(&self, _index: usize) -> Result<(), InternalError> {
        Err(InternalError::read_only("remove_at"))
    }

    pub fn replace(&self, _index: usize, _record: Rc<R>) -> Result<(), InternalError> {
        Err(InternalError::read_only("replace"))
    }

    pub fn move_item(&self, _from: usize, _to: usize) -> Result<(), InternalError> {
        Err(InternalError::read_only("move_item"))
    }

    pub(crate) fn inner(&self) -> &Rc<ViewInner<R>> {
        &self.inner
    }
}

impl<R: Record + 'static> ViewInner<R> {
    // ---------------------------------------------------------------------
    // Read access for cursors and the façade
    // ---------------------------------------------------------------------

    pub(crate) fn visible_count(&self) -> usize {
        self.core.borrow().sort_map.len()
    }

    pub(crate) fn visible_item(&self, index: usize) -> Option<Rc<ViewItem<R>>> {
        let core = self.core.borrow();
        core.sort_map
            .get(index)
            .map(|&items_index| Rc::clone(&core.items[items_index]))
    }

    pub(crate) fn visible_index_of(&self, item: &Rc<ViewItem<R>>) -> Option<usize> {
        self.core.borrow().visible_index_of(item)
    }

    pub(crate) fn visible_index_by_value(&self, property: &str, value: &Value) -> Option<usize> {
        let core = self.core.borrow();
        core.sort_map
            .iter()
            .map(|&index| &core.items[index])
            .position(|item| {
                item.record().is_some_and(|record| {
                    matches!(record.field(property), FieldPresence::Present(ref v) if v == value)
                })
            })
    }

    pub(crate) fn visible_index_by_source_index(&self, source_index: usize) -> Option<usize> {
        let core = self.core.borrow();
        let items_index = core.pipeline.display_index(source_index)?;
        core.sort_map
            .iter()
            .position(|&candidate| candidate == items_index)
    }

    pub(crate) fn source_index_by_visible(&self, index: usize) -> Option<usize> {
        let core = self.core.borrow();
        let items_index = *core.sort_map.get(index)?;
        core.pipeline.source_index(items_index)
    }

    // ---------------------------------------------------------------------
    // State snapshots
    // ---------------------------------------------------------------------

    pub(crate) fn export_state(&self) -> Result<ViewState, InternalError> {
        if self.destroyed.get() {
            return Err(InternalError::destroyed("snapshot"));
        }
        let core = self.core.borrow();

        let mut items = Vec::with_capacity(core.items.len());
        for (index, item) in core.items.iter().enumerate() {
            let state = match item.group_id() {
                Some(id) => ItemState::Group {
                    id: id.clone(),
                    selected: item.selected(),
                    version: item.version(),
                },
                None => {
                    let source_index = core.pipeline.source_index(index).ok_or_else(|| {
                        InternalError::strategy_invariant(
                            "materialised data item lost its source index",
                        )
                    })?;
                    ItemState::Data {
                        source_index: u64::try_from(source_index).map_err(|_| {
                            InternalError::serialize_internal("source index out of range")
                        })?,
                        selected: item.selected(),
                        version: item.version(),
                    }
                }
            };
            items.push(state);
        }

        Ok(ViewState {
            id_property: core.id_property.clone(),
            unique: core.pipeline.direct().unique(),
            cursor_position: i64::try_from(self.cursor_position.get()).unwrap_or(-1),
            items,
        })
    }

    pub(crate) fn import_state(&self, state: &ViewState) -> Result<(), InternalError> {
        {
            let mut core = self.core.borrow_mut();
            for entry in &state.items {
                match entry {
                    ItemState::Data {
                        source_index,
                        selected,
                        version,
                    } => {
                        let source_index = usize::try_from(*source_index).map_err(|_| {
                            InternalError::serialize_internal("source index out of range")
                        })?;
                        let items_index =
                            core.pipeline.display_index(source_index).ok_or_else(|| {
                                InternalError::missing_source(format!(
                                    "snapshot references source index {source_index} which the \
                                     source no longer provides"
                                ))
                            })?;
                        core.items[items_index].force_state(*selected, *version);
                    }
                    ItemState::Group {
                        id,
                        selected,
                        version,
                    } => {
                        core.pending_header_state
                            .push((id.clone(), *selected, *version));
                    }
                }
            }
        }

        let count = isize::try_from(self.visible_count()).unwrap_or(0);
        let position = isize::try_from(state.cursor_position).unwrap_or(-1);
        self.cursor_position
            .set(if position >= -1 && position < count {
                position
            } else {
                -1
            });
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Source plumbing
    // ---------------------------------------------------------------------

    fn source_records(&self) -> Vec<Rc<R>> {
        (0..self.source.len())
            .filter_map(|index| self.source.at(index))
            .collect()
    }

    fn source_records_checked(&self) -> Result<Vec<Rc<R>>, InternalError> {
        let len = self.source.len();
        let records = self.source_records();
        if records.len() != len {
            return Err(InternalError::bad_source(
                "source length and indexed access disagree",
            ));
        }
        Ok(records)
    }

    // ---------------------------------------------------------------------
    // Session plumbing
    // ---------------------------------------------------------------------

    fn with_session(
        self: &Rc<Self>,
        f: impl FnOnce(&mut ViewCore<R>, &mut UpdateSession<R>),
    ) {
        let old_current = usize::try_from(self.cursor_position.get())
            .ok()
            .and_then(|position| self.visible_item(position));

        let packets = {
            let mut core = self.core.borrow_mut();
            let mut session = UpdateSession::open(core.analyze, core.visible_items());
            f(&mut core, &mut session);

            let after = core.visible_items();
            let grouping_active = core.pipeline.group().is_active();
            let group_fn = core.pipeline.group().group_fn().cloned();
            let analyze_now = core.analyze;
            drop(core);

            let group_of = move |item: &Rc<ViewItem<R>>| -> Option<Value> {
                if let Some(id) = item.group_id() {
                    return Some(id.clone());
                }
                group_fn.as_ref().map(|group| {
                    item.record()
                        .map_or(Value::Null, |record| group.group_id(record))
                })
            };
            session.close(analyze_now, &after, &group_of, grouping_active)
        };

        self.listeners.emit_session(&packets);
        self.reanchor_cursor(old_current);
    }

    /// Keep the observable cursor on its item across structural changes;
    /// when the item left the visible sequence the cursor drops to rest.
    fn reanchor_cursor(self: &Rc<Self>, old_current: Option<Rc<ViewItem<R>>>) {
        let Some(current) = old_current else {
            return;
        };
        match self.visible_index_of(&current) {
            Some(position) => {
                self.cursor_position
                    .set(isize::try_from(position).unwrap_or(isize::MAX));
            }
            None => {
                let old_position = self.cursor_position.get();
                self.cursor_position.set(-1);
                self.listeners
                    .emit_current_change(None, Some(&current), -1, old_position);
            }
        }
    }

    // ---------------------------------------------------------------------
    // Source event handlers
    // ---------------------------------------------------------------------

    fn handle_source_change(self: &Rc<Self>, change: &SourceChange<R>) {
        if self.destroyed.get() {
            return;
        }
        if self.core.borrow().needs_full_rebuild {
            self.core.borrow_mut().needs_full_rebuild = false;
            // the rebuild reads the already-mutated source, so the action
            // itself must not be applied a second time
            self.apply_reset();
            return;
        }
        match change.action {
            ChangeAction::Reset => self.apply_reset(),
            ChangeAction::Add => self.apply_add(change),
            ChangeAction::Remove => self.apply_remove(change),
            ChangeAction::Replace => self.apply_replace(change),
            ChangeAction::Move => self.apply_move(change),
            ChangeAction::Change => {
                for record in &change.new_items {
                    self.apply_item_change(record, &[], true);
                }
            }
        }
    }

    fn apply_reset(self: &Rc<Self>) {
        let records = self.source_records();
        self.with_session(|core, session| {
            core.pipeline.rebuild(&records);
            core.filter.clear_state();
            core.uid.clear();
            core.refresh();
            core.refilter(true, &[]);
            core.rebuild_sort_map();
            session.push(ChangePacket::reset());
        });
    }

    fn apply_add(self: &Rc<Self>, change: &SourceChange<R>) {
        self.with_session(|core, session| {
            let before_items = core.items.clone();
            let splice = core
                .pipeline
                .splice(change.new_index, 0, &change.new_items);
            core.refresh();

            let moved = order_changed(&before_items, &core.items);
            let touched = positions_of(&core.items, &splice.inserted);
            core.refilter(moved, &touched);
            core.rebuild_sort_map();

            let visible: Vec<(usize, Rc<ViewItem<R>>)> = splice
                .inserted
                .iter()
                .filter_map(|item| {
                    core.visible_index_of(item)
                        .map(|position| (position, Rc::clone(item)))
                })
                .collect();
            for (position, items) in contiguous_runs(visible) {
                session.push(ChangePacket::added(items, position));
            }
        });
    }

    fn apply_remove(self: &Rc<Self>, change: &SourceChange<R>) {
        self.with_session(|core, session| {
            let before_items = core.items.clone();
            let affected_headers = headers_of(&before_items, &change.old_items);

            let splice = core
                .pipeline
                .splice(change.old_index, change.old_items.len(), &[]);
            core.refresh();

            let moved = order_changed(&before_items, &core.items);
            let touched = positions_of_instances(&core.items, &affected_headers);
            core.refilter(moved, &touched);
            core.rebuild_sort_map();

            let gone: Vec<(usize, Rc<ViewItem<R>>)> = splice
                .removed
                .iter()
                .filter_map(|item| {
                    session
                        .before_position(item)
                        .map(|position| (position, Rc::clone(item)))
                })
                .collect();
            for (position, items) in contiguous_runs(gone) {
                session.push(ChangePacket::removed(items, position));
            }
        });
    }

    fn apply_replace(self: &Rc<Self>, change: &SourceChange<R>) {
        self.with_session(|core, session| {
            let before_items = core.items.clone();
            let splice = core.pipeline.splice(
                change.new_index,
                change.old_items.len(),
                &change.new_items,
            );
            core.refresh();

            let moved = order_changed(&before_items, &core.items);
            let touched = positions_of(&core.items, &splice.inserted);
            core.refilter(moved, &touched);
            core.rebuild_sort_map();

            let old_visible: Vec<(usize, Rc<ViewItem<R>>)> = splice
                .removed
                .iter()
                .filter_map(|item| {
                    session
                        .before_position(item)
                        .map(|position| (position, Rc::clone(item)))
                })
                .collect();
            let new_visible: Vec<(usize, Rc<ViewItem<R>>)> = splice
                .inserted
                .iter()
                .filter_map(|item| {
                    core.visible_index_of(item)
                        .map(|position| (position, Rc::clone(item)))
                })
                .collect();

            let positions_match = old_visible.len() == new_visible.len()
                && old_visible
                    .iter()
                    .zip(new_visible.iter())
                    .all(|((old_pos, _), (new_pos, _))| old_pos == new_pos);

            if positions_match && !old_visible.is_empty() {
                let at = old_visible[0].0;
                session.push(ChangePacket::replaced(
                    old_visible.into_iter().map(|(_, item)| item).collect(),
                    new_visible.into_iter().map(|(_, item)| item).collect(),
                    at,
                ));
            } else {
                for (position, items) in contiguous_runs(old_visible) {
                    session.push(ChangePacket::removed(items, position));
                }
                for (position, items) in contiguous_runs(new_visible) {
                    session.push(ChangePacket::added(items, position));
                }
            }
        });
    }

    fn apply_move(self: &Rc<Self>, change: &SourceChange<R>) {
        self.with_session(|core, session| {
            let moved_items: Vec<Rc<ViewItem<R>>> = change
                .new_items
                .iter()
                .filter_map(|record| {
                    core.items_index_of_record(record)
                        .map(|index| Rc::clone(&core.items[index]))
                })
                .collect();

            core.pipeline
                .move_range(change.old_index, change.new_items.len(), change.new_index);
            core.refresh();
            core.refilter(true, &[]);
            core.rebuild_sort_map();

            for item in moved_items {
                let before = session.before_position(&item);
                let after = core.visible_index_of(&item);
                match (before, after) {
                    (Some(from), Some(to)) if from != to => {
                        session.push(ChangePacket::moved(vec![item], from, to));
                    }
                    (None, Some(to)) => {
                        session.push(ChangePacket::added(vec![item], to));
                    }
                    (Some(from), None) => {
                        session.push(ChangePacket::removed(vec![item], from));
                    }
                    _ => {}
                }
            }
        });
    }

    /// Shared path for per-item changes (source stream and out-of-band
    /// notifications).
    fn apply_item_change(self: &Rc<Self>, record: &Rc<R>, properties: &[String], force: bool) {
        if self.destroyed.get() {
            return;
        }
        let important = {
            let core = self.core.borrow();
            properties.is_empty()
                || properties
                    .iter()
                    .any(|property| core.is_important(property))
        };
        if !important && !force {
            return;
        }

        self.with_session(|core, session| {
            let Some(items_index) = core.items_index_of_record(record) else {
                return;
            };
            let item = Rc::clone(&core.items[items_index]);
            item.bump_version();

            if important {
                let before_items = core.items.clone();
                if let Some(source_index) = core.pipeline.source_index(items_index) {
                    core.pipeline.reposition_source(source_index);
                }
                core.refresh();
                let moved = order_changed(&before_items, &core.items);
                let touched = positions_of(&core.items, std::slice::from_ref(&item));
                core.refilter(moved, &touched);
                core.rebuild_sort_map();
            }

            let before = session.before_position(&item);
            let after = core.visible_index_of(&item);
            match (before, after) {
                (Some(from), Some(to)) => {
                    if from != to {
                        session.push(ChangePacket::moved(vec![Rc::clone(&item)], from, to));
                    }
                    session.push(ChangePacket::changed(vec![item], to));
                }
                (None, Some(to)) => {
                    session.push(ChangePacket::added(vec![item], to));
                }
                (Some(from), None) => {
                    session.push(ChangePacket::removed(vec![item], from));
                }
                (None, None) => {}
            }
        });
    }

    fn handle_item_change(self: &Rc<Self>, change: &SourceItemChange<R>) {
        if self.destroyed.get() {
            return;
        }
        let synchronized = self.core.borrow().source_synchronized;
        if synchronized {
            self.apply_item_change(&change.item, &change.properties, false);
        } else {
            let mut core = self.core.borrow_mut();
            core.pending_item_changes.push_back(change.clone());
            obs::sink::record(ObsEvent::ItemChangeQueued);
        }
    }

    fn handle_event_mode(self: &Rc<Self>, mode: EventMode) {
        if self.destroyed.get() {
            return;
        }
        let drained = {
            let mut core = self.core.borrow_mut();
            let was_analyze = core.analyze;
            core.source_synchronized = mode.enabled;
            core.analyze = mode.analyze;
            if mode.enabled && mode.analyze && !was_analyze {
                // re-enabling analysis forces a full rebuild on the next
                // mutation
                core.needs_full_rebuild = true;
            }
            if mode.enabled {
                std::mem::take(&mut core.pending_item_changes)
            } else {
                VecDeque::new()
            }
        };
        for change in drained {
            self.apply_item_change(&change.item, &change.properties, true);
        }
    }
}

///
/// SourceAdapter
/// Bridges the weakly-subscribed observer surface onto the view.
///

struct SourceAdapter<R: Record> {
    view: Weak<ViewInner<R>>,
}

impl<R: Record + 'static> SourceObserver<R> for SourceAdapter<R> {
    fn on_source_change(&self, change: &SourceChange<R>) {
        if let Some(view) = self.view.upgrade() {
            view.handle_source_change(change);
        }
    }

    fn on_source_item_change(&self, change: &SourceItemChange<R>) {
        if let Some(view) = self.view.upgrade() {
            view.handle_item_change(change);
        }
    }

    fn on_event_mode_change(&self, mode: EventMode) {
        if let Some(view) = self.view.upgrade() {
            view.handle_event_mode(mode);
        }
    }
}

// ---------------------------------------------------------------------
// Free helpers
// ---------------------------------------------------------------------

/// Did surviving items change their relative order between two pre-filter
/// sequences? Insertions and removals alone do not count.
fn order_changed<R: Record>(before: &[Rc<ViewItem<R>>], after: &[Rc<ViewItem<R>>]) -> bool {
    let after_ids: HashSet<u64> = after.iter().map(|item| item.instance_id()).collect();
    let before_ids: HashSet<u64> = before.iter().map(|item| item.instance_id()).collect();

    let survivors_before: Vec<u64> = before
        .iter()
        .map(|item| item.instance_id())
        .filter(|id| after_ids.contains(id))
        .collect();
    let survivors_after: Vec<u64> = after
        .iter()
        .map(|item| item.instance_id())
        .filter(|id| before_ids.contains(id))
        .collect();

    survivors_before != survivors_after
}

/// Pre-filter positions of `targets` within `items`.
fn positions_of<R: Record>(
    items: &[Rc<ViewItem<R>>],
    targets: &[Rc<ViewItem<R>>],
) -> Vec<usize> {
    let wanted: HashSet<u64> = targets.iter().map(|item| item.instance_id()).collect();
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| wanted.contains(&item.instance_id()))
        .map(|(position, _)| position)
        .collect()
}

fn positions_of_instances<R: Record>(items: &[Rc<ViewItem<R>>], instances: &[u64]) -> Vec<usize> {
    let wanted: HashSet<u64> = instances.iter().copied().collect();
    items
        .iter()
        .enumerate()
        .filter(|(_, item)| wanted.contains(&item.instance_id()))
        .map(|(position, _)| position)
        .collect()
}

/// Headers of the runs the given records belong to, as instance ids.
fn headers_of<R: Record>(items: &[Rc<ViewItem<R>>], records: &[Rc<R>]) -> Vec<u64> {
    let mut headers = Vec::new();
    let mut current_header: Option<u64> = None;
    for item in items {
        if item.is_group() {
            current_header = Some(item.instance_id());
            continue;
        }
        let matched = item.record().is_some_and(|candidate| {
            records.iter().any(|record| Rc::ptr_eq(candidate, record))
        });
        if matched
            && let Some(header) = current_header
            && headers.last() != Some(&header)
        {
            headers.push(header);
        }
    }
    headers
}

/// Collapse `(position, item)` pairs into maximal contiguous runs.
fn contiguous_runs<R: Record>(
    mut entries: Vec<(usize, Rc<ViewItem<R>>)>,
) -> Vec<(usize, Vec<Rc<ViewItem<R>>>)> {
    entries.sort_by_key(|(position, _)| *position);

    let mut runs: Vec<(usize, Vec<Rc<ViewItem<R>>>)> = Vec::new();
    for (position, item) in entries {
        match runs.last_mut() {
            Some((start, items)) if *start + items.len() == position => items.push(item),
            _ => runs.push((position, vec![item])),
        }
    }
    runs
}

/// Collapse sorted positions into `(start, count)` clusters.
fn clusters(positions: &[usize]) -> Vec<(usize, usize)> {
    let mut sorted: Vec<usize> = positions.to_vec();
    sorted.sort_unstable();
    sorted.dedup();

    let mut clusters: Vec<(usize, usize)> = Vec::new();
    for position in sorted {
        match clusters.last_mut() {
            Some((start, count)) if *start + *count == position => *count += 1,
            _ => clusters.push((position, 1)),
        }
    }
    clusters
}
