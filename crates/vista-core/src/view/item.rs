use crate::{
    record::Record,
    value::Value,
    view::collection::{View, ViewInner},
};
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};

///
/// ItemContents
///
/// What a projection item wraps: a source record, or a group id for the
/// synthetic header in front of a group run.
///

#[derive(Clone)]
pub enum ItemContents<R> {
    Data(Rc<R>),
    Group(Value),
}

///
/// ViewItem
///
/// The projection's wrapper around one source record (or one group header).
/// Owned exclusively by its view; `owner` is a weak back-link, never an
/// owning edge.
///

pub struct ViewItem<R: Record> {
    contents: ItemContents<R>,
    instance_id: u64,
    selected: Cell<bool>,
    version: Cell<u64>,
    owner: RefCell<Weak<ViewInner<R>>>,
}

impl<R: Record> ViewItem<R> {
    pub(crate) fn new(contents: ItemContents<R>, instance_id: u64) -> Self {
        Self {
            contents,
            instance_id,
            selected: Cell::new(false),
            version: Cell::new(0),
            owner: RefCell::new(Weak::new()),
        }
    }

    #[must_use]
    pub const fn contents(&self) -> &ItemContents<R> {
        &self.contents
    }

    /// The wrapped record; `None` for group headers.
    #[must_use]
    pub const fn record(&self) -> Option<&Rc<R>> {
        match &self.contents {
            ItemContents::Data(record) => Some(record),
            ItemContents::Group(_) => None,
        }
    }

    /// The group id; `None` for data items.
    #[must_use]
    pub const fn group_id(&self) -> Option<&Value> {
        match &self.contents {
            ItemContents::Group(id) => Some(id),
            ItemContents::Data(_) => None,
        }
    }

    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self.contents, ItemContents::Group(_))
    }

    /// Monotonic id assigned at construction, stable for the item's life.
    #[must_use]
    pub const fn instance_id(&self) -> u64 {
        self.instance_id
    }

    #[must_use]
    pub fn selected(&self) -> bool {
        self.selected.get()
    }

    /// Observable-mutation counter.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version.get()
    }

    /// The owning view, while it is alive and not destroyed.
    #[must_use]
    pub fn owner(&self) -> Option<View<R>> {
        self.owner.borrow().upgrade().map(View::from_inner)
    }

    pub(crate) fn set_selected(&self, flag: bool) -> bool {
        if self.selected.get() == flag {
            return false;
        }
        self.selected.set(flag);
        self.bump_version();
        true
    }

    pub(crate) fn bump_version(&self) {
        self.version.set(self.version.get() + 1);
    }

    pub(crate) fn force_state(&self, selected: bool, version: u64) {
        self.selected.set(selected);
        self.version.set(version);
    }

    pub(crate) fn bind_owner(&self, owner: &Weak<ViewInner<R>>) {
        *self.owner.borrow_mut() = owner.clone();
    }

    pub(crate) fn clear_owner(&self) {
        *self.owner.borrow_mut() = Weak::new();
    }
}

impl<R: Record> fmt::Debug for ViewItem<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.contents {
            ItemContents::Data(_) => "data",
            ItemContents::Group(id) => return write!(f, "ViewItem(group:{id})"),
        };
        write!(
            f,
            "ViewItem({kind}#{} v{} sel:{})",
            self.instance_id,
            self.version.get(),
            self.selected.get()
        )
    }
}

///
/// ItemFactory
///
/// Creates projection items with monotonic instance ids and binds their
/// owner back-link.
///

pub(crate) struct ItemFactory<R: Record> {
    owner: RefCell<Weak<ViewInner<R>>>,
    next_instance: Cell<u64>,
}

impl<R: Record> ItemFactory<R> {
    pub(crate) fn new() -> Self {
        Self {
            owner: RefCell::new(Weak::new()),
            next_instance: Cell::new(0),
        }
    }

    pub(crate) fn bind(&self, owner: Weak<ViewInner<R>>) {
        *self.owner.borrow_mut() = owner;
    }

    pub(crate) fn data(&self, record: Rc<R>) -> Rc<ViewItem<R>> {
        self.build(ItemContents::Data(record))
    }

    pub(crate) fn group(&self, id: Value) -> Rc<ViewItem<R>> {
        self.build(ItemContents::Group(id))
    }

    fn build(&self, contents: ItemContents<R>) -> Rc<ViewItem<R>> {
        let id = self.next_instance.get();
        self.next_instance.set(id + 1);

        let item = Rc::new(ViewItem::new(contents, id));
        item.bind_owner(&self.owner.borrow());
        item
    }
}
