use crate::{
    record::{FieldPresence, Record},
    value::{OrdKey, Value},
    view::item::{ItemFactory, ViewItem},
};
use std::{collections::BTreeSet, rc::Rc};

///
/// DirectEntry
///
/// One source slot. `item` is `None` when uniqueness elided the record:
/// the slot still consumes a source index but produces no projection item.
///

struct DirectEntry<R: Record> {
    record: Rc<R>,
    item: Option<Rc<ViewItem<R>>>,
}

///
/// DirectStrategy
///
/// Leaf stage: one projection item per source record, in source order,
/// with optional uniqueness enforcement keyed by the extracted id.
///

pub(crate) struct DirectStrategy<R: Record> {
    entries: Vec<DirectEntry<R>>,
    id_set: BTreeSet<OrdKey>,
    unique: bool,
    id_property: Option<String>,
}

impl<R: Record> DirectStrategy<R> {
    pub(crate) fn new(unique: bool, id_property: Option<String>) -> Self {
        Self {
            entries: Vec::new(),
            id_set: BTreeSet::new(),
            unique,
            id_property,
        }
    }

    #[must_use]
    pub(crate) const fn unique(&self) -> bool {
        self.unique
    }

    /// Surviving items in source order.
    #[must_use]
    pub(crate) fn items(&self) -> Vec<Rc<ViewItem<R>>> {
        self.entries
            .iter()
            .filter_map(|entry| entry.item.clone())
            .collect()
    }

    #[must_use]
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.item.is_some())
            .count()
    }

    /// Source index of the `direct_index`-th surviving item.
    #[must_use]
    pub(crate) fn source_index(&self, direct_index: usize) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.item.is_some())
            .nth(direct_index)
            .map(|(source_index, _)| source_index)
    }

    /// Position among surviving items for a source index; `None` if the
    /// slot was elided or out of range.
    #[must_use]
    pub(crate) fn display_index(&self, source_index: usize) -> Option<usize> {
        if source_index >= self.entries.len() || self.entries[source_index].item.is_none() {
            return None;
        }
        Some(
            self.entries[..source_index]
                .iter()
                .filter(|entry| entry.item.is_some())
                .count(),
        )
    }

    /// Source indices of all surviving items, in source order.
    #[must_use]
    pub(crate) fn source_indices(&self) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.item.is_some())
            .map(|(source_index, _)| source_index)
            .collect()
    }

    /// Full re-materialisation with fresh items.
    pub(crate) fn rebuild(&mut self, factory: &ItemFactory<R>, records: &[Rc<R>]) {
        self.entries.clear();
        self.id_set.clear();
        for record in records {
            self.push_entry(factory, Rc::clone(record));
        }
    }

    /// Re-materialise, reusing the existing item for any record that
    /// already has one (pointer identity). Used when the uniqueness flag
    /// flips so elided slots can surface without churning survivors.
    pub(crate) fn rebuild_reusing(&mut self, factory: &ItemFactory<R>, records: &[Rc<R>]) {
        let previous: Vec<DirectEntry<R>> = std::mem::take(&mut self.entries);
        self.id_set.clear();

        for record in records {
            let reusable = previous.iter().find_map(|entry| {
                entry
                    .item
                    .as_ref()
                    .filter(|_| Rc::ptr_eq(&entry.record, record))
                    .cloned()
            });
            match self.admit(record) {
                Admission::Keep => {
                    let item =
                        reusable.unwrap_or_else(|| factory.data(Rc::clone(record)));
                    self.entries.push(DirectEntry {
                        record: Rc::clone(record),
                        item: Some(item),
                    });
                }
                Admission::Elide => self.entries.push(DirectEntry {
                    record: Rc::clone(record),
                    item: None,
                }),
            }
        }
    }

    /// Structural edit in source index space.
    pub(crate) fn splice(
        &mut self,
        factory: &ItemFactory<R>,
        start: usize,
        delete_count: usize,
        added: &[Rc<R>],
    ) -> DirectSplice<R> {
        let start = start.min(self.entries.len());
        let end = (start + delete_count).min(self.entries.len());

        let mut removed = Vec::new();
        for entry in self.entries.drain(start..end) {
            if let Some(item) = entry.item {
                if let Some(id) = Self::extract_id(self.id_property.as_deref(), &entry.record) {
                    self.id_set.remove(&OrdKey(id));
                }
                removed.push(item);
            }
        }

        let mut inserted = Vec::new();
        let mut new_entries = Vec::with_capacity(added.len());
        for record in added {
            let entry = self.build_entry(factory, Rc::clone(record));
            if let Some(item) = &entry.item {
                inserted.push(Rc::clone(item));
            }
            new_entries.push(entry);
        }
        self.entries.splice(start..start, new_entries);

        DirectSplice { removed, inserted }
    }

    /// Reorder a source range, preserving item identity.
    pub(crate) fn move_range(&mut self, from: usize, count: usize, to: usize) {
        if from >= self.entries.len() || count == 0 {
            return;
        }
        let end = (from + count).min(self.entries.len());
        let block: Vec<DirectEntry<R>> = self.entries.drain(from..end).collect();
        let to = to.min(self.entries.len());
        self.entries.splice(to..to, block);
    }

    /// Toggle uniqueness; the caller re-feeds the source so elided slots
    /// can be re-admitted (or survivors elided).
    pub(crate) fn set_unique(
        &mut self,
        factory: &ItemFactory<R>,
        unique: bool,
        records: &[Rc<R>],
    ) -> bool {
        if self.unique == unique {
            return false;
        }
        self.unique = unique;
        self.rebuild_reusing(factory, records);
        true
    }

    pub(crate) fn reset(&mut self) {
        self.entries.clear();
        self.id_set.clear();
    }

    fn push_entry(&mut self, factory: &ItemFactory<R>, record: Rc<R>) {
        let entry = self.build_entry(factory, record);
        self.entries.push(entry);
    }

    fn build_entry(&mut self, factory: &ItemFactory<R>, record: Rc<R>) -> DirectEntry<R> {
        match self.admit(&record) {
            Admission::Keep => {
                let item = factory.data(Rc::clone(&record));
                DirectEntry {
                    record,
                    item: Some(item),
                }
            }
            Admission::Elide => DirectEntry { record, item: None },
        }
    }

    fn admit(&mut self, record: &Rc<R>) -> Admission {
        if !self.unique {
            return Admission::Keep;
        }
        let Some(id) = Self::extract_id(self.id_property.as_deref(), record) else {
            // no extractable id: nothing to deduplicate against
            return Admission::Keep;
        };
        if self.id_set.insert(OrdKey(id)) {
            Admission::Keep
        } else {
            Admission::Elide
        }
    }

    pub(crate) fn extract_id(id_property: Option<&str>, record: &Rc<R>) -> Option<Value> {
        if let Some(id) = record.record_id() {
            return Some(id);
        }
        let property = id_property?;
        match record.field(property) {
            FieldPresence::Present(value) => Some(value),
            FieldPresence::Missing => None,
        }
    }
}

enum Admission {
    Keep,
    Elide,
}

///
/// DirectSplice
/// Items removed/created by one structural edit of the leaf stage.
///

pub(crate) struct DirectSplice<R: Record> {
    pub removed: Vec<Rc<ViewItem<R>>>,
    pub inserted: Vec<Rc<ViewItem<R>>>,
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::ObjectRecord;

    fn records(ids: &[i64]) -> Vec<Rc<ObjectRecord>> {
        ids.iter()
            .map(|id| Rc::new(ObjectRecord::from_pairs([("id", *id)])))
            .collect()
    }

    fn built(unique: bool, ids: &[i64]) -> (DirectStrategy<ObjectRecord>, ItemFactory<ObjectRecord>) {
        let factory = ItemFactory::new();
        let mut direct = DirectStrategy::new(unique, Some("id".to_string()));
        direct.rebuild(&factory, &records(ids));
        (direct, factory)
    }

    #[test]
    fn unique_elides_later_duplicates() {
        let (direct, _factory) = built(true, &[1, 2, 1]);
        assert_eq!(direct.count(), 2);

        // the elided slot consumes a source index but has no display slot
        assert_eq!(direct.display_index(0), Some(0));
        assert_eq!(direct.display_index(1), Some(1));
        assert_eq!(direct.display_index(2), None);
        assert_eq!(direct.source_index(1), Some(1));
        assert_eq!(direct.source_index(2), None);
    }

    #[test]
    fn splice_reports_removed_and_inserted_items() {
        let (mut direct, factory) = built(false, &[1, 2, 3]);

        let outcome = direct.splice(&factory, 1, 1, &records(&[7, 8]));
        assert_eq!(outcome.removed.len(), 1);
        assert_eq!(outcome.inserted.len(), 2);
        assert_eq!(direct.count(), 4);
        assert_eq!(direct.source_indices(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn splice_under_unique_skips_known_ids() {
        let (mut direct, factory) = built(true, &[1, 2]);

        let outcome = direct.splice(&factory, 2, 0, &records(&[2, 3]));
        assert_eq!(outcome.inserted.len(), 1, "id 2 is already admitted");
        assert_eq!(direct.count(), 3);
    }

    #[test]
    fn toggling_unique_reuses_surviving_items() {
        let factory = ItemFactory::new();
        let all = records(&[5, 5]);
        let mut direct = DirectStrategy::new(true, Some("id".to_string()));
        direct.rebuild(&factory, &all);
        assert_eq!(direct.count(), 1);
        let survivor = Rc::clone(&direct.items()[0]);

        assert!(direct.set_unique(&factory, false, &all));
        assert_eq!(direct.count(), 2);
        assert!(
            Rc::ptr_eq(&direct.items()[0], &survivor),
            "the admitted item keeps its identity across the toggle"
        );

        assert!(direct.set_unique(&factory, true, &all));
        assert_eq!(direct.count(), 1);
        assert!(!direct.set_unique(&factory, true, &all), "no-op toggle");
    }

    #[test]
    fn move_range_preserves_item_identity() {
        let (mut direct, _factory) = built(false, &[1, 2, 3]);
        let moved = Rc::clone(&direct.items()[2]);

        direct.move_range(2, 1, 0);
        let items = direct.items();
        assert!(Rc::ptr_eq(&items[0], &moved));
        assert_eq!(direct.count(), 3);
    }
}
