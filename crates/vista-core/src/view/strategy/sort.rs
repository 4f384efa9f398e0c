use crate::{
    obs::{self, ObsEvent},
    record::Record,
    view::{
        handlers::{SortFn, SortOperand},
        item::ViewItem,
    },
};
use std::{cmp::Ordering, rc::Rc};

///
/// SortStrategy
///
/// Stable reorder of the direct layer by the user comparator chain.
///
/// The permutation is recomputed in full only when the handler list
/// changes, on invalidation, or when an important property changed;
/// structural splices maintain it incrementally.
///

pub(crate) struct SortStrategy<R: Record> {
    handlers: Vec<SortFn<R>>,
    /// Output position → input index.
    order: Vec<usize>,
    dirty: bool,
}

impl<R: Record> SortStrategy<R> {
    pub(crate) const fn new() -> Self {
        Self {
            handlers: Vec::new(),
            order: Vec::new(),
            dirty: false,
        }
    }

    #[must_use]
    pub(crate) fn handlers(&self) -> &[SortFn<R>] {
        &self.handlers
    }

    pub(crate) fn set_handlers(&mut self, handlers: Vec<SortFn<R>>) {
        self.handlers = handlers;
        self.dirty = true;
    }

    pub(crate) fn invalidate(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn reset(&mut self) {
        self.order.clear();
        self.dirty = true;
    }

    /// Current output; recomputes the permutation when required.
    ///
    /// `collection_indices[i]` is the source index of `input[i]`.
    pub(crate) fn ensure(
        &mut self,
        input: &[Rc<ViewItem<R>>],
        collection_indices: &[usize],
    ) -> Vec<Rc<ViewItem<R>>> {
        if self.handlers.is_empty() {
            self.order = (0..input.len()).collect();
            self.dirty = false;
        } else if self.dirty || self.order.len() != input.len() {
            let mut order: Vec<usize> = (0..input.len()).collect();
            order.sort_by(|&a, &b| self.compare(a, b, input, collection_indices));
            self.order = order;
            self.dirty = false;
            obs::sink::record(ObsEvent::Resort { items: input.len() });
        }

        self.order
            .iter()
            .map(|&input_index| Rc::clone(&input[input_index]))
            .collect()
    }

    /// Output position of an input index.
    #[must_use]
    pub(crate) fn display_index(&self, input_index: usize) -> Option<usize> {
        self.order.iter().position(|&candidate| candidate == input_index)
    }

    /// Input index at an output position.
    #[must_use]
    pub(crate) fn input_index(&self, display_index: usize) -> Option<usize> {
        self.order.get(display_index).copied()
    }

    /// Maintain the permutation across a splice of the input layer.
    ///
    /// `removed_start..removed_start+removed_count` are pre-splice input
    /// indices; `added_start..added_start+added_count` are post-splice
    /// input indices of the inserted block.
    pub(crate) fn apply_splice(
        &mut self,
        removed_start: usize,
        removed_count: usize,
        added_start: usize,
        added_count: usize,
        input: &[Rc<ViewItem<R>>],
        collection_indices: &[usize],
    ) {
        if self.handlers.is_empty() {
            // ensure() rebuilds the identity permutation
            self.order.clear();
            return;
        }

        let removed_end = removed_start + removed_count;
        self.order.retain(|&entry| entry < removed_start || entry >= removed_end);
        for entry in &mut self.order {
            if *entry >= removed_end {
                *entry -= removed_count;
            }
        }

        for entry in &mut self.order {
            if *entry >= added_start {
                *entry += added_count;
            }
        }

        for input_index in added_start..added_start + added_count {
            let at = self.sorted_position(input_index, input, collection_indices);
            self.order.insert(at, input_index);
        }
    }

    /// Re-point permutation entries after the input layer reordered
    /// without adding or removing items.
    pub(crate) fn remap(&mut self, f: impl Fn(usize) -> usize) {
        if self.handlers.is_empty() {
            self.order.clear();
            return;
        }
        for entry in &mut self.order {
            *entry = f(*entry);
        }
    }

    /// Relocate one input index within the permutation after its ordering
    /// inputs changed. Returns `(old_position, new_position)` when the
    /// item actually moved.
    pub(crate) fn reposition(
        &mut self,
        input_index: usize,
        input: &[Rc<ViewItem<R>>],
        collection_indices: &[usize],
    ) -> Option<(usize, usize)> {
        if self.handlers.is_empty() {
            return None;
        }
        let old = self.display_index(input_index)?;
        self.order.remove(old);
        let new = self.sorted_position(input_index, input, collection_indices);
        self.order.insert(new, input_index);
        if old == new { None } else { Some((old, new)) }
    }

    /// Stable insertion point: after every entry that does not order
    /// strictly greater than the candidate.
    fn sorted_position(
        &self,
        input_index: usize,
        input: &[Rc<ViewItem<R>>],
        collection_indices: &[usize],
    ) -> usize {
        let mut at = 0;
        for (position, &entry) in self.order.iter().enumerate() {
            if self.compare(entry, input_index, input, collection_indices) == Ordering::Greater {
                break;
            }
            at = position + 1;
        }
        at
    }

    fn compare(
        &self,
        left: usize,
        right: usize,
        input: &[Rc<ViewItem<R>>],
        collection_indices: &[usize],
    ) -> Ordering {
        let (Some(left_record), Some(right_record)) =
            (input[left].record(), input[right].record())
        else {
            // headers never reach the sort layer
            return Ordering::Equal;
        };

        let left_operand = SortOperand {
            record: left_record,
            item: &input[left],
            index: left,
            collection_index: collection_indices.get(left).copied().unwrap_or(left),
        };
        let right_operand = SortOperand {
            record: right_record,
            item: &input[right],
            index: right,
            collection_index: collection_indices.get(right).copied().unwrap_or(right),
        };

        for handler in &self.handlers {
            match handler.compare(&left_operand, &right_operand) {
                Ordering::Equal => {}
                decided => return decided,
            }
        }

        Ordering::Equal
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        record::ObjectRecord,
        value::Value,
        view::{handlers::Direction, item::ItemFactory},
    };

    fn items(pairs: &[(i64, i64)]) -> Vec<Rc<ViewItem<ObjectRecord>>> {
        let factory = ItemFactory::new();
        pairs
            .iter()
            .map(|(id, rank)| {
                factory.data(Rc::new(ObjectRecord::from_pairs([
                    ("id", Value::Int(*id)),
                    ("rank", Value::Int(*rank)),
                ])))
            })
            .collect()
    }

    fn ids(items: &[Rc<ViewItem<ObjectRecord>>]) -> Vec<i64> {
        items
            .iter()
            .filter_map(|item| item.record().and_then(|r| r.get("id")).and_then(|v| v.as_int()))
            .collect()
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let input = items(&[(1, 10), (2, 10), (3, 5), (4, 10)]);
        let cidx: Vec<usize> = (0..input.len()).collect();
        let mut sort = SortStrategy::new();
        sort.set_handlers(vec![SortFn::by_field("rank", Direction::Asc)]);

        let output = sort.ensure(&input, &cidx);
        assert_eq!(ids(&output), vec![3, 1, 2, 4]);
    }

    #[test]
    fn ties_cascade_to_the_next_handler() {
        let input = items(&[(2, 10), (1, 10), (3, 5)]);
        let cidx: Vec<usize> = (0..input.len()).collect();
        let mut sort = SortStrategy::new();
        sort.set_handlers(vec![
            SortFn::by_field("rank", Direction::Asc),
            SortFn::by_field("id", Direction::Asc),
        ]);

        let output = sort.ensure(&input, &cidx);
        assert_eq!(ids(&output), vec![3, 1, 2]);
    }

    #[test]
    fn splice_inserts_after_equal_keys() {
        let input = items(&[(1, 10), (2, 20)]);
        let cidx: Vec<usize> = (0..input.len()).collect();
        let mut sort = SortStrategy::new();
        sort.set_handlers(vec![SortFn::by_field("rank", Direction::Asc)]);
        sort.ensure(&input, &cidx);

        // append an equal-rank record; stability puts it after id 1
        let widened = items(&[(1, 10), (2, 20), (3, 10)]);
        let cidx: Vec<usize> = (0..widened.len()).collect();
        sort.apply_splice(0, 0, 2, 1, &widened, &cidx);
        let output = sort.ensure(&widened, &cidx);
        assert_eq!(ids(&output), vec![1, 3, 2]);
    }

    #[test]
    fn reposition_reports_the_sort_layer_move() {
        let input = items(&[(1, 10), (2, 20), (3, 30)]);
        let cidx: Vec<usize> = (0..input.len()).collect();
        let mut sort = SortStrategy::new();
        sort.set_handlers(vec![SortFn::by_field("rank", Direction::Asc)]);
        sort.ensure(&input, &cidx);

        input[2]
            .record()
            .expect("record")
            .set("rank", Value::Int(5));
        let moved = sort.reposition(2, &input, &cidx);
        assert_eq!(moved, Some((2, 0)));
        assert_eq!(ids(&sort.ensure(&input, &cidx)), vec![3, 1, 2]);
    }
}
