use crate::{
    obs::{self, ObsEvent},
    record::Record,
    view::{
        handlers::{FilterArgs, FilterFn},
        item::ViewItem,
    },
};
use std::{collections::HashMap, rc::Rc};

///
/// FilterEngine
///
/// Maintains the per-position visibility mask from the predicate chain.
///
/// Mask entries are tri-state: `Some(true)` visible, `Some(false)` hidden,
/// `None` unknown. Unknown counts as visible for ordering but not as a
/// prior decision, so a first evaluation never registers as a flip.
///

pub(crate) struct FilterEngine<R: Record> {
    filters: Vec<FilterFn<R>>,
    mask: Vec<Option<bool>>,
    decisions: HashMap<u64, bool>,
}

impl<R: Record> FilterEngine<R> {
    pub(crate) fn new() -> Self {
        Self {
            filters: Vec::new(),
            mask: Vec::new(),
            decisions: HashMap::new(),
        }
    }

    #[must_use]
    pub(crate) fn filters(&self) -> &[FilterFn<R>] {
        &self.filters
    }

    pub(crate) fn set_filters(&mut self, filters: Vec<FilterFn<R>>) {
        self.filters = filters;
    }

    /// True when any active predicate consumes the projection index; such
    /// chains force full re-filters.
    #[must_use]
    pub(crate) fn uses_index(&self) -> bool {
        self.filters.iter().any(FilterFn::uses_index)
    }

    #[must_use]
    pub(crate) fn visible(&self, position: usize) -> bool {
        self.mask.get(position).copied().flatten().unwrap_or(true)
    }

    /// Re-shape the mask to a new item sequence, carrying over each item's
    /// prior decision and dropping decisions for items that left.
    pub(crate) fn realign(&mut self, items: &[Rc<ViewItem<R>>]) {
        self.mask = items
            .iter()
            .map(|item| self.decisions.get(&item.instance_id()).copied())
            .collect();

        let live: HashMap<u64, bool> = items
            .iter()
            .filter_map(|item| {
                self.decisions
                    .get(&item.instance_id())
                    .map(|decision| (item.instance_id(), *decision))
            })
            .collect();
        self.decisions = live;
    }

    pub(crate) fn clear_state(&mut self) {
        self.mask.clear();
        self.decisions.clear();
    }

    /// Re-evaluate the whole sequence. Returns flipped positions.
    pub(crate) fn refilter_full(
        &mut self,
        items: &[Rc<ViewItem<R>>],
        source_index_of: &dyn Fn(usize) -> Option<usize>,
    ) -> Vec<usize> {
        obs::sink::record(ObsEvent::RefilterFull { items: items.len() });
        self.refilter_span(items, 0, items.len(), source_index_of)
    }

    /// Re-evaluate `[start, start+count)` only.
    ///
    /// Headers whose run intersects the span are re-finalised as well;
    /// members outside the span keep their prior decisions.
    pub(crate) fn refilter_range(
        &mut self,
        items: &[Rc<ViewItem<R>>],
        start: usize,
        count: usize,
        source_index_of: &dyn Fn(usize) -> Option<usize>,
    ) -> Vec<usize> {
        let start = start.min(items.len());
        let end = (start + count).min(items.len());
        obs::sink::record(ObsEvent::RefilterRange {
            start,
            count: end - start,
        });
        self.refilter_span(items, start, end, source_index_of)
    }

    fn refilter_span(
        &mut self,
        items: &[Rc<ViewItem<R>>],
        start: usize,
        end: usize,
        source_index_of: &dyn Fn(usize) -> Option<usize>,
    ) -> Vec<usize> {
        if self.mask.len() != items.len() {
            self.realign(items);
        }

        let mut flips = Vec::new();

        // data items first; header decisions need their members settled
        for position in start..end {
            let item = &items[position];
            if item.is_group() {
                continue;
            }
            let decision = self.evaluate(item, position, source_index_of(position), None);
            self.apply(position, item, decision, &mut flips);
        }

        for header in touched_headers(items, start, end) {
            let item = &items[header];
            let group_visible = self.run_has_visible_member(items, header);
            let decision = self.evaluate(item, header, None, Some(group_visible));
            self.apply(header, item, decision, &mut flips);
        }

        flips
    }

    fn evaluate(
        &self,
        item: &Rc<ViewItem<R>>,
        position: usize,
        source_index: Option<usize>,
        group_visible: Option<bool>,
    ) -> bool {
        let args = FilterArgs {
            record: item.record(),
            source_index,
            item,
            index: position,
            group_visible,
        };
        self.filters.iter().all(|filter| filter.evaluate(&args))
    }

    fn apply(
        &mut self,
        position: usize,
        item: &Rc<ViewItem<R>>,
        decision: bool,
        flips: &mut Vec<usize>,
    ) {
        let prior = self.mask[position];
        self.mask[position] = Some(decision);
        self.decisions.insert(item.instance_id(), decision);
        if prior == Some(!decision) {
            flips.push(position);
        }
    }

    /// Whether any data member of the run starting after `header` passed.
    fn run_has_visible_member(&self, items: &[Rc<ViewItem<R>>], header: usize) -> bool {
        let mut position = header + 1;
        while position < items.len() && !items[position].is_group() {
            if self.mask[position] != Some(false) {
                return true;
            }
            position += 1;
        }
        false
    }
}

/// Header positions whose run (header plus following data items) intersects
/// `[start, end)`, in items order.
fn touched_headers<R: Record>(items: &[Rc<ViewItem<R>>], start: usize, end: usize) -> Vec<usize> {
    let mut headers = Vec::new();
    let mut run_start = None;
    for (position, item) in items.iter().enumerate() {
        if item.is_group() {
            run_start = Some(position);
        }
        let intersects = position >= start && position < end;
        if intersects
            && let Some(header) = run_start
            && headers.last() != Some(&header)
        {
            headers.push(header);
        }
    }
    headers
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
        view::item::ItemFactory,
    };

    /// `[G:A, a1, a2, G:B, b1]` with ids 1, 2, 3.
    fn grouped_items() -> Vec<Rc<ViewItem<ObjectRecord>>> {
        let factory = ItemFactory::new();
        let data = |id: i64| {
            factory.data(Rc::new(ObjectRecord::from_pairs([("id", Value::Int(id))])))
        };
        vec![
            factory.group(Value::from("A")),
            data(1),
            data(2),
            factory.group(Value::from("B")),
            data(3),
        ]
    }

    fn no_source(_: usize) -> Option<usize> {
        None
    }

    #[test]
    fn empty_chain_passes_everything() {
        let items = grouped_items();
        let mut engine = FilterEngine::new();
        engine.refilter_full(&items, &no_source);
        assert!((0..items.len()).all(|position| engine.visible(position)));
    }

    #[test]
    fn headers_see_whether_their_group_survived() {
        let items = grouped_items();
        let mut engine = FilterEngine::new();
        engine.set_filters(vec![
            FilterFn::new(|args: &FilterArgs<'_, ObjectRecord>| {
                args.record.is_none_or(|record| {
                    matches!(record.get("id"), Some(Value::Int(id)) if id >= 3)
                })
            }),
            FilterFn::hide_empty_groups(),
        ]);
        engine.refilter_full(&items, &no_source);

        // group A lost both members, so its header hides with them
        assert!(!engine.visible(0));
        assert!(!engine.visible(1));
        assert!(!engine.visible(2));
        assert!(engine.visible(3));
        assert!(engine.visible(4));
    }

    #[test]
    fn range_refilter_refinalises_the_touched_header_only() {
        let items = grouped_items();
        let mut engine = FilterEngine::new();
        engine.set_filters(vec![FilterFn::hide_empty_groups()]);
        engine.refilter_full(&items, &no_source);
        assert!(engine.visible(0));

        // hide group A's members, then re-evaluate just that run
        engine.set_filters(vec![
            FilterFn::new(|args: &FilterArgs<'_, ObjectRecord>| {
                args.record.is_none_or(|record| {
                    !matches!(record.get("id"), Some(Value::Int(id)) if id < 3)
                })
            }),
            FilterFn::hide_empty_groups(),
        ]);
        let flips = engine.refilter_range(&items, 1, 2, &no_source);

        assert!(!engine.visible(1));
        assert!(!engine.visible(2));
        assert!(!engine.visible(0), "header decision follows its members");
        assert!(engine.visible(3), "untouched run keeps its prior mask");
        assert!(flips.contains(&0) && flips.contains(&1) && flips.contains(&2));
    }

    #[test]
    fn first_evaluation_is_not_a_flip() {
        let items = grouped_items();
        let mut engine = FilterEngine::new();
        let flips = engine.refilter_full(&items, &no_source);
        assert!(flips.is_empty());
    }
}
