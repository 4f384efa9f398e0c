// 1️⃣ Module declarations
pub(crate) mod direct;
pub(crate) mod group;
pub(crate) mod sort;

use crate::{
    record::Record,
    view::item::{ItemFactory, ViewItem},
};
use std::{collections::HashMap, rc::Rc};

pub(crate) use direct::DirectStrategy;
pub(crate) use group::GroupStrategy;
pub(crate) use sort::SortStrategy;

///
/// StrategyKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum StrategyKind {
    Direct,
    Sort,
    Group,
}

///
/// Strategy
///
/// One stage of the materialisation pipeline, as a tagged variant behind
/// the uniform capability surface the composer drives.
///

pub(crate) enum Strategy<R: Record> {
    Direct(DirectStrategy<R>),
    Sort(SortStrategy<R>),
    Group(GroupStrategy<R>),
}

impl<R: Record> Strategy<R> {
    #[must_use]
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) const fn kind(&self) -> StrategyKind {
        match self {
            Self::Direct(_) => StrategyKind::Direct,
            Self::Sort(_) => StrategyKind::Sort,
            Self::Group(_) => StrategyKind::Group,
        }
    }
}

///
/// StrategyPipeline
///
/// The composer: an ordered stage sequence, mandatorily
/// `Direct → Sort → Group` so headers land in front of their sorted runs.
///

pub(crate) struct StrategyPipeline<R: Record> {
    factory: Rc<ItemFactory<R>>,
    stages: Vec<Strategy<R>>,
}

///
/// PipelineSplice
/// Items removed/created by one structural edit.
///

pub(crate) struct PipelineSplice<R: Record> {
    pub removed: Vec<Rc<ViewItem<R>>>,
    pub inserted: Vec<Rc<ViewItem<R>>>,
}

impl<R: Record> StrategyPipeline<R> {
    /// The standard composition.
    pub(crate) fn standard(unique: bool, id_property: Option<String>) -> Self {
        let mut pipeline = Self {
            factory: Rc::new(ItemFactory::new()),
            stages: Vec::with_capacity(3),
        };
        pipeline
            .stages
            .push(Strategy::Direct(DirectStrategy::new(unique, id_property)));
        pipeline.append(StrategyKind::Sort);
        pipeline.append(StrategyKind::Group);
        pipeline
    }

    pub(crate) fn append(&mut self, kind: StrategyKind) {
        let stage = match kind {
            StrategyKind::Direct => Strategy::Direct(DirectStrategy::new(false, None)),
            StrategyKind::Sort => Strategy::Sort(SortStrategy::new()),
            StrategyKind::Group => Strategy::Group(GroupStrategy::new()),
        };
        self.stages.push(stage);
    }

    #[must_use]
    #[cfg_attr(not(test), allow(dead_code))]
    pub(crate) fn get_instance(&self, kind: StrategyKind) -> Option<&Strategy<R>> {
        self.stages.iter().find(|stage| stage.kind() == kind)
    }

    #[must_use]
    pub(crate) fn factory(&self) -> &Rc<ItemFactory<R>> {
        &self.factory
    }

    // ---------------------------------------------------------------------
    // Stage accessors (the standard composition carries all three)
    // ---------------------------------------------------------------------

    pub(crate) fn direct(&self) -> &DirectStrategy<R> {
        for stage in &self.stages {
            if let Strategy::Direct(direct) = stage {
                return direct;
            }
        }
        unreachable!("pipeline composition starts with the direct stage")
    }

    pub(crate) fn direct_mut(&mut self) -> &mut DirectStrategy<R> {
        for stage in &mut self.stages {
            if let Strategy::Direct(direct) = stage {
                return direct;
            }
        }
        unreachable!("pipeline composition starts with the direct stage")
    }

    pub(crate) fn sort(&self) -> &SortStrategy<R> {
        for stage in &self.stages {
            if let Strategy::Sort(sort) = stage {
                return sort;
            }
        }
        unreachable!("standard pipeline composition carries a sort stage")
    }

    pub(crate) fn sort_mut(&mut self) -> &mut SortStrategy<R> {
        for stage in &mut self.stages {
            if let Strategy::Sort(sort) = stage {
                return sort;
            }
        }
        unreachable!("standard pipeline composition carries a sort stage")
    }

    pub(crate) fn group(&self) -> &GroupStrategy<R> {
        for stage in &self.stages {
            if let Strategy::Group(group) = stage {
                return group;
            }
        }
        unreachable!("standard pipeline composition carries a group stage")
    }

    pub(crate) fn group_mut(&mut self) -> &mut GroupStrategy<R> {
        for stage in &mut self.stages {
            if let Strategy::Group(group) = stage {
                return group;
            }
        }
        unreachable!("standard pipeline composition carries a group stage")
    }

    // ---------------------------------------------------------------------
    // Materialisation
    // ---------------------------------------------------------------------

    /// The outermost stage's items, recomputing stale stages on the way.
    pub(crate) fn result(&mut self) -> Vec<Rc<ViewItem<R>>> {
        let factory = Rc::clone(&self.factory);
        let (input, collection_indices) = {
            let direct = self.direct();
            (direct.items(), direct.source_indices())
        };
        let sorted = self.sort_mut().ensure(&input, &collection_indices);
        self.group_mut().ensure(&sorted, &factory)
    }

    /// Drop memoised orderings; the next read recomputes.
    pub(crate) fn invalidate(&mut self) {
        self.sort_mut().invalidate();
    }

    /// Drop memoised state and all created items.
    pub(crate) fn reset(&mut self) {
        self.direct_mut().reset();
        self.sort_mut().reset();
        self.group_mut().reset();
    }

    /// Re-materialise from the source with fresh items and headers.
    pub(crate) fn rebuild(&mut self, records: &[Rc<R>]) {
        let factory = Rc::clone(&self.factory);
        self.direct_mut().rebuild(&factory, records);
        self.sort_mut().reset();
        self.group_mut().reset();
    }

    // ---------------------------------------------------------------------
    // Structural edits (source index space at the leaf)
    // ---------------------------------------------------------------------

    pub(crate) fn splice(
        &mut self,
        start: usize,
        delete_count: usize,
        added: &[Rc<R>],
    ) -> PipelineSplice<R> {
        let factory = Rc::clone(&self.factory);

        // pre-splice: where the surviving removed block sits in sort input space
        let removed_start = {
            let direct = self.direct();
            (start..start + delete_count)
                .find_map(|source_index| direct.display_index(source_index))
                .unwrap_or(0)
        };

        let outcome = self
            .direct_mut()
            .splice(&factory, start, delete_count, added);

        // post-splice: where the surviving inserted block landed
        let added_start = {
            let direct = self.direct();
            (start..start + added.len())
                .find_map(|source_index| direct.display_index(source_index))
                .unwrap_or(0)
        };

        let (input, collection_indices) = {
            let direct = self.direct();
            (direct.items(), direct.source_indices())
        };
        self.sort_mut().apply_splice(
            removed_start,
            outcome.removed.len(),
            added_start,
            outcome.inserted.len(),
            &input,
            &collection_indices,
        );

        PipelineSplice {
            removed: outcome.removed,
            inserted: outcome.inserted,
        }
    }

    /// Reorder a source range in place, preserving item identity.
    pub(crate) fn move_range(&mut self, from: usize, count: usize, to: usize) {
        let old_items = self.direct().items();
        self.direct_mut().move_range(from, count, to);
        let new_items = self.direct().items();

        let mut new_position: HashMap<*const ViewItem<R>, usize> =
            HashMap::with_capacity(new_items.len());
        for (index, item) in new_items.iter().enumerate() {
            new_position.insert(Rc::as_ptr(item), index);
        }
        self.sort_mut().remap(|old_index| {
            new_position
                .get(&Rc::as_ptr(&old_items[old_index]))
                .copied()
                .unwrap_or(old_index)
        });
    }

    /// Re-place one source item within the sort permutation after its
    /// ordering inputs changed. Returns the sort-layer move, if any.
    pub(crate) fn reposition_source(&mut self, source_index: usize) -> Option<(usize, usize)> {
        let direct_index = self.direct().display_index(source_index)?;
        let (input, collection_indices) = {
            let direct = self.direct();
            (direct.items(), direct.source_indices())
        };
        self.sort_mut()
            .reposition(direct_index, &input, &collection_indices)
    }

    // ---------------------------------------------------------------------
    // Coordinate translation (valid after `result()`)
    // ---------------------------------------------------------------------

    /// Source index → outermost (pre-filter) projection index.
    #[must_use]
    pub(crate) fn display_index(&self, source_index: usize) -> Option<usize> {
        let direct_index = self.direct().display_index(source_index)?;
        let sorted_index = self.sort().display_index(direct_index)?;
        self.group().display_index(sorted_index)
    }

    /// Outermost (pre-filter) projection index → source index.
    #[must_use]
    pub(crate) fn source_index(&self, display_index: usize) -> Option<usize> {
        let sorted_index = self.group().input_index(display_index)?;
        let direct_index = self.sort().input_index(sorted_index)?;
        self.direct().source_index(direct_index)
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
        view::handlers::{Direction, GroupFn, SortFn},
    };

    fn records(ids: &[i64]) -> Vec<Rc<ObjectRecord>> {
        ids.iter()
            .map(|id| Rc::new(ObjectRecord::from_pairs([("id", *id)])))
            .collect()
    }

    #[test]
    fn standard_composition_is_direct_sort_group() {
        let pipeline = StrategyPipeline::<ObjectRecord>::standard(false, None);
        let kinds: Vec<StrategyKind> = pipeline.stages.iter().map(Strategy::kind).collect();
        assert_eq!(
            kinds,
            vec![StrategyKind::Direct, StrategyKind::Sort, StrategyKind::Group]
        );
        assert!(pipeline.get_instance(StrategyKind::Sort).is_some());
    }

    #[test]
    fn splice_keeps_sorted_order_and_coordinates() {
        let mut pipeline = StrategyPipeline::<ObjectRecord>::standard(false, None);
        pipeline.rebuild(&records(&[30, 10, 20]));
        pipeline
            .sort_mut()
            .set_handlers(vec![SortFn::by_field("id", Direction::Asc)]);

        let result = pipeline.result();
        let ids: Vec<Option<Value>> = result
            .iter()
            .map(|item| item.record().and_then(|r| r.get("id")))
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(Value::Int(10)),
                Some(Value::Int(20)),
                Some(Value::Int(30))
            ]
        );

        // insert 15 at source position 1; it must land between 10 and 20
        let splice = pipeline.splice(1, 0, &records(&[15]));
        assert_eq!(splice.inserted.len(), 1);
        let result = pipeline.result();
        let ids: Vec<Option<Value>> = result
            .iter()
            .map(|item| item.record().and_then(|r| r.get("id")))
            .collect();
        assert_eq!(
            ids,
            vec![
                Some(Value::Int(10)),
                Some(Value::Int(15)),
                Some(Value::Int(20)),
                Some(Value::Int(30))
            ]
        );

        // source 0 (id 30) sits last in display space
        assert_eq!(pipeline.display_index(0), Some(3));
        assert_eq!(pipeline.source_index(3), Some(0));
    }

    #[test]
    fn grouped_coordinates_skip_headers() {
        let mut pipeline = StrategyPipeline::<ObjectRecord>::standard(false, None);
        let left = Rc::new(ObjectRecord::from_pairs([
            ("id", Value::Int(1)),
            ("g", Value::from("A")),
        ]));
        let right = Rc::new(ObjectRecord::from_pairs([
            ("id", Value::Int(2)),
            ("g", Value::from("B")),
        ]));
        pipeline.rebuild(&[left, right]);
        pipeline
            .group_mut()
            .set_group(Some(GroupFn::by_field("g")));

        let result = pipeline.result();
        assert_eq!(result.len(), 4);
        assert!(result[0].is_group());
        assert!(result[2].is_group());

        assert_eq!(pipeline.display_index(0), Some(1));
        assert_eq!(pipeline.display_index(1), Some(3));
        assert_eq!(pipeline.source_index(0), None);
        assert_eq!(pipeline.source_index(3), Some(1));
    }

    #[test]
    fn header_instances_are_reused_across_recomputation() {
        let mut pipeline = StrategyPipeline::<ObjectRecord>::standard(false, None);
        let member = Rc::new(ObjectRecord::from_pairs([
            ("id", Value::Int(1)),
            ("g", Value::from("A")),
        ]));
        pipeline.rebuild(&[Rc::clone(&member)]);
        pipeline
            .group_mut()
            .set_group(Some(GroupFn::by_field("g")));

        let first = pipeline.result();
        let header_before = Rc::clone(&first[0]);

        pipeline.splice(
            1,
            0,
            &[Rc::new(ObjectRecord::from_pairs([
                ("id", Value::Int(2)),
                ("g", Value::from("A")),
            ]))],
        );
        let second = pipeline.result();
        assert_eq!(second.len(), 3);
        assert!(
            Rc::ptr_eq(&header_before, &second[0]),
            "same-id header must keep its identity"
        );
    }
}
