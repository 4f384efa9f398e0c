use crate::{
    obs::{self, ObsEvent},
    record::Record,
    value::{OrdKey, Value},
    view::{
        handlers::GroupFn,
        item::{ItemFactory, ViewItem},
    },
};
use std::{collections::BTreeMap, rc::Rc};

///
/// GroupStrategy
///
/// Gathers the sorted layer into group runs (stable, first-appearance
/// order) and inserts one synthetic header in front of each run. A `Null`
/// group id yields a headerless run.
///
/// Header instances are keyed by group id and reused across recomputation
/// so listeners comparing by reference see minimal churn.
///

pub(crate) struct GroupStrategy<R: Record> {
    group: Option<GroupFn<R>>,
    headers: BTreeMap<OrdKey, Rc<ViewItem<R>>>,
    /// Output position → input index (`None` for headers).
    output_to_input: Vec<Option<usize>>,
    output: Vec<Rc<ViewItem<R>>>,
}

impl<R: Record> GroupStrategy<R> {
    pub(crate) const fn new() -> Self {
        Self {
            group: None,
            headers: BTreeMap::new(),
            output_to_input: Vec::new(),
            output: Vec::new(),
        }
    }

    #[must_use]
    pub(crate) const fn group_fn(&self) -> Option<&GroupFn<R>> {
        self.group.as_ref()
    }

    #[must_use]
    pub(crate) const fn is_active(&self) -> bool {
        self.group.is_some()
    }

    /// Swap the group function. Headers are re-created: a changed function
    /// redefines the id space.
    pub(crate) fn set_group(&mut self, group: Option<GroupFn<R>>) {
        self.group = group;
        self.headers.clear();
    }

    pub(crate) fn reset(&mut self) {
        self.headers.clear();
        self.output_to_input.clear();
        self.output.clear();
    }

    /// Recompute the grouped output from the sorted layer.
    pub(crate) fn ensure(
        &mut self,
        input: &[Rc<ViewItem<R>>],
        factory: &ItemFactory<R>,
    ) -> Vec<Rc<ViewItem<R>>> {
        let Some(group) = self.group.clone() else {
            self.output = input.to_vec();
            self.output_to_input = (0..input.len()).map(Some).collect();
            return self.output.clone();
        };

        // gather runs in first-appearance order
        let mut run_order: Vec<OrdKey> = Vec::new();
        let mut runs: BTreeMap<OrdKey, Vec<usize>> = BTreeMap::new();
        for (input_index, item) in input.iter().enumerate() {
            let id = item
                .record()
                .map_or(Value::Null, |record| group.group_id(record));
            let key = OrdKey(id);
            if !runs.contains_key(&key) {
                run_order.push(key.clone());
            }
            runs.entry(key).or_default().push(input_index);
        }

        let mut output = Vec::with_capacity(input.len() + run_order.len());
        let mut output_to_input = Vec::with_capacity(input.len() + run_order.len());
        for key in &run_order {
            if !key.0.is_null() {
                let header = self
                    .headers
                    .entry(key.clone())
                    .or_insert_with(|| factory.group(key.0.clone()));
                output.push(Rc::clone(header));
                output_to_input.push(None);
            }
            for &input_index in &runs[key] {
                output.push(Rc::clone(&input[input_index]));
                output_to_input.push(Some(input_index));
            }
        }

        obs::sink::record(ObsEvent::Regroup {
            groups: run_order.len(),
        });

        self.output = output;
        self.output_to_input = output_to_input;
        self.output.clone()
    }

    /// Output position of an input index.
    #[must_use]
    pub(crate) fn display_index(&self, input_index: usize) -> Option<usize> {
        self.output_to_input
            .iter()
            .position(|&candidate| candidate == Some(input_index))
    }

    /// Input index behind an output position; `None` for headers.
    #[must_use]
    pub(crate) fn input_index(&self, display_index: usize) -> Option<usize> {
        self.output_to_input.get(display_index).copied().flatten()
    }
}
