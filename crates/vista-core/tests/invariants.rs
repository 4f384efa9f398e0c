//! Universal projection invariants, checked over randomized operation
//! sequences against a live view.

use proptest::prelude::*;
use std::{collections::BTreeSet, rc::Rc};
use vista_core::prelude::*;

fn rec(id: i64, group: u8) -> Rc<ObjectRecord> {
    let group_name = match group % 4 {
        0 => Value::Null,
        g => Value::from(format!("g{g}")),
    };
    Rc::new(ObjectRecord::from_pairs([
        ("id", Value::Int(id)),
        ("g", group_name),
    ]))
}

#[derive(Clone, Debug)]
enum Op {
    Add { id: i64, group: u8, at: usize },
    RemoveAt(usize),
    MoveItem(usize, usize),
    Replace { at: usize, id: i64, group: u8 },
    SetSort(Option<bool>),
    SetFilterMin(Option<i64>),
    SetGroup(bool),
    SelectAt(usize),
    NotifyChange { at: usize, id: i64 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..16, any::<u8>(), 0usize..8).prop_map(|(id, group, at)| Op::Add { id, group, at }),
        (0usize..8).prop_map(Op::RemoveAt),
        (0usize..8, 0usize..8).prop_map(|(from, to)| Op::MoveItem(from, to)),
        (0usize..8, 0i64..16, any::<u8>())
            .prop_map(|(at, id, group)| Op::Replace { at, id, group }),
        prop_oneof![Just(None), Just(Some(true)), Just(Some(false))].prop_map(Op::SetSort),
        prop_oneof![Just(None), (0i64..16).prop_map(Some)].prop_map(Op::SetFilterMin),
        any::<bool>().prop_map(Op::SetGroup),
        (0usize..8).prop_map(Op::SelectAt),
        (0usize..8, 0i64..16).prop_map(|(at, id)| Op::NotifyChange { at, id }),
    ]
}

fn apply(op: &Op, list: &ObservableVec<ObjectRecord>, view: &View<ObjectRecord>) {
    match op {
        Op::Add { id, group, at } => {
            let len = list.len();
            list.insert(at % (len + 1), rec(*id, *group));
        }
        Op::RemoveAt(at) => {
            if !list.is_empty() {
                list.remove_at(at % list.len());
            }
        }
        Op::MoveItem(from, to) => {
            if !list.is_empty() {
                list.move_item(from % list.len(), to % list.len());
            }
        }
        Op::Replace { at, id, group } => {
            if !list.is_empty() {
                list.replace(at % list.len(), rec(*id, *group));
            }
        }
        Op::SetSort(direction) => {
            let handlers = match direction {
                None => Vec::new(),
                Some(true) => vec![SortFn::by_field("id", Direction::Asc)],
                Some(false) => vec![SortFn::by_field("id", Direction::Desc)],
            };
            view.set_sort(handlers).expect("set_sort");
        }
        Op::SetFilterMin(threshold) => {
            let filters = match threshold {
                None => Vec::new(),
                Some(min) => {
                    let min = *min;
                    vec![FilterFn::new(move |args: &vista_core::view::FilterArgs<'_, ObjectRecord>| {
                        args.record.is_none_or(|record| {
                            matches!(record.get("id"), Some(Value::Int(id)) if id >= min)
                        })
                    })
                    .with_properties(["id".to_string()])]
                }
            };
            view.set_filter(filters).expect("set_filter");
        }
        Op::SetGroup(enabled) => {
            let group = enabled.then(|| GroupFn::by_field("g"));
            // same-function toggles are absorbed by the identity short-circuit
            view.set_group(group).expect("set_group");
        }
        Op::SelectAt(at) => {
            if !list.is_empty() {
                let record = list.at(at % list.len()).expect("record");
                view.set_selected(&[record], true).expect("select");
            }
        }
        Op::NotifyChange { at, id } => {
            if !list.is_empty() {
                let at = at % list.len();
                let record = list.at(at).expect("record");
                record.set("id", Value::Int(*id));
                list.notify_item_change(at, ["id".to_string()]);
            }
        }
    }
}

fn check_invariants(list: &ObservableVec<ObjectRecord>, view: &View<ObjectRecord>) {
    let cursor = view.cursor();
    let count = view.len();

    // 1. indexed access agrees with cursor traversal
    for position in 0..count {
        let indexed = view.at(position).expect("indexed item");
        assert!(cursor.set_position(isize::try_from(position).expect("fits")));
        let via_cursor = cursor.current().expect("cursor item");
        assert!(
            Rc::ptr_eq(&indexed, &via_cursor),
            "at({position}) and cursor disagree"
        );
    }

    // 3. enumeration and index_of roundtrip
    view.each(|item, position| {
        let reported = view.index_of(item).expect("visible item has an index");
        assert_eq!(reported, position);
        let again = view.at(reported).expect("roundtrip item");
        assert!(Rc::ptr_eq(&again, item));
    });

    // 2. source mappings agree both ways
    for source_index in 0..list.len() {
        let record = list.at(source_index).expect("source record");
        if let Some(item) = view.item_by_source_item(&record) {
            assert_eq!(
                view.source_index_by_item(&item),
                list.index_of(&record),
                "projection/source coordinates disagree"
            );
        }
    }

    // 4. uid uniqueness over the materialised items
    let mut uids = BTreeSet::new();
    view.each(|item, _| {
        let uid = view.item_uid(item).expect("uid");
        assert!(uids.insert(uid.clone()), "duplicate uid {uid}");
    });
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn projection_invariants_hold_across_random_operations(
        seed_ids in proptest::collection::vec((0i64..16, any::<u8>()), 0..6),
        ops in proptest::collection::vec(op_strategy(), 0..24),
    ) {
        let list = ObservableVec::new();
        list.assign(seed_ids.iter().map(|(id, group)| rec(*id, *group)));

        let options = ViewOptions {
            id_property: Some("id".to_string()),
            unique: false,
            important_properties: Vec::new(),
        };
        let view: View<ObjectRecord> =
            View::with_options(Rc::new(list.clone()), &options).expect("view");

        check_invariants(&list, &view);
        for op in &ops {
            apply(op, &list, &view);
            check_invariants(&list, &view);
        }
    }

    #[test]
    fn double_inversion_preserves_selection(
        seed_ids in proptest::collection::vec((0i64..16, any::<u8>()), 0..8),
        picks in proptest::collection::vec(0usize..8, 0..4),
    ) {
        let list = ObservableVec::new();
        list.assign(seed_ids.iter().map(|(id, group)| rec(*id, *group)));
        let view: View<ObjectRecord> =
            View::new(Rc::new(list.clone())).expect("view");

        for pick in picks {
            if !list.is_empty() {
                let record = list.at(pick % list.len()).expect("record");
                view.set_selected(&[record], true).expect("select");
            }
        }

        let before: Vec<bool> = (0..view.len())
            .filter_map(|i| view.at(i))
            .map(|item| item.selected())
            .collect();
        view.invert_selected_all().expect("invert");
        view.invert_selected_all().expect("invert back");
        let after: Vec<bool> = (0..view.len())
            .filter_map(|i| view.at(i))
            .map(|item| item.selected())
            .collect();
        prop_assert_eq!(before, after);
    }
}
