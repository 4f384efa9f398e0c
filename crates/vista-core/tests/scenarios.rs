//! End-to-end projection scenarios: grouping, filtering, uniqueness, and
//! the emitted event streams around structural changes.

use std::{cell::RefCell, rc::Rc};
use vista_core::{
    prelude::*,
    source::ChangeAction,
    view::{ChangePacket, ViewItem},
};

fn rec(id: i64, group: &str) -> Rc<ObjectRecord> {
    Rc::new(ObjectRecord::from_pairs([
        ("id", Value::Int(id)),
        ("g", Value::from(group)),
    ]))
}

fn rec_id(id: i64) -> Rc<ObjectRecord> {
    Rc::new(ObjectRecord::from_pairs([("id", Value::Int(id))]))
}

fn view_over(list: &ObservableVec<ObjectRecord>) -> View<ObjectRecord> {
    View::new(Rc::new(list.clone())).expect("view over list")
}

/// Compressed visible sequence: `G:x` for headers, the id for data items.
fn signature(view: &View<ObjectRecord>) -> Vec<String> {
    let mut out = Vec::new();
    view.each(|item, _| {
        if let Some(id) = item.group_id() {
            out.push(format!("G:{id}"));
        } else if let Some(record) = item.record() {
            out.push(record.get("id").map(|v| v.to_string()).unwrap_or_default());
        }
    });
    out
}

///
/// Capture
/// Listener that records delivered packets in a compressed form.
///

#[derive(Default)]
struct Capture {
    befores: RefCell<u32>,
    afters: RefCell<u32>,
    packets: RefCell<Vec<(ChangeAction, Vec<String>, usize, Vec<String>, usize)>>,
}

impl Capture {
    fn wire(view: &View<ObjectRecord>) -> Rc<Self> {
        let capture = Rc::new(Self::default());
        let listener: Rc<dyn ViewListener<ObjectRecord>> = capture.clone();
        view.subscribe(&listener);
        capture
    }

    fn actions(&self) -> Vec<ChangeAction> {
        self.packets
            .borrow()
            .iter()
            .map(|(action, ..)| *action)
            .collect()
    }

    fn total(&self) -> usize {
        self.packets.borrow().len()
    }
}

fn tag(item: &Rc<ViewItem<ObjectRecord>>) -> String {
    match item.group_id() {
        Some(id) => format!("G:{id}"),
        None => item
            .record()
            .and_then(|record| record.get("id"))
            .map(|id| id.to_string())
            .unwrap_or_default(),
    }
}

impl ViewListener<ObjectRecord> for Capture {
    fn on_before_collection_change(&self) {
        *self.befores.borrow_mut() += 1;
    }

    fn on_collection_change(&self, packet: &ChangePacket<ObjectRecord>) {
        self.packets.borrow_mut().push((
            packet.action,
            packet.new_items.iter().map(tag).collect(),
            packet.new_index,
            packet.old_items.iter().map(tag).collect(),
            packet.old_index,
        ));
    }

    fn on_after_collection_change(&self) {
        *self.afters.borrow_mut() += 1;
    }
}

// ---------------------------------------------------------------------
// (a) grouping gathers stable runs; sorting keeps them
// ---------------------------------------------------------------------

#[test]
fn grouping_inserts_headers_before_stable_runs() {
    let list = ObservableVec::new();
    list.assign([rec(1, "A"), rec(2, "B"), rec(3, "A")]);
    let view = view_over(&list);

    view.set_group(Some(GroupFn::by_field("g"))).expect("group");
    assert_eq!(signature(&view), vec!["G:A", "1", "3", "G:B", "2"]);

    assert_eq!(view.group_by_index(0), Some(Value::from("A")));
    assert_eq!(view.group_by_index(2), Some(Value::from("A")));
    assert_eq!(view.group_by_index(3), Some(Value::from("B")));
    assert_eq!(view.group_items(&Value::from("A")).len(), 2);
    assert!(view.group_items(&Value::from("C")).is_empty());

    view.set_sort(vec![SortFn::by_field("id", Direction::Asc)])
        .expect("sort");
    assert_eq!(signature(&view), vec!["G:A", "1", "3", "G:B", "2"]);
}

#[test]
fn null_group_ids_suppress_headers() {
    let list = ObservableVec::new();
    list.assign([rec(1, "A"), Rc::new(ObjectRecord::from_pairs([("id", 9i64)]))]);
    let view = view_over(&list);
    view.set_group(Some(GroupFn::by_field("g"))).expect("group");

    assert_eq!(signature(&view), vec!["G:A", "1", "9"]);
}

// ---------------------------------------------------------------------
// (b) filtering
// ---------------------------------------------------------------------

#[test]
fn filter_hides_and_restores_in_source_order() {
    let crew = |name: &str, sex: &str| {
        Rc::new(ObjectRecord::from_pairs([
            ("n", Value::from(name)),
            ("s", Value::from(sex)),
        ]))
    };
    let list = ObservableVec::new();
    list.assign([
        crew("Fry", "M"),
        crew("Leela", "F"),
        crew("Farnsworth", "M"),
        crew("Amy", "F"),
    ]);
    let view = view_over(&list);

    let females = FilterFn::by_field("s", "F");
    view.set_filter(vec![females.clone()]).expect("filter");

    let names: Vec<String> = {
        let mut out = Vec::new();
        view.each(|item, _| {
            let name = item
                .record()
                .and_then(|record| record.get("n"))
                .map(|v| v.to_string());
            out.extend(name);
        });
        out
    };
    assert_eq!(names, vec!["Leela", "Amy"]);

    assert!(view.remove_filter(&females).expect("remove"));
    assert_eq!(view.len(), 4);
    let first = view.first().expect("first");
    assert_eq!(
        first.record().and_then(|r| r.get("n")),
        Some(Value::from("Fry"))
    );
}

// ---------------------------------------------------------------------
// (c) uniqueness
// ---------------------------------------------------------------------

#[test]
fn unique_elides_duplicates_until_disabled() {
    let list = ObservableVec::new();
    list.assign([rec_id(1), rec_id(2), rec_id(1)]);

    let options = ViewOptions {
        id_property: Some("id".to_string()),
        unique: true,
        important_properties: Vec::new(),
    };
    let view: View<ObjectRecord> =
        View::with_options(Rc::new(list.clone()), &options).expect("view");
    assert_eq!(view.len(), 2);

    view.set_unique(false).expect("disable");
    assert_eq!(view.len(), 3);

    view.set_unique(true).expect("enable");
    assert_eq!(view.len(), 2);
}

// ---------------------------------------------------------------------
// (d) add under an active filter emits one add packet
// ---------------------------------------------------------------------

#[test]
fn filtered_add_emits_one_packet_at_projection_index() {
    let list = ObservableVec::new();
    list.assign([rec_id(1), rec_id(2), rec_id(3)]);
    let view = view_over(&list);

    view.set_filter(vec![FilterFn::new(|args: &vista_core::view::FilterArgs<'_, ObjectRecord>| {
        args.record.is_none_or(|record| {
            matches!(record.get("id"), Some(Value::Int(id)) if id > 3)
        })
    })])
    .expect("filter");
    assert_eq!(view.len(), 0);

    let capture = Capture::wire(&view);
    list.insert(1, rec_id(5));

    assert_eq!(*capture.befores.borrow(), 1);
    assert_eq!(*capture.afters.borrow(), 1);
    let packets = capture.packets.borrow();
    assert_eq!(packets.len(), 1);
    let (action, new_items, new_index, ..) = &packets[0];
    assert_eq!(*action, ChangeAction::Add);
    assert_eq!(new_items, &vec!["5".to_string()]);
    assert_eq!(*new_index, 0);
}

// ---------------------------------------------------------------------
// (e) moves and packets under grouping split per group
// ---------------------------------------------------------------------

#[test]
fn source_move_across_group_boundary_stays_group_coherent() {
    let list = ObservableVec::new();
    let n1 = rec_id(8);
    let n2 = rec_id(9);
    list.assign([rec(1, "A"), rec(2, "A"), Rc::clone(&n1), Rc::clone(&n2)]);
    let view = view_over(&list);
    view.set_group(Some(GroupFn::by_field("g"))).expect("group");
    assert_eq!(signature(&view), vec!["G:A", "1", "2", "8", "9"]);

    let capture = Capture::wire(&view);
    assert!(list.move_item(3, 0));

    // the headerless run now leads, in first-appearance order
    assert_eq!(signature(&view), vec!["9", "8", "G:A", "1", "2"]);

    let moved: Vec<_> = capture
        .packets
        .borrow()
        .iter()
        .filter(|(action, ..)| *action == ChangeAction::Move)
        .cloned()
        .collect();
    assert!(!moved.is_empty(), "a visible relocation must emit a move");

    // every emitted packet stays within one group
    for (_, new_items, _, old_items, _) in capture.packets.borrow().iter() {
        let items = if new_items.is_empty() { old_items } else { new_items };
        let grouped: Vec<bool> = items.iter().map(|tag| tag.starts_with("G:")).collect();
        assert!(
            grouped.windows(2).all(|pair| pair[0] == pair[1]),
            "packet mixes headers and foreign-group members: {items:?}"
        );
    }
}

#[test]
fn selection_across_headerless_boundary_splits_per_group() {
    let list = ObservableVec::new();
    let a2 = rec(2, "A");
    let n1 = rec_id(8);
    list.assign([rec(1, "A"), Rc::clone(&a2), Rc::clone(&n1)]);
    let view = view_over(&list);
    view.set_group(Some(GroupFn::by_field("g"))).expect("group");
    assert_eq!(signature(&view), vec!["G:A", "1", "2", "8"]);

    let capture = Capture::wire(&view);
    view.set_selected(&[a2, n1], true).expect("select");

    // positions 2 and 3 are contiguous but belong to different groups
    let packets = capture.packets.borrow();
    assert_eq!(packets.len(), 2);
    assert!(packets
        .iter()
        .all(|(action, ..)| *action == ChangeAction::Replace));
    assert_eq!(packets[0].1, vec!["2".to_string()]);
    assert_eq!(packets[1].1, vec!["8".to_string()]);
}

// ---------------------------------------------------------------------
// (f) upward relocation suppresses the change packet entry
// ---------------------------------------------------------------------

#[test]
fn upward_move_omits_item_from_change_packet() {
    let list = ObservableVec::new();
    let third = Rc::new(ObjectRecord::from_pairs([
        ("id", Value::Int(3)),
        ("rank", Value::Int(30)),
    ]));
    list.assign([
        Rc::new(ObjectRecord::from_pairs([
            ("id", Value::Int(1)),
            ("rank", Value::Int(10)),
        ])),
        Rc::new(ObjectRecord::from_pairs([
            ("id", Value::Int(2)),
            ("rank", Value::Int(20)),
        ])),
        Rc::clone(&third),
    ]);
    let view = view_over(&list);
    view.set_sort(vec![SortFn::by_field("rank", Direction::Asc)])
        .expect("sort");
    assert_eq!(signature(&view), vec!["1", "2", "3"]);

    let item = view.item_by_source_item(&third).expect("projected");
    let capture = Capture::wire(&view);

    third.set("rank", Value::Int(5));
    view.notify_item_change(&item, &["rank".to_string()])
        .expect("notify");

    assert_eq!(signature(&view), vec!["3", "1", "2"]);

    let packets = capture.packets.borrow();
    let moves: Vec<_> = packets
        .iter()
        .filter(|(action, ..)| *action == ChangeAction::Move)
        .collect();
    assert_eq!(moves.len(), 1);
    assert_eq!(moves[0].1, vec!["3".to_string()]);
    assert_eq!((moves[0].2, moves[0].4), (0, 2));

    for (action, new_items, ..) in packets.iter() {
        if *action == ChangeAction::Change {
            assert!(
                !new_items.contains(&"3".to_string()),
                "upward mover must not appear in a change packet"
            );
        }
    }
}

#[test]
fn downward_move_keeps_item_in_change_packet() {
    let list = ObservableVec::new();
    let first = Rc::new(ObjectRecord::from_pairs([
        ("id", Value::Int(1)),
        ("rank", Value::Int(10)),
    ]));
    list.assign([
        Rc::clone(&first),
        Rc::new(ObjectRecord::from_pairs([
            ("id", Value::Int(2)),
            ("rank", Value::Int(20)),
        ])),
    ]);
    let view = view_over(&list);
    view.set_sort(vec![SortFn::by_field("rank", Direction::Asc)])
        .expect("sort");

    let item = view.item_by_source_item(&first).expect("projected");
    let capture = Capture::wire(&view);

    first.set("rank", Value::Int(25));
    view.notify_item_change(&item, &["rank".to_string()])
        .expect("notify");

    assert_eq!(signature(&view), vec!["2", "1"]);
    let actions = capture.actions();
    assert!(actions.contains(&ChangeAction::Move));
    let packets = capture.packets.borrow();
    let change = packets
        .iter()
        .find(|(action, ..)| *action == ChangeAction::Change)
        .expect("downward move keeps its change packet");
    assert_eq!(change.1, vec!["1".to_string()]);
}

// ---------------------------------------------------------------------
// no-op short-circuits (§8 properties 5 and 7)
// ---------------------------------------------------------------------

#[test]
fn same_reference_setters_emit_no_events() {
    let list = ObservableVec::new();
    list.assign([rec(1, "A"), rec(2, "B")]);
    let view = view_over(&list);

    let sort = SortFn::by_field("id", Direction::Asc);
    let group = GroupFn::by_field("g");
    view.set_sort(vec![sort.clone()]).expect("sort");
    view.set_group(Some(group.clone())).expect("group");

    let capture = Capture::wire(&view);
    view.set_sort(view.sort()).expect("same sort");
    view.set_group(Some(group)).expect("same group");
    view.set_filter(view.filter()).expect("same filter");
    assert_eq!(capture.total(), 0);

    view.set_sort(vec![SortFn::by_field("id", Direction::Desc)])
        .expect("new sort");
    assert_eq!(capture.actions(), vec![ChangeAction::Reset]);
}
