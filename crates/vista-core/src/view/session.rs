//! Module: view::session
//! Responsibility: bracket one mutation, snapshot observable state, and
//! turn the raw packet stream into the minimal emitted event stream.
//! Does not own: event delivery (the listener registry) or projection
//! maintenance (pipeline/filter).

use crate::{
    record::Record,
    source::ChangeAction,
    value::Value,
    view::{events::ChangePacket, item::ViewItem},
};
use std::{
    collections::{HashMap, HashSet},
    rc::Rc,
};

///
/// UpdateSession
///
/// Captures observable per-item state (the `selected` flag) and the
/// visible sequence at open time; at close time it diffs against the
/// post-mutation state and finalises the packet stream:
///
/// 1. state-diff packets for items whose `selected` flag flipped,
/// 2. the move/change interplay (upward move suppresses the change entry),
/// 3. synthetic header add/remove packets derived from the sequences,
/// 4. per-group packet splitting when grouping is active.
///

pub(crate) struct UpdateSession<R: Record> {
    analyze: bool,
    before_visible: Vec<Rc<ViewItem<R>>>,
    before_selected: HashMap<u64, bool>,
    packets: Vec<ChangePacket<R>>,
}

impl<R: Record> UpdateSession<R> {
    pub(crate) fn open(analyze: bool, before_visible: Vec<Rc<ViewItem<R>>>) -> Self {
        let before_selected = before_visible
            .iter()
            .map(|item| (item.instance_id(), item.selected()))
            .collect();
        Self {
            analyze,
            before_visible,
            before_selected,
            packets: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, packet: ChangePacket<R>) {
        self.packets.push(packet);
    }

    /// Visible position an item held at open time.
    #[must_use]
    pub(crate) fn before_position(&self, item: &Rc<ViewItem<R>>) -> Option<usize> {
        self.before_visible
            .iter()
            .position(|candidate| Rc::ptr_eq(candidate, item))
    }

    /// Close the session and produce the final, ordered packet stream.
    ///
    /// `group_of` resolves the group id of a visible item (headers map to
    /// their own id); it returns `None` while grouping is inactive.
    pub(crate) fn close(
        mut self,
        analyze_now: bool,
        after_visible: &[Rc<ViewItem<R>>],
        group_of: &dyn Fn(&Rc<ViewItem<R>>) -> Option<Value>,
        grouping_active: bool,
    ) -> Vec<ChangePacket<R>> {
        if self.analyze && !analyze_now {
            // diff skipped by the analyze handshake
            return Vec::new();
        }
        if !self.analyze {
            return Vec::new();
        }

        if self
            .packets
            .iter()
            .any(|packet| packet.action == ChangeAction::Reset)
        {
            return vec![ChangePacket::reset()];
        }

        let (moved_up, _moved_down) = self.moved_sets();

        // 1. per-item state diff → replace-action packets over the slices
        let changed = self.state_diff(after_visible, &moved_up);
        for (position, items) in contiguous(changed) {
            self.packets.push(ChangePacket::replaced(
                items.clone(),
                items,
                position,
            ));
        }

        // 2. upward-move suppression on explicit change packets
        for packet in &mut self.packets {
            if packet.action == ChangeAction::Change {
                packet
                    .new_items
                    .retain(|item| !moved_up.contains(&item.instance_id()));
            }
        }
        self.packets.retain(|packet| {
            packet.action != ChangeAction::Change || !packet.new_items.is_empty()
        });

        // 3. synthetic header churn
        self.diff_headers(after_visible);

        // 4. per-group splitting
        let mut packets = std::mem::take(&mut self.packets);
        if grouping_active {
            packets = packets
                .into_iter()
                .flat_map(|packet| split_by_group(packet, group_of))
                .collect();
        }

        packets.sort_by_key(ChangePacket::anchor);
        packets
    }

    fn moved_sets(&self) -> (HashSet<u64>, HashSet<u64>) {
        let mut moved_up = HashSet::new();
        let mut moved_down = HashSet::new();
        for packet in &self.packets {
            if packet.action != ChangeAction::Move {
                continue;
            }
            let set = if packet.new_index < packet.old_index {
                &mut moved_up
            } else {
                &mut moved_down
            };
            for item in &packet.new_items {
                set.insert(item.instance_id());
            }
        }
        (moved_up, moved_down)
    }

    /// Items whose selected flag differs from the open-time snapshot,
    /// minus upward movers (their move packet already covers them).
    fn state_diff(
        &self,
        after_visible: &[Rc<ViewItem<R>>],
        moved_up: &HashSet<u64>,
    ) -> Vec<(usize, Rc<ViewItem<R>>)> {
        after_visible
            .iter()
            .enumerate()
            .filter(|(_, item)| {
                self.before_selected
                    .get(&item.instance_id())
                    .is_some_and(|before| *before != item.selected())
                    && !moved_up.contains(&item.instance_id())
            })
            .map(|(position, item)| (position, Rc::clone(item)))
            .collect()
    }

    /// Headers that left or entered the visible sequence are emitted as
    /// remove/add packets; the mutation handlers only report data items.
    fn diff_headers(&mut self, after_visible: &[Rc<ViewItem<R>>]) {
        let after_ids: HashSet<u64> = after_visible
            .iter()
            .map(|item| item.instance_id())
            .collect();
        let before_ids: HashSet<u64> = self
            .before_visible
            .iter()
            .map(|item| item.instance_id())
            .collect();

        let gone: Vec<(usize, Rc<ViewItem<R>>)> = self
            .before_visible
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_group() && !after_ids.contains(&item.instance_id()))
            .map(|(position, item)| (position, Rc::clone(item)))
            .collect();
        for (position, items) in contiguous(gone) {
            self.packets.push(ChangePacket::removed(items, position));
        }

        let entered: Vec<(usize, Rc<ViewItem<R>>)> = after_visible
            .iter()
            .enumerate()
            .filter(|(_, item)| item.is_group() && !before_ids.contains(&item.instance_id()))
            .map(|(position, item)| (position, Rc::clone(item)))
            .collect();
        for (position, items) in contiguous(entered) {
            self.packets.push(ChangePacket::added(items, position));
        }
    }
}

/// Collapse `(position, item)` pairs into maximal contiguous runs.
fn contiguous<R: Record>(
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

/// Split one packet into maximal same-group runs.
fn split_by_group<R: Record>(
    packet: ChangePacket<R>,
    group_of: &dyn Fn(&Rc<ViewItem<R>>) -> Option<Value>,
) -> Vec<ChangePacket<R>> {
    let over_old = packet.action == ChangeAction::Remove;
    let items = if over_old {
        &packet.old_items
    } else {
        &packet.new_items
    };
    if items.len() <= 1 {
        return vec![packet];
    }

    let mut boundaries = vec![0usize];
    for window in 1..items.len() {
        if group_of(&items[window - 1]) != group_of(&items[window]) {
            boundaries.push(window);
        }
    }
    if boundaries.len() == 1 {
        return vec![packet];
    }
    boundaries.push(items.len());

    let mut split = Vec::with_capacity(boundaries.len() - 1);
    for pair in boundaries.windows(2) {
        let (from, to) = (pair[0], pair[1]);
        let slice_new = if over_old {
            Vec::new()
        } else {
            packet.new_items[from..to].to_vec()
        };
        let slice_old = if packet.old_items.is_empty() {
            Vec::new()
        } else {
            packet.old_items[from..to.min(packet.old_items.len())].to_vec()
        };
        split.push(ChangePacket {
            action: packet.action,
            new_items: slice_new,
            new_index: packet.new_index + if over_old { 0 } else { from },
            old_items: slice_old,
            old_index: packet.old_index + from,
        });
    }
    split
}
