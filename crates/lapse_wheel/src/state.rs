// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The wheel's bookkeeping, driven exclusively by the loop in [`crate::wheel`].
//!
//! Nothing here locks or spawns: every method runs to completion on the single writer,
//! which keeps the rescheduling arithmetic testable tick by tick.

use std::{hash::Hash, mem, time::Duration};

use crate::genmap::GenerationalMap;

/// Handle of a timer node in the arena.
type NodeIndex = usize;

/// Where a key's timer lives: the slot it is listed in and its arena node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TimerPosition {
    pub(crate) slot: usize,
    pub(crate) node: NodeIndex,
}

#[derive(Debug)]
struct TimerEntry<K, V> {
    key: K,
    value: V,
    /// Full revolutions still owed before the entry may fire.
    circle: usize,
    /// Pending forward relocation, in slots, applied once `circle` reaches zero.
    diff: usize,
}

/// Arena node backing one slot-list element.
#[derive(Debug)]
enum Node<K, V> {
    /// Unused; available for reuse.
    Free,
    /// Cancelled or superseded; still listed in a slot until the next scan of that slot.
    Removed,
    Live(TimerEntry<K, V>),
}

#[derive(Debug)]
pub(crate) struct WheelState<K, V> {
    interval: Duration,
    slots: Vec<Vec<NodeIndex>>,
    nodes: Vec<Node<K, V>>,
    free: Vec<NodeIndex>,
    timers: GenerationalMap<K, TimerPosition>,
    ticked: usize,
}

impl<K, V> WheelState<K, V>
where
    K: Hash + Eq + Clone,
{
    /// Creates the state for `num_slots` slots of width `interval`. Both must be non-zero.
    pub(crate) fn new(interval: Duration, num_slots: usize) -> Self {
        debug_assert!(!interval.is_zero() && num_slots > 0, "validated by TimingWheel::new");
        Self {
            interval,
            slots: (0..num_slots).map(|_| Vec::new()).collect(),
            nodes: Vec::new(),
            free: Vec::new(),
            timers: GenerationalMap::new(),
            // The first tick lands on slot 0.
            ticked: num_slots - 1,
        }
    }

    /// Number of pending timers.
    pub(crate) fn len(&self) -> usize {
        self.timers.size()
    }

    /// Schedules `key` to fire on the first tick at least `delay` after the last tick, or
    /// moves its pending timer there and replaces its value.
    pub(crate) fn set_timer(&mut self, key: K, value: V, delay: Duration) {
        if let Some(position) = self.timers.get(&key) {
            if let Node::Live(entry) = &mut self.nodes[position.node] {
                entry.value = value;
            }
            self.reschedule(&key, position, delay);
            return;
        }

        let steps = self.steps(delay);
        let (slot, circle) = self.position_and_circle(steps);
        self.insert(
            TimerEntry {
                key,
                value,
                circle,
                diff: 0,
            },
            slot,
        );
    }

    /// Reschedules the pending timer of `key`, with `delay` counted from the last tick.
    /// Does nothing if there is none.
    pub(crate) fn move_timer(&mut self, key: &K, delay: Duration) {
        if let Some(position) = self.timers.get(key) {
            self.reschedule(key, position, delay);
        }
    }

    /// Cancels the pending timer of `key`, if any.
    pub(crate) fn remove_timer(&mut self, key: &K) {
        if let Some(position) = self.timers.del(key) {
            self.nodes[position.node] = Node::Removed;
        }
    }

    /// Advances one slot and returns the entries that are due.
    pub(crate) fn on_tick(&mut self) -> Vec<(K, V)> {
        let num_slots = self.slots.len();
        self.ticked = (self.ticked + 1) % num_slots;

        let listed = mem::take(&mut self.slots[self.ticked]);
        let mut remaining = Vec::with_capacity(listed.len());
        let mut due = Vec::new();

        for node in listed {
            match &mut self.nodes[node] {
                Node::Free => {}
                Node::Removed => {
                    self.nodes[node] = Node::Free;
                    self.free.push(node);
                }
                Node::Live(entry) if entry.circle > 0 => {
                    entry.circle -= 1;
                    remaining.push(node);
                }
                Node::Live(entry) if entry.diff > 0 => {
                    // diff < num_slots, so the target is never the slot being scanned.
                    let slot = (self.ticked + entry.diff) % num_slots;
                    entry.diff = 0;
                    self.slots[slot].push(node);
                    self.timers.set(entry.key.clone(), TimerPosition { slot, node });
                }
                Node::Live(_) => {
                    if let Node::Live(entry) = mem::replace(&mut self.nodes[node], Node::Free) {
                        self.free.push(node);
                        self.timers.del(&entry.key);
                        due.push((entry.key, entry.value));
                    }
                }
            }
        }

        self.slots[self.ticked] = remaining;
        due
    }

    /// Removes every pending timer and returns them in slot order.
    pub(crate) fn drain(&mut self) -> Vec<(K, V)> {
        let mut drained = Vec::with_capacity(self.len());
        let nodes = mem::take(&mut self.nodes);
        let mut nodes: Vec<Option<Node<K, V>>> = nodes.into_iter().map(Some).collect();

        for slot in &mut self.slots {
            for node in slot.drain(..) {
                if let Some(Node::Live(entry)) = nodes[node].take() {
                    self.timers.del(&entry.key);
                    drained.push((entry.key, entry.value));
                }
            }
        }

        self.free.clear();
        drained
    }

    fn insert(&mut self, entry: TimerEntry<K, V>, slot: usize) {
        let key = entry.key.clone();
        let node = if let Some(node) = self.free.pop() {
            self.nodes[node] = Node::Live(entry);
            node
        } else {
            self.nodes.push(Node::Live(entry));
            self.nodes.len() - 1
        };

        self.slots[slot].push(node);
        self.timers.set(key, TimerPosition { slot, node });
    }

    /// Moves a pending timer so that it fires `delay` after the last tick.
    ///
    /// When the entry's current slot is visited no later than the new deadline, the entry
    /// stays in its list and only its revolution count and pending offset change. A deadline
    /// before that first visit cannot be reached by moving forward, so the entry is
    /// tombstoned and a fresh one is listed at the new slot.
    fn reschedule(&mut self, key: &K, position: TimerPosition, delay: Duration) {
        let num_slots = self.slots.len();
        let steps = self.steps(delay);
        let first_visit = self.ticks_until_visit(position.slot);

        if steps >= first_visit {
            if let Node::Live(entry) = &mut self.nodes[position.node] {
                let after_first_visit = steps - first_visit;
                entry.circle = after_first_visit / num_slots;
                entry.diff = after_first_visit % num_slots;
            }
            return;
        }

        if let Node::Live(entry) = mem::replace(&mut self.nodes[position.node], Node::Removed) {
            let (slot, circle) = self.position_and_circle(steps);
            self.insert(
                TimerEntry {
                    key: key.clone(),
                    value: entry.value,
                    circle,
                    diff: 0,
                },
                slot,
            );
        }
    }

    /// Ticks until `delay` has passed, rounded up and at least one.
    fn steps(&self, delay: Duration) -> usize {
        let steps = delay.as_nanos().div_ceil(self.interval.as_nanos());
        usize::try_from(steps).unwrap_or(usize::MAX).max(1)
    }

    fn position_and_circle(&self, steps: usize) -> (usize, usize) {
        let num_slots = self.slots.len();
        let slot = (self.ticked + steps % num_slots) % num_slots;
        let circle = (steps - 1) / num_slots;
        (slot, circle)
    }

    /// Ticks until `slot` is scanned next, in `1..=num_slots`.
    fn ticks_until_visit(&self, slot: usize) -> usize {
        let num_slots = self.slots.len();
        (slot + num_slots - self.ticked - 1) % num_slots + 1
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    const INTERVAL: Duration = Duration::from_secs(1);

    fn ticks(n: u64) -> Duration {
        INTERVAL * u32::try_from(n).expect("test tick counts fit in u32")
    }

    /// Ticks the wheel until `key` fires and returns how many ticks that took.
    fn fire_tick(
        state: &mut WheelState<&'static str, u32>,
        key: &str,
        limit: usize,
    ) -> Option<usize> {
        (1..=limit).find(|_| state.on_tick().iter().any(|(k, _)| *k == key))
    }

    fn advance(state: &mut WheelState<&'static str, u32>, n: usize) -> Vec<(&'static str, u32)> {
        (0..n).flat_map(|_| state.on_tick()).collect()
    }

    #[rstest]
    #[case::one_tick(1)]
    #[case::mid_revolution(3)]
    #[case::last_slot(9)]
    #[case::exactly_one_revolution(10)]
    #[case::one_revolution_and_one(11)]
    #[case::exactly_two_revolutions(20)]
    #[case::many_revolutions(57)]
    fn fires_after_requested_ticks(#[case] delay: u64) {
        let mut state = WheelState::new(INTERVAL, 10);
        state.set_timer("k", 1, ticks(delay));

        assert_eq!(fire_tick(&mut state, "k", 100), Some(usize::try_from(delay).unwrap()));
        assert_eq!(state.len(), 0);
    }

    #[rstest]
    #[case::sub_tick(Duration::from_millis(10), 1)]
    #[case::zero(Duration::ZERO, 1)]
    #[case::just_over_one_tick(Duration::from_millis(1_001), 2)]
    #[case::just_under_three_ticks(Duration::from_millis(2_999), 3)]
    fn partial_ticks_round_up(#[case] delay: Duration, #[case] expected: usize) {
        let mut state = WheelState::new(INTERVAL, 10);
        state.set_timer("k", 1, delay);

        assert_eq!(fire_tick(&mut state, "k", 20), Some(expected));
    }

    #[test]
    fn maximal_delay_does_not_overflow() {
        let mut state = WheelState::new(INTERVAL, 4);
        state.set_timer("k", 1, Duration::MAX);
        assert!(advance(&mut state, 50).is_empty());

        state.move_timer(&"k", Duration::MAX);
        assert!(advance(&mut state, 50).is_empty());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn fired_entry_carries_its_value() {
        let mut state = WheelState::new(INTERVAL, 4);
        state.set_timer("k", 7, ticks(2));

        assert!(state.on_tick().is_empty());
        assert_eq!(state.on_tick(), vec![("k", 7)]);
    }

    /// Every combination of wheel phase, original delay and new delay must fire exactly once,
    /// exactly `new` ticks after the move.
    #[rstest]
    #[case::later_same_revolution(2, 5)]
    #[case::earlier_same_revolution(6, 2)]
    #[case::later_across_revolution(3, 14)]
    #[case::earlier_across_revolution(14, 3)]
    #[case::later_many_revolutions(5, 47)]
    #[case::earlier_many_revolutions(47, 5)]
    #[case::same_delay(7, 7)]
    #[case::to_one_tick(25, 1)]
    #[case::exact_revolution(4, 10)]
    #[case::from_exact_revolution(10, 4)]
    fn moved_timer_fires_once_at_new_delay(
        #[case] original: u64,
        #[case] moved: u64,
        #[values(0, 1, 4, 9, 13)] elapsed: usize,
    ) {
        let mut state = WheelState::new(INTERVAL, 10);
        state.set_timer("k", 1, ticks(original + u64::try_from(elapsed).unwrap()));
        assert!(advance(&mut state, elapsed).is_empty());

        state.move_timer(&"k", ticks(moved));

        let fired_at = fire_tick(&mut state, "k", 200);
        assert_eq!(fired_at, Some(usize::try_from(moved).unwrap()));
        assert!(advance(&mut state, 100).is_empty(), "timer must fire only once");
        assert_eq!(state.len(), 0);
    }

    #[test]
    fn repeated_moves_keep_a_single_entry() {
        let mut state = WheelState::new(INTERVAL, 8);
        state.set_timer("k", 1, ticks(30));
        for delay in [3, 12, 2, 40, 9] {
            state.move_timer(&"k", ticks(delay));
            assert!(advance(&mut state, 1).is_empty());
        }

        // Last move was 9 ticks ago minus the one tick already advanced.
        assert_eq!(fire_tick(&mut state, "k", 100), Some(8));
        assert!(advance(&mut state, 100).is_empty());
    }

    #[test]
    fn move_of_unknown_key_is_ignored() {
        let mut state: WheelState<&str, u32> = WheelState::new(INTERVAL, 8);
        state.move_timer(&"missing", ticks(3));
        assert_eq!(state.len(), 0);
        assert!(advance(&mut state, 20).is_empty());
    }

    #[test]
    fn set_on_pending_key_moves_and_replaces_value() {
        let mut state = WheelState::new(INTERVAL, 8);
        state.set_timer("k", 1, ticks(5));
        state.set_timer("k", 2, ticks(3));

        assert_eq!(state.len(), 1);
        let fired = advance(&mut state, 3);
        assert_eq!(fired, vec![("k", 2)]);
        assert!(advance(&mut state, 20).is_empty());
    }

    #[test]
    fn removed_timer_never_fires() {
        let mut state = WheelState::new(INTERVAL, 8);
        state.set_timer("a", 1, ticks(2));
        state.set_timer("b", 2, ticks(2));
        state.remove_timer(&"a");
        state.remove_timer(&"a");

        assert_eq!(state.len(), 1);
        assert_eq!(advance(&mut state, 2), vec![("b", 2)]);
        assert!(advance(&mut state, 20).is_empty());
    }

    #[test]
    fn removed_nodes_are_recycled_after_their_slot_is_scanned() {
        let mut state = WheelState::new(INTERVAL, 4);
        state.set_timer("a", 1, ticks(1));
        state.remove_timer(&"a");
        assert!(state.free.is_empty(), "node is still listed in its slot");

        assert!(state.on_tick().is_empty());
        assert_eq!(state.free.len(), 1);

        state.set_timer("b", 2, ticks(1));
        assert_eq!(state.nodes.len(), 1, "node is reused");
        assert_eq!(state.on_tick(), vec![("b", 2)]);
    }

    #[test]
    fn drain_returns_pending_entries_and_clears() {
        let mut state = WheelState::new(INTERVAL, 4);
        state.set_timer("a", 1, ticks(1));
        state.set_timer("b", 2, ticks(6));
        state.set_timer("c", 3, ticks(3));
        state.remove_timer(&"c");

        let mut drained = state.drain();
        drained.sort_unstable();
        assert_eq!(drained, vec![("a", 1), ("b", 2)]);
        assert_eq!(state.len(), 0);
        assert!(advance(&mut state, 20).is_empty());

        state.set_timer("a", 4, ticks(2));
        assert_eq!(fire_tick(&mut state, "a", 10), Some(2));
    }

    #[test]
    fn ticks_until_visit_wraps_around() {
        let mut state: WheelState<&str, u32> = WheelState::new(INTERVAL, 5);
        assert_eq!(state.ticks_until_visit(0), 1);
        assert_eq!(state.ticks_until_visit(4), 5);

        let _ = advance(&mut state, 3);
        assert_eq!(state.ticked, 2);
        assert_eq!(state.ticks_until_visit(3), 1);
        assert_eq!(state.ticks_until_visit(2), 5);
        assert_eq!(state.ticks_until_visit(0), 3);
    }
}
