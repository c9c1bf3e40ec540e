// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Least-recently-used bookkeeping for bounded caches.
//!
//! The tracker only orders keys; values stay in the cache table. Nodes live in a slab and
//! link to each other by index, so touching a key is a few index swaps and never allocates
//! once the slab has grown to the limit.

use std::{collections::HashMap, hash::Hash};

/// Index of a node in the slab.
type NodeIndex = usize;

/// Sentinel for "no node".
const NULL_INDEX: NodeIndex = NodeIndex::MAX;

#[derive(Debug)]
struct LruNode<K> {
    key: Option<K>,
    /// Towards the most recently used end.
    prev: NodeIndex,
    /// Towards the least recently used end; doubles as the free-list link.
    next: NodeIndex,
}

/// Tracks recency for at most `limit` keys. A limit of zero tracks nothing.
#[derive(Debug)]
pub(crate) struct Lru<K> {
    limit: usize,
    nodes: Vec<LruNode<K>>,
    index: HashMap<K, NodeIndex>,
    /// Most recently used.
    head: NodeIndex,
    /// Least recently used.
    tail: NodeIndex,
    free_head: NodeIndex,
}

impl<K> Lru<K>
where
    K: Hash + Eq + Clone,
{
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit,
            nodes: Vec::new(),
            index: HashMap::new(),
            head: NULL_INDEX,
            tail: NULL_INDEX,
            free_head: NULL_INDEX,
        }
    }

    /// Number of tracked keys.
    pub(crate) fn len(&self) -> usize {
        self.index.len()
    }

    /// Marks `key` as most recently used, tracking it if needed.
    ///
    /// If that takes the tracker over its limit, the least recently used key is untracked
    /// and handed to `on_evict` before this returns.
    pub(crate) fn add(&mut self, key: K, on_evict: impl FnOnce(K)) {
        if self.limit == 0 {
            return;
        }

        if let Some(&idx) = self.index.get(&key) {
            self.unlink(idx);
            self.push_front(idx);
            return;
        }

        let idx = self.alloc_node(key.clone());
        self.push_front(idx);
        self.index.insert(key, idx);

        if self.index.len() > self.limit {
            let oldest = self.tail;
            if let Some(evicted) = self.release(oldest) {
                self.index.remove(&evicted);
                on_evict(evicted);
            }
        }
    }

    /// Stops tracking `key` without reporting an eviction.
    pub(crate) fn remove(&mut self, key: &K) {
        if let Some(idx) = self.index.remove(key) {
            let _ = self.release(idx);
        }
    }

    fn alloc_node(&mut self, key: K) -> NodeIndex {
        if self.free_head == NULL_INDEX {
            self.nodes.push(LruNode {
                key: Some(key),
                prev: NULL_INDEX,
                next: NULL_INDEX,
            });
            return self.nodes.len() - 1;
        }

        let idx = self.free_head;
        let node = &mut self.nodes[idx];
        self.free_head = node.next;
        node.key = Some(key);
        node.next = NULL_INDEX;
        idx
    }

    /// Unlinks the node, returns it to the free list and yields its key.
    fn release(&mut self, idx: NodeIndex) -> Option<K> {
        if idx == NULL_INDEX {
            return None;
        }

        self.unlink(idx);
        let node = &mut self.nodes[idx];
        node.next = self.free_head;
        self.free_head = idx;
        node.key.take()
    }

    fn push_front(&mut self, idx: NodeIndex) {
        self.nodes[idx].prev = NULL_INDEX;
        self.nodes[idx].next = self.head;
        if self.head == NULL_INDEX {
            self.tail = idx;
        } else {
            self.nodes[self.head].prev = idx;
        }
        self.head = idx;
    }

    fn unlink(&mut self, idx: NodeIndex) {
        let LruNode { prev, next, .. } = self.nodes[idx];

        if prev == NULL_INDEX {
            self.head = next;
        } else {
            self.nodes[prev].next = next;
        }

        if next == NULL_INDEX {
            self.tail = prev;
        } else {
            self.nodes[next].prev = prev;
        }

        self.nodes[idx].prev = NULL_INDEX;
        self.nodes[idx].next = NULL_INDEX;
    }

    #[cfg(test)]
    fn keys_most_recent_first(&self) -> Vec<K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NULL_INDEX {
            if let Some(key) = &self.nodes[cursor].key {
                keys.push(key.clone());
            }
            cursor = self.nodes[cursor].next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_all(lru: &mut Lru<&'static str>, keys: &[&'static str]) -> Vec<&'static str> {
        let mut evicted = Vec::new();
        for &key in keys {
            lru.add(key, |k| evicted.push(k));
        }
        evicted
    }

    #[test]
    fn oldest_key_is_evicted_past_the_limit() {
        let mut lru = Lru::new(2);
        let evicted = add_all(&mut lru, &["a", "b", "c"]);

        assert_eq!(evicted, vec!["a"]);
        assert_eq!(lru.keys_most_recent_first(), vec!["c", "b"]);
        assert_eq!(lru.len(), 2);
    }

    #[test]
    fn touching_a_key_protects_it() {
        let mut lru = Lru::new(2);
        let evicted = add_all(&mut lru, &["a", "b", "a", "c"]);

        assert_eq!(evicted, vec!["b"]);
        assert_eq!(lru.keys_most_recent_first(), vec!["c", "a"]);
    }

    #[test]
    fn each_displaced_key_is_reported_once() {
        let mut lru = Lru::new(3);
        let evicted = add_all(&mut lru, &["a", "b", "c", "d", "e", "d", "f", "g"]);

        assert_eq!(evicted, vec!["a", "b", "c", "e"]);
        assert_eq!(lru.keys_most_recent_first(), vec!["g", "f", "d"]);
    }

    #[test]
    fn remove_untracks_without_eviction() {
        let mut lru = Lru::new(2);
        add_all(&mut lru, &["a", "b"]);

        lru.remove(&"a");
        lru.remove(&"a");
        lru.remove(&"missing");
        assert_eq!(lru.len(), 1);

        let evicted = add_all(&mut lru, &["c"]);
        assert!(evicted.is_empty());
        assert_eq!(lru.keys_most_recent_first(), vec!["c", "b"]);
    }

    #[test]
    fn freed_nodes_are_reused() {
        let mut lru = Lru::new(2);
        add_all(&mut lru, &["a", "b", "c", "d", "e"]);
        lru.remove(&"d");
        add_all(&mut lru, &["f"]);

        assert_eq!(lru.nodes.len(), 3);
        assert_eq!(lru.keys_most_recent_first(), vec!["f", "e"]);
    }

    #[test]
    fn zero_limit_tracks_nothing() {
        let mut lru = Lru::new(0);
        let evicted = add_all(&mut lru, &["a", "b", "c"]);

        assert!(evicted.is_empty());
        assert_eq!(lru.len(), 0);
        lru.remove(&"a");
    }

    #[test]
    fn single_slot_tracker() {
        let mut lru = Lru::new(1);
        let evicted = add_all(&mut lru, &["a", "a", "b"]);

        assert_eq!(evicted, vec!["a"]);
        assert_eq!(lru.keys_most_recent_first(), vec!["b"]);
    }
}
