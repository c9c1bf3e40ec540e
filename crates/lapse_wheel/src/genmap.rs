// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A mutex-guarded map that reclaims the memory of deleted entries in bulk.
//!
//! Removing from a `HashMap` never shrinks it, so a table with heavy churn keeps the
//! capacity of its historical peak. [`GenerationalMap`] spreads its entries over two
//! generations and counts deletions per generation. Once a generation has seen many
//! deletions but holds few live entries, its survivors are copied into the other
//! generation and its table is dropped, which bounds both the memory held by
//! tombstoned buckets and the cost of the copy.

use std::{collections::HashMap, fmt::Debug, hash::Hash, mem};

use parking_lot::Mutex;

/// Deletions a generation must accumulate before it is considered for compaction.
const MAX_DELETIONS: usize = 10_000;

/// Live entries a generation may hold at most to be compacted. Keeps the copy cheap.
const COPY_THRESHOLD: usize = 1_000;

/// A concurrent map with O(1) deletion and deferred compaction.
///
/// Every operation takes one exclusive lock; the map is a correctness baseline
/// rather than a lock-free structure.
///
/// # Examples
///
/// ```
/// use lapse_wheel::GenerationalMap;
///
/// let map = GenerationalMap::new();
/// map.set("a", 1);
/// map.set("a", 2);
/// assert_eq!(map.get(&"a"), Some(2));
///
/// assert_eq!(map.del(&"a"), Some(2));
/// assert_eq!(map.get(&"a"), None);
/// assert_eq!(map.size(), 0);
/// ```
pub struct GenerationalMap<K, V> {
    inner: Mutex<Generations<K, V>>,
}

struct Generations<K, V> {
    previous: HashMap<K, V>,
    current: HashMap<K, V>,
    previous_deletions: usize,
    current_deletions: usize,
}

impl<K, V> Default for Generations<K, V> {
    fn default() -> Self {
        Self {
            previous: HashMap::new(),
            current: HashMap::new(),
            previous_deletions: 0,
            current_deletions: 0,
        }
    }
}

impl<K: Hash + Eq, V> Generations<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.previous.get(key).or_else(|| self.current.get(key))
    }

    fn set(&mut self, key: K, value: V) {
        if let Some(slot) = self.previous.get_mut(&key) {
            *slot = value;
        } else {
            self.current.insert(key, value);
        }
    }

    fn del(&mut self, key: &K) -> Option<V> {
        let removed = if let Some(value) = self.previous.remove(key) {
            self.previous_deletions += 1;
            Some(value)
        } else if let Some(value) = self.current.remove(key) {
            self.current_deletions += 1;
            Some(value)
        } else {
            None
        };

        self.compact();
        removed
    }

    fn compact(&mut self) {
        if self.previous_deletions >= MAX_DELETIONS && self.previous.len() < COPY_THRESHOLD {
            // The merged table becomes the previous generation; current starts over.
            let survivors = mem::take(&mut self.previous);
            self.current.extend(survivors);
            self.previous = mem::take(&mut self.current);
            self.previous_deletions = self.current_deletions;
            self.current_deletions = 0;
        }

        if self.current_deletions >= MAX_DELETIONS && self.current.len() < COPY_THRESHOLD {
            let survivors = mem::take(&mut self.current);
            self.previous.extend(survivors);
            self.current_deletions = 0;
        }
    }

    fn len(&self) -> usize {
        self.previous.len() + self.current.len()
    }
}

impl<K, V> Default for GenerationalMap<K, V> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(Generations::default()),
        }
    }
}

impl<K, V> Debug for GenerationalMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("GenerationalMap")
            .field("previous", &inner.previous.len())
            .field("current", &inner.current.len())
            .field("previous_deletions", &inner.previous_deletions)
            .field("current_deletions", &inner.current_deletions)
            .finish()
    }
}

impl<K: Hash + Eq, V> GenerationalMap<K, V> {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value stored for `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.lock().get(key).cloned()
    }

    /// Stores `value` for `key`, replacing any previous value.
    pub fn set(&self, key: K, value: V) {
        self.inner.lock().set(key, value);
    }

    /// Removes `key`, returning its value if it was present.
    ///
    /// May compact the generation the key was removed from.
    pub fn del(&self, key: &K) -> Option<V> {
        self.inner.lock().del(key)
    }

    /// Returns the number of live entries.
    #[must_use]
    pub fn size(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns `true` if the map holds no live entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Calls `f` for every live entry while holding the lock.
    ///
    /// `f` must not call back into the map.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        let inner = self.inner.lock();
        inner.previous.iter().chain(inner.current.iter()).for_each(|(k, v)| f(k, v));
    }
}
