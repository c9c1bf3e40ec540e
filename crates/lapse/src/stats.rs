// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lookup counters of one cache since the last report.
#[derive(Debug, Default)]
pub(crate) struct Stats {
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Stats {
    pub(crate) fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Reads the counters without resetting them.
    pub(crate) fn snapshot(&self, elements: usize) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            elements,
        }
    }

    /// Reads and resets the counters, starting a new reporting window.
    pub(crate) fn take_window(&self, elements: usize) -> CacheStatistics {
        CacheStatistics {
            hits: self.hits.swap(0, Ordering::Relaxed),
            misses: self.misses.swap(0, Ordering::Relaxed),
            elements,
        }
    }
}

/// Hit and miss counts of a [`Cache`](crate::Cache) for the current reporting window.
///
/// The counters restart from zero each time the cache logs its periodic report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct CacheStatistics {
    /// Lookups that found a value, including [`take`](crate::Cache::take) calls that shared
    /// another caller's load.
    pub hits: u64,
    /// Lookups that found nothing, including [`take`](crate::Cache::take) calls that loaded
    /// the value themselves.
    pub misses: u64,
    /// Entries held by the cache when the statistics were read.
    pub elements: usize,
}

impl CacheStatistics {
    /// Total number of lookups in the window.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }

    /// Percentage of lookups that were hits, or `0.0` if there were none.
    #[must_use]
    #[expect(clippy::cast_precision_loss, reason = "a percentage does not need every bit of the counters")]
    pub fn hit_ratio(&self) -> f64 {
        match self.total() {
            0 => 0.0,
            total => 100.0 * self.hits as f64 / total as f64,
        }
    }
}

/// Logs one reporting window, or nothing if the window saw no lookups.
pub(crate) fn report(name: &str, window: CacheStatistics) {
    let total = window.total();
    if total == 0 {
        return;
    }

    tracing::info!(
        cache.name = name,
        cache.hits = window.hits,
        cache.misses = window.misses,
        cache.elements = window.elements,
        "cache({name}) - qpm: {total}, hit_ratio: {:.1}%, elements: {}, hit: {}, miss: {}",
        window.hit_ratio(),
        window.elements,
        window.hits,
        window.misses,
    );
}
