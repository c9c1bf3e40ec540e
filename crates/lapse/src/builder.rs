// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration and construction of [`Cache`] instances.

use std::{hash::Hash, marker::PhantomData, time::Duration};

use crate::{Cache, Error, rnd::Rnd};

const DEFAULT_NAME: &str = "proc";
const DEFAULT_TICK: Duration = Duration::from_secs(1);
const DEFAULT_SLOTS: usize = 300;
const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Plain-data configuration of a [`Cache`].
///
/// With the `serde` feature enabled the options can be deserialized from an application's
/// configuration; every field except `expire` falls back to its default when absent.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lapse::{CacheBuilder, CacheOptions};
///
/// let mut options = CacheOptions::new(Duration::from_secs(300));
/// options.limit = 10_000;
/// options.name = "users".to_string();
///
/// let builder = CacheBuilder::<u64, String>::from_options(options);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[non_exhaustive]
pub struct CacheOptions {
    /// Base time to live of an entry. Each write perturbs it by up to 5% either way.
    pub expire: Duration,

    /// Maximum number of entries; the least recently used entry is evicted beyond it.
    /// Zero, the default, leaves the cache unbounded.
    #[cfg_attr(feature = "serde", serde(default))]
    pub limit: usize,

    /// Name used in log output. Defaults to `"proc"`.
    #[cfg_attr(feature = "serde", serde(default = "default_name"))]
    pub name: String,

    /// Granularity of expiry. Defaults to one second.
    #[cfg_attr(feature = "serde", serde(default = "default_tick"))]
    pub tick: Duration,

    /// Number of ticks the expiry wheel covers per revolution. Defaults to 300.
    #[cfg_attr(feature = "serde", serde(default = "default_slots"))]
    pub slots: usize,

    /// Period of the hit/miss report. Defaults to one minute; zero disables the report.
    #[cfg_attr(feature = "serde", serde(default = "default_stats_interval"))]
    pub stats_interval: Duration,
}

impl CacheOptions {
    /// Creates options with the given base time to live and defaults for everything else.
    #[must_use]
    pub fn new(expire: Duration) -> Self {
        Self {
            expire,
            limit: 0,
            name: default_name(),
            tick: DEFAULT_TICK,
            slots: DEFAULT_SLOTS,
            stats_interval: DEFAULT_STATS_INTERVAL,
        }
    }
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

#[cfg(feature = "serde")]
const fn default_tick() -> Duration {
    DEFAULT_TICK
}

#[cfg(feature = "serde")]
const fn default_slots() -> usize {
    DEFAULT_SLOTS
}

#[cfg(feature = "serde")]
const fn default_stats_interval() -> Duration {
    DEFAULT_STATS_INTERVAL
}

/// Builder for a [`Cache`], created by [`Cache::builder`] or [`CacheBuilder::from_options`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lapse::Cache;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), lapse::Error> {
/// let cache = Cache::<String, Vec<u8>>::builder(Duration::from_secs(60))
///     .name("blobs")
///     .limit(1_000)
///     .build()?;
///
/// assert_eq!(cache.name(), "blobs");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct CacheBuilder<K, V> {
    options: CacheOptions,
    rnd: Rnd,
    _phantom: PhantomData<fn() -> (K, V)>,
}

impl<K, V> CacheBuilder<K, V> {
    pub(crate) fn new(expire: Duration) -> Self {
        Self::from_options(CacheOptions::new(expire))
    }

    /// Creates a builder preloaded with `options`.
    #[must_use]
    pub fn from_options(options: CacheOptions) -> Self {
        Self {
            options,
            rnd: Rnd::default(),
            _phantom: PhantomData,
        }
    }

    /// Bounds the cache to `limit` entries, evicting the least recently used beyond it.
    ///
    /// Zero removes the bound.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.options.limit = limit;
        self
    }

    /// Names the cache in log output.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    /// Sets the granularity of expiry. Must not be zero.
    #[must_use]
    pub fn tick(mut self, tick: Duration) -> Self {
        self.options.tick = tick;
        self
    }

    /// Sets the number of ticks per revolution of the expiry wheel. Must not be zero.
    #[must_use]
    pub fn slots(mut self, slots: usize) -> Self {
        self.options.slots = slots;
        self
    }

    /// Sets how often hit/miss statistics are logged. Zero disables the report.
    #[must_use]
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.options.stats_interval = interval;
        self
    }

    #[cfg(test)]
    pub(crate) fn rnd(mut self, rnd: Rnd) -> Self {
        self.rnd = rnd;
        self
    }

    /// Builds the cache and starts its background tasks.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Wheel`] if `tick` or `slots` is zero or if called outside of a
    /// Tokio runtime.
    pub fn build(self) -> Result<Cache<K, V>, Error>
    where
        K: Hash + Eq + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Cache::new(self.options, self.rnd)
    }
}
