// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    sync::{
        Arc, OnceLock, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use lapse_wheel::TimingWheel;
use parking_lot::Mutex;
use tokio::time::{self, Instant};
use tracing::Instrument;
use uniflight::Merger;

use crate::{
    CacheBuilder, CacheOptions, CacheStatistics, Error,
    lru::Lru,
    rnd::Rnd,
    stats::{self, Stats},
};

/// An in-process key/value cache whose entries expire after a jittered time to live.
///
/// - Every write arms an expiry deadline of the configured time to live, perturbed by up to
///   5% either way so that entries written together do not all expire together. Writing an
///   existing key replaces its value and re-arms its deadline.
/// - With a [`limit`](CacheBuilder::limit) the cache holds at most that many entries and
///   evicts the least recently used one when a write goes beyond it.
/// - [`take`](Self::take) loads a missing value once, however many callers ask for it at the
///   same time.
///
/// Expiry has the granularity of the configured [`tick`](CacheBuilder::tick): an entry is
/// removed on the first tick after its deadline.
///
/// `Cache` is a cheap handle; clones share the same entries. The background tasks that expire
/// entries and log statistics end when the last handle is dropped.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lapse::Cache;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() -> Result<(), lapse::Error> {
/// let cache = Cache::builder(Duration::from_secs(60)).limit(2).build()?;
///
/// cache.set("a", 1);
/// cache.set("b", 2);
/// cache.set("c", 3);
///
/// // "a" was the least recently used entry.
/// assert_eq!(cache.get(&"a"), None);
/// assert_eq!(cache.get(&"c"), Some(3));
///
/// tokio::time::sleep(Duration::from_secs(70)).await;
/// assert!(cache.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct Cache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> Debug for Cache<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("name", &self.inner.name)
            .field("expire", &self.inner.expire)
            .field("len", &self.inner.table.lock().data.len())
            .finish_non_exhaustive()
    }
}

struct Inner<K, V> {
    name: String,
    expire: Duration,
    table: Mutex<Table<K, V>>,
    wheel: TimingWheel<K, ()>,
    flights: Merger<K, Result<V, Error>>,
    stats: Stats,
    rnd: Rnd,
}

/// State guarded by the cache lock.
struct Table<K, V> {
    data: HashMap<K, V>,
    lru: Lru<K>,
}

impl<K, V> Cache<K, V> {
    /// Starts building a cache whose entries live for about `expire`.
    ///
    /// A zero `expire` disables expiry: entries then stay until deleted or evicted.
    #[must_use]
    pub fn builder(expire: Duration) -> CacheBuilder<K, V> {
        CacheBuilder::new(expire)
    }

    /// Name of the cache as used in log output.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.table.lock().data.len()
    }

    /// Returns `true` if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hit and miss counts since the last periodic report, along with the current size.
    #[must_use]
    pub fn statistics(&self) -> CacheStatistics {
        self.inner.stats.snapshot(self.len())
    }
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(options: CacheOptions, rnd: Rnd) -> Result<Self, Error> {
        // Lets the expiry callback reach the cache without keeping it alive.
        let owner: Arc<OnceLock<Weak<Inner<K, V>>>> = Arc::default();

        let wheel = TimingWheel::new(options.tick, options.slots, {
            let owner = Arc::clone(&owner);
            move |key: K, ()| {
                if let Some(inner) = owner.get().and_then(Weak::upgrade) {
                    inner.expire_entry(&key);
                }
            }
        })?;

        let inner = Arc::new(Inner {
            name: options.name,
            expire: options.expire,
            table: Mutex::new(Table {
                data: HashMap::new(),
                lru: Lru::new(options.limit),
            }),
            wheel,
            flights: Merger::new(),
            stats: Stats::default(),
            rnd,
        });
        let _ = owner.set(Arc::downgrade(&inner));

        if !options.stats_interval.is_zero() {
            spawn_reporter(Arc::downgrade(&inner), options.stats_interval);
        }

        Ok(Self { inner })
    }

    /// Returns a clone of the value stored for `key` and marks it as recently used.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<V> {
        let value = self.inner.lookup(key);
        if value.is_some() {
            self.inner.stats.record_hit();
        } else {
            self.inner.stats.record_miss();
        }
        value
    }

    /// Stores `value` for `key` with the cache's configured time to live.
    ///
    /// Replaces an existing value and re-arms its expiry. In a bounded cache this may evict
    /// the least recently used other entry.
    pub fn set(&self, key: K, value: V) {
        self.set_with_expire(key, value, self.inner.expire);
    }

    /// Stores `value` for `key` with a time to live of about `expire` instead of the
    /// configured one.
    pub fn set_with_expire(&self, key: K, value: V, expire: Duration) {
        let expiry = self.inner.rnd.around(expire);

        let mut table = self.inner.table.lock();
        table.data.insert(key.clone(), value);
        self.inner.track(&mut table, key.clone());
        // Timer requests for a key are posted under the lock to keep them in write order.
        self.inner.wheel.set_timer(key, (), expiry);
    }

    /// Removes `key` and cancels its expiry. Removing a missing key does nothing.
    pub fn del(&self, key: &K) {
        let mut table = self.inner.table.lock();
        table.data.remove(key);
        table.lru.remove(key);
        self.inner.wheel.remove_timer(key.clone());
    }

    /// Returns the value for `key`, loading it with `fetch` if it is missing.
    ///
    /// Concurrent calls for the same missing key share one call to `fetch`: the first caller
    /// runs it and the others wait for its outcome. A loaded value is stored as if by
    /// [`set`](Self::set). A failed load stores nothing, so the next call tries again.
    ///
    /// For statistics, the caller whose `fetch` loaded the value counts a miss and every
    /// caller served from the cache or from another caller's load counts a hit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Fetch`] with the error of `fetch`, or [`Error::FetchPanicked`] if it
    /// panicked. Every caller sharing the load receives the same error.
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
    /// let cache = Cache::builder(Duration::from_secs(60)).build()?;
    ///
    /// let value = cache.take(&"answer", || async { Ok::<_, std::io::Error>(42) }).await?;
    /// assert_eq!(value, 42);
    /// assert_eq!(cache.get(&"answer"), Some(42));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn take<F, Fut, E>(&self, key: &K, fetch: F) -> Result<V, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
        E: std::error::Error + Send + Sync + 'static,
    {
        if let Some(value) = self.inner.lookup(key) {
            self.inner.stats.record_hit();
            return Ok(value);
        }

        let fresh = AtomicBool::new(false);
        let fresh_ref = &fresh;
        let value = self
            .inner
            .flights
            .execute(key, move || async move {
                // Another flight may have stored the value since the first lookup.
                if let Some(value) = self.inner.lookup(key) {
                    return Ok(value);
                }

                match fetch().await {
                    Ok(value) => {
                        fresh_ref.store(true, Ordering::Relaxed);
                        self.set(key.clone(), value.clone());
                        Ok(value)
                    }
                    Err(error) => {
                        tracing::warn!(cache = %self.inner.name, %error, "fetching cache value failed");
                        Err(Error::fetch(error))
                    }
                }
            })
            .await
            .unwrap_or_else(|_leader_panicked| {
                tracing::warn!(cache = %self.inner.name, "fetching cache value panicked");
                Err(Error::FetchPanicked)
            })?;

        if fresh.load(Ordering::Relaxed) {
            self.inner.stats.record_miss();
        } else {
            self.inner.stats.record_hit();
        }
        Ok(value)
    }
}

impl<K, V> Inner<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone,
{
    /// Lookup without statistics.
    fn lookup(&self, key: &K) -> Option<V> {
        let mut table = self.table.lock();
        let value = table.data.get(key).cloned()?;
        self.track(&mut table, key.clone());
        Some(value)
    }

    /// Marks `key` as recently used, dropping whatever entry that displaces.
    fn track(&self, table: &mut Table<K, V>, key: K) {
        let Table { data, lru } = table;
        lru.add(key, |evicted| {
            data.remove(&evicted);
            tracing::debug!(cache = %self.name, "evicted least recently used entry");
            self.wheel.remove_timer(evicted);
        });
    }

    /// Called by the wheel once an entry's deadline has passed.
    fn expire_entry(&self, key: &K) {
        let mut table = self.table.lock();
        if table.data.remove(key).is_some() {
            table.lru.remove(key);
            tracing::debug!(cache = %self.name, "cache entry expired");
        }
    }
}

fn spawn_reporter<K, V>(inner: Weak<Inner<K, V>>, interval: Duration)
where
    K: Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    tokio::spawn(
        async move {
            let mut ticker = time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                let elements = inner.table.lock().data.len();
                stats::report(&inner.name, inner.stats.take_window(elements));
            }
        }
        .in_current_span(),
    );
}
