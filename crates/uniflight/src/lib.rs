// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Coalesces duplicate async tasks into a single execution.
//!
//! This crate provides [`Merger`], a mechanism for deduplicating concurrent async operations.
//! When multiple tasks request the same work (identified by a key), only the first task (the
//! "leader") performs the actual work while subsequent tasks (the "followers") wait and receive
//! a clone of the result.
//!
//! # When to Use
//!
//! Use `Merger` when you have expensive or rate-limited operations that may be requested
//! concurrently with the same parameters:
//!
//! - **Cache population**: Prevent thundering herd when a cache entry expires
//! - **API calls**: Deduplicate concurrent requests to the same endpoint
//! - **Database queries**: Coalesce identical queries issued simultaneously
//!
//! # Example
//!
//! ```
//! use uniflight::Merger;
//!
//! # async fn example() {
//! let merger: Merger<&str, String> = Merger::new();
//!
//! // Multiple concurrent calls with the same key will share a single execution
//! let result = merger
//!     .execute(&"user:123", || async {
//!         // This expensive operation runs only once, even if called concurrently
//!         "expensive_result".to_string()
//!     })
//!     .await;
//! assert_eq!(result.unwrap(), "expensive_result");
//! # }
//! ```
//!
//! # Flight Lifetime
//!
//! A flight lasts from the first call for a key until its work completes. Callers that join
//! while the work is running share its output. Once the output is available the flight is
//! retired, so the next call for the same key starts fresh work: results are never cached.
//!
//! # Cancellation and Panic Safety
//!
//! - If the leader is cancelled or dropped before completing, a waiting follower runs its own
//!   work closure and becomes the new leader.
//! - If the leader's work panics, the panic is caught and every caller of that flight receives
//!   [`LeaderPanicked`]. The panic is not propagated into the callers' tasks.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

use std::{
    collections::HashMap,
    fmt::Debug,
    hash::Hash,
    panic::AssertUnwindSafe,
    sync::{Arc, Weak},
};

use async_once_cell::OnceCell;
use futures_util::FutureExt;
use parking_lot::Mutex;

type Flights<K, T> = Arc<Mutex<HashMap<K, Weak<Flight<T>>>>>;

/// The work of a flight's leader panicked before producing a value.
///
/// Every caller that shared the flight receives this error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("the leader of a coalesced call panicked")]
pub struct LeaderPanicked;

/// Represents a class of work and creates a space in which units of work
/// can be executed with duplicate suppression.
pub struct Merger<K, T> {
    flights: Flights<K, T>,
}

impl<K, T> Default for Merger<K, T> {
    fn default() -> Self {
        Self { flights: Arc::default() }
    }
}

impl<K, T> Debug for Merger<K, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Merger")
            .field("in_flight", &self.flights.lock().len())
            .finish()
    }
}

/// Output slot shared by the leader and followers of one flight.
struct Flight<T> {
    outcome: OnceCell<Result<T, LeaderPanicked>>,
}

/// Membership of one caller in a flight.
///
/// Dropping the ticket retires the flight from the registry once the output is
/// available, or when the last member leaves without anyone producing it.
struct Ticket<K: Hash + Eq, T> {
    flights: Flights<K, T>,
    key: K,
    flight: Arc<Flight<T>>,
}

impl<K: Hash + Eq, T> Drop for Ticket<K, T> {
    fn drop(&mut self) {
        // Joining upgrades under this lock, so the member count cannot grow while we decide.
        let mut flights = self.flights.lock();
        let finished = self.flight.outcome.get().is_some();
        let abandoned = Arc::strong_count(&self.flight) == 1;
        if !finished && !abandoned {
            return;
        }

        let registered = flights
            .get(&self.key)
            .is_some_and(|weak| Weak::ptr_eq(weak, &Arc::downgrade(&self.flight)));
        if registered {
            flights.remove(&self.key);
        }
    }
}

impl<K, T> Merger<K, T>
where
    K: Hash + Eq + Clone,
{
    /// Creates a new `Merger` with no flights in progress.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of keys with work currently in flight.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.lock().values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// Executes `func` for `key` unless the same key is already in flight, in which case the
    /// caller waits for the running work and receives a clone of its output.
    ///
    /// The caller joins the flight when this method is called, not when the returned future is
    /// first polled.
    ///
    /// # Errors
    ///
    /// Returns [`LeaderPanicked`] when the work that produced the shared output panicked.
    pub fn execute<F, Fut>(&self, key: &K, func: F) -> impl Future<Output = Result<T, LeaderPanicked>> + use<K, T, F, Fut>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
        T: Clone,
    {
        let ticket = self.join(key);

        async move {
            let work = AssertUnwindSafe(async move { func().await }).catch_unwind();
            let outcome = ticket
                .flight
                .outcome
                .get_or_init(async move { work.await.map_err(|_payload| LeaderPanicked) })
                .await
                .clone();
            drop(ticket);
            outcome
        }
    }

    fn join(&self, key: &K) -> Ticket<K, T> {
        let mut flights = self.flights.lock();

        let flight = match flights.get(key).and_then(Weak::upgrade) {
            Some(flight) => flight,
            None => {
                let flight = Arc::new(Flight { outcome: OnceCell::new() });
                flights.insert(key.clone(), Arc::downgrade(&flight));
                flight
            }
        };

        Ticket {
            flights: Arc::clone(&self.flights),
            key: key.clone(),
            flight,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn registry_is_empty_after_completion() {
        let merger: Merger<&str, u32> = Merger::new();
        assert_eq!(merger.execute(&"key", || async { 7 }).await, Ok(7));
        assert!(merger.flights.lock().is_empty());
    }

    #[tokio::test]
    async fn registry_is_empty_after_cancellation() {
        let merger: Merger<&str, u32> = Merger::new();
        let fut = merger.execute(&"key", std::future::pending);
        assert_eq!(merger.in_flight(), 1);
        drop(fut);
        assert!(merger.flights.lock().is_empty());
    }

    #[test]
    fn debug_reports_in_flight_count() {
        let merger: Merger<String, String> = Merger::new();
        let debug_str = format!("{merger:?}");
        assert!(debug_str.contains("Merger"));
        assert!(debug_str.contains("in_flight: 0"));
    }
}
