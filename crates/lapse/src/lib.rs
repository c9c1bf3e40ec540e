// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! An in-process key/value cache with jittered expiry, optional LRU bounding and coalesced
//! loading.
//!
//! [`Cache`] keeps cloned values in memory for a configurable time to live. Expiry is driven by
//! a [timing wheel](lapse_wheel::TimingWheel), so arming and re-arming a deadline never takes
//! more than a constant amount of work, however many entries are pending.
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use lapse::Cache;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), lapse::Error> {
//! let cache = Cache::builder(Duration::from_secs(300))
//!     .name("profiles")
//!     .limit(10_000)
//!     .build()?;
//!
//! cache.set(1_u64, "alice".to_string());
//! assert_eq!(cache.get(&1), Some("alice".to_string()));
//!
//! // Loads on a miss; concurrent callers for the same key share one load.
//! let bob = cache
//!     .take(&2, || async { Ok::<_, std::io::Error>("bob".to_string()) })
//!     .await?;
//! assert_eq!(bob, "bob");
//!
//! cache.del(&1);
//! assert_eq!(cache.get(&1), None);
//! # Ok(())
//! # }
//! ```
//!
//! # Expiry
//!
//! Each write arms a deadline of the time to live scaled by a random factor between 0.95 and
//! 1.05. Entries are removed on the first wheel tick past their deadline; the tick defaults to
//! one second and can be changed with [`CacheBuilder::tick`].
//!
//! # Statistics
//!
//! Every cache counts hits and misses and logs them at `info` level once per
//! [`stats_interval`](CacheBuilder::stats_interval), in the form
//! `cache(<name>) - qpm: <lookups>, hit_ratio: <percent>%, elements: <size>, hit: <hits>, miss: <misses>`.
//! Windows without lookups are not logged. The current window is available through
//! [`Cache::statistics`].
//!
//! # Features
//!
//! - `serde`: derives `Deserialize` for [`CacheOptions`].

mod builder;
mod cache;
mod error;
mod lru;
mod rnd;
mod stats;

pub use builder::{CacheBuilder, CacheOptions};
pub use cache::Cache;
pub use error::Error;
pub use stats::CacheStatistics;
