// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Delay scheduling building blocks for in-process caches.
//!
//! - [`TimingWheel`] fires a callback for every scheduled `(key, value)` pair once its delay
//!   has elapsed. Timers can be moved, cancelled or drained before they fire, and a single
//!   background task keeps all of them without locking.
//! - [`GenerationalMap`] is the concurrent map the wheel uses to find a key's timer. It keeps
//!   the memory held by deleted entries bounded under heavy churn.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//!
//! use lapse_wheel::TimingWheel;
//!
//! # #[tokio::main(flavor = "current_thread", start_paused = true)]
//! # async fn main() -> Result<(), lapse_wheel::Error> {
//! let wheel = TimingWheel::new(Duration::from_secs(1), 300, |key: u64, token: String| {
//!     println!("session {key} with token {token} expired");
//! })?;
//!
//! wheel.set_timer(1, "a1b2".to_string(), Duration::from_secs(30));
//! wheel.move_timer(1, Duration::from_secs(60));
//! wheel.remove_timer(1);
//!
//! let mut left = Vec::new();
//! wheel.drain(|key, _| left.push(key)).await;
//! assert!(left.is_empty());
//! # Ok(())
//! # }
//! ```
//!
//! # Precision
//!
//! Deadlines are tracked in whole ticks: a timer fires on the first tick at or after
//! `delay` past the moment it was scheduled. It is never early and at most one `interval`
//! late, so choose the interval as the coarsest lateness the application tolerates.

mod error;
mod genmap;
mod rescue;
mod state;
mod wheel;

pub use error::{Error, Result};
pub use genmap::GenerationalMap;
pub use wheel::TimingWheel;
