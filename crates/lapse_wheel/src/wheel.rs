// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::{
    fmt::Debug,
    hash::Hash,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{
    runtime::Handle,
    sync::{mpsc, oneshot},
    time::{self, Instant, MissedTickBehavior},
};

use tracing::Instrument;

use crate::{Error, Result, rescue::rescue, state::WheelState};

type Execute<K, V> = Arc<dyn Fn(K, V) + Send + Sync>;

/// Set and move requests carry the instant they were made at, so that the time spent in the
/// mailbox does not push their deadline back.
enum Request<K, V> {
    Set { key: K, value: V, at: Instant, delay: Duration },
    Move { key: K, at: Instant, delay: Duration },
    Remove { key: K },
    Drain { reply: oneshot::Sender<Vec<(K, V)>> },
    Stop,
}

/// Fires a callback for each scheduled `(key, value)` pair once its delay has elapsed.
///
/// The wheel divides time into `slots` buckets of width `interval` and advances one
/// bucket per tick. A timer fires on the first tick at or after its deadline: never
/// early, and at most one `interval` late. Delays longer than one revolution wrap
/// around the wheel as many times as needed.
///
/// All bookkeeping happens on one background task that owns the wheel's state; the
/// methods on this handle only post requests to it and never block. Due timers of a
/// tick are handed to the callback from a separate task, so a slow callback does not
/// delay the next tick. A panicking callback is logged and does not affect other timers.
///
/// The handle is cheap to clone. The background task ends once [`stop`](Self::stop)
/// is called or every handle has been dropped; pending timers are then discarded.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use lapse_wheel::TimingWheel;
/// use tokio::sync::mpsc;
///
/// # #[tokio::main(flavor = "current_thread", start_paused = true)]
/// # async fn main() -> Result<(), lapse_wheel::Error> {
/// let (fired, mut rx) = mpsc::unbounded_channel();
/// let wheel = TimingWheel::<&'static str, u32>::new(
///     Duration::from_secs(1),
///     60,
///     move |key, value| {
///         let _ = fired.send((key, value));
///     },
/// )?;
///
/// wheel.set_timer("session", 7, Duration::from_secs(5));
/// assert_eq!(rx.recv().await, Some(("session", 7)));
/// # Ok(())
/// # }
/// ```
pub struct TimingWheel<K, V> {
    requests: mpsc::UnboundedSender<Request<K, V>>,
    stopped: Arc<AtomicBool>,
    interval: Duration,
    slots: usize,
}

impl<K, V> Clone for TimingWheel<K, V> {
    fn clone(&self) -> Self {
        Self {
            requests: self.requests.clone(),
            stopped: Arc::clone(&self.stopped),
            interval: self.interval,
            slots: self.slots,
        }
    }
}

impl<K, V> TimingWheel<K, V> {
    /// Returns `true` once [`stop`](Self::stop) has been called on any handle to this wheel.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

impl<K, V> Debug for TimingWheel<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimingWheel")
            .field("interval", &self.interval)
            .field("slots", &self.slots)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

impl<K, V> TimingWheel<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    /// Creates a wheel of `slots` buckets, each `interval` wide, and starts its clock.
    ///
    /// `execute` is called once for every timer that fires.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInterval`] if `interval` is zero, [`Error::InvalidSlots`] if
    /// `slots` is zero and [`Error::NoRuntime`] if called outside of a Tokio runtime.
    pub fn new(
        interval: Duration,
        slots: usize,
        execute: impl Fn(K, V) + Send + Sync + 'static,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::InvalidInterval);
        }
        if slots == 0 {
            return Err(Error::InvalidSlots);
        }
        let runtime = Handle::try_current().map_err(|_runtime_missing| Error::NoRuntime)?;

        let (requests, mailbox) = mpsc::unbounded_channel();
        let state = WheelState::new(interval, slots);
        let start = Instant::now();
        runtime.spawn(run(state, mailbox, start, interval, Arc::new(execute)).in_current_span());

        Ok(Self {
            requests,
            stopped: Arc::new(AtomicBool::new(false)),
            interval,
            slots,
        })
    }

    /// Schedules `value` to be handed to the callback with `key` after `delay`.
    ///
    /// If `key` already has a pending timer, its value is replaced and the timer is moved
    /// instead. Does nothing if `delay` is zero or the wheel has been stopped.
    pub fn set_timer(&self, key: K, value: V, delay: Duration) {
        if !delay.is_zero() {
            self.post(Request::Set {
                key,
                value,
                at: Instant::now(),
                delay,
            });
        }
    }

    /// Reschedules the pending timer of `key` to fire after `delay` from now.
    ///
    /// Does nothing if `key` has no pending timer, `delay` is zero or the wheel has been stopped.
    pub fn move_timer(&self, key: K, delay: Duration) {
        if !delay.is_zero() {
            self.post(Request::Move {
                key,
                at: Instant::now(),
                delay,
            });
        }
    }

    /// Cancels the pending timer of `key`, if there is one.
    pub fn remove_timer(&self, key: K) {
        self.post(Request::Remove { key });
    }

    /// Removes every pending timer, passing each `(key, value)` to `f` instead of the callback.
    ///
    /// Resolves once `f` has been called for all of them. Resolves immediately, without
    /// calling `f`, if the wheel has been stopped.
    pub async fn drain(&self, mut f: impl FnMut(K, V)) {
        let (reply, drained) = oneshot::channel();
        if !self.post(Request::Drain { reply }) {
            return;
        }

        // The loop may stop before answering, in which case there is nothing to hand out.
        if let Ok(entries) = drained.await {
            tracing::debug!(count = entries.len(), "timing wheel drained");
            for (key, value) in entries {
                f(key, value);
            }
        }
    }

    /// Stops the clock permanently. Pending timers never fire and later calls are ignored.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            let _ = self.requests.send(Request::Stop);
            tracing::debug!("timing wheel stopped");
        }
    }

    /// Returns `true` if the request reached the loop.
    fn post(&self, request: Request<K, V>) -> bool {
        !self.is_stopped() && self.requests.send(request).is_ok()
    }
}

async fn run<K, V>(
    mut state: WheelState<K, V>,
    mut mailbox: mpsc::UnboundedReceiver<Request<K, V>>,
    start: Instant,
    interval: Duration,
    execute: Execute<K, V>,
) where
    K: Hash + Eq + Clone + Send + 'static,
    V: Send + 'static,
{
    let mut ticker = time::interval_at(start + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
    let mut last_tick = start;

    loop {
        tokio::select! {
            biased;

            ticked_at = ticker.tick() => {
                last_tick = ticked_at;
                let due = state.on_tick();
                if !due.is_empty() {
                    dispatch(due, &execute);
                }
            }
            request = mailbox.recv() => match request {
                Some(Request::Set { key, value, at, delay }) => {
                    state.set_timer(key, value, since_tick(last_tick, at, delay));
                }
                Some(Request::Move { key, at, delay }) => {
                    state.move_timer(&key, since_tick(last_tick, at, delay));
                }
                Some(Request::Remove { key }) => state.remove_timer(&key),
                Some(Request::Drain { reply }) => {
                    // A caller that gave up waiting loses its entries, like after a stop.
                    let _ = reply.send(state.drain());
                }
                Some(Request::Stop) | None => break,
            },
        }
    }
}

/// Time from `last_tick` to the deadline `delay` after `at`, saturating at both ends.
fn since_tick(last_tick: Instant, at: Instant, delay: Duration) -> Duration {
    at.checked_add(delay)
        .map_or(Duration::MAX, |deadline| deadline.saturating_duration_since(last_tick))
}

fn dispatch<K, V>(due: Vec<(K, V)>, execute: &Execute<K, V>)
where
    K: Send + 'static,
    V: Send + 'static,
{
    let execute = Arc::clone(execute);
    tokio::spawn(
        async move {
            for (key, value) in due {
                rescue(|| execute(key, value));
            }
        }
        .in_current_span(),
    );
}
