//! A deduplicating, backoff-aware work queue keyed by `(namespace, name)`.
//!
//! Reimplements the design of `kube_runtime::scheduler::Scheduler` (debounce-free
//! here, since resync/backoff re-enqueues are naturally idempotent for this
//! controller) and `kube_runtime::controller::runner::Runner` (at-most-one
//! in-flight future per key), but against a plain `Key` type instead of
//! `kube::Api`, so the operator can run against an injected, mockable
//! `ObjectStore` in tests.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

/// The dedup key the queue and cache are indexed by: `(namespace, name)`.
pub type Key = (String, String);

/// Base delay for the first backoff retry.
pub const BACKOFF_BASE: Duration = Duration::from_millis(5);
/// Cap on how long a backoff delay may grow to.
pub const BACKOFF_CAP: Duration = Duration::from_secs(1000);

type BackoffIter = Box<dyn Iterator<Item = Duration> + Send>;

fn new_backoff() -> BackoffIter {
    Box::new(
        ExponentialBuilder::default()
            .with_min_delay(BACKOFF_BASE)
            .with_max_delay(BACKOFF_CAP)
            .with_factor(2.0)
            .without_max_times()
            .build(),
    )
}

struct State {
    /// Keys due to run, at their scheduled instant.
    scheduled: HashMap<Key, Instant>,
    /// Keys currently checked out by a worker; held back out of `scheduled` pops
    /// until the worker calls `done`, enforcing "at most one in-flight per key"
    /// (at most one worker may hold a key at a time).
    processing: HashSet<Key>,
    /// Per-key backoff generator, reset on success.
    backoff: HashMap<Key, BackoffIter>,
}

/// The operator's work queue: enqueue on watch events and resync ticks, pop in
/// workers, requeue with backoff on handler failure.
pub struct WorkQueue {
    state: Mutex<State>,
    notify: Notify,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        WorkQueue {
            state: Mutex::new(State {
                scheduled: HashMap::new(),
                processing: HashSet::new(),
                backoff: HashMap::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueue `key` to run immediately (add/update/delete events, resync ticks).
    pub fn enqueue(&self, key: Key) {
        self.enqueue_at(key, Instant::now());
    }

    fn enqueue_at(&self, key: Key, run_at: Instant) {
        {
            let mut state = self.state.lock();
            let sooner = state
                .scheduled
                .get(&key)
                .map(|existing| run_at < *existing)
                .unwrap_or(true);
            if sooner {
                state.scheduled.insert(key, run_at);
            }
        }
        self.notify.notify_waiters();
    }

    /// Requeue `key` after a handler failure, applying the next exponential
    /// backoff delay for that key.
    pub fn requeue_with_backoff(&self, key: Key) {
        let delay = {
            let mut state = self.state.lock();
            let iter = state.backoff.entry(key.clone()).or_insert_with(new_backoff);
            iter.next().unwrap_or(BACKOFF_CAP)
        };
        self.enqueue_at(key, Instant::now() + delay);
    }

    /// Drop any backoff state for `key` after a successful handler run.
    pub fn clear_backoff(&self, key: &Key) {
        self.state.lock().backoff.remove(key);
    }

    /// Pop the next key whose scheduled time has elapsed and which is not
    /// already being processed, marking it processing. Blocks until one is
    /// available.
    pub async fn pop(&self) -> Key {
        loop {
            let wait = {
                let mut state = self.state.lock();
                let now = Instant::now();

                let mut earliest_ready: Option<(Key, Instant)> = None;
                let mut earliest_pending: Option<Instant> = None;
                for (k, at) in state.scheduled.iter() {
                    if state.processing.contains(k) {
                        continue;
                    }
                    if *at <= now {
                        if earliest_ready.as_ref().map(|(_, best)| *at < *best).unwrap_or(true) {
                            earliest_ready = Some((k.clone(), *at));
                        }
                    } else {
                        earliest_pending = Some(earliest_pending.map_or(*at, |best| best.min(*at)));
                    }
                }

                if let Some((key, _)) = earliest_ready {
                    state.scheduled.remove(&key);
                    state.processing.insert(key.clone());
                    return key;
                }
                earliest_pending
            };
            match wait {
                Some(at) => {
                    let sleep = tokio::time::sleep_until(at);
                    tokio::select! {
                        _ = sleep => {},
                        _ = self.notify.notified() => {},
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    /// Mark `key` no longer in flight. Coalesces: if another enqueue arrived for
    /// this key while it was processing, it remains scheduled and will be popped
    /// again (preserving at-most-one-in-flight and per-key ordering).
    pub fn done(&self, key: &Key) {
        self.state.lock().processing.remove(key);
        self.notify.notify_waiters();
    }

    /// Current number of keys pending (scheduled, not in flight), an
    /// observability hook.
    pub fn depth(&self) -> usize {
        self.state.lock().scheduled.len()
    }
}
