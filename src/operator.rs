//! `MultiWorkerOperator`: the generic watch-driven reconciler loop.
//!
//! Patterned on `kube_runtime::controller::runner::Runner` (at-most-one-per-key
//! dispatch), `kube_runtime::reflector::store` (read-mostly cache behind a
//! `parking_lot` lock), and `kube_runtime::watcher` (resync ticks re-enqueue
//! everything known), reimplemented against a mockable store/handler pair so
//! the loop is unit-testable without a live apiserver.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::error::Error;
use crate::scheduler::{Key, WorkQueue};
use crate::store::{ObjectEvent, ObjectStore};
use crate::types::Function;

/// Default resync interval.
pub const DEFAULT_RESYNC_INTERVAL: Duration = Duration::from_secs(600);

/// What a `MultiWorkerOperator` dispatches to for each key.
///
/// `FunctionReconciler` is the only implementation in this crate, but the
/// trait is kept generic so the same operator loop could dispatch any object
/// kind with an equivalent `Handler`.
pub trait Handler: Send + Sync {
    fn create_or_update(&self, function: &Function) -> impl std::future::Future<Output = Result<(), Error>> + Send;
    fn delete(&self, namespace: &str, name: &str) -> impl std::future::Future<Output = Result<(), Error>> + Send;
}

/// Operator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperatorState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

struct Cache {
    objects: RwLock<AHashMap<Key, Function>>,
}

impl Cache {
    fn new() -> Self {
        Cache {
            objects: RwLock::new(AHashMap::new()),
        }
    }

    fn insert(&self, key: Key, function: Function) {
        self.objects.write().insert(key, function);
    }

    fn remove(&self, key: &Key) {
        self.objects.write().remove(key);
    }

    fn get(&self, key: &Key) -> Option<Function> {
        self.objects.read().get(key).cloned()
    }

    fn keys(&self) -> Vec<Key> {
        self.objects.read().keys().cloned().collect()
    }
}

fn key_of(function: &Function) -> Key {
    use kube::ResourceExt;
    (function.namespace().unwrap_or_default(), function.name_any())
}

/// Runs `num_workers` worker loops that drain a deduplicating work queue fed by
/// an `ObjectStore` watch/resync pair, dispatching each key to a `Handler`.
pub struct MultiWorkerOperator<S: ObjectStore + 'static, H: Handler + 'static> {
    store: Arc<S>,
    handler: Arc<H>,
    cache: Arc<Cache>,
    queue: Arc<WorkQueue>,
    namespace: String,
    num_workers: usize,
    resync_interval: Duration,
    state: Arc<parking_lot::Mutex<OperatorState>>,
    workers: Vec<tokio::task::JoinHandle<()>>,
    background: Vec<tokio::task::JoinHandle<()>>,
    /// Cancelled by `stop()` so idle workers return from `queue.pop()` promptly
    /// instead of waiting on work that will never be dispatched. A worker
    /// already inside a handler call finishes that call before observing
    /// cancellation; `stop()`'s drain timeout and forced abort cover the case
    /// where that call never returns on its own.
    shutdown: CancellationToken,
}

impl<S: ObjectStore + 'static, H: Handler + 'static> MultiWorkerOperator<S, H> {
    /// Construct an operator. `num_workers` must be at least 1.
    pub fn new(store: S, handler: H, namespace: impl Into<String>, num_workers: usize, resync_interval: Duration) -> Self {
        assert!(num_workers >= 1, "MultiWorkerOperator requires at least one worker");
        MultiWorkerOperator {
            store: Arc::new(store),
            handler: Arc::new(handler),
            cache: Arc::new(Cache::new()),
            queue: Arc::new(WorkQueue::new()),
            namespace: namespace.into(),
            num_workers,
            resync_interval,
            state: Arc::new(parking_lot::Mutex::new(OperatorState::Stopped)),
            workers: Vec::new(),
            background: Vec::new(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> OperatorState {
        *self.state.lock()
    }

    /// Pending (not-in-flight) work queue depth, for health/metrics hooks.
    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    /// Start the informer, resync ticker, and worker pool. Blocks until the
    /// initial list has populated the cache: starting blocks until the cache is
    /// initially synced.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<(), Error> {
        *self.state.lock() = OperatorState::Starting;
        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        let initial = self.store.list(&self.namespace).await?;
        for function in initial {
            let key = key_of(&function);
            self.cache.insert(key.clone(), function);
            self.queue.enqueue(key);
        }

        let mut watch_stream = self.store.watch(&self.namespace).await?;
        let cache = self.cache.clone();
        let queue = self.queue.clone();
        self.background.push(tokio::spawn(async move {
            use futures::StreamExt;
            while let Some(event) = watch_stream.next().await {
                match event {
                    Ok(ObjectEvent::Upsert(function)) => {
                        let key = key_of(&function);
                        cache.insert(key.clone(), function);
                        queue.enqueue(key);
                    }
                    Ok(ObjectEvent::Delete(function)) => {
                        let key = key_of(&function);
                        cache.remove(&key);
                        queue.enqueue(key);
                    }
                    Err(e) => warn!(error = %e, "watch stream error"),
                }
            }
        }));

        let cache = self.cache.clone();
        let queue = self.queue.clone();
        let resync_interval = self.resync_interval;
        self.background.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(resync_interval);
            ticker.tick().await; // first tick fires immediately; skip it, cache is already fresh
            loop {
                ticker.tick().await;
                for key in cache.keys() {
                    queue.enqueue(key);
                }
            }
        }));

        for worker_id in 0..self.num_workers {
            let queue = self.queue.clone();
            let cache = self.cache.clone();
            let store = self.store.clone();
            let handler = self.handler.clone();
            let shutdown = self.shutdown.clone();
            self.workers.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, cache, store, handler, shutdown).await;
            }));
        }

        *self.state.lock() = OperatorState::Running;
        Ok(())
    }

    /// Signal all workers to stop and wait (bounded) for them to drain. Workers
    /// idle on the queue return immediately once `shutdown` is cancelled; a
    /// worker in the middle of a handler call keeps running until that call
    /// returns. If the drain timeout elapses first, every handle still
    /// outstanding is forcibly aborted.
    pub async fn stop(&mut self, drain_timeout: Duration) {
        *self.state.lock() = OperatorState::Stopping;
        self.shutdown.cancel();
        for handle in self.background.drain(..) {
            handle.abort();
        }
        let mut workers = std::mem::take(&mut self.workers);
        let drain = async {
            for handle in &mut workers {
                let _ = handle.await;
            }
        };
        if tokio::time::timeout(drain_timeout, drain).await.is_err() {
            warn!("worker drain timed out; aborting remaining workers");
            for handle in &workers {
                if !handle.is_finished() {
                    handle.abort();
                }
            }
        }
        *self.state.lock() = OperatorState::Stopped;
    }
}

async fn worker_loop<S: ObjectStore + 'static, H: Handler + 'static>(
    worker_id: usize,
    queue: Arc<WorkQueue>,
    cache: Arc<Cache>,
    _store: Arc<S>,
    handler: Arc<H>,
    shutdown: CancellationToken,
) {
    loop {
        let key = tokio::select! {
            key = queue.pop() => key,
            _ = shutdown.cancelled() => {
                info!(worker_id, "shutdown requested, worker idle and exiting");
                return;
            }
        };
        let result = dispatch(&cache, &handler, &key).await;
        match result {
            Ok(()) => queue.clear_backoff(&key),
            Err(e) => {
                error!(worker_id, namespace = %key.0, name = %key.1, error = %e, "handler failed, requeuing with backoff");
                if e.is_retryable() {
                    queue.requeue_with_backoff(key.clone());
                }
            }
        }
        queue.done(&key);
    }
}

async fn dispatch<H: Handler>(cache: &Cache, handler: &H, key: &Key) -> Result<(), Error> {
    match cache.get(key) {
        Some(function) => {
            info!(namespace = %key.0, name = %key.1, "reconciling");
            handler.create_or_update(&function).await
        }
        None => {
            info!(namespace = %key.0, name = %key.1, "deleting");
            handler.delete(&key.0, &key.1).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::WatchStream;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NeverWatchStore;

    impl ObjectStore for NeverWatchStore {
        async fn list(&self, _namespace: &str) -> Result<Vec<Function>, Error> {
            Ok(vec![Function::new("fn1", Default::default())])
        }
        async fn watch(&self, _namespace: &str) -> Result<WatchStream, Error> {
            use futures::StreamExt;
            Ok(futures::stream::pending().boxed())
        }
        async fn update_status(&self, function: &Function) -> Result<Function, Error> {
            Ok(function.clone())
        }
    }

    struct CountingHandler {
        calls: AtomicUsize,
    }

    impl Handler for CountingHandler {
        async fn create_or_update(&self, _function: &Function) -> Result<(), Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        async fn delete(&self, _namespace: &str, _name: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn start_dispatches_initial_list_to_a_worker() {
        let handler = CountingHandler { calls: AtomicUsize::new(0) };
        let mut op = MultiWorkerOperator::new(NeverWatchStore, handler, "ns", 2, Duration::from_secs(600));
        op.start().await.unwrap();
        // Give the worker a moment to drain the initial enqueue.
        for _ in 0..50 {
            if op.handler.calls.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(op.handler.calls.load(Ordering::SeqCst), 1);
        op.stop(Duration::from_secs(1)).await;
    }

    /// Set when the future holding it is dropped, including by `JoinHandle::abort`
    /// unwinding the task's stack: the only way to observe from the outside that a
    /// worker genuinely stopped running rather than merely being left for dead.
    struct DropFlag(Arc<std::sync::atomic::AtomicBool>);
    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    struct HangingHandler {
        started: Arc<AtomicUsize>,
        dropped: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Handler for HangingHandler {
        async fn create_or_update(&self, _function: &Function) -> Result<(), Error> {
            let _guard = DropFlag(self.dropped.clone());
            self.started.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<()>().await;
            unreachable!("pending future never resolves")
        }
        async fn delete(&self, _namespace: &str, _name: &str) -> Result<(), Error> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn stop_aborts_a_worker_stuck_past_the_drain_timeout() {
        let started = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let handler = HangingHandler {
            started: started.clone(),
            dropped: dropped.clone(),
        };
        let mut op = MultiWorkerOperator::new(NeverWatchStore, handler, "ns", 1, Duration::from_secs(600));
        op.start().await.unwrap();

        for _ in 0..50 {
            if started.load(Ordering::SeqCst) >= 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(started.load(Ordering::SeqCst), 1);

        // The handler never returns, so the drain timeout always elapses; `stop`
        // must still return promptly and the worker must actually be gone.
        let stop_started = tokio::time::Instant::now();
        op.stop(Duration::from_millis(50)).await;
        assert!(stop_started.elapsed() < Duration::from_secs(1));
        assert_eq!(op.state(), OperatorState::Stopped);

        // Give the aborted task's destructors a moment to run.
        for _ in 0..50 {
            if dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(dropped.load(Ordering::SeqCst), "worker stuck in the handler was never aborted");
    }
}
