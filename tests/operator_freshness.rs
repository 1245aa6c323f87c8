//! A handler observing version V never writes a status derived from a
//! strictly older cached version. The cache always hands the worker whatever is
//! currently stored for the key, so a second update that lands while the first
//! is in flight must be the one eventually reconciled from.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use function_controller::error::Error;
use function_controller::operator::{Handler, MultiWorkerOperator};
use function_controller::store::{ObjectEvent, ObjectStore, WatchStream};
use function_controller::types::{Function, FunctionSpec, FunctionStatus};
use kube::{Resource, ResourceExt};
use tokio::sync::mpsc;

struct FakeStore {
    initial: parking_lot::Mutex<Vec<Function>>,
    events: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<ObjectEvent>>>,
}

impl FakeStore {
    fn new(initial: Function) -> (Self, mpsc::UnboundedSender<ObjectEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            FakeStore {
                initial: parking_lot::Mutex::new(vec![initial]),
                events: parking_lot::Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl ObjectStore for FakeStore {
    async fn list(&self, _namespace: &str) -> Result<Vec<Function>, Error> {
        Ok(std::mem::take(&mut self.initial.lock()))
    }
    async fn watch(&self, _namespace: &str) -> Result<WatchStream, Error> {
        use futures::StreamExt;
        let rx = self.events.lock().take().expect("watch called once");
        Ok(tokio_stream::wrappers::UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }
    async fn update_status(&self, function: &Function) -> Result<Function, Error> {
        Ok(function.clone())
    }
}

fn tagged(tag: u32) -> Function {
    let mut f = Function::new(
        "fn1",
        FunctionSpec {
            readiness_timeout_seconds: Some(tag), // smuggle the "version" through a spec field
            runtime: serde_json::Value::Null,
        },
    );
    f.meta_mut().namespace = Some("ns".into());
    f.status = Some(FunctionStatus::default());
    f
}

struct RecordingHandler {
    last_seen_version: std::sync::Mutex<u32>,
    saw_stale_after_fresh: AtomicUsize,
    calls: AtomicUsize,
}

impl Handler for RecordingHandler {
    async fn create_or_update(&self, function: &Function) -> Result<(), Error> {
        let version = function.spec.readiness_timeout_seconds.unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(15)).await;
        let mut last = self.last_seen_version.lock().unwrap();
        if version < *last {
            self.saw_stale_after_fresh.fetch_add(1, Ordering::SeqCst);
        }
        *last = version.max(*last);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn delete(&self, _ns: &str, _n: &str) -> Result<(), Error> {
        Ok(())
    }
}

struct HandlerRef(Arc<RecordingHandler>);
impl Handler for HandlerRef {
    async fn create_or_update(&self, function: &Function) -> Result<(), Error> {
        self.0.create_or_update(function).await
    }
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.0.delete(namespace, name).await
    }
}

#[tokio::test]
async fn never_processes_an_older_version_after_a_newer_one() {
    let (store, tx) = FakeStore::new(tagged(1));

    let handler = Arc::new(RecordingHandler {
        last_seen_version: std::sync::Mutex::new(0),
        saw_stale_after_fresh: AtomicUsize::new(0),
        calls: AtomicUsize::new(0),
    });

    let mut op = MultiWorkerOperator::new(store, HandlerRef(handler.clone()), "ns", 2, Duration::from_secs(600));
    op.start().await.unwrap();

    // Let the first (version 1) reconcile start, then push fresher versions
    // into the cache before it finishes.
    tokio::time::sleep(Duration::from_millis(5)).await;
    for version in 2..=5 {
        tx.send(ObjectEvent::Upsert(tagged(version))).unwrap();
    }

    for _ in 0..200 {
        if handler.calls.load(Ordering::SeqCst) >= 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    op.stop(Duration::from_secs(1)).await;

    assert!(handler.calls.load(Ordering::SeqCst) >= 2);
    assert_eq!(handler.saw_stale_after_fresh.load(Ordering::SeqCst), 0);
    // The coalesced second round must have observed the *latest* pushed
    // version (5), not an intermediate one: only the newest cached value is
    // ever handed to a worker.
    assert_eq!(*handler.last_seen_version.lock().unwrap(), 5);
}
