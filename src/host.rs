//! `ControllerHost` wires an `ObjectStore`, a `ResourceClient`, and
//! configuration into a running operator.

use std::time::Duration;

use kube::Client;

use crate::operator::{MultiWorkerOperator, OperatorState, DEFAULT_RESYNC_INTERVAL};
use crate::reconciler::FunctionReconciler;
use crate::resources::ResourceClient;
use crate::store::KubeObjectStore;

/// Process-level configuration, passed by value at construction; no
/// process-wide singletons.
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    pub namespace: String,
    pub resync_interval: Duration,
    pub num_workers: usize,
    pub image_pull_secrets: String,
    /// Bound on how long `stop()` waits for workers to drain before forcing
    /// shutdown.
    pub drain_timeout: Duration,
}

impl ControllerConfig {
    pub fn new(namespace: impl Into<String>) -> Self {
        ControllerConfig {
            namespace: namespace.into(),
            resync_interval: DEFAULT_RESYNC_INTERVAL,
            num_workers: 4,
            image_pull_secrets: String::new(),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

/// Embeds a running `Function` reconciliation controller in a host process.
pub struct ControllerHost<R: ResourceClient + 'static> {
    operator: MultiWorkerOperator<KubeObjectStore, FunctionReconciler<KubeObjectStore, R>>,
    drain_timeout: Duration,
}

impl<R: ResourceClient + 'static> ControllerHost<R> {
    pub fn new(client: Client, resource_client: R, config: ControllerConfig) -> Self {
        let store = KubeObjectStore::new(client);
        let reconciler = FunctionReconciler::new(store.clone(), resource_client, config.image_pull_secrets.clone());
        let operator = MultiWorkerOperator::new(store, reconciler, config.namespace, config.num_workers, config.resync_interval);
        ControllerHost {
            operator,
            drain_timeout: config.drain_timeout,
        }
    }

    /// Non-blocking: spawns the worker pool and background tasks, returning
    /// once the cache has initially synced.
    pub async fn start(&mut self) -> Result<(), crate::error::Error> {
        self.operator.start().await
    }

    /// Graceful drain, bounded by the configured `drain_timeout`.
    pub async fn stop(&mut self) {
        self.operator.stop(self.drain_timeout).await;
    }

    pub fn state(&self) -> OperatorState {
        self.operator.state()
    }

    pub fn queue_depth(&self) -> usize {
        self.operator.queue_depth()
    }
}
