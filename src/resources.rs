//! The `ResourceClient` boundary: create/update/wait/delete of the child
//! runtime resources a `Function` maps to.
//!
//! The actual templating of workload/service/ingress/config-blob resources is out
//! of scope here; this module defines only the interface and the value types the
//! reconciler reads back (`Resources`, `ServiceSpec`), plus a small in-memory
//! implementation used by tests and as a worked example for a real backend.

use std::future::Future;
use std::time::Duration;

use kube::ResourceExt;
use tracing::instrument;

use crate::error::Error;
use crate::types::{Function, CONTAINER_HTTP_PORT_NAME};

/// A single named port on the child service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicePort {
    pub name: String,
    pub node_port: u32,
}

/// The subset of the child `Service`'s shape the reconciler needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceSpec {
    pub ports: Vec<ServicePort>,
}

impl ServiceSpec {
    /// Scan for the node port of [`CONTAINER_HTTP_PORT_NAME`], or `0` if absent
    /// when materializing the finalized status.
    pub fn http_node_port(&self) -> u32 {
        self.ports
            .iter()
            .find(|p| p.name == CONTAINER_HTTP_PORT_NAME)
            .map(|p| p.node_port)
            .unwrap_or(0)
    }
}

/// Opaque handle returned by [`ResourceClient::create_or_update`].
#[derive(Clone, Debug, Default)]
pub struct Resources {
    service: Option<ServiceSpec>,
}

impl Resources {
    pub fn new(service: Option<ServiceSpec>) -> Self {
        Resources { service }
    }

    /// The child service, if one was materialized for this function.
    pub fn service(&self) -> Option<&ServiceSpec> {
        self.service.as_ref()
    }
}

/// Create/update/wait/delete of the runtime resources backing a `Function`.
///
/// All three mutating operations must be idempotent.
pub trait ResourceClient: Send + Sync {
    /// Materialize or update the child resources for `function`. Idempotent.
    fn create_or_update(
        &self,
        function: &Function,
        image_pull_secrets: &str,
    ) -> impl Future<Output = Result<Resources, Error>> + Send;

    /// Block until the child resources report ready, or until `timeout` elapses
    /// (a suspension point in the reconcile hot path).
    fn wait_available(
        &self,
        namespace: &str,
        name: &str,
        timeout: Duration,
    ) -> impl Future<Output = Result<(), Error>> + Send;

    /// Tear down the child resources. Idempotent: deleting a function with no
    /// remaining resources is success.
    fn delete(&self, namespace: &str, name: &str) -> impl Future<Output = Result<(), Error>> + Send;
}

/// An in-memory `ResourceClient` used by unit/integration tests and as a
/// template for a real templating backend.
///
/// Every function "becomes ready" instantly unless explicitly configured
/// otherwise via [`InMemoryResourceClient::fail_create`],
/// [`InMemoryResourceClient::fail_wait`], or
/// [`InMemoryResourceClient::delay_wait`].
#[derive(Default)]
pub struct InMemoryResourceClient {
    inner: parking_lot::Mutex<InMemoryState>,
}

#[derive(Default)]
struct InMemoryState {
    services: std::collections::HashMap<(String, String), ServiceSpec>,
    fail_create: Option<String>,
    fail_wait: Option<String>,
    wait_delay: Option<Duration>,
}

impl InMemoryResourceClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the service that `create_or_update` should hand back for
    /// `(namespace, name)`.
    pub fn set_service(&self, namespace: &str, name: &str, service: ServiceSpec) {
        self.inner
            .lock()
            .services
            .insert((namespace.to_string(), name.to_string()), service);
    }

    /// Make the next `create_or_update` call fail with `message`.
    pub fn fail_create(&self, message: impl Into<String>) {
        self.inner.lock().fail_create = Some(message.into());
    }

    /// Make the next `wait_available` call fail with `message`.
    pub fn fail_wait(&self, message: impl Into<String>) {
        self.inner.lock().fail_wait = Some(message.into());
    }

    /// Make `wait_available` sleep for `delay` before succeeding, to exercise
    /// readiness-timeout behavior (S3).
    pub fn delay_wait(&self, delay: Duration) {
        self.inner.lock().wait_delay = Some(delay);
    }
}

impl ResourceClient for InMemoryResourceClient {
    #[instrument(skip(self, function))]
    async fn create_or_update(&self, function: &Function, _image_pull_secrets: &str) -> Result<Resources, Error> {
        let (fail, service) = {
            let mut state = self.inner.lock();
            let fail = state.fail_create.take();
            let namespace = function.namespace().unwrap_or_default();
            let name = function.name_any();
            let service = state.services.get(&(namespace, name)).cloned();
            (fail, service)
        };
        if let Some(message) = fail {
            return Err(Error::ResourceProvisionFailed(message));
        }
        Ok(Resources::new(service))
    }

    #[instrument(skip(self))]
    async fn wait_available(&self, _namespace: &str, _name: &str, timeout: Duration) -> Result<(), Error> {
        let (fail, delay) = {
            let mut state = self.inner.lock();
            (state.fail_wait.take(), state.wait_delay.take())
        };
        if let Some(delay) = delay {
            if delay > timeout {
                tokio::time::sleep(timeout).await;
                return Err(Error::ReadinessTimeout(timeout));
            }
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = fail {
            return Err(Error::ReadinessFailed(message));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.inner
            .lock()
            .services
            .remove(&(namespace.to_string(), name.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_node_port_scans_by_name() {
        let spec = ServiceSpec {
            ports: vec![
                ServicePort { name: "metrics".into(), node_port: 9090 },
                ServicePort { name: "http".into(), node_port: 30080 },
            ],
        };
        assert_eq!(spec.http_node_port(), 30080);
    }

    #[test]
    fn http_node_port_absent_is_zero() {
        let spec = ServiceSpec { ports: vec![] };
        assert_eq!(spec.http_node_port(), 0);
    }

    #[tokio::test]
    async fn in_memory_delete_is_idempotent() {
        let client = InMemoryResourceClient::new();
        client.delete("ns", "missing").await.unwrap();
        client.delete("ns", "missing").await.unwrap();
    }
}
