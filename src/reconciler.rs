//! `FunctionReconciler`: the pure per-object decision function.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use futures::FutureExt;
use kube::{Resource, ResourceExt};
use tracing::instrument;

use crate::error::{self, Error};
use crate::operator::Handler;
use crate::resources::ResourceClient;
use crate::scale::{Clock, ScaleEventSink, WallClock};
use crate::status::StatusWriter;
use crate::store::ObjectStore;
use crate::types::{Function, FunctionState, FunctionStatus, SKIP_DEPLOY_ANNOTATION};
use crate::validate;

/// Implements the `CreateOrUpdate`/`Delete` decision table.
///
/// Holds no store/resource handles of its own beyond what's passed in at
/// construction; it delegates every write to `ObjectStore` (via `StatusWriter`)
/// and every child-resource operation to `ResourceClient` ("no direct store
/// access").
pub struct FunctionReconciler<S: ObjectStore, R: ResourceClient, C: Clock = WallClock> {
    store: S,
    resources: R,
    scale_events: ScaleEventSink<C>,
    image_pull_secrets: String,
}

impl<S: ObjectStore, R: ResourceClient> FunctionReconciler<S, R, WallClock> {
    pub fn new(store: S, resources: R, image_pull_secrets: impl Into<String>) -> Self {
        FunctionReconciler {
            store,
            resources,
            scale_events: ScaleEventSink::new(),
            image_pull_secrets: image_pull_secrets.into(),
        }
    }
}

impl<S: ObjectStore, R: ResourceClient, C: Clock> FunctionReconciler<S, R, C> {
    pub fn with_clock(store: S, resources: R, image_pull_secrets: impl Into<String>, clock: C) -> Self {
        FunctionReconciler {
            store,
            resources,
            scale_events: ScaleEventSink::with_clock(clock),
            image_pull_secrets: image_pull_secrets.into(),
        }
    }

    fn status_writer(&self) -> StatusWriter<'_, S> {
        StatusWriter::new(&self.store)
    }

    /// The full `CreateOrUpdate` decision table, wrapped in a panic boundary so
    /// a single malformed object cannot crash the worker.
    #[instrument(skip(self, function), fields(namespace = function.namespace(), name = function.name_any()))]
    pub async fn create_or_update(&self, function: &Function) -> Result<(), Error> {
        let outcome = AssertUnwindSafe(self.create_or_update_inner(function)).catch_unwind().await;
        match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = error::panic_message(&*payload);
                tracing::error!(namespace = function.namespace(), name = function.name_any(), panic = %message, "reconcile panicked");
                let stacked = error::stack(&message, &[], error::MAX_MESSAGE_FRAMES);
                self.status_writer().set_error(Some(function), &Error::Panic(stacked)).await;
                Err(Error::Panic(message))
            }
        }
    }

    async fn create_or_update_inner(&self, function: &Function) -> Result<(), Error> {
        let name = function.name_any();
        if let Err(e) = validate::validate_name(&name) {
            // invalid names never touch status.
            return Err(e);
        }

        let state = match function.status.as_ref().and_then(|s| s.state) {
            Some(state) => state,
            None => return Ok(()), // no status yet: nothing to act on
        };

        if !state.is_actionable() {
            return Ok(());
        }

        if skip_deploy(function) {
            self.status_writer()
                .set_status(function, FunctionStatus::imported())
                .await
                .map_err(|e| Error::StatusWriteFailed(e.to_string()))?;
            return Ok(());
        }

        self.provision(function, state).await
    }

    async fn provision(&self, function: &Function, state: FunctionState) -> Result<(), Error> {
        let resources = match self.resources.create_or_update(function, &self.image_pull_secrets).await {
            Ok(resources) => resources,
            Err(e) => {
                let err = Error::ResourceProvisionFailed(e.to_string());
                self.status_writer().set_error(Some(function), &err).await;
                return Err(err);
            }
        };

        let timeout = Duration::from_secs(u64::from(function.spec.effective_readiness_timeout_seconds()));
        let namespace = function.namespace().unwrap_or_default();
        let name = function.name_any();
        if let Err(e) = self.resources.wait_available(&namespace, &name, timeout).await {
            let err = match e {
                Error::ReadinessTimeout(_) => Error::ReadinessTimeout(timeout),
                other => other,
            };
            self.status_writer().set_error(Some(function), &err).await;
            return Err(err);
        }

        if !state.is_waiting() {
            // Ready/ScaledToZero: resources reconciled quietly, no status churn.
            return Ok(());
        }

        let (event, final_state) = state
            .finalization()
            .expect("is_waiting states always have a finalization mapping");
        let http_port = resources.service().map(ServiceSpecExt::http_node_port).unwrap_or(0);
        let scale_to_zero = self.scale_events.stamp(event);
        let status = FunctionStatus::finalized(final_state, http_port, scale_to_zero);

        self.status_writer()
            .set_status(function, status)
            .await
            .map_err(|e| Error::StatusWriteFailed(e.to_string()))?;
        Ok(())
    }

    /// Idempotent teardown.
    pub async fn delete(&self, namespace: &str, name: &str) -> Result<(), Error> {
        self.resources.delete(namespace, name).await
    }
}

// Small seam so `provision` doesn't need to know the concrete `ServiceSpec` type
// directly; kept local rather than exported since it's purely an ergonomic
// adapter over `resources::ServiceSpec::http_node_port`.
trait ServiceSpecExt {
    fn http_node_port(&self) -> u32;
}

impl ServiceSpecExt for crate::resources::ServiceSpec {
    fn http_node_port(&self) -> u32 {
        crate::resources::ServiceSpec::http_node_port(self)
    }
}

fn skip_deploy(function: &Function) -> bool {
    function
        .annotations()
        .get(SKIP_DEPLOY_ANNOTATION)
        .map(|v| validate::annotation_is_truthy(v))
        .unwrap_or(false)
}

impl<S: ObjectStore, R: ResourceClient, C: Clock> Handler for FunctionReconciler<S, R, C> {
    fn create_or_update(&self, function: &Function) -> impl Future<Output = Result<(), Error>> + Send {
        FunctionReconciler::create_or_update(self, function)
    }

    fn delete(&self, namespace: &str, name: &str) -> impl Future<Output = Result<(), Error>> + Send {
        FunctionReconciler::delete(self, namespace, name)
    }
}
