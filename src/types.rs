//! The `Function` custom resource: spec, status, and the small enumerations that
//! drive the reconciler's decision table.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Annotation key whose truthy presence means "do not materialize resources"
/// ("skip-deploy" marker).
pub const SKIP_DEPLOY_ANNOTATION: &str = "serving.example.dev/skip-deploy";

/// Name of the service port the controller treats as the function's externally
/// exposed HTTP port.
pub const CONTAINER_HTTP_PORT_NAME: &str = "http";

/// Readiness timeout used when `spec.readinessTimeoutSeconds` is absent or `0`.
pub const DEFAULT_READINESS_TIMEOUT_SECONDS: u32 = 120;

/// A deployable unit of code, reconciled by this controller.
///
/// Only `readinessTimeoutSeconds` is meaningful to the core ("opaque to the
/// core except for..."); everything else in `spec` is passed through untouched to
/// `ResourceClient` by the embedder.
#[derive(CustomResource, Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "serving.example.dev",
    version = "v1",
    kind = "Function",
    namespaced,
    shortname = "fn",
    status = "FunctionStatus",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct FunctionSpec {
    /// Bound, in seconds, on how long `ResourceClient::wait_available` may block.
    /// `None` or `Some(0)` both mean "use [`DEFAULT_READINESS_TIMEOUT_SECONDS`]".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readiness_timeout_seconds: Option<u32>,

    /// Free-form payload describing the deployable unit (image, env, resources,
    /// trigger bindings, ...). Opaque to the core; templated by `ResourceClient`.
    #[serde(default)]
    pub runtime: serde_json::Value,
}

impl FunctionSpec {
    /// Resolve the effective readiness timeout, applying the "0/absent means
    /// default" rule.
    pub fn effective_readiness_timeout_seconds(&self) -> u32 {
        match self.readiness_timeout_seconds {
            None | Some(0) => DEFAULT_READINESS_TIMEOUT_SECONDS,
            Some(secs) => secs,
        }
    }
}

/// The mutable status sub-document owned exclusively by the controller; `spec`
/// is never mutated by the core.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FunctionStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<FunctionState>,

    /// Free-form message; error stacks are bounded to
    /// [`crate::error::MAX_MESSAGE_FRAMES`] frames before being stored here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Node-exposed port of the child service, or `0` if the service exposes no
    /// `http` port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_port: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_to_zero: Option<ScaleToZeroStatus>,
}

impl FunctionStatus {
    /// Build the status document for a successful scale-lifecycle finalization.
    /// This always replaces the whole document: finalization never merges onto
    /// a prior status, so stale `message`/`logs` fields never linger.
    pub fn finalized(state: FunctionState, http_port: u32, scale_to_zero: ScaleToZeroStatus) -> Self {
        FunctionStatus {
            state: Some(state),
            message: None,
            http_port: Some(http_port),
            scale_to_zero: Some(scale_to_zero),
        }
    }

    /// Build an error/unhealthy status, preserving neither the previous message
    /// nor scale-lifecycle data.
    pub fn errored(state: FunctionState, message: String) -> Self {
        FunctionStatus {
            state: Some(state),
            message: Some(message),
            http_port: None,
            scale_to_zero: None,
        }
    }

    /// Build the `Imported` status written on the skip-deploy path.
    pub fn imported() -> Self {
        FunctionStatus {
            state: Some(FunctionState::Imported),
            ..Default::default()
        }
    }
}

/// Scale-to-zero bookkeeping: the last lifecycle event the controller stamped and
/// when.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ScaleToZeroStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_event: Option<ScaleEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_event_time: Option<chrono::DateTime<chrono::Utc>>,
}

/// Tagged enumeration of function lifecycle states.
///
/// Only the five "waiting/ready/scaled" variants are acted on by the reconciler;
/// the rest exist because the broader ecosystem (builders, importers, ...) writes
/// them, and a `Function` the controller has never heard of must still
/// deserialize cleanly.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum FunctionState {
    WaitingForResourceConfiguration,
    WaitingForScaleResourcesFromZero,
    WaitingForScaleResourcesToZero,
    Ready,
    ScaledToZero,
    Imported,
    Error,
    Unhealthy,
    Building,
}

impl FunctionState {
    /// States the reconciler responds to; everything else is a documented no-op.
    pub fn is_actionable(self) -> bool {
        matches!(
            self,
            FunctionState::WaitingForResourceConfiguration
                | FunctionState::WaitingForScaleResourcesFromZero
                | FunctionState::WaitingForScaleResourcesToZero
                | FunctionState::Ready
                | FunctionState::ScaledToZero
        )
    }

    /// Whether this is one of the three `Waiting*` states that must pass through
    /// the scale-event finalization step.
    pub fn is_waiting(self) -> bool {
        matches!(
            self,
            FunctionState::WaitingForResourceConfiguration
                | FunctionState::WaitingForScaleResourcesFromZero
                | FunctionState::WaitingForScaleResourcesToZero
        )
    }

    /// The `(ScaleEvent, FunctionState)` a successful finalization writes, per the
    /// mapping below.
    pub fn finalization(self) -> Option<(ScaleEvent, FunctionState)> {
        match self {
            FunctionState::WaitingForScaleResourcesToZero => {
                Some((ScaleEvent::ScaleToZeroCompleted, FunctionState::ScaledToZero))
            }
            FunctionState::WaitingForScaleResourcesFromZero => {
                Some((ScaleEvent::ScaleFromZeroCompleted, FunctionState::Ready))
            }
            FunctionState::WaitingForResourceConfiguration => {
                Some((ScaleEvent::ResourceUpdated, FunctionState::Ready))
            }
            _ => None,
        }
    }
}

/// Tagged enumeration of scale-lifecycle events this controller stamps.
///
/// `Other` preserves any variant written by the broader ecosystem that this core
/// does not itself emit, so a `Function` round-trips even if some other component
/// stamped an event this crate doesn't know about.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum ScaleEvent {
    Known(KnownScaleEvent),
    Other(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum KnownScaleEvent {
    ScaleToZeroCompleted,
    ScaleFromZeroCompleted,
    ResourceUpdated,
}

impl ScaleEvent {
    pub const ScaleToZeroCompleted: ScaleEvent = ScaleEvent::Known(KnownScaleEvent::ScaleToZeroCompleted);
    pub const ScaleFromZeroCompleted: ScaleEvent = ScaleEvent::Known(KnownScaleEvent::ScaleFromZeroCompleted);
    pub const ResourceUpdated: ScaleEvent = ScaleEvent::Known(KnownScaleEvent::ResourceUpdated);
}
