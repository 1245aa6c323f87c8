//! Crate-wide error type and panic-stack capture.

use std::time::Duration;

use crate::types::FunctionState;

/// Bound on how many frames a captured stack/cause chain keeps.
pub const MAX_MESSAGE_FRAMES: usize = 10;

/// Errors surfaced by the controller's components.
///
/// Each variant corresponds to one row of the error-kind table in the
/// specification: it carries both the retry semantics (handled by the caller via
/// requeue) and the status effect (`error_state`).
#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    /// The watched object could not be downcast to a `Function`.
    #[error("object is not a Function")]
    UnexpectedObject,

    /// `metadata.name` failed the qualified-name rule.
    #[error("invalid function name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// `ResourceClient::create_or_update` failed.
    #[error("failed to provision resources: {0}")]
    ResourceProvisionFailed(String),

    /// `ResourceClient::wait_available` did not return in time.
    #[error("readiness wait timed out after {0:?}")]
    ReadinessTimeout(Duration),

    /// `ResourceClient::wait_available` returned an error before the deadline.
    #[error("readiness check failed: {0}")]
    ReadinessFailed(String),

    /// `StatusWriter` failed to persist a status update.
    #[error("failed to write status: {0}")]
    StatusWriteFailed(String),

    /// A handler invocation panicked; the stack was captured and the worker
    /// continued.
    #[error("reconcile panicked: {0}")]
    Panic(String),

    /// The underlying object store returned an error (list/watch/update).
    #[error("object store error: {0}")]
    Store(String),
}

impl Error {
    /// The `FunctionState` a `StatusWriter::setError` call should record for this
    /// error, or `None` if the error must not touch status at all (invalid names
    /// and status-write failures never mutate status themselves).
    pub fn error_state(&self) -> Option<FunctionState> {
        match self {
            Error::UnexpectedObject => Some(FunctionState::Error),
            Error::InvalidName { .. } => None,
            Error::ResourceProvisionFailed(_) => Some(FunctionState::Error),
            Error::ReadinessTimeout(_) | Error::ReadinessFailed(_) => Some(FunctionState::Unhealthy),
            Error::StatusWriteFailed(_) => None,
            Error::Panic(_) => Some(FunctionState::Error),
            Error::Store(_) => None,
        }
    }

    /// Whether the operator's work queue should requeue the key with backoff after
    /// this error (every kind but `InvalidName` is retryable).
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Error::InvalidName { .. })
    }
}

/// Render a captured panic payload and an optional cause chain into a bounded,
/// human-readable stack message.
///
/// `depth` bounds how many `source()` frames are appended after the top-level
/// message, so a misbehaving error chain can never grow the stored status message
/// without bound.
pub fn stack(top: &str, causes: &[String], depth: usize) -> String {
    let mut frames = Vec::with_capacity(1 + causes.len().min(depth));
    frames.push(top.to_string());
    for cause in causes.iter().take(depth.saturating_sub(1)) {
        frames.push(cause.clone());
    }
    frames.join("\ncaused by: ")
}

/// Extract a printable message from a `std::panic` payload, the way
/// `std::panic::catch_unwind`'s `Box<dyn Any + Send>` is conventionally unpacked.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
