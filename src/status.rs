//! `StatusWriter` applies a new status onto a `Function`, with
//! error-state fallback.

use tracing::warn;

use crate::error::{self, Error};
use crate::store::ObjectStore;
use crate::types::{Function, FunctionState, FunctionStatus};

/// Applies `Status` documents to `Function` objects via an `ObjectStore`.
pub struct StatusWriter<'a, S: ObjectStore> {
    store: &'a S,
}

impl<'a, S: ObjectStore> StatusWriter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        StatusWriter { store }
    }

    /// Overwrite `function.status` with `status` and persist it. Returns the
    /// store's error verbatim.
    pub async fn set_status(&self, function: &Function, status: FunctionStatus) -> Result<Function, Error> {
        let mut updated = function.clone();
        updated.status = Some(status);
        self.store.update_status(&updated).await
    }

    /// Log at WARN, then attempt to persist `{state, message: stack(err)}`, where
    /// `state` is derived from `Error::error_state()` so the reconcile decision
    /// table and the error-to-state mapping cannot drift apart.
    ///
    /// If the write itself fails, the write failure is logged but the *original*
    /// `err` is what the caller sees, not the bookkeeping failure. A `None`
    /// target (the `UnexpectedObject` case) or an error with no status effect
    /// (`Error::error_state() == None`) short-circuits straight to the
    /// log-and-return path.
    pub async fn set_error(&self, function: Option<&Function>, err: &Error) {
        let Some(state) = err.error_state() else {
            warn!(error = %err, "reconcile failed with no status effect");
            return;
        };
        warn!(error = %err, ?state, "reconcile failed, recording error status");

        let Some(function) = function else {
            return;
        };

        let message = error::stack(&err.to_string(), &[], error::MAX_MESSAGE_FRAMES);
        let status = FunctionStatus::errored(state, message);
        if let Err(write_err) = self.set_status(function, status).await {
            warn!(error = %write_err, "failed to persist error status; surfacing original error to caller");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ObjectEvent, WatchStream};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingStore {
        last_written: Mutex<Option<Function>>,
        fail_update: bool,
    }

    impl ObjectStore for RecordingStore {
        async fn list(&self, _namespace: &str) -> Result<Vec<Function>, Error> {
            Ok(vec![])
        }

        async fn watch(&self, _namespace: &str) -> Result<WatchStream, Error> {
            use futures::StreamExt;
            Ok(futures::stream::empty::<Result<ObjectEvent, Error>>().boxed())
        }

        async fn update_status(&self, function: &Function) -> Result<Function, Error> {
            if self.fail_update {
                return Err(Error::Store("conflict".into()));
            }
            *self.last_written.lock().unwrap() = Some(function.clone());
            Ok(function.clone())
        }
    }

    fn sample() -> Function {
        Function::new("fn1", Default::default())
    }

    #[tokio::test]
    async fn set_error_with_none_target_only_logs() {
        let store = RecordingStore::default();
        let writer = StatusWriter::new(&store);
        writer.set_error(None, &Error::UnexpectedObject).await;
        assert!(store.last_written.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn set_error_writes_state_and_message() {
        let store = RecordingStore::default();
        let writer = StatusWriter::new(&store);
        let f = sample();
        writer.set_error(Some(&f), &Error::Panic("boom".into())).await;
        let written = store.last_written.lock().unwrap().clone().unwrap();
        let status = written.status.unwrap();
        assert_eq!(status.state, Some(FunctionState::Error));
        assert!(status.message.unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn set_error_write_failure_does_not_panic() {
        let store = RecordingStore {
            fail_update: true,
            ..Default::default()
        };
        let writer = StatusWriter::new(&store);
        let f = sample();
        writer.set_error(Some(&f), &Error::Panic("boom".into())).await;
    }

    #[tokio::test]
    async fn set_error_with_no_status_effect_never_writes() {
        let store = RecordingStore::default();
        let writer = StatusWriter::new(&store);
        let f = sample();
        writer
            .set_error(
                Some(&f),
                &Error::InvalidName {
                    name: "x".into(),
                    reason: "bad".into(),
                },
            )
            .await;
        assert!(store.last_written.lock().unwrap().is_none());
    }
}
