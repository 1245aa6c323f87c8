//! Function reconciliation controller.
//!
//! Watches `Function` custom resources and drives the runtime resources they
//! describe (workload, service, ingress, configuration) toward the declared
//! state, finalizing scale-to/from-zero transitions along the way. Embedded in a
//! larger process via [`host::ControllerHost`].

pub mod error;
pub mod host;
pub mod operator;
pub mod reconciler;
pub mod resources;
pub mod scale;
pub mod scheduler;
pub mod status;
pub mod store;
pub mod types;
pub mod validate;

pub use error::Error;
pub use host::{ControllerConfig, ControllerHost};
pub use types::{Function, FunctionSpec, FunctionState, FunctionStatus, ScaleEvent};
