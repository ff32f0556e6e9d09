//! Cadence SDK
//!
//! Contracts implemented by the units the engine drives, and the built-in
//! implementations:
//!
//! - [`Step`]: the unit of work. Runs synchronously, asynchronously (result
//!   delivered later through a callback), or by spawning children.
//! - [`Facilitator`]: decides how a node runs ([`ExecutionMode`]).
//! - [`Adviser`]: decides what happens after a node reached a terminal
//!   status ([`Advise`]).
//!
//! Implementations are looked up by type key in a [`Registry`] built at
//! startup and shared by reference.

pub mod adviser;
mod callback;
mod context;
mod error;
pub mod facilitator;
mod registry;
pub mod step;

pub use adviser::{AdviseEvent, Adviser};
pub use callback::{AsyncCallback, CallbackReceiver, CallbackSender, callback_channel};
pub use context::{StepContext, publish_output};
pub use error::{AdviserError, FacilitatorError, RegistryError, StepError};
pub use facilitator::{FacilitationResult, Facilitator};
pub use registry::Registry;
pub use step::{ChildOutcome, Step, StepOutcome, StepResponse};

pub use cadence_store::{Advise, ExecutionMode, FailureInfo, NodeStatus, OutputScope};

/// Parse typed parameters from a node's JSON payload.
pub(crate) fn parse_parameters<T: serde::de::DeserializeOwned>(
  parameters: &serde_json::Value,
) -> Result<T, serde_json::Error> {
  match parameters {
    serde_json::Value::Null => serde_json::from_value(serde_json::json!({})),
    other => serde_json::from_value(other.clone()),
  }
}
