//! Advisers decide what happens after a node reached a terminal status.
//!
//! A node may bind several advisers. They are consulted in binding order and
//! the first one whose [`Adviser::can_advise`] accepts the event produces the
//! [`Advise`]. Advisers only read the event; applying the advise is the
//! engine's job.

mod end_plan;
mod on_fail;
mod on_success;
mod response_code_switch;
mod retry;

pub use end_plan::EndPlanAdviser;
pub use on_fail::OnFailAdviser;
pub use on_success::OnSuccessAdviser;
pub use response_code_switch::ResponseCodeSwitchAdviser;
pub use retry::{RepairAction, RetryAdviser};

use std::collections::BTreeMap;

use cadence_ambiance::Ambiance;
use cadence_store::{Advise, FailureInfo, NodeStatus};

use crate::error::AdviserError;

/// Terminal state of a node execution presented to its advisers.
#[derive(Debug, Clone, Copy)]
pub struct AdviseEvent<'a> {
  pub ambiance: &'a Ambiance,
  pub node_execution_id: &'a str,
  pub status: NodeStatus,
  pub failure_info: Option<&'a FailureInfo>,
  /// Outcomes published by the node, by name.
  pub outcomes: &'a BTreeMap<String, serde_json::Value>,
  /// Attempts of this node superseded by retries so far.
  pub retry_count: usize,
  /// Parameters of the adviser binding being consulted.
  pub parameters: &'a serde_json::Value,
}

pub trait Adviser: Send + Sync {
  /// Registry key, e.g. `ON_SUCCESS`.
  fn adviser_type(&self) -> &str;

  /// Plan node uuids named in `parameters`; checked when a plan starts.
  fn referenced_nodes(&self, _parameters: &serde_json::Value) -> Result<Vec<String>, AdviserError> {
    Ok(Vec::new())
  }

  fn can_advise(&self, event: &AdviseEvent<'_>) -> bool;

  fn on_advise_event(&self, event: &AdviseEvent<'_>) -> Result<Advise, AdviserError>;
}

pub(crate) fn invalid_parameters(adviser_type: &str, error: impl std::fmt::Display) -> AdviserError {
  AdviserError::InvalidParameters {
    adviser_type: adviser_type.to_string(),
    message: error.to_string(),
  }
}

#[cfg(test)]
pub(crate) mod test_support {
  use std::collections::BTreeMap;
  use std::sync::LazyLock;

  use cadence_ambiance::{Ambiance, SetupAbstractions};

  pub static AMBIANCE: LazyLock<Ambiance> =
    LazyLock::new(|| Ambiance::new("pe", "plan", SetupAbstractions::new()));
  pub static NO_OUTCOMES: LazyLock<BTreeMap<String, serde_json::Value>> =
    LazyLock::new(BTreeMap::new);
}
