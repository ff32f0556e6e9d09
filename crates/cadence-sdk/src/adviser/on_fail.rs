use cadence_store::{Advise, NodeStatus};
use serde::Deserialize;

use crate::adviser::{AdviseEvent, Adviser, invalid_parameters};
use crate::error::AdviserError;
use crate::parse_parameters;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnFailParameters {
  next_node_id: String,
}

/// Continues with a fixed node (cleanup, rollback) when the node failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnFailAdviser;

impl OnFailAdviser {
  pub const TYPE: &'static str = "ON_FAIL";

  fn parameters(parameters: &serde_json::Value) -> Result<OnFailParameters, AdviserError> {
    parse_parameters(parameters).map_err(|e| invalid_parameters(Self::TYPE, e))
  }
}

impl Adviser for OnFailAdviser {
  fn adviser_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, AdviserError> {
    Ok(vec![Self::parameters(parameters)?.next_node_id])
  }

  fn can_advise(&self, event: &AdviseEvent<'_>) -> bool {
    matches!(event.status, NodeStatus::Failed | NodeStatus::Errored)
  }

  fn on_advise_event(&self, event: &AdviseEvent<'_>) -> Result<Advise, AdviserError> {
    Ok(Advise::NextStep {
      next_node_id: Self::parameters(event.parameters)?.next_node_id,
    })
  }
}
