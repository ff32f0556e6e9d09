use cadence_store::{Advise, NodeStatus};
use serde::Deserialize;

use crate::adviser::{AdviseEvent, Adviser, invalid_parameters};
use crate::error::AdviserError;
use crate::parse_parameters;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OnSuccessParameters {
  next_node_id: String,
}

/// Continues with a fixed next node when the node succeeded.
#[derive(Debug, Clone, Copy, Default)]
pub struct OnSuccessAdviser;

impl OnSuccessAdviser {
  pub const TYPE: &'static str = "ON_SUCCESS";

  fn parameters(parameters: &serde_json::Value) -> Result<OnSuccessParameters, AdviserError> {
    parse_parameters(parameters).map_err(|e| invalid_parameters(Self::TYPE, e))
  }
}

impl Adviser for OnSuccessAdviser {
  fn adviser_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, AdviserError> {
    Ok(vec![Self::parameters(parameters)?.next_node_id])
  }

  fn can_advise(&self, event: &AdviseEvent<'_>) -> bool {
    event.status == NodeStatus::Succeeded
  }

  fn on_advise_event(&self, event: &AdviseEvent<'_>) -> Result<Advise, AdviserError> {
    Ok(Advise::NextStep {
      next_node_id: Self::parameters(event.parameters)?.next_node_id,
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::adviser::test_support::{AMBIANCE, NO_OUTCOMES};

  #[test]
  fn test_advises_next_on_success_only() {
    let parameters = json!({ "nextNodeId": "b" });
    let mut event = AdviseEvent {
      ambiance: &AMBIANCE,
      node_execution_id: "ne",
      status: NodeStatus::Succeeded,
      failure_info: None,
      outcomes: &NO_OUTCOMES,
      retry_count: 0,
      parameters: &parameters,
    };

    assert!(OnSuccessAdviser.can_advise(&event));
    assert_eq!(
      OnSuccessAdviser.on_advise_event(&event).unwrap(),
      Advise::NextStep {
        next_node_id: "b".to_string()
      }
    );

    event.status = NodeStatus::Failed;
    assert!(!OnSuccessAdviser.can_advise(&event));
  }
}
