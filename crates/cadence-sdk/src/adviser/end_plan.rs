use cadence_store::{Advise, ExecutionStatus, NodeStatus};
use serde::Deserialize;

use crate::adviser::{AdviseEvent, Adviser, invalid_parameters};
use crate::error::AdviserError;
use crate::parse_parameters;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndPlanParameters {
  #[serde(default = "default_status")]
  status: ExecutionStatus,
  /// Node statuses this binding applies to; all terminal statuses when absent.
  #[serde(default)]
  on: Option<Vec<NodeStatus>>,
}

fn default_status() -> ExecutionStatus {
  ExecutionStatus::Succeeded
}

/// Terminates the whole plan execution with a configured status.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndPlanAdviser;

impl EndPlanAdviser {
  pub const TYPE: &'static str = "END_PLAN";

  fn parameters(parameters: &serde_json::Value) -> Result<EndPlanParameters, AdviserError> {
    parse_parameters(parameters).map_err(|e| invalid_parameters(Self::TYPE, e))
  }
}

impl Adviser for EndPlanAdviser {
  fn adviser_type(&self) -> &str {
    Self::TYPE
  }

  fn can_advise(&self, event: &AdviseEvent<'_>) -> bool {
    match Self::parameters(event.parameters) {
      Ok(parameters) => parameters
        .on
        .is_none_or(|statuses| statuses.contains(&event.status)),
      // Let on_advise_event report the parameter error.
      Err(_) => true,
    }
  }

  fn on_advise_event(&self, event: &AdviseEvent<'_>) -> Result<Advise, AdviserError> {
    let parameters = Self::parameters(event.parameters)?;
    if !parameters.status.is_terminal() {
      return Err(invalid_parameters(Self::TYPE, "status must be terminal"));
    }
    Ok(Advise::EndPlan {
      status: parameters.status,
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::adviser::test_support::{AMBIANCE, NO_OUTCOMES};

  fn event<'a>(status: NodeStatus, parameters: &'a serde_json::Value) -> AdviseEvent<'a> {
    AdviseEvent {
      ambiance: &AMBIANCE,
      node_execution_id: "ne",
      status,
      failure_info: None,
      outcomes: &NO_OUTCOMES,
      retry_count: 0,
      parameters,
    }
  }

  #[test]
  fn test_filters_on_status() {
    let parameters = json!({ "status": "failed", "on": ["errored"] });
    assert!(!EndPlanAdviser.can_advise(&event(NodeStatus::Succeeded, &parameters)));

    let errored = event(NodeStatus::Errored, &parameters);
    assert!(EndPlanAdviser.can_advise(&errored));
    assert_eq!(
      EndPlanAdviser.on_advise_event(&errored).unwrap(),
      Advise::EndPlan {
        status: ExecutionStatus::Failed
      }
    );
  }

  #[test]
  fn test_rejects_running_status() {
    let parameters = json!({ "status": "running" });
    let result = EndPlanAdviser.on_advise_event(&event(NodeStatus::Succeeded, &parameters));
    assert!(matches!(result, Err(AdviserError::InvalidParameters { .. })));
  }
}
