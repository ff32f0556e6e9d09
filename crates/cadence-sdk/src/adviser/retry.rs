use cadence_store::{Advise, NodeStatus};
use serde::{Deserialize, Serialize};

use crate::adviser::{AdviseEvent, Adviser, invalid_parameters};
use crate::error::AdviserError;
use crate::parse_parameters;

/// What to do once every retry failed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RepairAction {
  /// Carry on with the given node as if the failure did not happen.
  Ignore { next_node_id: String },
  /// Fail the whole plan execution.
  #[default]
  EndExecution,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RetryParameters {
  retry_count: usize,
  /// Wait before each retry; the last entry repeats for later attempts.
  #[serde(default)]
  wait_interval_ms: Vec<u64>,
  #[serde(default)]
  repair_action: RepairAction,
}

/// Re-runs a failed node up to `retryCount` times.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryAdviser;

impl RetryAdviser {
  pub const TYPE: &'static str = "RETRY";

  fn parameters(parameters: &serde_json::Value) -> Result<RetryParameters, AdviserError> {
    parse_parameters(parameters).map_err(|e| invalid_parameters(Self::TYPE, e))
  }
}

impl Adviser for RetryAdviser {
  fn adviser_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, AdviserError> {
    match Self::parameters(parameters)?.repair_action {
      RepairAction::Ignore { next_node_id } => Ok(vec![next_node_id]),
      RepairAction::EndExecution => Ok(Vec::new()),
    }
  }

  fn can_advise(&self, event: &AdviseEvent<'_>) -> bool {
    matches!(event.status, NodeStatus::Failed | NodeStatus::Errored)
  }

  fn on_advise_event(&self, event: &AdviseEvent<'_>) -> Result<Advise, AdviserError> {
    let parameters = Self::parameters(event.parameters)?;

    if event.retry_count < parameters.retry_count {
      let wait_ms = parameters
        .wait_interval_ms
        .get(event.retry_count)
        .or(parameters.wait_interval_ms.last())
        .copied()
        .unwrap_or(0);
      return Ok(Advise::Retry { wait_ms });
    }

    Ok(match parameters.repair_action {
      RepairAction::Ignore { next_node_id } => Advise::NextStep { next_node_id },
      RepairAction::EndExecution => Advise::Fail,
    })
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::adviser::test_support::{AMBIANCE, NO_OUTCOMES};

  fn event<'a>(retry_count: usize, parameters: &'a serde_json::Value) -> AdviseEvent<'a> {
    AdviseEvent {
      ambiance: &AMBIANCE,
      node_execution_id: "ne",
      status: NodeStatus::Failed,
      failure_info: None,
      outcomes: &NO_OUTCOMES,
      retry_count,
      parameters,
    }
  }

  #[test]
  fn test_retries_with_wait_intervals() {
    let parameters = json!({ "retryCount": 3, "waitIntervalMs": [10, 20] });

    let waits: Vec<_> = (0..3)
      .map(|attempt| RetryAdviser.on_advise_event(&event(attempt, &parameters)).unwrap())
      .collect();
    assert_eq!(
      waits,
      vec![
        Advise::Retry { wait_ms: 10 },
        Advise::Retry { wait_ms: 20 },
        Advise::Retry { wait_ms: 20 },
      ]
    );
    assert_eq!(
      RetryAdviser.on_advise_event(&event(3, &parameters)).unwrap(),
      Advise::Fail
    );
  }

  #[test]
  fn test_ignore_repair_action() {
    let parameters = json!({
      "retryCount": 1,
      "repairAction": { "type": "IGNORE", "nextNodeId": "cleanup" }
    });

    assert_eq!(
      RetryAdviser.on_advise_event(&event(0, &parameters)).unwrap(),
      Advise::Retry { wait_ms: 0 }
    );
    assert_eq!(
      RetryAdviser.on_advise_event(&event(1, &parameters)).unwrap(),
      Advise::NextStep {
        next_node_id: "cleanup".to_string()
      }
    );
    assert_eq!(
      RetryAdviser.referenced_nodes(&parameters).unwrap(),
      vec!["cleanup"]
    );
  }

  #[test]
  fn test_parameters_are_camel_case() {
    let parameters = json!({ "retryCount": 2, "waitIntervalMs": [10] });
    assert!(RetryAdviser.referenced_nodes(&parameters).unwrap().is_empty());

    let snake = json!({ "retry_count": 2, "wait_interval_ms": [10] });
    assert!(RetryAdviser.referenced_nodes(&snake).is_err());
  }

  #[test]
  fn test_only_advises_failures() {
    let parameters = json!({ "retryCount": 1 });
    let mut succeeded = event(0, &parameters);
    succeeded.status = NodeStatus::Succeeded;
    assert!(!RetryAdviser.can_advise(&succeeded));

    let mut aborted = event(0, &parameters);
    aborted.status = NodeStatus::Aborted;
    assert!(!RetryAdviser.can_advise(&aborted));
  }
}
