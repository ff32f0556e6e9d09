use async_trait::async_trait;
use serde::Deserialize;

use crate::context::StepContext;
use crate::error::StepError;
use crate::parse_parameters;
use crate::step::{ChildOutcome, Step, StepResponse, aggregate_children};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ForkParameters {
  parallel_node_ids: Vec<String>,
}

/// Runs its children concurrently and fails when any of them failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkStep;

impl ForkStep {
  pub const TYPE: &'static str = "FORK";

  fn parameters(parameters: &serde_json::Value) -> Result<ForkParameters, StepError> {
    parse_parameters(parameters).map_err(StepError::invalid_parameters)
  }
}

#[async_trait]
impl Step for ForkStep {
  fn step_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Ok(Self::parameters(parameters)?.parallel_node_ids)
  }

  fn obtain_children(&self, parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Ok(Self::parameters(parameters)?.parallel_node_ids)
  }

  async fn handle_child_response(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
    children: &[ChildOutcome],
  ) -> Result<StepResponse, StepError> {
    Ok(aggregate_children(children))
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  #[test]
  fn test_obtain_children() {
    let parameters = json!({ "parallelNodeIds": ["p1", "p2"] });
    assert_eq!(ForkStep.obtain_children(&parameters).unwrap(), vec!["p1", "p2"]);
    assert_eq!(ForkStep.referenced_nodes(&parameters).unwrap().len(), 2);
  }

  #[test]
  fn test_missing_parameters() {
    let result = ForkStep.obtain_children(&serde_json::Value::Null);
    assert!(matches!(result, Err(StepError::InvalidParameters { .. })));
    assert!(ForkStep.obtain_child(&json!({})).is_err());
  }
}
