use async_trait::async_trait;
use serde::Deserialize;

use crate::context::StepContext;
use crate::error::StepError;
use crate::parse_parameters;
use crate::step::{ChildOutcome, Step, StepResponse, forward_child};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionParameters {
  child_node_id: String,
}

/// Wraps a single child chain and forwards its status and outcomes.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionStep;

impl SectionStep {
  pub const TYPE: &'static str = "SECTION";

  fn parameters(parameters: &serde_json::Value) -> Result<SectionParameters, StepError> {
    parse_parameters(parameters).map_err(StepError::invalid_parameters)
  }
}

#[async_trait]
impl Step for SectionStep {
  fn step_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Ok(vec![Self::parameters(parameters)?.child_node_id])
  }

  fn obtain_child(&self, parameters: &serde_json::Value) -> Result<String, StepError> {
    Ok(Self::parameters(parameters)?.child_node_id)
  }

  async fn handle_child_response(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
    children: &[ChildOutcome],
  ) -> Result<StepResponse, StepError> {
    Ok(forward_child(children))
  }
}
