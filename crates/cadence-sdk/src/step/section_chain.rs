use async_trait::async_trait;
use serde::Deserialize;

use crate::context::StepContext;
use crate::error::StepError;
use crate::parse_parameters;
use crate::step::{ChildOutcome, Step, StepResponse, forward_child};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectionChainParameters {
  child_node_ids: Vec<String>,
}

/// Runs its children one after another.
///
/// The next child starts once the previous one settled successfully; the
/// first failed child ends the section with its status. The last child's
/// outcomes are forwarded.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionChainStep;

impl SectionChainStep {
  pub const TYPE: &'static str = "SECTION_CHAIN";

  fn parameters(parameters: &serde_json::Value) -> Result<SectionChainParameters, StepError> {
    parse_parameters(parameters).map_err(StepError::invalid_parameters)
  }
}

#[async_trait]
impl Step for SectionChainStep {
  fn step_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Ok(Self::parameters(parameters)?.child_node_ids)
  }

  fn obtain_child_chain(&self, parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Ok(Self::parameters(parameters)?.child_node_ids)
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
