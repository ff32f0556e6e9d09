//! Steps: the units of work the engine runs.
//!
//! A step implements only the capabilities matching the facilitation modes it
//! supports; every other method keeps its default and reports
//! [`StepError::Unsupported`].

mod dummy;
mod fork;
mod section;
mod section_chain;
mod wait;

pub use dummy::DummyStep;
pub use fork::ForkStep;
pub use section::SectionStep;
pub use section_chain::SectionChainStep;
pub use wait::WaitStep;

use std::collections::BTreeMap;

use async_trait::async_trait;
use cadence_store::{FailureInfo, NodeStatus, OutputScope};

use crate::context::StepContext;
use crate::error::StepError;

/// A named outcome returned by a step, published by the engine once the
/// step's result is recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutcome {
  pub name: String,
  pub scope: OutputScope,
  pub value: serde_json::Value,
}

/// Terminal result of a step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepResponse {
  pub status: NodeStatus,
  pub failure_info: Option<FailureInfo>,
  pub outcomes: Vec<StepOutcome>,
}

impl StepResponse {
  pub fn succeeded() -> Self {
    Self {
      status: NodeStatus::Succeeded,
      failure_info: None,
      outcomes: Vec::new(),
    }
  }

  pub fn failed(message: impl Into<String>) -> Self {
    Self {
      status: NodeStatus::Failed,
      failure_info: Some(FailureInfo::new(message)),
      outcomes: Vec::new(),
    }
  }

  pub fn with_status(mut self, status: NodeStatus) -> Self {
    self.status = status;
    self
  }

  /// Add an outcome published in the node's own scope.
  pub fn with_outcome(self, name: impl Into<String>, value: serde_json::Value) -> Self {
    self.with_scoped_outcome(name, OutputScope::Node, value)
  }

  pub fn with_scoped_outcome(
    mut self,
    name: impl Into<String>,
    scope: OutputScope,
    value: serde_json::Value,
  ) -> Self {
    self.outcomes.push(StepOutcome {
      name: name.into(),
      scope,
      value,
    });
    self
  }
}

/// Final state of one child chain, handed to the parent step.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildOutcome {
  /// The last node execution of the chain.
  pub node_execution_id: String,
  pub identifier: String,
  pub status: NodeStatus,
  pub failure_info: Option<FailureInfo>,
  /// Outcomes published by the last node execution, by name.
  pub outcomes: BTreeMap<String, serde_json::Value>,
}

/// Combine child chain results: the first failed chain fails the parent.
pub fn aggregate_children(children: &[ChildOutcome]) -> StepResponse {
  match children.iter().find(|child| child.status.is_failure()) {
    Some(child) => {
      let reason = child
        .failure_info
        .as_ref()
        .map(|info| info.message.clone())
        .unwrap_or_else(|| format!("{:?}", child.status).to_lowercase());
      StepResponse::failed(format!("child {} failed: {reason}", child.identifier))
        .with_status(child.status)
    }
    None => StepResponse::succeeded(),
  }
}

/// Result of a single child chain, carrying the chain's outcomes over to the
/// parent node.
pub fn forward_child(children: &[ChildOutcome]) -> StepResponse {
  let mut response = aggregate_children(children);
  for child in children {
    for (name, value) in &child.outcomes {
      response = response.with_outcome(name.clone(), value.clone());
    }
  }
  response
}

#[async_trait]
pub trait Step: Send + Sync {
  /// Registry key, e.g. `FORK`.
  fn step_type(&self) -> &str;

  /// Plan node uuids named in `parameters`; checked when a plan starts.
  fn referenced_nodes(&self, _parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Ok(Vec::new())
  }

  async fn execute_sync(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
  ) -> Result<StepResponse, StepError> {
    Err(StepError::unsupported(self.step_type(), "sync execution"))
  }

  /// Start async work. The result must later be delivered through
  /// [`StepContext::callbacks`] under [`StepContext::callback_id`].
  async fn execute_async(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
  ) -> Result<(), StepError> {
    Err(StepError::unsupported(self.step_type(), "async execution"))
  }

  async fn handle_async_response(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
    _response: &serde_json::Value,
  ) -> Result<StepResponse, StepError> {
    Err(StepError::unsupported(self.step_type(), "async responses"))
  }

  /// Plan node uuid of the single child to run.
  fn obtain_child(&self, _parameters: &serde_json::Value) -> Result<String, StepError> {
    Err(StepError::unsupported(self.step_type(), "a child"))
  }

  /// Plan node uuids of the children to run concurrently.
  fn obtain_children(&self, _parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Err(StepError::unsupported(self.step_type(), "children"))
  }

  /// Plan node uuids of the children to run one after another.
  fn obtain_child_chain(&self, _parameters: &serde_json::Value) -> Result<Vec<String>, StepError> {
    Err(StepError::unsupported(self.step_type(), "a child chain"))
  }

  async fn handle_child_response(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
    _children: &[ChildOutcome],
  ) -> Result<StepResponse, StepError> {
    Err(StepError::unsupported(self.step_type(), "child responses"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn child(identifier: &str, status: NodeStatus) -> ChildOutcome {
    ChildOutcome {
      node_execution_id: format!("ne-{identifier}"),
      identifier: identifier.to_string(),
      status,
      failure_info: None,
      outcomes: BTreeMap::new(),
    }
  }

  #[test]
  fn test_aggregate_children() {
    let ok = aggregate_children(&[
      child("a", NodeStatus::Succeeded),
      child("b", NodeStatus::Succeeded),
    ]);
    assert_eq!(ok.status, NodeStatus::Succeeded);

    let failed = aggregate_children(&[
      child("a", NodeStatus::Succeeded),
      child("b", NodeStatus::Errored),
    ]);
    assert_eq!(failed.status, NodeStatus::Errored);
    assert_eq!(
      failed.failure_info.unwrap().message,
      "child b failed: errored"
    );

    assert_eq!(aggregate_children(&[]).status, NodeStatus::Succeeded);
  }

  #[test]
  fn test_forward_child_outcomes() {
    let mut built = child("build", NodeStatus::Succeeded);
    built
      .outcomes
      .insert("artifact".to_string(), serde_json::json!({ "tag": "v1" }));

    let response = forward_child(&[built.clone()]);
    assert_eq!(response.status, NodeStatus::Succeeded);
    assert_eq!(response.outcomes.len(), 1);
    assert_eq!(response.outcomes[0].name, "artifact");
    assert_eq!(response.outcomes[0].scope, OutputScope::Node);
    assert_eq!(response.outcomes[0].value, serde_json::json!({ "tag": "v1" }));

    built.status = NodeStatus::Failed;
    let response = forward_child(&[built]);
    assert_eq!(response.status, NodeStatus::Failed);
    assert_eq!(response.outcomes.len(), 1);
  }
}
