use std::collections::HashMap;

use cadence_store::{
  ExecutionStore, NodeExecution, OutputKind, OutputStore, PublishedOutput,
};

use crate::error::ExpressionError;

/// Point-in-time view of a plan execution used for one resolution request.
#[derive(Debug, Default)]
pub struct ExecutionSnapshot {
  plan_execution_id: String,
  nodes: HashMap<String, NodeExecution>,
  // parent id ("" for the plan root) -> child ids in creation order
  children: HashMap<String, Vec<String>>,
  outputs: HashMap<(String, OutputKind, String), serde_json::Value>,
}

impl ExecutionSnapshot {
  /// Build a snapshot from records listed in creation order.
  pub fn new(
    plan_execution_id: impl Into<String>,
    nodes: Vec<NodeExecution>,
    outputs: Vec<PublishedOutput>,
  ) -> Self {
    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    for node in &nodes {
      children
        .entry(node.parent_id.clone().unwrap_or_default())
        .or_default()
        .push(node.uuid.clone());
    }

    Self {
      plan_execution_id: plan_execution_id.into(),
      nodes: nodes
        .into_iter()
        .map(|node| (node.uuid.clone(), node))
        .collect(),
      children,
      outputs: outputs
        .into_iter()
        .map(|output| ((output.scope_id, output.kind, output.name), output.value))
        .collect(),
    }
  }

  /// Read the current state of a plan execution from the stores.
  pub async fn load(
    executions: &dyn ExecutionStore,
    outputs: &dyn OutputStore,
    plan_execution_id: &str,
  ) -> Result<Self, ExpressionError> {
    let nodes = executions.find_node_executions(plan_execution_id).await?;
    let outputs = outputs.find_outputs(plan_execution_id).await?;
    Ok(Self::new(plan_execution_id, nodes, outputs))
  }

  pub fn plan_execution_id(&self) -> &str {
    &self.plan_execution_id
  }

  pub fn node(&self, node_execution_id: &str) -> Option<&NodeExecution> {
    self.nodes.get(node_execution_id)
  }

  /// Children of `parent` (the plan root when `None`), in creation order.
  pub fn children_of(&self, parent: Option<&str>) -> impl Iterator<Item = &NodeExecution> {
    self
      .children
      .get(parent.unwrap_or_default())
      .into_iter()
      .flatten()
      .filter_map(|id| self.nodes.get(id))
  }

  /// First output named `name` walking `scope_ids` in order.
  pub fn output(
    &self,
    scope_ids: &[String],
    kind: OutputKind,
    name: &str,
  ) -> Option<&serde_json::Value> {
    scope_ids
      .iter()
      .find_map(|scope_id| self.outputs.get(&(scope_id.clone(), kind, name.to_string())))
  }
}
