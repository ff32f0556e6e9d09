use std::collections::HashMap;

use cadence_store::{ExecutionMode, FailureInfo, NodeExecution, NodeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One node execution in the rendered graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphVertex {
  pub uuid: String,
  pub plan_node_id: String,
  pub identifier: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub step_type: String,
  pub status: NodeStatus,
  pub mode: Option<ExecutionMode>,
  pub start_ts: Option<DateTime<Utc>>,
  pub end_ts: Option<DateTime<Utc>>,
  pub step_parameters: Option<serde_json::Value>,
  pub failure_info: Option<FailureInfo>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub retry_ids: Vec<String>,
  pub subgraph: Option<Subgraph>,
  pub next: Option<Box<GraphVertex>>,
}

/// Nested children of a vertex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subgraph {
  /// The single child chain of a CHILD vertex.
  Section { head: Box<GraphVertex> },
  /// The child chains of a CHILDREN vertex, keyed by chain head id.
  Fork { heads: HashMap<String, GraphVertex> },
}

impl GraphVertex {
  pub(crate) fn from_record(record: &NodeExecution) -> Self {
    Self {
      uuid: record.uuid.clone(),
      plan_node_id: record.node.uuid.clone(),
      identifier: record.node.identifier.clone(),
      name: record.node.name.clone(),
      step_type: record.node.step_type.clone(),
      status: record.status,
      mode: record.mode,
      start_ts: record.start_ts,
      end_ts: record.end_ts,
      step_parameters: record.resolved_step_parameters.clone(),
      failure_info: record.failure_info.clone(),
      retry_ids: record.retry_ids.clone(),
      subgraph: None,
      next: None,
    }
  }

  /// Number of vertices reachable from this one, itself included.
  pub fn vertex_count(&self) -> usize {
    let nested = match &self.subgraph {
      Some(Subgraph::Section { head }) => head.vertex_count(),
      Some(Subgraph::Fork { heads }) => heads.values().map(GraphVertex::vertex_count).sum(),
      None => 0,
    };
    1 + nested + self.next.as_ref().map_or(0, |next| next.vertex_count())
  }

  /// Find a vertex by node execution id anywhere below this one.
  pub fn find(&self, uuid: &str) -> Option<&GraphVertex> {
    if self.uuid == uuid {
      return Some(self);
    }
    let nested = match &self.subgraph {
      Some(Subgraph::Section { head }) => head.find(uuid),
      Some(Subgraph::Fork { heads }) => heads.values().find_map(|head| head.find(uuid)),
      None => None,
    };
    nested.or_else(|| self.next.as_ref().and_then(|next| next.find(uuid)))
  }
}
