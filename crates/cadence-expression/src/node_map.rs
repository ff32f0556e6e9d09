use std::fmt;
use std::sync::Arc;

use cadence_store::{NodeExecution, OutputKind};
use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::debug;

use crate::snapshot::ExecutionSnapshot;

/// Result of resolving one path segment.
#[derive(Debug, Clone)]
pub enum Resolved {
  /// A nested scope that resolves further segments lazily.
  Scope(Arc<dyn Resolver>),
  Value(serde_json::Value),
  /// Several bindings of the same identifier, in creation order.
  List(Vec<Resolved>),
}

impl Resolved {
  /// Resolve the next path segment.
  pub fn get(&self, segment: &str) -> Option<Resolved> {
    match self {
      Resolved::Scope(resolver) => resolver.resolve(segment),
      Resolved::Value(value) => match value {
        serde_json::Value::Object(map) => map.get(segment).cloned().map(Resolved::Value),
        serde_json::Value::Array(items) => segment
          .parse::<usize>()
          .ok()
          .and_then(|index| items.get(index))
          .cloned()
          .map(Resolved::Value),
        _ => None,
      },
      Resolved::List(items) => segment
        .parse::<usize>()
        .ok()
        .and_then(|index| items.get(index))
        .cloned(),
    }
  }

  pub fn to_json(&self) -> serde_json::Value {
    match self {
      Resolved::Scope(resolver) => resolver.summary(),
      Resolved::Value(value) => value.clone(),
      Resolved::List(items) => serde_json::Value::Array(items.iter().map(Resolved::to_json).collect()),
    }
  }
}

/// A lazily evaluated map from keys to values or nested scopes.
pub trait Resolver: fmt::Debug + Send + Sync {
  fn resolve(&self, key: &str) -> Option<Resolved>;

  /// JSON rendering of the scope itself.
  fn summary(&self) -> serde_json::Value {
    serde_json::Value::Null
  }
}

/// Resolver over one node execution, or over the plan root.
#[derive(Debug, Clone)]
pub struct NodeExecutionMap {
  snapshot: Arc<ExecutionSnapshot>,
  node_execution_id: Option<String>,
}

impl NodeExecutionMap {
  /// The plan root: top-level node executions and plan-scoped outputs.
  pub fn root(snapshot: Arc<ExecutionSnapshot>) -> Self {
    Self {
      snapshot,
      node_execution_id: None,
    }
  }

  pub fn for_node(snapshot: Arc<ExecutionSnapshot>, node_execution_id: &str) -> Option<Self> {
    snapshot.node(node_execution_id)?;
    Some(Self {
      snapshot,
      node_execution_id: Some(node_execution_id.to_string()),
    })
  }

  pub fn node(&self) -> Option<&NodeExecution> {
    self
      .node_execution_id
      .as_deref()
      .and_then(|id| self.snapshot.node(id))
  }

  /// Child node executions bound to `key`.
  ///
  /// Superseded retries are skipped and children marked
  /// `skip_expression_chain` are replaced by their own children. A single
  /// binding is a scope; repeated bindings collapse into an ordered list.
  pub fn resolve_child(&self, key: &str) -> Option<Resolved> {
    let mut bindings = Vec::new();
    self.collect_children(self.node_execution_id.as_deref(), key, &mut bindings);

    match bindings.len() {
      0 => None,
      1 => bindings.pop(),
      _ => Some(Resolved::List(bindings)),
    }
  }

  fn collect_children(&self, parent: Option<&str>, key: &str, bindings: &mut Vec<Resolved>) {
    for child in self.snapshot.children_of(parent) {
      if child.is_old_retry {
        continue;
      }
      if child.node.skip_expression_chain {
        self.collect_children(Some(&child.uuid), key, bindings);
      } else if child.identifier() == key {
        bindings.push(Resolved::Scope(Arc::new(Self {
          snapshot: self.snapshot.clone(),
          node_execution_id: Some(child.uuid.clone()),
        })));
      }
    }
  }

  fn reserved_field(node: &NodeExecution, key: &str) -> Option<serde_json::Value> {
    let timestamp = |ts: Option<DateTime<Utc>>| {
      ts.map(|ts| json!(ts.to_rfc3339()))
        .unwrap_or(serde_json::Value::Null)
    };
    match key {
      "status" => serde_json::to_value(node.status).ok(),
      "startTs" => Some(timestamp(node.start_ts)),
      "endTs" => Some(timestamp(node.end_ts)),
      _ => None,
    }
  }

  fn scope_ids(&self) -> Option<Vec<String>> {
    match self.node() {
      Some(node) if node.ambiance.levels().is_empty() => {
        debug!(
          node_execution_id = %node.uuid,
          "node ambiance has no levels; outputs are not resolvable"
        );
        None
      }
      Some(node) => Some(node.ambiance.scope_ids()),
      None => Some(vec![self.snapshot.plan_execution_id().to_string()]),
    }
  }

  fn output(&self, kind: OutputKind, key: &str) -> Option<Resolved> {
    let scope_ids = self.scope_ids()?;
    self
      .snapshot
      .output(&scope_ids, kind, key)
      .cloned()
      .map(Resolved::Value)
  }
}

impl Resolver for NodeExecutionMap {
  fn resolve(&self, key: &str) -> Option<Resolved> {
    if let Some(child) = self.resolve_child(key) {
      return Some(child);
    }

    if let Some(node) = self.node() {
      if let Some(value) = Self::reserved_field(node, key) {
        return Some(Resolved::Value(value));
      }
      if let Some(value) = node
        .resolved_step_parameters
        .as_ref()
        .and_then(|parameters| parameters.get(key))
      {
        return Some(Resolved::Value(value.clone()));
      }
    }

    self
      .output(OutputKind::Outcome, key)
      .or_else(|| self.output(OutputKind::SweepingOutput, key))
  }

  fn summary(&self) -> serde_json::Value {
    match self.node() {
      Some(node) => json!({
        "uuid": node.uuid,
        "identifier": node.identifier(),
        "status": node.status,
        "startTs": node.start_ts.map(|ts| ts.to_rfc3339()),
        "endTs": node.end_ts.map(|ts| ts.to_rfc3339()),
        "stepParameters": node.resolved_step_parameters,
      }),
      None => json!({ "planExecutionId": self.snapshot.plan_execution_id() }),
    }
  }
}

