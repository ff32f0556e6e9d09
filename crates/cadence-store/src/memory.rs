use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
  Error, ExecutionStatus, ExecutionStore, NodeExecution, NodeStatus, OutputKind, OutputStore,
  PlanExecution, PublishedOutput, output_key,
};

#[derive(Debug, Default)]
struct State {
  plans: HashMap<String, PlanExecution>,
  // (insertion sequence, record)
  nodes: HashMap<String, (u64, NodeExecution)>,
  outputs: Vec<PublishedOutput>,
  sequence: u64,
}

impl State {
  fn sorted_nodes(&self, filter: impl Fn(&NodeExecution) -> bool) -> Vec<NodeExecution> {
    let mut matched: Vec<_> = self
      .nodes
      .values()
      .filter(|(_, node)| filter(node))
      .collect();
    matched.sort_by_key(|(sequence, _)| *sequence);
    matched.into_iter().map(|(_, node)| node.clone()).collect()
  }
}

/// In-memory store implementation.
///
/// Suitable for tests and single-process use; nothing survives the process.
#[derive(Debug, Default)]
pub struct InMemoryStore {
  state: RwLock<State>,
}

impl InMemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl ExecutionStore for InMemoryStore {
  async fn save_plan_execution(&self, execution: &PlanExecution) -> Result<(), Error> {
    let mut state = self.state.write().await;
    state
      .plans
      .insert(execution.uuid.clone(), execution.clone());
    Ok(())
  }

  async fn get_plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution, Error> {
    let state = self.state.read().await;
    state
      .plans
      .get(plan_execution_id)
      .cloned()
      .ok_or_else(|| Error::NotFound(format!("plan execution {plan_execution_id}")))
  }

  async fn transition_plan_execution(
    &self,
    plan_execution_id: &str,
    from: &[ExecutionStatus],
    to: ExecutionStatus,
    end_ts: Option<DateTime<Utc>>,
  ) -> Result<bool, Error> {
    let mut state = self.state.write().await;
    let execution = state
      .plans
      .get_mut(plan_execution_id)
      .ok_or_else(|| Error::NotFound(format!("plan execution {plan_execution_id}")))?;

    if !from.contains(&execution.status) {
      return Ok(false);
    }
    execution.status = to;
    execution.end_ts = end_ts;
    Ok(true)
  }

  async fn list_plan_executions(
    &self,
    status: ExecutionStatus,
  ) -> Result<Vec<PlanExecution>, Error> {
    let state = self.state.read().await;
    let mut executions: Vec<_> = state
      .plans
      .values()
      .filter(|execution| execution.status == status)
      .cloned()
      .collect();
    executions.sort_by_key(|execution| execution.start_ts);
    Ok(executions)
  }

  async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), Error> {
    let mut state = self.state.write().await;
    let existing = state.nodes.get(&node.uuid).map(|(sequence, _)| *sequence);
    let sequence = match existing {
      Some(sequence) => sequence,
      None => {
        state.sequence += 1;
        state.sequence
      }
    };
    state
      .nodes
      .insert(node.uuid.clone(), (sequence, node.clone()));
    Ok(())
  }

  async fn get_node_execution(&self, node_execution_id: &str) -> Result<NodeExecution, Error> {
    let state = self.state.read().await;
    state
      .nodes
      .get(node_execution_id)
      .map(|(_, node)| node.clone())
      .ok_or_else(|| Error::NotFound(format!("node execution {node_execution_id}")))
  }

  async fn transition_node_execution(
    &self,
    node_execution_id: &str,
    from: &[NodeStatus],
    to: NodeStatus,
  ) -> Result<Option<NodeExecution>, Error> {
    let mut state = self.state.write().await;
    let (_, node) = state
      .nodes
      .get_mut(node_execution_id)
      .ok_or_else(|| Error::NotFound(format!("node execution {node_execution_id}")))?;

    if !from.contains(&node.status) {
      return Ok(None);
    }
    node.status = to;
    Ok(Some(node.clone()))
  }

  async fn find_node_executions(
    &self,
    plan_execution_id: &str,
  ) -> Result<Vec<NodeExecution>, Error> {
    let state = self.state.read().await;
    Ok(state.sorted_nodes(|node| node.plan_execution_id == plan_execution_id))
  }

  async fn find_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, Error> {
    let state = self.state.read().await;
    Ok(state.sorted_nodes(|node| node.parent_id.as_deref() == Some(parent_id)))
  }

  async fn find_by_callback_id(&self, callback_id: &str) -> Result<Option<NodeExecution>, Error> {
    let state = self.state.read().await;
    Ok(
      state
        .nodes
        .values()
        .find(|(_, node)| node.callback_id.as_deref() == Some(callback_id))
        .map(|(_, node)| node.clone()),
    )
  }

  async fn find_expired_waits(&self, now: DateTime<Utc>) -> Result<Vec<NodeExecution>, Error> {
    let state = self.state.read().await;
    Ok(state.sorted_nodes(|node| {
      node.status.is_waiting() && node.timeout_at.is_some_and(|timeout_at| timeout_at <= now)
    }))
  }
}

#[async_trait]
impl OutputStore for InMemoryStore {
  async fn publish(&self, output: &PublishedOutput) -> Result<(), Error> {
    let mut state = self.state.write().await;
    let key = output_key(output);
    if state.outputs.iter().any(|existing| output_key(existing) == key) {
      return Err(Error::AlreadyExists(key));
    }
    state.outputs.push(output.clone());
    Ok(())
  }

  async fn find_outputs(&self, plan_execution_id: &str) -> Result<Vec<PublishedOutput>, Error> {
    let state = self.state.read().await;
    Ok(
      state
        .outputs
        .iter()
        .filter(|output| output.plan_execution_id == plan_execution_id)
        .cloned()
        .collect(),
    )
  }

  async fn resolve_output(
    &self,
    plan_execution_id: &str,
    scope_ids: &[String],
    kind: OutputKind,
    name: &str,
  ) -> Result<Option<PublishedOutput>, Error> {
    let state = self.state.read().await;
    for scope_id in scope_ids {
      let found = state.outputs.iter().find(|output| {
        output.plan_execution_id == plan_execution_id
          && &output.scope_id == scope_id
          && output.kind == kind
          && output.name == name
      });
      if let Some(output) = found {
        return Ok(Some(output.clone()));
      }
    }
    Ok(None)
  }
}

#[cfg(test)]
mod tests {
  use cadence_ambiance::{Ambiance, SetupAbstractions};
  use cadence_plan::{Plan, PlanNode};
  use serde_json::json;

  use super::*;

  fn node(uuid: &str, parent: Option<&str>) -> NodeExecution {
    let ambiance = Ambiance::new("pe-1", "plan-1", SetupAbstractions::new());
    NodeExecution::new(uuid, "pe-1", PlanNode::new(uuid, uuid, "DUMMY"), ambiance)
      .with_parent(parent.map(str::to_string))
  }

  fn output(scope_id: &str, name: &str, value: serde_json::Value) -> PublishedOutput {
    PublishedOutput {
      uuid: format!("{scope_id}-{name}"),
      plan_execution_id: "pe-1".to_string(),
      scope_id: scope_id.to_string(),
      kind: OutputKind::SweepingOutput,
      name: name.to_string(),
      value,
      produced_by: "ne".to_string(),
      created_at: Utc::now(),
    }
  }

  #[tokio::test]
  async fn test_node_transition_is_compare_and_set() {
    let store = InMemoryStore::new();
    store.save_node_execution(&node("a", None)).await.unwrap();

    let claimed = store
      .transition_node_execution("a", &[NodeStatus::Queued], NodeStatus::Running)
      .await
      .unwrap();
    assert_eq!(claimed.unwrap().status, NodeStatus::Running);

    let again = store
      .transition_node_execution("a", &[NodeStatus::Queued], NodeStatus::Running)
      .await
      .unwrap();
    assert!(again.is_none());
  }

  #[tokio::test]
  async fn test_children_in_creation_order() {
    let store = InMemoryStore::new();
    store.save_node_execution(&node("p", None)).await.unwrap();
    for id in ["c2", "c1", "c3"] {
      store.save_node_execution(&node(id, Some("p"))).await.unwrap();
    }
    // Updating a record keeps its position.
    let mut c2 = store.get_node_execution("c2").await.unwrap();
    c2.status = NodeStatus::Succeeded;
    store.save_node_execution(&c2).await.unwrap();

    let children: Vec<_> = store
      .find_children("p")
      .await
      .unwrap()
      .into_iter()
      .map(|child| child.uuid)
      .collect();
    assert_eq!(children, vec!["c2", "c1", "c3"]);
    assert_eq!(store.find_node_executions("pe-1").await.unwrap().len(), 4);
  }

  #[tokio::test]
  async fn test_plan_transition() {
    let store = InMemoryStore::new();
    let plan = Plan::new("plan-1", "a").with_node(PlanNode::new("a", "a", "DUMMY"));
    let execution = PlanExecution::new("pe-1", plan, "tester");
    store.save_plan_execution(&execution).await.unwrap();

    let done = store
      .transition_plan_execution(
        "pe-1",
        &[ExecutionStatus::Running],
        ExecutionStatus::Succeeded,
        Some(Utc::now()),
      )
      .await
      .unwrap();
    assert!(done);

    let aborted = store
      .transition_plan_execution(
        "pe-1",
        &[ExecutionStatus::Running],
        ExecutionStatus::Aborted,
        None,
      )
      .await
      .unwrap();
    assert!(!aborted);
    assert!(
      store
        .list_plan_executions(ExecutionStatus::Running)
        .await
        .unwrap()
        .is_empty()
    );
  }

  #[tokio::test]
  async fn test_publish_duplicate_fails() {
    let store = InMemoryStore::new();
    store.publish(&output("ne-a", "foo", json!(1))).await.unwrap();

    let result = store.publish(&output("ne-a", "foo", json!(2))).await;
    assert!(matches!(result, Err(Error::AlreadyExists(_))));

    // Same name in another scope is a different key.
    store.publish(&output("ne-b", "foo", json!(3))).await.unwrap();
  }

  #[tokio::test]
  async fn test_resolve_output_walks_scopes_in_order() {
    let store = InMemoryStore::new();
    store.publish(&output("pe-1", "foo", json!("plan"))).await.unwrap();
    store.publish(&output("ne-s", "foo", json!("section"))).await.unwrap();

    let scopes = vec!["ne-c".to_string(), "ne-s".to_string(), "pe-1".to_string()];
    let found = store
      .resolve_output("pe-1", &scopes, OutputKind::SweepingOutput, "foo")
      .await
      .unwrap()
      .unwrap();
    assert_eq!(found.value, json!("section"));

    let missing = store
      .resolve_output("pe-1", &scopes, OutputKind::Outcome, "foo")
      .await
      .unwrap();
    assert!(missing.is_none());
  }

  #[tokio::test]
  async fn test_find_expired_waits() {
    let store = InMemoryStore::new();
    let mut waiting = node("w", None);
    waiting.status = NodeStatus::AsyncWaiting;
    waiting.callback_id = Some("cb-1".to_string());
    waiting.timeout_at = Some(Utc::now() - chrono::Duration::seconds(1));
    store.save_node_execution(&waiting).await.unwrap();

    let mut later = node("l", None);
    later.status = NodeStatus::AsyncWaiting;
    later.timeout_at = Some(Utc::now() + chrono::Duration::hours(1));
    store.save_node_execution(&later).await.unwrap();

    let expired = store.find_expired_waits(Utc::now()).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].uuid, "w");

    let by_callback = store.find_by_callback_id("cb-1").await.unwrap();
    assert_eq!(by_callback.unwrap().uuid, "w");
  }
}
