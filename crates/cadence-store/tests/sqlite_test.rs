use cadence_ambiance::Level;
use cadence_plan::{Plan, PlanNode};
use cadence_store::{
  Advise, Error, ExecutionMode, ExecutionStatus, ExecutionStore, FailureInfo, NodeExecution,
  NodeStatus, OutputKind, OutputStore, PlanExecution, PublishedOutput, SqliteStore,
};
use chrono::Utc;
use serde_json::json;

fn plan() -> Plan {
  Plan::new("plan-1", "a")
    .with_node(PlanNode::new("a", "build", "DUMMY"))
    .with_setup_abstraction("accountId", "acc-1")
}

fn node_execution(execution: &PlanExecution, uuid: &str, parent: Option<&str>) -> NodeExecution {
  let node = execution.plan.fetch_node("a").unwrap().clone();
  let ambiance = execution
    .ambiance()
    .with_level(Level::new("a", uuid, "build", "DUMMY"));
  NodeExecution::new(uuid, &execution.uuid, node, ambiance).with_parent(parent.map(str::to_string))
}

#[tokio::test]
async fn test_plan_execution_round_trip() {
  let store = SqliteStore::in_memory().await.unwrap();
  let execution = PlanExecution::new("pe-1", plan(), "alice");
  store.save_plan_execution(&execution).await.unwrap();

  let loaded = store.get_plan_execution("pe-1").await.unwrap();
  assert_eq!(loaded.plan, execution.plan);
  assert_eq!(loaded.status, ExecutionStatus::Running);
  assert_eq!(loaded.setup_abstractions["accountId"], "acc-1");

  let missing = store.get_plan_execution("nope").await;
  assert!(matches!(missing, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn test_plan_transition_compare_and_set() {
  let store = SqliteStore::in_memory().await.unwrap();
  store
    .save_plan_execution(&PlanExecution::new("pe-1", plan(), "alice"))
    .await
    .unwrap();

  let first = store
    .transition_plan_execution(
      "pe-1",
      &[ExecutionStatus::Running],
      ExecutionStatus::Aborted,
      Some(Utc::now()),
    )
    .await
    .unwrap();
  let second = store
    .transition_plan_execution(
      "pe-1",
      &[ExecutionStatus::Running],
      ExecutionStatus::Succeeded,
      Some(Utc::now()),
    )
    .await
    .unwrap();

  assert!(first);
  assert!(!second);
  let loaded = store.get_plan_execution("pe-1").await.unwrap();
  assert_eq!(loaded.status, ExecutionStatus::Aborted);
  assert!(loaded.end_ts.is_some());
  assert_eq!(
    store
      .list_plan_executions(ExecutionStatus::Aborted)
      .await
      .unwrap()
      .len(),
    1
  );
}

#[tokio::test]
async fn test_node_execution_round_trip() {
  let store = SqliteStore::in_memory().await.unwrap();
  let execution = PlanExecution::new("pe-1", plan(), "alice");
  store.save_plan_execution(&execution).await.unwrap();

  let mut node = node_execution(&execution, "ne-1", None);
  node.mode = Some(ExecutionMode::Sync);
  node.status = NodeStatus::Failed;
  node.resolved_step_parameters = Some(json!({ "x": 1 }));
  node.retry_ids = vec!["ne-0".to_string()];
  node.failure_info = Some(FailureInfo::new("boom"));
  node.adviser_response = Some(Advise::Retry { wait_ms: 10 });
  store.save_node_execution(&node).await.unwrap();

  let loaded = store.get_node_execution("ne-1").await.unwrap();
  assert_eq!(loaded.node, node.node);
  assert_eq!(loaded.ambiance, node.ambiance);
  assert_eq!(loaded.mode, Some(ExecutionMode::Sync));
  assert_eq!(loaded.status, NodeStatus::Failed);
  assert_eq!(loaded.retry_ids, vec!["ne-0"]);
  assert_eq!(loaded.failure_info.unwrap().message, "boom");
  assert_eq!(loaded.adviser_response, Some(Advise::Retry { wait_ms: 10 }));
}

#[tokio::test]
async fn test_node_claim_and_queries() {
  let store = SqliteStore::in_memory().await.unwrap();
  let execution = PlanExecution::new("pe-1", plan(), "alice");
  store.save_plan_execution(&execution).await.unwrap();

  store
    .save_node_execution(&node_execution(&execution, "parent", None))
    .await
    .unwrap();
  for id in ["c1", "c2"] {
    store
      .save_node_execution(&node_execution(&execution, id, Some("parent")))
      .await
      .unwrap();
  }

  let claimed = store
    .transition_node_execution("c1", &[NodeStatus::Queued], NodeStatus::Running)
    .await
    .unwrap();
  assert_eq!(claimed.unwrap().status, NodeStatus::Running);
  let lost = store
    .transition_node_execution("c1", &[NodeStatus::Queued], NodeStatus::Running)
    .await
    .unwrap();
  assert!(lost.is_none());

  let children: Vec<_> = store
    .find_children("parent")
    .await
    .unwrap()
    .into_iter()
    .map(|child| child.uuid)
    .collect();
  assert_eq!(children, vec!["c1", "c2"]);
  assert_eq!(store.find_node_executions("pe-1").await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_callback_and_expired_waits() {
  let store = SqliteStore::in_memory().await.unwrap();
  let execution = PlanExecution::new("pe-1", plan(), "alice");
  store.save_plan_execution(&execution).await.unwrap();

  let mut expired = node_execution(&execution, "w1", None);
  expired.status = NodeStatus::AsyncWaiting;
  expired.callback_id = Some("cb-1".to_string());
  expired.timeout_at = Some(Utc::now() - chrono::Duration::seconds(5));
  store.save_node_execution(&expired).await.unwrap();

  let mut pending = node_execution(&execution, "w2", None);
  pending.status = NodeStatus::AsyncWaiting;
  pending.timeout_at = Some(Utc::now() + chrono::Duration::hours(1));
  store.save_node_execution(&pending).await.unwrap();

  let found = store.find_by_callback_id("cb-1").await.unwrap().unwrap();
  assert_eq!(found.uuid, "w1");
  assert!(store.find_by_callback_id("cb-x").await.unwrap().is_none());

  let waits = store.find_expired_waits(Utc::now()).await.unwrap();
  assert_eq!(waits.len(), 1);
  assert_eq!(waits[0].uuid, "w1");
}

#[tokio::test]
async fn test_outputs() {
  let store = SqliteStore::in_memory().await.unwrap();
  let output = |scope: &str, value: serde_json::Value| PublishedOutput {
    uuid: format!("out-{scope}"),
    plan_execution_id: "pe-1".to_string(),
    scope_id: scope.to_string(),
    kind: OutputKind::SweepingOutput,
    name: "foo".to_string(),
    value,
    produced_by: "ne-1".to_string(),
    created_at: Utc::now(),
  };

  store.publish(&output("ne-1", json!({ "bar": 1 }))).await.unwrap();
  store.publish(&output("pe-1", json!("plan"))).await.unwrap();

  let mut duplicate = output("ne-1", json!(2));
  duplicate.uuid = "other".to_string();
  assert!(matches!(
    store.publish(&duplicate).await,
    Err(Error::AlreadyExists(_))
  ));

  let scopes = vec!["ne-1".to_string(), "pe-1".to_string()];
  let resolved = store
    .resolve_output("pe-1", &scopes, OutputKind::SweepingOutput, "foo")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(resolved.value, json!({ "bar": 1 }));

  let plan_only = store
    .resolve_output("pe-1", &scopes[1..], OutputKind::SweepingOutput, "foo")
    .await
    .unwrap()
    .unwrap();
  assert_eq!(plan_only.value, json!("plan"));
  assert_eq!(store.find_outputs("pe-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_open_file_database() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("cadence.db");

  {
    let store = SqliteStore::open(&path).await.unwrap();
    store
      .save_plan_execution(&PlanExecution::new("pe-1", plan(), "alice"))
      .await
      .unwrap();
  }

  let reopened = SqliteStore::open(&path).await.unwrap();
  assert_eq!(
    reopened.get_plan_execution("pe-1").await.unwrap().triggered_by,
    "alice"
  );
}
