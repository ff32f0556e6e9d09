use cadence_ambiance::{Ambiance, SetupAbstractions};
use cadence_plan::{Plan, PlanNode};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionStatus {
  Running,
  Succeeded,
  Failed,
  Errored,
  Aborted,
}

impl ExecutionStatus {
  pub fn is_terminal(self) -> bool {
    !matches!(self, ExecutionStatus::Running)
  }
}

/// Status of a node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum NodeStatus {
  Queued,
  Running,
  AsyncWaiting,
  ChildWaiting,
  Succeeded,
  Failed,
  Errored,
  Aborted,
}

impl NodeStatus {
  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      NodeStatus::Succeeded | NodeStatus::Failed | NodeStatus::Errored | NodeStatus::Aborted
    )
  }

  pub fn is_failure(self) -> bool {
    matches!(
      self,
      NodeStatus::Failed | NodeStatus::Errored | NodeStatus::Aborted
    )
  }

  pub fn is_waiting(self) -> bool {
    matches!(self, NodeStatus::AsyncWaiting | NodeStatus::ChildWaiting)
  }

  /// Plan status reached when a chain ends on a node with this status.
  pub fn to_execution_status(self) -> ExecutionStatus {
    match self {
      NodeStatus::Succeeded => ExecutionStatus::Succeeded,
      NodeStatus::Failed => ExecutionStatus::Failed,
      NodeStatus::Aborted => ExecutionStatus::Aborted,
      _ => ExecutionStatus::Errored,
    }
  }
}

/// How a node execution is run, as decided by its facilitator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ExecutionMode {
  Sync,
  Async,
  Child,
  Children,
  /// Children run one after another, each once the previous one settled.
  ChildChain,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureInfo {
  pub message: String,
}

impl FailureInfo {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
    }
  }
}

/// What happens after a node reached a terminal status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Advise {
  /// Continue the chain with the given plan node.
  NextStep { next_node_id: String },
  /// Run the same plan node again after `wait_ms`.
  Retry { wait_ms: u64 },
  /// Terminate the plan execution as failed.
  Fail,
  /// Terminate the plan execution with the given status.
  EndPlan { status: ExecutionStatus },
  /// No adviser applied; the chain ends here.
  EndChain,
}

/// One run of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
  pub uuid: String,
  pub plan_id: String,
  pub plan: Plan,
  pub status: ExecutionStatus,
  pub triggered_by: String,
  pub setup_abstractions: SetupAbstractions,
  pub start_ts: DateTime<Utc>,
  pub end_ts: Option<DateTime<Utc>>,
}

impl PlanExecution {
  pub fn new(uuid: impl Into<String>, plan: Plan, triggered_by: impl Into<String>) -> Self {
    Self {
      uuid: uuid.into(),
      plan_id: plan.uuid.clone(),
      setup_abstractions: plan.setup_abstractions.clone(),
      plan,
      status: ExecutionStatus::Running,
      triggered_by: triggered_by.into(),
      start_ts: Utc::now(),
      end_ts: None,
    }
  }

  /// Ambiance of the plan itself, with no active node.
  pub fn ambiance(&self) -> Ambiance {
    Ambiance::new(&self.uuid, &self.plan_id, self.setup_abstractions.clone())
  }
}

/// One executed instance of a plan node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
  pub uuid: String,
  pub plan_execution_id: String,
  pub node: PlanNode,
  pub ambiance: Ambiance,
  pub parent_id: Option<String>,
  pub previous_id: Option<String>,
  pub next_id: Option<String>,
  pub mode: Option<ExecutionMode>,
  pub status: NodeStatus,
  pub resolved_step_parameters: Option<serde_json::Value>,
  pub is_old_retry: bool,
  /// Superseded attempts of this node, oldest first.
  pub retry_ids: Vec<String>,
  pub callback_id: Option<String>,
  pub timeout_at: Option<DateTime<Utc>>,
  pub failure_info: Option<FailureInfo>,
  pub adviser_response: Option<Advise>,
  pub created_at: DateTime<Utc>,
  pub start_ts: Option<DateTime<Utc>>,
  pub end_ts: Option<DateTime<Utc>>,
}

impl NodeExecution {
  /// Create a queued node execution.
  pub fn new(
    uuid: impl Into<String>,
    plan_execution_id: impl Into<String>,
    node: PlanNode,
    ambiance: Ambiance,
  ) -> Self {
    Self {
      uuid: uuid.into(),
      plan_execution_id: plan_execution_id.into(),
      node,
      ambiance,
      parent_id: None,
      previous_id: None,
      next_id: None,
      mode: None,
      status: NodeStatus::Queued,
      resolved_step_parameters: None,
      is_old_retry: false,
      retry_ids: Vec::new(),
      callback_id: None,
      timeout_at: None,
      failure_info: None,
      adviser_response: None,
      created_at: Utc::now(),
      start_ts: None,
      end_ts: None,
    }
  }

  pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
    self.parent_id = parent_id;
    self
  }

  pub fn with_previous(mut self, previous_id: Option<String>) -> Self {
    self.previous_id = previous_id;
    self
  }

  pub fn identifier(&self) -> &str {
    &self.node.identifier
  }

  /// Terminal with its advise persisted. A parent joins on settled children.
  pub fn is_settled(&self) -> bool {
    self.status.is_terminal() && self.adviser_response.is_some()
  }
}
