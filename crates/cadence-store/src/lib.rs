//! Cadence Store
//!
//! This crate provides the storage traits and implementations for plan
//! executions, node executions and published outputs. The store is the source
//! of truth for a running plan: the engine keeps no state that cannot be
//! rebuilt from it.
//!
//! The [`ExecutionStore`] trait defines operations for:
//! - Creating and transitioning plan executions
//! - Creating, updating and claiming node executions
//! - Querying the node execution tree of a plan execution
//!
//! The [`OutputStore`] trait stores outcomes and sweeping outputs published by
//! steps. Claims are atomic compare-and-set status writes, so concurrent
//! workers and duplicated deliveries never act twice on the same record.

mod memory;
mod output;
mod sqlite;
mod types;

pub use memory::InMemoryStore;
pub use output::{OutputKind, OutputScope, PublishedOutput};
pub use sqlite::SqliteStore;
pub use types::{
  Advise, ExecutionMode, ExecutionStatus, FailureInfo, NodeExecution, NodeStatus, PlanExecution,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Error type for storage operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
  /// The requested record was not found.
  #[error("not found: {0}")]
  NotFound(String),

  /// A record with the same key was already published.
  #[error("already exists: {0}")]
  AlreadyExists(String),

  /// A stored document could not be encoded or decoded.
  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  /// A database error occurred.
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  /// A database migration failed.
  #[error("migration error: {0}")]
  Migration(#[from] sqlx::migrate::MigrateError),
}

/// Storage trait for plan and node executions.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
  /// Create or replace a plan execution.
  async fn save_plan_execution(&self, execution: &PlanExecution) -> Result<(), Error>;

  /// Get a plan execution by ID.
  async fn get_plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution, Error>;

  /// Move a plan execution to `to` if its status is one of `from`.
  ///
  /// Returns `false` without writing when the status did not match.
  async fn transition_plan_execution(
    &self,
    plan_execution_id: &str,
    from: &[ExecutionStatus],
    to: ExecutionStatus,
    end_ts: Option<DateTime<Utc>>,
  ) -> Result<bool, Error>;

  /// List plan executions with the given status.
  async fn list_plan_executions(&self, status: ExecutionStatus)
  -> Result<Vec<PlanExecution>, Error>;

  /// Create or replace a node execution.
  async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), Error>;

  /// Get a node execution by ID.
  async fn get_node_execution(&self, node_execution_id: &str) -> Result<NodeExecution, Error>;

  /// Move a node execution to `to` if its status is one of `from`.
  ///
  /// Returns the updated record, or `None` when the status did not match.
  async fn transition_node_execution(
    &self,
    node_execution_id: &str,
    from: &[NodeStatus],
    to: NodeStatus,
  ) -> Result<Option<NodeExecution>, Error>;

  /// All node executions of a plan execution, in creation order.
  async fn find_node_executions(
    &self,
    plan_execution_id: &str,
  ) -> Result<Vec<NodeExecution>, Error>;

  /// Children of a node execution, in creation order.
  async fn find_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, Error>;

  /// The node execution waiting on an async correlation token.
  async fn find_by_callback_id(&self, callback_id: &str) -> Result<Option<NodeExecution>, Error>;

  /// Waiting node executions whose `timeout_at` is at or before `now`.
  async fn find_expired_waits(&self, now: DateTime<Utc>) -> Result<Vec<NodeExecution>, Error>;
}

/// Storage trait for outcomes and sweeping outputs.
#[async_trait]
pub trait OutputStore: Send + Sync {
  /// Publish an output. Fails with [`Error::AlreadyExists`] when the
  /// `(scope, kind, name)` key is taken.
  async fn publish(&self, output: &PublishedOutput) -> Result<(), Error>;

  /// All outputs of a plan execution, in publication order.
  async fn find_outputs(&self, plan_execution_id: &str) -> Result<Vec<PublishedOutput>, Error>;

  /// First output named `name` found walking `scope_ids` in order.
  async fn resolve_output(
    &self,
    plan_execution_id: &str,
    scope_ids: &[String],
    kind: OutputKind,
    name: &str,
  ) -> Result<Option<PublishedOutput>, Error>;
}

/// Key under which an output is unique.
pub(crate) fn output_key(output: &PublishedOutput) -> String {
  format!(
    "{}/{}/{:?}/{}",
    output.plan_execution_id, output.scope_id, output.kind, output.name
  )
}
