use std::path::Path;

use async_trait::async_trait;
use cadence_ambiance::{Ambiance, SetupAbstractions};
use cadence_plan::{Plan, PlanNode};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::{FromRow, SqlitePool};

use crate::{
  Advise, Error, ExecutionMode, ExecutionStatus, ExecutionStore, FailureInfo, NodeExecution,
  NodeStatus, OutputKind, OutputStore, PlanExecution, PublishedOutput, output_key,
};

const NODE_COLUMNS: &str = r#"
  uuid, plan_execution_id, node, ambiance, parent_id, previous_id, next_id, mode, status,
  resolved_step_parameters, is_old_retry, retry_ids, callback_id, timeout_at, failure_info,
  adviser_response, created_at, start_ts, end_ts
"#;

#[derive(FromRow)]
struct PlanExecutionRow {
  uuid: String,
  plan_id: String,
  plan: Json<Plan>,
  status: ExecutionStatus,
  triggered_by: String,
  setup_abstractions: Json<SetupAbstractions>,
  start_ts: DateTime<Utc>,
  end_ts: Option<DateTime<Utc>>,
}

impl From<PlanExecutionRow> for PlanExecution {
  fn from(row: PlanExecutionRow) -> Self {
    Self {
      uuid: row.uuid,
      plan_id: row.plan_id,
      plan: row.plan.0,
      status: row.status,
      triggered_by: row.triggered_by,
      setup_abstractions: row.setup_abstractions.0,
      start_ts: row.start_ts,
      end_ts: row.end_ts,
    }
  }
}

#[derive(FromRow)]
struct NodeExecutionRow {
  uuid: String,
  plan_execution_id: String,
  node: Json<PlanNode>,
  ambiance: Json<Ambiance>,
  parent_id: Option<String>,
  previous_id: Option<String>,
  next_id: Option<String>,
  mode: Option<ExecutionMode>,
  status: NodeStatus,
  resolved_step_parameters: Option<Json<serde_json::Value>>,
  is_old_retry: bool,
  retry_ids: Json<Vec<String>>,
  callback_id: Option<String>,
  timeout_at: Option<DateTime<Utc>>,
  failure_info: Option<Json<FailureInfo>>,
  adviser_response: Option<Json<Advise>>,
  created_at: DateTime<Utc>,
  start_ts: Option<DateTime<Utc>>,
  end_ts: Option<DateTime<Utc>>,
}

impl From<NodeExecutionRow> for NodeExecution {
  fn from(row: NodeExecutionRow) -> Self {
    Self {
      uuid: row.uuid,
      plan_execution_id: row.plan_execution_id,
      node: row.node.0,
      ambiance: row.ambiance.0,
      parent_id: row.parent_id,
      previous_id: row.previous_id,
      next_id: row.next_id,
      mode: row.mode,
      status: row.status,
      resolved_step_parameters: row.resolved_step_parameters.map(|json| json.0),
      is_old_retry: row.is_old_retry,
      retry_ids: row.retry_ids.0,
      callback_id: row.callback_id,
      timeout_at: row.timeout_at,
      failure_info: row.failure_info.map(|json| json.0),
      adviser_response: row.adviser_response.map(|json| json.0),
      created_at: row.created_at,
      start_ts: row.start_ts,
      end_ts: row.end_ts,
    }
  }
}

#[derive(FromRow)]
struct PublishedOutputRow {
  uuid: String,
  plan_execution_id: String,
  scope_id: String,
  kind: OutputKind,
  name: String,
  value: Json<serde_json::Value>,
  produced_by: String,
  created_at: DateTime<Utc>,
}

impl From<PublishedOutputRow> for PublishedOutput {
  fn from(row: PublishedOutputRow) -> Self {
    Self {
      uuid: row.uuid,
      plan_execution_id: row.plan_execution_id,
      scope_id: row.scope_id,
      kind: row.kind,
      name: row.name,
      value: row.value.0,
      produced_by: row.produced_by,
      created_at: row.created_at,
    }
  }
}

/// SQLite-based store implementation.
pub struct SqliteStore {
  pool: SqlitePool,
}

impl SqliteStore {
  /// Create a new SQLite store with the given connection pool.
  pub fn new(pool: SqlitePool) -> Self {
    Self { pool }
  }

  /// Open (creating if missing) a database file and run migrations.
  pub async fn open(path: &Path) -> Result<Self, Error> {
    let options = SqliteConnectOptions::new()
      .filename(path)
      .create_if_missing(true);
    let pool = SqlitePoolOptions::new().connect_with(options).await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Open a private in-memory database and run migrations.
  pub async fn in_memory() -> Result<Self, Error> {
    // A single connection; every new connection to `:memory:` is a new database.
    let pool = SqlitePoolOptions::new()
      .max_connections(1)
      .connect("sqlite::memory:")
      .await?;
    let store = Self::new(pool);
    store.migrate().await?;
    Ok(store)
  }

  /// Run database migrations.
  pub async fn migrate(&self) -> Result<(), Error> {
    sqlx::migrate!("../../migrations").run(&self.pool).await?;
    Ok(())
  }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
  async fn save_plan_execution(&self, execution: &PlanExecution) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO plan_executions
        (uuid, plan_id, plan, status, triggered_by, setup_abstractions, start_ts, end_ts)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (uuid) DO UPDATE SET
        plan_id = excluded.plan_id,
        plan = excluded.plan,
        status = excluded.status,
        triggered_by = excluded.triggered_by,
        setup_abstractions = excluded.setup_abstractions,
        start_ts = excluded.start_ts,
        end_ts = excluded.end_ts
      "#,
    )
    .bind(&execution.uuid)
    .bind(&execution.plan_id)
    .bind(Json(&execution.plan))
    .bind(execution.status)
    .bind(&execution.triggered_by)
    .bind(Json(&execution.setup_abstractions))
    .bind(execution.start_ts)
    .bind(execution.end_ts)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution, Error> {
    let row: Option<PlanExecutionRow> = sqlx::query_as(
      r#"
      SELECT uuid, plan_id, plan, status, triggered_by, setup_abstractions, start_ts, end_ts
      FROM plan_executions
      WHERE uuid = ?
      "#,
    )
    .bind(plan_execution_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(PlanExecution::from)
      .ok_or_else(|| Error::NotFound(format!("plan execution {plan_execution_id}")))
  }

  async fn transition_plan_execution(
    &self,
    plan_execution_id: &str,
    from: &[ExecutionStatus],
    to: ExecutionStatus,
    end_ts: Option<DateTime<Utc>>,
  ) -> Result<bool, Error> {
    let result = sqlx::query(
      r#"
      UPDATE plan_executions
      SET status = ?, end_ts = ?
      WHERE uuid = ? AND status IN (SELECT value FROM json_each(?))
      "#,
    )
    .bind(to)
    .bind(end_ts)
    .bind(plan_execution_id)
    .bind(serde_json::to_string(from)?)
    .execute(&self.pool)
    .await?;

    if result.rows_affected() == 0 {
      // Surface NotFound for unknown ids; a status mismatch is not an error.
      self.get_plan_execution(plan_execution_id).await?;
      return Ok(false);
    }
    Ok(true)
  }

  async fn list_plan_executions(
    &self,
    status: ExecutionStatus,
  ) -> Result<Vec<PlanExecution>, Error> {
    let rows: Vec<PlanExecutionRow> = sqlx::query_as(
      r#"
      SELECT uuid, plan_id, plan, status, triggered_by, setup_abstractions, start_ts, end_ts
      FROM plan_executions
      WHERE status = ?
      ORDER BY rowid
      "#,
    )
    .bind(status)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(PlanExecution::from).collect())
  }

  async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO node_executions
        (uuid, plan_execution_id, node, ambiance, parent_id, previous_id, next_id, mode, status,
         resolved_step_parameters, is_old_retry, retry_ids, callback_id, timeout_at, failure_info,
         adviser_response, created_at, start_ts, end_ts)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
      ON CONFLICT (uuid) DO UPDATE SET
        node = excluded.node,
        ambiance = excluded.ambiance,
        parent_id = excluded.parent_id,
        previous_id = excluded.previous_id,
        next_id = excluded.next_id,
        mode = excluded.mode,
        status = excluded.status,
        resolved_step_parameters = excluded.resolved_step_parameters,
        is_old_retry = excluded.is_old_retry,
        retry_ids = excluded.retry_ids,
        callback_id = excluded.callback_id,
        timeout_at = excluded.timeout_at,
        failure_info = excluded.failure_info,
        adviser_response = excluded.adviser_response,
        start_ts = excluded.start_ts,
        end_ts = excluded.end_ts
      "#,
    )
    .bind(&node.uuid)
    .bind(&node.plan_execution_id)
    .bind(Json(&node.node))
    .bind(Json(&node.ambiance))
    .bind(&node.parent_id)
    .bind(&node.previous_id)
    .bind(&node.next_id)
    .bind(node.mode)
    .bind(node.status)
    .bind(node.resolved_step_parameters.as_ref().map(Json))
    .bind(node.is_old_retry)
    .bind(Json(&node.retry_ids))
    .bind(&node.callback_id)
    .bind(node.timeout_at)
    .bind(node.failure_info.as_ref().map(Json))
    .bind(node.adviser_response.as_ref().map(Json))
    .bind(node.created_at)
    .bind(node.start_ts)
    .bind(node.end_ts)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn get_node_execution(&self, node_execution_id: &str) -> Result<NodeExecution, Error> {
    let row: Option<NodeExecutionRow> = sqlx::query_as(&format!(
      "SELECT {NODE_COLUMNS} FROM node_executions WHERE uuid = ?"
    ))
    .bind(node_execution_id)
    .fetch_optional(&self.pool)
    .await?;

    row
      .map(NodeExecution::from)
      .ok_or_else(|| Error::NotFound(format!("node execution {node_execution_id}")))
  }

  async fn transition_node_execution(
    &self,
    node_execution_id: &str,
    from: &[NodeStatus],
    to: NodeStatus,
  ) -> Result<Option<NodeExecution>, Error> {
    let result = sqlx::query(
      r#"
      UPDATE node_executions
      SET status = ?
      WHERE uuid = ? AND status IN (SELECT value FROM json_each(?))
      "#,
    )
    .bind(to)
    .bind(node_execution_id)
    .bind(serde_json::to_string(from)?)
    .execute(&self.pool)
    .await?;

    let node = self.get_node_execution(node_execution_id).await?;
    if result.rows_affected() == 0 {
      return Ok(None);
    }
    Ok(Some(node))
  }

  async fn find_node_executions(
    &self,
    plan_execution_id: &str,
  ) -> Result<Vec<NodeExecution>, Error> {
    let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
      "SELECT {NODE_COLUMNS} FROM node_executions WHERE plan_execution_id = ? ORDER BY rowid"
    ))
    .bind(plan_execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(NodeExecution::from).collect())
  }

  async fn find_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, Error> {
    let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
      "SELECT {NODE_COLUMNS} FROM node_executions WHERE parent_id = ? ORDER BY rowid"
    ))
    .bind(parent_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(NodeExecution::from).collect())
  }

  async fn find_by_callback_id(&self, callback_id: &str) -> Result<Option<NodeExecution>, Error> {
    let row: Option<NodeExecutionRow> = sqlx::query_as(&format!(
      "SELECT {NODE_COLUMNS} FROM node_executions WHERE callback_id = ?"
    ))
    .bind(callback_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(NodeExecution::from))
  }

  async fn find_expired_waits(&self, now: DateTime<Utc>) -> Result<Vec<NodeExecution>, Error> {
    let waiting = [NodeStatus::AsyncWaiting, NodeStatus::ChildWaiting];
    let rows: Vec<NodeExecutionRow> = sqlx::query_as(&format!(
      r#"
      SELECT {NODE_COLUMNS} FROM node_executions
      WHERE status IN (SELECT value FROM json_each(?))
        AND timeout_at IS NOT NULL
        AND julianday(timeout_at) <= julianday(?)
      ORDER BY rowid
      "#
    ))
    .bind(serde_json::to_string(&waiting)?)
    .bind(now)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(NodeExecution::from).collect())
  }
}

#[async_trait]
impl OutputStore for SqliteStore {
  async fn publish(&self, output: &PublishedOutput) -> Result<(), Error> {
    sqlx::query(
      r#"
      INSERT INTO published_outputs
        (uuid, plan_execution_id, scope_id, kind, name, value, produced_by, created_at)
      VALUES (?, ?, ?, ?, ?, ?, ?, ?)
      "#,
    )
    .bind(&output.uuid)
    .bind(&output.plan_execution_id)
    .bind(&output.scope_id)
    .bind(output.kind)
    .bind(&output.name)
    .bind(Json(&output.value))
    .bind(&output.produced_by)
    .bind(output.created_at)
    .execute(&self.pool)
    .await
    .map_err(|error| match error {
      sqlx::Error::Database(db) if db.is_unique_violation() => {
        Error::AlreadyExists(output_key(output))
      }
      other => Error::Database(other),
    })?;

    Ok(())
  }

  async fn find_outputs(&self, plan_execution_id: &str) -> Result<Vec<PublishedOutput>, Error> {
    let rows: Vec<PublishedOutputRow> = sqlx::query_as(
      r#"
      SELECT uuid, plan_execution_id, scope_id, kind, name, value, produced_by, created_at
      FROM published_outputs
      WHERE plan_execution_id = ?
      ORDER BY rowid
      "#,
    )
    .bind(plan_execution_id)
    .fetch_all(&self.pool)
    .await?;

    Ok(rows.into_iter().map(PublishedOutput::from).collect())
  }

  async fn resolve_output(
    &self,
    plan_execution_id: &str,
    scope_ids: &[String],
    kind: OutputKind,
    name: &str,
  ) -> Result<Option<PublishedOutput>, Error> {
    for scope_id in scope_ids {
      let row: Option<PublishedOutputRow> = sqlx::query_as(
        r#"
        SELECT uuid, plan_execution_id, scope_id, kind, name, value, produced_by, created_at
        FROM published_outputs
        WHERE plan_execution_id = ? AND scope_id = ? AND kind = ? AND name = ?
        "#,
      )
      .bind(plan_execution_id)
      .bind(scope_id)
      .bind(kind)
      .bind(name)
      .fetch_optional(&self.pool)
      .await?;

      if let Some(row) = row {
        return Ok(Some(row.into()));
      }
    }
    Ok(None)
  }
}
