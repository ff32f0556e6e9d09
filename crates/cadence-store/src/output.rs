use cadence_ambiance::Ambiance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a published output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum OutputKind {
  /// Returned by a step in its response.
  Outcome,
  /// Published by a step while it runs.
  SweepingOutput,
}

/// Where an output is published, relative to the publishing node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "group", rename_all = "snake_case")]
pub enum OutputScope {
  /// The publishing node execution.
  #[default]
  Node,
  /// The innermost enclosing level of the named group.
  Group(String),
  /// The whole plan execution.
  Plan,
}

impl OutputScope {
  /// Scope id an output published from `ambiance` is stored under.
  ///
  /// Returns `None` when the scope does not exist for this ambiance (no active
  /// level, or no enclosing level of the group).
  pub fn scope_id(&self, ambiance: &Ambiance) -> Option<String> {
    match self {
      OutputScope::Node => ambiance.current_runtime_id().map(str::to_string),
      OutputScope::Group(group) => ambiance
        .find_group_level(group)
        .map(|level| level.runtime_id.clone()),
      OutputScope::Plan => Some(ambiance.plan_execution_id().to_string()),
    }
  }
}

/// A named value published into a scope. Read-only once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishedOutput {
  pub uuid: String,
  pub plan_execution_id: String,
  pub scope_id: String,
  pub kind: OutputKind,
  pub name: String,
  pub value: serde_json::Value,
  /// Node execution that published the value.
  pub produced_by: String,
  pub created_at: DateTime<Utc>,
}
