use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Level;

/// Setup-scoped key/value pairs a plan was started with.
pub type SetupAbstractions = BTreeMap<String, String>;

/// Immutable positional context of a node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
  plan_execution_id: String,
  plan_id: String,
  #[serde(default)]
  setup_abstractions: SetupAbstractions,
  #[serde(default)]
  levels: Vec<Level>,
}

impl Ambiance {
  /// Create the plan-level ambiance (no active node).
  pub fn new(
    plan_execution_id: impl Into<String>,
    plan_id: impl Into<String>,
    setup_abstractions: SetupAbstractions,
  ) -> Self {
    Self {
      plan_execution_id: plan_execution_id.into(),
      plan_id: plan_id.into(),
      setup_abstractions,
      levels: Vec::new(),
    }
  }

  pub fn plan_execution_id(&self) -> &str {
    &self.plan_execution_id
  }

  pub fn plan_id(&self) -> &str {
    &self.plan_id
  }

  pub fn setup_abstractions(&self) -> &SetupAbstractions {
    &self.setup_abstractions
  }

  pub fn setup_abstraction(&self, key: &str) -> Option<&str> {
    self.setup_abstractions.get(key).map(String::as_str)
  }

  /// Levels from the outermost (plan root chain) to the innermost.
  pub fn levels(&self) -> &[Level] {
    &self.levels
  }

  pub fn depth(&self) -> usize {
    self.levels.len()
  }

  pub fn current_level(&self) -> Option<&Level> {
    self.levels.last()
  }

  pub fn current_runtime_id(&self) -> Option<&str> {
    self.current_level().map(|level| level.runtime_id.as_str())
  }

  pub fn current_setup_id(&self) -> Option<&str> {
    self.current_level().map(|level| level.setup_id.as_str())
  }

  /// Return a copy with `level` pushed as the new innermost level.
  pub fn with_level(&self, level: Level) -> Self {
    let mut next = self.clone();
    next.levels.push(level);
    next
  }

  /// Return a copy whose innermost level is replaced by `level`.
  ///
  /// Used when a chain continues to its next node or a node is retried: the
  /// new node execution sits at the same depth as the one it follows.
  pub fn with_sibling_level(&self, level: Level) -> Self {
    let mut next = self.clone();
    next.levels.pop();
    next.levels.push(level);
    next
  }

  /// Return a copy without the innermost level.
  pub fn parent(&self) -> Self {
    let mut next = self.clone();
    next.levels.pop();
    next
  }

  /// Innermost level belonging to `group`.
  pub fn find_group_level(&self, group: &str) -> Option<&Level> {
    self
      .levels
      .iter()
      .rev()
      .find(|level| level.group.as_deref() == Some(group))
  }

  /// Output visibility chain: level runtime ids innermost-first, then the plan
  /// execution id.
  pub fn scope_ids(&self) -> Vec<String> {
    self
      .levels
      .iter()
      .rev()
      .map(|level| level.runtime_id.clone())
      .chain(std::iter::once(self.plan_execution_id.clone()))
      .collect()
  }
}
