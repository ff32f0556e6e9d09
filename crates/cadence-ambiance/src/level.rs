use serde::{Deserialize, Serialize};

/// One entry of the ambiance stack, describing an active node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
  /// The plan node uuid this level was created from.
  pub setup_id: String,
  /// The node execution uuid.
  pub runtime_id: String,
  pub identifier: String,
  pub step_type: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  #[serde(default)]
  pub skip_expression_chain: bool,
}

impl Level {
  pub fn new(
    setup_id: impl Into<String>,
    runtime_id: impl Into<String>,
    identifier: impl Into<String>,
    step_type: impl Into<String>,
  ) -> Self {
    Self {
      setup_id: setup_id.into(),
      runtime_id: runtime_id.into(),
      identifier: identifier.into(),
      step_type: step_type.into(),
      group: None,
      skip_expression_chain: false,
    }
  }

  pub fn with_group(mut self, group: Option<String>) -> Self {
    self.group = group;
    self
  }

  pub fn with_skip_expression_chain(mut self, skip: bool) -> Self {
    self.skip_expression_chain = skip;
    self
  }
}
