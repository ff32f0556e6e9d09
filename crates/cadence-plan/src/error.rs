use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("node not found: {0}")]
  NodeNotFound(String),

  #[error("starting node not found: {0}")]
  StartingNodeNotFound(String),

  #[error("duplicate node uuid: {0}")]
  DuplicateNode(String),

  #[error("node {uuid} has an empty identifier")]
  EmptyIdentifier { uuid: String },

  #[error("node {from} references unknown node {to}")]
  DanglingReference { from: String, to: String },

  #[error("invalid plan document: {0}")]
  Parse(#[from] serde_json::Error),
}
