use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExpressionError {
  #[error("template error in {template:?}: {message}")]
  Template { template: String, message: String },

  #[error("store error: {0}")]
  Store(#[from] cadence_store::Error),
}
