use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },

  #[error("unexpected state: {message}")]
  UnexpectedState { message: String },

  #[error("store error: {0}")]
  Store(#[from] cadence_store::Error),
}

impl GraphError {
  pub(crate) fn unexpected(message: impl Into<String>) -> Self {
    Self::UnexpectedState {
      message: message.into(),
    }
  }
}
