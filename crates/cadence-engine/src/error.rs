use cadence_expression::ExpressionError;
use cadence_plan::PlanError;
use cadence_sdk::RegistryError;

/// Errors returned to callers of the engine.
///
/// Failures inside steps, advisers and facilitators never surface here: they
/// are recorded on the node execution and take the plan's failure path.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
  /// The request was rejected before anything was written.
  #[error("invalid request: {message}")]
  InvalidRequest { message: String },

  #[error("timed out waiting for plan execution {plan_execution_id}")]
  Timeout { plan_execution_id: String },

  #[error("store error: {0}")]
  Store(#[from] cadence_store::Error),

  #[error("expression error: {0}")]
  Expression(#[from] ExpressionError),
}

impl From<RegistryError> for EngineError {
  fn from(error: RegistryError) -> Self {
    EngineError::InvalidRequest {
      message: error.to_string(),
    }
  }
}

impl From<PlanError> for EngineError {
  fn from(error: PlanError) -> Self {
    EngineError::InvalidRequest {
      message: error.to_string(),
    }
  }
}
