use thiserror::Error;

#[derive(Debug, Error)]
pub enum StepError {
  #[error("step {step_type} does not support {capability}")]
  Unsupported {
    step_type: String,
    capability: &'static str,
  },

  #[error("invalid step parameters: {message}")]
  InvalidParameters { message: String },

  #[error("output scope {scope} is not visible from node {node_execution_id}")]
  InvalidScope {
    scope: String,
    node_execution_id: String,
  },

  #[error("step failed: {message}")]
  Failed { message: String },

  #[error("output store error: {0}")]
  Output(#[from] cadence_store::Error),
}

impl StepError {
  pub fn unsupported(step_type: &str, capability: &'static str) -> Self {
    Self::Unsupported {
      step_type: step_type.to_string(),
      capability,
    }
  }

  pub fn invalid_parameters(error: impl std::fmt::Display) -> Self {
    Self::InvalidParameters {
      message: error.to_string(),
    }
  }
}

#[derive(Debug, Error)]
pub enum AdviserError {
  #[error("invalid parameters for adviser {adviser_type}: {message}")]
  InvalidParameters {
    adviser_type: String,
    message: String,
  },

  #[error("adviser {adviser_type} cannot advise: {message}")]
  NoRoute {
    adviser_type: String,
    message: String,
  },
}

#[derive(Debug, Error)]
pub enum FacilitatorError {
  #[error("invalid parameters for facilitator {facilitator_type}: {message}")]
  InvalidParameters {
    facilitator_type: String,
    message: String,
  },
}

#[derive(Debug, Error)]
pub enum RegistryError {
  #[error("step type not registered: {0}")]
  StepNotRegistered(String),

  #[error("adviser type not registered: {0}")]
  AdviserNotRegistered(String),

  #[error("facilitator type not registered: {0}")]
  FacilitatorNotRegistered(String),

  #[error("{kind} type already registered: {type_key}")]
  AlreadyRegistered { kind: &'static str, type_key: String },

  #[error("invalid parameters on node {node}: {message}")]
  InvalidParameters { node: String, message: String },

  #[error(transparent)]
  Plan(#[from] cadence_plan::PlanError),
}
