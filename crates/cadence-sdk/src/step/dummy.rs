use async_trait::async_trait;

use crate::context::StepContext;
use crate::error::StepError;
use crate::step::{Step, StepResponse};

/// No-op leaf that always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyStep;

impl DummyStep {
  pub const TYPE: &'static str = "DUMMY";
}

#[async_trait]
impl Step for DummyStep {
  fn step_type(&self) -> &str {
    Self::TYPE
  }

  async fn execute_sync(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
  ) -> Result<StepResponse, StepError> {
    Ok(StepResponse::succeeded())
  }
}
