use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::context::StepContext;
use crate::error::StepError;
use crate::parse_parameters;
use crate::step::{Step, StepResponse};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WaitParameters {
  wait_duration_ms: u64,
}

/// Async step that completes once its wait duration elapsed.
///
/// The timer lives in the current process; a wait interrupted by a restart is
/// only ended by the facilitator timeout.
#[derive(Debug, Clone, Copy, Default)]
pub struct WaitStep;

impl WaitStep {
  pub const TYPE: &'static str = "WAIT";
}

#[async_trait]
impl Step for WaitStep {
  fn step_type(&self) -> &str {
    Self::TYPE
  }

  async fn execute_async(
    &self,
    ctx: &StepContext,
    parameters: &serde_json::Value,
  ) -> Result<(), StepError> {
    let parameters: WaitParameters =
      parse_parameters(parameters).map_err(StepError::invalid_parameters)?;
    let callback_id = ctx.callback_id()?.to_string();
    let callbacks = ctx.callbacks().clone();
    let waited_ms = parameters.wait_duration_ms;

    tokio::spawn(async move {
      tokio::time::sleep(Duration::from_millis(waited_ms)).await;
      if !callbacks.send(&callback_id, json!({ "waited_ms": waited_ms })) {
        debug!(callback_id = %callback_id, "wait elapsed after engine loop stopped");
      }
    });

    Ok(())
  }

  async fn handle_async_response(
    &self,
    _ctx: &StepContext,
    _parameters: &serde_json::Value,
    response: &serde_json::Value,
  ) -> Result<StepResponse, StepError> {
    Ok(StepResponse::succeeded().with_outcome("wait", response.clone()))
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use cadence_ambiance::{Ambiance, SetupAbstractions};
  use cadence_store::InMemoryStore;

  use super::*;
  use crate::callback::callback_channel;

  #[tokio::test]
  async fn test_wait_sends_callback() {
    let (callbacks, mut receiver) = callback_channel();
    let ambiance = Ambiance::new("pe", "plan", SetupAbstractions::new());
    let ctx = StepContext::new(ambiance, "ne", Arc::new(InMemoryStore::new()), callbacks)
      .with_callback_id("cb-1");

    WaitStep
      .execute_async(&ctx, &json!({ "waitDurationMs": 5 }))
      .await
      .unwrap();

    let callback = receiver.recv().await.unwrap();
    assert_eq!(callback.callback_id, "cb-1");
    assert_eq!(callback.response, json!({ "waited_ms": 5 }));

    let response = WaitStep
      .handle_async_response(&ctx, &json!({}), &callback.response)
      .await
      .unwrap();
    assert_eq!(response.outcomes[0].name, "wait");
  }
}
