//! Facilitators decide how a node runs.
//!
//! Every built-in accepts an optional `timeoutMs`: how long the node may stay
//! suspended (waiting on a callback or on its children) before the engine
//! fails it.

use std::time::Duration;

use cadence_ambiance::Ambiance;
use cadence_store::ExecutionMode;
use serde::Deserialize;

use crate::error::FacilitatorError;
use crate::parse_parameters;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FacilitationResult {
  pub mode: ExecutionMode,
  pub timeout: Option<Duration>,
}

pub trait Facilitator: Send + Sync {
  /// Registry key, e.g. `SYNC`.
  fn facilitator_type(&self) -> &str;

  fn facilitate(
    &self,
    ambiance: &Ambiance,
    parameters: &serde_json::Value,
  ) -> Result<FacilitationResult, FacilitatorError>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeoutParameters {
  #[serde(default)]
  timeout_ms: Option<u64>,
}

fn facilitate_mode(
  facilitator_type: &str,
  mode: ExecutionMode,
  parameters: &serde_json::Value,
) -> Result<FacilitationResult, FacilitatorError> {
  let parameters: TimeoutParameters =
    parse_parameters(parameters).map_err(|e| FacilitatorError::InvalidParameters {
      facilitator_type: facilitator_type.to_string(),
      message: e.to_string(),
    })?;
  Ok(FacilitationResult {
    mode,
    timeout: parameters.timeout_ms.map(Duration::from_millis),
  })
}

macro_rules! mode_facilitator {
  ($(#[$doc:meta])* $name:ident, $type_key:literal, $mode:expr) => {
    $(#[$doc])*
    #[derive(Debug, Clone, Copy, Default)]
    pub struct $name;

    impl $name {
      pub const TYPE: &'static str = $type_key;
    }

    impl Facilitator for $name {
      fn facilitator_type(&self) -> &str {
        Self::TYPE
      }

      fn facilitate(
        &self,
        _ambiance: &Ambiance,
        parameters: &serde_json::Value,
      ) -> Result<FacilitationResult, FacilitatorError> {
        facilitate_mode(Self::TYPE, $mode, parameters)
      }
    }
  };
}

mode_facilitator!(
  /// Runs the step inline.
  SyncFacilitator,
  "SYNC",
  ExecutionMode::Sync
);
mode_facilitator!(
  /// Starts the step and suspends the node until its callback arrives.
  AsyncFacilitator,
  "ASYNC",
  ExecutionMode::Async
);
mode_facilitator!(
  /// Suspends the node until its single child chain settles.
  ChildFacilitator,
  "CHILD",
  ExecutionMode::Child
);
mode_facilitator!(
  /// Suspends the node until all of its child chains settle.
  ChildrenFacilitator,
  "CHILDREN",
  ExecutionMode::Children
);
mode_facilitator!(
  /// Suspends the node while its children run one after another.
  ChildChainFacilitator,
  "CHILD_CHAIN",
  ExecutionMode::ChildChain
);

#[cfg(test)]
mod tests {
  use cadence_ambiance::SetupAbstractions;
  use serde_json::json;

  use super::*;

  #[test]
  fn test_timeout_parameter() {
    let ambiance = Ambiance::new("pe", "plan", SetupAbstractions::new());

    let result = AsyncFacilitator
      .facilitate(&ambiance, &json!({ "timeoutMs": 1500 }))
      .unwrap();
    assert_eq!(result.mode, ExecutionMode::Async);
    assert_eq!(result.timeout, Some(Duration::from_millis(1500)));

    let result = ChildrenFacilitator
      .facilitate(&ambiance, &serde_json::Value::Null)
      .unwrap();
    assert_eq!(result.mode, ExecutionMode::Children);
    assert_eq!(result.timeout, None);

    let result = ChildChainFacilitator
      .facilitate(&ambiance, &json!({ "timeoutMs": 60000 }))
      .unwrap();
    assert_eq!(result.mode, ExecutionMode::ChildChain);
    assert_eq!(result.timeout, Some(Duration::from_secs(60)));

    let invalid = SyncFacilitator.facilitate(&ambiance, &json!({ "timeoutMs": "soon" }));
    assert!(matches!(
      invalid,
      Err(FacilitatorError::InvalidParameters { .. })
    ));
  }
}
