use std::collections::BTreeMap;

use cadence_store::{Advise, NodeStatus};
use serde::Deserialize;

use crate::adviser::{AdviseEvent, Adviser, invalid_parameters};
use crate::error::AdviserError;
use crate::parse_parameters;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwitchParameters {
  /// Name of the outcome holding the result code.
  outcome: String,
  #[serde(default = "default_field")]
  field: String,
  /// Result code to next node uuid.
  mapping: BTreeMap<String, String>,
  #[serde(default)]
  default_node_id: Option<String>,
}

fn default_field() -> String {
  "response_code".to_string()
}

impl SwitchParameters {
  fn route(&self, outcomes: &BTreeMap<String, serde_json::Value>) -> Option<&String> {
    let code = outcomes
      .get(&self.outcome)
      .and_then(|outcome| outcome.get(&self.field))
      .and_then(|code| match code {
        serde_json::Value::String(code) => Some(code.clone()),
        serde_json::Value::Number(code) => Some(code.to_string()),
        serde_json::Value::Bool(code) => Some(code.to_string()),
        _ => None,
      });

    code
      .and_then(|code| self.mapping.get(&code))
      .or(self.default_node_id.as_ref())
  }
}

/// Branches on a result code published by the node.
///
/// Reads `outcomes[outcome][field]` and continues with the node mapped to
/// that code, or `default_node_id` when the code is unmapped.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseCodeSwitchAdviser;

impl ResponseCodeSwitchAdviser {
  pub const TYPE: &'static str = "RESPONSE_CODE_SWITCH";

  fn parameters(parameters: &serde_json::Value) -> Result<SwitchParameters, AdviserError> {
    parse_parameters(parameters).map_err(|e| invalid_parameters(Self::TYPE, e))
  }
}

impl Adviser for ResponseCodeSwitchAdviser {
  fn adviser_type(&self) -> &str {
    Self::TYPE
  }

  fn referenced_nodes(&self, parameters: &serde_json::Value) -> Result<Vec<String>, AdviserError> {
    let parameters = Self::parameters(parameters)?;
    Ok(
      parameters
        .mapping
        .into_values()
        .chain(parameters.default_node_id)
        .collect(),
    )
  }

  fn can_advise(&self, event: &AdviseEvent<'_>) -> bool {
    if event.status == NodeStatus::Aborted {
      return false;
    }
    match Self::parameters(event.parameters) {
      Ok(parameters) => parameters.route(event.outcomes).is_some(),
      Err(_) => true,
    }
  }

  fn on_advise_event(&self, event: &AdviseEvent<'_>) -> Result<Advise, AdviserError> {
    let parameters = Self::parameters(event.parameters)?;
    let next_node_id = parameters
      .route(event.outcomes)
      .cloned()
      .ok_or_else(|| AdviserError::NoRoute {
        adviser_type: Self::TYPE.to_string(),
        message: format!("no route for outcome {}", parameters.outcome),
      })?;
    Ok(Advise::NextStep { next_node_id })
  }
}
