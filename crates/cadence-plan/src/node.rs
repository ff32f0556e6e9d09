use serde::{Deserialize, Serialize};

/// Binding of a node to a registered adviser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdviserObtainment {
  #[serde(rename = "type")]
  pub adviser_type: String,
  #[serde(default)]
  pub parameters: serde_json::Value,
}

/// Binding of a node to a registered facilitator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FacilitatorObtainment {
  #[serde(rename = "type")]
  pub facilitator_type: String,
  #[serde(default)]
  pub parameters: serde_json::Value,
}

impl FacilitatorObtainment {
  pub fn new(facilitator_type: impl Into<String>) -> Self {
    Self {
      facilitator_type: facilitator_type.into(),
      parameters: serde_json::Value::Null,
    }
  }
}

/// A node of a plan.
///
/// `step_parameters` is an opaque payload interpreted by the step registered
/// for `step_type`. String leaves may contain `{{ ... }}` expressions that are
/// resolved against the running plan right before the step executes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanNode {
  pub uuid: String,
  pub identifier: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  pub step_type: String,
  #[serde(default)]
  pub step_parameters: serde_json::Value,
  /// Evaluated in order; the first adviser able to advise wins.
  #[serde(default)]
  pub adviser_obtainments: Vec<AdviserObtainment>,
  pub facilitator_obtainment: FacilitatorObtainment,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub group: Option<String>,
  /// Excluded from ancestor and expression walks; its children are addressed
  /// as if they belonged to its parent.
  #[serde(default)]
  pub skip_expression_chain: bool,
}

impl PlanNode {
  /// Create a node facilitated synchronously, with no advisers.
  pub fn new(
    uuid: impl Into<String>,
    identifier: impl Into<String>,
    step_type: impl Into<String>,
  ) -> Self {
    Self {
      uuid: uuid.into(),
      identifier: identifier.into(),
      name: None,
      step_type: step_type.into(),
      step_parameters: serde_json::Value::Null,
      adviser_obtainments: Vec::new(),
      facilitator_obtainment: FacilitatorObtainment::new("SYNC"),
      group: None,
      skip_expression_chain: false,
    }
  }

  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = Some(name.into());
    self
  }

  pub fn with_step_parameters(mut self, parameters: serde_json::Value) -> Self {
    self.step_parameters = parameters;
    self
  }

  pub fn with_facilitator(
    mut self,
    facilitator_type: impl Into<String>,
    parameters: serde_json::Value,
  ) -> Self {
    self.facilitator_obtainment = FacilitatorObtainment {
      facilitator_type: facilitator_type.into(),
      parameters,
    };
    self
  }

  pub fn with_adviser(
    mut self,
    adviser_type: impl Into<String>,
    parameters: serde_json::Value,
  ) -> Self {
    self.adviser_obtainments.push(AdviserObtainment {
      adviser_type: adviser_type.into(),
      parameters,
    });
    self
  }

  pub fn with_group(mut self, group: impl Into<String>) -> Self {
    self.group = Some(group.into());
    self
  }

  pub fn skip_expression_chain(mut self) -> Self {
    self.skip_expression_chain = true;
    self
  }
}
