use std::collections::HashMap;
use std::sync::Arc;

use cadence_plan::Plan;

use crate::adviser::{
  Adviser, EndPlanAdviser, OnFailAdviser, OnSuccessAdviser, ResponseCodeSwitchAdviser,
  RetryAdviser,
};
use crate::error::RegistryError;
use crate::facilitator::{
  AsyncFacilitator, ChildChainFacilitator, ChildFacilitator, ChildrenFacilitator, Facilitator,
  SyncFacilitator,
};
use crate::step::{DummyStep, ForkStep, SectionChainStep, SectionStep, Step, WaitStep};

/// Steps, advisers and facilitators available to the engine, by type key.
#[derive(Default, Clone)]
pub struct Registry {
  steps: HashMap<String, Arc<dyn Step>>,
  advisers: HashMap<String, Arc<dyn Adviser>>,
  facilitators: HashMap<String, Arc<dyn Facilitator>>,
}

impl Registry {
  /// An empty registry.
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry holding every built-in step, adviser and facilitator.
  pub fn with_defaults() -> Self {
    let mut registry = Self::new();

    let steps: [Arc<dyn Step>; 5] = [
      Arc::new(DummyStep),
      Arc::new(ForkStep),
      Arc::new(SectionStep),
      Arc::new(SectionChainStep),
      Arc::new(WaitStep),
    ];
    for step in steps {
      registry.steps.insert(step.step_type().to_string(), step);
    }

    let advisers: [Arc<dyn Adviser>; 5] = [
      Arc::new(OnSuccessAdviser),
      Arc::new(OnFailAdviser),
      Arc::new(RetryAdviser),
      Arc::new(ResponseCodeSwitchAdviser),
      Arc::new(EndPlanAdviser),
    ];
    for adviser in advisers {
      registry
        .advisers
        .insert(adviser.adviser_type().to_string(), adviser);
    }

    let facilitators: [Arc<dyn Facilitator>; 5] = [
      Arc::new(SyncFacilitator),
      Arc::new(AsyncFacilitator),
      Arc::new(ChildFacilitator),
      Arc::new(ChildrenFacilitator),
      Arc::new(ChildChainFacilitator),
    ];
    for facilitator in facilitators {
      registry
        .facilitators
        .insert(facilitator.facilitator_type().to_string(), facilitator);
    }

    registry
  }

  pub fn register_step(&mut self, step: Arc<dyn Step>) -> Result<(), RegistryError> {
    let type_key = step.step_type().to_string();
    if self.steps.contains_key(&type_key) {
      return Err(RegistryError::AlreadyRegistered {
        kind: "step",
        type_key,
      });
    }
    self.steps.insert(type_key, step);
    Ok(())
  }

  pub fn register_adviser(&mut self, adviser: Arc<dyn Adviser>) -> Result<(), RegistryError> {
    let type_key = adviser.adviser_type().to_string();
    if self.advisers.contains_key(&type_key) {
      return Err(RegistryError::AlreadyRegistered {
        kind: "adviser",
        type_key,
      });
    }
    self.advisers.insert(type_key, adviser);
    Ok(())
  }

  pub fn register_facilitator(
    &mut self,
    facilitator: Arc<dyn Facilitator>,
  ) -> Result<(), RegistryError> {
    let type_key = facilitator.facilitator_type().to_string();
    if self.facilitators.contains_key(&type_key) {
      return Err(RegistryError::AlreadyRegistered {
        kind: "facilitator",
        type_key,
      });
    }
    self.facilitators.insert(type_key, facilitator);
    Ok(())
  }

  pub fn obtain_step(&self, step_type: &str) -> Result<Arc<dyn Step>, RegistryError> {
    self
      .steps
      .get(step_type)
      .cloned()
      .ok_or_else(|| RegistryError::StepNotRegistered(step_type.to_string()))
  }

  pub fn obtain_adviser(&self, adviser_type: &str) -> Result<Arc<dyn Adviser>, RegistryError> {
    self
      .advisers
      .get(adviser_type)
      .cloned()
      .ok_or_else(|| RegistryError::AdviserNotRegistered(adviser_type.to_string()))
  }

  pub fn obtain_facilitator(
    &self,
    facilitator_type: &str,
  ) -> Result<Arc<dyn Facilitator>, RegistryError> {
    self
      .facilitators
      .get(facilitator_type)
      .cloned()
      .ok_or_else(|| RegistryError::FacilitatorNotRegistered(facilitator_type.to_string()))
  }

  /// Check a plan against this registry.
  ///
  /// Runs [`Plan::validate`], then checks that every step, adviser and
  /// facilitator type is registered and that every node uuid named in their
  /// parameters exists in the plan.
  pub fn validate_plan(&self, plan: &Plan) -> Result<(), RegistryError> {
    plan.validate()?;

    let mut references: Vec<(&str, String)> = Vec::new();
    for node in &plan.nodes {
      let invalid = |message: String| RegistryError::InvalidParameters {
        node: node.uuid.clone(),
        message,
      };

      self.obtain_facilitator(&node.facilitator_obtainment.facilitator_type)?;

      let step = self.obtain_step(&node.step_type)?;
      let targets = step
        .referenced_nodes(&node.step_parameters)
        .map_err(|e| invalid(e.to_string()))?;
      references.extend(targets.into_iter().map(|to| (node.uuid.as_str(), to)));

      for obtainment in &node.adviser_obtainments {
        let adviser = self.obtain_adviser(&obtainment.adviser_type)?;
        let targets = adviser
          .referenced_nodes(&obtainment.parameters)
          .map_err(|e| invalid(e.to_string()))?;
        references.extend(targets.into_iter().map(|to| (node.uuid.as_str(), to)));
      }
    }

    plan.validate_references(references.iter().map(|(from, to)| (*from, to.as_str())))?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use cadence_plan::{PlanError, PlanNode};
  use serde_json::json;

  use super::*;

  #[test]
  fn test_defaults_registered() {
    let registry = Registry::with_defaults();
    for step in ["DUMMY", "FORK", "SECTION", "SECTION_CHAIN", "WAIT"] {
      registry.obtain_step(step).unwrap();
    }
    for adviser in [
      "ON_SUCCESS",
      "ON_FAIL",
      "RETRY",
      "RESPONSE_CODE_SWITCH",
      "END_PLAN",
    ] {
      registry.obtain_adviser(adviser).unwrap();
    }
    for facilitator in ["SYNC", "ASYNC", "CHILD", "CHILDREN", "CHILD_CHAIN"] {
      registry.obtain_facilitator(facilitator).unwrap();
    }
  }

  #[test]
  fn test_duplicate_registration() {
    let mut registry = Registry::with_defaults();
    let result = registry.register_step(Arc::new(DummyStep));
    assert!(matches!(
      result,
      Err(RegistryError::AlreadyRegistered { kind: "step", .. })
    ));
  }

  #[test]
  fn test_validate_plan_references() {
    let registry = Registry::with_defaults();
    let plan = Plan::new("plan", "fork")
      .with_node(
        PlanNode::new("fork", "fork", "FORK")
          .with_facilitator("CHILDREN", json!(null))
          .with_step_parameters(json!({ "parallelNodeIds": ["p1", "p2"] })),
      )
      .with_node(PlanNode::new("p1", "p1", "DUMMY"));

    let result = registry.validate_plan(&plan);
    assert!(matches!(
      result,
      Err(RegistryError::Plan(PlanError::DanglingReference { to, .. })) if to == "p2"
    ));

    let plan = plan.with_node(PlanNode::new("p2", "p2", "DUMMY"));
    registry.validate_plan(&plan).unwrap();
  }

  #[test]
  fn test_validate_plan_unknown_types() {
    let registry = Registry::with_defaults();

    let plan = Plan::new("plan", "a").with_node(PlanNode::new("a", "a", "SHELL"));
    assert!(matches!(
      registry.validate_plan(&plan),
      Err(RegistryError::StepNotRegistered(_))
    ));

    let plan = Plan::new("plan", "a")
      .with_node(PlanNode::new("a", "a", "DUMMY").with_adviser("MANUAL", json!({})));
    assert!(matches!(
      registry.validate_plan(&plan),
      Err(RegistryError::AdviserNotRegistered(_))
    ));

    let plan = Plan::new("plan", "a")
      .with_node(PlanNode::new("a", "a", "SECTION").with_step_parameters(json!({})));
    assert!(matches!(
      registry.validate_plan(&plan),
      Err(RegistryError::InvalidParameters { .. })
    ));
  }
}
