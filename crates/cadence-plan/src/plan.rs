use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::PlanError;
use crate::node::PlanNode;

/// A plan ready to be started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
  pub uuid: String,
  pub nodes: Vec<PlanNode>,
  pub starting_node_id: String,
  #[serde(default)]
  pub setup_abstractions: BTreeMap<String, String>,
}

impl Plan {
  pub fn new(uuid: impl Into<String>, starting_node_id: impl Into<String>) -> Self {
    Self {
      uuid: uuid.into(),
      nodes: Vec::new(),
      starting_node_id: starting_node_id.into(),
      setup_abstractions: BTreeMap::new(),
    }
  }

  /// Parse a plan from its JSON document.
  pub fn from_json(document: &str) -> Result<Self, PlanError> {
    Ok(serde_json::from_str(document)?)
  }

  pub fn with_node(mut self, node: PlanNode) -> Self {
    self.nodes.push(node);
    self
  }

  pub fn with_setup_abstraction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.setup_abstractions.insert(key.into(), value.into());
    self
  }

  /// Get a node by uuid.
  pub fn fetch_node(&self, uuid: &str) -> Option<&PlanNode> {
    self.nodes.iter().find(|node| node.uuid == uuid)
  }

  pub fn fetch_starting_node(&self) -> Result<&PlanNode, PlanError> {
    self
      .fetch_node(&self.starting_node_id)
      .ok_or_else(|| PlanError::StartingNodeNotFound(self.starting_node_id.clone()))
  }

  /// Check the structural invariants of the plan.
  ///
  /// References carried inside adviser and step parameters are checked by the
  /// registry, which knows how to read them.
  pub fn validate(&self) -> Result<(), PlanError> {
    self.fetch_starting_node()?;

    let mut seen = HashSet::new();
    for node in &self.nodes {
      if !seen.insert(node.uuid.as_str()) {
        return Err(PlanError::DuplicateNode(node.uuid.clone()));
      }
      if node.identifier.trim().is_empty() {
        return Err(PlanError::EmptyIdentifier {
          uuid: node.uuid.clone(),
        });
      }
    }

    Ok(())
  }

  /// Check that every `(from, to)` reference points at a node of this plan.
  pub fn validate_references<'a>(
    &self,
    references: impl IntoIterator<Item = (&'a str, &'a str)>,
  ) -> Result<(), PlanError> {
    for (from, to) in references {
      if self.fetch_node(to).is_none() {
        return Err(PlanError::DanglingReference {
          from: from.to_string(),
          to: to.to_string(),
        });
      }
    }
    Ok(())
  }
}
