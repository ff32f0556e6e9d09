use std::collections::HashMap;
use std::sync::Arc;

use crate::node_map::{NodeExecutionMap, Resolved, Resolver};
use crate::snapshot::ExecutionSnapshot;

/// Resolves keys against the current node and its ancestors.
///
/// Walks upward through `parent_id`, skipping nodes marked
/// `skip_expression_chain`. A node matches on its identifier, or on its group
/// when `group_aliases` maps the key to a group name (`stage` -> `STAGE`).
#[derive(Debug, Clone)]
pub struct AncestorFunctor {
  snapshot: Arc<ExecutionSnapshot>,
  current: Option<String>,
  group_aliases: Arc<HashMap<String, String>>,
}

impl AncestorFunctor {
  pub fn new(
    snapshot: Arc<ExecutionSnapshot>,
    current: Option<String>,
    group_aliases: Arc<HashMap<String, String>>,
  ) -> Self {
    Self {
      snapshot,
      current,
      group_aliases,
    }
  }
}

impl Resolver for AncestorFunctor {
  fn resolve(&self, key: &str) -> Option<Resolved> {
    let alias = self.group_aliases.get(key);
    let mut cursor = self.current.clone();

    while let Some(id) = cursor {
      let node = self.snapshot.node(&id)?;
      let matches = node.identifier() == key
        || alias.is_some_and(|group| node.node.group.as_ref() == Some(group));
      if matches && !node.node.skip_expression_chain {
        let map = NodeExecutionMap::for_node(self.snapshot.clone(), &node.uuid)?;
        return Some(Resolved::Scope(Arc::new(map)));
      }
      cursor = node.parent_id.clone();
    }

    None
  }
}

/// Resolves keys against the immediate children of the current node.
#[derive(Debug, Clone)]
pub struct ChildFunctor {
  scope: NodeExecutionMap,
}

impl ChildFunctor {
  /// Children of `current`, or top-level node executions when `None`.
  pub fn new(snapshot: Arc<ExecutionSnapshot>, current: Option<&str>) -> Self {
    let scope = current
      .and_then(|id| NodeExecutionMap::for_node(snapshot.clone(), id))
      .unwrap_or_else(|| NodeExecutionMap::root(snapshot));
    Self { scope }
  }
}

impl Resolver for ChildFunctor {
  fn resolve(&self, key: &str) -> Option<Resolved> {
    self.scope.resolve_child(key)
  }
}

/// Resolves fully qualified paths from the plan execution root.
#[derive(Debug, Clone)]
pub struct QualifiedFunctor {
  root: NodeExecutionMap,
}

impl QualifiedFunctor {
  pub fn new(snapshot: Arc<ExecutionSnapshot>) -> Self {
    Self {
      root: NodeExecutionMap::root(snapshot),
    }
  }
}

impl Resolver for QualifiedFunctor {
  fn resolve(&self, key: &str) -> Option<Resolved> {
    self.root.resolve(key)
  }

  fn summary(&self) -> serde_json::Value {
    self.root.summary()
  }
}
