use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use cadence_store::{ExecutionMode, ExecutionStore, NodeExecution};
use tracing::instrument;

use crate::error::GraphError;
use crate::vertex::{GraphVertex, Subgraph};

/// Generates graphs from the records of an execution store.
pub struct GraphGenerator {
  store: Arc<dyn ExecutionStore>,
}

impl GraphGenerator {
  pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
    Self { store }
  }

  /// Build the graph of a plan execution from its current records.
  #[instrument(name = "generate_graph", skip(self))]
  pub async fn generate_graph_vertex(
    &self,
    plan_execution_id: &str,
  ) -> Result<GraphVertex, GraphError> {
    let records = self.store.find_node_executions(plan_execution_id).await?;
    if records.is_empty() {
      return Err(GraphError::InvalidRequest {
        message: format!("no nodes found for plan execution {plan_execution_id}"),
      });
    }

    let starting_node_id = match self.store.get_plan_execution(plan_execution_id).await {
      Ok(execution) => Some(execution.plan.starting_node_id),
      Err(cadence_store::Error::NotFound(_)) => None,
      Err(e) => return Err(e.into()),
    };

    build_graph(&records, starting_node_id.as_deref())
  }
}

struct Index<'a> {
  by_id: HashMap<&'a str, &'a NodeExecution>,
  // parent id -> live chain heads, in creation order
  heads: HashMap<&'a str, Vec<&'a NodeExecution>>,
}

impl<'a> Index<'a> {
  fn new(records: &'a [NodeExecution]) -> Result<Self, GraphError> {
    let by_id: HashMap<&str, &NodeExecution> = records
      .iter()
      .map(|record| (record.uuid.as_str(), record))
      .collect();

    for record in records {
      let references = [
        ("parent", &record.parent_id),
        ("previous", &record.previous_id),
        ("next", &record.next_id),
      ];
      for (kind, reference) in references {
        if let Some(target) = reference
          && !by_id.contains_key(target.as_str())
        {
          return Err(GraphError::unexpected(format!(
            "node execution {} references missing {kind} {target}",
            record.uuid
          )));
        }
      }
    }

    let mut heads: HashMap<&str, Vec<&NodeExecution>> = HashMap::new();
    for record in records {
      if record.is_old_retry || record.previous_id.is_some() {
        continue;
      }
      if let Some(parent) = &record.parent_id {
        heads.entry(parent.as_str()).or_default().push(record);
      }
    }

    Ok(Self { by_id, heads })
  }

  fn chain_heads(&self, parent: &str) -> &[&'a NodeExecution] {
    self.heads.get(parent).map_or(&[], Vec::as_slice)
  }
}

/// Build the graph from the records of one plan execution.
///
/// `starting_node_id` disambiguates the root when several top-level records
/// have no predecessor.
pub fn build_graph(
  records: &[NodeExecution],
  starting_node_id: Option<&str>,
) -> Result<GraphVertex, GraphError> {
  if records.is_empty() {
    return Err(GraphError::InvalidRequest {
      message: "no nodes found".to_string(),
    });
  }

  let index = Index::new(records)?;
  let roots: Vec<&NodeExecution> = records
    .iter()
    .filter(|record| {
      !record.is_old_retry && record.parent_id.is_none() && record.previous_id.is_none()
    })
    .collect();

  let root = match roots.as_slice() {
    [] => return Err(GraphError::unexpected("no root node execution")),
    [root] => *root,
    _ => starting_node_id
      .and_then(|start| roots.iter().find(|record| record.node.uuid == start))
      .copied()
      .ok_or_else(|| GraphError::unexpected("ambiguous root node execution"))?,
  };

  let mut visited = HashSet::new();
  build_chain(&index, root, &mut visited)
}

fn build_chain<'a>(
  index: &Index<'a>,
  head: &'a NodeExecution,
  visited: &mut HashSet<&'a str>,
) -> Result<GraphVertex, GraphError> {
  let mut chain = Vec::new();
  let mut cursor = Some(head);
  while let Some(record) = cursor {
    if !visited.insert(record.uuid.as_str()) {
      return Err(GraphError::unexpected(format!(
        "node execution {} is reachable twice",
        record.uuid
      )));
    }
    chain.push(record);
    cursor = record
      .next_id
      .as_deref()
      .and_then(|next| index.by_id.get(next))
      .copied();
  }

  let mut next: Option<Box<GraphVertex>> = None;
  for record in chain.into_iter().rev() {
    let mut vertex = GraphVertex::from_record(record);
    vertex.subgraph = build_subgraph(index, record, visited)?;
    vertex.next = next.take();
    next = Some(Box::new(vertex));
  }

  next
    .map(|vertex| *vertex)
    .ok_or_else(|| GraphError::unexpected("empty chain"))
}

fn build_subgraph<'a>(
  index: &Index<'a>,
  record: &'a NodeExecution,
  visited: &mut HashSet<&'a str>,
) -> Result<Option<Subgraph>, GraphError> {
  let heads = index.chain_heads(&record.uuid);

  match record.mode {
    Some(ExecutionMode::Child | ExecutionMode::ChildChain) => match heads {
      [] => Ok(None),
      [head] => Ok(Some(Subgraph::Section {
        head: Box::new(build_chain(index, head, visited)?),
      })),
      _ => Err(GraphError::unexpected(format!(
        "node execution {} runs a single child chain but has {} chains",
        record.uuid,
        heads.len()
      ))),
    },
    Some(ExecutionMode::Children) => {
      let mut chains = HashMap::new();
      for head in heads {
        chains.insert(head.uuid.clone(), build_chain(index, head, visited)?);
      }
      Ok(Some(Subgraph::Fork { heads: chains }))
    }
    _ => Ok(None),
  }
}

#[cfg(test)]
mod tests {
  use cadence_ambiance::{Ambiance, SetupAbstractions};
  use cadence_plan::{Plan, PlanNode};
  use cadence_store::{InMemoryStore, NodeStatus, PlanExecution};

  use super::*;

  fn record(id: &str, mode: ExecutionMode) -> NodeExecution {
    let ambiance = Ambiance::new("pe", "plan", SetupAbstractions::new());
    let mut record = NodeExecution::new(id, "pe", PlanNode::new(id, id, "DUMMY"), ambiance);
    record.mode = Some(mode);
    record.status = NodeStatus::Succeeded;
    record
  }

  fn child(id: &str, parent: &str) -> NodeExecution {
    record(id, ExecutionMode::Sync).with_parent(Some(parent.to_string()))
  }

  fn link(records: &mut [NodeExecution], from: &str, to: &str) {
    for record in records.iter_mut() {
      if record.uuid == from {
        record.next_id = Some(to.to_string());
      }
      if record.uuid == to {
        record.previous_id = Some(from.to_string());
      }
    }
  }

  #[test]
  fn test_linear_chain() {
    let mut records = vec![record("a", ExecutionMode::Sync), record("b", ExecutionMode::Sync)];
    link(&mut records, "a", "b");

    let graph = build_graph(&records, None).unwrap();
    assert_eq!(graph.uuid, "a");
    assert!(graph.subgraph.is_none());
    let next = graph.next.as_ref().unwrap();
    assert_eq!(next.uuid, "b");
    assert!(next.next.is_none());
    assert_eq!(graph.vertex_count(), 2);
  }

  #[test]
  fn test_fork_subgraph() {
    let records = vec![
      record("fork", ExecutionMode::Children),
      child("p1", "fork"),
      child("p2", "fork"),
    ];

    let graph = build_graph(&records, None).unwrap();
    assert!(graph.next.is_none());
    match graph.subgraph {
      Some(Subgraph::Fork { heads }) => {
        let mut ids: Vec<_> = heads.keys().cloned().collect();
        ids.sort();
        assert_eq!(ids, vec!["p1", "p2"]);
        assert!(heads.values().all(|head| head.next.is_none()));
      }
      other => panic!("expected fork subgraph, got {other:?}"),
    }
  }

  #[test]
  fn test_section_with_inner_chain() {
    let mut records = vec![
      record("section", ExecutionMode::Child),
      child("c1", "section"),
      child("c2", "section"),
      record("after", ExecutionMode::Sync),
    ];
    link(&mut records, "c1", "c2");
    link(&mut records, "section", "after");

    let graph = build_graph(&records, None).unwrap();
    match &graph.subgraph {
      Some(Subgraph::Section { head }) => {
        assert_eq!(head.uuid, "c1");
        assert_eq!(head.next.as_ref().unwrap().uuid, "c2");
      }
      other => panic!("expected section subgraph, got {other:?}"),
    }
    assert_eq!(graph.next.as_ref().unwrap().uuid, "after");
    assert_eq!(graph.vertex_count(), 4);
    assert!(graph.find("c2").is_some());
  }

  #[test]
  fn test_old_retries_are_omitted() {
    let mut old = record("a1", ExecutionMode::Sync);
    old.is_old_retry = true;
    old.status = NodeStatus::Failed;
    let mut retry = record("a2", ExecutionMode::Sync);
    retry.retry_ids = vec!["a1".to_string()];

    let graph = build_graph(&[old, retry], None).unwrap();
    assert_eq!(graph.uuid, "a2");
    assert_eq!(graph.retry_ids, vec!["a1"]);
    assert_eq!(graph.vertex_count(), 1);
  }

  #[test]
  fn test_dangling_references() {
    let mut records = vec![record("a", ExecutionMode::Sync)];
    records[0].next_id = Some("ghost".to_string());
    assert!(matches!(
      build_graph(&records, None),
      Err(GraphError::UnexpectedState { .. })
    ));

    let records = vec![record("a", ExecutionMode::Sync), child("c", "ghost")];
    assert!(matches!(
      build_graph(&records, None),
      Err(GraphError::UnexpectedState { .. })
    ));

    let mut records = vec![record("a", ExecutionMode::Sync)];
    records[0].previous_id = Some("ghost".to_string());
    assert!(matches!(
      build_graph(&records, None),
      Err(GraphError::UnexpectedState { .. })
    ));
  }

  #[test]
  fn test_ambiguous_root_uses_starting_node() {
    let records = vec![record("x", ExecutionMode::Sync), record("y", ExecutionMode::Sync)];
    assert!(matches!(
      build_graph(&records, None),
      Err(GraphError::UnexpectedState { .. })
    ));
    assert_eq!(build_graph(&records, Some("y")).unwrap().uuid, "y");
  }

  #[tokio::test]
  async fn test_generate_from_store() {
    let store = Arc::new(InMemoryStore::new());
    let generator = GraphGenerator::new(store.clone());

    let missing = generator.generate_graph_vertex("pe").await;
    assert!(matches!(missing, Err(GraphError::InvalidRequest { .. })));

    let plan = Plan::new("plan", "a").with_node(PlanNode::new("a", "a", "DUMMY"));
    store
      .save_plan_execution(&PlanExecution::new("pe", plan, "tester"))
      .await
      .unwrap();
    store
      .save_node_execution(&record("a", ExecutionMode::Sync))
      .await
      .unwrap();

    let graph = generator.generate_graph_vertex("pe").await.unwrap();
    assert_eq!(graph.identifier, "a");
    assert_eq!(graph.status, NodeStatus::Succeeded);
  }
}
