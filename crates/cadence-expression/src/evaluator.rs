use std::collections::HashMap;
use std::sync::Arc;

use cadence_ambiance::Ambiance;
use cadence_store::{ExecutionStore, OutputKind, OutputStore};
use minijinja::value::{Object, Value};
use minijinja::{Environment, UndefinedBehavior};

use crate::error::ExpressionError;
use crate::functor::{AncestorFunctor, ChildFunctor, QualifiedFunctor};
use crate::node_map::{NodeExecutionMap, Resolved, Resolver};
use crate::snapshot::ExecutionSnapshot;

/// Evaluates expressions from the position of one node execution.
///
/// Top-level keys resolve as follows:
/// - `child`, `ancestor`, `qualified`: the matching functor
/// - `setup`: the plan's setup abstractions
/// - anything else: an ancestor with that identifier, then a node with that
///   identifier in an enclosing scope (siblings, then siblings of the parent,
///   ...), then an output visible from the current node, then the plan root.
#[derive(Debug, Clone)]
pub struct ExpressionEvaluator {
  snapshot: Arc<ExecutionSnapshot>,
  ambiance: Ambiance,
  group_aliases: Arc<HashMap<String, String>>,
}

impl ExpressionEvaluator {
  pub fn new(snapshot: Arc<ExecutionSnapshot>, ambiance: Ambiance) -> Self {
    Self {
      snapshot,
      ambiance,
      group_aliases: Arc::default(),
    }
  }

  /// Snapshot the plan execution of `ambiance` and position at its node.
  pub async fn load(
    executions: &dyn ExecutionStore,
    outputs: &dyn OutputStore,
    ambiance: Ambiance,
  ) -> Result<Self, ExpressionError> {
    let snapshot =
      ExecutionSnapshot::load(executions, outputs, ambiance.plan_execution_id()).await?;
    Ok(Self::new(Arc::new(snapshot), ambiance))
  }

  pub fn with_group_aliases(mut self, group_aliases: HashMap<String, String>) -> Self {
    self.group_aliases = Arc::new(group_aliases);
    self
  }

  fn current(&self) -> Option<&str> {
    self.ambiance.current_runtime_id()
  }

  /// Resolve a dotted path such as `build.output.items.0`.
  pub fn resolve_path(&self, path: &str) -> Option<Resolved> {
    let mut segments = path.split('.').map(str::trim);
    let first = segments.next().filter(|segment| !segment.is_empty())?;
    segments.try_fold(self.resolve(first)?, |resolved, segment| resolved.get(segment))
  }

  /// Resolve a dotted path to JSON; `None` when not found.
  pub fn resolve_value(&self, path: &str) -> Option<serde_json::Value> {
    self.resolve_path(path).map(|resolved| resolved.to_json())
  }

  /// Render a template.
  ///
  /// A template consisting of a single `{{ path }}` returns the resolved JSON
  /// value unchanged (null when not found); anything else renders to a string.
  /// Undefined lookups render as empty.
  pub fn render(&self, template: &str) -> Result<serde_json::Value, ExpressionError> {
    if let Some(path) = single_expression(template) {
      return Ok(self.resolve_value(path).unwrap_or(serde_json::Value::Null));
    }

    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    let context = Value::from_object(ResolverObject(Arc::new(self.clone())));

    env
      .render_str(template, context)
      .map(serde_json::Value::String)
      .map_err(|e| ExpressionError::Template {
        template: template.to_string(),
        message: e.to_string(),
      })
  }

  /// Render every string in `parameters` that contains an expression.
  pub fn resolve_parameters(
    &self,
    parameters: &serde_json::Value,
  ) -> Result<serde_json::Value, ExpressionError> {
    match parameters {
      serde_json::Value::String(template) if template.contains("{{") => self.render(template),
      serde_json::Value::Array(items) => items
        .iter()
        .map(|item| self.resolve_parameters(item))
        .collect::<Result<Vec<_>, _>>()
        .map(serde_json::Value::Array),
      serde_json::Value::Object(map) => map
        .iter()
        .map(|(key, value)| Ok((key.clone(), self.resolve_parameters(value)?)))
        .collect::<Result<serde_json::Map<_, _>, ExpressionError>>()
        .map(serde_json::Value::Object),
      other => Ok(other.clone()),
    }
  }

  fn resolve_in_enclosing_scopes(&self, key: &str) -> Option<Resolved> {
    let mut cursor = self
      .current()
      .and_then(|id| self.snapshot.node(id))
      .and_then(|node| node.parent_id.clone());

    while let Some(id) = cursor {
      let scope = NodeExecutionMap::for_node(self.snapshot.clone(), &id)?;
      if let Some(found) = scope.resolve_child(key) {
        return Some(found);
      }
      cursor = scope.node().and_then(|node| node.parent_id.clone());
    }

    None
  }

  fn resolve_visible_output(&self, key: &str) -> Option<Resolved> {
    let scope_ids = self.ambiance.scope_ids();
    self
      .snapshot
      .output(&scope_ids, OutputKind::Outcome, key)
      .or_else(|| {
        self
          .snapshot
          .output(&scope_ids, OutputKind::SweepingOutput, key)
      })
      .cloned()
      .map(Resolved::Value)
  }
}

impl Resolver for ExpressionEvaluator {
  fn resolve(&self, key: &str) -> Option<Resolved> {
    match key {
      "child" => Some(Resolved::Scope(Arc::new(ChildFunctor::new(
        self.snapshot.clone(),
        self.current(),
      )))),
      "ancestor" => Some(Resolved::Scope(Arc::new(AncestorFunctor::new(
        self.snapshot.clone(),
        self.current().map(str::to_string),
        self.group_aliases.clone(),
      )))),
      "qualified" => Some(Resolved::Scope(Arc::new(QualifiedFunctor::new(
        self.snapshot.clone(),
      )))),
      "setup" => serde_json::to_value(self.ambiance.setup_abstractions())
        .ok()
        .map(Resolved::Value),
      _ => AncestorFunctor::new(
        self.snapshot.clone(),
        self.current().map(str::to_string),
        self.group_aliases.clone(),
      )
      .resolve(key)
      .or_else(|| self.resolve_in_enclosing_scopes(key))
      .or_else(|| self.resolve_visible_output(key))
      .or_else(|| QualifiedFunctor::new(self.snapshot.clone()).resolve(key)),
    }
  }
}

/// Exposes a resolver to minijinja as a lazily evaluated map.
#[derive(Debug)]
struct ResolverObject(Arc<dyn Resolver>);

impl Object for ResolverObject {
  fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
    let key = key.as_str()?;
    self.0.resolve(key).map(to_template_value)
  }
}

fn to_template_value(resolved: Resolved) -> Value {
  match resolved {
    Resolved::Scope(resolver) => Value::from_object(ResolverObject(resolver)),
    Resolved::Value(value) => Value::from_serialize(&value),
    Resolved::List(items) => Value::from(
      items
        .into_iter()
        .map(to_template_value)
        .collect::<Vec<_>>(),
    ),
  }
}

/// The path inside a template made of exactly one `{{ path }}`.
fn single_expression(template: &str) -> Option<&str> {
  let inner = template
    .trim()
    .strip_prefix("{{")?
    .strip_suffix("}}")?
    .trim();

  let mut chars = inner.chars();
  let first = chars.next()?;
  let is_path = (first.is_ascii_alphabetic() || first == '_')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
  is_path.then_some(inner)
}

#[cfg(test)]
mod tests {
  use cadence_ambiance::{Level, SetupAbstractions};
  use cadence_plan::PlanNode;
  use cadence_store::{NodeExecution, NodeStatus, PublishedOutput};
  use chrono::Utc;
  use serde_json::json;

  use super::*;

  struct Tree {
    nodes: Vec<NodeExecution>,
    outputs: Vec<PublishedOutput>,
    root: Ambiance,
  }

  impl Tree {
    fn new() -> Self {
      let mut setup = SetupAbstractions::new();
      setup.insert("projectId".to_string(), "proj-1".to_string());
      Self {
        nodes: Vec::new(),
        outputs: Vec::new(),
        root: Ambiance::new("pe", "plan", setup),
      }
    }

    fn add(&mut self, id: &str, identifier: &str, parent: Option<&str>) -> &mut NodeExecution {
      self.add_node(id, PlanNode::new(id, identifier, "DUMMY"), parent)
    }

    fn add_node(
      &mut self,
      id: &str,
      node: PlanNode,
      parent: Option<&str>,
    ) -> &mut NodeExecution {
      let base = match parent {
        Some(parent) => self
          .nodes
          .iter()
          .find(|n| n.uuid == parent)
          .map(|n| n.ambiance.clone())
          .unwrap(),
        None => self.root.clone(),
      };
      let level = Level::new(&node.uuid, id, &node.identifier, &node.step_type)
        .with_group(node.group.clone())
        .with_skip_expression_chain(node.skip_expression_chain);
      let mut execution = NodeExecution::new(id, "pe", node, base.with_level(level))
        .with_parent(parent.map(str::to_string));
      execution.status = NodeStatus::Succeeded;
      self.nodes.push(execution);
      self.nodes.last_mut().unwrap()
    }

    fn publish(&mut self, scope_id: &str, kind: OutputKind, name: &str, value: serde_json::Value) {
      self.outputs.push(PublishedOutput {
        uuid: format!("{scope_id}-{name}"),
        plan_execution_id: "pe".to_string(),
        scope_id: scope_id.to_string(),
        kind,
        name: name.to_string(),
        value,
        produced_by: scope_id.to_string(),
        created_at: Utc::now(),
      });
    }

    fn evaluator_at(&self, id: &str) -> ExpressionEvaluator {
      let ambiance = self
        .nodes
        .iter()
        .find(|n| n.uuid == id)
        .map(|n| n.ambiance.clone())
        .unwrap();
      let snapshot = ExecutionSnapshot::new("pe", self.nodes.clone(), self.outputs.clone());
      ExpressionEvaluator::new(Arc::new(snapshot), ambiance)
    }
  }

  #[test]
  fn test_sweeping_output_lookup() {
    let mut tree = Tree::new();
    tree.add("ne-x", "X", None);
    tree.add("ne-z", "Z", None);
    tree.publish("ne-x", OutputKind::SweepingOutput, "foo", json!({ "bar": 1 }));

    let evaluator = tree.evaluator_at("ne-z");
    assert_eq!(evaluator.resolve_value("X.foo.bar"), Some(json!(1)));
    assert_eq!(evaluator.resolve_value("X.nonexistent"), None);
    assert_eq!(evaluator.resolve_value("nobody.foo"), None);
  }

  #[test]
  fn test_resolution_order() {
    let mut tree = Tree::new();
    let x = tree.add("ne-x", "X", None);
    x.resolved_step_parameters = Some(json!({ "status_code": 200, "shared": "param" }));
    x.start_ts = Some(Utc::now());
    tree.add("ne-shared", "shared", Some("ne-x"));
    tree.publish("ne-x", OutputKind::Outcome, "result", json!("outcome"));
    tree.publish("ne-x", OutputKind::SweepingOutput, "result", json!("sweeping"));
    tree.publish("ne-x", OutputKind::SweepingOutput, "only_sweeping", json!(true));

    let evaluator = tree.evaluator_at("ne-x");
    // Child beats step parameter of the same name.
    assert_eq!(
      evaluator.resolve_value("X.shared.status"),
      Some(json!("succeeded"))
    );
    assert_eq!(evaluator.resolve_value("X.status"), Some(json!("succeeded")));
    assert!(evaluator.resolve_value("X.startTs").unwrap().is_string());
    assert_eq!(evaluator.resolve_value("X.endTs"), Some(serde_json::Value::Null));
    assert_eq!(evaluator.resolve_value("X.status_code"), Some(json!(200)));
    // Outcome beats sweeping output.
    assert_eq!(evaluator.resolve_value("X.result"), Some(json!("outcome")));
    assert_eq!(evaluator.resolve_value("X.only_sweeping"), Some(json!(true)));
  }

  #[test]
  fn test_repeated_identifiers_collapse_into_list() {
    let mut tree = Tree::new();
    tree.add("ne-y", "Y", None);
    tree.add("ne-l1", "loopItem", Some("ne-y"));
    tree.add("ne-l2", "loopItem", Some("ne-y"));
    tree.add("ne-single", "single", Some("ne-y"));
    tree.publish("ne-l1", OutputKind::Outcome, "index", json!(0));
    tree.publish("ne-l2", OutputKind::Outcome, "index", json!(1));

    let evaluator = tree.evaluator_at("ne-y");
    match evaluator.resolve_path("Y.loopItem") {
      Some(Resolved::List(items)) => assert_eq!(items.len(), 2),
      other => panic!("expected a list, got {other:?}"),
    }
    assert_eq!(evaluator.resolve_value("Y.loopItem.1.index"), Some(json!(1)));
    assert!(matches!(
      evaluator.resolve_path("Y.single"),
      Some(Resolved::Scope(_))
    ));
  }

  #[test]
  fn test_old_retries_and_skipped_nodes() {
    let mut tree = Tree::new();
    tree.add("ne-p", "parent", None);
    tree.add("ne-old", "attempt", Some("ne-p")).is_old_retry = true;
    tree.add("ne-new", "attempt", Some("ne-p"));
    tree.add_node(
      "ne-wrap",
      PlanNode::new("wrap", "wrapper", "SECTION").skip_expression_chain(),
      Some("ne-p"),
    );
    tree.add("ne-inner", "inner", Some("ne-wrap"));
    tree.publish("ne-new", OutputKind::Outcome, "n", json!("new"));

    let evaluator = tree.evaluator_at("ne-inner");
    assert_eq!(evaluator.resolve_value("parent.attempt.n"), Some(json!("new")));
    // Flattened through the skipped wrapper.
    assert_eq!(
      evaluator.resolve_value("parent.inner.status"),
      Some(json!("succeeded"))
    );
    assert_eq!(evaluator.resolve_value("parent.wrapper"), None);
  }

  #[test]
  fn test_functors() {
    let mut tree = Tree::new();
    tree.add_node(
      "ne-stage",
      PlanNode::new("stage", "deploy", "SECTION").with_group("STAGE"),
      None,
    );
    tree.add("ne-step", "rollout", Some("ne-stage"));
    tree.add("ne-sib", "verify", Some("ne-stage"));
    tree.add("ne-other", "other", None);
    tree.publish("ne-stage", OutputKind::SweepingOutput, "env", json!("prod"));

    let mut aliases = HashMap::new();
    aliases.insert("stage".to_string(), "STAGE".to_string());
    let evaluator = tree.evaluator_at("ne-step").with_group_aliases(aliases);

    assert_eq!(evaluator.resolve_value("ancestor.deploy.env"), Some(json!("prod")));
    assert_eq!(evaluator.resolve_value("ancestor.stage.env"), Some(json!("prod")));
    assert_eq!(evaluator.resolve_value("stage.env"), Some(json!("prod")));
    assert_eq!(evaluator.resolve_value("ancestor.other"), None);
    assert_eq!(
      evaluator.resolve_value("qualified.other.status"),
      Some(json!("succeeded"))
    );
    assert_eq!(
      evaluator.resolve_value("qualified.deploy.verify.status"),
      Some(json!("succeeded"))
    );
    // Sibling through the enclosing scope.
    assert_eq!(evaluator.resolve_value("verify.status"), Some(json!("succeeded")));
    // Output visible from the current node's ambiance.
    assert_eq!(evaluator.resolve_value("env"), Some(json!("prod")));
    assert_eq!(evaluator.resolve_value("setup.projectId"), Some(json!("proj-1")));

    let at_stage = tree.evaluator_at("ne-stage");
    assert_eq!(
      at_stage.resolve_value("child.rollout.status"),
      Some(json!("succeeded"))
    );
    assert_eq!(at_stage.resolve_value("child.other"), None);
  }

  #[test]
  fn test_render_templates() {
    let mut tree = Tree::new();
    tree.add("ne-build", "build", None);
    tree.add("ne-deploy", "deploy", None);
    tree.publish(
      "ne-build",
      OutputKind::Outcome,
      "artifact",
      json!({ "image": "app:1.2", "layers": [1, 2, 3] }),
    );

    let evaluator = tree.evaluator_at("ne-deploy");
    assert_eq!(
      evaluator.render("{{ build.artifact.layers }}").unwrap(),
      json!([1, 2, 3])
    );
    assert_eq!(
      evaluator
        .render("deploying {{ build.artifact.image }} to {{ setup.projectId }}")
        .unwrap(),
      json!("deploying app:1.2 to proj-1")
    );
    assert_eq!(
      evaluator.render("{{ build.missing }}").unwrap(),
      serde_json::Value::Null
    );
    assert_eq!(
      evaluator.render("[{{ build.missing.deeper }}]").unwrap(),
      json!("[]")
    );

    let parameters = json!({
      "image": "{{ build.artifact.image }}",
      "count": 3,
      "tags": ["{{ build.status }}", "static"]
    });
    assert_eq!(
      evaluator.resolve_parameters(&parameters).unwrap(),
      json!({ "image": "app:1.2", "count": 3, "tags": ["succeeded", "static"] })
    );
  }

  #[test]
  fn test_invalid_template() {
    let tree = {
      let mut tree = Tree::new();
      tree.add("ne-a", "a", None);
      tree
    };
    let result = tree.evaluator_at("ne-a").render("{{ a.status ");
    assert!(matches!(result, Err(ExpressionError::Template { .. })));
  }

  #[test]
  fn test_single_expression() {
    assert_eq!(single_expression("{{ a.b.c }}"), Some("a.b.c"));
    assert_eq!(single_expression("  {{a}}  "), Some("a"));
    assert_eq!(single_expression("{{ a }} and {{ b }}"), None);
    assert_eq!(single_expression("{{ a | upper }}"), None);
    assert_eq!(single_expression("plain"), None);
  }
}
