use std::sync::Arc;

use cadence_ambiance::Ambiance;
use cadence_store::{OutputKind, OutputScope, OutputStore, PublishedOutput};
use chrono::Utc;
use uuid::Uuid;

use crate::callback::CallbackSender;
use crate::error::StepError;

/// What a step sees of the engine while it runs.
#[derive(Clone)]
pub struct StepContext {
  ambiance: Ambiance,
  node_execution_id: String,
  outputs: Arc<dyn OutputStore>,
  callbacks: CallbackSender,
  callback_id: Option<String>,
}

impl StepContext {
  pub fn new(
    ambiance: Ambiance,
    node_execution_id: impl Into<String>,
    outputs: Arc<dyn OutputStore>,
    callbacks: CallbackSender,
  ) -> Self {
    Self {
      ambiance,
      node_execution_id: node_execution_id.into(),
      outputs,
      callbacks,
      callback_id: None,
    }
  }

  pub fn with_callback_id(mut self, callback_id: impl Into<String>) -> Self {
    self.callback_id = Some(callback_id.into());
    self
  }

  pub fn ambiance(&self) -> &Ambiance {
    &self.ambiance
  }

  pub fn node_execution_id(&self) -> &str {
    &self.node_execution_id
  }

  /// Correlation token issued for an async execution.
  pub fn callback_id(&self) -> Result<&str, StepError> {
    self
      .callback_id
      .as_deref()
      .ok_or_else(|| StepError::Failed {
        message: "no callback id issued; node is not running asynchronously".to_string(),
      })
  }

  pub fn callbacks(&self) -> &CallbackSender {
    &self.callbacks
  }

  /// Publish a sweeping output into `scope`.
  pub async fn publish_sweeping_output(
    &self,
    name: &str,
    value: serde_json::Value,
    scope: OutputScope,
  ) -> Result<(), StepError> {
    publish_output(
      self.outputs.as_ref(),
      &self.ambiance,
      &self.node_execution_id,
      OutputKind::SweepingOutput,
      &scope,
      name,
      value,
    )
    .await
  }

  /// Look up a sweeping output visible from this node.
  pub async fn resolve_sweeping_output(
    &self,
    name: &str,
  ) -> Result<Option<serde_json::Value>, StepError> {
    let output = self
      .outputs
      .resolve_output(
        self.ambiance.plan_execution_id(),
        &self.ambiance.scope_ids(),
        OutputKind::SweepingOutput,
        name,
      )
      .await?;
    Ok(output.map(|output| output.value))
  }
}

/// Publish an output from the node execution positioned at `ambiance`.
pub async fn publish_output(
  outputs: &dyn OutputStore,
  ambiance: &Ambiance,
  produced_by: &str,
  kind: OutputKind,
  scope: &OutputScope,
  name: &str,
  value: serde_json::Value,
) -> Result<(), StepError> {
  let scope_id = scope
    .scope_id(ambiance)
    .ok_or_else(|| StepError::InvalidScope {
      scope: format!("{scope:?}"),
      node_execution_id: produced_by.to_string(),
    })?;

  let output = PublishedOutput {
    uuid: Uuid::new_v4().to_string(),
    plan_execution_id: ambiance.plan_execution_id().to_string(),
    scope_id,
    kind,
    name: name.to_string(),
    value,
    produced_by: produced_by.to_string(),
    created_at: Utc::now(),
  };
  outputs.publish(&output).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use cadence_ambiance::{Level, SetupAbstractions};
  use cadence_store::{Error, InMemoryStore};
  use serde_json::json;

  use super::*;
  use crate::callback::callback_channel;

  fn context(store: Arc<InMemoryStore>) -> StepContext {
    let ambiance = Ambiance::new("pe-1", "plan-1", SetupAbstractions::new())
      .with_level(Level::new("s", "ne-s", "stage", "SECTION").with_group(Some("STAGE".into())))
      .with_level(Level::new("x", "ne-x", "x", "DUMMY"));
    let (callbacks, _receiver) = callback_channel();
    StepContext::new(ambiance, "ne-x", store, callbacks)
  }

  #[tokio::test]
  async fn test_publish_and_resolve() {
    let store = Arc::new(InMemoryStore::new());
    let ctx = context(store.clone());

    ctx
      .publish_sweeping_output("foo", json!({ "bar": 1 }), OutputScope::Node)
      .await
      .unwrap();
    ctx
      .publish_sweeping_output("env", json!("prod"), OutputScope::Group("STAGE".into()))
      .await
      .unwrap();

    assert_eq!(
      ctx.resolve_sweeping_output("foo").await.unwrap(),
      Some(json!({ "bar": 1 }))
    );
    assert_eq!(
      ctx.resolve_sweeping_output("env").await.unwrap(),
      Some(json!("prod"))
    );
    assert_eq!(ctx.resolve_sweeping_output("missing").await.unwrap(), None);

    let outputs = store.find_outputs("pe-1").await.unwrap();
    assert_eq!(outputs[1].scope_id, "ne-s");
  }

  #[tokio::test]
  async fn test_duplicate_and_invalid_scope() {
    let store = Arc::new(InMemoryStore::new());
    let ctx = context(store);

    ctx
      .publish_sweeping_output("foo", json!(1), OutputScope::Node)
      .await
      .unwrap();
    let duplicate = ctx
      .publish_sweeping_output("foo", json!(2), OutputScope::Node)
      .await;
    assert!(matches!(
      duplicate,
      Err(StepError::Output(Error::AlreadyExists(_)))
    ));

    let unknown_group = ctx
      .publish_sweeping_output("foo", json!(1), OutputScope::Group("NOPE".into()))
      .await;
    assert!(matches!(unknown_group, Err(StepError::InvalidScope { .. })));
  }

  #[test]
  fn test_callback_id_required() {
    let ctx = context(Arc::new(InMemoryStore::new()));
    assert!(ctx.callback_id().is_err());
    assert_eq!(ctx.with_callback_id("cb").callback_id().unwrap(), "cb");
  }
}
