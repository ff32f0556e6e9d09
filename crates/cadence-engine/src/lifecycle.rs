//! Node execution lifecycle: claim, facilitate, execute, complete, advise.
//!
//! Every step of the lifecycle starts from a compare-and-set claim on the
//! stored status, so a node is only ever driven by one task. Work that
//! continues elsewhere in the tree (the next node, a retry, a resumed parent)
//! is handed to a fresh task through `dispatch_*`.

use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use cadence_ambiance::{Ambiance, Level};
use cadence_expression::{ExpressionError, ExpressionEvaluator};
use cadence_plan::PlanNode;
use cadence_sdk::{
  AdviseEvent, ChildOutcome, FacilitationResult, Step, StepContext, StepError, StepResponse,
  publish_output,
};
use cadence_store::{
  Advise, ExecutionMode, ExecutionStatus, FailureInfo, NodeExecution, NodeStatus, OutputKind,
  PlanExecution, PublishedOutput,
};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::engine::Inner;
use crate::error::EngineError;
use crate::events::ExecutionEvent;

/// Create a queued node execution for `plan_node`, positioned by `ambiance`
/// from the level of the new record.
pub(crate) fn new_node_execution(
  plan_execution_id: &str,
  plan_node: &PlanNode,
  ambiance: impl FnOnce(Level) -> Ambiance,
) -> NodeExecution {
  let uuid = Uuid::new_v4().to_string();
  let level = Level::new(
    &plan_node.uuid,
    &uuid,
    &plan_node.identifier,
    &plan_node.step_type,
  )
  .with_group(plan_node.group.clone())
  .with_skip_expression_chain(plan_node.skip_expression_chain);

  NodeExecution::new(uuid, plan_execution_id, plan_node.clone(), ambiance(level))
}

fn errored(message: String) -> StepResponse {
  StepResponse::failed(message).with_status(NodeStatus::Errored)
}

fn deadline(timeout: Duration) -> DateTime<Utc> {
  let now = Utc::now();
  chrono::Duration::from_std(timeout)
    .ok()
    .and_then(|timeout| now.checked_add_signed(timeout))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
  panic
    .downcast_ref::<&str>()
    .copied()
    .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
    .unwrap_or("unknown panic")
}

/// Run step code, turning step errors and panics into a failure message.
async fn guarded<T>(work: impl Future<Output = Result<T, StepError>>) -> Result<T, String> {
  match AssertUnwindSafe(work).catch_unwind().await {
    Ok(result) => result.map_err(|e| e.to_string()),
    Err(panic) => Err(format!("step panicked: {}", panic_message(panic.as_ref()))),
  }
}

fn guarded_sync<T>(work: impl FnOnce() -> Result<T, StepError>) -> Result<T, String> {
  match std::panic::catch_unwind(AssertUnwindSafe(work)) {
    Ok(result) => result.map_err(|e| e.to_string()),
    Err(panic) => Err(format!("step panicked: {}", panic_message(panic.as_ref()))),
  }
}

/// Outcomes published by one node execution, by name.
fn outcomes_of(
  outputs: &[PublishedOutput],
  node_execution_id: &str,
) -> BTreeMap<String, serde_json::Value> {
  outputs
    .iter()
    .filter(|output| output.kind == OutputKind::Outcome && output.produced_by == node_execution_id)
    .map(|output| (output.name.clone(), output.value.clone()))
    .collect()
}

/// Position of a child chain: the tail of the live chain, and the next
/// element to start when the chain carries on.
///
/// Elements are linked through `next_id`; the tail of each finished element
/// carries an `END_CHAIN` advise pointing at the head of the next one.
fn next_chain_element<'a, 'c>(
  children: &'a [NodeExecution],
  chain: &'c [String],
) -> Option<(Option<&'a NodeExecution>, &'c str)> {
  let live: HashMap<&str, &NodeExecution> = children
    .iter()
    .filter(|child| !child.is_old_retry)
    .map(|child| (child.uuid.as_str(), child))
    .collect();

  let mut cursor = live.values().copied().find(|child| child.previous_id.is_none());
  let mut started = usize::from(cursor.is_some());
  let mut tail = None;
  for _ in 0..live.len() {
    let Some(node) = cursor else {
      break;
    };
    tail = Some(node);
    cursor = node.next_id.as_deref().and_then(|id| live.get(id).copied());
    if cursor.is_some() && node.adviser_response == Some(Advise::EndChain) {
      started += 1;
    }
  }

  if tail.is_some_and(|tail| tail.status.is_failure()) {
    return None;
  }
  chain.get(started).map(|next| (tail, next.as_str()))
}

impl Inner {
  /// Start a queued node execution on its own task.
  pub(crate) fn dispatch_start(self: &Arc<Self>, node_execution_id: String, delay: Option<Duration>) {
    let inner = Arc::clone(self);
    tokio::spawn(async move {
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      if let Err(e) = inner.start_node(&node_execution_id).await {
        error!(%node_execution_id, error = %e, "node_start_failed");
      }
    });
  }

  /// Resume a claimed parent whose children all settled.
  fn dispatch_join(self: &Arc<Self>, parent: NodeExecution) {
    let inner = Arc::clone(self);
    tokio::spawn(async move {
      let node_execution_id = parent.uuid.clone();
      if let Err(e) = inner.resume_parent(parent).await {
        error!(%node_execution_id, error = %e, "node_join_failed");
      }
    });
  }

  pub(crate) async fn evaluator(&self, ambiance: Ambiance) -> Result<ExpressionEvaluator, ExpressionError> {
    let evaluator =
      ExpressionEvaluator::load(self.executions.as_ref(), self.outputs.as_ref(), ambiance).await?;
    Ok(evaluator.with_group_aliases(self.config.group_aliases.clone()))
  }

  async fn resolve_parameters(&self, node: &NodeExecution) -> Result<serde_json::Value, ExpressionError> {
    let parameters = &node.node.step_parameters;
    if !parameters.to_string().contains("{{") {
      return Ok(parameters.clone());
    }
    self
      .evaluator(node.ambiance.clone())
      .await?
      .resolve_parameters(parameters)
  }

  fn step_context(&self, node: &NodeExecution) -> StepContext {
    let ctx = StepContext::new(
      node.ambiance.clone(),
      &node.uuid,
      self.outputs.clone(),
      self.callbacks.clone(),
    );
    match &node.callback_id {
      Some(callback_id) => ctx.with_callback_id(callback_id),
      None => ctx,
    }
  }

  fn facilitate(&self, node: &NodeExecution) -> Result<FacilitationResult, String> {
    let obtainment = &node.node.facilitator_obtainment;
    let facilitator = self
      .registry
      .obtain_facilitator(&obtainment.facilitator_type)
      .map_err(|e| e.to_string())?;
    facilitator
      .facilitate(&node.ambiance, &obtainment.parameters)
      .map_err(|e| e.to_string())
  }

  fn parameters_of(node: &NodeExecution) -> serde_json::Value {
    node
      .resolved_step_parameters
      .clone()
      .unwrap_or_else(|| node.node.step_parameters.clone())
  }

  /// Claim a queued node execution and run it according to its facilitator.
  pub(crate) async fn start_node(self: &Arc<Self>, node_execution_id: &str) -> Result<(), EngineError> {
    let Some(mut node) = self
      .executions
      .transition_node_execution(node_execution_id, &[NodeStatus::Queued], NodeStatus::Running)
      .await?
    else {
      debug!(%node_execution_id, "node_already_claimed");
      return Ok(());
    };

    let execution = self
      .executions
      .get_plan_execution(&node.plan_execution_id)
      .await?;
    if execution.status.is_terminal() {
      return self.abandon_node(node).await;
    }

    node.start_ts = Some(Utc::now());
    let parameters = match self.resolve_parameters(&node).await {
      Ok(parameters) => parameters,
      Err(ExpressionError::Store(e)) => return Err(e.into()),
      Err(e) => return self.complete_node(node, errored(e.to_string())).await,
    };
    node.resolved_step_parameters = Some(parameters.clone());

    let facilitation = match self.facilitate(&node) {
      Ok(facilitation) => facilitation,
      Err(message) => return self.complete_node(node, errored(message)).await,
    };
    node.mode = Some(facilitation.mode);

    let step = match self.registry.obtain_step(&node.node.step_type) {
      Ok(step) => step,
      Err(e) => return self.complete_node(node, errored(e.to_string())).await,
    };

    info!(
      plan_execution_id = %node.plan_execution_id,
      node_execution_id = %node.uuid,
      identifier = %node.identifier(),
      mode = ?facilitation.mode,
      "node_started"
    );
    self.notifier.notify(ExecutionEvent::NodeStarted {
      plan_execution_id: node.plan_execution_id.clone(),
      node_execution_id: node.uuid.clone(),
      identifier: node.identifier().to_string(),
      mode: node.mode,
    });

    match facilitation.mode {
      ExecutionMode::Sync => {
        self.executions.save_node_execution(&node).await?;
        let ctx = self.step_context(&node);
        let response = guarded(step.execute_sync(&ctx, &parameters))
          .await
          .unwrap_or_else(errored);
        self.complete_node(node, response).await
      }
      ExecutionMode::Async => {
        self
          .execute_async(node, step, parameters, facilitation.timeout)
          .await
      }
      ExecutionMode::Child => match guarded_sync(|| step.obtain_child(&parameters)) {
        Ok(child) => {
          self
            .spawn_children(node, &execution, vec![child], facilitation.timeout)
            .await
        }
        Err(message) => self.complete_node(node, errored(message)).await,
      },
      ExecutionMode::Children => match guarded_sync(|| step.obtain_children(&parameters)) {
        Ok(children) => {
          self
            .spawn_children(node, &execution, children, facilitation.timeout)
            .await
        }
        Err(message) => self.complete_node(node, errored(message)).await,
      },
      ExecutionMode::ChildChain => match guarded_sync(|| step.obtain_child_chain(&parameters)) {
        Ok(chain) => {
          let first = chain.into_iter().take(1).collect();
          self
            .spawn_children(node, &execution, first, facilitation.timeout)
            .await
        }
        Err(message) => self.complete_node(node, errored(message)).await,
      },
    }
  }

  async fn execute_async(
    self: &Arc<Self>,
    mut node: NodeExecution,
    step: Arc<dyn Step>,
    parameters: serde_json::Value,
    timeout: Option<Duration>,
  ) -> Result<(), EngineError> {
    // The token and the waiting status are persisted before the step runs so
    // an immediate callback always finds its node.
    node.status = NodeStatus::AsyncWaiting;
    node.callback_id = Some(Uuid::new_v4().to_string());
    node.timeout_at = timeout.map(deadline);
    self.executions.save_node_execution(&node).await?;

    let ctx = self.step_context(&node);
    if let Err(message) = guarded(step.execute_async(&ctx, &parameters)).await {
      // a callback or a timeout may already have claimed the node
      let claimed = self
        .executions
        .transition_node_execution(&node.uuid, &[NodeStatus::AsyncWaiting], NodeStatus::Running)
        .await?;
      if let Some(node) = claimed {
        return self.complete_node(node, errored(message)).await;
      }
    }
    Ok(())
  }

  async fn spawn_children(
    self: &Arc<Self>,
    mut parent: NodeExecution,
    execution: &PlanExecution,
    child_node_ids: Vec<String>,
    timeout: Option<Duration>,
  ) -> Result<(), EngineError> {
    let mut children = Vec::with_capacity(child_node_ids.len());
    for child_node_id in &child_node_ids {
      let Some(plan_node) = execution.plan.fetch_node(child_node_id) else {
        let message = format!("child node {child_node_id} not found in plan");
        return self.complete_node(parent, errored(message)).await;
      };
      let child = new_node_execution(&parent.plan_execution_id, plan_node, |level| {
        parent.ambiance.with_level(level)
      })
      .with_parent(Some(parent.uuid.clone()));
      children.push(child);
    }

    // Children exist before the parent waits on them, and run only after.
    for child in &children {
      self.executions.save_node_execution(child).await?;
    }
    parent.timeout_at = timeout.map(deadline);
    self.executions.save_node_execution(&parent).await?;

    debug!(
      node_execution_id = %parent.uuid,
      children = children.len(),
      "node_children_created"
    );

    let child_ids = children.into_iter().map(|child| child.uuid).collect();
    self.await_children(&parent.uuid, child_ids).await
  }

  /// Suspend a running parent on its saved children, then start them.
  async fn await_children(
    self: &Arc<Self>,
    parent_id: &str,
    child_ids: Vec<String>,
  ) -> Result<(), EngineError> {
    let Some(parent) = self
      .executions
      .transition_node_execution(parent_id, &[NodeStatus::Running], NodeStatus::ChildWaiting)
      .await?
    else {
      warn!(node_execution_id = %parent_id, "node_wait_claim_lost");
      let ids: Vec<&str> = child_ids.iter().map(String::as_str).collect();
      self.abort_nodes(ids).await?;
      return Ok(());
    };

    // an abort that swept the plan before the parent waited left these behind
    let execution = self
      .executions
      .get_plan_execution(&parent.plan_execution_id)
      .await?;
    if execution.status.is_terminal() {
      let ids: Vec<&str> = child_ids.iter().map(String::as_str).chain([parent_id]).collect();
      let aborted = self.abort_nodes(ids).await?;
      debug!(node_execution_id = %parent_id, aborted, "node_children_abandoned");
      return Ok(());
    }

    if child_ids.is_empty() {
      return self.check_join(parent_id).await;
    }
    for child_id in child_ids {
      self.dispatch_start(child_id, None);
    }
    Ok(())
  }

  /// Record the terminal result of a node execution and advise on it.
  pub(crate) async fn complete_node(
    self: &Arc<Self>,
    mut node: NodeExecution,
    mut response: StepResponse,
  ) -> Result<(), EngineError> {
    if !response.status.is_terminal() {
      response = errored(format!(
        "step returned non-terminal status {:?}",
        response.status
      ));
    }

    let mut publish_error = None;
    for outcome in &response.outcomes {
      let published = publish_output(
        self.outputs.as_ref(),
        &node.ambiance,
        &node.uuid,
        OutputKind::Outcome,
        &outcome.scope,
        &outcome.name,
        outcome.value.clone(),
      )
      .await;
      if let Err(e) = published {
        warn!(node_execution_id = %node.uuid, outcome = %outcome.name, error = %e, "outcome_publish_failed");
        publish_error = Some(e);
        break;
      }
    }
    if let Some(e) = publish_error {
      response = errored(e.to_string());
    }

    node.status = response.status;
    node.failure_info = response.failure_info;
    node.end_ts = Some(Utc::now());
    self.executions.save_node_execution(&node).await?;

    info!(
      plan_execution_id = %node.plan_execution_id,
      node_execution_id = %node.uuid,
      identifier = %node.identifier(),
      status = ?node.status,
      "node_completed"
    );
    self.notifier.notify(ExecutionEvent::NodeCompleted {
      plan_execution_id: node.plan_execution_id.clone(),
      node_execution_id: node.uuid.clone(),
      identifier: node.identifier().to_string(),
      status: node.status,
    });

    self.advise(node).await
  }

  /// Consult the advisers of a terminal node execution and apply the advise.
  pub(crate) async fn advise(self: &Arc<Self>, mut node: NodeExecution) -> Result<(), EngineError> {
    let execution = self
      .executions
      .get_plan_execution(&node.plan_execution_id)
      .await?;
    if execution.status.is_terminal() {
      debug!(
        node_execution_id = %node.uuid,
        plan_status = ?execution.status,
        "plan_execution_already_finished"
      );
      return Ok(());
    }

    let outputs = self.outputs.find_outputs(&node.plan_execution_id).await?;
    let outcomes = outcomes_of(&outputs, &node.uuid);

    let advise = self.obtain_advise(&mut node, &outcomes);
    node.adviser_response = Some(advise.clone());

    debug!(node_execution_id = %node.uuid, ?advise, "node_advised");
    self.notifier.notify(ExecutionEvent::NodeAdvised {
      plan_execution_id: node.plan_execution_id.clone(),
      node_execution_id: node.uuid.clone(),
      advise: advise.clone(),
    });

    match advise {
      Advise::NextStep { next_node_id } => {
        let Some(plan_node) = execution.plan.fetch_node(&next_node_id) else {
          self.executions.save_node_execution(&node).await?;
          error!(
            node_execution_id = %node.uuid,
            %next_node_id,
            "advised node not found in plan"
          );
          return self
            .end_plan(&execution.uuid, ExecutionStatus::Errored)
            .await
            .map(drop);
        };

        let next = new_node_execution(&node.plan_execution_id, plan_node, |level| {
          node.ambiance.with_sibling_level(level)
        })
        .with_parent(node.parent_id.clone())
        .with_previous(Some(node.uuid.clone()));
        self.executions.save_node_execution(&next).await?;

        node.next_id = Some(next.uuid.clone());
        self.executions.save_node_execution(&node).await?;
        self.dispatch_start(next.uuid, None);
        Ok(())
      }
      Advise::Retry { wait_ms } => {
        let mut attempt = new_node_execution(&node.plan_execution_id, &node.node, |level| {
          node.ambiance.with_sibling_level(level)
        })
        .with_parent(node.parent_id.clone())
        .with_previous(node.previous_id.clone());
        attempt.retry_ids = node.retry_ids.clone();
        attempt.retry_ids.push(node.uuid.clone());

        // Superseded first: a resume re-advises an old retry no attempt names.
        node.is_old_retry = true;
        self.executions.save_node_execution(&node).await?;
        self.executions.save_node_execution(&attempt).await?;

        if let Some(previous_id) = &node.previous_id {
          let mut previous = self.executions.get_node_execution(previous_id).await?;
          previous.next_id = Some(attempt.uuid.clone());
          self.executions.save_node_execution(&previous).await?;
        }

        info!(
          node_execution_id = %node.uuid,
          attempt = %attempt.uuid,
          retry = attempt.retry_ids.len(),
          wait_ms,
          "node_retry_scheduled"
        );
        self.dispatch_start(attempt.uuid, Some(Duration::from_millis(wait_ms)));
        Ok(())
      }
      Advise::Fail => {
        self.executions.save_node_execution(&node).await?;
        self
          .end_plan(&execution.uuid, ExecutionStatus::Failed)
          .await
          .map(drop)
      }
      Advise::EndPlan { status } => {
        self.executions.save_node_execution(&node).await?;
        self.end_plan(&execution.uuid, status).await.map(drop)
      }
      Advise::EndChain => {
        self.executions.save_node_execution(&node).await?;
        self.end_chain(&node).await
      }
    }
  }

  /// First advise of the node's advisers that accepts the event.
  ///
  /// An adviser error turns the node ERRORED and the remaining advisers are
  /// consulted again with that status.
  fn obtain_advise(
    &self,
    node: &mut NodeExecution,
    outcomes: &BTreeMap<String, serde_json::Value>,
  ) -> Advise {
    let obtainments = node.node.adviser_obtainments.clone();
    let mut failed = HashSet::new();

    'consult: loop {
      for (index, obtainment) in obtainments.iter().enumerate() {
        if failed.contains(&index) {
          continue;
        }

        let result = self
          .registry
          .obtain_adviser(&obtainment.adviser_type)
          .map_err(|e| e.to_string())
          .and_then(|adviser| {
            let event = AdviseEvent {
              ambiance: &node.ambiance,
              node_execution_id: &node.uuid,
              status: node.status,
              failure_info: node.failure_info.as_ref(),
              outcomes,
              retry_count: node.retry_ids.len(),
              parameters: &obtainment.parameters,
            };
            if !adviser.can_advise(&event) {
              return Ok(None);
            }
            adviser
              .on_advise_event(&event)
              .map(Some)
              .map_err(|e| e.to_string())
          });

        match result {
          Ok(Some(advise)) => return advise,
          Ok(None) => {}
          Err(message) => {
            warn!(
              node_execution_id = %node.uuid,
              adviser = %obtainment.adviser_type,
              error = %message,
              "adviser_failed"
            );
            failed.insert(index);
            node.status = NodeStatus::Errored;
            node.failure_info = Some(FailureInfo::new(message));
            continue 'consult;
          }
        }
      }

      return Advise::EndChain;
    }
  }

  async fn end_chain(self: &Arc<Self>, node: &NodeExecution) -> Result<(), EngineError> {
    match &node.parent_id {
      Some(parent_id) => self.check_join(parent_id).await,
      None => self
        .end_plan(&node.plan_execution_id, node.status.to_execution_status())
        .await
        .map(drop),
    }
  }

  /// Resume a waiting parent once every live child chain settled.
  pub(crate) async fn check_join(self: &Arc<Self>, parent_id: &str) -> Result<(), EngineError> {
    let children = self.executions.find_children(parent_id).await?;
    let pending = children
      .iter()
      .filter(|child| !child.is_old_retry && !child.is_settled())
      .count();
    if pending > 0 {
      debug!(node_execution_id = %parent_id, pending, "node_join_pending");
      return Ok(());
    }

    let claimed = self
      .executions
      .transition_node_execution(parent_id, &[NodeStatus::ChildWaiting], NodeStatus::Running)
      .await?;
    match claimed {
      Some(parent) => self.dispatch_join(parent),
      None => debug!(node_execution_id = %parent_id, "node_join_already_claimed"),
    }
    Ok(())
  }

  async fn resume_parent(self: &Arc<Self>, parent: NodeExecution) -> Result<(), EngineError> {
    let execution = self
      .executions
      .get_plan_execution(&parent.plan_execution_id)
      .await?;
    if execution.status.is_terminal() {
      return self.abandon_node(parent).await;
    }

    let step = match self.registry.obtain_step(&parent.node.step_type) {
      Ok(step) => step,
      Err(e) => return self.complete_node(parent, errored(e.to_string())).await,
    };
    let parameters = Self::parameters_of(&parent);
    let records = self.executions.find_children(&parent.uuid).await?;

    if parent.mode == Some(ExecutionMode::ChildChain) {
      let chain = match guarded_sync(|| step.obtain_child_chain(&parameters)) {
        Ok(chain) => chain,
        Err(message) => return self.complete_node(parent, errored(message)).await,
      };
      if let Some((tail, next_node_id)) = next_chain_element(&records, &chain) {
        let tail = tail.cloned();
        return self
          .continue_chain(parent, &execution, tail, next_node_id)
          .await;
      }
    }

    // The tail of each live chain carries the chain's result.
    let outputs = self.outputs.find_outputs(&parent.plan_execution_id).await?;
    let children: Vec<ChildOutcome> = records
      .into_iter()
      .filter(|child| !child.is_old_retry && child.next_id.is_none())
      .map(|child| ChildOutcome {
        identifier: child.identifier().to_string(),
        outcomes: outcomes_of(&outputs, &child.uuid),
        node_execution_id: child.uuid,
        status: child.status,
        failure_info: child.failure_info,
      })
      .collect();

    let ctx = self.step_context(&parent);
    let response = guarded(step.handle_child_response(&ctx, &parameters, &children))
      .await
      .unwrap_or_else(errored);
    self.complete_node(parent, response).await
  }

  /// Start the next element of a child chain behind the current tail.
  async fn continue_chain(
    self: &Arc<Self>,
    parent: NodeExecution,
    execution: &PlanExecution,
    tail: Option<NodeExecution>,
    next_node_id: &str,
  ) -> Result<(), EngineError> {
    let Some(plan_node) = execution.plan.fetch_node(next_node_id) else {
      let message = format!("child node {next_node_id} not found in plan");
      return self.complete_node(parent, errored(message)).await;
    };

    let next = new_node_execution(&parent.plan_execution_id, plan_node, |level| {
      parent.ambiance.with_level(level)
    })
    .with_parent(Some(parent.uuid.clone()))
    .with_previous(tail.as_ref().map(|tail| tail.uuid.clone()));
    self.executions.save_node_execution(&next).await?;

    if let Some(mut tail) = tail {
      tail.next_id = Some(next.uuid.clone());
      self.executions.save_node_execution(&tail).await?;
    }

    debug!(
      node_execution_id = %parent.uuid,
      next = %next.uuid,
      identifier = %next.identifier(),
      "node_chain_continued"
    );
    self.await_children(&parent.uuid, vec![next.uuid]).await
  }

  /// Deliver an async result to the node waiting on `callback_id`.
  pub(crate) async fn handle_callback(
    self: &Arc<Self>,
    callback_id: &str,
    response: serde_json::Value,
  ) -> Result<bool, EngineError> {
    let Some(waiting) = self.executions.find_by_callback_id(callback_id).await? else {
      warn!(%callback_id, "callback_unknown");
      return Ok(false);
    };

    let Some(node) = self
      .executions
      .transition_node_execution(&waiting.uuid, &[NodeStatus::AsyncWaiting], NodeStatus::Running)
      .await?
    else {
      debug!(%callback_id, node_execution_id = %waiting.uuid, status = ?waiting.status, "callback_ignored");
      return Ok(false);
    };

    let step = match self.registry.obtain_step(&node.node.step_type) {
      Ok(step) => step,
      Err(e) => {
        self.complete_node(node, errored(e.to_string())).await?;
        return Ok(true);
      }
    };
    let parameters = Self::parameters_of(&node);
    let ctx = self.step_context(&node);
    let response = guarded(step.handle_async_response(&ctx, &parameters, &response))
      .await
      .unwrap_or_else(errored);
    self.complete_node(node, response).await?;
    Ok(true)
  }

  /// Fail every waiting node execution past its deadline.
  pub(crate) async fn fail_expired_waits(self: &Arc<Self>) -> Result<usize, EngineError> {
    let expired = self.executions.find_expired_waits(Utc::now()).await?;
    let mut failed = 0;

    for waiting in expired {
      let Some(node) = self
        .executions
        .transition_node_execution(&waiting.uuid, &[waiting.status], NodeStatus::Running)
        .await?
      else {
        continue;
      };

      warn!(
        node_execution_id = %node.uuid,
        status = ?waiting.status,
        "node_wait_timed_out"
      );
      let message = match waiting.status {
        NodeStatus::AsyncWaiting => "timed out waiting for async response",
        _ => "timed out waiting for children",
      };
      self.complete_node(node, StepResponse::failed(message)).await?;
      failed += 1;
    }

    Ok(failed)
  }

  /// Move a running plan execution to `status`. Returns `false` when the plan
  /// execution had already finished.
  pub(crate) async fn end_plan(
    &self,
    plan_execution_id: &str,
    status: ExecutionStatus,
  ) -> Result<bool, EngineError> {
    let status = if status.is_terminal() {
      status
    } else {
      ExecutionStatus::Errored
    };

    let ended = self
      .executions
      .transition_plan_execution(
        plan_execution_id,
        &[ExecutionStatus::Running],
        status,
        Some(Utc::now()),
      )
      .await?;
    if !ended {
      debug!(%plan_execution_id, ?status, "plan_execution_already_finished");
      return Ok(false);
    }

    let execution = self.executions.get_plan_execution(plan_execution_id).await?;
    info!(%plan_execution_id, ?status, "plan_execution_completed");
    self
      .notifier
      .notify(ExecutionEvent::PlanExecutionCompleted {
        status,
        ambiance: execution.ambiance(),
      });
    Ok(true)
  }

  /// Abort a running plan execution and every node not currently running.
  pub(crate) async fn abort(&self, plan_execution_id: &str) -> Result<bool, EngineError> {
    if !self
      .end_plan(plan_execution_id, ExecutionStatus::Aborted)
      .await?
    {
      return Ok(false);
    }

    let nodes = self.executions.find_node_executions(plan_execution_id).await?;
    let aborted = self
      .abort_nodes(nodes.iter().map(|node| node.uuid.as_str()))
      .await?;

    info!(%plan_execution_id, aborted_nodes = aborted, "plan_execution_aborted");
    Ok(true)
  }

  /// Abort every listed node that is queued or waiting. Returns how many were.
  async fn abort_nodes<'a>(
    &self,
    node_execution_ids: impl IntoIterator<Item = &'a str>,
  ) -> Result<usize, EngineError> {
    let mut aborted = 0;
    for node_execution_id in node_execution_ids {
      let claimed = self
        .executions
        .transition_node_execution(
          node_execution_id,
          &[
            NodeStatus::Queued,
            NodeStatus::AsyncWaiting,
            NodeStatus::ChildWaiting,
          ],
          NodeStatus::Aborted,
        )
        .await?;
      if let Some(mut node) = claimed {
        node.end_ts = Some(Utc::now());
        self.executions.save_node_execution(&node).await?;
        aborted += 1;
      }
    }
    Ok(aborted)
  }

  async fn abandon_node(&self, mut node: NodeExecution) -> Result<(), EngineError> {
    debug!(node_execution_id = %node.uuid, "node_abandoned");
    node.status = NodeStatus::Aborted;
    node.end_ts = Some(Utc::now());
    self.executions.save_node_execution(&node).await?;
    Ok(())
  }

  /// Re-drive a running plan execution from its persisted records.
  pub(crate) async fn resume_plan_execution(
    self: &Arc<Self>,
    execution: &PlanExecution,
  ) -> Result<(), EngineError> {
    let nodes = self.executions.find_node_executions(&execution.uuid).await?;

    if nodes.is_empty() {
      let start = execution.plan.fetch_starting_node()?;
      let root = new_node_execution(&execution.uuid, start, |level| {
        execution.ambiance().with_level(level)
      });
      self.executions.save_node_execution(&root).await?;
      self.dispatch_start(root.uuid, None);
      return Ok(());
    }

    let superseded: HashSet<&str> = nodes
      .iter()
      .filter(|node| !node.is_old_retry)
      .flat_map(|node| node.retry_ids.iter().map(String::as_str))
      .collect();
    let orphaned: Vec<NodeExecution> = nodes
      .iter()
      .filter(|node| node.is_old_retry && !superseded.contains(node.uuid.as_str()))
      .cloned()
      .collect();

    // A retry whose attempt was never written is advised again.
    for mut node in orphaned {
      info!(node_execution_id = %node.uuid, "node_retry_restored");
      node.is_old_retry = false;
      node.adviser_response = None;
      self.executions.save_node_execution(&node).await?;
      self.advise(node).await?;
    }

    for node in nodes.into_iter().filter(|node| !node.is_old_retry) {
      match node.status {
        NodeStatus::Queued => self.dispatch_start(node.uuid, None),
        NodeStatus::Running => self.resume_running(node).await?,
        NodeStatus::ChildWaiting => self.check_join(&node.uuid).await?,
        NodeStatus::AsyncWaiting => {}
        _ if node.adviser_response.is_none() => self.advise(node).await?,
        _ => self.finish_settled(&node).await?,
      }
    }
    Ok(())
  }

  /// A node left RUNNING by a stopped process either spawned its children
  /// already, or is started again from scratch.
  async fn resume_running(self: &Arc<Self>, node: NodeExecution) -> Result<(), EngineError> {
    let spawns_children = matches!(
      node.mode,
      Some(ExecutionMode::Child | ExecutionMode::Children | ExecutionMode::ChildChain)
    );
    if spawns_children && !self.executions.find_children(&node.uuid).await?.is_empty() {
      let waiting = self
        .executions
        .transition_node_execution(&node.uuid, &[NodeStatus::Running], NodeStatus::ChildWaiting)
        .await?;
      if waiting.is_some() {
        self.check_join(&node.uuid).await?;
      }
      return Ok(());
    }

    let queued = self
      .executions
      .transition_node_execution(&node.uuid, &[NodeStatus::Running], NodeStatus::Queued)
      .await?;
    if queued.is_some() {
      self.dispatch_start(node.uuid, None);
    }
    Ok(())
  }

  /// Re-apply a plan-ending advise whose plan transition did not happen.
  async fn finish_settled(&self, node: &NodeExecution) -> Result<(), EngineError> {
    let status = match &node.adviser_response {
      Some(Advise::Fail) => ExecutionStatus::Failed,
      Some(Advise::EndPlan { status }) => *status,
      Some(Advise::EndChain) if node.parent_id.is_none() => node.status.to_execution_status(),
      _ => return Ok(()),
    };
    self
      .end_plan(&node.plan_execution_id, status)
      .await
      .map(drop)
  }
}
