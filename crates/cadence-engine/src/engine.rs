//! Plan execution engine.
//!
//! The `ExecutionEngine` starts plan executions, drives their node executions
//! through facilitation, execution and advising, and re-drives in-flight work
//! from the store after a restart.

use std::sync::Arc;
use std::time::Duration;

use cadence_expression::ExpressionEvaluator;
use cadence_plan::Plan;
use cadence_sdk::{CallbackReceiver, CallbackSender, Registry, callback_channel};
use cadence_store::{ExecutionStatus, ExecutionStore, OutputStore, PlanExecution};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{ExecutionEvent, ExecutionNotifier, NoopNotifier};
use crate::lifecycle::new_node_execution;

pub(crate) struct Inner {
  pub(crate) executions: Arc<dyn ExecutionStore>,
  pub(crate) outputs: Arc<dyn OutputStore>,
  pub(crate) registry: Arc<Registry>,
  pub(crate) notifier: Arc<dyn ExecutionNotifier>,
  pub(crate) config: EngineConfig,
  pub(crate) callbacks: CallbackSender,
  receiver: Mutex<Option<CallbackReceiver>>,
}

/// The plan execution engine.
///
/// Cheap to clone; clones share the same stores, registry and callback
/// channel. All state lives in the stores.
///
/// # Usage
///
/// ```ignore
/// let store = Arc::new(SqliteStore::open(&path).await?);
/// let engine = ExecutionEngine::new(
///   store.clone(),
///   store,
///   Arc::new(Registry::with_defaults()),
///   EngineConfig::default(),
/// );
///
/// let cancel = CancellationToken::new();
/// tokio::spawn({
///   let engine = engine.clone();
///   let cancel = cancel.clone();
///   async move { engine.run(cancel).await }
/// });
///
/// let execution = engine.start_execution(plan, "alice").await?;
/// let finished = engine
///   .wait_for_completion(&execution.uuid, Duration::from_secs(30))
///   .await?;
/// ```
#[derive(Clone)]
pub struct ExecutionEngine {
  inner: Arc<Inner>,
}

impl ExecutionEngine {
  /// Create an engine that discards execution events.
  pub fn new(
    executions: Arc<dyn ExecutionStore>,
    outputs: Arc<dyn OutputStore>,
    registry: Arc<Registry>,
    config: EngineConfig,
  ) -> Self {
    Self::with_notifier(executions, outputs, registry, config, Arc::new(NoopNotifier))
  }

  /// Create an engine with a custom notifier.
  pub fn with_notifier(
    executions: Arc<dyn ExecutionStore>,
    outputs: Arc<dyn OutputStore>,
    registry: Arc<Registry>,
    config: EngineConfig,
    notifier: Arc<dyn ExecutionNotifier>,
  ) -> Self {
    let (callbacks, receiver) = callback_channel();
    Self {
      inner: Arc::new(Inner {
        executions,
        outputs,
        registry,
        notifier,
        config,
        callbacks,
        receiver: Mutex::new(Some(receiver)),
      }),
    }
  }

  /// Sender for async step results, consumed by [`ExecutionEngine::run`].
  pub fn callbacks(&self) -> CallbackSender {
    self.inner.callbacks.clone()
  }

  pub fn config(&self) -> &EngineConfig {
    &self.inner.config
  }

  pub fn registry(&self) -> &Registry {
    &self.inner.registry
  }

  /// Validate a plan, persist a new execution of it and queue its starting
  /// node.
  ///
  /// Returns once the execution is recorded; progress continues on spawned
  /// tasks. Nothing is written when validation fails.
  #[instrument(name = "start_execution", skip(self, plan), fields(plan_id = %plan.uuid))]
  pub async fn start_execution(
    &self,
    plan: Plan,
    triggered_by: &str,
  ) -> Result<PlanExecution, EngineError> {
    self.inner.registry.validate_plan(&plan)?;

    let execution = PlanExecution::new(Uuid::new_v4().to_string(), plan, triggered_by);
    let start = execution.plan.fetch_starting_node()?;
    let root = new_node_execution(&execution.uuid, start, |level| {
      execution.ambiance().with_level(level)
    });

    self.inner.executions.save_plan_execution(&execution).await?;
    self.inner.executions.save_node_execution(&root).await?;

    info!(
      plan_execution_id = %execution.uuid,
      starting_node_id = %execution.plan.starting_node_id,
      "plan_execution_started"
    );
    self.inner.notifier.notify(ExecutionEvent::PlanExecutionStarted {
      plan_execution_id: execution.uuid.clone(),
      plan_id: execution.plan_id.clone(),
    });

    self.inner.dispatch_start(root.uuid, None);
    Ok(execution)
  }

  /// Deliver the result of an async step.
  ///
  /// Returns `false` when no node is waiting on `callback_id`, including a
  /// repeated delivery.
  #[instrument(name = "handle_async_response", skip(self, response))]
  pub async fn handle_async_response(
    &self,
    callback_id: &str,
    response: serde_json::Value,
  ) -> Result<bool, EngineError> {
    self.inner.handle_callback(callback_id, response).await
  }

  /// Abort a running plan execution.
  ///
  /// Queued and waiting nodes are aborted at once; running nodes observe the
  /// abort before they are advised. Returns `false` when the plan execution
  /// had already finished.
  #[instrument(name = "abort_execution", skip(self))]
  pub async fn abort_execution(&self, plan_execution_id: &str) -> Result<bool, EngineError> {
    self.inner.abort(plan_execution_id).await
  }

  /// Fail every waiting node past its facilitator timeout and advise on it.
  ///
  /// Returns the number of nodes failed.
  pub async fn check_timeouts(&self) -> Result<usize, EngineError> {
    self.inner.fail_expired_waits().await
  }

  /// Re-drive every running plan execution from the store.
  ///
  /// Meant to run once at startup, before this process starts new work.
  /// Returns the number of plan executions resumed.
  #[instrument(name = "resume_in_flight", skip(self))]
  pub async fn resume_in_flight(&self) -> Result<usize, EngineError> {
    let executions = self
      .inner
      .executions
      .list_plan_executions(ExecutionStatus::Running)
      .await?;

    for execution in &executions {
      info!(plan_execution_id = %execution.uuid, "plan_execution_resumed");
      self.inner.resume_plan_execution(execution).await?;
    }
    Ok(executions.len())
  }

  /// Run the engine loop.
  ///
  /// Consumes async callbacks and periodically fails expired waits until the
  /// cancellation token is triggered.
  pub async fn run(&self, cancel: CancellationToken) -> Result<(), EngineError> {
    let mut receiver =
      self
        .inner
        .receiver
        .lock()
        .await
        .take()
        .ok_or_else(|| EngineError::InvalidRequest {
          message: "engine loop is already running".to_string(),
        })?;

    let mut timeouts = tokio::time::interval(self.inner.config.timeout_check_interval());
    timeouts.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!("engine_loop_started");
    loop {
      tokio::select! {
          _ = cancel.cancelled() => {
              info!("engine_loop_cancelled");
              break;
          }
          callback = receiver.recv() => {
              let Some(callback) = callback else {
                  break;
              };
              let engine = self.clone();
              tokio::spawn(async move {
                  let callback_id = callback.callback_id;
                  match engine.handle_async_response(&callback_id, callback.response).await {
                      Ok(true) => {}
                      Ok(false) => debug!(%callback_id, "callback_dropped"),
                      Err(e) => error!(%callback_id, error = %e, "callback_failed"),
                  }
              });
          }
          _ = timeouts.tick() => {
              if let Err(e) = self.check_timeouts().await {
                  error!(error = %e, "timeout_check_failed");
              }
          }
      }
    }

    *self.inner.receiver.lock().await = Some(receiver);
    Ok(())
  }

  /// Poll the store until the plan execution finished or `timeout` elapsed.
  pub async fn wait_for_completion(
    &self,
    plan_execution_id: &str,
    timeout: Duration,
  ) -> Result<PlanExecution, EngineError> {
    let poll = async {
      loop {
        let execution = self
          .inner
          .executions
          .get_plan_execution(plan_execution_id)
          .await?;
        if execution.status.is_terminal() {
          return Ok::<_, EngineError>(execution);
        }
        tokio::time::sleep(self.inner.config.completion_poll_interval()).await;
      }
    };

    tokio::time::timeout(timeout, poll)
      .await
      .map_err(|_| EngineError::Timeout {
        plan_execution_id: plan_execution_id.to_string(),
      })?
  }

  /// Expression evaluator positioned at a node execution, over the current
  /// state of its plan execution.
  pub async fn evaluator_for(
    &self,
    node_execution_id: &str,
  ) -> Result<ExpressionEvaluator, EngineError> {
    let node = self
      .inner
      .executions
      .get_node_execution(node_execution_id)
      .await?;
    Ok(self.inner.evaluator(node.ambiance).await?)
  }
}
