//! Execution events and notifiers for observability.
//!
//! Events are emitted while plans run so consumers can observe progress,
//! persist it elsewhere or stream it to a UI. Delivery is at-least-once: a
//! resumed engine may repeat an event for work it redoes.

use cadence_ambiance::Ambiance;
use cadence_store::{Advise, ExecutionMode, ExecutionStatus, NodeStatus};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;

/// Events emitted during plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecutionEvent {
  /// A plan execution was created and its first node queued.
  PlanExecutionStarted {
    plan_execution_id: String,
    plan_id: String,
  },

  /// A node execution was claimed and facilitated.
  NodeStarted {
    plan_execution_id: String,
    node_execution_id: String,
    identifier: String,
    mode: Option<ExecutionMode>,
  },

  /// A node execution reached a terminal status.
  NodeCompleted {
    plan_execution_id: String,
    node_execution_id: String,
    identifier: String,
    status: NodeStatus,
  },

  /// The advise for a terminal node execution was decided.
  NodeAdvised {
    plan_execution_id: String,
    node_execution_id: String,
    advise: Advise,
  },

  /// A plan execution reached a terminal status.
  PlanExecutionCompleted {
    status: ExecutionStatus,
    ambiance: Ambiance,
  },
}

/// Trait for receiving execution events.
///
/// The engine calls `notify` for each event; implementations decide what to
/// do with them.
pub trait ExecutionNotifier: Send + Sync {
  fn notify(&self, event: ExecutionEvent);
}

/// A no-op notifier that discards all events.
#[derive(Debug, Clone, Default)]
pub struct NoopNotifier;

impl ExecutionNotifier for NoopNotifier {
  fn notify(&self, _event: ExecutionEvent) {}
}

/// A notifier that sends events to an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
  sender: mpsc::UnboundedSender<ExecutionEvent>,
}

impl ChannelNotifier {
  pub fn new(sender: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
    Self { sender }
  }
}

impl ExecutionNotifier for ChannelNotifier {
  fn notify(&self, event: ExecutionEvent) {
    // Ignore send errors - receiver may have been dropped
    let _ = self.sender.send(event);
  }
}

/// A notifier that writes every event to the `tracing` log.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

impl ExecutionNotifier for TracingNotifier {
  fn notify(&self, event: ExecutionEvent) {
    match event {
      ExecutionEvent::PlanExecutionStarted {
        plan_execution_id,
        plan_id,
      } => info!(%plan_execution_id, %plan_id, "plan_execution_started"),
      ExecutionEvent::NodeStarted {
        plan_execution_id,
        node_execution_id,
        identifier,
        mode,
      } => info!(
        %plan_execution_id,
        %node_execution_id,
        %identifier,
        ?mode,
        "node_started"
      ),
      ExecutionEvent::NodeCompleted {
        plan_execution_id,
        node_execution_id,
        identifier,
        status,
      } => info!(
        %plan_execution_id,
        %node_execution_id,
        %identifier,
        ?status,
        "node_completed"
      ),
      ExecutionEvent::NodeAdvised {
        plan_execution_id,
        node_execution_id,
        advise,
      } => info!(%plan_execution_id, %node_execution_id, ?advise, "node_advised"),
      ExecutionEvent::PlanExecutionCompleted { status, ambiance } => info!(
        plan_execution_id = %ambiance.plan_execution_id(),
        ?status,
        "plan_execution_completed"
      ),
    }
  }
}
