//! Cadence Execution Engine
//!
//! This crate runs plans: it persists a plan execution, runs each node
//! through its facilitator and step, asks the node's advisers what comes
//! next and applies their advise until the plan execution is terminal.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      ExecutionEngine                        │
//! │  - start_execution(plan) → PlanExecution                    │
//! │  - run(cancel): async callbacks + timeout checks            │
//! │  - abort / resume_in_flight / wait_for_completion           │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Node lifecycle                           │
//! │  QUEUED → RUNNING → (ASYNC_WAITING | CHILD_WAITING)         │
//! │        → SUCCEEDED | FAILED | ERRORED | ABORTED → advise    │
//! │  - parameters resolved through cadence-expression           │
//! │  - every claim is a compare-and-set in the store            │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Registry (cadence-sdk)                         │
//! │  - Facilitator → mode, Step → result, Adviser → advise      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing is kept in memory between steps: a new engine over the same store
//! picks up where a stopped one left off through
//! [`ExecutionEngine::resume_in_flight`].

mod config;
mod engine;
mod error;
mod events;
mod lifecycle;

pub use config::EngineConfig;
pub use engine::ExecutionEngine;
pub use error::EngineError;
pub use events::{ChannelNotifier, ExecutionEvent, ExecutionNotifier, NoopNotifier, TracingNotifier};
