//! Cadence Plan
//!
//! A [`Plan`] is the static definition of a pipeline: a collection of
//! [`PlanNode`]s addressed by uuid, plus the node execution starts from.
//!
//! Nodes do not carry edges. Which node runs after another is decided at
//! runtime by the advisers bound to a node, and which nodes run as children is
//! decided by the node's step. Both name their targets by node uuid inside
//! their parameters.

mod error;
mod node;
mod plan;

pub use error::PlanError;
pub use node::{AdviserObtainment, FacilitatorObtainment, PlanNode};
pub use plan::Plan;
