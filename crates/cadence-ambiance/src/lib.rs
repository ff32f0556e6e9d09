//! Cadence Ambiance
//!
//! An [`Ambiance`] describes where a node execution sits inside a running
//! plan: the plan execution it belongs to, the setup abstractions the plan was
//! started with (account, org, project, ...), and a stack of [`Level`]s, one
//! per node that is currently active on the path from the plan root down to
//! the node.
//!
//! Ambiances are immutable values. Entering a child or moving to the next node
//! produces a new ambiance; the original is never modified.

mod ambiance;
mod level;

pub use ambiance::{Ambiance, SetupAbstractions};
pub use level::Level;
