//! Cadence Graph
//!
//! Rebuilds the nested, human-viewable execution graph of a plan execution
//! from its flat node execution records.
//!
//! - The top level is the chain starting at the root record, linked by
//!   `next_id`.
//! - A node run in CHILD mode holds its child chain as a single nested
//!   subgraph.
//! - A node run in CHILDREN mode holds every child chain head in an unordered
//!   map keyed by node execution id; siblings are not linked to each other.
//! - Superseded retries are left out; the surviving attempt lists them in
//!   `retry_ids`.

mod error;
mod generator;
mod vertex;

pub use error::GraphError;
pub use generator::{GraphGenerator, build_graph};
pub use vertex::{GraphVertex, Subgraph};
