//! Cadence Expression
//!
//! Resolves scope-qualified expressions such as `build.output.version`
//! against the node execution tree of a running plan.
//!
//! Resolution is lazy: an [`ExecutionSnapshot`] of the plan execution's node
//! executions and published outputs is taken once per request, and a tree of
//! [`Resolver`]s is walked one path segment at a time. Nothing is cached
//! across requests.
//!
//! For a path segment against a node, the first match wins:
//! 1. a child node execution with that identifier
//! 2. a reserved field: `status`, `startTs`, `endTs`
//! 3. a field of the node's resolved step parameters
//! 4. an outcome of that name visible from the node
//! 5. a sweeping output of that name visible from the node
//!
//! A miss is "not found", never an error.
//!
//! # Templates
//! Step parameters are minijinja templates evaluated against the tree:
//! ```json
//! { "image": "{{ build.output.image }}", "message": "deployed {{ setup.projectId }}" }
//! ```
//! A template made of a single `{{ path }}` keeps the JSON type of the value.

mod error;
mod evaluator;
mod functor;
mod node_map;
mod snapshot;

pub use error::ExpressionError;
pub use evaluator::ExpressionEvaluator;
pub use functor::{AncestorFunctor, ChildFunctor, QualifiedFunctor};
pub use node_map::{NodeExecutionMap, Resolved, Resolver};
pub use snapshot::ExecutionSnapshot;
