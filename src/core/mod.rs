//! Core data types for wasmcg.
//!
//! The loaded `Module` and everything it owns, the candidate sets produced by
//! the classifier, and the `CallGraph` they are merged into.

pub mod call_graph;
pub mod candidates;
pub mod function;
pub mod instruction;
pub mod module;
pub mod types;
