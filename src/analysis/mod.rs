//! Analysis passes over a loaded module.
//!
//! The static images (`table`, `memory`) feed vtable recovery; `dataflow`
//! and `values` drive the per-site backward walk in `classify`; `callgraph`
//! merges the classified sites; `pipeline` runs the stages in order.

pub mod callgraph;
pub mod classify;
pub mod dataflow;
pub mod memory;
pub mod pipeline;
pub mod table;
pub mod values;
pub mod vtable;
