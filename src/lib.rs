//! Static call-graph resolution for indirect and virtual calls in
//! WebAssembly binaries produced by C and C++ toolchains.
//!
//! ```no_run
//! use wasmcg::{AnalysisConfig, Analyzer};
//!
//! let report = Analyzer::new(AnalysisConfig::default()).analyze_file("app.wasm")?;
//! println!("{}", report.graph.to_dot());
//! # Ok::<(), wasmcg::WasmCgError>(())
//! ```

/// Analysis passes: table/memory images, vtable recovery, call-site
/// classification and graph building
pub mod analysis;
/// Pipeline configuration
pub mod config;
/// Core data types module
pub mod core;
/// Name demangling
pub mod demangle;
/// Error types
pub mod error;
/// Binary format loaders
pub mod formats;
/// Input fingerprints
pub mod hashing;
/// Tracing setup
pub mod logging;

pub use crate::analysis::pipeline::{AnalysisReport, Analyzer};
pub use crate::config::AnalysisConfig;
pub use crate::core::call_graph::{CallGraph, CallGraphEdge, CallType};
pub use crate::core::candidates::{CandidateSet, Confidence, IndexEvidence, IndirectCallSite};
pub use crate::core::function::FuncIdx;
pub use crate::core::module::Module;
pub use crate::error::{Diagnostic, Result, WasmCgError};
