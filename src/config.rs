//! Configuration for the analysis pipeline.
//!
//! Every section has sensible defaults and every field may be omitted from a
//! JSON configuration file.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, WasmCgError, WalkBudget};

/// Master configuration for the analysis pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Binary loading limits and naming.
    pub loader: LoaderConfig,
    /// Vtable recovery heuristics.
    pub vtables: VtableConfig,
    /// Call-site classification budgets.
    pub classifier: ClassifierConfig,
    /// Graph construction options.
    pub graph: GraphConfig,
}

impl AnalysisConfig {
    /// Read a JSON configuration file. Missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would make the analysis meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.classifier.max_values == 0 {
            return Err(WasmCgError::InvalidInput(
                "classifier.max_values must be at least 1".into(),
            ));
        }
        if self.vtables.min_slots == 0 {
            return Err(WasmCgError::InvalidInput(
                "vtables.min_slots must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Binary loader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Maximum file size to load (default: 268435456 = 256MB).
    pub max_file_size: u64,
    /// Demangle Itanium and Rust names for display (default: true).
    pub demangle_names: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_file_size: 256 * 1024 * 1024,
            demangle_names: true,
        }
    }
}

/// Vtable recovery configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtableConfig {
    /// Minimum run of consecutive function-index words (default: 1).
    pub min_slots: usize,
    /// Distinct slot patterns needed among candidates whose first slot shares
    /// a signature before any of them is a probable vtable (default: 2).
    pub min_distinct_patterns: usize,
    /// Treat exported tables as statically known (default: true).
    pub assume_static_tables: bool,
    /// Read loads from the initial data image (default: true).
    pub assume_static_data: bool,
}

impl Default for VtableConfig {
    fn default() -> Self {
        Self {
            min_slots: 1,
            min_distinct_patterns: 2,
            assume_static_tables: true,
            assume_static_data: true,
        }
    }
}

/// Call-site classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Maximum producer-chain depth (default: 16).
    pub max_depth: usize,
    /// Maximum values per abstract value before it widens to unknown (default: 64).
    pub max_values: usize,
    /// Functions classified at most; later ones get a diagnostic (default: 1000000).
    pub max_functions: usize,
    /// Function count from which classification runs on the rayon pool (default: 64).
    pub parallel_threshold: usize,
    /// Limit the signature fallback to functions placed in the call's table (default: false).
    pub restrict_fallback_to_table: bool,
}

impl ClassifierConfig {
    pub fn budget(&self) -> WalkBudget {
        WalkBudget {
            max_depth: self.max_depth,
            max_values: self.max_values,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_values: 64,
            max_functions: 1_000_000,
            parallel_threshold: 64,
            restrict_fallback_to_table: false,
        }
    }
}

/// Call-graph builder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    /// Imported functions may call back into any export (default: true).
    pub host_calls_exports: bool,
    /// Keep functions unreachable from the entry points (default: true).
    pub include_unreachable_nodes: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            host_calls_exports: true,
            include_unreachable_nodes: true,
        }
    }
}
