//! Error types for the wasmcg call-graph analyzer.
//!
//! Fatal failures are `WasmCgError` values and abort the analysis. Recoverable
//! findings (unresolved call sites, unknown table layouts) are `Diagnostic`
//! values collected next to the results instead.

use std::fmt;
use thiserror::Error;

use crate::core::function::FuncIdx;

/// Main error type for wasmcg operations.
#[derive(Debug, Error)]
pub enum WasmCgError {
    /// Structural parse failure: bad magic, truncated section, section order.
    #[error("Malformed binary at offset {offset:#x}: {message}")]
    MalformedBinary { offset: usize, message: String },

    /// Resource limit exceeded
    #[error("Resource limit exceeded: {resource} ({used}/{limit})")]
    ResourceExhausted {
        resource: String,
        used: u64,
        limit: u64,
    },

    /// Invalid input data
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The module cannot be written back as a binary
    #[error("Encode error: {0}")]
    Encode(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl WasmCgError {
    pub fn malformed(offset: usize, message: impl Into<String>) -> Self {
        WasmCgError::MalformedBinary {
            offset,
            message: message.into(),
        }
    }

    /// True for errors that stem from the input bytes rather than the host.
    pub fn is_malformed(&self) -> bool {
        matches!(self, WasmCgError::MalformedBinary { .. })
    }
}

impl From<wasmparser::BinaryReaderError> for WasmCgError {
    fn from(err: wasmparser::BinaryReaderError) -> Self {
        WasmCgError::MalformedBinary {
            offset: err.offset(),
            message: err.message().to_string(),
        }
    }
}

impl From<serde_json::Error> for WasmCgError {
    fn from(err: serde_json::Error) -> Self {
        WasmCgError::Serialization(err.to_string())
    }
}

/// Result type alias for wasmcg operations
pub type Result<T> = std::result::Result<T, WasmCgError>;

/// Recoverable findings. The analysis records them and keeps going.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// An indirect call whose targets could not be narrowed; it keeps the
    /// conservative candidate set.
    #[error("Unresolved call site in {func} at offset {offset:#x}: {reason}")]
    UnresolvedCallSite {
        func: FuncIdx,
        offset: usize,
        reason: String,
    },

    /// A table excluded from precise classification.
    #[error("Unknown vtable layout for table {table}: {reason}")]
    UnknownVtableLayout { table: u32, reason: String },

    /// A function skipped because the classification budget ran out.
    #[error("Budget exceeded before classifying {func}")]
    BudgetExceeded { func: FuncIdx },
}

/// Budgets that keep the per-site backward walk bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkBudget {
    /// Maximum producer-chain depth followed from a call operand
    pub max_depth: usize,
    /// Maximum number of concrete values tracked per abstract value
    pub max_values: usize,
}

impl Default for WalkBudget {
    fn default() -> Self {
        Self {
            max_depth: 16,
            max_values: 64,
        }
    }
}

impl fmt::Display for WalkBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Budget: depth {}, {} values",
            self.max_depth, self.max_values
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WasmCgError::malformed(0x1234, "section out of order");
        assert_eq!(
            err.to_string(),
            "Malformed binary at offset 0x1234: section out of order"
        );
        assert!(err.is_malformed());

        let err = WasmCgError::ResourceExhausted {
            resource: "file size".to_string(),
            used: 10,
            limit: 5,
        };
        assert_eq!(err.to_string(), "Resource limit exceeded: file size (10/5)");
        assert!(!err.is_malformed());
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::UnresolvedCallSite {
            func: FuncIdx(3),
            offset: 0x40,
            reason: "parameter".to_string(),
        };
        assert_eq!(
            d.to_string(),
            "Unresolved call site in func[3] at offset 0x40: parameter"
        );
    }

    #[test]
    fn test_default_budget() {
        let budget = WalkBudget::default();
        assert_eq!(budget.max_depth, 16);
        assert_eq!(budget.max_values, 64);
        assert_eq!(budget.to_string(), "Budget: depth 16, 64 values");
    }
}
