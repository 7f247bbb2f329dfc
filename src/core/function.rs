//! Function type for WebAssembly modules.
//!
//! Functions live in the module's function index space: imports first, then
//! the functions defined in the code section. `FuncIdx` is the only way other
//! structures refer to a function.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::instruction::{Instr, Located};
use crate::core::types::{FunctionType, ValType};

/// Index into the module's function index space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FuncIdx(pub u32);

impl FuncIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FuncIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "func[{}]", self.0)
    }
}

/// Kind of function in the module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FunctionKind {
    /// Body present in the code section
    Defined,
    /// Provided by the host through the import section
    Imported,
}

impl FunctionKind {
    pub fn value(&self) -> &str {
        match self {
            FunctionKind::Defined => "defined",
            FunctionKind::Imported => "imported",
        }
    }
}

/// Origin of an imported function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportRef {
    pub module: String,
    pub name: String,
}

impl fmt::Display for ImportRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.name)
    }
}

/// Decoded function body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Body {
    /// Declared locals, expanded (one entry per local, parameters excluded)
    pub locals: Vec<ValType>,
    /// Instructions in program order, including the final `end`
    pub instrs: Vec<Located>,
    /// Encoded body (locals + expression) as found in the code section
    #[serde(skip)]
    pub raw: Vec<u8>,
}

impl Body {
    /// Iterate over the call instructions of the body.
    pub fn calls(&self) -> impl Iterator<Item = &Located> + '_ {
        self.instrs.iter().filter(|l| l.instr.is_call())
    }

    pub fn indirect_call_count(&self) -> usize {
        self.instrs
            .iter()
            .filter(|l| l.instr.is_indirect_call())
            .count()
    }

    pub fn has_unknown_instructions(&self) -> bool {
        self.instrs
            .iter()
            .any(|l| matches!(l.instr, Instr::Unknown { .. }))
    }
}

/// Represents a function of a WebAssembly module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub idx: FuncIdx,
    /// Index into the module's type section
    pub type_idx: u32,
    /// Resolved signature (copied from the type section)
    pub ty: FunctionType,
    pub import: Option<ImportRef>,
    pub exports: Vec<String>,
    /// Display name (export, import, or `func[N]`)
    pub name: String,
    pub body: Option<Body>,
}

impl Function {
    pub fn new_imported(idx: FuncIdx, type_idx: u32, ty: FunctionType, import: ImportRef) -> Self {
        let name = import.to_string();
        Self {
            idx,
            type_idx,
            ty,
            import: Some(import),
            exports: Vec::new(),
            name,
            body: None,
        }
    }

    pub fn new_defined(idx: FuncIdx, type_idx: u32, ty: FunctionType) -> Self {
        Self {
            idx,
            type_idx,
            ty,
            import: None,
            exports: Vec::new(),
            name: idx.to_string(),
            body: None,
        }
    }

    pub fn kind(&self) -> FunctionKind {
        if self.import.is_some() {
            FunctionKind::Imported
        } else {
            FunctionKind::Defined
        }
    }

    pub fn is_imported(&self) -> bool {
        self.import.is_some()
    }

    pub fn is_exported(&self) -> bool {
        !self.exports.is_empty()
    }

    /// Number of parameters; local indices below this are parameters.
    pub fn param_count(&self) -> u32 {
        self.ty.params.len() as u32
    }

    /// Type of local `idx`, parameters included.
    pub fn local_type(&self, idx: u32) -> Option<ValType> {
        let params = self.ty.params.len();
        let idx = idx as usize;
        if idx < params {
            return self.ty.params.get(idx).copied();
        }
        self.body
            .as_ref()
            .and_then(|b| b.locals.get(idx - params).copied())
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) {}", self.name, self.idx, self.ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn imported_function_naming() {
        let f = Function::new_imported(
            FuncIdx(0),
            0,
            FunctionType::new(vec![ValType::I32], vec![]),
            ImportRef {
                module: "env".into(),
                name: "puts".into(),
            },
        );
        assert_eq!(f.name, "env.puts");
        assert_eq!(f.kind(), FunctionKind::Imported);
        assert!(!f.is_exported());
    }

    #[test]
    fn local_types_include_params() {
        let mut f = Function::new_defined(
            FuncIdx(2),
            0,
            FunctionType::new(vec![ValType::I32, ValType::I64], vec![]),
        );
        f.body = Some(Body {
            locals: vec![ValType::F32],
            instrs: Vec::new(),
            raw: Vec::new(),
        });
        assert_eq!(f.name, "func[2]");
        assert_eq!(f.local_type(1), Some(ValType::I64));
        assert_eq!(f.local_type(2), Some(ValType::F32));
        assert_eq!(f.local_type(3), None);
        assert_eq!(f.param_count(), 2);
    }
}
