//! Module: arena-style representation of a loaded WebAssembly binary.
//!
//! All cross references are plain indices into the vectors held here. The
//! module is immutable once the loader returns it; every analysis borrows it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::function::{FuncIdx, Function};
use crate::core::instruction::ConstExpr;
use crate::core::types::{FunctionType, ValType};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub initial: u64,
    pub maximum: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub element_type: ValType,
    pub limits: Limits,
    pub import: Option<(String, String)>,
    pub exports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Memory {
    pub limits: Limits,
    pub memory64: bool,
    pub shared: bool,
    pub import: Option<(String, String)>,
    pub exports: Vec<String>,
}

impl Memory {
    /// Width of a pointer stored in this memory.
    pub fn pointer_width(&self) -> u32 {
        if self.memory64 {
            8
        } else {
            4
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Global {
    pub content_type: ValType,
    pub mutable: bool,
    /// `None` for imported globals
    pub init: Option<ConstExpr>,
    pub import: Option<(String, String)>,
    pub exports: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportKind {
    Func,
    Table,
    Memory,
    Global,
    Tag,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
    pub index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementMode {
    Active { table: u32, offset: ConstExpr },
    Passive,
    Declared,
}

/// Element segment. Items are function references; `None` stands for a
/// `ref.null` item in expression-encoded segments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementSegment {
    pub mode: ElementMode,
    pub items: Vec<Option<FuncIdx>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataMode {
    Active { memory: u32, offset: ConstExpr },
    Passive,
}

/// Data segment: a byte blob with its load offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataSegment {
    pub mode: DataMode,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Module {
    pub types: Vec<FunctionType>,
    pub functions: Vec<Function>,
    pub tables: Vec<Table>,
    pub memories: Vec<Memory>,
    pub globals: Vec<Global>,
    pub exports: Vec<Export>,
    pub start: Option<FuncIdx>,
    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    /// Value of the data count section, when present
    pub data_count: Option<u32>,
}

impl Module {
    pub fn function(&self, idx: FuncIdx) -> Option<&Function> {
        self.functions.get(idx.index())
    }

    pub fn func_type(&self, type_idx: u32) -> Option<&FunctionType> {
        self.types.get(type_idx as usize)
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    pub fn imported_function_count(&self) -> usize {
        self.functions.iter().filter(|f| f.is_imported()).count()
    }

    /// Every function whose signature structurally equals `ty`.
    pub fn functions_with_type<'a>(
        &'a self,
        ty: &'a FunctionType,
    ) -> impl Iterator<Item = &'a Function> + 'a {
        self.functions.iter().filter(move |f| &f.ty == ty)
    }

    pub fn exported_functions(&self) -> impl Iterator<Item = &Function> + '_ {
        self.functions.iter().filter(|f| f.is_exported())
    }

    /// Functions referenced by any element segment targeting `table`
    /// (passive and declared segments count for table 0 users via
    /// `table.init`, so they are included as well).
    pub fn table_functions(&self, table: u32) -> BTreeSet<FuncIdx> {
        self.elements
            .iter()
            .filter(|seg| match &seg.mode {
                ElementMode::Active { table: t, .. } => *t == table,
                ElementMode::Passive | ElementMode::Declared => true,
            })
            .flat_map(|seg| seg.items.iter().flatten().copied())
            .collect()
    }

    /// Functions the host can call without going through the module's own
    /// code: exports, the start function, and the contents of exported
    /// tables.
    pub fn entry_points(&self) -> BTreeSet<FuncIdx> {
        let mut roots: BTreeSet<FuncIdx> = self.exported_functions().map(|f| f.idx).collect();
        if let Some(start) = self.start {
            roots.insert(start);
        }
        for (i, table) in self.tables.iter().enumerate() {
            if !table.exports.is_empty() || table.import.is_some() {
                roots.extend(self.table_functions(i as u32));
            }
        }
        roots
    }

    /// Value of a segment offset known before instantiation: a constant, or
    /// a `global.get` of a defined immutable global with a constant
    /// initializer.
    pub fn const_offset(&self, expr: &ConstExpr) -> Option<i64> {
        match expr {
            ConstExpr::GlobalGet(g) => {
                let global = self.globals.get(*g as usize)?;
                if global.mutable || global.import.is_some() {
                    return None;
                }
                global.init.as_ref()?.as_i64()
            }
            other => other.as_i64(),
        }
    }

    /// Pointer width of memory 0 (4 when the module has no memory).
    pub fn pointer_width(&self) -> u32 {
        self.memories.first().map(|m| m.pointer_width()).unwrap_or(4)
    }
}
