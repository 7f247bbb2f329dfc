//! Static contents of function tables.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::function::FuncIdx;
use crate::core::instruction::Instr;
use crate::core::module::{ElementMode, Module};

/// Why a table's contents cannot be trusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownReason {
    NoSuchTable,
    Imported,
    Exported,
    DynamicOffset { segment: usize },
    /// Some function body writes the table (`table.set`, `table.init`, ...)
    Mutated { func: FuncIdx },
}

impl std::fmt::Display for UnknownReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownReason::NoSuchTable => write!(f, "table does not exist"),
            UnknownReason::Imported => write!(f, "table is imported"),
            UnknownReason::Exported => write!(f, "table is exported and may be modified by the host"),
            UnknownReason::DynamicOffset { segment } => {
                write!(f, "element segment {} has a non-constant offset", segment)
            }
            UnknownReason::Mutated { func } => write!(f, "table is written at runtime by {}", func),
        }
    }
}

/// Index -> function mapping of one table after instantiation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableLayout {
    Known(BTreeMap<u32, FuncIdx>),
    Unknown(UnknownReason),
}

impl TableLayout {
    /// Apply the active element segments for `table` in order.
    pub fn build(module: &Module, table: u32, assume_static_tables: bool) -> Self {
        Self::build_with(module, table, assume_static_tables, &table_writers(module))
    }

    fn build_with(
        module: &Module,
        table: u32,
        assume_static_tables: bool,
        writers: &BTreeMap<u32, FuncIdx>,
    ) -> Self {
        let Some(t) = module.tables.get(table as usize) else {
            return TableLayout::Unknown(UnknownReason::NoSuchTable);
        };
        if t.import.is_some() {
            return TableLayout::Unknown(UnknownReason::Imported);
        }
        if !t.exports.is_empty() && !assume_static_tables {
            return TableLayout::Unknown(UnknownReason::Exported);
        }
        if let Some(func) = writers.get(&table) {
            return TableLayout::Unknown(UnknownReason::Mutated { func: *func });
        }

        let mut slots = BTreeMap::new();
        for (i, seg) in module.elements.iter().enumerate() {
            let ElementMode::Active { table: target, offset } = &seg.mode else {
                continue;
            };
            if *target != table {
                continue;
            }
            let Some(base) = module.const_offset(offset).filter(|b| *b >= 0) else {
                return TableLayout::Unknown(UnknownReason::DynamicOffset { segment: i });
            };
            for (k, item) in seg.items.iter().enumerate() {
                let slot = (base as u64).saturating_add(k as u64);
                let Ok(slot) = u32::try_from(slot) else {
                    break;
                };
                match item {
                    Some(f) => {
                        slots.insert(slot, *f);
                    }
                    // ref.null overwrites whatever was there
                    None => {
                        slots.remove(&slot);
                    }
                }
            }
        }
        TableLayout::Known(slots)
    }

    /// Layouts of every table in the module, by table index.
    pub fn build_all(module: &Module, assume_static_tables: bool) -> Vec<TableLayout> {
        let writers = table_writers(module);
        (0..module.tables.len() as u32)
            .map(|t| Self::build_with(module, t, assume_static_tables, &writers))
            .collect()
    }

    pub fn is_known(&self) -> bool {
        matches!(self, TableLayout::Known(_))
    }

    /// Function at `index`, when the layout is known and the slot is filled.
    pub fn get(&self, index: u32) -> Option<FuncIdx> {
        match self {
            TableLayout::Known(slots) => slots.get(&index).copied(),
            TableLayout::Unknown(_) => None,
        }
    }

    pub fn slots(&self) -> Option<&BTreeMap<u32, FuncIdx>> {
        match self {
            TableLayout::Known(slots) => Some(slots),
            TableLayout::Unknown(_) => None,
        }
    }

    pub fn unknown_reason(&self) -> Option<&UnknownReason> {
        match self {
            TableLayout::Unknown(reason) => Some(reason),
            TableLayout::Known(_) => None,
        }
    }

    pub fn len(&self) -> usize {
        self.slots().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// First function writing each table.
fn table_writers(module: &Module) -> BTreeMap<u32, FuncIdx> {
    let mut writers = BTreeMap::new();
    for func in &module.functions {
        let Some(body) = &func.body else {
            continue;
        };
        let written: BTreeSet<u32> = body
            .instrs
            .iter()
            .filter_map(|l| match l.instr {
                Instr::TableWrite { table, .. } => Some(table),
                _ => None,
            })
            .collect();
        for table in written {
            writers.entry(table).or_insert(func.idx);
        }
    }
    writers
}
