//! Vtable recovery from the static memory image.
//!
//! C++ vtables compiled to WebAssembly are arrays of table indices in linear
//! memory. A run of aligned words that all index a filled slot of the
//! function table is a vtable candidate. Candidates become probable vtables
//! when enough distinct slot patterns share the signature of their first
//! slot; a single isolated pattern is more likely a plain array of integers.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info_span, warn};

use crate::analysis::memory::{MemoryImage, MemoryView};
use crate::analysis::table::TableLayout;
use crate::config::VtableConfig;
use crate::core::function::FuncIdx;
use crate::core::module::Module;
use crate::core::types::FunctionType;
use crate::error::Diagnostic;

/// A recovered vtable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vtable {
    /// Address of slot 0 (what an object's vptr holds)
    pub address: u64,
    /// Raw table indices, one per slot
    pub indices: Vec<u32>,
    /// Functions the slots resolve to
    pub slots: Vec<FuncIdx>,
}

impl Vtable {
    /// Address one past the last slot.
    pub fn end(&self, width: u32) -> u64 {
        self.address + self.slots.len() as u64 * u64::from(width)
    }

    /// Function in the slot at `byte_offset` from the vtable start.
    pub fn slot_at(&self, byte_offset: u64, width: u32) -> Option<FuncIdx> {
        if byte_offset % u64::from(width) != 0 {
            return None;
        }
        self.slots.get((byte_offset / u64::from(width)) as usize).copied()
    }
}

/// Outcome of recovery for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableLayoutStatus {
    Known { vtables: usize },
    Unknown { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableVtables {
    pub table: u32,
    pub status: TableLayoutStatus,
    /// Probable vtables sorted by address
    pub vtables: Vec<Vtable>,
    /// Candidates found before the pattern filter
    pub candidates: usize,
}

/// Vtables recovered for every table of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VtableRecovery {
    pub pointer_width: u32,
    pub tables: Vec<TableVtables>,
    #[serde(skip)]
    pub diagnostics: Vec<Diagnostic>,
}

impl VtableRecovery {
    fn table(&self, table: u32) -> Option<&TableVtables> {
        self.tables.iter().find(|t| t.table == table)
    }

    pub fn status(&self, table: u32) -> Option<&TableLayoutStatus> {
        self.table(table).map(|t| &t.status)
    }

    pub fn vtables(&self, table: u32) -> &[Vtable] {
        self.table(table).map(|t| t.vtables.as_slice()).unwrap_or(&[])
    }

    pub fn vtable_count(&self) -> usize {
        self.tables.iter().map(|t| t.vtables.len()).sum()
    }

    /// Functions at `byte_offset` across every probable vtable of `table`.
    pub fn slot_targets(&self, table: u32, byte_offset: u64) -> BTreeSet<FuncIdx> {
        self.vtables(table)
            .iter()
            .filter_map(|vt| vt.slot_at(byte_offset, self.pointer_width))
            .collect()
    }

    /// The probable vtable of `table` whose slots contain `addr`.
    pub fn vtable_containing(&self, table: u32, addr: u64) -> Option<&Vtable> {
        let vtables = self.vtables(table);
        let pos = vtables.partition_point(|vt| vt.address <= addr);
        let vt = vtables.get(pos.checked_sub(1)?)?;
        (addr < vt.end(self.pointer_width)).then_some(vt)
    }
}

/// Maximal runs of aligned words that index filled table slots.
fn scan_candidates(image: &MemoryImage, layout: &TableLayout, width: u32, min_slots: usize) -> Vec<Vtable> {
    let step = u64::from(width);
    let mut out = Vec::new();
    for region in image.regions() {
        let mut addr = region.start.div_ceil(step) * step;
        let mut run: Option<Vtable> = None;
        while addr + step <= region.end() {
            let hit = image
                .read_word(addr, width)
                .ok()
                .and_then(|w| u32::try_from(w).ok())
                .and_then(|idx| layout.get(idx).map(|f| (idx, f)));
            match (hit, run.as_mut()) {
                (Some((idx, f)), Some(vt)) => {
                    vt.indices.push(idx);
                    vt.slots.push(f);
                }
                (Some((idx, f)), None) => {
                    run = Some(Vtable {
                        address: addr,
                        indices: vec![idx],
                        slots: vec![f],
                    });
                }
                (None, _) => {
                    if let Some(vt) = run.take() {
                        if vt.slots.len() >= min_slots {
                            out.push(vt);
                        }
                    }
                }
            }
            addr += step;
        }
        if let Some(vt) = run.take() {
            if vt.slots.len() >= min_slots {
                out.push(vt);
            }
        }
    }
    out
}

/// Keep candidates whose first-slot signature is shared by enough distinct
/// slot patterns.
fn filter_probable(module: &Module, candidates: Vec<Vtable>, min_distinct: usize) -> Vec<Vtable> {
    let signature = |vt: &Vtable| -> Option<FunctionType> {
        let first = vt.slots.first()?;
        module.function(*first).map(|f| f.ty.clone())
    };

    let mut patterns: BTreeMap<FunctionType, BTreeSet<Vec<FuncIdx>>> = BTreeMap::new();
    for vt in &candidates {
        if let Some(sig) = signature(vt) {
            patterns.entry(sig).or_default().insert(vt.slots.clone());
        }
    }

    let mut kept: Vec<Vtable> = candidates
        .into_iter()
        .filter(|vt| {
            signature(vt)
                .and_then(|sig| patterns.get(&sig))
                .is_some_and(|p| p.len() >= min_distinct)
        })
        .collect();
    kept.sort_by_key(|vt| vt.address);
    kept
}

/// Recover probable vtables for every table of the module.
pub fn recover(
    module: &Module,
    image: &MemoryImage,
    layouts: &[TableLayout],
    cfg: &VtableConfig,
) -> VtableRecovery {
    let _span = info_span!("vtable_recovery", tables = layouts.len()).entered();
    let width = module.pointer_width();
    let mut recovery = VtableRecovery {
        pointer_width: width,
        ..VtableRecovery::default()
    };

    for (table, layout) in layouts.iter().enumerate() {
        let table = table as u32;
        let unknown = |reason: String| TableVtables {
            table,
            status: TableLayoutStatus::Unknown { reason },
            vtables: Vec::new(),
            candidates: 0,
        };

        let entry = if let Some(reason) = layout.unknown_reason() {
            unknown(reason.to_string())
        } else if !cfg.assume_static_data {
            unknown("static data image disabled".to_string())
        } else {
            let candidates = scan_candidates(image, layout, width, cfg.min_slots.max(1));
            let found = candidates.len();
            let vtables = filter_probable(module, candidates, cfg.min_distinct_patterns);
            debug!(table, candidates = found, probable = vtables.len(), "Vtable scan");
            if vtables.is_empty() {
                TableVtables {
                    candidates: found,
                    ..unknown(format!("no probable vtables among {} candidates", found))
                }
            } else {
                TableVtables {
                    table,
                    status: TableLayoutStatus::Known {
                        vtables: vtables.len(),
                    },
                    vtables,
                    candidates: found,
                }
            }
        };

        if let TableLayoutStatus::Unknown { reason } = &entry.status {
            warn!(table, %reason, "Unknown vtable layout");
            recovery.diagnostics.push(Diagnostic::UnknownVtableLayout {
                table,
                reason: reason.clone(),
            });
        }
        recovery.tables.push(entry);
    }
    recovery
}
