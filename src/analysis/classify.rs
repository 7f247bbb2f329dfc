//! Call-site classification.
//!
//! Every call instruction of a function becomes a `ClassifiedSite`. Direct
//! calls are certain. For indirect calls the table-index operand is walked
//! backward through its producers to collect index evidence, and that
//! evidence narrows the conservative candidate set (every function with the
//! declared signature). The walk is bounded by `WalkBudget`; whatever it
//! cannot follow ends up as `Unknown`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, trace};

use crate::analysis::dataflow::{local_assignments, Producer, ProducerGraph};
use crate::analysis::memory::{MemoryImage, MemoryView};
use crate::analysis::table::TableLayout;
use crate::analysis::values::ValueSet;
use crate::analysis::vtable::VtableRecovery;
use crate::config::AnalysisConfig;
use crate::core::call_graph::CallType;
use crate::core::candidates::{CandidateSet, Confidence, IndexEvidence, IndirectCallSite};
use crate::core::function::{Body, FuncIdx, Function};
use crate::core::instruction::{BinaryOp, Instr, LoadOp, Val};
use crate::core::module::Module;
use crate::core::types::FunctionType;
use crate::error::{Diagnostic, WalkBudget};

/// A call instruction with the targets it may reach.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedSite {
    pub caller: FuncIdx,
    /// Byte offset of the call instruction
    pub offset: usize,
    pub call_type: CallType,
    pub candidates: CandidateSet,
    /// Evidence for indirect calls; `None` for direct ones
    pub indirect: Option<IndirectCallSite>,
    /// Set when the site fell back to the conservative set
    pub diagnostic: Option<Diagnostic>,
}

impl ClassifiedSite {
    pub fn is_indirect(&self) -> bool {
        self.indirect.is_some()
    }
}

/// Read-only state shared by every function's classification.
pub struct ClassifyContext<'a> {
    module: &'a Module,
    image: &'a MemoryImage,
    layouts: &'a [TableLayout],
    vtables: &'a VtableRecovery,
    budget: WalkBudget,
    assume_static_data: bool,
    restrict_to_table: bool,
    /// Globals targeted by some `global.set`
    written_globals: HashSet<u32>,
    by_type: HashMap<&'a FunctionType, BTreeSet<FuncIdx>>,
    table_funcs: Vec<BTreeSet<FuncIdx>>,
}

impl<'a> ClassifyContext<'a> {
    pub fn new(
        module: &'a Module,
        image: &'a MemoryImage,
        layouts: &'a [TableLayout],
        vtables: &'a VtableRecovery,
        config: &AnalysisConfig,
    ) -> Self {
        let written_globals = module
            .functions
            .iter()
            .filter_map(|f| f.body.as_ref())
            .flat_map(|b| b.instrs.iter())
            .filter_map(|l| match l.instr {
                Instr::GlobalSet(g) => Some(g),
                _ => None,
            })
            .collect();

        let mut by_type: HashMap<&FunctionType, BTreeSet<FuncIdx>> = HashMap::new();
        for f in &module.functions {
            by_type.entry(&f.ty).or_default().insert(f.idx);
        }

        let table_funcs = (0..module.tables.len() as u32)
            .map(|t| module.table_functions(t))
            .collect();

        Self {
            module,
            image,
            layouts,
            vtables,
            budget: config.classifier.budget(),
            assume_static_data: config.vtables.assume_static_data,
            restrict_to_table: config.classifier.restrict_fallback_to_table,
            written_globals,
            by_type,
            table_funcs,
        }
    }

    pub fn module(&self) -> &'a Module {
        self.module
    }

    /// Every function whose signature equals `type_idx`, optionally limited
    /// to the functions placed in `table`.
    pub fn conservative_set(&self, type_idx: u32, table: Option<u32>) -> CandidateSet {
        let mut targets = self
            .module
            .func_type(type_idx)
            .and_then(|ty| self.by_type.get(ty))
            .cloned()
            .unwrap_or_default();
        if self.restrict_to_table {
            if let Some(funcs) = table.and_then(|t| self.table_funcs.get(t as usize)) {
                targets.retain(|f| funcs.contains(f));
            }
        }
        CandidateSet::conservative(targets)
    }

    /// Statically known value of global `g`, if any.
    fn global_value(&self, g: u32) -> Option<i32> {
        let global = self.module.globals.get(g as usize)?;
        if global.import.is_some() {
            return None;
        }
        if global.mutable && (self.written_globals.contains(&g) || !global.exports.is_empty()) {
            return None;
        }
        global.init.as_ref()?.as_i32()
    }
}

/// Backward walk over one function's producers.
struct Walker<'c, 'a> {
    ctx: &'c ClassifyContext<'a>,
    func: &'c Function,
    body: &'c Body,
    graph: &'c ProducerGraph,
    assignments: &'c HashMap<u32, Vec<usize>>,
    table: u32,
    fuel: usize,
    active: HashSet<usize>,
    via_vtable: bool,
    reason: Option<String>,
}

impl Walker<'_, '_> {
    fn unknown(&mut self, reason: impl FnOnce() -> String) -> ValueSet {
        if self.reason.is_none() {
            self.reason = Some(reason());
        }
        ValueSet::Unknown
    }

    fn eval(&mut self, p: Producer, depth: usize) -> ValueSet {
        let Producer::Instr(i) = p else {
            return self.unknown(|| "value merged at a control-flow join".to_string());
        };
        if depth >= self.ctx.budget.max_depth {
            return self.unknown(|| "walk depth budget exhausted".to_string());
        }
        if self.fuel == 0 {
            return self.unknown(|| "walk step budget exhausted".to_string());
        }
        self.fuel -= 1;
        if !self.active.insert(i) {
            return self.unknown(|| "cyclic local assignment".to_string());
        }
        let v = self.eval_instr(i, depth);
        self.active.remove(&i);
        v
    }

    fn operand(&mut self, i: usize, k: usize, depth: usize) -> ValueSet {
        match self.graph.operand(i, k) {
            Some(p) => self.eval(p, depth + 1),
            None => self.unknown(|| "operand not simulated".to_string()),
        }
    }

    fn eval_instr(&mut self, i: usize, depth: usize) -> ValueSet {
        let cap = self.ctx.budget.max_values;
        let body = self.body;
        let Some(located) = body.instrs.get(i) else {
            return ValueSet::Unknown;
        };
        match &located.instr {
            Instr::Const(Val::I32(c)) => ValueSet::single(*c),
            Instr::LocalGet(x) if *x < self.func.param_count() => {
                self.unknown(|| format!("index comes from parameter {}", x))
            }
            Instr::LocalGet(x) => {
                // Declared locals start out as zero.
                let mut acc = ValueSet::single(0);
                let defs = self.assignments.get(x).cloned().unwrap_or_default();
                for d in defs {
                    let v = self.operand(d, 0, depth);
                    acc = acc.union(&v, cap);
                    if acc.is_unknown() {
                        break;
                    }
                }
                acc
            }
            Instr::LocalTee(_) => self.operand(i, 0, depth),
            Instr::GlobalGet(g) => match self.ctx.global_value(*g) {
                Some(v) => ValueSet::single(v),
                None => self.unknown(|| format!("global {} is not constant", g)),
            },
            Instr::Select => {
                let a = self.operand(i, 0, depth);
                if a.is_unknown() {
                    return a;
                }
                let b = self.operand(i, 1, depth);
                a.union(&b, cap)
            }
            Instr::Binary(op) if *op != BinaryOp::Other => {
                let lhs = self.operand(i, 0, depth);
                if lhs.is_unknown() {
                    return lhs;
                }
                let rhs = self.operand(i, 1, depth);
                lhs.binary(*op, &rhs, cap)
            }
            Instr::Load {
                op: LoadOp::I32Load,
                memarg,
            } if memarg.memory == 0 => {
                if !self.ctx.assume_static_data {
                    return self.unknown(|| "static data image disabled".to_string());
                }
                let addrs = self.operand(i, 0, depth);
                let image = self.ctx.image;
                let vtables = self.ctx.vtables;
                let table = self.table;
                let mut from_vtable = false;
                let loaded = addrs.try_map(
                    |a| {
                        let addr = u64::from(a as u32).checked_add(memarg.offset)?;
                        if vtables.vtable_containing(table, addr).is_some() {
                            from_vtable = true;
                        }
                        image.read_u32(addr).ok().map(|w| w as i32)
                    },
                    cap,
                );
                if loaded.is_unknown() {
                    return self.unknown(|| "load from memory that is not statically known".to_string());
                }
                self.via_vtable |= from_vtable;
                loaded
            }
            other => {
                let name = format!("{:?}", other);
                self.unknown(move || format!("index produced by {}", name))
            }
        }
    }

    fn instr(&self, p: Producer) -> Option<&Instr> {
        match p {
            Producer::Instr(i) => self.body.instrs.get(i).map(|l| &l.instr),
            Producer::Opaque => None,
        }
    }

    fn is_i32_load(&self, p: Producer) -> bool {
        matches!(
            self.instr(p),
            Some(Instr::Load {
                op: LoadOp::I32Load,
                ..
            })
        )
    }

    /// Byte offset of a vtable-shaped index load: `load offset=k (load ..)`
    /// or `load (i32.add (load ..) (i32.const k))`.
    fn virtual_slot(&self, p: Producer) -> Option<u64> {
        let Producer::Instr(i) = p else {
            return None;
        };
        let Some(Instr::Load {
            op: LoadOp::I32Load,
            memarg,
        }) = self.instr(p)
        else {
            return None;
        };
        let addr = self.graph.operand(i, 0)?;
        if self.is_i32_load(addr) {
            return Some(memarg.offset);
        }
        let Producer::Instr(a) = addr else {
            return None;
        };
        if !matches!(self.instr(addr), Some(Instr::Binary(BinaryOp::I32Add))) {
            return None;
        }
        let (lhs, rhs) = (self.graph.operand(a, 0)?, self.graph.operand(a, 1)?);
        let constant = |q: Producer| match self.instr(q) {
            Some(Instr::Const(Val::I32(k))) if *k >= 0 => Some(*k as u64),
            _ => None,
        };
        let k = if self.is_i32_load(lhs) {
            constant(rhs)?
        } else if self.is_i32_load(rhs) {
            constant(lhs)?
        } else {
            return None;
        };
        memarg.offset.checked_add(k)
    }

    /// Evidence for the index operand of the call at `at`.
    fn evidence(&mut self, at: usize) -> (IndexEvidence, bool) {
        let Some(index) = self.graph.top_operand(at) else {
            let reason = match self.graph.poison() {
                Some(p) => p.to_string(),
                None => "call was not simulated".to_string(),
            };
            return (IndexEvidence::unresolved(reason), false);
        };
        match self.eval(index, 0) {
            ValueSet::Known(values) => {
                let indices = values
                    .into_iter()
                    .filter_map(|v| u32::try_from(v).ok())
                    .collect();
                (
                    IndexEvidence::Exact {
                        indices,
                        via_vtable: self.via_vtable,
                    },
                    self.via_vtable,
                )
            }
            ValueSet::Unknown => match self.virtual_slot(index) {
                Some(byte_offset) => (IndexEvidence::VirtualSlot { byte_offset }, true),
                None => {
                    let reason = self
                        .reason
                        .take()
                        .unwrap_or_else(|| "index value unknown".to_string());
                    (IndexEvidence::unresolved(reason), false)
                }
            },
        }
    }
}

fn site_call_type(tail: bool, virtual_: bool) -> CallType {
    if virtual_ {
        CallType::Virtual
    } else if tail {
        CallType::Tail
    } else {
        CallType::Indirect
    }
}

/// Turn evidence into a candidate set. Returns the set, whether it came
/// from a vtable, and the fallback reason when the evidence was not usable.
fn resolve(
    ctx: &ClassifyContext<'_>,
    site: &IndirectCallSite,
    virtual_hint: bool,
) -> (CandidateSet, bool, Option<String>) {
    let base = ctx.conservative_set(site.type_idx, site.table);
    let layout = site.table.and_then(|t| ctx.layouts.get(t as usize));

    match (&site.evidence, site.table) {
        (IndexEvidence::Exact { indices, .. }, Some(_)) => {
            let Some(layout) = layout.filter(|l| l.is_known()) else {
                let reason = layout
                    .and_then(|l| l.unknown_reason())
                    .map(|r| format!("exact index but {}", r))
                    .unwrap_or_else(|| "exact index into a missing table".to_string());
                return (base, false, Some(reason));
            };
            let targets: BTreeSet<FuncIdx> = indices.iter().filter_map(|i| layout.get(*i)).collect();
            match base.refine(&targets, Confidence::Precise) {
                Some(set) => (set, virtual_hint, None),
                None => (
                    base,
                    false,
                    Some(format!(
                        "no function of the declared type at table indices {:?}",
                        indices
                    )),
                ),
            }
        }
        (IndexEvidence::VirtualSlot { byte_offset }, Some(table)) => {
            let slot = ctx.vtables.slot_targets(table, *byte_offset);
            match base.refine(&slot, Confidence::Heuristic) {
                Some(set) => (set, true, None),
                None => (
                    base,
                    false,
                    Some(format!("no probable vtable slot at +{} matches", byte_offset)),
                ),
            }
        }
        (IndexEvidence::Unresolved { reason }, _) => (base, false, Some(reason.clone())),
        (_, None) => (base, false, Some("call_ref target".to_string())),
    }
}

/// Classify every call instruction of `func`.
pub fn classify_function(ctx: &ClassifyContext<'_>, func: &Function) -> Vec<ClassifiedSite> {
    classify_calls(ctx, func, true)
}

/// Sites of a function outside the function budget: direct calls as usual,
/// every indirect call with its conservative set and no backward walk.
pub fn classify_unwalked(ctx: &ClassifyContext<'_>, func: &Function) -> Vec<ClassifiedSite> {
    classify_calls(ctx, func, false)
}

fn classify_calls(ctx: &ClassifyContext<'_>, func: &Function, walk: bool) -> Vec<ClassifiedSite> {
    let Some(body) = &func.body else {
        return Vec::new();
    };
    let mut sites = Vec::new();
    if !body.instrs.iter().any(|l| l.instr.is_call()) {
        return sites;
    }

    let graph = if walk {
        ProducerGraph::build(ctx.module, func)
    } else {
        ProducerGraph::default()
    };
    let assignments = if walk { local_assignments(func) } else { HashMap::new() };
    if let Some(p) = graph.poison() {
        debug!(func = %func.idx, at = p.at(), reason = %p, "Producer simulation stopped");
    }

    for (at, located) in body.instrs.iter().enumerate() {
        let offset = located.offset;
        let (type_idx, table, tail) = match &located.instr {
            Instr::Call(target) | Instr::ReturnCall(target) => {
                let call_type = if matches!(located.instr, Instr::ReturnCall(_)) {
                    CallType::Tail
                } else {
                    CallType::Direct
                };
                sites.push(ClassifiedSite {
                    caller: func.idx,
                    offset,
                    call_type,
                    candidates: CandidateSet::direct(*target),
                    indirect: None,
                    diagnostic: None,
                });
                continue;
            }
            Instr::CallIndirect { type_idx, table } => (*type_idx, Some(*table), false),
            Instr::ReturnCallIndirect { type_idx, table } => (*type_idx, Some(*table), true),
            Instr::CallRef { type_idx } => (*type_idx, None, false),
            _ => continue,
        };

        let (evidence, virtual_hint) = match table {
            Some(_) if !walk => (IndexEvidence::unresolved("function budget exceeded"), false),
            Some(t) => {
                let mut walker = Walker {
                    ctx,
                    func,
                    body,
                    graph: &graph,
                    assignments: &assignments,
                    table: t,
                    fuel: ctx.budget.max_depth.saturating_mul(ctx.budget.max_values).max(1),
                    active: HashSet::new(),
                    via_vtable: false,
                    reason: None,
                };
                walker.evidence(at)
            }
            None => (IndexEvidence::unresolved("call_ref target"), false),
        };

        let site = IndirectCallSite {
            caller: func.idx,
            offset,
            type_idx,
            table,
            tail,
            evidence,
        };
        let (candidates, virtual_, fallback) = resolve(ctx, &site, virtual_hint);
        let diagnostic = fallback.filter(|_| walk).map(|reason| {
            debug!(func = %func.idx, offset, %reason, "Unresolved call site");
            Diagnostic::UnresolvedCallSite {
                func: func.idx,
                offset,
                reason,
            }
        });
        trace!(
            func = %func.idx,
            offset,
            targets = candidates.len(),
            confidence = %candidates.confidence(),
            "Classified indirect call"
        );
        sites.push(ClassifiedSite {
            caller: func.idx,
            offset,
            call_type: site_call_type(tail, virtual_),
            candidates,
            indirect: Some(site),
            diagnostic,
        });
    }
    sites
}
