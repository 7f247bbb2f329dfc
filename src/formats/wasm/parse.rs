//! Section-by-section decoding of a core WebAssembly module.
//!
//! `wasmparser` does the byte-level reading. This module adds the structural
//! checks the analysis relies on (canonical section order, matching function
//! and code counts, index ranges) and builds the `Module` arena.

use std::iter;
use tracing::{debug, info, info_span};
use wasmparser::{ElementItems, ElementKind, ExternalKind, Operator, Parser, Payload, TypeRef};

use crate::config::LoaderConfig;
use crate::core::function::{Body, FuncIdx, Function, ImportRef};
use crate::core::instruction::{ConstExpr, Instr, Located, Val};
use crate::core::module::{
    DataMode, DataSegment, ElementMode, ElementSegment, Export, ExportKind, Global, Limits, Memory,
    Module, Table,
};
use crate::core::types::FunctionType;
use crate::demangle::display_name;
use crate::error::{Result, WasmCgError};
use crate::formats::wasm::ops::{convert, ref_type, val_type};
use crate::formats::wasm::{WASM_MAGIC, WASM_VERSION};

/// Upper bound on declared locals per function (engines use the same limit).
const MAX_LOCALS: u64 = 50_000;

pub const SECTION_CUSTOM: u8 = 0;
pub const SECTION_TYPE: u8 = 1;
pub const SECTION_IMPORT: u8 = 2;
pub const SECTION_FUNCTION: u8 = 3;
pub const SECTION_TABLE: u8 = 4;
pub const SECTION_MEMORY: u8 = 5;
pub const SECTION_GLOBAL: u8 = 6;
pub const SECTION_EXPORT: u8 = 7;
pub const SECTION_START: u8 = 8;
pub const SECTION_ELEMENT: u8 = 9;
pub const SECTION_CODE: u8 = 10;
pub const SECTION_DATA: u8 = 11;
pub const SECTION_DATA_COUNT: u8 = 12;
pub const SECTION_TAG: u8 = 13;

fn section_name(id: u8) -> &'static str {
    match id {
        SECTION_CUSTOM => "custom",
        SECTION_TYPE => "type",
        SECTION_IMPORT => "import",
        SECTION_FUNCTION => "function",
        SECTION_TABLE => "table",
        SECTION_MEMORY => "memory",
        SECTION_GLOBAL => "global",
        SECTION_EXPORT => "export",
        SECTION_START => "start",
        SECTION_ELEMENT => "element",
        SECTION_CODE => "code",
        SECTION_DATA => "data",
        SECTION_DATA_COUNT => "datacount",
        SECTION_TAG => "tag",
        _ => "unknown",
    }
}

/// Position of a section id in the canonical order.
fn section_rank(id: u8) -> Option<u8> {
    let rank = match id {
        SECTION_TYPE => 1,
        SECTION_IMPORT => 2,
        SECTION_FUNCTION => 3,
        SECTION_TABLE => 4,
        SECTION_MEMORY => 5,
        SECTION_TAG => 6,
        SECTION_GLOBAL => 7,
        SECTION_EXPORT => 8,
        SECTION_START => 9,
        SECTION_ELEMENT => 10,
        SECTION_DATA_COUNT => 11,
        SECTION_CODE => 12,
        SECTION_DATA => 13,
        _ => return None,
    };
    Some(rank)
}

/// Tracks the last non-custom section seen.
#[derive(Debug, Default)]
struct SectionOrder {
    last: u8,
    last_id: Option<u8>,
}

impl SectionOrder {
    fn check(&mut self, id: u8, offset: usize) -> Result<()> {
        if id == SECTION_CUSTOM {
            return Ok(());
        }
        let rank = section_rank(id)
            .ok_or_else(|| WasmCgError::malformed(offset, format!("unknown section id {}", id)))?;
        if rank <= self.last {
            let prev = self.last_id.map(section_name).unwrap_or("unknown");
            let message = if rank == self.last {
                format!("duplicate {} section", section_name(id))
            } else {
                format!("{} section after {} section", section_name(id), prev)
            };
            return Err(WasmCgError::malformed(offset, message));
        }
        self.last = rank;
        self.last_id = Some(id);
        Ok(())
    }
}

/// Section id and start offset of a payload, when it is a section header.
fn section_of(payload: &Payload<'_>) -> Option<(u8, usize)> {
    let (id, start) = match payload {
        Payload::TypeSection(r) => (SECTION_TYPE, r.range().start),
        Payload::ImportSection(r) => (SECTION_IMPORT, r.range().start),
        Payload::FunctionSection(r) => (SECTION_FUNCTION, r.range().start),
        Payload::TableSection(r) => (SECTION_TABLE, r.range().start),
        Payload::MemorySection(r) => (SECTION_MEMORY, r.range().start),
        Payload::TagSection(r) => (SECTION_TAG, r.range().start),
        Payload::GlobalSection(r) => (SECTION_GLOBAL, r.range().start),
        Payload::ExportSection(r) => (SECTION_EXPORT, r.range().start),
        Payload::StartSection { range, .. } => (SECTION_START, range.start),
        Payload::ElementSection(r) => (SECTION_ELEMENT, r.range().start),
        Payload::DataCountSection { range, .. } => (SECTION_DATA_COUNT, range.start),
        Payload::CodeSectionStart { range, .. } => (SECTION_CODE, range.start),
        Payload::DataSection(r) => (SECTION_DATA, r.range().start),
        Payload::CustomSection(r) => (SECTION_CUSTOM, r.range().start),
        Payload::UnknownSection { id, range, .. } => (*id, range.start),
        _ => return None,
    };
    Some((id, start))
}

fn check_header(bytes: &[u8]) -> Result<()> {
    if bytes.len() < 8 {
        return Err(WasmCgError::malformed(bytes.len(), "truncated module header"));
    }
    if bytes[..4] != WASM_MAGIC {
        return Err(WasmCgError::malformed(0, "bad magic number"));
    }
    if bytes[4..8] != WASM_VERSION {
        return Err(WasmCgError::malformed(
            4,
            "unsupported version (only core modules, version 1)",
        ));
    }
    Ok(())
}

fn const_expr(expr: &wasmparser::ConstExpr<'_>) -> Result<ConstExpr> {
    let mut reader = expr.get_operators_reader();
    let value = match reader.read()? {
        Operator::I32Const { value } => ConstExpr::Const(Val::I32(value)),
        Operator::I64Const { value } => ConstExpr::Const(Val::I64(value)),
        Operator::F32Const { value } => ConstExpr::Const(Val::F32(value.bits())),
        Operator::F64Const { value } => ConstExpr::Const(Val::F64(value.bits())),
        Operator::GlobalGet { global_index } => ConstExpr::GlobalGet(global_index),
        Operator::RefNull { .. } => ConstExpr::RefNull,
        Operator::RefFunc { function_index } => ConstExpr::RefFunc(FuncIdx(function_index)),
        _ => return Ok(ConstExpr::Unsupported),
    };
    // Extended constant expressions continue past the first operator.
    match reader.read()? {
        Operator::End => Ok(value),
        _ => Ok(ConstExpr::Unsupported),
    }
}

fn limits(initial: u64, maximum: Option<u64>) -> Limits {
    Limits { initial, maximum }
}

/// Accumulates sections into a `Module`.
#[derive(Default)]
struct ModuleBuilder {
    module: Module,
    imported_functions: usize,
    defined_functions: usize,
    bodies_seen: usize,
    code_section: bool,
}

impl ModuleBuilder {
    fn function_type(&self, type_idx: u32, offset: usize) -> Result<FunctionType> {
        self.module.func_type(type_idx).cloned().ok_or_else(|| {
            WasmCgError::malformed(offset, format!("type index {} out of range", type_idx))
        })
    }

    fn check_function(&self, f: FuncIdx, offset: usize) -> Result<()> {
        if f.index() >= self.module.functions.len() {
            return Err(WasmCgError::malformed(
                offset,
                format!("function index {} out of range", f.0),
            ));
        }
        Ok(())
    }

    fn import(&mut self, import: wasmparser::Import<'_>, offset: usize) -> Result<()> {
        let origin = (import.module.to_string(), import.name.to_string());
        match import.ty {
            TypeRef::Func(type_idx) => {
                if self.defined_functions > 0 {
                    return Err(WasmCgError::malformed(offset, "function import after definitions"));
                }
                let ty = self.function_type(type_idx, offset)?;
                let idx = FuncIdx(self.module.functions.len() as u32);
                self.module.functions.push(Function::new_imported(
                    idx,
                    type_idx,
                    ty,
                    ImportRef {
                        module: origin.0,
                        name: origin.1,
                    },
                ));
                self.imported_functions += 1;
            }
            TypeRef::Table(t) => self.module.tables.push(Table {
                element_type: ref_type(t.element_type),
                limits: limits(u64::from(t.initial), t.maximum.map(u64::from)),
                import: Some(origin),
                exports: Vec::new(),
            }),
            TypeRef::Memory(m) => self.module.memories.push(Memory {
                limits: limits(m.initial, m.maximum),
                memory64: m.memory64,
                shared: m.shared,
                import: Some(origin),
                exports: Vec::new(),
            }),
            TypeRef::Global(g) => self.module.globals.push(Global {
                content_type: val_type(g.content_type),
                mutable: g.mutable,
                init: None,
                import: Some(origin),
                exports: Vec::new(),
            }),
            TypeRef::Tag(_) => {}
        }
        Ok(())
    }

    fn export(&mut self, export: wasmparser::Export<'_>, offset: usize) -> Result<()> {
        let name = export.name.to_string();
        let index = export.index as usize;
        let out_of_range = |what: &str| {
            WasmCgError::malformed(offset, format!("exported {} index {} out of range", what, index))
        };
        let kind = match export.kind {
            ExternalKind::Func => {
                let f = self.module.functions.get_mut(index).ok_or_else(|| out_of_range("function"))?;
                f.exports.push(name.clone());
                ExportKind::Func
            }
            ExternalKind::Table => {
                let t = self.module.tables.get_mut(index).ok_or_else(|| out_of_range("table"))?;
                t.exports.push(name.clone());
                ExportKind::Table
            }
            ExternalKind::Memory => {
                let m = self.module.memories.get_mut(index).ok_or_else(|| out_of_range("memory"))?;
                m.exports.push(name.clone());
                ExportKind::Memory
            }
            ExternalKind::Global => {
                let g = self.module.globals.get_mut(index).ok_or_else(|| out_of_range("global"))?;
                g.exports.push(name.clone());
                ExportKind::Global
            }
            ExternalKind::Tag => ExportKind::Tag,
        };
        self.module.exports.push(Export {
            name,
            kind,
            index: export.index,
        });
        Ok(())
    }

    fn element(&mut self, elem: wasmparser::Element<'_>, offset: usize) -> Result<()> {
        let mode = match elem.kind {
            ElementKind::Passive => ElementMode::Passive,
            ElementKind::Declared => ElementMode::Declared,
            ElementKind::Active {
                table_index,
                offset_expr,
            } => ElementMode::Active {
                table: table_index.unwrap_or(0),
                offset: const_expr(&offset_expr)?,
            },
        };
        let mut items = Vec::new();
        match elem.items {
            ElementItems::Functions(reader) => {
                for f in reader {
                    let f = FuncIdx(f?);
                    self.check_function(f, offset)?;
                    items.push(Some(f));
                }
            }
            ElementItems::Expressions(_, reader) => {
                for expr in reader {
                    match const_expr(&expr?)? {
                        ConstExpr::RefFunc(f) => {
                            self.check_function(f, offset)?;
                            items.push(Some(f));
                        }
                        _ => items.push(None),
                    }
                }
            }
        }
        self.module.elements.push(ElementSegment { mode, items });
        Ok(())
    }

    fn code_entry(&mut self, bytes: &[u8], body: wasmparser::FunctionBody<'_>) -> Result<()> {
        let range = body.range();
        let idx = self.imported_functions + self.bodies_seen;
        if self.bodies_seen >= self.defined_functions {
            return Err(WasmCgError::malformed(range.start, "more bodies than declared functions"));
        }
        self.bodies_seen += 1;

        let mut locals = Vec::new();
        let mut declared: u64 = 0;
        for local in body.get_locals_reader()? {
            let (count, ty) = local?;
            declared += u64::from(count);
            if declared > MAX_LOCALS {
                return Err(WasmCgError::malformed(range.start, "too many locals"));
            }
            locals.extend(iter::repeat(val_type(ty)).take(count as usize));
        }

        let function_count = self.module.functions.len();
        let type_count = self.module.types.len();
        let table_count = self.module.tables.len();
        let mut instrs = Vec::new();
        for item in body.get_operators_reader()?.into_iter_with_offsets() {
            let (op, offset) = item?;
            let instr = convert(&op)?;
            match &instr {
                Instr::Call(f) | Instr::ReturnCall(f) | Instr::RefFunc(f) if f.index() >= function_count => {
                    return Err(WasmCgError::malformed(
                        offset,
                        format!("call target {} out of range", f),
                    ));
                }
                Instr::CallIndirect { type_idx, table }
                | Instr::ReturnCallIndirect { type_idx, table } => {
                    if *type_idx as usize >= type_count {
                        return Err(WasmCgError::malformed(
                            offset,
                            format!("type index {} out of range", type_idx),
                        ));
                    }
                    if *table as usize >= table_count {
                        return Err(WasmCgError::malformed(
                            offset,
                            format!("table index {} out of range", table),
                        ));
                    }
                }
                Instr::TableWrite { table, .. } if *table as usize >= table_count => {
                    return Err(WasmCgError::malformed(
                        offset,
                        format!("table index {} out of range", table),
                    ));
                }
                _ => {}
            }
            instrs.push(Located { offset, instr });
        }

        let raw = bytes
            .get(range.clone())
            .ok_or_else(|| WasmCgError::malformed(range.start, "function body out of bounds"))?
            .to_vec();
        self.module.functions[idx].body = Some(Body { locals, instrs, raw });
        Ok(())
    }

    fn finish(mut self, cfg: &LoaderConfig, end: usize) -> Result<Module> {
        if self.defined_functions > 0 && !self.code_section {
            return Err(WasmCgError::malformed(end, "function section without code section"));
        }
        if self.bodies_seen != self.defined_functions {
            return Err(WasmCgError::malformed(end, "function and code section counts differ"));
        }
        if let Some(count) = self.module.data_count {
            if count as usize != self.module.data.len() {
                return Err(WasmCgError::malformed(end, "data count does not match data section"));
            }
        }

        for f in &mut self.module.functions {
            let base = match (&f.import, f.exports.first()) {
                (_, Some(export)) => {
                    if cfg.demangle_names {
                        display_name(export)
                    } else {
                        export.clone()
                    }
                }
                (Some(import), None) => {
                    let name = if cfg.demangle_names {
                        display_name(&import.name)
                    } else {
                        import.name.clone()
                    };
                    format!("{}.{}", import.module, name)
                }
                (None, None) => f.idx.to_string(),
            };
            f.name = base;
        }
        Ok(self.module)
    }
}

/// Parse a module with the default loader configuration.
pub fn parse_module(bytes: &[u8]) -> Result<Module> {
    parse_module_with(bytes, &LoaderConfig::default())
}

/// Parse a core WebAssembly module.
pub fn parse_module_with(bytes: &[u8], cfg: &LoaderConfig) -> Result<Module> {
    let _span = info_span!("parse_module", size = bytes.len()).entered();
    check_header(bytes)?;

    let mut order = SectionOrder::default();
    let mut b = ModuleBuilder::default();
    let mut end = bytes.len();

    for payload in Parser::new(0).parse_all(bytes) {
        let payload = payload?;
        if let Some((id, offset)) = section_of(&payload) {
            order.check(id, offset)?;
        }
        match payload {
            Payload::TypeSection(reader) => {
                for ty in reader.into_iter_err_on_gc_types() {
                    let ty = ty?;
                    b.module.types.push(FunctionType::new(
                        ty.params().iter().map(|t| val_type(*t)).collect(),
                        ty.results().iter().map(|t| val_type(*t)).collect(),
                    ));
                }
                debug!(count = b.module.types.len(), "type section");
            }
            Payload::ImportSection(reader) => {
                let offset = reader.range().start;
                for import in reader {
                    b.import(import?, offset)?;
                }
                debug!(functions = b.imported_functions, "import section");
            }
            Payload::FunctionSection(reader) => {
                let offset = reader.range().start;
                for type_idx in reader {
                    let type_idx = type_idx?;
                    let ty = b.function_type(type_idx, offset)?;
                    let idx = FuncIdx(b.module.functions.len() as u32);
                    b.module.functions.push(Function::new_defined(idx, type_idx, ty));
                    b.defined_functions += 1;
                }
                debug!(count = b.defined_functions, "function section");
            }
            Payload::TableSection(reader) => {
                for table in reader {
                    let t = table?.ty;
                    b.module.tables.push(Table {
                        element_type: ref_type(t.element_type),
                        limits: limits(u64::from(t.initial), t.maximum.map(u64::from)),
                        import: None,
                        exports: Vec::new(),
                    });
                }
            }
            Payload::MemorySection(reader) => {
                for memory in reader {
                    let m = memory?;
                    b.module.memories.push(Memory {
                        limits: limits(m.initial, m.maximum),
                        memory64: m.memory64,
                        shared: m.shared,
                        import: None,
                        exports: Vec::new(),
                    });
                }
            }
            Payload::GlobalSection(reader) => {
                for global in reader {
                    let g = global?;
                    b.module.globals.push(Global {
                        content_type: val_type(g.ty.content_type),
                        mutable: g.ty.mutable,
                        init: Some(const_expr(&g.init_expr)?),
                        import: None,
                        exports: Vec::new(),
                    });
                }
            }
            Payload::ExportSection(reader) => {
                let offset = reader.range().start;
                for export in reader {
                    b.export(export?, offset)?;
                }
            }
            Payload::StartSection { func, range } => {
                let f = FuncIdx(func);
                b.check_function(f, range.start)?;
                b.module.start = Some(f);
            }
            Payload::ElementSection(reader) => {
                let offset = reader.range().start;
                for elem in reader {
                    b.element(elem?, offset)?;
                }
                debug!(count = b.module.elements.len(), "element section");
            }
            Payload::DataCountSection { count, .. } => {
                b.module.data_count = Some(count);
            }
            Payload::DataSection(reader) => {
                for data in reader {
                    let data = data?;
                    let mode = match data.kind {
                        wasmparser::DataKind::Passive => DataMode::Passive,
                        wasmparser::DataKind::Active {
                            memory_index,
                            offset_expr,
                        } => DataMode::Active {
                            memory: memory_index,
                            offset: const_expr(&offset_expr)?,
                        },
                    };
                    b.module.data.push(DataSegment {
                        mode,
                        bytes: data.data.to_vec(),
                    });
                }
                debug!(count = b.module.data.len(), "data section");
            }
            Payload::CodeSectionStart { count, range, .. } => {
                if count as usize != b.defined_functions {
                    return Err(WasmCgError::malformed(
                        range.start,
                        format!(
                            "code section has {} bodies for {} declared functions",
                            count, b.defined_functions
                        ),
                    ));
                }
                b.code_section = true;
            }
            Payload::CodeSectionEntry(body) => b.code_entry(bytes, body)?,
            Payload::End(offset) => end = offset,
            // Names and other custom sections are not used.
            _ => {}
        }
    }

    let module = b.finish(cfg, end)?;
    info!(
        functions = module.function_count(),
        imported = module.imported_function_count(),
        tables = module.tables.len(),
        elements = module.elements.len(),
        data = module.data.len(),
        "Module parsed"
    );
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_bad_magic_and_version() {
        let err = parse_module(b"\0asn\x01\0\0\0").unwrap_err();
        assert!(matches!(err, WasmCgError::MalformedBinary { offset: 0, .. }));

        let err = parse_module(b"\0asm\x02\0\0\0").unwrap_err();
        assert!(matches!(err, WasmCgError::MalformedBinary { offset: 4, .. }));

        let err = parse_module(b"\0as").unwrap_err();
        assert!(err.is_malformed());
    }

    #[test]
    fn empty_module() {
        let m = parse_module(b"\0asm\x01\0\0\0").unwrap();
        assert_eq!(m.function_count(), 0);
        assert!(m.start.is_none());
    }

    #[test]
    fn section_order_tracking() {
        let mut order = SectionOrder::default();
        order.check(SECTION_TYPE, 8).unwrap();
        order.check(SECTION_CUSTOM, 10).unwrap();
        order.check(SECTION_DATA_COUNT, 12).unwrap();
        order.check(SECTION_CODE, 14).unwrap();
        let err = order.check(SECTION_IMPORT, 20).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Malformed binary at offset 0x14: import section after code section"
        );
        let err = order.check(SECTION_CODE, 30).unwrap_err();
        assert!(err.to_string().contains("duplicate code section"));
    }
}
