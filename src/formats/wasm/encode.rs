//! Writes a `Module` back to the binary format with `wasm-encoder`.
//!
//! Function bodies are copied from the bytes recorded at load time, so a
//! module produced by the loader re-encodes without touching its code.
//! Custom sections, tags and the exports that refer to tags are dropped.

use wasm_encoder as we;

use crate::core::instruction::{ConstExpr, Val};
use crate::core::module::{DataMode, ElementMode, ExportKind, Global, Limits, Memory, Module, Table};
use crate::core::types::ValType;
use crate::error::{Result, WasmCgError};

fn val_type(ty: ValType) -> we::ValType {
    match ty {
        ValType::I32 => we::ValType::I32,
        ValType::I64 => we::ValType::I64,
        ValType::F32 => we::ValType::F32,
        ValType::F64 => we::ValType::F64,
        ValType::V128 => we::ValType::V128,
        ValType::FuncRef => we::ValType::FUNCREF,
        ValType::ExternRef => we::ValType::EXTERNREF,
    }
}

fn ref_type(ty: ValType) -> Result<we::RefType> {
    match ty {
        ValType::FuncRef => Ok(we::RefType::FUNCREF),
        ValType::ExternRef => Ok(we::RefType::EXTERNREF),
        other => Err(WasmCgError::Encode(format!("{} is not a reference type", other))),
    }
}

fn table_bound(value: u64) -> Result<u32> {
    u32::try_from(value).map_err(|_| WasmCgError::Encode(format!("table limit {} exceeds u32", value)))
}

fn table_type(t: &Table) -> Result<we::TableType> {
    let Limits { initial, maximum } = &t.limits;
    Ok(we::TableType {
        element_type: ref_type(t.element_type)?,
        minimum: table_bound(*initial)?,
        maximum: maximum.map(table_bound).transpose()?,
    })
}

fn memory_type(m: &Memory) -> we::MemoryType {
    we::MemoryType {
        minimum: m.limits.initial,
        maximum: m.limits.maximum,
        memory64: m.memory64,
        shared: m.shared,
    }
}

fn global_type(g: &Global) -> we::GlobalType {
    we::GlobalType {
        val_type: val_type(g.content_type),
        mutable: g.mutable,
    }
}

fn const_expr(expr: &ConstExpr) -> Result<we::ConstExpr> {
    Ok(match expr {
        ConstExpr::Const(Val::I32(v)) => we::ConstExpr::i32_const(*v),
        ConstExpr::Const(Val::I64(v)) => we::ConstExpr::i64_const(*v),
        ConstExpr::Const(Val::F32(bits)) => we::ConstExpr::f32_const(f32::from_bits(*bits)),
        ConstExpr::Const(Val::F64(bits)) => we::ConstExpr::f64_const(f64::from_bits(*bits)),
        ConstExpr::GlobalGet(g) => we::ConstExpr::global_get(*g),
        ConstExpr::RefNull => we::ConstExpr::ref_null(we::HeapType::Func),
        ConstExpr::RefFunc(f) => we::ConstExpr::ref_func(f.0),
        ConstExpr::Unsupported => {
            return Err(WasmCgError::Encode(
                "extended constant expressions cannot be re-encoded".into(),
            ))
        }
    })
}

fn import_origin(origin: &Option<(String, String)>) -> Option<(&str, &str)> {
    origin.as_ref().map(|(m, n)| (m.as_str(), n.as_str()))
}

/// Encode a module as a core WebAssembly binary.
pub fn encode_module(module: &Module) -> Result<Vec<u8>> {
    check_imports_first(module)?;
    let mut out = we::Module::new();

    let mut types = we::TypeSection::new();
    for ty in &module.types {
        types.function(
            ty.params.iter().copied().map(val_type),
            ty.results.iter().copied().map(val_type),
        );
    }
    if !types.is_empty() {
        out.section(&types);
    }

    let mut imports = we::ImportSection::new();
    for f in &module.functions {
        if let Some(import) = &f.import {
            imports.import(&import.module, &import.name, we::EntityType::Function(f.type_idx));
        }
    }
    for t in &module.tables {
        if let Some((m, n)) = import_origin(&t.import) {
            imports.import(m, n, table_type(t)?);
        }
    }
    for mem in &module.memories {
        if let Some((m, n)) = import_origin(&mem.import) {
            imports.import(m, n, memory_type(mem));
        }
    }
    for g in &module.globals {
        if let Some((m, n)) = import_origin(&g.import) {
            imports.import(m, n, global_type(g));
        }
    }
    if !imports.is_empty() {
        out.section(&imports);
    }

    let defined: Vec<_> = module.functions.iter().filter(|f| !f.is_imported()).collect();
    let mut functions = we::FunctionSection::new();
    for f in &defined {
        functions.function(f.type_idx);
    }
    if !functions.is_empty() {
        out.section(&functions);
    }

    let mut tables = we::TableSection::new();
    for t in module.tables.iter().filter(|t| t.import.is_none()) {
        tables.table(table_type(t)?);
    }
    if !tables.is_empty() {
        out.section(&tables);
    }

    let mut memories = we::MemorySection::new();
    for m in module.memories.iter().filter(|m| m.import.is_none()) {
        memories.memory(memory_type(m));
    }
    if !memories.is_empty() {
        out.section(&memories);
    }

    let mut globals = we::GlobalSection::new();
    for g in module.globals.iter().filter(|g| g.import.is_none()) {
        let init = g
            .init
            .as_ref()
            .ok_or_else(|| WasmCgError::Encode("defined global without initializer".into()))?;
        globals.global(global_type(g), &const_expr(init)?);
    }
    if !globals.is_empty() {
        out.section(&globals);
    }

    let mut exports = we::ExportSection::new();
    for e in &module.exports {
        let kind = match e.kind {
            ExportKind::Func => we::ExportKind::Func,
            ExportKind::Table => we::ExportKind::Table,
            ExportKind::Memory => we::ExportKind::Memory,
            ExportKind::Global => we::ExportKind::Global,
            ExportKind::Tag => continue,
        };
        exports.export(&e.name, kind, e.index);
    }
    if !exports.is_empty() {
        out.section(&exports);
    }

    if let Some(start) = module.start {
        out.section(&we::StartSection {
            function_index: start.0,
        });
    }

    let elements = element_section(module)?;
    if !elements.is_empty() {
        out.section(&elements);
    }

    if let Some(count) = module.data_count {
        out.section(&we::DataCountSection { count });
    }

    let mut code = we::CodeSection::new();
    for f in &defined {
        let raw = f
            .body
            .as_ref()
            .map(|b| b.raw.as_slice())
            .filter(|raw| !raw.is_empty())
            .ok_or_else(|| WasmCgError::Encode(format!("{} has no encoded body", f.idx)))?;
        code.raw(raw);
    }
    if !code.is_empty() {
        out.section(&code);
    }

    let mut data = we::DataSection::new();
    for seg in &module.data {
        match &seg.mode {
            DataMode::Active { memory, offset } => {
                data.active(*memory, &const_expr(offset)?, seg.bytes.iter().copied());
            }
            DataMode::Passive => {
                data.passive(seg.bytes.iter().copied());
            }
        }
    }
    if !data.is_empty() {
        out.section(&data);
    }

    Ok(out.finish())
}

fn check_imports_first(module: &Module) -> Result<()> {
    let mut seen_defined = false;
    for f in &module.functions {
        if f.is_imported() && seen_defined {
            return Err(WasmCgError::Encode(format!(
                "imported {} follows a defined function",
                f.idx
            )));
        }
        seen_defined |= !f.is_imported();
    }
    Ok(())
}

/// Index lists when every item is a function, `ref.func`/`ref.null`
/// expressions otherwise.
fn element_section(module: &Module) -> Result<we::ElementSection> {
    let mut section = we::ElementSection::new();
    for seg in &module.elements {
        let indices: Option<Vec<u32>> = seg.items.iter().map(|i| i.map(|f| f.0)).collect();
        let exprs: Vec<we::ConstExpr>;
        let elements = match &indices {
            Some(funcs) => we::Elements::Functions(funcs),
            None => {
                exprs = seg
                    .items
                    .iter()
                    .map(|i| match i {
                        Some(f) => we::ConstExpr::ref_func(f.0),
                        None => we::ConstExpr::ref_null(we::HeapType::Func),
                    })
                    .collect();
                we::Elements::Expressions(we::RefType::FUNCREF, &exprs)
            }
        };
        match &seg.mode {
            ElementMode::Active { table, offset } => {
                let table = (*table != 0).then_some(*table);
                section.active(table, &const_expr(offset)?, elements);
            }
            ElementMode::Passive => {
                section.passive(elements);
            }
            ElementMode::Declared => {
                section.declared(elements);
            }
        }
    }
    Ok(section)
}
