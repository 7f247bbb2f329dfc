//! Common test utilities: a byte-level WebAssembly module builder.
//!
//! Only the pieces the tests need are encoded: function types, function
//! imports, one funcref table, one memory, function exports, active element
//! and data segments with `i32.const` offsets, and function bodies.

#![allow(dead_code)]

pub const I32: u8 = 0x7f;
pub const I64: u8 = 0x7e;

pub fn uleb(out: &mut Vec<u8>, mut v: u32) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

pub fn sleb(out: &mut Vec<u8>, mut v: i32) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        let done = (v == 0 && byte & 0x40 == 0) || (v == -1 && byte & 0x40 != 0);
        if done {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

fn name(out: &mut Vec<u8>, s: &str) {
    uleb(out, s.len() as u32);
    out.extend_from_slice(s.as_bytes());
}

fn section(out: &mut Vec<u8>, id: u8, items: &[Vec<u8>]) {
    let mut payload = Vec::new();
    uleb(&mut payload, items.len() as u32);
    for item in items {
        payload.extend_from_slice(item);
    }
    out.push(id);
    uleb(out, payload.len() as u32);
    out.extend_from_slice(&payload);
}

fn i32_offset(out: &mut Vec<u8>, offset: i32) {
    out.push(0x41);
    sleb(out, offset);
    out.push(0x0b);
}

/// Instruction encoders. Each returns the encoded bytes.
pub mod op {
    use super::{sleb, uleb};

    pub fn i32_const(v: i32) -> Vec<u8> {
        let mut out = vec![0x41];
        sleb(&mut out, v);
        out
    }

    pub fn local_get(i: u32) -> Vec<u8> {
        let mut out = vec![0x20];
        uleb(&mut out, i);
        out
    }

    pub fn local_set(i: u32) -> Vec<u8> {
        let mut out = vec![0x21];
        uleb(&mut out, i);
        out
    }

    pub fn call(f: u32) -> Vec<u8> {
        let mut out = vec![0x10];
        uleb(&mut out, f);
        out
    }

    pub fn call_indirect(ty: u32, table: u32) -> Vec<u8> {
        let mut out = vec![0x11];
        uleb(&mut out, ty);
        uleb(&mut out, table);
        out
    }

    pub fn return_call_indirect(ty: u32, table: u32) -> Vec<u8> {
        let mut out = vec![0x13];
        uleb(&mut out, ty);
        uleb(&mut out, table);
        out
    }

    pub fn call_ref(ty: u32) -> Vec<u8> {
        let mut out = vec![0x14];
        uleb(&mut out, ty);
        out
    }

    pub fn ref_func(f: u32) -> Vec<u8> {
        let mut out = vec![0xd2];
        uleb(&mut out, f);
        out
    }

    pub fn table_set(table: u32) -> Vec<u8> {
        let mut out = vec![0x26];
        uleb(&mut out, table);
        out
    }

    pub fn i32_load(offset: u32) -> Vec<u8> {
        let mut out = vec![0x28, 0x02];
        uleb(&mut out, offset);
        out
    }

    pub fn i32_add() -> Vec<u8> {
        vec![0x6a]
    }

    pub fn select() -> Vec<u8> {
        vec![0x1b]
    }

    pub fn drop() -> Vec<u8> {
        vec![0x1a]
    }

    pub fn ret() -> Vec<u8> {
        vec![0x0f]
    }
}

/// Concatenate encoded instructions.
pub fn code(parts: &[Vec<u8>]) -> Vec<u8> {
    parts.concat()
}

#[derive(Default)]
pub struct WasmBuilder {
    types: Vec<(Vec<u8>, Vec<u8>)>,
    imports: Vec<(String, String, u32)>,
    funcs: Vec<(u32, Vec<u8>, Vec<u8>)>,
    table: Option<u32>,
    table_export: Option<String>,
    memory: Option<u32>,
    exports: Vec<(String, u32)>,
    elements: Vec<(i32, Vec<u32>)>,
    data: Vec<(i32, Vec<u8>)>,
}

impl WasmBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ty(&mut self, params: &[u8], results: &[u8]) -> u32 {
        self.types.push((params.to_vec(), results.to_vec()));
        self.types.len() as u32 - 1
    }

    /// Imports must be added before any defined function.
    pub fn import_func(&mut self, module: &str, field: &str, ty: u32) -> u32 {
        assert!(self.funcs.is_empty(), "imports come first");
        self.imports.push((module.to_string(), field.to_string(), ty));
        self.imports.len() as u32 - 1
    }

    /// Define a function; `body` excludes the final `end`.
    pub fn func(&mut self, ty: u32, body: Vec<u8>) -> u32 {
        self.func_with_locals(ty, 0, body)
    }

    /// Define a function with `i32_locals` extra i32 locals.
    pub fn func_with_locals(&mut self, ty: u32, i32_locals: u32, body: Vec<u8>) -> u32 {
        let mut locals = Vec::new();
        if i32_locals == 0 {
            uleb(&mut locals, 0);
        } else {
            uleb(&mut locals, 1);
            uleb(&mut locals, i32_locals);
            locals.push(I32);
        }
        self.funcs.push((ty, locals, body));
        (self.imports.len() + self.funcs.len()) as u32 - 1
    }

    pub fn table(&mut self, min: u32) -> &mut Self {
        self.table = Some(min);
        self
    }

    pub fn export_table(&mut self, name: &str) -> &mut Self {
        self.table_export = Some(name.to_string());
        self
    }

    pub fn memory(&mut self, pages: u32) -> &mut Self {
        self.memory = Some(pages);
        self
    }

    pub fn export(&mut self, name: &str, func: u32) -> &mut Self {
        self.exports.push((name.to_string(), func));
        self
    }

    pub fn elem(&mut self, offset: i32, funcs: &[u32]) -> &mut Self {
        self.elements.push((offset, funcs.to_vec()));
        self
    }

    pub fn data(&mut self, offset: i32, bytes: Vec<u8>) -> &mut Self {
        self.data.push((offset, bytes));
        self
    }

    /// Data segment of little-endian u32 words.
    pub fn words(&mut self, offset: i32, words: &[u32]) -> &mut Self {
        self.data(offset, words.iter().flat_map(|w| w.to_le_bytes()).collect())
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];

        if !self.types.is_empty() {
            let items: Vec<Vec<u8>> = self
                .types
                .iter()
                .map(|(p, r)| {
                    let mut t = vec![0x60];
                    uleb(&mut t, p.len() as u32);
                    t.extend_from_slice(p);
                    uleb(&mut t, r.len() as u32);
                    t.extend_from_slice(r);
                    t
                })
                .collect();
            section(&mut out, 1, &items);
        }
        if !self.imports.is_empty() {
            let items: Vec<Vec<u8>> = self
                .imports
                .iter()
                .map(|(m, f, ty)| {
                    let mut i = Vec::new();
                    name(&mut i, m);
                    name(&mut i, f);
                    i.push(0x00);
                    uleb(&mut i, *ty);
                    i
                })
                .collect();
            section(&mut out, 2, &items);
        }
        if !self.funcs.is_empty() {
            let items: Vec<Vec<u8>> = self
                .funcs
                .iter()
                .map(|(ty, _, _)| {
                    let mut i = Vec::new();
                    uleb(&mut i, *ty);
                    i
                })
                .collect();
            section(&mut out, 3, &items);
        }
        if let Some(min) = self.table {
            let mut t = vec![0x70, 0x00];
            uleb(&mut t, min);
            section(&mut out, 4, &[t]);
        }
        if let Some(pages) = self.memory {
            let mut m = vec![0x00];
            uleb(&mut m, pages);
            section(&mut out, 5, &[m]);
        }
        let mut exports: Vec<Vec<u8>> = self
            .exports
            .iter()
            .map(|(n, f)| {
                let mut e = Vec::new();
                name(&mut e, n);
                e.push(0x00);
                uleb(&mut e, *f);
                e
            })
            .collect();
        if let Some(n) = &self.table_export {
            let mut e = Vec::new();
            name(&mut e, n);
            e.push(0x01);
            uleb(&mut e, 0);
            exports.push(e);
        }
        if !exports.is_empty() {
            section(&mut out, 7, &exports);
        }
        if !self.elements.is_empty() {
            let items: Vec<Vec<u8>> = self
                .elements
                .iter()
                .map(|(offset, funcs)| {
                    let mut e = vec![0x00];
                    i32_offset(&mut e, *offset);
                    uleb(&mut e, funcs.len() as u32);
                    for f in funcs {
                        uleb(&mut e, *f);
                    }
                    e
                })
                .collect();
            section(&mut out, 9, &items);
        }
        if !self.funcs.is_empty() {
            let items: Vec<Vec<u8>> = self
                .funcs
                .iter()
                .map(|(_, locals, body)| {
                    let mut b = locals.clone();
                    b.extend_from_slice(body);
                    b.push(0x0b);
                    let mut entry = Vec::new();
                    uleb(&mut entry, b.len() as u32);
                    entry.extend_from_slice(&b);
                    entry
                })
                .collect();
            section(&mut out, 10, &items);
        }
        if !self.data.is_empty() {
            let items: Vec<Vec<u8>> = self
                .data
                .iter()
                .map(|(offset, bytes)| {
                    let mut d = vec![0x00];
                    i32_offset(&mut d, *offset);
                    uleb(&mut d, bytes.len() as u32);
                    d.extend_from_slice(bytes);
                    d
                })
                .collect();
            section(&mut out, 11, &items);
        }
        out
    }
}

/// Three unrelated "classes" with two virtual methods each, laid out the
/// way clang emits them for wasm32.
///
/// * type 0: `(i32) -> i32` (methods), type 1: `(i32) -> ()` (drivers)
/// * functions 0..6: area/perimeter of circle, square, triangle
/// * table[1..=6] = [circle.area, circle.perim, square.area, square.perim,
///   tri.area, tri.perim]
/// * vtables at 1008, 1108, 1208; static objects at 64, 68, 72
pub struct Shapes {
    pub builder: WasmBuilder,
    pub method_ty: u32,
    pub driver_ty: u32,
}

pub const CIRCLE_AREA: u32 = 0;
pub const CIRCLE_PERIM: u32 = 1;
pub const SQUARE_AREA: u32 = 2;
pub const SQUARE_PERIM: u32 = 3;
pub const TRI_AREA: u32 = 4;
pub const TRI_PERIM: u32 = 5;

pub const CIRCLE_OBJ: i32 = 64;
pub const SQUARE_OBJ: i32 = 68;

impl Shapes {
    pub fn new() -> Self {
        let mut b = WasmBuilder::new();
        let method_ty = b.ty(&[I32], &[I32]);
        let driver_ty = b.ty(&[I32], &[]);
        for k in 0..6 {
            b.func(method_ty, op::i32_const(k + 1));
        }
        b.table(8).memory(1);
        b.elem(
            1,
            &[CIRCLE_AREA, CIRCLE_PERIM, SQUARE_AREA, SQUARE_PERIM, TRI_AREA, TRI_PERIM],
        );
        // objects: first word is the vptr
        b.words(64, &[1008, 1108, 1208]);
        // vtables: offset-to-top, typeinfo, then slots
        b.words(1000, &[0, 0, 1, 2]);
        b.words(1100, &[0, 0, 3, 4]);
        b.words(1200, &[0, 0, 5, 6]);
        Self {
            builder: b,
            method_ty,
            driver_ty,
        }
    }

    /// Add a driver whose body is `body`; it is exported under `name`.
    pub fn driver(&mut self, name: &str, body: Vec<u8>) -> u32 {
        let f = self.builder.func_with_locals(self.driver_ty, 1, body);
        self.builder.export(name, f);
        f
    }
}

/// `obj->vtable[slot]` call where `obj` is computed by `obj_code`, which is
/// evaluated twice (once for `this`, once for the vptr).
pub fn virtual_call(obj_code: &[u8], slot_offset: u32, method_ty: u32) -> Vec<u8> {
    code(&[
        obj_code.to_vec(),
        obj_code.to_vec(),
        op::i32_load(0),
        op::i32_load(slot_offset),
        op::call_indirect(method_ty, 0),
        op::drop(),
    ])
}
