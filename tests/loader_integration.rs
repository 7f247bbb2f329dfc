//! Loader behavior on well-formed and malformed binaries.

mod common;

use std::io::Write;

use common::*;
use wasmcg::config::LoaderConfig;
use wasmcg::formats::wasm::{encode_module, load_file, parse_module};
use wasmcg::{FuncIdx, WasmCgError};

fn header() -> Vec<u8> {
    vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00]
}

#[test]
fn bad_magic_is_malformed_at_offset_zero() {
    let mut bytes = header();
    bytes[3] = 0x6e;
    match parse_module(&bytes) {
        Err(WasmCgError::MalformedBinary { offset, .. }) => assert_eq!(offset, 0),
        other => panic!("expected MalformedBinary, got {:?}", other),
    }
}

#[test]
fn truncated_section_is_malformed() {
    let bytes = Shapes::new().builder.build();
    for cut in [9, bytes.len() - 1, bytes.len() - 3] {
        let err = parse_module(&bytes[..cut]).unwrap_err();
        assert!(err.is_malformed(), "cut at {}: {}", cut, err);
    }
}

#[test]
fn out_of_order_sections_are_malformed() {
    let mut bytes = header();
    // empty function section, then an empty type section
    bytes.extend_from_slice(&[0x03, 0x01, 0x00]);
    bytes.extend_from_slice(&[0x01, 0x01, 0x00]);
    let err = parse_module(&bytes).unwrap_err();
    assert!(err.is_malformed());
    assert!(err.to_string().contains("type section after function section"), "{}", err);

    let mut dup = header();
    dup.extend_from_slice(&[0x01, 0x01, 0x00]);
    dup.extend_from_slice(&[0x01, 0x01, 0x00]);
    let err = parse_module(&dup).unwrap_err();
    assert!(err.to_string().contains("duplicate type section"), "{}", err);
}

#[test]
fn call_target_out_of_range_is_malformed() {
    let mut b = WasmBuilder::new();
    let ty = b.ty(&[], &[]);
    b.func(ty, op::call(9));
    assert!(parse_module(&b.build()).unwrap_err().is_malformed());
}

#[test]
fn names_come_from_exports_then_imports() {
    let mut b = WasmBuilder::new();
    let ty = b.ty(&[I32], &[]);
    b.import_func("env", "log", ty);
    let main = b.func(ty, code(&[op::local_get(0), op::call(0)]));
    b.func(ty, vec![]);
    b.export("main", main);
    let m = parse_module(&b.build()).unwrap();
    assert_eq!(m.functions[0].name, "env.log");
    assert_eq!(m.functions[1].name, "main");
    assert_eq!(m.functions[2].name, "func[2]");
    assert_eq!(m.imported_function_count(), 1);
}

#[test]
fn encode_round_trip_preserves_structure() {
    let mut shapes = Shapes::new();
    let ty = shapes.method_ty;
    shapes.driver("draw", virtual_call(&op::local_get(0), 0, ty));
    let bytes = shapes.builder.build();

    let original = parse_module(&bytes).unwrap();
    let encoded = encode_module(&original).unwrap();
    let reparsed = parse_module(&encoded).unwrap();

    assert_eq!(reparsed.function_count(), original.function_count());
    for (a, b) in original.functions.iter().zip(&reparsed.functions) {
        assert_eq!(a.ty, b.ty);
        assert_eq!(a.exports, b.exports);
        assert_eq!(a.import, b.import);
    }
    assert_eq!(reparsed.types, original.types);
    assert_eq!(reparsed.tables, original.tables);
    assert_eq!(reparsed.elements, original.elements);
    assert_eq!(reparsed.data, original.data);
    assert_eq!(reparsed.exports, original.exports);
}

#[test]
fn load_file_respects_size_limit() {
    let mut b = WasmBuilder::new();
    let ty = b.ty(&[], &[]);
    b.func(ty, vec![]);
    let bytes = b.build();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();

    let loaded = load_file(file.path(), &LoaderConfig::default()).unwrap();
    assert_eq!(loaded.bytes, bytes);
    assert!(loaded.module.function(FuncIdx(0)).is_some());

    let tight = LoaderConfig {
        max_file_size: 4,
        ..LoaderConfig::default()
    };
    assert!(matches!(
        load_file(file.path(), &tight),
        Err(WasmCgError::ResourceExhausted { .. })
    ));
}
