#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(module) = wasmcg::formats::wasm::parse_module(data) {
        let _ = wasmcg::formats::wasm::encode_module(&module);
    }
});
