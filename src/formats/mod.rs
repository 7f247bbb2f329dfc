//! Binary format loaders.

pub mod wasm;
