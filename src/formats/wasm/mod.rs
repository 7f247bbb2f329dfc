//! WebAssembly binary loader and encoder.
//!
//! `parse_module` turns a core-module binary into the arena `Module`;
//! `encode_module` writes one back. File access goes through `load_file`,
//! which enforces the configured size limit before mapping the file.

pub mod encode;
pub mod ops;
pub mod parse;

use memmap2::Mmap;
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

use crate::config::LoaderConfig;
use crate::core::module::Module;
use crate::error::{Result, WasmCgError};

pub use encode::encode_module;
pub use parse::{parse_module, parse_module_with};

/// `\0asm`
pub const WASM_MAGIC: [u8; 4] = [0x00, 0x61, 0x73, 0x6d];
/// Core module encoding version
pub const WASM_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// True when `data` starts with the module header.
pub fn is_wasm(data: &[u8]) -> bool {
    data.len() >= 8 && data[..4] == WASM_MAGIC && data[4..8] == WASM_VERSION
}

/// A loaded file: the parsed module and the bytes it came from.
pub struct LoadedFile {
    pub module: Module,
    pub bytes: Vec<u8>,
}

/// Read a file (bounded by `max_file_size`) and parse it.
pub fn load_file(path: impl AsRef<Path>, cfg: &LoaderConfig) -> Result<LoadedFile> {
    let bytes = read_bounded(path.as_ref(), cfg.max_file_size)?;
    let module = parse_module_with(&bytes, cfg)?;
    Ok(LoadedFile { module, bytes })
}

/// Read a whole file, refusing anything above `limit` bytes.
pub fn read_bounded(path: &Path, limit: u64) -> Result<Vec<u8>> {
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    debug!(path = %path.display(), size, limit, "Opening module");

    if size > limit {
        warn!(path = %path.display(), size, limit, "Module file is too large");
        return Err(WasmCgError::ResourceExhausted {
            resource: "file size".to_string(),
            used: size,
            limit,
        });
    }
    if size == 0 {
        // mmap cannot map empty files
        return Ok(Vec::new());
    }

    // Safety: read-only map of a regular file that we copy out immediately.
    let map = unsafe { Mmap::map(&file)? };
    Ok(map.to_vec())
}
