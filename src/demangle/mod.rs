//! Demangler helpers for Rust and C++ (Itanium) function names.
//!
//! Names in WebAssembly binaries come from the export and import sections.
//! clang and rustc leave them mangled; these helpers produce the display form.

use once_cell::sync::Lazy;
use regex::Regex;

/// Itanium (clang) ABI: _Z...
static RE_ITA_MANGLED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^_{1,2}Z[a-zA-Z0-9_.$]+$").expect("valid itanium mangled regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolFlavor {
    Rust,
    Itanium,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemangleResult {
    pub original: String,
    pub demangled: String,
    pub flavor: SymbolFlavor,
}

pub fn detect_flavor(s: &str) -> SymbolFlavor {
    if rustc_demangle::try_demangle(s).is_ok() {
        return SymbolFlavor::Rust;
    }
    if RE_ITA_MANGLED.is_match(s) {
        return SymbolFlavor::Itanium;
    }
    SymbolFlavor::Unknown
}

/// Attempt to demangle a single name. Returns None when not recognized.
pub fn demangle_one(s: &str) -> Option<DemangleResult> {
    if let Ok(dm) = rustc_demangle::try_demangle(s) {
        // `{:#}` drops the trailing hash of legacy symbols
        return Some(DemangleResult {
            original: s.to_string(),
            demangled: format!("{:#}", dm),
            flavor: SymbolFlavor::Rust,
        });
    }
    if RE_ITA_MANGLED.is_match(s) {
        // emscripten keeps a single leading underscore on some exports
        let candidate = s.strip_prefix("__Z").map(|rest| format!("_Z{}", rest));
        let input = candidate.as_deref().unwrap_or(s);
        if let Ok(sym) = cpp_demangle::Symbol::new(input) {
            return Some(DemangleResult {
                original: s.to_string(),
                demangled: sym.to_string(),
                flavor: SymbolFlavor::Itanium,
            });
        }
    }
    None
}

/// Display form of a name: demangled when possible, unchanged otherwise.
pub fn display_name(s: &str) -> String {
    demangle_one(s)
        .map(|r| r.demangled)
        .unwrap_or_else(|| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_flavor_simple() {
        assert_eq!(detect_flavor("_Z3foov"), SymbolFlavor::Itanium);
        assert_eq!(
            detect_flavor("_ZN3foo3bar17h05af221e174051e9E"),
            SymbolFlavor::Rust
        );
        assert_eq!(detect_flavor("main"), SymbolFlavor::Unknown);
        assert_eq!(display_name("_ZN3foo3bar17h05af221e174051e9E"), "foo::bar");
    }

    #[test]
    fn demangles_itanium() {
        assert_eq!(display_name("_Z3foov"), "foo()");
        assert_eq!(display_name("_ZN6Circle4areaEv"), "Circle::area()");
        assert_eq!(display_name("__Z3foov"), "foo()");
    }

    #[test]
    fn leaves_plain_names() {
        assert_eq!(display_name("env.abort"), "env.abort");
        assert!(demangle_one("memcpy").is_none());
    }
}
