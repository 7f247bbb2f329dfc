#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut cfg = wasmcg::AnalysisConfig::default();
    cfg.classifier.max_functions = 256;
    if let Ok(report) = wasmcg::Analyzer::new(cfg).analyze_bytes(data) {
        for site in &report.sites {
            assert!(!site.candidates.is_empty() || site.candidates.is_conservative());
        }
    }
});
