//! The four analysis stages behind one entry point.
//!
//! `Analyzer` loads a module, builds the table layouts and memory image,
//! recovers vtables, classifies every call site and merges the result into a
//! call graph. Classification runs on the rayon pool once the module is
//! large enough; everything it reads is shared immutably.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{info, info_span, warn};

use crate::analysis::callgraph;
use crate::analysis::classify::{classify_function, classify_unwalked, ClassifiedSite, ClassifyContext};
use crate::analysis::memory::MemoryImage;
use crate::analysis::table::TableLayout;
use crate::analysis::vtable::{self, VtableRecovery};
use crate::config::AnalysisConfig;
use crate::core::call_graph::CallGraph;
use crate::core::candidates::Confidence;
use crate::core::function::Function;
use crate::core::module::Module;
use crate::error::{Diagnostic, Result, WasmCgError};
use crate::formats::wasm;
use crate::hashing::sha256_digest;

/// Everything one analysis run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// SHA-256 of the input bytes, when analyzed from bytes or a file
    pub sha256: Option<String>,
    pub graph: CallGraph,
    /// Indirect call sites with their candidate sets
    pub sites: Vec<ClassifiedSite>,
    pub vtables: VtableRecovery,
    pub diagnostics: Vec<Diagnostic>,
}

impl AnalysisReport {
    pub fn unresolved_sites(&self) -> impl Iterator<Item = &ClassifiedSite> + '_ {
        self.sites.iter().filter(|s| s.candidates.is_conservative())
    }

    /// Count of indirect sites per confidence level.
    pub fn site_confidence(&self, confidence: Confidence) -> usize {
        self.sites
            .iter()
            .filter(|s| s.candidates.confidence() == confidence)
            .count()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Short human-readable overview.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        if let Some(hash) = &self.sha256 {
            out.push_str(&format!("sha256 {}\n", hash));
        }
        out.push_str(&format!("{}\n", self.graph.statistics()));
        out.push_str(&format!(
            "indirect sites {} (certain {}, precise {}, heuristic {}, over-approximated {})\n",
            self.sites.len(),
            self.site_confidence(Confidence::Certain),
            self.site_confidence(Confidence::Precise),
            self.site_confidence(Confidence::Heuristic),
            self.site_confidence(Confidence::OverApproximated),
        ));
        out.push_str(&format!("vtables {}\n", self.vtables.vtable_count()));
        out.push_str(&format!("diagnostics {}", self.diagnostics.len()));
        out
    }
}

/// Runs the analysis stages under one configuration.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    config: AnalysisConfig,
}

impl Analyzer {
    pub fn new(config: AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn analyze_bytes(&self, bytes: &[u8]) -> Result<AnalysisReport> {
        self.config.validate()?;
        let limit = self.config.loader.max_file_size;
        if bytes.len() as u64 > limit {
            return Err(WasmCgError::ResourceExhausted {
                resource: "input size".to_string(),
                used: bytes.len() as u64,
                limit,
            });
        }
        let module = wasm::parse_module_with(bytes, &self.config.loader)?;
        let mut report = self.analyze_module(&module)?;
        report.sha256 = Some(sha256_digest(bytes));
        Ok(report)
    }

    pub fn analyze_file(&self, path: impl AsRef<Path>) -> Result<AnalysisReport> {
        self.config.validate()?;
        let loaded = wasm::load_file(path, &self.config.loader)?;
        let mut report = self.analyze_module(&loaded.module)?;
        report.sha256 = Some(sha256_digest(&loaded.bytes));
        Ok(report)
    }

    /// Analyze an already loaded module.
    pub fn analyze_module(&self, module: &Module) -> Result<AnalysisReport> {
        self.config.validate()?;
        let _span = info_span!("analyze", functions = module.function_count()).entered();
        let cfg = &self.config;

        let layouts = TableLayout::build_all(module, cfg.vtables.assume_static_tables);
        let image = if cfg.vtables.assume_static_data {
            MemoryImage::from_module(module)
        } else {
            MemoryImage::new()
        };
        let recovery = vtable::recover(module, &image, &layouts, &cfg.vtables);
        let mut diagnostics = recovery.diagnostics.clone();

        let ctx = ClassifyContext::new(module, &image, &layouts, &recovery, cfg);
        let (classified, skipped) = self.classify_all(&ctx, module);
        diagnostics.extend(skipped);

        let graph = callgraph::build_with(module, &classified, &cfg.graph);
        graph.validate_against(module)?;

        let sites: Vec<ClassifiedSite> = classified.into_iter().filter(|s| s.is_indirect()).collect();
        diagnostics.extend(sites.iter().filter_map(|s| s.diagnostic.clone()));

        info!(
            edges = graph.edge_count(),
            indirect_sites = sites.len(),
            vtables = recovery.vtable_count(),
            diagnostics = diagnostics.len(),
            "Analysis complete"
        );
        Ok(AnalysisReport {
            sha256: None,
            graph,
            sites,
            vtables: recovery,
            diagnostics,
        })
    }

    /// Classify the defined functions within the function budget. Functions
    /// past the budget get a `BudgetExceeded` diagnostic and only
    /// conservative sites.
    fn classify_all(&self, ctx: &ClassifyContext<'_>, module: &Module) -> (Vec<ClassifiedSite>, Vec<Diagnostic>) {
        let _span = info_span!("classify").entered();
        let cfg = &self.config.classifier;
        let defined: Vec<&Function> = module.functions.iter().filter(|f| f.body.is_some()).collect();
        let budget = cfg.max_functions.min(defined.len());
        let (work, over) = defined.split_at(budget);

        let skipped: Vec<Diagnostic> = over
            .iter()
            .map(|f| Diagnostic::BudgetExceeded { func: f.idx })
            .collect();
        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), limit = cfg.max_functions, "Function budget exceeded");
        }

        let per_function: Vec<Vec<ClassifiedSite>> = if module.function_count() >= cfg.parallel_threshold {
            work.par_iter().map(|f| classify_function(ctx, f)).collect()
        } else {
            work.iter().map(|f| classify_function(ctx, f)).collect()
        };
        let mut sites: Vec<ClassifiedSite> = per_function.into_iter().flatten().collect();
        sites.extend(over.iter().flat_map(|f| classify_unwalked(ctx, f)));
        (sites, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_module_report() {
        let bytes = [0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00];
        let report = Analyzer::default().analyze_bytes(&bytes).unwrap();
        assert!(report.graph.is_empty());
        assert!(report.sites.is_empty());
        assert_eq!(report.sha256.as_deref().map(str::len), Some(64));
        assert!(report.summary().contains("indirect sites 0"));
    }

    #[test]
    fn rejects_oversized_input() {
        let mut cfg = AnalysisConfig::default();
        cfg.loader.max_file_size = 4;
        let err = Analyzer::new(cfg).analyze_bytes(&[0; 8]).unwrap_err();
        assert!(matches!(err, WasmCgError::ResourceExhausted { used: 8, limit: 4, .. }));
    }

    #[test]
    fn loaded_module_is_checked_against_config() {
        let module = wasm::parse_module(&[0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00]).unwrap();
        let mut cfg = AnalysisConfig::default();
        cfg.classifier.max_values = 0;
        let err = Analyzer::new(cfg).analyze_module(&module).unwrap_err();
        assert!(matches!(err, WasmCgError::InvalidInput(msg) if msg.contains("max_values")));
    }

    #[test]
    fn malformed_input_is_fatal() {
        let err = Analyzer::default().analyze_bytes(b"\0asX\x01\0\0\0").unwrap_err();
        assert!(err.is_malformed());
    }
}
