//! Configuration loading and its effect on an analysis run.

mod common;

use std::io::Write;

use common::*;
use wasmcg::{AnalysisConfig, Analyzer, Confidence, WasmCgError};

#[test]
fn json_file_overrides_selected_fields() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{ "classifier": {{ "max_depth": 4 }}, "graph": {{ "host_calls_exports": false }} }}"#
    )
    .unwrap();

    let cfg = AnalysisConfig::from_json_file(file.path()).unwrap();
    assert_eq!(cfg.classifier.max_depth, 4);
    assert_eq!(cfg.classifier.max_values, 64);
    assert!(!cfg.graph.host_calls_exports);
    assert!(cfg.graph.include_unreachable_nodes);
    assert_eq!(cfg.vtables, AnalysisConfig::default().vtables);
}

#[test]
fn invalid_values_are_rejected() {
    let err = AnalysisConfig::from_json_str(r#"{ "vtables": { "min_slots": 0 } }"#).unwrap_err();
    assert!(matches!(err, WasmCgError::InvalidInput(_)));

    let mut cfg = AnalysisConfig::default();
    cfg.classifier.max_values = 0;
    assert!(Analyzer::new(cfg).analyze_bytes(&Shapes::new().builder.build()).is_err());

    assert!(AnalysisConfig::from_json_str("{ not json").is_err());
}

#[test]
fn stricter_vtable_threshold_disables_slot_resolution() {
    let mut shapes = Shapes::new();
    let ty = shapes.method_ty;
    shapes.driver("perimeter_of", virtual_call(&op::local_get(0), 4, ty));
    let bytes = shapes.builder.build();

    let relaxed = Analyzer::default().analyze_bytes(&bytes).unwrap();
    assert_eq!(relaxed.site_confidence(Confidence::Heuristic), 1);

    let cfg = AnalysisConfig::from_json_str(r#"{ "vtables": { "min_distinct_patterns": 4 } }"#).unwrap();
    let strict = Analyzer::new(cfg).analyze_bytes(&bytes).unwrap();
    assert_eq!(strict.vtables.vtable_count(), 0);
    assert_eq!(strict.unresolved_sites().count(), 1);
    assert_eq!(strict.site_confidence(Confidence::OverApproximated), 1);
}

#[test]
fn function_budget_skips_the_rest() {
    let mut shapes = Shapes::new();
    let ty = shapes.method_ty;
    shapes.driver("late", virtual_call(&op::local_get(0), 0, ty));

    let mut cfg = AnalysisConfig::default();
    cfg.classifier.max_functions = 6;
    let report = Analyzer::new(cfg).analyze_bytes(&shapes.builder.build()).unwrap();
    assert_eq!(report.sites.len(), 1);
    assert!(report.sites[0].candidates.is_conservative());
    assert_eq!(report.sites[0].candidates.len(), 6);
    assert!(report
        .diagnostics
        .iter()
        .any(|d| matches!(d, wasmcg::Diagnostic::BudgetExceeded { func } if func.0 == 6)));
}
