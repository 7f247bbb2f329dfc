//! Command-line front end: analyze one module and print its call graph.

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::info;

use wasmcg::analysis::callgraph::entry_roots;
use wasmcg::formats::wasm;
use wasmcg::{logging, AnalysisConfig, Analyzer, FuncIdx};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    /// Full report as JSON (graph, sites, vtables, diagnostics)
    Json,
    /// Graphviz DOT of the call graph
    Dot,
    /// Text statistics
    Summary,
}

/// Resolve indirect and virtual calls in a WebAssembly module.
#[derive(Parser, Debug)]
#[command(name = "wasmcg", version)]
#[command(about = "Builds a call graph with resolved indirect calls for a WebAssembly module")]
struct Args {
    /// WebAssembly file to analyze
    file: PathBuf,

    /// Output format
    #[arg(long, short = 'f', value_enum, default_value = "summary")]
    format: Format,

    /// JSON configuration file; omitted fields keep their defaults
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Keep only functions reachable from the entry points
    #[arg(long)]
    reachable: bool,

    /// Write output here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Log as JSON lines on stderr
    #[arg(long)]
    log_json: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.log_json {
        logging::init_tracing_json();
    } else {
        logging::init_tracing();
    }

    let config = match &args.config {
        Some(path) => AnalysisConfig::from_json_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AnalysisConfig::default(),
    };

    let loaded = wasm::load_file(&args.file, &config.loader)
        .with_context(|| format!("loading {}", args.file.display()))?;
    let analyzer = Analyzer::new(config);
    let mut report = analyzer
        .analyze_module(&loaded.module)
        .with_context(|| format!("analyzing {}", args.file.display()))?;
    report.sha256 = Some(wasmcg::hashing::sha256_digest(&loaded.bytes));

    if args.reachable {
        let roots: BTreeSet<FuncIdx> = entry_roots(&loaded.module);
        report.graph = report.graph.reachable_subgraph(&roots);
        info!(functions = report.graph.function_count(), "Restricted to reachable functions");
    }

    let rendered = match args.format {
        Format::Json => report.to_json()?,
        Format::Dot => report.graph.to_dot(),
        Format::Summary => format!("{}\n", report.summary()),
    };

    match &args.output {
        Some(path) => fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?,
        None => print!("{}", rendered),
    }
    Ok(())
}
