//! jnkn CLI — thin clap shell over the `jnkn-core` library.
//!
//! Exit codes: 0 success, 1 blocked policy, 2 invalid input.

mod init;
mod output;

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

use jnkn_core::analysis::changed_files_between;
use jnkn_core::{
    BlastRadiusAnalyzer, CheckEngine, CheckResult, ConfidenceCalculator, DependencyResolver,
    ManifestError, ParserEngine, ProjectConfig, SqliteStore, StitchConfig, Stitcher,
    SuppressionEntry, SuppressionStore, WatchService,
};

/// Cross-domain dependency graph: scan, stitch, and analyze impact.
#[derive(Parser)]
#[command(name = "jnkn", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize jnkn in the current directory
    Init {
        /// Scaffold an example project in ./jnkn-demo
        #[arg(long)]
        demo: bool,

        /// Overwrite existing configuration
        #[arg(long)]
        force: bool,
    },
    /// Full parse and stitch of the working tree
    Scan {
        /// discovery (report everything) or enforcement (flag orphans)
        #[arg(long, default_value = "discovery")]
        mode: String,

        /// Emit the machine-readable envelope
        #[arg(long)]
        json: bool,
    },
    /// Watch the tree and update the graph incrementally
    Watch {
        /// Directory to watch (default: current directory)
        dir: Option<PathBuf>,
    },
    /// Gate a change: blast radius of files changed between two git refs
    Check {
        /// Base and head refs
        #[arg(long = "git-diff", num_args = 2, value_names = ["BASE", "HEAD"], required = true)]
        git_diff: Vec<String>,

        /// Exit non-zero when the change reaches critical artifacts
        #[arg(long)]
        fail_if_critical: bool,

        /// Emit the machine-readable envelope
        #[arg(long)]
        json: bool,
    },
    /// Print the blast radius of one artifact
    BlastRadius {
        /// Node id, e.g. env:PAYMENT_DB_HOST
        id: String,

        /// Emit the machine-readable envelope
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("jnkn=info".parse().unwrap()),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let root = match std::env::current_dir() {
        Ok(dir) => dir,
        Err(e) => {
            eprintln!("Could not determine current directory: {e}");
            std::process::exit(2);
        }
    };

    let code = match cli.command {
        Commands::Init { demo, force } => init::run_init(&root, demo, force),
        Commands::Scan { mode, json } => run_scan(&root, &mode, json),
        Commands::Watch { dir } => run_watch(dir.unwrap_or(root)),
        Commands::Check { git_diff, fail_if_critical, json } => {
            run_check(&root, &git_diff[0], &git_diff[1], fail_if_critical, json)
        }
        Commands::BlastRadius { id, json } => run_blast_radius(&root, &id, json),
    };
    std::process::exit(code);
}

// ---------------------------------------------------------------------------
// Shared setup
// ---------------------------------------------------------------------------

/// Project config, or compiled-in defaults when the project was never
/// initialized (scanning an uninitialized tree is fine in discovery mode).
fn load_config(root: &Path) -> ProjectConfig {
    let name = root.file_name().and_then(|n| n.to_str()).unwrap_or("project");
    ProjectConfig::load(&ProjectConfig::path_for(root))
        .unwrap_or_else(|_| ProjectConfig::new(name))
}

/// Suppressions from `.jnkn/suppressions.yaml` plus the inline patterns in
/// config.yaml.
fn load_suppressions(root: &Path, config: &ProjectConfig) -> SuppressionStore {
    let mut store =
        SuppressionStore::load(&SuppressionStore::path_for(root)).unwrap_or_default();
    for pattern in &config.suppressions {
        if let Some(entry) = SuppressionEntry::parse(pattern) {
            store.add(entry);
        } else {
            eprintln!("Ignoring malformed suppression pattern: {pattern}");
        }
    }
    store
}

/// Resolve manifest dependency roots; exit-worthy errors come back as a
/// message + code so each command frames them consistently.
fn resolve_dep_roots(root: &Path) -> Result<Vec<PathBuf>, (String, i32)> {
    match DependencyResolver::new(root).resolve() {
        Ok(deps) => Ok(deps.into_iter().map(|d| d.path).collect()),
        Err(e @ ManifestError::GitNotImplemented(_)) => {
            Err((format!("{e}. Declare a local path override under [tool.jnkn.sources]."), 2))
        }
        Err(e) => Err((e.to_string(), 2)),
    }
}

fn run_full_scan(
    root: &Path,
    config: &ProjectConfig,
    store: &SqliteStore,
    suppressions: &SuppressionStore,
) -> Result<(jnkn_core::ScanSummary, usize), (String, i32)> {
    let scan_config = config.to_scan_config(root);
    let dep_roots = resolve_dep_roots(root)?;
    let engine = ParserEngine::new(scan_config.clone());

    let summary = engine
        .scan_and_store_with_deps(store, &dep_roots)
        .map_err(|e| (e.to_string(), 1))?;

    let graph = store.load_graph().map_err(|e| (e.to_string(), 1))?;
    let stitcher =
        Stitcher::with_config(StitchConfig { min_confidence: scan_config.min_confidence });
    let stitched = stitcher.stitch(&graph, suppressions);
    if !stitched.is_empty() {
        store.upsert_edges(&stitched).map_err(|e| (e.to_string(), 1))?;
    }
    Ok((summary, stitched.len()))
}

// ---------------------------------------------------------------------------
// scan
// ---------------------------------------------------------------------------

fn run_scan(root: &Path, mode: &str, json: bool) -> i32 {
    if !matches!(mode, "discovery" | "enforcement") {
        eprintln!("Unknown scan mode '{mode}' (expected discovery or enforcement)");
        return 2;
    }

    let config = load_config(root);
    let suppressions = load_suppressions(root, &config);
    let store = match SqliteStore::open(jnkn_core::db_path(root)) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Could not open graph database: {e}");
            return 1;
        }
    };

    let (summary, stitched) = match run_full_scan(root, &config, &store, &suppressions) {
        Ok(result) => result,
        Err((message, code)) => {
            if json {
                output::print_json(&output::error_envelope("scan", "scan", &message));
            } else {
                eprintln!("{message}");
            }
            return code;
        }
    };

    let graph = match store.load_graph() {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Could not reload graph: {e}");
            return 1;
        }
    };
    let orphans: Vec<String> = graph.orphans().iter().map(|n| n.id.clone()).collect();
    let stats = graph.stats();

    if json {
        let mut data = json!({
            "mode": mode,
            "files": {
                "parsed": summary.files_parsed,
                "skipped": summary.files_skipped,
                "failed": summary.files_failed,
                "deleted": summary.files_deleted,
            },
            "nodes_found": stats.nodes,
            "edges_found": stats.edges,
            "stitched": stitched,
        });
        if mode == "enforcement" {
            data["orphans"] = json!(orphans);
        }
        output::print_json(&output::envelope("scan", data));
        return 0;
    }

    let mode_label = if mode == "enforcement" { "Enforcement" } else { "Discovery" };
    println!("Mode: {mode_label}");
    println!(
        "Parsed {} file(s) ({} unchanged, {} failed, {} removed)",
        summary.files_parsed, summary.files_skipped, summary.files_failed, summary.files_deleted
    );
    println!("Graph: {} nodes, {} edges", stats.nodes, stats.edges);
    println!("Cross-domain connections: {stitched} stitched this run");
    if mode == "enforcement" && !orphans.is_empty() {
        println!();
        println!("Orphaned consumers (no provider):");
        for id in &orphans {
            println!("  {id}");
        }
    }
    0
}

// ---------------------------------------------------------------------------
// watch
// ---------------------------------------------------------------------------

fn run_watch(root: PathBuf) -> i32 {
    let config = load_config(&root);
    let suppressions = load_suppressions(&root, &config);
    let store = match SqliteStore::open(jnkn_core::db_path(&root)) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Could not open graph database: {e}");
            return 1;
        }
    };

    let scan_config = config.to_scan_config(&root);
    let stitcher =
        Stitcher::with_config(StitchConfig { min_confidence: scan_config.min_confidence });
    let service = WatchService::new(scan_config, store, stitcher, suppressions);

    info!(root = %root.display(), "jnkn is watching for changes (Ctrl+C to stop)");
    match service.run() {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Watcher failed: {e}");
            1
        }
    }
}

// ---------------------------------------------------------------------------
// check
// ---------------------------------------------------------------------------

fn run_check(root: &Path, base: &str, head: &str, fail_if_critical: bool, json: bool) -> i32 {
    let changed = match changed_files_between(root, base, head) {
        Ok(changed) => changed,
        Err(e) => {
            let message = format!("Could not diff {base}..{head}: {e}");
            if json {
                output::print_json(&output::error_envelope("check", "git", &message));
            } else {
                eprintln!("{message}");
            }
            return 2;
        }
    };

    let config = load_config(root);
    let suppressions = load_suppressions(root, &config);
    let db = jnkn_core::db_path(root);
    let store = match SqliteStore::open(&db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Could not open graph database: {e}");
            return 1;
        }
    };

    // No graph yet: build one so check works in a fresh CI checkout.
    let empty = store.node_count().unwrap_or(0) == 0;
    if empty {
        info!("No graph found; scanning before analysis");
        if let Err((message, code)) = run_full_scan(root, &config, &store, &suppressions) {
            eprintln!("{message}");
            return code;
        }
    }

    let graph = match store.load_graph() {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Could not load graph: {e}");
            return 1;
        }
    };

    let report = CheckEngine::new(&graph)
        .with_suppressions(&suppressions)
        .analyze(&changed, fail_if_critical);

    if json {
        output::print_json(&output::envelope(
            "check",
            json!({
                "result": report.result.as_str(),
                "changed_files": report.changed_files,
                "critical_count": report.critical_count,
                "high_count": report.high_count,
                "impacted_count": report.impacted_count,
                "violations": report.violations,
            }),
        ));
    } else {
        println!("Analysis Complete");
        println!("Changed files: {}", report.changed_files.len());
        println!("Impacted artifacts: {}", report.impacted_count);
        println!("Result: {}", report.result.as_str());
        for violation in &report.violations {
            println!("  [{}] {} ({})", violation.severity, violation.message, violation.rule);
        }
    }

    match report.result {
        CheckResult::Pass => 0,
        CheckResult::Blocked => 1,
    }
}

// ---------------------------------------------------------------------------
// blast-radius
// ---------------------------------------------------------------------------

fn run_blast_radius(root: &Path, id: &str, json: bool) -> i32 {
    let db = jnkn_core::db_path(root);
    if !db.exists() {
        let message = "No graph database found. Run `jnkn scan` first.";
        if json {
            output::print_json(&output::error_envelope("blast-radius", "config", message));
        } else {
            eprintln!("{message}");
        }
        return 2;
    }

    let config = load_config(root);
    let suppressions = load_suppressions(root, &config);
    let store = match SqliteStore::open(&db) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Could not open graph database: {e}");
            return 1;
        }
    };
    let graph = match store.load_graph() {
        Ok(graph) => graph,
        Err(e) => {
            eprintln!("Could not load graph: {e}");
            return 1;
        }
    };

    let report = BlastRadiusAnalyzer::new(&graph)
        .with_suppressions(&suppressions)
        .calculate(&[id.to_string()]);

    if json {
        output::print_json(&output::envelope(
            "blast-radius",
            serde_json::to_value(&report).unwrap_or_default(),
        ));
        return 0;
    }

    println!("Blast radius: {id}");
    println!("Impacted artifacts: {}", report.count);
    for (bucket, ids) in &report.breakdown {
        if ids.is_empty() {
            continue;
        }
        println!("  {bucket} ({}):", ids.len());
        for impacted in ids {
            let level = graph
                .in_edges(impacted)
                .iter()
                .map(|e| e.confidence)
                .fold(f64::NAN, f64::min);
            if level.is_nan() {
                println!("    {impacted}");
            } else {
                println!("    {impacted} [{}]", ConfidenceCalculator::level(level));
            }
        }
    }
    0
}
