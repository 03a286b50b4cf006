//! topograph CLI: topological relationship inference for building models.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use topograph::config::EngineConfig;
use topograph::element::ElementSet;
use topograph::engine::Engine;
use topograph::import::ImportReport;
use topograph::pathfind::KindFilter;
use topograph::store::{CypherScript, DurableGraphStore, GraphBackend, MemoryGraphStore};

#[derive(Parser)]
#[command(name = "topograph", version, about = "Topological relationship inference for building models")]
struct Cli {
    /// TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Worker threads (0 = one per core).
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze an element set and print or export the relationships.
    Analyze {
        /// Element set as JSON.
        #[arg(long)]
        input: PathBuf,

        /// Write the full analysis as JSON here.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Geometric tolerance for relationship predicates.
        #[arg(long)]
        tolerance: Option<f64>,
    },

    /// Analyze an element set and import it into a graph store.
    Import {
        /// Element set as JSON.
        #[arg(long)]
        input: PathBuf,

        /// Directory of the embedded graph store.
        #[arg(long, conflicts_with = "cypher")]
        store: Option<PathBuf>,

        /// Write the Cypher statements here (one JSON object per line)
        /// instead of importing.
        #[arg(long)]
        cypher: Option<PathBuf>,

        /// Rows per write batch.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Delete inferred relationships before importing.
        #[arg(long)]
        clear_inferred: bool,
    },

    /// Find the shortest path between two elements.
    Path {
        /// Element set as JSON.
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Relationship kinds to follow (comma-separated, default all).
        #[arg(long, value_delimiter = ',')]
        kinds: Vec<String>,

        #[arg(long)]
        max_depth: Option<usize>,
    },

    /// Inspect or create configuration files.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write the default configuration to a file.
    Init {
        #[arg(long, default_value = "topograph.toml")]
        path: PathBuf,
    },
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if let Some(workers) = cli.workers {
        config.executor.workers = workers;
    }
    Ok(config)
}

fn load_elements(path: &Path) -> Result<ElementSet> {
    let elements = ElementSet::from_json_file(path)?;
    tracing::info!(path = %path.display(), elements = elements.len(), "element set loaded");
    Ok(elements)
}

fn analyze_and_import<B: GraphBackend>(
    config: EngineConfig,
    backend: B,
    elements: &ElementSet,
) -> Result<ImportReport> {
    let engine = Engine::new(config, backend)?;
    let run = engine.begin_run();
    let analysis = engine.analyze_topology(&run, elements)?;
    Ok(engine.import_analysis(&run, elements, &analysis)?)
}

fn print_report(report: &ImportReport) {
    println!("nodes written:         {}", report.nodes_written);
    println!("relationships written: {}", report.relationships_written);
    println!("nodes created:         {}", report.nodes_created);
    println!("relationships created: {}", report.relationships_created);
    println!(
        "batches:               {} ok, {} failed",
        report.successful_batches, report.failed_batches
    );
    for failure in &report.failures {
        println!(
            "  {} batch {} ({} rows): {}",
            failure.phase, failure.batch_index, failure.rows, failure.message
        );
    }
    println!(
        "link cache:            {} hits, {} misses ({:.1}%)",
        report.cache.hits,
        report.cache.misses,
        report.cache.hit_ratio() * 100.0
    );
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok(); // Ignore error if hook already set (e.g., in tests)

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config(&cli)?;

    match cli.command {
        Commands::Analyze {
            input,
            output,
            tolerance,
        } => {
            if let Some(tolerance) = tolerance {
                config.extraction.tolerance = tolerance;
            }
            let elements = load_elements(&input)?;
            let engine = Engine::new(config, MemoryGraphStore::new())?;
            let run = engine.begin_run();
            let analysis = engine.analyze_topology(&run, &elements)?;

            let summary = analysis.graph.summary();
            println!(
                "resolved:      {} of {} ({:.1}%)",
                analysis.resolution.resolved,
                analysis.resolution.resolved + analysis.resolution.unresolved,
                analysis.resolution.coverage() * 100.0
            );
            for (name, map) in [
                ("adjacency", &analysis.adjacency),
                ("containment", &analysis.containment),
                ("boundary", &analysis.boundary),
            ] {
                println!(
                    "{name:<14} {} records, {} pairs tested, {} indeterminate{}",
                    map.map.len(),
                    map.stats.pairs_tested,
                    map.stats.indeterminate,
                    if map.stats.fallback { " (declared fallback)" } else { "" }
                );
            }
            println!(
                "graph:         {} nodes, {} edges, {} components",
                summary.nodes, summary.edges, summary.components
            );
            if let Some(path) = output {
                analysis.export().write_json(&path)?;
                println!("analysis written to {}", path.display());
            }
        }

        Commands::Import {
            input,
            store,
            cypher,
            batch_size,
            clear_inferred,
        } => {
            if let Some(batch_size) = batch_size {
                config.import.batch_size = batch_size;
            }
            config.import.clear_inferred |= clear_inferred;
            let elements = load_elements(&input)?;

            if let Some(path) = cypher {
                let script = CypherScript::new();
                let report = analyze_and_import(config, script.clone(), &elements)?;
                let lines = script.to_json_lines()?;
                std::fs::write(&path, lines).into_diagnostic()?;
                print_report(&report);
                println!("{} statements written to {}", script.len(), path.display());
            } else {
                let dir = store.unwrap_or_else(|| PathBuf::from(".topograph"));
                let backend = DurableGraphStore::open(&dir)?;
                let report = analyze_and_import(config, backend.clone(), &elements)?;
                print_report(&report);
                println!(
                    "store {}: {} nodes, {} relationships",
                    dir.display(),
                    backend.node_count()?,
                    backend.relationship_count()?
                );
            }
        }

        Commands::Path {
            input,
            from,
            to,
            kinds,
            max_depth,
        } => {
            let filter = KindFilter::from_names(kinds.as_slice()).map_err(|e| miette::miette!("{e}"))?;
            let elements = load_elements(&input)?;
            let engine = Engine::new(config, MemoryGraphStore::new())?;
            let run = engine.begin_run();
            engine.analyze_topology(&run, &elements)?;

            let path = engine.find_path(&from, &to, Some(&filter), max_depth);
            if path.is_empty() {
                println!("no path from {from} to {to}");
            } else {
                for step in &path.steps {
                    match step.via {
                        Some(kind) => println!("{} ({}) -[{}]->", step.id, step.type_tag, kind),
                        None => println!("{} ({})", step.id, step.type_tag),
                    }
                }
                println!("{} hops", path.hops());
            }
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => {
                print!("{}", config.to_toml()?);
            }
            ConfigAction::Init { path } => {
                EngineConfig::default().save(&path)?;
                println!("default configuration written to {}", path.display());
            }
        },
    }

    Ok(())
}
