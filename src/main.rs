//! abstract_forest CLI - main entry point
//!
//! Builds the Abstract forest and entity index, answers queries with
//! hierarchical context, and inspects saved snapshots.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use abstract_forest::commands::{self, BuildArgs, OutputFormat, QueryArgs};
use abstract_forest::{metrics, ForestConfig, RetrievalMode};

#[derive(Parser)]
#[command(name = "abstract_forest")]
#[command(about = "Entity-indexed hierarchical retrieval over Abstract forests", long_about = None)]
#[command(version)]
struct Cli {
    /// Address to expose Prometheus metrics (e.g., 0.0.0.0:9898)
    #[arg(long, env = "METRICS_ADDR")]
    metrics_addr: Option<String>,

    /// Config file (defaults to forest.yml, then ../forest.yml)
    #[arg(long, env = "FOREST_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    Baseline,
    Entity,
}

impl From<Mode> for RetrievalMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Baseline => RetrievalMode::Baseline,
            Mode::Entity => RetrievalMode::EntityIndexed,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Build the forest and entity index, then save a snapshot
    Build {
        /// JSONL chunk file or directory of .txt documents
        #[arg(long)]
        chunks: PathBuf,

        /// Entity vocabulary (.txt, one per line, or .csv)
        #[arg(long)]
        entities: PathBuf,

        /// Snapshot output path
        #[arg(long, default_value = "forest.json")]
        snapshot: PathBuf,

        /// Corpus version recorded in the snapshot (defaults to a content hash)
        #[arg(long)]
        corpus_version: Option<String>,

        /// Skip LLM summaries and hierarchy requests
        #[arg(long, default_value_t = false)]
        offline: bool,
    },

    /// Retrieve context for a question and print the assembled prompt
    Query {
        /// JSONL chunk file or directory of .txt documents
        #[arg(long)]
        chunks: PathBuf,

        /// Entity vocabulary (.txt or .csv)
        #[arg(long)]
        entities: PathBuf,

        /// Snapshot path (rebuilt when missing or stale)
        #[arg(long, default_value = "forest.json")]
        snapshot: PathBuf,

        /// Question text
        #[arg(short, long)]
        query: String,

        /// Parent hops to include (1 or 2)
        #[arg(long)]
        depth: Option<usize>,

        /// Addresses kept per entity
        #[arg(short, long)]
        k: Option<usize>,

        /// Retrieval mode
        #[arg(long, value_enum, default_value = "entity")]
        mode: Mode,

        /// Expected corpus version of the snapshot
        #[arg(long)]
        corpus_version: Option<String>,

        /// Send the prompt to the chat model and print its answer
        #[arg(long, default_value_t = false)]
        answer: bool,
    },

    /// Show tree structure of a saved snapshot
    Inspect {
        /// Snapshot path
        #[arg(long, default_value = "forest.json")]
        snapshot: PathBuf,

        /// Show details for one Abstract
        #[arg(long)]
        pair_id: Option<u64>,

        /// Output format: text | json | yaml
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Commands::Build { .. } => "build",
            Commands::Query { .. } => "query",
            Commands::Inspect { .. } => "inspect",
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env for local development
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("abstract_forest=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    if let Some(addr) = cli.metrics_addr.as_deref() {
        match addr.parse::<SocketAddr>() {
            Ok(socket) => metrics::spawn_metrics_server(socket),
            Err(err) => warn!(%addr, "Invalid metrics address: {}", err),
        }
    }

    let config = match &cli.config {
        Some(path) => ForestConfig::load_from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ForestConfig::new(),
    };

    let command_name = cli.command.name();
    metrics::record_command_start(command_name);
    let start = Instant::now();

    let result = execute_command(cli.command, &config).await;

    metrics::record_command_result(command_name, start.elapsed(), result.is_ok());

    result
}

async fn execute_command(command: Commands, config: &ForestConfig) -> anyhow::Result<()> {
    match command {
        Commands::Build {
            chunks,
            entities,
            snapshot,
            corpus_version,
            offline,
        } => {
            let args = BuildArgs {
                chunks,
                entities,
                snapshot,
                corpus_version,
                offline,
            };
            let report = commands::build_run(&args, config).await?;
            println!(
                "Built snapshot {} -> {}",
                report.build_id,
                report.snapshot.display()
            );
            println!(
                "  trees: {} ({} oracle, {} fallback), Abstracts: {}, max depth: {}",
                report.stats.trees,
                report.stats.oracle_trees,
                report.stats.fallback_trees,
                report.stats.nodes,
                report.stats.max_depth
            );
            println!(
                "  entities: {} loaded, {} mapped to Abstracts",
                report.entities, report.mapped_entities
            );
        }
        Commands::Query {
            chunks,
            entities,
            snapshot,
            query,
            depth,
            k,
            mode,
            corpus_version,
            answer,
        } => {
            let args = QueryArgs {
                chunks,
                entities,
                snapshot,
                query,
                depth,
                k,
                mode: mode.into(),
                corpus_version,
                answer,
            };
            let outcome = commands::query_run(&args, config).await?;
            println!(
                "Mode: {} | entities: {}",
                outcome.session.mode(),
                if outcome.entities.is_empty() {
                    "-".to_string()
                } else {
                    outcome.entities.join(", ")
                }
            );
            println!("\n{}", outcome.prompt.render());
            if let Some(answer) = outcome.answer {
                println!("\n=== Answer ===\n{}", answer);
            }
        }
        Commands::Inspect {
            snapshot,
            pair_id,
            format,
        } => {
            let format = OutputFormat::parse(&format)?;
            print!("{}", commands::inspect_run(&snapshot, pair_id, format)?);
        }
    }

    Ok(())
}
