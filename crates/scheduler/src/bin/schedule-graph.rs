//! schedule-graph: schedule a JSON graph description and print the order.
//!
//! The schedule config comes from a TOML file when given, otherwise from
//! the (optionally profiled) environment.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use tracing::info;

use graphsched_core::config::load_dotenv;
use graphsched_core::{Config, NodeId, ScheduleConfig, Strategy};
use graphsched_graph::{register_memory_coherence, GraphDescription, GraphEditor};

// ── CLI ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Plain,
    Json,
}

/// Compute a legal execution order for a dataflow graph.
#[derive(Parser, Debug)]
#[command(name = "schedule-graph", version, about)]
struct Cli {
    /// JSON graph description.
    graph: PathBuf,

    /// TOML schedule config. Falls back to environment variables.
    #[arg(long, env = "GRAPHSCHED_CONFIG")]
    config: Option<PathBuf>,

    /// Override the configured strategy.
    #[arg(long, env = "GRAPHSCHED_STRATEGY")]
    strategy: Option<Strategy>,

    /// Add memory coherence control edges before scheduling.
    #[arg(long, env = "GRAPHSCHED_MEMORY_COHERENCE", default_value_t = false)]
    memory_coherence: bool,

    #[arg(long, value_enum, default_value_t = OutputFormat::Plain)]
    format: OutputFormat,
}

// ── Output ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ScheduledNode<'a> {
    index: usize,
    id: NodeId,
    name: &'a str,
}

#[derive(Serialize)]
struct ScheduleReport<'a> {
    strategy: Strategy,
    order: Vec<ScheduledNode<'a>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    load_dotenv();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ScheduleConfig::from_toml_file(path)
            .with_context(|| format!("loading schedule config {}", path.display()))?,
        None => {
            let config = Config::from_env();
            config.log_summary();
            config.schedule
        }
    };
    if let Some(strategy) = cli.strategy {
        config.strategy = strategy;
    }

    let raw = std::fs::read_to_string(&cli.graph)
        .with_context(|| format!("reading {}", cli.graph.display()))?;
    let mut graph = GraphDescription::from_json_str(&raw)
        .and_then(|d| d.build())
        .with_context(|| format!("building graph from {}", cli.graph.display()))?;
    info!("Loaded graph: {} nodes", graph.len());

    if cli.memory_coherence {
        let mut editor = GraphEditor::new(&mut graph);
        register_memory_coherence(&mut editor).context("registering memory coherence")?;
    }

    let order = graphsched_scheduler::schedule(&mut graph, config.strategy, &config)
        .with_context(|| format!("scheduling with {}", config.strategy))?;

    let nodes: Vec<ScheduledNode<'_>> = order
        .iter()
        .enumerate()
        .filter_map(|(index, &id)| {
            graph.node(id).map(|n| ScheduledNode {
                index,
                id,
                name: n.name.as_str(),
            })
        })
        .collect();

    match cli.format {
        OutputFormat::Plain => {
            for n in &nodes {
                println!("{}\t{}\t{}", n.index, n.id, n.name);
            }
        }
        OutputFormat::Json => {
            let report = ScheduleReport {
                strategy: config.strategy,
                order: nodes,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }
    Ok(())
}
