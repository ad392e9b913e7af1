//! SheetNet CLI - connectivity queries over hierarchical schematics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use sheetnet::{
    Advisory, ConnectivityGraph, ConnectivityOptions, ItemId, ItemRef, Schematic, Severity, SheetPath,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheetnet")]
#[command(about = "Net connectivity for hierarchical schematics", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human", global = true)]
    format: OutputFormat,

    /// Connectivity options as JSON
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log pass details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a document and list its nets and buses
    Nets {
        /// Schematic document (JSON)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show the net an item belongs to
    Query {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Item id
        #[arg(long)]
        item: u32,

        /// Sheet instance path, e.g. /Power/
        #[arg(long, default_value = "/")]
        path: String,
    },

    /// List every item electrically joined to an item
    Connected {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        #[arg(long)]
        item: u32,

        #[arg(long, default_value = "/")]
        path: String,
    },

    /// Report connectivity advisories
    Check {
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Exit with error code if any warning-level advisory is raised
        #[arg(long)]
        fail_on_advisory: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output for scripts
    Json,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match &cli.command {
        Commands::Nets { file } => handle_nets(file, &cli),
        Commands::Query { file, item, path } => handle_query(file, *item, path, &cli),
        Commands::Connected { file, item, path } => handle_connected(file, *item, path, &cli),
        Commands::Check {
            file,
            fail_on_advisory,
        } => handle_check(file, *fail_on_advisory, &cli),
    };

    let exit_code = match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            1
        }
    };
    process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "sheetnet=debug" } else { "sheetnet=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve(file: &Path, cli: &Cli) -> Result<ConnectivityGraph> {
    let options = match &cli.config {
        Some(path) => ConnectivityOptions::from_json_file(path)
            .with_context(|| format!("failed to load options from {}", path.display()))?,
        None => ConnectivityOptions::default(),
    };
    let schematic = Schematic::from_json_file(file)
        .with_context(|| format!("failed to load schematic {}", file.display()))?;
    tracing::debug!("Loaded {} pages from {}", schematic.pages.len(), file.display());
    let mut graph = ConnectivityGraph::new(options)?;
    graph
        .full_recompute(&schematic)
        .with_context(|| format!("connectivity pass failed for {}", file.display()))?;
    Ok(graph)
}

fn sheet_path(graph: &ConnectivityGraph, path: &str) -> Result<SheetPath> {
    graph
        .find_path(path)
        .with_context(|| format!("no sheet instance at '{}'", path))
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn handle_nets(file: &Path, cli: &Cli) -> Result<i32> {
    let graph = resolve(file, cli)?;

    match cli.format {
        OutputFormat::Human => {
            println!("\nFile: {}", file.display());
            println!("{}", "─".repeat(60));
            for net in graph.nets() {
                if net.is_bus() {
                    println!("  {:>4}  {} [bus: {}]", net.code, net.name, net.members.join(", "));
                } else {
                    println!("  {:>4}  {} ({} items)", net.code, net.name, net.items.len());
                }
            }
            let summary = graph.summary();
            println!("\n  Summary:");
            println!("    Sheets:     {}", summary.sheet_instances);
            println!("    Nets:       {}", summary.nets);
            println!("    Buses:      {}", summary.buses);
            println!("    Advisories: {}", summary.advisories);
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "nets": graph.nets(),
            "summary": graph.summary(),
        }))?,
    }
    Ok(0)
}

fn handle_query(file: &Path, item: u32, path: &str, cli: &Cli) -> Result<i32> {
    let graph = resolve(file, cli)?;
    let path = sheet_path(&graph, path)?;
    let info = graph
        .query(ItemId(item), &path)
        .with_context(|| format!("item #{} is not drawn on {}", item, path))?;

    match cli.format {
        OutputFormat::Human => {
            let name = if info.net_name.is_empty() {
                "<no net>"
            } else {
                info.net_name.as_str()
            };
            println!("{}#{}: {} (code {})", path, item, name, info.net_code);
            if info.is_bus {
                println!("  members: {}", info.bus_members.join(", "));
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "item": item,
            "path": path.to_string(),
            "net": info,
        }))?,
    }
    Ok(0)
}

fn handle_connected(file: &Path, item: u32, path: &str, cli: &Cli) -> Result<i32> {
    let graph = resolve(file, cli)?;
    let path = sheet_path(&graph, path)?;
    let joined: Vec<ItemRef> = graph.connected_items(ItemId(item), &path).into_iter().collect();
    if joined.is_empty() {
        anyhow::bail!("item #{} is not drawn on {}", item, path);
    }

    match cli.format {
        OutputFormat::Human => {
            for r in &joined {
                println!("  {}", r);
            }
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "item": item,
            "path": path.to_string(),
            "connected": joined.iter().map(|r| r.to_string()).collect::<Vec<_>>(),
        }))?,
    }
    Ok(0)
}

fn handle_check(file: &Path, fail_on_advisory: bool, cli: &Cli) -> Result<i32> {
    let graph = resolve(file, cli)?;
    let advisories = graph.advisories();

    match cli.format {
        OutputFormat::Human => output_human(file, advisories),
        OutputFormat::Json => print_json(&serde_json::json!({
            "file": file.display().to_string(),
            "advisories": advisories,
            "summary": {
                "warnings": count(advisories, Severity::Warning),
                "info": count(advisories, Severity::Info),
            }
        }))?,
    }

    if fail_on_advisory && count(advisories, Severity::Warning) > 0 {
        return Ok(1);
    }
    Ok(0)
}

fn count(advisories: &[Advisory], severity: Severity) -> usize {
    advisories.iter().filter(|a| a.severity == severity).count()
}

fn output_human(file: &Path, advisories: &[Advisory]) {
    println!("\nFile: {}", file.display());
    println!("{}", "─".repeat(60));

    if advisories.is_empty() {
        println!("  No advisories");
        return;
    }

    for (label, severity) in [("WARNINGS", Severity::Warning), ("INFO", Severity::Info)] {
        let matching: Vec<&Advisory> = advisories.iter().filter(|a| a.severity == severity).collect();
        if matching.is_empty() {
            continue;
        }
        println!("\n  {}:", label);
        for advisory in matching {
            println!("    - {}", advisory);
        }
    }

    println!("\n  Summary:");
    println!("    Warnings: {}", count(advisories, Severity::Warning));
    println!("    Info:     {}", count(advisories, Severity::Info));
}
