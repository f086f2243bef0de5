//! # Butterfly-wayfinder CLI
//!
//! Command-line interface for the butterfly-wayfinder library.
//! Finds routes over the locally synced graph and keeps it fresh.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use butterfly_wayfinder::{
    suggest_names, Config, DeepLink, RouteMode, RouteQuery, Session, Status, SyncOutcome,
};
use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use reqwest::Url;

mod cli;

use cli::output;

/// Command-line interface for butterfly-wayfinder
#[derive(Parser)]
#[command(name = "butterfly-wayfinder")]
#[command(about = "Offline-capable route finder over a versioned graph snapshot")]
#[command(long_about = "Finds routes over a graph published behind a small manifest:
  butterfly-wayfinder route Central Harbour            # Shortest weighted route
  butterfly-wayfinder route Central Harbour --mode fewest_hops
  butterfly-wayfinder route --link 'https://host/route/?start=Central&end=Harbour'
  butterfly-wayfinder sync --force                     # Check the manifest now
  butterfly-wayfinder status                           # Show the cached graph

The last synced graph answers immediately; the manifest is checked at most
once per gate interval and the graph is downloaded only when it changed.")]
#[command(version = env!("WAYFINDER_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the stored graph and fetch cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Manifest URL, overriding the config file
    #[arg(long, global = true)]
    manifest_url: Option<String>,

    /// Route fetches through the on-disk offline cache
    #[arg(long, global = true)]
    offline_cache: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Find a route between two named nodes
    Route {
        /// Start node name
        #[arg(required_unless_present = "link")]
        start: Option<String>,

        /// End node name
        #[arg(required_unless_present = "link")]
        end: Option<String>,

        /// "shortest" or "fewest_hops"
        #[arg(long, default_value = "shortest")]
        mode: String,

        /// Take start, end and mode from a shared link
        #[arg(long, conflicts_with_all = ["start", "end"])]
        link: Option<String>,
    },

    /// Check the manifest and download a new graph if it changed
    Sync {
        /// Ignore the check interval
        #[arg(short, long)]
        force: bool,
    },

    /// Show what is stored locally
    Status,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let mut logger = env_logger::Builder::from_default_env();
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    if cli.verbose {
        eprintln!("🦋 Butterfly-wayfinder v{} starting...", env!("WAYFINDER_VERSION"));
    }

    let config = resolve_config(&cli).await?;

    match cli.command {
        Command::Route {
            start,
            end,
            mode,
            link,
        } => {
            let query = match link {
                Some(link) => link_query(&link)?,
                None => RouteQuery {
                    start_name: start.unwrap_or_default(),
                    end_name: end.unwrap_or_default(),
                    mode: RouteMode::from(mode.as_str()),
                },
            };
            run_route(&config, query, cli.verbose).await
        }
        Command::Sync { force } => run_sync(&config, force).await,
        Command::Status => run_status(&config).await,
    }
}

/// Config file first, then command-line overrides
async fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)
            .await
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(url) = &cli.manifest_url {
        config.manifest_url = url.clone();
    }
    if cli.offline_cache {
        config.offline_cache = true;
    }
    Ok(config)
}

fn link_query(link: &str) -> Result<RouteQuery> {
    let url = Url::parse(link).with_context(|| format!("Invalid link '{link}'"))?;
    match DeepLink::from_url(&url).query() {
        Some(query) => Ok(query),
        None => bail!("Link needs both 'start' and 'end' parameters"),
    }
}

async fn run_route(config: &Config, query: RouteQuery, verbose: bool) -> Result<()> {
    let mut session = Session::open(config).await?;
    info!(
        "🧭 Routing {} → {} ({})",
        query.start_name,
        query.end_name,
        query.mode.as_str()
    );

    let (route, outcome) = session.route(query.clone()).await?;
    if let SyncOutcome::Failed { reason } = &outcome {
        eprintln!("⚠️  Using cached graph; sync failed: {reason}");
    }

    println!("{}", output::route_summary(&route.result));
    if !route.result.is_empty() {
        println!("{}", route.names.join(" → "));
    } else if verbose {
        if let Some(bundle) = session.stored_bundle().await {
            let names: Vec<&str> = bundle
                .graph()
                .nodes
                .iter()
                .map(|node| node.name.as_str())
                .collect();
            for name in [&query.start_name, &query.end_name] {
                if !bundle.indexes().ids_for_name(name).is_empty() {
                    continue;
                }
                let suggestions = suggest_names(name, names.iter().copied(), 3);
                if !suggestions.is_empty() {
                    eprintln!("💡 No node named '{name}'. Did you mean: {}?", suggestions.join(", "));
                }
            }
        }
    }

    session.close().await;
    Ok(())
}

async fn run_sync(config: &Config, force: bool) -> Result<()> {
    let mut session = Session::open(config).await?;

    let progress = cli::ProgressManager::new("🌐 Checking manifest");
    let outcome = session.sync(force).await?;
    progress.finish(&output::outcome_summary(&outcome));

    session.close().await;
    if let SyncOutcome::Failed { reason } = outcome {
        bail!("Sync failed: {reason}");
    }
    Ok(())
}

async fn run_status(config: &Config) -> Result<()> {
    for line in output::status_lines(&Status::read(config).await) {
        println!("{line}");
    }
    println!("Data dir:     {}", config.data_dir.display());
    Ok(())
}
