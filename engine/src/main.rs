//! procmon command line interface
//!
//! Operational entry points for the statistics the engine accumulates:
//! inspect the live overview, sweep dead processes, enforce retention,
//! or reset everything.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use procmon_engine::{
    config::EngineConfig,
    engine::StatsEngine,
    platform::ProcProbe,
    store::JsonFileStore,
};

/// procmon statistics engine command line interface
#[derive(Parser)]
#[command(name = "procmon")]
#[command(about = "Per-process and per-site runtime statistics")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand)]
enum Commands {
    /// Print the statistics overview for every site
    Status {
        /// Emit JSON instead of a text summary
        #[arg(long)]
        json: bool,
    },

    /// Probe tracked processes and mark the dead ones
    Cleanup {
        /// Only sweep this site
        #[arg(long)]
        site: Option<String>,

        /// Also delete the records of dead processes
        #[arg(long)]
        delete_dead: bool,
    },

    /// Enforce the retention cap on process records
    Evict {
        /// Override the configured cap
        #[arg(long)]
        max: Option<usize>,
    },

    /// Delete accumulated statistics
    Reset {
        /// Only reset this site
        #[arg(long)]
        site: Option<String>,
    },

    /// Validate and show the effective configuration
    Config,
}

fn main() {
    let cli = Cli::parse();

    init_logging(&cli);

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.clone()));

    if cli.json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };

    let store = Arc::new(
        JsonFileStore::new(&config.storage.base_path).with_context(|| {
            format!(
                "opening statistics store at {}",
                config.storage.base_path.display()
            )
        })?,
    );
    let engine = StatsEngine::new(
        config.clone(),
        store,
        Arc::new(ProcProbe),
        process::id(),
        Utc::now(),
    );

    match cli.command {
        Commands::Status { json } => status(&engine, json),
        Commands::Cleanup { site, delete_dead } => cleanup(&engine, site.as_deref(), delete_dead),
        Commands::Evict { max } => {
            let cap = max.unwrap_or(config.retention.max_process_records);
            let evicted = engine.registry().evict_over_capacity(cap)?;
            println!("Evicted {evicted} process record(s) (cap {cap})");
            Ok(())
        }
        Commands::Reset { site } => {
            let removed = engine.registry().reset(site.as_deref())?;
            println!("Removed {removed} process record(s)");
            Ok(())
        }
        Commands::Config => {
            config.validate()?;
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn status(engine: &StatsEngine, json: bool) -> anyhow::Result<()> {
    let overview = engine.overview()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&overview)?);
        return Ok(());
    }

    println!("procmon overview ({} site(s))", overview.sites.len());
    if let Some(memory) = &overview.host_memory {
        println!(
            "host memory: {} MiB used / {} MiB total, swap used {} MiB",
            memory.used_bytes() / (1024 * 1024),
            memory.total_bytes / (1024 * 1024),
            memory.swap_used_bytes() / (1024 * 1024),
        );
    }

    for site in &overview.sites {
        println!();
        println!("site {}", site.site_id);
        println!(
            "  processes: {} living / {} tracked, {} spawned, avg {:.1}, max {:.0}",
            site.living_count,
            site.record_count,
            site.process_spawn,
            site.process_count_avg,
            site.process_count_max,
        );
        println!(
            "  requests: {} total, {} exception(s)",
            site.request_count, site.exception_count
        );
        if let Some(response_time) = &site.response_time {
            println!(
                "  response time: min {:.1} ms / avg {:.1} ms / max {:.1} ms, sum {:.1} s",
                response_time.min() * 1000.0,
                response_time.average() * 1000.0,
                response_time.max() * 1000.0,
                response_time.sum(),
            );
        }
        if let Some(memory) = &site.memory {
            println!(
                "  memory (VmRSS): avg {:.1} MiB / max {:.1} MiB",
                memory.average() / (1024.0 * 1024.0),
                memory.max() / (1024.0 * 1024.0),
            );
        }
        println!(
            "  cpu: user {:.2} s, system {:.2} s{}",
            site.user_cpu_total,
            site.system_cpu_total,
            site.cpu_load_percent
                .map(|load| format!(", load {load:.1}%"))
                .unwrap_or_default(),
        );
    }

    Ok(())
}

fn cleanup(engine: &StatsEngine, site: Option<&str>, delete_dead: bool) -> anyhow::Result<()> {
    let (living, dead) = engine.registry().classify_liveness(site)?;
    info!(living = living.len(), dead = dead.len(), "liveness sweep complete");
    println!("{} living, {} dead", living.len(), dead.len());

    if delete_dead {
        for pid in &dead {
            if let Some(record) = engine.registry().get(*pid)? {
                if record.liveness.is_dead() {
                    engine.registry().delete(*pid)?;
                }
            }
        }
        println!("Deleted {} dead record(s)", dead.len());
    }

    Ok(())
}
