//! ShardVault operator tool
//!
//! Runs a local engine built from a config file and a topology file and
//! performs one object or placement operation against it.
//!
//! ```text
//! shardvault --topology topo.yaml place photos cat.jpg
//! shardvault --topology topo.yaml put photos cat.jpg ./cat.jpg
//! shardvault --topology topo.yaml get photos cat.jpg --output ./copy.jpg
//! shardvault --topology topo.yaml status
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use shardvault::engine::{HealthStatus, ObjectEngine, PutOptions};
use shardvault::{EngineConfig, StaticTopology, Topology, VersionSelector};

// =============================================================================
// CLI Arguments
// =============================================================================

/// ShardVault - erasure-coded object data plane
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Engine configuration (YAML); defaults apply when omitted
    #[arg(long, env = "SHARDVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Cluster topology (YAML)
    #[arg(long, env = "SHARDVAULT_TOPOLOGY")]
    topology: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show where an object is placed
    Place { bucket: String, object: String },

    /// Store a file as an object
    Put {
        bucket: String,
        object: String,
        /// File to upload
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
        #[arg(long)]
        version_id: Option<String>,
    },

    /// Fetch an object
    Get {
        bucket: String,
        object: String,
        #[arg(long)]
        version_id: Option<String>,
        /// Write the payload here instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show object attributes
    Head {
        bucket: String,
        object: String,
        #[arg(long)]
        version_id: Option<String>,
    },

    /// Show attributes, location and erasure layout
    Stat {
        bucket: String,
        object: String,
        #[arg(long)]
        version_id: Option<String>,
    },

    /// Delete an object
    Delete {
        bucket: String,
        object: String,
        #[arg(long)]
        version_id: Option<String>,
    },

    /// Show ring size and vnode share per set
    Ring,

    /// Show engine health; exits non-zero when unhealthy
    Status {
        /// Also print Prometheus metrics
        #[arg(long)]
        metrics: bool,
    },
}

// =============================================================================
// Main
// =============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args);

    let config = match &args.config {
        Some(path) => EngineConfig::from_yaml_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let topology = Topology::from_yaml_file(&args.topology)
        .with_context(|| format!("loading topology {}", args.topology.display()))?;
    let provider = Arc::new(StaticTopology::new(topology).context("invalid topology")?);

    let engine = ObjectEngine::open(&config, provider, None).context("starting engine")?;
    info!("Engine started");

    run(&engine, args.command)
}

fn run(engine: &ObjectEngine, command: Command) -> Result<()> {
    match command {
        Command::Place { bucket, object } => {
            print_json(&engine.placement().compute(&bucket, &object)?)?;
        }
        Command::Put {
            bucket,
            object,
            file,
            content_type,
            version_id,
        } => {
            let data =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let opts = PutOptions {
                content_type,
                version_id,
                ..Default::default()
            };
            print_json(&engine.put_object(&bucket, &object, &data, &opts)?)?;
        }
        Command::Get {
            bucket,
            object,
            version_id,
            output,
        } => {
            let version = VersionSelector::from_option(version_id.as_deref());
            let (info, data) = engine.get_object(&bucket, &object, &version)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &data)
                        .with_context(|| format!("writing {}", path.display()))?;
                    print_json(&info)?;
                }
                None => {
                    use std::io::Write;
                    std::io::stdout().write_all(&data)?;
                }
            }
        }
        Command::Head {
            bucket,
            object,
            version_id,
        } => {
            let version = VersionSelector::from_option(version_id.as_deref());
            print_json(&engine.head_object(&bucket, &object, &version)?)?;
        }
        Command::Stat {
            bucket,
            object,
            version_id,
        } => {
            let version = VersionSelector::from_option(version_id.as_deref());
            print_json(&engine.stat_object(&bucket, &object, &version)?)?;
        }
        Command::Delete {
            bucket,
            object,
            version_id,
        } => {
            let version = VersionSelector::from_option(version_id.as_deref());
            engine.delete_object(&bucket, &object, &version)?;
            println!("deleted {}/{} ({})", bucket, object, version);
        }
        Command::Ring => {
            let stats = engine.placement().ring_stats()?;
            println!(
                "generation {}: {} vnodes over {} sets",
                stats.generation, stats.vnodes, stats.sets
            );
            for ((pool, set), vnodes) in engine.placement().ring_distribution()? {
                let share = if stats.vnodes == 0 {
                    0.0
                } else {
                    vnodes as f64 * 100.0 / stats.vnodes as f64
                };
                println!("  pool {} set {}: {} vnodes ({:.1}%)", pool, set, vnodes, share);
            }
        }
        Command::Status { metrics } => {
            let status = engine.status();
            print_json(&status)?;
            if metrics {
                print!("{}", engine.metrics_text()?);
            }
            if status.status == HealthStatus::Unhealthy {
                anyhow::bail!("engine is unhealthy");
            }
        }
    }
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    // Logs go to stderr so `get` can stream the payload on stdout
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}
