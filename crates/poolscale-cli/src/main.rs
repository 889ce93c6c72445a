//! poolscale — watermark-driven autoscaling for machine pools.
//!
//! # Usage
//!
//! ```text
//! poolscale --profile ops.toml seed --file platform.toml
//! poolscale --profile ops.toml run desktops --catalog win11 --max-machines 20
//! poolscale --profile ops.toml run "desktops;apps"
//! poolscale --profile ops.toml watch "desktops;apps" --interval 60
//! poolscale --profile ops.toml status desktops
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod profile;

use profile::Profile;

#[derive(Parser)]
#[command(
    name = "poolscale",
    about = "Grow and shrink machine pools between load watermarks",
    version,
    propagate_version = true
)]
struct Cli {
    /// Operator profile (TOML) naming the platform and scaling defaults.
    #[arg(long, global = true)]
    profile: Option<PathBuf>,

    /// Append log events to this file as JSON lines instead of stderr.
    #[arg(long, global = true)]
    log_sink: Option<PathBuf>,

    /// Emit trivial (debug-level) events too.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one invocation over the given pools.
    ///
    /// Pool names are separated by semicolons. Configuration parameters
    /// are only accepted for a single pool; on its first invocation a pool
    /// must be given a catalog.
    Run {
        /// Pool names, semicolon separated.
        pools: String,
        #[command(flatten)]
        scale: commands::run::ScaleArgs,
    },
    /// Invoke the given pools periodically until interrupted.
    Watch {
        /// Pool names, semicolon separated.
        pools: String,
        /// Seconds between invocations.
        #[arg(long, default_value = "60")]
        interval: u64,
    },
    /// Populate the local platform from a TOML fixture.
    Seed {
        #[arg(short, long)]
        file: PathBuf,
    },
    /// Print each pool's stored record and current load as JSON.
    Status {
        /// Pool names, semicolon separated.
        pools: String,
    },
    /// Drive the simulated platform.
    Sim {
        #[command(subcommand)]
        action: SimAction,
    },
}

#[derive(Subcommand)]
enum SimAction {
    /// Set a pool member's session count and load index.
    Sessions {
        pool: String,
        machine: String,
        count: u32,
        /// Load index (0-10000); unchanged when omitted.
        #[arg(long)]
        load: Option<u32>,
    },
    /// Complete a pending VM task immediately.
    FinishTask { task_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let profile = Profile::load(cli.profile.as_deref())?;
    init_tracing(cli.debug || profile.defaults.debug, cli.log_sink.as_deref())?;

    match cli.command {
        Commands::Run { pools, scale } => commands::run::run(&profile, &pools, &scale),
        Commands::Watch { pools, interval } => {
            commands::watch::watch(&profile, &pools, interval).await
        }
        Commands::Seed { file } => commands::seed::seed(&profile, &file),
        Commands::Status { pools } => commands::status::status(&profile, &pools),
        Commands::Sim { action } => match action {
            SimAction::Sessions {
                pool,
                machine,
                count,
                load,
            } => commands::sim::sessions(&profile, &pool, &machine, count, load),
            SimAction::FinishTask { task_id } => commands::sim::finish_task(&profile, &task_id),
        },
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the level chosen here.
fn init_tracing(debug: bool, log_sink: Option<&Path>) -> anyhow::Result<()> {
    let default = if debug {
        "info,poolscale=debug,poolscale_autoscale=debug,poolscale_platform=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    match log_sink {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log sink {}", path.display()))?;
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
