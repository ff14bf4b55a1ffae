//! posture-sync - local tooling for the posture reading sync engine.

mod commands;
mod simulate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use sync_config_and_utils::{init_logging, Config, Paths};

/// posture-sync command-line interface.
#[derive(Parser)]
#[command(name = "posture-sync")]
#[command(about = "Sync engine tooling for wearable posture readings")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Base directory for config, database and logs. Defaults to ~/.posture-sync
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the offline collector to mirrored viewer scenario in memory
    Simulate {
        /// Sensor id the collector records for
        #[arg(long, default_value = "sensor001")]
        sensor: String,
        /// Number of readings recorded while offline
        #[arg(long, default_value_t = 3)]
        readings: usize,
    },
    /// Show local reading counts
    Stats {
        /// Count only rows owned by this identity
        #[arg(long)]
        owner: Option<String>,
    },
    /// Delete every local reading
    Reset,
    /// Check reachability of the configured probe target once
    Probe,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    init_logging(&cli.log_level, Some(paths.log_file()));

    let config = Config::load(&paths)?;

    match cli.command {
        Commands::Simulate { sensor, readings } => {
            let summary = simulate::run(&config, &sensor, readings).await?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Stats { owner } => commands::stats(&paths, owner.as_deref()).await?,
        Commands::Reset => commands::reset(&paths).await?,
        Commands::Probe => commands::probe(&config).await?,
    }

    Ok(())
}
