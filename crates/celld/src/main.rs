//! celld — the cellgrid daemon.
//!
//! Single binary that runs one cell's share of the hierarchy:
//! - State store (redb), seeded with the configured topology
//! - Cells scheduler (one-shot `schedule` command)
//! - Consistency healer (long-running `heal` command)
//!
//! # Usage
//!
//! ```text
//! celld heal --config cellgrid.toml --data-dir /var/lib/cellgrid
//! celld schedule --config cellgrid.toml --request request.json
//! celld print-config
//! ```

mod bootstrap;
mod heal_mode;
mod schedule_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use cellgrid_core::CellgridConfig;

#[derive(Parser)]
#[command(name = "celld", about = "cellgrid daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the consistency healer until interrupted.
    Heal {
        /// Path to cellgrid.toml; defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Data directory for persistent state.
        #[arg(long, default_value = "/var/lib/cellgrid")]
        data_dir: PathBuf,

        /// Log in JSON instead of plain text.
        #[arg(long)]
        json_logs: bool,
    },
    /// Schedule one run-instance request and exit.
    Schedule {
        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long, default_value = "/var/lib/cellgrid")]
        data_dir: PathBuf,

        /// JSON file holding the run-instance request.
        #[arg(long)]
        request: PathBuf,

        #[arg(long, default_value = "admin")]
        user: String,

        #[arg(long, default_value = "admin")]
        project: String,

        /// Caller roles, comma separated.
        #[arg(long, value_delimiter = ',')]
        roles: Vec<String>,

        #[arg(long)]
        json_logs: bool,
    },
    /// Print the effective configuration as TOML.
    PrintConfig {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Heal {
            config,
            data_dir,
            json_logs,
        } => {
            init_tracing(json_logs)?;
            let config = load_config(config.as_deref())?;
            heal_mode::run_heal(config, data_dir).await
        }
        Command::Schedule {
            config,
            data_dir,
            request,
            user,
            project,
            roles,
            json_logs,
        } => {
            init_tracing(json_logs)?;
            let config = load_config(config.as_deref())?;
            let args = schedule_mode::ScheduleArgs {
                request,
                user,
                project,
                roles,
            };
            schedule_mode::run_schedule(config, data_dir, args).await
        }
        Command::PrintConfig { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => "info,celld=debug,cellgrid=debug".parse()?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> anyhow::Result<CellgridConfig> {
    match path {
        Some(path) => Ok(CellgridConfig::from_file(path)?),
        None => Ok(CellgridConfig::default()),
    }
}
