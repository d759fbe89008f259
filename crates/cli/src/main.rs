//! Compute Provisioner CLI
//!
//! A command-line tool for inspecting the provisioner: allowed instance
//! types, the instance catalog, pending scale-up attempts and run records.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{allowed, attempts, catalog, runs};

/// Compute Provisioner CLI
#[derive(Parser)]
#[command(name = "cpctl")]
#[command(author, version, about = "CLI for the Compute Provisioner", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via CPCTL_API_URL env var)
    #[arg(long, env = "CPCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format (defaults to the stored format, then table)
    #[arg(long, short)]
    pub format: Option<output::OutputFormat>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show instance and price types a run may request
    Allowed {
        /// Docker tool id
        #[arg(long)]
        tool: Option<String>,

        /// Region id (provisioner default if not specified)
        #[arg(long)]
        region: Option<String>,

        /// List every catalog type, ignoring allow-lists
        #[arg(long)]
        all: bool,
    },

    /// List instance offerings
    Catalog {
        /// Filter by region
        #[arg(long)]
        region: Option<String>,
    },

    /// Show scale-up attempt counters of waiting runs
    Attempts,

    /// List or register runs
    Runs {
        #[command(subcommand)]
        action: Option<RunsCommands>,

        /// Filter by status (pending, running, succeeded, failed, stopped)
        #[arg(long)]
        status: Option<String>,
    },

    /// Manage stored CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
pub enum RunsCommands {
    /// Register or update a run from a JSON file
    Register {
        /// Path to the run record JSON
        file: String,
    },
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Store the API endpoint URL
    SetUrl {
        url: String,
    },

    /// Store the default output format
    SetFormat {
        format: output::OutputFormat,
    },

    /// Print stored settings
    Show,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let stored = config::Config::load()?;

    let format = cli.format.unwrap_or_else(|| {
        stored
            .default_format
            .as_deref()
            .map(output::OutputFormat::from_name)
            .unwrap_or_default()
    });

    if let Commands::Config(config_cmd) = &cli.command {
        return match config_cmd {
            ConfigCommands::SetUrl { url } => commands::config::set_api_url(url),
            ConfigCommands::SetFormat { format } => commands::config::set_format(*format),
            ConfigCommands::Show => commands::config::show(&stored),
        };
    }

    let client = client::ApiClient::new(&stored.api_url(cli.api_url.as_deref()))?;

    match cli.command {
        Commands::Allowed { tool, region, all } => {
            allowed::show_allowed(&client, tool, region, all, format).await?;
        }
        Commands::Catalog { region } => {
            catalog::show_catalog(&client, region, format).await?;
        }
        Commands::Attempts => {
            attempts::show_attempts(&client, format).await?;
        }
        Commands::Runs { action, status } => match action {
            Some(RunsCommands::Register { file }) => {
                runs::register_run(&client, &file, format).await?;
            }
            None => runs::list_runs(&client, status, format).await?,
        },
        Commands::Config(_) => {}
    }

    Ok(())
}
