//! Command line interface.
//!
//! Parses arguments, loads settings and dispatches to the command modules.

mod analyze;
mod cache;
mod helpers;
mod map;
mod migrate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings, LoadOptions};

#[derive(Parser)]
#[command(name = "cmsport")]
#[command(about = "Migrate a legacy content database into a headless CMS")]
#[command(version)]
pub struct Cli {
    /// Settings file (overrides discovery of a cmsport settings file)
    #[arg(long, short = 's', global = true, env = "CMSPORT_SETTINGS")]
    settings: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate legacy records into the target CMS
    Migrate(migrate::MigrateArgs),

    /// Describe the source schema
    Analyze {
        /// Only these tables
        #[arg(long, value_delimiter = ',')]
        tables: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Generate field mappings from the source schema and save them
    Map {
        /// Where to write the mapping file
        #[arg(short, long, default_value = "cmsport-mappings.json")]
        output: PathBuf,
        /// Accept every proposal without prompting
        #[arg(short, long)]
        yes: bool,
    },

    /// Manage the local media download cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },
}

#[derive(Subcommand)]
enum CacheCommands {
    /// Show cache size
    Stats,
    /// Delete every cached download
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
}

/// Parse arguments and run the selected command, returning the exit code.
pub async fn run() -> anyhow::Result<i32> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.settings,
        ..Default::default()
    };
    let settings = load_settings(&options).await?;

    match cli.command {
        Commands::Migrate(args) => migrate::cmd_migrate(settings, args).await,
        Commands::Analyze { tables, json } => {
            analyze::cmd_analyze(&settings, &tables, json).await?;
            Ok(0)
        }
        Commands::Map { output, yes } => {
            map::cmd_map(&settings, &output, yes).await?;
            Ok(0)
        }
        Commands::Cache { command } => {
            match command {
                CacheCommands::Stats => cache::cmd_cache_stats(&settings)?,
                CacheCommands::Clear { yes } => cache::cmd_cache_clear(&settings, yes)?,
            }
            Ok(0)
        }
    }
}
