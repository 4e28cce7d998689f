//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

pub mod args;
pub mod config;
pub mod context;
pub mod killmail;
pub mod preload;
pub mod queue;
pub mod run;
pub mod system;

pub use args::{GlobalOptions, OutputFormat};
pub use context::CommandContext;

/// killfeed - killmail ingestion and caching pipeline
#[derive(Parser, Debug)]
#[command(name = "killfeed")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (table, json)
    #[arg(
        long,
        global = true,
        env = "KILLFEED_FORMAT",
        default_value = "table",
        hide_env = true,
        hide_possible_values = true
    )]
    pub format: OutputFormat,

    /// Override config file location
    #[arg(long, global = true, env = "KILLFEED_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "KILLFEED_DEBUG", hide_env = true)]
    pub debug: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the preloader and realtime listener until interrupted
    Run {
        /// Skip background preloading
        #[arg(long)]
        no_preload: bool,

        /// Skip the RedisQ listener
        #[arg(long)]
        no_realtime: bool,
    },

    /// Run both preload passes once and report
    Preload,

    /// Fetch recent kills for one or more systems
    System {
        /// Solar system IDs
        #[arg(required = true, num_args = 1..)]
        system_ids: Vec<u64>,

        /// Maximum kills per system
        #[arg(long, default_value = "25")]
        limit: usize,

        /// Only kills from the last N hours
        #[arg(long, default_value = "24")]
        since_hours: u32,

        /// Ignore the recency marker
        #[arg(long)]
        force: bool,
    },

    /// Fetch a single killmail
    Killmail {
        /// Killmail ID
        killmail_id: u64,
    },

    /// Print the RedisQ queue id derived from the configured secret
    QueueId,

    /// Inspect and initialize configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

/// Configuration subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration
    Show,

    /// Print the config file path
    Path,

    /// Write a default config file if none exists
    Init,
}
