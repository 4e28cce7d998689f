//! killfeed - killmail ingestion and caching pipeline for zKillboard

use clap::Parser;

mod broadcast;
mod cache;
mod cli;
mod client;
mod config;
mod error;
mod maps;
mod models;
mod output;
mod pipeline;

use cli::{Cli, Commands, ConfigCommands, GlobalOptions};
use error::Result;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let opts = GlobalOptions::from_cli(&cli);

    match cli.command {
        Commands::Run {
            no_preload,
            no_realtime,
        } => cli::run::run(&opts, no_preload, no_realtime).await,
        Commands::Preload => cli::preload::run(&opts).await,
        Commands::System {
            system_ids,
            limit,
            since_hours,
            force,
        } => cli::system::list(&opts, system_ids, limit, since_hours, force).await,
        Commands::Killmail { killmail_id } => cli::killmail::get(&opts, killmail_id).await,
        Commands::QueueId => cli::queue::queue_id(&opts),
        Commands::Config(config_cmd) => match config_cmd {
            ConfigCommands::Show => cli::config::show(&opts),
            ConfigCommands::Path => cli::config::path(&opts),
            ConfigCommands::Init => cli::config::init(&opts),
        },
    }
}

/// `RUST_LOG` wins; otherwise info, or debug with `--debug`
fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}
