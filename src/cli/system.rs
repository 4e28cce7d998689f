//! System kill listing

use colored::Colorize;
use serde::Serialize;

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};
use crate::client::Killmail;
use crate::error::Result;
use crate::models::KillDisplay;
use crate::output::{self, json};
use crate::pipeline::FetchOptions;

#[derive(Serialize)]
struct SystemResult {
    system_id: u64,
    calls: usize,
    kills: Vec<KillDisplay>,
}

/// Fetch recent kills for each system, in parallel.
///
/// A failing system is reported on stderr and does not hide the others.
pub async fn list(
    opts: &GlobalOptions,
    system_ids: Vec<u64>,
    limit: usize,
    since_hours: u32,
    force: bool,
) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let fetch_opts = FetchOptions {
        limit,
        force,
        since_hours,
        ..FetchOptions::default()
    };

    let order = system_ids.clone();
    let mut results = ctx
        .fetcher
        .fetch_killmails_for_systems(system_ids, fetch_opts)
        .await;

    let mut succeeded = Vec::new();
    for system_id in order {
        match results.remove(&system_id) {
            Some(Ok(fetch)) => succeeded.push((system_id, fetch)),
            Some(Err(e)) => eprintln!(
                "{} System {}: {}",
                "✗".red(),
                system_id.to_string().bold(),
                e
            ),
            // Duplicate id on the command line
            None => {}
        }
    }

    match ctx.format {
        OutputFormat::Table => {
            for (system_id, fetch) in &succeeded {
                println!(
                    "{} {} ({} upstream calls)",
                    "System".bold(),
                    system_id.to_string().cyan(),
                    fetch.calls
                );
                output::print(&table_rows(&fetch.kills), ctx.format)?;
                println!();
            }
        }
        OutputFormat::Json => {
            let data: Vec<SystemResult> = succeeded
                .into_iter()
                .map(|(system_id, fetch)| SystemResult {
                    system_id,
                    calls: fetch.calls,
                    kills: fetch.kills.iter().map(KillDisplay::from).collect(),
                })
                .collect();
            println!("{}", json::format_json(&data)?);
        }
    }

    Ok(())
}

fn table_rows(kills: &[Killmail]) -> Vec<KillDisplay> {
    kills.iter().map(KillDisplay::for_table).collect()
}
