//! Single killmail lookup

use crate::cli::args::GlobalOptions;
use crate::cli::{CommandContext, OutputFormat};
use crate::error::Result;
use crate::models::KillDisplay;
use crate::output::{self, json};

/// Fetch one killmail, from cache when present
pub async fn get(opts: &GlobalOptions, killmail_id: u64) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let killmail = ctx.fetcher.fetch_killmail(killmail_id).await?;

    match ctx.format {
        OutputFormat::Table => {
            let rows = vec![KillDisplay::for_table(&killmail)];
            output::print(&rows, ctx.format)
        }
        // JSON carries the full body, not just the summary row
        OutputFormat::Json => {
            println!("{}", json::format_json(&killmail)?);
            Ok(())
        }
    }
}
