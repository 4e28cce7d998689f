//! One-shot preload command

use std::sync::Arc;

use crate::broadcast::LogBroadcaster;
use crate::cli::CommandContext;
use crate::cli::args::GlobalOptions;
use crate::error::Result;
use crate::maps::StaticMapSource;
use crate::models::ReportDisplay;
use crate::output;
use crate::pipeline::Preloader;

/// Run the quick and expanded passes once over the configured maps
pub async fn run(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;

    let preloader = Preloader::new(
        Arc::new(ctx.fetcher.clone()),
        Arc::new(StaticMapSource::new(ctx.config.maps.clone())),
        Arc::new(LogBroadcaster),
        ctx.config.preload.clone(),
    );

    let reports = preloader.run_once().await?;
    let rows: Vec<ReportDisplay> = reports.iter().map(ReportDisplay::from).collect();
    output::print(&rows, ctx.format)
}
