//! Config inspection and initialization commands

use colored::Colorize;

use crate::cli::args::GlobalOptions;
use crate::config::Config;
use crate::error::{Error, Result};

const REDACTED: &str = "********";

/// Print the effective configuration as YAML, with the queue secret masked
pub fn show(opts: &GlobalOptions) -> Result<()> {
    let mut config = Config::load_at(opts.config_ref())?;
    if config.realtime.queue_secret.is_some() {
        config.realtime.queue_secret = Some(REDACTED.to_string());
    }

    let yaml = serde_yaml::to_string(&config)
        .map_err(|e| Error::Other(format!("Could not render configuration: {}", e)))?;
    print!("{}", yaml);
    Ok(())
}

/// Print where the config file is read from
pub fn path(opts: &GlobalOptions) -> Result<()> {
    let path = Config::resolve_path(opts.config_ref())?;
    println!("{}", path.display());
    Ok(())
}

/// Write the default configuration unless a file already exists
pub fn init(opts: &GlobalOptions) -> Result<()> {
    let path = Config::resolve_path(opts.config_ref())?;
    if path.exists() {
        println!(
            "{} Config already exists at {}",
            "⚠".yellow(),
            path.display().to_string().cyan()
        );
        return Ok(());
    }

    Config::default().save_to(path.clone())?;
    println!(
        "{} Wrote default config to {}",
        "✓".green(),
        path.display().to_string().cyan()
    );
    Ok(())
}
