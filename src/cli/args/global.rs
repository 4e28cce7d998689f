//! Global CLI options shared across all commands

use crate::cli::{Cli, OutputFormat};

/// Global CLI options passed to all command handlers.
///
/// Precedence is CLI flag > environment variable > config file > default.
/// This struct captures the CLI/env layer; the config file is read later by
/// `CommandContext`.
#[derive(Debug, Clone)]
pub struct GlobalOptions {
    /// Output format (table, json)
    pub format: OutputFormat,

    /// Custom config file path (defaults to ~/.killfeed/config.yaml)
    pub config: Option<String>,
}

impl GlobalOptions {
    pub fn from_cli(cli: &Cli) -> Self {
        Self {
            format: cli.format,
            config: cli.config.clone(),
        }
    }

    /// Get config path as `Option<&str>`.
    pub fn config_ref(&self) -> Option<&str> {
        self.config.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_from_cli() {
        let cli = Cli::parse_from(["killfeed", "--format", "json", "--config", "/tmp/kf.yaml", "queue-id"]);
        let opts = GlobalOptions::from_cli(&cli);
        assert_eq!(opts.format, OutputFormat::Json);
        assert_eq!(opts.config_ref(), Some("/tmp/kf.yaml"));
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::parse_from(["killfeed", "queue-id"]);
        let opts = GlobalOptions::from_cli(&cli);
        assert_eq!(opts.format, OutputFormat::Table);
    }
}
