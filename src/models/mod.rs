//! Display models for CLI output
//!
//! Converts pipeline types into CLI-friendly display rows.

pub mod display;

pub use display::{KillDisplay, ReportDisplay};
