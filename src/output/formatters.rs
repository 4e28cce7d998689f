//! Reusable formatting utilities for CLI output

use chrono::{DateTime, Utc};

/// Format an ISK amount with a magnitude suffix.
///
/// # Example output
/// - `1.25B ISK`
/// - `830.00K ISK`
/// - `N/A` when the value is unknown
pub fn format_isk(value: Option<f64>) -> String {
    let Some(value) = value else {
        return "N/A".to_string();
    };

    let (scaled, suffix) = if value >= 1e12 {
        (value / 1e12, "T")
    } else if value >= 1e9 {
        (value / 1e9, "B")
    } else if value >= 1e6 {
        (value / 1e6, "M")
    } else if value >= 1e3 {
        (value / 1e3, "K")
    } else {
        (value, "")
    };
    format!("{:.2}{} ISK", scaled, suffix)
}

/// How long before `now` something happened.
///
/// # Example output
/// - `2h 15m ago`
/// - `5m ago`
/// - `just now`
pub fn format_age(at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - at).num_seconds();
    if secs < 60 {
        return "just now".to_string();
    }

    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3600;
    let mins = (secs % 3600) / 60;

    if days > 0 {
        format!("{}d {}h ago", days, hours)
    } else if hours > 0 {
        format!("{}h {}m ago", hours, mins)
    } else {
        format!("{}m ago", mins)
    }
}
