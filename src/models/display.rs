//! Display model implementations for table and JSON output

use chrono::Utc;
use serde::Serialize;
use tabled::Tabled;

use crate::client::Killmail;
use crate::output::formatters::{format_age, format_isk};
use crate::pipeline::PreloadReport;

/// Killmail display model for table/JSON output.
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct KillDisplay {
    #[tabled(rename = "ID")]
    pub id: u64,

    #[tabled(rename = "SYSTEM")]
    pub system_id: u64,

    /// RFC 3339 timestamp in JSON, relative age in tables
    #[tabled(rename = "TIME")]
    pub occurred: String,

    #[tabled(rename = "VALUE")]
    pub value: String,

    /// `solo`, `npc`, both or neither
    #[tabled(rename = "SOLO/NPC")]
    pub flags: String,
}

impl KillDisplay {
    /// Table rows show the age rather than the raw timestamp
    pub fn for_table(killmail: &Killmail) -> Self {
        let mut row = Self::from(killmail);
        row.occurred = format_age(killmail.occurred_at, Utc::now());
        row
    }
}

impl From<&Killmail> for KillDisplay {
    fn from(km: &Killmail) -> Self {
        let (value, flags) = match &km.zkb {
            Some(zkb) => {
                let mut flags = Vec::new();
                if zkb.solo {
                    flags.push("solo");
                }
                if zkb.npc {
                    flags.push("npc");
                }
                (format_isk(zkb.total_value), flags.join(","))
            }
            None => (format_isk(None), String::new()),
        };

        Self {
            id: km.id,
            system_id: km.system_id,
            occurred: km.occurred_at.to_rfc3339(),
            value,
            flags,
        }
    }
}

/// Preload phase display model.
#[derive(Debug, Clone, Tabled, Serialize)]
pub struct ReportDisplay {
    #[tabled(rename = "PHASE")]
    pub phase: String,

    #[tabled(rename = "SYSTEMS")]
    pub systems: usize,

    #[tabled(rename = "OK")]
    pub succeeded: usize,

    #[tabled(rename = "FAILED")]
    pub failed: usize,

    #[tabled(rename = "CALLS")]
    pub calls: usize,
}

impl From<&PreloadReport> for ReportDisplay {
    fn from(report: &PreloadReport) -> Self {
        Self {
            phase: report.fetch_type.to_string(),
            systems: report.systems,
            succeeded: report.succeeded,
            failed: report.failed,
            calls: report.calls,
        }
    }
}
