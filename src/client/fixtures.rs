//! Test fixtures and builders for killmail payloads
//!
//! Import via `use crate::client::fixtures::*` in test modules.

#![allow(dead_code)]

use chrono::{DateTime, Duration, Utc};
use serde_json::{Value, json};

use super::models::Killmail;

/// ESI-shaped killmail body
pub fn esi_killmail(id: u64, system_id: u64, at: DateTime<Utc>) -> Value {
    json!({
        "killmail_id": id,
        "killmail_time": at.to_rfc3339(),
        "solar_system_id": system_id,
        "victim": { "ship_type_id": 587, "character_id": 90000001 },
        "attackers": [{ "character_id": 90000002, "final_blow": true }]
    })
}

/// zkb metadata object with a predictable hash
pub fn zkb(id: u64) -> Value {
    json!({ "hash": format!("hash{}", id), "totalValue": 1250000.0, "npc": false, "solo": true })
}

/// zKillboard list entry without the killmail body
pub fn partial_entry(id: u64) -> Value {
    json!({ "killmail_id": id, "zkb": zkb(id) })
}

/// List entry with the body inlined
pub fn full_entry(id: u64, system_id: u64, at: DateTime<Utc>) -> Value {
    let mut body = esi_killmail(id, system_id, at);
    body["zkb"] = zkb(id);
    body
}

// ============================================================================
// KillmailBuilder
// ============================================================================

/// Builder for parsed `Killmail` values.
///
/// # Example
/// ```ignore
/// let km = KillmailBuilder::new(1).system(30000142).minutes_ago(5).build();
/// ```
#[derive(Debug, Clone)]
pub struct KillmailBuilder {
    id: u64,
    system_id: u64,
    at: DateTime<Utc>,
    with_zkb: bool,
}

impl KillmailBuilder {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            system_id: 30000142,
            at: Utc::now(),
            with_zkb: true,
        }
    }

    pub fn system(mut self, system_id: u64) -> Self {
        self.system_id = system_id;
        self
    }

    pub fn at(mut self, at: DateTime<Utc>) -> Self {
        self.at = at;
        self
    }

    pub fn minutes_ago(mut self, minutes: i64) -> Self {
        self.at = Utc::now() - Duration::minutes(minutes);
        self
    }

    pub fn without_zkb(mut self) -> Self {
        self.with_zkb = false;
        self
    }

    /// Raw JSON as it would appear inline in a list or RedisQ package
    pub fn raw(&self) -> Value {
        if self.with_zkb {
            full_entry(self.id, self.system_id, self.at)
        } else {
            esi_killmail(self.id, self.system_id, self.at)
        }
    }

    pub fn build(self) -> Killmail {
        Killmail::from_payload(self.raw(), None).expect("fixture killmail parses")
    }
}
