//! Killmail records and upstream payload shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ApiError;

/// zKillboard metadata attached to a killmail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ZkbMeta {
    /// Hash needed to fetch the full killmail from ESI
    pub hash: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_value: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<i64>,

    #[serde(default)]
    pub npc: bool,

    #[serde(default)]
    pub solo: bool,

    #[serde(default)]
    pub awox: bool,
}

/// One combat loss event.
///
/// Immutable once built; the cache only ever overwrites it with a record for
/// the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Killmail {
    pub id: u64,
    pub system_id: u64,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zkb: Option<ZkbMeta>,
    /// Full upstream killmail body (victim, attackers, ...)
    pub payload: Value,
}

/// The fields of an ESI killmail we index on
#[derive(Deserialize)]
struct EsiHeader {
    killmail_id: u64,
    killmail_time: DateTime<Utc>,
    solar_system_id: u64,
}

impl Killmail {
    /// Parse a full ESI-shaped killmail, optionally enriched with zkb metadata.
    ///
    /// A `zkb` object embedded in the payload is used when `zkb` is `None`.
    pub fn from_payload(mut payload: Value, zkb: Option<ZkbMeta>) -> Result<Self, ApiError> {
        let header: EsiHeader = serde_json::from_value(payload.clone())
            .map_err(|e| ApiError::InvalidResponse(format!("Malformed killmail: {}", e)))?;

        let embedded = payload
            .as_object_mut()
            .and_then(|obj| obj.remove("zkb"))
            .and_then(|z| serde_json::from_value::<ZkbMeta>(z).ok());

        Ok(Self {
            id: header.killmail_id,
            system_id: header.solar_system_id,
            occurred_at: header.killmail_time,
            zkb: zkb.or(embedded),
            payload,
        })
    }

    /// Whether the kill happened at or after `cutoff`.
    pub fn is_newer_than(&self, cutoff: DateTime<Utc>) -> bool {
        self.occurred_at >= cutoff
    }
}

/// One entry of a per-system kill list.
///
/// zKillboard lists usually carry only the id and zkb metadata; some mirrors
/// inline the full killmail.
#[derive(Debug, Clone)]
pub enum KillListEntry {
    Full(Killmail),
    Partial { id: u64, zkb: ZkbMeta },
}

impl KillListEntry {
    pub fn id(&self) -> u64 {
        match self {
            KillListEntry::Full(km) => km.id,
            KillListEntry::Partial { id, .. } => *id,
        }
    }

    /// Classify a raw list entry. Entries carrying `killmail_time` are full.
    pub fn parse(raw: Value) -> Result<Self, ApiError> {
        if raw.get("killmail_time").is_some() {
            return Killmail::from_payload(raw, None).map(KillListEntry::Full);
        }

        #[derive(Deserialize)]
        struct Partial {
            killmail_id: u64,
            zkb: ZkbMeta,
        }

        let partial: Partial = serde_json::from_value(raw)
            .map_err(|e| ApiError::InvalidResponse(format!("Malformed kill list entry: {}", e)))?;
        Ok(KillListEntry::Partial {
            id: partial.killmail_id,
            zkb: partial.zkb,
        })
    }
}

/// A decoded RedisQ poll result
#[derive(Debug, Clone)]
pub enum RedisqPackage {
    /// No new event
    Empty,
    /// Killmail delivered inline
    Inline(Killmail),
    /// Only id and hash; the full killmail needs a follow-up fetch
    Reference { id: u64, zkb: ZkbMeta },
}

impl RedisqPackage {
    /// Decode a RedisQ response body.
    ///
    /// Accepts `{package: null}`, `{package: {killID, killmail, zkb}}`,
    /// `{package: {killID, zkb}}` and the bare `{killID, zkb}` form.
    pub fn decode(body: Value) -> Result<Self, ApiError> {
        let package = match body.get("package") {
            Some(Value::Null) => return Ok(RedisqPackage::Empty),
            Some(p) => p.clone(),
            None if body.get("killID").is_some() => body,
            None => {
                return Err(ApiError::InvalidResponse(
                    "RedisQ response has neither package nor killID".to_string(),
                ));
            }
        };

        let zkb = package
            .get("zkb")
            .cloned()
            .ok_or_else(|| ApiError::InvalidResponse("RedisQ package without zkb".to_string()))
            .and_then(|z| {
                serde_json::from_value::<ZkbMeta>(z)
                    .map_err(|e| ApiError::InvalidResponse(format!("Malformed zkb: {}", e)))
            })?;

        if let Some(killmail) = package.get("killmail") {
            return Killmail::from_payload(killmail.clone(), Some(zkb)).map(RedisqPackage::Inline);
        }

        let id = package
            .get("killID")
            .and_then(Value::as_u64)
            .ok_or_else(|| ApiError::InvalidResponse("RedisQ package without killID".to_string()))?;

        Ok(RedisqPackage::Reference { id, zkb })
    }
}
