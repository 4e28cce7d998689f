//! Outbound event broadcasting
//!
//! The pipeline publishes to named topics and does not know who listens.

use std::fmt;

use log::{info, warn};
use serde::Serialize;
use serde_json::Value;

/// Global topic for preload phase batches
pub const PRELOAD_TOPIC: &str = "zkill:preload";

pub const DETAILED_KILLS_UPDATED: &str = "detailed_kills_updated";
pub const KILLMAIL_RECEIVED: &str = "killmail_received";
pub const KILL_COUNT_UPDATE: &str = "kill_count_update";

/// Per-system topic for realtime updates
pub fn system_topic(system_id: u64) -> String {
    format!("zkill:system:{}", system_id)
}

/// Which preload phase produced a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchType {
    Quick,
    Expanded,
}

impl fmt::Display for FetchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchType::Quick => write!(f, "quick"),
            FetchType::Expanded => write!(f, "expanded"),
        }
    }
}

/// Event envelope: `{event, payload, fetch_type?}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BroadcastEvent {
    pub event: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fetch_type: Option<FetchType>,
}

impl BroadcastEvent {
    pub fn new(event: &str, payload: Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
            fetch_type: None,
        }
    }

    pub fn with_fetch_type(mut self, fetch_type: FetchType) -> Self {
        self.fetch_type = Some(fetch_type);
        self
    }
}

pub trait Broadcaster: Send + Sync {
    fn broadcast(&self, topic: &str, event: BroadcastEvent);
}

/// Writes every event to the log as JSON
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBroadcaster;

impl Broadcaster for LogBroadcaster {
    fn broadcast(&self, topic: &str, event: BroadcastEvent) {
        match serde_json::to_string(&event) {
            Ok(json) => info!("[{}] {}", topic, json),
            Err(e) => warn!("Could not serialize {} event for {}: {}", event.event, topic, e),
        }
    }
}

/// Keeps every event for assertions
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingBroadcaster {
    events: std::sync::Mutex<Vec<(String, BroadcastEvent)>>,
}

#[cfg(test)]
impl RecordingBroadcaster {
    pub fn events(&self) -> Vec<(String, BroadcastEvent)> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_on(&self, topic: &str) -> Vec<BroadcastEvent> {
        self.events()
            .into_iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, e)| e)
            .collect()
    }
}

#[cfg(test)]
impl Broadcaster for RecordingBroadcaster {
    fn broadcast(&self, topic: &str, event: BroadcastEvent) {
        self.events.lock().unwrap().push((topic.to_string(), event));
    }
}
