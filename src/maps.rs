//! Read-only view of maps and the systems visible on them

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::MapSettings;
use crate::error::Result;

/// A map known to the map source
#[derive(Debug, Clone, PartialEq)]
pub struct MapInfo {
    pub id: String,
    pub name: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Source of maps and their visible systems.
#[async_trait]
pub trait MapSource: Send + Sync {
    /// Maps updated at or after `since`
    async fn active_maps(&self, since: DateTime<Utc>) -> Result<Vec<MapInfo>>;

    /// The single most recently updated map, if any
    async fn latest_map(&self) -> Result<Option<MapInfo>>;

    /// Systems currently visible on a map
    async fn visible_systems(&self, map_id: &str) -> Result<Vec<u64>>;
}

/// Map source backed by the `maps` section of the config file
#[derive(Debug, Clone, Default)]
pub struct StaticMapSource {
    maps: Vec<MapSettings>,
}

impl StaticMapSource {
    pub fn new(maps: Vec<MapSettings>) -> Self {
        Self { maps }
    }

    fn info(map: &MapSettings, now: DateTime<Utc>) -> MapInfo {
        MapInfo {
            id: map.id.clone(),
            name: map.name.clone(),
            updated_at: map.updated_at.unwrap_or(now),
        }
    }
}

#[async_trait]
impl MapSource for StaticMapSource {
    async fn active_maps(&self, since: DateTime<Utc>) -> Result<Vec<MapInfo>> {
        let now = Utc::now();
        Ok(self
            .maps
            .iter()
            .map(|m| Self::info(m, now))
            .filter(|m| m.updated_at >= since)
            .collect())
    }

    async fn latest_map(&self) -> Result<Option<MapInfo>> {
        let now = Utc::now();
        Ok(self
            .maps
            .iter()
            .map(|m| Self::info(m, now))
            .max_by_key(|m| m.updated_at))
    }

    async fn visible_systems(&self, map_id: &str) -> Result<Vec<u64>> {
        Ok(self
            .maps
            .iter()
            .find(|m| m.id == map_id)
            .map(|m| m.systems.clone())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn map(id: &str, systems: Vec<u64>, updated_at: Option<DateTime<Utc>>) -> MapSettings {
        MapSettings {
            id: id.to_string(),
            name: None,
            systems,
            updated_at,
        }
    }

    #[tokio::test]
    async fn test_active_maps_filters_by_window() {
        let now = Utc::now();
        let source = StaticMapSource::new(vec![
            map("fresh", vec![1], Some(now - Duration::minutes(5))),
            map("stale", vec![2], Some(now - Duration::hours(3))),
            map("pinned", vec![3], None),
        ]);

        let active = source.active_maps(now - Duration::minutes(30)).await.unwrap();
        let ids: Vec<_> = active.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["fresh", "pinned"]);
    }

    #[tokio::test]
    async fn test_latest_map() {
        let now = Utc::now();
        let source = StaticMapSource::new(vec![
            map("older", vec![1], Some(now - Duration::hours(5))),
            map("newer", vec![2], Some(now - Duration::hours(2))),
        ]);

        let latest = source.latest_map().await.unwrap().unwrap();
        assert_eq!(latest.id, "newer");
        assert!(StaticMapSource::default().latest_map().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_visible_systems() {
        let source = StaticMapSource::new(vec![map("home", vec![30000142, 30002187], None)]);
        assert_eq!(
            source.visible_systems("home").await.unwrap(),
            vec![30000142, 30002187]
        );
        assert!(source.visible_systems("missing").await.unwrap().is_empty());
    }
}
