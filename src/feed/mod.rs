use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod http;
pub mod mock;

/// Width used when zero-padding numeric station codes ("41" -> "041").
pub const STATION_CODE_WIDTH: usize = 3;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StationInformation {
    #[serde(deserialize_with = "string_or_number")]
    pub station_id: String,
    #[serde(default)]
    pub short_name: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lon: f64,
    #[serde(default)]
    pub capacity: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StationStatus {
    #[serde(deserialize_with = "string_or_number")]
    pub station_id: String,
    #[serde(default)]
    pub num_bikes_available: u32,
    #[serde(default)]
    pub num_bikes_disabled: u32,
    #[serde(default)]
    pub num_docks_available: u32,
    #[serde(default)]
    pub num_docks_disabled: u32,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_installed: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_renting: bool,
    #[serde(default, deserialize_with = "bool_or_int")]
    pub is_returning: bool,
    #[serde(default)]
    pub last_reported: Option<i64>,
}

/// Metadata and status of one station merged together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Station {
    pub station_code: String,
    pub station_id: String,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub capacity: u32,
    pub bikes_available: u32,
    pub bikes_disabled: u32,
    pub docks_available: u32,
    pub docks_disabled: u32,
    pub is_installed: bool,
    pub is_renting: bool,
    pub is_returning: bool,
    pub last_reported: Option<i64>,
}

impl Station {
    fn merge(info: &StationInformation, status: Option<&StationStatus>, code: &str) -> Self {
        Self {
            station_code: info.short_name.clone().unwrap_or_else(|| code.to_string()),
            station_id: info.station_id.clone(),
            name: info.name.clone(),
            latitude: info.lat,
            longitude: info.lon,
            capacity: info.capacity,
            bikes_available: status.map_or(0, |s| s.num_bikes_available),
            bikes_disabled: status.map_or(0, |s| s.num_bikes_disabled),
            docks_available: status.map_or(0, |s| s.num_docks_available),
            docks_disabled: status.map_or(0, |s| s.num_docks_disabled),
            is_installed: status.is_some_and(|s| s.is_installed),
            is_renting: status.is_some_and(|s| s.is_renting),
            is_returning: status.is_some_and(|s| s.is_returning),
            last_reported: status.and_then(|s| s.last_reported),
        }
    }

    /// Bikes available over capacity; `None` for a zero-capacity station.
    pub fn occupancy(&self) -> Option<f64> {
        if self.capacity == 0 {
            return None;
        }
        Some(self.bikes_available as f64 / self.capacity as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    Information,
    Status,
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("feed returned http status {0}")]
    Status(u16),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    #[error("feed cache lock poisoned")]
    StateLock,
}

/// Source of station metadata and status lists.
pub trait FeedSource: Send + Sync {
    fn station_information(
        &self,
    ) -> impl Future<Output = Result<Vec<StationInformation>, FeedError>> + Send;

    fn station_status(&self) -> impl Future<Output = Result<Vec<StationStatus>, FeedError>> + Send;
}

#[derive(Debug, Default)]
struct InformationCache {
    stations: HashMap<String, StationInformation>,
    code_to_id: HashMap<String, String>,
    refreshed_at: Option<Instant>,
}

#[derive(Debug, Default)]
struct StatusCache {
    stations: HashMap<String, StationStatus>,
    refreshed_at: Option<Instant>,
}

fn is_fresh(refreshed_at: Option<Instant>, ttl: Duration) -> bool {
    refreshed_at.is_some_and(|at| at.elapsed() < ttl)
}

/// Metadata and status cached under separate TTLs. A failed refresh keeps
/// the previous data.
#[derive(Debug)]
pub struct FeedCache<S> {
    source: S,
    information_ttl: Duration,
    status_ttl: Duration,
    information: RwLock<InformationCache>,
    status: RwLock<StatusCache>,
}

impl<S: FeedSource> FeedCache<S> {
    pub fn new(source: S, information_ttl: Duration, status_ttl: Duration) -> Self {
        Self {
            source,
            information_ttl,
            status_ttl,
            information: RwLock::new(InformationCache::default()),
            status: RwLock::new(StatusCache::default()),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Re-fetches one half of the cache if it is empty or expired.
    ///
    /// Returns `Ok(true)` when a fetch happened. On error the previous
    /// contents are kept.
    pub async fn refresh(&self, kind: FeedKind) -> Result<bool, FeedError> {
        match kind {
            FeedKind::Information => self.refresh_information().await,
            FeedKind::Status => self.refresh_status().await,
        }
    }

    async fn refresh_information(&self) -> Result<bool, FeedError> {
        {
            let guard = self.information.read().map_err(|_| FeedError::StateLock)?;
            if is_fresh(guard.refreshed_at, self.information_ttl) {
                return Ok(false);
            }
        }

        info!("Refreshing station information cache");
        let stations = self.source.station_information().await.inspect_err(|err| {
            warn!(error = %err, "Failed to refresh station information");
        })?;

        let mut by_id = HashMap::with_capacity(stations.len());
        let mut code_to_id = HashMap::with_capacity(stations.len());
        for station in stations {
            if let Some(code) = station.short_name.as_deref().filter(|c| !c.is_empty()) {
                code_to_id.insert(code.to_string(), station.station_id.clone());
            }
            by_id.insert(station.station_id.clone(), station);
        }

        let mut guard = self.information.write().map_err(|_| FeedError::StateLock)?;
        info!(stations = by_id.len(), "Station information cache updated");
        guard.stations = by_id;
        guard.code_to_id = code_to_id;
        guard.refreshed_at = Some(Instant::now());
        Ok(true)
    }

    async fn refresh_status(&self) -> Result<bool, FeedError> {
        {
            let guard = self.status.read().map_err(|_| FeedError::StateLock)?;
            if is_fresh(guard.refreshed_at, self.status_ttl) {
                return Ok(false);
            }
        }

        let stations = self.source.station_status().await.inspect_err(|err| {
            warn!(error = %err, "Failed to refresh station status");
        })?;
        let by_id: HashMap<_, _> = stations
            .into_iter()
            .map(|s| (s.station_id.clone(), s))
            .collect();

        let mut guard = self.status.write().map_err(|_| FeedError::StateLock)?;
        debug!(stations = by_id.len(), "Station status cache updated");
        guard.stations = by_id;
        guard.refreshed_at = Some(Instant::now());
        Ok(true)
    }

    async fn refresh_all(&self) -> Result<(), FeedError> {
        self.refresh(FeedKind::Information).await?;
        self.refresh(FeedKind::Status).await?;
        Ok(())
    }

    /// Resolves a public station code against the cached metadata.
    pub fn resolve(&self, code: &str) -> Result<Option<String>, FeedError> {
        let guard = self.information.read().map_err(|_| FeedError::StateLock)?;
        Ok(resolve_code(&guard.code_to_id, code))
    }

    /// Refreshes metadata if needed, then resolves the code.
    pub async fn resolve_fresh(&self, code: &str) -> Result<Option<String>, FeedError> {
        self.refresh(FeedKind::Information).await?;
        self.resolve(code)
    }

    pub async fn get_station(&self, code: &str) -> Result<Option<Station>, FeedError> {
        self.refresh_all().await?;

        let Some(station_id) = self.resolve(code)? else {
            warn!(station_code = code, "Station code not present in feed");
            return Ok(None);
        };

        let info_guard = self.information.read().map_err(|_| FeedError::StateLock)?;
        let status_guard = self.status.read().map_err(|_| FeedError::StateLock)?;
        match (
            info_guard.stations.get(&station_id),
            status_guard.stations.get(&station_id),
        ) {
            (Some(info), Some(status)) => Ok(Some(Station::merge(info, Some(status), code))),
            _ => {
                warn!(station_code = code, station_id = %station_id, "Station missing metadata or status");
                Ok(None)
            }
        }
    }

    /// Every station with metadata, status fields zeroed where no status is cached.
    pub async fn all_stations(&self) -> Result<Vec<Station>, FeedError> {
        self.refresh_all().await?;

        let info_guard = self.information.read().map_err(|_| FeedError::StateLock)?;
        let status_guard = self.status.read().map_err(|_| FeedError::StateLock)?;
        let mut stations: Vec<Station> = info_guard
            .stations
            .values()
            .map(|info| {
                let code = info.short_name.clone().unwrap_or_default();
                Station::merge(info, status_guard.stations.get(&info.station_id), &code)
            })
            .collect();
        stations.sort_by(|a, b| a.station_code.cmp(&b.station_code));
        Ok(stations)
    }

    /// Reports whether the feed answers; never returns an error.
    pub async fn is_available(&self) -> bool {
        if let Err(err) = self.refresh_all().await {
            warn!(error = %err, "Feed availability check failed");
            return false;
        }
        self.status
            .read()
            .map(|guard| !guard.stations.is_empty())
            .unwrap_or(false)
    }
}

/// Exact match, then zero-padded, then leading zeros stripped.
pub fn resolve_code(code_to_id: &HashMap<String, String>, code: &str) -> Option<String> {
    if let Some(id) = code_to_id.get(code) {
        return Some(id.clone());
    }

    let padded = format!("{code:0>width$}", width = STATION_CODE_WIDTH);
    if let Some(id) = code_to_id.get(&padded) {
        return Some(id.clone());
    }

    let stripped = code.trim_start_matches('0');
    let stripped = if stripped.is_empty() { "0" } else { stripped };
    code_to_id.get(stripped).cloned()
}

fn bool_or_int<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(value) => value,
        Flag::Int(value) => value != 0,
    })
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Number(i64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(value) => value,
        Id::Number(value) => value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::mock::{MockFeedSource, information, status};
    use super::*;

    fn codes(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(code, id)| (code.to_string(), id.to_string()))
            .collect()
    }

    #[test]
    fn resolve_prefers_exact_match() {
        let map = codes(&[("041", "id-041"), ("41", "id-41")]);
        assert_eq!(resolve_code(&map, "41").as_deref(), Some("id-41"));
        assert_eq!(resolve_code(&map, "041").as_deref(), Some("id-041"));
    }

    #[test]
    fn resolve_pads_and_strips_zeros() {
        let map = codes(&[("007", "id-7"), ("12", "id-12")]);
        assert_eq!(resolve_code(&map, "7").as_deref(), Some("id-7"));
        assert_eq!(resolve_code(&map, "07").as_deref(), Some("id-7"));
        assert_eq!(resolve_code(&map, "012").as_deref(), Some("id-12"));
        assert_eq!(resolve_code(&map, "0012").as_deref(), Some("id-12"));
        assert_eq!(resolve_code(&map, "99"), None);
    }

    #[test]
    fn resolve_all_zero_code_maps_to_zero() {
        let map = codes(&[("0", "id-zero")]);
        assert_eq!(resolve_code(&map, "000").as_deref(), Some("id-zero"));
    }

    #[test]
    fn flags_accept_integers_and_booleans() -> Result<(), serde_json::Error> {
        let from_ints: StationStatus = serde_json::from_str(
            r#"{"station_id": 17, "num_bikes_available": 3, "is_installed": 1, "is_renting": 0, "is_returning": true}"#,
        )?;
        assert_eq!(from_ints.station_id, "17");
        assert!(from_ints.is_installed);
        assert!(!from_ints.is_renting);
        assert!(from_ints.is_returning);
        assert_eq!(from_ints.last_reported, None);
        Ok(())
    }

    #[tokio::test]
    async fn get_station_merges_metadata_and_status() -> Result<(), FeedError> {
        let source = MockFeedSource::new(
            vec![information("st-41", "041", 20)],
            vec![status("st-41", 10, 9)],
        );
        let cache = FeedCache::new(source, Duration::from_secs(60), Duration::from_secs(60));

        let station = cache.get_station("41").await?.ok_or(FeedError::StateLock)?;

        assert_eq!(station.station_code, "041");
        assert_eq!(station.station_id, "st-41");
        assert_eq!(station.capacity, 20);
        assert_eq!(station.bikes_available, 10);
        assert_eq!(station.occupancy(), Some(0.5));
        Ok(())
    }

    #[tokio::test]
    async fn station_without_status_is_not_found() -> Result<(), FeedError> {
        let source = MockFeedSource::new(vec![information("st-1", "001", 15)], Vec::new());
        let cache = FeedCache::new(source, Duration::from_secs(60), Duration::from_secs(60));

        assert_eq!(cache.get_station("001").await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn fresh_caches_are_not_refetched() -> Result<(), FeedError> {
        let source = MockFeedSource::new(
            vec![information("st-1", "001", 15)],
            vec![status("st-1", 4, 11)],
        );
        let cache = FeedCache::new(source, Duration::from_secs(3600), Duration::from_secs(3600));

        assert!(cache.refresh(FeedKind::Information).await?);
        assert!(!cache.refresh(FeedKind::Information).await?);
        cache.get_station("001").await?;
        cache.get_station("1").await?;

        assert_eq!(cache.source().information_calls(), 1);
        assert_eq!(cache.source().status_calls(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn expired_status_is_refetched_independently() -> Result<(), FeedError> {
        let source = MockFeedSource::new(
            vec![information("st-1", "001", 15)],
            vec![status("st-1", 4, 11)],
        );
        let cache = FeedCache::new(source, Duration::from_secs(3600), Duration::ZERO);

        cache.get_station("001").await?;
        cache.get_station("001").await?;

        assert_eq!(cache.source().information_calls(), 1);
        assert_eq!(cache.source().status_calls(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_cache() -> Result<(), FeedError> {
        let source = MockFeedSource::new(
            vec![information("st-1", "001", 15)],
            vec![status("st-1", 4, 11)],
        );
        let cache = FeedCache::new(source, Duration::ZERO, Duration::ZERO);
        cache.get_station("001").await?;

        cache.source().set_failing(true);
        assert!(cache.refresh(FeedKind::Status).await.is_err());
        assert!(cache.get_station("001").await.is_err());
        assert_eq!(cache.resolve("001")?.as_deref(), Some("st-1"));
        assert!(!cache.is_available().await);

        cache.source().set_failing(false);
        assert!(cache.is_available().await);
        Ok(())
    }
}
