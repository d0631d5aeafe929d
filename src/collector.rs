use crate::feed::{FeedCache, FeedError, FeedSource, StationInformation, StationStatus};
use crate::snapshots::{SnapshotRecord, SnapshotStore, StoreError};
use chrono::{DateTime, SubsecRound, Utc};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Feed(#[from] FeedError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("snapshot write task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("feed returned no stations with a short code")]
    Empty,
}

/// Joins status rows to their metadata, stamping every row with `snapshot_time`.
///
/// Stations without metadata or without a short code are skipped.
pub fn build_records(
    information: &[StationInformation],
    status: &[StationStatus],
    snapshot_time: DateTime<Utc>,
) -> Vec<SnapshotRecord> {
    let by_id: HashMap<&str, &StationInformation> = information
        .iter()
        .map(|info| (info.station_id.as_str(), info))
        .collect();

    status
        .iter()
        .filter_map(|s| {
            let info = by_id.get(s.station_id.as_str())?;
            let code = info.short_name.clone()?;
            Some(SnapshotRecord {
                snapshot_time,
                station_id: s.station_id.clone(),
                station_code: code,
                name: info.name.clone(),
                capacity: info.capacity,
                latitude: info.lat,
                longitude: info.lon,
                bikes_available: s.num_bikes_available,
                bikes_disabled: s.num_bikes_disabled,
                docks_available: s.num_docks_available,
                docks_disabled: s.num_docks_disabled,
                is_installed: s.is_installed,
                is_renting: s.is_renting,
                is_returning: s.is_returning,
                last_reported: s
                    .last_reported
                    .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            })
        })
        .collect()
}

pub struct Collector<S> {
    feed: Arc<FeedCache<S>>,
    store: Arc<dyn SnapshotStore>,
    tz: Tz,
}

impl<S: FeedSource> Collector<S> {
    pub fn new(feed: Arc<FeedCache<S>>, store: Arc<dyn SnapshotStore>, tz: Tz) -> Self {
        Self { feed, store, tz }
    }

    /// Fetches both feeds and appends one snapshot to the partition of the
    /// local date of `now`. Returns the number of rows written.
    pub async fn collect_snapshot(&self, now: DateTime<Utc>) -> Result<usize, CollectError> {
        let snapshot_time = now.trunc_subsecs(0);
        let source = self.feed.source();
        let (information, status) =
            tokio::join!(source.station_information(), source.station_status());
        let records = build_records(&information?, &status?, snapshot_time);
        if records.is_empty() {
            return Err(CollectError::Empty);
        }

        let count = records.len();
        let date = snapshot_time.with_timezone(&self.tz).date_naive();
        let store = Arc::clone(&self.store);
        let total = tokio::task::spawn_blocking(move || store.append(date, records)).await??;
        debug!(%date, rows = count, partition_rows = total, "Snapshot appended");
        Ok(count)
    }
}

/// Collects one snapshot per tick until the task is dropped. Failures are
/// logged and the next tick proceeds normally.
pub async fn run_collector<S: FeedSource + 'static>(collector: Arc<Collector<S>>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Snapshot collector started");
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match collector.collect_snapshot(Utc::now()).await {
            Ok(count) => debug!(stations = count, "Snapshot collected"),
            Err(CollectError::Empty) => warn!("Snapshot skipped: feed returned no stations"),
            Err(e) => error!("Snapshot collection failed: {}", e),
        }
    }
}
