use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

pub mod csv_store;
pub mod memory;

pub use csv_store::CsvSnapshotStore;
pub use memory::MemorySnapshotStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub snapshot_time: DateTime<Utc>,
    pub station_id: String,
    pub station_code: String,
    pub name: String,
    pub capacity: u32,
    pub latitude: f64,
    pub longitude: f64,
    pub bikes_available: u32,
    pub bikes_disabled: u32,
    pub docks_available: u32,
    pub docks_disabled: u32,
    pub is_installed: bool,
    pub is_renting: bool,
    pub is_returning: bool,
    pub last_reported: Option<DateTime<Utc>>,
}

impl SnapshotRecord {
    /// Bikes over capacity, `None` when capacity is zero.
    pub fn occupancy(&self) -> Option<f64> {
        if self.capacity == 0 {
            return None;
        }
        Some(self.bikes_available as f64 / self.capacity as f64)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("snapshot io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("snapshot csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("snapshot store lock poisoned")]
    StateLock,
}

/// Append-only store of snapshot rows partitioned by local date.
pub trait SnapshotStore: Send + Sync {
    /// All rows of one partition, or `None` when the partition does not exist.
    fn load_day(&self, date: NaiveDate) -> Result<Option<Arc<Vec<SnapshotRecord>>>, StoreError>;

    /// Merges `records` into the partition for `date`; returns the partition size.
    fn append(&self, date: NaiveDate, records: Vec<SnapshotRecord>) -> Result<usize, StoreError>;

    /// One station's rows within `[from, to]`, sorted by snapshot time.
    ///
    /// `None` when the partition does not exist.
    fn station_rows(
        &self,
        date: NaiveDate,
        station_id: &str,
        range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    ) -> Result<Option<Vec<SnapshotRecord>>, StoreError> {
        let Some(day) = self.load_day(date)? else {
            return Ok(None);
        };
        let mut rows: Vec<SnapshotRecord> = day
            .iter()
            .filter(|r| r.station_id == station_id)
            .filter(|r| range.is_none_or(|(from, to)| r.snapshot_time >= from && r.snapshot_time <= to))
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.snapshot_time);
        Ok(Some(rows))
    }
}

/// `root/year=YYYY/month=MM/gbfs_YYYYMMDD.csv`
pub fn partition_path(root: &Path, date: NaiveDate) -> PathBuf {
    root.join(date.format("year=%Y").to_string())
        .join(date.format("month=%m").to_string())
        .join(date.format("gbfs_%Y%m%d.csv").to_string())
}

/// Concatenates two batches keeping the latest write per (time, station code).
///
/// The result is ordered by station code, then snapshot time.
pub fn merge_records(
    existing: &[SnapshotRecord],
    incoming: Vec<SnapshotRecord>,
) -> Vec<SnapshotRecord> {
    let mut seen = HashSet::new();
    let mut merged: Vec<SnapshotRecord> = incoming
        .into_iter()
        .rev()
        .chain(existing.iter().rev().cloned())
        .filter(|r| seen.insert((r.snapshot_time, r.station_code.clone())))
        .collect();
    merged.sort_by(|a, b| {
        a.station_code
            .cmp(&b.station_code)
            .then(a.snapshot_time.cmp(&b.snapshot_time))
    });
    merged
}
