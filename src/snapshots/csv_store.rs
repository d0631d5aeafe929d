use crate::snapshots::{SnapshotRecord, SnapshotStore, StoreError, merge_records, partition_path};
use chrono::NaiveDate;
use moka::sync::Cache;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::debug;

const DAY_CACHE_CAPACITY: u64 = 10;

/// Day partitions stored as CSV files under a hive-style directory tree.
///
/// Parsed partitions are kept in a small bounded cache; writes invalidate the
/// affected day.
pub struct CsvSnapshotStore {
    root: PathBuf,
    days: Cache<NaiveDate, Arc<Vec<SnapshotRecord>>>,
    write_lock: Mutex<()>,
}

impl CsvSnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            days: Cache::new(DAY_CACHE_CAPACITY),
            write_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn read_partition(path: &Path) -> Result<Vec<SnapshotRecord>, StoreError> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut rows = Vec::new();
        for row in reader.deserialize() {
            rows.push(row?);
        }
        Ok(rows)
    }

    fn write_partition(path: &Path, rows: &[SnapshotRecord]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&tmp)?;
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl SnapshotStore for CsvSnapshotStore {
    fn load_day(&self, date: NaiveDate) -> Result<Option<Arc<Vec<SnapshotRecord>>>, StoreError> {
        if let Some(rows) = self.days.get(&date) {
            return Ok(Some(rows));
        }
        let path = partition_path(&self.root, date);
        if !path.exists() {
            return Ok(None);
        }
        let rows = Arc::new(Self::read_partition(&path)?);
        debug!("Loaded partition {} ({} rows)", path.display(), rows.len());
        self.days.insert(date, Arc::clone(&rows));
        Ok(Some(rows))
    }

    fn append(&self, date: NaiveDate, records: Vec<SnapshotRecord>) -> Result<usize, StoreError> {
        let _guard = self.write_lock.lock().map_err(|_| StoreError::StateLock)?;
        let path = partition_path(&self.root, date);
        let existing = if path.exists() {
            Self::read_partition(&path)?
        } else {
            Vec::new()
        };
        let merged = merge_records(&existing, records);
        Self::write_partition(&path, &merged)?;
        self.days.invalidate(&date);
        Ok(merged.len())
    }
}
