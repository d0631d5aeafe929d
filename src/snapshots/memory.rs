use crate::snapshots::{SnapshotRecord, SnapshotStore, StoreError, merge_records};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Snapshot store kept entirely in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    days: RwLock<BTreeMap<NaiveDate, Arc<Vec<SnapshotRecord>>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dates(&self) -> Result<Vec<NaiveDate>, StoreError> {
        let guard = self.days.read().map_err(|_| StoreError::StateLock)?;
        Ok(guard.keys().copied().collect())
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn load_day(&self, date: NaiveDate) -> Result<Option<Arc<Vec<SnapshotRecord>>>, StoreError> {
        let guard = self.days.read().map_err(|_| StoreError::StateLock)?;
        Ok(guard.get(&date).cloned())
    }

    fn append(&self, date: NaiveDate, records: Vec<SnapshotRecord>) -> Result<usize, StoreError> {
        let mut guard = self.days.write().map_err(|_| StoreError::StateLock)?;
        let existing = guard.get(&date).map(|rows| rows.as_slice()).unwrap_or(&[]);
        let merged = merge_records(existing, records);
        let len = merged.len();
        guard.insert(date, Arc::new(merged));
        Ok(len)
    }
}
