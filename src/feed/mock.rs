use crate::feed::{FeedError, FeedSource, StationInformation, StationStatus};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// In-memory feed used by tests and local runs without network access.
#[derive(Debug, Default)]
pub struct MockFeedSource {
    information: RwLock<Vec<StationInformation>>,
    status: RwLock<Vec<StationStatus>>,
    failing: AtomicBool,
    information_calls: AtomicUsize,
    status_calls: AtomicUsize,
}

impl MockFeedSource {
    pub fn new(information: Vec<StationInformation>, status: Vec<StationStatus>) -> Self {
        Self {
            information: RwLock::new(information),
            status: RwLock::new(status),
            ..Self::default()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    pub fn set_status(&self, status: Vec<StationStatus>) -> Result<(), FeedError> {
        let mut guard = self.status.write().map_err(|_| FeedError::StateLock)?;
        *guard = status;
        Ok(())
    }

    pub fn information_calls(&self) -> usize {
        self.information_calls.load(Ordering::Relaxed)
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::Relaxed)
    }

    fn check_failing(&self) -> Result<(), FeedError> {
        if self.failing.load(Ordering::Relaxed) {
            Err(FeedError::Unavailable("mock feed failure".to_string()))
        } else {
            Ok(())
        }
    }
}

impl FeedSource for MockFeedSource {
    async fn station_information(&self) -> Result<Vec<StationInformation>, FeedError> {
        self.information_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failing()?;
        let guard = self.information.read().map_err(|_| FeedError::StateLock)?;
        Ok(guard.clone())
    }

    async fn station_status(&self) -> Result<Vec<StationStatus>, FeedError> {
        self.status_calls.fetch_add(1, Ordering::Relaxed);
        self.check_failing()?;
        let guard = self.status.read().map_err(|_| FeedError::StateLock)?;
        Ok(guard.clone())
    }
}

pub fn information(station_id: &str, code: &str, capacity: u32) -> StationInformation {
    StationInformation {
        station_id: station_id.to_string(),
        short_name: Some(code.to_string()),
        name: format!("Station {code}"),
        lat: 19.43,
        lon: -99.13,
        capacity,
    }
}

pub fn status(station_id: &str, bikes: u32, docks: u32) -> StationStatus {
    StationStatus {
        station_id: station_id.to_string(),
        num_bikes_available: bikes,
        num_bikes_disabled: 0,
        num_docks_available: docks,
        num_docks_disabled: 0,
        is_installed: true,
        is_renting: true,
        is_returning: true,
        last_reported: Some(1_760_000_000),
    }
}
