use crate::snapshots::{SnapshotRecord, SnapshotStore, StoreError};
use chrono::{DateTime, Datelike, Days, DurationRound, NaiveDate, NaiveTime, TimeDelta, Utc};
use chrono_tz::Tz;
use moka::sync::Cache;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const TODAY_TTL: Duration = Duration::from_secs(600);
const DAILY_TTL: Duration = Duration::from_secs(86_400);
const MAX_ENTRIES: u64 = 2_000;
const BUCKET_MINUTES: i64 = 10;
/// How far back `yesterday` searches for a partition.
const YESTERDAY_LOOKBACK_DAYS: u64 = 7;
const AVERAGE_WINDOW_DAYS: u64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimeBucket {
    pub snapshot_time: DateTime<Utc>,
    pub capacity: u32,
    pub bikes_available: u32,
    pub bikes_disabled: u32,
    pub docks_available: u32,
    pub docks_disabled: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DaySeries {
    pub station_code: String,
    pub date: NaiveDate,
    pub buckets: Vec<TimeBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BucketStats {
    pub avg_bikes: f64,
    /// Sample standard deviation; absent with a single sample.
    pub std_bikes: Option<f64>,
    pub min_bikes: u32,
    pub max_bikes: u32,
    pub sample_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageRow {
    pub time_of_day: String,
    pub weekday: Option<BucketStats>,
    pub weekend: Option<BucketStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AverageProfile {
    pub station_code: String,
    pub rows: Vec<AverageRow>,
}

type DayKey = (NaiveDate, String);

pub struct HistoryService {
    store: Arc<dyn SnapshotStore>,
    tz: Tz,
    today: Cache<DayKey, Arc<DaySeries>>,
    yesterday: Cache<DayKey, Arc<DaySeries>>,
    averages: Cache<DayKey, Arc<AverageProfile>>,
}

impl HistoryService {
    pub fn new(store: Arc<dyn SnapshotStore>, tz: Tz) -> Self {
        Self {
            store,
            tz,
            today: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(TODAY_TTL)
                .build(),
            yesterday: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(DAILY_TTL)
                .build(),
            averages: Cache::builder()
                .max_capacity(MAX_ENTRIES)
                .time_to_live(DAILY_TTL)
                .build(),
        }
    }

    fn local_date(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.tz).date_naive()
    }

    /// Today's 10-minute series, or `None` without data for the station.
    pub fn today(
        &self,
        station_code: &str,
        station_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Arc<DaySeries>>, StoreError> {
        let date = self.local_date(now);
        let key = (date, station_code.to_string());
        if let Some(series) = self.today.get(&key) {
            return Ok(Some(series));
        }
        let Some(series) = self.day_series(station_code, station_id, date)? else {
            return Ok(None);
        };
        self.today.insert(key, Arc::clone(&series));
        Ok(Some(series))
    }

    /// Series of the most recent partition within the last week, today excluded.
    pub fn yesterday(
        &self,
        station_code: &str,
        station_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Arc<DaySeries>>, StoreError> {
        let today = self.local_date(now);
        let key = (today, station_code.to_string());
        if let Some(series) = self.yesterday.get(&key) {
            return Ok(Some(series));
        }
        for days_ago in 1..=YESTERDAY_LOOKBACK_DAYS {
            let Some(date) = today.checked_sub_days(Days::new(days_ago)) else {
                break;
            };
            if self.store.load_day(date)?.is_none() {
                continue;
            }
            let Some(series) = self.day_series(station_code, station_id, date)? else {
                return Ok(None);
            };
            self.yesterday.insert(key, Arc::clone(&series));
            return Ok(Some(series));
        }
        Ok(None)
    }

    /// Weekday and weekend statistics per local 10-minute slot over the last 30 days.
    pub fn average(
        &self,
        station_code: &str,
        station_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Arc<AverageProfile>>, StoreError> {
        let today = self.local_date(now);
        let key = (today, station_code.to_string());
        if let Some(profile) = self.averages.get(&key) {
            return Ok(Some(profile));
        }

        let mut weekday: BTreeMap<NaiveTime, Vec<u32>> = BTreeMap::new();
        let mut weekend: BTreeMap<NaiveTime, Vec<u32>> = BTreeMap::new();
        for days_ago in 1..=AVERAGE_WINDOW_DAYS {
            let Some(date) = today.checked_sub_days(Days::new(days_ago)) else {
                break;
            };
            let Some(rows) = self.store.station_rows(date, station_id, None)? else {
                continue;
            };
            let target = if date.weekday().num_days_from_monday() < 5 {
                &mut weekday
            } else {
                &mut weekend
            };
            for row in &rows {
                if let Some(slot) = self.local_slot(row.snapshot_time) {
                    target.entry(slot).or_default().push(row.bikes_available);
                }
            }
        }
        if weekday.is_empty() && weekend.is_empty() {
            return Ok(None);
        }

        let mut slots: Vec<NaiveTime> = weekday.keys().chain(weekend.keys()).copied().collect();
        slots.sort();
        slots.dedup();
        let rows = slots
            .into_iter()
            .map(|slot| AverageRow {
                time_of_day: slot.format("%H:%M").to_string(),
                weekday: weekday.get(&slot).and_then(|v| stats(v)),
                weekend: weekend.get(&slot).and_then(|v| stats(v)),
            })
            .collect();
        let profile = Arc::new(AverageProfile {
            station_code: station_code.to_string(),
            rows,
        });
        self.averages.insert(key, Arc::clone(&profile));
        Ok(Some(profile))
    }

    fn local_slot(&self, at: DateTime<Utc>) -> Option<NaiveTime> {
        let local = at
            .with_timezone(&self.tz)
            .duration_trunc(TimeDelta::minutes(BUCKET_MINUTES))
            .ok()?;
        Some(local.time())
    }

    fn day_series(
        &self,
        station_code: &str,
        station_id: &str,
        date: NaiveDate,
    ) -> Result<Option<Arc<DaySeries>>, StoreError> {
        let Some(rows) = self.store.station_rows(date, station_id, None)? else {
            return Ok(None);
        };
        let buckets = bucketize(&rows);
        if buckets.is_empty() {
            return Ok(None);
        }
        debug!(station_code, %date, buckets = buckets.len(), "Built day series");
        Ok(Some(Arc::new(DaySeries {
            station_code: station_code.to_string(),
            date,
            buckets,
        })))
    }
}

/// Groups rows into 10-minute buckets keeping the last row of each, then
/// fills interior gaps with zero counts and the last known capacity.
pub fn bucketize(rows: &[SnapshotRecord]) -> Vec<TimeBucket> {
    let step = TimeDelta::minutes(BUCKET_MINUTES);
    let mut latest: BTreeMap<DateTime<Utc>, &SnapshotRecord> = BTreeMap::new();
    for row in rows {
        if let Ok(bucket) = row.snapshot_time.duration_trunc(step) {
            let replace = latest
                .get(&bucket)
                .is_none_or(|current| current.snapshot_time <= row.snapshot_time);
            if replace {
                latest.insert(bucket, row);
            }
        }
    }
    let (Some(first), Some(last)) = (
        latest.keys().next().copied(),
        latest.keys().next_back().copied(),
    ) else {
        return Vec::new();
    };

    let mut buckets = Vec::new();
    let mut capacity = 0;
    let mut at = first;
    while at <= last {
        let bucket = match latest.get(&at) {
            Some(row) => {
                capacity = row.capacity;
                TimeBucket {
                    snapshot_time: at,
                    capacity: row.capacity,
                    bikes_available: row.bikes_available,
                    bikes_disabled: row.bikes_disabled,
                    docks_available: row.docks_available,
                    docks_disabled: row.docks_disabled,
                }
            }
            None => TimeBucket {
                snapshot_time: at,
                capacity,
                bikes_available: 0,
                bikes_disabled: 0,
                docks_available: 0,
                docks_disabled: 0,
            },
        };
        buckets.push(bucket);
        at += step;
    }
    buckets
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn stats(samples: &[u32]) -> Option<BucketStats> {
    let count = samples.len();
    let min = *samples.iter().min()?;
    let max = *samples.iter().max()?;
    let mean = samples.iter().map(|v| f64::from(*v)).sum::<f64>() / count as f64;
    let std = (count > 1).then(|| {
        let variance = samples
            .iter()
            .map(|v| (f64::from(*v) - mean).powi(2))
            .sum::<f64>()
            / (count - 1) as f64;
        round1(variance.sqrt())
    });
    Some(BucketStats {
        avg_bikes: round1(mean),
        std_bikes: std,
        min_bikes: min,
        max_bikes: max,
        sample_count: count,
    })
}
