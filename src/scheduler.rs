use crate::feed::{FeedCache, FeedSource, Station};
use crate::history::HistoryService;
use chrono::{DateTime, Days, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarmJob {
    Yesterday,
    Average,
}

impl WarmJob {
    pub const ALL: [WarmJob; 2] = [WarmJob::Yesterday, WarmJob::Average];

    /// Local time of day the job runs.
    pub fn at(self) -> NaiveTime {
        match self {
            WarmJob::Yesterday => NaiveTime::from_hms_opt(1, 0, 0),
            WarmJob::Average => NaiveTime::from_hms_opt(1, 30, 0),
        }
        .unwrap_or(NaiveTime::MIN)
    }

    fn name(self) -> &'static str {
        match self {
            WarmJob::Yesterday => "yesterday",
            WarmJob::Average => "average",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WarmReport {
    pub cached: usize,
    pub without_data: usize,
    pub failed: usize,
}

/// First instant strictly after `now` at local time `at`.
pub fn next_run(now: DateTime<Utc>, tz: Tz, at: NaiveTime) -> DateTime<Utc> {
    let local = now.with_timezone(&tz);
    let mut date = local.date_naive();
    if local.time() >= at {
        date = date.checked_add_days(Days::new(1)).unwrap_or(date);
    }
    let naive = date.and_time(at);
    match tz.from_local_datetime(&naive).earliest() {
        Some(t) => t.with_timezone(&Utc),
        // Skipped by a DST transition; run an hour later in local terms.
        None => tz
            .from_local_datetime(&(naive + chrono::Duration::hours(1)))
            .earliest()
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|| Utc.from_utc_datetime(&naive)),
    }
}

/// Recomputes one history view for every station with a code.
pub fn warm(
    history: &HistoryService,
    job: WarmJob,
    stations: &[Station],
    now: DateTime<Utc>,
) -> WarmReport {
    let mut report = WarmReport::default();
    for station in stations.iter().filter(|s| !s.station_code.is_empty()) {
        let code = station.station_code.as_str();
        let id = station.station_id.as_str();
        let outcome = match job {
            WarmJob::Yesterday => history.yesterday(code, id, now).map(|s| s.is_some()),
            WarmJob::Average => history.average(code, id, now).map(|p| p.is_some()),
        };
        match outcome {
            Ok(true) => report.cached += 1,
            Ok(false) => report.without_data += 1,
            Err(e) => {
                report.failed += 1;
                warn!(station_code = code, job = job.name(), "Cache warm-up failed: {}", e);
            }
        }
    }
    report
}

async fn run_job<S: FeedSource>(
    feed: &FeedCache<S>,
    history: &Arc<HistoryService>,
    job: WarmJob,
) {
    let stations = match feed.all_stations().await {
        Ok(stations) => stations,
        Err(e) => {
            error!(job = job.name(), "Cache warm-up skipped, feed unavailable: {}", e);
            return;
        }
    };
    let history = Arc::clone(history);
    let result =
        tokio::task::spawn_blocking(move || warm(&history, job, &stations, Utc::now())).await;
    match result {
        Ok(report) => info!(
            job = job.name(),
            cached = report.cached,
            without_data = report.without_data,
            failed = report.failed,
            "Cache warm-up finished"
        ),
        Err(e) => error!(job = job.name(), "Cache warm-up task failed: {}", e),
    }
}

/// Sleeps until the next job is due, runs it, repeats.
pub async fn run_scheduler<S: FeedSource + 'static>(
    feed: Arc<FeedCache<S>>,
    history: Arc<HistoryService>,
    tz: Tz,
) {
    info!("Cache warm-up scheduler started");
    loop {
        let now = Utc::now();
        let Some((job, due)) = WarmJob::ALL
            .iter()
            .map(|job| (*job, next_run(now, tz, job.at())))
            .min_by_key(|(_, due)| *due)
        else {
            return;
        };
        let wait = (due - now).to_std().unwrap_or_default();
        tokio::time::sleep(wait).await;
        run_job(&feed, &history, job).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshots::test_support::record;
    use crate::snapshots::{MemorySnapshotStore, SnapshotStore};
    use chrono_tz::America::Mexico_City;

    fn station(code: &str) -> Station {
        Station {
            station_code: code.to_string(),
            station_id: format!("id-{code}"),
            name: format!("Station {code}"),
            latitude: 19.43,
            longitude: -99.13,
            capacity: 20,
            bikes_available: 5,
            bikes_disabled: 0,
            docks_available: 15,
            docks_disabled: 0,
            is_installed: true,
            is_renting: true,
            is_returning: true,
            last_reported: None,
        }
    }

    #[test]
    fn next_run_is_later_today_or_tomorrow() {
        let at = WarmJob::Yesterday.at();
        // 00:30 local.
        let before = Utc.with_ymd_and_hms(2025, 3, 5, 6, 30, 0).unwrap();
        assert_eq!(
            next_run(before, Mexico_City, at),
            Utc.with_ymd_and_hms(2025, 3, 5, 7, 0, 0).unwrap()
        );
        // Exactly 01:00 local schedules the following day.
        let on_time = Utc.with_ymd_and_hms(2025, 3, 5, 7, 0, 0).unwrap();
        assert_eq!(
            next_run(on_time, Mexico_City, at),
            Utc.with_ymd_and_hms(2025, 3, 6, 7, 0, 0).unwrap()
        );
    }

    #[test]
    fn warm_counts_cached_and_empty_stations() -> Result<(), Box<dyn std::error::Error>> {
        let store = Arc::new(MemorySnapshotStore::new());
        let at = Utc.with_ymd_and_hms(2025, 3, 4, 18, 0, 0).unwrap();
        store.append(
            at.with_timezone(&Mexico_City).date_naive(),
            vec![record("041", at, 5, 20)],
        )?;
        let history = HistoryService::new(store, Mexico_City);
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 7, 0, 0).unwrap();
        let stations = vec![station("041"), station("042"), station("")];

        let report = warm(&history, WarmJob::Yesterday, &stations, now);

        assert_eq!(
            report,
            WarmReport {
                cached: 1,
                without_data: 1,
                failed: 0
            }
        );
        let report = warm(&history, WarmJob::Average, &stations, now);
        assert_eq!(report.cached, 1);
        Ok(())
    }
}
