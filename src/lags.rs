use crate::snapshots::{SnapshotRecord, SnapshotStore, StoreError};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Maximum distance between a snapshot and a lag target.
pub const LAG_TOLERANCE_MINUTES: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LagOffset {
    Step1,
    Step2,
    Step3,
    Step6,
    Step12,
    Step138,
    Step144,
}

impl LagOffset {
    /// Most recent first.
    pub const ALL: [LagOffset; 7] = [
        LagOffset::Step1,
        LagOffset::Step2,
        LagOffset::Step3,
        LagOffset::Step6,
        LagOffset::Step12,
        LagOffset::Step138,
        LagOffset::Step144,
    ];

    /// Offsets within the last two hours.
    pub const RECENT: [LagOffset; 5] = [
        LagOffset::Step1,
        LagOffset::Step2,
        LagOffset::Step3,
        LagOffset::Step6,
        LagOffset::Step12,
    ];

    pub fn minutes(self) -> i64 {
        match self {
            LagOffset::Step1 => 10,
            LagOffset::Step2 => 20,
            LagOffset::Step3 => 30,
            LagOffset::Step6 => 60,
            LagOffset::Step12 => 120,
            LagOffset::Step138 => 1380,
            LagOffset::Step144 => 1440,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LagOffset::Step1 => "ocu_lag_1",
            LagOffset::Step2 => "ocu_lag_2",
            LagOffset::Step3 => "ocu_lag_3",
            LagOffset::Step6 => "ocu_lag_6",
            LagOffset::Step12 => "ocu_lag_12",
            LagOffset::Step138 => "ocu_lag_138",
            LagOffset::Step144 => "ocu_lag_144",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Occupancy per lag offset.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LagSet {
    values: [Option<f64>; 7],
}

impl LagSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, offset: LagOffset, value: f64) -> Self {
        self.set(offset, Some(value));
        self
    }

    pub fn set(&mut self, offset: LagOffset, value: Option<f64>) {
        self.values[offset.index()] = value;
    }

    pub fn get(&self, offset: LagOffset) -> Option<f64> {
        self.values[offset.index()]
    }

    pub fn is_complete(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Named view keyed by feature name, used for JSON output.
    pub fn named(&self) -> BTreeMap<&'static str, Option<f64>> {
        LagOffset::ALL
            .iter()
            .map(|offset| (offset.name(), self.get(*offset)))
            .collect()
    }

    /// Fills gaps from the nearest more recent value, `current` being the
    /// most recent anchor. Older values are never copied forward.
    fn forward_fill(&mut self, current: Option<f64>) {
        let mut anchor = current;
        for offset in LagOffset::ALL {
            match self.get(offset) {
                Some(value) => anchor = Some(value),
                None => self.set(offset, anchor),
            }
        }
    }
}

impl Serialize for LagSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.named().serialize(serializer)
    }
}

#[derive(Debug, Error)]
pub enum LagError {
    #[error("insufficient history for station {0}")]
    InsufficientData(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct LagResolver {
    store: Arc<dyn SnapshotStore>,
    tz: Tz,
}

impl LagResolver {
    pub fn new(store: Arc<dyn SnapshotStore>, tz: Tz) -> Self {
        Self { store, tz }
    }

    /// Local dates touched by any tolerance window around a lag target.
    pub fn required_dates(&self, reference: DateTime<Utc>) -> BTreeSet<NaiveDate> {
        self.window_dates(reference, &LagOffset::ALL)
    }

    /// The reference date plus every date touched by the short offsets.
    /// Each of these partitions must exist for a lookup to succeed.
    pub fn recent_dates(&self, reference: DateTime<Utc>) -> BTreeSet<NaiveDate> {
        let mut dates = self.window_dates(reference, &LagOffset::RECENT);
        dates.insert(reference.with_timezone(&self.tz).date_naive());
        dates
    }

    fn window_dates(&self, reference: DateTime<Utc>, offsets: &[LagOffset]) -> BTreeSet<NaiveDate> {
        let tolerance = Duration::minutes(LAG_TOLERANCE_MINUTES);
        offsets
            .iter()
            .flat_map(|offset| {
                let target = reference - Duration::minutes(offset.minutes());
                [target - tolerance, target + tolerance]
            })
            .map(|instant| instant.with_timezone(&self.tz).date_naive())
            .collect()
    }

    /// Resolves every offset for `station_id` at `reference`.
    ///
    /// Fails when a recent partition is missing, or when a gap remains with
    /// nothing more recent to fill it from.
    pub fn resolve(
        &self,
        station_id: &str,
        reference: DateTime<Utc>,
        current: Option<f64>,
    ) -> Result<LagSet, LagError> {
        let recent = self.recent_dates(reference);
        let required = self.required_dates(reference);
        let mut rows: Vec<SnapshotRecord> = Vec::new();
        for date in required.union(&recent) {
            match self.store.station_rows(*date, station_id, None)? {
                Some(day) => rows.extend(day.into_iter().filter(|r| r.capacity > 0)),
                None if recent.contains(date) => {
                    debug!(station_id, %date, "Recent snapshot partition missing for lag lookup");
                    return Err(LagError::InsufficientData(station_id.to_string()));
                }
                None => {}
            }
        }

        let mut lags = LagSet::new();
        for offset in LagOffset::ALL {
            let target = reference - Duration::minutes(offset.minutes());
            lags.set(offset, closest_occupancy(&rows, target));
        }
        lags.forward_fill(current);

        if lags.is_complete() {
            Ok(lags)
        } else {
            Err(LagError::InsufficientData(station_id.to_string()))
        }
    }
}

fn closest_occupancy(rows: &[SnapshotRecord], target: DateTime<Utc>) -> Option<f64> {
    let tolerance = Duration::minutes(LAG_TOLERANCE_MINUTES);
    rows.iter()
        .filter_map(|row| {
            let distance = (row.snapshot_time - target).abs();
            (distance <= tolerance).then_some((distance, row.snapshot_time, row))
        })
        .min_by_key(|(distance, at, _)| (*distance, *at))
        .and_then(|(_, _, row)| row.occupancy())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshots::MemorySnapshotStore;
    use crate::snapshots::test_support::record;
    use chrono::TimeZone;
    use chrono_tz::America::Mexico_City;

    // 2025-03-07 12:00 local.
    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 7, 18, 0, 0).unwrap()
    }

    fn local_date(at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&Mexico_City).date_naive()
    }

    fn seed(store: &MemorySnapshotStore, minutes_ago: &[(i64, u32)]) {
        for (minutes, bikes) in minutes_ago {
            let at = reference() - Duration::minutes(*minutes);
            store
                .append(local_date(at), vec![record("041", at, *bikes, 20)])
                .expect("memory append");
        }
    }

    fn resolver(store: Arc<MemorySnapshotStore>) -> LagResolver {
        LagResolver::new(store, Mexico_City)
    }

    #[test]
    fn picks_closest_row_within_tolerance() -> Result<(), LagError> {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(
            &store,
            &[
                (7, 2),
                (11, 4),
                (20, 6),
                (30, 8),
                (60, 10),
                (120, 12),
                (1380, 14),
                (1440, 16),
            ],
        );

        let lags = resolver(store).resolve("id-041", reference(), None)?;

        assert_eq!(lags.get(LagOffset::Step1), Some(0.2));
        assert_eq!(lags.get(LagOffset::Step2), Some(0.3));
        assert_eq!(lags.get(LagOffset::Step144), Some(0.8));
        Ok(())
    }

    #[test]
    fn tie_prefers_earliest_row() -> Result<(), LagError> {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(8, 2), (12, 4)]);

        let lags = resolver(store).resolve("id-041", reference(), Some(0.5))?;

        assert_eq!(lags.get(LagOffset::Step1), Some(0.2));
        Ok(())
    }

    #[test]
    fn missing_two_hour_lag_is_filled_from_one_hour() -> Result<(), LagError> {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(10, 4), (20, 5), (30, 6), (60, 9), (1380, 3), (1440, 2)]);

        let lags = resolver(store).resolve("id-041", reference(), Some(0.5))?;

        assert_eq!(lags.get(LagOffset::Step6), Some(0.45));
        assert_eq!(lags.get(LagOffset::Step12), Some(0.45));
        assert_eq!(lags.get(LagOffset::Step138), Some(0.15));
        Ok(())
    }

    #[test]
    fn fill_never_copies_older_values_forward() -> Result<(), LagError> {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(60, 9)]);

        let lags = resolver(store).resolve("id-041", reference(), Some(0.5))?;

        assert_eq!(lags.get(LagOffset::Step1), Some(0.5));
        assert_eq!(lags.get(LagOffset::Step3), Some(0.5));
        assert_eq!(lags.get(LagOffset::Step6), Some(0.45));
        assert_eq!(lags.get(LagOffset::Step144), Some(0.45));
        Ok(())
    }

    #[test]
    fn leading_gap_without_current_is_insufficient() {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(60, 9)]);

        let result = resolver(store).resolve("id-041", reference(), None);

        assert!(matches!(result, Err(LagError::InsufficientData(_))));
    }

    #[test]
    fn no_partition_is_insufficient_even_with_current() {
        let store = Arc::new(MemorySnapshotStore::new());

        let result = resolver(store).resolve("id-041", reference(), Some(0.5));

        assert!(matches!(result, Err(LagError::InsufficientData(_))));
    }

    #[test]
    fn only_day_old_rows_are_insufficient() {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(1380, 8), (1440, 8)]);

        let result = resolver(store).resolve("id-041", reference(), Some(0.5));

        assert!(matches!(result, Err(LagError::InsufficientData(_))));
    }

    #[test]
    fn missing_previous_day_is_insufficient_after_midnight() {
        let store = Arc::new(MemorySnapshotStore::new());
        // 00:05 local; the 20-minute lag and older fall on the previous day.
        let reference = Utc.with_ymd_and_hms(2025, 3, 7, 6, 5, 0).unwrap();
        store
            .append(
                local_date(reference),
                vec![record("041", reference - Duration::minutes(2), 4, 20)],
            )
            .expect("memory append");

        let result = resolver(store).resolve("id-041", reference, Some(0.5));

        assert!(matches!(result, Err(LagError::InsufficientData(_))));
    }

    #[test]
    fn station_without_rows_takes_current_value() -> Result<(), LagError> {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(10, 4)]);

        let lags = resolver(store).resolve("id-999", reference(), Some(0.25))?;

        assert!(LagOffset::ALL.iter().all(|o| lags.get(*o) == Some(0.25)));
        Ok(())
    }

    #[test]
    fn resolution_is_idempotent() -> Result<(), LagError> {
        let store = Arc::new(MemorySnapshotStore::new());
        seed(&store, &[(10, 4), (60, 9), (1440, 2)]);
        let resolver = resolver(store);

        let first = resolver.resolve("id-041", reference(), Some(0.5))?;
        let second = resolver.resolve("id-041", reference(), Some(0.5))?;

        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn required_dates_span_midnight() {
        let store = Arc::new(MemorySnapshotStore::new());
        // 00:05 local on 2025-03-07.
        let reference = Utc.with_ymd_and_hms(2025, 3, 7, 6, 5, 0).unwrap();

        let dates = resolver(store).required_dates(reference);

        let expected: BTreeSet<NaiveDate> = [5, 6, 7]
            .into_iter()
            .filter_map(|d| NaiveDate::from_ymd_opt(2025, 3, d))
            .collect();
        assert_eq!(dates, expected);

        let recent: BTreeSet<NaiveDate> = [6, 7]
            .into_iter()
            .filter_map(|d| NaiveDate::from_ymd_opt(2025, 3, d))
            .collect();
        assert_eq!(resolver(Arc::new(MemorySnapshotStore::new())).recent_dates(reference), recent);
    }
}
