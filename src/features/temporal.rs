use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Timelike};
use serde::Deserialize;
use std::collections::HashSet;
use std::f64::consts::PI;
use std::path::Path;

/// Local time-of-day range during which the system is active.
///
/// `start > end` means the window spans midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperatingWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl Default for OperatingWindow {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN),
            end: NaiveTime::from_hms_opt(0, 30, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

impl OperatingWindow {
    /// Both bounds inclusive at minute resolution, so 00:30:45 is still inside
    /// a window ending at 00:30.
    pub fn contains(&self, time: NaiveTime) -> bool {
        let time = time
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(time);
        if self.start <= self.end {
            time >= self.start && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }
}

/// Dates flagged as public holidays.
#[derive(Debug, Clone, Default)]
pub struct HolidayCalendar {
    dates: HashSet<NaiveDate>,
}

#[derive(Debug, Deserialize)]
struct HolidayRow {
    date: NaiveDate,
}

impl HolidayCalendar {
    pub fn new(dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        Self {
            dates: dates.into_iter().collect(),
        }
    }

    /// Reads a CSV with a `date` column (`YYYY-MM-DD`); extra columns are ignored.
    pub fn from_csv(path: &Path) -> Result<Self, csv::Error> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut dates = HashSet::new();
        for row in reader.deserialize::<HolidayRow>() {
            dates.insert(row?.date);
        }
        Ok(Self { dates })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.dates.contains(&date)
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemporalFeatures {
    pub time_sin: f64,
    pub time_cos: f64,
    pub day_sin: f64,
    pub day_cos: f64,
    pub is_weekend: bool,
    pub is_holiday: bool,
    pub is_operating: bool,
    /// 0 = Monday.
    pub weekday: u32,
    pub hour: u32,
}

impl TemporalFeatures {
    pub fn at<Tz: TimeZone>(
        local: &chrono::DateTime<Tz>,
        holidays: &HolidayCalendar,
        window: &OperatingWindow,
    ) -> Self {
        let minute_of_day = f64::from(local.hour() * 60 + local.minute());
        let weekday = local.weekday().num_days_from_monday();
        let time_angle = 2.0 * PI * minute_of_day / 1440.0;
        let day_angle = 2.0 * PI * f64::from(weekday) / 7.0;
        Self {
            time_sin: time_angle.sin(),
            time_cos: time_angle.cos(),
            day_sin: day_angle.sin(),
            day_cos: day_angle.cos(),
            is_weekend: weekday >= 5,
            is_holiday: holidays.contains(local.date_naive()),
            is_operating: window.contains(local.time()),
            weekday,
            hour: local.hour(),
        }
    }
}
