use crate::features::temporal::{OperatingWindow, TemporalFeatures};
use crate::features::{FeatureError, FeatureInputs, WeatherValues, assemble};
use crate::feed::{FeedCache, FeedError, FeedSource, Station};
use crate::lags::{LagError, LagResolver, LagSet};
use crate::model::{Horizon, ModelFamily, ModelRuntime, bikes_from_occupancy};
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionStatus {
    Success,
    StationNotFound,
    InsufficientData,
    ModelNotLoaded,
    InvalidFeatures,
    FeedUnavailable,
}

#[derive(Debug, Error)]
pub enum PredictError {
    #[error("station {0} not found")]
    StationNotFound(String),
    #[error("insufficient data: {0}")]
    InsufficientData(String),
    #[error("no {} model loaded", .0.code())]
    ModelNotLoaded(ModelFamily),
    #[error("invalid features: {0}")]
    InvalidFeatures(FeatureError),
    #[error(transparent)]
    Feed(#[from] FeedError),
}

impl PredictError {
    pub fn status(&self) -> PredictionStatus {
        match self {
            PredictError::StationNotFound(_) => PredictionStatus::StationNotFound,
            PredictError::Feed(_) => PredictionStatus::FeedUnavailable,
            PredictError::InsufficientData(_) => PredictionStatus::InsufficientData,
            PredictError::ModelNotLoaded(_) => PredictionStatus::ModelNotLoaded,
            PredictError::InvalidFeatures(_) => PredictionStatus::InvalidFeatures,
        }
    }
}

impl From<LagError> for PredictError {
    fn from(e: LagError) -> Self {
        match e {
            LagError::InsufficientData(id) => PredictError::InsufficientData(format!("lags for {id}")),
            LagError::Store(e) => PredictError::InsufficientData(e.to_string()),
        }
    }
}

impl From<FeatureError> for PredictError {
    fn from(e: FeatureError) -> Self {
        match e {
            FeatureError::InsufficientData(lag) => {
                PredictError::InsufficientData(format!("missing {lag}"))
            }
            other => PredictError::InvalidFeatures(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HorizonPrediction {
    pub horizon_minutes: i64,
    pub timestamp_utc: DateTime<Utc>,
    pub occupancy_predicted: f64,
    pub bikes_predicted: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Forecast {
    pub station_code: String,
    pub status: PredictionStatus,
    pub current_bikes: u32,
    pub capacity: u32,
    pub horizons: Vec<HorizonPrediction>,
}

impl Forecast {
    /// Repeats the live bike count across every horizon.
    pub fn flat(station: &Station, status: PredictionStatus, now: DateTime<Utc>) -> Self {
        let occupancy = station.occupancy().unwrap_or(0.0);
        let horizons = Horizon::ALL
            .iter()
            .map(|h| HorizonPrediction {
                horizon_minutes: h.minutes(),
                timestamp_utc: now + Duration::minutes(h.minutes()),
                occupancy_predicted: occupancy,
                bikes_predicted: station.bikes_available.min(station.capacity),
            })
            .collect();
        Self {
            station_code: station.station_code.clone(),
            status,
            current_bikes: station.bikes_available,
            capacity: station.capacity,
            horizons,
        }
    }

    pub fn bikes_at(&self, horizon: Horizon) -> Option<u32> {
        self.horizons
            .iter()
            .find(|h| h.horizon_minutes == horizon.minutes())
            .map(|h| h.bikes_predicted)
    }
}

/// Everything after station resolution; holds no per-request state.
pub struct Predictor {
    lags: LagResolver,
    runtime: Arc<ModelRuntime>,
    tz: Tz,
    window: OperatingWindow,
}

impl Predictor {
    pub fn new(
        lags: LagResolver,
        runtime: Arc<ModelRuntime>,
        tz: Tz,
        window: OperatingWindow,
    ) -> Self {
        Self {
            lags,
            runtime,
            tz,
            window,
        }
    }

    pub fn runtime(&self) -> &ModelRuntime {
        &self.runtime
    }

    /// Lags for a live station, using its current occupancy as the anchor.
    pub fn resolve_lags(&self, station: &Station, now: DateTime<Utc>) -> Result<LagSet, LagError> {
        self.lags
            .resolve(&station.station_id, now, station.occupancy())
    }

    pub fn forecast(
        &self,
        station: &Station,
        family: ModelFamily,
        weather: WeatherValues,
        now: DateTime<Utc>,
    ) -> Result<Forecast, PredictError> {
        let lags = self.resolve_lags(station, now)?;

        // Zero-capacity stations have no occupancy and fail validation.
        let occupancy = station.occupancy().unwrap_or(f64::NAN);
        let local = now.with_timezone(&self.tz);
        let temporal = TemporalFeatures::at(&local, self.runtime.holidays(), &self.window);
        let features = assemble(
            &FeatureInputs {
                station_code: &station.station_code,
                occupancy,
                capacity: station.capacity,
                lags: &lags,
                temporal,
                weather,
            },
            self.runtime.enrichment(),
        )?;

        if !self.runtime.has_family(family) {
            return Err(PredictError::ModelNotLoaded(family));
        }

        let horizons = Horizon::ALL
            .iter()
            .map(|&horizon| {
                let at = now + Duration::minutes(horizon.minutes());
                if !self.window.contains(at.with_timezone(&self.tz).time()) {
                    debug!(horizon = horizon.minutes(), "Horizon outside operating window");
                    return HorizonPrediction {
                        horizon_minutes: horizon.minutes(),
                        timestamp_utc: at,
                        occupancy_predicted: 0.0,
                        bikes_predicted: 0,
                    };
                }
                let (occupancy_predicted, bikes_predicted) = match self.runtime.predict_horizon(
                    family,
                    &features,
                    horizon,
                    occupancy,
                    station.capacity,
                ) {
                    Ok(outcome) => (outcome.occupancy, outcome.bikes),
                    Err(e) => {
                        warn!(
                            station_code = %station.station_code,
                            horizon = horizon.minutes(),
                            "Inference failed, using current occupancy: {}",
                            e
                        );
                        (occupancy, bikes_from_occupancy(occupancy, station.capacity))
                    }
                };
                HorizonPrediction {
                    horizon_minutes: horizon.minutes(),
                    timestamp_utc: at,
                    occupancy_predicted,
                    bikes_predicted,
                }
            })
            .collect();

        Ok(Forecast {
            station_code: station.station_code.clone(),
            status: PredictionStatus::Success,
            current_bikes: station.bikes_available,
            capacity: station.capacity,
            horizons,
        })
    }
}

/// Resolves `code` against the live feed and forecasts it.
///
/// Only an unknown station or an unreachable feed is an error; every other
/// failure yields [`Forecast::flat`] carrying the failure status.
pub async fn predict_station<S: FeedSource>(
    feed: &FeedCache<S>,
    predictor: &Predictor,
    code: &str,
    family: ModelFamily,
    weather: WeatherValues,
    now: DateTime<Utc>,
) -> Result<Forecast, PredictError> {
    let station = feed
        .get_station(code)
        .await?
        .ok_or_else(|| PredictError::StationNotFound(code.to_string()))?;

    match predictor.forecast(&station, family, weather, now) {
        Ok(forecast) => Ok(forecast),
        Err(e) => {
            warn!(station_code = %station.station_code, "Prediction degraded to flat fallback: {}", e);
            Ok(Forecast::flat(&station, e.status(), now))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::mock::{MockFeedSource, information, status};
    use crate::model::forecast::Target;
    use crate::model::test_support::{ConstantModel, FailingModel};
    use crate::snapshots::test_support::record;
    use crate::snapshots::{MemorySnapshotStore, SnapshotStore};
    use chrono::TimeZone;
    use chrono_tz::America::Mexico_City;
    use std::time::Duration as StdDuration;

    // Wednesday 2025-03-05 12:00 local.
    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 5, 18, 0, 0).unwrap()
    }

    fn feed() -> FeedCache<MockFeedSource> {
        FeedCache::new(
            MockFeedSource::new(vec![information("7", "041", 20)], vec![status("7", 10, 10)]),
            StdDuration::from_secs(3600),
            StdDuration::from_secs(60),
        )
    }

    /// Snapshots for station "041" (id "7") at the given minutes before `now`.
    fn store_with(now: DateTime<Utc>, history: &[(i64, u32)]) -> Arc<MemorySnapshotStore> {
        let store = Arc::new(MemorySnapshotStore::new());
        for (minutes, bikes) in history {
            let at = now - Duration::minutes(*minutes);
            let mut row = record("041", at, *bikes, 20);
            row.station_id = "7".to_string();
            store
                .append(at.with_timezone(&Mexico_City).date_naive(), vec![row])
                .expect("memory append");
        }
        store
    }

    fn full_history() -> Vec<(i64, u32)> {
        vec![
            (10, 11),
            (20, 12),
            (30, 11),
            (60, 10),
            (120, 9),
            (1380, 8),
            (1440, 10),
        ]
    }

    fn runtime_with(raws: [f64; 3]) -> ModelRuntime {
        Horizon::ALL
            .iter()
            .zip(raws)
            .fold(ModelRuntime::empty(), |runtime, (horizon, raw)| {
                runtime.with_model(
                    ModelFamily::GradientBoosted,
                    *horizon,
                    ConstantModel {
                        raw,
                        target: Target::OccupancyDelta,
                    },
                )
            })
    }

    fn predictor(store: Arc<MemorySnapshotStore>, runtime: ModelRuntime) -> Predictor {
        Predictor::new(
            LagResolver::new(store, Mexico_City),
            Arc::new(runtime),
            Mexico_City,
            OperatingWindow::default(),
        )
    }

    #[tokio::test]
    async fn station_041_predicts_each_horizon_independently() -> Result<(), PredictError> {
        let feed = feed();
        let predictor = predictor(store_with(noon(), &full_history()), runtime_with([0.05, -0.1, 0.9]));

        let forecast = predict_station(
            &feed,
            &predictor,
            "041",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            noon(),
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::Success);
        assert_eq!(forecast.current_bikes, 10);
        assert_eq!(forecast.capacity, 20);
        assert_eq!(forecast.bikes_at(Horizon::Min20), Some(11));
        assert_eq!(forecast.bikes_at(Horizon::Min40), Some(8));
        assert_eq!(forecast.bikes_at(Horizon::Min60), Some(20));
        assert!(forecast.horizons.iter().all(|h| h.bikes_predicted <= 20));
        assert_eq!(forecast.horizons[2].timestamp_utc, noon() + Duration::minutes(60));
        Ok(())
    }

    #[tokio::test]
    async fn after_hours_forces_every_horizon_to_zero() -> Result<(), PredictError> {
        // 00:45 local.
        let now = Utc.with_ymd_and_hms(2025, 3, 5, 6, 45, 0).unwrap();
        let feed = feed();
        let predictor = predictor(store_with(now, &full_history()), runtime_with([0.3, 0.3, 0.3]));

        let forecast = predict_station(
            &feed,
            &predictor,
            "041",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            now,
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::Success);
        for horizon in &forecast.horizons {
            assert_eq!(horizon.bikes_predicted, 0);
            assert_eq!(horizon.occupancy_predicted, 0.0);
        }
        Ok(())
    }

    #[tokio::test]
    async fn missing_history_falls_back_to_current_count() -> Result<(), PredictError> {
        let feed = feed();
        let predictor = predictor(Arc::new(MemorySnapshotStore::new()), runtime_with([0.3, 0.3, 0.3]));

        let forecast = predict_station(
            &feed,
            &predictor,
            "041",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            noon(),
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::InsufficientData);
        assert!(forecast.horizons.iter().all(|h| h.bikes_predicted == 10));
        Ok(())
    }

    #[tokio::test]
    async fn unloaded_family_falls_back() -> Result<(), PredictError> {
        let feed = feed();
        let predictor = predictor(store_with(noon(), &full_history()), runtime_with([0.3, 0.3, 0.3]));

        let forecast = predict_station(
            &feed,
            &predictor,
            "41",
            ModelFamily::Recurrent,
            WeatherValues::default(),
            noon(),
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::ModelNotLoaded);
        assert!(forecast.horizons.iter().all(|h| h.bikes_predicted == 10));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_weather_falls_back() -> Result<(), PredictError> {
        let feed = feed();
        let predictor = predictor(store_with(noon(), &full_history()), runtime_with([0.3, 0.3, 0.3]));
        let weather = WeatherValues {
            temperature_2m: f64::INFINITY,
            ..WeatherValues::default()
        };

        let forecast = predict_station(
            &feed,
            &predictor,
            "041",
            ModelFamily::GradientBoosted,
            weather,
            noon(),
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::InvalidFeatures);
        Ok(())
    }

    #[tokio::test]
    async fn failing_horizon_keeps_current_occupancy_only_there() -> Result<(), PredictError> {
        let feed = feed();
        let runtime = runtime_with([0.1, 0.1, 0.1]).with_model(
            ModelFamily::GradientBoosted,
            Horizon::Min40,
            FailingModel,
        );
        let predictor = predictor(store_with(noon(), &full_history()), runtime);

        let forecast = predict_station(
            &feed,
            &predictor,
            "041",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            noon(),
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::Success);
        assert_eq!(forecast.bikes_at(Horizon::Min20), Some(12));
        assert_eq!(forecast.bikes_at(Horizon::Min40), Some(10));
        assert_eq!(forecast.bikes_at(Horizon::Min60), Some(12));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_station_is_a_hard_error() {
        let feed = feed();
        let predictor = predictor(store_with(noon(), &full_history()), runtime_with([0.0; 3]));

        let result = predict_station(
            &feed,
            &predictor,
            "999",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            noon(),
        )
        .await;

        assert!(matches!(result, Err(PredictError::StationNotFound(_))));
    }

    #[tokio::test]
    async fn seconds_past_closing_minute_stay_open() -> Result<(), PredictError> {
        // 23:50:30 local; horizons land at 00:10:30, 00:30:30 and 00:50:30.
        let now = Utc.with_ymd_and_hms(2025, 3, 6, 5, 50, 30).unwrap();
        let feed = feed();
        let predictor = predictor(store_with(now, &full_history()), runtime_with([0.05, 0.05, 0.05]));

        let forecast = predict_station(
            &feed,
            &predictor,
            "041",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            now,
        )
        .await?;

        assert_eq!(forecast.status, PredictionStatus::Success);
        assert_eq!(forecast.bikes_at(Horizon::Min20), Some(11));
        assert_eq!(forecast.bikes_at(Horizon::Min40), Some(11));
        assert_eq!(forecast.bikes_at(Horizon::Min60), Some(0));
        Ok(())
    }

    #[tokio::test]
    async fn zero_capacity_fallback_reports_no_bikes() -> Result<(), PredictError> {
        let feed = FeedCache::new(
            MockFeedSource::new(vec![information("9", "050", 0)], vec![status("9", 3, 0)]),
            StdDuration::from_secs(3600),
            StdDuration::from_secs(60),
        );
        let predictor = predictor(store_with(noon(), &full_history()), runtime_with([0.1; 3]));

        let forecast = predict_station(
            &feed,
            &predictor,
            "050",
            ModelFamily::GradientBoosted,
            WeatherValues::default(),
            noon(),
        )
        .await?;

        assert_ne!(forecast.status, PredictionStatus::Success);
        assert_eq!(forecast.current_bikes, 3);
        assert!(forecast.horizons.iter().all(|h| h.bikes_predicted == 0));
        Ok(())
    }

    #[test]
    fn feed_failure_has_its_own_status() {
        let error = PredictError::Feed(FeedError::Unavailable("timeout".to_string()));
        assert_eq!(error.status(), PredictionStatus::FeedUnavailable);
        assert_eq!(
            PredictError::StationNotFound("999".to_string()).status(),
            PredictionStatus::StationNotFound
        );
    }
}
