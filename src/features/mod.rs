pub mod enrichment;
pub mod temporal;

use crate::lags::{LagOffset, LagSet};
use enrichment::Enrichment;
use serde::{Deserialize, Serialize};
use temporal::TemporalFeatures;
use thiserror::Error;

pub const FEATURE_COUNT: usize = 42;

/// Column order shared with the trained models. Reordering corrupts predictions.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "ocu",
    "ocu_lag_1",
    "ocu_lag_2",
    "ocu_lag_6",
    "ocu_lag_12",
    "ocu_lag_138",
    "ocu_lag_144",
    "ocu_trend_1",
    "ocu_trend_2",
    "ocu_trend_6",
    "ocu_trend_12",
    "time_sin",
    "time_cos",
    "day_sin",
    "day_cos",
    "is_weekend",
    "is_holiday",
    "capacity",
    "is_operating",
    "commerce_pois_300m",
    "finance_pois_300m",
    "culture_pois_300m",
    "education_pois_300m",
    "sport_recreation_pois_300m",
    "hotels_pois_300m",
    "food_pois_300m",
    "health_pois_300m",
    "drink_pois_300m",
    "transit_nearest_station_m",
    "transit_stations_300m",
    "ids_population_300m",
    "ids_300m",
    "utm_x",
    "utm_y",
    "station_netflow_rate",
    "station_turnover_rate",
    "temperature_2m",
    "rain",
    "surface_pressure",
    "cloud_cover",
    "wind_speed_10m",
    "relative_humidity_2m",
];

/// Leading block holding current occupancy and its six lags.
pub const OCCUPANCY_BLOCK: usize = 7;

#[derive(Debug, Error, PartialEq)]
pub enum FeatureError {
    #[error("missing lag {0} for trend computation")]
    InsufficientData(&'static str),
    #[error("feature vector has {0} values, expected 42")]
    WrongLength(usize),
    #[error("feature {0} is not finite")]
    NonFinite(&'static str),
}

/// Current weather conditions, in Open-Meteo units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherValues {
    pub temperature_2m: f64,
    pub rain: f64,
    pub surface_pressure: f64,
    pub cloud_cover: f64,
    pub wind_speed_10m: f64,
    pub relative_humidity_2m: f64,
}

impl Default for WeatherValues {
    fn default() -> Self {
        Self {
            temperature_2m: 20.0,
            rain: 0.0,
            surface_pressure: 1013.0,
            cloud_cover: 50.0,
            wind_speed_10m: 5.0,
            relative_humidity_2m: 50.0,
        }
    }
}

impl WeatherValues {
    pub fn values(&self) -> [f64; 6] {
        [
            self.temperature_2m,
            self.rain,
            self.surface_pressure,
            self.cloud_cover,
            self.wind_speed_10m,
            self.relative_humidity_2m,
        ]
    }
}

/// Validated vector of exactly [`FEATURE_COUNT`] finite values.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector([f64; FEATURE_COUNT]);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        FEATURE_NAMES
            .iter()
            .position(|n| *n == name)
            .map(|i| self.0[i])
    }

    /// Occupancy sequence from the oldest lag to the current value.
    pub fn occupancy_sequence(&self) -> [f64; OCCUPANCY_BLOCK] {
        let mut sequence = [0.0; OCCUPANCY_BLOCK];
        for (slot, value) in sequence.iter_mut().zip(self.0[..OCCUPANCY_BLOCK].iter().rev()) {
            *slot = *value;
        }
        sequence
    }

    /// Every entry after the occupancy block.
    pub fn context(&self) -> &[f64] {
        &self.0[OCCUPANCY_BLOCK..]
    }
}

impl TryFrom<Vec<f64>> for FeatureVector {
    type Error = FeatureError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        let array: [f64; FEATURE_COUNT] = values
            .try_into()
            .map_err(|v: Vec<f64>| FeatureError::WrongLength(v.len()))?;
        if let Some(i) = array.iter().position(|v| !v.is_finite()) {
            return Err(FeatureError::NonFinite(FEATURE_NAMES[i]));
        }
        Ok(Self(array))
    }
}

/// Per-request inputs to [`assemble`].
#[derive(Debug, Clone, Copy)]
pub struct FeatureInputs<'a> {
    pub station_code: &'a str,
    pub occupancy: f64,
    pub capacity: u32,
    pub lags: &'a LagSet,
    pub temporal: TemporalFeatures,
    pub weather: WeatherValues,
}

fn flag(value: bool) -> f64 {
    if value { 1.0 } else { 0.0 }
}

/// Builds the model input in [`FEATURE_NAMES`] order.
///
/// Stations absent from the enrichment tables get the documented defaults.
/// An enrichment capacity replaces the live one.
pub fn assemble(
    inputs: &FeatureInputs<'_>,
    enrichment: &Enrichment,
) -> Result<FeatureVector, FeatureError> {
    let lag = |offset: LagOffset| {
        inputs
            .lags
            .get(offset)
            .ok_or(FeatureError::InsufficientData(offset.name()))
    };
    let lag_1 = lag(LagOffset::Step1)?;
    let lag_2 = lag(LagOffset::Step2)?;
    let lag_6 = lag(LagOffset::Step6)?;
    let lag_12 = lag(LagOffset::Step12)?;
    let lag_138 = lag(LagOffset::Step138)?;
    let lag_144 = lag(LagOffset::Step144)?;

    let ocu = inputs.occupancy;
    let temporal = &inputs.temporal;
    let profile = enrichment.profile(inputs.station_code);
    let flow = enrichment.flow(inputs.station_code, temporal.weekday, temporal.hour);

    let mut values = Vec::with_capacity(FEATURE_COUNT);
    values.extend([ocu, lag_1, lag_2, lag_6, lag_12, lag_138, lag_144]);
    values.extend([ocu - lag_1, ocu - lag_2, ocu - lag_6, ocu - lag_12]);
    values.extend([
        temporal.time_sin,
        temporal.time_cos,
        temporal.day_sin,
        temporal.day_cos,
        flag(temporal.is_weekend),
        flag(temporal.is_holiday),
    ]);
    values.push(profile.capacity.unwrap_or(f64::from(inputs.capacity)));
    values.push(flag(temporal.is_operating));
    values.extend(profile.pois.values());
    values.extend([profile.transit.nearest_station_m, profile.transit.stations_300m]);
    values.extend([
        profile.demographics.population_300m,
        profile.demographics.index_300m,
    ]);
    values.extend([profile.utm.x, profile.utm.y]);
    values.extend([flow.netflow, flow.turnover]);
    values.extend(inputs.weather.values());

    FeatureVector::try_from(values)
}
