use crate::features::WeatherValues;
use serde::Deserialize;
use std::future::Future;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

pub const WEATHER_CACHE_TTL: Duration = Duration::from_secs(300);

const CURRENT_FIELDS: &str =
    "temperature_2m,rain,surface_pressure,cloud_cover,wind_speed_10m,relative_humidity_2m";

#[derive(Debug, Error)]
pub enum WeatherError {
    #[error("weather request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("weather service returned http status {0}")]
    Status(u16),
    #[error("weather cache lock poisoned")]
    StateLock,
}

pub trait WeatherSource: Send + Sync {
    fn current(&self) -> impl Future<Output = Result<WeatherValues, WeatherError>> + Send;
}

/// Optional per-field values, as accepted from clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct WeatherOverrides {
    pub temperature_2m: Option<f64>,
    pub rain: Option<f64>,
    pub surface_pressure: Option<f64>,
    pub cloud_cover: Option<f64>,
    pub wind_speed_10m: Option<f64>,
    pub relative_humidity_2m: Option<f64>,
}

impl WeatherOverrides {
    pub fn is_complete(&self) -> bool {
        self.temperature_2m.is_some()
            && self.rain.is_some()
            && self.surface_pressure.is_some()
            && self.cloud_cover.is_some()
            && self.wind_speed_10m.is_some()
            && self.relative_humidity_2m.is_some()
    }

    pub fn fill(&self, base: WeatherValues) -> WeatherValues {
        WeatherValues {
            temperature_2m: self.temperature_2m.unwrap_or(base.temperature_2m),
            rain: self.rain.unwrap_or(base.rain),
            surface_pressure: self.surface_pressure.unwrap_or(base.surface_pressure),
            cloud_cover: self.cloud_cover.unwrap_or(base.cloud_cover),
            wind_speed_10m: self.wind_speed_10m.unwrap_or(base.wind_speed_10m),
            relative_humidity_2m: self
                .relative_humidity_2m
                .unwrap_or(base.relative_humidity_2m),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ForecastResponse {
    #[serde(default)]
    current: WeatherOverrides,
}

/// Open-Meteo `forecast` endpoint for one fixed location.
#[derive(Debug, Clone)]
pub struct OpenMeteoSource {
    client: reqwest::Client,
    base_url: String,
    latitude: f64,
    longitude: f64,
    timezone: String,
}

impl OpenMeteoSource {
    pub fn new(
        base_url: &str,
        (latitude, longitude): (f64, f64),
        timezone: &str,
        timeout: Duration,
    ) -> Result<Self, WeatherError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            latitude,
            longitude,
            timezone: timezone.to_string(),
        })
    }
}

impl WeatherSource for OpenMeteoSource {
    async fn current(&self) -> Result<WeatherValues, WeatherError> {
        let response = self
            .client
            .get(format!("{}/forecast", self.base_url))
            .query(&[
                ("latitude", self.latitude.to_string()),
                ("longitude", self.longitude.to_string()),
                ("current", CURRENT_FIELDS.to_string()),
                ("timezone", self.timezone.clone()),
            ])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(WeatherError::Status(status.as_u16()));
        }
        let body: ForecastResponse = response.json().await?;
        Ok(body.current.fill(WeatherValues::default()))
    }
}

/// Source returning constant values; used offline and in tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedWeather(pub WeatherValues);

impl WeatherSource for FixedWeather {
    async fn current(&self) -> Result<WeatherValues, WeatherError> {
        Ok(self.0)
    }
}

pub struct WeatherService<W> {
    source: W,
    ttl: Duration,
    cache: RwLock<Option<(WeatherValues, Instant)>>,
}

impl<W: WeatherSource> WeatherService<W> {
    pub fn new(source: W) -> Self {
        Self::with_ttl(source, WEATHER_CACHE_TTL)
    }

    pub fn with_ttl(source: W, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: RwLock::new(None),
        }
    }

    fn cached(&self) -> Option<WeatherValues> {
        let guard = self.cache.read().ok()?;
        guard
            .as_ref()
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(values, _)| *values)
    }

    /// Cached conditions, refreshed after the TTL; defaults when the source fails.
    pub async fn current(&self) -> WeatherValues {
        if let Some(values) = self.cached() {
            return values;
        }
        match self.source.current().await {
            Ok(values) => {
                info!(temperature = values.temperature_2m, "Weather refreshed");
                if let Ok(mut guard) = self.cache.write() {
                    *guard = Some((values, Instant::now()));
                }
                values
            }
            Err(e) => {
                error!("Weather unavailable, using defaults: {}", e);
                WeatherValues::default()
            }
        }
    }

    /// Request values with gaps filled from [`WeatherService::current`].
    pub async fn resolve(&self, overrides: &WeatherOverrides) -> WeatherValues {
        if overrides.is_complete() {
            return overrides.fill(WeatherValues::default());
        }
        overrides.fill(self.current().await)
    }
}
