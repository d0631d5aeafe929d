use crate::features::temporal::OperatingWindow;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const CONFIG_PATH_ENV: &str = "BIKESHARE_CONFIG";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_DATA_PATH: &str = "data";
pub const DEFAULT_FEED_BASE_URL: &str = "https://gbfs.mex.lyftbikes.com/gbfs";
pub const DEFAULT_FEED_LANGUAGE: &str = "es";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_INFORMATION_TTL_SECS: u64 = 86_400;
pub const DEFAULT_STATUS_TTL_SECS: u64 = 60;
pub const DEFAULT_WEATHER_BASE_URL: &str = "https://api.open-meteo.com/v1";
pub const DEFAULT_TIMEZONE: &str = "America/Mexico_City";
pub const DEFAULT_LATITUDE: f64 = 19.4326;
pub const DEFAULT_LONGITUDE: f64 = -99.1332;
pub const DEFAULT_COLLECTOR_INTERVAL_SECS: u64 = 60;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub data: Option<DataSection>,
    #[serde(default)]
    pub feed: Option<FeedSection>,
    #[serde(default)]
    pub weather: Option<WeatherSection>,
    #[serde(default)]
    pub location: Option<LocationSection>,
    #[serde(default)]
    pub operating: Option<OperatingSection>,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub collector: Option<CollectorSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataSection {
    /// Root directory holding `models/` and `gbfs/`
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FeedSection {
    pub base_url: Option<String>,
    /// GBFS language segment of the feed URLs (default: "es")
    pub language: Option<String>,
    pub timeout_secs: Option<u64>,
    pub information_ttl_secs: Option<u64>,
    pub status_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherSection {
    pub base_url: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LocationSection {
    /// IANA timezone used for partitioning and time features
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct OperatingSection {
    /// Local opening time, "HH:MM"
    pub start: Option<String>,
    /// Local closing time after midnight, "HH:MM"
    pub end: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorSection {
    pub enabled: Option<bool>,
    /// Seconds between snapshots (default: 60)
    pub interval_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config value: {0}")]
    Invalid(String),
}

/// Loads the file named by `BIKESHARE_CONFIG`, falling back to `config/config.toml`.
pub fn load_default() -> Result<Config, ConfigError> {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.is_empty() => load_from_path(path),
        _ => load_from_path(DEFAULT_CONFIG_PATH),
    }
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    pub fn data_path(&self) -> PathBuf {
        self.data
            .as_ref()
            .and_then(|d| d.path.clone())
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH))
    }

    pub fn models_path(&self) -> PathBuf {
        self.data_path().join("models")
    }

    pub fn snapshots_path(&self) -> PathBuf {
        self.data_path().join("gbfs")
    }

    pub fn feed_base_url(&self) -> &str {
        self.feed
            .as_ref()
            .and_then(|f| f.base_url.as_deref())
            .unwrap_or(DEFAULT_FEED_BASE_URL)
    }

    pub fn feed_language(&self) -> &str {
        self.feed
            .as_ref()
            .and_then(|f| f.language.as_deref())
            .unwrap_or(DEFAULT_FEED_LANGUAGE)
    }

    pub fn feed_timeout(&self) -> Duration {
        let secs = self
            .feed
            .as_ref()
            .and_then(|f| f.timeout_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    /// TTL of the station metadata cache (default: 24 hours)
    pub fn information_ttl(&self) -> Duration {
        let secs = self
            .feed
            .as_ref()
            .and_then(|f| f.information_ttl_secs)
            .unwrap_or(DEFAULT_INFORMATION_TTL_SECS);
        Duration::from_secs(secs)
    }

    /// TTL of the station status cache (default: 60 seconds)
    pub fn status_ttl(&self) -> Duration {
        let secs = self
            .feed
            .as_ref()
            .and_then(|f| f.status_ttl_secs)
            .unwrap_or(DEFAULT_STATUS_TTL_SECS);
        Duration::from_secs(secs)
    }

    pub fn weather_base_url(&self) -> &str {
        self.weather
            .as_ref()
            .and_then(|w| w.base_url.as_deref())
            .unwrap_or(DEFAULT_WEATHER_BASE_URL)
    }

    pub fn weather_timeout(&self) -> Duration {
        let secs = self
            .weather
            .as_ref()
            .and_then(|w| w.timeout_secs)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        Duration::from_secs(secs)
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        let name = self
            .location
            .as_ref()
            .and_then(|l| l.timezone.as_deref())
            .unwrap_or(DEFAULT_TIMEZONE);
        name.parse::<Tz>()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{name}'")))
    }

    /// Returns (latitude, longitude) used for weather lookups.
    pub fn coordinates(&self) -> (f64, f64) {
        let location = self.location.as_ref();
        (
            location
                .and_then(|l| l.latitude)
                .unwrap_or(DEFAULT_LATITUDE),
            location
                .and_then(|l| l.longitude)
                .unwrap_or(DEFAULT_LONGITUDE),
        )
    }

    pub fn operating_window(&self) -> Result<OperatingWindow, ConfigError> {
        let default = OperatingWindow::default();
        let Some(section) = self.operating.as_ref() else {
            return Ok(default);
        };
        let start = match section.start.as_deref() {
            Some(raw) => parse_clock(raw)?,
            None => default.start,
        };
        let end = match section.end.as_deref() {
            Some(raw) => parse_clock(raw)?,
            None => default.end,
        };
        Ok(OperatingWindow { start, end })
    }

    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn collector_enabled(&self) -> bool {
        self.collector
            .as_ref()
            .and_then(|c| c.enabled)
            .unwrap_or(true)
    }

    pub fn collector_interval(&self) -> Duration {
        let secs = self
            .collector
            .as_ref()
            .and_then(|c| c.interval_secs)
            .unwrap_or(DEFAULT_COLLECTOR_INTERVAL_SECS);
        Duration::from_secs(secs.max(1))
    }
}

fn parse_clock(raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw, "%H:%M")
        .map_err(|_| ConfigError::Invalid(format!("expected HH:MM, got '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn write_temp_config(tag: &str, contents: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
        let unique = SystemTime::now().duration_since(UNIX_EPOCH)?.as_nanos();
        let path = std::env::temp_dir().join(format!("bikeshare-config-{tag}-{unique}.toml"));
        fs::write(&path, contents)?;
        Ok(path)
    }

    #[test]
    fn default_config_parses_with_expected_sections() -> Result<(), Box<dyn std::error::Error>> {
        let config = load_from_path(DEFAULT_CONFIG_PATH)?;
        assert_eq!(config.app.name, "bikeshare-forecast");
        assert_eq!(config.timezone()?, chrono_tz::America::Mexico_City);
        assert!(config.collector_enabled());
        Ok(())
    }

    #[test]
    fn minimal_config_falls_back_to_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "minimal",
            r#"
[app]
name = "bikeshare-forecast"

[logging]
level = "info"
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.server_port(), DEFAULT_SERVER_PORT);
        assert_eq!(config.status_ttl(), Duration::from_secs(60));
        assert_eq!(config.information_ttl(), Duration::from_secs(86_400));
        assert_eq!(config.models_path(), PathBuf::from("data").join("models"));
        assert_eq!(config.feed_language(), "es");
        assert_eq!(config.operating_window()?, OperatingWindow::default());
        Ok(())
    }

    #[test]
    fn empty_data_path_is_treated_as_missing() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "empty-data",
            r#"
[app]
name = "bikeshare-forecast"

[logging]
level = "info"

[data]
path = ""
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert_eq!(config.data_path(), PathBuf::from(DEFAULT_DATA_PATH));
        Ok(())
    }

    #[test]
    fn operating_window_override_is_parsed() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "operating",
            r#"
[app]
name = "bikeshare-forecast"

[logging]
level = "debug"

[operating]
start = "06:15"
end = "01:00"
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        let window = config.operating_window()?;
        assert_eq!(window.start, NaiveTime::from_hms_opt(6, 15, 0).ok_or("time")?);
        assert_eq!(window.end, NaiveTime::from_hms_opt(1, 0, 0).ok_or("time")?);
        Ok(())
    }

    #[test]
    fn bad_operating_time_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "bad-operating",
            r#"
[app]
name = "bikeshare-forecast"

[logging]
level = "info"

[operating]
start = "5am"
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(
            config.operating_window(),
            Err(ConfigError::Invalid(_))
        ));
        Ok(())
    }

    #[test]
    fn unknown_timezone_is_invalid() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config(
            "tz",
            r#"
[app]
name = "bikeshare-forecast"

[logging]
level = "info"

[location]
timezone = "Mars/Olympus_Mons"
"#,
        )?;

        let config = load_from_path(&path)?;
        let _ = fs::remove_file(&path);

        assert!(matches!(config.timezone(), Err(ConfigError::Invalid(_))));
        Ok(())
    }

    #[test]
    fn missing_config_file_returns_read_error() {
        let unique = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system time before unix epoch")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("bikeshare-config-missing-{unique}.toml"));

        let result = load_from_path(&path);

        assert!(matches!(result, Err(ConfigError::Read(_))));
    }

    #[test]
    fn invalid_toml_returns_parse_error() -> Result<(), Box<dyn std::error::Error>> {
        let path = write_temp_config("invalid", "not = [valid")?;

        let result = load_from_path(&path);
        let _ = fs::remove_file(&path);

        assert!(matches!(result, Err(ConfigError::Parse(_))));
        Ok(())
    }
}
