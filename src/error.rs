use thiserror::Error;

use crate::config::ConfigError;
use crate::feed::FeedError;
use crate::weather::WeatherError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("feed error: {0}")]
    Feed(#[from] FeedError),
    #[error("weather error: {0}")]
    Weather(#[from] WeatherError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
