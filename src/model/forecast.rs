//! Forecast model trait shared by every model family.
//!
//! A model maps one validated feature vector to a raw score for a single
//! horizon. Interpreting the score is the runtime's job, driven by [`Target`].

use crate::features::FeatureVector;
use serde::Deserialize;
use thiserror::Error;

/// What the raw model output represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    /// Absolute occupancy fraction at the horizon.
    Occupancy,
    /// Change from the current occupancy.
    OccupancyDelta,
}

#[derive(Debug, Error, PartialEq)]
pub enum InferenceError {
    #[error("no model loaded for this horizon")]
    Missing,
    #[error("model produced a non-finite output")]
    NonFinite,
    #[error("model structure is corrupt: {0}")]
    Corrupt(String),
}

pub trait ForecastModel: Send + Sync + std::fmt::Debug {
    /// Raw score for one feature vector.
    fn predict_raw(&self, features: &FeatureVector) -> Result<f64, InferenceError>;

    fn target(&self) -> Target;
}
