use crate::features::WeatherValues;
use crate::history::{AverageRow, TimeBucket};
use crate::lags::LagSet;
use crate::model::ModelFamily;
use crate::prediction::{HorizonPrediction, PredictionStatus};
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct HealthSuccessResponse {
    pub status: HealthStatus,
    pub timestamp: String,
    pub models_loaded: bool,
    pub gbfs_available: bool,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
pub struct Predictions {
    pub bikes_20min: u32,
    pub bikes_40min: u32,
    pub bikes_60min: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct PredictionSuccessResponse {
    pub station_code: String,
    pub timestamp: String,
    pub current_bikes: u32,
    pub capacity: u32,
    pub model: ModelFamily,
    pub status: PredictionStatus,
    pub predictions: Predictions,
    pub horizons: Vec<HorizonPrediction>,
    pub weather: WeatherValues,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct LagsSuccessResponse {
    pub station_code: String,
    pub station_id: String,
    pub current_occupancy: Option<f64>,
    pub lags: LagSet,
    pub timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct DayHistoryResponse {
    pub station_code: String,
    pub date: NaiveDate,
    pub data: Vec<TimeBucket>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct AverageHistoryResponse {
    pub station_code: String,
    pub data: Vec<AverageRow>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct ErrorResponse {
    pub error_code: ErrorCode,
    pub error_message: String,
    pub timestamp: String,
}

#[derive(Debug, Serialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    StationNotFound,
    NoData,
    InsufficientData,
    FeedUnavailable,
    InternalError,
}
