use crate::api::responses::{
    AverageHistoryResponse, DayHistoryResponse, ErrorCode, ErrorResponse, HealthStatus,
    HealthSuccessResponse, LagsSuccessResponse, PredictionSuccessResponse, Predictions,
};
use crate::feed::{FeedSource, Station};
use crate::history::DaySeries;
use crate::model::{Horizon, ModelFamily};
use crate::prediction::{PredictError, predict_station};
use crate::state::AppState;
use crate::weather::{WeatherOverrides, WeatherSource};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, warn};

const INTERNAL_ERROR_MESSAGE: &str = "Internal server error";

pub enum ApiResponse<T> {
    Success(T),
    Error {
        status: StatusCode,
        body: ErrorResponse,
    },
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        match self {
            ApiResponse::Success(body) => (StatusCode::OK, Json(body)).into_response(),
            ApiResponse::Error { status, body } => (status, Json(body)).into_response(),
        }
    }
}

/// Body of `POST /predict/{station_code}`; every field is optional.
#[derive(Debug, Default, Deserialize)]
pub struct PredictRequest {
    #[serde(flatten)]
    pub weather: WeatherOverrides,
    #[serde(default)]
    pub model: ModelFamily,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Today,
    Yesterday,
    Average,
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn error_response<T>(
    status: StatusCode,
    error_code: ErrorCode,
    error_message: String,
    now: DateTime<Utc>,
) -> ApiResponse<T> {
    ApiResponse::Error {
        status,
        body: ErrorResponse {
            error_code,
            error_message,
            timestamp: format_timestamp(now),
        },
    }
}

fn not_found<T>(code: &str, now: DateTime<Utc>) -> ApiResponse<T> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorCode::StationNotFound,
        format!("Station {code} not found"),
        now,
    )
}

fn feed_unavailable<T>(message: impl std::fmt::Display, now: DateTime<Utc>) -> ApiResponse<T> {
    warn!("Station feed unavailable: {}", message);
    error_response(
        StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::FeedUnavailable,
        "Station feed unavailable".to_string(),
        now,
    )
}

fn internal_error<T>(message: &str, now: DateTime<Utc>) -> ApiResponse<T> {
    error!(detail = message, "Internal error while handling request");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        ErrorCode::InternalError,
        INTERNAL_ERROR_MESSAGE.to_string(),
        now,
    )
}

pub async fn get_health<S: FeedSource, W: WeatherSource>(
    State(state): State<Arc<AppState<S, W>>>,
) -> impl IntoResponse {
    build_health_response(&state, Utc::now()).await
}

pub async fn post_predict<S: FeedSource, W: WeatherSource>(
    State(state): State<Arc<AppState<S, W>>>,
    Path(station_code): Path<String>,
    body: Option<Json<PredictRequest>>,
) -> impl IntoResponse {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    build_predict_response(&state, &station_code, request, Utc::now()).await
}

pub async fn get_station<S: FeedSource, W: WeatherSource>(
    State(state): State<Arc<AppState<S, W>>>,
    Path(station_code): Path<String>,
) -> impl IntoResponse {
    build_station_response(&state, &station_code, Utc::now()).await
}

pub async fn get_station_lags<S: FeedSource, W: WeatherSource>(
    State(state): State<Arc<AppState<S, W>>>,
    Path(station_code): Path<String>,
) -> impl IntoResponse {
    build_lags_response(&state, &station_code, Utc::now()).await
}

pub async fn get_history<S: FeedSource, W: WeatherSource>(
    State(state): State<Arc<AppState<S, W>>>,
    Path((station_code, kind)): Path<(String, HistoryKind)>,
) -> Response {
    match kind {
        HistoryKind::Average => build_average_response(&state, &station_code, Utc::now())
            .await
            .into_response(),
        day => build_day_response(&state, &station_code, day, Utc::now())
            .await
            .into_response(),
    }
}

async fn build_health_response<S: FeedSource, W>(
    state: &AppState<S, W>,
    now: DateTime<Utc>,
) -> ApiResponse<HealthSuccessResponse> {
    let models_loaded = state.predictor().runtime().is_loaded();
    let gbfs_available = state.feed().is_available().await;
    let status = if models_loaded && gbfs_available {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    };
    ApiResponse::Success(HealthSuccessResponse {
        status,
        timestamp: format_timestamp(now),
        models_loaded,
        gbfs_available,
    })
}

async fn build_predict_response<S: FeedSource, W: WeatherSource>(
    state: &AppState<S, W>,
    station_code: &str,
    request: PredictRequest,
    now: DateTime<Utc>,
) -> ApiResponse<PredictionSuccessResponse> {
    let weather = state.weather().resolve(&request.weather).await;
    let forecast = match predict_station(
        state.feed(),
        state.predictor(),
        station_code,
        request.model,
        weather,
        now,
    )
    .await
    {
        Ok(forecast) => forecast,
        Err(PredictError::StationNotFound(code)) => return not_found(&code, now),
        Err(PredictError::Feed(e)) => return feed_unavailable(e, now),
        Err(e) => return internal_error(&e.to_string(), now),
    };

    let bikes = |horizon| forecast.bikes_at(horizon).unwrap_or(forecast.current_bikes);
    ApiResponse::Success(PredictionSuccessResponse {
        predictions: Predictions {
            bikes_20min: bikes(Horizon::Min20),
            bikes_40min: bikes(Horizon::Min40),
            bikes_60min: bikes(Horizon::Min60),
        },
        station_code: forecast.station_code.clone(),
        timestamp: format_timestamp(now),
        current_bikes: forecast.current_bikes,
        capacity: forecast.capacity,
        model: request.model,
        status: forecast.status,
        horizons: forecast.horizons,
        weather,
    })
}

async fn build_station_response<S: FeedSource, W>(
    state: &AppState<S, W>,
    station_code: &str,
    now: DateTime<Utc>,
) -> ApiResponse<Station> {
    match state.feed().get_station(station_code).await {
        Ok(Some(station)) => ApiResponse::Success(station),
        Ok(None) => not_found(station_code, now),
        Err(e) => feed_unavailable(e, now),
    }
}

async fn build_lags_response<S: FeedSource, W>(
    state: &AppState<S, W>,
    station_code: &str,
    now: DateTime<Utc>,
) -> ApiResponse<LagsSuccessResponse> {
    let station = match state.feed().get_station(station_code).await {
        Ok(Some(station)) => station,
        Ok(None) => return not_found(station_code, now),
        Err(e) => return feed_unavailable(e, now),
    };
    match state.predictor().resolve_lags(&station, now) {
        Ok(lags) => ApiResponse::Success(LagsSuccessResponse {
            current_occupancy: station.occupancy(),
            station_code: station.station_code,
            station_id: station.station_id,
            lags,
            timestamp: format_timestamp(now),
        }),
        Err(e) => {
            warn!(station_code, "Lag lookup failed: {}", e);
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                ErrorCode::InsufficientData,
                format!("Not enough history to resolve lags for station {station_code}"),
                now,
            )
        }
    }
}

/// Resolves a code to its feed identifier, mapping failures to responses.
async fn resolve_station_id<S: FeedSource, W, T>(
    state: &AppState<S, W>,
    station_code: &str,
    now: DateTime<Utc>,
) -> Result<String, ApiResponse<T>> {
    match state.feed().resolve_fresh(station_code).await {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(not_found(station_code, now)),
        Err(e) => Err(feed_unavailable(e, now)),
    }
}

fn no_data<T>(station_code: &str, now: DateTime<Utc>) -> ApiResponse<T> {
    error_response(
        StatusCode::NOT_FOUND,
        ErrorCode::NoData,
        format!("No data found for station {station_code}"),
        now,
    )
}

async fn build_day_response<S: FeedSource, W>(
    state: &AppState<S, W>,
    station_code: &str,
    kind: HistoryKind,
    now: DateTime<Utc>,
) -> ApiResponse<DayHistoryResponse> {
    let station_id = match resolve_station_id(state, station_code, now).await {
        Ok(id) => id,
        Err(response) => return response,
    };
    let history = Arc::clone(state.history());
    let code = station_code.to_string();
    let result = tokio::task::spawn_blocking(move || match kind {
        HistoryKind::Yesterday => history.yesterday(&code, &station_id, now),
        _ => history.today(&code, &station_id, now),
    })
    .await;

    match result {
        Ok(Ok(Some(series))) => {
            let DaySeries {
                station_code,
                date,
                buckets,
            } = series.as_ref().clone();
            ApiResponse::Success(DayHistoryResponse {
                station_code,
                date,
                data: buckets,
            })
        }
        Ok(Ok(None)) => no_data(station_code, now),
        Ok(Err(e)) => internal_error(&e.to_string(), now),
        Err(e) => internal_error(&e.to_string(), now),
    }
}

async fn build_average_response<S: FeedSource, W>(
    state: &AppState<S, W>,
    station_code: &str,
    now: DateTime<Utc>,
) -> ApiResponse<AverageHistoryResponse> {
    let station_id = match resolve_station_id(state, station_code, now).await {
        Ok(id) => id,
        Err(response) => return response,
    };
    let history = Arc::clone(state.history());
    let code = station_code.to_string();
    let result =
        tokio::task::spawn_blocking(move || history.average(&code, &station_id, now)).await;

    match result {
        Ok(Ok(Some(profile))) => ApiResponse::Success(AverageHistoryResponse {
            station_code: profile.station_code.clone(),
            data: profile.rows.clone(),
        }),
        Ok(Ok(None)) => no_data(station_code, now),
        Ok(Err(e)) => internal_error(&e.to_string(), now),
        Err(e) => internal_error(&e.to_string(), now),
    }
}
