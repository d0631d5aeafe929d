use crate::feed::FeedSource;
use crate::state::AppState;
use crate::weather::WeatherSource;
use axum::Router;
use axum::routing::{get, post};
use std::sync::Arc;

pub mod handlers;
pub mod responses;

pub fn router<S, W>(state: Arc<AppState<S, W>>) -> Router
where
    S: FeedSource + 'static,
    W: WeatherSource + 'static,
{
    Router::new()
        .route("/api/v1/health", get(handlers::get_health::<S, W>))
        .route(
            "/api/v1/predict/{station_code}",
            post(handlers::post_predict::<S, W>),
        )
        .route(
            "/api/v1/stations/{station_code}",
            get(handlers::get_station::<S, W>),
        )
        .route(
            "/api/v1/stations/{station_code}/lags",
            get(handlers::get_station_lags::<S, W>),
        )
        .route(
            "/api/v1/history/{station_code}/{kind}",
            get(handlers::get_history::<S, W>),
        )
        .with_state(state)
}
