use bikeshare_forecast::api;
use bikeshare_forecast::collector::{Collector, run_collector};
use bikeshare_forecast::config;
use bikeshare_forecast::error::AppError;
use bikeshare_forecast::feed::FeedCache;
use bikeshare_forecast::feed::http::HttpFeedSource;
use bikeshare_forecast::model::ModelRuntime;
use bikeshare_forecast::scheduler::run_scheduler;
use bikeshare_forecast::snapshots::{CsvSnapshotStore, SnapshotStore};
use bikeshare_forecast::state::AppState;
use bikeshare_forecast::weather::{OpenMeteoSource, WeatherService};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = config::load_default()?;
    init_tracing(&config.logging.level);
    tracing::info!(app = %config.app.name, "bikeshare-forecast starting");

    let tz = config.timezone()?;
    let window = config.operating_window()?;

    let source = HttpFeedSource::new(
        config.feed_base_url(),
        config.feed_language(),
        config.feed_timeout(),
    )?;
    let feed = Arc::new(FeedCache::new(
        source,
        config.information_ttl(),
        config.status_ttl(),
    ));
    if let Err(e) = feed.all_stations().await {
        tracing::warn!(error = %e, "Station feed unreachable at startup");
    }

    let snapshots_path = config.snapshots_path();
    tracing::info!(path = %snapshots_path.display(), "Using snapshot store");
    let store: Arc<dyn SnapshotStore> = Arc::new(CsvSnapshotStore::new(snapshots_path));

    let runtime = Arc::new(ModelRuntime::load(&config.models_path()));

    let weather = WeatherService::new(OpenMeteoSource::new(
        config.weather_base_url(),
        config.coordinates(),
        tz.name(),
        config.weather_timeout(),
    )?);

    let state = Arc::new(AppState::new(
        Arc::clone(&feed),
        Arc::clone(&store),
        runtime,
        weather,
        tz,
        window,
    ));

    if config.collector_enabled() {
        let collector = Arc::new(Collector::new(Arc::clone(&feed), store, tz));
        tokio::spawn(run_collector(collector, config.collector_interval()));
    } else {
        tracing::warn!("Snapshot collector disabled; lags rely on existing partitions");
    }
    tokio::spawn(run_scheduler(feed, Arc::clone(state.history()), tz));

    let app = api::router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port()));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;

    Ok(())
}
