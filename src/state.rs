use crate::features::temporal::OperatingWindow;
use crate::feed::FeedCache;
use crate::history::HistoryService;
use crate::lags::LagResolver;
use crate::model::ModelRuntime;
use crate::prediction::Predictor;
use crate::snapshots::SnapshotStore;
use crate::weather::WeatherService;
use chrono_tz::Tz;
use std::sync::Arc;

/// Process-wide services shared by request handlers and background tasks.
///
/// Every member synchronises internally, so the state itself is shared
/// through a plain `Arc`.
pub struct AppState<S, W> {
    feed: Arc<FeedCache<S>>,
    store: Arc<dyn SnapshotStore>,
    predictor: Predictor,
    history: Arc<HistoryService>,
    weather: WeatherService<W>,
    tz: Tz,
}

impl<S, W> AppState<S, W> {
    pub fn new(
        feed: Arc<FeedCache<S>>,
        store: Arc<dyn SnapshotStore>,
        runtime: Arc<ModelRuntime>,
        weather: WeatherService<W>,
        tz: Tz,
        window: OperatingWindow,
    ) -> Self {
        let predictor = Predictor::new(
            LagResolver::new(Arc::clone(&store), tz),
            runtime,
            tz,
            window,
        );
        let history = Arc::new(HistoryService::new(Arc::clone(&store), tz));
        Self {
            feed,
            store,
            predictor,
            history,
            weather,
            tz,
        }
    }

    pub fn feed(&self) -> &Arc<FeedCache<S>> {
        &self.feed
    }

    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    pub fn predictor(&self) -> &Predictor {
        &self.predictor
    }

    pub fn history(&self) -> &Arc<HistoryService> {
        &self.history
    }

    pub fn weather(&self) -> &WeatherService<W> {
        &self.weather
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }
}
