use crate::features::FeatureVector;
use crate::features::enrichment::Enrichment;
use crate::features::temporal::HolidayCalendar;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info, warn};

pub mod forecast;
#[cfg(feature = "recurrent")]
pub mod recurrent;
pub mod tree_ensemble;

use forecast::{ForecastModel, InferenceError, Target};
use tree_ensemble::TreeEnsemble;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Horizon {
    Min20,
    Min40,
    Min60,
}

impl Horizon {
    pub const ALL: [Horizon; 3] = [Horizon::Min20, Horizon::Min40, Horizon::Min60];

    pub fn minutes(self) -> i64 {
        match self {
            Horizon::Min20 => 20,
            Horizon::Min40 => 40,
            Horizon::Min60 => 60,
        }
    }

    fn file_name(self) -> String {
        format!("model_{}min.json", self.minutes())
    }
}

/// Model family requested by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Gradient-boosted trees.
    #[default]
    #[serde(rename = "m1")]
    GradientBoosted,
    /// LSTM; only loadable with the `recurrent` feature.
    #[serde(rename = "m2")]
    Recurrent,
}

impl ModelFamily {
    fn directory(self) -> &'static str {
        match self {
            ModelFamily::GradientBoosted => "xgboost",
            ModelFamily::Recurrent => "lstm",
        }
    }

    pub fn code(self) -> &'static str {
        match self {
            ModelFamily::GradientBoosted => "m1",
            ModelFamily::Recurrent => "m2",
        }
    }
}

#[derive(Debug, Error)]
pub enum ModelLoadError {
    #[error("failed to read model artifact: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse model artifact: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid model artifact: {0}")]
    Invalid(String),
}

/// Score for one horizon after clipping.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonOutcome {
    pub occupancy: f64,
    pub bikes: u32,
}

/// Rounds `occupancy * capacity` and clamps into `[0, capacity]`.
pub fn bikes_from_occupancy(occupancy: f64, capacity: u32) -> u32 {
    let bikes = (occupancy * f64::from(capacity)).round();
    if bikes.is_nan() {
        return 0;
    }
    bikes.clamp(0.0, f64::from(capacity)) as u32
}

/// Every loaded model plus the static tables the assembler needs.
///
/// Built once at startup and shared read-only.
#[derive(Debug, Default)]
pub struct ModelRuntime {
    models: HashMap<(ModelFamily, Horizon), Box<dyn ForecastModel>>,
    enrichment: Enrichment,
    holidays: HolidayCalendar,
}

impl ModelRuntime {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads whatever artifacts exist under `models_path`.
    ///
    /// Missing or broken artifacts are logged and skipped; the runtime is
    /// usable iff [`ModelRuntime::is_loaded`] afterwards.
    pub fn load(models_path: &Path) -> Self {
        let mut runtime = Self::empty();
        runtime.load_family(models_path, ModelFamily::GradientBoosted, |p| {
            TreeEnsemble::from_path(p).map(|m| Box::new(m) as Box<dyn ForecastModel>)
        });
        #[cfg(feature = "recurrent")]
        runtime.load_family(models_path, ModelFamily::Recurrent, |p| {
            recurrent::LstmModel::from_path(p).map(|m| Box::new(m) as Box<dyn ForecastModel>)
        });
        runtime.load_tables(&models_path.join("features"));

        if runtime.is_loaded() {
            info!("Loaded {} model artifacts", runtime.models.len());
        } else {
            error!(
                "No model artifacts loaded from {}; predictions will fall back",
                models_path.display()
            );
        }
        runtime
    }

    fn load_family<F>(&mut self, models_path: &Path, family: ModelFamily, load: F)
    where
        F: Fn(&Path) -> Result<Box<dyn ForecastModel>, ModelLoadError>,
    {
        for horizon in Horizon::ALL {
            let path = models_path
                .join(family.directory())
                .join(horizon.file_name());
            if !path.exists() {
                warn!("Model artifact not found: {}", path.display());
                continue;
            }
            match load(&path) {
                Ok(model) => {
                    info!(family = family.code(), horizon = horizon.minutes(), "Model loaded");
                    self.models.insert((family, horizon), model);
                }
                Err(e) => warn!("Skipping model artifact {}: {}", path.display(), e),
            }
        }
    }

    fn load_tables(&mut self, features_path: &Path) {
        let holidays = features_path.join("holidays.csv");
        match HolidayCalendar::from_csv(&holidays) {
            Ok(calendar) => {
                info!("Loaded {} holidays", calendar.len());
                self.holidays = calendar;
            }
            Err(e) => warn!("Holiday calendar unavailable ({}): {}", holidays.display(), e),
        }

        let enriched = features_path.join("stations_enriched.csv");
        match self.enrichment.load_profiles(&enriched) {
            Ok(count) => info!("Loaded enrichment for {} stations", count),
            Err(e) => warn!("Station enrichment unavailable ({}): {}", enriched.display(), e),
        }

        let activity = features_path.join("stations_activity.csv");
        match self.enrichment.load_activity(&activity) {
            Ok(count) => info!("Loaded {} station activity rows", count),
            Err(e) => warn!("Station activity unavailable ({}): {}", activity.display(), e),
        }
    }

    pub fn with_model(
        mut self,
        family: ModelFamily,
        horizon: Horizon,
        model: impl ForecastModel + 'static,
    ) -> Self {
        self.models.insert((family, horizon), Box::new(model));
        self
    }

    pub fn with_enrichment(mut self, enrichment: Enrichment) -> Self {
        self.enrichment = enrichment;
        self
    }

    pub fn with_holidays(mut self, holidays: HolidayCalendar) -> Self {
        self.holidays = holidays;
        self
    }

    pub fn is_loaded(&self) -> bool {
        !self.models.is_empty()
    }

    pub fn has_family(&self, family: ModelFamily) -> bool {
        self.models.keys().any(|(f, _)| *f == family)
    }

    pub fn enrichment(&self) -> &Enrichment {
        &self.enrichment
    }

    pub fn holidays(&self) -> &HolidayCalendar {
        &self.holidays
    }

    /// Scores one horizon, converting the raw output to an occupancy in
    /// `[0, 1]` and a bike count in `[0, capacity]`.
    pub fn predict_horizon(
        &self,
        family: ModelFamily,
        features: &FeatureVector,
        horizon: Horizon,
        current_occupancy: f64,
        capacity: u32,
    ) -> Result<HorizonOutcome, InferenceError> {
        let model = self
            .models
            .get(&(family, horizon))
            .ok_or(InferenceError::Missing)?;
        let raw = model.predict_raw(features)?;
        if !raw.is_finite() {
            return Err(InferenceError::NonFinite);
        }
        let occupancy = match model.target() {
            Target::Occupancy => raw,
            Target::OccupancyDelta => current_occupancy + raw,
        }
        .clamp(0.0, 1.0);
        Ok(HorizonOutcome {
            occupancy,
            bikes: bikes_from_occupancy(occupancy, capacity),
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::forecast::{ForecastModel, InferenceError, Target};
    use crate::features::FeatureVector;

    /// Returns a fixed raw score.
    #[derive(Debug)]
    pub struct ConstantModel {
        pub raw: f64,
        pub target: Target,
    }

    impl ForecastModel for ConstantModel {
        fn predict_raw(&self, _features: &FeatureVector) -> Result<f64, InferenceError> {
            Ok(self.raw)
        }

        fn target(&self) -> Target {
            self.target
        }
    }

    /// Always fails.
    #[derive(Debug)]
    pub struct FailingModel;

    impl ForecastModel for FailingModel {
        fn predict_raw(&self, _features: &FeatureVector) -> Result<f64, InferenceError> {
            Err(InferenceError::Corrupt("broken".to_string()))
        }

        fn target(&self) -> Target {
            Target::Occupancy
        }
    }
}
