use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PoiCounts {
    pub commerce: f64,
    pub finance: f64,
    pub culture: f64,
    pub education: f64,
    pub sport_recreation: f64,
    pub hotels: f64,
    pub food: f64,
    pub health: f64,
    pub drink: f64,
}

impl PoiCounts {
    pub fn values(&self) -> [f64; 9] {
        [
            self.commerce,
            self.finance,
            self.culture,
            self.education,
            self.sport_recreation,
            self.hotels,
            self.food,
            self.health,
            self.drink,
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitAccess {
    pub nearest_station_m: f64,
    pub stations_300m: f64,
}

impl Default for TransitAccess {
    fn default() -> Self {
        Self {
            nearest_station_m: 500.0,
            stations_300m: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Demographics {
    pub population_300m: f64,
    pub index_300m: f64,
}

impl Default for Demographics {
    fn default() -> Self {
        Self {
            population_300m: 10_000.0,
            index_300m: 0.5,
        }
    }
}

/// Projected coordinates in metres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UtmPosition {
    pub x: f64,
    pub y: f64,
}

impl Default for UtmPosition {
    fn default() -> Self {
        Self {
            x: 485_000.0,
            y: 2_150_000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlowRates {
    pub netflow: f64,
    pub turnover: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StationProfile {
    pub capacity: Option<f64>,
    pub pois: PoiCounts,
    pub transit: TransitAccess,
    pub demographics: Demographics,
    pub utm: UtmPosition,
}

/// One row of `stations_enriched.csv`. Missing cells fall back to the
/// group defaults.
#[derive(Debug, Deserialize)]
struct EnrichedRow {
    station_code: String,
    capacity: Option<f64>,
    commerce_pois_300m: Option<f64>,
    finance_pois_300m: Option<f64>,
    culture_pois_300m: Option<f64>,
    education_pois_300m: Option<f64>,
    sport_recreation_pois_300m: Option<f64>,
    hotels_pois_300m: Option<f64>,
    food_pois_300m: Option<f64>,
    health_pois_300m: Option<f64>,
    drink_pois_300m: Option<f64>,
    transit_nearest_station_m: Option<f64>,
    transit_stations_300m: Option<f64>,
    ids_population_300m: Option<f64>,
    ids_300m: Option<f64>,
    utm_x: Option<f64>,
    utm_y: Option<f64>,
}

impl From<EnrichedRow> for StationProfile {
    fn from(row: EnrichedRow) -> Self {
        let transit = TransitAccess::default();
        let demographics = Demographics::default();
        let utm = UtmPosition::default();
        Self {
            capacity: row.capacity,
            pois: PoiCounts {
                commerce: row.commerce_pois_300m.unwrap_or_default(),
                finance: row.finance_pois_300m.unwrap_or_default(),
                culture: row.culture_pois_300m.unwrap_or_default(),
                education: row.education_pois_300m.unwrap_or_default(),
                sport_recreation: row.sport_recreation_pois_300m.unwrap_or_default(),
                hotels: row.hotels_pois_300m.unwrap_or_default(),
                food: row.food_pois_300m.unwrap_or_default(),
                health: row.health_pois_300m.unwrap_or_default(),
                drink: row.drink_pois_300m.unwrap_or_default(),
            },
            transit: TransitAccess {
                nearest_station_m: row
                    .transit_nearest_station_m
                    .unwrap_or(transit.nearest_station_m),
                stations_300m: row.transit_stations_300m.unwrap_or(transit.stations_300m),
            },
            demographics: Demographics {
                population_300m: row
                    .ids_population_300m
                    .unwrap_or(demographics.population_300m),
                index_300m: row.ids_300m.unwrap_or(demographics.index_300m),
            },
            utm: UtmPosition {
                x: row.utm_x.unwrap_or(utm.x),
                y: row.utm_y.unwrap_or(utm.y),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct ActivityRow {
    station_code: String,
    weekday: u32,
    hour: u32,
    station_netflow_rate: Option<f64>,
    station_turnover_rate: Option<f64>,
}

/// Enrichment tables keyed by station code.
#[derive(Debug, Clone, Default)]
pub struct Enrichment {
    profiles: HashMap<String, StationProfile>,
    activity: HashMap<(String, u32, u32), FlowRates>,
}

impl Enrichment {
    pub fn load_profiles(&mut self, path: &Path) -> Result<usize, csv::Error> {
        let mut reader = csv::Reader::from_path(path)?;
        for row in reader.deserialize::<EnrichedRow>() {
            let row = row?;
            self.profiles.insert(row.station_code.clone(), row.into());
        }
        Ok(self.profiles.len())
    }

    pub fn load_activity(&mut self, path: &Path) -> Result<usize, csv::Error> {
        let mut reader = csv::Reader::from_path(path)?;
        for row in reader.deserialize::<ActivityRow>() {
            let row = row?;
            self.activity.insert(
                (row.station_code, row.weekday, row.hour),
                FlowRates {
                    netflow: row.station_netflow_rate.unwrap_or_default(),
                    turnover: row.station_turnover_rate.unwrap_or_default(),
                },
            );
        }
        Ok(self.activity.len())
    }

    pub fn insert_profile(&mut self, code: &str, profile: StationProfile) {
        self.profiles.insert(code.to_string(), profile);
    }

    pub fn insert_flow(&mut self, code: &str, weekday: u32, hour: u32, rates: FlowRates) {
        self.activity.insert((code.to_string(), weekday, hour), rates);
    }

    /// Profile for `code`, or the documented defaults.
    pub fn profile(&self, code: &str) -> StationProfile {
        self.profiles.get(code).copied().unwrap_or_default()
    }

    /// Flow rates for (`code`, weekday with 0 = Monday, local hour).
    pub fn flow(&self, code: &str, weekday: u32, hour: u32) -> FlowRates {
        self.activity
            .get(&(code.to_string(), weekday, hour))
            .copied()
            .unwrap_or_default()
    }
}
