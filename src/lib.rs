pub mod api;
pub mod collector;
pub mod config;
pub mod error;
pub mod features;
pub mod feed;
pub mod history;
pub mod lags;
pub mod model;
pub mod prediction;
pub mod scheduler;
pub mod snapshots;
pub mod state;
pub mod weather;
