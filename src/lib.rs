//! wxdesk Library
//!
//! Forecast-to-decision core for temperature-bucket prediction markets:
//! skill-weighted model blending, settlement probabilities, signal scoring,
//! position sizing and a paper ledger.

pub mod alerts;
pub mod clock;
pub mod config;
pub mod cycle;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod paper_trading;
pub mod persistence;
pub mod risk;
pub mod sources;
pub mod strategy;
pub mod types;

pub use cycle::{CycleDriver, CycleParts, CycleReport};
pub use error::CoreError;
