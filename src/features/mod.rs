//! Feature Engine - settlement model and per-option sub-signals
//!
//! - Settlement probability table from ensemble spread + anchor + observation
//! - Volume anomaly / large-order flow
//! - Orderbook tradability gate and imbalance reading
//! - Technical indicators on the option's price history
//! - Large-holder (whale) flow classification

pub mod orderbook;
pub mod settlement;
pub mod technical;
pub mod volume;
pub mod whale;

pub use orderbook::{BookReading, BookSignal, OrderbookAnalyzer, OrderbookConfig};
pub use settlement::{
    BucketProbability, SettlementConfig, SettlementDistribution, SettlementInputs,
    SettlementProbabilityModel,
};
pub use technical::{TechnicalAnalyzer, TechnicalConfig, TechnicalReading};
pub use volume::{VolumeAnalyzer, VolumeConfig, VolumeReading, VolumeSignal};
pub use whale::{WhaleReading, WhaleSignal};
