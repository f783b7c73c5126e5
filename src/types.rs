//! Core types used throughout WxDesk
//!
//! Defines the normalized inputs handed over by collaborators (forecast sets,
//! market snapshots) and the small enums shared by every pipeline stage.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Forecasting model name (e.g. "ECMWF", "GFS")
pub type ModelName = String;

/// Per-model point forecasts for one entity and day
pub type ModelForecasts = BTreeMap<ModelName, f64>;

/// Side of a binary option
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    /// Price of this side given the YES price in cents
    pub fn adjust_price(&self, yes_price_cents: f64) -> f64 {
        match self {
            Side::Yes => yes_price_cents,
            Side::No => 100.0 - yes_price_cents,
        }
    }

}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "YES" | "Y" => Ok(Side::Yes),
            "NO" | "N" => Ok(Side::No),
            other => Err(format!("unknown side: {}", other)),
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Yes => write!(f, "YES"),
            Side::No => write!(f, "NO"),
        }
    }
}

/// Direction of the live observation over the last hours
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Rising,
    Falling,
    #[default]
    Flat,
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trend::Rising => write!(f, "rising"),
            Trend::Falling => write!(f, "falling"),
            Trend::Flat => write!(f, "flat"),
        }
    }
}

/// Ensemble percentile spread for one entity/day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnsembleStats {
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

impl EnsembleStats {
    pub fn is_finite(&self) -> bool {
        self.p10.is_finite() && self.p50.is_finite() && self.p90.is_finite()
    }
}

/// Everything collaborators know about one entity's forecast for a day
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ForecastSet {
    #[serde(default)]
    pub forecasts: ModelForecasts,
    #[serde(default)]
    pub ensemble: Option<EnsembleStats>,
    /// Highest value observed so far today
    #[serde(default)]
    pub observed_max: Option<f64>,
    #[serde(default)]
    pub trend: Trend,
}

/// Live quote for one tradable option (prices are YES-side cents)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub id: String,
    pub price_cents: f64,
    pub ask_cents: f64,
    pub bid_cents: f64,
    pub book_depth_usd: f64,
    pub volume_usd: f64,
}

impl MarketSnapshot {
    /// Buy price for a side: YES lifts the ask, NO lifts the complement of the bid
    pub fn buy_price(&self, side: Side) -> f64 {
        match side {
            Side::Yes => self.ask_cents,
            Side::No => 100.0 - self.bid_cents,
        }
    }

    /// Whether the market has effectively resolved already
    pub fn is_ended(&self) -> bool {
        self.price_cents <= 1.0 || self.price_cents >= 99.0
    }
}

/// One tradable option belonging to an entity/day event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionSpec {
    pub id: String,
    /// Settlement bucket this option pays out on
    pub bucket: i64,
    /// Settlement deadline
    pub deadline: DateTime<Utc>,
    #[serde(default)]
    pub volume_history: Vec<f64>,
    /// YES price in cents, oldest first
    #[serde(default)]
    pub price_history: Vec<f64>,
    #[serde(default)]
    pub large_trades: Vec<TradePrint>,
    #[serde(default)]
    pub orderbook: Option<OrderBook>,
    #[serde(default)]
    pub whale: Option<WhaleFlow>,
}

/// Normalized per-entity input for one cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityInput {
    pub entity: String,
    pub date: NaiveDate,
    pub forecast: ForecastSet,
    #[serde(default)]
    pub options: Vec<OptionSpec>,
    /// Whether independent observation sources agree on today's value
    #[serde(default)]
    pub consensus: Option<bool>,
    /// Final observed value once the day has stabilized
    #[serde(default)]
    pub settled_actual: Option<f64>,
}

impl EntityInput {
    /// Replace the forecast side with a fresher reading; options are kept
    pub fn apply(&mut self, update: ForecastUpdate) {
        self.forecast = update.forecast;
        self.consensus = update.consensus;
        self.settled_actual = update.settled_actual;
    }
}

/// Forecast side of an [`EntityInput`], refreshed every cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastUpdate {
    pub entity: String,
    pub date: NaiveDate,
    pub forecast: ForecastSet,
    #[serde(default)]
    pub consensus: Option<bool>,
    #[serde(default)]
    pub settled_actual: Option<f64>,
}

impl From<EntityInput> for ForecastUpdate {
    fn from(input: EntityInput) -> Self {
        Self {
            entity: input.entity,
            date: input.date,
            forecast: input.forecast,
            consensus: input.consensus,
            settled_actual: input.settled_actual,
        }
    }
}

/// Trade direction of an executed print
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// Executed trade print on the YES token (size in USD)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradePrint {
    pub side: TradeSide,
    pub size: f64,
}

impl TradePrint {
    /// The same print seen from `side`: buying YES is selling NO
    pub fn for_side(&self, side: Side) -> Self {
        match side {
            Side::Yes => *self,
            Side::No => Self {
                side: match self.side {
                    TradeSide::Buy => TradeSide::Sell,
                    TradeSide::Sell => TradeSide::Buy,
                },
                size: self.size,
            },
        }
    }
}

/// Orderbook level (price in 0..1, size in shares)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookLevel {
    pub price: f64,
    pub size: f64,
}

/// Orderbook for the YES token, best levels first
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderBook {
    #[serde(default)]
    pub bids: Vec<BookLevel>,
    #[serde(default)]
    pub asks: Vec<BookLevel>,
}

impl OrderBook {
    /// Book of `side`: the NO book bids where YES is offered, at `1 - price`
    pub fn for_side(&self, side: Side) -> OrderBook {
        match side {
            Side::Yes => self.clone(),
            Side::No => {
                let flip = |levels: &[BookLevel]| {
                    levels
                        .iter()
                        .map(|l| BookLevel {
                            price: 1.0 - l.price,
                            size: l.size,
                        })
                        .collect()
                };
                OrderBook {
                    bids: flip(&self.asks),
                    asks: flip(&self.bids),
                }
            }
        }
    }
}

/// Aggregated large-holder flow for one market (USD)
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct WhaleFlow {
    pub buy_value: f64,
    pub sell_value: f64,
}

impl WhaleFlow {
    /// Flow of `side`: YES accumulation is NO distribution
    pub fn for_side(&self, side: Side) -> Self {
        match side {
            Side::Yes => *self,
            Side::No => Self {
                buy_value: self.sell_value,
                sell_value: self.buy_value,
            },
        }
    }
}

/// Round half up, the convention settlements are resolved with
pub fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}
