//! Orderbook reading
//!
//! Tradability gate on spread and depth, then a supply/demand reading from
//! the bid/ask volume imbalance and resting walls.

use serde::{Deserialize, Serialize};

use crate::types::{MarketSnapshot, OrderBook};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrderbookConfig {
    /// Maximum ask - bid spread in cents for a tradeable market
    pub max_spread_cents: f64,
    /// Minimum resting depth in USD on the side being bought
    pub min_depth_usd: f64,
    /// A single level above this size is a wall
    pub wall_threshold: f64,
    /// Relative spread above this reduces confidence
    pub wide_spread_ratio: f64,
}

impl Default for OrderbookConfig {
    fn default() -> Self {
        Self {
            max_spread_cents: 10.0,
            min_depth_usd: 50.0,
            wall_threshold: 500.0,
            wide_spread_ratio: 0.05,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookSignal {
    Neutral,
    Bullish,
    Bearish,
    StrongBuy,
    StrongSell,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookReading {
    pub signal: BookSignal,
    pub imbalance: Option<f64>,
    pub relative_spread: Option<f64>,
    pub low_liquidity: bool,
    pub confidence: f64,
}

impl BookReading {
    fn neutral() -> Self {
        Self {
            signal: BookSignal::Neutral,
            imbalance: None,
            relative_spread: None,
            low_liquidity: false,
            confidence: 0.5,
        }
    }

    /// How much the book favors buying: bearish readings invert their confidence
    pub fn support(&self) -> f64 {
        match self.signal {
            BookSignal::Bearish | BookSignal::StrongSell => 1.0 - self.confidence,
            BookSignal::Bullish | BookSignal::StrongBuy | BookSignal::Neutral => self.confidence,
        }
    }
}

pub struct OrderbookAnalyzer {
    config: OrderbookConfig,
}

impl OrderbookAnalyzer {
    pub fn new(config: OrderbookConfig) -> Self {
        Self { config }
    }

    /// `spread ≤ max_spread_cents` and enough depth to fill against
    pub fn is_tradeable(&self, snapshot: &MarketSnapshot) -> bool {
        let spread = snapshot.ask_cents - snapshot.bid_cents;
        spread.is_finite()
            && spread <= self.config.max_spread_cents
            && snapshot.book_depth_usd >= self.config.min_depth_usd
    }

    /// Imbalance reading; an empty or missing side is neutral
    pub fn analyze(&self, book: &OrderBook) -> BookReading {
        let (Some(best_bid), Some(best_ask)) = (book.bids.first(), book.asks.first()) else {
            return BookReading::neutral();
        };

        let bid_volume: f64 = book.bids.iter().map(|l| l.size).sum();
        let ask_volume: f64 = book.asks.iter().map(|l| l.size).sum();
        let imbalance = if ask_volume > 0.0 { bid_volume / ask_volume } else { 0.0 };

        let max_bid = book.bids.iter().map(|l| l.size).fold(0.0, f64::max);
        let max_ask = book.asks.iter().map(|l| l.size).fold(0.0, f64::max);

        let relative_spread = if best_ask.price > 0.0 {
            (best_ask.price - best_bid.price) / best_ask.price
        } else {
            0.0
        };

        let (mut signal, mut confidence) = if imbalance > 2.0 {
            (BookSignal::Bullish, (0.5 + (imbalance - 1.0) / 4.0).min(0.9))
        } else if imbalance > 0.0 && imbalance < 0.5 {
            (BookSignal::Bearish, (0.5 + (1.0 / imbalance - 1.0) / 4.0).min(0.9))
        } else {
            (BookSignal::Neutral, 0.5)
        };

        if max_bid > self.config.wall_threshold && bid_volume > ask_volume {
            signal = BookSignal::StrongBuy;
            confidence = 0.85;
        } else if max_ask > self.config.wall_threshold && ask_volume > bid_volume {
            signal = BookSignal::StrongSell;
            confidence = 0.85;
        }

        let low_liquidity = relative_spread > self.config.wide_spread_ratio;
        if low_liquidity {
            confidence *= 0.8;
        }

        BookReading {
            signal,
            imbalance: Some(imbalance),
            relative_spread: Some(relative_spread),
            low_liquidity,
            confidence,
        }
    }
}

impl Default for OrderbookAnalyzer {
    fn default() -> Self {
        Self::new(OrderbookConfig::default())
    }
}
