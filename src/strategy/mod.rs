//! Signal Scorer - multi-factor weighted scoring
//!
//! Six factors, each a sub-score in [0, 1]:
//!
//! | factor      | default weight | source                                  |
//! |-------------|----------------|-----------------------------------------|
//! | statistical | 0.50           | settlement model probability for a side |
//! | consensus   | 0.15           | observation sources agree / disagree    |
//! | volume      | 0.15           | volume z-score + large-order flow       |
//! | orderbook   | 0.10           | tradability gate + imbalance            |
//! | technical   | 0.05           | RSI / Bollinger / momentum              |
//! | whale       | 0.05           | large-holder flow bias                  |
//!
//! The weighted sum maps onto a recommendation ladder. An untradeable
//! orderbook zeroes its factor and caps the composite. Directional inputs
//! arrive YES-oriented and are mirrored before scoring a NO entry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::features::{
    OrderbookAnalyzer, OrderbookConfig, TechnicalAnalyzer, TechnicalConfig, VolumeAnalyzer,
    VolumeConfig, VolumeSignal, WhaleReading,
};
use crate::types::{MarketSnapshot, OptionSpec, Side, TradePrint};

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct FactorWeights {
    pub statistical: f64,
    pub consensus: f64,
    pub volume: f64,
    pub orderbook: f64,
    pub technical: f64,
    pub whale: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            statistical: 0.50,
            consensus: 0.15,
            volume: 0.15,
            orderbook: 0.10,
            technical: 0.05,
            whale: 0.05,
        }
    }
}

impl FactorWeights {
    pub fn total(&self) -> f64 {
        self.statistical + self.consensus + self.volume + self.orderbook + self.technical + self.whale
    }

    pub fn normalize(&mut self) {
        let total = self.total();
        if total > 0.0 && total.is_finite() {
            self.statistical /= total;
            self.consensus /= total;
            self.volume /= total;
            self.orderbook /= total;
            self.technical /= total;
            self.whale /= total;
        } else {
            *self = Self::default();
        }
    }

    pub fn get(&self, factor: Factor) -> f64 {
        match factor {
            Factor::Statistical => self.statistical,
            Factor::Consensus => self.consensus,
            Factor::Volume => self.volume,
            Factor::Orderbook => self.orderbook,
            Factor::Technical => self.technical,
            Factor::Whale => self.whale,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weights: FactorWeights,
    /// Composite ceiling when the orderbook gate fails
    pub untradeable_cap: f64,
    /// Minimum composite for a BUY decision
    pub min_confidence: f64,
    /// Minimum side price (cents) for a BUY decision
    pub min_buy_price_cents: f64,
    pub volume: VolumeConfig,
    pub orderbook: OrderbookConfig,
    pub technical: TechnicalConfig,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weights: FactorWeights::default(),
            untradeable_cap: 0.35,
            min_confidence: 0.65,
            min_buy_price_cents: 85.0,
            volume: VolumeConfig::default(),
            orderbook: OrderbookConfig::default(),
            technical: TechnicalConfig::default(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Signal
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Factor {
    Statistical,
    Consensus,
    Volume,
    Orderbook,
    Technical,
    Whale,
}

impl Factor {
    pub const ALL: [Factor; 6] = [
        Factor::Statistical,
        Factor::Consensus,
        Factor::Volume,
        Factor::Orderbook,
        Factor::Technical,
        Factor::Whale,
    ];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    NoAction,
    WeakSell,
    Hold,
    WeakBuy,
    Buy,
    StrongBuy,
}

impl Recommendation {
    pub fn from_score(score: f64) -> Self {
        if score > 0.80 {
            Recommendation::StrongBuy
        } else if score > 0.65 {
            Recommendation::Buy
        } else if score > 0.50 {
            Recommendation::WeakBuy
        } else if score > 0.35 {
            Recommendation::Hold
        } else if score > 0.20 {
            Recommendation::WeakSell
        } else {
            Recommendation::NoAction
        }
    }
}

impl fmt::Display for Recommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Recommendation::StrongBuy => "STRONG_BUY",
            Recommendation::Buy => "BUY",
            Recommendation::WeakBuy => "WEAK_BUY",
            Recommendation::Hold => "HOLD",
            Recommendation::WeakSell => "WEAK_SELL",
            Recommendation::NoAction => "NO_ACTION",
        };
        write!(f, "{}", s)
    }
}

/// Everything the scorer needs for one option side
#[derive(Debug, Clone, Copy)]
pub struct ScoreInputs<'a> {
    pub option: &'a OptionSpec,
    pub snapshot: &'a MarketSnapshot,
    pub side: Side,
    /// Settlement model probability that the scored side wins
    pub model_probability: f64,
    pub consensus: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub option_id: String,
    pub composite_score: f64,
    pub recommendation: Recommendation,
    pub subscores: BTreeMap<Factor, f64>,
    pub tradeable: bool,
    pub volume_signal: VolumeSignal,
    /// Market-level whale reading on the YES token
    pub whale: Option<WhaleReading>,
}

impl Signal {
    /// Strong one-sided volume or whale activity
    pub fn is_anomalous(&self) -> bool {
        self.volume_signal == VolumeSignal::VolumeSpike
            || self.whale.map_or(false, |w| w.is_anomalous())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeAction {
    Buy,
    Sell,
    Hold,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: TradeAction,
    pub confidence: f64,
    pub price_cents: f64,
}

// ─────────────────────────────────────────────────────────────────
// Scorer
// ─────────────────────────────────────────────────────────────────

pub struct SignalScorer {
    weights: FactorWeights,
    config: ScoringConfig,
    volume: VolumeAnalyzer,
    orderbook: OrderbookAnalyzer,
    technical: TechnicalAnalyzer,
}

impl SignalScorer {
    pub fn new(config: ScoringConfig) -> Self {
        let mut weights = config.weights;
        weights.normalize();
        Self {
            weights,
            volume: VolumeAnalyzer::new(config.volume.clone()),
            orderbook: OrderbookAnalyzer::new(config.orderbook.clone()),
            technical: TechnicalAnalyzer::new(config.technical.clone()),
            config,
        }
    }

    pub fn weights(&self) -> &FactorWeights {
        &self.weights
    }

    pub fn score(&self, inputs: &ScoreInputs<'_>) -> Signal {
        let option = inputs.option;
        let mut subscores = BTreeMap::new();

        let statistical = if inputs.model_probability.is_finite() {
            inputs.model_probability.clamp(0.0, 1.0)
        } else {
            warn!(option = %option.id, "non-finite model probability, scoring neutral");
            0.5
        };
        subscores.insert(Factor::Statistical, statistical);

        let consensus = match inputs.consensus {
            Some(true) => 1.0,
            Some(false) => 0.3,
            None => 0.5,
        };
        subscores.insert(Factor::Consensus, consensus);

        let side = inputs.side;
        let trades: Vec<TradePrint> = option.large_trades.iter().map(|t| t.for_side(side)).collect();
        let volume = self.volume.analyze(&option.volume_history, &trades);
        subscores.insert(Factor::Volume, volume.combined_score);

        let tradeable = self.orderbook.is_tradeable(inputs.snapshot);
        let book_score = if !tradeable {
            0.0
        } else {
            option
                .orderbook
                .as_ref()
                .map(|book| self.orderbook.analyze(&book.for_side(side)).support())
                .unwrap_or(0.5)
        };
        subscores.insert(Factor::Orderbook, book_score);

        let prices: Vec<f64> = option.price_history.iter().map(|p| side.adjust_price(*p)).collect();
        let technical = self.technical.analyze(&prices);
        subscores.insert(Factor::Technical, technical.combined_score);

        let whale_score = option
            .whale
            .map(|flow| WhaleReading::from_flow(&flow.for_side(side)).score())
            .unwrap_or(0.5);
        subscores.insert(Factor::Whale, whale_score);

        let mut composite: f64 = Factor::ALL
            .iter()
            .map(|f| self.weights.get(*f) * subscores.get(f).copied().unwrap_or(0.5))
            .sum();
        composite = composite.clamp(0.0, 1.0);
        if !tradeable {
            composite = composite.min(self.config.untradeable_cap);
        }

        let recommendation = Recommendation::from_score(composite);
        debug!(
            option = %option.id,
            %side,
            composite,
            %recommendation,
            tradeable,
            "option scored"
        );

        Signal {
            option_id: option.id.clone(),
            composite_score: composite,
            recommendation,
            subscores,
            tradeable,
            volume_signal: volume.signal,
            whale: option.whale.as_ref().map(WhaleReading::from_flow),
        }
    }

    /// BUY / SELL / HOLD for a scored signal at the side's price
    pub fn decide(&self, signal: &Signal, price_cents: f64) -> TradeDecision {
        let score = signal.composite_score;
        let rec = signal.recommendation;

        let buy = score >= self.config.min_confidence
            && matches!(rec, Recommendation::StrongBuy | Recommendation::Buy)
            && price_cents >= self.config.min_buy_price_cents;
        let sell = score < 0.35 || matches!(rec, Recommendation::WeakSell | Recommendation::NoAction);

        let action = if buy {
            TradeAction::Buy
        } else if sell {
            TradeAction::Sell
        } else {
            TradeAction::Hold
        };

        TradeDecision {
            action,
            confidence: score,
            price_cents,
        }
    }
}

impl Default for SignalScorer {
    fn default() -> Self {
        Self::new(ScoringConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BookLevel, OrderBook, WhaleFlow};
    use chrono::Utc;

    fn option() -> OptionSpec {
        OptionSpec {
            id: "nyc-28".into(),
            bucket: 28,
            deadline: Utc::now(),
            volume_history: Vec::new(),
            price_history: Vec::new(),
            large_trades: Vec::new(),
            orderbook: None,
            whale: None,
        }
    }

    fn snapshot(bid: f64, ask: f64, depth: f64) -> MarketSnapshot {
        MarketSnapshot {
            id: "nyc-28".into(),
            price_cents: (bid + ask) / 2.0,
            ask_cents: ask,
            bid_cents: bid,
            book_depth_usd: depth,
            volume_usd: 5000.0,
        }
    }

    #[test]
    fn weights_normalize() {
        let mut w = FactorWeights {
            statistical: 2.0,
            consensus: 1.0,
            volume: 1.0,
            orderbook: 0.0,
            technical: 0.0,
            whale: 0.0,
        };
        w.normalize();
        assert!((w.total() - 1.0).abs() < 1e-12);
        assert_eq!(w.statistical, 0.5);

        let mut zero = FactorWeights {
            statistical: 0.0,
            consensus: 0.0,
            volume: 0.0,
            orderbook: 0.0,
            technical: 0.0,
            whale: 0.0,
        };
        zero.normalize();
        assert_eq!(zero, FactorWeights::default());
    }

    #[test]
    fn ladder_boundaries() {
        assert_eq!(Recommendation::from_score(0.81), Recommendation::StrongBuy);
        assert_eq!(Recommendation::from_score(0.80), Recommendation::Buy);
        assert_eq!(Recommendation::from_score(0.65), Recommendation::WeakBuy);
        assert_eq!(Recommendation::from_score(0.50), Recommendation::Hold);
        assert_eq!(Recommendation::from_score(0.35), Recommendation::WeakSell);
        assert_eq!(Recommendation::from_score(0.20), Recommendation::NoAction);
    }

    #[test]
    fn strong_model_with_agreement_is_a_buy() {
        let scorer = SignalScorer::default();
        let mut opt = option();
        opt.orderbook = Some(OrderBook {
            bids: vec![BookLevel { price: 0.90, size: 400.0 }],
            asks: vec![BookLevel { price: 0.91, size: 100.0 }],
        });
        opt.whale = Some(WhaleFlow {
            buy_value: 5000.0,
            sell_value: 100.0,
        });
        let snap = snapshot(90.0, 91.0, 500.0);

        let signal = scorer.score(&ScoreInputs {
            option: &opt,
            snapshot: &snap,
            side: Side::Yes,
            model_probability: 0.95,
            consensus: Some(true),
        });
        // 0.5*0.95 + 0.15*1.0 + 0.15*0.5 + 0.10*0.9 + 0.05*0.5 + 0.05*0.8
        assert!((signal.composite_score - 0.855).abs() < 1e-9);
        assert_eq!(signal.recommendation, Recommendation::StrongBuy);
        assert!(signal.tradeable);
        assert!(signal.is_anomalous());
        assert_eq!(signal.subscores.len(), 6);

        assert_eq!(scorer.decide(&signal, 91.0).action, TradeAction::Buy);
        // Too cheap to buy
        assert_eq!(scorer.decide(&signal, 60.0).action, TradeAction::Hold);
    }

    #[test]
    fn untradeable_book_caps_composite() {
        let scorer = SignalScorer::default();
        let opt = option();
        let snap = snapshot(70.0, 90.0, 500.0);

        let signal = scorer.score(&ScoreInputs {
            option: &opt,
            snapshot: &snap,
            side: Side::Yes,
            model_probability: 1.0,
            consensus: Some(true),
        });
        assert!(!signal.tradeable);
        assert_eq!(signal.subscores[&Factor::Orderbook], 0.0);
        assert!(signal.composite_score <= 0.35);
        assert_eq!(scorer.decide(&signal, 90.0).action, TradeAction::Sell);
    }

    #[test]
    fn missing_inputs_are_neutral() {
        let scorer = SignalScorer::default();
        let opt = option();
        let snap = snapshot(49.0, 51.0, 500.0);

        let signal = scorer.score(&ScoreInputs {
            option: &opt,
            snapshot: &snap,
            side: Side::Yes,
            model_probability: f64::NAN,
            consensus: None,
        });
        assert!((signal.composite_score - 0.5).abs() < 1e-9);
        assert_eq!(signal.subscores[&Factor::Statistical], 0.5);
        assert!(!signal.is_anomalous());
        assert_eq!(scorer.decide(&signal, 50.0).action, TradeAction::Hold);
    }

    #[test]
    fn yes_whale_accumulation_weighs_against_no() {
        let scorer = SignalScorer::default();
        let mut opt = option();
        opt.whale = Some(WhaleFlow {
            buy_value: 5000.0,
            sell_value: 100.0,
        });
        let snap = snapshot(49.0, 51.0, 500.0);
        let score = |side| {
            scorer.score(&ScoreInputs {
                option: &opt,
                snapshot: &snap,
                side,
                model_probability: 0.9,
                consensus: Some(true),
            })
        };

        let yes = score(Side::Yes);
        let no = score(Side::No);
        assert_eq!(yes.subscores[&Factor::Whale], 0.8);
        assert_eq!(no.subscores[&Factor::Whale], 0.2);
        assert!(no.composite_score < yes.composite_score);
        // The alert still reports the market-level accumulation
        assert!(no.is_anomalous());
    }

    #[test]
    fn no_side_reads_the_mirrored_book_and_flow() {
        let scorer = SignalScorer::default();
        let mut opt = option();
        // Bid-heavy YES book is an ask-heavy NO book
        opt.orderbook = Some(OrderBook {
            bids: vec![BookLevel { price: 0.90, size: 400.0 }],
            asks: vec![BookLevel { price: 0.91, size: 100.0 }],
        });
        opt.large_trades = vec![TradePrint {
            side: crate::types::TradeSide::Buy,
            size: 5000.0,
        }];
        // YES climbing every tick
        opt.price_history = (0..20).map(|i| 70.0 + i as f64).collect();
        let snap = snapshot(90.0, 91.0, 500.0);
        let score = |side| {
            scorer.score(&ScoreInputs {
                option: &opt,
                snapshot: &snap,
                side,
                model_probability: 0.5,
                consensus: None,
            })
        };

        let yes = score(Side::Yes);
        let no = score(Side::No);
        for factor in [Factor::Orderbook, Factor::Volume] {
            assert!(
                no.subscores[&factor] < 0.5 && yes.subscores[&factor] > 0.5,
                "{:?}: yes {} no {}",
                factor,
                yes.subscores[&factor],
                no.subscores[&factor]
            );
        }
        assert!(no.subscores[&Factor::Technical] != yes.subscores[&Factor::Technical]);
    }
}
