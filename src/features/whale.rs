//! Large-holder flow classification

use serde::{Deserialize, Serialize};

use crate::types::WhaleFlow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WhaleSignal {
    Neutral,
    StrongAccumulation,
    StrongDistribution,
    Moderate,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WhaleReading {
    pub signal: WhaleSignal,
    pub bullish: bool,
}

impl WhaleReading {
    /// Classify aggregated flow; no activity is neutral and not bullish
    pub fn from_flow(flow: &WhaleFlow) -> Self {
        let (buy, sell) = (flow.buy_value, flow.sell_value);
        if buy <= 0.0 && sell <= 0.0 {
            return Self {
                signal: WhaleSignal::Neutral,
                bullish: false,
            };
        }
        if buy > sell * 2.0 {
            Self {
                signal: WhaleSignal::StrongAccumulation,
                bullish: true,
            }
        } else if sell > buy * 2.0 {
            Self {
                signal: WhaleSignal::StrongDistribution,
                bullish: false,
            }
        } else {
            Self {
                signal: WhaleSignal::Moderate,
                bullish: buy > sell,
            }
        }
    }

    /// Strong one-sided flow worth an anomaly alert
    pub fn is_anomalous(&self) -> bool {
        matches!(
            self.signal,
            WhaleSignal::StrongAccumulation | WhaleSignal::StrongDistribution
        )
    }

    /// Whale factor: bullish 0.8, otherwise 0.2; absent data is scored by the caller
    pub fn score(&self) -> f64 {
        if self.bullish {
            0.8
        } else {
            0.2
        }
    }
}
