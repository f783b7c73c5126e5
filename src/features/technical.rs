//! Technical indicators on an option's price history
//!
//! RSI, Bollinger position and momentum, folded into one score in [0, 1].

use serde::{Deserialize, Serialize};

use super::volume::mean_std;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TechnicalConfig {
    pub rsi_period: usize,
    pub bollinger_period: usize,
    pub bollinger_k: f64,
    pub momentum_period: usize,
}

impl Default for TechnicalConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            bollinger_period: 20,
            bollinger_k: 2.0,
            momentum_period: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TechnicalReading {
    pub rsi: f64,
    pub rsi_score: f64,
    pub bands: Option<Bands>,
    pub bb_score: f64,
    pub momentum: f64,
    pub combined_score: f64,
}

pub struct TechnicalAnalyzer {
    config: TechnicalConfig,
}

impl TechnicalAnalyzer {
    pub fn new(config: TechnicalConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, prices: &[f64]) -> TechnicalReading {
        let rsi = self.rsi(prices);
        let rsi_score = if rsi > 70.0 {
            0.3
        } else if rsi < 30.0 {
            0.8
        } else {
            0.5
        };

        let bands = self.bollinger(prices);
        let bb_score = match (bands, prices.last()) {
            (Some(b), Some(&last)) if last > b.upper => 0.7,
            (Some(b), Some(&last)) if last < b.lower => 0.3,
            _ => 0.5,
        };

        let momentum = self.momentum(prices);
        let combined = rsi_score * 0.5 + bb_score * 0.3 + (0.5 + momentum * 2.0) * 0.2;

        TechnicalReading {
            rsi,
            rsi_score,
            bands,
            bb_score,
            momentum,
            combined_score: if combined.is_finite() { combined.clamp(0.0, 1.0) } else { 0.5 },
        }
    }

    /// Simple-average RSI over the last `rsi_period` deltas; 50 when short
    pub fn rsi(&self, prices: &[f64]) -> f64 {
        let period = self.config.rsi_period;
        if period == 0 || prices.len() < period + 1 {
            return 50.0;
        }

        let deltas: Vec<f64> = prices.windows(2).map(|w| w[1] - w[0]).collect();
        let recent = &deltas[deltas.len() - period..];
        let avg_gain = recent.iter().map(|d| d.max(0.0)).sum::<f64>() / period as f64;
        let avg_loss = recent.iter().map(|d| (-d).max(0.0)).sum::<f64>() / period as f64;

        if avg_loss == 0.0 {
            return 100.0;
        }
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    }

    pub fn bollinger(&self, prices: &[f64]) -> Option<Bands> {
        let period = self.config.bollinger_period;
        if period == 0 || prices.len() < period {
            return None;
        }
        let (middle, std) = mean_std(&prices[prices.len() - period..]);
        Some(Bands {
            upper: middle + self.config.bollinger_k * std,
            middle,
            lower: middle - self.config.bollinger_k * std,
        })
    }

    /// `current / price n periods ago - 1`
    pub fn momentum(&self, prices: &[f64]) -> f64 {
        let period = self.config.momentum_period;
        if prices.len() < period + 1 {
            return 0.0;
        }
        let current = prices[prices.len() - 1];
        let past = prices[prices.len() - 1 - period];
        if past == 0.0 {
            0.0
        } else {
            current / past - 1.0
        }
    }
}

impl Default for TechnicalAnalyzer {
    fn default() -> Self {
        Self::new(TechnicalConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_history_is_neutral() {
        let reading = TechnicalAnalyzer::default().analyze(&[]);
        assert_eq!(reading.rsi, 50.0);
        assert!(reading.bands.is_none());
        assert!((reading.combined_score - 0.5).abs() < 1e-12);
    }

    #[test]
    fn steady_rise_is_overbought() {
        let prices: Vec<f64> = (0..30).map(|i| 50.0 + i as f64).collect();
        let analyzer = TechnicalAnalyzer::default();
        assert_eq!(analyzer.rsi(&prices), 100.0);

        let reading = analyzer.analyze(&prices);
        assert_eq!(reading.rsi_score, 0.3);
        assert!((reading.momentum - (79.0 / 69.0 - 1.0)).abs() < 1e-12);
        assert!(reading.combined_score >= 0.0 && reading.combined_score <= 1.0);
    }

    #[test]
    fn rsi_uses_simple_average() {
        // 14 deltas: seven +2, seven -1 -> rs = 2 -> rsi = 66.67
        let mut prices = vec![50.0];
        for i in 0..14 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 2.0 } else { last - 1.0 });
        }
        let rsi = TechnicalAnalyzer::default().rsi(&prices);
        assert!((rsi - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn break_below_lower_band() {
        let mut prices = vec![50.0; 19];
        prices.push(40.0);
        let reading = TechnicalAnalyzer::default().analyze(&prices);
        assert_eq!(reading.bb_score, 0.3);
    }
}
