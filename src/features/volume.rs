//! Volume anomaly detection
//!
//! Two readings combined 60/40:
//! - z-score of the trailing window mean against the earlier history
//! - net direction of large executed prints

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{TradePrint, TradeSide};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VolumeConfig {
    /// Trailing samples compared against the rest of the history
    pub window: usize,
    /// |z| above this is a spike / dry-up
    pub z_threshold: f64,
    /// Prints at or above this USD size count as large
    pub large_order_usd: f64,
    /// Weight of the spike reading in the combined score
    pub spike_weight: f64,
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            window: 24,
            z_threshold: 2.0,
            large_order_usd: 1000.0,
            spike_weight: 0.6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VolumeSignal {
    InsufficientData,
    VolumeSpike,
    VolumeDry,
    Normal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderFlowSignal {
    NoData,
    SmartMoneyBuy,
    SmartMoneySell,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VolumeReading {
    pub signal: VolumeSignal,
    pub z_score: Option<f64>,
    pub spike_score: f64,
    pub flow: OrderFlowSignal,
    pub large_buy_usd: f64,
    pub large_sell_usd: f64,
    pub flow_score: f64,
    pub combined_score: f64,
}

pub struct VolumeAnalyzer {
    config: VolumeConfig,
}

impl VolumeAnalyzer {
    pub fn new(config: VolumeConfig) -> Self {
        Self { config }
    }

    pub fn analyze(&self, volume_history: &[f64], large_trades: &[TradePrint]) -> VolumeReading {
        let (signal, z_score, spike_score) = self.detect_spike(volume_history);
        let (flow, large_buy_usd, large_sell_usd, flow_score) = self.detect_large_orders(large_trades);

        let w = self.config.spike_weight;
        let combined_score = spike_score * w + flow_score * (1.0 - w);

        VolumeReading {
            signal,
            z_score,
            spike_score,
            flow,
            large_buy_usd,
            large_sell_usd,
            flow_score,
            combined_score,
        }
    }

    fn detect_spike(&self, history: &[f64]) -> (VolumeSignal, Option<f64>, f64) {
        let window = self.config.window;
        if history.len() <= window {
            return (VolumeSignal::InsufficientData, None, 0.5);
        }

        let (prior, recent) = history.split_at(history.len() - window);
        let (mean, std) = mean_std(prior);
        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;

        let z = if std > 0.0 { (recent_mean - mean) / std } else { 0.0 };
        if !z.is_finite() {
            return (VolumeSignal::InsufficientData, None, 0.5);
        }
        debug!(z, "volume z-score");

        if z > self.config.z_threshold {
            (VolumeSignal::VolumeSpike, Some(z), (0.5 + z * 0.1).min(0.9))
        } else if z < -self.config.z_threshold {
            (VolumeSignal::VolumeDry, Some(z), 0.3)
        } else {
            (VolumeSignal::Normal, Some(z), 0.5)
        }
    }

    fn detect_large_orders(&self, trades: &[TradePrint]) -> (OrderFlowSignal, f64, f64, f64) {
        if trades.is_empty() {
            return (OrderFlowSignal::NoData, 0.0, 0.0, 0.5);
        }

        let (mut buys, mut sells) = (0.0, 0.0);
        for t in trades.iter().filter(|t| t.size >= self.config.large_order_usd) {
            match t.side {
                TradeSide::Buy => buys += t.size,
                TradeSide::Sell => sells += t.size,
            }
        }

        if buys > sells * 2.0 {
            (OrderFlowSignal::SmartMoneyBuy, buys, sells, 0.8)
        } else if sells > buys * 2.0 {
            (OrderFlowSignal::SmartMoneySell, buys, sells, 0.2)
        } else {
            (OrderFlowSignal::Neutral, buys, sells, 0.5)
        }
    }
}

impl Default for VolumeAnalyzer {
    fn default() -> Self {
        Self::new(VolumeConfig::default())
    }
}

/// Mean and population standard deviation
pub(crate) fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
