//! Settlement Probability Model
//!
//! Turns the ensemble spread, the blended anchor and the live observation into
//! a probability table over integer settlement buckets.
//!
//! The settlement value is modelled as `N(mu, sigma)` where sigma comes from
//! the p10..p90 spread (±1.28σ) and mu is the anchor pulled toward the
//! ensemble median, then pinned up to the observed maximum when the day has
//! already run past it.

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::types::{round_half_up, EnsembleStats, Trend};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// p90 - p10 spans this many standard deviations
    pub sigma_divisor: f64,
    /// Lower bound on sigma
    pub sigma_floor: f64,
    /// Weight of the blended anchor against the ensemble median
    pub anchor_weight: f64,
    /// Extra headroom above the observed max while still rising
    pub rising_offset: f64,
    /// Buckets considered on each side of round(mu)
    pub bucket_radius: i64,
    /// Buckets below this mass are dropped
    pub min_probability: f64,
    /// Maximum buckets kept in the table
    pub max_buckets: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            sigma_divisor: 2.56,
            sigma_floor: 0.1,
            anchor_weight: 0.7,
            rising_offset: 0.3,
            bucket_radius: 2,
            min_probability: 0.01,
            max_buckets: 4,
        }
    }
}

/// What the model needs for one entity/day
#[derive(Debug, Clone, Copy, Default)]
pub struct SettlementInputs {
    pub ensemble: Option<EnsembleStats>,
    pub anchor: Option<f64>,
    pub observed_max: Option<f64>,
    pub trend: Trend,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketProbability {
    pub bucket: i64,
    pub probability: f64,
}

/// Probability per bucket, most likely first. Sums to 1 or is empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SettlementDistribution {
    pub mu: Option<f64>,
    pub sigma: Option<f64>,
    pub buckets: Vec<BucketProbability>,
}

impl SettlementDistribution {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn probability(&self, bucket: i64) -> f64 {
        self.buckets
            .iter()
            .find(|b| b.bucket == bucket)
            .map(|b| b.probability)
            .unwrap_or(0.0)
    }

    pub fn most_likely(&self) -> Option<&BucketProbability> {
        self.buckets.first()
    }

    pub fn total(&self) -> f64 {
        self.buckets.iter().map(|b| b.probability).sum()
    }
}

pub struct SettlementProbabilityModel {
    config: SettlementConfig,
}

impl SettlementProbabilityModel {
    pub fn new(config: SettlementConfig) -> Self {
        Self { config }
    }

    pub fn compute(&self, inputs: &SettlementInputs) -> SettlementDistribution {
        let Some(stats) = inputs.ensemble.filter(|s| s.is_finite()) else {
            return SettlementDistribution::default();
        };

        let sigma = ((stats.p90 - stats.p10) / self.config.sigma_divisor).max(self.config.sigma_floor);

        let mut mu = match inputs.anchor.filter(|a| a.is_finite()) {
            Some(anchor) => {
                self.config.anchor_weight * anchor + (1.0 - self.config.anchor_weight) * stats.p50
            }
            None => stats.p50,
        };

        let observed = inputs.observed_max.filter(|o| o.is_finite());
        if let Some(obs) = observed {
            if obs > mu {
                mu = match inputs.trend {
                    Trend::Rising => obs + self.config.rising_offset,
                    Trend::Falling | Trend::Flat => obs,
                };
            }
        }

        let min_bucket = observed.map(round_half_up);
        let buckets = self.bucket_probabilities(mu, sigma, min_bucket);
        debug!(mu, sigma, buckets = buckets.len(), "settlement distribution");

        SettlementDistribution {
            mu: Some(mu),
            sigma: Some(sigma),
            buckets,
        }
    }

    /// Mass of each bucket around `round(mu)` under `N(mu, sigma)`, skipping
    /// buckets strictly below `min_bucket`. Filtered, truncated to the top
    /// buckets and renormalized.
    pub fn bucket_probabilities(
        &self,
        mu: f64,
        sigma: f64,
        min_bucket: Option<i64>,
    ) -> Vec<BucketProbability> {
        if !(mu.is_finite() && sigma.is_finite()) {
            return Vec::new();
        }
        let Ok(normal) = Normal::new(mu, sigma.max(self.config.sigma_floor)) else {
            return Vec::new();
        };

        let center = round_half_up(mu);
        let radius = self.config.bucket_radius;
        let mut table: Vec<BucketProbability> = (center - radius..=center + radius)
            .filter(|b| min_bucket.map_or(true, |min| *b >= min))
            .map(|b| {
                let x = b as f64;
                BucketProbability {
                    bucket: b,
                    probability: normal.cdf(x + 0.5) - normal.cdf(x - 0.5),
                }
            })
            .filter(|b| b.probability >= self.config.min_probability)
            .collect();

        table.sort_by(|a, b| {
            b.probability
                .total_cmp(&a.probability)
                .then_with(|| a.bucket.cmp(&b.bucket))
        });
        table.truncate(self.config.max_buckets);

        let total: f64 = table.iter().map(|b| b.probability).sum();
        if !(total.is_finite() && total > 0.0) {
            return Vec::new();
        }
        for b in &mut table {
            b.probability /= total;
        }
        table
    }
}

impl Default for SettlementProbabilityModel {
    fn default() -> Self {
        Self::new(SettlementConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(p10: f64, p50: f64, p90: f64) -> Option<EnsembleStats> {
        Some(EnsembleStats { p10, p50, p90 })
    }

    #[test]
    fn empty_without_ensemble_stats() {
        let model = SettlementProbabilityModel::default();
        let dist = model.compute(&SettlementInputs {
            anchor: Some(28.0),
            observed_max: Some(26.0),
            ..Default::default()
        });
        assert!(dist.is_empty());
        assert_eq!(dist.total(), 0.0);
    }

    #[test]
    fn distribution_sums_to_one() {
        let model = SettlementProbabilityModel::default();
        let dist = model.compute(&SettlementInputs {
            ensemble: stats(25.0, 27.5, 30.0),
            anchor: Some(28.0),
            ..Default::default()
        });
        assert!(!dist.is_empty());
        assert!(dist.buckets.len() <= 4);
        assert!((dist.total() - 1.0).abs() < 1e-9);
        // mu = 0.7*28 + 0.3*27.5 = 27.85
        assert!((dist.mu.unwrap() - 27.85).abs() < 1e-9);
        assert_eq!(dist.most_likely().unwrap().bucket, 28);
    }

    #[test]
    fn buckets_below_observed_are_excluded() {
        let model = SettlementProbabilityModel::default();
        let table = model.bucket_probabilities(27.0, 1.0, Some(28));

        assert!(table.iter().all(|b| b.bucket >= 28));
        assert!(!table.iter().any(|b| b.bucket == 27));
        let total: f64 = table.iter().map(|b| b.probability).sum();
        assert!((total - 1.0).abs() < 1e-9);
        assert_eq!(table[0].bucket, 28);
    }

    #[test]
    fn observed_above_mu_pins_the_center() {
        let model = SettlementProbabilityModel::default();
        let base = SettlementInputs {
            ensemble: stats(24.0, 25.0, 26.0),
            anchor: Some(25.0),
            observed_max: Some(27.2),
            trend: Trend::Falling,
        };

        let falling = model.compute(&base);
        assert!((falling.mu.unwrap() - 27.2).abs() < 1e-9);
        assert!(falling.buckets.iter().all(|b| b.bucket >= 27));

        let rising = model.compute(&SettlementInputs {
            trend: Trend::Rising,
            ..base
        });
        assert!((rising.mu.unwrap() - 27.5).abs() < 1e-9);

        let flat = model.compute(&SettlementInputs {
            trend: Trend::Flat,
            ..base
        });
        assert_eq!(flat.mu, falling.mu);
    }

    #[test]
    fn narrow_spread_uses_sigma_floor() {
        let model = SettlementProbabilityModel::default();
        let dist = model.compute(&SettlementInputs {
            ensemble: stats(26.0, 26.0, 26.0),
            ..Default::default()
        });
        assert_eq!(dist.sigma, Some(0.1));
        assert_eq!(dist.buckets.len(), 1);
        assert_eq!(dist.buckets[0].bucket, 26);
        assert!((dist.buckets[0].probability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn missing_anchor_uses_median() {
        let model = SettlementProbabilityModel::default();
        let dist = model.compute(&SettlementInputs {
            ensemble: stats(20.0, 22.0, 24.0),
            ..Default::default()
        });
        assert_eq!(dist.mu, Some(22.0));
    }
}
