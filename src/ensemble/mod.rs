//! Ensemble Blender - accuracy-weighted model blending
//!
//! Weights each forecasting model by the inverse of its recent mean absolute
//! error (MAE) against observed actuals:
//!
//! ```text
//! w_i = (1 / (MAE_i + ε)) / Σ_j (1 / (MAE_j + ε))
//! ```
//!
//! Falls back to an equal-weight mean when the entity has too little
//! settled history to measure error.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, warn};

use crate::persistence::ForecastHistory;
use crate::types::{ModelForecasts, ModelName};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BlendConfig {
    /// Maximum number of settled days used to measure error
    pub lookback_days: usize,
    /// Minimum settled days before error weighting kicks in
    pub min_valid_days: usize,
    /// Additive smoothing in the inverse-error weight (guards MAE = 0)
    pub smoothing: f64,
    /// MAE assumed for a model with no historical samples
    pub default_mae: f64,
    /// Number of models listed in the rationale
    pub rationale_top_n: usize,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            lookback_days: 7,
            min_valid_days: 2,
            smoothing: 0.1,
            default_mae: 2.0,
            rationale_top_n: 3,
        }
    }
}

/// How a blend was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlendMethod {
    /// No history at all for the entity
    EqualWeightNoHistory,
    /// Some history, but fewer settled days than required
    EqualWeightInsufficient { days_used: usize },
    /// Inverse-MAE weighting
    InverseError { days_used: usize },
}

impl fmt::Display for BlendMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlendMethod::EqualWeightNoHistory => write!(f, "equal-weight, insufficient history"),
            BlendMethod::EqualWeightInsufficient { days_used } => {
                write!(f, "equal-weight, only {} day(s) of history", days_used)
            }
            BlendMethod::InverseError { days_used } => {
                write!(f, "inverse-MAE over {} day(s)", days_used)
            }
        }
    }
}

/// One line of the audit rationale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelContribution {
    pub model: ModelName,
    pub weight_pct: f64,
    /// `None` for equal-weight blends
    pub mae: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendedForecast {
    pub value: f64,
    pub method: BlendMethod,
    /// Normalized weights of every model used
    pub weights: BTreeMap<ModelName, f64>,
    /// Top weighted models, heaviest first
    pub rationale: Vec<ModelContribution>,
}

impl BlendedForecast {
    pub fn label(&self) -> String {
        self.method.to_string()
    }
}

pub struct EnsembleBlender {
    config: BlendConfig,
}

impl EnsembleBlender {
    pub fn new(config: BlendConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &BlendConfig {
        &self.config
    }

    /// Blend `current` forecasts for `entity`, measuring error on history
    /// strictly before `today`. Returns `None` when no usable current value
    /// exists or the result is not finite.
    pub fn blend(
        &self,
        entity: &str,
        current: &ModelForecasts,
        history: &ForecastHistory,
        today: NaiveDate,
    ) -> Option<BlendedForecast> {
        let usable: BTreeMap<&ModelName, f64> = current
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(m, v)| (m, *v))
            .collect();
        if usable.is_empty() {
            debug!(entity, "no usable model forecasts");
            return None;
        }

        let days = match history.entity(entity) {
            Some(days) if !days.is_empty() => days,
            _ => return self.equal_weight(entity, &usable, BlendMethod::EqualWeightNoHistory),
        };

        // Most recent first; today's actual is not final yet
        let mut errors: BTreeMap<&ModelName, Vec<f64>> = BTreeMap::new();
        let mut days_used = 0;
        for (_, record) in days.range(..today).rev() {
            let Some(actual) = record.actual.filter(|a| a.is_finite()) else {
                continue;
            };
            for model in usable.keys() {
                if let Some(past) = record.forecasts.get(*model).filter(|v| v.is_finite()) {
                    errors.entry(*model).or_default().push((past - actual).abs());
                }
            }
            days_used += 1;
            if days_used >= self.config.lookback_days {
                break;
            }
        }

        if days_used < self.config.min_valid_days {
            return self.equal_weight(
                entity,
                &usable,
                BlendMethod::EqualWeightInsufficient { days_used },
            );
        }

        let maes: BTreeMap<&ModelName, f64> = usable
            .keys()
            .map(|model| {
                let mae = match errors.get(*model) {
                    Some(errs) if !errs.is_empty() => errs.iter().sum::<f64>() / errs.len() as f64,
                    _ => self.config.default_mae,
                };
                (*model, mae)
            })
            .collect();

        let inverse: BTreeMap<&ModelName, f64> = maes
            .iter()
            .map(|(m, mae)| (*m, 1.0 / (mae + self.config.smoothing)))
            .collect();
        let total: f64 = inverse.values().sum();
        if !(total.is_finite() && total > 0.0) {
            warn!(entity, total, "inverse-error weights degenerate");
            return None;
        }

        let weights: BTreeMap<ModelName, f64> = inverse
            .iter()
            .map(|(m, inv)| ((*m).clone(), inv / total))
            .collect();
        let value: f64 = weights
            .iter()
            .map(|(m, w)| w * usable.get(m).copied().unwrap_or_default())
            .sum();

        if !value.is_finite() {
            warn!(entity, value, "blended value is not finite");
            return None;
        }

        let mut ranked: Vec<(&ModelName, f64)> = weights.iter().map(|(m, w)| (m, *w)).collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        let rationale = ranked
            .into_iter()
            .take(self.config.rationale_top_n)
            .map(|(m, w)| ModelContribution {
                model: m.clone(),
                weight_pct: w * 100.0,
                mae: maes.get(m).copied(),
            })
            .collect();

        debug!(entity, value, days_used, "inverse-error blend");
        Some(BlendedForecast {
            value,
            method: BlendMethod::InverseError { days_used },
            weights,
            rationale,
        })
    }

    fn equal_weight(
        &self,
        entity: &str,
        usable: &BTreeMap<&ModelName, f64>,
        method: BlendMethod,
    ) -> Option<BlendedForecast> {
        let n = usable.len() as f64;
        let value = usable.values().sum::<f64>() / n;
        if !value.is_finite() {
            warn!(entity, value, "equal-weight mean is not finite");
            return None;
        }

        let weights: BTreeMap<ModelName, f64> =
            usable.keys().map(|m| ((*m).clone(), 1.0 / n)).collect();
        let rationale = weights
            .iter()
            .take(self.config.rationale_top_n)
            .map(|(m, w)| ModelContribution {
                model: m.clone(),
                weight_pct: w * 100.0,
                mae: None,
            })
            .collect();

        debug!(entity, value, %method, "equal-weight blend");
        Some(BlendedForecast {
            value,
            method,
            weights,
            rationale,
        })
    }
}

impl Default for EnsembleBlender {
    fn default() -> Self {
        Self::new(BlendConfig::default())
    }
}
