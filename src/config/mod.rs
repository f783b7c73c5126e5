//! Configuration management for wxdesk
//!
//! Defaults, then `config/default.*` and `config/local.*`, then `WXDESK__*`
//! environment variables (after `.env` is loaded).

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::alerts::AlertConfig;
use crate::cycle::CycleConfig;
use crate::ensemble::BlendConfig;
use crate::features::SettlementConfig;
use crate::paper_trading::PaperTradingConfig;
use crate::persistence::HistoryConfig;
use crate::risk::SizingConfig;
use crate::strategy::ScoringConfig;

/// Main application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub bot: BotConfig,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub blend: BlendConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub paper_trading: PaperTradingConfig,
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Version tag for logs and exports
    pub tag: String,
    /// Seconds between decision cycles
    pub interval_secs: u64,
    /// Normalized per-entity inputs written by the collector
    pub inputs_path: String,
    /// Latest option quotes written by the collector
    pub quotes_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Config::builder()
            .set_default("bot.tag", env!("CARGO_PKG_VERSION"))?
            .set_default("bot.interval_secs", 300)?
            .set_default("bot.inputs_path", "./data/inputs.json")?
            .set_default("bot.quotes_path", "./data/quotes.json")?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            // WXDESK__SIZING__DAILY_BUDGET=80 etc.
            .add_source(Environment::with_prefix("WXDESK").separator("__"))
            .build()
            .context("Failed to build configuration")?;

        let mut app_config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        app_config.validate()?;
        Ok(app_config)
    }

    /// Reject settings the pipeline cannot run with; weights are normalized
    pub fn validate(&mut self) -> Result<()> {
        if self.bot.interval_secs == 0 {
            bail!("bot.interval_secs must be positive");
        }
        if self.cycle.quote_workers == 0 {
            bail!("cycle.quote_workers must be positive");
        }
        if self.alerts.lock_zone_low_cents > self.alerts.lock_zone_high_cents {
            bail!(
                "alerts lock zone is inverted ({} > {})",
                self.alerts.lock_zone_low_cents,
                self.alerts.lock_zone_high_cents
            );
        }
        if !(self.settlement.anchor_weight >= 0.0 && self.settlement.anchor_weight <= 1.0) {
            bail!("settlement.anchor_weight must be within [0, 1]");
        }
        if self.paper_trading.initial_balance < 0.0 {
            bail!("paper_trading.initial_balance must not be negative");
        }
        self.scoring.weights.normalize();
        Ok(())
    }

    /// One-line summary for startup logging
    pub fn digest(&self) -> String {
        format!(
            "tag={} interval={}s lookback={}d min_conf={:.2} budget=${:.0} balance=${:.0}",
            self.bot.tag,
            self.bot.interval_secs,
            self.blend.lookback_days,
            self.scoring.min_confidence,
            self.sizing.daily_budget,
            self.paper_trading.initial_balance
        )
    }
}

impl std::fmt::Display for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.digest())
    }
}
