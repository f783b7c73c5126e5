//! Position Sizer - time-decayed, budget-bounded sizing
//!
//! Implements:
//! - Price/conviction base size ladder
//! - Time-to-deadline decay (no new positions in the final hour)
//! - Daily budget with clipping, reset on UTC date change
//! - Low relative volume haircut
//! - Orderbook depth clip
//!
//! A nonzero decision reserves its amount against today's budget; callers
//! hand it back with [`PositionSizer::release`] when the open is refused.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::clock::Clock;

/// Sizing configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Supported direction at a high price with high absolute volume (USD)
    pub base_strong: f64,
    /// Supported direction at a high price (USD)
    pub base_supported: f64,
    /// Very high price without model support (USD)
    pub base_high_price: f64,
    /// Everything else (USD)
    pub base_default: f64,
    /// Price (cents) from which model support raises the base
    pub supported_min_price: f64,
    /// Price (cents) from which the unsupported base applies
    pub high_price_min: f64,
    /// Total sizing allowed per UTC day (USD)
    pub daily_budget: f64,
    /// Multiplier when the option is not a high share of the event's volume
    pub low_volume_factor: f64,
    /// Hours at or below which nothing is opened
    pub cutoff_hours: f64,
    /// (hours at or below, multiplier), tightest first
    pub decay_tiers: Vec<(f64, f64)>,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            base_strong: 10.0,
            base_supported: 7.0,
            base_high_price: 5.0,
            base_default: 3.0,
            supported_min_price: 90.0,
            high_price_min: 92.0,
            daily_budget: 50.0,
            low_volume_factor: 0.8,
            cutoff_hours: 1.0,
            decay_tiers: vec![(4.0, 0.4), (12.0, 0.7)],
        }
    }
}

/// Why a size was reduced or zeroed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SizingReason {
    NearDeadline,
    DeadlineDecay,
    DailyCapReached,
    DailyCapClipped,
    LowRelativeVolume,
    InsufficientDepth,
}

impl fmt::Display for SizingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SizingReason::NearDeadline => "NEAR_DEADLINE",
            SizingReason::DeadlineDecay => "DEADLINE_DECAY",
            SizingReason::DailyCapReached => "DAILY_CAP_REACHED",
            SizingReason::DailyCapClipped => "DAILY_CAP_CLIPPED",
            SizingReason::LowRelativeVolume => "LOW_RELATIVE_VOLUME",
            SizingReason::InsufficientDepth => "INSUFFICIENT_DEPTH",
        };
        write!(f, "{}", s)
    }
}

/// Conviction context for one candidate entry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingContext {
    /// Buy price of the chosen side (cents)
    pub price_cents: f64,
    /// The settlement model favours this side
    pub model_supports_direction: bool,
    /// The option trades a lot in absolute terms
    pub high_absolute_volume: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizeDecision {
    pub amount_usd: f64,
    pub reasons: BTreeSet<SizingReason>,
}

impl PositionSizeDecision {
    fn zero(reasons: BTreeSet<SizingReason>) -> Self {
        Self {
            amount_usd: 0.0,
            reasons,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.amount_usd <= 0.0
    }

    /// Comma-joined reason tags, stable for logging and keys
    pub fn reason_tags(&self) -> String {
        self.reasons
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

#[derive(Debug, Clone)]
struct DailyUsage {
    date: NaiveDate,
    used: f64,
}

pub struct PositionSizer {
    config: SizingConfig,
    clock: Arc<dyn Clock>,
    usage: RwLock<DailyUsage>,
}

impl PositionSizer {
    pub fn new(config: SizingConfig, clock: Arc<dyn Clock>) -> Self {
        let date = clock.today();
        Self {
            config,
            clock,
            usage: RwLock::new(DailyUsage { date, used: 0.0 }),
        }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Base size before decay and limits
    pub fn base_size(&self, ctx: &SizingContext) -> f64 {
        let high = ctx.price_cents >= self.config.supported_min_price;
        if high && ctx.model_supports_direction && ctx.high_absolute_volume {
            self.config.base_strong
        } else if high && ctx.model_supports_direction {
            self.config.base_supported
        } else if ctx.price_cents >= self.config.high_price_min {
            self.config.base_high_price
        } else {
            self.config.base_default
        }
    }

    /// Multiplier for the time left before settlement
    pub fn time_decay(&self, hours_to_deadline: f64) -> f64 {
        if !hours_to_deadline.is_finite() || hours_to_deadline <= self.config.cutoff_hours {
            return 0.0;
        }
        self.config
            .decay_tiers
            .iter()
            .find(|(hours, _)| hours_to_deadline <= *hours)
            .map(|(_, factor)| *factor)
            .unwrap_or(1.0)
    }

    pub fn size(
        &self,
        ctx: &SizingContext,
        book_depth_usd: f64,
        hours_to_deadline: f64,
        is_high_relative_volume: bool,
    ) -> PositionSizeDecision {
        let mut reasons = BTreeSet::new();

        let decay = self.time_decay(hours_to_deadline);
        if decay <= 0.0 {
            reasons.insert(SizingReason::NearDeadline);
            return PositionSizeDecision::zero(reasons);
        }
        if decay < 1.0 {
            reasons.insert(SizingReason::DeadlineDecay);
        }
        let mut amount = self.base_size(ctx) * decay;

        // Check and reserve under one lock
        let mut usage = self.usage.write().unwrap_or_else(PoisonError::into_inner);
        self.roll_date(&mut usage);

        let remaining = self.config.daily_budget - usage.used;
        if remaining <= 0.0 {
            reasons.insert(SizingReason::DailyCapReached);
            return PositionSizeDecision::zero(reasons);
        }
        if amount > remaining {
            amount = remaining;
            reasons.insert(SizingReason::DailyCapClipped);
        }

        if !is_high_relative_volume {
            amount *= self.config.low_volume_factor;
            reasons.insert(SizingReason::LowRelativeVolume);
        }

        if !(book_depth_usd.is_finite() && book_depth_usd > 0.0) {
            reasons.insert(SizingReason::InsufficientDepth);
            return PositionSizeDecision::zero(reasons);
        }
        if amount > book_depth_usd {
            amount = book_depth_usd;
            reasons.insert(SizingReason::InsufficientDepth);
        }

        let amount_usd = floor_cents(amount);
        if amount_usd <= 0.0 {
            return PositionSizeDecision::zero(reasons);
        }

        usage.used += amount_usd;
        debug!(amount_usd, used = usage.used, "sized position");
        PositionSizeDecision { amount_usd, reasons }
    }

    /// Seed today's usage with spend recorded elsewhere (the ledger's buys
    /// after a restart). Usage never drops below what was already reserved.
    pub fn restore_used(&self, spent_today_usd: f64) {
        if !(spent_today_usd.is_finite() && spent_today_usd > 0.0) {
            return;
        }
        let mut usage = self.usage.write().unwrap_or_else(PoisonError::into_inner);
        self.roll_date(&mut usage);
        usage.used = usage.used.max(spent_today_usd);
        info!(used = usage.used, budget = self.config.daily_budget, "daily sizing usage restored");
    }

    /// Return a reservation that was never spent
    pub fn release(&self, amount_usd: f64) {
        if !(amount_usd.is_finite() && amount_usd > 0.0) {
            return;
        }
        if let Ok(mut usage) = self.usage.write() {
            self.roll_date(&mut usage);
            usage.used = (usage.used - amount_usd).max(0.0);
        }
    }

    pub fn used_today(&self) -> f64 {
        self.usage
            .write()
            .map(|mut usage| {
                self.roll_date(&mut usage);
                usage.used
            })
            .unwrap_or(0.0)
    }

    pub fn remaining_today(&self) -> f64 {
        (self.config.daily_budget - self.used_today()).max(0.0)
    }

    fn roll_date(&self, usage: &mut DailyUsage) {
        let today = self.clock.today();
        if usage.date != today {
            info!(date = %today, previous_used = usage.used, "daily sizing budget reset");
            usage.date = today;
            usage.used = 0.0;
        }
    }
}

/// Round down to whole cents, tolerating float noise just under a cent boundary
fn floor_cents(amount: f64) -> f64 {
    if !amount.is_finite() || amount <= 0.0 {
        return 0.0;
    }
    ((amount * 100.0) + 1e-9).floor() / 100.0
}
