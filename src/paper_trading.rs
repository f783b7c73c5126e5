//! Paper Ledger
//!
//! Simulated positions on binary options priced in cents.
//!
//! Key features:
//! - **One position per option side**: `id = "{market_id}_{side}"`, a second
//!   open on the same side is refused
//! - **Auto-settlement**: a side-adjusted price at or beyond 99.5¢ / 0.5¢
//!   closes the position and credits its mark value exactly once
//! - **All-or-nothing persistence**: every mutation is applied to a copy,
//!   written atomically, then swapped in
//! - **CSV export** of closed positions

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::persistence::write_json_atomic;
use crate::types::Side;

// ─────────────────────────────────────────────────────────────────
// Configuration & errors
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PaperTradingConfig {
    /// Starting balance when no state file exists (USD)
    pub initial_balance: f64,
    /// Ledger state file
    pub state_file: String,
    /// Closed-position CSV written after each settlement
    pub history_csv: String,
    /// Side price (cents) at or above which the option has settled YES for us
    pub settle_high_cents: f64,
    /// Side price (cents) at or below which the option has settled against us
    pub settle_low_cents: f64,
}

impl Default for PaperTradingConfig {
    fn default() -> Self {
        Self {
            initial_balance: 1000.0,
            state_file: "./data/paper_trading_state.json".to_string(),
            history_csv: "./data/paper_history.csv".to_string(),
            settle_high_cents: 99.5,
            settle_low_cents: 0.5,
        }
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("insufficient balance: ${balance:.2} available, ${amount:.2} requested")]
    InsufficientBalance { balance: f64, amount: f64 },

    #[error("position {0} is already open")]
    DuplicatePosition(String),

    #[error("price {0}¢ is outside (0, 100)")]
    InvalidPrice(f64),

    #[error("amount {0} is not a positive finite value")]
    InvalidAmount(f64),

    #[error("failed to persist ledger: {0:#}")]
    Persist(anyhow::Error),
}

// ─────────────────────────────────────────────────────────────────
// Persistent state
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PositionStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub market_id: String,
    pub side: Side,
    pub entry_price_cents: f64,
    pub shares: f64,
    pub cost_usd: f64,
    pub current_price_cents: f64,
    #[serde(default)]
    pub pnl_usd: f64,
    /// Percent of cost
    #[serde(default)]
    pub pnl_pct: f64,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

impl Position {
    pub fn key(market_id: &str, side: Side) -> String {
        format!("{}_{}", market_id, side)
    }

    pub fn market_value(&self) -> f64 {
        self.shares * self.current_price_cents / 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TradeKind {
    Buy,
    Sell,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: TradeKind,
    pub position_id: String,
    pub market_id: String,
    pub side: Side,
    pub price_cents: f64,
    pub amount_usd: f64,
    pub time: DateTime<Utc>,
}

/// Serialized ledger document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerState {
    pub balance: f64,
    #[serde(default)]
    pub positions: BTreeMap<String, Position>,
    #[serde(default)]
    pub trades: Vec<TradeRecord>,
    /// Closed positions, oldest first
    #[serde(default)]
    pub history: Vec<Position>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

impl LedgerState {
    pub fn fresh(balance: f64) -> Self {
        Self {
            balance,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            history: Vec::new(),
            saved_at: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerSummary {
    pub balance: f64,
    /// Cost basis of open positions
    pub locked: f64,
    pub unrealized_pnl: f64,
    pub equity: f64,
    pub realized_pnl: f64,
    pub open_positions: usize,
    pub wins: usize,
    pub losses: usize,
}

/// Result of one mark-to-market pass
#[derive(Debug, Clone, Default)]
pub struct MarkReport {
    pub updated: Vec<Position>,
    pub closed: Vec<Position>,
}

/// Flat row for the closed-position CSV
#[derive(Debug, Serialize)]
struct HistoryRow<'a> {
    id: &'a str,
    market_id: &'a str,
    side: Side,
    entry_price_cents: f64,
    exit_price_cents: f64,
    shares: f64,
    cost_usd: f64,
    pnl_usd: f64,
    pnl_pct: f64,
    opened_at: String,
    closed_at: String,
}

// ─────────────────────────────────────────────────────────────────
// Ledger
// ─────────────────────────────────────────────────────────────────

pub struct PaperLedger {
    config: PaperTradingConfig,
    clock: Arc<dyn Clock>,
    state: RwLock<LedgerState>,
    /// Path to save state file
    state_file: Option<PathBuf>,
}

impl PaperLedger {
    pub fn new(config: PaperTradingConfig, clock: Arc<dyn Clock>) -> Self {
        let balance = config.initial_balance;
        Self {
            config,
            clock,
            state: RwLock::new(LedgerState::fresh(balance)),
            state_file: None,
        }
    }

    /// Set the state file path for persistence
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Load state from the JSON file; a missing file keeps the fresh ledger
    pub fn load_state(&self) -> Result<()> {
        let Some(state_file) = &self.state_file else {
            return Ok(());
        };

        if !state_file.exists() {
            info!(path = %state_file.display(), "💾 [PAPER] No state file found, starting fresh");
            return Ok(());
        }

        let json = fs::read_to_string(state_file)
            .with_context(|| format!("failed to read {}", state_file.display()))?;
        let state: LedgerState = serde_json::from_str(&json)
            .with_context(|| format!("failed to parse {}", state_file.display()))?;

        info!(
            path = %state_file.display(),
            balance = %format!("${:.2}", state.balance),
            positions = state.positions.len(),
            closed = state.history.len(),
            "💾 [PAPER] State loaded"
        );
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
        Ok(())
    }

    pub fn state(&self) -> LedgerState {
        self.read().clone()
    }

    pub fn balance(&self) -> f64 {
        self.read().balance
    }

    pub fn has_position(&self, market_id: &str, side: Side) -> bool {
        self.read().positions.contains_key(&Position::key(market_id, side))
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.read().positions.values().cloned().collect()
    }

    pub fn history(&self) -> Vec<Position> {
        self.read().history.clone()
    }

    /// Open a simulated position, debiting `amount_usd`
    pub fn open(
        &self,
        market_id: &str,
        side: Side,
        price_cents: f64,
        amount_usd: f64,
    ) -> Result<Position, LedgerError> {
        if !(price_cents.is_finite() && price_cents > 0.0 && price_cents < 100.0) {
            return Err(LedgerError::InvalidPrice(price_cents));
        }
        if !(amount_usd.is_finite() && amount_usd > 0.0) {
            return Err(LedgerError::InvalidAmount(amount_usd));
        }

        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let id = Position::key(market_id, side);

        if guard.balance < amount_usd {
            warn!(
                position = %id,
                balance = guard.balance,
                amount_usd,
                "📝 [PAPER] Insufficient balance"
            );
            return Err(LedgerError::InsufficientBalance {
                balance: guard.balance,
                amount: amount_usd,
            });
        }
        if guard.positions.contains_key(&id) {
            return Err(LedgerError::DuplicatePosition(id));
        }

        let now = self.clock.now();
        let position = Position {
            id: id.clone(),
            market_id: market_id.to_string(),
            side,
            entry_price_cents: price_cents,
            shares: amount_usd / (price_cents / 100.0),
            cost_usd: amount_usd,
            current_price_cents: price_cents,
            pnl_usd: 0.0,
            pnl_pct: 0.0,
            status: PositionStatus::Open,
            opened_at: now,
            closed_at: None,
        };

        let mut next = guard.clone();
        next.balance -= amount_usd;
        next.positions.insert(id.clone(), position.clone());
        next.trades.push(TradeRecord {
            id: uuid::Uuid::new_v4().to_string(),
            kind: TradeKind::Buy,
            position_id: id.clone(),
            market_id: market_id.to_string(),
            side,
            price_cents,
            amount_usd,
            time: now,
        });

        self.commit(&mut *guard, next)?;

        info!(
            position = %id,
            price_cents,
            amount = %format!("${:.2}", amount_usd),
            shares = position.shares,
            "📝 [PAPER] Opened"
        );
        Ok(position)
    }

    /// Revalue open positions from YES-side prices keyed by market id.
    /// Positions whose side price crosses a settlement threshold close.
    pub fn mark_to_market(&self, yes_prices: &HashMap<String, f64>) -> Result<MarkReport, LedgerError> {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = guard.clone();
        let now = self.clock.now();
        let mut report = MarkReport::default();

        let ids: Vec<String> = next.positions.keys().cloned().collect();
        for id in ids {
            let Some(pos) = next.positions.get_mut(&id) else {
                continue;
            };
            if pos.status != PositionStatus::Open {
                continue;
            }
            let Some(&yes) = yes_prices.get(&pos.market_id) else {
                continue;
            };
            if !(yes.is_finite() && (0.0..=100.0).contains(&yes)) {
                warn!(position = %id, price = yes, "price outside 0-100 cents, skipping mark");
                continue;
            }

            let price = pos.side.adjust_price(yes);
            pos.current_price_cents = price;
            let value = pos.market_value();
            pos.pnl_usd = value - pos.cost_usd;
            pos.pnl_pct = if pos.cost_usd > 0.0 {
                pos.pnl_usd / pos.cost_usd * 100.0
            } else {
                0.0
            };

            if price >= self.config.settle_high_cents || price <= self.config.settle_low_cents {
                pos.status = PositionStatus::Closed;
                pos.closed_at = Some(now);
                let closed = pos.clone();

                next.positions.remove(&id);
                next.balance += value;
                next.trades.push(TradeRecord {
                    id: uuid::Uuid::new_v4().to_string(),
                    kind: TradeKind::Sell,
                    position_id: id.clone(),
                    market_id: closed.market_id.clone(),
                    side: closed.side,
                    price_cents: price,
                    amount_usd: value,
                    time: now,
                });
                next.history.push(closed.clone());
                report.closed.push(closed);
            } else {
                report.updated.push(pos.clone());
            }
        }

        if report.updated.is_empty() && report.closed.is_empty() {
            return Ok(report);
        }
        self.commit(&mut *guard, next)?;

        for pos in &report.closed {
            info!(
                position = %pos.id,
                exit_cents = pos.current_price_cents,
                pnl = %format!("${:+.2}", pos.pnl_usd),
                "📝 [PAPER] Settled"
            );
        }
        Ok(report)
    }

    /// Total spent on opens dated `date` (UTC)
    pub fn bought_on(&self, date: NaiveDate) -> f64 {
        self.read()
            .trades
            .iter()
            .filter(|t| t.kind == TradeKind::Buy && t.time.date_naive() == date)
            .map(|t| t.amount_usd)
            .sum()
    }

    pub fn summary(&self) -> LedgerSummary {
        let state = self.read();
        let locked: f64 = state.positions.values().map(|p| p.cost_usd).sum();
        let unrealized_pnl: f64 = state.positions.values().map(|p| p.pnl_usd).sum();
        let realized_pnl: f64 = state.history.iter().map(|p| p.pnl_usd).sum();

        LedgerSummary {
            balance: state.balance,
            locked,
            unrealized_pnl,
            equity: state.balance + locked + unrealized_pnl,
            realized_pnl,
            open_positions: state.positions.len(),
            wins: state.history.iter().filter(|p| p.pnl_usd > 0.0).count(),
            losses: state.history.iter().filter(|p| p.pnl_usd <= 0.0).count(),
        }
    }

    /// Write closed positions as CSV. Returns the number of rows.
    pub fn export_history_csv(&self, path: &Path) -> Result<usize> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let state = self.read();
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_path(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        for pos in &state.history {
            writer
                .serialize(HistoryRow {
                    id: &pos.id,
                    market_id: &pos.market_id,
                    side: pos.side,
                    entry_price_cents: pos.entry_price_cents,
                    exit_price_cents: pos.current_price_cents,
                    shares: pos.shares,
                    cost_usd: pos.cost_usd,
                    pnl_usd: pos.pnl_usd,
                    pnl_pct: pos.pnl_pct,
                    opened_at: pos.opened_at.to_rfc3339(),
                    closed_at: pos.closed_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
                })
                .context("failed to write history row")?;
        }
        writer.flush().context("failed to flush history CSV")?;
        Ok(state.history.len())
    }

    pub fn config(&self) -> &PaperTradingConfig {
        &self.config
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, LedgerState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `next`, then swap it in. On failure the live state is untouched.
    fn commit(&self, live: &mut LedgerState, mut next: LedgerState) -> Result<(), LedgerError> {
        if let Some(path) = &self.state_file {
            next.saved_at = Some(self.clock.now());
            write_json_atomic(path, &next).map_err(LedgerError::Persist)?;
        }
        *live = next;
        Ok(())
    }
}
