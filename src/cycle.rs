//! Cycle Driver - one pass of the forecast-to-decision pipeline
//!
//! Owns every piece of cross-cycle state (history store, ledger, sizer budget,
//! alert log, market catalog cache) and runs:
//!
//! ```text
//! load history -> blend -> settlement table -> score options -> size -> open
//!              -> mark to market -> upsert history
//! ```
//!
//! Quote fetching is the only parallel step: a bounded worker pool fans out
//! over option ids and the results are merged before the sequential pass.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertLog};
use crate::clock::Clock;
use crate::ensemble::{BlendedForecast, EnsembleBlender};
use crate::features::{
    SettlementDistribution, SettlementInputs, SettlementProbabilityModel, VolumeSignal,
};
use crate::paper_trading::{PaperLedger, Position};
use crate::persistence::ForecastHistoryStore;
use crate::risk::{PositionSizer, SizingContext};
use crate::strategy::{ScoreInputs, SignalScorer, TradeAction};
use crate::types::{EntityInput, ForecastUpdate, MarketSnapshot, ModelForecasts, OptionSpec, Side};

// ─────────────────────────────────────────────────────────────────
// Collaborator seams
// ─────────────────────────────────────────────────────────────────

/// Live quotes for options; retries and fallbacks live behind this trait
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait QuoteSource: Send + Sync {
    async fn quote(&self, option_id: &str) -> Result<Option<MarketSnapshot>>;
}

/// Normalized per-entity inputs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Market catalog: entities with their tradable options
    async fn discover(&self) -> Result<Vec<EntityInput>>;
    /// Latest forecasts, observations and settled actuals
    async fn forecasts(&self) -> Result<Vec<ForecastUpdate>>;
}

// ─────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    /// Concurrent quote requests
    pub quote_workers: usize,
    /// Option share of the entity's volume counted as high relative volume
    pub high_relative_volume_share: f64,
    /// Option volume (USD) counted as high absolute volume
    pub high_absolute_volume_usd: f64,
    /// Reuse of the discovered market catalog
    pub discovery_ttl_secs: i64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            quote_workers: 4,
            high_relative_volume_share: 0.3,
            high_absolute_volume_usd: 5000.0,
            discovery_ttl_secs: 300,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// TTL cache
// ─────────────────────────────────────────────────────────────────

/// Single-value cache that expires `ttl` after it was filled
pub struct TtlCache<T> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entry: RwLock<Option<(DateTime<Utc>, T)>>,
}

impl<T: Clone> TtlCache<T> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entry: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Option<T> {
        let entry = self.entry.read().unwrap_or_else(PoisonError::into_inner);
        match entry.as_ref() {
            Some((filled_at, value)) if self.clock.now() - *filled_at < self.ttl => Some(value.clone()),
            _ => None,
        }
    }

    pub fn put(&self, value: T) {
        *self.entry.write().unwrap_or_else(PoisonError::into_inner) = Some((self.clock.now(), value));
    }
}

// ─────────────────────────────────────────────────────────────────
// Report
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub entities: usize,
    pub blends: HashMap<String, BlendedForecast>,
    pub distributions: HashMap<String, SettlementDistribution>,
    pub scored: usize,
    pub skipped_ended: usize,
    pub missing_quotes: usize,
    pub opened: Vec<Position>,
    pub closed: Vec<Position>,
    pub rejected: usize,
    pub alerts: Vec<Alert>,
    /// (entity, error) for entities that failed this cycle
    pub failures: Vec<(String, String)>,
}

// ─────────────────────────────────────────────────────────────────
// Driver
// ─────────────────────────────────────────────────────────────────

pub struct CycleDriver {
    config: CycleConfig,
    clock: Arc<dyn Clock>,
    history: ForecastHistoryStore,
    blender: EnsembleBlender,
    model: SettlementProbabilityModel,
    scorer: SignalScorer,
    sizer: PositionSizer,
    ledger: PaperLedger,
    alerts: AlertLog,
    discovery: TtlCache<Vec<EntityInput>>,
    history_csv: Option<PathBuf>,
}

/// Components a driver is assembled from
pub struct CycleParts {
    pub history: ForecastHistoryStore,
    pub blender: EnsembleBlender,
    pub model: SettlementProbabilityModel,
    pub scorer: SignalScorer,
    pub sizer: PositionSizer,
    pub ledger: PaperLedger,
    pub alerts: AlertLog,
}

impl CycleDriver {
    pub fn new(config: CycleConfig, clock: Arc<dyn Clock>, parts: CycleParts) -> Self {
        let discovery = TtlCache::new(Duration::seconds(config.discovery_ttl_secs), clock.clone());
        // Same-day opens from before a restart still count against the budget
        parts.sizer.restore_used(parts.ledger.bought_on(clock.today()));
        Self {
            config,
            clock,
            history: parts.history,
            blender: parts.blender,
            model: parts.model,
            scorer: parts.scorer,
            sizer: parts.sizer,
            ledger: parts.ledger,
            alerts: parts.alerts,
            discovery,
            history_csv: None,
        }
    }

    /// Re-export closed positions to this CSV whenever one settles
    pub fn with_history_csv(mut self, path: PathBuf) -> Self {
        self.history_csv = Some(path);
        self
    }

    pub fn ledger(&self) -> &PaperLedger {
        &self.ledger
    }

    pub fn history(&self) -> &ForecastHistoryStore {
        &self.history
    }

    pub fn sizer(&self) -> &PositionSizer {
        &self.sizer
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Catalog (cached) plus fresh forecasts, fetch quotes, run the pipeline
    pub async fn run_once(
        &self,
        markets: &dyn MarketSource,
        quotes: Arc<dyn QuoteSource>,
    ) -> Result<CycleReport> {
        let catalog = match self.discovery.get() {
            Some(cached) => cached,
            None => {
                let fresh = markets.discover().await?;
                info!(entities = fresh.len(), "markets discovered");
                self.discovery.put(fresh.clone());
                fresh
            }
        };
        let updates = markets.forecasts().await?;

        // Quote every catalog option so open positions keep marking
        let ids: Vec<String> = catalog
            .iter()
            .flat_map(|e| e.options.iter().map(|o| o.id.clone()))
            .collect();
        let snapshots = fetch_quotes(quotes, ids, self.config.quote_workers).await;
        Ok(self.run_cycle(&merge_forecasts(catalog, updates), &snapshots))
    }

    /// Sequential decision pass over already-fetched quotes
    pub fn run_cycle(&self, inputs: &[EntityInput], quotes: &HashMap<String, MarketSnapshot>) -> CycleReport {
        let mut report = CycleReport {
            entities: inputs.len(),
            ..Default::default()
        };

        for input in inputs {
            if let Err(e) = self.process_entity(input, quotes, &mut report) {
                warn!(entity = %input.entity, error = %e, "entity failed this cycle");
                report.failures.push((input.entity.clone(), e.to_string()));
            }
        }

        let yes_prices: HashMap<String, f64> = quotes
            .iter()
            .map(|(id, q)| (id.clone(), q.price_cents))
            .collect();
        match self.ledger.mark_to_market(&yes_prices) {
            Ok(marked) => {
                if !marked.closed.is_empty() {
                    if let Some(path) = &self.history_csv {
                        if let Err(e) = self.ledger.export_history_csv(path) {
                            warn!(path = %path.display(), error = %format!("{:#}", e), "history CSV export failed");
                        }
                    }
                }
                report.closed = marked.closed;
            }
            Err(e) => warn!(error = %e, "mark to market failed, ledger unchanged"),
        }

        if let Err(e) = self.alerts.flush() {
            warn!(error = %format!("{:#}", e), "alert log flush failed");
        }

        let summary = self.ledger.summary();
        info!(
            entities = report.entities,
            scored = report.scored,
            opened = report.opened.len(),
            closed = report.closed.len(),
            rejected = report.rejected,
            failures = report.failures.len(),
            balance = %format!("${:.2}", summary.balance),
            equity = %format!("${:.2}", summary.equity),
            "cycle complete"
        );
        report
    }

    fn process_entity(
        &self,
        input: &EntityInput,
        quotes: &HashMap<String, MarketSnapshot>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let entity = input.entity.as_str();
        let history = self.history.load();
        let today = self.clock.today().min(input.date);

        let blend = self
            .blender
            .blend(entity, &input.forecast.forecasts, &history, today);
        if let Some(b) = &blend {
            debug!(entity, value = b.value, method = %b.method, "blended");
            report.blends.insert(entity.to_string(), b.clone());
        } else {
            warn!(entity, "no blend this cycle");
        }

        let distribution = self.model.compute(&SettlementInputs {
            ensemble: input.forecast.ensemble,
            anchor: blend.as_ref().map(|b| b.value),
            observed_max: input.forecast.observed_max,
            trend: input.forecast.trend,
        });

        let entity_volume: f64 = input
            .options
            .iter()
            .filter_map(|o| quotes.get(&o.id))
            .map(|q| q.volume_usd)
            .filter(|v| v.is_finite() && *v > 0.0)
            .sum();

        for option in &input.options {
            let Some(snapshot) = quotes.get(&option.id) else {
                report.missing_quotes += 1;
                continue;
            };
            if snapshot.is_ended() {
                report.skipped_ended += 1;
                continue;
            }
            self.process_option(option, snapshot, input, &distribution, entity_volume, report);
        }
        report.distributions.insert(entity.to_string(), distribution);

        let finite: ModelForecasts = input
            .forecast
            .forecasts
            .iter()
            .filter(|(_, v)| v.is_finite())
            .map(|(m, v)| (m.clone(), *v))
            .collect();
        self.history.upsert(entity, input.date, &finite, input.settled_actual)?;
        Ok(())
    }

    fn process_option(
        &self,
        option: &OptionSpec,
        snapshot: &MarketSnapshot,
        input: &EntityInput,
        distribution: &SettlementDistribution,
        entity_volume: f64,
        report: &mut CycleReport,
    ) {
        let now = self.clock.now();

        // Lock-zone alert on whichever side is priced inside the zone
        for side in [Side::Yes, Side::No] {
            let price = snapshot.buy_price(side);
            if self.alerts.in_lock_zone(price) {
                let alert = Alert::PriceLockZone {
                    market_id: option.id.clone(),
                    side,
                    price_cents: price,
                };
                if self.alerts.emit(&alert) {
                    info!(option = %option.id, %side, price, "price entered lock zone");
                    report.alerts.push(alert);
                }
                break;
            }
        }

        let has_model = !distribution.is_empty();
        let p_yes = distribution.probability(option.bucket);
        let side = if !has_model || p_yes >= 0.5 { Side::Yes } else { Side::No };
        let side_probability = match (has_model, side) {
            (false, _) => f64::NAN,
            (true, Side::Yes) => p_yes,
            (true, Side::No) => 1.0 - p_yes,
        };
        let price = snapshot.buy_price(side);

        let signal = self.scorer.score(&ScoreInputs {
            option,
            snapshot,
            side,
            model_probability: side_probability,
            consensus: input.consensus,
        });
        report.scored += 1;

        if signal.is_anomalous() {
            let alert = Alert::Anomaly {
                market_id: option.id.clone(),
                volume_spike: signal.volume_signal == VolumeSignal::VolumeSpike,
                whale: signal.whale.map(|w| w.signal),
                price_cents: snapshot.price_cents,
            };
            if self.alerts.emit(&alert) {
                info!(option = %option.id, "market anomaly");
                report.alerts.push(alert);
            }
        }

        let decision = self.scorer.decide(&signal, price);
        if decision.action != TradeAction::Buy || self.ledger.has_position(&option.id, side) {
            return;
        }

        let hours_to_deadline = (option.deadline - now).num_seconds() as f64 / 3600.0;
        let high_relative = entity_volume > 0.0
            && snapshot.volume_usd / entity_volume >= self.config.high_relative_volume_share;
        let ctx = SizingContext {
            price_cents: price,
            model_supports_direction: has_model && side_probability >= 0.5,
            high_absolute_volume: snapshot.volume_usd >= self.config.high_absolute_volume_usd,
        };
        let size = self
            .sizer
            .size(&ctx, snapshot.book_depth_usd, hours_to_deadline, high_relative);

        if size.is_zero() {
            report.rejected += 1;
            let alert = Alert::SizingRejected {
                market_id: option.id.clone(),
                side,
                reasons: size.reason_tags(),
            };
            if self.alerts.emit(&alert) {
                info!(option = %option.id, %side, reasons = %size.reason_tags(), "sizing rejected");
                report.alerts.push(alert);
            }
            return;
        }

        match self.ledger.open(&option.id, side, price, size.amount_usd) {
            Ok(position) => {
                info!(
                    option = %option.id,
                    %side,
                    price,
                    amount = size.amount_usd,
                    score = signal.composite_score,
                    reasons = %size.reason_tags(),
                    "position opened"
                );
                report.opened.push(position);
            }
            Err(e) => {
                self.sizer.release(size.amount_usd);
                warn!(option = %option.id, %side, error = %e, "ledger refused open");
            }
        }
    }
}

/// Overlay fresh forecasts on the catalog by (entity, date). Catalog entries
/// without a fresh forecast sit this cycle out; forecasts for entities the
/// catalog does not list still feed history with no options to score.
pub fn merge_forecasts(catalog: Vec<EntityInput>, updates: Vec<ForecastUpdate>) -> Vec<EntityInput> {
    let mut fresh: HashMap<(String, NaiveDate), ForecastUpdate> = updates
        .into_iter()
        .map(|u| ((u.entity.clone(), u.date), u))
        .collect();

    let mut inputs = Vec::with_capacity(catalog.len());
    for mut input in catalog {
        match fresh.remove(&(input.entity.clone(), input.date)) {
            Some(update) => {
                input.apply(update);
                inputs.push(input);
            }
            None => debug!(entity = %input.entity, date = %input.date, "no fresh forecast, skipped"),
        }
    }

    let mut unlisted: Vec<ForecastUpdate> = fresh.into_values().collect();
    unlisted.sort_by(|a, b| (&a.entity, a.date).cmp(&(&b.entity, b.date)));
    inputs.extend(unlisted.into_iter().map(|u| EntityInput {
        entity: u.entity,
        date: u.date,
        forecast: u.forecast,
        options: Vec::new(),
        consensus: u.consensus,
        settled_actual: u.settled_actual,
    }));
    inputs
}

/// Fetch quotes with at most `workers` requests in flight. Failed or empty
/// quotes are left out of the map.
pub async fn fetch_quotes(
    source: Arc<dyn QuoteSource>,
    ids: Vec<String>,
    workers: usize,
) -> HashMap<String, MarketSnapshot> {
    let permits = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();

    for id in ids {
        let source = source.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            let _permit = permits.acquire_owned().await.ok()?;
            match source.quote(&id).await {
                Ok(Some(q)) => Some((id, q)),
                Ok(None) => {
                    debug!(option = %id, "no quote");
                    None
                }
                Err(e) => {
                    warn!(option = %id, error = %format!("{:#}", e), "quote fetch failed");
                    None
                }
            }
        });
    }

    let mut quotes = HashMap::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((id, q))) => {
                quotes.insert(id, q);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "quote task panicked"),
        }
    }
    quotes
}
