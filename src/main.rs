//! wxdesk - paper-trading loop over collector-provided forecasts and quotes

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use wxdesk::alerts::AlertLog;
use wxdesk::clock::system_clock;
use wxdesk::config::AppConfig;
use wxdesk::cycle::{CycleDriver, CycleParts, QuoteSource};
use wxdesk::ensemble::EnsembleBlender;
use wxdesk::features::SettlementProbabilityModel;
use wxdesk::paper_trading::PaperLedger;
use wxdesk::persistence::ForecastHistoryStore;
use wxdesk::risk::PositionSizer;
use wxdesk::sources::{JsonMarketSource, JsonQuoteSource};
use wxdesk::strategy::SignalScorer;

fn init_logging(config: &AppConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    if config.logging.json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config);
    info!(config = %config, "wxdesk starting");

    let clock = system_clock();

    let ledger = PaperLedger::new(config.paper_trading.clone(), clock.clone())
        .with_state_file(PathBuf::from(&config.paper_trading.state_file));
    ledger.load_state().context("paper ledger state")?;

    let driver = CycleDriver::new(
        config.cycle.clone(),
        clock.clone(),
        CycleParts {
            history: ForecastHistoryStore::new(config.history.clone(), clock.clone()),
            blender: EnsembleBlender::new(config.blend.clone()),
            model: SettlementProbabilityModel::new(config.settlement.clone()),
            scorer: SignalScorer::new(config.scoring.clone()),
            sizer: PositionSizer::new(config.sizing.clone(), clock.clone()),
            ledger,
            alerts: AlertLog::open(config.alerts.clone(), clock.clone()),
        },
    )
    .with_history_csv(PathBuf::from(&config.paper_trading.history_csv));

    let markets = JsonMarketSource::new(&config.bot.inputs_path);
    let quotes: Arc<dyn QuoteSource> = Arc::new(JsonQuoteSource::new(&config.bot.quotes_path));

    let mut ticker = tokio::time::interval(Duration::from_secs(config.bot.interval_secs));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match driver.run_once(&markets, quotes.clone()).await {
                    Ok(report) if !report.failures.is_empty() => {
                        warn!(failures = ?report.failures, "cycle finished with entity failures");
                    }
                    Ok(_) => {}
                    Err(e) => error!(error = %format!("{:#}", e), "cycle failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    let summary = driver.ledger().summary();
    info!(
        balance = summary.balance,
        equity = summary.equity,
        realized_pnl = summary.realized_pnl,
        open_positions = summary.open_positions,
        wins = summary.wins,
        losses = summary.losses,
        "final paper summary"
    );
    Ok(())
}
