//! End-to-end cycle tests over file-backed state

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use wxdesk::alerts::{Alert, AlertConfig, AlertLog};
use wxdesk::clock::ManualClock;
use wxdesk::cycle::{CycleConfig, CycleDriver, CycleParts, QuoteSource};
use wxdesk::ensemble::{BlendMethod, EnsembleBlender};
use wxdesk::features::SettlementProbabilityModel;
use wxdesk::paper_trading::{PaperLedger, PaperTradingConfig};
use wxdesk::persistence::{ForecastHistoryStore, HistoryConfig};
use wxdesk::risk::{PositionSizer, SizingConfig, SizingContext, SizingReason};
use wxdesk::sources::{JsonMarketSource, JsonQuoteSource};
use wxdesk::strategy::SignalScorer;
use wxdesk::types::{
    EnsembleStats, EntityInput, ForecastSet, MarketSnapshot, OptionSpec, Side, Trend,
};

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("wxdesk_{}_{}", name, uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn start() -> Arc<ManualClock> {
    ManualClock::shared(Utc.with_ymd_and_hms(2024, 7, 20, 12, 0, 0).unwrap())
}

fn build(dir: &Path, clock: Arc<ManualClock>) -> CycleDriver {
    let ledger_cfg = PaperTradingConfig {
        state_file: dir.join("ledger.json").display().to_string(),
        history_csv: dir.join("history.csv").display().to_string(),
        ..Default::default()
    };
    let ledger = PaperLedger::new(ledger_cfg.clone(), clock.clone())
        .with_state_file(dir.join("ledger.json"));
    ledger.load_state().unwrap();

    CycleDriver::new(
        CycleConfig::default(),
        clock.clone(),
        CycleParts {
            history: ForecastHistoryStore::new(
                HistoryConfig {
                    path: dir.join("daily_records.json").display().to_string(),
                    ..Default::default()
                },
                clock.clone(),
            ),
            blender: EnsembleBlender::default(),
            model: SettlementProbabilityModel::default(),
            scorer: SignalScorer::default(),
            sizer: PositionSizer::new(SizingConfig::default(), clock.clone()),
            ledger,
            alerts: AlertLog::open(
                AlertConfig {
                    path: dir.join("pushed_signals.json").display().to_string(),
                    ..Default::default()
                },
                clock,
            ),
        },
    )
    .with_history_csv(dir.join("history.csv"))
}

fn nyc(date: NaiveDate, settled_actual: Option<f64>) -> EntityInput {
    EntityInput {
        entity: "NYC".into(),
        date,
        forecast: ForecastSet {
            forecasts: [("ECMWF".to_string(), 28.0), ("GFS".to_string(), 28.2)].into(),
            ensemble: Some(EnsembleStats {
                p10: 27.6,
                p50: 28.0,
                p90: 28.4,
            }),
            observed_max: Some(27.0),
            trend: Trend::Rising,
        },
        options: vec![OptionSpec {
            id: "nyc-28".into(),
            bucket: 28,
            deadline: Utc.with_ymd_and_hms(2024, 7, 21, 4, 0, 0).unwrap(),
            volume_history: Vec::new(),
            price_history: Vec::new(),
            large_trades: Vec::new(),
            orderbook: None,
            whale: None,
        }],
        consensus: Some(true),
        settled_actual,
    }
}

fn quote(price: f64) -> HashMap<String, MarketSnapshot> {
    [(
        "nyc-28".to_string(),
        MarketSnapshot {
            id: "nyc-28".into(),
            price_cents: price,
            ask_cents: price + 1.0,
            bid_cents: price - 1.0,
            book_depth_usd: 500.0,
            volume_usd: 8000.0,
        },
    )]
    .into()
}

#[test]
fn opens_then_settles_once_and_survives_restart() {
    let dir = temp_dir("pipeline_settle");
    let clock = start();
    let day = NaiveDate::from_ymd_opt(2024, 7, 20).unwrap();

    let driver = build(&dir, clock.clone());
    let first = driver.run_cycle(&[nyc(day, None)], &quote(89.0));
    assert_eq!(first.opened.len(), 1);
    assert_eq!(first.opened[0].id, "nyc-28_YES");
    assert_eq!(driver.ledger().balance(), 990.0);
    drop(driver);

    // Restart picks the open position back up
    clock.advance(Duration::hours(6));
    let driver = build(&dir, clock.clone());
    assert!(driver.ledger().has_position("nyc-28", Side::Yes));

    // Resolves YES: the option is no longer scored but the position settles
    let settled = driver.run_cycle(&[nyc(day, None)], &quote(99.6));
    assert_eq!(settled.skipped_ended, 1);
    assert_eq!(settled.closed.len(), 1);
    let shares = 10.0 / 0.90;
    assert!((driver.ledger().balance() - (990.0 + shares * 0.996)).abs() < 1e-9);
    assert!(dir.join("history.csv").exists());

    let again = driver.run_cycle(&[nyc(day, None)], &quote(99.6));
    assert!(again.closed.is_empty());
    assert_eq!(driver.ledger().history().len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn settled_actual_feeds_the_next_days_blend() {
    let dir = temp_dir("pipeline_history");
    let clock = start();
    let driver = build(&dir, clock.clone());
    let day1 = NaiveDate::from_ymd_opt(2024, 7, 20).unwrap();
    let day2 = NaiveDate::from_ymd_opt(2024, 7, 21).unwrap();

    let report = driver.run_cycle(&[nyc(day1, None)], &HashMap::new());
    assert_eq!(report.blends["NYC"].method, BlendMethod::EqualWeightNoHistory);

    driver.run_cycle(&[nyc(day1, Some(28.3))], &HashMap::new());
    let history = driver.history().load();
    let record = history.record("NYC", day1).unwrap();
    assert_eq!(record.actual, Some(28.3));
    assert_eq!(record.forecasts.len(), 2);

    clock.advance(Duration::days(1));
    let next = driver.run_cycle(&[nyc(day2, None)], &HashMap::new());
    assert_eq!(
        next.blends["NYC"].method,
        BlendMethod::EqualWeightInsufficient { days_used: 1 }
    );
    assert!((next.blends["NYC"].value - 28.1).abs() < 1e-9);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn alerts_are_not_repeated_after_restart() {
    let dir = temp_dir("pipeline_alerts");
    let clock = start();
    let day = NaiveDate::from_ymd_opt(2024, 7, 20).unwrap();

    let driver = build(&dir, clock.clone());
    let first = driver.run_cycle(&[nyc(day, None)], &quote(89.0));
    assert!(first
        .alerts
        .iter()
        .any(|a| matches!(a, Alert::PriceLockZone { market_id, .. } if market_id == "nyc-28")));
    drop(driver);

    let driver = build(&dir, clock);
    let second = driver.run_cycle(&[nyc(day, None)], &quote(91.0));
    assert!(second.alerts.is_empty());

    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn run_once_reads_collector_files() {
    let dir = temp_dir("pipeline_files");
    let day = NaiveDate::from_ymd_opt(2024, 7, 20).unwrap();
    std::fs::write(
        dir.join("inputs.json"),
        serde_json::to_string(&vec![nyc(day, None)]).unwrap(),
    )
    .unwrap();
    let quotes: Vec<MarketSnapshot> = quote(89.0).into_values().collect();
    std::fs::write(dir.join("quotes.json"), serde_json::to_string(&quotes).unwrap()).unwrap();

    let driver = build(&dir, start());
    let markets = JsonMarketSource::new(dir.join("inputs.json"));
    let source: Arc<dyn QuoteSource> = Arc::new(JsonQuoteSource::new(dir.join("quotes.json")));

    let report = driver.run_once(&markets, source).await.unwrap();
    assert_eq!(report.entities, 1);
    assert_eq!(report.opened.len(), 1);

    let _ = std::fs::remove_dir_all(dir);
}

#[test]
fn daily_budget_holds_across_same_day_restart() {
    let dir = temp_dir("pipeline_budget");
    let clock = start();
    let ctx = SizingContext {
        price_cents: 93.0,
        model_supports_direction: true,
        high_absolute_volume: true,
    };

    let driver = build(&dir, clock.clone());
    for i in 0..5 {
        let size = driver.sizer().size(&ctx, 1000.0, 24.0, true);
        assert_eq!(size.amount_usd, 10.0);
        driver
            .ledger()
            .open(&format!("opt-{}", i), Side::Yes, 93.0, size.amount_usd)
            .unwrap();
    }
    drop(driver);

    clock.advance(Duration::hours(2));
    let driver = build(&dir, clock.clone());
    assert_eq!(driver.sizer().used_today(), 50.0);
    let after = driver.sizer().size(&ctx, 1000.0, 24.0, true);
    assert_eq!(after.amount_usd, 0.0);
    assert!(after.reasons.contains(&SizingReason::DailyCapReached));

    // Next UTC day starts a fresh budget
    clock.advance(Duration::days(1));
    let driver = build(&dir, clock);
    assert_eq!(driver.sizer().size(&ctx, 1000.0, 24.0, true).amount_usd, 10.0);

    let _ = std::fs::remove_dir_all(dir);
}
