//! Alert log - deduplicated structured alerts
//!
//! Every alert maps to a stable key (SHA-256 over its identifying fields).
//! A key is emitted at most once; the key -> first-emitted-time map is
//! persisted atomically so restarts do not repeat alerts.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::features::WhaleSignal;
use crate::persistence::write_json_atomic;
use crate::types::Side;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    pub path: String,
    /// Lower bound of the price lock zone (cents)
    pub lock_zone_low_cents: f64,
    /// Upper bound of the price lock zone (cents)
    pub lock_zone_high_cents: f64,
    /// Keys older than this are forgotten on flush
    pub retention_days: i64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            path: "./data/pushed_signals.json".to_string(),
            lock_zone_low_cents: 85.0,
            lock_zone_high_cents: 95.0,
            retention_days: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Alert {
    /// A side's buy price sits inside the lock zone
    PriceLockZone {
        market_id: String,
        side: Side,
        price_cents: f64,
    },
    /// Volume spike or strong one-sided whale flow
    Anomaly {
        market_id: String,
        volume_spike: bool,
        whale: Option<WhaleSignal>,
        price_cents: f64,
    },
    /// A BUY decision sized to zero
    SizingRejected {
        market_id: String,
        side: Side,
        reasons: String,
    },
}

impl Alert {
    /// Identifying fields only; prices are excluded so drift does not re-alert
    fn identity(&self) -> String {
        match self {
            Alert::PriceLockZone { market_id, .. } => format!("price_lock|{}", market_id),
            Alert::Anomaly { market_id, .. } => format!("anomaly|{}", market_id),
            Alert::SizingRejected {
                market_id,
                side,
                reasons,
            } => format!("sizing|{}|{}|{}", market_id, side, reasons),
        }
    }

    pub fn stable_key(&self) -> String {
        let digest = Sha256::digest(self.identity().as_bytes());
        hex::encode(digest)
    }

    pub fn market_id(&self) -> &str {
        match self {
            Alert::PriceLockZone { market_id, .. }
            | Alert::Anomaly { market_id, .. }
            | Alert::SizingRejected { market_id, .. } => market_id,
        }
    }
}

#[derive(Default)]
struct LogState {
    emitted: BTreeMap<String, DateTime<Utc>>,
    dirty: bool,
}

pub struct AlertLog {
    config: AlertConfig,
    path: Option<PathBuf>,
    clock: Arc<dyn Clock>,
    state: RwLock<LogState>,
}

impl AlertLog {
    /// In-memory log
    pub fn new(config: AlertConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            path: None,
            clock,
            state: RwLock::new(LogState::default()),
        }
    }

    /// Log backed by `config.path`; previously emitted keys are loaded.
    /// An unreadable file starts an empty log.
    pub fn open(config: AlertConfig, clock: Arc<dyn Clock>) -> Self {
        let path = PathBuf::from(&config.path);
        let emitted = match Self::read(&path) {
            Ok(emitted) => emitted,
            Err(e) => {
                warn!(path = %path.display(), error = %format!("{:#}", e), "alert log unreadable, starting empty");
                BTreeMap::new()
            }
        };
        info!(path = %path.display(), keys = emitted.len(), "alert log loaded");
        Self {
            config,
            path: Some(path),
            clock,
            state: RwLock::new(LogState {
                emitted,
                dirty: false,
            }),
        }
    }

    fn read(path: &Path) -> Result<BTreeMap<String, DateTime<Utc>>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let raw = fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    /// Whether a buy price falls inside the lock zone
    pub fn in_lock_zone(&self, price_cents: f64) -> bool {
        price_cents >= self.config.lock_zone_low_cents && price_cents <= self.config.lock_zone_high_cents
    }

    /// Record the alert. Returns `true` the first time its key is seen.
    pub fn emit(&self, alert: &Alert) -> bool {
        let key = alert.stable_key();
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.emitted.contains_key(&key) {
            debug!(market = alert.market_id(), "alert already emitted");
            return false;
        }
        state.emitted.insert(key, self.clock.now());
        state.dirty = true;
        true
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).emitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget expired keys and persist if anything changed
    pub fn flush(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let cutoff = self.clock.now() - Duration::days(self.config.retention_days);
        let before = state.emitted.len();
        state.emitted.retain(|_, at| *at >= cutoff);
        if state.emitted.len() != before {
            state.dirty = true;
        }

        if !state.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            write_json_atomic(path, &state.emitted)?;
        }
        state.dirty = false;
        Ok(())
    }
}
