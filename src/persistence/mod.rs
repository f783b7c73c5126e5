//! Forecast History Store
//!
//! Durable `{entity, date} -> {per-model forecast, observed actual}` record
//! used by the ensemble blender to measure each model's recent error.
//!
//! - Shared lock for reads, exclusive lock for writes
//! - In-memory snapshot keyed by the file's modification time (plus a TTL
//!   read from the injected clock) so repeated reads in one cycle skip disk
//! - Atomic tmp + rename writes: readers never observe a partial document
//! - Corrupted file on read falls back to the last good snapshot

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::SystemTime;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{ensure_finite, CoreError};
use crate::types::ModelForecasts;

// ─────────────────────────────────────────────────────────────────
// Document
// ─────────────────────────────────────────────────────────────────

/// One entity/day entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DayRecord {
    #[serde(default)]
    pub forecasts: ModelForecasts,
    /// Observed value for the day; older files call it `actual_high`
    #[serde(default, alias = "actual_high")]
    pub actual: Option<f64>,
}

/// Full history document: `entity -> date -> record`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ForecastHistory {
    entities: BTreeMap<String, BTreeMap<NaiveDate, DayRecord>>,
}

impl ForecastHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entity(&self, entity: &str) -> Option<&BTreeMap<NaiveDate, DayRecord>> {
        self.entities.get(entity)
    }

    pub fn record(&self, entity: &str, date: NaiveDate) -> Option<&DayRecord> {
        self.entities.get(entity)?.get(&date)
    }

    pub fn insert(&mut self, entity: &str, date: NaiveDate, record: DayRecord) {
        self.entities
            .entry(entity.to_string())
            .or_default()
            .insert(date, record);
    }

    /// Merge new observations into a day record. Returns whether anything changed.
    ///
    /// A non-empty `forecasts` map replaces the stored one; `Some(actual)`
    /// replaces the stored actual.
    pub fn merge(
        &mut self,
        entity: &str,
        date: NaiveDate,
        forecasts: &ModelForecasts,
        actual: Option<f64>,
    ) -> bool {
        let existing = self.record(entity, date);
        let forecasts_changed =
            !forecasts.is_empty() && existing.map_or(true, |r| &r.forecasts != forecasts);
        let actual_changed = actual.is_some() && existing.map_or(true, |r| r.actual != actual);

        if !forecasts_changed && !actual_changed {
            return false;
        }

        let record = self
            .entities
            .entry(entity.to_string())
            .or_default()
            .entry(date)
            .or_default();
        if forecasts_changed {
            record.forecasts = forecasts.clone();
        }
        if actual_changed {
            record.actual = actual;
        }
        true
    }

    /// Drop every entry dated before `cutoff`. Returns the number removed.
    pub fn prune_before(&mut self, cutoff: NaiveDate) -> usize {
        let mut removed = 0;
        for days in self.entities.values_mut() {
            let before = days.len();
            days.retain(|date, _| *date >= cutoff);
            removed += before - days.len();
        }
        self.entities.retain(|_, days| !days.is_empty());
        removed
    }

    /// Total number of day records
    pub fn len(&self) -> usize {
        self.entities.values().map(|d| d.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ─────────────────────────────────────────────────────────────────
// Atomic JSON writes
// ─────────────────────────────────────────────────────────────────

/// Write `value` as pretty JSON to `path` via a sibling temp file + rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let content = serde_json::to_string_pretty(value).context("failed to serialise JSON")?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "state.json".to_string());
    let tmp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4()));

    fs::write(&tmp_path, &content)
        .with_context(|| format!("failed to write tmp file {}", tmp_path.display()))?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e).with_context(|| format!("failed to rename into {}", path.display()));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────
// Store
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Backing JSON file
    pub path: String,
    /// Entries older than this many days are pruned on save
    pub retention_days: i64,
    /// Maximum age of the in-memory snapshot
    pub snapshot_ttl_secs: i64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: "./data/daily_records.json".to_string(),
            retention_days: 14,
            snapshot_ttl_secs: 60,
        }
    }
}

#[derive(Debug, Clone)]
struct Snapshot {
    modified: Option<SystemTime>,
    loaded_at: DateTime<Utc>,
    history: Arc<ForecastHistory>,
}

pub struct ForecastHistoryStore {
    path: PathBuf,
    config: HistoryConfig,
    clock: Arc<dyn Clock>,
    /// Shared for reads, exclusive for writes
    file_lock: RwLock<()>,
    /// Last successfully parsed document
    snapshot: RwLock<Option<Snapshot>>,
}

impl ForecastHistoryStore {
    pub fn new(config: HistoryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: PathBuf::from(&config.path),
            config,
            clock,
            file_lock: RwLock::new(()),
            snapshot: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current history. Never fails: missing file is empty, corrupted file
    /// yields the last good snapshot.
    pub fn load(&self) -> Arc<ForecastHistory> {
        if let Ok(modified) = self.file_modified() {
            if let Some(hit) = self.cached(modified) {
                return hit;
            }
        }

        let _guard = self.file_lock.read().unwrap_or_else(PoisonError::into_inner);
        self.read_unlocked()
    }

    /// Merge one day's forecasts/actual. Returns `false` (and skips the write)
    /// when nothing changed.
    pub fn upsert(
        &self,
        entity: &str,
        date: NaiveDate,
        forecasts: &ModelForecasts,
        actual: Option<f64>,
    ) -> Result<bool, CoreError> {
        for value in forecasts.values() {
            ensure_finite(entity, "forecast", *value)?;
        }
        if let Some(a) = actual {
            ensure_finite(entity, "actual", a)?;
        }

        let _guard = self.file_lock.write().unwrap_or_else(PoisonError::into_inner);
        let current = self.read_unlocked();

        let mut next = (*current).clone();
        if !next.merge(entity, date, forecasts, actual) {
            debug!(entity, %date, "history unchanged, skipping write");
            return Ok(false);
        }

        self.write_unlocked(next).map_err(|source| CoreError::Persist {
            path: self.path.display().to_string(),
            source,
        })?;
        Ok(true)
    }

    /// Prune and persist a complete document.
    pub fn save(&self, history: ForecastHistory) -> Result<()> {
        let _guard = self.file_lock.write().unwrap_or_else(PoisonError::into_inner);
        self.write_unlocked(history)
    }

    fn file_modified(&self) -> std::io::Result<Option<SystemTime>> {
        fs::metadata(&self.path).map(|m| m.modified().ok())
    }

    fn cached(&self, modified: Option<SystemTime>) -> Option<Arc<ForecastHistory>> {
        let snapshot = self.snapshot.read().ok()?;
        let snap = snapshot.as_ref()?;
        let fresh = self.clock.now() - snap.loaded_at
            < Duration::seconds(self.config.snapshot_ttl_secs);
        if fresh && modified.is_some() && snap.modified == modified {
            Some(snap.history.clone())
        } else {
            None
        }
    }

    fn last_good(&self) -> Arc<ForecastHistory> {
        self.snapshot
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|snap| snap.history.clone()))
            .unwrap_or_default()
    }

    fn remember(&self, modified: Option<SystemTime>, history: Arc<ForecastHistory>) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = Some(Snapshot {
                modified,
                loaded_at: self.clock.now(),
                history,
            });
        }
    }

    /// Read from cache or disk; the caller holds the file lock
    fn read_unlocked(&self) -> Arc<ForecastHistory> {
        let modified = match self.file_modified() {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Arc::new(ForecastHistory::default());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "history stat failed, using last snapshot");
                return self.last_good();
            }
        };

        if let Some(hit) = self.cached(modified) {
            return hit;
        }

        let parsed = fs::read_to_string(&self.path)
            .context("failed to read history file")
            .and_then(|raw| {
                serde_json::from_str::<ForecastHistory>(&raw).context("failed to parse history file")
            });

        match parsed {
            Ok(history) => {
                let history = Arc::new(history);
                self.remember(modified, history.clone());
                history
            }
            Err(e) => {
                warn!(
                    path = %self.path.display(),
                    error = %format!("{:#}", e),
                    "history file unreadable, falling back to last good snapshot"
                );
                self.last_good()
            }
        }
    }

    /// Prune + atomic write; the caller holds the exclusive lock
    fn write_unlocked(&self, mut history: ForecastHistory) -> Result<()> {
        let cutoff = self.clock.today() - Duration::days(self.config.retention_days);
        let pruned = history.prune_before(cutoff);

        write_json_atomic(&self.path, &history)?;

        let modified = self.file_modified().ok().flatten();
        self.remember(modified, Arc::new(history));
        if pruned > 0 {
            info!(path = %self.path.display(), pruned, %cutoff, "history pruned");
        }
        debug!(path = %self.path.display(), "history saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn temp_path(test_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("wxdesk_{}_{}", test_name, uuid::Uuid::new_v4()));
        fs::create_dir_all(&dir).unwrap();
        dir.join("daily_records.json")
    }

    fn store_at(path: &Path, clock: Arc<ManualClock>) -> ForecastHistoryStore {
        let config = HistoryConfig {
            path: path.display().to_string(),
            ..Default::default()
        };
        ForecastHistoryStore::new(config, clock)
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn forecasts(pairs: &[(&str, f64)]) -> ModelForecasts {
        pairs.iter().map(|(m, v)| (m.to_string(), *v)).collect()
    }

    fn clock() -> Arc<ManualClock> {
        ManualClock::shared(Utc.with_ymd_and_hms(2024, 7, 20, 12, 0, 0).unwrap())
    }

    #[test]
    fn missing_file_is_empty_store() {
        let path = temp_path("missing");
        let store = store_at(&path, clock());
        assert!(store.load().is_empty());
    }

    #[test]
    fn upsert_then_load_round_trips() {
        let path = temp_path("upsert");
        let store = store_at(&path, clock());

        let f = forecasts(&[("ECMWF", 28.5), ("GFS", 30.0)]);
        assert!(store.upsert("NYC", day(19), &f, Some(29.0)).unwrap());

        // A fresh store reads from disk
        let reopened = store_at(&path, clock());
        let history = reopened.load();
        let record = history.record("NYC", day(19)).unwrap();
        assert_eq!(record.forecasts, f);
        assert_eq!(record.actual, Some(29.0));
    }

    #[test]
    fn unchanged_upsert_skips_write() {
        let path = temp_path("unchanged");
        let store = store_at(&path, clock());
        let f = forecasts(&[("ECMWF", 28.5)]);

        assert!(store.upsert("NYC", day(20), &f, None).unwrap());
        assert!(!store.upsert("NYC", day(20), &f, None).unwrap());
        // Empty forecasts + no actual is never a change
        assert!(!store.upsert("NYC", day(20), &ModelForecasts::new(), None).unwrap());
        // Actual arriving later is a change and keeps the forecasts
        assert!(store.upsert("NYC", day(20), &ModelForecasts::new(), Some(27.0)).unwrap());
        let history = store.load();
        let record = history.record("NYC", day(20)).unwrap();
        assert_eq!(record.forecasts, f);
        assert_eq!(record.actual, Some(27.0));
    }

    #[test]
    fn non_finite_values_never_reach_disk() {
        let path = temp_path("nan");
        let store = store_at(&path, clock());
        let f = forecasts(&[("ECMWF", f64::NAN)]);

        assert!(matches!(
            store.upsert("NYC", day(20), &f, None),
            Err(CoreError::NonFinite { .. })
        ));
        assert!(store.upsert("NYC", day(20), &ModelForecasts::new(), Some(f64::INFINITY)).is_err());
        assert!(!path.exists());
    }

    #[test]
    fn corrupted_file_falls_back_to_last_snapshot() {
        let path = temp_path("corrupt");
        let store = store_at(&path, clock());
        store
            .upsert("NYC", day(19), &forecasts(&[("GFS", 30.0)]), Some(29.0))
            .unwrap();
        assert_eq!(store.load().len(), 1);

        // Another writer leaves garbage behind
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::write(&path, "{ not json").unwrap();

        let history = store.load();
        assert_eq!(history.len(), 1);
        assert!(history.record("NYC", day(19)).is_some());

        // Next write self-heals the document
        store
            .upsert("LON", day(19), &forecasts(&[("GFS", 22.0)]), None)
            .unwrap();
        let raw = fs::read_to_string(&path).unwrap();
        let parsed: ForecastHistory = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 2);
    }

    #[test]
    fn save_prunes_beyond_retention() {
        let path = temp_path("prune");
        let clock = clock();
        let store = store_at(&path, clock.clone());

        let mut history = ForecastHistory::new();
        history.insert("NYC", day(1), DayRecord::default());
        history.insert("NYC", day(10), DayRecord::default());
        history.insert("LON", day(2), DayRecord::default());
        store.save(history).unwrap();

        // today = 2024-07-20, retention 14 days -> cutoff 2024-07-06
        let loaded = store.load();
        assert_eq!(loaded.len(), 1);
        assert!(loaded.record("NYC", day(10)).is_some());
        assert!(loaded.entity("LON").is_none());
    }

    #[test]
    fn legacy_documents_are_accepted() {
        let path = temp_path("legacy");
        fs::write(
            &path,
            r#"{"NYC": {"2024-07-19": {"forecasts": {"GFS": 30.0}, "actual_high": 29.5, "note": "x"}}}"#,
        )
        .unwrap();
        let store = store_at(&path, clock());
        let history = store.load();
        assert_eq!(history.record("NYC", day(19)).unwrap().actual, Some(29.5));
    }

    #[test]
    fn repeat_load_reuses_the_snapshot() {
        let path = temp_path("snapshot_hit");
        let store = store_at(&path, clock());
        store.upsert("NYC", day(19), &forecasts(&[("GFS", 30.0)]), None).unwrap();

        let first = store.load();
        let second = store.load();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn external_rewrite_is_picked_up() {
        let path = temp_path("snapshot_rewrite");
        let store = store_at(&path, clock());
        store.upsert("NYC", day(19), &forecasts(&[("GFS", 30.0)]), None).unwrap();
        let before = store.load();

        // Another process replaces the file
        let mut other = ForecastHistory::new();
        other.merge("LON", day(19), &forecasts(&[("ECMWF", 22.0)]), Some(21.5));
        fs::write(&path, serde_json::to_string(&other).unwrap()).unwrap();
        let later = SystemTime::now() + std::time::Duration::from_secs(5);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(later)
            .unwrap();

        let after = store.load();
        assert!(!Arc::ptr_eq(&before, &after));
        assert!(after.entity("NYC").is_none());
        assert_eq!(after.record("LON", day(19)).unwrap().actual, Some(21.5));
    }

    #[test]
    fn snapshot_expires_after_ttl() {
        let path = temp_path("snapshot_ttl");
        let clock = clock();
        let store = store_at(&path, clock.clone());
        store.upsert("NYC", day(19), &forecasts(&[("GFS", 30.0)]), None).unwrap();

        let first = store.load();
        clock.advance(Duration::seconds(HistoryConfig::default().snapshot_ttl_secs - 1));
        assert!(Arc::ptr_eq(&first, &store.load()));

        clock.advance(Duration::seconds(2));
        let reread = store.load();
        assert!(!Arc::ptr_eq(&first, &reread));
        assert_eq!(*reread, *first);
    }
}
