//! File-backed collaborators
//!
//! The collector process drops normalized JSON next to the bot:
//! an array of [`EntityInput`] and an array of [`MarketSnapshot`].
//! Both are re-read on demand. The driver caches the catalog it discovers,
//! but forecasts and quotes come from the latest drop every cycle.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use crate::cycle::{MarketSource, QuoteSource};
use crate::types::{EntityInput, ForecastUpdate, MarketSnapshot};

async fn read_json<T: serde::de::DeserializeOwned>(path: &PathBuf) -> Result<Option<T>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let value = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("failed to read {}", path.display())),
    }
}

pub struct JsonMarketSource {
    path: PathBuf,
}

impl JsonMarketSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl MarketSource for JsonMarketSource {
    async fn discover(&self) -> Result<Vec<EntityInput>> {
        let inputs: Vec<EntityInput> = read_json(&self.path).await?.unwrap_or_default();
        debug!(path = %self.path.display(), entities = inputs.len(), "inputs read");
        Ok(inputs)
    }

    async fn forecasts(&self) -> Result<Vec<ForecastUpdate>> {
        Ok(self.discover().await?.into_iter().map(ForecastUpdate::from).collect())
    }
}

pub struct JsonQuoteSource {
    path: PathBuf,
}

impl JsonQuoteSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn snapshot(&self) -> Result<HashMap<String, MarketSnapshot>> {
        let quotes: Vec<MarketSnapshot> = read_json(&self.path).await?.unwrap_or_default();
        Ok(quotes.into_iter().map(|q| (q.id.clone(), q)).collect())
    }
}

#[async_trait]
impl QuoteSource for JsonQuoteSource {
    async fn quote(&self, option_id: &str) -> Result<Option<MarketSnapshot>> {
        Ok(self.snapshot().await?.remove(option_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_files_are_empty() {
        let dir = std::env::temp_dir().join(format!("wxdesk_sources_{}", uuid::Uuid::new_v4()));
        let markets = JsonMarketSource::new(dir.join("inputs.json"));
        assert!(markets.discover().await.unwrap().is_empty());
        assert!(markets.forecasts().await.unwrap().is_empty());
        let quotes = JsonQuoteSource::new(dir.join("quotes.json"));
        assert!(quotes.quote("x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn quotes_are_looked_up_by_id() {
        let dir = std::env::temp_dir().join(format!("wxdesk_sources_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("quotes.json");
        std::fs::write(
            &path,
            r#"[{"id": "nyc-28", "price_cents": 88.0, "ask_cents": 89.0, "bid_cents": 87.0,
                 "book_depth_usd": 400.0, "volume_usd": 9000.0}]"#,
        )
        .unwrap();

        let quotes = JsonQuoteSource::new(&path);
        let q = quotes.quote("nyc-28").await.unwrap().unwrap();
        assert_eq!(q.ask_cents, 89.0);
        assert!(quotes.quote("nyc-29").await.unwrap().is_none());

        std::fs::write(&path, "not json").unwrap();
        assert!(quotes.quote("nyc-28").await.is_err());
        let _ = std::fs::remove_dir_all(dir);
    }
}
