//! File-backed snapshot feed
//!
//! Reads a JSON object mapping symbol to indicator snapshot. An external
//! process keeps the file fresh; every call re-reads it, so the engine
//! always sees whatever was last written.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::domain::snapshot::IndicatorSnapshot;
use crate::ports::market_data::{MarketDataError, MarketDataPort};

#[derive(Debug, Clone)]
pub struct FileSnapshotFeed {
    path: PathBuf,
}

impl FileSnapshotFeed {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self, symbol: &str) -> Result<HashMap<String, IndicatorSnapshot>, MarketDataError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            MarketDataError::unavailable(symbol, format!("{}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| MarketDataError::Malformed {
            symbol: symbol.to_string(),
            reason: format!("{}: {}", self.path.display(), e),
        })
    }
}

#[async_trait]
impl MarketDataPort for FileSnapshotFeed {
    async fn indicator_snapshot(&self, symbol: &str) -> Result<IndicatorSnapshot, MarketDataError> {
        let mut snapshots = self.load(symbol).await?;
        let mut snapshot = snapshots
            .remove(symbol)
            .ok_or_else(|| MarketDataError::unavailable(symbol, "symbol not in snapshot file"))?;
        // The map key is authoritative
        snapshot.symbol = symbol.to_string();
        Ok(snapshot)
    }

    async fn latest_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        self.indicator_snapshot(symbol).await.map(|s| s.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::snapshot::{Timeframe, TimeframeIndicators};
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_snapshots() -> NamedTempFile {
        let snapshot = IndicatorSnapshot::new(
            "BTC/USDT",
            Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap(),
            50000.0,
        )
        .with_frame(
            Timeframe::H4,
            TimeframeIndicators {
                close: 50000.0,
                adx: 30.0,
                atr: 400.0,
                ..Default::default()
            },
        );
        let mut map = HashMap::new();
        map.insert("BTC/USDT".to_string(), snapshot);

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&map).unwrap().as_bytes())
            .unwrap();
        file
    }

    #[tokio::test]
    async fn test_reads_snapshot() {
        let file = write_snapshots();
        let feed = FileSnapshotFeed::new(file.path());

        let snapshot = feed.indicator_snapshot("BTC/USDT").await.unwrap();
        assert_eq!(snapshot.price, 50000.0);
        assert_eq!(snapshot.frame(Timeframe::H4).unwrap().adx, 30.0);
        assert_eq!(feed.latest_price("BTC/USDT").await.unwrap(), 50000.0);
    }

    #[tokio::test]
    async fn test_missing_symbol_is_unavailable() {
        let file = write_snapshots();
        let feed = FileSnapshotFeed::new(file.path());
        assert!(matches!(
            feed.indicator_snapshot("ETH/USDT").await,
            Err(MarketDataError::DataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_file_is_unavailable() {
        let feed = FileSnapshotFeed::new("/nonexistent/snapshots.json");
        assert!(matches!(
            feed.latest_price("BTC/USDT").await,
            Err(MarketDataError::DataUnavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_garbage_is_malformed() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"{ not json").unwrap();
        let feed = FileSnapshotFeed::new(file.path());
        assert!(matches!(
            feed.indicator_snapshot("BTC/USDT").await,
            Err(MarketDataError::Malformed { .. })
        ));
    }
}
