//! Historical replay feed.
//!
//! Serves windows from an in-memory, time-ordered series of observations
//! for one asset pair. Loaded from a CSV file of `timestamp_ms,price` rows.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

use super::FeedProvider;
use crate::types::{EngineError, FeedWindow, Observation, Timeframe};

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp_ms: i64,
    price: f64,
}

/// In-memory price history for one asset pair.
#[derive(Debug, Clone)]
pub struct ReplayFeed {
    asset_pair: String,
    observations: Vec<Observation>,
}

impl ReplayFeed {
    /// Build from observations in any order; duplicates keep the last price.
    pub fn new(asset_pair: &str, mut observations: Vec<Observation>) -> Self {
        observations.sort_by_key(|o| o.timestamp);
        observations.dedup_by(|later, earlier| {
            if later.timestamp == earlier.timestamp {
                earlier.price = later.price;
                true
            } else {
                false
            }
        });
        Self {
            asset_pair: asset_pair.to_string(),
            observations,
        }
    }

    /// Load `timestamp_ms,price` rows from a CSV file with a header.
    pub fn load_csv<P: AsRef<Path>>(asset_pair: &str, path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("Failed to open history file: {}", path.display()))?;

        let mut observations = Vec::new();
        for (line, row) in reader.deserialize::<CsvRow>().enumerate() {
            let row = row.with_context(|| format!("Bad history row {}", line + 2))?;
            let timestamp = DateTime::from_timestamp_millis(row.timestamp_ms)
                .with_context(|| format!("Timestamp out of range on row {}", line + 2))?;
            observations.push(Observation {
                timestamp,
                price: row.price,
            });
        }

        let feed = Self::new(asset_pair, observations);
        info!(
            asset_pair,
            path = %path.display(),
            observations = feed.len(),
            "History loaded"
        );
        Ok(feed)
    }

    pub fn asset_pair(&self) -> &str {
        &self.asset_pair
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// First and last timestamps, if any data is loaded.
    pub fn span(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((self.observations.first()?.timestamp, self.observations.last()?.timestamp))
    }

    /// Timestamp of the `n`-th observation (0-based).
    pub fn timestamp_at(&self, n: usize) -> Option<DateTime<Utc>> {
        self.observations.get(n).map(|o| o.timestamp)
    }
}

#[async_trait]
impl FeedProvider for ReplayFeed {
    async fn get_window(
        &self,
        asset_pair: &str,
        _timeframe: Timeframe,
        end_time: DateTime<Utc>,
        length: usize,
    ) -> Result<FeedWindow, EngineError> {
        if asset_pair != self.asset_pair {
            return Err(EngineError::Feed(format!(
                "replay feed holds {}, not {asset_pair}",
                self.asset_pair
            )));
        }
        let available = self.observations.partition_point(|o| o.timestamp <= end_time);
        if available < length {
            return Err(EngineError::InsufficientHistory {
                needed: length,
                available,
            });
        }
        FeedWindow::new(self.observations[available - length..available].to_vec())
    }

    fn name(&self) -> &str {
        "replay"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
