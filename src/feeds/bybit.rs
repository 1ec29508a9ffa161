//! Bybit v5 public kline feed for live mode.
//!
//! API docs: https://bybit-exchange.github.io/docs/v5/market/kline
//! Auth: not required for market data.
//!
//! Each candle is reported as one observation stamped at the candle's
//! close time, so a window ending at `t` only contains fully closed candles.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::FeedProvider;
use crate::types::{EngineError, FeedWindow, Observation, Timeframe};

/// Hard cap on candles per request.
const MAX_LIMIT: usize = 1000;

/// Longest window one request can serve: one candle of the limit goes to
/// the still-open candle.
pub const MAX_WINDOW_LEN: usize = MAX_LIMIT - 1;

#[derive(Debug, Deserialize)]
struct KlineResponse {
    #[serde(rename = "retCode")]
    ret_code: i32,
    #[serde(rename = "retMsg")]
    ret_msg: String,
    result: Option<KlineResult>,
}

#[derive(Debug, Deserialize)]
struct KlineResult {
    #[serde(default)]
    list: Vec<Vec<String>>,
}

pub struct BybitFeed {
    http: Client,
    base_url: String,
    interval_minutes: u32,
}

impl BybitFeed {
    pub fn new(base_url: &str, interval_minutes: u32) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .user_agent("PREDICTOOR/0.1.0")
            .build()
            .context("Failed to build HTTP client for Bybit")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            interval_minutes: interval_minutes.max(1),
        })
    }

    /// `BTC/USDT` -> `BTCUSDT`.
    fn symbol(asset_pair: &str) -> String {
        asset_pair.replace(['/', '-'], "").to_uppercase()
    }

    /// Row layout: `[startTime, open, high, low, close, volume, turnover]`.
    fn parse_row(&self, row: &[String]) -> Option<Observation> {
        let start_ms: i64 = row.first()?.parse().ok()?;
        let close: f64 = row.get(4)?.parse().ok()?;
        let start = DateTime::from_timestamp_millis(start_ms)?;
        Some(Observation {
            timestamp: start + Duration::minutes(i64::from(self.interval_minutes)),
            price: close,
        })
    }
}

#[async_trait]
impl FeedProvider for BybitFeed {
    async fn get_window(
        &self,
        asset_pair: &str,
        _timeframe: Timeframe,
        end_time: DateTime<Utc>,
        length: usize,
    ) -> Result<FeedWindow, EngineError> {
        let url = format!("{}/v5/market/kline", self.base_url);
        let symbol = Self::symbol(asset_pair);
        // One extra candle covers the still-open one that gets filtered out.
        let limit = (length + 1).min(MAX_LIMIT);

        let resp = self
            .http
            .get(&url)
            .query(&[
                ("category", "spot".to_string()),
                ("symbol", symbol.clone()),
                ("interval", self.interval_minutes.to_string()),
                ("end", end_time.timestamp_millis().to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(|e| EngineError::Feed(format!("bybit request failed: {e}")))?;

        if !resp.status().is_success() {
            return Err(EngineError::Feed(format!(
                "bybit returned HTTP {}",
                resp.status()
            )));
        }

        let body: KlineResponse = resp
            .json()
            .await
            .map_err(|e| EngineError::Feed(format!("bybit response malformed: {e}")))?;

        if body.ret_code != 0 {
            return Err(EngineError::Feed(format!(
                "bybit error {}: {}",
                body.ret_code, body.ret_msg
            )));
        }

        let mut observations: Vec<Observation> = body
            .result
            .map(|r| r.list)
            .unwrap_or_default()
            .iter()
            .filter_map(|row| self.parse_row(row))
            .filter(|o| o.timestamp <= end_time)
            .collect();

        // Bybit lists newest first.
        observations.sort_by_key(|o| o.timestamp);
        observations.dedup_by_key(|o| o.timestamp);

        let available = observations.len();
        if available < length {
            return Err(EngineError::InsufficientHistory {
                needed: length,
                available,
            });
        }

        debug!(symbol, count = length, end = %end_time, "Bybit window fetched");
        FeedWindow::new(observations.split_off(available - length))
    }

    fn name(&self) -> &str {
        "bybit"
    }
}
