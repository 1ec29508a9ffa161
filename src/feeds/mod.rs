//! Feed Window Providers.
//!
//! Defines the `FeedProvider` trait and provides implementations for:
//! - Historical replay from a CSV file (simulation, sweeps, tests)
//! - Bybit v5 klines (live mode)

pub mod bybit;
pub mod replay;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::types::{EngineError, FeedWindow, Timeframe};

/// Abstraction over sources of historical price observations.
///
/// Implementors must be safe to call concurrently and repeatedly; the
/// engine treats every call as independent.
#[async_trait]
pub trait FeedProvider: Send + Sync {
    /// The last `length` observations at or before `end_time`, oldest first.
    ///
    /// Fails with `InsufficientHistory` if fewer than `length` exist.
    async fn get_window(
        &self,
        asset_pair: &str,
        timeframe: Timeframe,
        end_time: DateTime<Utc>,
        length: usize,
    ) -> Result<FeedWindow, EngineError>;

    /// Provider name for logging and identification.
    fn name(&self) -> &str;
}

/// Price at or before `t`, read through the provider's window interface.
pub async fn price_at(
    feed: &dyn FeedProvider,
    asset_pair: &str,
    timeframe: Timeframe,
    t: DateTime<Utc>,
) -> Result<f64, EngineError> {
    let window = feed.get_window(asset_pair, timeframe, t, 1).await?;
    window
        .last()
        .map(|o| o.price)
        .ok_or(EngineError::InsufficientHistory { needed: 1, available: 0 })
}
