//! Historical replay: simulated runs and parameter sweeps.
//!
//! A simulation drives the same [`Engine`] as live mode, but over a
//! [`ReplayFeed`] with a [`SimClock`] and an in-memory gateway, so retries
//! are logical iterations and two runs over the same data are identical.

pub mod sweep;

use std::sync::Arc;
use tracing::info;

use crate::clock::SimClock;
use crate::config::EngineConfig;
use crate::engine::{Engine, EpochRecord, RunSummary};
use crate::feeds::replay::ReplayFeed;
use crate::gateway::SimulatedGateway;
use crate::model::build_trainer;
use crate::types::EngineError;

/// Result of one simulated run.
#[derive(Debug, Clone)]
pub struct SimulationReport {
    pub summary: RunSummary,
    pub records: Vec<EpochRecord>,
}

/// Replay the whole history in `feed` through a fresh engine.
///
/// The replay cursor starts once `window_len` observations exist and the
/// run stops at the last observation, so every scored epoch has a known
/// end price.
pub async fn run_simulation(
    config: &EngineConfig,
    feed: Arc<ReplayFeed>,
) -> Result<SimulationReport, EngineError> {
    config.validate()?;
    let needed = config.trainer.window_len;
    let (start, until) = match (feed.timestamp_at(needed - 1), feed.span()) {
        (Some(start), Some((_, last))) => (start, last),
        _ => {
            return Err(EngineError::InsufficientHistory {
                needed,
                available: feed.len(),
            })
        }
    };

    let clock = SimClock::new(start);
    let mut engine = Engine::new(
        feed.asset_pair(),
        config.clone(),
        Arc::new(clock),
        feed.clone(),
        build_trainer(&config.trainer),
        Arc::new(SimulatedGateway::new()),
    )?;

    info!(
        pair = feed.asset_pair(),
        observations = feed.len(),
        from = %start,
        until = %until,
        "Simulation started"
    );
    let summary = engine.run(until).await?;

    Ok(SimulationReport {
        summary,
        records: engine.records().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_engine_config;
    use crate::types::Observation;
    use chrono::{Duration, TimeZone, Utc};

    fn make_feed(minutes: i64) -> Arc<ReplayFeed> {
        let start = Utc.timestamp_opt(1_699_999_800, 0).unwrap();
        let obs = (0..minutes)
            .map(|i| Observation {
                timestamp: start + Duration::minutes(i),
                price: 100.0 + ((i * 7) % 11) as f64,
            })
            .collect();
        Arc::new(ReplayFeed::new("BTC/USDT", obs))
    }

    #[tokio::test]
    async fn test_simulation_is_deterministic() {
        let cfg = sample_engine_config();
        let a = run_simulation(&cfg, make_feed(240)).await.unwrap();
        let b = run_simulation(&cfg, make_feed(240)).await.unwrap();
        assert!(a.summary.epochs > 0);
        assert_eq!(a.summary, b.summary);
        assert_eq!(a.records, b.records);
    }

    #[tokio::test]
    async fn test_short_history_rejected() {
        let cfg = sample_engine_config();
        let err = run_simulation(&cfg, make_feed(50)).await.unwrap_err();
        assert!(matches!(err, EngineError::InsufficientHistory { needed: 120, .. }));
    }
}
