//! Engine run loop for one asset pair.
//!
//! Picks the epoch of interest, drives the scheduler through it, and once
//! an epoch has ended (plus the resolution delay) reads the realized move
//! from the feed and scores it. Works identically under the simulated and
//! the system clock.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::scheduler::{EpochReport, SubmissionScheduler};
use super::scorer::{EpochScore, MetricsSummary, OutcomeScorer, RunningMetrics};
use crate::clock::{Clock, EpochClock};
use crate::config::EngineConfig;
use crate::feeds::{price_at, FeedProvider};
use crate::gateway::SubmissionGateway;
use crate::model::Trainer;
use crate::types::{Direction, EngineError, Epoch, EpochStatus, Outcome, Timeframe};

/// Epoch records kept in memory by a live engine.
const LIVE_RECORDS_KEPT: usize = 512;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One row of the per-run epoch log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch_index: i64,
    pub start_time: DateTime<Utc>,
    pub status: EpochStatus,
    pub cycles: u32,
    pub prob_up: Option<f64>,
    pub stake_up: Decimal,
    pub stake_down: Decimal,
    pub realized_up: bool,
    pub price_delta: f64,
    pub correct: Option<bool>,
    pub profit: Decimal,
}

impl EpochRecord {
    fn new(report: &EpochReport, outcome: &Outcome, score: &EpochScore) -> Self {
        let stake = |d: Direction| report.accepted(d).map(|a| a.amount).unwrap_or_default();
        Self {
            epoch_index: report.epoch.id.index,
            start_time: report.epoch.start_time,
            status: report.status,
            cycles: report.cycles,
            prob_up: report.final_prob_up(),
            stake_up: stake(Direction::Up),
            stake_down: stake(Direction::Down),
            realized_up: outcome.realized_direction == Direction::Up,
            price_delta: outcome.realized_price_delta,
            correct: score.correct,
            profit: score.profit,
        }
    }
}

/// Final report of an engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub asset_pair: String,
    pub timeframe: Timeframe,
    pub epochs: usize,
    pub accepted: usize,
    pub missed: usize,
    pub attempts: usize,
    pub metrics: MetricsSummary,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    asset_pair: String,
    clock: Arc<dyn Clock>,
    epoch_clock: EpochClock,
    feed: Arc<dyn FeedProvider>,
    scheduler: SubmissionScheduler,
    scorer: OutcomeScorer,
    resolution_delay: Duration,
    pending: VecDeque<EpochReport>,
    records: Vec<EpochRecord>,
    scored: usize,
    last_index: Option<i64>,
    attempts: usize,
}

impl Engine {
    /// Fails with `InvalidConfiguration` before any epoch begins.
    pub fn new(
        asset_pair: &str,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        feed: Arc<dyn FeedProvider>,
        trainer: Arc<dyn Trainer>,
        gateway: Arc<dyn SubmissionGateway>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let epoch_clock = EpochClock::new(
            config.epoch.timeframe,
            Duration::seconds(config.epoch.submission_lead_secs),
            Arc::clone(&clock),
        )?;
        let scheduler = SubmissionScheduler::new(
            asset_pair,
            &config,
            Arc::clone(&clock),
            Arc::clone(&feed),
            trainer,
            gateway,
        )?;

        Ok(Self {
            asset_pair: asset_pair.to_string(),
            clock,
            epoch_clock,
            feed,
            scheduler,
            scorer: OutcomeScorer::new(config.payout.clone()),
            resolution_delay: Duration::seconds(config.epoch.resolution_delay_secs),
            pending: VecDeque::new(),
            records: Vec::new(),
            scored: 0,
            last_index: None,
            attempts: 0,
        })
    }

    pub fn metrics(&self) -> &RunningMetrics {
        self.scorer.metrics()
    }

    /// Scored epochs, oldest first. A live engine keeps only the newest.
    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    fn trim_records(&mut self, keep: usize) {
        let excess = self.records.len().saturating_sub(keep);
        if excess > 0 {
            self.records.drain(..excess);
        }
    }

    /// Epochs run but not yet scored.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// The next epoch this engine will act on.
    pub fn next_epoch(&self) -> Epoch {
        let candidate = self.epoch_clock.epoch_of_interest();
        match self.last_index {
            Some(last) if candidate.id.index <= last => self.epoch_clock.epoch(last + 1),
            _ => candidate,
        }
    }

    fn resolves_at(&self, epoch: &Epoch) -> DateTime<Utc> {
        epoch.end_time + self.resolution_delay
    }

    /// Run the scheduler for the next epoch and wait out its deadline.
    pub async fn step(&mut self) -> EpochReport {
        let epoch = self.next_epoch();
        debug!(pair = %self.asset_pair, %epoch, "Epoch of interest");

        let report = self.scheduler.run_epoch(&epoch).await;
        self.clock.sleep_until(epoch.deadline_time).await;

        self.last_index = Some(epoch.id.index);
        self.attempts += report.attempts.len();
        self.pending.push_back(report.clone());
        report
    }

    /// Score every pending epoch whose realized price is due.
    ///
    /// A recoverable feed error leaves the epoch queued for a later call.
    pub async fn resolve_due(&mut self) -> Result<usize, EngineError> {
        let mut resolved = 0;
        while let Some(report) = self.pending.front() {
            if self.resolves_at(&report.epoch) > self.clock.now() {
                break;
            }
            let epoch = report.epoch;
            let outcome = match self.realized_outcome(&epoch).await {
                Ok(outcome) => outcome,
                Err(e) if e.is_recoverable() => {
                    warn!(pair = %self.asset_pair, epoch = %epoch.id, error = %e, "Outcome not yet available");
                    break;
                }
                Err(e) => return Err(e),
            };

            let Some(report) = self.pending.pop_front() else {
                break;
            };
            let score = self.scorer.score(&report, &outcome)?;
            self.records.push(EpochRecord::new(&report, &outcome, &score));
            self.scored += 1;
            resolved += 1;
        }
        Ok(resolved)
    }

    async fn realized_outcome(&self, epoch: &Epoch) -> Result<Outcome, EngineError> {
        let tf = epoch.id.timeframe;
        let start = price_at(self.feed.as_ref(), &self.asset_pair, tf, epoch.start_time).await?;
        let end = price_at(self.feed.as_ref(), &self.asset_pair, tf, epoch.end_time).await?;
        Ok(Outcome::from_prices(epoch.id, start, end))
    }

    /// Run epochs back to back until the next one would resolve after
    /// `until`, then score everything still pending.
    pub async fn run(&mut self, until: DateTime<Utc>) -> Result<RunSummary, EngineError> {
        info!(
            pair = %self.asset_pair,
            timeframe = %self.epoch_clock.timeframe(),
            from = %self.clock.now(),
            until = %until,
            "Engine run started"
        );

        loop {
            self.resolve_due().await?;
            let epoch = self.next_epoch();
            if self.resolves_at(&epoch) > until {
                break;
            }
            self.step().await;
        }
        self.drain().await?;

        let summary = self.summary();
        info!(
            pair = %self.asset_pair,
            epochs = summary.epochs,
            accepted = summary.accepted,
            missed = summary.missed,
            accuracy = format!("{:.2}%", summary.metrics.accuracy_estimate * 100.0),
            profit = %summary.metrics.profit,
            "Engine run finished"
        );
        Ok(summary)
    }

    /// Run until `shutdown` flips to `true`, then score what is resolvable.
    pub async fn run_until_shutdown(
        &mut self,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<RunSummary, EngineError> {
        info!(pair = %self.asset_pair, "Live engine started");
        while !*shutdown.borrow() {
            self.resolve_due().await?;
            self.trim_records(LIVE_RECORDS_KEPT);
            tokio::select! {
                _ = shutdown.changed() => break,
                report = self.step() => {
                    debug!(pair = %self.asset_pair, epoch = %report.epoch.id, status = %report.status, "Epoch finished");
                }
            }
        }
        self.resolve_due().await?;
        info!(pair = %self.asset_pair, unscored = self.pending.len(), "Live engine stopped");
        Ok(self.summary())
    }

    /// Wait for and score every pending epoch.
    async fn drain(&mut self) -> Result<(), EngineError> {
        while let Some(report) = self.pending.front() {
            let due = self.resolves_at(&report.epoch);
            self.clock.sleep_until(due).await;
            if self.resolve_due().await? == 0 {
                warn!(pair = %self.asset_pair, unscored = self.pending.len(), "Epochs left unscored");
                break;
            }
        }
        Ok(())
    }

    pub fn summary(&self) -> RunSummary {
        let metrics = self.scorer.metrics();
        RunSummary {
            asset_pair: self.asset_pair.clone(),
            timeframe: self.epoch_clock.timeframe(),
            epochs: self.scored,
            accepted: metrics.total as usize,
            missed: metrics.missed as usize,
            attempts: self.attempts,
            metrics: metrics.summary(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;
    use crate::config::tests::sample_engine_config;
    use crate::feeds::replay::ReplayFeed;
    use crate::gateway::SimulatedGateway;
    use crate::model::ConstantTrainer;
    use crate::types::Observation;
    use chrono::TimeZone;

    const PAIR: &str = "BTC/USDT";

    /// One observation a minute; price rises during even epochs and falls
    /// during odd ones.
    fn make_feed(start: DateTime<Utc>, minutes: i64) -> Arc<ReplayFeed> {
        let mut price = 100.0;
        let obs = (0..minutes)
            .map(|i| {
                let t = start + Duration::minutes(i);
                if i > 0 {
                    price += if (t.timestamp() / 300) % 2 == 0 { 1.0 } else { -1.0 };
                }
                Observation { timestamp: t, price }
            })
            .collect();
        Arc::new(ReplayFeed::new(PAIR, obs))
    }

    fn make_engine(sim: &SimClock, feed: Arc<ReplayFeed>, prob_up: f64) -> Engine {
        Engine::new(
            PAIR,
            sample_engine_config(),
            Arc::new(sim.clone()),
            feed,
            Arc::new(ConstantTrainer::new(prob_up)),
            Arc::new(SimulatedGateway::new()),
        )
        .unwrap()
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_opt(1_699_999_800, 0).unwrap()
    }

    #[tokio::test]
    async fn test_run_scores_every_epoch() {
        let feed = make_feed(t0(), 200);
        let start = feed.timestamp_at(119).unwrap();
        let until = feed.span().unwrap().1;
        let sim = SimClock::new(start);
        let mut engine = make_engine(&sim, feed, 0.7);

        let summary = engine.run(until).await.unwrap();

        assert!(summary.epochs > 10);
        assert_eq!(summary.accepted, summary.epochs);
        assert_eq!(summary.missed, 0);
        assert_eq!(engine.pending(), 0);
        assert!(engine.records().iter().all(|r| r.start_time + Duration::minutes(5) <= until));
        // Constant up prediction is right on rising epochs only.
        let m = engine.metrics();
        assert_eq!(m.correct_down, 0);
        assert_eq!(m.correct_up + m.confusion.fp, m.total);
        assert!(m.correct_up > 0 && m.confusion.fp > 0);
    }

    #[tokio::test]
    async fn test_epochs_are_consecutive() {
        let feed = make_feed(t0(), 180);
        let sim = SimClock::new(feed.timestamp_at(119).unwrap());
        let until = feed.span().unwrap().1;
        let mut engine = make_engine(&sim, feed, 0.5);
        engine.run(until).await.unwrap();

        let idx: Vec<i64> = engine.records().iter().map(|r| r.epoch_index).collect();
        assert!(idx.windows(2).all(|w| w[1] == w[0] + 1), "{idx:?}");
    }

    #[tokio::test]
    async fn test_trimmed_records_keep_summary() {
        let feed = make_feed(t0(), 200);
        let sim = SimClock::new(feed.timestamp_at(119).unwrap());
        let until = feed.span().unwrap().1;
        let mut engine = make_engine(&sim, feed, 0.6);
        let before = engine.run(until).await.unwrap();
        assert!(before.epochs > 3);
        let newest = engine.records().last().cloned();

        engine.trim_records(3);
        assert_eq!(engine.records().len(), 3);
        assert_eq!(engine.records().last().cloned(), newest);
        assert_eq!(engine.summary(), before);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_run() {
        let mut cfg = sample_engine_config();
        cfg.stake.budget = Decimal::ZERO;
        let sim = SimClock::new(t0());
        let result = Engine::new(
            PAIR,
            cfg,
            Arc::new(sim),
            make_feed(t0(), 10),
            Arc::new(ConstantTrainer::new(0.5)),
            Arc::new(SimulatedGateway::new()),
        );
        assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_live_loop() {
        let feed = make_feed(t0(), 200);
        let sim = SimClock::new(feed.timestamp_at(119).unwrap());
        let mut engine = make_engine(&sim, feed, 0.6);
        let (tx, rx) = watch::channel(true);
        let summary = engine.run_until_shutdown(rx).await.unwrap();
        assert_eq!(summary.epochs, 0);
        drop(tx);
    }
}
