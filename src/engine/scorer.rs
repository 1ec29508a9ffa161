//! Outcome scoring and running metrics.
//!
//! Each resolved epoch is scored exactly once. Fully accepted epochs count
//! towards accuracy and the confusion matrix (positive class: up); missed
//! epochs are counted separately and never as wrong predictions. Accepted
//! stakes are settled against a stake-pool venue model for profit.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use super::scheduler::EpochReport;
use crate::config::PayoutConfig;
use crate::types::{Direction, EngineError, EpochId, EpochStatus, Outcome};

/// z-score for a two-sided 95% interval.
const Z_95: f64 = 1.96;

/// Outcomes kept for lookup; older epochs are remembered by a watermark.
const RETAINED_OUTCOMES: usize = 1024;

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub tp: u64,
    pub fp: u64,
    pub tn: u64,
    pub fn_: u64,
}

impl ConfusionMatrix {
    pub fn record(&mut self, predicted: Direction, realized: Direction) {
        match (predicted, realized) {
            (Direction::Up, Direction::Up) => self.tp += 1,
            (Direction::Up, Direction::Down) => self.fp += 1,
            (Direction::Down, Direction::Down) => self.tn += 1,
            (Direction::Down, Direction::Up) => self.fn_ += 1,
        }
    }
}

/// Cumulative counters for one run. Only ever grows.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningMetrics {
    /// Predicted up, realized up.
    pub correct_up: u64,
    /// Predicted down, realized down.
    pub correct_down: u64,
    /// Fully accepted epochs scored.
    pub total: u64,
    /// Epochs that ended without both directions accepted.
    pub missed: u64,
    pub confusion: ConfusionMatrix,
    pub staked: Decimal,
    pub profit: Decimal,
}

/// Final metrics of a run, as exported per run or sweep combination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub accuracy_estimate: f64,
    pub accuracy_lower: f64,
    pub accuracy_upper: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
    pub total: u64,
    pub missed: u64,
    pub staked: Decimal,
    pub profit: Decimal,
}

impl RunningMetrics {
    pub fn correct(&self) -> u64 {
        self.correct_up + self.correct_down
    }

    /// Point estimate; 0.5 before anything has been scored.
    pub fn accuracy(&self) -> f64 {
        if self.total == 0 {
            return 0.5;
        }
        self.correct() as f64 / self.total as f64
    }

    /// Wilson score interval at 95%. `(0, 1)` before anything is scored.
    pub fn accuracy_bounds(&self) -> (f64, f64) {
        if self.total == 0 {
            return (0.0, 1.0);
        }
        let n = self.total as f64;
        let p = self.accuracy();
        let z2 = Z_95 * Z_95;
        let denom = 1.0 + z2 / n;
        let centre = (p + z2 / (2.0 * n)) / denom;
        let margin = Z_95 * (p * (1.0 - p) / n + z2 / (4.0 * n * n)).sqrt() / denom;
        ((centre - margin).max(0.0), (centre + margin).min(1.0))
    }

    pub fn precision(&self) -> f64 {
        ratio(self.confusion.tp, self.confusion.tp + self.confusion.fp)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.confusion.tp, self.confusion.tp + self.confusion.fn_)
    }

    pub fn f1(&self) -> f64 {
        let (p, r) = (self.precision(), self.recall());
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let (accuracy_lower, accuracy_upper) = self.accuracy_bounds();
        MetricsSummary {
            accuracy_estimate: self.accuracy(),
            accuracy_lower,
            accuracy_upper,
            f1: self.f1(),
            precision: self.precision(),
            recall: self.recall(),
            total: self.total,
            missed: self.missed,
            staked: self.staked,
            profit: self.profit,
        }
    }
}

fn ratio(num: u64, den: u64) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

// ---------------------------------------------------------------------------
// Scorer
// ---------------------------------------------------------------------------

/// Result of scoring one epoch.
#[derive(Debug, Clone, PartialEq)]
pub struct EpochScore {
    pub epoch_id: EpochId,
    pub status: EpochStatus,
    pub realized: Direction,
    /// `None` for missed epochs.
    pub predicted: Option<Direction>,
    pub correct: Option<bool>,
    pub staked: Decimal,
    pub profit: Decimal,
}

/// Scores epochs in index order.
///
/// Only the newest outcomes are retained. Every epoch below the oldest
/// retained one still counts as scored, so a long live run keeps
/// exactly-once scoring in bounded memory.
pub struct OutcomeScorer {
    metrics: RunningMetrics,
    payout: PayoutConfig,
    outcomes: BTreeMap<EpochId, Outcome>,
    retained: usize,
    /// First epoch not covered by pruning.
    watermark: Option<EpochId>,
}

impl OutcomeScorer {
    pub fn new(payout: PayoutConfig) -> Self {
        Self {
            metrics: RunningMetrics::default(),
            payout,
            outcomes: BTreeMap::new(),
            retained: RETAINED_OUTCOMES,
            watermark: None,
        }
    }

    /// Keep at most `retained` outcomes (at least one).
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained.max(1);
        self
    }

    pub fn metrics(&self) -> &RunningMetrics {
        &self.metrics
    }

    pub fn is_scored(&self, epoch_id: EpochId) -> bool {
        let pruned = self
            .watermark
            .is_some_and(|w| w.timeframe == epoch_id.timeframe && epoch_id.index < w.index);
        pruned || self.outcomes.contains_key(&epoch_id)
    }

    /// Outcome recorded for a scored epoch that is still retained.
    pub fn outcome(&self, epoch_id: EpochId) -> Option<&Outcome> {
        self.outcomes.get(&epoch_id)
    }

    /// Score one epoch against its realized outcome.
    ///
    /// Fails with `AlreadyScored` (leaving metrics untouched) if the epoch
    /// was scored before.
    pub fn score(
        &mut self,
        report: &EpochReport,
        outcome: &Outcome,
    ) -> Result<EpochScore, EngineError> {
        let epoch_id = report.epoch.id;
        if outcome.epoch_id != epoch_id {
            return Err(EngineError::Scoring(format!(
                "outcome for {} given for epoch {epoch_id}",
                outcome.epoch_id
            )));
        }
        if self.is_scored(epoch_id) {
            return Err(EngineError::AlreadyScored(epoch_id));
        }

        let realized = outcome.realized_direction;
        for direction in Direction::BOTH {
            if let Some(attempt) = report.accepted(direction) {
                debug!(
                    epoch = %epoch_id,
                    %direction,
                    amount = %attempt.amount,
                    correct = direction == realized,
                    "Stake settled"
                );
            }
        }

        let (staked, profit) = self.settle(report, realized);
        self.metrics.staked += staked;
        self.metrics.profit += profit;

        let mut predicted = None;
        let mut correct = None;
        match report.status {
            EpochStatus::Accepted => {
                let p = report.predicted_direction().ok_or_else(|| {
                    EngineError::Scoring(format!("accepted epoch {epoch_id} has no acceptance"))
                })?;
                self.metrics.total += 1;
                self.metrics.confusion.record(p, realized);
                match (p, realized) {
                    (Direction::Up, Direction::Up) => self.metrics.correct_up += 1,
                    (Direction::Down, Direction::Down) => self.metrics.correct_down += 1,
                    _ => {}
                }
                predicted = Some(p);
                correct = Some(p == realized);
            }
            _ => self.metrics.missed += 1,
        }

        self.outcomes.insert(epoch_id, *outcome);
        while self.outcomes.len() > self.retained {
            if let Some((oldest, _)) = self.outcomes.pop_first() {
                self.watermark = Some(EpochId {
                    index: oldest.index + 1,
                    ..oldest
                });
            }
        }

        let (lower, upper) = self.metrics.accuracy_bounds();
        info!(
            epoch = %epoch_id,
            status = %report.status,
            %realized,
            correct = ?correct,
            profit = %profit,
            accuracy = format!("{:.1}%", self.metrics.accuracy() * 100.0),
            bounds = format!("[{:.1}%, {:.1}%]", lower * 100.0, upper * 100.0),
            total = self.metrics.total,
            missed = self.metrics.missed,
            "Epoch scored"
        );

        Ok(EpochScore {
            epoch_id,
            status: report.status,
            realized,
            predicted,
            correct,
            staked,
            profit,
        })
    }

    /// Pro-rata split of the pool among correct stakes; returns
    /// `(own stake, own profit)`.
    fn settle(&self, report: &EpochReport, realized: Direction) -> (Decimal, Decimal) {
        let own = |d: Direction| report.accepted(d).map(|a| a.amount).unwrap_or_default();
        let staked = own(Direction::Up) + own(Direction::Down);
        if staked.is_zero() {
            return (Decimal::ZERO, Decimal::ZERO);
        }

        let own_correct = own(realized);
        let others_correct = Decimal::from_f64(self.payout.others_accuracy)
            .map(|acc| self.payout.others_stake * acc)
            .unwrap_or_default();
        let pool = self.payout.others_stake + staked + self.payout.revenue;
        let winners = own_correct + others_correct;

        let payout = if winners.is_zero() {
            Decimal::ZERO
        } else {
            pool * own_correct / winners
        };
        (staked, (payout - staked).round_dp(8))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
