//! Submission scheduler: the deadline-bound control loop for one epoch.
//!
//! States: `AwaitingWindow → Predicting → Submitting → (Accepted | Missed)`.
//!
//! Starting `predict_window_secs` before the epoch ends, the scheduler runs
//! Predicting→Submitting cycles at least `retry_interval_secs` apart until
//! both directions are accepted or the deadline passes. Each cycle fetches
//! a fresh window and refits, so later cycles use fresher data. A failed
//! prediction or a rejected/timed-out submission sends the epoch back to
//! wait for the next cycle. Once a direction is accepted it is never
//! submitted again for the same epoch, and the decision behind it is kept
//! for the remaining direction so both stakes come from one confidence pair.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::feeds::FeedProvider;
use crate::gateway::SubmissionGateway;
use crate::model::Trainer;
use crate::strategy::{Decision, DecisionMaker};
use crate::types::{
    AttemptOutcome, Direction, EngineError, Epoch, EpochStatus, FeedWindow, SubmissionAttempt,
    Timeframe,
};

// ---------------------------------------------------------------------------
// Epoch report
// ---------------------------------------------------------------------------

/// Everything the scheduler did for one epoch.
#[derive(Debug, Clone)]
pub struct EpochReport {
    pub epoch: Epoch,
    pub status: EpochStatus,
    /// Every gateway call, in the order it was made.
    pub attempts: Vec<SubmissionAttempt>,
    /// Predicting→Submitting cycles started.
    pub cycles: u32,
}

impl EpochReport {
    /// The authoritative acceptance for `direction`, if any.
    pub fn accepted(&self, direction: Direction) -> Option<&SubmissionAttempt> {
        self.attempts
            .iter()
            .find(|a| a.direction == direction && a.is_authoritative())
    }

    /// Total accepted stake across both directions.
    pub fn committed(&self) -> Decimal {
        Direction::BOTH
            .iter()
            .filter_map(|d| self.accepted(*d))
            .map(|a| a.amount)
            .sum()
    }

    /// Probability behind the most recent accepted attempt.
    pub fn final_prob_up(&self) -> Option<f64> {
        self.attempts
            .iter()
            .rev()
            .find(|a| a.is_authoritative())
            .map(|a| a.prob_up)
    }

    /// Direction the engine effectively predicted: up iff P(up) > 0.5.
    pub fn predicted_direction(&self) -> Option<Direction> {
        self.final_prob_up().map(|p| {
            if p > 0.5 {
                Direction::Up
            } else {
                Direction::Down
            }
        })
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct SubmissionScheduler {
    asset_pair: String,
    timeframe: Timeframe,
    window_len: usize,
    predict_window: Duration,
    retry_interval: Duration,
    gateway_timeout: std::time::Duration,
    fallback_probability: Option<f64>,
    decisions: DecisionMaker,
    clock: Arc<dyn Clock>,
    feed: Arc<dyn FeedProvider>,
    trainer: Arc<dyn Trainer>,
    gateway: Arc<dyn SubmissionGateway>,
}

impl SubmissionScheduler {
    pub fn new(
        asset_pair: &str,
        config: &EngineConfig,
        clock: Arc<dyn Clock>,
        feed: Arc<dyn FeedProvider>,
        trainer: Arc<dyn Trainer>,
        gateway: Arc<dyn SubmissionGateway>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            asset_pair: asset_pair.to_string(),
            timeframe: config.epoch.timeframe,
            window_len: config.trainer.window_len,
            predict_window: Duration::seconds(config.epoch.predict_window_secs),
            retry_interval: Duration::seconds(config.epoch.retry_interval_secs),
            gateway_timeout: std::time::Duration::from_secs(config.epoch.gateway_timeout_secs),
            fallback_probability: config.trainer.fallback_probability,
            decisions: DecisionMaker::new(&config.stake)?,
            clock,
            feed,
            trainer,
            gateway,
        })
    }

    /// Drive one epoch to a terminal state.
    ///
    /// Returns once both directions are accepted or the deadline has passed.
    /// Never fails: recoverable errors are retried, anything else ends the
    /// epoch as `Missed`.
    pub async fn run_epoch(&self, epoch: &Epoch) -> EpochReport {
        let mut status = EpochStatus::AwaitingWindow;
        let mut attempts: Vec<SubmissionAttempt> = Vec::new();
        let mut accepted: BTreeMap<Direction, Decimal> = BTreeMap::new();
        let mut cycles: u32 = 0;
        // Set once a direction is accepted; the other side keeps its stake.
        let mut locked: Option<Decision> = None;

        self.clock
            .sleep_until(predict_start(epoch, self.predict_window))
            .await;
        debug!(pair = %self.asset_pair, epoch = %epoch.id, "Epoch awaiting window");

        while self.clock.now() < epoch.deadline_time {
            let cycle_started = self.clock.now();
            cycles += 1;
            self.transition(epoch, &mut status, EpochStatus::Predicting);

            let decision = match locked {
                Some(decision) => Ok(decision),
                None => self.predict(epoch).await,
            };
            match decision {
                Err(e) if e.is_recoverable() => {
                    debug!(epoch = %epoch.id, cycle = cycles, error = %e, "Prediction skipped");
                    self.transition(epoch, &mut status, EpochStatus::AwaitingWindow);
                }
                Err(e) => {
                    warn!(epoch = %epoch.id, cycle = cycles, error = %e, "Prediction failed");
                    break;
                }
                Ok(decision) => {
                    self.transition(epoch, &mut status, EpochStatus::Submitting);
                    self.submit_pending(epoch, &decision, cycles, &mut accepted, &mut attempts)
                        .await;
                    if locked.is_none() && !accepted.is_empty() {
                        debug!(epoch = %epoch.id, prob_up = decision.prob_up, "Decision locked");
                        locked = Some(decision);
                    }
                    if accepted.len() == Direction::BOTH.len() {
                        break;
                    }
                    self.transition(epoch, &mut status, EpochStatus::AwaitingWindow);
                }
            }

            let next_cycle = cycle_started + self.retry_interval;
            if next_cycle >= epoch.deadline_time {
                break;
            }
            self.clock.sleep_until(next_cycle).await;
        }

        let terminal = if accepted.len() == Direction::BOTH.len() {
            EpochStatus::Accepted
        } else {
            EpochStatus::Missed
        };
        self.transition(epoch, &mut status, terminal);

        match status {
            EpochStatus::Accepted => info!(
                pair = %self.asset_pair,
                epoch = %epoch.id,
                up = %accepted.get(&Direction::Up).copied().unwrap_or_default(),
                down = %accepted.get(&Direction::Down).copied().unwrap_or_default(),
                cycles,
                "Epoch accepted"
            ),
            _ => warn!(
                pair = %self.asset_pair,
                error = %EngineError::DeadlineExceeded(epoch.id),
                accepted = accepted.len(),
                attempts = attempts.len(),
                cycles,
                "Epoch missed"
            ),
        }

        EpochReport {
            epoch: *epoch,
            status,
            attempts,
            cycles,
        }
    }

    fn transition(&self, epoch: &Epoch, status: &mut EpochStatus, next: EpochStatus) {
        if *status != next {
            debug!(epoch = %epoch.id, from = %status, to = %next, "State transition");
            *status = next;
        }
    }

    /// Fresh window → trainer → confidence pair → stakes.
    async fn predict(&self, epoch: &Epoch) -> Result<Decision, EngineError> {
        let now = self.clock.now();
        let window = self
            .feed
            .get_window(&self.asset_pair, self.timeframe, now, self.window_len)
            .await?;

        let prob_up = match self.fit(epoch, window).await {
            Ok(p) => p,
            Err(EngineError::ModelUnavailable(reason)) => match self.fallback_probability {
                Some(p) => {
                    debug!(epoch = %epoch.id, %reason, fallback = p, "Using fallback probability");
                    p
                }
                None => return Err(EngineError::ModelUnavailable(reason)),
            },
            Err(e) => return Err(e),
        };

        self.decisions.decide(prob_up)
    }

    /// Run the trainer off the async executor. On a real-time clock the fit
    /// is bounded by the time left before the deadline; on a simulated one
    /// it always runs to completion so replays stay deterministic.
    async fn fit(&self, epoch: &Epoch, window: FeedWindow) -> Result<f64, EngineError> {
        let remaining = epoch
            .time_to_deadline(self.clock.now())
            .to_std()
            .map_err(|_| EngineError::DeadlineExceeded(epoch.id))?;

        let trainer = Arc::clone(&self.trainer);
        let task = tokio::task::spawn_blocking(move || trainer.fit_and_predict(&window));
        let joined = if self.clock.is_realtime() {
            match tokio::time::timeout(remaining, task).await {
                Ok(joined) => joined,
                Err(_) => {
                    return Err(EngineError::ModelUnavailable(format!(
                        "{} did not finish before the deadline",
                        self.trainer.name()
                    )))
                }
            }
        } else {
            task.await
        };
        joined.unwrap_or_else(|join_err| {
            Err(EngineError::ModelUnavailable(format!(
                "trainer task failed: {join_err}"
            )))
        })
    }

    /// Submit every direction not yet accepted, one at a time.
    async fn submit_pending(
        &self,
        epoch: &Epoch,
        decision: &Decision,
        cycle: u32,
        accepted: &mut BTreeMap<Direction, Decimal>,
        attempts: &mut Vec<SubmissionAttempt>,
    ) {
        let spendable = self.decisions.allocator().spendable();

        for direction in Direction::BOTH {
            if accepted.contains_key(&direction) {
                continue;
            }
            let started = self.clock.now();
            if started >= epoch.deadline_time {
                break;
            }

            let committed: Decimal = accepted.values().copied().sum();
            let amount = decision
                .stakes
                .amount(direction)
                .min(spendable - committed)
                .max(Decimal::ZERO);

            let submit = self.gateway.submit(epoch.id, direction, amount);
            let outcome = if self.clock.is_realtime() {
                tokio::time::timeout(self.gateway_timeout, submit)
                    .await
                    .unwrap_or(AttemptOutcome::TimedOut)
            } else {
                submit.await
            };

            let discarded = self.clock.now() > epoch.deadline_time;
            let attempt = SubmissionAttempt {
                epoch_id: epoch.id,
                direction,
                amount,
                prob_up: decision.prob_up,
                attempt_number: cycle,
                timestamp: started,
                outcome: outcome.clone(),
                discarded,
            };

            if attempt.is_authoritative() {
                debug!(epoch = %epoch.id, %direction, %amount, cycle, "Direction accepted");
                accepted.insert(direction, amount);
            } else if discarded {
                warn!(epoch = %epoch.id, %direction, %outcome, "Gateway answered after deadline; result discarded");
            } else if let Err(e) = outcome.into_result() {
                debug!(epoch = %epoch.id, %direction, cycle, error = %e, "Submission not accepted");
            }
            attempts.push(attempt);
        }
    }
}

/// Earliest instant at which the scheduler starts predicting for `epoch`.
pub fn predict_start(epoch: &Epoch, predict_window: Duration) -> DateTime<Utc> {
    (epoch.end_time - predict_window)
        .max(epoch.start_time)
        .min(epoch.deadline_time)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
