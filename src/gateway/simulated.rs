//! In-memory venue.
//!
//! Accepts every submission unless a scripted outcome is queued for the
//! direction. Calls are recorded so tests and dry runs can inspect what
//! would have been sent; a dry run keeps only the most recent ones.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use tracing::info;

use super::SubmissionGateway;
use crate::types::{AttemptOutcome, Direction, EpochId};

/// Submissions remembered by a dry-run gateway.
const DRY_RUN_HISTORY: usize = 256;

/// One call received by the simulated venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub epoch_id: EpochId,
    pub direction: Direction,
    pub amount: Decimal,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Default)]
pub struct SimulatedGateway {
    scripts: Mutex<HashMap<Direction, VecDeque<AttemptOutcome>>>,
    submissions: Mutex<VecDeque<Submission>>,
    /// Oldest submissions are forgotten past this many; `None` keeps all.
    capacity: Option<usize>,
    log_submissions: bool,
}

impl SimulatedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log every submission at info level, as a dry-run stand-in for a live venue.
    pub fn dry_run() -> Self {
        Self {
            log_submissions: true,
            ..Self::default()
        }
        .with_capacity(DRY_RUN_HISTORY)
    }

    /// Remember at most `capacity` submissions (at least one).
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    /// Queue outcomes returned, in order, for the next calls in `direction`.
    pub fn with_script(self, direction: Direction, outcomes: Vec<AttemptOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(direction)
            .or_default()
            .extend(outcomes);
        self
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Sum of accepted amounts for one epoch and direction.
    pub fn accepted_amount(&self, epoch_id: EpochId, direction: Direction) -> Decimal {
        self.submissions()
            .iter()
            .filter(|s| s.epoch_id == epoch_id && s.direction == direction)
            .filter(|s| s.outcome.is_accepted())
            .map(|s| s.amount)
            .sum()
    }
}

#[async_trait]
impl SubmissionGateway for SimulatedGateway {
    async fn submit(
        &self,
        epoch_id: EpochId,
        direction: Direction,
        amount: Decimal,
    ) -> AttemptOutcome {
        let outcome = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&direction)
            .and_then(VecDeque::pop_front)
            .unwrap_or(AttemptOutcome::Accepted);

        if self.log_submissions {
            info!(
                epoch = %epoch_id,
                %direction,
                amount = format!("{:.2}", amount),
                %outcome,
                "[DRY RUN] Would submit stake"
            );
        }

        let mut log = self
            .submissions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity {
            while log.len() >= capacity {
                log.pop_front();
            }
        }
        log.push_back(Submission {
            epoch_id,
            direction,
            amount,
            outcome: outcome.clone(),
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Timeframe;
    use rust_decimal_macros::dec;

    fn id() -> EpochId {
        EpochId { timeframe: Timeframe::M5, index: 1 }
    }

    #[tokio::test]
    async fn test_accepts_by_default_and_records() {
        let gw = SimulatedGateway::new();
        assert!(gw.submit(id(), Direction::Up, dec!(10)).await.is_accepted());
        assert_eq!(gw.submissions().len(), 1);
        assert_eq!(gw.accepted_amount(id(), Direction::Up), dec!(10));
        assert_eq!(gw.accepted_amount(id(), Direction::Down), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_capacity_keeps_newest() {
        let gw = SimulatedGateway::new().with_capacity(2);
        for amount in [dec!(1), dec!(2), dec!(3)] {
            gw.submit(id(), Direction::Up, amount).await;
        }
        let amounts: Vec<Decimal> = gw.submissions().iter().map(|s| s.amount).collect();
        assert_eq!(amounts, vec![dec!(2), dec!(3)]);
        assert_eq!(SimulatedGateway::dry_run().capacity, Some(DRY_RUN_HISTORY));
    }

    #[tokio::test]
    async fn test_script_consumed_in_order() {
        let gw = SimulatedGateway::new().with_script(
            Direction::Down,
            vec![
                AttemptOutcome::Rejected { reason: "busy".into() },
                AttemptOutcome::TimedOut,
            ],
        );
        assert!(matches!(
            gw.submit(id(), Direction::Down, dec!(1)).await,
            AttemptOutcome::Rejected { .. }
        ));
        assert!(gw.submit(id(), Direction::Up, dec!(1)).await.is_accepted());
        assert_eq!(gw.submit(id(), Direction::Down, dec!(1)).await, AttemptOutcome::TimedOut);
        assert!(gw.submit(id(), Direction::Down, dec!(1)).await.is_accepted());
    }
}
