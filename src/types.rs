//! Shared types for the PREDICTOOR engine.
//!
//! These types form the data model used across all modules: epochs and
//! their identifiers, price observations, confidence pairs, stakes, and
//! the record of every submission attempt. They carry no behaviour beyond
//! simple derived quantities so that every other module can depend on them.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Direction & timeframe
// ---------------------------------------------------------------------------

/// Predicted or realized price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Both directions, in submission order.
    pub const BOTH: [Direction; 2] = [Direction::Up, Direction::Down];

    /// The opposite direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
        }
    }

    /// Direction of a realized price move. A flat move counts as down.
    pub fn from_delta(delta: f64) -> Self {
        if delta > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Epoch cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "1h")]
    H1,
}

impl Timeframe {
    /// Length of one epoch.
    pub fn duration(&self) -> Duration {
        Duration::seconds(self.secs())
    }

    pub fn secs(&self) -> i64 {
        match self {
            Timeframe::M5 => 300,
            Timeframe::H1 => 3600,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeframe::M5 => write!(f, "5m"),
            Timeframe::H1 => write!(f, "1h"),
        }
    }
}

impl std::str::FromStr for Timeframe {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "5m" => Ok(Timeframe::M5),
            "1h" | "60m" => Ok(Timeframe::H1),
            _ => Err(EngineError::InvalidConfiguration(format!(
                "unknown timeframe: {s}"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Epoch
// ---------------------------------------------------------------------------

/// Identifies one epoch: the n-th slot of a timeframe since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EpochId {
    pub timeframe: Timeframe,
    pub index: i64,
}

impl fmt::Display for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.timeframe, self.index)
    }
}

/// A fixed-duration slot in which one decision is made and later scored.
///
/// Always `start_time < deadline_time <= end_time`. Epochs are computed by
/// the [`EpochClock`](crate::clock::EpochClock) and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    pub id: EpochId,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub deadline_time: DateTime<Utc>,
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{} .. {}) deadline {}",
            self.id,
            self.start_time.format("%Y-%m-%d %H:%M:%S"),
            self.end_time.format("%H:%M:%S"),
            self.deadline_time.format("%H:%M:%S"),
        )
    }
}

impl Epoch {
    /// Whether `t` falls inside `[start_time, end_time)`.
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        t >= self.start_time && t < self.end_time
    }

    /// Whether submissions may still begin at `now`.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.deadline_time
    }

    /// Time left before the deadline (negative once it has passed).
    pub fn time_to_deadline(&self, now: DateTime<Utc>) -> Duration {
        self.deadline_time - now
    }
}

// ---------------------------------------------------------------------------
// Feed data
// ---------------------------------------------------------------------------

/// One historical price observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
}

/// Trailing, strictly time-ordered window of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedWindow {
    observations: Vec<Observation>,
}

impl FeedWindow {
    /// Build a window, rejecting out-of-order or duplicate timestamps.
    pub fn new(observations: Vec<Observation>) -> Result<Self, EngineError> {
        if let Some(pair) = observations
            .windows(2)
            .find(|w| w[1].timestamp <= w[0].timestamp)
        {
            return Err(EngineError::Feed(format!(
                "observations out of order at {}",
                pair[1].timestamp
            )));
        }
        Ok(Self { observations })
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn prices(&self) -> Vec<f64> {
        self.observations.iter().map(|o| o.price).collect()
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn last(&self) -> Option<&Observation> {
        self.observations.last()
    }
}

// ---------------------------------------------------------------------------
// Prediction & stakes
// ---------------------------------------------------------------------------

/// Symmetric two-sided confidence. Only `up` is stored; `down` is always
/// `1 - up`, so `up + down == 1` holds exactly.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidencePair {
    up: f64,
}

impl ConfidencePair {
    /// Returns `None` unless `up` is a finite probability in `[0, 1]`.
    pub fn from_up(up: f64) -> Option<Self> {
        if up.is_finite() && (0.0..=1.0).contains(&up) {
            Some(Self { up })
        } else {
            None
        }
    }

    pub fn up(&self) -> f64 {
        self.up
    }

    pub fn down(&self) -> f64 {
        1.0 - self.up
    }

    pub fn of(&self, direction: Direction) -> f64 {
        match direction {
            Direction::Up => self.up(),
            Direction::Down => self.down(),
        }
    }

    /// The side with the greater confidence (`Up` on an exact tie).
    pub fn favoured(&self) -> Direction {
        if self.up >= 0.5 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    /// Distance from a coin flip, in `[0, 0.5]`.
    pub fn skew(&self) -> f64 {
        (self.up - 0.5).abs()
    }
}

impl fmt::Display for ConfidencePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "up={:.1}% down={:.1}%", self.up() * 100.0, self.down() * 100.0)
    }
}

/// Stake committed to one direction for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakeDecision {
    pub direction: Direction,
    pub amount: Decimal,
}

/// The pair of stake decisions for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StakePair {
    pub up: Decimal,
    pub down: Decimal,
}

impl StakePair {
    pub fn amount(&self, direction: Direction) -> Decimal {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
        }
    }

    pub fn total(&self) -> Decimal {
        self.up + self.down
    }

    pub fn decisions(&self) -> [StakeDecision; 2] {
        [
            StakeDecision { direction: Direction::Up, amount: self.up },
            StakeDecision { direction: Direction::Down, amount: self.down },
        ]
    }
}

impl fmt::Display for StakePair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "up={:.2} down={:.2}", self.up, self.down)
    }
}

// ---------------------------------------------------------------------------
// Submission attempts
// ---------------------------------------------------------------------------

/// What the Submission Gateway reported for one submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted,
    Rejected { reason: String },
    TimedOut,
}

impl AttemptOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, AttemptOutcome::Accepted)
    }

    /// Map a failed outcome onto the recoverable gateway errors.
    pub fn into_result(self) -> Result<(), EngineError> {
        match self {
            AttemptOutcome::Accepted => Ok(()),
            AttemptOutcome::Rejected { reason } => Err(EngineError::GatewayRejected(reason)),
            AttemptOutcome::TimedOut => Err(EngineError::GatewayTimedOut),
        }
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Accepted => write!(f, "accepted"),
            AttemptOutcome::Rejected { reason } => write!(f, "rejected ({reason})"),
            AttemptOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// One call to the Submission Gateway for one direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionAttempt {
    pub epoch_id: EpochId,
    pub direction: Direction,
    pub amount: Decimal,
    /// Probability of up that produced this stake.
    pub prob_up: f64,
    /// Predicting→Submitting cycle this attempt belongs to (1-based).
    pub attempt_number: u32,
    pub timestamp: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    /// Set when the gateway answered after the deadline; the result is ignored.
    pub discarded: bool,
}

impl SubmissionAttempt {
    /// Whether this attempt is the authoritative acceptance for its direction.
    pub fn is_authoritative(&self) -> bool {
        self.outcome.is_accepted() && !self.discarded
    }
}

/// Per-epoch scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpochStatus {
    AwaitingWindow,
    Predicting,
    Submitting,
    Accepted,
    Missed,
}

impl EpochStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpochStatus::Accepted | EpochStatus::Missed)
    }
}

impl fmt::Display for EpochStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EpochStatus::AwaitingWindow => "awaiting_window",
            EpochStatus::Predicting => "predicting",
            EpochStatus::Submitting => "submitting",
            EpochStatus::Accepted => "accepted",
            EpochStatus::Missed => "missed",
        };
        write!(f, "{s}")
    }
}

/// Realized result of an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub epoch_id: EpochId,
    pub realized_direction: Direction,
    pub realized_price_delta: f64,
}

impl Outcome {
    /// Outcome from the prices observed at the epoch's start and end.
    pub fn from_prices(epoch_id: EpochId, start_price: f64, end_price: f64) -> Self {
        let delta = end_price - start_price;
        Self {
            epoch_id,
            realized_direction: Direction::from_delta(delta),
            realized_price_delta: delta,
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain errors for the engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Insufficient history: need {needed} observations, have {available}")]
    InsufficientHistory { needed: usize, available: usize },

    #[error("Gateway rejected submission: {0}")]
    GatewayRejected(String),

    #[error("Gateway timed out")]
    GatewayTimedOut,

    #[error("Deadline exceeded for epoch {0}")]
    DeadlineExceeded(EpochId),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Epoch {0} already scored")]
    AlreadyScored(EpochId),

    #[error("Scoring error: {0}")]
    Scoring(String),

    #[error("Feed error: {0}")]
    Feed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether the scheduler may retry within the same epoch.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EngineError::ModelUnavailable(_)
                | EngineError::InsufficientHistory { .. }
                | EngineError::GatewayRejected(_)
                | EngineError::GatewayTimedOut
                | EngineError::Feed(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_confidence_pair_sums_to_one() {
        for i in 0..=1000 {
            let p = i as f64 / 1000.0;
            let pair = ConfidencePair::from_up(p).unwrap();
            assert_eq!(pair.up() + pair.down(), 1.0, "p={p}");
        }
        for p in [1e-17, 0.1, 0.3, 1.0 / 3.0, 0.7, 0.999_999_9] {
            let pair = ConfidencePair::from_up(p).unwrap();
            assert_eq!(pair.up() + pair.down(), 1.0, "p={p}");
        }
    }

    #[test]
    fn test_confidence_pair_rejects_invalid() {
        assert!(ConfidencePair::from_up(-0.01).is_none());
        assert!(ConfidencePair::from_up(1.01).is_none());
        assert!(ConfidencePair::from_up(f64::NAN).is_none());
        assert!(ConfidencePair::from_up(f64::INFINITY).is_none());
    }

    #[test]
    fn test_confidence_favoured_and_skew() {
        let pair = ConfidencePair::from_up(0.3).unwrap();
        assert_eq!(pair.favoured(), Direction::Down);
        assert!((pair.skew() - 0.2).abs() < 1e-12);
        assert_eq!(ConfidencePair::from_up(0.5).unwrap().favoured(), Direction::Up);
    }

    #[test]
    fn test_direction_from_delta() {
        assert_eq!(Direction::from_delta(0.5), Direction::Up);
        assert_eq!(Direction::from_delta(-0.5), Direction::Down);
        assert_eq!(Direction::from_delta(0.0), Direction::Down);
        assert_eq!(Direction::Up.opposite(), Direction::Down);
    }

    #[test]
    fn test_timeframe_parse_and_duration() {
        assert_eq!("5m".parse::<Timeframe>().unwrap(), Timeframe::M5);
        assert_eq!("1H".parse::<Timeframe>().unwrap(), Timeframe::H1);
        assert!("7m".parse::<Timeframe>().is_err());
        assert_eq!(Timeframe::M5.duration(), Duration::minutes(5));
    }

    #[test]
    fn test_feed_window_rejects_unordered() {
        let obs = vec![
            Observation { timestamp: ts(120), price: 1.0 },
            Observation { timestamp: ts(60), price: 2.0 },
        ];
        assert!(matches!(FeedWindow::new(obs), Err(EngineError::Feed(_))));
    }

    #[test]
    fn test_outcome_from_prices() {
        let id = EpochId { timeframe: Timeframe::M5, index: 7 };
        let up = Outcome::from_prices(id, 100.0, 101.5);
        assert_eq!(up.realized_direction, Direction::Up);
        assert!((up.realized_price_delta - 1.5).abs() < 1e-12);
        let flat = Outcome::from_prices(id, 100.0, 100.0);
        assert_eq!(flat.realized_direction, Direction::Down);
    }

    #[test]
    fn test_error_recoverability() {
        assert!(EngineError::ModelUnavailable("x".into()).is_recoverable());
        assert!(EngineError::GatewayTimedOut.is_recoverable());
        assert!(!EngineError::InvalidConfiguration("x".into()).is_recoverable());
        let id = EpochId { timeframe: Timeframe::H1, index: 1 };
        assert!(!EngineError::DeadlineExceeded(id).is_recoverable());
    }

    #[test]
    fn test_attempt_outcome_into_result() {
        assert!(matches!(
            AttemptOutcome::TimedOut.into_result(),
            Err(EngineError::GatewayTimedOut)
        ));
        assert!(AttemptOutcome::Accepted.into_result().is_ok());
    }
}
