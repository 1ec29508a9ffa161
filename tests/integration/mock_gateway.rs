//! Deterministic fixtures for integration testing.
//!
//! Provides a scripted `SubmissionGateway` that records every call with the
//! logical time it arrived, a trainer that fails a set number of times, and
//! a synthetic price history. Everything is in-memory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use predictoor::clock::{Clock, SimClock};
use predictoor::config::{AppConfig, EngineConfig};
use predictoor::feeds::replay::ReplayFeed;
use predictoor::gateway::SubmissionGateway;
use predictoor::model::Trainer;
use predictoor::types::*;

pub const PAIR: &str = "BTC/USDT";

pub const CONFIG: &str = r#"
    [agent]
    name = "PREDICTOOR-TEST"
    mode = "sweep"

    [epoch]
    timeframe = "5m"
    submission_lead_secs = 30
    predict_window_secs = 90
    retry_interval_secs = 20

    [stake]
    budget = 3000
    floor = 10

    [stake.skew]
    kind = "linear"
    gain = 1.0

    [trainer]
    approach = "LinearLogistic"
    autoregressive_n = 2
    max_n_train = 200
    window_len = 60
    weight_recent = "10x_5x"
    max_iter = 200

    [payout]
    others_stake = 10000
    others_accuracy = 0.5
    revenue = 50

    [sim]
    asset_pair = "BTC/USDT"
    history_csv = "unused.csv"
    output_dir = "out"

    [sweep]
    budgets = [1000, 3000]
    skew_params = [0.5, 1.0, 2.0]
    lead_secs = [20, 40]
    output_csv = "out/sweep.csv"
"#;

pub fn app_config() -> AppConfig {
    AppConfig::parse(CONFIG).unwrap()
}

pub fn engine_config() -> EngineConfig {
    app_config().engine()
}

/// Epoch boundary used as the start of every synthetic history.
pub fn history_start() -> DateTime<Utc> {
    Utc.timestamp_opt(1_699_999_800, 0).unwrap()
}

/// One price a minute, a deterministic pseudo-random walk.
pub fn synthetic_feed(minutes: i64) -> Arc<ReplayFeed> {
    let mut state: u64 = 0x2545_f491_4f6c_dd1d;
    let mut price = 30_000.0;
    let obs = (0..minutes)
        .map(|i| {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            let step = ((state >> 33) % 201) as f64 - 100.0;
            price += step;
            Observation {
                timestamp: history_start() + Duration::minutes(i),
                price,
            }
        })
        .collect();
    Arc::new(ReplayFeed::new(PAIR, obs))
}

// ---------------------------------------------------------------------------
// Scripted gateway
// ---------------------------------------------------------------------------

/// One call received by the scripted gateway.
#[derive(Debug, Clone)]
pub struct Call {
    pub epoch_id: EpochId,
    pub direction: Direction,
    pub amount: Decimal,
    pub at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

/// Accepts everything except submissions for epochs listed as rejected.
pub struct ScriptedGateway {
    clock: SimClock,
    rejected_epochs: HashSet<i64>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl ScriptedGateway {
    pub fn new(clock: SimClock) -> Self {
        Self {
            clock,
            rejected_epochs: HashSet::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn rejecting(mut self, epoch_index: i64) -> Self {
        self.rejected_epochs.insert(epoch_index);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SubmissionGateway for ScriptedGateway {
    async fn submit(
        &self,
        epoch_id: EpochId,
        direction: Direction,
        amount: Decimal,
    ) -> AttemptOutcome {
        let outcome = if self.rejected_epochs.contains(&epoch_id.index) {
            AttemptOutcome::Rejected {
                reason: "venue closed".into(),
            }
        } else {
            AttemptOutcome::Accepted
        };
        self.calls.lock().unwrap().push(Call {
            epoch_id,
            direction,
            amount,
            at: self.clock.now(),
            outcome: outcome.clone(),
        });
        outcome
    }
}

// ---------------------------------------------------------------------------
// Flaky trainer
// ---------------------------------------------------------------------------

/// Fails with `ModelUnavailable` for the first `failures` calls, then
/// always returns `prob_up`.
pub struct FlakyTrainer {
    failures: usize,
    calls: AtomicUsize,
    prob_up: f64,
}

impl FlakyTrainer {
    pub fn new(failures: usize, prob_up: f64) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            prob_up,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Trainer for FlakyTrainer {
    fn fit_and_predict(&self, _window: &FeedWindow) -> Result<f64, EngineError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
            Err(EngineError::ModelUnavailable("warming up".into()))
        } else {
            Ok(self.prob_up)
        }
    }

    fn name(&self) -> &str {
        "flaky"
    }
}
