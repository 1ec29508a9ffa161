//! End-to-end simulation scenarios.
//!
//! Replays synthetic history through the full engine (feed → trainer →
//! predictor → allocator → scheduler → gateway → scorer) under a
//! simulated clock.

use chrono::Duration;
use std::collections::HashSet;
use std::sync::Arc;

use predictoor::backtest::run_simulation;
use predictoor::backtest::sweep::SweepHarness;
use predictoor::clock::{Clock, EpochClock, SimClock};
use predictoor::engine::Engine;
use predictoor::model::{build_trainer, ConstantTrainer};
use predictoor::storage;
use predictoor::types::*;

use crate::mock_gateway::*;

fn sim_clock_after_warmup(window_len: usize) -> SimClock {
    SimClock::new(history_start() + Duration::minutes(window_len as i64))
}

#[tokio::test]
async fn test_simulation_is_deterministic() {
    let cfg = engine_config();
    let a = run_simulation(&cfg, synthetic_feed(400)).await.unwrap();
    let b = run_simulation(&cfg, synthetic_feed(400)).await.unwrap();

    assert!(a.summary.epochs >= 60);
    assert_eq!(a.summary.metrics, b.summary.metrics);
    assert_eq!(a.records, b.records);
}

#[tokio::test]
async fn test_sweep_produces_one_record_per_combination() {
    let app = app_config();
    let sweep = app.sweep.clone().unwrap();
    let harness = SweepHarness::new(app.engine(), &sweep);

    let records = harness.run(synthetic_feed(240)).await.unwrap();
    assert_eq!(records.len(), 12);

    let distinct: HashSet<String> = records
        .iter()
        .map(|r| format!("{:?}", r.overrides))
        .collect();
    assert_eq!(distinct.len(), 12);

    // Each run owns its metrics: identical histories give identical epoch
    // counts, and nothing accumulates across combinations.
    let epochs = records[0].summary.epochs;
    for r in &records {
        assert_eq!(r.overrides.len(), 3);
        assert_eq!(r.summary.metrics.total + r.summary.metrics.missed, epochs as u64);
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sweep.csv");
    storage::write_sweep_csv(&records, &path).unwrap();
    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 13);
    assert!(text.starts_with(
        "accuracy_estimate,accuracy_lower,accuracy_upper,f1,precision,recall,total,missed,profit,budget,skew_param,submission_lead_secs"
    ));
}

#[tokio::test]
async fn test_model_unavailable_twice_then_accepted() {
    let cfg = engine_config();
    let feed = synthetic_feed(200);
    let sim = sim_clock_after_warmup(cfg.trainer.window_len);
    let gateway = Arc::new(ScriptedGateway::new(sim.clone()));
    let trainer = Arc::new(FlakyTrainer::new(2, 0.65));

    // Start the epoch clean at its start so all three cycles fit.
    let epoch_clock = EpochClock::new(
        cfg.epoch.timeframe,
        Duration::seconds(cfg.epoch.submission_lead_secs),
        Arc::new(sim.clone()),
    )
    .unwrap();
    sim.advance_to(epoch_clock.next_epoch().start_time);

    let mut engine = Engine::new(
        PAIR,
        cfg,
        Arc::new(sim.clone()),
        feed,
        trainer.clone(),
        gateway.clone(),
    )
    .unwrap();
    let report = engine.step().await;

    assert_eq!(report.status, EpochStatus::Accepted);
    assert_eq!(report.cycles, 3);
    assert_eq!(trainer.calls(), 3);
    assert_eq!(gateway.calls().len(), 2);
    assert!(gateway.calls().iter().all(|c| c.at < report.epoch.deadline_time));
}

#[tokio::test]
async fn test_missed_epoch_counts_as_miss() {
    let cfg = engine_config();
    let feed = synthetic_feed(200);
    let until = feed.span().unwrap().1;
    let sim = sim_clock_after_warmup(cfg.trainer.window_len);
    let first = EpochClock::new(
        cfg.epoch.timeframe,
        Duration::seconds(cfg.epoch.submission_lead_secs),
        Arc::new(sim.clone()),
    )
    .unwrap()
    .epoch_of_interest();
    let rejected = first.id.index + 2;

    let gateway = Arc::new(ScriptedGateway::new(sim.clone()).rejecting(rejected));
    let mut engine = Engine::new(
        PAIR,
        cfg,
        Arc::new(sim.clone()),
        feed,
        Arc::new(ConstantTrainer::new(0.6)),
        gateway.clone(),
    )
    .unwrap();
    let summary = engine.run(until).await.unwrap();

    assert_eq!(summary.missed, 1);
    assert_eq!(summary.accepted, summary.epochs - 1);
    let missed = engine
        .records()
        .iter()
        .find(|r| r.epoch_index == rejected)
        .unwrap();
    assert_eq!(missed.status, EpochStatus::Missed);
    assert_eq!(missed.correct, None);

    // The missed epoch was retried up to its deadline and never after.
    let late: Vec<_> = gateway
        .calls()
        .into_iter()
        .filter(|c| c.epoch_id.index == rejected)
        .collect();
    assert!(late.len() > 2);
    let deadline = engine_clock_deadline(&first, rejected);
    assert!(late.iter().all(|c| c.at < deadline));
}

fn engine_clock_deadline(first: &Epoch, index: i64) -> chrono::DateTime<chrono::Utc> {
    first.deadline_time + Duration::minutes(5 * (index - first.id.index))
}

#[tokio::test]
async fn test_at_most_one_acceptance_per_direction() {
    let cfg = engine_config();
    let feed = synthetic_feed(300);
    let until = feed.span().unwrap().1;
    let sim = sim_clock_after_warmup(cfg.trainer.window_len);
    let gateway = Arc::new(ScriptedGateway::new(sim.clone()));
    let mut engine = Engine::new(
        PAIR,
        cfg.clone(),
        Arc::new(sim.clone()),
        feed,
        build_trainer(&cfg.trainer),
        gateway.clone(),
    )
    .unwrap();
    engine.run(until).await.unwrap();

    let calls = gateway.calls();
    assert!(!calls.is_empty());
    let mut accepted: HashSet<(i64, Direction)> = HashSet::new();
    for call in &calls {
        // Nothing is sent for a pair once it has been accepted.
        assert!(
            !accepted.contains(&(call.epoch_id.index, call.direction)),
            "resubmitted {} {}",
            call.epoch_id,
            call.direction
        );
        if call.outcome.is_accepted() {
            accepted.insert((call.epoch_id.index, call.direction));
        }
    }

    // Budget holds for every epoch.
    for record in engine.records() {
        assert!(record.stake_up + record.stake_down <= cfg.stake.budget);
    }
    assert!(sim.now() <= until);
}
