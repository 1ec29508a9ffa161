//! Parameter sweeps.
//!
//! Expands the configured axes into their cartesian product and runs one
//! independent simulation per combination. Each run builds its own engine,
//! clock, gateway, and metrics from a cloned config; only the read-only
//! history is shared.

use futures::future::try_join_all;
use rust_decimal::Decimal;
use std::fmt;
use std::sync::Arc;
use tracing::info;

use super::run_simulation;
use crate::config::{EngineConfig, SweepConfig};
use crate::engine::RunSummary;
use crate::feeds::replay::ReplayFeed;
use crate::types::EngineError;

/// One overridden configuration value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Budget(Decimal),
    SkewParam(f64),
    AutoregressiveN(usize),
    LeadSecs(i64),
}

impl ParamValue {
    /// Column name in the sweep table.
    pub fn name(&self) -> &'static str {
        match self {
            ParamValue::Budget(_) => "budget",
            ParamValue::SkewParam(_) => "skew_param",
            ParamValue::AutoregressiveN(_) => "autoregressive_n",
            ParamValue::LeadSecs(_) => "submission_lead_secs",
        }
    }

    pub fn apply(&self, config: &mut EngineConfig) {
        match *self {
            ParamValue::Budget(b) => config.stake.budget = b,
            ParamValue::SkewParam(v) => config.stake.skew = config.stake.skew.with_param(v),
            ParamValue::AutoregressiveN(n) => config.trainer.autoregressive_n = n,
            ParamValue::LeadSecs(s) => config.epoch.submission_lead_secs = s,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Budget(b) => write!(f, "{b}"),
            ParamValue::SkewParam(v) => write!(f, "{v}"),
            ParamValue::AutoregressiveN(n) => write!(f, "{n}"),
            ParamValue::LeadSecs(s) => write!(f, "{s}"),
        }
    }
}

/// One combination's result: final metrics plus the values that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub overrides: Vec<ParamValue>,
    pub summary: RunSummary,
}

pub struct SweepHarness {
    base: EngineConfig,
    axes: Vec<Vec<ParamValue>>,
}

impl SweepHarness {
    pub fn new(base: EngineConfig, sweep: &SweepConfig) -> Self {
        let axes: Vec<Vec<ParamValue>> = vec![
            sweep.budgets.iter().map(|b| ParamValue::Budget(*b)).collect(),
            sweep.skew_params.iter().map(|v| ParamValue::SkewParam(*v)).collect(),
            sweep
                .autoregressive_ns
                .iter()
                .map(|n| ParamValue::AutoregressiveN(*n))
                .collect(),
            sweep.lead_secs.iter().map(|s| ParamValue::LeadSecs(*s)).collect(),
        ];
        Self {
            base,
            axes: axes.into_iter().filter(|a| !a.is_empty()).collect(),
        }
    }

    /// Cartesian product of the non-empty axes, first axis varying slowest.
    pub fn combinations(&self) -> Vec<Vec<ParamValue>> {
        self.axes.iter().fold(vec![Vec::new()], |acc, axis| {
            acc.iter()
                .flat_map(|prefix| {
                    axis.iter().map(move |value| {
                        let mut combo = prefix.clone();
                        combo.push(*value);
                        combo
                    })
                })
                .collect()
        })
    }

    fn config_for(&self, overrides: &[ParamValue]) -> EngineConfig {
        let mut config = self.base.clone();
        for value in overrides {
            value.apply(&mut config);
        }
        config
    }

    /// Validate every combination up front, then run them all.
    pub async fn run(&self, feed: Arc<ReplayFeed>) -> Result<Vec<SummaryRecord>, EngineError> {
        let combos = self.combinations();
        for combo in &combos {
            self.config_for(combo).validate()?;
        }
        info!(combinations = combos.len(), "Sweep started");

        let runs = combos.into_iter().map(|overrides| {
            let config = self.config_for(&overrides);
            let feed = Arc::clone(&feed);
            async move {
                let report = run_simulation(&config, feed).await?;
                info!(
                    overrides = %describe(&overrides),
                    accuracy = format!("{:.2}%", report.summary.metrics.accuracy_estimate * 100.0),
                    "Sweep combination finished"
                );
                Ok::<_, EngineError>(SummaryRecord {
                    overrides,
                    summary: report.summary,
                })
            }
        });
        try_join_all(runs).await
    }
}

fn describe(overrides: &[ParamValue]) -> String {
    overrides
        .iter()
        .map(|v| format!("{}={v}", v.name()))
        .collect::<Vec<_>>()
        .join(" ")
}
