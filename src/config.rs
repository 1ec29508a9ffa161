//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (API keys) are referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.
//!
//! Nothing here is global: [`EngineConfig`] is cloned into every engine
//! instance, so concurrent runs never share mutable configuration.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

use crate::feeds::bybit::MAX_WINDOW_LEN;
use crate::types::{EngineError, Timeframe};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    pub epoch: EpochConfig,
    pub stake: StakeConfig,
    pub trainer: TrainerConfig,
    #[serde(default)]
    pub payout: PayoutConfig,
    pub sim: Option<SimConfig>,
    pub live: Option<LiveConfig>,
    pub sweep: Option<SweepConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub mode: RunMode,
}

/// Which driver the binary runs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Sim,
    Live,
    Sweep,
}

// ---------------------------------------------------------------------------
// Engine sections
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct EpochConfig {
    pub timeframe: Timeframe,
    /// Safety margin between the deadline and the end of the epoch.
    pub submission_lead_secs: i64,
    /// Attempts for an epoch begin this long before its end.
    #[serde(default = "default_predict_window_secs")]
    pub predict_window_secs: i64,
    /// Minimum interval between two Predicting→Submitting cycles.
    pub retry_interval_secs: i64,
    #[serde(default = "default_gateway_timeout_secs")]
    pub gateway_timeout_secs: u64,
    /// Wait after `end_time` before the realized price is read.
    #[serde(default)]
    pub resolution_delay_secs: i64,
}

fn default_predict_window_secs() -> i64 {
    120
}

fn default_gateway_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Deserialize, Clone)]
pub struct StakeConfig {
    /// Total stake per epoch across both directions.
    pub budget: Decimal,
    /// Minimum stake each side always receives.
    #[serde(default)]
    pub floor: Decimal,
    /// Fraction of the budget withheld every epoch.
    #[serde(default)]
    pub reserve_fraction: Decimal,
    #[serde(default)]
    pub skew: SkewCurve,
}

/// Mapping from confidence skew to stake skew.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkewCurve {
    /// Favoured weight `0.5 + gain * skew`, capped at 1. `gain = 1` stakes
    /// proportionally to confidence.
    Linear { gain: f64 },
    /// Favoured weight `0.5 + 0.5 * tanh(k * skew) / tanh(k / 2)`.
    Saturating { steepness: f64 },
}

impl Default for SkewCurve {
    fn default() -> Self {
        SkewCurve::Linear { gain: 1.0 }
    }
}

impl SkewCurve {
    /// Budget share of the favoured side for a confidence skew in `[0, 0.5]`.
    /// Always in `[0.5, 1]` and non-decreasing in `skew`.
    pub fn favoured_weight(&self, skew: f64) -> f64 {
        let skew = skew.clamp(0.0, 0.5);
        let extra = match *self {
            SkewCurve::Linear { gain } => (gain * skew).min(0.5),
            SkewCurve::Saturating { steepness } => {
                0.5 * (steepness * skew).tanh() / (steepness * 0.5).tanh()
            }
        };
        0.5 + extra.clamp(0.0, 0.5)
    }

    /// The curve's single tuning parameter.
    pub fn param(&self) -> f64 {
        match *self {
            SkewCurve::Linear { gain } => gain,
            SkewCurve::Saturating { steepness } => steepness,
        }
    }

    /// Same curve shape with a different tuning parameter.
    pub fn with_param(&self, value: f64) -> Self {
        match self {
            SkewCurve::Linear { .. } => SkewCurve::Linear { gain: value },
            SkewCurve::Saturating { .. } => SkewCurve::Saturating { steepness: value },
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct TrainerConfig {
    pub approach: Approach,
    /// Model inputs are the last `autoregressive_n` relative price changes.
    pub autoregressive_n: usize,
    /// Cap on training samples (newest kept).
    pub max_n_train: usize,
    /// Observations requested from the feed per attempt.
    pub window_len: usize,
    #[serde(default)]
    pub weight_recent: WeightRecent,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Output of the `Constant` approach.
    #[serde(default = "default_constant_probability")]
    pub constant_probability: f64,
    /// Probability used when fitting fails; `None` skips the attempt instead.
    #[serde(default)]
    pub fallback_probability: Option<f64>,
}

fn default_learning_rate() -> f64 {
    0.1
}

fn default_max_iter() -> usize {
    500
}

fn default_constant_probability() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum Approach {
    Constant,
    LinearLogistic,
    #[serde(rename = "LinearLogistic_Balanced")]
    LinearLogisticBalanced,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
pub enum WeightRecent {
    /// Newest 10% of samples weigh 10x, the next 10% weigh 5x.
    #[serde(rename = "10x_5x")]
    TenXFiveX,
    #[default]
    #[serde(rename = "none", alias = "None")]
    Uniform,
}

/// Stake-pool venue model used to settle accepted stakes.
#[derive(Debug, Deserialize, Clone)]
pub struct PayoutConfig {
    /// Stake placed by everyone else each epoch.
    #[serde(default)]
    pub others_stake: Decimal,
    /// Fraction of `others_stake` that lands on the correct side.
    #[serde(default = "default_others_accuracy")]
    pub others_accuracy: f64,
    /// Reward added to the pool each epoch.
    #[serde(default)]
    pub revenue: Decimal,
}

fn default_others_accuracy() -> f64 {
    0.5
}

impl Default for PayoutConfig {
    fn default() -> Self {
        Self {
            others_stake: Decimal::ZERO,
            others_accuracy: default_others_accuracy(),
            revenue: Decimal::ZERO,
        }
    }
}

// ---------------------------------------------------------------------------
// Driver sections
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct SimConfig {
    pub asset_pair: String,
    /// CSV with `timestamp_ms,price` rows.
    pub history_csv: PathBuf,
    pub output_dir: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LiveConfig {
    /// Asset pairs to track, e.g. `BTC/USDT`. One engine runs per pair.
    pub pairs: Vec<String>,
    #[serde(default = "default_feed_base_url")]
    pub feed_base_url: String,
    /// Kline interval in minutes.
    #[serde(default = "default_feed_interval_minutes")]
    pub feed_interval_minutes: u32,
    pub gateway_url: String,
    pub api_key_env: Option<String>,
    /// Log decisions and accept them in-memory instead of submitting.
    #[serde(default)]
    pub dry_run: bool,
}

fn default_feed_base_url() -> String {
    "https://api.bybit.com".to_string()
}

fn default_feed_interval_minutes() -> u32 {
    1
}

/// Values swept by the sweep harness. Empty axes are not overridden.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct SweepConfig {
    #[serde(default)]
    pub budgets: Vec<Decimal>,
    #[serde(default)]
    pub skew_params: Vec<f64>,
    #[serde(default)]
    pub autoregressive_ns: Vec<usize>,
    #[serde(default)]
    pub lead_secs: Vec<i64>,
    pub output_csv: PathBuf,
}

// ---------------------------------------------------------------------------
// Per-engine configuration
// ---------------------------------------------------------------------------

/// Everything one engine instance needs, owned by that instance.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub epoch: EpochConfig,
    pub stake: StakeConfig,
    pub trainer: TrainerConfig,
    pub payout: PayoutConfig,
}

impl EngineConfig {
    /// Reject settings that would make any epoch ill-defined.
    pub fn validate(&self) -> Result<(), EngineError> {
        let invalid = |msg: String| Err(EngineError::InvalidConfiguration(msg));
        let epoch = &self.epoch;
        let tf_secs = epoch.timeframe.secs();

        if epoch.submission_lead_secs < 0 || epoch.submission_lead_secs >= tf_secs {
            return invalid(format!(
                "submission lead {}s must be in [0, {tf_secs}s)",
                epoch.submission_lead_secs
            ));
        }
        if epoch.predict_window_secs <= epoch.submission_lead_secs {
            return invalid(format!(
                "predict window {}s must exceed submission lead {}s",
                epoch.predict_window_secs, epoch.submission_lead_secs
            ));
        }
        if epoch.retry_interval_secs <= 0 {
            return invalid("retry interval must be positive".into());
        }
        if epoch.gateway_timeout_secs == 0 {
            return invalid("gateway timeout must be positive".into());
        }
        if epoch.resolution_delay_secs < 0 {
            return invalid("resolution delay must not be negative".into());
        }

        let stake = &self.stake;
        if stake.budget <= Decimal::ZERO {
            return invalid(format!("budget must be positive, got {}", stake.budget));
        }
        if stake.floor < Decimal::ZERO {
            return invalid(format!("stake floor must not be negative, got {}", stake.floor));
        }
        if stake.reserve_fraction < Decimal::ZERO || stake.reserve_fraction >= Decimal::ONE {
            return invalid(format!(
                "reserve fraction {} must be in [0, 1)",
                stake.reserve_fraction
            ));
        }
        let spendable = stake.budget * (Decimal::ONE - stake.reserve_fraction);
        if stake.floor * dec!(2) > spendable {
            return invalid(format!(
                "two floors of {} exceed spendable budget {spendable}",
                stake.floor
            ));
        }
        let param = stake.skew.param();
        if !param.is_finite() {
            return invalid("skew parameter must be finite".into());
        }
        match stake.skew {
            SkewCurve::Linear { gain } if gain < 0.0 => {
                return invalid(format!("linear skew gain must not be negative, got {gain}"))
            }
            SkewCurve::Saturating { steepness } if steepness <= 0.0 => {
                return invalid(format!("saturating steepness must be positive, got {steepness}"))
            }
            _ => {}
        }

        let trainer = &self.trainer;
        if trainer.autoregressive_n == 0 {
            return invalid("autoregressive_n must be positive".into());
        }
        if trainer.max_n_train == 0 {
            return invalid("max_n_train must be positive".into());
        }
        if trainer.window_len < trainer.autoregressive_n + 2 {
            return invalid(format!(
                "window_len {} too short for autoregressive_n {}",
                trainer.window_len, trainer.autoregressive_n
            ));
        }
        if !(0.0..=1.0).contains(&trainer.constant_probability) {
            return invalid("constant probability must be in [0, 1]".into());
        }
        if let Some(p) = trainer.fallback_probability {
            if !(0.0..=1.0).contains(&p) {
                return invalid(format!("fallback probability {p} must be in [0, 1]"));
            }
        }
        if trainer.learning_rate <= 0.0 || trainer.max_iter == 0 {
            return invalid("learning rate and max_iter must be positive".into());
        }

        let payout = &self.payout;
        if payout.others_stake < Decimal::ZERO || payout.revenue < Decimal::ZERO {
            return invalid("payout stakes must not be negative".into());
        }
        if !(0.0..=1.0).contains(&payout.others_accuracy) {
            return invalid("others accuracy must be in [0, 1]".into());
        }

        Ok(())
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// The per-engine slice of this configuration.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            epoch: self.epoch.clone(),
            stake: self.stake.clone(),
            trainer: self.trainer.clone(),
            payout: self.payout.clone(),
        }
    }

    /// Validate everything the selected mode needs before any epoch begins.
    pub fn validate(&self) -> Result<(), EngineError> {
        self.engine().validate()?;
        let missing = |section: &str| {
            Err(EngineError::InvalidConfiguration(format!(
                "mode {:?} requires a [{section}] section",
                self.agent.mode
            )))
        };
        match self.agent.mode {
            RunMode::Sim if self.sim.is_none() => missing("sim"),
            RunMode::Sweep if self.sim.is_none() => missing("sim"),
            RunMode::Sweep if self.sweep.is_none() => missing("sweep"),
            RunMode::Live => match &self.live {
                None => missing("live"),
                Some(live) if live.pairs.is_empty() => Err(EngineError::InvalidConfiguration(
                    "live mode needs at least one pair".into(),
                )),
                Some(_) if self.trainer.window_len > MAX_WINDOW_LEN => {
                    Err(EngineError::InvalidConfiguration(format!(
                        "window_len {} exceeds the {MAX_WINDOW_LEN} observations the live feed can serve",
                        self.trainer.window_len
                    )))
                }
                Some(_) => Ok(()),
            },
            _ => Ok(()),
        }
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
