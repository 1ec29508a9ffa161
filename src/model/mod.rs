//! Trainers: fit a model on a feed window and return P(up) for the next epoch.
//!
//! A trainer is pure with respect to its input window; it holds no state
//! between calls, so the scheduler may call it from a blocking task.

pub mod constant;
pub mod logistic;

use std::sync::Arc;

use crate::config::{Approach, TrainerConfig};
use crate::types::{EngineError, FeedWindow};

pub use constant::ConstantTrainer;
pub use logistic::LogisticTrainer;

pub trait Trainer: Send + Sync {
    /// Probability that the price rises over the next epoch, in `[0, 1]`.
    ///
    /// Fails with `ModelUnavailable` if a model cannot be fit from `window`.
    fn fit_and_predict(&self, window: &FeedWindow) -> Result<f64, EngineError>;

    fn name(&self) -> &str;
}

/// Build the trainer selected by `config.approach`.
pub fn build_trainer(config: &TrainerConfig) -> Arc<dyn Trainer> {
    match config.approach {
        Approach::Constant => Arc::new(ConstantTrainer::new(config.constant_probability)),
        Approach::LinearLogistic => Arc::new(LogisticTrainer::new(config, false)),
        Approach::LinearLogisticBalanced => Arc::new(LogisticTrainer::new(config, true)),
    }
}
