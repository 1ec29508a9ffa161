//! Fixed-probability trainer. Useful as a baseline and for tests.

use super::Trainer;
use crate::types::{EngineError, FeedWindow};

#[derive(Debug, Clone, Copy)]
pub struct ConstantTrainer {
    probability: f64,
}

impl ConstantTrainer {
    pub fn new(probability: f64) -> Self {
        Self { probability }
    }
}

impl Trainer for ConstantTrainer {
    fn fit_and_predict(&self, _window: &FeedWindow) -> Result<f64, EngineError> {
        Ok(self.probability)
    }

    fn name(&self) -> &str {
        "constant"
    }
}
