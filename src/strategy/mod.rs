//! Strategy layer: confidence pairs and stake allocation.

pub mod predictor;
pub mod stake;

use tracing::debug;

use crate::config::StakeConfig;
use crate::types::{ConfidencePair, EngineError, StakePair};
use predictor::TwoSidedPredictor;
use stake::StakeAllocator;

/// What the engine intends to submit for one epoch on one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Decision {
    pub prob_up: f64,
    pub confidence: ConfidencePair,
    pub stakes: StakePair,
}

/// Pipelines probability → confidence pair → stake split.
#[derive(Debug, Clone)]
pub struct DecisionMaker {
    predictor: TwoSidedPredictor,
    allocator: StakeAllocator,
}

impl DecisionMaker {
    pub fn new(stake: &StakeConfig) -> Result<Self, EngineError> {
        Ok(Self {
            predictor: TwoSidedPredictor::new(),
            allocator: StakeAllocator::new(stake)?,
        })
    }

    pub fn allocator(&self) -> &StakeAllocator {
        &self.allocator
    }

    pub fn decide(&self, prob_up: f64) -> Result<Decision, EngineError> {
        let confidence = self.predictor.predict(prob_up)?;
        let stakes = self.allocator.allocate(&confidence);
        debug!(
            prob_up = format!("{:.4}", prob_up),
            favoured = %confidence.favoured(),
            %stakes,
            "Decision made"
        );
        Ok(Decision {
            prob_up,
            confidence,
            stakes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_engine_config;
    use crate::types::Direction;
    use rust_decimal_macros::dec;

    #[test]
    fn test_decide_pipeline() {
        let maker = DecisionMaker::new(&sample_engine_config().stake).unwrap();
        let decision = maker.decide(0.3).unwrap();
        assert_eq!(decision.confidence.favoured(), Direction::Down);
        assert_eq!(decision.stakes.down, dec!(2100));
        assert_eq!(decision.stakes.total(), maker.allocator().spendable());
    }

    #[test]
    fn test_decide_rejects_bad_probability() {
        let maker = DecisionMaker::new(&sample_engine_config().stake).unwrap();
        assert!(maker.decide(f64::NAN).is_err());
    }
}
