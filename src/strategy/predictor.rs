//! Two-sided predictor: turns a single P(up) into a symmetric confidence pair.

use crate::types::{ConfidencePair, EngineError};

#[derive(Debug, Clone, Copy, Default)]
pub struct TwoSidedPredictor;

impl TwoSidedPredictor {
    pub fn new() -> Self {
        Self
    }

    /// `up = p`, `down = 1 - p`. An out-of-range or non-finite `p` means the
    /// model produced garbage and is reported as `ModelUnavailable`.
    pub fn predict(&self, prob_up: f64) -> Result<ConfidencePair, EngineError> {
        ConfidencePair::from_up(prob_up).ok_or_else(|| {
            EngineError::ModelUnavailable(format!("probability {prob_up} outside [0, 1]"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predict_is_symmetric() {
        let pair = TwoSidedPredictor::new().predict(0.7).unwrap();
        assert_eq!(pair.up(), 0.7);
        assert_eq!(pair.up() + pair.down(), 1.0);
    }

    #[test]
    fn test_predict_rejects_out_of_range() {
        let predictor = TwoSidedPredictor::new();
        for p in [-0.1, 1.5, f64::NAN] {
            assert!(matches!(
                predictor.predict(p),
                Err(EngineError::ModelUnavailable(_))
            ));
        }
    }
}
