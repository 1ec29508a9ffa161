//! Stake allocation across both directions.
//!
//! Every epoch the whole spendable budget is split between up and down.
//! The favoured side gets the larger share, as given by the configured
//! [`SkewCurve`]; each side first receives the configured floor.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::{SkewCurve, StakeConfig};
use crate::types::{ConfidencePair, Direction, EngineError, StakePair};

/// Decimal places kept on allocated stakes.
const STAKE_DP: u32 = 8;

#[derive(Debug, Clone)]
pub struct StakeAllocator {
    spendable: Decimal,
    floor: Decimal,
    curve: SkewCurve,
}

impl StakeAllocator {
    pub fn new(config: &StakeConfig) -> Result<Self, EngineError> {
        let spendable = config.budget * (Decimal::ONE - config.reserve_fraction);
        if spendable <= Decimal::ZERO || config.floor * Decimal::TWO > spendable {
            return Err(EngineError::InvalidConfiguration(format!(
                "budget {} cannot cover two floors of {}",
                config.budget, config.floor
            )));
        }
        Ok(Self {
            spendable,
            floor: config.floor,
            curve: config.skew,
        })
    }

    /// Budget actually split each epoch (after the reserve).
    pub fn spendable(&self) -> Decimal {
        self.spendable
    }

    /// Split the spendable budget for one confidence pair.
    ///
    /// `up + down == spendable` exactly, each side is at least the floor,
    /// and the favoured side never receives less than the other.
    pub fn allocate(&self, confidence: &ConfidencePair) -> StakePair {
        let free = self.spendable - self.floor * Decimal::TWO;
        let low_weight = 1.0 - self.curve.favoured_weight(confidence.skew());
        let low_share = Decimal::from_f64(low_weight.clamp(0.0, 0.5))
            .map(|w| (free * w).round_dp(STAKE_DP))
            .unwrap_or(Decimal::ZERO)
            .min(free / Decimal::TWO);

        let low = self.floor + low_share;
        let high = self.spendable - low;
        let stakes = match confidence.favoured() {
            Direction::Up => StakePair { up: high, down: low },
            Direction::Down => StakePair { up: low, down: high },
        };

        debug!(%confidence, %stakes, "Stakes allocated");
        stakes
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
