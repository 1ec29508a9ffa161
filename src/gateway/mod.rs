//! Submission gateways.
//!
//! Defines the `SubmissionGateway` trait and provides implementations for:
//! - An in-memory simulated venue (simulation, sweeps, dry runs)
//! - A JSON-over-HTTP venue (live mode)

pub mod http;
pub mod simulated;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::{AttemptOutcome, Direction, EpochId};

pub use http::HttpGateway;
pub use simulated::SimulatedGateway;

/// A venue that accepts one stake per direction per epoch.
///
/// Failures are reported as [`AttemptOutcome`] values rather than errors:
/// a rejection or timeout is an ordinary result the scheduler retries.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubmissionGateway: Send + Sync {
    async fn submit(&self, epoch_id: EpochId, direction: Direction, amount: Decimal)
        -> AttemptOutcome;
}
