//! Core engine: the per-epoch scheduler, outcome scoring, and the run loop
//! that ties them to a clock.

pub mod runner;
pub mod scheduler;
pub mod scorer;

pub use runner::{Engine, EpochRecord, RunSummary};
pub use scheduler::{EpochReport, SubmissionScheduler};
pub use scorer::{ConfusionMatrix, EpochScore, MetricsSummary, OutcomeScorer, RunningMetrics};
