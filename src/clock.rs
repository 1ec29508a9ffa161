//! Time sources and epoch boundaries.
//!
//! The engine never reads wall-clock time directly. It asks a [`Clock`],
//! which is either the real [`SystemClock`] or a [`SimClock`] replay cursor
//! whose sleeps advance logical time instantly. The [`EpochClock`] turns
//! "now" into epoch boundaries and deadlines for one timeframe.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::types::{EngineError, Epoch, EpochId, Timeframe};

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of "now" plus a way to wait for a later instant.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Suspend until `t`. Returns immediately if `t` has already passed.
    async fn sleep_until(&self, t: DateTime<Utc>);

    /// Whether time on this clock passes with the wall clock. Wall-clock
    /// timeouts are only applied when it does.
    fn is_realtime(&self) -> bool {
        true
    }
}

/// Wall-clock time; sleeps suspend the task.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, t: DateTime<Utc>) {
        if let Ok(wait) = (t - Utc::now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Deterministic replay cursor. Cloning shares the cursor.
///
/// Time only moves forward: `sleep_until` jumps the cursor to `t` (never
/// backwards) without waiting.
#[derive(Debug, Clone)]
pub struct SimClock {
    cursor_ms: Arc<AtomicI64>,
}

impl SimClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            cursor_ms: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    /// Move the cursor forward to `t` (no-op if `t` is in the past).
    pub fn advance_to(&self, t: DateTime<Utc>) {
        self.cursor_ms.fetch_max(t.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance_by(&self, d: Duration) {
        if d > Duration::zero() {
            self.cursor_ms.fetch_add(d.num_milliseconds(), Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.cursor_ms.load(Ordering::SeqCst)).unwrap_or_default()
    }

    async fn sleep_until(&self, t: DateTime<Utc>) {
        self.advance_to(t);
    }

    fn is_realtime(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Epoch clock
// ---------------------------------------------------------------------------

/// Computes epoch boundaries and deadlines for one timeframe.
pub struct EpochClock {
    timeframe: Timeframe,
    submission_lead: Duration,
    clock: Arc<dyn Clock>,
}

impl EpochClock {
    /// Fails with `InvalidConfiguration` unless `0 <= lead < epoch duration`.
    pub fn new(
        timeframe: Timeframe,
        submission_lead: Duration,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, EngineError> {
        if submission_lead < Duration::zero() || submission_lead >= timeframe.duration() {
            return Err(EngineError::InvalidConfiguration(format!(
                "submission lead {}s must be shorter than the {timeframe} epoch",
                submission_lead.num_seconds()
            )));
        }
        Ok(Self {
            timeframe,
            submission_lead,
            clock,
        })
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    /// The epoch with the given index.
    pub fn epoch(&self, index: i64) -> Epoch {
        let length = self.timeframe.duration();
        let start_time = DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(index * self.timeframe.secs());
        let end_time = start_time + length;
        Epoch {
            id: EpochId {
                timeframe: self.timeframe,
                index,
            },
            start_time,
            end_time,
            deadline_time: end_time - self.submission_lead,
        }
    }

    /// The epoch whose `[start_time, end_time)` contains `t`.
    pub fn epoch_at(&self, t: DateTime<Utc>) -> Epoch {
        let length_ms = self.timeframe.secs() * 1000;
        self.epoch(t.timestamp_millis().div_euclid(length_ms))
    }

    pub fn current_epoch(&self) -> Epoch {
        self.epoch_at(self.clock.now())
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch(self.current_epoch().id.index + 1)
    }

    /// The current epoch while its deadline is ahead, otherwise the next one.
    pub fn epoch_of_interest(&self) -> Epoch {
        let current = self.current_epoch();
        if current.is_open(self.clock.now()) {
            current
        } else {
            self.epoch(current.id.index + 1)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
