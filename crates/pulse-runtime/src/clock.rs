//! Time sources for the monitor loops.
//!
//! Every periodic loop suspends only through [`Clock::sleep`], so a test can
//! substitute a clock that moves under its control (see the `testing`
//! module, enabled by the `test-helpers` feature).

use crate::Shutdown;
use chrono::{DateTime, FixedOffset, Local, Utc};
use crossbeam_channel::RecvTimeoutError;
use pulse_common::DailySchedule;
use std::time::Duration;

/// Source of wall-clock time and interruptible sleeps.
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for `period`.
    ///
    /// Returns `false` without completing the sleep if `shutdown` is (or
    /// becomes) triggered.
    fn sleep(&self, period: Duration, shutdown: &Shutdown) -> bool;
}

/// Real time. Sleeps wake early on shutdown.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, period: Duration, shutdown: &Shutdown) -> bool {
        if shutdown.is_triggered() {
            return false;
        }
        matches!(
            shutdown.receiver().recv_timeout(period),
            Err(RecvTimeoutError::Timeout)
        )
    }
}

/// Time zone used for report scheduling and human-readable times.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LocalZone {
    /// The host's local zone, including its daylight-saving rules.
    #[default]
    System,
    /// A fixed offset with no daylight-saving time.
    Fixed(FixedOffset),
}

impl LocalZone {
    /// `t` expressed in this zone.
    #[must_use]
    pub fn localize(&self, t: DateTime<Utc>) -> DateTime<FixedOffset> {
        match self {
            Self::System => t.with_timezone(&Local).fixed_offset(),
            Self::Fixed(offset) => t.with_timezone(offset),
        }
    }

    /// Format `t` for message bodies.
    #[must_use]
    pub fn display(&self, t: DateTime<Utc>) -> String {
        self.localize(t).format("%Y-%m-%d %H:%M:%S %z").to_string()
    }

    /// Next run of `schedule` after `now`, and the delay until it.
    #[must_use]
    pub fn next_daily(&self, schedule: &DailySchedule, now: DateTime<Utc>) -> (DateTime<Utc>, Duration) {
        match self {
            Self::System => {
                let (at, delay) = schedule.next_from(&now.with_timezone(&Local));
                (at.with_timezone(&Utc), delay)
            }
            Self::Fixed(offset) => {
                let (at, delay) = schedule.next_from(&now.with_timezone(offset));
                (at.with_timezone(&Utc), delay)
            }
        }
    }
}
