//! Deterministic clocks for tests.

use crate::{Clock, Shutdown};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// How often a parked sleeper re-checks the shutdown flag.
const SHUTDOWN_POLL: Duration = Duration::from_millis(5);

fn delta(period: Duration) -> TimeDelta {
    TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX)
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    next_id: u64,
    sleepers: HashMap<u64, DateTime<Utc>>,
}

/// A clock that only moves when the test advances it.
///
/// Sleepers park until virtual time reaches their deadline. Use
/// [`settle`](Self::settle) to wait until the loops under test have all gone
/// back to sleep before advancing again.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
    cond: Condvar,
}

impl ManualClock {
    /// Create a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                next_id: 0,
                sleepers: HashMap::new(),
            }),
            cond: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move virtual time forward and wake sleepers whose deadline passed.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.now += delta(by);
        drop(state);
        self.cond.notify_all();
    }

    /// Threads currently parked in [`Clock::sleep`].
    #[must_use]
    pub fn sleepers(&self) -> usize {
        self.lock().sleepers.len()
    }

    /// Wait until at least `count` threads are parked, all on deadlines that
    /// are still in the future. Returns `false` if that did not happen within
    /// `timeout` of real time.
    pub fn settle(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            let now = state.now;
            if state.sleepers.len() >= count && state.sleepers.values().all(|d| *d > now) {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .cond
                .wait_timeout(state, remaining.min(SHUTDOWN_POLL))
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
    }

    /// Advance in `step` increments until `total` has elapsed, settling
    /// `count` sleepers after each step.
    pub fn advance_settled(&self, total: Duration, step: Duration, count: usize) -> bool {
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            let by = step.min(total - elapsed);
            self.advance(by);
            elapsed += by;
            if !self.settle(count, Duration::from_secs(5)) {
                return false;
            }
        }
        true
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.lock().now
    }

    fn sleep(&self, period: Duration, shutdown: &Shutdown) -> bool {
        let mut state = self.lock();
        let wake_at = state.now + delta(period);
        let id = state.next_id;
        state.next_id += 1;
        state.sleepers.insert(id, wake_at);
        self.cond.notify_all();

        let completed = loop {
            if shutdown.is_triggered() {
                break false;
            }
            if state.now >= wake_at {
                break true;
            }
            state = self
                .cond
                .wait_timeout(state, SHUTDOWN_POLL)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        };
        state.sleepers.remove(&id);
        drop(state);
        self.cond.notify_all();
        completed
    }
}

/// A clock whose sleeps return at once, advancing virtual time by the
/// requested period.
///
/// Lets a fixed-rate loop run as fast as the CPU allows while observing
/// exactly the timestamps it would have seen in real time.
#[derive(Debug)]
pub struct SteppingClock {
    now: Mutex<DateTime<Utc>>,
}

impl SteppingClock {
    /// Create a clock starting at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }
}

impl Clock for SteppingClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, period: Duration, shutdown: &Shutdown) -> bool {
        if shutdown.is_triggered() {
            return false;
        }
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += delta(period);
        std::thread::yield_now();
        true
    }
}
