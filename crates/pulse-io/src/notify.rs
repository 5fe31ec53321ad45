//! Notification sinks.

use crate::NotificationSink;
use pulse_common::{PulseError, PulseResult};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::info;

/// A delivered (or attempted) notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Message subject.
    pub subject: String,
    /// Message body.
    pub body: String,
}

/// Sink that writes notifications to the tracing log.
///
/// Used when no external delivery is configured; never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn send(&self, subject: &str, body: &str) -> PulseResult<()> {
        info!(target: "pulsemon::notify", %subject, body = body.trim_end(), "Notification");
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Recorded {
    messages: Vec<Notification>,
    failing: bool,
}

/// Sink that keeps every notification in memory.
///
/// Clones share the same record, so a test can hold one handle while the
/// monitor owns another.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    inner: Arc<(Mutex<Recorded>, Condvar)>,
}

impl RecordingSink {
    /// Create an empty, succeeding sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a sink that records every attempt but reports failure.
    #[must_use]
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.lock().failing = true;
        sink
    }

    fn lock(&self) -> MutexGuard<'_, Recorded> {
        self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every notification seen so far.
    #[must_use]
    pub fn messages(&self) -> Vec<Notification> {
        self.lock().messages.clone()
    }

    /// Number of notifications seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().messages.len()
    }

    /// True if nothing has been sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Block until at least `count` notifications arrived or `timeout` passed.
    ///
    /// Returns everything recorded at that point.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<Notification> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.lock();
        while guard.messages.len() < count {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            guard = self
                .inner
                .1
                .wait_timeout(guard, deadline - now)
                .map(|(g, _)| g)
                .unwrap_or_else(|e| e.into_inner().0);
        }
        guard.messages.clone()
    }
}

impl NotificationSink for RecordingSink {
    fn send(&self, subject: &str, body: &str) -> PulseResult<()> {
        let failing = {
            let mut guard = self.lock();
            guard.messages.push(Notification {
                subject: subject.to_string(),
                body: body.to_string(),
            });
            guard.failing
        };
        self.inner.1.notify_all();
        if failing {
            Err(PulseError::Notification(format!(
                "delivery of {subject:?} refused"
            )))
        } else {
            Ok(())
        }
    }
}
