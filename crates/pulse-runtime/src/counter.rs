//! Shared pulse counter and the confirmed-pulse queue.

use crate::Shutdown;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use crossbeam_utils::CachePadded;
use pulse_common::config::{OverflowPolicy, QueueConfig};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// A confirmed pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseEvent {
    /// Counter value produced by the increment that confirmed this pulse.
    pub ordinal: u64,
    /// When the pulse was confirmed.
    pub timestamp: DateTime<Utc>,
}

/// Monotonic count of confirmed pulses since startup.
///
/// Written by the debounce poller only; read lock-free by every other loop.
#[derive(Debug, Default)]
pub struct PulseCounter {
    value: CachePadded<AtomicU64>,
}

impl PulseCounter {
    /// Create a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one pulse and return the new total.
    #[inline]
    pub fn increment(&self) -> u64 {
        self.value.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Current total.
    #[inline]
    #[must_use]
    pub fn snapshot(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }
}

/// Result of offering an event to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The event is waiting for the logger.
    Queued,
    /// The queue was full (or shutdown interrupted a blocking push).
    Dropped,
    /// The logger is gone.
    Closed,
}

/// Producer half of the confirmed-pulse queue.
#[derive(Debug)]
pub struct EventSender {
    tx: Sender<PulseEvent>,
    policy: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

/// Create the bounded queue between the poller and the logger.
#[must_use]
pub fn event_queue(config: &QueueConfig) -> (EventSender, Receiver<PulseEvent>) {
    let (tx, rx) = bounded(config.capacity);
    (
        EventSender {
            tx,
            policy: config.overflow,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}

impl EventSender {
    /// Offer `event` according to the overflow policy.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for a free slot, giving up
    /// when `shutdown` is triggered.
    pub fn push(&self, event: PulseEvent, shutdown: &Shutdown) -> PushOutcome {
        match self.policy {
            OverflowPolicy::Drop => match self.tx.try_send(event) {
                Ok(()) => PushOutcome::Queued,
                Err(TrySendError::Full(event)) => self.record_drop(&event),
                Err(TrySendError::Disconnected(_)) => PushOutcome::Closed,
            },
            OverflowPolicy::Block => select! {
                send(self.tx, event) -> res => match res {
                    Ok(()) => PushOutcome::Queued,
                    Err(_) => PushOutcome::Closed,
                },
                recv(shutdown.receiver()) -> _ => self.record_drop(&event),
            },
        }
    }

    fn record_drop(&self, event: &PulseEvent) -> PushOutcome {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            ordinal = event.ordinal,
            dropped,
            capacity = self.tx.capacity().unwrap_or(0),
            "Pulse queue full, timestamp not logged"
        );
        PushOutcome::Dropped
    }

    /// Events dropped so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle on the drop count, readable after the sender is gone.
    #[must_use]
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::thread;
    use std::time::Duration;

    fn event(ordinal: u64) -> PulseEvent {
        PulseEvent {
            ordinal,
            timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
        }
    }

    fn queue(capacity: usize, overflow: OverflowPolicy) -> (EventSender, Receiver<PulseEvent>) {
        event_queue(&QueueConfig { capacity, overflow })
    }

    #[test]
    fn test_counter_increments() {
        let counter = PulseCounter::new();
        assert_eq!(counter.snapshot(), 0);
        assert_eq!(counter.increment(), 1);
        assert_eq!(counter.increment(), 2);
        assert_eq!(counter.snapshot(), 2);
    }

    #[test]
    fn test_snapshots_never_decrease() {
        let counter = Arc::new(PulseCounter::new());
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    let mut last = 0;
                    for _ in 0..20_000 {
                        let now = counter.snapshot();
                        assert!(now >= last, "snapshot went backwards: {last} -> {now}");
                        last = now;
                    }
                })
            })
            .collect();
        for _ in 0..50_000 {
            counter.increment();
        }
        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(counter.snapshot(), 50_000);
    }

    #[test]
    fn test_drop_policy_counts_overflow() {
        let shutdown = Shutdown::new();
        let (tx, rx) = queue(2, OverflowPolicy::Drop);
        assert_eq!(tx.push(event(1), &shutdown), PushOutcome::Queued);
        assert_eq!(tx.push(event(2), &shutdown), PushOutcome::Queued);
        assert_eq!(tx.push(event(3), &shutdown), PushOutcome::Dropped);
        assert_eq!(tx.dropped(), 1);

        let drained: Vec<u64> = rx.try_iter().map(|e| e.ordinal).collect();
        assert_eq!(drained, vec![1, 2]);
        assert_eq!(tx.push(event(4), &shutdown), PushOutcome::Queued);
    }

    #[test]
    fn test_block_policy_waits_for_slot() {
        let shutdown = Shutdown::new();
        let (tx, rx) = queue(1, OverflowPolicy::Block);
        assert_eq!(tx.push(event(1), &shutdown), PushOutcome::Queued);

        let consumer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            let first = rx.recv().unwrap();
            let second = rx.recv().unwrap();
            (first.ordinal, second.ordinal)
        });
        assert_eq!(tx.push(event(2), &shutdown), PushOutcome::Queued);
        assert_eq!(consumer.join().unwrap(), (1, 2));
        assert_eq!(tx.dropped(), 0);
    }

    #[test]
    fn test_block_policy_released_by_shutdown() {
        let shutdown = Shutdown::new();
        let (tx, _rx) = queue(1, OverflowPolicy::Block);
        assert_eq!(tx.push(event(1), &shutdown), PushOutcome::Queued);

        let trigger = shutdown.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.trigger();
        });
        assert_eq!(tx.push(event(2), &shutdown), PushOutcome::Dropped);
        stopper.join().unwrap();
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn test_closed_queue() {
        let shutdown = Shutdown::new();
        let (tx, rx) = queue(4, OverflowPolicy::Drop);
        drop(rx);
        assert_eq!(tx.push(event(1), &shutdown), PushOutcome::Closed);
        let (tx, rx) = queue(4, OverflowPolicy::Block);
        drop(rx);
        assert_eq!(tx.push(event(1), &shutdown), PushOutcome::Closed);
    }
}
