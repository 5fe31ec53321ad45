//! Switch debouncing and the fixed-rate sampling loop.
//!
//! The debouncer is a countdown: every closed sample decrements it and the
//! pulse is confirmed on the sample that brings it to exactly zero. While
//! the switch stays closed the countdown keeps going negative, so a long
//! closure is still one pulse. An open sample re-arms the countdown only
//! after a pulse has been confirmed; a closure that ends before reaching
//! zero leaves its partial progress in place.

use crate::{Clock, EventSender, PulseCounter, PulseEvent, PushOutcome, Shutdown};
use chrono::TimeDelta;
use pulse_common::{PulseError, PulseResult};
use pulse_io::{DigitalInput, Level};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Countdown debouncer for a switch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debouncer {
    count: i64,
    countdown: i64,
}

impl Debouncer {
    /// Create a debouncer that confirms a pulse after `count` closed samples.
    #[must_use]
    pub fn new(count: i64) -> Self {
        Self {
            count,
            countdown: count,
        }
    }

    /// Feed one sample. Returns `true` when it confirms a pulse.
    pub fn sample(&mut self, level: Level) -> bool {
        match level {
            Level::Closed => {
                self.countdown = self.countdown.saturating_sub(1);
                self.countdown == 0
            }
            Level::Open => {
                if self.countdown <= 0 {
                    self.countdown = self.count;
                }
                false
            }
        }
    }

    /// Current countdown value.
    #[must_use]
    pub fn countdown(&self) -> i64 {
        self.countdown
    }
}

/// Fixed-rate loop that samples the meter input and publishes pulses.
pub struct Poller<I> {
    input: I,
    debouncer: Debouncer,
    interval: Duration,
    step: TimeDelta,
    counter: Arc<PulseCounter>,
    events: EventSender,
    clock: Arc<dyn Clock>,
}

impl<I: DigitalInput> Poller<I> {
    /// Create a poller sampling `input` every `interval`.
    pub fn new(
        input: I,
        interval: Duration,
        debounce_count: i64,
        counter: Arc<PulseCounter>,
        events: EventSender,
        clock: Arc<dyn Clock>,
    ) -> PulseResult<Self> {
        if debounce_count < 1 {
            return Err(PulseError::Config(format!(
                "debounce count must be at least 1, got {debounce_count}"
            )));
        }
        let step = TimeDelta::from_std(interval)
            .ok()
            .filter(|s| *s > TimeDelta::zero())
            .ok_or_else(|| PulseError::Config(format!("invalid polling interval {interval:?}")))?;
        Ok(Self {
            input,
            debouncer: Debouncer::new(debounce_count),
            interval,
            step,
            counter,
            events,
            clock,
        })
    }

    /// Sample until shutdown. Returns the number of pulses confirmed.
    ///
    /// A read failure is fatal: it triggers `shutdown` for every other loop
    /// and is returned.
    pub fn run(mut self, shutdown: &Shutdown) -> PulseResult<u64> {
        info!(
            interval_ms = self.interval.as_millis(),
            debounce_count = self.debouncer.count,
            "Poller started"
        );
        let mut confirmed = 0u64;
        let mut closed_warned = false;
        let mut next = self.clock.now();

        while !shutdown.is_triggered() {
            let level = match self.input.read() {
                Ok(level) => level,
                Err(e) => {
                    error!(error = %e, "Meter input read failed, stopping monitor");
                    shutdown.trigger();
                    return Err(e);
                }
            };

            if self.debouncer.sample(level) {
                let event = PulseEvent {
                    ordinal: self.counter.increment(),
                    timestamp: self.clock.now(),
                };
                confirmed += 1;
                debug!(ordinal = event.ordinal, "Pulse confirmed");
                if self.events.push(event, shutdown) == PushOutcome::Closed && !closed_warned {
                    warn!("Pulse queue closed, timestamps are no longer logged");
                    closed_warned = true;
                }
            }

            next += self.step;
            let now = self.clock.now();
            match (next - now).to_std() {
                Ok(wait) if !wait.is_zero() => {
                    if !self.clock.sleep(wait, shutdown) {
                        break;
                    }
                }
                _ => {
                    if now - next > self.step {
                        debug!(behind_ms = (now - next).num_milliseconds(), "Poller overran, resynchronizing");
                        next = now;
                    }
                }
            }
        }

        info!(confirmed, dropped = self.events.dropped(), "Poller stopped");
        Ok(confirmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_queue;
    use crate::testing::SteppingClock;
    use chrono::{TimeZone, Utc};
    use pulse_common::config::QueueConfig;
    use pulse_io::{pulse_train, SimulatedInput};

    fn feed(debouncer: &mut Debouncer, samples: &[Level]) -> usize {
        samples.iter().filter(|s| debouncer.sample(**s)).count()
    }

    #[test]
    fn test_short_closure_is_rejected() {
        let mut d = Debouncer::new(10);
        assert_eq!(feed(&mut d, &pulse_train(1, 9, 5)), 0);
    }

    #[test]
    fn test_exact_closure_counts_once() {
        let mut d = Debouncer::new(10);
        assert_eq!(feed(&mut d, &pulse_train(1, 10, 1)), 1);
        assert_eq!(d.countdown(), 10);
        assert_eq!(feed(&mut d, &pulse_train(1, 10, 1)), 1);
    }

    #[test]
    fn test_long_closure_counts_once() {
        let mut d = Debouncer::new(10);
        assert_eq!(feed(&mut d, &pulse_train(1, 30, 0)), 1);
        assert!(d.countdown() < 0);
        assert_eq!(feed(&mut d, &[Level::Open]), 0);
        assert_eq!(d.countdown(), 10);
    }

    #[test]
    fn test_bounce_accumulates_until_confirmed() {
        // Partial runs are not re-armed, so bounces add up.
        let mut d = Debouncer::new(4);
        let samples = [
            Level::Closed,
            Level::Closed,
            Level::Open,
            Level::Closed,
            Level::Open,
            Level::Closed,
        ];
        assert_eq!(feed(&mut d, &samples), 1);
    }

    #[test]
    fn test_single_sample_debounce() {
        let mut d = Debouncer::new(1);
        assert_eq!(feed(&mut d, &pulse_train(3, 1, 1)), 3);
    }

    fn poller(
        input: SimulatedInput,
        capacity: usize,
    ) -> (Poller<SimulatedInput>, Arc<PulseCounter>, crossbeam_channel::Receiver<PulseEvent>) {
        let counter = Arc::new(PulseCounter::new());
        let (tx, rx) = event_queue(&QueueConfig {
            capacity,
            ..QueueConfig::default()
        });
        let clock = Arc::new(SteppingClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let poller = Poller::new(
            input,
            Duration::from_millis(10),
            10,
            Arc::clone(&counter),
            tx,
            clock,
        )
        .unwrap();
        (poller, counter, rx)
    }

    #[test]
    fn test_poller_counts_and_timestamps() {
        let input = SimulatedInput::scripted(pulse_train(3, 20, 10));
        let handle = input.clone();
        let (poller, counter, rx) = poller(input, 16);
        let shutdown = Shutdown::new();
        let stopper = shutdown.clone();

        let worker = std::thread::spawn(move || poller.run(&stopper));
        while handle.remaining() > 0 {
            std::thread::yield_now();
        }
        shutdown.trigger();
        assert_eq!(worker.join().unwrap().unwrap(), 3);
        assert_eq!(counter.snapshot(), 3);

        let events: Vec<PulseEvent> = rx.try_iter().collect();
        assert_eq!(events.iter().map(|e| e.ordinal).collect::<Vec<_>>(), vec![1, 2, 3]);
        // Confirmed on the 10th closed sample of each 30-sample cycle.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(events[0].timestamp, start + TimeDelta::milliseconds(90));
        assert_eq!(events[1].timestamp, start + TimeDelta::milliseconds(390));
    }

    #[test]
    fn test_poller_read_failure_is_fatal() {
        let input = SimulatedInput::new();
        input.inject_fault("gpio gone");
        let (poller, _counter, _rx) = poller(input, 4);
        let shutdown = Shutdown::new();
        assert!(matches!(poller.run(&shutdown), Err(PulseError::Hardware(_))));
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_poller_rejects_zero_debounce() {
        let counter = Arc::new(PulseCounter::new());
        let (tx, _rx) = event_queue(&QueueConfig::default());
        let clock: Arc<dyn Clock> = Arc::new(crate::SystemClock);
        assert!(Poller::new(
            SimulatedInput::new(),
            Duration::from_millis(10),
            0,
            counter,
            tx,
            clock
        )
        .is_err());
    }
}
