//! Replays confirmed pulses onto a digital output.

use crate::MonitorContext;
use pulse_common::config::OutputConfig;
use pulse_io::DigitalOutput;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pulse replay loop for one output.
///
/// Every poll interval the forwarder compares the counter with the last
/// pulse it replayed and plays the difference back one pulse at a time:
/// active for `hold`, inactive, then an optional `release` gap. Bursts are
/// replayed serially, so a fast meter can put the output behind the counter.
pub struct Forwarder {
    name: String,
    output: Box<dyn DigitalOutput>,
    hold: Duration,
    release: Duration,
    poll_interval: Duration,
}

impl Forwarder {
    /// Create a forwarder driving `output` with the timing from `config`.
    #[must_use]
    pub fn new(config: &OutputConfig, output: Box<dyn DigitalOutput>) -> Self {
        Self {
            name: config.name.clone(),
            output,
            hold: config.hold,
            release: config.release,
            poll_interval: config.poll_interval,
        }
    }

    /// Output name from configuration.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn set(&mut self, active: bool) {
        if let Err(e) = self.output.set_active(active) {
            warn!(output = %self.name, active, error = %e, "Output write failed");
        }
    }

    /// Play one pulse. Returns `false` if shutdown cut it short.
    fn replay_one(&mut self, ctx: &MonitorContext) -> bool {
        self.set(true);
        let held = ctx.clock.sleep(self.hold, &ctx.shutdown);
        self.set(false);
        if !held {
            return false;
        }
        self.release.is_zero() || ctx.clock.sleep(self.release, &ctx.shutdown)
    }

    /// Replay pulses until shutdown. Returns the number replayed.
    ///
    /// The output is driven inactive on entry and on exit.
    pub fn run(mut self, ctx: &MonitorContext) -> u64 {
        self.set(false);
        let mut last = ctx.counter.snapshot();
        let mut replayed = 0u64;
        info!(
            output = %self.name,
            hold_ms = self.hold.as_millis(),
            release_ms = self.release.as_millis(),
            "Forwarder started"
        );

        'poll: while ctx.clock.sleep(self.poll_interval, &ctx.shutdown) {
            let snapshot = ctx.counter.snapshot();
            if snapshot > last + 1 {
                debug!(output = %self.name, backlog = snapshot - last, "Replaying burst");
            }
            while last < snapshot {
                if !self.replay_one(ctx) {
                    break 'poll;
                }
                last += 1;
                replayed += 1;
            }
        }

        self.set(false);
        info!(output = %self.name, replayed, "Forwarder stopped");
        replayed
    }
}
