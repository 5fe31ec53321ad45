//! Persists confirmed pulses to the timestamp log.

use crate::{Notifier, PulseEvent, Shutdown};
use crossbeam_channel::{select, Receiver};
use pulse_common::PulseResult;
use pulse_log::TimestampWriter;
use tracing::{debug, error, info};

/// Drains the pulse queue into a [`TimestampWriter`].
///
/// Append failures are logged and reported once per failure streak through
/// the notifier; counting is unaffected. After shutdown the logger keeps
/// draining until the producer side of the queue is gone, so every event the
/// poller managed to queue is written before the log is closed.
pub struct Logger {
    writer: TimestampWriter,
    events: Receiver<PulseEvent>,
    notifier: Notifier,
    failing: bool,
}

impl Logger {
    /// Create a logger writing `events` to `writer`.
    #[must_use]
    pub fn new(writer: TimestampWriter, events: Receiver<PulseEvent>, notifier: Notifier) -> Self {
        Self {
            writer,
            events,
            notifier,
            failing: false,
        }
    }

    fn write(&mut self, event: PulseEvent) {
        match self.writer.append(event.timestamp) {
            Ok(()) => {
                if self.failing {
                    info!(ordinal = event.ordinal, "Timestamp log writable again");
                    self.failing = false;
                }
            }
            Err(e) => {
                error!(ordinal = event.ordinal, error = %e, "Failed to log pulse timestamp");
                if !self.failing {
                    self.failing = true;
                    self.notifier
                        .alert(format!("ALERT: pulse timestamps are not being logged: {e}"));
                }
            }
        }
    }

    /// Write `first` plus whatever else is already queued. Returns the batch size.
    fn write_batch(&mut self, first: PulseEvent) -> usize {
        self.write(first);
        let mut batch = 1;
        while let Ok(event) = self.events.try_recv() {
            self.write(event);
            batch += 1;
        }
        batch
    }

    /// Log pulses until shutdown, drain, then close the log.
    ///
    /// Returns the number of records appended.
    pub fn run(mut self, shutdown: &Shutdown) -> PulseResult<u64> {
        info!(path = %self.writer.path().display(), "Logger started");
        loop {
            select! {
                recv(self.events) -> event => match event {
                    Ok(event) => {
                        let batch = self.write_batch(event);
                        debug!(batch, "Logged pulse batch");
                    }
                    Err(_) => break,
                },
                recv(shutdown.receiver()) -> _ => break,
            }
        }

        let mut drained = 0usize;
        while let Ok(event) = self.events.recv() {
            self.write(event);
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Drained queued pulses at shutdown");
        }

        self.writer.close()?;
        let appended = self.writer.appended();
        info!(appended, "Logger stopped");
        Ok(appended)
    }
}
