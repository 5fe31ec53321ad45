//! Monitor assembly.
//!
//! [`Monitor::start`] builds every component from configuration and spawns
//! one named thread per loop:
//!
//! - `pulse-poller`: samples the input, debounces, counts
//! - `pulse-logger`: appends timestamps to the log
//! - `pulse-notifier`: delivers notifications
//! - `pulse-rate`, `pulse-idle`, `pulse-leak`, `pulse-daily`: alert policies
//! - `pulse-out-<name>`: one per configured output
//!
//! All loops share a single [`Shutdown`]. [`Monitor::wait`] joins them in
//! dependency order: the poller first, then the logger (which drains and
//! closes the log), then everything else.

use crate::alerts::{run_daily_report, run_idle_alert, run_leak_alert, run_rate_alert};
use crate::{
    event_queue, notification_queue, Clock, Forwarder, IdleMarker, LocalZone, Logger, Notifier,
    Poller, PulseCounter, Shutdown, SystemClock,
};
use pulse_common::{MonitorConfig, PulseError, PulseResult};
use pulse_io::{open_input, open_output, DigitalInput, DigitalOutput, LogSink, NotificationSink};
use pulse_log::TimestampWriter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info};

/// Shared state handed to every loop.
#[derive(Clone)]
pub struct MonitorContext {
    /// Validated configuration.
    pub config: Arc<MonitorConfig>,
    /// Confirmed pulse count.
    pub counter: Arc<PulseCounter>,
    /// Time source for the alert, report and forwarder loops.
    pub clock: Arc<dyn Clock>,
    /// Zone used for report scheduling and message times.
    pub zone: LocalZone,
    /// Notification queue.
    pub notifier: Notifier,
    /// Stop signal.
    pub shutdown: Shutdown,
    /// Latest idle tick, written by the idle loop and read by the leak loop.
    pub idle_marker: IdleMarker,
}

impl MonitorContext {
    /// `pulses` converted to volume, with unit.
    #[must_use]
    pub fn volume(&self, pulses: u64) -> String {
        format!(
            "{} {}",
            pulses.saturating_mul(self.config.volume_per_pulse),
            self.config.volume_unit
        )
    }

    /// Current time formatted in the local zone.
    #[must_use]
    pub fn local_now(&self) -> String {
        self.zone.display(self.clock.now())
    }
}

/// Capabilities the monitor runs against.
pub struct MonitorParts {
    /// Meter input.
    pub input: Box<dyn DigitalInput>,
    /// Replay outputs, in the same order as `config.outputs`.
    pub outputs: Vec<Box<dyn DigitalOutput>>,
    /// Notification delivery.
    pub sink: Arc<dyn NotificationSink>,
    /// Clock for the alert, report and forwarder loops.
    pub clock: Arc<dyn Clock>,
    /// Clock for the sampling loop.
    pub poll_clock: Arc<dyn Clock>,
    /// Local time zone.
    pub zone: LocalZone,
}

impl MonitorParts {
    /// Open the drivers named in `config`, with real clocks and a log sink.
    pub fn from_config(config: &MonitorConfig) -> PulseResult<Self> {
        let input = open_input(&config.input)?;
        let outputs = config
            .outputs
            .iter()
            .map(open_output)
            .collect::<PulseResult<Vec<_>>>()?;
        Ok(Self {
            input,
            outputs,
            sink: Arc::new(LogSink),
            clock: Arc::new(SystemClock),
            poll_clock: Arc::new(SystemClock),
            zone: LocalZone::System,
        })
    }
}

/// Totals reported when the monitor stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MonitorSummary {
    /// Pulses confirmed.
    pub pulses: u64,
    /// Timestamps appended to the log.
    pub logged: u64,
    /// Timestamps dropped on a full queue.
    pub dropped_events: u64,
    /// Notifications dropped on a full queue.
    pub dropped_notifications: u64,
}

fn spawn<T, F>(name: &str, f: F) -> PulseResult<JoinHandle<T>>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    thread::Builder::new()
        .name(format!("pulse-{name}"))
        .spawn(f)
        .map_err(|e| PulseError::Spawn {
            component: name.to_string(),
            reason: e.to_string(),
        })
}

/// A running monitor.
pub struct Monitor {
    ctx: MonitorContext,
    poller: Option<JoinHandle<PulseResult<u64>>>,
    logger: Option<JoinHandle<PulseResult<u64>>>,
    dispatcher: Option<JoinHandle<u64>>,
    loops: Vec<(String, JoinHandle<()>)>,
    dropped_events: Arc<AtomicU64>,
}

impl Monitor {
    /// Validate `config`, open the log and start every loop.
    ///
    /// Fails without leaving any thread running if the configuration is
    /// invalid, the log cannot be opened or a thread cannot be spawned.
    pub fn start(config: MonitorConfig, parts: MonitorParts) -> PulseResult<Self> {
        config
            .validate()
            .map_err(|e| PulseError::Config(e.to_string()))?;
        if parts.outputs.len() != config.outputs.len() {
            return Err(PulseError::Config(format!(
                "{} outputs configured but {} drivers supplied",
                config.outputs.len(),
                parts.outputs.len()
            )));
        }
        let writer = TimestampWriter::open(&config.timestamp_log)?;

        let config = Arc::new(config);
        let shutdown = Shutdown::new();
        let counter = Arc::new(PulseCounter::new());
        let (notifier, dispatcher) = notification_queue(
            parts.sink,
            config.notify.queue_capacity,
            config.alerts.subject.clone(),
            config.daily.subject.clone(),
        );
        let (events_tx, events_rx) = event_queue(&config.queue);
        let dropped_events = events_tx.drop_counter();
        let poller = Poller::new(
            parts.input,
            config.polling_interval,
            config.debounce_count(),
            Arc::clone(&counter),
            events_tx,
            parts.poll_clock,
        )?;
        let logger = Logger::new(writer, events_rx, notifier.clone());

        let ctx = MonitorContext {
            config,
            counter,
            clock: parts.clock,
            zone: parts.zone,
            notifier,
            shutdown,
            idle_marker: IdleMarker::new(),
        };
        let mut monitor = Self {
            ctx,
            poller: None,
            logger: None,
            dispatcher: None,
            loops: Vec::new(),
            dropped_events,
        };

        if let Err(e) = monitor.spawn_all(dispatcher, logger, poller, parts.outputs) {
            error!(error = %e, "Monitor failed to start");
            monitor.ctx.shutdown.trigger();
            let _ = monitor.join_all();
            return Err(e);
        }

        monitor.announce();
        info!(
            log = %monitor.ctx.config.timestamp_log.display(),
            outputs = monitor.ctx.config.outputs.len(),
            "Monitor started"
        );
        Ok(monitor)
    }

    fn spawn_all(
        &mut self,
        dispatcher: crate::Dispatcher,
        logger: Logger,
        poller: Poller<Box<dyn DigitalInput>>,
        outputs: Vec<Box<dyn DigitalOutput>>,
    ) -> PulseResult<()> {
        let shutdown = self.ctx.shutdown.clone();
        self.dispatcher = Some(spawn("notifier", move || dispatcher.run(&shutdown))?);

        let shutdown = self.ctx.shutdown.clone();
        self.logger = Some(spawn("logger", move || logger.run(&shutdown))?);

        let shutdown = self.ctx.shutdown.clone();
        self.poller = Some(spawn("poller", move || poller.run(&shutdown))?);

        let policies: [(&str, fn(&MonitorContext)); 4] = [
            ("rate", run_rate_alert),
            ("idle", run_idle_alert),
            ("leak", run_leak_alert),
            ("daily", run_daily_report),
        ];
        for (name, run) in policies {
            let ctx = self.ctx.clone();
            let handle = spawn(name, move || run(&ctx))?;
            self.loops.push((name.to_string(), handle));
        }

        let configured = Arc::clone(&self.ctx.config);
        for (config, output) in configured.outputs.iter().zip(outputs) {
            let forwarder = Forwarder::new(config, output);
            let name = format!("out-{}", forwarder.name());
            let ctx = self.ctx.clone();
            let handle = spawn(&name, move || {
                forwarder.run(&ctx);
            })?;
            self.loops.push((name, handle));
        }
        Ok(())
    }

    fn announce(&self) {
        let config = &self.ctx.config;
        if !config.notify.announce_start {
            return;
        }
        let now = self.ctx.clock.now();
        let next = if config.daily.enabled {
            let (at, _) = self.ctx.zone.next_daily(&config.daily.schedule(), now);
            format!("next daily report at {}", self.ctx.zone.display(at))
        } else {
            String::from("daily report disabled")
        };
        self.ctx.notifier.status(
            None,
            format!("pulsemon started @ {}, {next}", self.ctx.zone.display(now)),
        );
    }

    /// The shared context.
    #[must_use]
    pub fn context(&self) -> &MonitorContext {
        &self.ctx
    }

    /// The pulse counter.
    #[must_use]
    pub fn counter(&self) -> Arc<PulseCounter> {
        Arc::clone(&self.ctx.counter)
    }

    /// A handle that stops the monitor when triggered.
    #[must_use]
    pub fn shutdown_handle(&self) -> Shutdown {
        self.ctx.shutdown.clone()
    }

    /// Request shutdown. Returns immediately; use [`wait`](Self::wait) to join.
    pub fn shutdown(&self) {
        self.ctx.shutdown.trigger();
    }

    /// Block until shutdown is requested, then join every loop.
    ///
    /// Returns the poller's error if it stopped on a hardware failure, or
    /// the first other failure encountered while joining.
    pub fn wait(mut self) -> PulseResult<MonitorSummary> {
        self.ctx.shutdown.wait();
        self.join_all()
    }

    /// Trigger shutdown and join every loop.
    pub fn stop(self) -> PulseResult<MonitorSummary> {
        self.shutdown();
        self.wait()
    }

    fn join_all(&mut self) -> PulseResult<MonitorSummary> {
        let mut first_error: Option<PulseError> = None;
        let mut fail = |e: PulseError| {
            error!(error = %e, "Monitor loop failed");
            first_error.get_or_insert(e);
        };

        if let Some(handle) = self.poller.take() {
            match handle.join() {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => fail(e),
                Err(_) => fail(PulseError::Panicked("poller".into())),
            }
        }

        let mut logged = 0;
        if let Some(handle) = self.logger.take() {
            match handle.join() {
                Ok(Ok(n)) => logged = n,
                Ok(Err(e)) => fail(e),
                Err(_) => fail(PulseError::Panicked("logger".into())),
            }
        }

        for (name, handle) in self.loops.drain(..) {
            if handle.join().is_err() {
                fail(PulseError::Panicked(name));
            }
        }

        if let Some(handle) = self.dispatcher.take() {
            if handle.join().is_err() {
                fail(PulseError::Panicked("notifier".into()));
            }
        }

        let summary = MonitorSummary {
            pulses: self.ctx.counter.snapshot(),
            logged,
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
            dropped_notifications: self.ctx.notifier.dropped(),
        };
        info!(
            pulses = summary.pulses,
            logged = summary.logged,
            dropped_events = summary.dropped_events,
            dropped_notifications = summary.dropped_notifications,
            "Monitor stopped"
        );
        first_error.map_or(Ok(summary), Err)
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if self.poller.is_some() || self.logger.is_some() || !self.loops.is_empty() {
            self.ctx.shutdown.trigger();
            let _ = self.join_all();
        }
    }
}
