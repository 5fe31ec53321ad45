//! Alert policies and the loops that run them.
//!
//! Each policy is a small state machine over counter snapshots. The loops
//! run independently on their own schedules and share nothing but the
//! counter and the idle marker.

use crate::MonitorContext;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use humantime::format_duration;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fires when more than `threshold` pulses arrive in one tick.
#[derive(Debug, Clone, Copy)]
pub struct RateAlert {
    threshold: u64,
    last: u64,
}

impl RateAlert {
    /// Create a policy starting from counter value `start`.
    #[must_use]
    pub fn new(threshold: u64, start: u64) -> Self {
        Self {
            threshold,
            last: start,
        }
    }

    /// Returns the pulse count for the tick if it exceeds the threshold.
    pub fn check(&mut self, snapshot: u64) -> Option<u64> {
        let diff = snapshot.saturating_sub(self.last);
        self.last = snapshot;
        (diff > self.threshold).then_some(diff)
    }
}

/// Fires on every tick without a pulse.
#[derive(Debug, Clone, Copy)]
pub struct IdleAlert {
    last: u64,
}

impl IdleAlert {
    /// Create a policy starting from counter value `start`.
    #[must_use]
    pub fn new(start: u64) -> Self {
        Self { last: start }
    }

    /// True if the counter has not moved since the previous tick.
    pub fn check(&mut self, snapshot: u64) -> bool {
        let idle = snapshot == self.last;
        self.last = snapshot;
        idle
    }
}

const NO_IDLE: i64 = i64::MIN;

/// Time of the most recent idle tick, shared between the idle and leak loops.
#[derive(Debug, Clone)]
pub struct IdleMarker {
    nanos: Arc<AtomicI64>,
}

impl Default for IdleMarker {
    fn default() -> Self {
        Self {
            nanos: Arc::new(AtomicI64::new(NO_IDLE)),
        }
    }
}

impl IdleMarker {
    /// Create a marker with no idle tick recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an idle tick at `at`.
    pub fn record(&self, at: DateTime<Utc>) {
        if let Some(nanos) = at.timestamp_nanos_opt() {
            self.nanos.fetch_max(nanos, Ordering::AcqRel);
        }
    }

    /// The latest recorded idle tick.
    #[must_use]
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        match self.nanos.load(Ordering::Acquire) {
            NO_IDLE => None,
            nanos => Some(Utc.timestamp_nanos(nanos)),
        }
    }
}

/// Fires when no idle tick has been seen for a whole leak interval.
#[derive(Debug, Clone, Copy)]
pub struct LeakAlert {
    interval: TimeDelta,
    window_start: DateTime<Utc>,
}

impl LeakAlert {
    /// Create a policy whose first window opens at `start`.
    #[must_use]
    pub fn new(interval: Duration, start: DateTime<Utc>) -> Self {
        Self {
            interval: TimeDelta::from_std(interval).unwrap_or(TimeDelta::MAX),
            window_start: start,
        }
    }

    /// Evaluate at `now` given the latest idle tick. Fires at most once per
    /// window; firing opens a new window at `now`.
    pub fn check(&mut self, now: DateTime<Utc>, last_idle: Option<DateTime<Utc>>) -> bool {
        if let Some(idle) = last_idle {
            self.window_start = self.window_start.max(idle);
        }
        if now - self.window_start >= self.interval {
            self.window_start = now;
            true
        } else {
            false
        }
    }

    /// Start of the current window.
    #[must_use]
    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }
}

/// Usage since the previous daily report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyUsage {
    /// Pulses counted in the period.
    pub pulses: u64,
    /// Length of the period rounded to the nearest minute.
    pub elapsed: Duration,
}

/// Counter checkpoint for the daily report.
#[derive(Debug, Clone, Copy)]
pub struct DailyReport {
    last: u64,
    last_at: DateTime<Utc>,
}

impl DailyReport {
    /// Start the first period at `start`, counter value `snapshot`.
    #[must_use]
    pub fn new(snapshot: u64, start: DateTime<Utc>) -> Self {
        Self {
            last: snapshot,
            last_at: start,
        }
    }

    /// Close the current period and start the next one.
    pub fn summarize(&mut self, snapshot: u64, now: DateTime<Utc>) -> DailyUsage {
        let pulses = snapshot.saturating_sub(self.last);
        let elapsed = (now - self.last_at).to_std().unwrap_or(Duration::ZERO);
        self.last = snapshot;
        self.last_at = now;
        DailyUsage {
            pulses,
            elapsed: round_to_minute(elapsed),
        }
    }
}

fn round_to_minute(d: Duration) -> Duration {
    Duration::from_secs((d.as_secs() + 30) / 60 * 60)
}

/// Rate alert loop.
pub fn run_rate_alert(ctx: &MonitorContext) {
    let cfg = &ctx.config.alerts;
    let mut policy = RateAlert::new(cfg.rate_threshold, ctx.counter.snapshot());
    info!(
        interval = %format_duration(cfg.rate_interval),
        threshold = cfg.rate_threshold,
        "Rate alert started"
    );
    while ctx.clock.sleep(cfg.rate_interval, &ctx.shutdown) {
        let Some(pulses) = policy.check(ctx.counter.snapshot()) else {
            continue;
        };
        warn!(pulses, threshold = cfg.rate_threshold, "Flow rate above threshold");
        ctx.notifier.alert(format!(
            "ALERT: {} over {}: {}",
            ctx.volume(pulses),
            format_duration(cfg.rate_interval),
            ctx.local_now()
        ));
    }
    debug!("Rate alert stopped");
}

/// Idle alert loop. Every idle tick is also recorded in the idle marker.
pub fn run_idle_alert(ctx: &MonitorContext) {
    let cfg = &ctx.config.alerts;
    let mut policy = IdleAlert::new(ctx.counter.snapshot());
    info!(interval = %format_duration(cfg.idle_interval), "Idle alert started");
    while ctx.clock.sleep(cfg.idle_interval, &ctx.shutdown) {
        if !policy.check(ctx.counter.snapshot()) {
            continue;
        }
        ctx.idle_marker.record(ctx.clock.now());
        info!("No flow during idle interval");
        ctx.notifier.alert(format!(
            "ALERT: no flow for {}",
            format_duration(cfg.idle_interval)
        ));
    }
    debug!("Idle alert stopped");
}

/// Leak alert loop. Ticks at the idle cadence, independently of the idle loop.
pub fn run_leak_alert(ctx: &MonitorContext) {
    let cfg = &ctx.config.alerts;
    let mut policy = LeakAlert::new(cfg.leak_interval, ctx.clock.now());
    info!(
        interval = %format_duration(cfg.leak_interval),
        tick = %format_duration(cfg.idle_interval),
        "Leak alert started"
    );
    while ctx.clock.sleep(cfg.idle_interval, &ctx.shutdown) {
        let now = ctx.clock.now();
        if policy.check(now, ctx.idle_marker.latest()) {
            warn!("No idle period within leak interval");
            ctx.notifier.alert(format!(
                "ALERT: POSSIBLE LEAK: no idle period for {}",
                format_duration(cfg.leak_interval)
            ));
        }
    }
    debug!("Leak alert stopped");
}

/// Daily usage report loop.
pub fn run_daily_report(ctx: &MonitorContext) {
    let cfg = &ctx.config.daily;
    if !cfg.enabled {
        debug!("Daily report disabled");
        return;
    }
    let schedule = cfg.schedule();
    let mut report = DailyReport::new(ctx.counter.snapshot(), ctx.clock.now());
    info!(time = %cfg.time, "Daily report started");
    loop {
        let (at, delay) = ctx.zone.next_daily(&schedule, ctx.clock.now());
        debug!(next = %ctx.zone.display(at), "Next daily report scheduled");
        if !ctx.clock.sleep(delay, &ctx.shutdown) {
            break;
        }
        let now = ctx.clock.now();
        let usage = report.summarize(ctx.counter.snapshot(), now);
        let volume = ctx.volume(usage.pulses);
        info!(pulses = usage.pulses, "Daily usage");
        ctx.notifier.status(
            Some(&volume),
            format!(
                "DAILY USAGE: {volume} over {} @ {}",
                format_duration(usage.elapsed),
                ctx.zone.display(now)
            ),
        );
    }
    debug!("Daily report stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ManualClock;
    use crate::{notification_queue, LocalZone, PulseCounter, Shutdown};
    use chrono::FixedOffset;
    use pulse_common::{MonitorConfig, TimeOfDay};
    use pulse_io::RecordingSink;
    use std::thread::{self, JoinHandle};

    const HOUR: Duration = Duration::from_secs(3600);
    const SETTLE: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(100);

    #[test]
    fn test_rate_threshold_boundary() {
        let mut rate = RateAlert::new(50, 0);
        assert_eq!(rate.check(50), None);
        assert_eq!(rate.check(101), Some(51));
        assert_eq!(rate.check(101), None);
    }

    #[test]
    fn test_idle_fires_every_quiet_tick() {
        let mut idle = IdleAlert::new(7);
        assert!(idle.check(7));
        assert!(idle.check(7));
        assert!(!idle.check(8));
        assert!(idle.check(8));
    }

    #[test]
    fn test_idle_marker() {
        let marker = IdleMarker::new();
        assert_eq!(marker.latest(), None);
        let t = Utc.with_ymd_and_hms(2024, 2, 2, 2, 2, 2).unwrap();
        marker.clone().record(t);
        assert_eq!(marker.latest(), Some(t));
        marker.record(t - TimeDelta::hours(1));
        assert_eq!(marker.latest(), Some(t));
    }

    #[test]
    fn test_leak_fires_once_per_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut leak = LeakAlert::new(48 * HOUR, start);
        for h in (6..48).step_by(6) {
            assert!(!leak.check(start + TimeDelta::hours(h), None));
        }
        assert!(leak.check(start + TimeDelta::hours(48), None));
        assert_eq!(leak.window_start(), start + TimeDelta::hours(48));
        assert!(!leak.check(start + TimeDelta::hours(54), None));
    }

    #[test]
    fn test_idle_tick_resets_leak_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut leak = LeakAlert::new(48 * HOUR, start);
        let idle = Some(start + TimeDelta::hours(30));
        assert!(!leak.check(start + TimeDelta::hours(48), idle));
        assert!(!leak.check(start + TimeDelta::hours(72), idle));
        assert!(leak.check(start + TimeDelta::hours(78), idle));
    }

    #[test]
    fn test_daily_summary_rounds_elapsed() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap();
        let mut report = DailyReport::new(10, start);
        let usage = report.summarize(25, start + TimeDelta::seconds(24 * 3600 + 40));
        assert_eq!(usage.pulses, 15);
        assert_eq!(usage.elapsed, Duration::from_secs(24 * 3600 + 60));
    }

    struct Harness {
        ctx: MonitorContext,
        clock: Arc<ManualClock>,
        sink: RecordingSink,
        threads: Vec<JoinHandle<()>>,
    }

    impl Harness {
        fn new(config: MonitorConfig, start: DateTime<Utc>) -> Self {
            let clock = Arc::new(ManualClock::new(start));
            let sink = RecordingSink::new();
            let (notifier, dispatcher) = notification_queue(
                Arc::new(sink.clone()),
                16,
                config.alerts.subject.clone(),
                config.daily.subject.clone(),
            );
            let shutdown = Shutdown::new();
            let ctx = MonitorContext {
                config: Arc::new(config),
                counter: Arc::new(PulseCounter::new()),
                clock: clock.clone(),
                zone: LocalZone::Fixed(FixedOffset::east_opt(0).unwrap()),
                notifier,
                shutdown: shutdown.clone(),
                idle_marker: IdleMarker::new(),
            };
            let dispatch = thread::spawn(move || {
                dispatcher.run(&shutdown);
            });
            Self {
                ctx,
                clock,
                sink,
                threads: vec![dispatch],
            }
        }

        fn spawn(&mut self, f: fn(&MonitorContext)) {
            let ctx = self.ctx.clone();
            self.threads.push(thread::spawn(move || f(&ctx)));
        }

        fn pulses(&self, n: u64) {
            for _ in 0..n {
                self.ctx.counter.increment();
            }
        }

        fn step(&self, by: Duration, sleepers: usize) {
            self.clock.advance(by);
            assert!(self.clock.settle(sleepers, SETTLE));
        }

        fn stop(self) {
            self.ctx.shutdown.trigger();
            for t in self.threads {
                t.join().unwrap();
            }
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_rate_loop_alerts_above_threshold() {
        let mut h = Harness::new(MonitorConfig::default(), start());
        h.spawn(run_rate_alert);
        assert!(h.clock.settle(1, SETTLE));

        h.pulses(50);
        h.step(HOUR, 1);
        assert!(h.sink.wait_for(1, QUIET).is_empty());

        h.pulses(51);
        h.step(HOUR, 1);
        let messages = h.sink.wait_for(1, SETTLE);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, "pulsemon alert");
        assert_eq!(
            messages[0].body,
            "ALERT: 510 gallons over 1h: 2024-01-01 02:00:00 +0000"
        );
        h.stop();
    }

    #[test]
    fn test_idle_and_leak_loops() {
        let mut h = Harness::new(MonitorConfig::default(), start());
        h.spawn(run_idle_alert);
        h.spawn(run_leak_alert);
        assert!(h.clock.settle(2, SETTLE));

        // Steady flow for 48h: no idle ticks, one leak alert at 48h.
        for _ in 0..8 {
            h.pulses(1);
            h.step(6 * HOUR, 2);
        }
        let messages = h.sink.wait_for(1, SETTLE);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, "ALERT: POSSIBLE LEAK: no idle period for 2days");

        // One quiet tick at 54h: idle fires and moves the leak window.
        h.step(6 * HOUR, 2);
        let messages = h.sink.wait_for(2, SETTLE);
        assert_eq!(messages[1].body, "ALERT: no flow for 6h");

        // Flow resumes; the next leak alert is due 48h after the idle tick.
        for _ in 0..7 {
            h.pulses(1);
            h.step(6 * HOUR, 2);
        }
        assert_eq!(h.sink.wait_for(3, QUIET).len(), 2);
        h.pulses(1);
        h.step(6 * HOUR, 2);
        let messages = h.sink.wait_for(3, SETTLE);
        assert_eq!(messages.len(), 3);
        assert!(messages[2].body.contains("POSSIBLE LEAK"));
        h.stop();
    }

    #[test]
    fn test_daily_loop_reports_usage() {
        let mut config = MonitorConfig::default();
        config.daily.time = TimeOfDay::from_hm(10, 0).unwrap();
        let mut h = Harness::new(config, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        h.spawn(run_daily_report);
        assert!(h.clock.settle(1, SETTLE));

        h.pulses(5);
        h.step(HOUR, 1);
        let messages = h.sink.wait_for(1, SETTLE);
        assert_eq!(messages[0].subject, "pulsemon status 50 gallons");
        assert_eq!(
            messages[0].body,
            "DAILY USAGE: 50 gallons over 1h @ 2024-01-01 10:00:00 +0000"
        );

        // Next report a full day later.
        h.step(23 * HOUR, 1);
        assert_eq!(h.sink.wait_for(2, QUIET).len(), 1);
        h.step(HOUR, 1);
        let messages = h.sink.wait_for(2, SETTLE);
        assert_eq!(messages[1].subject, "pulsemon status 0 gallons");
        h.stop();
    }
}
