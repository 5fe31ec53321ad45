//! Alert, daily report and replay loops driven by a manual clock.

use super::common::{config_in, epoch, parts, real_time, wait_until, ALERT_LOOPS, PATIENCE};
use pulse_common::config::OutputConfig;
use pulse_io::{pulse_train, RecordingSink, SimulatedInput, SimulatedOutput};
use pulse_runtime::testing::ManualClock;
use pulse_runtime::Monitor;
use std::sync::Arc;
use std::time::Duration;

const HOUR: Duration = Duration::from_secs(3600);

#[test]
fn rate_daily_and_idle_notifications() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.polling_interval = Duration::from_millis(1);
    config.debounce = Duration::from_millis(3);

    let input = SimulatedInput::new();
    let sink = RecordingSink::new();
    let clock = Arc::new(ManualClock::new(epoch()));
    let monitor = Monitor::start(
        config,
        parts(input.clone(), sink.clone(), clock.clone(), real_time()),
    )
    .unwrap();
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));

    let hello = sink.wait_for(1, PATIENCE);
    assert_eq!(hello[0].subject, "pulsemon status");
    assert!(hello[0].body.contains("next daily report at 2024-01-01 07:00:00 +0000"));

    // 60 pulses in the first hour: above the default threshold of 50.
    input.push_samples(pulse_train(60, 6, 3));
    let counter = monitor.counter();
    assert!(wait_until(PATIENCE, || counter.snapshot() == 60));

    clock.advance(HOUR);
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));
    let messages = sink.wait_for(2, PATIENCE);
    assert_eq!(messages[1].subject, "pulsemon alert");
    assert_eq!(
        messages[1].body,
        "ALERT: 600 gallons over 1h: 2024-01-01 01:00:00 +0000"
    );

    // 06:00: flow was seen during the first idle window, so no idle alert.
    clock.advance(5 * HOUR);
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));

    // 07:00: daily report.
    clock.advance(HOUR);
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));
    let messages = sink.wait_for(3, PATIENCE);
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2].subject, "pulsemon status 600 gallons");
    assert_eq!(
        messages[2].body,
        "DAILY USAGE: 600 gallons over 7h @ 2024-01-01 07:00:00 +0000"
    );

    // 12:00: a whole idle window without flow.
    clock.advance(5 * HOUR);
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));
    let messages = sink.wait_for(4, PATIENCE);
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[3].body, "ALERT: no flow for 6h");

    let summary = monitor.stop().unwrap();
    assert_eq!(summary.pulses, 60);
    assert_eq!(summary.logged, 60);
}

#[test]
fn replay_output_follows_counter() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.polling_interval = Duration::from_millis(1);
    config.debounce = Duration::from_millis(3);
    config.notify.announce_start = false;
    config.outputs.push(OutputConfig {
        name: String::from("relay"),
        ..OutputConfig::default()
    });

    let input = SimulatedInput::new();
    let output = SimulatedOutput::new();
    let clock = Arc::new(ManualClock::new(epoch()));
    let mut monitor_parts = parts(input.clone(), RecordingSink::new(), clock.clone(), real_time());
    monitor_parts.outputs.push(Box::new(output.clone()));
    let monitor = Monitor::start(config, monitor_parts).unwrap();
    let loops = ALERT_LOOPS + 1;
    assert!(clock.settle(loops, PATIENCE));

    input.push_samples(pulse_train(3, 6, 3));
    let counter = monitor.counter();
    assert!(wait_until(PATIENCE, || counter.snapshot() == 3));

    assert!(clock.advance_settled(
        Duration::from_millis(1500),
        Duration::from_millis(100),
        loops
    ));
    assert_eq!(output.activations(), 3);
    assert!(!output.is_active());

    monitor.stop().unwrap();
    assert_eq!(output.history().last(), Some(&false));
}

#[test]
fn failing_sink_does_not_stop_monitoring() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.polling_interval = Duration::from_millis(1);
    config.debounce = Duration::from_millis(3);

    let input = SimulatedInput::new();
    let sink = RecordingSink::failing();
    let clock = Arc::new(ManualClock::new(epoch()));
    let monitor = Monitor::start(
        config,
        parts(input.clone(), sink.clone(), clock.clone(), real_time()),
    )
    .unwrap();
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));

    input.push_samples(pulse_train(60, 6, 3));
    let counter = monitor.counter();
    assert!(wait_until(PATIENCE, || counter.snapshot() == 60));
    clock.advance(HOUR);
    assert!(clock.settle(ALERT_LOOPS, PATIENCE));

    // Startup status and the rate alert were both attempted.
    assert_eq!(sink.wait_for(2, PATIENCE).len(), 2);
    let summary = monitor.stop().unwrap();
    assert_eq!(summary.logged, 60);
}
