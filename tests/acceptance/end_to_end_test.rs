//! Long pulse trains through the full poller, queue and logger path.

use super::common::{config_in, epoch, parts, wait_until, PATIENCE};
use chrono::TimeDelta;
use pulse_io::{pulse_train, RecordingSink, SimulatedInput};
use pulse_log::{read_timestamps, usage_report, TimeRange};
use pulse_runtime::testing::{ManualClock, SteppingClock};
use pulse_runtime::Monitor;
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

const PULSES: usize = 1000;

#[test]
fn thousand_closures_are_counted_and_logged() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    assert_eq!(config.polling_interval, Duration::from_millis(10));
    assert_eq!(config.debounce, Duration::from_millis(100));
    let log_path = config.timestamp_log.clone();

    // Each closure is held for twice the debounce window, then 100ms open.
    let input = SimulatedInput::scripted(pulse_train(PULSES, 20, 10));
    let script = input.clone();
    let monitor = Monitor::start(
        config,
        parts(
            input,
            RecordingSink::new(),
            Arc::new(ManualClock::new(epoch())),
            Arc::new(SteppingClock::new(epoch())),
        ),
    )
    .unwrap();

    let counter = monitor.counter();
    assert!(wait_until(PATIENCE, || script.remaining() == 0));
    assert_eq!(counter.snapshot(), PULSES as u64);

    let summary = monitor.stop().unwrap();
    assert_eq!(summary.pulses, PULSES as u64);
    assert_eq!(summary.logged, PULSES as u64);
    assert_eq!(summary.dropped_events, 0);

    let records = read_timestamps(
        BufReader::new(File::open(&log_path).unwrap()),
        TimeRange::all(),
    )
    .unwrap();
    assert_eq!(records.len(), PULSES);
    for (i, record) in records.iter().enumerate() {
        let i = i64::try_from(i).unwrap();
        assert_eq!(record.ordinal, u64::try_from(i + 1).unwrap());
        // Confirmed on the 10th closed sample of each 30-sample cycle.
        assert_eq!(
            record.time,
            epoch() + TimeDelta::milliseconds(90 + 300 * i)
        );
    }

    // 1000 pulses, 300ms apart, bucketed by minute: 200 per full minute.
    let rows = usage_report(
        BufReader::new(File::open(&log_path).unwrap()),
        TimeRange::all(),
        Duration::from_secs(60),
        10,
    )
    .unwrap();
    assert_eq!(rows.len(), 5);
    assert!(rows.iter().all(|r| r.pulses == 200));
    assert_eq!(rows[4].total_volume, 10_000);
}

#[test]
fn range_query_keeps_file_ordinals() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path());
    let log_path = config.timestamp_log.clone();

    let input = SimulatedInput::scripted(pulse_train(20, 20, 10));
    let script = input.clone();
    let monitor = Monitor::start(
        config,
        parts(
            input,
            RecordingSink::new(),
            Arc::new(ManualClock::new(epoch())),
            Arc::new(SteppingClock::new(epoch())),
        ),
    )
    .unwrap();
    assert!(wait_until(PATIENCE, || script.remaining() == 0));
    monitor.stop().unwrap();

    // Pulses 6..=10 fall between 1.59s and 2.79s.
    let range = TimeRange::new(
        epoch() + TimeDelta::milliseconds(1590),
        epoch() + TimeDelta::milliseconds(2790),
    );
    let records = read_timestamps(BufReader::new(File::open(&log_path).unwrap()), range).unwrap();
    let ordinals: Vec<u64> = records.iter().map(|r| r.ordinal).collect();
    assert_eq!(ordinals, vec![6, 7, 8, 9, 10]);
}
