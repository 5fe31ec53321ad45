//! Common utilities for acceptance tests.

#![allow(dead_code)]

use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use pulse_common::MonitorConfig;
use pulse_io::{RecordingSink, SimulatedInput};
use pulse_runtime::testing::ManualClock;
use pulse_runtime::{Clock, LocalZone, MonitorParts, SystemClock};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Loops running on the manual clock with no outputs configured.
pub const ALERT_LOOPS: usize = 4;

/// Generous real-time bound for anything a test waits on.
pub const PATIENCE: Duration = Duration::from_secs(30);

/// Virtual start of every scenario.
pub fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Reports in UTC so message bodies do not depend on the host zone.
pub fn utc_zone() -> LocalZone {
    LocalZone::Fixed(FixedOffset::east_opt(0).unwrap())
}

/// Default configuration logging into `dir`.
pub fn config_in(dir: &Path) -> MonitorConfig {
    MonitorConfig {
        timestamp_log: dir.join("pulses.bin"),
        ..MonitorConfig::default()
    }
}

/// Monitor parts around simulated I/O.
pub fn parts(
    input: SimulatedInput,
    sink: RecordingSink,
    clock: Arc<ManualClock>,
    poll_clock: Arc<dyn Clock>,
) -> MonitorParts {
    MonitorParts {
        input: Box::new(input),
        outputs: Vec::new(),
        sink: Arc::new(sink),
        clock,
        poll_clock,
        zone: utc_zone(),
    }
}

/// Real-time poll clock.
pub fn real_time() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Spin until `condition` holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    condition()
}
