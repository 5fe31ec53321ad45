//! Queries over a timestamp log and their renderings.
//!
//! Both queries stream the log once. Records outside the requested range are
//! skipped but still consume an ordinal, so a dumped record's ordinal is
//! always its 1-based position in the file.

use crate::TimestampScanner;
use chrono::{DateTime, TimeZone, Utc};
use pulse_common::{PulseError, PulseResult};
use serde::Serialize;
use std::fmt::Display;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::time::Duration;
use tracing::{debug, warn};

/// Name that selects standard input as the log source.
pub const STDIN_SOURCE: &str = "-";

/// Largest usage table [`usage_report`] will build.
///
/// Empty periods between pulses each produce a row, so a short period or a
/// stray far-future record could otherwise grow the table without bound.
pub const MAX_USAGE_ROWS: usize = 100_000;

/// Open a log source by name; `-` reads standard input.
pub fn open_source(name: &str) -> PulseResult<Box<dyn Read>> {
    if name == STDIN_SOURCE {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(name)
        .map_err(|e| PulseError::IoError(format!("failed to open {name}: {e}")))?;
    Ok(Box::new(BufReader::new(file)))
}

/// Inclusive time range filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest instant kept.
    pub start: DateTime<Utc>,
    /// Latest instant kept.
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Range covering `[start, end]`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Range covering every representable timestamp.
    #[must_use]
    pub fn all() -> Self {
        Self {
            start: Utc.timestamp_nanos(i64::MIN),
            end: Utc.timestamp_nanos(i64::MAX),
        }
    }

    /// True if `t` lies inside the range.
    #[must_use]
    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t <= self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self::all()
    }
}

/// One decoded log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimestampRecord {
    /// 1-based position in the log.
    pub ordinal: u64,
    /// Raw nanoseconds since the Unix epoch.
    pub nanos: i64,
    /// Decoded instant.
    pub time: DateTime<Utc>,
}

fn scan_records<R: Read>(
    source: R,
    mut visit: impl FnMut(TimestampRecord),
) -> PulseResult<u64> {
    let mut scanner = TimestampScanner::new(source);
    let mut ordinal = 0u64;
    for nanos in scanner.by_ref() {
        let nanos = nanos.map_err(|e| PulseError::IoError(format!("reading timestamps: {e}")))?;
        ordinal += 1;
        visit(TimestampRecord {
            ordinal,
            nanos,
            time: Utc.timestamp_nanos(nanos),
        });
    }
    if scanner.trailing_bytes() > 0 {
        warn!(
            bytes = scanner.trailing_bytes(),
            after = ordinal,
            "Log ends with a partial record"
        );
    }
    Ok(ordinal)
}

/// Read every record whose time lies in `range`.
pub fn read_timestamps<R: Read>(source: R, range: TimeRange) -> PulseResult<Vec<TimestampRecord>> {
    let mut records = Vec::new();
    let total = scan_records(source, |record| {
        if range.contains(record.time) {
            records.push(record);
        }
    })?;
    debug!(total, selected = records.len(), "Timestamps read");
    Ok(records)
}

/// Pulse count for one reporting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UsageRow {
    /// Instant at which the period ends (inclusive).
    pub period_end: DateTime<Utc>,
    /// Pulses inside the period.
    pub pulses: u64,
    /// `pulses` scaled by the volume per pulse.
    pub volume: u64,
    /// Pulses up to and including this period.
    pub total_pulses: u64,
    /// `total_pulses` scaled by the volume per pulse.
    pub total_volume: u64,
}

/// Round `value` to the nearest multiple of `step`; halfway rounds up.
fn round_to_multiple(value: i128, step: i128) -> i128 {
    let rem = value.rem_euclid(step);
    if rem * 2 >= step {
        value - rem + step
    } else {
        value - rem
    }
}

fn nanos_to_time(nanos: i128) -> PulseResult<DateTime<Utc>> {
    i64::try_from(nanos)
        .map(|n| Utc.timestamp_nanos(n))
        .map_err(|_| PulseError::Config(format!("period end {nanos}ns is out of range")))
}

struct UsageAccumulator {
    period: i128,
    volume_per_pulse: u64,
    period_end: Option<i128>,
    pulses: u64,
    total: u64,
    rows: Vec<UsageRow>,
}

impl UsageAccumulator {
    fn flush(&mut self, end: i128) -> PulseResult<()> {
        self.total += self.pulses;
        self.rows.push(UsageRow {
            period_end: nanos_to_time(end)?,
            pulses: self.pulses,
            volume: self.pulses.saturating_mul(self.volume_per_pulse),
            total_pulses: self.total,
            total_volume: self.total.saturating_mul(self.volume_per_pulse),
        });
        self.pulses = 0;
        Ok(())
    }

    fn add(&mut self, nanos: i64) -> PulseResult<()> {
        let t = i128::from(nanos);
        let mut end = match self.period_end {
            Some(end) => end,
            None => round_to_multiple(t - self.period / 2, self.period) + self.period,
        };
        if t > end {
            // Rows still to emit: the gap periods plus the one holding `t`.
            let pending = (t - end + self.period - 1) / self.period + 1;
            let limit = i128::try_from(MAX_USAGE_ROWS.saturating_sub(self.rows.len()))
                .unwrap_or(i128::MAX);
            if pending > limit {
                warn!(pending = %pending, rows = self.rows.len(), "Usage report too large");
                return Err(PulseError::Config(format!(
                    "usage report would exceed {MAX_USAGE_ROWS} periods; use a longer period or a narrower range"
                )));
            }
        }
        while t > end {
            self.flush(end)?;
            end += self.period;
        }
        self.period_end = Some(end);
        self.pulses += 1;
        Ok(())
    }

    fn finish(mut self) -> PulseResult<Vec<UsageRow>> {
        if let Some(end) = self.period_end {
            self.flush(end)?;
        }
        Ok(self.rows)
    }
}

/// Bucket the pulses in `range` into consecutive periods.
///
/// Periods are aligned to multiples of `period` since the Unix epoch; the
/// first one is the period containing the first selected pulse. Every
/// period up to the last pulse produces a row, empty ones included. A pulse
/// exactly on a period end belongs to that period.
pub fn usage_report<R: Read>(
    source: R,
    range: TimeRange,
    period: Duration,
    volume_per_pulse: u64,
) -> PulseResult<Vec<UsageRow>> {
    let period = i128::try_from(period.as_nanos())
        .ok()
        .filter(|p| *p > 0)
        .ok_or_else(|| PulseError::Config(format!("invalid report period {period:?}")))?;
    let mut acc = UsageAccumulator {
        period,
        volume_per_pulse,
        period_end: None,
        pulses: 0,
        total: 0,
        rows: Vec::new(),
    };
    let mut failure = None;
    scan_records(source, |record| {
        if failure.is_none() && range.contains(record.time) {
            if let Err(e) = acc.add(record.nanos) {
                failure = Some(e);
            }
        }
    })?;
    if let Some(e) = failure {
        return Err(e);
    }
    acc.finish()
}

/// Format an instant for dump output.
fn format_instant<Tz: TimeZone>(t: DateTime<Utc>, tz: &Tz) -> String
where
    Tz::Offset: Display,
{
    t.with_timezone(tz)
        .format("%Y-%m-%d %H:%M:%S%.9f %z")
        .to_string()
}

fn write_error(e: io::Error) -> PulseError {
    PulseError::IoError(format!("writing report: {e}"))
}

/// Write records as tab-separated text with a header line.
pub fn write_timestamps_tsv<W: Write, Tz: TimeZone>(
    out: &mut W,
    records: &[TimestampRecord],
    tz: &Tz,
) -> PulseResult<()>
where
    Tz::Offset: Display,
{
    writeln!(out, "pulse\tnanosecond\ttime").map_err(write_error)?;
    for r in records {
        writeln!(out, "{}\t{}\t{}", r.ordinal, r.nanos, format_instant(r.time, tz))
            .map_err(write_error)?;
    }
    Ok(())
}

/// Write usage rows as tab-separated text with a header line.
///
/// `unit` names the volume columns.
pub fn write_usage_tsv<W: Write, Tz: TimeZone>(
    out: &mut W,
    rows: &[UsageRow],
    unit: &str,
    tz: &Tz,
) -> PulseResult<()>
where
    Tz::Offset: Display,
{
    writeln!(out, "date\tpulses\t{unit}\ttotal-pulses\ttotal-{unit}").map_err(write_error)?;
    for row in rows {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}",
            row.period_end.with_timezone(tz).format("%m/%d/%y:%H:%M"),
            row.pulses,
            row.volume,
            row.total_pulses,
            row.total_volume
        )
        .map_err(write_error)?;
    }
    Ok(())
}

/// Write any serializable report as pretty JSON followed by a newline.
pub fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> PulseResult<()> {
    serde_json::to_writer_pretty(&mut *out, value)
        .map_err(|e| PulseError::IoError(format!("encoding report: {e}")))?;
    writeln!(out).map_err(write_error)
}
