//! Wall-clock helpers for the daily report schedule.
//!
//! Times of day are interpreted in the time zone of the `DateTime` they are
//! compared against (local time in production). The next occurrence is
//! always recomputed from the calendar rather than by adding 24h, so the
//! schedule stays correct across daylight-saving transitions.

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, Offset, TimeDelta, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// A time of day in 24 hour `HH:MM` notation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    /// Create a time of day from hours and minutes.
    #[must_use]
    pub fn from_hm(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    /// The underlying naive time.
    #[must_use]
    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl FromStr for TimeOfDay {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        NaiveTime::parse_from_str(s, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
            .map(Self)
            .map_err(|e| format!("invalid time of day {s:?} (expected HH:MM): {e}"))
    }
}

impl Serialize for TimeOfDay {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TimeOfDay {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Returns true if daylight-saving time is in effect at `at`.
///
/// The zone's standard offset is taken to be the smaller of its January and
/// July offsets; zones that never change offset are never in DST.
pub fn is_dst<Tz: TimeZone>(at: &DateTime<Tz>) -> bool {
    let tz = at.timezone();
    let year = at.year();
    let offset_in = |month: u32| {
        tz.with_ymd_and_hms(year, month, 1, 12, 0, 0)
            .earliest()
            .map(|dt| dt.offset().fix().local_minus_utc())
    };
    let (Some(jan), Some(jul)) = (offset_in(1), offset_in(7)) else {
        return false;
    };
    if jan == jul {
        return false;
    }
    at.offset().fix().local_minus_utc() > jan.min(jul)
}

/// Resolve a local wall-clock time, stepping over a DST gap if needed.
fn resolve_local<Tz: TimeZone>(tz: &Tz, local: NaiveDateTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + TimeDelta::hours(1))).earliest())
}

/// The next instant strictly after `now` whose wall-clock time is `target`.
pub fn next_occurrence<Tz: TimeZone>(now: &DateTime<Tz>, target: NaiveTime) -> DateTime<Tz> {
    let tz = now.timezone();
    let mut date = now.date_naive();
    // Two days ahead is always enough; the third iteration only guards
    // against a zone skipping an entire calendar day.
    for _ in 0..3 {
        if let Some(candidate) = resolve_local(&tz, date.and_time(target)) {
            if candidate > *now {
                return candidate;
            }
        }
        match date.succ_opt() {
            Some(next) => date = next,
            None => break,
        }
    }
    now.clone() + TimeDelta::days(1)
}

/// Duration from `now` until the next occurrence of `target`.
///
/// A target that has already passed today wraps to tomorrow.
pub fn duration_until<Tz: TimeZone>(now: &DateTime<Tz>, target: NaiveTime) -> Duration {
    (next_occurrence(now, target) - now.clone())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Daily report schedule: a wall-clock time plus a daylight-saving adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    /// Nominal time of day.
    pub time: TimeOfDay,
    /// Shift applied to `time` while DST is in effect.
    pub dst_adjustment: TimeDelta,
}

impl DailySchedule {
    /// Create a schedule.
    #[must_use]
    pub fn new(time: TimeOfDay, dst_adjustment: TimeDelta) -> Self {
        Self {
            time,
            dst_adjustment,
        }
    }

    /// Wall-clock target for a report computed at `now`.
    pub fn target_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> NaiveTime {
        if is_dst(now) {
            self.time.as_naive().overflowing_add_signed(self.dst_adjustment).0
        } else {
            self.time.as_naive()
        }
    }

    /// The next report instant and the delay until it.
    pub fn next_from<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> (DateTime<Tz>, Duration) {
        let at = next_occurrence(now, self.target_at(now));
        let delay = (at.clone() - now.clone()).to_std().unwrap_or(Duration::ZERO);
        (at, delay)
    }
}
