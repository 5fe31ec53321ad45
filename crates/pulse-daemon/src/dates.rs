//! Command-line date arguments.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

const DATE: &str = "%m-%d-%y";
const DATE_TIME: &str = "%m-%d-%y:%H:%M";

/// Parse `MM-DD-YY` or `MM-DD-YY:HH:MM` in the host's local zone.
pub fn parse_local(text: &str) -> Result<DateTime<Utc>> {
    parse_in(text, &Local)
}

/// Parse `MM-DD-YY` (midnight) or `MM-DD-YY:HH:MM` in `tz`.
pub fn parse_in<Tz: TimeZone>(text: &str, tz: &Tz) -> Result<DateTime<Utc>> {
    let naive = if let Ok(t) = NaiveDateTime::parse_from_str(text, DATE_TIME) {
        t
    } else if let Ok(d) = NaiveDate::parse_from_str(text, DATE) {
        d.and_hms_opt(0, 0, 0)
            .ok_or_else(|| anyhow!("invalid date {text:?}"))?
    } else {
        bail!("invalid date {text:?}, expected MM-DD-YY or MM-DD-YY:HH:MM");
    };
    tz.from_local_datetime(&naive)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("{text:?} does not exist in the local time zone"))
}
