//! Configuration structures for the pulse monitor.
//!
//! Supports TOML deserialization with sensible defaults for
//! development and explicit values for production deployment.

use crate::time::{DailySchedule, TimeOfDay};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

/// Top-level monitor configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Interval between samples of the meter input.
    #[serde(with = "humantime_serde")]
    pub polling_interval: Duration,

    /// How long the input must stay closed before a pulse is counted.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,

    /// Append-only binary log of pulse timestamps.
    pub timestamp_log: PathBuf,

    /// Volume represented by a single meter pulse.
    pub volume_per_pulse: u64,

    /// Unit used when reporting volume (e.g. "gallons").
    pub volume_unit: String,

    /// Confirmed-pulse queue between the poller and the logger.
    pub queue: QueueConfig,

    /// Meter input.
    pub input: InputConfig,

    /// Rate, idle and leak alerts.
    pub alerts: AlertConfig,

    /// Daily usage report.
    pub daily: DailyConfig,

    /// Outputs that replay confirmed pulses (relays, open-collector outputs).
    pub outputs: Vec<OutputConfig>,

    /// Notification dispatch.
    pub notify: NotifyConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            polling_interval: Duration::from_millis(10),
            debounce: Duration::from_millis(100),
            timestamp_log: PathBuf::from("pulse-timestamps.bin"),
            volume_per_pulse: 10,
            volume_unit: String::from("gallons"),
            queue: QueueConfig::default(),
            input: InputConfig::default(),
            alerts: AlertConfig::default(),
            daily: DailyConfig::default(),
            outputs: Vec::new(),
            notify: NotifyConfig::default(),
        }
    }
}

/// What the poller does when the confirmed-pulse queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the timestamp; the pulse is still counted.
    #[default]
    Drop,
    /// Stall sampling until the logger frees a slot.
    Block,
}

/// Confirmed-pulse queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of undrained timestamps.
    pub capacity: usize,
    /// Behavior when `capacity` is reached.
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::Drop,
        }
    }
}

/// Supported digital I/O drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IoDriver {
    /// In-memory I/O for testing and dry runs.
    #[default]
    Simulated,
    /// Linux sysfs GPIO value files (pin exported by the OS).
    Sysfs,
}

/// Meter input configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Driver used to read the input.
    pub driver: IoDriver,
    /// GPIO number.
    pub pin: u32,
    /// Explicit value file, overriding the sysfs path derived from `pin`.
    pub path: Option<PathBuf>,
    /// Treat a low level as "closed".
    pub active_low: bool,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            driver: IoDriver::Simulated,
            pin: 0,
            path: None,
            active_low: false,
        }
    }
}

impl InputConfig {
    /// Path of the sysfs value file for this input.
    #[must_use]
    pub fn value_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| sysfs_value_path(self.pin))
    }
}

/// Pulse replay output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Name used in logs.
    pub name: String,
    /// Driver used to drive the output.
    pub driver: IoDriver,
    /// GPIO number.
    pub pin: u32,
    /// Explicit value file, overriding the sysfs path derived from `pin`.
    pub path: Option<PathBuf>,
    /// Drive the pin low when active.
    pub active_low: bool,
    /// How long the output is held active per pulse.
    #[serde(with = "humantime_serde")]
    pub hold: Duration,
    /// Gap after deactivation before the next pulse is replayed.
    #[serde(with = "humantime_serde")]
    pub release: Duration,
    /// How often the counter is checked for new pulses.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            name: String::from("relay"),
            driver: IoDriver::Simulated,
            pin: 0,
            path: None,
            active_low: false,
            hold: Duration::from_millis(400),
            release: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl OutputConfig {
    /// Path of the sysfs value file for this output.
    #[must_use]
    pub fn value_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(|| sysfs_value_path(self.pin))
    }
}

fn sysfs_value_path(pin: u32) -> PathBuf {
    PathBuf::from(format!("/sys/class/gpio/gpio{pin}/value"))
}

/// Alert policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertConfig {
    /// Subject used for alert notifications.
    pub subject: String,
    /// Window over which the pulse rate is measured.
    #[serde(with = "humantime_serde")]
    pub rate_interval: Duration,
    /// Alert when more than this many pulses arrive in one rate window.
    pub rate_threshold: u64,
    /// Alert when no pulse arrives for this long.
    #[serde(with = "humantime_serde")]
    pub idle_interval: Duration,
    /// Alert when no idle period has been seen for this long.
    #[serde(with = "humantime_serde")]
    pub leak_interval: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            subject: String::from("pulsemon alert"),
            rate_interval: Duration::from_secs(3600),
            rate_threshold: 50,
            idle_interval: Duration::from_secs(6 * 3600),
            leak_interval: Duration::from_secs(48 * 3600),
        }
    }
}

/// Daily usage report configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyConfig {
    /// Enable the daily report.
    pub enabled: bool,
    /// Local time of day at which the report is sent.
    pub time: TimeOfDay,
    /// Shift applied to `time` while daylight-saving time is in effect
    /// (signed, e.g. "-1h").
    #[serde(with = "signed_duration_serde")]
    pub dst_adjustment: TimeDelta,
    /// Subject prefix used for status notifications.
    pub subject: String,
}

impl Default for DailyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            time: TimeOfDay::from_hm(7, 0).unwrap_or_default(),
            dst_adjustment: TimeDelta::zero(),
            subject: String::from("pulsemon status"),
        }
    }
}

impl DailyConfig {
    /// The report schedule.
    #[must_use]
    pub fn schedule(&self) -> DailySchedule {
        DailySchedule::new(self.time, self.dst_adjustment)
    }
}

/// Notification dispatch configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Messages that may wait for delivery before new ones are dropped.
    pub queue_capacity: usize,
    /// Send a status notification when the monitor starts.
    pub announce_start: bool,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 64,
            announce_start: true,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config = Self::from_toml(&content).inspect_err(|e| {
            warn!(path = %path.display(), error = %e, "Rejected configuration file");
        })?;
        debug!(
            path = %path.display(),
            outputs = config.outputs.len(),
            debounce_count = config.debounce_count(),
            "Configuration file parsed"
        );
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(ConfigError::Parse)
    }

    /// Serialize configuration to TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Number of consecutive closed samples that confirm a pulse.
    #[must_use]
    pub fn debounce_count(&self) -> i64 {
        if self.polling_interval.is_zero() {
            return 0;
        }
        i64::try_from(self.debounce.as_nanos() / self.polling_interval.as_nanos())
            .unwrap_or(i64::MAX)
    }

    /// Check invariants that the file format cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.polling_interval.is_zero() {
            return invalid("polling_interval must be greater than zero".into());
        }
        if self.debounce_count() < 1 {
            return invalid(format!(
                "debounce ({:?}) must be at least one polling_interval ({:?})",
                self.debounce, self.polling_interval
            ));
        }
        if self.timestamp_log.as_os_str().is_empty() {
            return invalid("timestamp_log must not be empty".into());
        }
        if self.queue.capacity == 0 {
            return invalid("queue.capacity must be greater than zero".into());
        }
        if self.notify.queue_capacity == 0 {
            return invalid("notify.queue_capacity must be greater than zero".into());
        }
        for (name, interval) in [
            ("alerts.rate_interval", self.alerts.rate_interval),
            ("alerts.idle_interval", self.alerts.idle_interval),
            ("alerts.leak_interval", self.alerts.leak_interval),
        ] {
            if interval.is_zero() {
                return invalid(format!("{name} must be greater than zero"));
            }
        }
        if self.daily.dst_adjustment.num_hours().abs() >= 24 {
            return invalid("daily.dst_adjustment must be shorter than a day".into());
        }
        for output in &self.outputs {
            if output.poll_interval.is_zero() {
                return invalid(format!(
                    "outputs[{}].poll_interval must be greater than zero",
                    output.name
                ));
            }
            if output.hold.is_zero() {
                return invalid(format!(
                    "outputs[{}].hold must be greater than zero",
                    output.name
                ));
            }
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Semantically invalid configuration.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helper for signed offsets: humantime with an optional leading `-`.
mod signed_duration_serde {
    use chrono::TimeDelta;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(delta: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let (sign, magnitude) = if *delta < TimeDelta::zero() {
            ("-", -*delta)
        } else {
            ("", *delta)
        };
        let magnitude = magnitude.to_std().unwrap_or_default();
        serializer.serialize_str(&format!("{sign}{}", humantime::format_duration(magnitude)))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<TimeDelta, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let s = s.trim();
        let (negative, magnitude) = match s.strip_prefix('-') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };
        let duration = humantime::parse_duration(magnitude).map_err(serde::de::Error::custom)?;
        let delta = TimeDelta::from_std(duration).map_err(serde::de::Error::custom)?;
        Ok(if negative { -delta } else { delta })
    }
}
