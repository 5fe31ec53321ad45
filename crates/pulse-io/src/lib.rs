//! I/O plane abstractions for the pulse monitor.
//!
//! This crate provides:
//! - [`DigitalInput`] / [`DigitalOutput`] traits for the meter input and replay outputs
//! - [`NotificationSink`] trait for alert and status delivery
//! - [`simulated`] in-memory drivers for tests and dry runs
//! - [`sysfs`] Linux GPIO value-file drivers
//! - [`notify`] sinks that log or record notifications

pub mod notify;
pub mod simulated;
pub mod sysfs;

pub use notify::*;
pub use simulated::*;
pub use sysfs::*;

use pulse_common::config::{InputConfig, IoDriver, OutputConfig};
use pulse_common::PulseResult;
use std::fmt;
use tracing::info;

/// Electrical state of a switch input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Circuit open (no current flowing).
    Open,
    /// Circuit closed (meter contact made).
    Closed,
}

impl Level {
    /// True for [`Level::Closed`].
    #[must_use]
    pub fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Digital input abstraction.
///
/// Reads are expected to be fast and synchronous; the poller samples the
/// input once per polling interval. An error means the hardware can no
/// longer be trusted and is treated as fatal by the caller.
pub trait DigitalInput: Send {
    /// Sample the current level.
    fn read(&mut self) -> PulseResult<Level>;
}

/// Digital output abstraction.
pub trait DigitalOutput: Send {
    /// Drive the output active (`true`) or inactive (`false`).
    fn set_active(&mut self, active: bool) -> PulseResult<()>;
}

/// Opaque notification delivery (email, chat, log).
///
/// Implementations may block; callers dispatch from a dedicated thread.
pub trait NotificationSink: Send + Sync {
    /// Deliver one message.
    fn send(&self, subject: &str, body: &str) -> PulseResult<()>;
}

impl<T: DigitalInput + ?Sized> DigitalInput for Box<T> {
    fn read(&mut self) -> PulseResult<Level> {
        (**self).read()
    }
}

impl<T: DigitalOutput + ?Sized> DigitalOutput for Box<T> {
    fn set_active(&mut self, active: bool) -> PulseResult<()> {
        (**self).set_active(active)
    }
}

/// Create the meter input described by the configuration.
pub fn open_input(config: &InputConfig) -> PulseResult<Box<dyn DigitalInput>> {
    match config.driver {
        IoDriver::Simulated => {
            info!("Using simulated meter input");
            Ok(Box::new(SimulatedInput::new()))
        }
        IoDriver::Sysfs => {
            let input = SysfsInput::open(config.value_path(), config.active_low)?;
            info!(path = %input.path().display(), active_low = config.active_low, "Using sysfs meter input");
            Ok(Box::new(input))
        }
    }
}

/// Create a replay output described by the configuration.
pub fn open_output(config: &OutputConfig) -> PulseResult<Box<dyn DigitalOutput>> {
    match config.driver {
        IoDriver::Simulated => {
            info!(output = %config.name, "Using simulated output");
            Ok(Box::new(SimulatedOutput::new()))
        }
        IoDriver::Sysfs => {
            let output = SysfsOutput::open(config.value_path(), config.active_low)?;
            info!(output = %config.name, path = %output.path().display(), "Using sysfs output");
            Ok(Box::new(output))
        }
    }
}
