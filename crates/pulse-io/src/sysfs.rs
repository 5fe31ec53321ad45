//! Linux sysfs GPIO drivers.
//!
//! Pins must already be exported and configured (direction, edge) by the
//! OS; these drivers only read and write the `value` file.

use crate::{DigitalInput, DigitalOutput, Level};
use pulse_common::{PulseError, PulseResult};
use std::fs;
use std::path::{Path, PathBuf};

fn hardware_error(path: &Path, e: &std::io::Error) -> PulseError {
    PulseError::Hardware(format!("{}: {e}", path.display()))
}

/// Meter input backed by a sysfs value file.
#[derive(Debug)]
pub struct SysfsInput {
    path: PathBuf,
    active_low: bool,
}

impl SysfsInput {
    /// Open the value file, failing if it cannot be read.
    pub fn open(path: impl Into<PathBuf>, active_low: bool) -> PulseResult<Self> {
        let mut input = Self {
            path: path.into(),
            active_low,
        };
        input.read()?;
        Ok(input)
    }

    /// Value file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DigitalInput for SysfsInput {
    fn read(&mut self) -> PulseResult<Level> {
        let raw = fs::read_to_string(&self.path).map_err(|e| hardware_error(&self.path, &e))?;
        let high = match raw.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(PulseError::Hardware(format!(
                    "{}: unexpected value {other:?}",
                    self.path.display()
                )))
            }
        };
        Ok(if high != self.active_low {
            Level::Closed
        } else {
            Level::Open
        })
    }
}

/// Replay output backed by a sysfs value file.
#[derive(Debug)]
pub struct SysfsOutput {
    path: PathBuf,
    active_low: bool,
}

impl SysfsOutput {
    /// Open the value file and drive it inactive.
    pub fn open(path: impl Into<PathBuf>, active_low: bool) -> PulseResult<Self> {
        let mut output = Self {
            path: path.into(),
            active_low,
        };
        output.set_active(false)?;
        Ok(output)
    }

    /// Value file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DigitalOutput for SysfsOutput {
    fn set_active(&mut self, active: bool) -> PulseResult<()> {
        let value = if active != self.active_low { "1" } else { "0" };
        fs::write(&self.path, value).map_err(|e| hardware_error(&self.path, &e))
    }
}
