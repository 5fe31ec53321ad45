//! Append side of the timestamp log.

use pulse_common::{PulseError, PulseResult};
use chrono::{DateTime, Utc};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Appends pulse timestamps to a log file.
///
/// Each append is a single 8-byte write to a file opened in append mode.
/// Nothing is buffered in user space and nothing is fsynced.
#[derive(Debug)]
pub struct TimestampWriter {
    file: Option<File>,
    path: PathBuf,
    appended: u64,
}

impl TimestampWriter {
    /// Open or create the log at `path`.
    ///
    /// New files are created with mode 0600 on Unix.
    pub fn open(path: impl AsRef<Path>) -> PulseResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut options = OpenOptions::new();
        options.append(true).create(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let file = options.open(&path).map_err(|e| {
            PulseError::IoError(format!("failed to open {}: {e}", path.display()))
        })?;
        debug!(path = %path.display(), "Timestamp log opened");
        Ok(Self {
            file: Some(file),
            path,
            appended: 0,
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this writer.
    #[must_use]
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Append one timestamp.
    pub fn append(&mut self, timestamp: DateTime<Utc>) -> PulseResult<()> {
        let nanos = timestamp.timestamp_nanos_opt().ok_or_else(|| {
            PulseError::IoError(format!(
                "timestamp {timestamp} cannot be represented in nanoseconds"
            ))
        })?;
        self.append_nanos(nanos)
    }

    /// Append one raw nanosecond value.
    pub fn append_nanos(&mut self, nanos: i64) -> PulseResult<()> {
        let file = self.file.as_mut().ok_or_else(|| {
            PulseError::IoError(format!("{} is closed", self.path.display()))
        })?;
        file.write_all(&nanos.to_le_bytes()).map_err(|e| {
            PulseError::IoError(format!(
                "failed writing/appending to timestamp file {}: {e}",
                self.path.display()
            ))
        })?;
        self.appended += 1;
        Ok(())
    }

    /// Flush and release the file. Further appends fail; repeated calls are no-ops.
    pub fn close(&mut self) -> PulseResult<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().map_err(|e| {
                PulseError::IoError(format!("failed to close {}: {e}", self.path.display()))
            })?;
            debug!(path = %self.path.display(), appended = self.appended, "Timestamp log closed");
        }
        Ok(())
    }

    /// True once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }
}
