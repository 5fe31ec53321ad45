//! Read side of the timestamp log.

use crate::RECORD_SIZE;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read};
use std::path::Path;
use tracing::debug;

/// Sequential decoder of timestamp records.
///
/// Yields the raw nanosecond value of each complete record. End of input at
/// a record boundary ends the iteration, as does a trailing partial record
/// (see [`trailing_bytes`](Self::trailing_bytes)). Genuine I/O errors are
/// yielded once, after which the scanner is exhausted.
#[derive(Debug)]
pub struct TimestampScanner<R> {
    reader: R,
    trailing: usize,
    done: bool,
}

impl<R: Read> TimestampScanner<R> {
    /// Scan records from `reader`. Callers should supply a buffered reader.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            trailing: 0,
            done: false,
        }
    }

    /// Bytes of an incomplete final record, if the scan stopped on one.
    #[must_use]
    pub fn trailing_bytes(&self) -> usize {
        self.trailing
    }
}

impl TimestampScanner<BufReader<File>> {
    /// Scan the log file at `path`.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: Read> Iterator for TimestampScanner<R> {
    type Item = io::Result<i64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = [0u8; RECORD_SIZE];
        let mut filled = 0;
        while filled < RECORD_SIZE {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        match filled {
            RECORD_SIZE => Some(Ok(i64::from_le_bytes(buf))),
            0 => {
                self.done = true;
                None
            }
            partial => {
                debug!(bytes = partial, "Ignoring truncated trailing record");
                self.trailing = partial;
                self.done = true;
                None
            }
        }
    }
}
