//! Pulse timestamp log.
//!
//! The log is a flat sequence of 8-byte little-endian signed integers, each
//! the nanoseconds since the Unix epoch at which a pulse was confirmed.
//! There is no header, footer or separator; a record's ordinal is its
//! position in the file. The file is only ever appended to and may be read
//! while it grows; a trailing partial record is treated as end-of-stream.
//!
//! - [`TimestampWriter`] appends records
//! - [`TimestampScanner`] decodes them
//! - [`report`] answers range and usage queries and renders them

pub mod report;
pub mod scanner;
pub mod writer;

pub use report::*;
pub use scanner::*;
pub use writer::*;

/// Size in bytes of one encoded timestamp.
pub const RECORD_SIZE: usize = 8;
