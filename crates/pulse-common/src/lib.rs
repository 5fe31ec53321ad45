#![doc = "Common types shared across the pulsemon workspace."]

pub mod config;
pub mod error;
pub mod time;

pub use config::*;
pub use error::*;
pub use time::*;
