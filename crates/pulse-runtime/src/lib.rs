#![doc = "Monitor runtime: one thread per periodic loop around a shared pulse counter."]

pub mod alerts;
pub mod clock;
pub mod counter;
pub mod debounce;
pub mod forwarder;
pub mod logger;
pub mod monitor;
pub mod notifier;
pub mod shutdown;
#[cfg(any(test, feature = "test-helpers"))]
pub mod testing;

pub use alerts::*;
pub use clock::*;
pub use counter::*;
pub use debounce::*;
pub use forwarder::*;
pub use logger::*;
pub use monitor::*;
pub use notifier::*;
pub use shutdown::*;
