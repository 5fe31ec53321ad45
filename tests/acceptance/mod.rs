//! Whole-monitor scenarios on simulated hardware.
//!
//! The poller runs either on real time or on a stepping clock; every other
//! loop runs on a manual clock the test advances explicitly.

mod alerts_test;
mod common;
mod end_to_end_test;
