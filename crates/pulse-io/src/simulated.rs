//! In-memory I/O drivers.
//!
//! [`SimulatedInput`] replays a scripted sequence of samples (then holds a
//! steady level) and [`SimulatedOutput`] records every level it is driven
//! to. Both hand out cloneable handles so tests can steer and inspect them
//! while the driver itself is owned by a monitor thread.

use crate::{DigitalInput, DigitalOutput, Level};
use pulse_common::{PulseError, PulseResult};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct InputState {
    script: VecDeque<Level>,
    steady: Level,
    fault: Option<String>,
    reads: u64,
}

/// Simulated meter input.
#[derive(Debug, Clone)]
pub struct SimulatedInput {
    state: Arc<Mutex<InputState>>,
}

impl Default for SimulatedInput {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedInput {
    /// Create an input that reads open forever.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InputState {
                script: VecDeque::new(),
                steady: Level::Open,
                fault: None,
                reads: 0,
            })),
        }
    }

    /// Create an input that replays `samples`, then reads open.
    #[must_use]
    pub fn scripted(samples: impl IntoIterator<Item = Level>) -> Self {
        let input = Self::new();
        input.push_samples(samples);
        input
    }

    /// Queue samples to be returned by subsequent reads.
    pub fn push_samples(&self, samples: impl IntoIterator<Item = Level>) {
        lock(&self.state).script.extend(samples);
    }

    /// Level returned once the script is exhausted.
    pub fn set_level(&self, level: Level) {
        lock(&self.state).steady = level;
    }

    /// Make every following read fail.
    pub fn inject_fault(&self, reason: impl Into<String>) {
        lock(&self.state).fault = Some(reason.into());
    }

    /// Number of scripted samples not yet read.
    #[must_use]
    pub fn remaining(&self) -> usize {
        lock(&self.state).script.len()
    }

    /// Total reads performed.
    #[must_use]
    pub fn reads(&self) -> u64 {
        lock(&self.state).reads
    }
}

impl DigitalInput for SimulatedInput {
    fn read(&mut self) -> PulseResult<Level> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.fault {
            return Err(PulseError::Hardware(reason.clone()));
        }
        state.reads += 1;
        let steady = state.steady;
        Ok(state.script.pop_front().unwrap_or(steady))
    }
}

/// Build a sample script of `pulses` closures.
///
/// Each closure is `closed` samples long and followed by `open` open samples.
#[must_use]
pub fn pulse_train(pulses: usize, closed: usize, open: usize) -> Vec<Level> {
    let mut samples = Vec::with_capacity(pulses * (closed + open));
    for _ in 0..pulses {
        samples.extend(std::iter::repeat(Level::Closed).take(closed));
        samples.extend(std::iter::repeat(Level::Open).take(open));
    }
    samples
}

#[derive(Debug, Default)]
struct OutputState {
    active: bool,
    history: Vec<bool>,
    activations: u64,
    fault: Option<String>,
}

/// Simulated replay output.
#[derive(Debug, Clone, Default)]
pub struct SimulatedOutput {
    state: Arc<Mutex<OutputState>>,
}

impl SimulatedOutput {
    /// Create an inactive output.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current level.
    #[must_use]
    pub fn is_active(&self) -> bool {
        lock(&self.state).active
    }

    /// Number of inactive → active transitions.
    #[must_use]
    pub fn activations(&self) -> u64 {
        lock(&self.state).activations
    }

    /// Every level written, in order.
    #[must_use]
    pub fn history(&self) -> Vec<bool> {
        lock(&self.state).history.clone()
    }

    /// Make every following write fail.
    pub fn inject_fault(&self, reason: impl Into<String>) {
        lock(&self.state).fault = Some(reason.into());
    }
}

impl DigitalOutput for SimulatedOutput {
    fn set_active(&mut self, active: bool) -> PulseResult<()> {
        let mut state = lock(&self.state);
        if let Some(reason) = &state.fault {
            return Err(PulseError::Hardware(reason.clone()));
        }
        if active && !state.active {
            state.activations += 1;
        }
        state.active = active;
        state.history.push(active);
        Ok(())
    }
}
