//! Signal handling for graceful daemon shutdown.
//!
//! SIGTERM and SIGINT set an atomic flag from an async-signal-safe handler.
//! A small bridge thread polls the flag and triggers the monitor's
//! [`Shutdown`], so every loop sees the request through the same channel.

use crossbeam_channel::RecvTimeoutError;
use pulse_runtime::Shutdown;
use std::sync::atomic::{AtomicI32, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info};

/// How often the bridge thread checks for a delivered signal.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Last signal number delivered, 0 if none.
static RECEIVED: AtomicI32 = AtomicI32::new(0);

/// Signals that stop the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    /// SIGTERM - Graceful termination request.
    Terminate,
    /// SIGINT - Interrupt (Ctrl+C).
    Interrupt,
}

impl SignalKind {
    fn from_raw(signal: i32) -> Option<Self> {
        match signal {
            libc::SIGTERM => Some(Self::Terminate),
            libc::SIGINT => Some(Self::Interrupt),
            _ => None,
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Terminate => write!(f, "SIGTERM"),
            SignalKind::Interrupt => write!(f, "SIGINT"),
        }
    }
}

extern "C" fn on_signal(signal: libc::c_int) {
    RECEIVED.store(signal, Ordering::Relaxed);
}

/// Installed handlers plus the thread bridging them into a [`Shutdown`].
#[derive(Debug)]
pub struct SignalBridge {
    shutdown: Shutdown,
    handle: Option<JoinHandle<Option<SignalKind>>>,
}

impl SignalBridge {
    /// Install SIGTERM/SIGINT handlers that trigger `shutdown`.
    pub fn install(shutdown: &Shutdown) -> std::io::Result<Self> {
        for signal in [libc::SIGTERM, libc::SIGINT] {
            #[allow(unsafe_code)]
            // SAFETY: the handler only stores to an atomic, which is async-signal-safe.
            let previous = unsafe { libc::signal(signal, on_signal as libc::sighandler_t) };
            if previous == libc::SIG_ERR {
                return Err(std::io::Error::last_os_error());
            }
        }
        debug!("Signal handlers registered");

        let watched = shutdown.clone();
        let handle = thread::Builder::new()
            .name("pulse-signals".into())
            .spawn(move || bridge(&watched))?;
        Ok(Self {
            shutdown: shutdown.clone(),
            handle: Some(handle),
        })
    }

    /// Stop the bridge thread. Returns the signal that caused shutdown, if any.
    pub fn stop(mut self) -> Option<SignalKind> {
        self.shutdown.trigger();
        self.handle.take().and_then(|h| h.join().ok()).flatten()
    }
}

fn bridge(shutdown: &Shutdown) -> Option<SignalKind> {
    loop {
        let raw = RECEIVED.swap(0, Ordering::Relaxed);
        if let Some(kind) = SignalKind::from_raw(raw) {
            info!(signal = %kind, "Shutdown signal received");
            shutdown.trigger();
            return Some(kind);
        }
        if let Err(RecvTimeoutError::Disconnected) =
            shutdown.receiver().recv_timeout(POLL_INTERVAL)
        {
            return None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_kind_mapping() {
        assert_eq!(SignalKind::from_raw(libc::SIGTERM), Some(SignalKind::Terminate));
        assert_eq!(SignalKind::from_raw(libc::SIGINT), Some(SignalKind::Interrupt));
        assert_eq!(SignalKind::from_raw(0), None);
        assert_eq!(SignalKind::Terminate.to_string(), "SIGTERM");
    }

    // One test, since the delivered-signal flag is process-wide.
    #[test]
    fn test_bridge() {
        let shutdown = Shutdown::new();
        let installed = SignalBridge::install(&shutdown).unwrap();
        shutdown.trigger();
        assert_eq!(installed.stop(), None);

        let shutdown = Shutdown::new();
        RECEIVED.store(libc::SIGTERM, Ordering::Relaxed);
        assert_eq!(bridge(&shutdown), Some(SignalKind::Terminate));
        assert!(shutdown.is_triggered());
    }
}
