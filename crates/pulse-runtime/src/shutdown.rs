//! Process-wide stop signal shared by every loop.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

#[derive(Debug)]
struct ShutdownInner {
    triggered: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

/// Cloneable shutdown token.
///
/// Triggering sets a flag and disconnects an internal channel, so loops
/// blocked in a `select!` on [`receiver`](Self::receiver) wake immediately.
/// Nothing is ever sent on the channel; a receive only returns once the
/// token has been triggered.
#[derive(Debug, Clone)]
pub struct Shutdown {
    inner: Arc<ShutdownInner>,
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Shutdown {
    /// Create an untriggered token.
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = bounded(0);
        Self {
            inner: Arc::new(ShutdownInner {
                triggered: AtomicBool::new(false),
                sender: Mutex::new(Some(sender)),
                receiver,
            }),
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.inner.triggered.swap(true, Ordering::AcqRel) {
            debug!("Shutdown requested");
        }
        self.inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// True once [`trigger`](Self::trigger) has been called.
    #[inline]
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Channel that becomes disconnected on shutdown, for use in `select!`.
    #[must_use]
    pub fn receiver(&self) -> &Receiver<()> {
        &self.inner.receiver
    }

    /// Block the calling thread until shutdown is requested.
    pub fn wait(&self) {
        // Only ever returns Err(Disconnected).
        let _ = self.inner.receiver.recv();
    }
}
