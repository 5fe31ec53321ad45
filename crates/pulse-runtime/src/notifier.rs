//! Fire-and-forget notification dispatch.
//!
//! Alert loops must never stall on delivery, so messages go through a small
//! bounded queue to a dedicated thread that owns the sink. A full queue drops
//! the message; failed deliveries are logged and not retried.

use crate::Shutdown;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use pulse_io::{Notification, NotificationSink};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cloneable handle for queueing notifications.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<Notification>,
    alert_subject: String,
    status_subject: String,
    dropped: Arc<AtomicU64>,
}

/// Delivery side of the notification queue.
pub struct Dispatcher {
    rx: Receiver<Notification>,
    sink: Arc<dyn NotificationSink>,
}

/// Create a notifier and the dispatcher that serves it.
#[must_use]
pub fn notification_queue(
    sink: Arc<dyn NotificationSink>,
    capacity: usize,
    alert_subject: impl Into<String>,
    status_subject: impl Into<String>,
) -> (Notifier, Dispatcher) {
    let (tx, rx) = bounded(capacity);
    (
        Notifier {
            tx,
            alert_subject: alert_subject.into(),
            status_subject: status_subject.into(),
            dropped: Arc::new(AtomicU64::new(0)),
        },
        Dispatcher { rx, sink },
    )
}

impl Notifier {
    /// Queue an alert under the configured alert subject.
    pub fn alert(&self, body: impl Into<String>) {
        self.enqueue(self.alert_subject.clone(), body.into());
    }

    /// Queue a status message; `detail` is appended to the status subject.
    pub fn status(&self, detail: Option<&str>, body: impl Into<String>) {
        let subject = match detail {
            Some(detail) => format!("{} {detail}", self.status_subject),
            None => self.status_subject.clone(),
        };
        self.enqueue(subject, body.into());
    }

    fn enqueue(&self, subject: String, body: String) {
        match self.tx.try_send(Notification { subject, body }) {
            Ok(()) => {}
            Err(TrySendError::Full(n)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %n.subject, "Notification queue full, message dropped");
            }
            Err(TrySendError::Disconnected(n)) => {
                debug!(subject = %n.subject, "Notifier stopped, message dropped");
            }
        }
    }

    /// Messages dropped because the queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Dispatcher {
    /// Deliver queued messages until shutdown or until every [`Notifier`] is
    /// gone. Returns the number of successful deliveries.
    ///
    /// Messages still queued at shutdown are abandoned.
    pub fn run(self, shutdown: &Shutdown) -> u64 {
        debug!("Notification dispatcher started");
        let mut delivered = 0u64;
        loop {
            select! {
                recv(self.rx) -> msg => match msg {
                    Ok(n) => {
                        if self.deliver(&n) {
                            delivered += 1;
                        }
                    }
                    Err(_) => break,
                },
                recv(shutdown.receiver()) -> _ => break,
            }
        }
        let abandoned = self.rx.len();
        if abandoned > 0 {
            info!(abandoned, "Pending notifications abandoned at shutdown");
        }
        debug!(delivered, "Notification dispatcher stopped");
        delivered
    }

    fn deliver(&self, n: &Notification) -> bool {
        match self.sink.send(&n.subject, &n.body) {
            Ok(()) => {
                debug!(subject = %n.subject, "Notification sent");
                true
            }
            Err(e) => {
                warn!(subject = %n.subject, error = %e, "Notification failed");
                false
            }
        }
    }
}
