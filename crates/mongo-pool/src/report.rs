//! Asynchronous error reporting channel.
//!
//! Failures that happen off the synchronous return path (background tasks,
//! caller-supplied work units) are forwarded here. Delivery never blocks:
//! when the buffer is full or the subscriber is gone, the error is logged
//! and dropped.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::PoolError;

/// Sending half of the error channel.
///
/// Cloneable; handed to caller-supplied work units by the task runner.
#[derive(Debug, Clone)]
pub struct ErrorReporter {
    tx: mpsc::Sender<PoolError>,
}

impl ErrorReporter {
    /// Report an error without blocking.
    pub fn report(&self, error: PoolError) {
        match self.tx.try_send(error) {
            Ok(()) => {}
            Err(TrySendError::Full(error)) => {
                tracing::warn!(error = %error, "error channel full, dropping report");
            }
            Err(TrySendError::Closed(error)) => {
                tracing::debug!(error = %error, "error channel closed, dropping report");
            }
        }
    }
}

/// Receiving half of the error channel, handed out at pool construction.
#[derive(Debug)]
pub struct ErrorStream {
    rx: mpsc::Receiver<PoolError>,
}

impl ErrorStream {
    /// Receive the next reported error.
    ///
    /// Returns `None` once the pool and every reporter are gone.
    pub async fn recv(&mut self) -> Option<PoolError> {
        self.rx.recv().await
    }

    /// Take a buffered error if one is immediately available.
    pub fn try_recv(&mut self) -> Option<PoolError> {
        self.rx.try_recv().ok()
    }
}

pub(crate) fn channel(capacity: usize) -> (ErrorReporter, ErrorStream) {
    let (tx, rx) = mpsc::channel(capacity);
    (ErrorReporter { tx }, ErrorStream { rx })
}
