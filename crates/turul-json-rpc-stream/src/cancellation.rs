//! Cooperative cancellation and deadlines for outbound calls.
//!
//! Cancelling a call only stops the caller from waiting. Work already sent
//! to the peer keeps running there, and a late reply is discarded.

use std::future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, sleep_until};

use crate::error::ClientError;

const DEFAULT_CAUSE: &str = "cancelled by caller";

/// A cooperative cancellation handle carrying the cause of cancellation.
///
/// Clones share state, so the caller can keep one copy and hand another to
/// a [`CallContext`].
#[derive(Clone, Debug)]
pub struct CancellationHandle {
    tx: watch::Sender<Option<String>>,
    rx: watch::Receiver<Option<String>>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self { tx, rx }
    }

    /// Signal cancellation with a default cause
    pub fn cancel(&self) {
        self.cancel_with(DEFAULT_CAUSE);
    }

    /// Signal cancellation. The first cause wins; later calls are no-ops.
    pub fn cancel_with(&self, cause: impl Into<String>) {
        let cause = cause.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(cause);
            true
        });
    }

    pub fn is_cancelled(&self) -> bool {
        self.rx.borrow().is_some()
    }

    /// The cause, if cancelled
    pub fn cause(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Wait until cancellation is requested and return its cause.
    ///
    /// Returns immediately if already cancelled.
    pub async fn cancelled(&self) -> String {
        let mut rx = self.rx.clone();
        loop {
            if let Some(cause) = rx.borrow_and_update().clone() {
                return cause;
            }
            if rx.changed().await.is_err() {
                return DEFAULT_CAUSE.to_string();
            }
        }
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Deadline and cancellation signal for one call
#[derive(Clone, Debug, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancellation: Option<CancellationHandle>,
}

impl CallContext {
    /// No deadline, not cancellable
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().deadline(Instant::now() + timeout)
    }

    pub fn with_cancellation(handle: CancellationHandle) -> Self {
        Self::new().cancellation(handle)
    }

    pub fn deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancellation(mut self, handle: CancellationHandle) -> Self {
        self.cancellation = Some(handle);
        self
    }

    /// Fail fast if the context is already done
    pub(crate) fn check(&self) -> Result<(), ClientError> {
        if let Some(cause) = self.cancellation.as_ref().and_then(CancellationHandle::cause) {
            return Err(ClientError::Cancelled(cause));
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(ClientError::DeadlineExceeded);
        }
        Ok(())
    }

    /// Resolves once the context is cancelled or its deadline passes;
    /// never resolves for a plain context.
    pub(crate) async fn done(&self) -> ClientError {
        let cancelled = async {
            match &self.cancellation {
                Some(handle) => handle.cancelled().await,
                None => future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => future::pending().await,
            }
        };

        tokio::select! {
            cause = cancelled => ClientError::Cancelled(cause),
            _ = expired => ClientError::DeadlineExceeded,
        }
    }
}
