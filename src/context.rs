//! Cancellation and deadlines for suspending calls.
//!
//! A [`Context`] bundles a shared [`CancelToken`] with an optional deadline.
//! Every call that may wait on the network (resolution, dialing) takes one
//! and returns promptly once it is done.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::{Result, ShortcutError};

/// A token that can be shared across tasks to signal cancellation.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.flag.load(Ordering::Acquire)
    }

    /// Request cancellation and wake every waiter.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // Register before checking the flag so a concurrent cancel()
            // cannot slip between the two.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Cancellation token plus optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancelToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never done unless cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A fresh context that expires after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().timeout(timeout)
    }

    /// A fresh context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::background().deadline_at(deadline)
    }

    /// A context observing an existing token.
    pub fn with_token(token: CancelToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    /// Derive a context sharing this one's token whose deadline is the
    /// earlier of the current one and `now + timeout`.
    pub fn timeout(&self, timeout: Duration) -> Self {
        self.deadline_at(Instant::now() + timeout)
    }

    /// Derive a context sharing this one's token whose deadline is the
    /// earlier of the current one and `deadline`.
    pub fn deadline_at(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) if current <= deadline => current,
            _ => deadline,
        };
        Self {
            token: self.token.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    /// Cancel this context and every context sharing its token.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Why the context is done, or `None` while it is live.
    pub fn err(&self) -> Option<ShortcutError> {
        if self.token.is_cancelled() {
            return Some(ShortcutError::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ShortcutError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Wait until the context is cancelled or its deadline passes, returning
    /// the corresponding error.
    pub async fn done(&self) -> ShortcutError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ShortcutError::Canceled,
                    _ = tokio::time::sleep_until(deadline) => ShortcutError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ShortcutError::Canceled
            }
        }
    }

    /// Drive `fut` until it completes or the context is done, whichever
    /// comes first. A context that is already done never polls `fut`.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output>
    where
        F: Future,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            output = fut => Ok(output),
        }
    }
}
