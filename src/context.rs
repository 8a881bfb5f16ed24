//! Cancellation and deadline propagation for transactional operations

use std::future::pending;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::types::{LedgerError, LedgerResult};

/// Caller-supplied cancellation signal and optional deadline.
///
/// A `Context` is cheap to clone; every clone observes the same signal.
#[derive(Debug, Clone, Default)]
pub struct Context {
    cancel: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

/// Fires the cancellation signal of the contexts created alongside it
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancel every context derived from this handle
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// A context plus the handle that cancels it
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let ctx = Self {
            cancel: Some(receiver),
            deadline: None,
        };
        (ctx, CancelHandle { sender })
    }

    /// Derive a context that expires after `timeout`, keeping any earlier deadline
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, keeping any earlier deadline
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        };
        Self {
            cancel: self.cancel.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The reason this context is done, or `None` while it is still live
    pub fn err(&self) -> Option<LedgerError> {
        if self.cancel.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Some(LedgerError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Some(LedgerError::DeadlineExceeded);
        }
        None
    }

    /// Fail fast if the context is already done
    pub fn check(&self) -> LedgerResult<()> {
        match self.err() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context. A dropped `CancelHandle`
    /// means the context can no longer be cancelled.
    pub async fn done(&self) -> LedgerError {
        let cancelled = async {
            if let Some(rx) = &self.cancel {
                let mut rx = rx.clone();
                if rx.wait_for(|cancelled| *cancelled).await.is_ok() {
                    return;
                }
            }
            pending::<()>().await
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            _ = cancelled => LedgerError::Cancelled,
            _ = expired => LedgerError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(ctx.err().is_none());

        let raced = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(raced.is_err());
    }

    #[tokio::test]
    async fn test_cancel_handle_wakes_done() {
        let (ctx, handle) = Context::with_cancel();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.done().await })
        };

        handle.cancel();
        let reason = waiter.await.unwrap();
        assert!(matches!(reason, LedgerError::Cancelled));
        assert!(matches!(ctx.err(), Some(LedgerError::Cancelled)));
    }

    #[tokio::test]
    async fn test_deadline_expires() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let reason = ctx.done().await;
        assert!(matches!(reason, LedgerError::DeadlineExceeded));
        assert!(ctx.check().is_err());
    }

    #[tokio::test]
    async fn test_derived_deadline_keeps_earlier_one() {
        let parent = Context::background().with_timeout(Duration::from_millis(5));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }
}
