use crate::error::{Result, StoreError};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation signal plus optional deadline carried through every call
///
/// Cloning shares the same token. Derived contexts get a child token, so
/// cancelling a parent cancels all of its children but not the reverse.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl RequestContext {
    /// A root context with no deadline
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child context that expires after `timeout`, never later than the parent
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => existing,
            _ => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline: Some(deadline),
        }
    }

    /// Derive a child context, applying `timeout` only if no deadline is set yet
    pub fn with_default_timeout(&self, timeout: Duration) -> Self {
        match self.deadline {
            Some(_) => Self {
                token: self.token.child_token(),
                deadline: self.deadline,
            },
            None => self.with_timeout(timeout),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left until the deadline, if any
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Cancel this context and every context derived from it
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.err().is_some()
    }

    /// The cancellation error, if the context is already done
    pub fn err(&self) -> Option<StoreError> {
        if self.token.is_cancelled() {
            return Some(StoreError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(StoreError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes
    pub async fn done(&self) -> StoreError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => StoreError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => StoreError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                StoreError::Cancelled
            }
        }
    }

    /// Run `fut` until it completes or the context is done, whichever comes first
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            result = fut => result,
        }
    }
}
