//! Caller-supplied cancellation and deadline for tenancy operations.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::TenancyError;

/// Cancellation signal and optional deadline carried through one logical call.
///
/// The deadline is absolute, so a context reused across the directory lookup,
/// the connection wait and a transaction shares a single time budget.
/// Cloning shares the same token.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    timeout_ms: u64,
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets a deadline `timeout` from now.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Uses the given token as the cancellation signal.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Drives `fut` to completion unless the context is cancelled or its
    /// deadline passes first, in which case `fut` is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::Cancelled`] or [`TenancyError::Timeout`].
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, TenancyError> {
        let guarded = async {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => Err(TenancyError::Cancelled),
                out = fut => Ok(out),
            }
        };

        match self.deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, guarded).await {
                Ok(result) => result,
                Err(_elapsed) => Err(TenancyError::Timeout {
                    timeout_ms: self.timeout_ms,
                }),
            },
            None => guarded.await,
        }
    }
}
