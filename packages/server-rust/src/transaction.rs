//! Scoped transactions on a single tenant connection.
//!
//! [`with_transaction`] opens a driver session, hands it to the caller's work
//! as a [`TenantSession`], and commits only when the work returns `Ok`
//! without aborting. Every other exit (error, abort, panic, cancellation,
//! deadline) rolls back before returning.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tenantry_core::TenantId;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::context::CallContext;
use crate::error::TenancyError;
use crate::observability;
use crate::traits::DatabaseSession;

/// An open transaction on one tenant connection.
///
/// Dropping a session that was neither committed nor rolled back discards
/// its pending work.
pub struct TenantSession {
    inner: Option<Box<dyn DatabaseSession>>,
    connection_id: ConnectionId,
    tenant_id: TenantId,
    session_id: Uuid,
    aborted: Option<String>,
}

impl TenantSession {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Marks the transaction for rollback. The enclosing
    /// [`with_transaction`] then returns [`TenancyError::TransactionAborted`]
    /// even if the work itself returns `Ok`. The first reason wins.
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.aborted.is_none() {
            self.aborted = Some(reason.into());
        }
    }

    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    pub(crate) fn driver(&mut self) -> Result<&mut Box<dyn DatabaseSession>, TenancyError> {
        self.inner
            .as_mut()
            .ok_or_else(|| TenancyError::Storage(anyhow::anyhow!("session already finished")))
    }

    async fn commit(&mut self) -> anyhow::Result<()> {
        match self.inner.take() {
            Some(session) => session.commit().await,
            None => Ok(()),
        }
    }

    async fn rollback(&mut self) {
        if let Some(session) = self.inner.take() {
            if let Err(err) = session.rollback().await {
                warn!(session_id = %self.session_id, error = %err, "rollback failed");
            }
        }
    }
}

impl fmt::Debug for TenantSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantSession")
            .field("session_id", &self.session_id)
            .field("connection_id", &self.connection_id)
            .field("tenant_id", &self.tenant_id)
            .field("open", &self.inner.is_some())
            .field("aborted", &self.aborted)
            .finish()
    }
}

/// Runs `work` inside a transaction on `connection`.
///
/// The outcome is all-or-nothing: writes made through the session become
/// visible only if `work` returns `Ok` and did not call
/// [`TenantSession::abort`]. `ctx` bounds beginning the session and running
/// `work`; the commit itself is not interrupted. A panic inside `work` rolls
/// back and then resumes unwinding.
///
/// # Errors
///
/// - the error returned by `work`
/// - [`TenancyError::TransactionAborted`] after [`TenantSession::abort`]
/// - [`TenancyError::Cancelled`] / [`TenancyError::Timeout`] from `ctx`
/// - [`TenancyError::CommitFailed`] if the driver refuses the commit
/// - [`TenancyError::Storage`] if the session cannot be opened
pub async fn with_transaction<T, E, F>(
    connection: &ConnectionHandle,
    ctx: &CallContext,
    work: F,
) -> Result<T, E>
where
    F: for<'a> FnOnce(&'a mut TenantSession) -> BoxFuture<'a, Result<T, E>>,
    E: From<TenancyError>,
{
    let session_id = Uuid::new_v4();
    let span = info_span!(
        "transaction",
        tenant_id = %connection.tenant_id(),
        connection_id = %connection.id(),
        %session_id,
        outcome = tracing::field::Empty,
        duration_ms = tracing::field::Empty,
    );

    async move {
        let start = Instant::now();
        let finish = |outcome: &'static str| {
            let elapsed = start.elapsed();
            let span = tracing::Span::current();
            span.record("outcome", outcome);
            span.record(
                "duration_ms",
                u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            );
            observability::transaction_finished(outcome, elapsed);
        };

        let driver = match ctx.run(connection.database().begin()).await {
            Ok(Ok(driver)) => driver,
            Ok(Err(err)) => {
                finish("begin_failed");
                return Err(TenancyError::Storage(err).into());
            }
            Err(interrupt) => {
                finish(interrupt_label(&interrupt));
                return Err(interrupt.into());
            }
        };
        let mut session = TenantSession {
            inner: Some(driver),
            connection_id: connection.id(),
            tenant_id: connection.tenant_id().clone(),
            session_id,
            aborted: None,
        };
        debug!("transaction started");

        let outcome = ctx
            .run(AssertUnwindSafe(work(&mut session)).catch_unwind())
            .await;

        match outcome {
            Err(interrupt) => {
                session.rollback().await;
                finish(interrupt_label(&interrupt));
                Err(interrupt.into())
            }
            Ok(Err(panic)) => {
                session.rollback().await;
                finish("panicked");
                std::panic::resume_unwind(panic)
            }
            Ok(Ok(Err(err))) => {
                session.rollback().await;
                finish("rolled_back");
                Err(err)
            }
            Ok(Ok(Ok(value))) => {
                if let Some(reason) = session.aborted.take() {
                    session.rollback().await;
                    finish("aborted");
                    debug!(%reason, "transaction aborted");
                    return Err(TenancyError::TransactionAborted { reason }.into());
                }
                match session.commit().await {
                    Ok(()) => {
                        finish("committed");
                        debug!("transaction committed");
                        Ok(value)
                    }
                    Err(err) => {
                        finish("commit_failed");
                        warn!(error = %err, "transaction commit failed");
                        Err(TenancyError::CommitFailed(err).into())
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

fn interrupt_label(err: &TenancyError) -> &'static str {
    match err {
        TenancyError::Timeout { .. } => "timeout",
        _ => "cancelled",
    }
}
