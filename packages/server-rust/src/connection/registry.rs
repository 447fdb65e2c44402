//! Process-wide cache of tenant connections with single-flight creation.
//!
//! Each tenant id maps to a [`Slot`]: either a ready handle or an in-flight
//! connection attempt shared by every caller that arrived while it ran. The
//! `DashMap` entry lock is held only while a slot is installed, never across
//! the attempt itself or the use of a ready handle.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tenantry_core::TenantId;
use tracing::{debug, info, info_span, warn, Instrument};

use super::handle::{ConnectionHandle, ConnectionId};
use crate::context::CallContext;
use crate::error::{ConnectError, TenancyError};
use crate::observability::{self, redact_uri};
use crate::traits::Connector;

type ConnectOutcome = Result<Arc<ConnectionHandle>, ConnectError>;
type SharedConnect = Shared<BoxFuture<'static, ConnectOutcome>>;

enum Slot {
    Ready(Arc<ConnectionHandle>),
    Connecting { attempt: u64, outcome: SharedConnect },
}

type Slots = DashMap<TenantId, Slot>;

/// Shared by every registry in the process, so a [`ConnectionId`] never
/// names two live connections.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Removes an in-flight slot when its attempt ends without a handle.
///
/// Runs on every exit path of the connect task, including timeout and panic,
/// so a failed attempt never leaves a half-initialized entry behind.
struct PendingSlot {
    slots: Arc<Slots>,
    tenant_id: TenantId,
    attempt: u64,
    armed: bool,
}

impl PendingSlot {
    /// Swaps the in-flight slot for a ready handle. Returns `false` if the
    /// slot was drained while the attempt ran.
    fn complete(mut self, handle: Arc<ConnectionHandle>) -> bool {
        self.armed = false;
        let Some(mut slot) = self.slots.get_mut(&self.tenant_id) else {
            return false;
        };
        let current = matches!(
            slot.value(),
            Slot::Connecting { attempt, .. } if *attempt == self.attempt
        );
        if current {
            *slot = Slot::Ready(handle);
        }
        current
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        if self.armed {
            let attempt = self.attempt;
            self.slots.remove_if(&self.tenant_id, |_, slot| {
                matches!(slot, Slot::Connecting { attempt: a, .. } if *a == attempt)
            });
        }
    }
}

/// Thread-safe registry of tenant connections.
///
/// At most one live [`ConnectionHandle`] exists per tenant id. Handles are
/// kept for the process lifetime; there is no idle eviction.
pub struct ConnectionRegistry {
    slots: Arc<Slots>,
    connector: Arc<dyn Connector>,
    connect_timeout: Duration,
    next_attempt: AtomicU64,
    attempts: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    ///
    /// Connection IDs are unique across all registries in the process.
    /// `connect_timeout` bounds every establishment attempt independently of
    /// any caller deadline.
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>, connect_timeout: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            connector,
            connect_timeout,
            next_attempt: AtomicU64::new(1),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns the tenant's connection, opening it on first access.
    ///
    /// Concurrent first accesses share one attempt and all observe its single
    /// outcome. If the attempt fails nothing is cached and the next call
    /// starts over. `ctx` bounds only this caller's wait: an abandoned wait
    /// does not stop the attempt or keep its slot.
    ///
    /// If the tenant is already connected under a different URI, the existing
    /// handle is returned.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::ConnectionFailed`] with the shared attempt's error
    /// - [`TenancyError::Cancelled`] / [`TenancyError::Timeout`] from `ctx`
    pub async fn get_or_create(
        &self,
        tenant_id: &TenantId,
        uri: &str,
        ctx: &CallContext,
    ) -> Result<Arc<ConnectionHandle>, TenancyError> {
        if let Some(handle) = self.get(tenant_id) {
            warn_on_uri_change(&handle, uri);
            return Ok(handle);
        }

        let outcome = match self.slots.entry(tenant_id.clone()) {
            Entry::Occupied(entry) => match entry.get() {
                Slot::Ready(handle) => {
                    warn_on_uri_change(handle, uri);
                    return Ok(Arc::clone(handle));
                }
                Slot::Connecting { outcome, .. } => {
                    debug!(%tenant_id, "joining in-flight connection attempt");
                    outcome.clone()
                }
            },
            Entry::Vacant(entry) => {
                let attempt = self.next_attempt.fetch_add(1, Ordering::Relaxed);
                let outcome = self.spawn_connect(tenant_id.clone(), uri.to_string(), attempt);
                entry.insert(Slot::Connecting {
                    attempt,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        ctx.run(outcome)
            .await?
            .map_err(|source| TenancyError::ConnectionFailed {
                tenant_id: tenant_id.clone(),
                source,
            })
    }

    fn spawn_connect(&self, tenant_id: TenantId, uri: String, attempt: u64) -> SharedConnect {
        self.attempts.fetch_add(1, Ordering::Relaxed);

        let guard = PendingSlot {
            slots: Arc::clone(&self.slots),
            tenant_id: tenant_id.clone(),
            attempt,
            armed: true,
        };
        let connector = Arc::clone(&self.connector);
        let timeout = self.connect_timeout;
        let span = info_span!(
            "connect",
            tenant_id = %tenant_id,
            uri = %redact_uri(&uri),
            attempt,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let task = tokio::spawn(
            async move {
                let start = Instant::now();
                let result = match tokio::time::timeout(timeout, connector.connect(&tenant_id, &uri)).await {
                    Ok(Ok(database)) => Ok(database),
                    Ok(Err(err)) => Err(ConnectError::Driver {
                        message: format!("{err:#}"),
                    }),
                    Err(_elapsed) => Err(ConnectError::TimedOut {
                        timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }),
                };

                let span = tracing::Span::current();
                span.record(
                    "duration_ms",
                    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                );

                match result {
                    Ok(database) => {
                        let id = ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed));
                        let handle =
                            Arc::new(ConnectionHandle::new(id, tenant_id, uri, database));
                        if !guard.complete(Arc::clone(&handle)) {
                            warn!(connection_id = %id, "registry drained during connect; handle not cached");
                        }
                        span.record("outcome", "ok");
                        observability::connection_opened();
                        info!(connection_id = %id, "tenant connection opened");
                        Ok(handle)
                    }
                    Err(err) => {
                        drop(guard);
                        let reason = match err {
                            ConnectError::TimedOut { .. } => "timeout",
                            _ => "driver",
                        };
                        span.record("outcome", reason);
                        observability::connection_failed(reason);
                        warn!(error = %err, "tenant connection failed");
                        Err(err)
                    }
                }
            }
            .instrument(span),
        );

        async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_err) => Err(ConnectError::Aborted {
                    message: join_err.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }

    /// Looks up a ready connection without creating one.
    #[must_use]
    pub fn get(&self, tenant_id: &TenantId) -> Option<Arc<ConnectionHandle>> {
        self.slots.get(tenant_id).and_then(|slot| match slot.value() {
            Slot::Ready(handle) => Some(Arc::clone(handle)),
            Slot::Connecting { .. } => None,
        })
    }

    /// Whether a connection attempt for `tenant_id` is in flight.
    #[must_use]
    pub fn is_connecting(&self, tenant_id: &TenantId) -> bool {
        self.slots
            .get(tenant_id)
            .is_some_and(|slot| matches!(slot.value(), Slot::Connecting { .. }))
    }

    /// Number of ready connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Ready(_)))
            .count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Connection attempts started by this registry.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Returns all ready connections as a collected `Vec`.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(handle) => Some(Arc::clone(handle)),
                Slot::Connecting { .. } => None,
            })
            .collect()
    }

    /// Removes every slot and returns the ready handles. Used during
    /// graceful shutdown; in-flight attempts finish without being cached.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys: Vec<TenantId> = self.slots.iter().map(|slot| slot.key().clone()).collect();

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, Slot::Ready(handle))) = self.slots.remove(&key) {
                handles.push(handle);
            }
        }
        handles
    }

    /// Drains the registry and closes every connection.
    ///
    /// Every connection is closed even if some fail; returns the number
    /// closed.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::Storage`] with the first close failure.
    pub async fn close_all(&self) -> Result<usize, TenancyError> {
        let handles = self.drain_all();
        let mut first_error = None;
        for handle in &handles {
            if let Err(err) = handle.database().close().await {
                warn!(tenant_id = %handle.tenant_id(), error = %err, "closing tenant connection failed");
                first_error.get_or_insert(err);
            }
        }
        info!(count = handles.len(), "tenant connections closed");
        match first_error {
            Some(err) => Err(TenancyError::Storage(err)),
            None => Ok(handles.len()),
        }
    }
}

fn warn_on_uri_change(handle: &ConnectionHandle, uri: &str) {
    if handle.uri() != uri {
        warn!(
            tenant_id = %handle.tenant_id(),
            cached = %redact_uri(handle.uri()),
            requested = %redact_uri(uri),
            "tenant URI changed; keeping existing connection"
        );
    }
}

impl fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.len())
            .field("connect_timeout", &self.connect_timeout)
            .field("connect_attempts", &self.connect_attempts())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use futures_util::future::join_all;

    use super::*;
    use crate::drivers::MemoryConnector;

    const URI: &str = "db://shop-a";

    fn registry(connector: &Arc<MemoryConnector>) -> ConnectionRegistry {
        ConnectionRegistry::new(connector.clone(), Duration::from_secs(10))
    }

    fn tenant() -> TenantId {
        TenantId::new("t-shop-a")
    }

    #[tokio::test]
    async fn second_call_is_cache_hit_with_identical_handle() {
        let connector = Arc::new(MemoryConnector::new());
        let registry = registry(&connector);
        let ctx = CallContext::new();

        let first = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap();
        let second = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.database(), second.database()));
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(registry.connect_attempts(), 1);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_opens_once() {
        let connector =
            Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(50)));
        let registry = Arc::new(registry(&connector));

        let callers = (0..32).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .get_or_create(&tenant(), URI, &CallContext::new())
                    .await
            })
        });
        let handles: Vec<_> = join_all(callers)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        assert_eq!(connector.connect_attempts(), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_access_shares_single_error() {
        let connector =
            Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(50)));
        connector.fail_connections(URI, "connection refused");
        let registry = Arc::new(registry(&connector));

        let callers = (0..16).map(|_| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                registry
                    .get_or_create(&tenant(), URI, &CallContext::new())
                    .await
            })
        });
        for joined in join_all(callers).await {
            let err = joined.unwrap().unwrap_err();
            assert!(matches!(
                err,
                TenancyError::ConnectionFailed {
                    source: ConnectError::Driver { ref message },
                    ..
                } if message == "connection refused"
            ));
        }
        assert_eq!(connector.connect_attempts(), 1);
        assert!(!registry.is_connecting(&tenant()));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn failed_attempt_is_not_cached_and_retry_starts_over() {
        let connector = Arc::new(MemoryConnector::new());
        connector.fail_connections(URI, "refused");
        let registry = registry(&connector);
        let ctx = CallContext::new();

        assert!(registry.get_or_create(&tenant(), URI, &ctx).await.is_err());
        assert!(registry.get(&tenant()).is_none());

        connector.clear_failure(URI);
        let handle = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap();
        assert_eq!(handle.tenant_id(), &tenant());
        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_timeout_releases_slot() {
        let connector =
            Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_secs(60)));
        let registry = ConnectionRegistry::new(connector.clone(), Duration::from_millis(20));
        let ctx = CallContext::new();

        let err = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap_err();
        assert!(matches!(
            err,
            TenancyError::ConnectionFailed {
                source: ConnectError::TimedOut { timeout_ms: 20 },
                ..
            }
        ));
        assert!(!registry.is_connecting(&tenant()));

        connector.set_connect_delay(Duration::ZERO);
        assert!(registry.get_or_create(&tenant(), URI, &ctx).await.is_ok());
        assert_eq!(connector.connect_attempts(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_deadline_does_not_abandon_attempt() {
        let connector =
            Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_millis(100)));
        let registry = registry(&connector);

        let impatient = CallContext::new().with_timeout(Duration::from_millis(10));
        let err = registry
            .get_or_create(&tenant(), URI, &impatient)
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Timeout { timeout_ms: 10 }));
        assert!(registry.is_connecting(&tenant()));

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(registry.get(&tenant()).is_some());

        registry
            .get_or_create(&tenant(), URI, &CallContext::new())
            .await
            .unwrap();
        assert_eq!(connector.connect_attempts(), 1);
    }

    #[tokio::test]
    async fn distinct_tenants_get_distinct_handles() {
        let connector = Arc::new(MemoryConnector::new());
        let registry = registry(&connector);
        let ctx = CallContext::new();

        let a = registry
            .get_or_create(&TenantId::new("a"), "db://a", &ctx)
            .await
            .unwrap();
        let b = registry
            .get_or_create(&TenantId::new("b"), "db://b", &ctx)
            .await
            .unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_ne!(a.id(), b.id());
        assert_eq!(b.tenant_id(), &TenantId::new("b"));
        assert_eq!(registry.connections().len(), 2);
    }

    #[tokio::test]
    async fn ids_are_unique_across_registries() {
        let connector = Arc::new(MemoryConnector::new());
        let first = registry(&connector);
        let second = registry(&connector);
        let ctx = CallContext::new();

        let a = first
            .get_or_create(&TenantId::new("a"), "db://a", &ctx)
            .await
            .unwrap();
        let b = second
            .get_or_create(&TenantId::new("b"), "db://b", &ctx)
            .await
            .unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn uri_change_keeps_existing_handle() {
        let connector = Arc::new(MemoryConnector::new());
        let registry = registry(&connector);
        let ctx = CallContext::new();

        let first = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap();
        let second = registry
            .get_or_create(&tenant(), "db://moved", &ctx)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.uri(), URI);
        assert_eq!(connector.connect_attempts_for("db://moved"), 0);
    }

    #[tokio::test]
    async fn close_all_drains_and_closes() {
        let connector = Arc::new(MemoryConnector::new());
        let registry = registry(&connector);
        let ctx = CallContext::new();

        let handle = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap();
        assert_eq!(registry.close_all().await.unwrap(), 1);
        assert!(registry.is_empty());
        assert!(handle.database().find("customers", "x").await.is_err());

        let reopened = registry.get_or_create(&tenant(), URI, &ctx).await.unwrap();
        assert!(!Arc::ptr_eq(&handle, &reopened));
    }
}
