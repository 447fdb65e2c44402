//! `TenantResolver`: the single entry point that turns a request domain and
//! an entity name into a ready-to-use, tenant-bound model.
//!
//! Resolution runs in strict sequence and stops at the first failure:
//!
//! 1. [`TenantDirectory::resolve`] checks the tenant exists, is active and
//!    has a valid subscription.
//! 2. [`ConnectionRegistry::get_or_create`] returns the tenant's connection,
//!    opening it on first access.
//! 3. [`ModelRegistry::bind`] returns the entity binding on that connection.
//!
//! After the first call for a tenant and entity, steps 2 and 3 are pure cache
//! hits; step 1 always re-reads the control-plane store.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tenantry_core::{EntityKind, SchemaCatalog, TenantRecord};
use tracing::{debug, info};

use crate::config::TenancyConfig;
use crate::connection::{ConnectionHandle, ConnectionRegistry};
use crate::context::CallContext;
use crate::directory::{Clock, TenantDirectory};
use crate::error::TenancyError;
use crate::model::{EntityBinding, ModelRegistry};
use crate::traits::{Connector, TenantStore};
use crate::transaction::{self, TenantSession};

/// A model bound to one tenant's connection, plus the context it was
/// resolved in.
#[derive(Debug, Clone)]
pub struct TenantModel {
    pub model: Arc<EntityBinding>,
    pub connection: Arc<ConnectionHandle>,
    pub tenant: TenantRecord,
}

/// Composition root of the tenancy layer.
///
/// Owns the directory and both registries. Create one per process and share
/// it (it is cheap to wrap in an `Arc`); there is no global instance.
#[derive(Debug)]
pub struct TenantResolver {
    directory: TenantDirectory,
    connections: ConnectionRegistry,
    models: ModelRegistry,
    config: TenancyConfig,
}

impl TenantResolver {
    /// Creates a resolver with the standard schema catalog and default
    /// configuration.
    #[must_use]
    pub fn new(store: Arc<dyn TenantStore>, connector: Arc<dyn Connector>) -> Self {
        Self::builder(store, connector).build()
    }

    #[must_use]
    pub fn builder(
        store: Arc<dyn TenantStore>,
        connector: Arc<dyn Connector>,
    ) -> TenantResolverBuilder {
        TenantResolverBuilder {
            store,
            connector,
            catalog: None,
            config: TenancyConfig::default(),
            clock: None,
        }
    }

    /// Resolves `domain` and binds `entity_name` on the tenant's connection,
    /// within the configured request timeout.
    ///
    /// # Errors
    ///
    /// The first failing step's error: [`TenancyError::TenantNotFound`],
    /// [`TenancyError::TenantInactive`], [`TenancyError::SubscriptionInvalid`],
    /// [`TenancyError::DirectoryUnavailable`], [`TenancyError::ConnectionFailed`],
    /// [`TenancyError::UnknownEntity`], or [`TenancyError::Timeout`].
    pub async fn get_tenant_model(
        &self,
        domain: &str,
        entity_name: &str,
    ) -> Result<TenantModel, TenancyError> {
        let ctx = CallContext::new().with_timeout(self.config.request_timeout());
        self.get_tenant_model_with(domain, entity_name, &ctx).await
    }

    /// [`get_tenant_model`](Self::get_tenant_model) under a caller-supplied
    /// context.
    ///
    /// The entity name is parsed only after the connection step, so an
    /// unknown entity on a valid tenant still opens that tenant's connection.
    ///
    /// # Errors
    ///
    /// As [`get_tenant_model`](Self::get_tenant_model), plus
    /// [`TenancyError::Cancelled`].
    pub async fn get_tenant_model_with(
        &self,
        domain: &str,
        entity_name: &str,
        ctx: &CallContext,
    ) -> Result<TenantModel, TenancyError> {
        let (tenant, connection) = self.connect(domain, ctx).await?;
        let model = self.models.bind_by_name(&connection, entity_name)?;
        Ok(TenantModel {
            model,
            connection,
            tenant,
        })
    }

    /// Statically-typed variant of
    /// [`get_tenant_model_with`](Self::get_tenant_model_with).
    ///
    /// # Errors
    ///
    /// As [`get_tenant_model_with`](Self::get_tenant_model_with).
    pub async fn get_model(
        &self,
        domain: &str,
        entity: EntityKind,
        ctx: &CallContext,
    ) -> Result<TenantModel, TenancyError> {
        let (tenant, connection) = self.connect(domain, ctx).await?;
        let model = self.models.bind(&connection, entity)?;
        Ok(TenantModel {
            model,
            connection,
            tenant,
        })
    }

    /// Resolves the tenant behind `domain` and runs `work` in a transaction
    /// on its connection.
    ///
    /// Bindings used inside `work` must come from the same tenant; a binding
    /// for another tenant's connection fails with
    /// [`TenancyError::SessionMismatch`].
    ///
    /// # Errors
    ///
    /// Any resolution error, or as [`transaction::with_transaction`].
    pub async fn with_transaction<T, E, F>(
        &self,
        domain: &str,
        ctx: &CallContext,
        work: F,
    ) -> Result<T, E>
    where
        F: for<'a> FnOnce(&'a mut TenantSession) -> BoxFuture<'a, Result<T, E>>,
        E: From<TenancyError>,
    {
        let (_, connection) = self.connect(domain, ctx).await?;
        transaction::with_transaction(&connection, ctx, work).await
    }

    /// Context carrying the configured transaction timeout.
    #[must_use]
    pub fn transaction_context(&self) -> CallContext {
        CallContext::new().with_timeout(self.config.transaction_timeout())
    }

    /// Closes every open tenant connection. Later calls reconnect on demand.
    ///
    /// # Errors
    ///
    /// [`TenancyError::Storage`] with the first close failure.
    pub async fn shutdown(&self) -> Result<usize, TenancyError> {
        let closed = self.connections.close_all().await?;
        info!(closed, "tenant resolver shut down");
        Ok(closed)
    }

    #[must_use]
    pub fn directory(&self) -> &TenantDirectory {
        &self.directory
    }

    #[must_use]
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    #[must_use]
    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    #[must_use]
    pub fn config(&self) -> &TenancyConfig {
        &self.config
    }

    async fn connect(
        &self,
        domain: &str,
        ctx: &CallContext,
    ) -> Result<(TenantRecord, Arc<ConnectionHandle>), TenancyError> {
        let tenant = ctx.run(self.directory.resolve(domain)).await??;
        let connection = self
            .connections
            .get_or_create(&tenant.id, &tenant.connection_uri, ctx)
            .await?;
        debug!(domain, tenant_id = %tenant.id, connection_id = %connection.id(), "tenant resolved");
        Ok((tenant, connection))
    }
}

/// Builder for [`TenantResolver`].
pub struct TenantResolverBuilder {
    store: Arc<dyn TenantStore>,
    connector: Arc<dyn Connector>,
    catalog: Option<Arc<SchemaCatalog>>,
    config: TenancyConfig,
    clock: Option<Clock>,
}

impl TenantResolverBuilder {
    /// Replaces the standard schema catalog.
    #[must_use]
    pub fn catalog(mut self, catalog: Arc<SchemaCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    #[must_use]
    pub fn config(mut self, config: TenancyConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the wall clock used for subscription expiry.
    #[must_use]
    pub fn clock(mut self, clock: Clock) -> Self {
        self.clock = Some(clock);
        self
    }

    #[must_use]
    pub fn build(self) -> TenantResolver {
        let mut directory = TenantDirectory::new(self.store)
            .enforce_expiry(self.config.enforce_subscription_expiry);
        if let Some(clock) = self.clock {
            directory = directory.with_clock(clock);
        }
        let catalog = self
            .catalog
            .unwrap_or_else(|| Arc::new(SchemaCatalog::standard()));

        TenantResolver {
            directory,
            connections: ConnectionRegistry::new(self.connector, self.config.connect_timeout()),
            models: ModelRegistry::new(catalog),
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tenantry_core::{SubscriptionSnapshot, TenantId};

    use super::*;
    use crate::directory::MemoryTenantStore;
    use crate::drivers::MemoryConnector;

    fn record(id: &str, domain: &str) -> TenantRecord {
        TenantRecord {
            id: TenantId::new(id),
            domain: domain.to_string(),
            connection_uri: format!("db://{id}"),
            active: true,
            subscription: SubscriptionSnapshot {
                plan: "premium".to_string(),
                paid: true,
                active: true,
                expires_at_millis: None,
            },
        }
    }

    fn setup() -> (Arc<MemoryTenantStore>, Arc<MemoryConnector>, TenantResolver) {
        let store = Arc::new(MemoryTenantStore::new());
        store.insert(record("t-shop-a", "shop-a.example.com"));
        let connector = Arc::new(MemoryConnector::new());
        let resolver = TenantResolver::new(store.clone(), connector.clone());
        (store, connector, resolver)
    }

    #[tokio::test]
    async fn repeated_resolution_hits_caches() {
        let (store, connector, resolver) = setup();

        let first = resolver
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .unwrap();
        let second = resolver
            .get_tenant_model("SHOP-A.example.com", "customer")
            .await
            .unwrap();

        assert!(Arc::ptr_eq(&first.connection, &second.connection));
        assert!(Arc::ptr_eq(&first.model, &second.model));
        assert_eq!(first.tenant.id, TenantId::new("t-shop-a"));
        assert_eq!(connector.connect_attempts(), 1);
        assert_eq!(store.lookups(), 2);
    }

    #[tokio::test]
    async fn failure_short_circuits_before_connecting() {
        let (store, connector, resolver) = setup();
        store.set_active("shop-a.example.com", false);

        let err = resolver
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::TenantInactive { .. }));

        let err = resolver
            .get_tenant_model("nobody.example.com", "Customer")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::TenantNotFound { .. }));
        assert_eq!(connector.connect_attempts(), 0);
    }

    #[tokio::test]
    async fn typed_lookup_shares_binding_with_named_lookup() {
        let (_store, _connector, resolver) = setup();
        let ctx = CallContext::new();

        let typed = resolver
            .get_model("shop-a.example.com", EntityKind::JobCard, &ctx)
            .await
            .unwrap();
        let named = resolver
            .get_tenant_model_with("shop-a.example.com", "jobcard", &ctx)
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&typed.model, &named.model));
        assert_eq!(typed.model.collection(), "job_cards");
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_bounds_slow_connect() {
        let store = Arc::new(MemoryTenantStore::new());
        store.insert(record("t-shop-a", "shop-a.example.com"));
        let connector =
            Arc::new(MemoryConnector::new().with_connect_delay(Duration::from_secs(5)));
        let resolver = TenantResolver::builder(store, connector)
            .config(TenancyConfig {
                request_timeout_ms: 100,
                ..TenancyConfig::default()
            })
            .build();

        let err = resolver
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::Timeout { timeout_ms: 100 }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn expiry_uses_injected_clock() {
        let store = Arc::new(MemoryTenantStore::new());
        let mut rec = record("t-shop-a", "shop-a.example.com");
        rec.subscription.expires_at_millis = Some(1_000);
        store.insert(rec);
        let connector = Arc::new(MemoryConnector::new());

        let strict = TenantResolver::builder(store.clone(), connector.clone())
            .clock(Arc::new(|| 2_000))
            .config(TenancyConfig {
                enforce_subscription_expiry: true,
                ..TenancyConfig::default()
            })
            .build();
        let err = strict
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .unwrap_err();
        assert!(matches!(err, TenancyError::SubscriptionInvalid { .. }));

        let lenient = TenantResolver::builder(store, connector)
            .clock(Arc::new(|| 2_000))
            .build();
        assert!(lenient
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn shutdown_closes_connections() {
        let (_store, connector, resolver) = setup();
        resolver
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .unwrap();

        assert_eq!(resolver.shutdown().await.unwrap(), 1);
        assert!(resolver.connections().is_empty());

        resolver
            .get_tenant_model("shop-a.example.com", "Customer")
            .await
            .unwrap();
        assert_eq!(connector.connect_attempts(), 2);
    }
}
