use std::sync::Arc;

use async_trait::async_trait;
use tenantry_core::{Document, SchemaDescriptor, TenantId, TenantRecord};

/// Control-plane store holding one [`TenantRecord`] per tenant.
/// Implementations: in-memory (tests, probe), `PostgreSQL`.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Find the tenant whose domain equals `domain`, ignoring ASCII case.
    async fn find_by_domain(&self, domain: &str) -> anyhow::Result<Option<TenantRecord>>;
}

/// Opens connections to tenant databases.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish a new connection for `tenant_id` at `uri`.
    async fn connect(&self, tenant_id: &TenantId, uri: &str)
        -> anyhow::Result<Arc<dyn TenantDatabase>>;
}

/// One live connection to a tenant's isolated database.
///
/// Shared by every concurrent operation against the tenant, so all methods
/// take `&self`.
#[async_trait]
pub trait TenantDatabase: Send + Sync {
    /// Register a collection for the given schema on this connection.
    ///
    /// Must not block. Registering the same collection twice on one
    /// connection is an error.
    fn register_collection(&self, schema: &SchemaDescriptor) -> anyhow::Result<()>;

    /// Whether `collection` was registered on this connection.
    fn is_registered(&self, collection: &str) -> bool;

    /// Insert a new record. Fails if the key already exists.
    async fn insert(&self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<()>;

    /// Load a single record by key.
    async fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;

    /// Load every record of a collection.
    async fn find_all(&self, collection: &str) -> anyhow::Result<Vec<Document>>;

    /// Replace an existing record. Returns `false` if the key does not exist.
    async fn update(&self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<bool>;

    /// Delete a record. Returns `false` if the key does not exist.
    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool>;

    /// Start an atomic session on this connection.
    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseSession>>;

    /// Release resources and close the connection.
    async fn close(&self) -> anyhow::Result<()>;
}

/// Atomic unit of work on one [`TenantDatabase`].
///
/// Operations become visible to other sessions only after
/// [`commit()`](DatabaseSession::commit). Dropping an unfinished session
/// discards its work.
#[async_trait]
pub trait DatabaseSession: Send {
    async fn insert(&mut self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<()>;

    /// Load a record, seeing this session's own uncommitted writes.
    async fn find(&mut self, collection: &str, id: &str) -> anyhow::Result<Option<Document>>;

    async fn update(&mut self, collection: &str, id: &str, doc: &Document)
        -> anyhow::Result<bool>;

    async fn delete(&mut self, collection: &str, id: &str) -> anyhow::Result<bool>;

    /// Apply every operation of the session atomically.
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;

    /// Discard every operation of the session.
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}
