use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tenantry_core::{EntityKind, TenantId};

use crate::model::EntityBinding;
use crate::observability::redact_uri;
use crate::traits::TenantDatabase;

/// Identifier of a connection, unique within the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A live connection to one tenant's database.
///
/// Owned by the [`ConnectionRegistry`](super::ConnectionRegistry) and shared
/// by every operation against the tenant. Carries its own entity-binding
/// cache, so a binding lives exactly as long as the connection it targets.
pub struct ConnectionHandle {
    id: ConnectionId,
    tenant_id: TenantId,
    uri: String,
    database: Arc<dyn TenantDatabase>,
    bindings: DashMap<EntityKind, Arc<EntityBinding>>,
    connected_at: Instant,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        tenant_id: TenantId,
        uri: String,
        database: Arc<dyn TenantDatabase>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            uri,
            database,
            bindings: DashMap::new(),
            connected_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// The URI this connection was opened with (unredacted).
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The driver connection.
    #[must_use]
    pub fn database(&self) -> &Arc<dyn TenantDatabase> {
        &self.database
    }

    #[must_use]
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// The cached binding for `entity`, if one has been created.
    #[must_use]
    pub fn binding(&self, entity: EntityKind) -> Option<Arc<EntityBinding>> {
        self.bindings.get(&entity).map(|b| Arc::clone(b.value()))
    }

    /// Entity kinds bound on this connection, in declaration order.
    #[must_use]
    pub fn bound_entities(&self) -> Vec<EntityKind> {
        let mut kinds: Vec<EntityKind> = self.bindings.iter().map(|b| *b.key()).collect();
        kinds.sort_unstable();
        kinds
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    /// Binding cache; mutated only by the model registry.
    pub(crate) fn bindings(&self) -> &DashMap<EntityKind, Arc<EntityBinding>> {
        &self.bindings
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("tenant_id", &self.tenant_id)
            .field("uri", &redact_uri(&self.uri))
            .field("bindings", &self.bound_entities())
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}
