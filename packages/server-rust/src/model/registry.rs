use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tenantry_core::{EntityKind, SchemaCatalog};
use tracing::debug;

use super::binding::EntityBinding;
use crate::connection::ConnectionHandle;
use crate::error::TenancyError;
use crate::observability;

/// Binds catalog entity kinds to tenant connections.
///
/// Stateless apart from the shared catalog: bindings live in each
/// connection's own cache, so the same registry serves every tenant.
/// Binding never awaits.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    catalog: Arc<SchemaCatalog>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new(catalog: Arc<SchemaCatalog>) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &Arc<SchemaCatalog> {
        &self.catalog
    }

    /// Returns the binding of `entity` on `connection`, creating and caching
    /// it on first use.
    ///
    /// The first bind registers the entity's collection with the driver
    /// connection; later binds return the cached `Arc`.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::UnknownEntity`] if the catalog has no schema for
    ///   `entity`
    /// - [`TenancyError::Storage`] if the driver refuses the registration
    pub fn bind(
        &self,
        connection: &ConnectionHandle,
        entity: EntityKind,
    ) -> Result<Arc<EntityBinding>, TenancyError> {
        let schema = self
            .catalog
            .get(entity)
            .ok_or_else(|| TenancyError::UnknownEntity {
                name: entity.as_str().to_string(),
            })?;

        if let Some(binding) = connection.binding(entity) {
            return Ok(binding);
        }

        match connection.bindings().entry(entity) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                connection
                    .database()
                    .register_collection(schema)
                    .map_err(TenancyError::Storage)?;
                let binding = Arc::new(EntityBinding::new(
                    Arc::clone(schema),
                    connection.tenant_id().clone(),
                    connection.id(),
                    Arc::clone(connection.database()),
                ));
                entry.insert(Arc::clone(&binding));
                observability::binding_created(entity);
                debug!(
                    tenant_id = %connection.tenant_id(),
                    connection_id = %connection.id(),
                    entity = entity.as_str(),
                    collection = %schema.collection,
                    "entity bound"
                );
                Ok(binding)
            }
        }
    }

    /// Parses `name` (case-insensitive) and binds it.
    ///
    /// # Errors
    ///
    /// [`TenancyError::UnknownEntity`] if `name` is not a known entity, or as
    /// [`bind`](Self::bind).
    pub fn bind_by_name(
        &self,
        connection: &ConnectionHandle,
        name: &str,
    ) -> Result<Arc<EntityBinding>, TenancyError> {
        let entity: EntityKind = name.parse()?;
        self.bind(connection, entity)
    }
}
