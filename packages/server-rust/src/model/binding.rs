use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tenantry_core::{
    document_id, Document, EntityKind, SchemaDescriptor, TenantId, ValidationResult, ID_FIELD,
};
use uuid::Uuid;

use crate::connection::ConnectionId;
use crate::error::TenancyError;
use crate::traits::TenantDatabase;
use crate::transaction::TenantSession;

/// An entity kind bound to one tenant connection.
///
/// Obtained from [`ModelRegistry::bind`](super::ModelRegistry::bind). Direct
/// operations run against the connection in autocommit mode; the `*_in`
/// variants run inside a [`TenantSession`] opened on the same connection.
pub struct EntityBinding {
    schema: Arc<SchemaDescriptor>,
    tenant_id: TenantId,
    connection_id: ConnectionId,
    database: Arc<dyn TenantDatabase>,
}

impl EntityBinding {
    pub(crate) fn new(
        schema: Arc<SchemaDescriptor>,
        tenant_id: TenantId,
        connection_id: ConnectionId,
        database: Arc<dyn TenantDatabase>,
    ) -> Self {
        Self {
            schema,
            tenant_id,
            connection_id,
            database,
        }
    }

    #[must_use]
    pub fn entity(&self) -> EntityKind {
        self.schema.entity
    }

    #[must_use]
    pub fn collection(&self) -> &str {
        &self.schema.collection
    }

    #[must_use]
    pub fn schema(&self) -> &Arc<SchemaDescriptor> {
        &self.schema
    }

    #[must_use]
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// The connection this binding targets.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Inserts a new document and returns it with its `id` set.
    ///
    /// A missing `id` is generated (UUID v4).
    ///
    /// # Errors
    ///
    /// [`TenancyError::Validation`] if the document violates the schema,
    /// [`TenancyError::Storage`] if the driver rejects the write.
    pub async fn create(&self, doc: Document) -> Result<Document, TenancyError> {
        let (id, doc) = self.prepare_create(doc)?;
        self.database
            .insert(self.collection(), &id, &doc)
            .await
            .map_err(TenancyError::Storage)?;
        Ok(doc)
    }

    /// # Errors
    ///
    /// [`TenancyError::Storage`] on driver failure.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<Document>, TenancyError> {
        self.database
            .find(self.collection(), id)
            .await
            .map_err(TenancyError::Storage)
    }

    /// # Errors
    ///
    /// [`TenancyError::Storage`] on driver failure.
    pub async fn find_all(&self) -> Result<Vec<Document>, TenancyError> {
        self.database
            .find_all(self.collection())
            .await
            .map_err(TenancyError::Storage)
    }

    /// Replaces the document stored under `id`. Returns `false` if there was
    /// none.
    ///
    /// # Errors
    ///
    /// [`TenancyError::Validation`] if the document violates the schema or
    /// carries a different `id`, [`TenancyError::Storage`] on driver failure.
    pub async fn update(&self, id: &str, doc: Document) -> Result<bool, TenancyError> {
        let doc = self.prepare_replace(id, doc)?;
        self.database
            .update(self.collection(), id, &doc)
            .await
            .map_err(TenancyError::Storage)
    }

    /// Deletes the document stored under `id`. Returns `false` if there was
    /// none.
    ///
    /// # Errors
    ///
    /// [`TenancyError::Storage`] on driver failure.
    pub async fn delete(&self, id: &str) -> Result<bool, TenancyError> {
        self.database
            .delete(self.collection(), id)
            .await
            .map_err(TenancyError::Storage)
    }

    /// Transactional [`create`](Self::create).
    ///
    /// # Errors
    ///
    /// As [`create`](Self::create), plus [`TenancyError::SessionMismatch`] if
    /// `session` belongs to another connection.
    pub async fn create_in(
        &self,
        session: &mut TenantSession,
        doc: Document,
    ) -> Result<Document, TenancyError> {
        self.check_session(session)?;
        let (id, doc) = self.prepare_create(doc)?;
        session
            .driver()?
            .insert(self.collection(), &id, &doc)
            .await
            .map_err(TenancyError::Storage)?;
        Ok(doc)
    }

    /// Transactional [`find_by_id`](Self::find_by_id); sees the session's own
    /// uncommitted writes.
    ///
    /// # Errors
    ///
    /// [`TenancyError::SessionMismatch`] or [`TenancyError::Storage`].
    pub async fn find_by_id_in(
        &self,
        session: &mut TenantSession,
        id: &str,
    ) -> Result<Option<Document>, TenancyError> {
        self.check_session(session)?;
        session
            .driver()?
            .find(self.collection(), id)
            .await
            .map_err(TenancyError::Storage)
    }

    /// Transactional [`update`](Self::update).
    ///
    /// # Errors
    ///
    /// As [`update`](Self::update), plus [`TenancyError::SessionMismatch`].
    pub async fn update_in(
        &self,
        session: &mut TenantSession,
        id: &str,
        doc: Document,
    ) -> Result<bool, TenancyError> {
        self.check_session(session)?;
        let doc = self.prepare_replace(id, doc)?;
        session
            .driver()?
            .update(self.collection(), id, &doc)
            .await
            .map_err(TenancyError::Storage)
    }

    /// Transactional [`delete`](Self::delete).
    ///
    /// # Errors
    ///
    /// [`TenancyError::SessionMismatch`] or [`TenancyError::Storage`].
    pub async fn delete_in(
        &self,
        session: &mut TenantSession,
        id: &str,
    ) -> Result<bool, TenancyError> {
        self.check_session(session)?;
        session
            .driver()?
            .delete(self.collection(), id)
            .await
            .map_err(TenancyError::Storage)
    }

    fn check_session(&self, session: &TenantSession) -> Result<(), TenancyError> {
        if session.connection_id() == self.connection_id
            && session.tenant_id() == &self.tenant_id
        {
            Ok(())
        } else {
            Err(TenancyError::SessionMismatch {
                session_connection: session.connection_id().0,
                binding_connection: self.connection_id.0,
            })
        }
    }

    fn prepare_create(&self, mut doc: Document) -> Result<(String, Document), TenancyError> {
        let id = match doc.get(ID_FIELD) {
            None | Some(Value::Null) => {
                let id = Uuid::new_v4().to_string();
                doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                id
            }
            Some(_) => match document_id(&doc) {
                Some(id) => id.to_string(),
                None => return Err(self.invalid(vec![format!("`{ID_FIELD}` must be a string")])),
            },
        };
        self.validate(&doc)?;
        Ok((id, doc))
    }

    fn prepare_replace(&self, id: &str, mut doc: Document) -> Result<Document, TenancyError> {
        match doc.get(ID_FIELD) {
            None | Some(Value::Null) => {
                doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
            }
            Some(Value::String(existing)) if existing == id => {}
            Some(_) => {
                return Err(self.invalid(vec![format!("`{ID_FIELD}` does not match {id}")]));
            }
        }
        self.validate(&doc)?;
        Ok(doc)
    }

    fn validate(&self, doc: &Document) -> Result<(), TenancyError> {
        match self.schema.validate(doc) {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { errors } => Err(self.invalid(errors)),
        }
    }

    fn invalid(&self, errors: Vec<String>) -> TenancyError {
        TenancyError::Validation {
            entity: self.entity(),
            errors,
        }
    }
}

impl fmt::Debug for EntityBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityBinding")
            .field("entity", &self.schema.entity)
            .field("collection", &self.schema.collection)
            .field("tenant_id", &self.tenant_id)
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}
