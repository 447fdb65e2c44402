//! Tenantry core: tenant records, the closed set of entity kinds, and the
//! schema catalog shared by every tenant database.

pub mod catalog;
pub mod entity;
pub mod schema;
pub mod tenant;
pub mod types;

pub use catalog::{DuplicateSchema, SchemaCatalog, SchemaCatalogBuilder};
pub use entity::{EntityKind, UnknownEntityName};
pub use schema::{FieldDef, FieldType, SchemaDescriptor, ValidationResult};
pub use tenant::{
    normalize_domain, now_millis, SubscriptionIssue, SubscriptionSnapshot, TenantId, TenantRecord,
};
pub use types::{document_id, Document, ID_FIELD};

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
