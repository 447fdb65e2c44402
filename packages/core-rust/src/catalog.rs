//! Process-wide, read-only table of entity schemas.
//!
//! Built once at startup through [`SchemaCatalogBuilder`] and then shared by
//! every tenant, since all tenant databases are structurally identical.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{EntityKind, UnknownEntityName};
use crate::schema::{FieldDef, FieldType, SchemaDescriptor};

/// Returned when the same kind is registered twice.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("schema for {0} registered twice")]
pub struct DuplicateSchema(pub EntityKind);

/// Collects schema descriptors before the catalog is frozen.
#[derive(Debug, Default)]
pub struct SchemaCatalogBuilder {
    schemas: HashMap<EntityKind, Arc<SchemaDescriptor>>,
}

impl SchemaCatalogBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSchema`] if the kind already has a descriptor.
    pub fn register(&mut self, schema: SchemaDescriptor) -> Result<&mut Self, DuplicateSchema> {
        let kind = schema.entity;
        if self.schemas.contains_key(&kind) {
            return Err(DuplicateSchema(kind));
        }
        self.schemas.insert(kind, Arc::new(schema));
        Ok(self)
    }

    /// Freezes the collected descriptors.
    #[must_use]
    pub fn build(self) -> SchemaCatalog {
        SchemaCatalog {
            schemas: self.schemas,
        }
    }
}

/// Immutable map of entity kind to schema descriptor.
#[derive(Debug, Clone, Default)]
pub struct SchemaCatalog {
    schemas: HashMap<EntityKind, Arc<SchemaDescriptor>>,
}

impl SchemaCatalog {
    #[must_use]
    pub fn builder() -> SchemaCatalogBuilder {
        SchemaCatalogBuilder::new()
    }

    /// Catalog with a descriptor for every built-in [`EntityKind`].
    #[must_use]
    pub fn standard() -> Self {
        let schemas = standard_descriptors()
            .into_iter()
            .map(|schema| (schema.entity, Arc::new(schema)))
            .collect();
        Self { schemas }
    }

    /// Descriptor for `kind`, if one was registered.
    #[must_use]
    pub fn get(&self, kind: EntityKind) -> Option<&Arc<SchemaDescriptor>> {
        self.schemas.get(&kind)
    }

    /// Parses a runtime name and returns its descriptor.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownEntityName`] if the name does not parse or the kind
    /// has no registered descriptor.
    pub fn lookup(&self, name: &str) -> Result<&Arc<SchemaDescriptor>, UnknownEntityName> {
        let kind: EntityKind = name.parse()?;
        self.get(kind)
            .ok_or_else(|| UnknownEntityName(name.to_string()))
    }

    #[must_use]
    pub fn contains(&self, kind: EntityKind) -> bool {
        self.schemas.contains_key(&kind)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered kinds in declaration order.
    #[must_use]
    pub fn kinds(&self) -> Vec<EntityKind> {
        EntityKind::ALL
            .iter()
            .copied()
            .filter(|kind| self.schemas.contains_key(kind))
            .collect()
    }
}

fn req(name: &str, field_type: FieldType) -> FieldDef {
    FieldDef::required(name, field_type)
}

fn opt(name: &str, field_type: FieldType) -> FieldDef {
    FieldDef::optional(name, field_type)
}

#[allow(clippy::too_many_lines)]
fn standard_descriptors() -> Vec<SchemaDescriptor> {
    use EntityKind as K;
    use FieldType::{Any, Array, Bool, Number, Object, Reference, String as Str, Timestamp};

    let party = |kind: EntityKind| {
        SchemaDescriptor::new(
            kind,
            vec![
                req("name", Str),
                opt("phone", Str),
                opt("email", Str),
                opt("address", Str),
            ],
        )
    };
    let named = |kind: EntityKind| {
        SchemaDescriptor::new(kind, vec![req("name", Str), opt("description", Str)])
    };

    vec![
        SchemaDescriptor::new(
            K::User,
            vec![
                req("name", Str),
                req("email", Str),
                req("role", Str),
                opt("active", Bool),
            ],
        ),
        party(K::Customer),
        party(K::Company),
        SchemaDescriptor::new(
            K::ShowRoom,
            vec![req("name", Str), opt("address", Str), opt("phone", Str)],
        ),
        SchemaDescriptor::new(
            K::Vehicle,
            vec![
                req("registration_number", Str),
                opt("make", Str),
                opt("model", Str),
                opt("year", Number),
                opt("customer", Reference(K::Customer)),
                opt("company", Reference(K::Company)),
                opt("show_room", Reference(K::ShowRoom)),
            ],
        ),
        SchemaDescriptor::new(
            K::JobCard,
            vec![
                req("job_no", Str),
                req("vehicle", Reference(K::Vehicle)),
                opt("customer", Reference(K::Customer)),
                opt("status", Str),
                opt("opened_at", Timestamp),
            ],
        ),
        SchemaDescriptor::new(
            K::Quotation,
            vec![
                req("quotation_no", Str),
                opt("job_card", Reference(K::JobCard)),
                req("items", Array),
                opt("total", Number),
            ],
        ),
        SchemaDescriptor::new(
            K::Invoice,
            vec![
                req("invoice_no", Str),
                opt("job_card", Reference(K::JobCard)),
                opt("customer", Reference(K::Customer)),
                req("items", Array),
                req("total", Number),
                opt("paid", Number),
                opt("issued_at", Timestamp),
            ],
        ),
        SchemaDescriptor::new(
            K::MoneyReceipt,
            vec![
                req("receipt_no", Str),
                opt("invoice", Reference(K::Invoice)),
                req("amount", Number),
                opt("method", Str),
            ],
        ),
        SchemaDescriptor::new(
            K::Product,
            vec![
                req("name", Str),
                opt("sku", Str),
                opt("category", Reference(K::Category)),
                opt("brand", Reference(K::Brand)),
                opt("unit", Reference(K::Unit)),
                opt("price", Number),
            ],
        ),
        party(K::Supplier),
        SchemaDescriptor::new(
            K::Purchase,
            vec![
                req("purchase_no", Str),
                req("supplier", Reference(K::Supplier)),
                req("items", Array),
                opt("total", Number),
            ],
        ),
        SchemaDescriptor::new(
            K::PurchaseOrder,
            vec![
                req("order_no", Str),
                req("supplier", Reference(K::Supplier)),
                req("items", Array),
                opt("status", Str),
            ],
        ),
        SchemaDescriptor::new(
            K::Stock,
            vec![
                req("product", Reference(K::Product)),
                opt("warehouse", Reference(K::Warehouse)),
                req("quantity", Number),
            ],
        ),
        named(K::Category),
        named(K::Brand),
        named(K::Unit),
        SchemaDescriptor::new(K::Warehouse, vec![req("name", Str), opt("address", Str)]),
        SchemaDescriptor::new(
            K::StockTransfer,
            vec![
                req("from", Reference(K::Warehouse)),
                req("to", Reference(K::Warehouse)),
                req("items", Array),
            ],
        ),
        SchemaDescriptor::new(
            K::StockAdjustment,
            vec![
                req("product", Reference(K::Product)),
                req("quantity", Number),
                opt("reason", Str),
            ],
        ),
        SchemaDescriptor::new(
            K::Employee,
            vec![
                req("name", Str),
                opt("designation", Str),
                opt("phone", Str),
                opt("salary", Number),
            ],
        ),
        SchemaDescriptor::new(
            K::Attendance,
            vec![
                req("employee", Reference(K::Employee)),
                req("date", Timestamp),
                opt("present", Bool),
            ],
        ),
        SchemaDescriptor::new(
            K::Salary,
            vec![
                req("employee", Reference(K::Employee)),
                req("month", Str),
                req("amount", Number),
            ],
        ),
        SchemaDescriptor::new(K::Holiday, vec![req("title", Str), req("date", Timestamp)]),
        SchemaDescriptor::new(
            K::Expense,
            vec![
                req("amount", Number),
                opt("category", Reference(K::ExpenseCategory)),
                opt("note", Str),
            ],
        ),
        named(K::ExpenseCategory),
        SchemaDescriptor::new(K::Income, vec![req("amount", Number), opt("source", Str)]),
        SchemaDescriptor::new(
            K::Bill,
            vec![req("bill_no", Str), req("amount", Number), opt("due_at", Timestamp)],
        ),
        SchemaDescriptor::new(
            K::Payment,
            vec![req("amount", Number), opt("method", Str), opt("reference", Str)],
        ),
        SchemaDescriptor::new(
            K::Account,
            vec![req("name", Str), opt("kind", Str), opt("balance", Number)],
        ),
        SchemaDescriptor::new(
            K::LedgerEntry,
            vec![
                req("account", Reference(K::Account)),
                req("debit", Number),
                req("credit", Number),
                opt("memo", Str),
            ],
        ),
        SchemaDescriptor::new(K::Donation, vec![req("amount", Number), opt("donor", Str)]),
        SchemaDescriptor::new(K::Service, vec![req("name", Str), opt("price", Number)]),
        SchemaDescriptor::new(K::Labour, vec![req("name", Str), opt("rate", Number)]),
        SchemaDescriptor::new(
            K::Appointment,
            vec![
                req("customer", Reference(K::Customer)),
                req("at", Timestamp),
                opt("vehicle", Reference(K::Vehicle)),
            ],
        ),
        SchemaDescriptor::new(
            K::Meeting,
            vec![req("title", Str), req("at", Timestamp), opt("attendees", Array)],
        ),
        SchemaDescriptor::new(
            K::Notification,
            vec![req("title", Str), opt("body", Str), opt("read", Bool)],
        ),
        SchemaDescriptor::new(
            K::Attachment,
            vec![req("url", Str), opt("owner", Any), opt("mime_type", Str)],
        ),
        SchemaDescriptor::new(K::Setting, vec![req("key", Str), req("value", Any)]),
        SchemaDescriptor::new(
            K::AuditLog,
            vec![req("action", Str), opt("actor", Reference(K::User)), opt("details", Object)],
        ),
    ]
}
