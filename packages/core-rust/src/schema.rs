//! Statically-typed schema descriptors for entity kinds.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::entity::EntityKind;
use crate::types::{Document, ID_FIELD};

/// Value shape a field must have when present.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Number,
    Bool,
    /// Millis since epoch, stored as an integer.
    Timestamp,
    /// Key of a record of another kind in the same tenant database.
    Reference(EntityKind),
    Array,
    Object,
    /// Any JSON value.
    Any,
}

impl FieldType {
    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String | Self::Reference(_) => value.is_string(),
            Self::Number => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::Timestamp => value.is_i64() || value.is_u64(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
            Self::Any => true,
        }
    }
}

/// Single field definition within a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Name of the field.
    pub name: String,
    pub field_type: FieldType,
    /// Whether the field must be present (and non-null) in every record.
    pub required: bool,
}

impl FieldDef {
    #[must_use]
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
        }
    }

    #[must_use]
    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: false,
        }
    }
}

/// Result of validating a document against a schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    /// The document conforms to the schema.
    Valid,
    /// The document violates one or more schema constraints.
    Invalid {
        /// Human-readable descriptions of each validation failure.
        errors: Vec<String>,
    },
}

impl ValidationResult {
    #[must_use]
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

/// Schema definition for one entity kind.
///
/// Identical for every tenant; only the database it is bound against differs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub entity: EntityKind,
    /// Collection (table) the entity lives in.
    pub collection: String,
    /// Schema version for migrations and compatibility checks.
    pub version: u32,
    /// Field definitions that comprise this entity's schema.
    pub fields: Vec<FieldDef>,
    /// Whether fields not listed in `fields` are rejected.
    pub strict: bool,
}

impl SchemaDescriptor {
    /// Creates a non-strict version-1 descriptor stored in the kind's default
    /// collection.
    #[must_use]
    pub fn new(entity: EntityKind, fields: Vec<FieldDef>) -> Self {
        Self {
            entity,
            collection: entity.collection().to_string(),
            version: 1,
            fields,
            strict: false,
        }
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    /// Looks up a field definition by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validates a full document (used on create and replace).
    ///
    /// The `id` field is always allowed. A `null` value counts as absent.
    #[must_use]
    pub fn validate(&self, doc: &Document) -> ValidationResult {
        let mut errors = Vec::new();

        for field in &self.fields {
            match doc.get(&field.name) {
                None | Some(Value::Null) => {
                    if field.required {
                        errors.push(format!("missing required field `{}`", field.name));
                    }
                }
                Some(value) => {
                    if !field.field_type.accepts(value) {
                        errors.push(format!(
                            "field `{}` expected {:?}",
                            field.name, field.field_type
                        ));
                    }
                }
            }
        }

        if self.strict {
            for key in doc.keys() {
                if key != ID_FIELD && self.field(key).is_none() {
                    errors.push(format!("unknown field `{key}`"));
                }
            }
        }

        if errors.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid { errors }
        }
    }
}
