use serde_json::{Map, Value};

/// A record as read from or written to a tenant database.
///
/// Uses JSON objects so the same shape maps onto document stores and
/// `JSONB` columns alike.
pub type Document = Map<String, Value>;

/// Name of the field that carries a record's key.
pub const ID_FIELD: &str = "id";

/// Returns the record key if the document carries a string `id`.
#[must_use]
pub fn document_id(doc: &Document) -> Option<&str> {
    doc.get(ID_FIELD).and_then(Value::as_str)
}
