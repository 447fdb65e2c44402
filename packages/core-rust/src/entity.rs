//! The closed set of entity kinds every tenant database can hold.
//!
//! Business code names entities through [`EntityKind`] directly. Parsing from a
//! string only happens at the runtime boundary (e.g. a path segment), via
//! [`FromStr`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Returned when a string does not name any [`EntityKind`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown entity: {0}")]
pub struct UnknownEntityName(pub String);

macro_rules! entity_kinds {
    ($($variant:ident => $collection:literal,)+) => {
        /// Logical record kind, shared by every tenant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum EntityKind {
            $($variant,)+
        }

        impl EntityKind {
            /// Every kind, in declaration order.
            pub const ALL: &'static [EntityKind] = &[$(EntityKind::$variant,)+];

            /// Canonical model name (e.g. `"JobCard"`).
            #[must_use]
            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => stringify!($variant),)+
                }
            }

            /// Default collection name inside a tenant database.
            #[must_use]
            pub fn collection(self) -> &'static str {
                match self {
                    $(Self::$variant => $collection,)+
                }
            }
        }
    };
}

entity_kinds! {
    User => "users",
    Customer => "customers",
    Company => "companies",
    ShowRoom => "show_rooms",
    Vehicle => "vehicles",
    JobCard => "job_cards",
    Quotation => "quotations",
    Invoice => "invoices",
    MoneyReceipt => "money_receipts",
    Product => "products",
    Supplier => "suppliers",
    Purchase => "purchases",
    PurchaseOrder => "purchase_orders",
    Stock => "stocks",
    Category => "categories",
    Brand => "brands",
    Unit => "units",
    Warehouse => "warehouses",
    StockTransfer => "stock_transfers",
    StockAdjustment => "stock_adjustments",
    Employee => "employees",
    Attendance => "attendances",
    Salary => "salaries",
    Holiday => "holidays",
    Expense => "expenses",
    ExpenseCategory => "expense_categories",
    Income => "incomes",
    Bill => "bills",
    Payment => "payments",
    Account => "accounts",
    LedgerEntry => "ledger_entries",
    Donation => "donations",
    Service => "services",
    Labour => "labours",
    Appointment => "appointments",
    Meeting => "meetings",
    Notification => "notifications",
    Attachment => "attachments",
    Setting => "settings",
    AuditLog => "audit_logs",
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = UnknownEntityName;

    /// Matches the canonical model name, ignoring ASCII case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownEntityName(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn forty_distinct_kinds_with_distinct_collections() {
        assert_eq!(EntityKind::ALL.len(), 40);
        let names: HashSet<_> = EntityKind::ALL.iter().map(|k| k.as_str()).collect();
        let collections: HashSet<_> = EntityKind::ALL.iter().map(|k| k.collection()).collect();
        assert_eq!(names.len(), 40);
        assert_eq!(collections.len(), 40);
    }

    #[test]
    fn parse_ignores_case() {
        assert_eq!("Customer".parse::<EntityKind>(), Ok(EntityKind::Customer));
        assert_eq!("jobcard".parse::<EntityKind>(), Ok(EntityKind::JobCard));
        assert_eq!("MONEYRECEIPT".parse::<EntityKind>(), Ok(EntityKind::MoneyReceipt));
    }

    #[test]
    fn parse_rejects_unknown_and_collection_names() {
        assert_eq!(
            "Spaceship".parse::<EntityKind>(),
            Err(UnknownEntityName("Spaceship".to_string()))
        );
        assert!("job_cards".parse::<EntityKind>().is_err());
        assert!("".parse::<EntityKind>().is_err());
    }

    #[test]
    fn serde_uses_model_name() {
        let json = serde_json::to_string(&EntityKind::ShowRoom).unwrap();
        assert_eq!(json, "\"ShowRoom\"");
    }
}
