//! Tenantry server runtime: resolves a request domain to a tenant, shares one
//! database connection per tenant, and binds schema-checked entity models on it.

pub mod config;
pub mod connection;
pub mod context;
pub mod directory;
pub mod drivers;
pub mod error;
pub mod model;
pub mod observability;
pub mod resolver;
pub mod telemetry;
pub mod traits;
pub mod transaction;

pub use config::TenancyConfig;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use context::CallContext;
pub use directory::{MemoryTenantStore, TenantDirectory};
pub use error::{ConnectError, ErrorClass, TenancyError};
pub use model::{EntityBinding, ModelRegistry};
pub use resolver::{TenantModel, TenantResolver, TenantResolverBuilder};
pub use traits::{Connector, DatabaseSession, TenantDatabase, TenantStore};
pub use transaction::{with_transaction, TenantSession};
