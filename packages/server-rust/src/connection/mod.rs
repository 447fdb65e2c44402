//! Per-tenant connection handles and the registry that owns them.

pub mod handle;
pub mod registry;

pub use handle::{ConnectionHandle, ConnectionId};
pub use registry::ConnectionRegistry;
