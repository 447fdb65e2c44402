//! [`Connector`](crate::traits::Connector) implementations.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

pub use memory::{MemoryConnection, MemoryConnector, MemoryStore};
#[cfg(feature = "postgres")]
pub use postgres::PgConnector;
