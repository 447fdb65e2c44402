//! Tenant directory: domain → [`TenantRecord`] with activity and subscription
//! checks.
//!
//! Nothing is cached here. Every [`resolve`](TenantDirectory::resolve)
//! re-reads the control-plane store, so a deactivation or expiry takes effect
//! on the very next call.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::fmt;
use std::sync::Arc;

use tenantry_core::{now_millis, TenantRecord};
use tracing::debug;

use crate::error::TenancyError;
use crate::observability;
use crate::traits::TenantStore;

pub use memory::MemoryTenantStore;
#[cfg(feature = "postgres")]
pub use postgres::PgTenantStore;

/// Wall-clock source in millis since epoch.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Resolves tenant domains against a [`TenantStore`].
#[derive(Clone)]
pub struct TenantDirectory {
    store: Arc<dyn TenantStore>,
    clock: Clock,
    enforce_expiry: bool,
}

impl TenantDirectory {
    /// Creates a directory over `store` using the system clock. Subscription
    /// expiry is ignored until [`enforce_expiry`](Self::enforce_expiry) turns
    /// it on.
    #[must_use]
    pub fn new(store: Arc<dyn TenantStore>) -> Self {
        Self {
            store,
            clock: Arc::new(now_millis),
            enforce_expiry: false,
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn enforce_expiry(mut self, enforce: bool) -> Self {
        self.enforce_expiry = enforce;
        self
    }

    /// Looks up `domain` (case-insensitive exact match) and checks that the
    /// tenant may open new work.
    ///
    /// # Errors
    ///
    /// - [`TenancyError::TenantNotFound`] if no record matches
    /// - [`TenancyError::TenantInactive`] if the record is switched off
    /// - [`TenancyError::SubscriptionInvalid`] if the subscription is unpaid,
    ///   inactive or expired
    /// - [`TenancyError::DirectoryUnavailable`] if the store fails
    pub async fn resolve(&self, domain: &str) -> Result<TenantRecord, TenancyError> {
        let record = self
            .store
            .find_by_domain(domain)
            .await
            .map_err(TenancyError::DirectoryUnavailable)?;

        let Some(record) = record else {
            observability::directory_rejected("not_found");
            debug!(domain, "tenant not found");
            return Err(TenancyError::TenantNotFound {
                domain: domain.to_string(),
            });
        };

        if !record.active {
            observability::directory_rejected("inactive");
            debug!(domain, tenant_id = %record.id, "tenant inactive");
            return Err(TenancyError::TenantInactive {
                tenant_id: record.id,
            });
        }

        if let Err(issue) = record
            .subscription
            .check((self.clock)(), self.enforce_expiry)
        {
            observability::directory_rejected("subscription");
            debug!(domain, tenant_id = %record.id, %issue, "subscription rejected");
            return Err(TenancyError::SubscriptionInvalid {
                tenant_id: record.id,
                issue,
            });
        }

        Ok(record)
    }
}

impl fmt::Debug for TenantDirectory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantDirectory")
            .field("enforce_expiry", &self.enforce_expiry)
            .finish_non_exhaustive()
    }
}
