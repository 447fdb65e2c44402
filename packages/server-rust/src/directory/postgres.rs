//! `PostgreSQL` [`TenantStore`] reading the control-plane `tenants` table.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use tenantry_core::{normalize_domain, SubscriptionSnapshot, TenantId, TenantRecord};

use crate::traits::TenantStore;

/// Folds only `A-Z` on the stored column, matching [`normalize_domain`] on the
/// bound key. `lower()` would also fold non-ASCII letters.
const FIND_BY_DOMAIN: &str = "SELECT id, domain, connection_uri, active, \
     plan, paid, subscription_active, expires_at_millis \
     FROM tenants \
     WHERE translate(domain, 'ABCDEFGHIJKLMNOPQRSTUVWXYZ', 'abcdefghijklmnopqrstuvwxyz') = $1 \
     LIMIT 1";

/// Control-plane store on a shared `PostgreSQL` pool.
///
/// Expects a `tenants` table with the columns selected by [`FIND_BY_DOMAIN`];
/// `expires_at_millis` may be `NULL`.
#[derive(Debug, Clone)]
pub struct PgTenantStore {
    pool: PgPool,
}

impl PgTenantStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn record_from_row(row: &PgRow) -> Result<TenantRecord, sqlx::Error> {
    Ok(TenantRecord {
        id: TenantId::new(row.try_get::<String, _>("id")?),
        domain: row.try_get("domain")?,
        connection_uri: row.try_get("connection_uri")?,
        active: row.try_get("active")?,
        subscription: SubscriptionSnapshot {
            plan: row.try_get("plan")?,
            paid: row.try_get("paid")?,
            active: row.try_get("subscription_active")?,
            expires_at_millis: row.try_get("expires_at_millis")?,
        },
    })
}

#[async_trait]
impl TenantStore for PgTenantStore {
    async fn find_by_domain(&self, domain: &str) -> anyhow::Result<Option<TenantRecord>> {
        let row = sqlx::query(FIND_BY_DOMAIN)
            .bind(normalize_domain(domain))
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(record_from_row).transpose()?)
    }
}
