//! `PostgreSQL` [`Connector`] backed by one `sqlx` pool per tenant.
//!
//! Every tenant database holds a single `tenant_documents` table keyed by
//! `(collection, id)` with a `JSONB` body. The table is created on connect.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use parking_lot::Mutex;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::{Postgres, Transaction};
use tenantry_core::{Document, SchemaDescriptor, TenantId};

use crate::traits::{Connector, DatabaseSession, TenantDatabase};

const CREATE_DOCUMENTS_TABLE: &str = "CREATE TABLE IF NOT EXISTS tenant_documents (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    body JSONB NOT NULL,
    PRIMARY KEY (collection, id)
)";

const INSERT: &str = "INSERT INTO tenant_documents (collection, id, body) VALUES ($1, $2, $3)";
const SELECT_ONE: &str = "SELECT body FROM tenant_documents WHERE collection = $1 AND id = $2";
const SELECT_ALL: &str = "SELECT body FROM tenant_documents WHERE collection = $1 ORDER BY id";
const UPDATE: &str = "UPDATE tenant_documents SET body = $3 WHERE collection = $1 AND id = $2";
const DELETE: &str = "DELETE FROM tenant_documents WHERE collection = $1 AND id = $2";

/// Opens a bounded `sqlx` pool per tenant database.
#[derive(Debug, Clone)]
pub struct PgConnector {
    /// Maximum pooled connections per tenant.
    pub max_connections: u32,
    /// Maximum time to wait for a pooled connection.
    pub acquire_timeout: Duration,
}

impl Default for PgConnector {
    fn default() -> Self {
        Self {
            max_connections: 5,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl Connector for PgConnector {
    async fn connect(
        &self,
        tenant_id: &TenantId,
        uri: &str,
    ) -> anyhow::Result<Arc<dyn TenantDatabase>> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(uri)
            .await
            .with_context(|| format!("opening pool for tenant {tenant_id}"))?;

        sqlx::query(CREATE_DOCUMENTS_TABLE)
            .execute(&pool)
            .await
            .context("creating tenant_documents")?;

        Ok(Arc::new(PgConnection {
            pool,
            registered: Mutex::new(HashSet::new()),
        }))
    }
}

/// A tenant's connection pool.
pub struct PgConnection {
    pool: PgPool,
    registered: Mutex<HashSet<String>>,
}

#[async_trait]
impl TenantDatabase for PgConnection {
    fn register_collection(&self, schema: &SchemaDescriptor) -> anyhow::Result<()> {
        if !self.registered.lock().insert(schema.collection.clone()) {
            bail!(
                "collection {} already registered on this connection",
                schema.collection
            );
        }
        Ok(())
    }

    fn is_registered(&self, collection: &str) -> bool {
        self.registered.lock().contains(collection)
    }

    async fn insert(&self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<()> {
        sqlx::query(INSERT)
            .bind(collection)
            .bind(id)
            .bind(Json(doc))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let row: Option<(Json<Document>,)> = sqlx::query_as(SELECT_ONE)
            .bind(collection)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    async fn find_all(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        let rows: Vec<(Json<Document>,)> = sqlx::query_as(SELECT_ALL)
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(Json(doc),)| doc).collect())
    }

    async fn update(&self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<bool> {
        let result = sqlx::query(UPDATE)
            .bind(collection)
            .bind(id)
            .bind(Json(doc))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(DELETE)
            .bind(collection)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseSession>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgSession { tx }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

/// A `sqlx` transaction. Dropping it unfinished rolls back.
struct PgSession {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl DatabaseSession for PgSession {
    async fn insert(&mut self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<()> {
        sqlx::query(INSERT)
            .bind(collection)
            .bind(id)
            .bind(Json(doc))
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn find(&mut self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        let row: Option<(Json<Document>,)> = sqlx::query_as(SELECT_ONE)
            .bind(collection)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.map(|(Json(doc),)| doc))
    }

    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        doc: &Document,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(UPDATE)
            .bind(collection)
            .bind(id)
            .bind(Json(doc))
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete(&mut self, collection: &str, id: &str) -> anyhow::Result<bool> {
        let result = sqlx::query(DELETE)
            .bind(collection)
            .bind(id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let Self { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        let Self { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
