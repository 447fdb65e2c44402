//! In-memory [`Connector`] implementation.
//!
//! Each distinct URI maps to one durable [`MemoryStore`] that outlives
//! individual connections, so data committed through one connection is visible
//! through any later connection to the same URI. Collection registration is
//! tracked per connection, mirroring drivers that keep a model table on the
//! connection object.
//!
//! The connector counts connection attempts and can inject latency and
//! failures, which makes it the default backend for tests and the probe.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tenantry_core::{Document, SchemaDescriptor, TenantId};

use crate::traits::{Connector, DatabaseSession, TenantDatabase};

type Collections = HashMap<String, BTreeMap<String, Document>>;

/// Durable state behind one URI.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<Collections>,
}

impl MemoryStore {
    fn get(&self, collection: &str, id: &str) -> Option<Document> {
        self.collections
            .read()
            .get(collection)
            .and_then(|records| records.get(id).cloned())
    }

    /// Returns every committed record of `collection`, ordered by key.
    #[must_use]
    pub fn records(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of committed records in `collection`.
    #[must_use]
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

/// Opens [`MemoryConnection`]s, one store per URI.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    stores: DashMap<String, Arc<MemoryStore>>,
    attempts: AtomicU64,
    attempts_by_uri: DashMap<String, u64>,
    failures: DashMap<String, String>,
    connect_delay: Mutex<Duration>,
}

impl MemoryConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every connection attempt by `delay`.
    #[must_use]
    pub fn with_connect_delay(self, delay: Duration) -> Self {
        self.set_connect_delay(delay);
        self
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        *self.connect_delay.lock() = delay;
    }

    /// Makes every attempt against `uri` fail with `message` until cleared.
    pub fn fail_connections(&self, uri: &str, message: &str) {
        self.failures.insert(uri.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, uri: &str) {
        self.failures.remove(uri);
    }

    /// Total connection attempts, successful or not.
    #[must_use]
    pub fn connect_attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Connection attempts against a single URI.
    #[must_use]
    pub fn connect_attempts_for(&self, uri: &str) -> u64 {
        self.attempts_by_uri.get(uri).map_or(0, |n| *n)
    }

    /// The durable store behind `uri`, if any connection has reached it.
    #[must_use]
    pub fn store(&self, uri: &str) -> Option<Arc<MemoryStore>> {
        self.stores.get(uri).map(|s| Arc::clone(s.value()))
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        _tenant_id: &TenantId,
        uri: &str,
    ) -> anyhow::Result<Arc<dyn TenantDatabase>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        *self.attempts_by_uri.entry(uri.to_string()).or_insert(0) += 1;

        let delay = *self.connect_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(message) = self.failures.get(uri) {
            bail!("{}", message.value());
        }

        let store = Arc::clone(
            self.stores
                .entry(uri.to_string())
                .or_insert_with(|| Arc::new(MemoryStore::default()))
                .value(),
        );

        Ok(Arc::new(MemoryConnection {
            store,
            registered: Mutex::new(HashSet::new()),
            closed: AtomicBool::new(false),
        }))
    }
}

/// A connection to one [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryConnection {
    store: Arc<MemoryStore>,
    registered: Mutex<HashSet<String>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            bail!("connection is closed");
        }
        Ok(())
    }
}

#[async_trait]
impl TenantDatabase for MemoryConnection {
    fn register_collection(&self, schema: &SchemaDescriptor) -> anyhow::Result<()> {
        self.ensure_open()?;
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
        self.ensure_open()?;
        let mut collections = self.store.collections.write();
        let records = collections.entry(collection.to_string()).or_default();
        if records.contains_key(id) {
            bail!("duplicate key {id} in {collection}");
        }
        records.insert(id.to_string(), doc.clone());
        Ok(())
    }

    async fn find(&self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        self.ensure_open()?;
        Ok(self.store.get(collection, id))
    }

    async fn find_all(&self, collection: &str) -> anyhow::Result<Vec<Document>> {
        self.ensure_open()?;
        Ok(self.store.records(collection))
    }

    async fn update(&self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<bool> {
        self.ensure_open()?;
        let mut collections = self.store.collections.write();
        match collections.get_mut(collection).and_then(|r| r.get_mut(id)) {
            Some(slot) => {
                *slot = doc.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> anyhow::Result<bool> {
        self.ensure_open()?;
        let mut collections = self.store.collections.write();
        Ok(collections
            .get_mut(collection)
            .is_some_and(|records| records.remove(id).is_some()))
    }

    async fn begin(&self) -> anyhow::Result<Box<dyn DatabaseSession>> {
        self.ensure_open()?;
        Ok(Box::new(MemorySession {
            store: Arc::clone(&self.store),
            staged: HashMap::new(),
        }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// A write buffered by a [`MemorySession`].
#[derive(Debug, Clone)]
enum Staged {
    /// New key; commit fails if another writer created it first.
    Insert(Document),
    Put(Document),
    Delete,
}

impl Staged {
    fn document(&self) -> Option<&Document> {
        match self {
            Self::Insert(doc) | Self::Put(doc) => Some(doc),
            Self::Delete => None,
        }
    }
}

/// Buffers writes until commit.
struct MemorySession {
    store: Arc<MemoryStore>,
    staged: HashMap<(String, String), Staged>,
}

impl MemorySession {
    fn staged(&self, collection: &str, id: &str) -> Option<&Staged> {
        self.staged.get(&(collection.to_string(), id.to_string()))
    }

    fn view(&self, collection: &str, id: &str) -> Option<Document> {
        match self.staged(collection, id) {
            Some(staged) => staged.document().cloned(),
            None => self.store.get(collection, id),
        }
    }

    fn stage(&mut self, collection: &str, id: &str, write: Staged) {
        self.staged
            .insert((collection.to_string(), id.to_string()), write);
    }

    fn unstage(&mut self, collection: &str, id: &str) {
        self.staged.remove(&(collection.to_string(), id.to_string()));
    }
}

#[async_trait]
impl DatabaseSession for MemorySession {
    async fn insert(&mut self, collection: &str, id: &str, doc: &Document) -> anyhow::Result<()> {
        let write = match self.staged(collection, id) {
            Some(Staged::Delete) => Staged::Put(doc.clone()),
            Some(_) => bail!("duplicate key {id} in {collection}"),
            None if self.store.get(collection, id).is_some() => {
                bail!("duplicate key {id} in {collection}")
            }
            None => Staged::Insert(doc.clone()),
        };
        self.stage(collection, id, write);
        Ok(())
    }

    async fn find(&mut self, collection: &str, id: &str) -> anyhow::Result<Option<Document>> {
        Ok(self.view(collection, id))
    }

    async fn update(
        &mut self,
        collection: &str,
        id: &str,
        doc: &Document,
    ) -> anyhow::Result<bool> {
        let write = match self.staged(collection, id) {
            Some(Staged::Insert(_)) => Staged::Insert(doc.clone()),
            Some(Staged::Put(_)) => Staged::Put(doc.clone()),
            Some(Staged::Delete) => return Ok(false),
            None if self.store.get(collection, id).is_some() => Staged::Put(doc.clone()),
            None => return Ok(false),
        };
        self.stage(collection, id, write);
        Ok(true)
    }

    async fn delete(&mut self, collection: &str, id: &str) -> anyhow::Result<bool> {
        let committed = match self.staged(collection, id) {
            Some(Staged::Insert(_)) => false,
            Some(Staged::Put(_)) => true,
            Some(Staged::Delete) => return Ok(false),
            None if self.store.get(collection, id).is_some() => true,
            None => return Ok(false),
        };
        if committed {
            self.stage(collection, id, Staged::Delete);
        } else {
            self.unstage(collection, id);
        }
        Ok(true)
    }

    /// Applies every staged write under one store lock, or none of them if a
    /// staged insert collides with a key committed since it was staged.
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        let Self { store, staged } = *self;
        let mut collections = store.collections.write();
        for ((collection, id), write) in &staged {
            let taken = collections
                .get(collection)
                .is_some_and(|records| records.contains_key(id));
            if taken && matches!(write, Staged::Insert(_)) {
                bail!("duplicate key {id} in {collection}");
            }
        }
        for ((collection, id), write) in staged {
            let records = collections.entry(collection).or_default();
            match write {
                Staged::Insert(doc) | Staged::Put(doc) => {
                    records.insert(id, doc);
                }
                Staged::Delete => {
                    records.remove(&id);
                }
            }
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        Ok(())
    }
}
