//! In-memory [`TenantStore`] keyed by normalized domain.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{bail, Context as _};
use async_trait::async_trait;
use dashmap::DashMap;
use tenantry_core::{normalize_domain, TenantRecord};

use crate::traits::TenantStore;

/// Control-plane store held in a [`DashMap`].
///
/// Mutations are visible to the very next lookup, which makes it suitable for
/// exercising activation and subscription changes in tests.
#[derive(Debug, Default)]
pub struct MemoryTenantStore {
    records: DashMap<String, TenantRecord>,
    lookups: AtomicU64,
}

impl MemoryTenantStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from records, rejecting duplicate domains.
    ///
    /// # Errors
    ///
    /// Returns an error if two records share a domain (ignoring case).
    pub fn from_records(records: impl IntoIterator<Item = TenantRecord>) -> anyhow::Result<Self> {
        let store = Self::new();
        for record in records {
            let domain = record.domain.clone();
            if store.insert(record).is_some() {
                bail!("duplicate tenant domain {domain}");
            }
        }
        Ok(store)
    }

    /// Loads a JSON array of [`TenantRecord`]s.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or contains
    /// duplicate domains.
    pub fn load_json(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading tenants from {}", path.display()))?;
        let records: Vec<TenantRecord> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing tenants from {}", path.display()))?;
        Self::from_records(records)
    }

    /// Inserts or replaces the record for its domain, returning the previous one.
    pub fn insert(&self, record: TenantRecord) -> Option<TenantRecord> {
        self.records.insert(record.normalized_domain(), record)
    }

    /// Applies `f` to the record for `domain` in place. Returns `false` if
    /// absent.
    ///
    /// A record whose domain changes is stored under its new key before the
    /// old key is dropped, so concurrent lookups always find one of them.
    pub fn update(&self, domain: &str, f: impl FnOnce(&mut TenantRecord)) -> bool {
        let key = normalize_domain(domain);
        let moved = {
            let Some(mut entry) = self.records.get_mut(&key) else {
                return false;
            };
            f(entry.value_mut());
            let new_key = entry.normalized_domain();
            (new_key != key).then(|| (new_key, entry.value().clone()))
        };
        if let Some((new_key, record)) = moved {
            self.records.insert(new_key, record);
            self.records.remove(&key);
        }
        true
    }

    pub fn set_active(&self, domain: &str, active: bool) -> bool {
        self.update(domain, |record| record.active = active)
    }

    pub fn remove(&self, domain: &str) -> Option<TenantRecord> {
        self.records
            .remove(&normalize_domain(domain))
            .map(|(_, record)| record)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of `find_by_domain` calls served so far.
    #[must_use]
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn find_by_domain(&self, domain: &str) -> anyhow::Result<Option<TenantRecord>> {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .records
            .get(&normalize_domain(domain))
            .map(|entry| entry.value().clone()))
    }
}
