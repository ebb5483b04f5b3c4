//! Lookup dataset resolution with per-spec TTL caching and single-flight
//! coalescing

use crate::clock::SharedClock;
use crate::datasource::{AdapterRegistry, Row, DEFAULT_KEY_PARAMETER};
use crate::error::{ApexError, DataSourceErrorClass, Result};
use crate::model::{Dataset, DatasetRef, LookupSpec};
use crate::types::{from_yaml, Value};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Upper bound on cached keys per lookup spec; the stalest entry is evicted
/// when a fresh insert would exceed it.
const MAX_CACHE_ENTRIES: usize = 1024;

struct CacheEntry {
    row: Option<Row>,
    inserted_at: DateTime<Utc>,
}

/// Per-spec cache with TTL eviction, a size bound, and per-key resolution
/// coalescing.
#[derive(Default)]
struct LookupCache {
    entries: DashMap<String, CacheEntry>,
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl LookupCache {
    fn flight_guard(&self, key: &str) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock();
        in_flight.entry(key.to_string()).or_default().clone()
    }

    fn release_flight(&self, key: &str) {
        self.in_flight.lock().remove(key);
    }
}

/// Resolves lookup specs into rows, caching per spec.
pub struct LookupProvider {
    adapters: Arc<AdapterRegistry>,
    clock: SharedClock,
    caches: DashMap<Arc<str>, Arc<LookupCache>>,
    file_datasets: DashMap<String, Arc<Dataset>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl LookupProvider {
    /// Provider over a set of adapters and the engine clock.
    pub fn new(adapters: Arc<AdapterRegistry>, clock: SharedClock) -> Self {
        LookupProvider {
            adapters,
            clock,
            caches: DashMap::new(),
            file_datasets: DashMap::new(),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Resolve a lookup key against the spec's dataset.
    ///
    /// A disabled cache resolves fresh on every call; an enabled cache serves
    /// entries strictly younger than the TTL and coalesces concurrent
    /// resolutions of the same missing key.
    pub fn resolve(&self, spec_id: &Arc<str>, spec: &LookupSpec, key: &Value) -> Result<Option<Row>> {
        if !spec.cache_enabled {
            return self.resolve_fresh(spec, key);
        }

        let cache = self
            .caches
            .entry(spec_id.clone())
            .or_insert_with(|| Arc::new(LookupCache::default()))
            .clone();
        let cache_key = key.render();

        if let Some(row) = self.cached_row(&cache, &cache_key, spec.cache_ttl_seconds) {
            return Ok(row);
        }

        // Single resolution per (spec, key): the first caller resolves while
        // the rest wait on the flight guard, then read the fresh entry.
        let flight = cache.flight_guard(&cache_key);
        let _guard = flight.lock();

        if let Some(row) = self.cached_row(&cache, &cache_key, spec.cache_ttl_seconds) {
            cache.release_flight(&cache_key);
            return Ok(row);
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let resolved = self.resolve_fresh(spec, key);
        if let Ok(row) = &resolved {
            if cache.entries.len() >= MAX_CACHE_ENTRIES {
                evict_stalest(&cache);
            }
            cache.entries.insert(
                cache_key.clone(),
                CacheEntry {
                    row: row.clone(),
                    inserted_at: self.clock.now(),
                },
            );
        }
        cache.release_flight(&cache_key);
        resolved
    }

    fn cached_row(&self, cache: &LookupCache, cache_key: &str, ttl_seconds: u64) -> Option<Option<Row>> {
        let entry = cache.entries.get(cache_key)?;
        let age = self.clock.now() - entry.inserted_at;
        if age < chrono::Duration::seconds(ttl_seconds as i64) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            trace!(key = cache_key, "lookup cache hit");
            return Some(entry.row.clone());
        }
        drop(entry);
        cache.entries.remove(cache_key);
        None
    }

    fn resolve_fresh(&self, spec: &LookupSpec, key: &Value) -> Result<Option<Row>> {
        match &spec.dataset {
            DatasetRef::Inline(dataset) => Ok(dataset.find(key).cloned()),
            DatasetRef::ExternalFile { path, key_field } => {
                let dataset = self.file_dataset(path, key_field)?;
                Ok(dataset.find(key).cloned())
            }
            DatasetRef::DataSource { name, query_ref } => {
                let adapter = self.adapters.get(name).ok_or_else(|| {
                    ApexError::data_source(
                        DataSourceErrorClass::Configuration,
                        format!("no adapter registered for data source '{name}'"),
                    )
                })?;
                let mut parameters = Row::new();
                parameters.insert(DEFAULT_KEY_PARAMETER.to_string(), key.clone());
                adapter.query(query_ref, &parameters)
            }
        }
    }

    /// Load an external dataset file once and keep it.
    fn file_dataset(&self, path: &str, key_field: &str) -> Result<Arc<Dataset>> {
        if let Some(dataset) = self.file_datasets.get(path) {
            return Ok(dataset.clone());
        }
        let content = std::fs::read_to_string(path)?;
        let node: serde_yaml::Value = serde_yaml::from_str(&content)?;
        let rows_node = match &node {
            serde_yaml::Value::Mapping(map) => map
                .get("data")
                .cloned()
                .unwrap_or(serde_yaml::Value::Sequence(Vec::new())),
            other => other.clone(),
        };
        let mut rows = Vec::new();
        if let serde_yaml::Value::Sequence(seq) = rows_node {
            for entry in &seq {
                if let Value::Map(map) = from_yaml(entry) {
                    rows.push((*map).clone());
                }
            }
        }
        let dataset = Arc::new(Dataset {
            rows,
            key_field: key_field.to_string(),
        });
        self.file_datasets.insert(path.to_string(), dataset.clone());
        Ok(dataset)
    }

    /// Cache hits since construction.
    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    /// Cache misses since construction.
    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }
}

fn evict_stalest(cache: &LookupCache) {
    let stalest = cache
        .entries
        .iter()
        .min_by_key(|entry| entry.value().inserted_at)
        .map(|entry| entry.key().clone());
    if let Some(key) = stalest {
        cache.entries.remove(&key);
    }
}
