//! HTTP response cache for GitHub GETs.
//!
//! Entries are keyed by the normalized request URL (path plus sorted query,
//! without scheme or host) and carry the response `ETag` and `max-age`, so a
//! stale entry can still be revalidated cheaply with `If-None-Match`.
//!
//! Bodies live either in memory or, when a directory is configured, in files
//! named by the SHA-256 of the key. The index is always in memory: nothing
//! survives a restart, and a disk cache left over from a previous run is
//! simply overwritten. Total body size is capped by a byte budget; the least
//! recently used entries are evicted first.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// A cached response body with its validators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub body: String,
    pub etag: Option<String>,
    pub fetched_at: DateTime<Utc>,
    pub max_age: Duration,
}

impl CachedResponse {
    /// Returns true if the response may be served without revalidation.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.max_age) {
            Ok(max_age) => now < self.fetched_at + max_age,
            Err(_) => false,
        }
    }
}

/// Where cached bodies are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStore {
    Memory,
    Disk(PathBuf),
}

#[derive(Debug)]
struct Slot {
    etag: Option<String>,
    fetched_at: DateTime<Utc>,
    max_age: Duration,
    /// `None` when the body is on disk.
    body: Option<String>,
    size: usize,
    last_used: u64,
}

#[derive(Debug, Default)]
struct Index {
    slots: HashMap<String, Slot>,
    bytes: usize,
    clock: u64,
}

impl Index {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Size-bounded LRU cache of GitHub responses.
#[derive(Debug)]
pub struct ResponseCache {
    index: Mutex<Index>,
    store: CacheStore,
    budget: usize,
}

impl ResponseCache {
    pub fn in_memory(budget: usize) -> Self {
        Self {
            index: Mutex::new(Index::default()),
            store: CacheStore::Memory,
            budget,
        }
    }

    /// Creates a disk-backed cache, creating `dir` if needed.
    pub fn on_disk(dir: impl Into<PathBuf>, budget: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            index: Mutex::new(Index::default()),
            store: CacheStore::Disk(dir),
            budget,
        })
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    /// Looks up a cached response. Marks the entry as recently used.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let (etag, fetched_at, max_age, body) = {
            let mut index = self.lock();
            let now = index.tick();
            let slot = index.slots.get_mut(key)?;
            slot.last_used = now;
            (
                slot.etag.clone(),
                slot.fetched_at,
                slot.max_age,
                slot.body.clone(),
            )
        };

        let body = match (body, &self.store) {
            (Some(body), _) => body,
            (None, CacheStore::Disk(dir)) => match fs::read_to_string(body_path(dir, key)) {
                Ok(body) => body,
                Err(e) => {
                    tracing::warn!(key, error = %e, "cached body unreadable, dropping entry");
                    self.delete(key);
                    return None;
                }
            },
            (None, CacheStore::Memory) => return None,
        };

        Some(CachedResponse {
            body,
            etag,
            fetched_at,
            max_age,
        })
    }

    /// Stores a response, evicting least recently used entries to stay
    /// within the byte budget. Bodies larger than the whole budget are not
    /// cached.
    pub fn put(&self, key: &str, response: CachedResponse) {
        let size = response.body.len();
        if size > self.budget {
            self.delete(key);
            return;
        }

        let body = match &self.store {
            CacheStore::Memory => Some(response.body),
            CacheStore::Disk(dir) => {
                if let Err(e) = fs::write(body_path(dir, key), response.body.as_bytes()) {
                    tracing::warn!(key, error = %e, "failed to write cached body");
                    self.delete(key);
                    return;
                }
                None
            }
        };

        let evicted = {
            let mut index = self.lock();
            let now = index.tick();
            if let Some(old) = index.slots.remove(key) {
                index.bytes -= old.size;
            }
            index.bytes += size;
            index.slots.insert(
                key.to_string(),
                Slot {
                    etag: response.etag,
                    fetched_at: response.fetched_at,
                    max_age: response.max_age,
                    body,
                    size,
                    last_used: now,
                },
            );
            self.evict(&mut index, key)
        };
        self.remove_files(&evicted);
    }

    /// Marks an entry as revalidated (after a `304 Not Modified`).
    pub fn touch(&self, key: &str, fetched_at: DateTime<Utc>, max_age: Duration) {
        let mut index = self.lock();
        let now = index.tick();
        if let Some(slot) = index.slots.get_mut(key) {
            slot.fetched_at = fetched_at;
            slot.max_age = max_age;
            slot.last_used = now;
        }
    }

    /// Drops one entry.
    pub fn delete(&self, key: &str) {
        let removed = {
            let mut index = self.lock();
            match index.slots.remove(key) {
                Some(slot) => {
                    index.bytes -= slot.size;
                    true
                }
                None => false,
            }
        };
        if removed {
            self.remove_files(&[key.to_string()]);
        }
    }

    /// Drops the entry for `resource` and everything beneath it: sub-paths
    /// (`resource/...`) and query variants (`resource?...`).
    pub fn delete_resource(&self, resource: &str) {
        let resource = normalize_key(resource);
        let removed: Vec<String> = {
            let mut index = self.lock();
            let keys: Vec<String> = index
                .slots
                .keys()
                .filter(|key| is_under(key, &resource))
                .cloned()
                .collect();
            for key in &keys {
                if let Some(slot) = index.slots.remove(key) {
                    index.bytes -= slot.size;
                }
            }
            keys
        };
        self.remove_files(&removed);
    }

    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of cached bodies.
    pub fn size_bytes(&self) -> usize {
        self.lock().bytes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Index> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Evicts LRU entries (never `keep`) until within budget. Returns the
    /// evicted keys.
    fn evict(&self, index: &mut Index, keep: &str) -> Vec<String> {
        let mut evicted = Vec::new();
        while index.bytes > self.budget {
            let victim = index
                .slots
                .iter()
                .filter(|(key, _)| key.as_str() != keep)
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else { break };
            if let Some(slot) = index.slots.remove(&victim) {
                index.bytes -= slot.size;
            }
            evicted.push(victim);
        }
        evicted
    }

    fn remove_files(&self, keys: &[String]) {
        let CacheStore::Disk(dir) = &self.store else {
            return;
        };
        for key in keys {
            if let Err(e) = fs::remove_file(body_path(dir, key))
                && e.kind() != io::ErrorKind::NotFound
            {
                tracing::warn!(key = %key, error = %e, "failed to remove cached body");
            }
        }
    }
}

/// Normalizes a request URL into a cache key.
///
/// Drops scheme and host and sorts query parameters, so
/// `https://api.github.com/x?b=2&a=1` and `/x?a=1&b=2` share an entry.
pub fn normalize_key(url: &str) -> String {
    let path = match url.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |idx| &rest[idx..]),
        None => url,
    };
    match path.split_once('?') {
        Some((path, query)) => {
            let mut params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();
            params.sort_unstable();
            if params.is_empty() {
                path.to_string()
            } else {
                format!("{}?{}", path, params.join("&"))
            }
        }
        None => path.to_string(),
    }
}

fn is_under(key: &str, resource: &str) -> bool {
    match key.strip_prefix(resource) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || rest.starts_with('?'),
        None => false,
    }
}

fn body_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(hex::encode(Sha256::digest(key.as_bytes())))
}
