use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::debug;

pub const CHANNELS_LIST_KEY: &str = "channels_list";

/// A single stored value. Entries are never touched after they're written, a new `set`
/// replaces the whole thing.
#[derive(Debug)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: Arc<V>,
    pub stored_at: Instant,
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.stored_at) >= self.ttl
    }
}

/// in-process ttl store, keys are bounded by the channel count so there's no eviction
/// besides the ttl and expired entries are only dropped when somebody reads them
pub struct MemoryCache<V> {
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    default_ttl: Duration,
}

impl<V> MemoryCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn get(&self, key: &str) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();

        match entries.get(key) {
            None => None,
            Some(entry) if !entry.is_expired(Instant::now()) => Some(entry.value.clone()),
            Some(_) => {
                debug!("cache entry expired: {}", key);
                entries.remove(key);
                None
            }
        }
    }

    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) -> Arc<V> {
        let key = key.into();
        let value = Arc::new(value);

        let entry = CacheEntry {
            key: key.clone(),
            value: value.clone(),
            stored_at: Instant::now(),
            ttl,
        };

        self.entries.lock().insert(key, entry);
        value
    }

    /// `set` with the ttl the cache was built with
    pub fn put(&self, key: impl Into<String>, value: V) -> Arc<V> {
        self.set(key, value, self.default_ttl)
    }

    pub fn remove(&self, key: &str) -> Option<Arc<V>> {
        self.entries.lock().remove(key).map(|entry| entry.value)
    }

    /// counts expired entries too, they stay around until read
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn hash_key(raw: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(raw.as_bytes());
    hex::encode(hasher.finalize())
}

/// `token_<hash>` keyed by playlist url (or a segment directory under it)
pub fn grant_key(url: &str) -> String {
    format!("token_{}", hash_key(url))
}

pub fn play_info_key(channel_id: &str) -> String {
    format!("play_{}", hash_key(channel_id))
}
