//! Bounded, time-expiring response cache.
//!
//! Entries live in an [`LruCache`], so every read or write moves the entry to
//! the most-recently-used end and inserting into a full cache evicts the
//! least-recently-used one. Expiry is lazy: an entry past its deadline is
//! removed by the read that finds it.

use std::num::NonZeroUsize;
use std::time::Duration;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::time::Instant;

use crate::model::{ChatMessage, MessageContent, Role};
use crate::options::EffectiveConfig;

pub const DEFAULT_CAPACITY: usize = 100;

struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe LRU cache with per-entry TTL.
pub struct ResponseCache<T> {
    entries: Mutex<LruCache<String, CacheEntry<T>>>,
    default_ttl: Duration,
}

impl<T: Clone> ResponseCache<T> {
    /// Create a cache holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize, default_ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            default_ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<T> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if !entry.is_expired(Instant::now()) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.pop(key);
        }
        None
    }

    /// Insert or replace `key`; `ttl` overrides the default time-to-live.
    pub fn set(&self, key: impl Into<String>, value: T, ttl: Option<Duration>) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        self.entries
            .lock()
            .put(key.into(), CacheEntry { value, expires_at });
    }

    /// Whether a live entry exists. Does not change recency.
    pub fn has(&self, key: &str) -> bool {
        let mut entries = self.entries.lock();
        let expired = match entries.peek(key) {
            Some(entry) => entry.is_expired(Instant::now()),
            None => return false,
        };
        if expired {
            entries.pop(key);
        }
        !expired
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.lock().pop(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of stored entries, including expired ones not yet read.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Serialize)]
struct FingerprintMessage<'a> {
    role: Role,
    content: &'a MessageContent,
}

// Field order here is the canonical order of the encoding.
#[derive(Serialize)]
struct FingerprintInput<'a> {
    messages: Vec<FingerprintMessage<'a>>,
    model: &'a str,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
}

/// Cache key for an aggregated request.
///
/// Covers message roles and content plus model, temperature, max tokens and
/// top-p. Serialization goes through fixed-order structs, so the key does not
/// depend on map iteration order.
pub fn fingerprint(messages: &[ChatMessage], config: &EffectiveConfig) -> String {
    let input = FingerprintInput {
        messages: messages
            .iter()
            .map(|m| FingerprintMessage {
                role: m.role,
                content: &m.content,
            })
            .collect(),
        model: &config.model,
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        top_p: config.top_p,
    };

    // Serializing plain structs, strings and numbers cannot fail.
    let encoded = serde_json::to_vec(&input).unwrap_or_default();
    format!("{:x}", Sha256::digest(&encoded))
}
