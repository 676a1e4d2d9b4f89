//! Response cache for outbound calls.
//!
//! Values are stored as the serialized bytes of a provider's output, so a
//! hit returns exactly what the original call produced. Keys are SHA-256
//! digests of the operation class and the request's cache material.

use moka::sync::Cache;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;

use super::policy::{CachePolicy, OperationClass};

/// Implemented by request types to say whether, and under what key, their
/// responses may be cached.
pub trait CacheKey {
    /// Stable material identifying the request, or `None` to bypass the cache.
    fn cache_material(&self) -> Option<String>;
}

/// Derive the storage key for a request within an operation class.
pub fn derive_key(operation: OperationClass, material: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(operation.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(material.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One TTL-bounded cache per operation class.
pub struct ResponseCache {
    policy: CachePolicy,
    entries: Option<Cache<String, Arc<Vec<u8>>>>,
}

impl ResponseCache {
    pub fn new(policy: CachePolicy) -> Self {
        let entries = (policy.enabled && policy.max_entries > 0 && !policy.ttl.is_zero()).then(|| {
            Cache::builder()
                .max_capacity(policy.max_entries)
                .time_to_live(policy.ttl)
                .build()
        });
        Self { policy, entries }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.entries.as_ref()?.get(key)
    }

    pub fn insert(&self, key: String, bytes: Vec<u8>) {
        if let Some(entries) = &self.entries {
            entries.insert(key, Arc::new(bytes));
        }
    }

    pub fn invalidate_all(&self) {
        if let Some(entries) = &self.entries {
            entries.invalidate_all();
        }
    }
}

/// Hit/miss counters for one operation class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
}

impl CacheMetrics {
    /// Compute the hit rate as a fraction (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
