//! Converged-generation cache
//!
//! Remembers, per bucket, the last generation that was fully converged on
//! every target backend so Observe can skip the backend existence checks
//! until the entry expires. Label edits do not bump the generation, so each
//! entry also records the targets it converged on.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

#[derive(Clone, Debug)]
struct Entry {
    generation: i64,
    targets: Vec<String>,
    stored_at: Instant,
}

/// TTL cache of converged bucket generations
#[derive(Debug)]
pub struct BucketCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, Entry>>,
}

impl BucketCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Record `generation` of `bucket` as converged on `targets`
    pub fn set_converged(&self, bucket: &str, generation: i64, targets: &[String]) {
        self.entries.write().insert(
            bucket.to_string(),
            Entry {
                generation,
                targets: targets.to_vec(),
                stored_at: Instant::now(),
            },
        );
    }

    /// Whether `generation` of `bucket` converged on exactly `targets` within the TTL
    pub fn is_converged(&self, bucket: &str, generation: i64, targets: &[String]) -> bool {
        self.entries.read().get(bucket).is_some_and(|e| {
            e.generation == generation
                && e.targets.as_slice() == targets
                && e.stored_at.elapsed() < self.ttl
        })
    }

    pub fn evict(&self, bucket: &str) {
        self.entries.write().remove(bucket);
    }

    /// Drop expired entries, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.stored_at.elapsed() < self.ttl);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
