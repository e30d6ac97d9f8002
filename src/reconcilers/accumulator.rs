//! Per-call accumulator of backend state and the quorum status fold
//!
//! Backend tasks write their conditions concurrently into a
//! [`BucketBackends`]; once they settle the reconciler takes a snapshot over
//! the target backends and folds it into the bucket's Ready/Synced
//! conditions with [`compute_quorum`].

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::crd::{BackendInfo, Condition};

use super::subresources::Subresource;

/// Backend conditions keyed by bucket name, then backend name
#[derive(Debug, Default)]
pub struct BucketBackends {
    backends: RwLock<HashMap<String, HashMap<String, BackendInfo>>>,
}

impl BucketBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from previously observed backend state
    pub fn seed(&self, bucket: &str, backends: &BTreeMap<String, BackendInfo>) {
        let mut guard = self.backends.write();
        let entry = guard.entry(bucket.to_string()).or_default();
        for (name, info) in backends {
            entry.insert(name.clone(), info.clone());
        }
    }

    pub fn set_bucket_condition(&self, bucket: &str, backend: &str, condition: Condition) {
        let mut guard = self.backends.write();
        let backends = guard.entry(bucket.to_string()).or_default();
        match backends.get_mut(backend) {
            Some(info) => info.bucket_condition = condition,
            None => {
                backends.insert(backend.to_string(), BackendInfo::new(condition));
            }
        }
    }

    /// Set or clear a subresource condition
    ///
    /// A backend without an entry gets one in the Creating state so that the
    /// subresource result is not lost.
    pub fn set_subresource_condition(
        &self,
        bucket: &str,
        backend: &str,
        subresource: Subresource,
        condition: Option<Condition>,
    ) {
        let mut guard = self.backends.write();
        let info = guard
            .entry(bucket.to_string())
            .or_default()
            .entry(backend.to_string())
            .or_insert_with(|| BackendInfo::new(Condition::creating()));
        *subresource.condition_mut(info) = condition;
    }

    pub fn delete_backend(&self, bucket: &str, backend: &str) {
        if let Some(backends) = self.backends.write().get_mut(bucket) {
            backends.remove(backend);
        }
    }

    pub fn backend_info(&self, bucket: &str, backend: &str) -> Option<BackendInfo> {
        self.backends
            .read()
            .get(bucket)
            .and_then(|b| b.get(backend))
            .cloned()
    }

    /// Copy of the entries for `names` that are currently known
    pub fn snapshot(&self, bucket: &str, names: &[String]) -> BTreeMap<String, BackendInfo> {
        let guard = self.backends.read();
        let Some(backends) = guard.get(bucket) else {
            return BTreeMap::new();
        };
        names
            .iter()
            .filter_map(|name| backends.get(name).map(|info| (name.clone(), info.clone())))
            .collect()
    }

    /// Number of `targets` whose bucket condition is Available
    pub fn count_available(&self, bucket: &str, targets: &[String]) -> usize {
        count_available(&self.snapshot(bucket, targets), targets)
    }

    /// Whether `subresource` is Available on every target
    pub fn subresource_available_on_all(
        &self,
        bucket: &str,
        targets: &[String],
        subresource: Subresource,
    ) -> bool {
        let snapshot = self.snapshot(bucket, targets);
        targets.iter().all(|t| {
            snapshot
                .get(t)
                .and_then(|info| subresource.condition(info))
                .is_some_and(Condition::is_available)
        })
    }

    /// Whether no target carries a condition for `subresource` any more
    pub fn subresource_removed_from_all(
        &self,
        bucket: &str,
        targets: &[String],
        subresource: Subresource,
    ) -> bool {
        let snapshot = self.snapshot(bucket, targets);
        targets.iter().all(|t| {
            snapshot
                .get(t)
                .is_some_and(|info| subresource.condition(info).is_none())
        })
    }
}

fn count_available(snapshot: &BTreeMap<String, BackendInfo>, targets: &[String]) -> usize {
    targets
        .iter()
        .filter(|t| {
            snapshot
                .get(t.as_str())
                .is_some_and(|info| info.bucket_condition.is_available())
        })
        .count()
}

/// Overall conditions derived from per-backend state
#[derive(Clone, Debug)]
pub struct QuorumStatus {
    pub ready: Condition,
    pub synced: Condition,
    pub available: usize,
}

impl QuorumStatus {
    /// Ready is Available and Synced is ReconcileSuccess
    pub fn is_converged(&self) -> bool {
        self.ready.is_available() && self.synced.is_reconcile_success()
    }
}

/// Fold backend state for `targets` into Ready and Synced conditions
///
/// Ready is Available once at least `min_replicas` targets are Available.
/// Synced succeeds only when every target is Available and Ready holds; an
/// empty target set is vacuously synced. Entries for backends outside
/// `targets` are ignored.
pub fn compute_quorum(
    snapshot: &BTreeMap<String, BackendInfo>,
    targets: &[String],
    min_replicas: usize,
) -> QuorumStatus {
    let available = count_available(snapshot, targets);

    let ready = if available >= min_replicas {
        Condition::available()
    } else {
        Condition::unavailable(format!(
            "bucket is available on {} of {} required backends",
            available, min_replicas
        ))
    };

    let synced = if targets.is_empty() || (available >= targets.len() && ready.is_available()) {
        Condition::reconcile_success()
    } else {
        let mut missing: Vec<&str> = targets
            .iter()
            .filter(|t| {
                !snapshot
                    .get(t.as_str())
                    .is_some_and(|info| info.bucket_condition.is_available())
            })
            .map(String::as_str)
            .collect();
        missing.sort_unstable();
        Condition::reconcile_error(format!(
            "bucket is not available on backends: [{}]",
            missing.join(", ")
        ))
    };

    QuorumStatus {
        ready,
        synced,
        available,
    }
}
