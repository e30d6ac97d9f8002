//! Bucket record store
//!
//! Narrow get/update/update-status access to Bucket resources. Conflicts and
//! missing records are surfaced as [`Error::Conflict`] and [`Error::NotFound`]
//! so the persistence layer can retry or skip.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use kube::{api::PostParams, Api, Client, ResourceExt};
use parking_lot::RwLock;

use crate::crd::Bucket;
use crate::error::{Error, Result};

/// Storage for Bucket records with optimistic concurrency
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch the latest copy of a record
    async fn get(&self, name: &str) -> Result<Bucket>;

    /// Write metadata and spec; status is ignored
    async fn update(&self, bucket: &Bucket) -> Result<Bucket>;

    /// Write the status subresource only
    async fn update_status(&self, bucket: &Bucket) -> Result<Bucket>;
}

/// Record store backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeRecordStore {
    api: Api<Bucket>,
}

impl KubeRecordStore {
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

fn map_kube_error(name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(api_err) if api_err.code == 404 => Error::NotFound(name.to_string()),
        kube::Error::Api(api_err) if api_err.code == 409 => {
            Error::Conflict(format!("{}: {}", name, api_err.message))
        }
        other => Error::Kube(other),
    }
}

#[async_trait]
impl RecordStore for KubeRecordStore {
    async fn get(&self, name: &str) -> Result<Bucket> {
        self.api.get(name).await.map_err(|e| map_kube_error(name, e))
    }

    async fn update(&self, bucket: &Bucket) -> Result<Bucket> {
        let name = bucket.name_any();
        self.api
            .replace(&name, &PostParams::default(), bucket)
            .await
            .map_err(|e| map_kube_error(&name, e))
    }

    async fn update_status(&self, bucket: &Bucket) -> Result<Bucket> {
        let name = bucket.name_any();
        let data = serde_json::to_vec(bucket)?;
        self.api
            .replace_status(&name, &PostParams::default(), data)
            .await
            .map_err(|e| map_kube_error(&name, e))
    }
}

/// In-memory record store mimicking API server semantics
///
/// Every write bumps `resourceVersion` and is rejected with a conflict when
/// the caller's version is stale. A record marked for deletion disappears as
/// soon as its last finalizer is removed.
#[derive(Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<String, Bucket>>,
    version: AtomicU64,
    pending_conflicts: AtomicUsize,
    object_writes: AtomicUsize,
    status_writes: AtomicUsize,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    /// Insert or overwrite a record, assigning a fresh resource version
    pub fn insert(&self, mut bucket: Bucket) -> Bucket {
        bucket.metadata.resource_version = Some(self.next_version());
        bucket.metadata.generation.get_or_insert(1);
        self.records.write().insert(bucket.name_any(), bucket.clone());
        bucket
    }

    pub fn remove(&self, name: &str) {
        self.records.write().remove(name);
    }

    /// Current copy of a record
    pub fn record(&self, name: &str) -> Option<Bucket> {
        self.records.read().get(name).cloned()
    }

    /// Reject the next `count` writes with a conflict
    pub fn inject_conflicts(&self, count: usize) {
        self.pending_conflicts.store(count, Ordering::SeqCst);
    }

    pub fn object_writes(&self) -> usize {
        self.object_writes.load(Ordering::SeqCst)
    }

    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::SeqCst)
    }

    fn take_conflict(&self) -> bool {
        self.pending_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write<F>(&self, bucket: &Bucket, apply: F) -> Result<Bucket>
    where
        F: FnOnce(&mut Bucket, &Bucket),
    {
        let name = bucket.name_any();
        if self.take_conflict() {
            return Err(Error::Conflict(format!("{}: injected conflict", name)));
        }

        let mut records = self.records.write();
        let stored = records
            .get_mut(&name)
            .ok_or_else(|| Error::NotFound(name.clone()))?;
        if stored.metadata.resource_version != bucket.metadata.resource_version {
            return Err(Error::Conflict(format!(
                "{}: resource version {:?} is stale",
                name, bucket.metadata.resource_version
            )));
        }

        apply(stored, bucket);
        stored.metadata.resource_version = Some(self.next_version());
        let written = stored.clone();

        if written.is_being_deleted() && written.finalizers().is_empty() {
            records.remove(&name);
        }
        Ok(written)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get(&self, name: &str) -> Result<Bucket> {
        self.record(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn update(&self, bucket: &Bucket) -> Result<Bucket> {
        let written = self.write(bucket, |stored, incoming| {
            if spec_changed(stored, incoming) {
                let generation = stored.metadata.generation.unwrap_or(0);
                stored.metadata.generation = Some(generation + 1);
            }
            let generation = stored.metadata.generation;
            let status = stored.status.take();
            *stored = incoming.clone();
            stored.metadata.generation = generation;
            stored.status = status;
        })?;
        self.object_writes.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }

    async fn update_status(&self, bucket: &Bucket) -> Result<Bucket> {
        let written = self.write(bucket, |stored, incoming| {
            stored.status = incoming.status.clone();
        })?;
        self.status_writes.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }
}

fn spec_changed(stored: &Bucket, incoming: &Bucket) -> bool {
    serde_json::to_value(&stored.spec).ok() != serde_json::to_value(&incoming.spec).ok()
}
